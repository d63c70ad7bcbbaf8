//! Message-passing convolutional layers used as the encoder's base model.
//!
//! - [`GCNConv`]: Graph Convolutional Network (Kipf & Welling, 2017)
//! - [`SAGEConv`]: GraphSAGE with mean aggregation (Hamilton et al., 2017)
//!
//! # Message Passing Framework
//!
//! ```text
//! h_i^{(l+1)} = UPDATE(h_i^{(l)}, AGGREGATE({MESSAGE(h_j^{(l)}) : j in N(i)}))
//! ```
//!
//! Both layers take a dense propagation matrix built once per forward pass by
//! [`ConvKind::propagation`], so a k-layer encoder pays for it only once.

use std::fmt;
use std::str::FromStr;

use candle_core::{Device, Tensor};
use candle_nn::{linear, linear_no_bias, Init, Linear, Module, VarBuilder};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::graph::EdgeIndex;
use crate::ops::xavier_uniform;

/// Which graph convolution the encoder stacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConvKind {
    /// [`GCNConv`] over `D^{-1/2} (A + I) D^{-1/2}`.
    #[default]
    Gcn,
    /// [`SAGEConv`] over the row-normalized adjacency.
    Sage,
}

impl ConvKind {
    /// Propagation matrix this layer type expects, shape (N x N).
    pub fn propagation(&self, edges: &EdgeIndex, num_nodes: usize, device: &Device) -> Result<Tensor> {
        match self {
            Self::Gcn => edges.gcn_normalized(num_nodes, device),
            Self::Sage => edges.mean_aggregation(num_nodes, device),
        }
    }

    /// Create one layer of this kind.
    pub fn build(&self, in_features: usize, out_features: usize, vb: VarBuilder) -> Result<ConvLayer> {
        Ok(match self {
            Self::Gcn => ConvLayer::Gcn(GCNConv::new(in_features, out_features, vb)?),
            Self::Sage => ConvLayer::Sage(SAGEConv::new(in_features, out_features, vb)?),
        })
    }
}

impl FromStr for ConvKind {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gcn" | "gcnconv" => Ok(Self::Gcn),
            "sage" | "sageconv" | "graphsage" => Ok(Self::Sage),
            other => Err(Error::InvalidConfig(format!(
                "unknown convolution `{other}`; expected `gcn` or `sage`"
            ))),
        }
    }
}

impl fmt::Display for ConvKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Gcn => "gcn",
            Self::Sage => "sage",
        })
    }
}

/// Graph Convolutional Network layer.
///
/// Implements: H' = P (H W) + b, with P = D^{-1/2} (A + I) D^{-1/2}
///
/// The bias is added after aggregation and initialized to zero; W is
/// Glorot-uniform.
///
/// # Reference
///
/// Kipf & Welling, "Semi-Supervised Classification with Graph Convolutional
/// Networks", ICLR 2017.
pub struct GCNConv {
    lin: Linear,
    bias: Tensor,
}

impl GCNConv {
    /// Create a new GCN layer.
    ///
    /// # Arguments
    /// - `in_features`: Input feature dimension
    /// - `out_features`: Output feature dimension
    /// - `vb`: Variable builder; creates `weight` (out x in) and `bias` (out)
    pub fn new(in_features: usize, out_features: usize, vb: VarBuilder) -> Result<Self> {
        let weight = xavier_uniform(in_features, out_features, "weight", &vb)?;
        let bias = vb.get_with_hints(out_features, "bias", Init::Const(0.0))?;
        Ok(Self {
            lin: Linear::new(weight, None),
            bias,
        })
    }

    /// Forward pass.
    ///
    /// # Arguments
    /// - `x`: Node features (N x in_features)
    /// - `adj`: GCN-normalized propagation matrix (N x N)
    ///
    /// # Returns
    /// - Node embeddings (N x out_features)
    pub fn forward(&self, x: &Tensor, adj: &Tensor) -> Result<Tensor> {
        let h = self.lin.forward(x)?;
        Ok(adj.matmul(&h)?.broadcast_add(&self.bias)?)
    }
}

/// GraphSAGE convolutional layer with mean aggregation.
///
/// h_i' = W_n · mean({h_j : j in N(i)}) + b + W_r · h_i
///
/// # Reference
///
/// Hamilton et al., "Inductive Representation Learning on Large Graphs",
/// NeurIPS 2017.
pub struct SAGEConv {
    lin_neighbor: Linear,
    lin_root: Linear,
}

impl SAGEConv {
    /// Create a new GraphSAGE layer.
    pub fn new(in_features: usize, out_features: usize, vb: VarBuilder) -> Result<Self> {
        let lin_neighbor = linear(in_features, out_features, vb.pp("lin_neighbor"))?;
        let lin_root = linear_no_bias(in_features, out_features, vb.pp("lin_root"))?;
        Ok(Self {
            lin_neighbor,
            lin_root,
        })
    }

    /// Forward pass.
    ///
    /// # Arguments
    /// - `x`: Node features (N x in_features)
    /// - `adj`: Row-normalized adjacency (N x N)
    pub fn forward(&self, x: &Tensor, adj: &Tensor) -> Result<Tensor> {
        let h_agg = adj.matmul(x)?;
        let h_neighbor = self.lin_neighbor.forward(&h_agg)?;
        let h_root = self.lin_root.forward(x)?;
        Ok((h_neighbor + h_root)?)
    }
}

/// One encoder layer, either kind.
pub enum ConvLayer {
    Gcn(GCNConv),
    Sage(SAGEConv),
}

impl ConvLayer {
    pub fn forward(&self, x: &Tensor, adj: &Tensor) -> Result<Tensor> {
        match self {
            Self::Gcn(conv) => conv.forward(x, adj),
            Self::Sage(conv) => conv.forward(x, adj),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::DType;
    use candle_nn::VarMap;

    #[test]
    fn test_gcn_forward_shape() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

        let gcn = GCNConv::new(64, 32, vb).unwrap();

        let x = Tensor::randn(0f32, 1f32, (10, 64), &device).unwrap();
        let adj = EdgeIndex::ring(10).gcn_normalized(10, &device).unwrap();

        let out = gcn.forward(&x, &adj).unwrap();
        assert_eq!(out.dims(), &[10, 32]);
    }

    #[test]
    fn test_gcn_params_named() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let _gcn = GCNConv::new(8, 4, vb.pp("conv")).unwrap();

        let data = varmap.data().lock().unwrap();
        assert_eq!(data["conv.weight"].dims(), &[4, 8]);
        let bias = data["conv.bias"].to_vec1::<f32>().unwrap();
        assert!(bias.iter().all(|&b| b == 0.0));
    }

    #[test]
    fn test_gcn_identity_weight_averages_neighbors() {
        let device = Device::Cpu;
        let mut varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let gcn = GCNConv::new(2, 2, vb).unwrap();
        varmap
            .set_one("weight", Tensor::eye(2, DType::F32, &device).unwrap())
            .unwrap();

        // Ring of 4: normalized adjacency is 1/3 on self + both neighbors.
        let x = Tensor::from_vec(
            vec![3f32, 0.0, 0.0, 3.0, 3.0, 0.0, 0.0, 3.0],
            (4, 2),
            &device,
        )
        .unwrap();
        let adj = EdgeIndex::ring(4).gcn_normalized(4, &device).unwrap();
        let out = gcn.forward(&x, &adj).unwrap().to_vec2::<f32>().unwrap();
        assert!((out[0][0] - 1.0).abs() < 1e-5);
        assert!((out[0][1] - 2.0).abs() < 1e-5);
    }

    #[test]
    fn test_sage_forward_shape() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

        let sage = SAGEConv::new(64, 32, vb).unwrap();

        let x = Tensor::randn(0f32, 1f32, (10, 64), &device).unwrap();
        let adj = EdgeIndex::ring(10).mean_aggregation(10, &device).unwrap();

        let out = sage.forward(&x, &adj).unwrap();
        assert_eq!(out.dims(), &[10, 32]);
    }

    #[test]
    fn test_conv_kind_parse() {
        assert_eq!("GCN".parse::<ConvKind>().unwrap(), ConvKind::Gcn);
        assert_eq!("graphsage".parse::<ConvKind>().unwrap(), ConvKind::Sage);
        assert!(matches!(
            "gat".parse::<ConvKind>(),
            Err(Error::InvalidConfig(_))
        ));
    }
}
