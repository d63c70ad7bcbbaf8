//! Graph convolutional encoder producing node embeddings.
//!
//! Two structural variants, fixed at construction:
//!
//! - **Plain**: `x <- act(norm(conv_i(x)))` for each of the k layers.
//! - **Skip**: a linear projection of the raw input runs alongside the first
//!   layer; every later layer reads the sum of all previous outputs.
//!
//! ```text
//! h_0 = act(norm(conv_0(x)))
//! hs  = [fc_skip(x), h_0]
//! h_i = act(norm(conv_i(Σ hs)))   hs.push(h_i)     for i in 1..k
//! out = h_{k-1}
//! ```
//!
//! The optional [`NormLayer`] is a single module shared by every layer.

use candle_core::Tensor;
use candle_nn::{linear, Linear, Module, VarBuilder};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::activation::Activation;
use crate::conv::{ConvKind, ConvLayer};
use crate::error::{Error, Result};
use crate::graph::EdgeIndex;
use crate::norm::{NormConfig, NormLayer};

/// Encoder configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    /// Input feature dimension F (must be set).
    pub in_channels: usize,
    /// Hidden / embedding dimension H (default: 128).
    pub hidden_channels: usize,
    /// Nonlinearity after every layer (default: relu).
    pub activation: Activation,
    /// Base convolution (default: gcn).
    pub conv: ConvKind,
    /// Number of convolution layers, >= 2 (default: 2).
    pub k: usize,
    /// Use skip connections (default: false).
    pub skip: bool,
    /// Optional ContraNorm between convolution and activation.
    pub norm: Option<NormConfig>,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            in_channels: 0,
            hidden_channels: 128,
            activation: Activation::Relu,
            conv: ConvKind::Gcn,
            k: 2,
            skip: false,
            norm: None,
        }
    }
}

impl EncoderConfig {
    pub fn new(in_channels: usize, hidden_channels: usize) -> Self {
        Self {
            in_channels,
            hidden_channels,
            ..Default::default()
        }
    }

    pub fn with_activation(mut self, activation: Activation) -> Self {
        self.activation = activation;
        self
    }

    pub fn with_conv(mut self, conv: ConvKind) -> Self {
        self.conv = conv;
        self
    }

    pub fn with_layers(mut self, k: usize) -> Self {
        self.k = k;
        self
    }

    pub fn with_skip(mut self, skip: bool) -> Self {
        self.skip = skip;
        self
    }

    pub fn with_norm(mut self, norm: NormConfig) -> Self {
        self.norm = Some(norm);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.k < 2 {
            return Err(Error::InvalidConfig(format!(
                "encoder needs k >= 2 layers, got {}",
                self.k
            )));
        }
        if self.in_channels == 0 || self.hidden_channels == 0 {
            return Err(Error::InvalidConfig(format!(
                "encoder dimensions must be > 0, got in={} hidden={}",
                self.in_channels, self.hidden_channels
            )));
        }
        if let Some(norm) = &self.norm {
            norm.validate()?;
        }
        Ok(())
    }
}

/// Stack of k graph convolutions; see the module docs.
pub struct Encoder {
    convs: Vec<ConvLayer>,
    fc_skip: Option<Linear>,
    norm: Option<NormLayer>,
    activation: Activation,
    conv_kind: ConvKind,
    in_channels: usize,
    hidden_channels: usize,
}

impl Encoder {
    /// Build the encoder.
    ///
    /// Parameters: `conv.{i}.*`, `fc_skip.*` (skip variant), `norm.layer_norm.*`.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` when `k < 2`, a dimension is zero, or the norm config
    /// is invalid.
    pub fn new(config: &EncoderConfig, vb: VarBuilder) -> Result<Self> {
        config.validate()?;
        let EncoderConfig {
            in_channels,
            hidden_channels,
            activation,
            conv,
            k,
            skip,
            ..
        } = *config;

        let mut convs = Vec::with_capacity(k);
        convs.push(conv.build(in_channels, hidden_channels, vb.pp("conv.0"))?);
        for i in 1..k {
            convs.push(conv.build(hidden_channels, hidden_channels, vb.pp(format!("conv.{i}")))?);
        }

        let fc_skip = if skip {
            Some(linear(in_channels, hidden_channels, vb.pp("fc_skip"))?)
        } else {
            None
        };

        let norm = config
            .norm
            .clone()
            .map(|cfg| NormLayer::new(cfg, hidden_channels, vb.pp("norm")))
            .transpose()?;

        debug!(
            in_channels,
            hidden_channels,
            k,
            skip,
            conv = %conv,
            activation = %activation,
            norm = ?norm.as_ref().map(|n| n.config().norm_type),
            "built encoder"
        );

        Ok(Self {
            convs,
            fc_skip,
            norm,
            activation,
            conv_kind: conv,
            in_channels,
            hidden_channels,
        })
    }

    pub fn in_channels(&self) -> usize {
        self.in_channels
    }

    pub fn hidden_channels(&self) -> usize {
        self.hidden_channels
    }

    pub fn num_layers(&self) -> usize {
        self.convs.len()
    }

    pub fn has_skip(&self) -> bool {
        self.fc_skip.is_some()
    }

    /// Embed nodes.
    ///
    /// # Arguments
    /// - `x`: Node features (N x in_channels)
    /// - `edges`: Directed edges over the N nodes
    ///
    /// # Returns
    /// - Embeddings (N x hidden_channels)
    pub fn forward(&self, x: &Tensor, edges: &EdgeIndex) -> Result<Tensor> {
        let (num_nodes, features) = x.dims2()?;
        if features != self.in_channels {
            return Err(Error::DimensionMismatch {
                expected: self.in_channels,
                got: features,
            });
        }
        let adj = self.conv_kind.propagation(edges, num_nodes, x.device())?;
        let adj = adj.to_dtype(x.dtype())?;

        match &self.fc_skip {
            None => {
                let mut h = x.clone();
                for conv in &self.convs {
                    h = self.layer(conv, &h, &adj)?;
                }
                Ok(h)
            }
            Some(fc_skip) => {
                let mut h = self.layer(&self.convs[0], x, &adj)?;
                // Running sum of every output so far, skip projection included.
                let mut acc = (fc_skip.forward(x)? + &h)?;
                for conv in &self.convs[1..] {
                    h = self.layer(conv, &acc, &adj)?;
                    acc = (acc + &h)?;
                }
                Ok(h)
            }
        }
    }

    /// conv -> norm -> activation
    fn layer(&self, conv: &ConvLayer, x: &Tensor, adj: &Tensor) -> Result<Tensor> {
        let mut h = conv.forward(x, adj)?;
        if let Some(norm) = &self.norm {
            h = norm.forward(&h)?;
        }
        Ok(self.activation.forward(&h)?)
    }
}
