//! ContraNorm: contrastive feature normalization between encoder layers.
//!
//! Deep message passing drives node representations toward each other
//! (over-smoothing). PairNorm fights this by re-centering; ContraNorm instead
//! pushes every representation away from a softmax-weighted "negative"
//! computed from pairwise similarities, then applies layer normalization.
//!
//! ```text
//! x_hat = l2_normalize_rows(x)
//! dcn:  S = softmax_rows(x_hatᵀ x_hat / τ)   (F x F)    x_neg = x S
//! cn:   S = softmax_rows(x_hat x_hatᵀ / τ)   (N x N)    x_neg = S x
//! out   = LayerNorm((1 + s) x - s x_neg)
//! ```
//!
//! | Mode | Similarity over | Cost |
//! |------|-----------------|------|
//! | `dcn` | feature dimensions | O(N F²) |
//! | `cn` | nodes | O(N² F) |
//!
//! With `scale = 0` the layer is plain layer normalization.
//!
//! # Reference
//!
//! Guo et al., "ContraNorm: A Contrastive Learning Perspective on
//! Oversmoothing and Beyond", ICLR 2023.

use std::fmt;
use std::str::FromStr;

use candle_core::{Tensor, D};
use candle_nn::{Init, VarBuilder};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::ops::l2_normalize;

/// Which similarity the negative term is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormType {
    /// Decorrelate across feature columns (F x F similarity).
    #[default]
    Dcn,
    /// Contrast across nodes (N x N similarity).
    Cn,
}

impl FromStr for NormType {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "dcn" => Ok(Self::Dcn),
            "cn" => Ok(Self::Cn),
            _ => Err(Error::InvalidConfig(format!(
                "unsupported norm type `{s}`; expected `dcn` or `cn`"
            ))),
        }
    }
}

impl fmt::Display for NormType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Dcn => "dcn",
            Self::Cn => "cn",
        })
    }
}

/// ContraNorm configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormConfig {
    /// Similarity mode (default: dcn).
    pub norm_type: NormType,
    /// Strength of the push away from the negative term, >= 0 (default: 1.0).
    pub scale: f64,
    /// Softmax temperature, > 0 (default: 1.0).
    pub tau: f64,
}

impl Default for NormConfig {
    fn default() -> Self {
        Self {
            norm_type: NormType::Dcn,
            scale: 1.0,
            tau: 1.0,
        }
    }
}

impl NormConfig {
    pub fn new(norm_type: NormType, scale: f64) -> Self {
        Self {
            norm_type,
            scale,
            ..Default::default()
        }
    }

    pub fn with_norm_type(mut self, norm_type: NormType) -> Self {
        self.norm_type = norm_type;
        self
    }

    pub fn with_scale(mut self, scale: f64) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_tau(mut self, tau: f64) -> Self {
        self.tau = tau;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.scale >= 0.0 && self.scale.is_finite()) {
            return Err(Error::InvalidConfig(format!(
                "norm scale must be finite and >= 0, got {}",
                self.scale
            )));
        }
        if !(self.tau > 0.0 && self.tau.is_finite()) {
            return Err(Error::InvalidConfig(format!(
                "norm tau must be finite and > 0, got {}",
                self.tau
            )));
        }
        Ok(())
    }
}

/// Per-node layer normalization with learned affine parameters.
///
/// ```text
/// y = weight * (x - mean) / sqrt(var + eps) + bias
/// ```
///
/// Composed from elementary tensor ops so it stays differentiable end to end.
#[derive(Debug, Clone)]
pub struct LayerNorm {
    weight: Tensor,
    bias: Tensor,
    eps: f64,
}

impl LayerNorm {
    pub const DEFAULT_EPS: f64 = 1e-5;

    /// Create with `weight = 1`, `bias = 0`, stored under `vb`.
    pub fn new(dim: usize, vb: VarBuilder) -> Result<Self> {
        if dim == 0 {
            return Err(Error::InvalidConfig("layer norm dimension must be > 0".into()));
        }
        let weight = vb.get_with_hints(dim, "weight", Init::Const(1.0))?;
        let bias = vb.get_with_hints(dim, "bias", Init::Const(0.0))?;
        Ok(Self {
            weight,
            bias,
            eps: Self::DEFAULT_EPS,
        })
    }

    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let mean = x.mean_keepdim(D::Minus1)?;
        let centered = x.broadcast_sub(&mean)?;
        let var = centered.sqr()?.mean_keepdim(D::Minus1)?;
        let std = (var + self.eps)?.sqrt()?;
        let normed = centered.broadcast_div(&std)?;
        Ok(normed
            .broadcast_mul(&self.weight)?
            .broadcast_add(&self.bias)?)
    }
}

/// ContraNorm layer, see the module docs.
#[derive(Debug, Clone)]
pub struct NormLayer {
    config: NormConfig,
    layer_norm: LayerNorm,
}

impl NormLayer {
    /// Create a norm layer for `num_hidden` features.
    ///
    /// Parameters live under `vb.pp("layer_norm")`.
    pub fn new(config: NormConfig, num_hidden: usize, vb: VarBuilder) -> Result<Self> {
        config.validate()?;
        let layer_norm = LayerNorm::new(num_hidden, vb.pp("layer_norm"))?;
        Ok(Self { config, layer_norm })
    }

    pub fn config(&self) -> &NormConfig {
        &self.config
    }

    /// Apply ContraNorm to `x` (N x num_hidden).
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let NormConfig {
            norm_type,
            scale,
            tau,
        } = self.config;

        let norm_x = l2_normalize(x)?;
        let x_neg = match norm_type {
            NormType::Dcn => {
                let sim = (norm_x.t()?.matmul(&norm_x)? / tau)?;
                let sim = candle_nn::ops::softmax(&sim, D::Minus1)?;
                x.matmul(&sim)?
            }
            NormType::Cn => {
                let sim = (norm_x.matmul(&norm_x.t()?)? / tau)?;
                let sim = candle_nn::ops::softmax(&sim, D::Minus1)?;
                sim.matmul(x)?
            }
        };

        let mixed = ((x * (1.0 + scale))? - (x_neg * scale)?)?;
        self.layer_norm.forward(&mixed)
    }
}
