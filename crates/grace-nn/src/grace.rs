//! GRACE: graph contrastive representation learning.
//!
//! Two augmented views of a graph go through the same [`Encoder`]; node `i`
//! in view 1 and node `i` in view 2 form the positive pair, every other node
//! in either view is a negative.
//!
//! ```text
//! h = fc2(elu(fc1(z)))                              projection head H -> P -> H
//! θ(a, b) = cos(a, b),   f(x) = exp(x / τ)
//!
//! ℓ(u_i, v_i) = -log  f(θ(u_i, v_i))
//!                     ---------------------------------------------------
//!                     Σ_j f(θ(u_i, v_j)) + Σ_{j≠i} f(θ(u_i, u_j))
//!
//! L = 1/2 (ℓ(h1, h2) + ℓ(h2, h1))       reduced by mean, sum, or not at all
//! ```
//!
//! ## Memory
//!
//! [`Grace::semi_loss`] materializes two N x N similarity matrices. For large
//! graphs, [`Grace::batched_semi_loss`] walks the rows in chunks of B and only
//! ever holds B x N, producing the same per-node values.
//!
//! ## Temperature
//!
//! τ = 0.5 is the default. Low τ sharpens the softmax over negatives and
//! focuses the gradient on the hardest ones.
//!
//! ## Reference
//!
//! Zhu et al., "Deep Graph Contrastive Representation Learning", ICML GRL+
//! Workshop 2020.

use std::fmt;
use std::str::FromStr;

use candle_core::{DType, Tensor};
use candle_nn::{linear, Linear, Module, VarBuilder};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::encoder::{Encoder, EncoderConfig};
use crate::error::{Error, Result};
use crate::graph::EdgeIndex;
use crate::ops::{diagonal, l2_normalize};

/// Per-node contrastive objective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LossType {
    /// InfoNCE with in-batch negatives from both views.
    #[default]
    Info,
    /// Positive-pair alignment only.
    Align,
    /// Negative-only uniformity term.
    Uniform,
}

impl FromStr for LossType {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "info" => Ok(Self::Info),
            "align" => Ok(Self::Align),
            "uniform" => Ok(Self::Uniform),
            _ => Err(Error::NotImplemented(format!("loss type `{s}`"))),
        }
    }
}

impl fmt::Display for LossType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Info => "info",
            Self::Align => "align",
            Self::Uniform => "uniform",
        })
    }
}

/// How [`Grace::loss`] reduces the per-node losses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reduction {
    /// Scalar mean.
    #[default]
    Mean,
    /// Scalar sum.
    Sum,
    /// Per-node vector (N,).
    None,
}

/// Options for [`Grace::loss`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LossConfig {
    pub reduction: Reduction,
    /// Row-chunk size for the memory-bounded path. When set, `loss_type` is
    /// ignored and the InfoNCE objective is used.
    pub batch_size: Option<usize>,
    pub loss_type: LossType,
}

impl LossConfig {
    pub fn with_reduction(mut self, reduction: Reduction) -> Self {
        self.reduction = reduction;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    pub fn with_loss_type(mut self, loss_type: LossType) -> Self {
        self.loss_type = loss_type;
        self
    }
}

/// Model configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraceConfig {
    /// Encoder; its `hidden_channels` is the embedding size H.
    pub encoder: EncoderConfig,
    /// Projection head hidden size P (default: 128).
    pub num_proj_hidden: usize,
    /// Contrastive temperature τ > 0 (default: 0.5).
    pub tau: f64,
}

impl Default for GraceConfig {
    fn default() -> Self {
        Self {
            encoder: EncoderConfig::default(),
            num_proj_hidden: 128,
            tau: 0.5,
        }
    }
}

impl GraceConfig {
    pub fn new(encoder: EncoderConfig) -> Self {
        Self {
            encoder,
            ..Default::default()
        }
    }

    /// Parse from JSON; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn with_proj_hidden(mut self, num_proj_hidden: usize) -> Self {
        self.num_proj_hidden = num_proj_hidden;
        self
    }

    pub fn with_tau(mut self, tau: f64) -> Self {
        self.tau = tau;
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.encoder.validate()?;
        if self.num_proj_hidden == 0 {
            return Err(Error::InvalidConfig("num_proj_hidden must be > 0".into()));
        }
        if !(self.tau > 0.0 && self.tau.is_finite()) {
            return Err(Error::InvalidConfig(format!(
                "tau must be finite and > 0, got {}",
                self.tau
            )));
        }
        Ok(())
    }
}

/// Encoder plus projection head plus contrastive loss.
pub struct Grace {
    encoder: Encoder,
    fc1: Linear,
    fc2: Linear,
    tau: f64,
    num_hidden: usize,
}

impl Grace {
    /// Wrap an existing encoder.
    ///
    /// The projection head lives under `vb.pp("fc1")` / `vb.pp("fc2")`.
    pub fn new(encoder: Encoder, num_proj_hidden: usize, tau: f64, vb: VarBuilder) -> Result<Self> {
        if !(tau > 0.0 && tau.is_finite()) {
            return Err(Error::InvalidConfig(format!(
                "tau must be finite and > 0, got {tau}"
            )));
        }
        if num_proj_hidden == 0 {
            return Err(Error::InvalidConfig("num_proj_hidden must be > 0".into()));
        }
        let num_hidden = encoder.hidden_channels();
        let fc1 = linear(num_hidden, num_proj_hidden, vb.pp("fc1"))?;
        let fc2 = linear(num_proj_hidden, num_hidden, vb.pp("fc2"))?;

        debug!(num_hidden, num_proj_hidden, tau, "built GRACE model");

        Ok(Self {
            encoder,
            fc1,
            fc2,
            tau,
            num_hidden,
        })
    }

    /// Build encoder (under `vb.pp("encoder")`) and head from one config.
    pub fn from_config(config: &GraceConfig, vb: VarBuilder) -> Result<Self> {
        config.validate()?;
        let encoder = Encoder::new(&config.encoder, vb.pp("encoder"))?;
        Self::new(encoder, config.num_proj_hidden, config.tau, vb)
    }

    pub fn encoder(&self) -> &Encoder {
        &self.encoder
    }

    pub fn tau(&self) -> f64 {
        self.tau
    }

    pub fn num_hidden(&self) -> usize {
        self.num_hidden
    }

    /// Node embeddings (N x H).
    pub fn forward(&self, x: &Tensor, edges: &EdgeIndex) -> Result<Tensor> {
        self.encoder.forward(x, edges)
    }

    /// `fc2(elu(fc1(z)))`, same shape as `z`.
    pub fn projection(&self, z: &Tensor) -> Result<Tensor> {
        let z = self.fc1.forward(z)?.elu(1.0)?;
        Ok(self.fc2.forward(&z)?)
    }

    /// Pairwise cosine similarity, `normalize(z1) · normalize(z2)ᵀ`.
    pub fn sim(&self, z1: &Tensor, z2: &Tensor) -> Result<Tensor> {
        let z1 = l2_normalize(z1)?;
        let z2 = l2_normalize(z2)?;
        Ok(z1.matmul(&z2.t()?)?)
    }

    /// `exp(sim(z1, z2) / τ)`
    fn exp_sim(&self, z1: &Tensor, z2: &Tensor) -> Result<Tensor> {
        Ok((self.sim(z1, z2)? / self.tau)?.exp()?)
    }

    /// Per-node loss of `z1` against `z2`, shape (N,).
    ///
    /// | Type | ℓ_i |
    /// |------|-----|
    /// | Info | `-log(pos_i / neg_i)` |
    /// | Align | `-log(pos_i)` |
    /// | Uniform | `-log(1 / neg_i)` |
    ///
    /// with `pos_i = f(θ(z1_i, z2_i))` and
    /// `neg_i = Σ_j f(θ(z1_i, z1_j)) + Σ_j f(θ(z1_i, z2_j)) - f(θ(z1_i, z1_i))`.
    pub fn semi_loss(&self, z1: &Tensor, z2: &Tensor, loss_type: LossType) -> Result<Tensor> {
        let between = self.exp_sim(z1, z2)?;
        let pos = diagonal(&between)?;
        let ratio = match loss_type {
            LossType::Align => pos,
            LossType::Info | LossType::Uniform => {
                let refl = self.exp_sim(z1, z1)?;
                let denom = ((refl.sum(1)? + between.sum(1)?)? - diagonal(&refl)?)?;
                if loss_type == LossType::Info {
                    (pos / denom)?
                } else {
                    denom.recip()?
                }
            }
        };
        Ok(ratio.log()?.neg()?)
    }

    /// InfoNCE [`semi_loss`](Self::semi_loss) computed in row chunks.
    ///
    /// Memory is O(B·N) instead of O(N²). Chunk `[s, s + B)` is compared with
    /// all of `z1` and `z2`; its positive and self terms sit in columns
    /// `[s, s + B)`. Chunks are concatenated in node order, so the result
    /// matches `semi_loss(z1, z2, LossType::Info)` up to float rounding.
    ///
    /// Only the InfoNCE objective has a batched form.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if `batch_size == 0`.
    pub fn batched_semi_loss(&self, z1: &Tensor, z2: &Tensor, batch_size: usize) -> Result<Tensor> {
        if batch_size == 0 {
            return Err(Error::InvalidConfig("batch_size must be > 0".into()));
        }
        let num_nodes = z1.dim(0)?;
        if num_nodes == 0 {
            return Ok(Tensor::zeros(0, z1.dtype(), z1.device())?);
        }
        let num_batches = num_nodes.div_ceil(batch_size);
        let mut losses = Vec::with_capacity(num_batches);

        for i in 0..num_batches {
            let start = i * batch_size;
            let len = batch_size.min(num_nodes - start);
            trace!(chunk = i, start, len, "batched semi-loss chunk");

            let rows = z1.narrow(0, start, len)?;
            let refl = self.exp_sim(&rows, z1)?; // [B, N]
            let between = self.exp_sim(&rows, z2)?; // [B, N]

            let pos = diagonal(&between.narrow(1, start, len)?)?;
            let self_sim = diagonal(&refl.narrow(1, start, len)?)?;
            let denom = ((refl.sum(1)? + between.sum(1)?)? - self_sim)?;
            losses.push((pos / denom)?.log()?.neg()?);
        }

        Ok(Tensor::cat(&losses, 0)?)
    }

    /// Symmetric contrastive loss between two views' embeddings.
    ///
    /// Both embeddings go through the projection head, then
    /// `0.5 * (ℓ(h1, h2) + ℓ(h2, h1))` is reduced per `config.reduction`.
    /// With `config.batch_size` set, the batched InfoNCE path is used
    /// regardless of `config.loss_type`.
    pub fn loss(&self, z1: &Tensor, z2: &Tensor, config: &LossConfig) -> Result<Tensor> {
        let h1 = self.projection(z1)?;
        let h2 = self.projection(z2)?;

        let (l1, l2) = match config.batch_size {
            None => (
                self.semi_loss(&h1, &h2, config.loss_type)?,
                self.semi_loss(&h2, &h1, config.loss_type)?,
            ),
            Some(batch_size) => {
                if config.loss_type != LossType::Info {
                    warn!(
                        loss_type = %config.loss_type,
                        "batched loss only supports info; ignoring loss_type"
                    );
                }
                let num_nodes = h1.dim(0)?;
                if batch_size >= num_nodes {
                    warn!(batch_size, num_nodes, "batch_size covers every node; one chunk");
                }
                (
                    self.batched_semi_loss(&h1, &h2, batch_size)?,
                    self.batched_semi_loss(&h2, &h1, batch_size)?,
                )
            }
        };

        let ret = ((l1 + l2)? * 0.5)?;
        Ok(match config.reduction {
            Reduction::Mean => ret.mean_all()?,
            Reduction::Sum => ret.sum_all()?,
            Reduction::None => ret,
        })
    }

    /// Scalar loss as `f32`, for logging.
    pub fn loss_value(&self, z1: &Tensor, z2: &Tensor, config: &LossConfig) -> Result<f32> {
        let loss = self.loss(z1, z2, &config.with_reduction(Reduction::Mean))?;
        Ok(loss.to_dtype(DType::F32)?.to_scalar::<f32>()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;
    use candle_nn::VarMap;

    fn model(in_dim: usize, hidden: usize) -> (VarMap, Grace) {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let config = GraceConfig::new(EncoderConfig::new(in_dim, hidden)).with_proj_hidden(hidden);
        let grace = Grace::from_config(&config, vb).unwrap();
        (varmap, grace)
    }

    fn to_vec(t: &Tensor) -> Vec<f32> {
        t.to_vec1::<f32>().unwrap()
    }

    #[test]
    fn test_loss_type_parse() {
        assert_eq!("info".parse::<LossType>().unwrap(), LossType::Info);
        assert_eq!("uniform".parse::<LossType>().unwrap(), LossType::Uniform);
        assert_eq!("Align".parse::<LossType>().unwrap(), LossType::Align);
        assert_eq!("INFO".parse::<LossType>().unwrap(), LossType::Info);
        assert!(matches!(
            "triplet".parse::<LossType>(),
            Err(Error::NotImplemented(_))
        ));
    }

    #[test]
    fn test_config_defaults_and_json() {
        let config = GraceConfig::from_json(
            r#"{"encoder": {"in_channels": 8, "hidden_channels": 16, "norm": {"norm_type": "cn", "scale": 0.2}}}"#,
        )
        .unwrap();
        assert_eq!(config.tau, 0.5);
        assert_eq!(config.num_proj_hidden, 128);
        assert_eq!(config.encoder.k, 2);
        assert_eq!(config.encoder.norm.as_ref().unwrap().tau, 1.0);

        let back = GraceConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_config_rejects_bad_values() {
        let zero_tau = r#"{"encoder": {"in_channels": 4}, "tau": 0.0}"#;
        assert!(matches!(
            GraceConfig::from_json(zero_tau),
            Err(Error::InvalidConfig(_))
        ));
        let one_layer = r#"{"encoder": {"in_channels": 4, "k": 1}}"#;
        assert!(matches!(
            GraceConfig::from_json(one_layer),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            GraceConfig::from_json(r#"{"encoder": {"in_channels": 4, "norm": {"norm_type": "ln"}}}"#),
            Err(Error::Json(_))
        ));
    }

    #[test]
    fn test_projection_shape() {
        let (_, grace) = model(4, 6);
        let z = Tensor::randn(0f32, 1f32, (5, 6), &Device::Cpu).unwrap();
        assert_eq!(grace.projection(&z).unwrap().dims(), &[5, 6]);
    }

    #[test]
    fn test_sim_self_diagonal_is_one() {
        let (_, grace) = model(4, 6);
        let z = Tensor::randn(0f32, 1f32, (5, 6), &Device::Cpu).unwrap();
        let s = grace.sim(&z, &z).unwrap();
        for v in to_vec(&diagonal(&s).unwrap()) {
            assert!((v - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_sim_shape_mismatch_errors() {
        let (_, grace) = model(4, 6);
        let z1 = Tensor::randn(0f32, 1f32, (5, 6), &Device::Cpu).unwrap();
        let z2 = Tensor::randn(0f32, 1f32, (5, 3), &Device::Cpu).unwrap();
        assert!(matches!(grace.sim(&z1, &z2), Err(Error::Tensor(_))));
    }

    #[test]
    fn test_info_loss_hand_computed() {
        // Orthonormal views: z1 = z2 = I(2). θ(i, i) = 1, θ(i, j≠i) = 0.
        // pos = e^2, neg = (e^2 + 1) + (e^2 + 1) - e^2 = e^2 + 2.
        let (_, grace) = model(2, 2);
        let z = Tensor::eye(2, DType::F32, &Device::Cpu).unwrap();
        let e2 = (2.0f32).exp();

        let info = to_vec(&grace.semi_loss(&z, &z, LossType::Info).unwrap());
        let expected = -(e2 / (e2 + 2.0)).ln();
        for v in info {
            assert!((v - expected).abs() < 1e-5);
        }

        let align = to_vec(&grace.semi_loss(&z, &z, LossType::Align).unwrap());
        for v in align {
            assert!((v + 2.0).abs() < 1e-5);
        }

        let uniform = to_vec(&grace.semi_loss(&z, &z, LossType::Uniform).unwrap());
        for v in uniform {
            assert!((v - (e2 + 2.0).ln()).abs() < 1e-4);
        }
    }

    #[test]
    fn test_info_is_align_plus_uniform() {
        let (_, grace) = model(4, 6);
        let z1 = Tensor::randn(0f32, 1f32, (7, 6), &Device::Cpu).unwrap();
        let z2 = Tensor::randn(0f32, 1f32, (7, 6), &Device::Cpu).unwrap();

        let info = to_vec(&grace.semi_loss(&z1, &z2, LossType::Info).unwrap());
        let align = to_vec(&grace.semi_loss(&z1, &z2, LossType::Align).unwrap());
        let uniform = to_vec(&grace.semi_loss(&z1, &z2, LossType::Uniform).unwrap());
        for i in 0..7 {
            assert!((info[i] - (align[i] + uniform[i])).abs() < 1e-4);
        }
    }

    #[test]
    fn test_batched_matches_full() {
        let (_, grace) = model(4, 6);
        let z1 = Tensor::randn(0f32, 1f32, (10, 6), &Device::Cpu).unwrap();
        let z2 = Tensor::randn(0f32, 1f32, (10, 6), &Device::Cpu).unwrap();
        let full = to_vec(&grace.semi_loss(&z1, &z2, LossType::Info).unwrap());

        for batch_size in [1, 3, 5, 10, 32] {
            let batched = to_vec(&grace.batched_semi_loss(&z1, &z2, batch_size).unwrap());
            assert_eq!(batched.len(), full.len());
            for (a, b) in batched.iter().zip(&full) {
                assert!((a - b).abs() < 1e-5, "batch_size {batch_size}: {a} vs {b}");
            }
        }
    }

    #[test]
    fn test_batched_zero_batch_size() {
        let (_, grace) = model(4, 6);
        let z = Tensor::randn(0f32, 1f32, (4, 6), &Device::Cpu).unwrap();
        assert!(matches!(
            grace.batched_semi_loss(&z, &z, 0),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_loss_reductions() {
        let (_, grace) = model(4, 6);
        let z1 = Tensor::randn(0f32, 1f32, (8, 6), &Device::Cpu).unwrap();
        let z2 = Tensor::randn(0f32, 1f32, (8, 6), &Device::Cpu).unwrap();

        let per_node = grace
            .loss(&z1, &z2, &LossConfig::default().with_reduction(Reduction::None))
            .unwrap();
        assert_eq!(per_node.dims(), &[8]);
        let per_node = to_vec(&per_node);

        let mean = grace.loss_value(&z1, &z2, &LossConfig::default()).unwrap();
        let sum = grace
            .loss(&z1, &z2, &LossConfig::default().with_reduction(Reduction::Sum))
            .unwrap()
            .to_scalar::<f32>()
            .unwrap();

        let expected_sum: f32 = per_node.iter().sum();
        assert!((sum - expected_sum).abs() < 1e-4);
        assert!((mean - expected_sum / 8.0).abs() < 1e-5);
    }

    #[test]
    fn test_batched_loss_ignores_loss_type() {
        let (_, grace) = model(4, 6);
        let z1 = Tensor::randn(0f32, 1f32, (6, 6), &Device::Cpu).unwrap();
        let z2 = Tensor::randn(0f32, 1f32, (6, 6), &Device::Cpu).unwrap();

        let info = grace.loss_value(&z1, &z2, &LossConfig::default()).unwrap();
        let batched_align = grace
            .loss_value(
                &z1,
                &z2,
                &LossConfig::default()
                    .with_batch_size(4)
                    .with_loss_type(LossType::Align),
            )
            .unwrap();
        assert!((info - batched_align).abs() < 1e-5);
    }

    #[test]
    fn test_forward_delegates_to_encoder() {
        let (_, grace) = model(4, 6);
        let x = Tensor::randn(0f32, 1f32, (5, 4), &Device::Cpu).unwrap();
        let edges = EdgeIndex::ring(5);
        let a = grace.forward(&x, &edges).unwrap();
        let b = grace.encoder().forward(&x, &edges).unwrap();
        assert_eq!(a.to_vec2::<f32>().unwrap(), b.to_vec2::<f32>().unwrap());
    }
}
