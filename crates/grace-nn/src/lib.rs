//! Graph contrastive representation learning on candle.
//!
//! `grace-nn` trains node embeddings without labels: two perturbed views of
//! the same graph are encoded by a shared GNN, and the model learns to pull
//! each node's two embeddings together while pushing every other node away.
//!
//! ## The Pipeline
//!
//! ```text
//! features (N x F) + edges
//!   -> Encoder: k x [conv -> ContraNorm? -> activation]    (N x H)
//!   -> projection head: H -> P -> H                        (N x H)
//!   -> InfoNCE between view 1 and view 2
//! ```
//!
//! The projection head only exists for the loss. Downstream tasks use the
//! encoder output, typically through a linear probe ([`LogReg`]).
//!
//! ## Why Contrast Across Views
//!
//! With node `i` of view 1 as the anchor, node `i` of view 2 is the positive
//! and the remaining `2N - 2` nodes of both views are negatives. A batch of N
//! nodes therefore yields N anchors with `2N - 2` negatives each, for free.
//!
//! | Loss | Keeps | Use |
//! |------|-------|-----|
//! | [`LossType::Info`] | alignment + uniformity | training |
//! | [`LossType::Align`] | positive pairs only | ablation |
//! | [`LossType::Uniform`] | negatives only | ablation |
//!
//! ## Over-smoothing and ContraNorm
//!
//! Stacking graph convolutions averages neighborhoods repeatedly until node
//! representations become indistinguishable. [`NormLayer`] counters this by
//! subtracting a similarity-weighted "negative" before layer normalization.
//!
//! ## Modules
//!
//! - [`graph`]: edge lists and propagation matrices
//! - [`conv`]: GCN / GraphSAGE layers
//! - [`norm`]: ContraNorm and layer normalization
//! - [`encoder`]: plain and skip-connected encoders
//! - [`grace`]: projection head and contrastive losses
//! - [`logreg`]: linear evaluation probe
//!
//! ## Example
//!
//! ```rust,ignore
//! use candle_core::{DType, Device, Tensor};
//! use candle_nn::{VarBuilder, VarMap};
//! use grace_nn::{EdgeIndex, EncoderConfig, Grace, GraceConfig, LossConfig};
//!
//! let device = Device::Cpu;
//! let varmap = VarMap::new();
//! let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
//!
//! let config = GraceConfig::new(EncoderConfig::new(8, 16)).with_proj_hidden(16);
//! let model = Grace::from_config(&config, vb)?;
//!
//! let edges = EdgeIndex::ring(4);
//! let x1 = Tensor::randn(0f32, 1f32, (4, 8), &device)?;
//! let x2 = Tensor::randn(0f32, 1f32, (4, 8), &device)?;
//! let z1 = model.forward(&x1, &edges)?;
//! let z2 = model.forward(&x2, &edges)?;
//! let loss = model.loss(&z1, &z2, &LossConfig::default())?;
//! // optimizer.backward_step(&loss)?  -- parameters live in `varmap`
//! ```
//!
//! ## Parameters
//!
//! All trainable tensors are created through the caller's
//! [`candle_nn::VarMap`], which is the flat, named parameter collection an
//! optimizer such as `candle_nn::AdamW` consumes.
//!
//! ## References
//!
//! - Zhu et al. (2020). "Deep Graph Contrastive Representation Learning."
//! - Guo et al. (2023). "ContraNorm: A Contrastive Learning Perspective on
//!   Oversmoothing and Beyond."

pub mod activation;
pub mod conv;
pub mod encoder;
pub mod error;
pub mod grace;
pub mod graph;
pub mod logreg;
pub mod norm;
pub mod ops;

pub use activation::Activation;
pub use conv::{ConvKind, ConvLayer, GCNConv, SAGEConv};
pub use encoder::{Encoder, EncoderConfig};
pub use error::{Error, Result};
pub use grace::{Grace, GraceConfig, LossConfig, LossType, Reduction};
pub use graph::EdgeIndex;
pub use logreg::LogReg;
pub use norm::{LayerNorm, NormConfig, NormLayer, NormType};
