//! Error types for grace-nn.

use thiserror::Error;

/// grace-nn error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Candle tensor error (includes shape mismatches from matmul).
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// Feature width does not match the encoder input dimension.
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    /// Invalid configuration (unknown norm type, k < 2, zero batch size, ...).
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// Requested loss variant does not exist.
    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// Edge endpoint outside `0..num_nodes`.
    #[error("edge endpoint {index} out of range for {num_nodes} nodes")]
    InvalidEdge { index: usize, num_nodes: usize },

    /// Malformed JSON configuration.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
