//! Building blocks for transformer layers.
//!
//! This crate hosts the dense projection, layer normalisation, dropout,
//! feed-forward and post-norm residual components assembled from Candle
//! primitives. Every component follows the `(batch, seq, hidden)` layout and
//! validates its inputs before computing, reporting problems through
//! [`LayerError`].

pub mod checks;
pub mod dropout;
pub mod dtypes;
pub mod linear;
pub mod mlp;
pub mod norm;
pub mod residual;

use thiserror::Error;

pub use dropout::{dropout, ForwardMode};
pub use dtypes::PrecisionPolicy;
pub use linear::{Linear, LinearConfig, LinearInit};
pub use mlp::{FeedForward, FeedForwardConfig};
pub use norm::{LayerNorm, NormConfig};
pub use residual::PostNormResidual;

/// Errors raised while constructing layers or running their forward passes.
#[derive(Debug, Error)]
pub enum LayerError {
    /// A tensor does not match the layout the layer was built for.
    #[error("{context}: expected shape {expected}, got {actual:?}")]
    Shape {
        context: &'static str,
        expected: String,
        actual: Vec<usize>,
    },
    /// A tensor carries a dtype the layer cannot consume.
    #[error("{context}: unsupported dtype {actual}, expected one of {expected}")]
    DType {
        context: &'static str,
        expected: String,
        actual: String,
    },
    /// Construction-time parameters are inconsistent.
    #[error("invalid layer configuration: {0}")]
    Config(String),
    /// Failure reported by the Candle backend.
    #[error(transparent)]
    Candle(#[from] candle_core::Error),
}

impl LayerError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, LayerError>;
