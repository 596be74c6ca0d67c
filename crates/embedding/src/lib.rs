//! Embedding crate
//!
//! Token lookup tables mapping discrete ids to dense `hidden`-wide vectors.
//! No positional signal is added here; callers receive the raw lookup.

pub mod token;

use thiserror::Error;

pub use token::{TokenEmbedding, TokenEmbeddingConfig};

/// Errors raised by embedding construction and lookup.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// The table dimensions or supplied weight are unusable.
    #[error("invalid embedding configuration: {0}")]
    Config(String),
    /// Token ids are not laid out as a non-empty `[batch, seq]` integer tensor.
    #[error("invalid token ids: {0}")]
    InvalidIds(String),
    /// A token id falls outside `[0, vocab_size)`.
    #[error("token id {id} out of range for vocab size {vocab_size}")]
    TokenOutOfRange { id: i64, vocab_size: usize },
    #[error(transparent)]
    Candle(#[from] candle_core::Error),
}

pub type Result<T> = std::result::Result<T, EmbeddingError>;
