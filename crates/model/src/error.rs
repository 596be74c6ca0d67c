//! Error taxonomy surfaced by the model crate.
//!
//! Lower crates keep their own error enums; everything is flattened into
//! [`ModelError`] at the crate boundary so callers match on four categories.

use attention::AttentionError;
use embedding::EmbeddingError;
use layers::LayerError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    /// Invalid hyperparameters, vocabulary settings or configuration files.
    #[error("invalid configuration: {0}")]
    Configuration(String),
    /// A tensor with incompatible dimensions, dtype or device.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),
    /// A token id outside `[0, vocab_size)`.
    #[error("token id {id} out of range for vocabulary of size {vocab_size}")]
    IndexOutOfRange { id: i64, vocab_size: usize },
    /// Unexpected failure inside the tensor backend.
    #[error("backend failure: {0}")]
    Backend(#[from] candle_core::Error),
}

pub type Result<T> = std::result::Result<T, ModelError>;

impl ModelError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub(crate) fn shape(message: impl Into<String>) -> Self {
        Self::ShapeMismatch(message.into())
    }
}

impl From<LayerError> for ModelError {
    fn from(value: LayerError) -> Self {
        match value {
            LayerError::Shape { .. } | LayerError::DType { .. } => {
                ModelError::ShapeMismatch(value.to_string())
            }
            LayerError::Config(message) => ModelError::Configuration(message),
            LayerError::Candle(err) => ModelError::Backend(err),
        }
    }
}

impl From<AttentionError> for ModelError {
    fn from(value: AttentionError) -> Self {
        match value {
            AttentionError::InvalidShape { .. } | AttentionError::UnsupportedDType { .. } => {
                ModelError::ShapeMismatch(value.to_string())
            }
            AttentionError::Config(message) => ModelError::Configuration(message),
            AttentionError::Layer(err) => err.into(),
            AttentionError::Backend(err) => ModelError::Backend(err),
        }
    }
}

impl From<EmbeddingError> for ModelError {
    fn from(value: EmbeddingError) -> Self {
        match value {
            EmbeddingError::Config(message) => ModelError::Configuration(message),
            EmbeddingError::InvalidIds(message) => ModelError::ShapeMismatch(message),
            EmbeddingError::TokenOutOfRange { id, vocab_size } => {
                ModelError::IndexOutOfRange { id, vocab_size }
            }
            EmbeddingError::Candle(err) => ModelError::Backend(err),
        }
    }
}

impl From<std::io::Error> for ModelError {
    fn from(value: std::io::Error) -> Self {
        ModelError::Configuration(format!("failed to read config: {value}"))
    }
}

impl From<toml::de::Error> for ModelError {
    fn from(value: toml::de::Error) -> Self {
        ModelError::Configuration(format!("failed to parse config: {value}"))
    }
}

impl From<serde_json::Error> for ModelError {
    fn from(value: serde_json::Error) -> Self {
        ModelError::Configuration(format!("failed to parse config: {value}"))
    }
}
