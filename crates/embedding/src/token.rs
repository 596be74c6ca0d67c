//! Token embedding table.

use candle_core::{DType, Device, Tensor};
use rand::rngs::StdRng;
use rand_distr::{Distribution, StandardNormal};

use crate::{EmbeddingError, Result};

/// Configuration for building a token embedding table.
#[derive(Debug, Clone)]
pub struct TokenEmbeddingConfig {
    /// Size of the vocabulary (number of distinct tokens).
    pub vocab_size: usize,
    /// Dimensionality of each embedding vector.
    pub hidden_dim: usize,
    /// Storage dtype used for the underlying parameters and outputs.
    pub dtype: DType,
    /// Device hosting the parameters.
    pub device: Device,
}

impl TokenEmbeddingConfig {
    fn validate(&self) -> Result<()> {
        if self.vocab_size == 0 {
            return Err(EmbeddingError::Config(
                "token embedding requires vocab_size > 0".into(),
            ));
        }
        if self.hidden_dim == 0 {
            return Err(EmbeddingError::Config(
                "token embedding requires hidden_dim > 0".into(),
            ));
        }
        if !self.dtype.is_float() {
            return Err(EmbeddingError::Config(format!(
                "token embedding requires a float dtype, got {:?}",
                self.dtype
            )));
        }
        Ok(())
    }
}

/// Token embedding table of shape `(vocab_size, hidden_dim)`.
#[derive(Debug, Clone)]
pub struct TokenEmbedding {
    config: TokenEmbeddingConfig,
    weight: Tensor,
}

impl TokenEmbedding {
    /// Builds a new table with parameters sampled from `N(0, 1)`.
    pub fn new(config: TokenEmbeddingConfig, rng: &mut StdRng) -> Result<Self> {
        config.validate()?;
        let shape = (config.vocab_size, config.hidden_dim);
        let values: Vec<f32> = (0..shape.0 * shape.1)
            .map(|_| StandardNormal.sample(rng))
            .collect();
        let weight = Tensor::from_vec(values, shape, &config.device)?.to_dtype(config.dtype)?;
        Ok(Self { config, weight })
    }

    /// Wraps an existing `(vocab_size, hidden_dim)` weight tensor.
    pub fn from_weight(weight: Tensor, config: TokenEmbeddingConfig) -> Result<Self> {
        config.validate()?;
        let expected = [config.vocab_size, config.hidden_dim];
        if weight.dims() != expected {
            return Err(EmbeddingError::Config(format!(
                "embedding weight expected shape {expected:?}, got {:?}",
                weight.dims()
            )));
        }
        let weight = weight.to_dtype(config.dtype)?;
        Ok(Self { config, weight })
    }

    /// Returns the embedding configuration.
    pub fn config(&self) -> &TokenEmbeddingConfig {
        &self.config
    }

    /// Returns the underlying weight tensor.
    pub fn weight(&self) -> &Tensor {
        &self.weight
    }

    /// Looks up embeddings for the provided token ids.
    ///
    /// Inputs must be shaped `(batch, seq)` with an integer dtype. Outputs follow the
    /// `(batch, seq, hidden)` layout using the configured storage dtype.
    pub fn forward(&self, token_ids: &Tensor) -> Result<Tensor> {
        let (batch, seq) = validate_token_ids(token_ids)?;

        let flat = token_ids.to_dtype(DType::I64)?.flatten_all()?;
        self.ensure_id_range(&flat)?;

        let gathered = self.weight.index_select(&flat, 0)?;
        Ok(gathered.reshape((batch, seq, self.config.hidden_dim))?)
    }

    fn ensure_id_range(&self, flat_ids: &Tensor) -> Result<()> {
        let min_id = flat_ids.min_all()?.to_scalar::<i64>()?;
        if min_id < 0 {
            log::debug!("rejecting negative token id {min_id}");
            return Err(EmbeddingError::TokenOutOfRange {
                id: min_id,
                vocab_size: self.config.vocab_size,
            });
        }

        let max_id = flat_ids.max_all()?.to_scalar::<i64>()?;
        if max_id >= self.config.vocab_size as i64 {
            log::debug!(
                "rejecting token id {max_id} for vocab size {}",
                self.config.vocab_size
            );
            return Err(EmbeddingError::TokenOutOfRange {
                id: max_id,
                vocab_size: self.config.vocab_size,
            });
        }
        Ok(())
    }
}

/// Checks that `token_ids` is a non-empty `[batch, seq]` integer tensor.
pub fn validate_token_ids(token_ids: &Tensor) -> Result<(usize, usize)> {
    let (batch, seq) = match token_ids.dims() {
        [batch, seq] => (*batch, *seq),
        dims => {
            return Err(EmbeddingError::InvalidIds(format!(
                "expected [batch, seq], got {dims:?}"
            )))
        }
    };
    if batch == 0 || seq == 0 {
        return Err(EmbeddingError::InvalidIds(
            "batch and seq dimensions must be non-zero".into(),
        ));
    }
    if !token_ids.dtype().is_int() {
        return Err(EmbeddingError::InvalidIds(format!(
            "expected integer dtype, got {:?}",
            token_ids.dtype()
        )));
    }
    Ok((batch, seq))
}
