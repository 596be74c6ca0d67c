//! Layer normalisation with unified shape and dtype handling.
//!
//! Inputs follow the `(batch, seq, hidden)` convention. Normalisation happens
//! along the last axis while preserving the original layout. Statistics (mean,
//! biased variance) are computed in [`PrecisionPolicy::reduction`] before the
//! output is cast back to storage.

use candle_core::{DType, Device, Tensor, D};

use crate::{checks, dtypes::PrecisionPolicy, LayerError, Result};

/// Configuration for a normalisation layer.
#[derive(Debug, Clone, PartialEq)]
pub struct NormConfig {
    /// Size of the hidden dimension being normalised.
    pub hidden_size: usize,
    /// Numeric stabiliser added to the variance.
    pub epsilon: f64,
}

impl NormConfig {
    /// Creates a configuration using the usual transformer epsilon of `1e-5`.
    pub fn new(hidden_size: usize) -> Self {
        Self {
            hidden_size,
            epsilon: 1e-5,
        }
    }
}

/// Standard LayerNorm with learnable scale and shift.
#[derive(Debug, Clone)]
pub struct LayerNorm {
    config: NormConfig,
    weight: Tensor,
    bias: Tensor,
}

impl LayerNorm {
    /// Constructs a LayerNorm from explicit scale and bias parameters.
    pub fn new(weight: Tensor, bias: Tensor, config: NormConfig) -> Result<Self> {
        if config.hidden_size == 0 {
            return Err(LayerError::config("layer norm hidden size must be non-zero"));
        }
        if config.epsilon.is_nan() || config.epsilon <= 0.0 {
            return Err(LayerError::config(format!(
                "layer norm epsilon must be positive, got {}",
                config.epsilon
            )));
        }
        checks::expect_shape("norm.weight", &weight, &[config.hidden_size])?;
        checks::expect_dtype_in("norm.weight", &weight, checks::FLOAT_DTYPES)?;
        checks::expect_shape("norm.bias", &bias, &[config.hidden_size])?;
        checks::expect_dtype_in("norm.bias", &bias, checks::FLOAT_DTYPES)?;
        Ok(Self {
            config,
            weight,
            bias,
        })
    }

    /// Identity-initialised LayerNorm: scale of ones, shift of zeros.
    pub fn identity(config: NormConfig, dtype: DType, device: &Device) -> Result<Self> {
        let weight = Tensor::ones(config.hidden_size, dtype, device)?;
        let bias = Tensor::zeros(config.hidden_size, dtype, device)?;
        Self::new(weight, bias, config)
    }

    /// Returns the configuration so callers can check shape compatibility.
    pub fn config(&self) -> &NormConfig {
        &self.config
    }

    /// Applies the normalisation to a hidden state tensor.
    pub fn forward(&self, hidden: &Tensor, policy: &PrecisionPolicy) -> Result<Tensor> {
        checks::expect_batch_seq_hidden("norm.input", hidden, self.config.hidden_size)?;

        let hidden_size = self.config.hidden_size as f64;
        let compute = policy.cast_for_reduction(hidden)?;

        let mean = (compute.sum_keepdim(D::Minus1)? / hidden_size)?;
        let centered = compute.broadcast_sub(&mean)?;
        let variance = (centered.sqr()?.sum_keepdim(D::Minus1)? / hidden_size)?;
        let denom = (variance + self.config.epsilon)?.sqrt()?;
        let normalized = centered.broadcast_div(&denom)?;

        let weight = self.weight.to_dtype(normalized.dtype())?;
        let bias = self.bias.to_dtype(normalized.dtype())?;
        let affine = normalized.broadcast_mul(&weight)?.broadcast_add(&bias)?;

        policy.cast_to_storage(&affine)
    }
}
