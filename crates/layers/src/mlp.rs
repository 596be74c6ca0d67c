//! Position-wise feed-forward block built on top of two projections.
//!
//! The block operates on hidden states shaped `(batch, seq, hidden)` and
//! returns the same layout: `hidden -> 4 * hidden` projection, ReLU, dropout,
//! then `4 * hidden -> hidden` projection. The expansion factor and the
//! non-linearity are fixed parts of the architecture.

use candle_core::{DType, Device, Tensor};
use rand::rngs::StdRng;

use crate::{
    checks,
    dropout::{check_probability, dropout, ForwardMode},
    dtypes::PrecisionPolicy,
    linear::{Linear, LinearConfig, LinearInit},
    LayerError, Result,
};

/// Width multiplier applied to the hidden size for the inner projection.
pub const EXPANSION: usize = 4;

/// Configuration for the feed-forward block.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedForwardConfig {
    /// Model hidden size.
    pub hidden_size: usize,
    /// Dropout probability applied after the activation.
    pub dropout_p: f32,
}

impl FeedForwardConfig {
    pub fn new(hidden_size: usize, dropout_p: f32) -> Self {
        Self {
            hidden_size,
            dropout_p,
        }
    }

    /// Width of the activation space.
    pub fn intermediate_size(&self) -> usize {
        self.hidden_size * EXPANSION
    }
}

/// Two-layer ReLU feed-forward network.
#[derive(Debug, Clone)]
pub struct FeedForward {
    config: FeedForwardConfig,
    up: Linear,
    down: Linear,
}

impl FeedForward {
    /// Assembles the block from pre-built projections.
    pub fn new(config: FeedForwardConfig, up: Linear, down: Linear) -> Result<Self> {
        check_probability(config.dropout_p)?;
        let inner = config.intermediate_size();
        if up.config().input_dim != config.hidden_size || up.config().total_output_dim() != inner {
            return Err(LayerError::config(format!(
                "up projection must map {} -> {inner}",
                config.hidden_size
            )));
        }
        if down.config().input_dim != inner
            || down.config().total_output_dim() != config.hidden_size
        {
            return Err(LayerError::config(format!(
                "down projection must map {inner} -> {}",
                config.hidden_size
            )));
        }
        Ok(Self { config, up, down })
    }

    /// Builds the block with freshly initialised projections.
    pub fn with_init(
        config: FeedForwardConfig,
        init: &LinearInit,
        rng: &mut StdRng,
        device: &Device,
        dtype: DType,
    ) -> Result<Self> {
        let inner = config.intermediate_size();
        let up = Linear::with_init(
            LinearConfig::new(config.hidden_size, inner),
            init,
            rng,
            device,
            dtype,
        )?;
        let down = Linear::with_init(
            LinearConfig::new(inner, config.hidden_size),
            init,
            rng,
            device,
            dtype,
        )?;
        Self::new(config, up, down)
    }

    pub fn config(&self) -> &FeedForwardConfig {
        &self.config
    }

    /// Performs the forward pass through the MLP.
    pub fn forward(
        &self,
        hidden: &Tensor,
        mode: &mut ForwardMode,
        policy: &PrecisionPolicy,
    ) -> Result<Tensor> {
        checks::expect_batch_seq_hidden("mlp.input", hidden, self.config.hidden_size)?;
        let expanded = self.up.forward(hidden, policy)?;
        let activated = policy.cast_to_storage(&policy.cast_for_matmul(&expanded)?.relu()?)?;
        let dropped = dropout(&activated, self.config.dropout_p, mode, policy)?;
        self.down.forward(&dropped, policy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn build(hidden: usize, seed: u64) -> Result<FeedForward> {
        let mut rng = StdRng::seed_from_u64(seed);
        FeedForward::with_init(
            FeedForwardConfig::new(hidden, 0.1),
            &LinearInit::fan_in_uniform(),
            &mut rng,
            &Device::Cpu,
            DType::F32,
        )
    }

    #[test]
    fn preserves_layout() -> Result<()> {
        let mlp = build(8, 1)?;
        let input = Tensor::randn(0f32, 1.0, (2, 3, 8), &Device::Cpu)?;
        let output = mlp.forward(&input, &mut ForwardMode::Eval, &PrecisionPolicy::default())?;
        assert_eq!(output.dims(), &[2, 3, 8]);
        Ok(())
    }

    #[test]
    fn matches_manual_relu_composition() -> Result<()> {
        let mlp = build(4, 2)?;
        let policy = PrecisionPolicy::default();
        let input = Tensor::randn(0f32, 1.0, (1, 5, 4), &Device::Cpu)?;
        let output = mlp.forward(&input, &mut ForwardMode::Eval, &policy)?;

        let hidden = input
            .reshape((5, 4))?
            .matmul(&mlp.up.weight().t()?)?
            .broadcast_add(mlp.up.bias().expect("bias"))?
            .relu()?;
        let expected = hidden
            .matmul(&mlp.down.weight().t()?)?
            .broadcast_add(mlp.down.bias().expect("bias"))?
            .reshape((1, 5, 4))?;
        let diff = output.sub(&expected)?.abs()?.max_all()?.to_vec0::<f32>()?;
        assert!(diff < 1e-5);
        Ok(())
    }

    #[test]
    fn rejects_mismatched_projections() -> Result<()> {
        let mut rng = StdRng::seed_from_u64(0);
        let device = Device::Cpu;
        let up = Linear::with_init(
            LinearConfig::new(4, 8),
            &LinearInit::XavierUniform,
            &mut rng,
            &device,
            DType::F32,
        )?;
        let down = Linear::with_init(
            LinearConfig::new(8, 4),
            &LinearInit::XavierUniform,
            &mut rng,
            &device,
            DType::F32,
        )?;
        let err = FeedForward::new(FeedForwardConfig::new(4, 0.0), up, down).unwrap_err();
        assert!(matches!(err, LayerError::Config(_)));
        Ok(())
    }
}
