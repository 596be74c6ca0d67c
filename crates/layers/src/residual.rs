//! Post-norm residual connection: `dropout(norm(branch + input))`.
//!
//! Residual branches combine tensors of shape `(batch, seq, hidden)` produced
//! with the same storage dtype. The sum is formed in
//! [`PrecisionPolicy::compute`], normalised by the owned [`LayerNorm`], and the
//! result passes through dropout according to the caller's [`ForwardMode`].

use candle_core::Tensor;

use crate::{
    checks,
    dropout::{check_probability, dropout, ForwardMode},
    dtypes::PrecisionPolicy,
    norm::LayerNorm,
    Result,
};

/// Residual add followed by layer normalisation and dropout.
#[derive(Debug, Clone)]
pub struct PostNormResidual {
    norm: LayerNorm,
    dropout_p: f32,
}

impl PostNormResidual {
    pub fn new(norm: LayerNorm, dropout_p: f32) -> Result<Self> {
        check_probability(dropout_p)?;
        Ok(Self { norm, dropout_p })
    }

    /// The normalisation parameters owned by this connection.
    pub fn norm(&self) -> &LayerNorm {
        &self.norm
    }

    pub fn dropout_p(&self) -> f32 {
        self.dropout_p
    }

    /// Combines `branch` with `residual`, normalises, then applies dropout.
    pub fn forward(
        &self,
        branch: &Tensor,
        residual: &Tensor,
        mode: &mut ForwardMode,
        policy: &PrecisionPolicy,
    ) -> Result<Tensor> {
        checks::expect_shape("residual.branch", branch, residual.dims())?;
        let summed = policy
            .cast_for_matmul(branch)?
            .add(&policy.cast_for_matmul(residual)?)?;
        let summed = policy.cast_to_storage(&summed)?;
        let normed = self.norm.forward(&summed, policy)?;
        dropout(&normed, self.dropout_p, mode, policy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::norm::NormConfig;
    use crate::LayerError;
    use candle_core::{DType, Device};

    fn residual(hidden: usize, dropout_p: f32) -> Result<PostNormResidual> {
        let norm = LayerNorm::identity(NormConfig::new(hidden), DType::F32, &Device::Cpu)?;
        PostNormResidual::new(norm, dropout_p)
    }

    #[test]
    fn normalises_the_sum() -> Result<()> {
        let device = Device::Cpu;
        let residual = residual(4, 0.1)?;
        let branch = Tensor::from_vec(vec![1.0f32, 2.0, 3.0, 4.0], (1, 1, 4), &device)?;
        let parent = Tensor::from_vec(vec![1.0f32, 0.0, -1.0, 2.0], (1, 1, 4), &device)?;
        let policy = PrecisionPolicy::default();
        let out = residual.forward(&branch, &parent, &mut ForwardMode::Eval, &policy)?;
        let expected = residual.norm().forward(&(branch + parent)?, &policy)?;
        let diff = out.sub(&expected)?.abs()?.max_all()?.to_vec0::<f32>()?;
        assert_eq!(diff, 0.0);
        Ok(())
    }

    #[test]
    fn training_mode_drops_elements() -> Result<()> {
        let device = Device::Cpu;
        let residual = residual(16, 0.5)?;
        let branch = Tensor::randn(0f32, 1.0, (2, 8, 16), &device)?;
        let parent = Tensor::randn(0f32, 1.0, (2, 8, 16), &device)?;
        let out = residual.forward(
            &branch,
            &parent,
            &mut ForwardMode::train(3),
            &PrecisionPolicy::default(),
        )?;
        let zeros = out
            .flatten_all()?
            .to_vec1::<f32>()?
            .into_iter()
            .filter(|v| *v == 0.0)
            .count();
        assert!(zeros > 0);
        Ok(())
    }

    #[test]
    fn mismatched_shapes_are_rejected() -> Result<()> {
        let device = Device::Cpu;
        let residual = residual(4, 0.0)?;
        let branch = Tensor::zeros((1, 2, 4), DType::F32, &device)?;
        let parent = Tensor::zeros((1, 3, 4), DType::F32, &device)?;
        let err = residual
            .forward(&branch, &parent, &mut ForwardMode::Eval, &PrecisionPolicy::default())
            .unwrap_err();
        assert!(matches!(err, LayerError::Shape { .. }));
        Ok(())
    }
}
