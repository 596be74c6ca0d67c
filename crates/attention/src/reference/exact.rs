//! Reference attention kernel.
//!
//! The exact path computes the full score matrix in `f32` and mirrors the
//! semantics described by the [`Attention`](crate::core::Attention) trait:
//! optional scaling, mask fill with a finite sentinel, softmax over keys and a
//! weighted sum of values.

use std::sync::OnceLock;

use candle_core::{DType, Tensor};
use candle_nn::ops::softmax_last_dim;

use crate::core::{Attention, AttentionError, Config};
use crate::masks::MASK_DTYPE;

/// Numerically stable, portable attention kernel.
#[derive(Debug, Clone, Default)]
pub struct ExactAttention {
    first_call: OnceLock<()>,
}

#[derive(Debug, Clone, Copy)]
struct Dims {
    batch: usize,
    heads: usize,
    q_len: usize,
    k_len: usize,
    head_dim: usize,
}

impl ExactAttention {
    pub fn new() -> Self {
        Self::default()
    }

    fn validate_qk(&self, q: &Tensor, k: &Tensor) -> Result<Dims, AttentionError> {
        if !q.device().same_device(k.device()) {
            return Err(AttentionError::shape("q and k must reside on the same device"));
        }
        let dtype = q.dtype();
        if dtype != k.dtype() {
            return Err(AttentionError::shape("q, k, v must share the same dtype"));
        }
        if !matches!(dtype, DType::F32 | DType::F16 | DType::BF16 | DType::F64) {
            return Err(AttentionError::UnsupportedDType {
                requested: format!("{dtype:?}"),
            });
        }

        let (batch, heads, q_len, head_dim) = q
            .dims4()
            .map_err(|_| AttentionError::shape("q must have shape [batch, heads, q_len, head_dim]"))?;
        let (kb, kh, k_len, kd) = k
            .dims4()
            .map_err(|_| AttentionError::shape("k must have shape [batch, heads, k_len, head_dim]"))?;
        if kb != batch || kh != heads || kd != head_dim {
            return Err(AttentionError::shape(format!(
                "k shape mismatch: expected [{batch}, {heads}, ?, {head_dim}] got [{kb}, {kh}, {k_len}, {kd}]"
            )));
        }
        if q_len == 0 || k_len == 0 {
            return Err(AttentionError::shape("sequence lengths must be non-zero"));
        }
        Ok(Dims {
            batch,
            heads,
            q_len,
            k_len,
            head_dim,
        })
    }

    fn validate_v(&self, v: &Tensor, q: &Tensor, dims: Dims) -> Result<(), AttentionError> {
        if !q.device().same_device(v.device()) {
            return Err(AttentionError::shape("q and v must reside on the same device"));
        }
        if v.dtype() != q.dtype() {
            return Err(AttentionError::shape("q, k, v must share the same dtype"));
        }
        let Dims {
            batch,
            heads,
            k_len,
            head_dim,
            ..
        } = dims;
        let (vb, vh, vk, vd) = v
            .dims4()
            .map_err(|_| AttentionError::shape("v must have shape [batch, heads, k_len, head_dim]"))?;
        if vb != batch || vh != heads || vk != k_len || vd != head_dim {
            return Err(AttentionError::shape(format!(
                "v shape mismatch: expected [{batch}, {heads}, {k_len}, {head_dim}] got [{vb}, {vh}, {vk}, {vd}]"
            )));
        }
        Ok(())
    }

    fn expand_mask(&self, mask: &Tensor, q: &Tensor, dims: Dims) -> Result<Tensor, AttentionError> {
        if !q.device().same_device(mask.device()) {
            return Err(AttentionError::shape(
                "mask must reside on the same device as q",
            ));
        }
        if mask.dtype() != MASK_DTYPE {
            return Err(AttentionError::UnsupportedDType {
                requested: format!("mask expects dtype {MASK_DTYPE:?}, got {:?}", mask.dtype()),
            });
        }
        let Dims {
            batch,
            heads,
            q_len,
            k_len,
            ..
        } = dims;
        let (mb, mh, mq, mk) = mask.dims4().map_err(|_| {
            AttentionError::shape("mask must have shape [batch|1, heads|1, q_len|1, k_len]")
        })?;
        let fits = |actual: usize, full: usize| actual == 1 || actual == full;
        if !fits(mb, batch) || !fits(mh, heads) || !fits(mq, q_len) || mk != k_len {
            return Err(AttentionError::shape(format!(
                "mask shape [{mb}, {mh}, {mq}, {mk}] does not broadcast to [{batch}, {heads}, {q_len}, {k_len}]"
            )));
        }
        Ok(mask.broadcast_as((batch, heads, q_len, k_len))?)
    }

    /// Softmax-normalised scores in `f32`, shaped `[batch, heads, q_len, k_len]`.
    fn probabilities(
        &self,
        q: &Tensor,
        k: &Tensor,
        mask: Option<&Tensor>,
        config: &Config,
        dims: Dims,
    ) -> Result<Tensor, AttentionError> {
        if self.first_call.set(()).is_ok() {
            log::debug!(
                "attention::reference init scaling={:?} mask_fill={:e}",
                config.scaling,
                config.mask_fill
            );
        }

        let Dims {
            batch,
            heads,
            q_len,
            k_len,
            head_dim,
        } = dims;
        let merged = batch * heads;

        let q_view = q.to_dtype(DType::F32)?.reshape((merged, q_len, head_dim))?;
        let k_view = k.to_dtype(DType::F32)?.reshape((merged, k_len, head_dim))?;
        let mut scores = q_view.matmul(&k_view.transpose(1, 2)?)?;

        let factor = config.scaling.factor(head_dim);
        if factor != 1.0 {
            scores = scores.affine(factor, 0.0)?;
        }
        let mut scores = scores.reshape((batch, heads, q_len, k_len))?;

        if let Some(mask) = mask {
            let mask = self.expand_mask(mask, q, dims)?;
            let fill = Tensor::full(config.mask_fill, (batch, heads, q_len, k_len), q.device())?;
            scores = mask.where_cond(&scores, &fill)?;
        }

        Ok(softmax_last_dim(&scores.contiguous()?)?)
    }
}

impl Attention for ExactAttention {
    fn attend(
        &self,
        q: &Tensor,
        k: &Tensor,
        v: &Tensor,
        mask: Option<&Tensor>,
        config: &Config,
    ) -> Result<Tensor, AttentionError> {
        let dims = self.validate_qk(q, k)?;
        self.validate_v(v, q, dims)?;

        let probs = self.probabilities(q, k, mask, config, dims)?;
        let Dims {
            batch,
            heads,
            q_len,
            k_len,
            head_dim,
        } = dims;
        let merged = batch * heads;

        let v_view = v.to_dtype(DType::F32)?.reshape((merged, k_len, head_dim))?;
        let output = probs
            .reshape((merged, q_len, k_len))?
            .matmul(&v_view)?
            .reshape((batch, heads, q_len, head_dim))?;

        Ok(output.to_dtype(q.dtype())?)
    }

    fn weights(
        &self,
        q: &Tensor,
        k: &Tensor,
        mask: Option<&Tensor>,
        config: &Config,
    ) -> Result<Tensor, AttentionError> {
        let dims = self.validate_qk(q, k)?;
        self.probabilities(q, k, mask, config, dims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ScoreScaling;
    use crate::masks::{build_causal_mask, build_padding_mask};
    use candle_core::{Device, Result as CandleResult};

    fn build_inputs(device: &Device) -> CandleResult<(Tensor, Tensor, Tensor)> {
        let data: Vec<f32> = (0..64).map(|i| (i as f32) * 0.01).collect();
        let q = Tensor::from_vec(data.clone(), (1, 2, 4, 8), device)?;
        let k = Tensor::from_vec(data.iter().map(|v| 0.6 - v).collect::<Vec<_>>(), (1, 2, 4, 8), device)?;
        let v = Tensor::from_vec(data, (1, 2, 4, 8), device)?;
        Ok((q, k, v))
    }

    /// Loop-based attention with a `[q_len, k_len]` boolean mask shared by all heads.
    fn naive_attention(
        q: &Tensor,
        k: &Tensor,
        v: &Tensor,
        mask: Option<&[Vec<u8>]>,
        scale: f32,
    ) -> CandleResult<Tensor> {
        let (batch, heads, q_len, head_dim) = q.dims4()?;
        let (_, _, k_len, _) = k.dims4()?;
        let mut output = vec![0f32; batch * heads * q_len * head_dim];

        let q_vec = q.to_dtype(DType::F32)?.flatten_all()?.to_vec1::<f32>()?;
        let k_vec = k.to_dtype(DType::F32)?.flatten_all()?.to_vec1::<f32>()?;
        let v_vec = v.to_dtype(DType::F32)?.flatten_all()?.to_vec1::<f32>()?;

        for bh in 0..batch * heads {
            for q_idx in 0..q_len {
                let mut row = vec![0f32; k_len];
                for (k_idx, score) in row.iter_mut().enumerate() {
                    let allowed = mask.map(|m| m[q_idx][k_idx] != 0).unwrap_or(true);
                    if !allowed {
                        *score = f32::NEG_INFINITY;
                        continue;
                    }
                    let mut dot = 0f32;
                    for d in 0..head_dim {
                        dot += q_vec[(bh * q_len + q_idx) * head_dim + d]
                            * k_vec[(bh * k_len + k_idx) * head_dim + d];
                    }
                    *score = dot * scale;
                }
                let max_val = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
                let exps: Vec<f32> = row.iter().map(|s| (s - max_val).exp()).collect();
                let denom: f32 = exps.iter().sum();
                for d in 0..head_dim {
                    let acc: f32 = exps
                        .iter()
                        .enumerate()
                        .map(|(k_idx, e)| e / denom * v_vec[(bh * k_len + k_idx) * head_dim + d])
                        .sum();
                    output[(bh * q_len + q_idx) * head_dim + d] = acc;
                }
            }
        }

        Tensor::from_vec(output, (batch, heads, q_len, head_dim), q.device())
    }

    fn lower_triangle(len: usize) -> Vec<Vec<u8>> {
        (0..len)
            .map(|q| (0..len).map(|k| u8::from(k <= q)).collect())
            .collect()
    }

    fn max_diff(a: &Tensor, b: &Tensor) -> CandleResult<f32> {
        a.to_dtype(DType::F32)?
            .sub(&b.to_dtype(DType::F32)?)?
            .abs()?
            .max_all()?
            .to_vec0::<f32>()
    }

    #[test]
    fn exact_attention_matches_naive() -> Result<(), AttentionError> {
        let device = Device::Cpu;
        let (q, k, v) = build_inputs(&device)?;
        let mask = build_causal_mask(&device, 4)?;
        let output = ExactAttention::new().attend(&q, &k, &v, Some(&mask), &Config::default())?;
        let expected = naive_attention(&q, &k, &v, Some(&lower_triangle(4)), 1.0)?;
        assert!(max_diff(&output, &expected)? < 1e-4);
        Ok(())
    }

    #[test]
    fn inverse_sqrt_scaling_is_applied_on_request() -> Result<(), AttentionError> {
        let device = Device::Cpu;
        let (q, k, v) = build_inputs(&device)?;
        let config = Config::with_scaling(ScoreScaling::InvSqrtHeadDim);
        let output = ExactAttention::new().attend(&q, &k, &v, None, &config)?;
        let expected = naive_attention(&q, &k, &v, None, 1.0 / 8f32.sqrt())?;
        assert!(max_diff(&output, &expected)? < 1e-4);

        let unscaled = ExactAttention::new().attend(&q, &k, &v, None, &Config::default())?;
        assert!(max_diff(&output, &unscaled)? > 1e-6);
        Ok(())
    }

    #[test]
    fn cross_attention_lengths_are_supported() -> Result<(), AttentionError> {
        let device = Device::Cpu;
        let q = Tensor::randn(0f32, 1.0, (2, 2, 3, 4), &device)?;
        let k = Tensor::randn(0f32, 1.0, (2, 2, 5, 4), &device)?;
        let v = Tensor::randn(0f32, 1.0, (2, 2, 5, 4), &device)?;
        let ids = Tensor::from_slice(&[1u32, 2, 3, 0, 0, 4, 5, 6, 7, 0], (2, 5), &device)?;
        let mask = build_padding_mask(&ids, 0)?;
        let out = ExactAttention::new().attend(&q, &k, &v, Some(&mask), &Config::default())?;
        assert_eq!(out.dims(), &[2, 2, 3, 4]);
        Ok(())
    }

    #[test]
    fn weights_rows_are_distributions() -> Result<(), AttentionError> {
        let device = Device::Cpu;
        let (q, k, _) = build_inputs(&device)?;
        let mask = build_causal_mask(&device, 4)?;
        let weights = ExactAttention::new().weights(&q, &k, Some(&mask), &Config::default())?;
        assert_eq!(weights.dims(), &[1, 2, 4, 4]);
        assert_eq!(weights.dtype(), DType::F32);

        let rows = weights.reshape((8, 4))?.to_vec2::<f32>()?;
        for (idx, row) in rows.iter().enumerate() {
            let query = idx % 4;
            assert!((row.iter().sum::<f32>() - 1.0).abs() < 1e-5);
            for (key, &w) in row.iter().enumerate() {
                assert!(w >= 0.0);
                if key > query {
                    assert_eq!(w, 0.0, "query {query} attended to future key {key}");
                }
            }
        }
        Ok(())
    }

    #[test]
    fn fully_masked_row_is_uniform() -> Result<(), AttentionError> {
        let device = Device::Cpu;
        let q = Tensor::randn(0f32, 1.0, (1, 1, 2, 4), &device)?;
        let k = Tensor::randn(0f32, 1.0, (1, 1, 3, 4), &device)?;
        let mask = Tensor::zeros((1, 1, 1, 3), MASK_DTYPE, &device)?;
        let weights = ExactAttention::new().weights(&q, &k, Some(&mask), &Config::default())?;
        for value in weights.flatten_all()?.to_vec1::<f32>()? {
            assert!((value - 1.0 / 3.0).abs() < 1e-6);
        }
        Ok(())
    }

    #[test]
    fn mismatched_shapes_error() -> Result<(), AttentionError> {
        let device = Device::Cpu;
        let q = Tensor::zeros((1, 2, 4, 8), DType::F32, &device)?;
        let k = Tensor::zeros((1, 2, 5, 8), DType::F32, &device)?;
        let v = Tensor::zeros((1, 2, 4, 8), DType::F32, &device)?;
        let err = ExactAttention::new()
            .attend(&q, &k, &v, None, &Config::default())
            .unwrap_err();
        assert!(matches!(err, AttentionError::InvalidShape { .. }));
        Ok(())
    }

    #[test]
    fn mask_validation() -> Result<(), AttentionError> {
        let device = Device::Cpu;
        let q = Tensor::zeros((1, 2, 4, 8), DType::F32, &device)?;
        let attention = ExactAttention::new();

        let wrong_heads = Tensor::ones((1, 3, 4, 4), MASK_DTYPE, &device)?;
        let err = attention
            .attend(&q, &q, &q, Some(&wrong_heads), &Config::default())
            .unwrap_err();
        assert!(matches!(err, AttentionError::InvalidShape { .. }));

        let float_mask = Tensor::ones((1, 1, 4, 4), DType::F32, &device)?;
        let err = attention
            .attend(&q, &q, &q, Some(&float_mask), &Config::default())
            .unwrap_err();
        assert!(matches!(err, AttentionError::UnsupportedDType { .. }));
        Ok(())
    }

    #[test]
    fn dtype_matrix() -> Result<(), AttentionError> {
        let device = Device::Cpu;
        let (q, k, v) = build_inputs(&device)?;
        let mask = build_causal_mask(&device, 4)?;
        let reference =
            ExactAttention::new().attend(&q, &k, &v, Some(&mask), &Config::default())?;
        for dtype in [DType::F32, DType::BF16, DType::F16] {
            let out = ExactAttention::new().attend(
                &q.to_dtype(dtype)?,
                &k.to_dtype(dtype)?,
                &v.to_dtype(dtype)?,
                Some(&mask),
                &Config::default(),
            )?;
            assert_eq!(out.dtype(), dtype);
            let max = max_diff(&out, &reference)?;
            assert!(max < 5e-2, "dtype {dtype:?} diverged by {max}");
        }
        Ok(())
    }

    #[test]
    fn numerical_stability() -> Result<(), AttentionError> {
        let device = Device::Cpu;
        let q = Tensor::full(10_000.0f32, (1, 1, 4, 4), &device)?;
        let k = Tensor::full(-10_000.0f32, (1, 1, 4, 4), &device)?;
        let v = Tensor::ones((1, 1, 4, 4), DType::F32, &device)?;
        let out = ExactAttention::new()
            .attend(&q, &k, &v, None, &Config::default())?
            .flatten_all()?
            .to_vec1::<f32>()?;
        assert!(out.iter().all(|value| value.is_finite()));
        Ok(())
    }
}
