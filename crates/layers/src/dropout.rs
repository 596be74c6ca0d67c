//! Dropout driven by an explicit forward mode.
//!
//! Dropout is a pure function of the input, the drop probability and the
//! [`ForwardMode`] supplied by the caller. In [`ForwardMode::Eval`] it is the
//! identity. In [`ForwardMode::Train`] elements are zeroed with probability `p`
//! and survivors are scaled by `1 / (1 - p)`; the RNG lives inside the mode, so
//! every forward call owns its randomness and weights stay read-only.

use candle_core::Tensor;
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::{dtypes::PrecisionPolicy, LayerError, Result};

/// Selects evaluation or training behaviour for a single forward call.
#[derive(Debug, Clone)]
pub enum ForwardMode {
    /// Deterministic inference; dropout is disabled.
    Eval,
    /// Training behaviour; dropout masks are sampled from `rng`.
    Train { rng: StdRng },
}

impl ForwardMode {
    /// Training mode seeded deterministically.
    pub fn train(seed: u64) -> Self {
        Self::Train {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Returns `true` when dropout should be applied.
    pub fn is_training(&self) -> bool {
        matches!(self, Self::Train { .. })
    }
}

impl Default for ForwardMode {
    fn default() -> Self {
        Self::Eval
    }
}

/// Validates a dropout probability, which must lie in `[0, 1)`.
pub fn check_probability(probability: f32) -> Result<()> {
    if (0.0..1.0).contains(&probability) {
        Ok(())
    } else {
        Err(LayerError::config(format!(
            "dropout probability must be in [0, 1), got {probability}"
        )))
    }
}

/// Applies inverted dropout to `input` according to `mode`.
pub fn dropout(
    input: &Tensor,
    probability: f32,
    mode: &mut ForwardMode,
    policy: &PrecisionPolicy,
) -> Result<Tensor> {
    check_probability(probability)?;
    let rng = match mode {
        ForwardMode::Train { rng } if probability > 0.0 => rng,
        _ => return Ok(input.clone()),
    };

    let keep_prob = 1.0 - probability;
    let scale = 1.0 / keep_prob;
    let mask: Vec<f32> = (0..input.elem_count())
        .map(|_| if rng.gen::<f32>() < keep_prob { scale } else { 0.0 })
        .collect();
    let mask = Tensor::from_vec(mask, input.dims(), input.device())?.to_dtype(policy.compute())?;
    let compute = policy.cast_for_matmul(input)?;
    policy.cast_to_storage(&compute.mul(&mask)?)
}
