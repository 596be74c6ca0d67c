//! Configuration options shared by all attention implementations.

/// Sentinel written into masked score positions before the softmax.
pub const MASK_FILL_VALUE: f32 = -1e20;

/// How raw `q · k` scores are scaled before normalisation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScoreScaling {
    /// Use the raw dot products.
    #[default]
    None,
    /// Multiply by `1 / sqrt(head_dim)`.
    InvSqrtHeadDim,
}

impl ScoreScaling {
    /// Multiplier applied to the scores for the given head width.
    pub fn factor(&self, head_dim: usize) -> f64 {
        match self {
            ScoreScaling::None => 1.0,
            ScoreScaling::InvSqrtHeadDim => 1.0 / (head_dim as f64).sqrt(),
        }
    }
}

/// Configuration driving attention behaviour.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Scaling applied to the scores.
    pub scaling: ScoreScaling,
    /// Value substituted where the mask is false.
    pub mask_fill: f32,
}

impl Config {
    pub fn with_scaling(scaling: ScoreScaling) -> Self {
        Self {
            scaling,
            ..Self::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scaling: ScoreScaling::None,
            mask_fill: MASK_FILL_VALUE,
        }
    }
}
