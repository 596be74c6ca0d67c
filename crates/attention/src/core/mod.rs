//! Core traits and types shared across attention implementations.
//!
//! Implementations operate on tensors with layout
//! `[batch, n_heads, seq_len, head_dim]`. The output mirrors the query layout
//! and dtype; reductions accumulate in `f32` regardless of the incoming dtype.

pub mod config;
pub mod errors;

use candle_core::Tensor;

pub use config::{Config, ScoreScaling, MASK_FILL_VALUE};
pub use errors::AttentionError;

/// Unified interface for attention kernels.
///
/// * `q` is `[batch, n_heads, q_len, head_dim]`; `k` and `v` are
///   `[batch, n_heads, k_len, head_dim]`.
/// * Masks, when present, are boolean (`U8`, non-zero = attend) tensors shaped
///   `[batch | 1, n_heads | 1, q_len | 1, k_len]`.
/// * The returned tensor is `[batch, n_heads, q_len, head_dim]` in `q`'s dtype.
pub trait Attention {
    /// Compute attention outputs.
    fn attend(
        &self,
        q: &Tensor,
        k: &Tensor,
        v: &Tensor,
        mask: Option<&Tensor>,
        config: &Config,
    ) -> Result<Tensor, AttentionError>;

    /// Post-softmax attention weights `[batch, n_heads, q_len, k_len]` in `f32`.
    fn weights(
        &self,
        q: &Tensor,
        k: &Tensor,
        mask: Option<&Tensor>,
        config: &Config,
    ) -> Result<Tensor, AttentionError>;
}
