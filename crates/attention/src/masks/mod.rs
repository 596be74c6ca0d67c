//! Mask utilities shared by attention implementations.
//!
//! All masks produced here are boolean tensors with dtype [`MASK_DTYPE`]
//! (`1` = attend, `0` = suppress) shaped `[batch | 1, 1, q_len | 1, k_len]`.
//! Kernels broadcast them over heads and, for padding masks, over queries.

pub mod causal;
pub mod padding;

use candle_core::{DType, Result, Tensor};

/// Dtype shared by all boolean masks.
pub const MASK_DTYPE: DType = DType::U8;

pub use causal::build_causal_mask;
pub use padding::build_padding_mask;

/// Logical AND of two broadcast-compatible boolean masks.
pub fn combine_masks(lhs: &Tensor, rhs: &Tensor) -> Result<Tensor> {
    lhs.to_dtype(MASK_DTYPE)?
        .broadcast_mul(&rhs.to_dtype(MASK_DTYPE)?)
}

/// Decoder self-attention mask: target padding AND causal, `[batch, 1, len, len]`.
pub fn build_target_mask(token_ids: &Tensor, pad_idx: usize) -> Result<Tensor> {
    let padding = build_padding_mask(token_ids, pad_idx)?;
    let (_, _, _, len) = padding.dims4()?;
    let causal = build_causal_mask(token_ids.device(), len)?;
    combine_masks(&padding, &causal)
}

#[cfg(test)]
mod tests;
