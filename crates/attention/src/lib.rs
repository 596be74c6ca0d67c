//! Multi-head scaled dot-product attention for the encoder-decoder model.
//!
//! The crate is split into three layers:
//!
//! * [`core`] defines the [`Attention`] kernel trait, its [`Config`] and the
//!   [`AttentionError`] type. Kernels operate on tensors laid out as
//!   `[batch, n_heads, seq_len, head_dim]`; queries and keys may have different
//!   sequence lengths (cross-attention).
//! * [`masks`] builds boolean (`U8`) masks from token ids: padding masks,
//!   causal masks and their conjunction.
//! * [`mha`] wraps a kernel with the fused QKV input projection and the output
//!   projection, working on `[batch, seq_len, emb_size]` hidden states.
//!
//! Masked scores are replaced by a large negative sentinel rather than
//! `-inf`, so a fully masked row degrades to a uniform distribution instead of
//! producing NaNs. Scores are not divided by `sqrt(head_dim)` unless
//! [`ScoreScaling::InvSqrtHeadDim`] is requested.

pub mod core;
pub mod masks;
pub mod mha;
pub mod reference;

pub use core::{Attention, AttentionError, Config, ScoreScaling};
pub use mha::MultiHeadAttention;
pub use reference::ExactAttention;
