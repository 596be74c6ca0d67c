//! Encoder-decoder transformer assembled from the `layers`, `embedding` and
//! `attention` crates.
//!
//! [`Transformer::forward`] maps source ids `[batch, src_len]` and target ids
//! `[batch, trg_len]` to raw logits `[batch, trg_len, trg_vocab_size]`. The
//! source padding mask and the combined target padding/causal mask are built
//! internally from the configured pad indices.

pub mod block;
pub mod config;
pub mod error;
pub mod model;
pub mod stack;

pub use block::{DecoderLayer, EncoderLayer};
pub use config::{ModelOptions, TransformerConfig, VocabConfig};
pub use error::{ModelError, Result};
pub use model::Transformer;
pub use stack::{Decoder, Encoder};
