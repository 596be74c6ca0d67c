//! Post-norm encoder and decoder layers.
//!
//! Every sublayer output is added to its input, layer-normalised and passed
//! through dropout before feeding the next sublayer. Each layer owns its own
//! attention, feed-forward and normalisation parameters.

use attention::{Config as AttentionConfig, MultiHeadAttention};
use candle_core::{DType, Device, Tensor};
use layers::{
    FeedForward, FeedForwardConfig, ForwardMode, LayerNorm, LinearInit, NormConfig,
    PostNormResidual, PrecisionPolicy,
};
use rand::rngs::StdRng;

use crate::{config::TransformerConfig, error::Result};

/// Shared construction context for the layers of one model.
pub(crate) struct LayerBuilder<'a> {
    pub config: &'a TransformerConfig,
    pub attention: &'a AttentionConfig,
    pub device: &'a Device,
    pub dtype: DType,
}

impl LayerBuilder<'_> {
    fn attention(&self, rng: &mut StdRng) -> Result<MultiHeadAttention> {
        Ok(MultiHeadAttention::new(
            self.config.emb_size,
            self.config.n_heads,
            self.attention.clone(),
            rng,
            self.device,
            self.dtype,
        )?)
    }

    fn residual(&self) -> Result<PostNormResidual> {
        let norm = LayerNorm::identity(NormConfig::new(self.config.emb_size), self.dtype, self.device)?;
        Ok(PostNormResidual::new(norm, self.config.dropout)?)
    }

    fn feed_forward(&self, rng: &mut StdRng) -> Result<FeedForward> {
        Ok(FeedForward::with_init(
            FeedForwardConfig::new(self.config.emb_size, self.config.dropout),
            &LinearInit::fan_in_uniform(),
            rng,
            self.device,
            self.dtype,
        )?)
    }

    pub(crate) fn policy(&self) -> PrecisionPolicy {
        PrecisionPolicy::from_parameter_dtype(self.dtype)
    }
}

/// Self-attention followed by a feed-forward network.
#[derive(Debug, Clone)]
pub struct EncoderLayer {
    self_attention: MultiHeadAttention,
    attention_residual: PostNormResidual,
    feed_forward: FeedForward,
    feed_forward_residual: PostNormResidual,
    policy: PrecisionPolicy,
}

impl EncoderLayer {
    pub(crate) fn new(builder: &LayerBuilder<'_>, rng: &mut StdRng) -> Result<Self> {
        Ok(Self {
            self_attention: builder.attention(rng)?,
            attention_residual: builder.residual()?,
            feed_forward: builder.feed_forward(rng)?,
            feed_forward_residual: builder.residual()?,
            policy: builder.policy(),
        })
    }

    pub fn self_attention(&self) -> &MultiHeadAttention {
        &self.self_attention
    }

    /// `x`: `[batch, src_len, E]`, `src_mask`: `[batch, 1, 1, src_len]`.
    pub fn forward(&self, x: &Tensor, src_mask: &Tensor, mode: &mut ForwardMode) -> Result<Tensor> {
        let attended = self.self_attention.forward(x, x, x, Some(src_mask))?;
        let x = self
            .attention_residual
            .forward(&attended, x, mode, &self.policy)?;

        let transformed = self.feed_forward.forward(&x, mode, &self.policy)?;
        Ok(self
            .feed_forward_residual
            .forward(&transformed, &x, mode, &self.policy)?)
    }
}

/// Masked self-attention, cross-attention over the encoder output, then a
/// feed-forward network.
#[derive(Debug, Clone)]
pub struct DecoderLayer {
    self_attention: MultiHeadAttention,
    self_residual: PostNormResidual,
    cross_attention: MultiHeadAttention,
    cross_residual: PostNormResidual,
    feed_forward: FeedForward,
    feed_forward_residual: PostNormResidual,
    policy: PrecisionPolicy,
}

impl DecoderLayer {
    pub(crate) fn new(builder: &LayerBuilder<'_>, rng: &mut StdRng) -> Result<Self> {
        Ok(Self {
            self_attention: builder.attention(rng)?,
            self_residual: builder.residual()?,
            cross_attention: builder.attention(rng)?,
            cross_residual: builder.residual()?,
            feed_forward: builder.feed_forward(rng)?,
            feed_forward_residual: builder.residual()?,
            policy: builder.policy(),
        })
    }

    pub fn self_attention(&self) -> &MultiHeadAttention {
        &self.self_attention
    }

    pub fn cross_attention(&self) -> &MultiHeadAttention {
        &self.cross_attention
    }

    /// Runs the layer for target states `x` against the encoder output `memory`.
    pub fn forward(
        &self,
        x: &Tensor,
        memory: &Tensor,
        src_mask: &Tensor,
        trg_mask: &Tensor,
        mode: &mut ForwardMode,
    ) -> Result<Tensor> {
        let attended = self.self_attention.forward(x, x, x, Some(trg_mask))?;
        let x = self.self_residual.forward(&attended, x, mode, &self.policy)?;

        let crossed = self
            .cross_attention
            .forward(&x, memory, memory, Some(src_mask))?;
        let x = self.cross_residual.forward(&crossed, &x, mode, &self.policy)?;

        let transformed = self.feed_forward.forward(&x, mode, &self.policy)?;
        Ok(self
            .feed_forward_residual
            .forward(&transformed, &x, mode, &self.policy)?)
    }
}
