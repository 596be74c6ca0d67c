//! Embedding plus layer stacks for both halves of the model.

use candle_core::Tensor;
use embedding::{TokenEmbedding, TokenEmbeddingConfig};
use layers::{ForwardMode, Linear, LinearConfig, LinearInit, PrecisionPolicy};
use rand::rngs::StdRng;

use crate::{
    block::{DecoderLayer, EncoderLayer, LayerBuilder},
    error::Result,
};

fn token_embedding(
    builder: &LayerBuilder<'_>,
    vocab_size: usize,
    rng: &mut StdRng,
) -> Result<TokenEmbedding> {
    let config = TokenEmbeddingConfig {
        vocab_size,
        hidden_dim: builder.config.emb_size,
        dtype: builder.dtype,
        device: builder.device.clone(),
    };
    Ok(TokenEmbedding::new(config, rng)?)
}

/// Source-side stack: token embedding followed by encoder layers.
#[derive(Debug, Clone)]
pub struct Encoder {
    embedding: TokenEmbedding,
    layers: Vec<EncoderLayer>,
}

impl Encoder {
    pub(crate) fn new(
        builder: &LayerBuilder<'_>,
        vocab_size: usize,
        rng: &mut StdRng,
    ) -> Result<Self> {
        let embedding = token_embedding(builder, vocab_size, rng)?;
        let layers = (0..builder.config.num_encoder_layers)
            .map(|_| EncoderLayer::new(builder, rng))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { embedding, layers })
    }

    pub fn embedding(&self) -> &TokenEmbedding {
        &self.embedding
    }

    pub fn layers(&self) -> &[EncoderLayer] {
        &self.layers
    }

    /// Encodes `[batch, src_len]` ids into `[batch, src_len, E]` states.
    pub fn forward(
        &self,
        src: &Tensor,
        src_mask: &Tensor,
        mode: &mut ForwardMode,
    ) -> Result<Tensor> {
        let mut hidden = self.embedding.forward(src)?;
        for layer in &self.layers {
            hidden = layer.forward(&hidden, src_mask, mode)?;
        }
        Ok(hidden)
    }
}

/// Target-side stack ending in the vocabulary projection.
#[derive(Debug, Clone)]
pub struct Decoder {
    embedding: TokenEmbedding,
    layers: Vec<DecoderLayer>,
    fc_out: Linear,
    policy: PrecisionPolicy,
}

impl Decoder {
    pub(crate) fn new(
        builder: &LayerBuilder<'_>,
        vocab_size: usize,
        rng: &mut StdRng,
    ) -> Result<Self> {
        let embedding = token_embedding(builder, vocab_size, rng)?;
        let layers = (0..builder.config.num_decoder_layers)
            .map(|_| DecoderLayer::new(builder, rng))
            .collect::<Result<Vec<_>>>()?;
        let fc_out = Linear::with_init(
            LinearConfig::new(builder.config.emb_size, vocab_size),
            &LinearInit::fan_in_uniform(),
            rng,
            builder.device,
            builder.dtype,
        )?;
        Ok(Self {
            embedding,
            layers,
            fc_out,
            policy: builder.policy(),
        })
    }

    pub fn embedding(&self) -> &TokenEmbedding {
        &self.embedding
    }

    pub fn layers(&self) -> &[DecoderLayer] {
        &self.layers
    }

    pub fn fc_out(&self) -> &Linear {
        &self.fc_out
    }

    /// Decodes `[batch, trg_len]` ids against `memory` into raw logits
    /// `[batch, trg_len, trg_vocab_size]`.
    pub fn forward(
        &self,
        trg: &Tensor,
        memory: &Tensor,
        src_mask: &Tensor,
        trg_mask: &Tensor,
        mode: &mut ForwardMode,
    ) -> Result<Tensor> {
        let mut hidden = self.embedding.forward(trg)?;
        for layer in &self.layers {
            hidden = layer.forward(&hidden, memory, src_mask, trg_mask, mode)?;
        }
        Ok(self.fc_out.forward(&hidden, &self.policy)?)
    }
}
