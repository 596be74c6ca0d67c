use attention::{
    masks::{build_padding_mask, build_target_mask},
    Config as AttentionConfig, ScoreScaling,
};
use candle_core::Tensor;
use embedding::token::validate_token_ids;
use layers::ForwardMode;
use rand::{rngs::StdRng, SeedableRng};

use crate::{
    block::LayerBuilder,
    config::{ModelOptions, TransformerConfig, VocabConfig},
    error::{ModelError, Result},
    stack::{Decoder, Encoder},
};

/// Encoder-decoder transformer mapping source and target ids to target logits.
#[derive(Debug, Clone)]
pub struct Transformer {
    config: TransformerConfig,
    vocab: VocabConfig,
    options: ModelOptions,
    encoder: Encoder,
    decoder: Decoder,
}

impl Transformer {
    /// Validates the configuration and initialises every parameter from
    /// `options.seed`.
    pub fn new(
        config: TransformerConfig,
        vocab: VocabConfig,
        options: ModelOptions,
    ) -> Result<Self> {
        config.validate()?;
        vocab.validate()?;
        options.validate()?;

        if options.scaling == ScoreScaling::None {
            log::warn!(
                "attention scores are not scaled by 1/sqrt(head_dim); pass ScoreScaling::InvSqrtHeadDim to enable scaling"
            );
        }

        let attention = AttentionConfig::with_scaling(options.scaling);
        let builder = LayerBuilder {
            config: &config,
            attention: &attention,
            device: &options.device,
            dtype: options.dtype,
        };
        let mut rng = StdRng::seed_from_u64(options.seed);
        let encoder = Encoder::new(&builder, vocab.src_vocab_size, &mut rng)?;
        let decoder = Decoder::new(&builder, vocab.trg_vocab_size, &mut rng)?;

        log::info!(
            "transformer ready emb_size={} heads={} encoder_layers={} decoder_layers={} src_vocab={} trg_vocab={} dtype={:?} device={:?}",
            config.emb_size,
            config.n_heads,
            config.num_encoder_layers,
            config.num_decoder_layers,
            vocab.src_vocab_size,
            vocab.trg_vocab_size,
            options.dtype,
            options.device.location(),
        );

        Ok(Self {
            config,
            vocab,
            options,
            encoder,
            decoder,
        })
    }

    pub fn config(&self) -> &TransformerConfig {
        &self.config
    }

    pub fn vocab(&self) -> &VocabConfig {
        &self.vocab
    }

    pub fn options(&self) -> &ModelOptions {
        &self.options
    }

    pub fn encoder(&self) -> &Encoder {
        &self.encoder
    }

    pub fn decoder(&self) -> &Decoder {
        &self.decoder
    }

    /// Source padding mask `[batch, 1, 1, src_len]`.
    pub fn make_src_mask(&self, src: &Tensor) -> Result<Tensor> {
        validate_token_ids(src)?;
        let src = src.to_device(&self.options.device)?;
        Ok(build_padding_mask(&src, self.vocab.src_pad_idx)?)
    }

    /// Target padding AND causal mask `[batch, 1, trg_len, trg_len]`.
    pub fn make_trg_mask(&self, trg: &Tensor) -> Result<Tensor> {
        validate_token_ids(trg)?;
        let trg = trg.to_device(&self.options.device)?;
        Ok(build_target_mask(&trg, self.vocab.trg_pad_idx)?)
    }

    /// Eval-mode forward pass returning logits `[batch, trg_len, trg_vocab_size]`.
    pub fn forward(&self, src: &Tensor, trg: &Tensor) -> Result<Tensor> {
        self.forward_with_mode(src, trg, &mut ForwardMode::Eval)
    }

    /// Forward pass with an explicit dropout mode.
    pub fn forward_with_mode(
        &self,
        src: &Tensor,
        trg: &Tensor,
        mode: &mut ForwardMode,
    ) -> Result<Tensor> {
        let (src_batch, _) = validate_token_ids(src)?;
        let (trg_batch, _) = validate_token_ids(trg)?;
        if src_batch != trg_batch {
            return Err(ModelError::shape(format!(
                "source batch {src_batch} does not match target batch {trg_batch}"
            )));
        }

        let src = src.to_device(&self.options.device)?;
        let trg = trg.to_device(&self.options.device)?;
        let src_mask = self.make_src_mask(&src)?;
        let trg_mask = self.make_trg_mask(&trg)?;

        let memory = self.encoder.forward(&src, &src_mask, mode)?;
        self.decoder
            .forward(&trg, &memory, &src_mask, &trg_mask, mode)
    }
}
