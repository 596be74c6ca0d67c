use std::{fs, path::Path};

use attention::ScoreScaling;
use candle_core::{DType, Device};
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};

/// Architectural hyperparameters of the encoder-decoder model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformerConfig {
    pub emb_size: usize,
    pub n_heads: usize,
    pub num_encoder_layers: usize,
    pub num_decoder_layers: usize,
    pub dropout: f32,
}

impl Default for TransformerConfig {
    fn default() -> Self {
        Self {
            emb_size: 512,
            n_heads: 8,
            num_encoder_layers: 6,
            num_decoder_layers: 6,
            dropout: 0.1,
        }
    }
}

impl TransformerConfig {
    /// Loads a configuration from TOML (`.toml`, `.tml` or no extension) or JSON.
    ///
    /// Missing fields fall back to [`TransformerConfig::default`]. The loaded
    /// values are validated before being returned.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let config: TransformerConfig = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&contents)?,
            Some("toml") | Some("tml") | None => toml::from_str(&contents)?,
            Some(other) => {
                return Err(ModelError::config(format!(
                    "unsupported configuration extension '{other}'"
                )));
            }
        };
        config.validate()?;
        log::debug!("loaded model config from {}: {config:?}", path.display());
        Ok(config)
    }

    /// Width of every attention head.
    pub fn head_dim(&self) -> usize {
        if self.n_heads == 0 {
            0
        } else {
            self.emb_size / self.n_heads
        }
    }

    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.emb_size == 0 {
            errors.push("emb_size must be greater than 0".to_string());
        }
        if self.n_heads == 0 {
            errors.push("n_heads must be greater than 0".to_string());
        } else if self.emb_size % self.n_heads != 0 {
            errors.push(format!(
                "emb_size ({}) must be divisible by n_heads ({})",
                self.emb_size, self.n_heads
            ));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            errors.push(format!("dropout must be in [0, 1), got {}", self.dropout));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ModelError::config(errors.join("; ")))
        }
    }
}

/// Vocabulary sizes and padding ids for both sides of the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VocabConfig {
    pub src_vocab_size: usize,
    pub trg_vocab_size: usize,
    pub src_pad_idx: usize,
    pub trg_pad_idx: usize,
}

impl VocabConfig {
    pub fn new(
        src_vocab_size: usize,
        trg_vocab_size: usize,
        src_pad_idx: usize,
        trg_pad_idx: usize,
    ) -> Self {
        Self {
            src_vocab_size,
            trg_vocab_size,
            src_pad_idx,
            trg_pad_idx,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();
        for (side, size, pad) in [
            ("src", self.src_vocab_size, self.src_pad_idx),
            ("trg", self.trg_vocab_size, self.trg_pad_idx),
        ] {
            if size == 0 {
                errors.push(format!("{side}_vocab_size must be greater than 0"));
            } else if pad >= size {
                errors.push(format!(
                    "{side}_pad_idx ({pad}) must be smaller than {side}_vocab_size ({size})"
                ));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ModelError::config(errors.join("; ")))
        }
    }
}

/// Runtime knobs that do not change the architecture.
#[derive(Debug, Clone)]
pub struct ModelOptions {
    /// Parameter storage dtype.
    pub dtype: DType,
    pub device: Device,
    /// Seed for parameter initialisation.
    pub seed: u64,
    /// Attention score scaling; unscaled unless requested.
    pub scaling: ScoreScaling,
}

impl Default for ModelOptions {
    fn default() -> Self {
        Self {
            dtype: DType::F32,
            device: Device::Cpu,
            seed: 0,
            scaling: ScoreScaling::None,
        }
    }
}

impl ModelOptions {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_dtype(mut self, dtype: DType) -> Self {
        self.dtype = dtype;
        self
    }

    pub fn with_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    pub fn with_scaling(mut self, scaling: ScoreScaling) -> Self {
        self.scaling = scaling;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if !self.dtype.is_float() {
            return Err(ModelError::config(format!(
                "model parameters require a float dtype, got {:?}",
                self.dtype
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_architecture() {
        let config = TransformerConfig::default();
        assert_eq!(config.emb_size, 512);
        assert_eq!(config.n_heads, 8);
        assert_eq!(config.num_encoder_layers, 6);
        assert_eq!(config.num_decoder_layers, 6);
        assert_eq!(config.dropout, 0.1);
        assert_eq!(config.head_dim() * config.n_heads, config.emb_size);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn indivisible_heads_are_rejected() {
        let config = TransformerConfig {
            emb_size: 10,
            n_heads: 4,
            ..TransformerConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("divisible"));
    }

    #[test]
    fn validation_reports_every_problem() {
        let config = TransformerConfig {
            emb_size: 0,
            n_heads: 0,
            dropout: 1.0,
            ..TransformerConfig::default()
        };
        let message = config.validate().unwrap_err().to_string();
        assert!(message.contains("emb_size"));
        assert!(message.contains("n_heads"));
        assert!(message.contains("dropout"));
    }

    #[test]
    fn vocab_pad_must_fit() {
        assert!(VocabConfig::new(5, 5, 0, 0).validate().is_ok());
        assert!(matches!(
            VocabConfig::new(5, 5, 5, 0).validate(),
            Err(ModelError::Configuration(_))
        ));
        assert!(matches!(
            VocabConfig::new(5, 0, 0, 0).validate(),
            Err(ModelError::Configuration(_))
        ));
    }

    #[test]
    fn integer_dtype_options_are_rejected() {
        let options = ModelOptions::default().with_dtype(DType::U32);
        assert!(options.validate().is_err());
    }

    #[test]
    fn partial_toml_uses_defaults() -> Result<()> {
        let config: TransformerConfig = toml::from_str("emb_size = 64\nn_heads = 4\n")?;
        assert_eq!(config.emb_size, 64);
        assert_eq!(config.num_decoder_layers, 6);
        Ok(())
    }
}
