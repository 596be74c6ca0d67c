pub use attention;
pub use embedding;
pub use layers;
pub use model;

pub use attention::{masks, ScoreScaling};
pub use layers::ForwardMode;
pub use model::{ModelError, ModelOptions, Transformer, TransformerConfig, VocabConfig};

use anyhow::{bail, Context, Result};
use candle_core::{Device, Tensor};

/// Picks the compute device: CUDA when compiled in and available, CPU otherwise.
pub fn setup_device(force_cpu: bool) -> Result<Device> {
    if force_cpu || std::env::var("CANDLE_FORCE_CPU").is_ok() {
        log::info!("CPU backend forced");
        return Ok(Device::Cpu);
    }

    match Device::cuda_if_available(0) {
        Ok(device) if device.is_cuda() => {
            log::info!("CUDA device selected: {:?}", device.location());
            Ok(device)
        }
        Ok(_) => {
            log::info!("using CPU backend");
            Ok(Device::Cpu)
        }
        Err(err) => {
            log::warn!("CUDA probe failed ({err}), falling back to CPU");
            Ok(Device::Cpu)
        }
    }
}

/// Parses a comma separated list of token ids such as `"1,2,3,0,0"`.
pub fn parse_token_ids(text: &str) -> Result<Vec<u32>> {
    let ids = text
        .split(',')
        .map(str::trim)
        .filter(|piece| !piece.is_empty())
        .map(|piece| {
            piece
                .parse::<u32>()
                .with_context(|| format!("invalid token id '{piece}'"))
        })
        .collect::<Result<Vec<_>>>()?;
    if ids.is_empty() {
        bail!("token id list must not be empty");
    }
    Ok(ids)
}

/// Wraps a single sequence as a `[1, len]` id tensor.
pub fn token_batch(ids: &[u32], device: &Device) -> Result<Tensor> {
    Ok(Tensor::from_slice(ids, (1, ids.len()), device)?)
}
