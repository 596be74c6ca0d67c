//! Builders for causal attention masks.

use candle_core::{Device, Result, Tensor};

/// Lower-triangular mask shaped `[1, 1, len, len]`.
///
/// Entry `(i, j)` is `1` when `j <= i`, so query `i` sees itself and every
/// earlier position.
pub fn build_causal_mask(device: &Device, len: usize) -> Result<Tensor> {
    let data: Vec<u8> = (0..len)
        .flat_map(|q| (0..len).map(move |k| u8::from(k <= q)))
        .collect();
    Tensor::from_vec(data, (1, 1, len, len), device)
}
