//! Builders for padding masks used to drop padded keys.

use candle_core::{bail, DType, Result, Tensor};

/// Marks every non-pad token of a `[batch, seq]` id tensor.
///
/// The result is shaped `[batch, 1, 1, seq]` so it broadcasts across heads and
/// query positions.
pub fn build_padding_mask(token_ids: &Tensor, pad_idx: usize) -> Result<Tensor> {
    let (batch, seq) = match token_ids.dims() {
        [batch, seq] => (*batch, *seq),
        dims => bail!("padding mask expects token ids shaped [batch, seq], got {dims:?}"),
    };
    if !token_ids.dtype().is_int() {
        bail!(
            "padding mask expects integer token ids, got {:?}",
            token_ids.dtype()
        );
    }

    let pad = pad_idx as i64;
    let data: Vec<u8> = token_ids
        .to_dtype(DType::I64)?
        .flatten_all()?
        .to_vec1::<i64>()?
        .into_iter()
        .map(|id| u8::from(id != pad))
        .collect();

    Tensor::from_vec(data, (batch, 1, 1, seq), token_ids.device())
}
