use super::*;
use candle_core::{Device, Result};

fn ids(data: &[u32], shape: (usize, usize)) -> Result<Tensor> {
    Tensor::from_slice(data, shape, &Device::Cpu)
}

#[test]
fn causal_mask_is_lower_triangular() -> Result<()> {
    let mask = build_causal_mask(&Device::Cpu, 4)?;
    assert_eq!(mask.dims(), &[1, 1, 4, 4]);
    assert_eq!(mask.dtype(), MASK_DTYPE);

    let rows = mask.squeeze(0)?.squeeze(0)?.to_vec2::<u8>()?;
    for (q, row) in rows.iter().enumerate() {
        for (k, &value) in row.iter().enumerate() {
            assert_eq!(value, u8::from(k <= q), "q={q} k={k}");
        }
    }
    Ok(())
}

#[test]
fn causal_mask_handles_single_token() -> Result<()> {
    let mask = build_causal_mask(&Device::Cpu, 1)?;
    assert_eq!(mask.flatten_all()?.to_vec1::<u8>()?, vec![1]);
    Ok(())
}

#[test]
fn padding_mask_flags_pad_positions() -> Result<()> {
    let token_ids = ids(&[1, 2, 3, 0, 0, 4, 0, 5, 6, 7], (2, 5))?;
    let mask = build_padding_mask(&token_ids, 0)?;
    assert_eq!(mask.dims(), &[2, 1, 1, 5]);
    let rows = mask.reshape((2, 5))?.to_vec2::<u8>()?;
    assert_eq!(rows, vec![vec![1, 1, 1, 0, 0], vec![1, 0, 1, 1, 1]]);
    Ok(())
}

#[test]
fn padding_mask_respects_custom_pad_index() -> Result<()> {
    let token_ids = ids(&[3, 0, 3], (1, 3))?;
    let mask = build_padding_mask(&token_ids, 3)?;
    assert_eq!(mask.flatten_all()?.to_vec1::<u8>()?, vec![0, 1, 0]);
    Ok(())
}

#[test]
fn padding_mask_rejects_rank_one_input() -> Result<()> {
    let token_ids = Tensor::from_slice(&[1u32, 2], 2, &Device::Cpu)?;
    assert!(build_padding_mask(&token_ids, 0).is_err());
    Ok(())
}

#[test]
fn target_mask_combines_padding_and_causality() -> Result<()> {
    let token_ids = ids(&[1, 2, 0, 0], (1, 4))?;
    let mask = build_target_mask(&token_ids, 0)?;
    assert_eq!(mask.dims(), &[1, 1, 4, 4]);

    let rows = mask.reshape((4, 4))?.to_vec2::<u8>()?;
    assert_eq!(
        rows,
        vec![
            vec![1, 0, 0, 0],
            vec![1, 1, 0, 0],
            vec![1, 1, 0, 0],
            vec![1, 1, 0, 0],
        ]
    );
    Ok(())
}

#[test]
fn target_mask_broadcasts_over_batch() -> Result<()> {
    let token_ids = ids(&[1, 2, 3, 4, 0, 6], (2, 3))?;
    let mask = build_target_mask(&token_ids, 0)?;
    assert_eq!(mask.dims(), &[2, 1, 3, 3]);
    let values = mask.flatten_all()?.to_vec1::<u8>()?;
    // Batch 1, query 2 must not see the padded key 1 even though it is in the past.
    assert_eq!(values[9 + 2 * 3 + 1], 0);
    assert_eq!(values[9 + 2 * 3 + 2], 1);
    Ok(())
}
