//! Lightweight validation helpers shared across layer components.
//!
//! These routines provide concise shape and dtype assertions that can be wired
//! into constructors or forward paths. They return [`crate::Result`] so call
//! sites can propagate errors without panicking.

use candle_core::{DType, Tensor};

use crate::{LayerError, Result};

/// Ensures a tensor matches the expected dimensions exactly.
pub fn expect_shape(context: &'static str, tensor: &Tensor, expected: &[usize]) -> Result<()> {
    let actual = tensor.dims();
    if actual == expected {
        Ok(())
    } else {
        Err(LayerError::Shape {
            context,
            expected: format!("{expected:?}"),
            actual: actual.to_vec(),
        })
    }
}

/// Ensures a tensor has exactly `rank` dimensions.
pub fn expect_rank(context: &'static str, tensor: &Tensor, rank: usize) -> Result<()> {
    if tensor.rank() == rank {
        Ok(())
    } else {
        Err(LayerError::Shape {
            context,
            expected: format!("rank {rank}"),
            actual: tensor.dims().to_vec(),
        })
    }
}

/// Validates the `(batch, seq, hidden)` convention with a known hidden size.
pub fn expect_batch_seq_hidden(context: &'static str, tensor: &Tensor, hidden: usize) -> Result<()> {
    match tensor.dims() {
        [batch, seq, actual_hidden] if *actual_hidden == hidden && *batch > 0 && *seq > 0 => {
            Ok(())
        }
        dims => Err(LayerError::Shape {
            context,
            expected: format!("(batch > 0, seq > 0, {hidden})"),
            actual: dims.to_vec(),
        }),
    }
}

/// Checks the tensor dtype is one of the allowed values.
pub fn expect_dtype_in(context: &'static str, tensor: &Tensor, allowed: &[DType]) -> Result<()> {
    let dtype = tensor.dtype();
    if allowed.contains(&dtype) {
        Ok(())
    } else {
        Err(LayerError::DType {
            context,
            expected: format!("{allowed:?}"),
            actual: format!("{dtype:?}"),
        })
    }
}

/// Floating point dtypes accepted for parameters and activations.
pub const FLOAT_DTYPES: &[DType] = &[DType::F16, DType::BF16, DType::F32, DType::F64];
