//! Glue between candle and hetseq error handling

use candle_core::{DType, Result as CandleResult, Tensor};
use hetseq_core::error::{Error, Result};

/// Convert a CandleResult to a hetseq Result
pub trait ToHetseqResult<T> {
    /// Map the candle error into [`Error::Tensor`]
    fn hetseq_result(self) -> Result<T>;
}

impl<T> ToHetseqResult<T> for CandleResult<T> {
    fn hetseq_result(self) -> Result<T> {
        self.map_err(|e| Error::Tensor(e.to_string()))
    }
}

/// Read a rank-0 tensor as f32
pub fn scalar_value(tensor: &Tensor) -> Result<f32> {
    tensor
        .to_dtype(DType::F32)
        .and_then(|t| t.to_scalar::<f32>())
        .hetseq_result()
}

/// Rank-0 NaN of `dtype`, the mean over zero selected tokens
pub fn nan_scalar(dtype: DType, device: &candle_core::Device) -> Result<Tensor> {
    Tensor::new(f32::NAN, device)
        .and_then(|t| t.to_dtype(dtype))
        .hetseq_result()
}

/// Check that a tensor has exactly `expected` dims
pub fn expect_dims(name: &str, tensor: &Tensor, expected: &[usize]) -> Result<()> {
    if tensor.dims() != expected {
        return Err(Error::Precondition(format!(
            "{} has shape {:?}, expected {:?}",
            name,
            tensor.dims(),
            expected
        )));
    }
    Ok(())
}
