use crate::buffer::Buffer;
use crate::error::GradStepError;
use crate::tensor::Tensor;
use crate::types::DType;

/// Creates a tensor of `shape` filled with `value`.
pub fn full(shape: &[usize], dtype: DType, value: f64) -> Result<Tensor, GradStepError> {
    let numel: usize = shape.iter().product();
    Tensor::from_buffer(Buffer::full(dtype, numel, value)?, shape.to_vec())
}

/// Creates a tensor of `shape` filled with zeros.
pub fn zeros(shape: &[usize], dtype: DType) -> Result<Tensor, GradStepError> {
    full(shape, dtype, 0.0)
}

/// Creates a zero-filled tensor with the same shape and dtype as `other`.
pub fn zeros_like(other: &Tensor) -> Result<Tensor, GradStepError> {
    zeros(&other.shape(), other.dtype())
}

pub fn full_like(other: &Tensor, value: f64) -> Result<Tensor, GradStepError> {
    full(&other.shape(), other.dtype(), value)
}

/// Creates a rank-0 tensor holding one value.
pub fn scalar(value: f64, dtype: DType) -> Result<Tensor, GradStepError> {
    full(&[], dtype, value)
}
