use half::{bf16, f16};
use num_traits::{NumCast, ToPrimitive};

use crate::error::GradStepError;
use crate::types::DType;

/// Typed element storage backing a tensor.
///
/// All arithmetic in the engine goes through `to_f64_vec` / `write_f64`,
/// so each variant only has to know how to widen and narrow its elements.
#[derive(Debug, Clone, PartialEq)]
pub enum Buffer {
    F32(Vec<f32>),
    F64(Vec<f64>),
    F16(Vec<f16>),
    BF16(Vec<bf16>),
}

impl Buffer {
    /// Creates a buffer of `len` elements, all equal to `value`.
    pub fn full(dtype: DType, len: usize, value: f64) -> Result<Self, GradStepError> {
        Buffer::from_f64_slice(dtype, &vec![value; len])
    }

    /// Narrows `values` into a buffer of the requested dtype.
    pub fn from_f64_slice(dtype: DType, values: &[f64]) -> Result<Self, GradStepError> {
        Ok(match dtype {
            DType::F32 => Buffer::F32(narrow(values, dtype)?),
            DType::F64 => Buffer::F64(values.to_vec()),
            DType::F16 => Buffer::F16(narrow(values, dtype)?),
            DType::BF16 => Buffer::BF16(narrow(values, dtype)?),
        })
    }

    pub fn dtype(&self) -> DType {
        match self {
            Buffer::F32(_) => DType::F32,
            Buffer::F64(_) => DType::F64,
            Buffer::F16(_) => DType::F16,
            Buffer::BF16(_) => DType::BF16,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Buffer::F32(v) => v.len(),
            Buffer::F64(v) => v.len(),
            Buffer::F16(v) => v.len(),
            Buffer::BF16(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Widens every element to f64.
    pub fn to_f64_vec(&self) -> Vec<f64> {
        match self {
            Buffer::F32(v) => widen(v),
            Buffer::F64(v) => v.clone(),
            Buffer::F16(v) => widen(v),
            Buffer::BF16(v) => widen(v),
        }
    }

    /// Overwrites the elements in place, narrowing to the buffer's own dtype.
    pub fn write_f64(&mut self, values: &[f64]) -> Result<(), GradStepError> {
        if values.len() != self.len() {
            return Err(GradStepError::ShapeMismatch {
                expected: vec![self.len()],
                actual: vec![values.len()],
                operation: "Buffer::write_f64".to_string(),
            });
        }
        *self = Buffer::from_f64_slice(self.dtype(), values)?;
        Ok(())
    }

    /// Returns a copy of this buffer converted to `dtype`.
    pub fn cast(&self, dtype: DType) -> Result<Buffer, GradStepError> {
        if dtype == self.dtype() {
            return Ok(self.clone());
        }
        Buffer::from_f64_slice(dtype, &self.to_f64_vec())
    }
}

fn widen<T: ToPrimitive>(values: &[T]) -> Vec<f64> {
    values
        .iter()
        .map(|v| v.to_f64().unwrap_or(f64::NAN))
        .collect()
}

fn narrow<T: NumCast>(values: &[f64], dtype: DType) -> Result<Vec<T>, GradStepError> {
    values
        .iter()
        .map(|&v| <T as NumCast>::from(v).ok_or(GradStepError::NumericCast { value: v, dtype }))
        .collect()
}
