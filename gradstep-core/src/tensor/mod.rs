// src/tensor/mod.rs

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::buffer::Buffer;
use crate::error::GradStepError;
use crate::tensor_data::TensorData;
use crate::types::DType;

pub mod create;
mod debug;
pub mod kernels;

pub use create::{full, full_like, scalar, zeros, zeros_like};


/// Stable identity of a tensor handle, shared by all of its clones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TensorId(usize);

/// Represents a multi-dimensional array (tensor).
///
/// `Tensor` uses `Arc<RwLock<TensorData>>` internally to allow for:
/// 1.  **Shared Ownership:** cloning a `Tensor` is cheap and every clone
///     observes the same storage. Optimizer state relies on this: an
///     accumulator recorded into a plan is the same tensor the optimizer keeps.
/// 2.  **Interior Mutability:** update kernels write through an immutable
///     `Tensor` reference.
pub struct Tensor {
    pub(crate) data: Arc<RwLock<TensorData>>,
}

impl Clone for Tensor {
    /// Shallow clone: the new handle shares storage with `self`.
    fn clone(&self) -> Self {
        Tensor {
            data: Arc::clone(&self.data),
        }
    }
}

impl Tensor {
    /// Creates a new F32 Tensor with the given data and shape.
    pub fn new(data_vec: Vec<f32>, shape: Vec<usize>) -> Result<Self, GradStepError> {
        Tensor::from_buffer(Buffer::F32(data_vec), shape)
    }

    /// Creates a new F64 Tensor with the given data and shape.
    pub fn new_f64(data_vec: Vec<f64>, shape: Vec<usize>) -> Result<Self, GradStepError> {
        Tensor::from_buffer(Buffer::F64(data_vec), shape)
    }

    /// Creates a tensor of `dtype` from f64 values, narrowing as needed.
    pub fn from_f64_values(
        values: &[f64],
        shape: Vec<usize>,
        dtype: DType,
    ) -> Result<Self, GradStepError> {
        Tensor::from_buffer(Buffer::from_f64_slice(dtype, values)?, shape)
    }

    pub fn from_buffer(buffer: Buffer, shape: Vec<usize>) -> Result<Self, GradStepError> {
        let tensor_data = TensorData::new(buffer, shape)?;
        Ok(Tensor {
            data: Arc::new(RwLock::new(tensor_data)),
        })
    }

    /// Builder-style helper that names the tensor and returns it.
    pub fn with_name(self, name: impl Into<String>) -> Self {
        self.set_name(name);
        self
    }

    pub fn id(&self) -> TensorId {
        TensorId(Arc::as_ptr(&self.data) as *const () as usize)
    }

    /// True when both handles point at the same storage.
    pub fn ptr_eq(&self, other: &Tensor) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }

    /// Acquires a read lock on the tensor's data.
    ///
    /// A poisoned lock is recovered: the data itself is never left half-written
    /// by the kernels, which compute into a scratch vector before storing.
    pub fn read_data(&self) -> RwLockReadGuard<'_, TensorData> {
        self.data.read().unwrap_or_else(|poisoned| {
            log::warn!("RwLock for tensor data was poisoned. Recovering read guard.");
            PoisonError::into_inner(poisoned)
        })
    }

    /// Acquires a write lock on the tensor's data.
    pub fn write_data(&self) -> RwLockWriteGuard<'_, TensorData> {
        self.data.write().unwrap_or_else(|poisoned| {
            log::warn!("RwLock for tensor data was poisoned. Recovering write guard.");
            PoisonError::into_inner(poisoned)
        })
    }

    pub fn dtype(&self) -> DType {
        self.read_data().dtype()
    }

    pub fn shape(&self) -> Vec<usize> {
        self.read_data().shape.clone()
    }

    pub fn numel(&self) -> usize {
        self.read_data().numel()
    }

    pub fn name(&self) -> Option<String> {
        self.read_data().name.clone()
    }

    pub fn set_name(&self, name: impl Into<String>) {
        self.write_data().name = Some(name.into());
    }

    pub fn persistable(&self) -> bool {
        self.read_data().persistable
    }

    pub fn set_persistable(&self, persistable: bool) {
        self.write_data().persistable = persistable;
    }

    /// Returns a copy of the underlying buffer.
    pub fn buffer_snapshot(&self) -> Buffer {
        self.read_data().buffer.clone()
    }

    /// Reads every element widened to f64.
    pub fn to_f64_vec(&self) -> Vec<f64> {
        self.read_data().buffer.to_f64_vec()
    }

    /// Returns the elements of an F32 tensor.
    pub fn get_f32_data(&self) -> Result<Vec<f32>, GradStepError> {
        let guard = self.read_data();
        match &guard.buffer {
            Buffer::F32(values) => Ok(values.clone()),
            other => Err(GradStepError::DataTypeMismatch {
                expected: DType::F32,
                actual: other.dtype(),
                operation: "get_f32_data".to_string(),
            }),
        }
    }

    /// Extracts the single value of a one-element tensor.
    pub fn item(&self) -> Result<f64, GradStepError> {
        let guard = self.read_data();
        if guard.numel() != 1 {
            return Err(GradStepError::ShapeMismatch {
                expected: vec![],
                actual: guard.shape.clone(),
                operation: "item()".to_string(),
            });
        }
        Ok(guard.buffer.to_f64_vec()[0])
    }

    /// Returns a new tensor holding the elements converted to `dtype`.
    pub fn cast(&self, dtype: DType) -> Result<Tensor, GradStepError> {
        let (buffer, shape) = {
            let guard = self.read_data();
            (guard.buffer.cast(dtype)?, guard.shape.clone())
        };
        Tensor::from_buffer(buffer, shape)
    }
}
