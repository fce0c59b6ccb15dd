// src/tensor_data.rs
use crate::buffer::Buffer;
use crate::error::GradStepError;
use crate::types::DType;

/// Internal storage and metadata for a Tensor.
///
/// It is wrapped in `Arc<RwLock<TensorData>>` by the `Tensor` struct to allow
/// shared ownership and interior mutability: optimizer state is updated in
/// place while parameters, plans and the optimizer all hold handles to it.
#[derive(Debug)]
pub struct TensorData {
    /// Contiguous row-major element storage.
    pub(crate) buffer: Buffer,
    /// The shape (dimensions) of the tensor. An empty shape is a scalar.
    pub(crate) shape: Vec<usize>,
    /// Optional diagnostic name (accumulators, master weights, gradients).
    pub(crate) name: Option<String>,
    /// Persistent tensors outlive a single optimization step.
    pub(crate) persistable: bool,
}

impl TensorData {
    /// Creates a new `TensorData` from a buffer and a shape.
    ///
    /// # Errors
    /// Returns `GradStepError::TensorCreationError` if the buffer length does not
    /// match the number of elements implied by `shape`.
    pub fn new(buffer: Buffer, shape: Vec<usize>) -> Result<Self, GradStepError> {
        let numel: usize = shape.iter().product();
        if buffer.len() != numel {
            return Err(GradStepError::TensorCreationError {
                data_len: buffer.len(),
                shape,
            });
        }
        Ok(TensorData {
            buffer,
            shape,
            name: None,
            persistable: false,
        })
    }

    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn dtype(&self) -> DType {
        self.buffer.dtype()
    }

    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }
}
