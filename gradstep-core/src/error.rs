use crate::types::DType;
use thiserror::Error;

/// Custom error type for the GradStep update engine.
#[derive(Error, Debug, PartialEq, Clone)]
pub enum GradStepError {
    /// Invalid optimizer, group, schedule or clip configuration.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Parameter '{name}' appears in more than one parameter group")]
    DuplicateParameter { name: String },

    /// Raised when a plan is built twice for the same accumulator key.
    #[error("Accumulator '{accumulator}' already exists for parameter '{param}'")]
    DuplicateAccumulator { accumulator: String, param: String },

    #[error("Accumulator '{accumulator}' does not exist for parameter '{param}'")]
    AccumulatorNotFound { accumulator: String, param: String },

    /// A checkpoint mapping lacks an accumulator the optimizer expects to restore.
    #[error("Optimizer state error: tensor '{key}' not found in state dict")]
    AccumulatorMissing { key: String },

    #[error("Optimizer state error: required entry '{key}' is missing")]
    StateKeyMissing { key: String },

    #[error("Learning rate can't be set manually while a schedule is active")]
    LrScheduleConflict,

    #[error("Parameter '{name}' has no allocated storage yet")]
    ParameterNotInitialized { name: String },

    #[error("Shape mismatch: expected {expected:?}, got {actual:?} during operation {operation}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
        operation: String,
    },

    #[error("Data type mismatch: expected {expected:?}, got {actual:?} during operation {operation}")]
    DataTypeMismatch {
        expected: DType,
        actual: DType,
        operation: String,
    },

    #[error("Tensor creation error: data length {data_len} does not match shape {shape:?}")]
    TensorCreationError { data_len: usize, shape: Vec<usize> },

    #[error("Value {value} cannot be represented as {dtype:?}")]
    NumericCast { value: f64, dtype: DType },

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}
