//! GradStep: the parameter-update engine shared by gradient-based optimizers.
//!
//! Given `(parameter, gradient)` pairs, an [`Optimizer`] keeps the
//! per-parameter state its update rule needs, folds in weight decay, clips,
//! and applies the update either immediately or by recording it into a
//! reusable [`Program`](program::Program).

pub mod buffer;
pub mod error;
pub mod tensor;
pub mod tensor_data;
pub mod types;

pub mod nn;
pub mod optim;
pub mod program;

pub use error::GradStepError;
pub use nn::{Initializer, ParamAttr, Parameter};
pub use optim::{Optimizer, OptimizerBuilder};
pub use program::{ExecutionMode, Program};
pub use tensor::Tensor;
pub use types::DType;
