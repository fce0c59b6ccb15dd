use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::buffer::Buffer;
use crate::error::GradStepError;
use crate::nn::init::Initializer;
use crate::optim::regularizer::Regularizer;
use crate::tensor::{self, Tensor};
use crate::types::DType;

static NEXT_PARAM_ID: AtomicUsize = AtomicUsize::new(0);

/// Stable identity of a parameter, shared by all clones of its handle and
/// never reused by a later parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParamId(usize);

/// Per-parameter attributes declared by the model.
///
/// Parameters registered through a parameter group take the group's resolved
/// settings instead.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamAttr {
    /// Multiplier applied to the global learning rate.
    pub learning_rate: f64,
    pub regularizer: Option<Regularizer>,
}

impl Default for ParamAttr {
    fn default() -> Self {
        ParamAttr {
            learning_rate: 1.0,
            regularizer: None,
        }
    }
}

#[derive(Debug)]
pub struct ParameterData {
    pub(crate) name: String,
    /// `None` until the parameter is materialized.
    pub(crate) value: Option<Tensor>,
    pub(crate) shape: Vec<usize>,
    pub(crate) dtype: DType,
    pub(crate) stop_gradient: bool,
    pub(crate) grad: Option<Tensor>,
    pub(crate) attr: ParamAttr,
    /// Values the parameter held when it was first materialized.
    pub(crate) initial_value: Option<Buffer>,
}

/// A named, trainable tensor owned by the model.
///
/// The optimizer only ever holds handles to parameters; cloning a
/// `Parameter` is cheap and every clone refers to the same storage.
#[derive(Clone)]
pub struct Parameter {
    id: ParamId,
    data: Arc<RwLock<ParameterData>>,
}

impl Parameter {
    /// Wraps an existing tensor. Its current values become the initial-value snapshot.
    pub fn new(name: impl Into<String>, value: Tensor) -> Self {
        let name = name.into();
        value.set_name(name.clone());
        value.set_persistable(true);
        let (shape, dtype, initial) = {
            let guard = value.read_data();
            (guard.shape.clone(), guard.dtype(), guard.buffer.clone())
        };
        Parameter::from_data(ParameterData {
            name,
            value: Some(value),
            shape,
            dtype,
            stop_gradient: false,
            grad: None,
            attr: ParamAttr::default(),
            initial_value: Some(initial),
        })
    }

    /// Allocates a parameter of `shape` and fills it with `init`.
    pub fn from_initializer(
        name: impl Into<String>,
        shape: &[usize],
        dtype: DType,
        init: &Initializer,
    ) -> Result<Self, GradStepError> {
        let numel: usize = shape.iter().product();
        let buffer = init.generate(numel, dtype)?;
        let value = Tensor::from_buffer(buffer, shape.to_vec())?;
        Ok(Parameter::new(name, value))
    }

    /// Declares a parameter whose storage is not allocated yet.
    ///
    /// Such parameters are skipped by the update pass until [`Parameter::materialize`]
    /// is called.
    pub fn uninitialized(name: impl Into<String>, shape: &[usize], dtype: DType) -> Self {
        Parameter::from_data(ParameterData {
            name: name.into(),
            value: None,
            shape: shape.to_vec(),
            dtype,
            stop_gradient: false,
            grad: None,
            attr: ParamAttr::default(),
            initial_value: None,
        })
    }

    fn from_data(data: ParameterData) -> Self {
        Parameter {
            id: ParamId(NEXT_PARAM_ID.fetch_add(1, Ordering::Relaxed)),
            data: Arc::new(RwLock::new(data)),
        }
    }

    pub fn with_attr(self, attr: ParamAttr) -> Self {
        self.write_data().attr = attr;
        self
    }

    pub fn with_stop_gradient(self, stop_gradient: bool) -> Self {
        self.set_stop_gradient(stop_gradient);
        self
    }

    /// Attaches storage to a parameter created with [`Parameter::uninitialized`].
    pub fn materialize(&self, value: Tensor) -> Result<(), GradStepError> {
        let mut guard = self.write_data();
        let shape = value.shape();
        if shape != guard.shape {
            return Err(GradStepError::ShapeMismatch {
                expected: guard.shape.clone(),
                actual: shape,
                operation: format!("materialize({})", guard.name),
            });
        }
        if value.dtype() != guard.dtype {
            return Err(GradStepError::DataTypeMismatch {
                expected: guard.dtype,
                actual: value.dtype(),
                operation: format!("materialize({})", guard.name),
            });
        }
        value.set_name(guard.name.clone());
        value.set_persistable(true);
        if guard.initial_value.is_none() {
            guard.initial_value = Some(value.buffer_snapshot());
        }
        guard.value = Some(value);
        Ok(())
    }

    fn read_data(&self) -> RwLockReadGuard<'_, ParameterData> {
        self.data.read().unwrap_or_else(|poisoned| {
            log::warn!("RwLock for parameter data was poisoned. Recovering read guard.");
            PoisonError::into_inner(poisoned)
        })
    }

    fn write_data(&self) -> RwLockWriteGuard<'_, ParameterData> {
        self.data.write().unwrap_or_else(|poisoned| {
            log::warn!("RwLock for parameter data was poisoned. Recovering write guard.");
            PoisonError::into_inner(poisoned)
        })
    }

    pub fn id(&self) -> ParamId {
        self.id
    }

    pub fn name(&self) -> String {
        self.read_data().name.clone()
    }

    pub fn shape(&self) -> Vec<usize> {
        self.read_data().shape.clone()
    }

    pub fn dtype(&self) -> DType {
        self.read_data().dtype
    }

    pub fn is_initialized(&self) -> bool {
        self.read_data().value.is_some()
    }

    /// Returns the handle to the parameter's storage.
    pub fn tensor(&self) -> Result<Tensor, GradStepError> {
        let guard = self.read_data();
        guard
            .value
            .clone()
            .ok_or_else(|| GradStepError::ParameterNotInitialized {
                name: guard.name.clone(),
            })
    }

    pub fn stop_gradient(&self) -> bool {
        self.read_data().stop_gradient
    }

    pub fn set_stop_gradient(&self, stop_gradient: bool) {
        self.write_data().stop_gradient = stop_gradient;
    }

    pub fn trainable(&self) -> bool {
        !self.stop_gradient()
    }

    pub fn attr(&self) -> ParamAttr {
        self.read_data().attr.clone()
    }

    pub fn grad(&self) -> Option<Tensor> {
        self.read_data().grad.clone()
    }

    pub fn set_grad(&self, grad: Option<Tensor>) {
        self.write_data().grad = grad;
    }

    /// Zeroes the gradient in place, or drops it when `set_to_zero` is false.
    pub fn clear_grad(&self, set_to_zero: bool) -> Result<(), GradStepError> {
        if set_to_zero {
            if let Some(grad) = self.grad() {
                grad.fill_(0.0)?;
            }
        } else {
            self.set_grad(None);
        }
        Ok(())
    }

    pub fn initial_value(&self) -> Option<Buffer> {
        self.read_data().initial_value.clone()
    }

    /// Zero gradient matching the parameter, handy for wiring tests and demos.
    pub fn zeros_grad(&self) -> Result<Tensor, GradStepError> {
        let (shape, dtype) = {
            let guard = self.read_data();
            (guard.shape.clone(), guard.dtype)
        };
        tensor::zeros(&shape, dtype)
    }
}

impl PartialEq for Parameter {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Parameter {}

impl Hash for Parameter {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

impl fmt::Debug for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let guard = self.read_data();
        f.debug_struct("Parameter")
            .field("name", &guard.name)
            .field("shape", &guard.shape)
            .field("dtype", &guard.dtype)
            .field("stop_gradient", &guard.stop_gradient)
            .field("initialized", &guard.value.is_some())
            .finish()
    }
}
