use std::collections::{BTreeMap, HashMap};

use crate::error::GradStepError;
use crate::nn::parameter::Parameter;
use crate::optim::accumulator::UniqueNameGenerator;
use crate::optim::state::TensorPayload;
use crate::program::{OpKind, OpSink, Operation};
use crate::tensor::{self, Tensor, TensorId};
use crate::types::DType;

/// Dtype of master weights and master gradients.
pub const MASTER_DTYPE: DType = DType::F32;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum MasterGradKey {
    /// Plan mode: the gradient tensor recorded in the plan.
    Id(TensorId),
    /// Eager mode: the gradient's name.
    Name(String),
}

/// Full-precision shadows of reduced-precision parameters and gradients.
#[derive(Debug, Default)]
pub struct MasterWeightManager {
    weights: BTreeMap<String, Tensor>,
    names: UniqueNameGenerator,
    /// Step-scoped; cleared at the start of every pass.
    grads: HashMap<MasterGradKey, Tensor>,
    pending: BTreeMap<String, TensorPayload>,
    /// Masters created this pass and the restored value each consumed.
    journal: Option<Vec<(String, Option<TensorPayload>)>>,
}

impl MasterWeightManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the master weight of `param`, deriving it from the parameter's
    /// initial value the first time.
    pub fn get_or_create_master_weight(
        &mut self,
        param: &Parameter,
        sink: &mut dyn OpSink,
    ) -> Result<Tensor, GradStepError> {
        let param_name = param.name();
        if let Some(master) = self.weights.get(&param_name) {
            return Ok(master.clone());
        }

        let restored = self.pending.remove(&param_name);
        let payload = match &restored {
            Some(payload) => {
                payload.check_shape(&param.shape(), &param_name)?;
                payload.buffer.cast(MASTER_DTYPE)?
            }
            None => param
                .initial_value()
                .ok_or_else(|| GradStepError::ParameterNotInitialized {
                    name: param_name.clone(),
                })?
                .cast(MASTER_DTYPE)?,
        };
        let base = format!("{}_fp32_master", param_name);
        let var_name = self.names.generate(&base);
        let master = Tensor::from_buffer(payload.clone(), param.shape())?.with_name(var_name.clone());
        master.set_persistable(true);

        let op_type = if restored.is_some() { "assign" } else { "cast" };
        let init = Operation::new(
            op_type,
            OpKind::Assign {
                out: master.clone(),
                payload,
            },
        )
        .with_target(var_name.clone());
        if let Err(e) = sink.emit_init(init) {
            self.names.rewind(&base);
            if let Some(payload) = restored {
                self.pending.insert(param_name, payload);
            }
            return Err(e);
        }

        log::debug!("Created master weight '{}' for parameter '{}'", var_name, param_name);
        self.weights.insert(param_name.clone(), master.clone());
        if let Some(journal) = self.journal.as_mut() {
            journal.push((param_name, restored));
        }
        Ok(master)
    }

    pub fn master_weight(&self, param_name: &str) -> Option<Tensor> {
        self.weights.get(param_name).cloned()
    }

    /// Full-precision copy of `grad` for the current pass.
    ///
    /// Plan mode keys the copy by gradient identity and records the cast in
    /// the main block; eager mode keys it by gradient name and casts now.
    pub fn get_or_create_master_grad(
        &mut self,
        param: &Parameter,
        grad: &Tensor,
        sink: &mut dyn OpSink,
    ) -> Result<Tensor, GradStepError> {
        let grad_name = grad
            .name()
            .unwrap_or_else(|| format!("{}@GRAD", param.name()));
        let key = if sink.is_plan() {
            MasterGradKey::Id(grad.id())
        } else {
            MasterGradKey::Name(grad_name.clone())
        };
        if let Some(master_grad) = self.grads.get(&key) {
            return Ok(master_grad.clone());
        }

        let master_grad = tensor::zeros(&grad.shape(), MASTER_DTYPE)?
            .with_name(format!("{}_fp32_master", grad_name));
        sink.emit(
            Operation::new(
                "cast",
                OpKind::Cast {
                    input: grad.clone(),
                    out: master_grad.clone(),
                },
            )
            .with_target(param.name()),
        )?;
        self.grads.insert(key, master_grad.clone());
        Ok(master_grad)
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    pub(crate) fn begin_pass(&mut self) {
        self.grads.clear();
        self.journal = Some(Vec::new());
    }

    pub(crate) fn commit_pass(&mut self) {
        self.journal = None;
    }

    pub(crate) fn rollback_pass(&mut self) {
        let Some(journal) = self.journal.take() else {
            return;
        };
        for (param_name, restored) in journal {
            if self.weights.remove(&param_name).is_some() {
                self.names.rewind(&format!("{}_fp32_master", param_name));
                log::debug!("Rolled back master weight of parameter '{}'", param_name);
            }
            if let Some(payload) = restored {
                self.pending.insert(param_name, payload);
            }
        }
        self.grads.clear();
    }

    /// Master weights keyed by parameter name.
    pub fn export(&self) -> BTreeMap<String, TensorPayload> {
        self.weights
            .iter()
            .map(|(name, master)| (name.clone(), TensorPayload::from_tensor(master)))
            .collect()
    }

    /// Overwrites existing master weights and keeps the rest for creation time.
    pub fn restore(&mut self, mut state: BTreeMap<String, TensorPayload>) -> Result<(), GradStepError> {
        let mut staged = Vec::with_capacity(self.weights.len());
        for (name, master) in &self.weights {
            if let Some(payload) = state.remove(name) {
                payload.check_shape(&master.shape(), name)?;
                staged.push((master, payload.buffer.cast(master.dtype())?));
            }
        }
        for (master, buffer) in staged {
            master.assign_(&buffer)?;
        }
        self.pending = state;
        Ok(())
    }
}
