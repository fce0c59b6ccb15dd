use std::collections::BTreeMap;

use crate::buffer::Buffer;
use crate::error::GradStepError;
use crate::optim::lr_schedule::ScheduleState;
use crate::tensor::Tensor;

/// Reserved key holding the learning-rate schedule's own state.
pub const LR_SCHEDULER_KEY: &str = "LR_Scheduler";
/// Reserved key holding the master weights, keyed by parameter name.
pub const MASTER_WEIGHTS_KEY: &str = "master_weights";

/// Raw contents of a checkpointed tensor.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorPayload {
    pub shape: Vec<usize>,
    pub buffer: Buffer,
}

impl TensorPayload {
    pub fn from_tensor(tensor: &Tensor) -> Self {
        let guard = tensor.read_data();
        TensorPayload {
            shape: guard.shape.clone(),
            buffer: guard.buffer.clone(),
        }
    }

    pub fn to_tensor(&self) -> Result<Tensor, GradStepError> {
        Tensor::from_buffer(self.buffer.clone(), self.shape.clone())
    }

    pub(crate) fn check_shape(&self, expected: &[usize], key: &str) -> Result<(), GradStepError> {
        if self.shape != expected {
            return Err(GradStepError::ShapeMismatch {
                expected: expected.to_vec(),
                actual: self.shape.clone(),
                operation: format!("restore '{}'", key),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StateEntry {
    Tensor(TensorPayload),
    LrScheduler(ScheduleState),
    MasterWeights(BTreeMap<String, TensorPayload>),
}

/// Flat checkpoint mapping of an optimizer.
///
/// Accumulators are stored under their generated names next to the two
/// reserved entries [`LR_SCHEDULER_KEY`] and [`MASTER_WEIGHTS_KEY`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OptimizerState {
    entries: BTreeMap<String, StateEntry>,
}

impl OptimizerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, entry: StateEntry) -> Option<StateEntry> {
        self.entries.insert(key.into(), entry)
    }

    pub fn get(&self, key: &str) -> Option<&StateEntry> {
        self.entries.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<StateEntry> {
        self.entries.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn lr_scheduler(&self) -> Option<&ScheduleState> {
        match self.entries.get(LR_SCHEDULER_KEY) {
            Some(StateEntry::LrScheduler(state)) => Some(state),
            _ => None,
        }
    }

    pub fn master_weights(&self) -> Option<&BTreeMap<String, TensorPayload>> {
        match self.entries.get(MASTER_WEIGHTS_KEY) {
            Some(StateEntry::MasterWeights(weights)) => Some(weights),
            _ => None,
        }
    }

    /// Accumulator payloads with the reserved keys stripped.
    pub fn accumulators(&self) -> Result<BTreeMap<String, TensorPayload>, GradStepError> {
        let mut out = BTreeMap::new();
        for (key, entry) in &self.entries {
            if key == LR_SCHEDULER_KEY || key == MASTER_WEIGHTS_KEY {
                continue;
            }
            match entry {
                StateEntry::Tensor(payload) => {
                    out.insert(key.clone(), payload.clone());
                }
                _ => {
                    return Err(GradStepError::ConfigurationError(format!(
                        "State entry '{}' is not a tensor",
                        key
                    )))
                }
            }
        }
        Ok(out)
    }
}
