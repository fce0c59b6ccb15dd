use std::collections::{BTreeMap, HashMap};

use crate::buffer::Buffer;
use crate::error::GradStepError;
use crate::nn::parameter::{ParamId, Parameter};
use crate::optim::state::TensorPayload;
use crate::program::{OpKind, OpSink, Operation};
use crate::tensor::{self, Tensor};
use crate::types::DType;

/// Hands out `{base}_{n}` names, counting per base.
#[derive(Debug, Default)]
pub(crate) struct UniqueNameGenerator {
    counters: HashMap<String, usize>,
}

impl UniqueNameGenerator {
    pub(crate) fn generate(&mut self, base: &str) -> String {
        let counter = self.counters.entry(base.to_string()).or_insert(0);
        let name = format!("{}_{}", base, counter);
        *counter += 1;
        name
    }

    /// Gives back the last name handed out for `base`.
    pub(crate) fn rewind(&mut self, base: &str) {
        if let Some(counter) = self.counters.get_mut(base) {
            *counter = counter.saturating_sub(1);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AccumulatorKey {
    pub name: String,
    pub param: ParamId,
}

/// How a new accumulator is allocated. Unset fields follow the parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct AccumulatorSpec {
    pub dtype: Option<DType>,
    pub fill_value: f64,
    pub shape: Option<Vec<usize>>,
}

impl Default for AccumulatorSpec {
    fn default() -> Self {
        AccumulatorSpec {
            dtype: None,
            fill_value: 0.0,
            shape: None,
        }
    }
}

impl AccumulatorSpec {
    pub fn with_dtype(mut self, dtype: DType) -> Self {
        self.dtype = Some(dtype);
        self
    }

    pub fn with_fill_value(mut self, fill_value: f64) -> Self {
        self.fill_value = fill_value;
        self
    }

    pub fn with_shape(mut self, shape: Vec<usize>) -> Self {
        self.shape = Some(shape);
        self
    }
}

#[derive(Debug, Clone)]
struct AccumulatorEntry {
    tensor: Tensor,
    var_name: String,
    param_name: String,
}

#[derive(Debug)]
struct CreatedInPass {
    key: AccumulatorKey,
    base: String,
    consumed: Option<(String, Buffer)>,
}

/// Per-parameter optimizer state, keyed by `(accumulator name, parameter)`.
#[derive(Debug, Default)]
pub struct AccumulatorStore {
    prefix: Option<String>,
    entries: HashMap<AccumulatorKey, AccumulatorEntry>,
    names: UniqueNameGenerator,
    /// Generated names of every accumulator, in creation order.
    opti_name_list: Vec<String>,
    /// Restored values waiting for their accumulator to be created.
    pending: BTreeMap<String, Buffer>,
    journal: Option<Vec<CreatedInPass>>,
}

impl AccumulatorStore {
    pub fn new(prefix: Option<String>) -> Self {
        AccumulatorStore {
            prefix,
            ..Default::default()
        }
    }

    fn qualified_name(&self, name: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{}_{}", prefix, name),
            None => name.to_string(),
        }
    }

    /// Returns the accumulator for `(name, param)`, creating it on first use.
    ///
    /// In plan mode an existing key is an error: the plan would initialize the
    /// same state twice.
    pub fn get_or_create(
        &mut self,
        name: &str,
        param: &Parameter,
        spec: AccumulatorSpec,
        sink: &mut dyn OpSink,
    ) -> Result<Tensor, GradStepError> {
        let name = self.qualified_name(name);
        let key = AccumulatorKey {
            name: name.clone(),
            param: param.id(),
        };
        if let Some(entry) = self.entries.get(&key) {
            if sink.is_plan() {
                return Err(GradStepError::DuplicateAccumulator {
                    accumulator: name,
                    param: param.name(),
                });
            }
            return Ok(entry.tensor.clone());
        }

        let param_name = param.name();
        let base = format!("{}_{}", param_name, name);
        let var_name = self.names.generate(&base);
        let dtype = spec.dtype.unwrap_or_else(|| param.dtype());
        let shape = spec.shape.unwrap_or_else(|| param.shape());
        let tensor = tensor::full(&shape, dtype, spec.fill_value)?.with_name(var_name.clone());
        tensor.set_persistable(true);

        let consumed = if self.pending.is_empty() {
            None
        } else {
            let payload = self
                .pending
                .remove(&var_name)
                .ok_or_else(|| GradStepError::AccumulatorMissing {
                    key: var_name.clone(),
                })?;
            Some((var_name.clone(), payload))
        };

        let init = match &consumed {
            Some((_, payload)) => Operation::new(
                "assign",
                OpKind::Assign {
                    out: tensor.clone(),
                    payload: payload.clone(),
                },
            ),
            None => Operation::new(
                "fill_constant",
                OpKind::Fill {
                    out: tensor.clone(),
                    value: spec.fill_value,
                },
            ),
        }
        .with_target(var_name.clone());
        if let Err(e) = sink.emit_init(init) {
            self.names.rewind(&base);
            if let Some((var, payload)) = consumed {
                self.pending.insert(var, payload);
            }
            return Err(e);
        }

        log::debug!(
            "Created accumulator '{}' for parameter '{}' (dtype {}, shape {:?}, restored: {})",
            var_name,
            param_name,
            dtype,
            shape,
            consumed.is_some()
        );
        self.opti_name_list.push(var_name.clone());
        self.entries.insert(
            key.clone(),
            AccumulatorEntry {
                tensor: tensor.clone(),
                var_name,
                param_name,
            },
        );
        if let Some(journal) = self.journal.as_mut() {
            journal.push(CreatedInPass { key, base, consumed });
        }
        Ok(tensor)
    }

    /// Looks up an accumulator that must already exist.
    pub fn fetch(&self, name: &str, param: &Parameter) -> Result<Tensor, GradStepError> {
        let name = self.qualified_name(name);
        let key = AccumulatorKey {
            name: name.clone(),
            param: param.id(),
        };
        self.entries
            .get(&key)
            .map(|entry| entry.tensor.clone())
            .ok_or_else(|| GradStepError::AccumulatorNotFound {
                accumulator: name,
                param: param.name(),
            })
    }

    pub fn contains(&self, name: &str, param: &Parameter) -> bool {
        let key = AccumulatorKey {
            name: self.qualified_name(name),
            param: param.id(),
        };
        self.entries.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn opti_name_list(&self) -> &[String] {
        &self.opti_name_list
    }

    /// Starts recording creations so they can be undone by [`rollback_pass`](Self::rollback_pass).
    pub(crate) fn begin_pass(&mut self) {
        self.journal = Some(Vec::new());
    }

    pub(crate) fn commit_pass(&mut self) {
        self.journal = None;
    }

    /// Forgets every accumulator created since `begin_pass` and puts back
    /// the restored values they consumed.
    pub(crate) fn rollback_pass(&mut self) {
        let Some(journal) = self.journal.take() else {
            return;
        };
        for created in journal.into_iter().rev() {
            if let Some(entry) = self.entries.remove(&created.key) {
                self.opti_name_list.retain(|n| n != &entry.var_name);
                log::debug!(
                    "Rolled back accumulator '{}' of parameter '{}'",
                    entry.var_name,
                    entry.param_name
                );
            }
            self.names.rewind(&created.base);
            if let Some((var_name, payload)) = created.consumed {
                self.pending.insert(var_name, payload);
            }
        }
    }

    /// Snapshot of every accumulator, keyed by its generated name.
    pub fn export(&self) -> BTreeMap<String, TensorPayload> {
        self.entries
            .values()
            .map(|entry| (entry.var_name.clone(), TensorPayload::from_tensor(&entry.tensor)))
            .collect()
    }

    /// Loads checkpointed values.
    ///
    /// Existing accumulators are overwritten in place and must all be present
    /// in `state`. The remaining entries are held back and consumed when the
    /// matching accumulator is created.
    pub fn restore(&mut self, mut state: BTreeMap<String, TensorPayload>) -> Result<(), GradStepError> {
        for entry in self.entries.values() {
            if !state.contains_key(&entry.var_name) {
                return Err(GradStepError::AccumulatorMissing {
                    key: entry.var_name.clone(),
                });
            }
        }
        // Nothing is overwritten unless every live accumulator's value fits.
        let mut staged = Vec::with_capacity(self.entries.len());
        for entry in self.entries.values() {
            if let Some(payload) = state.remove(&entry.var_name) {
                payload.check_shape(&entry.tensor.shape(), &entry.var_name)?;
                staged.push((&entry.tensor, payload.buffer.cast(entry.tensor.dtype())?));
            }
        }
        for (tensor, buffer) in staged {
            tensor.assign_(&buffer)?;
        }
        self.pending = state
            .into_iter()
            .map(|(name, payload)| (name, payload.buffer))
            .collect();
        if !self.pending.is_empty() {
            log::debug!(
                "{} accumulator values held until their accumulators are created",
                self.pending.len()
            );
        }
        Ok(())
    }

    /// Restored values no accumulator has claimed yet.
    pub fn pending_names(&self) -> Vec<String> {
        self.pending.keys().cloned().collect()
    }
}
