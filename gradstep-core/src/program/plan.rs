use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::GradStepError;
use crate::optim::lr_schedule::{self, SharedSchedule};
use crate::program::operation::Operation;
use crate::tensor::Tensor;

static NEXT_PROGRAM_ID: AtomicUsize = AtomicUsize::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramId(usize);

#[derive(Default)]
struct ProgramData {
    startup: Vec<Operation>,
    main: Vec<Operation>,
    /// Learning-rate tensors refreshed from their schedule before each run.
    lr_bindings: Vec<(Tensor, SharedSchedule)>,
}

/// A reusable update plan.
///
/// The startup block holds one-time initialization (accumulator fills,
/// learning-rate materialization, master-weight derivation); the main block
/// holds the operations of one optimization step. Handles are cheap to clone.
#[derive(Clone)]
pub struct Program {
    id: ProgramId,
    data: Arc<RwLock<ProgramData>>,
}

impl Default for Program {
    fn default() -> Self {
        Self::new()
    }
}

impl Program {
    pub fn new() -> Self {
        Program {
            id: ProgramId(NEXT_PROGRAM_ID.fetch_add(1, Ordering::Relaxed)),
            data: Arc::new(RwLock::new(ProgramData::default())),
        }
    }

    pub fn id(&self) -> ProgramId {
        self.id
    }

    fn read_data(&self) -> RwLockReadGuard<'_, ProgramData> {
        self.data.read().unwrap_or_else(|poisoned| {
            log::warn!("RwLock for program {:?} was poisoned. Recovering read guard.", self.id);
            PoisonError::into_inner(poisoned)
        })
    }

    fn write_data(&self) -> RwLockWriteGuard<'_, ProgramData> {
        self.data.write().unwrap_or_else(|poisoned| {
            log::warn!("RwLock for program {:?} was poisoned. Recovering write guard.", self.id);
            PoisonError::into_inner(poisoned)
        })
    }

    pub fn append_startup(&self, op: Operation) {
        self.write_data().startup.push(op);
    }

    pub fn append_main(&self, ops: impl IntoIterator<Item = Operation>) {
        self.write_data().main.extend(ops);
    }

    pub fn startup_len(&self) -> usize {
        self.read_data().startup.len()
    }

    /// Drops startup operations appended after the first `len`.
    pub(crate) fn truncate_startup(&self, len: usize) {
        self.write_data().startup.truncate(len);
    }

    pub fn startup_ops(&self) -> Vec<Operation> {
        self.read_data().startup.clone()
    }

    pub fn main_ops(&self) -> Vec<Operation> {
        self.read_data().main.clone()
    }

    /// Ties `lr` to `schedule`; rebinding the same tensor replaces its schedule.
    pub fn bind_lr_schedule(&self, lr: &Tensor, schedule: &SharedSchedule) {
        let mut guard = self.write_data();
        match guard.lr_bindings.iter_mut().find(|(t, _)| t.ptr_eq(lr)) {
            Some(binding) => binding.1 = Arc::clone(schedule),
            None => guard.lr_bindings.push((lr.clone(), Arc::clone(schedule))),
        }
    }

    pub(crate) fn unbind_lr_schedule(&self, lr: &Tensor) {
        self.write_data().lr_bindings.retain(|(t, _)| !t.ptr_eq(lr));
    }

    pub fn lr_binding_count(&self) -> usize {
        self.read_data().lr_bindings.len()
    }

    pub fn run_startup(&self) -> Result<(), GradStepError> {
        let ops = self.startup_ops();
        log::debug!("Program {:?}: running {} startup ops", self.id, ops.len());
        ops.iter().try_for_each(Operation::execute)
    }

    /// Executes one step: refreshes bound learning rates, then the main block.
    pub fn run(&self) -> Result<(), GradStepError> {
        let (ops, bindings) = {
            let guard = self.read_data();
            (guard.main.clone(), guard.lr_bindings.clone())
        };
        for (lr, schedule) in &bindings {
            let value = lr_schedule::read_schedule(schedule).current_value();
            lr.fill_(value)?;
        }
        ops.iter().try_for_each(Operation::execute)
    }
}

impl std::fmt::Debug for Program {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let guard = self.read_data();
        f.debug_struct("Program")
            .field("id", &self.id)
            .field("startup_ops", &guard.startup.len())
            .field("main_ops", &guard.main.len())
            .finish()
    }
}
