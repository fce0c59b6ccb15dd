use crate::error::GradStepError;
use crate::optim::lr_schedule::{read_schedule, SharedSchedule};
use crate::program::operation::Operation;
use crate::program::plan::{Program, ProgramId};
use crate::tensor::Tensor;

/// Where the operations of an update pass go.
#[derive(Debug, Clone, Copy)]
pub enum ExecutionMode<'a> {
    /// Every operation runs as soon as it is issued.
    Eager,
    /// Operations are recorded into the program and run later.
    Plan(&'a Program),
}

impl<'a> ExecutionMode<'a> {
    pub fn is_plan(&self) -> bool {
        matches!(self, ExecutionMode::Plan(_))
    }

    pub fn context_key(&self) -> ContextKey {
        match self {
            ExecutionMode::Eager => ContextKey::Eager,
            ExecutionMode::Plan(program) => ContextKey::Program(program.id()),
        }
    }

    /// Builds the sink strategy for one pass.
    pub fn sink(&self) -> Box<dyn OpSink + 'a> {
        match *self {
            ExecutionMode::Eager => Box::new(EagerSink::new()),
            ExecutionMode::Plan(program) => Box::new(PlanSink::new(program)),
        }
    }
}

/// Identity of an execution context; learning-rate tensors are cached per key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ContextKey {
    Eager,
    Program(ProgramId),
}

/// Receives the operations of one update pass.
pub trait OpSink {
    fn context(&self) -> ContextKey;

    fn is_plan(&self) -> bool;

    /// The program being recorded into, if any.
    fn program(&self) -> Option<Program>;

    /// Issues a per-step operation.
    fn emit(&mut self, op: Operation) -> Result<(), GradStepError>;

    /// Issues a one-time initialization operation.
    fn emit_init(&mut self, op: Operation) -> Result<(), GradStepError>;

    /// Keeps `lr` in sync with `schedule` for as long as the context lives.
    fn bind_lr_schedule(&mut self, lr: &Tensor, schedule: &SharedSchedule);

    /// Makes the pass permanent and returns its per-step operations.
    fn commit(&mut self) -> Vec<Operation>;

    /// Discards whatever the pass staged.
    fn rollback(&mut self);
}

/// Executes operations immediately. Nothing can be undone on rollback.
#[derive(Debug, Default)]
pub struct EagerSink {
    executed: Vec<Operation>,
}

impl EagerSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OpSink for EagerSink {
    fn context(&self) -> ContextKey {
        ContextKey::Eager
    }

    fn is_plan(&self) -> bool {
        false
    }

    fn program(&self) -> Option<Program> {
        None
    }

    fn emit(&mut self, op: Operation) -> Result<(), GradStepError> {
        op.execute()?;
        self.executed.push(op);
        Ok(())
    }

    fn emit_init(&mut self, op: Operation) -> Result<(), GradStepError> {
        op.execute()
    }

    fn bind_lr_schedule(&mut self, lr: &Tensor, schedule: &SharedSchedule) {
        let value = read_schedule(schedule).current_value();
        if let Err(e) = lr.fill_(value) {
            log::warn!("Failed to refresh learning rate tensor: {}", e);
        }
    }

    fn commit(&mut self) -> Vec<Operation> {
        std::mem::take(&mut self.executed)
    }

    fn rollback(&mut self) {
        self.executed.clear();
    }
}

/// Records into a program. Main-block operations are staged until commit;
/// startup operations are appended right away and truncated on rollback.
#[derive(Debug)]
pub struct PlanSink<'a> {
    program: &'a Program,
    startup_mark: usize,
    staged: Vec<Operation>,
}

impl<'a> PlanSink<'a> {
    pub fn new(program: &'a Program) -> Self {
        PlanSink {
            program,
            startup_mark: program.startup_len(),
            staged: Vec::new(),
        }
    }
}

impl OpSink for PlanSink<'_> {
    fn context(&self) -> ContextKey {
        ContextKey::Program(self.program.id())
    }

    fn is_plan(&self) -> bool {
        true
    }

    fn program(&self) -> Option<Program> {
        Some(self.program.clone())
    }

    fn emit(&mut self, op: Operation) -> Result<(), GradStepError> {
        self.staged.push(op);
        Ok(())
    }

    fn emit_init(&mut self, op: Operation) -> Result<(), GradStepError> {
        self.program.append_startup(op);
        Ok(())
    }

    fn bind_lr_schedule(&mut self, lr: &Tensor, schedule: &SharedSchedule) {
        self.program.bind_lr_schedule(lr, schedule);
    }

    fn commit(&mut self) -> Vec<Operation> {
        let ops = std::mem::take(&mut self.staged);
        self.program.append_main(ops.clone());
        self.startup_mark = self.program.startup_len();
        ops
    }

    fn rollback(&mut self) {
        self.staged.clear();
        self.program.truncate_startup(self.startup_mark);
    }
}
