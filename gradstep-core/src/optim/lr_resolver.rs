use std::collections::BTreeMap;

use crate::error::GradStepError;
use crate::optim::lr_schedule::{read_schedule, SharedSchedule};
use crate::program::{ContextKey, OpKind, OpSink, Operation, Program};
use crate::tensor::{self, Tensor};
use crate::types::DType;

/// Name scope of the per-parameter learning-rate scaling ops.
pub const PARAM_LR_SCOPE: &str = "scale_with_param_lr";

/// Where the global learning rate comes from.
#[derive(Debug, Clone)]
pub enum LearningRate {
    Constant(f64),
    Schedule(SharedSchedule),
}

impl From<f64> for LearningRate {
    fn from(value: f64) -> Self {
        LearningRate::Constant(value)
    }
}

impl From<SharedSchedule> for LearningRate {
    fn from(schedule: SharedSchedule) -> Self {
        LearningRate::Schedule(schedule)
    }
}

impl LearningRate {
    pub fn current_value(&self) -> f64 {
        match self {
            LearningRate::Constant(value) => *value,
            LearningRate::Schedule(schedule) => read_schedule(schedule).current_value(),
        }
    }

    pub(crate) fn validate(&self) -> Result<(), GradStepError> {
        if let LearningRate::Constant(value) = self {
            if !value.is_finite() || *value < 0.0 {
                return Err(GradStepError::ConfigurationError(format!(
                    "learning rate must be a finite non-negative float, got {}",
                    value
                )));
            }
        }
        Ok(())
    }
}

/// Materializes the global learning rate, once per execution context.
#[derive(Debug)]
pub struct LrResolver {
    source: LearningRate,
    dtype: DType,
    materialized: BTreeMap<ContextKey, Tensor>,
    /// Programs holding a materialized tensor, rebound when a schedule is set.
    programs: BTreeMap<ContextKey, Program>,
    created_in_pass: Vec<ContextKey>,
}

impl LrResolver {
    pub fn new(source: LearningRate) -> Result<Self, GradStepError> {
        source.validate()?;
        Ok(LrResolver {
            source,
            dtype: DType::F32,
            materialized: BTreeMap::new(),
            programs: BTreeMap::new(),
            created_in_pass: Vec::new(),
        })
    }

    pub fn source(&self) -> &LearningRate {
        &self.source
    }

    pub fn current_value(&self) -> f64 {
        self.source.current_value()
    }

    pub fn is_scheduled(&self) -> bool {
        matches!(self.source, LearningRate::Schedule(_))
    }

    /// The learning-rate tensor already materialized for `context`, if any.
    pub fn lookup(&self, context: ContextKey) -> Option<Tensor> {
        self.materialized.get(&context).cloned()
    }

    /// Returns the persistent learning-rate tensor of the sink's context.
    ///
    /// The tensor is created on first use. Under a schedule its value is
    /// rewritten in place (eager) or refreshed by the program before each run.
    pub fn resolve(&mut self, sink: &mut dyn OpSink) -> Result<Tensor, GradStepError> {
        let context = sink.context();
        let value = self.current_value();
        let lr = match self.materialized.get(&context) {
            Some(lr) => lr.clone(),
            None => {
                let lr = tensor::scalar(value, self.dtype)?.with_name("learning_rate");
                lr.set_persistable(true);
                sink.emit_init(
                    Operation::new(
                        "fill_constant",
                        OpKind::Fill {
                            out: lr.clone(),
                            value,
                        },
                    )
                    .with_target("learning_rate"),
                )?;
                log::debug!("Materialized learning rate {} for {:?}", value, context);
                self.materialized.insert(context, lr.clone());
                if let Some(program) = sink.program() {
                    self.programs.insert(context, program);
                }
                self.created_in_pass.push(context);
                lr
            }
        };
        if let LearningRate::Schedule(schedule) = &self.source {
            sink.bind_lr_schedule(&lr, schedule);
        }
        Ok(lr)
    }

    /// Sets a constant learning rate and rewrites every materialized tensor.
    ///
    /// Fails while a schedule drives the learning rate.
    pub fn set_value(&mut self, value: f64) -> Result<(), GradStepError> {
        if self.is_scheduled() {
            return Err(GradStepError::LrScheduleConflict);
        }
        let source = LearningRate::Constant(value);
        source.validate()?;
        self.source = source;
        self.sync()
    }

    /// Switches to `schedule` and binds it to every program that already
    /// holds a learning-rate tensor.
    pub fn set_schedule(&mut self, schedule: SharedSchedule) -> Result<(), GradStepError> {
        for (context, program) in &self.programs {
            if let Some(lr) = self.materialized.get(context) {
                program.bind_lr_schedule(lr, &schedule);
            }
        }
        self.source = LearningRate::Schedule(schedule);
        self.sync()
    }

    /// Writes the current value into every materialized tensor.
    pub fn sync(&self) -> Result<(), GradStepError> {
        let value = self.current_value();
        self.materialized.values().try_for_each(|lr| lr.fill_(value))
    }

    /// Learning rate of a parameter whose scale is `scale`.
    ///
    /// A scale of exactly 1.0 shares the global tensor; anything else emits a
    /// scaling op under [`PARAM_LR_SCOPE`].
    pub fn per_parameter_rate(
        &self,
        global: &Tensor,
        scale: f64,
        target: &str,
        sink: &mut dyn OpSink,
    ) -> Result<Tensor, GradStepError> {
        if scale == 1.0 {
            return Ok(global.clone());
        }
        let scaled = tensor::zeros_like(global)?;
        sink.emit(
            Operation::new(
                "scale",
                OpKind::Scale {
                    input: global.clone(),
                    out: scaled.clone(),
                    factor: scale,
                },
            )
            .with_target(target)
            .with_scope(PARAM_LR_SCOPE),
        )?;
        Ok(scaled)
    }

    pub(crate) fn begin_pass(&mut self) {
        self.created_in_pass.clear();
    }

    pub(crate) fn commit_pass(&mut self) {
        self.created_in_pass.clear();
    }

    pub(crate) fn rollback_pass(&mut self) {
        for context in self.created_in_pass.drain(..) {
            let lr = self.materialized.remove(&context);
            if let (Some(program), Some(lr)) = (self.programs.remove(&context), lr) {
                program.unbind_lr_schedule(&lr);
            }
        }
    }
}
