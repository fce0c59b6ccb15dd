use std::collections::BTreeMap;
use std::fmt;

use crate::error::GradStepError;
use crate::nn::parameter::Parameter;
use crate::optim::accumulator::{AccumulatorSpec, AccumulatorStore};
use crate::optim::master_weight::{MasterWeightManager, MASTER_DTYPE};
use crate::optim::multi_tensor::PrecisionBucket;
use crate::program::{OpSink, Operation};
use crate::tensor::Tensor;
use crate::types::DType;

/// One parameter ready to be updated this pass.
#[derive(Debug, Clone)]
pub struct UpdateItem {
    pub param: Parameter,
    pub grad: Tensor,
    /// Learning rate of this parameter, already scaled.
    pub lr: Tensor,
}

/// What an update rule sees while building its operations.
pub struct UpdateContext<'a> {
    pub(crate) accumulators: &'a mut AccumulatorStore,
    pub(crate) masters: &'a mut MasterWeightManager,
    pub(crate) sink: &'a mut dyn OpSink,
    pub(crate) multi_precision: bool,
}

impl<'a> UpdateContext<'a> {
    pub fn new(
        accumulators: &'a mut AccumulatorStore,
        masters: &'a mut MasterWeightManager,
        sink: &'a mut dyn OpSink,
        multi_precision: bool,
    ) -> Self {
        UpdateContext {
            accumulators,
            masters,
            sink,
            multi_precision,
        }
    }

    pub fn is_plan(&self) -> bool {
        self.sink.is_plan()
    }

    /// True when `param` is updated through a full-precision master weight.
    pub fn uses_master(&self, param: &Parameter) -> bool {
        self.multi_precision && param.dtype().is_reduced_precision()
    }

    /// Dtype of per-element accumulators for `param`.
    pub fn accumulator_dtype(&self, param: &Parameter) -> DType {
        if self.uses_master(param) {
            MASTER_DTYPE
        } else {
            param.dtype()
        }
    }

    pub fn add_accumulator(
        &mut self,
        name: &str,
        param: &Parameter,
        spec: AccumulatorSpec,
    ) -> Result<Tensor, GradStepError> {
        self.accumulators.get_or_create(name, param, spec, &mut *self.sink)
    }

    pub fn accumulator(&self, name: &str, param: &Parameter) -> Result<Tensor, GradStepError> {
        self.accumulators.fetch(name, param)
    }

    pub fn master_weight(&mut self, param: &Parameter) -> Result<Tensor, GradStepError> {
        self.masters.get_or_create_master_weight(param, &mut *self.sink)
    }

    /// Gradient to feed the kernel: a full-precision copy when the parameter
    /// is updated through its master weight and the gradient is narrow.
    pub fn update_grad(&mut self, param: &Parameter, grad: &Tensor) -> Result<Tensor, GradStepError> {
        if self.uses_master(param) && grad.dtype().is_reduced_precision() {
            self.masters.get_or_create_master_grad(param, grad, &mut *self.sink)
        } else {
            Ok(grad.clone())
        }
    }

    /// Master weight of `param` when it is updated through one.
    pub fn update_master(&mut self, param: &Parameter) -> Result<Option<Tensor>, GradStepError> {
        if self.uses_master(param) {
            self.master_weight(param).map(Some)
        } else {
            Ok(None)
        }
    }

    pub fn emit(&mut self, op: Operation) -> Result<(), GradStepError> {
        self.sink.emit(op)
    }
}

/// A pluggable update strategy.
///
/// The orchestrator asks the rule which accumulators it needs, then which
/// operations update each parameter.
pub trait UpdateRule: fmt::Debug + Send + Sync {
    fn name(&self) -> &'static str;

    /// Ensures the rule's accumulators exist for every parameter in `params`.
    fn create_accumulators(
        &self,
        ctx: &mut UpdateContext<'_>,
        params: &[Parameter],
    ) -> Result<(), GradStepError>;

    fn append_update(&self, ctx: &mut UpdateContext<'_>, item: &UpdateItem) -> Result<(), GradStepError>;

    /// Runs once after every parameter of the pass has been updated.
    fn finish_update(&self, _ctx: &mut UpdateContext<'_>, _items: &[UpdateItem]) -> Result<(), GradStepError> {
        Ok(())
    }

    /// Applies a group's rule-specific settings before its pass.
    fn update_param_group(&mut self, _extra: &BTreeMap<String, f64>) {}

    fn supports_multi_tensor(&self) -> bool {
        false
    }

    /// Updates a whole precision bucket at once.
    fn append_multi_tensor_update(
        &self,
        ctx: &mut UpdateContext<'_>,
        _bucket: PrecisionBucket,
        items: &[UpdateItem],
    ) -> Result<(), GradStepError> {
        items.iter().try_for_each(|item| self.append_update(ctx, item))
    }
}
