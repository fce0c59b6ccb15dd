use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::GradStepError;
use crate::nn::parameter::Parameter;
use crate::optim::accumulator::AccumulatorStore;
use crate::optim::config::OptimizerConfig;
use crate::optim::grad_clip::{GradientClip, NoClip};
use crate::optim::group_registry::{GroupDefaults, GroupRegistry, ResolvedGroup};
use crate::optim::lr_resolver::{LearningRate, LrResolver};
use crate::optim::lr_schedule::{read_schedule, write_schedule, SharedSchedule};
use crate::optim::master_weight::MasterWeightManager;
use crate::optim::multi_tensor::MultiTensorBatcher;
use crate::optim::param_group::{ParamGroup, ParameterInput, WeightDecay};
use crate::optim::regularizer::{RegularizationStage, Regularizer};
use crate::optim::state::{OptimizerState, StateEntry, LR_SCHEDULER_KEY, MASTER_WEIGHTS_KEY};
use crate::optim::update_rule::{UpdateContext, UpdateItem, UpdateRule};
use crate::optim::ParamGrad;
use crate::program::{ExecutionMode, OpSink, Operation};

/// Stages of one update pass, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PassStage {
    Idle,
    AccumulatorsReady,
    Regularized,
    Clipped,
    Applied,
    Finalized,
}

#[derive(Debug)]
struct PassContext {
    stage: PassStage,
    group: Option<usize>,
    /// Set when the caller reported non-finite gradients for this eager step.
    skip_update: bool,
}

impl PassContext {
    fn new(group: Option<usize>, skip_update: bool) -> Self {
        PassContext {
            stage: PassStage::Idle,
            group,
            skip_update,
        }
    }

    fn advance(&mut self, next: PassStage) {
        log::debug!("Update pass (group {:?}): {:?} -> {:?}", self.group, self.stage, next);
        self.stage = next;
    }
}

/// Drives update passes over a set of parameters with a pluggable [`UpdateRule`].
///
/// Built through [`OptimizerBuilder`](crate::optim::OptimizerBuilder). A pass
/// runs `Idle -> AccumulatorsReady -> Regularized -> Clipped -> Applied ->
/// Finalized`: missing accumulators are created, weight decay is folded into
/// the gradients, the clip policy runs, the rule emits its updates and its
/// finishing hook runs last.
///
/// In plan mode a failed pass leaves the program and the optimizer as they
/// were before it started. In eager mode operations already executed stay
/// applied.
pub struct Optimizer {
    rule: Box<dyn UpdateRule>,
    lr: LrResolver,
    registry: GroupRegistry,
    accumulators: AccumulatorStore,
    masters: MasterWeightManager,
    regularization: RegularizationStage,
    regularizer: Option<Regularizer>,
    grad_clip: Option<Arc<dyn GradientClip>>,
    batcher: MultiTensorBatcher,
    multi_precision: bool,
    use_multi_tensor: bool,
    sort_params: bool,
    found_inf: bool,
    last_stage: PassStage,
}

impl fmt::Debug for Optimizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Optimizer")
            .field("rule", &self.rule)
            .field("learning_rate", self.lr.source())
            .field("groups", &self.registry.len())
            .field("accumulators", &self.accumulators.len())
            .field("master_weights", &self.masters.len())
            .field("regularizer", &self.regularizer)
            .field("grad_clip", &self.grad_clip)
            .field("multi_precision", &self.multi_precision)
            .field("use_multi_tensor", &self.use_multi_tensor)
            .finish()
    }
}

impl Optimizer {
    pub(crate) fn from_config(
        rule: Box<dyn UpdateRule>,
        config: OptimizerConfig,
        require_parameters: bool,
    ) -> Result<Self, GradStepError> {
        config.validate(require_parameters)?;

        let regularizer = config.weight_decay.map(WeightDecay::to_regularizer);
        let mut registry = GroupRegistry::new();
        match config.parameters {
            Some(ParameterInput::Plain(params)) if !params.is_empty() => {
                registry.add_plain(params)?;
            }
            Some(ParameterInput::Grouped(groups)) => {
                let defaults = GroupDefaults { regularizer };
                for group in groups {
                    registry.add_group(group, &defaults)?;
                }
            }
            _ => {}
        }

        log::debug!(
            "Created {} optimizer with {} parameter group(s)",
            rule.name(),
            registry.len()
        );

        Ok(Optimizer {
            rule,
            lr: LrResolver::new(config.learning_rate)?,
            registry,
            accumulators: AccumulatorStore::new(config.name),
            masters: MasterWeightManager::new(),
            regularization: RegularizationStage::new(),
            regularizer,
            grad_clip: config.grad_clip,
            batcher: MultiTensorBatcher::new(),
            multi_precision: config.multi_precision,
            use_multi_tensor: config.use_multi_tensor,
            sort_params: config.sort_params,
            found_inf: false,
            last_stage: PassStage::Idle,
        })
    }

    /// Updates every group eagerly from the gradients stored on its parameters.
    ///
    /// Frozen parameters and parameters without a gradient are left alone; a
    /// group with nothing to update is skipped entirely.
    pub fn step(&mut self) -> Result<(), GradStepError> {
        for idx in 0..self.registry.len() {
            let pairs: Vec<ParamGrad> = match self.registry.group(idx) {
                Some(group) => group
                    .params
                    .iter()
                    .filter(|p| p.trainable())
                    .filter_map(|p| p.grad().map(|g| (p.clone(), Some(g))))
                    .collect(),
                None => continue,
            };
            if pairs.is_empty() {
                continue;
            }
            self.run_pass(ExecutionMode::Eager, pairs, Some(idx))?;
        }
        Ok(())
    }

    /// Runs one pass over explicit `(param, grad)` pairs and returns its
    /// per-step operations.
    ///
    /// In plan mode the pairs are processed in lexical order of parameter name
    /// unless sorting was disabled at construction.
    pub fn apply_gradients(
        &mut self,
        mode: ExecutionMode<'_>,
        mut pairs: Vec<ParamGrad>,
    ) -> Result<Vec<Operation>, GradStepError> {
        if mode.is_plan() && self.sort_params {
            pairs.sort_by_cached_key(|(param, _)| param.name());
        }
        self.run_pass(mode, pairs, None)
    }

    fn run_pass(
        &mut self,
        mode: ExecutionMode<'_>,
        pairs: Vec<ParamGrad>,
        group: Option<usize>,
    ) -> Result<Vec<Operation>, GradStepError> {
        let mut sink = mode.sink();
        let mut pass = PassContext::new(group, self.found_inf && !mode.is_plan());
        self.begin_pass();

        let result = self.drive_pass(&mut pass, pairs, sink.as_mut());
        self.last_stage = pass.stage;
        match result {
            Ok(()) => {
                self.commit_pass();
                Ok(sink.commit())
            }
            Err(e) if sink.is_plan() => {
                log::warn!("Update pass failed at stage {:?}, rolling back: {}", pass.stage, e);
                self.rollback_pass();
                sink.rollback();
                Err(e)
            }
            Err(e) => {
                log::warn!("Eager update pass failed at stage {:?}: {}", pass.stage, e);
                self.commit_pass();
                sink.rollback();
                Err(e)
            }
        }
    }

    fn drive_pass(
        &mut self,
        pass: &mut PassContext,
        pairs: Vec<ParamGrad>,
        sink: &mut dyn OpSink,
    ) -> Result<(), GradStepError> {
        let group: Option<ResolvedGroup> = pass.group.and_then(|idx| self.registry.group(idx)).cloned();
        match &group {
            Some(group) => self.rule.update_param_group(&group.extra),
            None => self.rule.update_param_group(&BTreeMap::new()),
        }
        let global_lr = self.lr.resolve(sink)?;

        // Frozen, unallocated and gradient-less pairs take no part in any stage.
        let (pairs, skipped): (Vec<ParamGrad>, Vec<ParamGrad>) = pairs
            .into_iter()
            .partition(|(param, grad)| grad.is_some() && param.trainable() && param.is_initialized());
        if !skipped.is_empty() {
            log::debug!("Skipping {} parameters without a usable gradient", skipped.len());
        }
        let eligible: Vec<Parameter> = pairs.iter().map(|(param, _)| param.clone()).collect();
        {
            let mut ctx = UpdateContext::new(&mut self.accumulators, &mut self.masters, &mut *sink, self.multi_precision);
            self.rule.create_accumulators(&mut ctx, &eligible)?;
        }
        pass.advance(PassStage::AccumulatorsReady);

        let pairs = self
            .regularization
            .apply(pairs, self.regularizer.as_ref(), &self.registry, &self.masters, &mut *sink)?;
        pass.advance(PassStage::Regularized);

        let clip: Arc<dyn GradientClip> = group
            .as_ref()
            .and_then(|g| g.grad_clip.clone())
            .or_else(|| self.grad_clip.clone())
            .unwrap_or_else(|| Arc::new(NoClip));
        let pairs = clip.clip(pairs, &mut *sink)?;
        pass.advance(PassStage::Clipped);

        let mut items = Vec::new();
        if pass.skip_update {
            log::info!("Non-finite gradients reported, skipping parameter updates for this step");
        } else {
            for (param, grad) in pairs {
                let Some(grad) = grad else { continue };
                let scale = self.registry.settings(&param).learning_rate;
                let lr = self.lr.per_parameter_rate(&global_lr, scale, &param.name(), &mut *sink)?;
                items.push(UpdateItem { param, grad, lr });
            }
        }

        let mut ctx = UpdateContext::new(&mut self.accumulators, &mut self.masters, &mut *sink, self.multi_precision);
        if self.use_multi_tensor && self.rule.supports_multi_tensor() && items.len() > 1 {
            let group_params = pass.group.zip(group.as_ref()).map(|(idx, g)| (idx, g.params.as_slice()));
            for (bucket, batch) in self.batcher.batches(group_params, items.clone()) {
                self.rule.append_multi_tensor_update(&mut ctx, bucket, &batch)?;
            }
        } else {
            for item in &items {
                self.rule.append_update(&mut ctx, item)?;
            }
        }
        pass.advance(PassStage::Applied);

        self.rule.finish_update(&mut ctx, &items)?;
        pass.advance(PassStage::Finalized);
        Ok(())
    }

    fn begin_pass(&mut self) {
        self.accumulators.begin_pass();
        self.masters.begin_pass();
        self.lr.begin_pass();
    }

    fn commit_pass(&mut self) {
        self.accumulators.commit_pass();
        self.masters.commit_pass();
        self.lr.commit_pass();
    }

    fn rollback_pass(&mut self) {
        self.accumulators.rollback_pass();
        self.masters.rollback_pass();
        self.lr.rollback_pass();
    }

    /// Stage reached by the most recent pass.
    pub fn last_pass_stage(&self) -> PassStage {
        self.last_stage
    }

    /// Clears the gradient of every trainable parameter, or zeroes it in place.
    pub fn clear_grad(&self, set_to_zero: bool) -> Result<(), GradStepError> {
        self.registry
            .all_params()
            .iter()
            .filter(|p| p.trainable())
            .try_for_each(|p| p.clear_grad(set_to_zero))
    }

    pub fn get_lr(&self) -> f64 {
        self.lr.current_value()
    }

    /// Replaces a constant learning rate. Fails while a schedule is active.
    pub fn set_lr(&mut self, value: f64) -> Result<(), GradStepError> {
        self.lr.set_value(value)
    }

    pub fn set_lr_scheduler(&mut self, schedule: SharedSchedule) -> Result<(), GradStepError> {
        self.lr.set_schedule(schedule)
    }

    /// Optimizer-level clip policy for groups without their own.
    pub fn set_gradient_clip(&mut self, clip: Option<Arc<dyn GradientClip>>) {
        self.grad_clip = clip;
    }

    /// Reports that the gradients of the coming eager step contain inf or NaN.
    ///
    /// While set, eager passes still create accumulators but emit no updates.
    pub fn set_found_inf(&mut self, found_inf: bool) {
        self.found_inf = found_inf;
    }

    pub fn found_inf(&self) -> bool {
        self.found_inf
    }

    /// Generated names of every accumulator, in creation order.
    pub fn opti_var_names(&self) -> &[String] {
        self.accumulators.opti_name_list()
    }

    pub fn add_param_group(&mut self, group: ParamGroup) -> Result<usize, GradStepError> {
        let defaults = GroupDefaults {
            regularizer: self.regularizer,
        };
        self.registry.add_group(group, &defaults)
    }

    pub fn param_groups(&self) -> &[ResolvedGroup] {
        self.registry.groups()
    }

    pub fn rule(&self) -> &dyn UpdateRule {
        self.rule.as_ref()
    }

    pub fn learning_rate(&self) -> &LrResolver {
        &self.lr
    }

    pub fn accumulators(&self) -> &AccumulatorStore {
        &self.accumulators
    }

    pub fn master_weights(&self) -> &MasterWeightManager {
        &self.masters
    }

    pub fn batcher(&self) -> &MultiTensorBatcher {
        &self.batcher
    }

    /// Exports accumulators, master weights and the schedule state.
    pub fn state_dict(&self) -> OptimizerState {
        let mut state = OptimizerState::new();
        for (name, payload) in self.accumulators.export() {
            state.insert(name, StateEntry::Tensor(payload));
        }
        if !self.masters.is_empty() {
            state.insert(MASTER_WEIGHTS_KEY, StateEntry::MasterWeights(self.masters.export()));
        }
        if let LearningRate::Schedule(schedule) = self.lr.source() {
            state.insert(
                LR_SCHEDULER_KEY,
                StateEntry::LrScheduler(read_schedule(schedule).state_dict()),
            );
        }
        state
    }

    /// Restores a mapping produced by [`state_dict`](Self::state_dict).
    ///
    /// Entries for accumulators that do not exist yet are kept and consumed
    /// when the accumulator is first created.
    pub fn set_state_dict(&mut self, state: &OptimizerState) -> Result<(), GradStepError> {
        if let LearningRate::Schedule(schedule) = self.lr.source().clone() {
            let schedule_state = state.lr_scheduler().ok_or_else(|| GradStepError::StateKeyMissing {
                key: LR_SCHEDULER_KEY.to_string(),
            })?;
            write_schedule(&schedule).set_state_dict(schedule_state)?;
            self.lr.sync()?;
        }
        if let Some(weights) = state.master_weights() {
            self.masters.restore(weights.clone())?;
        }
        self.accumulators.restore(state.accumulators()?)
    }
}
