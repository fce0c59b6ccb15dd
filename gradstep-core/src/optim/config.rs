use std::fmt;
use std::sync::Arc;

use crate::error::GradStepError;
use crate::optim::grad_clip::GradientClip;
use crate::optim::lr_resolver::LearningRate;
use crate::optim::optimizer::Optimizer;
use crate::optim::param_group::{ParameterInput, WeightDecay};
use crate::optim::update_rule::UpdateRule;

/// Construction settings of an [`Optimizer`].
///
/// | field              | default          |
/// |--------------------|------------------|
/// | `learning_rate`    | `Constant(0.001)`|
/// | `parameters`       | `None`           |
/// | `weight_decay`     | `None`           |
/// | `grad_clip`        | `None`           |
/// | `multi_precision`  | `false`          |
/// | `use_multi_tensor` | `false`          |
/// | `name`             | `None`           |
/// | `sort_params`      | `true`           |
#[derive(Clone)]
pub struct OptimizerConfig {
    pub learning_rate: LearningRate,
    /// Required in eager mode; a plan-only optimizer receives its pairs per call.
    pub parameters: Option<ParameterInput>,
    /// Global regularizer. A bare coefficient means L2 decay.
    pub weight_decay: Option<WeightDecay>,
    /// Optimizer-level clip policy, used by groups without their own.
    pub grad_clip: Option<Arc<dyn GradientClip>>,
    /// Update reduced-precision parameters through f32 master weights.
    pub multi_precision: bool,
    pub use_multi_tensor: bool,
    /// Prefix inserted into generated accumulator names.
    pub name: Option<String>,
    /// Process parameters in lexical name order when building a plan.
    pub sort_params: bool,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        OptimizerConfig {
            learning_rate: LearningRate::Constant(0.001),
            parameters: None,
            weight_decay: None,
            grad_clip: None,
            multi_precision: false,
            use_multi_tensor: false,
            name: None,
            sort_params: true,
        }
    }
}

impl fmt::Debug for OptimizerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OptimizerConfig")
            .field("learning_rate", &self.learning_rate)
            .field("parameters", &self.parameters.is_some())
            .field("weight_decay", &self.weight_decay)
            .field("grad_clip", &self.grad_clip)
            .field("multi_precision", &self.multi_precision)
            .field("use_multi_tensor", &self.use_multi_tensor)
            .field("name", &self.name)
            .field("sort_params", &self.sort_params)
            .finish()
    }
}

impl OptimizerConfig {
    /// Checks the settings. `require_parameters` is set for eager optimizers.
    pub fn validate(&self, require_parameters: bool) -> Result<(), GradStepError> {
        self.learning_rate.validate()?;

        if let Some(weight_decay) = self.weight_decay {
            let coeff = weight_decay.to_regularizer().coeff();
            if !coeff.is_finite() || coeff < 0.0 {
                return Err(GradStepError::ConfigurationError(format!(
                    "weight decay coefficient must be a finite non-negative float, got {}",
                    coeff
                )));
            }
        }

        match &self.parameters {
            Some(ParameterInput::Single(param)) => Err(GradStepError::ConfigurationError(format!(
                "`parameters` argument given to the optimizer should be a collection of parameters or parameter groups, but got the single parameter '{}'",
                param.name()
            ))),
            Some(ParameterInput::Plain(params)) if params.is_empty() && require_parameters => Err(
                GradStepError::ConfigurationError("optimizer got an empty parameter list".to_string()),
            ),
            Some(ParameterInput::Grouped(groups)) if groups.is_empty() && require_parameters => Err(
                GradStepError::ConfigurationError("optimizer got an empty parameter group list".to_string()),
            ),
            None if require_parameters => Err(GradStepError::ConfigurationError(
                "`parameters` can not be empty when updating eagerly".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

/// Builds an [`Optimizer`] around an update rule.
///
/// ```ignore
/// let opt = OptimizerBuilder::new(Momentum::new(0.9, false)?)
///     .learning_rate(0.1)
///     .parameters(vec![weight.clone(), bias.clone()])
///     .weight_decay(1e-4)
///     .build()?;
/// ```
#[derive(Debug)]
pub struct OptimizerBuilder {
    rule: Box<dyn UpdateRule>,
    config: OptimizerConfig,
}

impl OptimizerBuilder {
    pub fn new(rule: impl UpdateRule + 'static) -> Self {
        OptimizerBuilder {
            rule: Box::new(rule),
            config: OptimizerConfig::default(),
        }
    }

    pub fn with_config(mut self, config: OptimizerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn learning_rate(mut self, learning_rate: impl Into<LearningRate>) -> Self {
        self.config.learning_rate = learning_rate.into();
        self
    }

    pub fn parameters(mut self, parameters: impl Into<ParameterInput>) -> Self {
        self.config.parameters = Some(parameters.into());
        self
    }

    pub fn weight_decay(mut self, weight_decay: impl Into<WeightDecay>) -> Self {
        self.config.weight_decay = Some(weight_decay.into());
        self
    }

    pub fn grad_clip(mut self, clip: Arc<dyn GradientClip>) -> Self {
        self.config.grad_clip = Some(clip);
        self
    }

    pub fn multi_precision(mut self, enabled: bool) -> Self {
        self.config.multi_precision = enabled;
        self
    }

    pub fn use_multi_tensor(mut self, enabled: bool) -> Self {
        self.config.use_multi_tensor = enabled;
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = Some(name.into());
        self
    }

    pub fn sort_params(mut self, sort: bool) -> Self {
        self.config.sort_params = sort;
        self
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Builds an optimizer that owns its parameters and can `step()` eagerly.
    pub fn build(self) -> Result<Optimizer, GradStepError> {
        Optimizer::from_config(self.rule, self.config, true)
    }

    /// Builds an optimizer that only receives `(param, grad)` pairs through
    /// [`Optimizer::apply_gradients`]; `parameters` may be left unset.
    pub fn build_for_plan(self) -> Result<Optimizer, GradStepError> {
        Optimizer::from_config(self.rule, self.config, false)
    }
}
