use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use crate::nn::parameter::Parameter;
use crate::optim::grad_clip::GradientClip;
use crate::optim::regularizer::Regularizer;

/// The `params` entry of a group as the caller supplied it.
///
/// Only ordered inputs are accepted when the group is registered; an
/// unordered set would make the update order nondeterministic.
#[derive(Debug, Clone)]
pub enum ParamsArg {
    One(Parameter),
    List(Vec<Parameter>),
    Unordered(HashSet<Parameter>),
}

impl From<Parameter> for ParamsArg {
    fn from(param: Parameter) -> Self {
        ParamsArg::One(param)
    }
}

impl From<Vec<Parameter>> for ParamsArg {
    fn from(params: Vec<Parameter>) -> Self {
        ParamsArg::List(params)
    }
}

impl From<HashSet<Parameter>> for ParamsArg {
    fn from(params: HashSet<Parameter>) -> Self {
        ParamsArg::Unordered(params)
    }
}

/// Weight decay given either as a bare coefficient (L2) or a regularizer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WeightDecay {
    Coeff(f64),
    Regularizer(Regularizer),
}

impl WeightDecay {
    pub fn to_regularizer(self) -> Regularizer {
        match self {
            WeightDecay::Coeff(coeff) => Regularizer::L2Decay(coeff),
            WeightDecay::Regularizer(regularizer) => regularizer,
        }
    }
}

impl From<f64> for WeightDecay {
    fn from(coeff: f64) -> Self {
        WeightDecay::Coeff(coeff)
    }
}

impl From<Regularizer> for WeightDecay {
    fn from(regularizer: Regularizer) -> Self {
        WeightDecay::Regularizer(regularizer)
    }
}

/// Per-group hyperparameter overrides. Unset fields fall back to the
/// optimizer's defaults when the group is registered.
#[derive(Debug, Clone, Default)]
pub struct GroupOverrides {
    pub weight_decay: Option<WeightDecay>,
    /// Scale applied to the global learning rate for this group's parameters.
    pub learning_rate: Option<f64>,
    pub grad_clip: Option<Arc<dyn GradientClip>>,
    /// Rule-specific settings such as `momentum` or `beta1`.
    pub extra: BTreeMap<String, f64>,
}

/// A group of parameters with its overrides, as supplied by the caller.
#[derive(Debug, Clone, Default)]
pub struct ParamGroup {
    pub params: Option<ParamsArg>,
    pub overrides: GroupOverrides,
}

impl ParamGroup {
    pub fn new(params: impl Into<ParamsArg>) -> Self {
        ParamGroup {
            params: Some(params.into()),
            overrides: GroupOverrides::default(),
        }
    }

    pub fn with_weight_decay(mut self, weight_decay: impl Into<WeightDecay>) -> Self {
        self.overrides.weight_decay = Some(weight_decay.into());
        self
    }

    pub fn with_learning_rate(mut self, scale: f64) -> Self {
        self.overrides.learning_rate = Some(scale);
        self
    }

    pub fn with_grad_clip(mut self, clip: Arc<dyn GradientClip>) -> Self {
        self.overrides.grad_clip = Some(clip);
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: f64) -> Self {
        self.overrides.extra.insert(key.into(), value);
        self
    }
}

/// The optimizer's `parameters` argument.
#[derive(Debug, Clone)]
pub enum ParameterInput {
    Plain(Vec<Parameter>),
    Grouped(Vec<ParamGroup>),
    /// A lone parameter where a collection was expected. Always rejected.
    Single(Parameter),
}

impl From<Vec<Parameter>> for ParameterInput {
    fn from(params: Vec<Parameter>) -> Self {
        ParameterInput::Plain(params)
    }
}

impl From<Vec<ParamGroup>> for ParameterInput {
    fn from(groups: Vec<ParamGroup>) -> Self {
        ParameterInput::Grouped(groups)
    }
}

impl From<Parameter> for ParameterInput {
    fn from(param: Parameter) -> Self {
        ParameterInput::Single(param)
    }
}
