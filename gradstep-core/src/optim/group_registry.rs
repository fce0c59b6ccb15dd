use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use crate::error::GradStepError;
use crate::nn::parameter::{ParamId, Parameter};
use crate::optim::grad_clip::GradientClip;
use crate::optim::param_group::{ParamGroup, ParamsArg};
use crate::optim::regularizer::Regularizer;

/// Values a group inherits when it leaves an override unset.
///
/// The clip policy is not inherited here: a group without its own policy
/// uses whatever the optimizer holds at the time of the pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct GroupDefaults {
    pub regularizer: Option<Regularizer>,
}

/// A registered group with every override resolved.
#[derive(Clone)]
pub struct ResolvedGroup {
    pub params: Vec<Parameter>,
    pub regularizer: Option<Regularizer>,
    pub learning_rate_scale: f64,
    pub grad_clip: Option<Arc<dyn GradientClip>>,
    pub extra: BTreeMap<String, f64>,
}

impl fmt::Debug for ResolvedGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.params.iter().map(Parameter::name).collect();
        f.debug_struct("ResolvedGroup")
            .field("params", &names)
            .field("regularizer", &self.regularizer)
            .field("learning_rate_scale", &self.learning_rate_scale)
            .field("grad_clip", &self.grad_clip)
            .field("extra", &self.extra)
            .finish()
    }
}

/// Authoritative per-parameter settings, looked up by parameter identity.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSettings {
    pub regularizer: Option<Regularizer>,
    pub learning_rate: f64,
}

/// Partitions the optimizer's parameters into disjoint groups.
#[derive(Debug, Default)]
pub struct GroupRegistry {
    groups: Vec<ResolvedGroup>,
    settings: HashMap<ParamId, ParamSettings>,
    members: HashSet<ParamId>,
}

fn check_unique(params: &[Parameter], seen: &mut HashSet<ParamId>) -> Result<(), GradStepError> {
    for param in params {
        if !seen.insert(param.id()) {
            return Err(GradStepError::DuplicateParameter { name: param.name() });
        }
    }
    Ok(())
}

impl GroupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a plain parameter list as a single group. Settings come from
    /// each parameter's own attributes.
    pub fn add_plain(&mut self, params: Vec<Parameter>) -> Result<usize, GradStepError> {
        let mut seen = self.members.clone();
        check_unique(&params, &mut seen)?;
        for param in &params {
            let attr = param.attr();
            self.settings.insert(
                param.id(),
                ParamSettings {
                    regularizer: attr.regularizer,
                    learning_rate: attr.learning_rate,
                },
            );
        }
        self.members = seen;
        self.groups.push(ResolvedGroup {
            params,
            regularizer: None,
            learning_rate_scale: 1.0,
            grad_clip: None,
            extra: BTreeMap::new(),
        });
        Ok(self.groups.len() - 1)
    }

    /// Validates and registers `group`, returning its index.
    ///
    /// Unset overrides are filled from `defaults`. The group's weight decay and
    /// learning-rate scale become the settings of each of its parameters.
    pub fn add_group(&mut self, group: ParamGroup, defaults: &GroupDefaults) -> Result<usize, GradStepError> {
        let params = match group.params {
            None => {
                return Err(GradStepError::ConfigurationError(
                    "parameter group is missing its 'params' entry".to_string(),
                ))
            }
            Some(ParamsArg::Unordered(_)) => {
                return Err(GradStepError::ConfigurationError(
                    "optimizer parameters should be in ordered collections, but received an unordered set"
                        .to_string(),
                ))
            }
            Some(ParamsArg::One(param)) => vec![param],
            Some(ParamsArg::List(params)) => params,
        };

        let mut seen = self.members.clone();
        check_unique(&params, &mut seen)?;

        let overrides = group.overrides;
        let regularizer = overrides
            .weight_decay
            .map(|wd| wd.to_regularizer())
            .or(defaults.regularizer);
        let learning_rate_scale = overrides.learning_rate.unwrap_or(1.0);
        if !learning_rate_scale.is_finite() || learning_rate_scale < 0.0 {
            return Err(GradStepError::ConfigurationError(format!(
                "group learning rate scale must be a finite non-negative float, got {}",
                learning_rate_scale
            )));
        }
        let grad_clip = overrides.grad_clip;

        for param in &params {
            let attr = param.attr();
            if let Some(own) = attr.regularizer {
                if regularizer != Some(own) {
                    log::warn!(
                        "Group weight decay {:?} replaces the regularizer {} declared on parameter '{}'",
                        regularizer,
                        own,
                        param.name()
                    );
                }
            }
            if attr.learning_rate != learning_rate_scale {
                log::debug!(
                    "Group learning rate scale {} replaces {} declared on parameter '{}'",
                    learning_rate_scale,
                    attr.learning_rate,
                    param.name()
                );
            }
            self.settings.insert(
                param.id(),
                ParamSettings {
                    regularizer,
                    learning_rate: learning_rate_scale,
                },
            );
        }
        self.members = seen;
        self.groups.push(ResolvedGroup {
            params,
            regularizer,
            learning_rate_scale,
            grad_clip,
            extra: overrides.extra,
        });
        log::debug!("Registered parameter group {}", self.groups.len() - 1);
        Ok(self.groups.len() - 1)
    }

    pub fn groups(&self) -> &[ResolvedGroup] {
        &self.groups
    }

    pub fn group(&self, index: usize) -> Option<&ResolvedGroup> {
        self.groups.get(index)
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn contains(&self, param: &Parameter) -> bool {
        self.members.contains(&param.id())
    }

    /// Settings of `param`; parameters outside every group use their own attributes.
    pub fn settings(&self, param: &Parameter) -> ParamSettings {
        self.settings.get(&param.id()).cloned().unwrap_or_else(|| {
            let attr = param.attr();
            ParamSettings {
                regularizer: attr.regularizer,
                learning_rate: attr.learning_rate,
            }
        })
    }

    /// Every registered parameter, group by group.
    pub fn all_params(&self) -> Vec<Parameter> {
        self.groups
            .iter()
            .flat_map(|group| group.params.iter().cloned())
            .collect()
    }
}
