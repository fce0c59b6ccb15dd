// gradstep-core/src/optim/mod.rs

//! The parameter-update engine.
//!
//! This module provides the [`Optimizer`] orchestrator together with the
//! pieces it coordinates: the accumulator store, the parameter group
//! registry, learning-rate resolution, regularization, gradient clipping,
//! master weights and multi-tensor batching. Concrete update rules
//! ([`Sgd`], [`Momentum`], [`Adam`]) plug in through [`UpdateRule`].

use crate::nn::parameter::Parameter;
use crate::tensor::Tensor;

pub mod accumulator;
pub mod config;
pub mod grad_clip;
pub mod group_registry;
pub mod lr_resolver;
pub mod lr_schedule;
pub mod master_weight;
pub mod multi_tensor;
pub mod optimizer;
pub mod param_group;
pub mod regularizer;
pub mod state;
pub mod update_rule;

// Update rules
pub mod adam;
pub mod momentum;
pub mod sgd;

/// A parameter with its gradient for this step, if it has one.
pub type ParamGrad = (Parameter, Option<Tensor>);

pub use accumulator::{AccumulatorSpec, AccumulatorStore};
pub use adam::Adam;
pub use config::{OptimizerBuilder, OptimizerConfig};
pub use grad_clip::{ClipGradByGlobalNorm, ClipGradByNorm, ClipGradByValue, GradientClip, NoClip};
pub use group_registry::{GroupRegistry, ParamSettings, ResolvedGroup};
pub use lr_resolver::{LearningRate, LrResolver};
pub use lr_schedule::{ExponentialDecay, LrSchedule, MultiStepDecay, SharedSchedule, StepDecay};
pub use master_weight::MasterWeightManager;
pub use momentum::Momentum;
pub use multi_tensor::{MultiTensorBatcher, PrecisionBucket};
pub use optimizer::{Optimizer, PassStage};
pub use param_group::{ParamGroup, ParameterInput, ParamsArg, WeightDecay};
pub use regularizer::Regularizer;
pub use sgd::Sgd;
pub use state::{OptimizerState, StateEntry, TensorPayload};
pub use update_rule::{UpdateContext, UpdateItem, UpdateRule};

#[cfg(test)]
mod adam_test;
#[cfg(test)]
mod lr_resolver_test;
#[cfg(test)]
mod lr_schedule_test;
#[cfg(test)]
mod master_weight_test;
#[cfg(test)]
mod sgd_test;
#[cfg(test)]
mod state_test;
