use std::fmt;

use crate::error::GradStepError;
use crate::nn::parameter::Parameter;
use crate::optim::group_registry::GroupRegistry;
use crate::optim::master_weight::MasterWeightManager;
use crate::optim::ParamGrad;
use crate::program::{OpKind, OpSink, Operation};
use crate::tensor::{self, Tensor};

/// Weight-decay term added to a gradient.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Regularizer {
    /// `coeff * sign(param)`
    L1Decay(f64),
    /// `coeff * param`
    L2Decay(f64),
}

impl Regularizer {
    pub fn coeff(&self) -> f64 {
        match *self {
            Regularizer::L1Decay(c) | Regularizer::L2Decay(c) => c,
        }
    }

    /// Emits the operation computing the decay term for `param_value`.
    pub fn append_term(
        &self,
        param_value: &Tensor,
        target: &str,
        sink: &mut dyn OpSink,
    ) -> Result<Tensor, GradStepError> {
        let term = tensor::zeros_like(param_value)?;
        let op = match *self {
            Regularizer::L1Decay(coeff) => Operation::new(
                "sign_scale",
                OpKind::SignScale {
                    input: param_value.clone(),
                    out: term.clone(),
                    factor: coeff,
                },
            ),
            Regularizer::L2Decay(coeff) => Operation::new(
                "scale",
                OpKind::Scale {
                    input: param_value.clone(),
                    out: term.clone(),
                    factor: coeff,
                },
            ),
        };
        sink.emit(op.with_target(target).with_scope("regularization"))?;
        Ok(term)
    }
}

impl fmt::Display for Regularizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Regularizer::L1Decay(c) => write!(f, "L1Decay(coeff={})", c),
            Regularizer::L2Decay(c) => write!(f, "L2Decay(coeff={})", c),
        }
    }
}

/// Folds weight decay into gradients ahead of clipping.
#[derive(Debug, Default)]
pub struct RegularizationStage {
    override_notice_logged: bool,
}

impl RegularizationStage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the pairs with `grad + regularizer(param)` in place of each gradient.
    ///
    /// A parameter's own regularizer wins over `global`; pairs without a
    /// gradient or without any regularizer pass through unchanged.
    pub fn apply(
        &mut self,
        pairs: Vec<ParamGrad>,
        global: Option<&Regularizer>,
        registry: &GroupRegistry,
        masters: &MasterWeightManager,
        sink: &mut dyn OpSink,
    ) -> Result<Vec<ParamGrad>, GradStepError> {
        let mut out = Vec::with_capacity(pairs.len());
        for (param, grad) in pairs {
            let Some(grad) = grad else {
                out.push((param, None));
                continue;
            };
            if !param.is_initialized() {
                out.push((param, Some(grad)));
                continue;
            }
            let own = registry.settings(&param).regularizer;
            if own.is_some() && global.is_some() && !self.override_notice_logged {
                self.override_notice_logged = true;
                log::info!(
                    "Parameter '{}' sets its own regularizer; the optimizer's {} will only apply to parameters without one",
                    param.name(),
                    global.map(|g| g.to_string()).unwrap_or_default()
                );
            }
            let Some(regularizer) = own.or_else(|| global.copied()) else {
                out.push((param, Some(grad)));
                continue;
            };
            let new_grad = self.regularize(&param, &grad, &regularizer, masters, sink)?;
            out.push((param, Some(new_grad)));
        }
        Ok(out)
    }

    fn regularize(
        &self,
        param: &Parameter,
        grad: &Tensor,
        regularizer: &Regularizer,
        masters: &MasterWeightManager,
        sink: &mut dyn OpSink,
    ) -> Result<Tensor, GradStepError> {
        let name = param.name();
        let value = param.tensor()?;
        let effective = if value.dtype() == grad.dtype() {
            value
        } else if let Some(master) = masters.master_weight(&name).filter(|m| m.dtype() == grad.dtype()) {
            master
        } else {
            let cast = tensor::zeros(&value.shape(), grad.dtype())?;
            sink.emit(
                Operation::new(
                    "cast",
                    OpKind::Cast {
                        input: value,
                        out: cast.clone(),
                    },
                )
                .with_target(name.clone())
                .with_scope("regularization"),
            )?;
            cast
        };

        let term = regularizer.append_term(&effective, &name, sink)?;
        let new_grad = tensor::zeros_like(grad)?;
        sink.emit(
            Operation::new(
                "sum",
                OpKind::Sum {
                    inputs: vec![grad.clone(), term],
                    out: new_grad.clone(),
                },
            )
            .with_target(name)
            .with_scope("regularization"),
        )?;
        Ok(new_grad)
    }
}
