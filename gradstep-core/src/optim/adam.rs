use std::collections::BTreeMap;

use crate::error::GradStepError;
use crate::nn::parameter::Parameter;
use crate::optim::accumulator::AccumulatorSpec;
use crate::optim::master_weight::MASTER_DTYPE;
use crate::optim::multi_tensor::PrecisionBucket;
use crate::optim::update_rule::{UpdateContext, UpdateItem, UpdateRule};
use crate::program::operation::{AdamHyper, AdamSlot};
use crate::program::{OpKind, Operation};

pub const MOMENT1_ACC: &str = "moment1";
pub const MOMENT2_ACC: &str = "moment2";
pub const BETA1_POW_ACC: &str = "beta1_pow_acc";
pub const BETA2_POW_ACC: &str = "beta2_pow_acc";

fn validate(hyper: &AdamHyper) -> Result<(), GradStepError> {
    if !(0.0..1.0).contains(&hyper.beta1) {
        return Err(GradStepError::ConfigurationError(format!(
            "beta1 must be in [0, 1), got {}",
            hyper.beta1
        )));
    }
    if !(0.0..1.0).contains(&hyper.beta2) {
        return Err(GradStepError::ConfigurationError(format!(
            "beta2 must be in [0, 1), got {}",
            hyper.beta2
        )));
    }
    if !(hyper.epsilon > 0.0) {
        return Err(GradStepError::ConfigurationError(format!(
            "epsilon must be positive, got {}",
            hyper.epsilon
        )));
    }
    Ok(())
}

/// Adam with bias correction folded into the step size.
///
/// Each parameter keeps its own `beta1^t` / `beta2^t` accumulators (shape
/// `[1]`, created filled with the betas) which the kernel advances after
/// every update.
#[derive(Debug, Clone, PartialEq)]
pub struct Adam {
    defaults: AdamHyper,
    current: AdamHyper,
}

impl Default for Adam {
    fn default() -> Self {
        let hyper = AdamHyper {
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
        };
        Adam {
            defaults: hyper,
            current: hyper,
        }
    }
}

impl Adam {
    pub fn new(beta1: f64, beta2: f64, epsilon: f64) -> Result<Self, GradStepError> {
        let hyper = AdamHyper { beta1, beta2, epsilon };
        validate(&hyper)?;
        Ok(Adam {
            defaults: hyper,
            current: hyper,
        })
    }

    pub fn hyper(&self) -> AdamHyper {
        self.current
    }

    fn slot(&self, ctx: &mut UpdateContext<'_>, item: &UpdateItem) -> Result<AdamSlot, GradStepError> {
        let param = &item.param;
        Ok(AdamSlot {
            param: param.tensor()?,
            grad: ctx.update_grad(param, &item.grad)?,
            moment1: ctx.accumulator(MOMENT1_ACC, param)?,
            moment2: ctx.accumulator(MOMENT2_ACC, param)?,
            beta1_pow: ctx.accumulator(BETA1_POW_ACC, param)?,
            beta2_pow: ctx.accumulator(BETA2_POW_ACC, param)?,
            lr: item.lr.clone(),
            master: ctx.update_master(param)?,
        })
    }
}

impl UpdateRule for Adam {
    fn name(&self) -> &'static str {
        "adam"
    }

    fn create_accumulators(
        &self,
        ctx: &mut UpdateContext<'_>,
        params: &[Parameter],
    ) -> Result<(), GradStepError> {
        for param in params {
            if ctx.uses_master(param) {
                ctx.master_weight(param)?;
            }
            let acc_dtype = ctx.accumulator_dtype(param);
            let pow_dtype = if ctx.uses_master(param) {
                MASTER_DTYPE
            } else {
                param.dtype().scalar_dtype()
            };
            ctx.add_accumulator(MOMENT1_ACC, param, AccumulatorSpec::default().with_dtype(acc_dtype))?;
            ctx.add_accumulator(MOMENT2_ACC, param, AccumulatorSpec::default().with_dtype(acc_dtype))?;
            ctx.add_accumulator(
                BETA1_POW_ACC,
                param,
                AccumulatorSpec::default()
                    .with_dtype(pow_dtype)
                    .with_fill_value(self.current.beta1)
                    .with_shape(vec![1]),
            )?;
            ctx.add_accumulator(
                BETA2_POW_ACC,
                param,
                AccumulatorSpec::default()
                    .with_dtype(pow_dtype)
                    .with_fill_value(self.current.beta2)
                    .with_shape(vec![1]),
            )?;
        }
        Ok(())
    }

    fn append_update(&self, ctx: &mut UpdateContext<'_>, item: &UpdateItem) -> Result<(), GradStepError> {
        let slot = self.slot(ctx, item)?;
        ctx.emit(
            Operation::new(
                "adam",
                OpKind::AdamUpdate {
                    slot,
                    hyper: self.current,
                },
            )
            .with_target(item.param.name()),
        )
    }

    fn update_param_group(&mut self, extra: &BTreeMap<String, f64>) {
        let get = |key: &str, default: f64| extra.get(key).copied().unwrap_or(default);
        self.current = AdamHyper {
            beta1: get("beta1", self.defaults.beta1),
            beta2: get("beta2", self.defaults.beta2),
            epsilon: get("epsilon", self.defaults.epsilon),
        };
    }

    fn supports_multi_tensor(&self) -> bool {
        true
    }

    fn append_multi_tensor_update(
        &self,
        ctx: &mut UpdateContext<'_>,
        bucket: PrecisionBucket,
        items: &[UpdateItem],
    ) -> Result<(), GradStepError> {
        let slots = items
            .iter()
            .map(|item| self.slot(ctx, item))
            .collect::<Result<Vec<_>, _>>()?;
        log::debug!("merged_adam over {} {:?} parameters", slots.len(), bucket);
        ctx.emit(Operation::new(
            "merged_adam",
            OpKind::MergedAdam {
                slots,
                hyper: self.current,
            },
        ))
    }
}
