use std::collections::BTreeMap;

use crate::error::GradStepError;
use crate::nn::parameter::Parameter;
use crate::optim::accumulator::AccumulatorSpec;
use crate::optim::multi_tensor::PrecisionBucket;
use crate::optim::update_rule::{UpdateContext, UpdateItem, UpdateRule};
use crate::program::operation::{MomentumHyper, MomentumSlot};
use crate::program::{OpKind, Operation};

pub const VELOCITY_ACC: &str = "momentum";

/// Heavy-ball momentum, optionally with the Nesterov correction.
///
/// ```text
/// v = mu * v + g
/// p = p - lr * v                (plain)
/// p = p - lr * (g + mu * v)     (nesterov)
/// ```
///
/// Groups may override `momentum` and `use_nesterov` (non-zero means true)
/// through their extra settings.
#[derive(Debug, Clone, PartialEq)]
pub struct Momentum {
    defaults: MomentumHyper,
    current: MomentumHyper,
}

impl Momentum {
    pub fn new(momentum: f64, use_nesterov: bool) -> Result<Self, GradStepError> {
        if !momentum.is_finite() || momentum < 0.0 {
            return Err(GradStepError::ConfigurationError(format!(
                "momentum must be a finite non-negative float, got {}",
                momentum
            )));
        }
        let hyper = MomentumHyper {
            mu: momentum,
            use_nesterov,
        };
        Ok(Momentum {
            defaults: hyper,
            current: hyper,
        })
    }

    /// Settings in effect for the group being updated.
    pub fn hyper(&self) -> MomentumHyper {
        self.current
    }

    fn slot(&self, ctx: &mut UpdateContext<'_>, item: &UpdateItem) -> Result<MomentumSlot, GradStepError> {
        Ok(MomentumSlot {
            param: item.param.tensor()?,
            grad: ctx.update_grad(&item.param, &item.grad)?,
            velocity: ctx.accumulator(VELOCITY_ACC, &item.param)?,
            lr: item.lr.clone(),
            master: ctx.update_master(&item.param)?,
        })
    }
}

impl UpdateRule for Momentum {
    fn name(&self) -> &'static str {
        "momentum"
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
            let spec = AccumulatorSpec::default().with_dtype(ctx.accumulator_dtype(param));
            ctx.add_accumulator(VELOCITY_ACC, param, spec)?;
        }
        Ok(())
    }

    fn append_update(&self, ctx: &mut UpdateContext<'_>, item: &UpdateItem) -> Result<(), GradStepError> {
        let slot = self.slot(ctx, item)?;
        ctx.emit(
            Operation::new(
                "momentum",
                OpKind::MomentumUpdate {
                    slot,
                    hyper: self.current,
                },
            )
            .with_target(item.param.name()),
        )
    }

    fn update_param_group(&mut self, extra: &BTreeMap<String, f64>) {
        self.current = MomentumHyper {
            mu: extra.get("momentum").copied().unwrap_or(self.defaults.mu),
            use_nesterov: extra
                .get("use_nesterov")
                .map(|v| *v != 0.0)
                .unwrap_or(self.defaults.use_nesterov),
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
        log::debug!("merged_momentum over {} {:?} parameters", slots.len(), bucket);
        ctx.emit(Operation::new(
            "merged_momentum",
            OpKind::MergedMomentum {
                slots,
                hyper: self.current,
            },
        ))
    }
}
