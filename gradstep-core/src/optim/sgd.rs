use crate::error::GradStepError;
use crate::nn::parameter::Parameter;
use crate::optim::update_rule::{UpdateContext, UpdateItem, UpdateRule};
use crate::program::operation::SgdSlot;
use crate::program::{OpKind, Operation};

/// Plain gradient descent: `p -= lr * g`. Needs no accumulators.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sgd;

impl Sgd {
    pub fn new() -> Self {
        Sgd
    }
}

impl UpdateRule for Sgd {
    fn name(&self) -> &'static str {
        "sgd"
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
        }
        Ok(())
    }

    fn append_update(&self, ctx: &mut UpdateContext<'_>, item: &UpdateItem) -> Result<(), GradStepError> {
        let slot = SgdSlot {
            param: item.param.tensor()?,
            grad: ctx.update_grad(&item.param, &item.grad)?,
            lr: item.lr.clone(),
            master: ctx.update_master(&item.param)?,
        };
        ctx.emit(Operation::new("sgd", OpKind::SgdUpdate(slot)).with_target(item.param.name()))
    }
}
