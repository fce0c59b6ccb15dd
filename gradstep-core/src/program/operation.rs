use crate::buffer::Buffer;
use crate::error::GradStepError;
use crate::program::update_kernels;
use crate::tensor::{kernels, Tensor};

/// Tensors touched by one SGD update.
#[derive(Debug, Clone)]
pub struct SgdSlot {
    pub param: Tensor,
    pub grad: Tensor,
    pub lr: Tensor,
    /// Full-precision shadow updated in place of `param`, which then receives
    /// the narrowed result.
    pub master: Option<Tensor>,
}

#[derive(Debug, Clone)]
pub struct MomentumSlot {
    pub param: Tensor,
    pub grad: Tensor,
    pub velocity: Tensor,
    pub lr: Tensor,
    pub master: Option<Tensor>,
}

#[derive(Debug, Clone)]
pub struct AdamSlot {
    pub param: Tensor,
    pub grad: Tensor,
    pub moment1: Tensor,
    pub moment2: Tensor,
    pub beta1_pow: Tensor,
    pub beta2_pow: Tensor,
    pub lr: Tensor,
    pub master: Option<Tensor>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MomentumHyper {
    pub mu: f64,
    pub use_nesterov: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdamHyper {
    pub beta1: f64,
    pub beta2: f64,
    pub epsilon: f64,
}

/// What an [`Operation`] computes and which tensors it reads and writes.
#[derive(Debug, Clone)]
pub enum OpKind {
    Fill { out: Tensor, value: f64 },
    Assign { out: Tensor, payload: Buffer },
    Cast { input: Tensor, out: Tensor },
    Scale { input: Tensor, out: Tensor, factor: f64 },
    SignScale { input: Tensor, out: Tensor, factor: f64 },
    Sum { inputs: Vec<Tensor>, out: Tensor },
    ClipByValue { input: Tensor, out: Tensor, min: f64, max: f64 },
    ClipByNorm { input: Tensor, out: Tensor, max_norm: f64 },
    ClipByGlobalNorm { inputs: Vec<Tensor>, outs: Vec<Tensor>, max_norm: f64 },
    SgdUpdate(SgdSlot),
    MomentumUpdate { slot: MomentumSlot, hyper: MomentumHyper },
    MergedMomentum { slots: Vec<MomentumSlot>, hyper: MomentumHyper },
    AdamUpdate { slot: AdamSlot, hyper: AdamHyper },
    MergedAdam { slots: Vec<AdamSlot>, hyper: AdamHyper },
}

/// A recorded kernel invocation.
///
/// In eager mode operations are executed as soon as they are built; in plan
/// mode they are appended to a [`Program`](crate::program::Program) and executed
/// on every run.
#[derive(Debug, Clone)]
pub struct Operation {
    op_type: &'static str,
    target: Option<String>,
    scope: Option<&'static str>,
    kind: OpKind,
}

impl Operation {
    pub fn new(op_type: &'static str, kind: OpKind) -> Self {
        Operation {
            op_type,
            target: None,
            scope: None,
            kind,
        }
    }

    /// Names the parameter (or accumulator) this operation is emitted for.
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Tags the operation with a diagnostic name scope.
    pub fn with_scope(mut self, scope: &'static str) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn op_type(&self) -> &'static str {
        self.op_type
    }

    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    pub fn scope(&self) -> Option<&'static str> {
        self.scope
    }

    pub fn kind(&self) -> &OpKind {
        &self.kind
    }

    pub fn execute(&self) -> Result<(), GradStepError> {
        match &self.kind {
            OpKind::Fill { out, value } => out.fill_(*value),
            OpKind::Assign { out, payload } => out.assign_(payload),
            OpKind::Cast { input, out } => out.copy_from_(input),
            OpKind::Scale { input, out, factor } => kernels::scale_into(input, out, *factor),
            OpKind::SignScale { input, out, factor } => {
                kernels::sign_scale_into(input, out, *factor)
            }
            OpKind::Sum { inputs, out } => kernels::sum_into(inputs, out),
            OpKind::ClipByValue { input, out, min, max } => {
                kernels::clip_value_into(input, out, *min, *max)
            }
            OpKind::ClipByNorm { input, out, max_norm } => {
                kernels::clip_norm_into(input, out, *max_norm)
            }
            OpKind::ClipByGlobalNorm { inputs, outs, max_norm } => {
                kernels::clip_global_norm_into(inputs, outs, *max_norm).map(|_| ())
            }
            OpKind::SgdUpdate(slot) => update_kernels::sgd(slot),
            OpKind::MomentumUpdate { slot, hyper } => update_kernels::momentum(slot, hyper),
            OpKind::MergedMomentum { slots, hyper } => slots
                .iter()
                .try_for_each(|slot| update_kernels::momentum(slot, hyper)),
            OpKind::AdamUpdate { slot, hyper } => update_kernels::adam(slot, hyper),
            OpKind::MergedAdam { slots, hyper } => slots
                .iter()
                .try_for_each(|slot| update_kernels::adam(slot, hyper)),
        }
    }
}
