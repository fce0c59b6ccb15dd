//! Parameter update kernels.
//!
//! When a slot carries a master weight the arithmetic runs against the
//! master, and the parameter receives the result narrowed to its own dtype.

use crate::error::GradStepError;
use crate::program::operation::{AdamHyper, AdamSlot, MomentumHyper, MomentumSlot, SgdSlot};
use crate::tensor::Tensor;

fn check_len(target: &[f64], other: &[f64], operation: &str) -> Result<(), GradStepError> {
    if target.len() != other.len() {
        return Err(GradStepError::ShapeMismatch {
            expected: vec![target.len()],
            actual: vec![other.len()],
            operation: operation.to_string(),
        });
    }
    Ok(())
}

/// Writes `values` to the update target and mirrors them into the parameter
/// when a master weight is in play.
fn store(param: &Tensor, master: Option<&Tensor>, values: &[f64]) -> Result<(), GradStepError> {
    match master {
        Some(master) => {
            master.assign_values_(values)?;
            param.assign_values_(values)
        }
        None => param.assign_values_(values),
    }
}

fn target_values(param: &Tensor, master: Option<&Tensor>) -> Vec<f64> {
    master.unwrap_or(param).to_f64_vec()
}

pub(crate) fn sgd(slot: &SgdSlot) -> Result<(), GradStepError> {
    let lr = slot.lr.item()?;
    let mut p = target_values(&slot.param, slot.master.as_ref());
    let g = slot.grad.to_f64_vec();
    check_len(&p, &g, "sgd")?;
    for (p, g) in p.iter_mut().zip(&g) {
        *p -= lr * g;
    }
    store(&slot.param, slot.master.as_ref(), &p)
}

/// `v = mu * v + g`, then `p -= lr * v` (or `p -= lr * (g + mu * v)` with Nesterov).
pub(crate) fn momentum(slot: &MomentumSlot, hyper: &MomentumHyper) -> Result<(), GradStepError> {
    let lr = slot.lr.item()?;
    let mut p = target_values(&slot.param, slot.master.as_ref());
    let g = slot.grad.to_f64_vec();
    let mut v = slot.velocity.to_f64_vec();
    check_len(&p, &g, "momentum")?;
    check_len(&p, &v, "momentum")?;

    for ((p, v), g) in p.iter_mut().zip(v.iter_mut()).zip(&g) {
        *v = hyper.mu * *v + g;
        if hyper.use_nesterov {
            *p -= (g + hyper.mu * *v) * lr;
        } else {
            *p -= lr * *v;
        }
    }
    slot.velocity.assign_values_(&v)?;
    store(&slot.param, slot.master.as_ref(), &p)
}

/// Bias-corrected Adam step; the beta power accumulators advance afterwards.
pub(crate) fn adam(slot: &AdamSlot, hyper: &AdamHyper) -> Result<(), GradStepError> {
    let lr = slot.lr.item()?;
    let beta1_pow = slot.beta1_pow.item()?;
    let beta2_pow = slot.beta2_pow.item()?;
    let mut p = target_values(&slot.param, slot.master.as_ref());
    let g = slot.grad.to_f64_vec();
    let mut m1 = slot.moment1.to_f64_vec();
    let mut m2 = slot.moment2.to_f64_vec();
    check_len(&p, &g, "adam")?;
    check_len(&p, &m1, "adam")?;
    check_len(&p, &m2, "adam")?;

    let bias2 = (1.0 - beta2_pow).sqrt();
    let lr_t = lr * bias2 / (1.0 - beta1_pow);
    for i in 0..p.len() {
        m1[i] = hyper.beta1 * m1[i] + (1.0 - hyper.beta1) * g[i];
        m2[i] = hyper.beta2 * m2[i] + (1.0 - hyper.beta2) * g[i] * g[i];
        p[i] -= lr_t * m1[i] / (m2[i].sqrt() + hyper.epsilon * bias2);
    }

    slot.moment1.assign_values_(&m1)?;
    slot.moment2.assign_values_(&m2)?;
    slot.beta1_pow.fill_(beta1_pow * hyper.beta1)?;
    slot.beta2_pow.fill_(beta2_pow * hyper.beta2)?;
    store(&slot.param, slot.master.as_ref(), &p)
}
