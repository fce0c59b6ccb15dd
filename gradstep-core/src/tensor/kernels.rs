//! Element-wise primitives the update engine is built on.
//!
//! Every kernel reads its inputs into scratch vectors before taking the
//! write lock on its output, so an input may alias the output (in-place
//! scaling of an accumulator, for instance) without deadlocking.

use crate::buffer::Buffer;
use crate::error::GradStepError;
use crate::tensor::Tensor;

fn check_same_shape(expected: &[usize], actual: &[usize], operation: &str) -> Result<(), GradStepError> {
    if expected != actual {
        return Err(GradStepError::ShapeMismatch {
            expected: expected.to_vec(),
            actual: actual.to_vec(),
            operation: operation.to_string(),
        });
    }
    Ok(())
}

impl Tensor {
    /// Fills every element with `value`, keeping the dtype.
    pub fn fill_(&self, value: f64) -> Result<(), GradStepError> {
        let mut guard = self.write_data();
        let len = guard.buffer.len();
        guard.buffer = Buffer::full(guard.buffer.dtype(), len, value)?;
        Ok(())
    }

    /// Overwrites the elements from f64 values, narrowing to the tensor dtype.
    pub fn assign_values_(&self, values: &[f64]) -> Result<(), GradStepError> {
        self.write_data().buffer.write_f64(values)
    }

    /// Overwrites the storage with `buffer`, casting it to this tensor's dtype.
    ///
    /// When the dtypes already agree the payload is stored bit for bit.
    pub fn assign_(&self, buffer: &Buffer) -> Result<(), GradStepError> {
        let mut guard = self.write_data();
        if buffer.len() != guard.buffer.len() {
            return Err(GradStepError::ShapeMismatch {
                expected: guard.shape.clone(),
                actual: vec![buffer.len()],
                operation: "assign_".to_string(),
            });
        }
        guard.buffer = buffer.cast(guard.buffer.dtype())?;
        Ok(())
    }

    /// Copies `src` into `self`, converting to `self`'s dtype.
    pub fn copy_from_(&self, src: &Tensor) -> Result<(), GradStepError> {
        check_same_shape(&self.shape(), &src.shape(), "copy_from_")?;
        let values = src.to_f64_vec();
        self.assign_values_(&values)
    }
}

/// `out = factor * input`
pub fn scale_into(input: &Tensor, out: &Tensor, factor: f64) -> Result<(), GradStepError> {
    check_same_shape(&out.shape(), &input.shape(), "scale")?;
    let values: Vec<f64> = input.to_f64_vec().iter().map(|v| v * factor).collect();
    out.assign_values_(&values)
}

/// `out = factor * sign(input)`
pub fn sign_scale_into(input: &Tensor, out: &Tensor, factor: f64) -> Result<(), GradStepError> {
    check_same_shape(&out.shape(), &input.shape(), "sign_scale")?;
    let values: Vec<f64> = input
        .to_f64_vec()
        .iter()
        .map(|&v| if v == 0.0 { 0.0 } else { factor * v.signum() })
        .collect();
    out.assign_values_(&values)
}

/// `out = inputs[0] + inputs[1] + ...`
pub fn sum_into(inputs: &[Tensor], out: &Tensor) -> Result<(), GradStepError> {
    let shape = out.shape();
    let mut acc = vec![0.0; out.numel()];
    for input in inputs {
        check_same_shape(&shape, &input.shape(), "sum")?;
        for (a, v) in acc.iter_mut().zip(input.to_f64_vec()) {
            *a += v;
        }
    }
    out.assign_values_(&acc)
}

/// `out = clamp(input, min, max)`
pub fn clip_value_into(input: &Tensor, out: &Tensor, min: f64, max: f64) -> Result<(), GradStepError> {
    check_same_shape(&out.shape(), &input.shape(), "clip_by_value")?;
    let values: Vec<f64> = input
        .to_f64_vec()
        .iter()
        .map(|v| v.clamp(min, max))
        .collect();
    out.assign_values_(&values)
}

/// Rescales `input` into `out` so that its L2 norm does not exceed `max_norm`.
pub fn clip_norm_into(input: &Tensor, out: &Tensor, max_norm: f64) -> Result<(), GradStepError> {
    check_same_shape(&out.shape(), &input.shape(), "clip_by_norm")?;
    let values = input.to_f64_vec();
    let norm = l2_norm(&values);
    let factor = if norm > max_norm { max_norm / norm } else { 1.0 };
    let scaled: Vec<f64> = values.iter().map(|v| v * factor).collect();
    out.assign_values_(&scaled)
}

/// Scales every input by `max_norm / max(global_norm, max_norm)` into the
/// matching output, where `global_norm` is the L2 norm over all inputs.
///
/// Returns the global norm.
pub fn clip_global_norm_into(
    inputs: &[Tensor],
    outs: &[Tensor],
    max_norm: f64,
) -> Result<f64, GradStepError> {
    if inputs.len() != outs.len() {
        return Err(GradStepError::InternalError(format!(
            "clip_by_global_norm got {} inputs but {} outputs",
            inputs.len(),
            outs.len()
        )));
    }
    let all: Vec<Vec<f64>> = inputs.iter().map(Tensor::to_f64_vec).collect();
    let global_norm = all
        .iter()
        .flat_map(|values| values.iter())
        .map(|v| v * v)
        .sum::<f64>()
        .sqrt();
    let factor = max_norm / global_norm.max(max_norm);
    for ((input, out), values) in inputs.iter().zip(outs).zip(all) {
        check_same_shape(&out.shape(), &input.shape(), "clip_by_global_norm")?;
        let scaled: Vec<f64> = values.iter().map(|v| v * factor).collect();
        out.assign_values_(&scaled)?;
    }
    Ok(global_norm)
}

pub fn l2_norm(values: &[f64]) -> f64 {
    values.iter().map(|v| v * v).sum::<f64>().sqrt()
}
