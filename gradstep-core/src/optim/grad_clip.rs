use std::fmt;

use crate::error::GradStepError;
use crate::optim::ParamGrad;
use crate::program::{OpKind, OpSink, Operation};
use crate::tensor::{self, Tensor};

/// Rewrites gradients before they reach the update rule.
///
/// Called once per pass with the full list of pairs. Pairs without a
/// gradient must be passed through untouched.
pub trait GradientClip: fmt::Debug + Send + Sync {
    fn clip(&self, pairs: Vec<ParamGrad>, sink: &mut dyn OpSink) -> Result<Vec<ParamGrad>, GradStepError>;
}

/// Leaves gradients unchanged. Used when no clip policy is configured anywhere.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoClip;

impl GradientClip for NoClip {
    fn clip(&self, pairs: Vec<ParamGrad>, _sink: &mut dyn OpSink) -> Result<Vec<ParamGrad>, GradStepError> {
        Ok(pairs)
    }
}

/// Clamps every gradient element to `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipGradByValue {
    max: f64,
    min: f64,
}

impl ClipGradByValue {
    /// `min` defaults to `-max`.
    pub fn new(max: f64, min: Option<f64>) -> Result<Self, GradStepError> {
        let min = match min {
            Some(min) => min,
            None => {
                if !(max > 0.0) {
                    return Err(GradStepError::ConfigurationError(format!(
                        "max should be greater than 0 when min is not given, got {}",
                        max
                    )));
                }
                -max
            }
        };
        if !(min <= max) {
            return Err(GradStepError::ConfigurationError(format!(
                "min ({}) should not exceed max ({})",
                min, max
            )));
        }
        Ok(ClipGradByValue { max, min })
    }
}

impl GradientClip for ClipGradByValue {
    fn clip(&self, pairs: Vec<ParamGrad>, sink: &mut dyn OpSink) -> Result<Vec<ParamGrad>, GradStepError> {
        pairs
            .into_iter()
            .map(|(param, grad)| {
                let Some(grad) = grad else {
                    return Ok((param, None));
                };
                let out = tensor::zeros_like(&grad)?;
                sink.emit(
                    Operation::new(
                        "clip",
                        OpKind::ClipByValue {
                            input: grad,
                            out: out.clone(),
                            min: self.min,
                            max: self.max,
                        },
                    )
                    .with_target(param.name())
                    .with_scope("gradient_clip"),
                )?;
                Ok((param, Some(out)))
            })
            .collect()
    }
}

fn validate_clip_norm(clip_norm: f64) -> Result<(), GradStepError> {
    if !(clip_norm > 0.0) || !clip_norm.is_finite() {
        return Err(GradStepError::ConfigurationError(format!(
            "clip_norm should be a positive finite float, got {}",
            clip_norm
        )));
    }
    Ok(())
}

/// Rescales each gradient on its own so its L2 norm is at most `clip_norm`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipGradByNorm {
    clip_norm: f64,
}

impl ClipGradByNorm {
    pub fn new(clip_norm: f64) -> Result<Self, GradStepError> {
        validate_clip_norm(clip_norm)?;
        Ok(ClipGradByNorm { clip_norm })
    }
}

impl GradientClip for ClipGradByNorm {
    fn clip(&self, pairs: Vec<ParamGrad>, sink: &mut dyn OpSink) -> Result<Vec<ParamGrad>, GradStepError> {
        pairs
            .into_iter()
            .map(|(param, grad)| {
                let Some(grad) = grad else {
                    return Ok((param, None));
                };
                let out = tensor::zeros_like(&grad)?;
                sink.emit(
                    Operation::new(
                        "clip_by_norm",
                        OpKind::ClipByNorm {
                            input: grad,
                            out: out.clone(),
                            max_norm: self.clip_norm,
                        },
                    )
                    .with_target(param.name())
                    .with_scope("gradient_clip"),
                )?;
                Ok((param, Some(out)))
            })
            .collect()
    }
}

/// Rescales all gradients together so their joint L2 norm is at most `clip_norm`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipGradByGlobalNorm {
    clip_norm: f64,
}

impl ClipGradByGlobalNorm {
    pub fn new(clip_norm: f64) -> Result<Self, GradStepError> {
        validate_clip_norm(clip_norm)?;
        Ok(ClipGradByGlobalNorm { clip_norm })
    }
}

impl GradientClip for ClipGradByGlobalNorm {
    fn clip(&self, pairs: Vec<ParamGrad>, sink: &mut dyn OpSink) -> Result<Vec<ParamGrad>, GradStepError> {
        let mut inputs: Vec<Tensor> = Vec::new();
        let mut outs: Vec<Tensor> = Vec::new();
        let mut clipped = Vec::with_capacity(pairs.len());
        for (param, grad) in pairs {
            match grad {
                Some(grad) => {
                    let out = tensor::zeros_like(&grad)?;
                    inputs.push(grad);
                    outs.push(out.clone());
                    clipped.push((param, Some(out)));
                }
                None => clipped.push((param, None)),
            }
        }
        if inputs.is_empty() {
            return Ok(clipped);
        }
        sink.emit(
            Operation::new(
                "clip_by_global_norm",
                OpKind::ClipByGlobalNorm {
                    inputs,
                    outs,
                    max_norm: self.clip_norm,
                },
            )
            .with_scope("gradient_clip"),
        )?;
        Ok(clipped)
    }
}
