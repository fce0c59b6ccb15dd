use rand::Rng;
use rand_distr::{Distribution, Normal, Uniform};

use crate::buffer::Buffer;
use crate::error::GradStepError;
use crate::types::DType;

/// How a parameter's storage is filled when it is first allocated.
///
/// The generated values become the parameter's initial-value snapshot, which
/// is what master weights are derived from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Initializer {
    Constant(f64),
    /// Uniform over `[low, high)`.
    Uniform { low: f64, high: f64 },
    Normal { mean: f64, std: f64 },
}

impl Initializer {
    /// Generates `numel` values of `dtype` using the thread-local RNG.
    pub fn generate(&self, numel: usize, dtype: DType) -> Result<Buffer, GradStepError> {
        let mut rng = rand::thread_rng();
        self.generate_with(&mut rng, numel, dtype)
    }

    /// Generates `numel` values of `dtype` from the given RNG.
    pub fn generate_with<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        numel: usize,
        dtype: DType,
    ) -> Result<Buffer, GradStepError> {
        let values: Vec<f64> = match *self {
            Initializer::Constant(value) => vec![value; numel],
            Initializer::Uniform { low, high } => {
                if !(low.is_finite() && high.is_finite() && low < high) {
                    return Err(GradStepError::ConfigurationError(format!(
                        "Uniform initializer needs finite low < high, got [{}, {})",
                        low, high
                    )));
                }
                let dist = Uniform::new(low, high);
                (0..numel).map(|_| dist.sample(rng)).collect()
            }
            Initializer::Normal { mean, std } => {
                let dist = Normal::new(mean, std).map_err(|e| {
                    GradStepError::ConfigurationError(format!(
                        "Invalid normal initializer (mean={}, std={}): {}",
                        mean, std, e
                    ))
                })?;
                (0..numel).map(|_| dist.sample(rng)).collect()
            }
        };
        Buffer::from_f64_slice(dtype, &values)
    }
}
