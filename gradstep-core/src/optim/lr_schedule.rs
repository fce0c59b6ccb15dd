use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::GradStepError;

/// Exported state of a schedule (`last_epoch`, `last_lr`, ...).
pub type ScheduleState = BTreeMap<String, f64>;

/// A schedule shared between the optimizer, the caller advancing it and any
/// plan whose learning rate is bound to it.
pub type SharedSchedule = Arc<RwLock<dyn LrSchedule>>;

/// Defines the interface for learning-rate schedules.
///
/// The optimizer only reads `current_value`; advancing the schedule between
/// steps is the caller's job.
pub trait LrSchedule: fmt::Debug + Send + Sync {
    /// Learning rate for the current epoch.
    fn current_value(&self) -> f64;

    /// Moves to the next epoch and recomputes the learning rate.
    fn advance(&mut self);

    fn state_dict(&self) -> ScheduleState;

    fn set_state_dict(&mut self, state: &ScheduleState) -> Result<(), GradStepError>;
}

/// Wraps a schedule so it can be handed to the optimizer and still advanced
/// by the caller.
pub fn shared<S: LrSchedule + 'static>(schedule: S) -> SharedSchedule {
    Arc::new(RwLock::new(schedule))
}

pub fn read_schedule(schedule: &SharedSchedule) -> RwLockReadGuard<'_, dyn LrSchedule + 'static> {
    schedule.read().unwrap_or_else(|poisoned| {
        log::warn!("RwLock for lr schedule was poisoned. Recovering read guard.");
        PoisonError::into_inner(poisoned)
    })
}

pub fn write_schedule(schedule: &SharedSchedule) -> RwLockWriteGuard<'_, dyn LrSchedule + 'static> {
    schedule.write().unwrap_or_else(|poisoned| {
        log::warn!("RwLock for lr schedule was poisoned. Recovering write guard.");
        PoisonError::into_inner(poisoned)
    })
}

fn validate_base(learning_rate: f64) -> Result<(), GradStepError> {
    if !learning_rate.is_finite() || learning_rate < 0.0 {
        return Err(GradStepError::ConfigurationError(format!(
            "Schedule learning rate must be a finite non-negative float, got {}",
            learning_rate
        )));
    }
    Ok(())
}

fn validate_gamma(gamma: f64) -> Result<(), GradStepError> {
    if !(gamma > 0.0 && gamma < 1.0) {
        return Err(GradStepError::ConfigurationError(format!(
            "gamma should be in (0.0, 1.0), got {}",
            gamma
        )));
    }
    Ok(())
}

fn state_value(state: &ScheduleState, key: &str) -> Result<f64, GradStepError> {
    state
        .get(key)
        .copied()
        .ok_or_else(|| GradStepError::StateKeyMissing {
            key: key.to_string(),
        })
}

/// Epoch counter and last computed value shared by the built-in schedules.
#[derive(Debug, Clone, PartialEq)]
struct Progress {
    base_lr: f64,
    last_epoch: usize,
    last_lr: f64,
}

impl Progress {
    fn new(base_lr: f64) -> Self {
        Progress {
            base_lr,
            last_epoch: 0,
            last_lr: base_lr,
        }
    }

    fn state_dict(&self) -> ScheduleState {
        let mut state = ScheduleState::new();
        state.insert("last_epoch".to_string(), self.last_epoch as f64);
        state.insert("last_lr".to_string(), self.last_lr);
        state
    }

    fn set_state_dict(&mut self, state: &ScheduleState) -> Result<(), GradStepError> {
        let last_epoch = state_value(state, "last_epoch")?;
        let last_lr = state_value(state, "last_lr")?;
        if last_epoch < 0.0 || last_epoch.fract() != 0.0 {
            return Err(GradStepError::ConfigurationError(format!(
                "last_epoch must be a non-negative integer, got {}",
                last_epoch
            )));
        }
        self.last_epoch = last_epoch as usize;
        self.last_lr = last_lr;
        Ok(())
    }
}

/// Decays the learning rate by `gamma` every `step_size` epochs.
#[derive(Debug, Clone, PartialEq)]
pub struct StepDecay {
    progress: Progress,
    step_size: usize,
    gamma: f64,
}

impl StepDecay {
    pub fn new(learning_rate: f64, step_size: usize, gamma: f64) -> Result<Self, GradStepError> {
        validate_base(learning_rate)?;
        validate_gamma(gamma)?;
        if step_size == 0 {
            return Err(GradStepError::ConfigurationError(
                "step_size must be a positive integer".to_string(),
            ));
        }
        Ok(StepDecay {
            progress: Progress::new(learning_rate),
            step_size,
            gamma,
        })
    }
}

impl LrSchedule for StepDecay {
    fn current_value(&self) -> f64 {
        self.progress.last_lr
    }

    fn advance(&mut self) {
        self.progress.last_epoch += 1;
        let decays = (self.progress.last_epoch / self.step_size) as i32;
        self.progress.last_lr = self.progress.base_lr * self.gamma.powi(decays);
    }

    fn state_dict(&self) -> ScheduleState {
        self.progress.state_dict()
    }

    fn set_state_dict(&mut self, state: &ScheduleState) -> Result<(), GradStepError> {
        self.progress.set_state_dict(state)
    }
}

/// Decays the learning rate by `gamma` once the epoch reaches each milestone.
#[derive(Debug, Clone, PartialEq)]
pub struct MultiStepDecay {
    progress: Progress,
    milestones: Vec<usize>,
    gamma: f64,
}

impl MultiStepDecay {
    /// `milestones` must be strictly increasing.
    pub fn new(learning_rate: f64, milestones: Vec<usize>, gamma: f64) -> Result<Self, GradStepError> {
        validate_base(learning_rate)?;
        validate_gamma(gamma)?;
        if milestones.windows(2).any(|w| w[0] >= w[1]) {
            return Err(GradStepError::ConfigurationError(format!(
                "milestones should be a strictly increasing sequence, got {:?}",
                milestones
            )));
        }
        Ok(MultiStepDecay {
            progress: Progress::new(learning_rate),
            milestones,
            gamma,
        })
    }
}

impl LrSchedule for MultiStepDecay {
    fn current_value(&self) -> f64 {
        self.progress.last_lr
    }

    fn advance(&mut self) {
        self.progress.last_epoch += 1;
        let epoch = self.progress.last_epoch;
        let passed = self.milestones.iter().take_while(|&&m| m <= epoch).count() as i32;
        self.progress.last_lr = self.progress.base_lr * self.gamma.powi(passed);
    }

    fn state_dict(&self) -> ScheduleState {
        self.progress.state_dict()
    }

    fn set_state_dict(&mut self, state: &ScheduleState) -> Result<(), GradStepError> {
        self.progress.set_state_dict(state)
    }
}

/// `lr = base * gamma^epoch`
#[derive(Debug, Clone, PartialEq)]
pub struct ExponentialDecay {
    progress: Progress,
    gamma: f64,
}

impl ExponentialDecay {
    pub fn new(learning_rate: f64, gamma: f64) -> Result<Self, GradStepError> {
        validate_base(learning_rate)?;
        validate_gamma(gamma)?;
        Ok(ExponentialDecay {
            progress: Progress::new(learning_rate),
            gamma,
        })
    }
}

impl LrSchedule for ExponentialDecay {
    fn current_value(&self) -> f64 {
        self.progress.last_lr
    }

    fn advance(&mut self) {
        self.progress.last_epoch += 1;
        self.progress.last_lr = self.progress.base_lr * self.gamma.powi(self.progress.last_epoch as i32);
    }

    fn state_dict(&self) -> ScheduleState {
        self.progress.state_dict()
    }

    fn set_state_dict(&mut self, state: &ScheduleState) -> Result<(), GradStepError> {
        self.progress.set_state_dict(state)
    }
}
