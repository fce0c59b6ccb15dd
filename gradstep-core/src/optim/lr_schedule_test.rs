#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use crate::error::GradStepError;
    use crate::optim::lr_schedule::{
        self, ExponentialDecay, LrSchedule, MultiStepDecay, ScheduleState, StepDecay,
    };

    #[test]
    fn test_step_decay() -> Result<(), GradStepError> {
        let mut s = StepDecay::new(0.5, 2, 0.1)?;
        let mut seen = vec![s.current_value()];
        for _ in 0..4 {
            s.advance();
            seen.push(s.current_value());
        }
        let expected = [0.5, 0.5, 0.05, 0.05, 0.005];
        for (got, want) in seen.iter().zip(expected.iter()) {
            assert_relative_eq!(*got, *want, epsilon = 1e-12);
        }
        Ok(())
    }

    #[test]
    fn test_multi_step_decay() -> Result<(), GradStepError> {
        let mut s = MultiStepDecay::new(1.0, vec![2, 4], 0.5)?;
        let mut values = Vec::new();
        for _ in 0..5 {
            s.advance();
            values.push(s.current_value());
        }
        assert_eq!(values, vec![1.0, 0.5, 0.5, 0.25, 0.25]);
        Ok(())
    }

    #[test]
    fn test_exponential_decay() -> Result<(), GradStepError> {
        let mut s = ExponentialDecay::new(2.0, 0.5)?;
        s.advance();
        s.advance();
        assert_relative_eq!(s.current_value(), 0.5);
        Ok(())
    }

    #[test]
    fn test_invalid_construction() {
        assert!(matches!(
            StepDecay::new(0.1, 0, 0.5),
            Err(GradStepError::ConfigurationError(_))
        ));
        assert!(matches!(
            MultiStepDecay::new(0.1, vec![3, 2], 0.5),
            Err(GradStepError::ConfigurationError(_))
        ));
        assert!(matches!(
            ExponentialDecay::new(0.1, 1.5),
            Err(GradStepError::ConfigurationError(_))
        ));
        assert!(matches!(
            ExponentialDecay::new(f64::NAN, 0.5),
            Err(GradStepError::ConfigurationError(_))
        ));
    }

    #[test]
    fn test_state_round_trip() -> Result<(), GradStepError> {
        let mut a = StepDecay::new(0.1, 1, 0.5)?;
        a.advance();
        a.advance();
        let state = a.state_dict();
        assert_eq!(state.get("last_epoch"), Some(&2.0));

        let mut b = StepDecay::new(0.1, 1, 0.5)?;
        b.set_state_dict(&state)?;
        assert_eq!(a, b);

        b.advance();
        a.advance();
        assert_eq!(a.current_value(), b.current_value());
        Ok(())
    }

    #[test]
    fn test_state_missing_key() -> Result<(), GradStepError> {
        let mut s = ExponentialDecay::new(0.1, 0.9)?;
        let mut state = ScheduleState::new();
        state.insert("last_epoch".to_string(), 1.0);
        assert_eq!(
            s.set_state_dict(&state),
            Err(GradStepError::StateKeyMissing {
                key: "last_lr".to_string()
            })
        );
        Ok(())
    }

    #[test]
    fn test_shared_handle_sees_advances() -> Result<(), GradStepError> {
        let shared = lr_schedule::shared(ExponentialDecay::new(1.0, 0.5)?);
        let alias = shared.clone();
        lr_schedule::write_schedule(&alias).advance();
        assert_relative_eq!(lr_schedule::read_schedule(&shared).current_value(), 0.5);
        Ok(())
    }
}
