#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use crate::error::GradStepError;
    use crate::optim::lr_resolver::{LearningRate, LrResolver, PARAM_LR_SCOPE};
    use crate::optim::lr_schedule::{self, write_schedule, StepDecay};
    use crate::program::{ContextKey, ExecutionMode, Program};

    #[test]
    fn test_resolve_is_cached_per_context() -> Result<(), GradStepError> {
        let mut resolver = LrResolver::new(LearningRate::Constant(0.1))?;
        let mut sink = ExecutionMode::Eager.sink();
        let first = resolver.resolve(sink.as_mut())?;
        let second = resolver.resolve(sink.as_mut())?;

        assert!(first.ptr_eq(&second));
        assert_eq!(first.shape(), Vec::<usize>::new());
        assert!(first.persistable());
        assert_relative_eq!(first.item()?, 0.1, epsilon = 1e-7);
        assert!(resolver.lookup(ContextKey::Eager).expect("cached").ptr_eq(&first));
        Ok(())
    }

    #[test]
    fn test_each_program_gets_its_own_tensor() -> Result<(), GradStepError> {
        let mut resolver = LrResolver::new(LearningRate::Constant(0.1))?;
        let p1 = Program::new();
        let p2 = Program::new();

        let mut s1 = ExecutionMode::Plan(&p1).sink();
        let a = resolver.resolve(s1.as_mut())?;
        let again = resolver.resolve(s1.as_mut())?;
        let mut s2 = ExecutionMode::Plan(&p2).sink();
        let b = resolver.resolve(s2.as_mut())?;

        assert!(a.ptr_eq(&again));
        assert!(!a.ptr_eq(&b));
        assert_eq!(p1.startup_len(), 1, "one fill per context");
        assert_eq!(p2.startup_len(), 1);
        Ok(())
    }

    #[test]
    fn test_set_value_rewrites_in_place() -> Result<(), GradStepError> {
        let mut resolver = LrResolver::new(0.1.into())?;
        let mut sink = ExecutionMode::Eager.sink();
        let lr = resolver.resolve(sink.as_mut())?;

        resolver.set_value(0.25)?;
        assert_relative_eq!(lr.item()?, 0.25);
        assert!(resolver.resolve(sink.as_mut())?.ptr_eq(&lr));
        assert!(resolver.set_value(f64::NAN).is_err());
        Ok(())
    }

    #[test]
    fn test_schedule_conflicts_with_manual_value() -> Result<(), GradStepError> {
        let schedule = lr_schedule::shared(StepDecay::new(1.0, 1, 0.5)?);
        let mut resolver = LrResolver::new(LearningRate::Schedule(schedule.clone()))?;
        assert!(resolver.is_scheduled());
        assert_eq!(resolver.set_value(0.3), Err(GradStepError::LrScheduleConflict));

        let mut sink = ExecutionMode::Eager.sink();
        let lr = resolver.resolve(sink.as_mut())?;
        assert_relative_eq!(lr.item()?, 1.0);

        write_schedule(&schedule).advance();
        let same = resolver.resolve(sink.as_mut())?;
        assert!(same.ptr_eq(&lr));
        assert_relative_eq!(lr.item()?, 0.5);
        Ok(())
    }

    #[test]
    fn test_switching_to_schedule_syncs_tensors() -> Result<(), GradStepError> {
        let mut resolver = LrResolver::new(0.1.into())?;
        let mut sink = ExecutionMode::Eager.sink();
        let lr = resolver.resolve(sink.as_mut())?;

        resolver.set_schedule(lr_schedule::shared(StepDecay::new(0.4, 2, 0.5)?))?;
        assert_relative_eq!(lr.item()?, 0.4, epsilon = 1e-7);
        assert_relative_eq!(resolver.current_value(), 0.4);
        Ok(())
    }

    #[test]
    fn test_per_parameter_rate() -> Result<(), GradStepError> {
        let mut resolver = LrResolver::new(0.1.into())?;
        let mut sink = ExecutionMode::Eager.sink();
        let global = resolver.resolve(sink.as_mut())?;
        sink.commit();

        let shared = resolver.per_parameter_rate(&global, 1.0, "w", sink.as_mut())?;
        assert!(shared.ptr_eq(&global));
        assert!(sink.commit().is_empty());

        let scaled = resolver.per_parameter_rate(&global, 0.5, "w", sink.as_mut())?;
        assert!(!scaled.ptr_eq(&global));
        assert_relative_eq!(scaled.item()?, 0.05, epsilon = 1e-7);
        let ops = sink.commit();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].scope(), Some(PARAM_LR_SCOPE));
        assert_eq!(ops[0].target(), Some("w"));
        Ok(())
    }

    #[test]
    fn test_invalid_constant_is_rejected() {
        for bad in [-0.1, f64::NAN, f64::INFINITY] {
            assert!(matches!(
                LrResolver::new(LearningRate::Constant(bad)),
                Err(GradStepError::ConfigurationError(_))
            ));
        }
    }

    #[test]
    fn test_rollback_forgets_materialization() -> Result<(), GradStepError> {
        let program = Program::new();
        let mode = ExecutionMode::Plan(&program);
        let mut resolver = LrResolver::new(0.1.into())?;

        resolver.begin_pass();
        let mut sink = mode.sink();
        resolver.resolve(sink.as_mut())?;
        resolver.rollback_pass();
        sink.rollback();

        assert!(resolver.lookup(mode.context_key()).is_none());
        assert_eq!(program.startup_len(), 0);
        Ok(())
    }

    #[test]
    fn test_set_schedule_binds_recorded_programs() -> Result<(), GradStepError> {
        let program = Program::new();
        let mut resolver = LrResolver::new(1.0.into())?;
        let mut sink = ExecutionMode::Plan(&program).sink();
        let lr = resolver.resolve(sink.as_mut())?;
        sink.commit();
        assert_eq!(program.lr_binding_count(), 0);

        let schedule = lr_schedule::shared(StepDecay::new(1.0, 1, 0.5)?);
        resolver.set_schedule(schedule.clone())?;
        assert_eq!(program.lr_binding_count(), 1);

        write_schedule(&schedule).advance();
        program.run()?;
        assert_relative_eq!(lr.item()?, 0.5, epsilon = 1e-7);
        Ok(())
    }

    #[test]
    fn test_rollback_drops_schedule_binding() -> Result<(), GradStepError> {
        let program = Program::new();
        let schedule = lr_schedule::shared(StepDecay::new(1.0, 1, 0.5)?);
        let mut resolver = LrResolver::new(schedule.into())?;

        resolver.begin_pass();
        let mut sink = ExecutionMode::Plan(&program).sink();
        resolver.resolve(sink.as_mut())?;
        assert_eq!(program.lr_binding_count(), 1);
        resolver.rollback_pass();
        sink.rollback();

        assert_eq!(program.lr_binding_count(), 0);
        Ok(())
    }
}
