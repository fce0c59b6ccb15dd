#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use half::f16;

    use crate::error::GradStepError;
    use crate::nn::parameter::Parameter;
    use crate::optim::master_weight::{MasterWeightManager, MASTER_DTYPE};
    use crate::optim::state::TensorPayload;
    use crate::program::{ExecutionMode, Program};
    use crate::tensor::Tensor;
    use crate::types::DType;

    fn half_param(name: &str, values: Vec<f32>) -> Parameter {
        let n = values.len();
        let value = Tensor::new(values, vec![n]).unwrap().cast(DType::F16).unwrap();
        Parameter::new(name, value)
    }

    #[test]
    fn test_master_is_derived_from_initial_value() -> Result<(), GradStepError> {
        let p = half_param("w", vec![0.1, 0.2, 0.3]);
        // The live value drifts away from the initial one before the master exists.
        p.tensor()?.assign_values_(&[9.0, 9.0, 9.0])?;

        let mut masters = MasterWeightManager::new();
        let mut sink = ExecutionMode::Eager.sink();
        let master = masters.get_or_create_master_weight(&p, sink.as_mut())?;

        assert_eq!(master.dtype(), MASTER_DTYPE);
        let expected: Vec<f64> = [0.1, 0.2, 0.3].iter().map(|v| f16::from_f64(*v).to_f64()).collect();
        assert_eq!(master.to_f64_vec(), expected);
        assert_eq!(master.name().as_deref(), Some("w_fp32_master_0"));
        assert!(master.persistable());
        Ok(())
    }

    #[test]
    fn test_master_is_unique_per_parameter() -> Result<(), GradStepError> {
        let p = half_param("w", vec![1.0]);
        let mut masters = MasterWeightManager::new();
        let mut sink = ExecutionMode::Eager.sink();
        let first = masters.get_or_create_master_weight(&p, sink.as_mut())?;
        let second = masters.get_or_create_master_weight(&p, sink.as_mut())?;
        assert!(first.ptr_eq(&second));
        assert_eq!(masters.len(), 1);
        assert!(masters.master_weight("w").expect("registered").ptr_eq(&first));
        Ok(())
    }

    #[test]
    fn test_plan_mode_records_init_op() -> Result<(), GradStepError> {
        let program = Program::new();
        let p = half_param("w", vec![1.0, 2.0]);
        let mut masters = MasterWeightManager::new();
        let mut sink = ExecutionMode::Plan(&program).sink();
        masters.get_or_create_master_weight(&p, sink.as_mut())?;

        let startup = program.startup_ops();
        assert_eq!(startup.len(), 1);
        assert_eq!(startup[0].op_type(), "cast");
        assert_eq!(startup[0].target(), Some("w_fp32_master_0"));
        Ok(())
    }

    #[test]
    fn test_uninitialized_parameter_has_no_master() {
        let p = Parameter::uninitialized("late", &[2], DType::F16);
        let mut masters = MasterWeightManager::new();
        let mut sink = ExecutionMode::Eager.sink();
        assert_eq!(
            masters.get_or_create_master_weight(&p, sink.as_mut()).unwrap_err(),
            GradStepError::ParameterNotInitialized { name: "late".to_string() }
        );
    }

    #[test]
    fn test_master_grad_is_step_scoped() -> Result<(), GradStepError> {
        let p = half_param("w", vec![1.0, 2.0]);
        let grad = Tensor::new(vec![0.5, 0.25], vec![2])?.cast(DType::F16)?;
        let mut masters = MasterWeightManager::new();
        let mut sink = ExecutionMode::Eager.sink();

        masters.begin_pass();
        let first = masters.get_or_create_master_grad(&p, &grad, sink.as_mut())?;
        let again = masters.get_or_create_master_grad(&p, &grad, sink.as_mut())?;
        assert!(first.ptr_eq(&again));
        assert_eq!(first.dtype(), DType::F32);
        assert_eq!(first.to_f64_vec(), vec![0.5, 0.25]);
        assert_eq!(first.name().as_deref(), Some("w@GRAD_fp32_master"));
        masters.commit_pass();

        masters.begin_pass();
        let next_step = masters.get_or_create_master_grad(&p, &grad, sink.as_mut())?;
        assert!(!next_step.ptr_eq(&first));
        Ok(())
    }

    #[test]
    fn test_master_grad_keys_differ_by_mode() -> Result<(), GradStepError> {
        let p = half_param("w", vec![1.0]);
        let g1 = Tensor::new(vec![1.0], vec![1])?.cast(DType::F16)?;
        let g2 = Tensor::new(vec![2.0], vec![1])?.cast(DType::F16)?;

        // Eager: both unnamed grads map to "w@GRAD".
        let mut masters = MasterWeightManager::new();
        let mut eager = ExecutionMode::Eager.sink();
        let a = masters.get_or_create_master_grad(&p, &g1, eager.as_mut())?;
        let b = masters.get_or_create_master_grad(&p, &g2, eager.as_mut())?;
        assert!(a.ptr_eq(&b));

        // Plan: keyed by the gradient tensor itself.
        let program = Program::new();
        let mut masters = MasterWeightManager::new();
        let mut plan = ExecutionMode::Plan(&program).sink();
        let a = masters.get_or_create_master_grad(&p, &g1, plan.as_mut())?;
        let b = masters.get_or_create_master_grad(&p, &g2, plan.as_mut())?;
        assert!(!a.ptr_eq(&b));
        Ok(())
    }

    #[test]
    fn test_rollback_forgets_masters_of_the_pass() -> Result<(), GradStepError> {
        let program = Program::new();
        let p = half_param("w", vec![1.0]);
        let mut masters = MasterWeightManager::new();
        let mut sink = ExecutionMode::Plan(&program).sink();

        masters.begin_pass();
        masters.get_or_create_master_weight(&p, sink.as_mut())?;
        masters.rollback_pass();
        assert!(masters.master_weight("w").is_none());
        assert!(masters.is_empty());
        Ok(())
    }

    #[test]
    fn test_restore_before_creation_uses_checkpoint() -> Result<(), GradStepError> {
        let p = half_param("w", vec![1.0, 2.0]);
        let saved = Tensor::new(vec![1.5, 2.5], vec![2])?;
        let mut state = BTreeMap::new();
        state.insert("w".to_string(), TensorPayload::from_tensor(&saved));

        let mut masters = MasterWeightManager::new();
        masters.restore(state)?;
        let program = Program::new();
        let mut sink = ExecutionMode::Plan(&program).sink();
        let master = masters.get_or_create_master_weight(&p, sink.as_mut())?;

        assert_eq!(master.to_f64_vec(), vec![1.5, 2.5]);
        assert_eq!(program.startup_ops()[0].op_type(), "assign");
        Ok(())
    }

    #[test]
    fn test_restore_overwrites_existing_master() -> Result<(), GradStepError> {
        let p = half_param("w", vec![1.0, 2.0]);
        let mut masters = MasterWeightManager::new();
        let mut sink = ExecutionMode::Eager.sink();
        let master = masters.get_or_create_master_weight(&p, sink.as_mut())?;

        let exported = masters.export();
        master.fill_(7.0)?;
        masters.restore(exported)?;
        assert_eq!(master.to_f64_vec(), vec![1.0, 2.0]);
        Ok(())
    }

    #[test]
    fn test_restore_with_bad_shape_changes_nothing() -> Result<(), GradStepError> {
        let a = half_param("a", vec![1.0, 2.0]);
        let b = half_param("b", vec![3.0, 4.0]);
        let mut masters = MasterWeightManager::new();
        let mut sink = ExecutionMode::Eager.sink();
        let ma = masters.get_or_create_master_weight(&a, sink.as_mut())?;
        masters.get_or_create_master_weight(&b, sink.as_mut())?;

        let mut state = masters.export();
        state.insert("a".to_string(), TensorPayload::from_tensor(&Tensor::new(vec![9.0, 9.0], vec![2])?));
        state.insert("b".to_string(), TensorPayload::from_tensor(&Tensor::new(vec![9.0; 3], vec![3])?));
        let err = masters.restore(state).unwrap_err();
        assert!(matches!(err, GradStepError::ShapeMismatch { .. }));
        assert_eq!(ma.to_f64_vec(), vec![1.0, 2.0]);
        Ok(())
    }
}
