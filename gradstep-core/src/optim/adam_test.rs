#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use approx::assert_relative_eq;

    use crate::error::GradStepError;
    use crate::nn::parameter::Parameter;
    use crate::optim::accumulator::AccumulatorStore;
    use crate::optim::adam::{Adam, BETA1_POW_ACC, BETA2_POW_ACC, MOMENT1_ACC, MOMENT2_ACC};
    use crate::optim::master_weight::MasterWeightManager;
    use crate::optim::update_rule::{UpdateContext, UpdateItem, UpdateRule};
    use crate::program::ExecutionMode;
    use crate::tensor::{self, Tensor};
    use crate::types::DType;

    fn ones_item(param: &Parameter, lr: f64) -> Result<UpdateItem, GradStepError> {
        Ok(UpdateItem {
            param: param.clone(),
            grad: tensor::full(&param.shape(), param.dtype(), 1.0)?,
            lr: tensor::scalar(lr, DType::F32)?,
        })
    }

    #[test]
    fn test_adam_creates_four_accumulators() -> Result<(), GradStepError> {
        let p = Parameter::new("w", Tensor::new_f64(vec![0.0; 4], vec![2, 2])?);
        let mut accumulators = AccumulatorStore::new(None);
        let mut masters = MasterWeightManager::new();
        let mut sink = ExecutionMode::Eager.sink();
        let mut ctx = UpdateContext::new(&mut accumulators, &mut masters, sink.as_mut(), false);
        Adam::default().create_accumulators(&mut ctx, &[p.clone()])?;

        let m1 = ctx.accumulator(MOMENT1_ACC, &p)?;
        assert_eq!(m1.shape(), vec![2, 2]);
        assert_eq!(m1.dtype(), DType::F64);
        let b1 = ctx.accumulator(BETA1_POW_ACC, &p)?;
        assert_eq!(b1.shape(), vec![1]);
        assert_eq!(b1.to_f64_vec(), vec![0.9]);
        let b2 = ctx.accumulator(BETA2_POW_ACC, &p)?;
        assert_eq!(b2.to_f64_vec(), vec![0.999]);
        assert!(ctx.accumulator(MOMENT2_ACC, &p).is_ok());
        assert_eq!(accumulators.len(), 4);
        Ok(())
    }

    #[test]
    fn test_adam_first_step_moves_by_lr() -> Result<(), GradStepError> {
        let p = Parameter::new("w", Tensor::new_f64(vec![1.0, -1.0], vec![2])?);
        let mut accumulators = AccumulatorStore::new(None);
        let mut masters = MasterWeightManager::new();
        let mut sink = ExecutionMode::Eager.sink();
        let mut ctx = UpdateContext::new(&mut accumulators, &mut masters, sink.as_mut(), false);
        let adam = Adam::default();
        adam.create_accumulators(&mut ctx, &[p.clone()])?;
        adam.append_update(&mut ctx, &ones_item(&p, 0.01)?)?;

        // With bias correction the first step is lr * g / |g|.
        let values = p.tensor()?.to_f64_vec();
        assert_relative_eq!(values[0], 0.99, epsilon = 1e-6);
        assert_relative_eq!(values[1], -1.01, epsilon = 1e-6);
        assert_relative_eq!(ctx.accumulator(MOMENT1_ACC, &p)?.to_f64_vec()[0], 0.1, epsilon = 1e-12);
        assert_relative_eq!(ctx.accumulator(MOMENT2_ACC, &p)?.to_f64_vec()[0], 0.001, epsilon = 1e-12);
        assert_relative_eq!(ctx.accumulator(BETA1_POW_ACC, &p)?.item()?, 0.81, epsilon = 1e-12);
        assert_relative_eq!(ctx.accumulator(BETA2_POW_ACC, &p)?.item()?, 0.998001, epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn test_pow_accumulators_use_scalar_dtype() -> Result<(), GradStepError> {
        let p = Parameter::new("h", tensor::zeros(&[2], DType::F16)?);
        let mut accumulators = AccumulatorStore::new(None);
        let mut masters = MasterWeightManager::new();
        let mut sink = ExecutionMode::Eager.sink();
        let mut ctx = UpdateContext::new(&mut accumulators, &mut masters, sink.as_mut(), false);
        Adam::default().create_accumulators(&mut ctx, &[p.clone()])?;

        assert_eq!(ctx.accumulator(MOMENT1_ACC, &p)?.dtype(), DType::F16);
        assert_eq!(ctx.accumulator(BETA1_POW_ACC, &p)?.dtype(), DType::F32);
        Ok(())
    }

    #[test]
    fn test_invalid_hyperparameters() {
        assert!(matches!(Adam::new(1.0, 0.999, 1e-8), Err(GradStepError::ConfigurationError(_))));
        assert!(matches!(Adam::new(0.9, -0.1, 1e-8), Err(GradStepError::ConfigurationError(_))));
        assert!(matches!(Adam::new(0.9, 0.999, 0.0), Err(GradStepError::ConfigurationError(_))));
        assert!(Adam::new(0.0, 0.0, 1e-6).is_ok());
    }

    #[test]
    fn test_group_extra_changes_betas() -> Result<(), GradStepError> {
        let mut adam = Adam::new(0.9, 0.999, 1e-8)?;
        let mut extra = BTreeMap::new();
        extra.insert("beta1".to_string(), 0.5);
        adam.update_param_group(&extra);
        assert_eq!(adam.hyper().beta1, 0.5);
        assert_eq!(adam.hyper().beta2, 0.999);

        adam.update_param_group(&BTreeMap::new());
        assert_eq!(adam.hyper().beta1, 0.9);
        Ok(())
    }
}
