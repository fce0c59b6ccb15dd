#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use crate::error::GradStepError;
    use crate::nn::parameter::Parameter;
    use crate::optim::accumulator::AccumulatorStore;
    use crate::optim::master_weight::MasterWeightManager;
    use crate::optim::sgd::Sgd;
    use crate::optim::update_rule::{UpdateContext, UpdateItem, UpdateRule};
    use crate::program::{ExecutionMode, Program};
    use crate::tensor::{self, Tensor};
    use crate::types::DType;

    fn item(param: &Parameter, grad: Vec<f32>, lr: f64) -> Result<UpdateItem, GradStepError> {
        let n = grad.len();
        Ok(UpdateItem {
            param: param.clone(),
            grad: Tensor::new(grad, vec![n])?.cast(param.dtype())?,
            lr: tensor::scalar(lr, DType::F32)?,
        })
    }

    #[test]
    fn test_sgd_step() -> Result<(), GradStepError> {
        let p = Parameter::new("w", Tensor::new(vec![1.0, 2.0], vec![2])?);
        let mut accumulators = AccumulatorStore::new(None);
        let mut masters = MasterWeightManager::new();
        let mut sink = ExecutionMode::Eager.sink();
        let mut ctx = UpdateContext::new(&mut accumulators, &mut masters, sink.as_mut(), false);

        let sgd = Sgd::new();
        sgd.create_accumulators(&mut ctx, &[p.clone()])?;
        sgd.append_update(&mut ctx, &item(&p, vec![1.0, -1.0], 0.5)?)?;

        let values = p.tensor()?.to_f64_vec();
        assert_relative_eq!(values[0], 0.5);
        assert_relative_eq!(values[1], 2.5);
        assert!(accumulators.is_empty(), "plain sgd keeps no state");
        Ok(())
    }

    #[test]
    fn test_sgd_records_named_op_in_plan() -> Result<(), GradStepError> {
        let program = Program::new();
        let p = Parameter::new("w", Tensor::new(vec![1.0], vec![1])?);
        let mut accumulators = AccumulatorStore::new(None);
        let mut masters = MasterWeightManager::new();
        let mut sink = ExecutionMode::Plan(&program).sink();
        {
            let mut ctx = UpdateContext::new(&mut accumulators, &mut masters, sink.as_mut(), false);
            Sgd.append_update(&mut ctx, &item(&p, vec![1.0], 0.1)?)?;
        }
        let ops = sink.commit();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].op_type(), "sgd");
        assert_eq!(ops[0].target(), Some("w"));
        assert_eq!(p.tensor()?.to_f64_vec(), vec![1.0], "nothing runs before the program");

        program.run()?;
        assert_relative_eq!(p.tensor()?.to_f64_vec()[0], 0.9, epsilon = 1e-6);
        Ok(())
    }

    #[test]
    fn test_sgd_updates_through_master_weight() -> Result<(), GradStepError> {
        let value = Tensor::new(vec![1.0, 1.0], vec![2])?.cast(DType::F16)?;
        let p = Parameter::new("w", value);
        let mut accumulators = AccumulatorStore::new(None);
        let mut masters = MasterWeightManager::new();
        let mut sink = ExecutionMode::Eager.sink();
        {
            let mut ctx = UpdateContext::new(&mut accumulators, &mut masters, sink.as_mut(), true);
            Sgd.create_accumulators(&mut ctx, &[p.clone()])?;
            // 1e-4 steps vanish in f16 around 1.0 but survive in the f32 master.
            for _ in 0..10 {
                Sgd.append_update(&mut ctx, &item(&p, vec![1.0, 1.0], 1e-4)?)?;
            }
        }

        let master = masters.master_weight("w").expect("master created");
        assert_eq!(master.dtype(), DType::F32);
        assert_relative_eq!(master.to_f64_vec()[0], 0.999, epsilon = 1e-5);
        assert_eq!(p.dtype(), DType::F16);
        assert_relative_eq!(p.tensor()?.to_f64_vec()[0], 0.999, epsilon = 1e-3);
        Ok(())
    }
}
