#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use crate::buffer::Buffer;
    use crate::error::GradStepError;
    use crate::optim::lr_schedule::{self, StepDecay};
    use crate::program::operation::{MomentumHyper, MomentumSlot, OpKind, Operation};
    use crate::program::{ExecutionMode, Program};
    use crate::tensor::{self, Tensor};
    use crate::types::DType;

    fn fill(out: &Tensor, value: f64) -> Operation {
        Operation::new("fill_constant", OpKind::Fill { out: out.clone(), value })
    }

    #[test]
    fn test_eager_sink_executes_immediately() -> Result<(), GradStepError> {
        let t = tensor::zeros(&[2], DType::F32)?;
        let mut sink = ExecutionMode::Eager.sink();
        sink.emit(fill(&t, 3.0))?;
        assert_eq!(t.to_f64_vec(), vec![3.0, 3.0]);

        let ops = sink.commit();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].op_type(), "fill_constant");
        Ok(())
    }

    #[test]
    fn test_plan_sink_defers_until_run() -> Result<(), GradStepError> {
        let program = Program::new();
        let t = tensor::zeros(&[2], DType::F32)?;
        let mode = ExecutionMode::Plan(&program);
        let mut sink = mode.sink();
        assert!(sink.is_plan());

        sink.emit_init(fill(&t, 1.0))?;
        sink.emit(Operation::new(
            "scale",
            OpKind::Scale { input: t.clone(), out: t.clone(), factor: 2.0 },
        ))?;
        assert_eq!(t.to_f64_vec(), vec![0.0, 0.0]);
        assert!(program.main_ops().is_empty(), "main ops are staged until commit");

        let committed = sink.commit();
        assert_eq!(committed.len(), 1);
        assert_eq!(program.startup_ops().len(), 1);

        program.run_startup()?;
        program.run()?;
        program.run()?;
        assert_eq!(t.to_f64_vec(), vec![4.0, 4.0]);
        Ok(())
    }

    #[test]
    fn test_plan_sink_rollback_truncates_startup() -> Result<(), GradStepError> {
        let program = Program::new();
        let t = tensor::zeros(&[1], DType::F32)?;
        program.append_startup(fill(&t, 5.0));

        let mut sink = ExecutionMode::Plan(&program).sink();
        sink.emit_init(fill(&t, 6.0))?;
        sink.emit(fill(&t, 7.0))?;
        sink.rollback();

        assert_eq!(program.startup_len(), 1);
        assert!(program.main_ops().is_empty());
        Ok(())
    }

    #[test]
    fn test_run_refreshes_bound_schedule() -> Result<(), GradStepError> {
        let program = Program::new();
        let schedule = lr_schedule::shared(StepDecay::new(0.1, 1, 0.5)?);
        let lr = tensor::scalar(0.1, DType::F32)?;
        program.bind_lr_schedule(&lr, &schedule);

        lr_schedule::write_schedule(&schedule).advance();
        program.run()?;
        assert_relative_eq!(lr.item()?, 0.05, epsilon = 1e-7);
        Ok(())
    }

    #[test]
    fn test_momentum_op_with_master_weight() -> Result<(), GradStepError> {
        let param = Tensor::from_f64_values(&[1.0, 1.0], vec![2], DType::F16)?;
        let master = Tensor::new(vec![1.0, 1.0], vec![2])?;
        let slot = MomentumSlot {
            param: param.clone(),
            grad: Tensor::new(vec![1.0, 2.0], vec![2])?,
            velocity: tensor::zeros(&[2], DType::F32)?,
            lr: tensor::scalar(0.5, DType::F32)?,
            master: Some(master.clone()),
        };
        let op = Operation::new(
            "momentum",
            OpKind::MomentumUpdate {
                slot: slot.clone(),
                hyper: MomentumHyper { mu: 0.9, use_nesterov: false },
            },
        )
        .with_target("w");
        op.execute()?;

        assert_eq!(op.target(), Some("w"));
        assert_eq!(master.to_f64_vec(), vec![0.5, 0.0]);
        assert_eq!(param.to_f64_vec(), vec![0.5, 0.0]);
        assert_eq!(param.dtype(), DType::F16);
        assert_eq!(slot.velocity.to_f64_vec(), vec![1.0, 2.0]);
        Ok(())
    }

    #[test]
    fn test_assign_op_restores_payload() -> Result<(), GradStepError> {
        let t = tensor::zeros(&[3], DType::F64)?;
        let op = Operation::new(
            "assign",
            OpKind::Assign { out: t.clone(), payload: Buffer::F64(vec![1.0, 2.0, 3.0]) },
        );
        op.execute()?;
        assert_eq!(t.to_f64_vec(), vec![1.0, 2.0, 3.0]);
        Ok(())
    }
}
