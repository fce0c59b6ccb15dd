#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use crate::buffer::Buffer;
    use crate::error::GradStepError;
    use crate::optim::lr_schedule::ScheduleState;
    use crate::optim::state::{
        OptimizerState, StateEntry, TensorPayload, LR_SCHEDULER_KEY, MASTER_WEIGHTS_KEY,
    };
    use crate::tensor::Tensor;

    fn payload(values: Vec<f32>) -> TensorPayload {
        let n = values.len();
        TensorPayload {
            shape: vec![n],
            buffer: Buffer::F32(values),
        }
    }

    #[test]
    fn test_payload_round_trip() -> Result<(), GradStepError> {
        let t = Tensor::new(vec![1.0, 2.0, 3.0, 4.0], vec![2, 2])?;
        let p = TensorPayload::from_tensor(&t);
        assert_eq!(p.shape, vec![2, 2]);
        let back = p.to_tensor()?;
        assert!(!back.ptr_eq(&t));
        assert_eq!(back.to_f64_vec(), t.to_f64_vec());
        assert_eq!(back.shape(), t.shape());
        Ok(())
    }

    #[test]
    fn test_check_shape() {
        let p = payload(vec![1.0, 2.0]);
        assert!(p.check_shape(&[2], "k").is_ok());
        assert!(matches!(
            p.check_shape(&[1, 2], "k"),
            Err(GradStepError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_reserved_entries_are_split_out() -> Result<(), GradStepError> {
        let mut schedule = ScheduleState::new();
        schedule.insert("last_epoch".to_string(), 3.0);
        let mut masters = BTreeMap::new();
        masters.insert("w".to_string(), payload(vec![0.5]));

        let mut state = OptimizerState::new();
        state.insert("w_momentum_0", StateEntry::Tensor(payload(vec![1.0])));
        state.insert(LR_SCHEDULER_KEY, StateEntry::LrScheduler(schedule.clone()));
        state.insert(MASTER_WEIGHTS_KEY, StateEntry::MasterWeights(masters.clone()));
        assert_eq!(state.len(), 3);

        let accumulators = state.accumulators()?;
        assert_eq!(accumulators.keys().collect::<Vec<_>>(), vec!["w_momentum_0"]);
        assert_eq!(state.lr_scheduler(), Some(&schedule));
        assert_eq!(state.master_weights(), Some(&masters));
        Ok(())
    }

    #[test]
    fn test_misplaced_entry_is_rejected() {
        let mut state = OptimizerState::new();
        state.insert("w_momentum_0", StateEntry::LrScheduler(ScheduleState::new()));
        assert!(matches!(
            state.accumulators(),
            Err(GradStepError::ConfigurationError(_))
        ));
    }

    #[test]
    fn test_map_operations() {
        let mut state = OptimizerState::new();
        assert!(state.is_empty());
        assert!(state.lr_scheduler().is_none());
        state.insert("a", StateEntry::Tensor(payload(vec![1.0])));
        assert!(state.contains_key("a"));
        assert!(state.get("a").is_some());
        assert_eq!(state.keys().count(), 1);
        assert!(state.remove("a").is_some());
        assert!(state.is_empty());
    }
}
