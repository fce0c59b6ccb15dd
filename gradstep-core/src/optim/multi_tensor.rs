use std::collections::hash_map::Entry;
use std::collections::HashMap;

use crate::nn::parameter::{ParamId, Parameter};
use crate::optim::update_rule::UpdateItem;

/// Precision class of a batched update. Reduced means F16 or BF16.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PrecisionBucket {
    Standard,
    Reduced,
}

impl PrecisionBucket {
    pub fn of(param: &Parameter) -> Self {
        if param.dtype().is_reduced_precision() {
            PrecisionBucket::Reduced
        } else {
            PrecisionBucket::Standard
        }
    }
}

/// A group's parameters split into the two precision buckets, in group order.
#[derive(Debug, Clone)]
pub struct Partition {
    fingerprint: Vec<ParamId>,
    pub standard: Vec<Parameter>,
    pub reduced: Vec<Parameter>,
}

impl Partition {
    fn build(params: &[Parameter]) -> Self {
        let (reduced, standard): (Vec<Parameter>, Vec<Parameter>) = params
            .iter()
            .cloned()
            .partition(|p| PrecisionBucket::of(p) == PrecisionBucket::Reduced);
        Partition {
            fingerprint: params.iter().map(Parameter::id).collect(),
            standard,
            reduced,
        }
    }

    fn position(&self) -> HashMap<ParamId, (PrecisionBucket, usize)> {
        let standard = self
            .standard
            .iter()
            .enumerate()
            .map(|(i, p)| (p.id(), (PrecisionBucket::Standard, i)));
        let reduced = self
            .reduced
            .iter()
            .enumerate()
            .map(|(i, p)| (p.id(), (PrecisionBucket::Reduced, i)));
        standard.chain(reduced).collect()
    }
}

/// Groups update items into one batch per precision bucket.
///
/// Partitions are cached per parameter group and recomputed only when the
/// group's parameter list changes.
#[derive(Debug, Default)]
pub struct MultiTensorBatcher {
    partitions: HashMap<usize, Partition>,
    builds: usize,
}

impl MultiTensorBatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Partition of group `group_idx`, rebuilt if `params` differ from the cached one.
    pub fn partition(&mut self, group_idx: usize, params: &[Parameter]) -> &Partition {
        let builds = &mut self.builds;
        let mut rebuild = || {
            log::debug!("Partitioning {} parameters of group {} by precision", params.len(), group_idx);
            *builds += 1;
            Partition::build(params)
        };
        match self.partitions.entry(group_idx) {
            Entry::Occupied(mut entry) => {
                let same = entry
                    .get()
                    .fingerprint
                    .iter()
                    .copied()
                    .eq(params.iter().map(Parameter::id));
                if !same {
                    entry.insert(rebuild());
                }
                entry.into_mut()
            }
            Entry::Vacant(entry) => entry.insert(rebuild()),
        }
    }

    /// How many partitions have been computed so far.
    pub fn builds(&self) -> usize {
        self.builds
    }

    /// Orders `items` into batches, standard bucket first.
    ///
    /// With a group the order follows its cached partition; items of
    /// parameters outside it, or calls without a group, keep their given order.
    pub fn batches(
        &mut self,
        group: Option<(usize, &[Parameter])>,
        items: Vec<UpdateItem>,
    ) -> Vec<(PrecisionBucket, Vec<UpdateItem>)> {
        let positions = match group {
            Some((idx, params)) => self.partition(idx, params).position(),
            None => HashMap::new(),
        };
        let mut standard: Vec<(usize, UpdateItem)> = Vec::new();
        let mut reduced: Vec<(usize, UpdateItem)> = Vec::new();
        for item in items {
            let (bucket, rank) = positions
                .get(&item.param.id())
                .copied()
                .unwrap_or((PrecisionBucket::of(&item.param), usize::MAX));
            let slot = (rank, item);
            match bucket {
                PrecisionBucket::Standard => standard.push(slot),
                PrecisionBucket::Reduced => reduced.push(slot),
            }
        }
        // Stable sort keeps arrival order among items without a cached rank.
        standard.sort_by_key(|(rank, _)| *rank);
        reduced.sort_by_key(|(rank, _)| *rank);

        [
            (PrecisionBucket::Standard, standard),
            (PrecisionBucket::Reduced, reduced),
        ]
        .into_iter()
        .filter(|(_, items)| !items.is_empty())
        .map(|(bucket, items)| (bucket, items.into_iter().map(|(_, item)| item).collect()))
        .collect()
    }
}
