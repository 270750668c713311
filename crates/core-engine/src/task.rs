//! Work items flowing through the two queues.
//!
//! Queue one carries [`PartitionTask`]s between pre-analysis workers; queue
//! two carries compressed patterns with their chunks to the bias workers.
//! Both use an explicit `Stop` variant as the poison pill: a worker that
//! observes it re-posts it and exits, so one sentinel drains a whole pool.

use crate::pattern::ActivationPattern;
use core_expr::{Formula, OneHotN, Variable};
use std::collections::{BTreeMap, BTreeSet};

/// Box of the real-valued uncontroversial features, in name order.
pub type Ranges = BTreeMap<Variable, (f64, f64)>;

/// Accumulated coarsening of one one-hot group: the indicator variables kept
/// together, and the disjunction of their one-hot cases.
#[derive(Clone, Debug)]
pub struct GroupAssumption {
    pub vars: BTreeSet<Variable>,
    pub cases: Formula,
}

/// A region of input space recorded under its activation pattern.
#[derive(Clone, Debug)]
pub struct Chunk {
    pub assumptions: Vec<GroupAssumption>,
    /// Raw one-hot combinations covered by this pack; empty before any
    /// one-hot split has happened.
    pub unpacked: Vec<OneHotN>,
    pub ranges: Ranges,
    /// Share of the whole input space, in percent.
    pub percent: f64,
}

impl Chunk {
    pub fn label(&self) -> String {
        partition_label(&self.assumptions, &self.ranges)
    }
}

#[derive(Clone, Debug)]
pub struct PartitionTask {
    pub assumptions: Vec<GroupAssumption>,
    /// 0 before the one-hot split, the group count after it.
    pub pivot1: usize,
    pub unpacked: Vec<OneHotN>,
    pub ranges: Ranges,
    /// Round-robin cursor over the real features.
    pub pivot2: usize,
    /// Real features still wide enough to bisect.
    pub splittable: Vec<Variable>,
    pub percent: f64,
    /// Forced activation sets carried over from packing, when known.
    pub key: Option<ActivationPattern>,
}

impl PartitionTask {
    /// The whole input space, nothing split yet.
    pub fn seed(real_features: &[Variable]) -> Self {
        Self {
            assumptions: Vec::new(),
            pivot1: 0,
            unpacked: Vec::new(),
            ranges: real_features
                .iter()
                .map(|var| (var.clone(), (0.0, 1.0)))
                .collect(),
            pivot2: 0,
            splittable: real_features.to_vec(),
            percent: 100.0,
            key: None,
        }
    }

    pub fn label(&self) -> String {
        partition_label(&self.assumptions, &self.ranges)
    }
}

#[derive(Clone, Debug)]
pub enum Task {
    Partition(PartitionTask),
    Stop,
}

/// Queue-two item: one compressed pattern and the chunks it covers.
#[derive(Clone, Debug)]
pub enum PatternJob {
    Pattern {
        index: usize,
        pattern: ActivationPattern,
        chunks: Vec<Chunk>,
    },
    Stop,
}

fn partition_label(assumptions: &[GroupAssumption], ranges: &Ranges) -> String {
    let hot: Vec<String> = assumptions
        .iter()
        .map(|group| {
            group
                .vars
                .iter()
                .map(Variable::name)
                .collect::<Vec<_>>()
                .join("|")
        })
        .collect();
    let boxes: Vec<String> = ranges
        .iter()
        .map(|(feature, (lower, upper))| format!("{feature} in [{lower}, {upper}]"))
        .collect();
    match (hot.is_empty(), boxes.is_empty()) {
        (true, true) => "entire input space".to_string(),
        (true, false) => format!("ranges: {}", boxes.join(", ")),
        (false, true) => format!("one-hot: {}", hot.join(", ")),
        (false, false) => format!("one-hot: {} | ranges: {}", hot.join(", "), boxes.join(", ")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_covers_everything() {
        let features = vec![Variable::new("x01"), Variable::new("x02")];
        let task = PartitionTask::seed(&features);
        assert_eq!(task.percent, 100.0);
        assert_eq!(task.pivot1, 0);
        assert_eq!(task.ranges[&features[0]], (0.0, 1.0));
        assert_eq!(task.splittable, features);
        assert!(task.key.is_none());
    }

    #[test]
    fn labels_name_both_refinement_axes() {
        let x = Variable::new("x01");
        let task = PartitionTask::seed(std::slice::from_ref(&x));
        assert_eq!(task.label(), "ranges: x01 in [0, 1]");
        assert_eq!(PartitionTask::seed(&[]).label(), "entire input space");
    }
}
