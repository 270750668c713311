//! Pre-analysis worker: refines the input space into feasible chunks.
//!
//! Each worker loops on queue one. A popped partition is checked for
//! feasibility; a feasible chunk is recorded under its activation pattern,
//! an infeasible one is refined and re-queued. Refinement first splits the
//! one-hot encoded features (once, via packing), then bisects the real
//! features round-robin until every range is narrower than `difference`.
//! A chunk that cannot be refined further is abandoned: it counts toward
//! the explored share but never the feasible share.

use crate::counters::COMPLETE;
use crate::driver::Analysis;
use crate::pattern::{ActivationPattern, ActivationSets};
use crate::task::{Chunk, GroupAssumption, PartitionTask, Task};
use core_domain::BoxState;
use core_expr::{Formula, OneHotN};
use crossbeam_channel::{Receiver, Sender};
use std::collections::BTreeSet;
use tracing::{debug, info, info_span};

impl Analysis {
    pub(crate) fn worker1(&self, id: usize, queue: Receiver<Task>, feed: Sender<Task>) {
        let span = info_span!(target: "engine.worker1", "worker1", id);
        let _enter = span.enter();
        loop {
            match queue.recv() {
                Ok(Task::Partition(task)) => self.process_partition(id, task, &feed),
                Ok(Task::Stop) | Err(_) => {
                    let _ = feed.send(Task::Stop);
                    break;
                }
            }
        }
    }

    fn process_partition(&self, id: usize, task: PartitionTask, feed: &Sender<Task>) {
        debug!(
            target: "engine.worker1",
            worker = id,
            chunk = %task.label(),
            percent = task.percent,
            "partition_popped"
        );
        let mut entry = self.initial.forward.clone();
        entry.assume(&self.bounds);
        for (feature, (lower, upper)) in &task.ranges {
            entry.assume(&Formula::band(*lower, feature, *upper));
        }
        for assumption in &task.assumptions {
            entry.assume(&assumption.cases);
        }

        let verdict = self.feasibility(&entry, task.key.as_ref(), false);
        if verdict.feasible {
            self.record_chunk(id, task, verdict.patterns, feed);
        } else {
            debug!(
                target: "engine.worker1",
                worker = id,
                disjunctions = verdict.disjunctions,
                widening = self.widening,
                "too_many_disjunctions"
            );
            if task.pivot1 < self.uncontroversial1.len() {
                self.split_one_hot(&entry, &task, feed);
            } else if !self.uncontroversial2.is_empty() && !task.splittable.is_empty() {
                self.split_range(&task, feed);
            } else {
                // Nothing left to refine; the chunk is abandoned.
                let explored = self.shared.progress.add_explored(task.percent);
                if explored >= COMPLETE {
                    let _ = feed.send(Task::Stop);
                }
                info!(
                    target: "engine.worker1",
                    worker = id,
                    chunk = %task.label(),
                    percent = task.percent,
                    explored,
                    "refinement_exhausted"
                );
            }
        }
    }

    fn record_chunk(
        &self,
        id: usize,
        task: PartitionTask,
        pairs: Vec<ActivationSets>,
        feed: &Sender<Task>,
    ) {
        self.shared.progress.incr_partitions();
        let feasible = self.shared.progress.add_feasible(task.percent);
        let explored = self.shared.progress.add_explored(task.percent);
        let pattern = ActivationPattern::new(pairs);
        let chunk = Chunk {
            assumptions: task.assumptions,
            unpacked: task.unpacked,
            ranges: task.ranges,
            percent: task.percent,
        };
        {
            let mut patterns = self.shared.patterns.lock().expect("patterns mutex poisoned");
            patterns.entry(pattern).or_default().push(chunk);
        }
        if explored >= COMPLETE {
            let _ = feed.send(Task::Stop);
        }
        info!(
            target: "engine.worker1",
            worker = id,
            feasible,
            explored,
            "progress"
        );
    }

    /// Stage one refinement: split along the one-hot encoded features and
    /// re-queue one task per activation-pattern pack, best scored first.
    fn split_one_hot(&self, entry: &BoxState, task: &PartitionTask, feed: &Sender<Task>) {
        self.packing(entry);
        let mut ranked: Vec<(ActivationPattern, Vec<OneHotN>)> = {
            let packs = self.shared.packs.lock().expect("packs mutex poisoned");
            packs
                .iter()
                .map(|(key, pack)| (key.clone(), pack.clone()))
                .collect()
        };
        ranked.sort_by(|(key1, pack1), (key2, pack2)| {
            let score1 = key1.score() + pack1.len();
            let score2 = key2.score() + pack2.len();
            score2.cmp(&score1).then_with(|| key1.cmp(key2))
        });

        for (key, pack) in ranked {
            let mut assumptions = task.assumptions.clone();
            let features = pack[0].len();
            for position in 0..features {
                let mut vars = BTreeSet::new();
                let mut cases: Option<Formula> = None;
                for combination in &pack {
                    let one_hot = &combination[position];
                    vars.insert(one_hot.var.clone());
                    cases = Some(match cases {
                        None => one_hot.formula.clone(),
                        Some(accumulated) => Formula::or(accumulated, one_hot.formula.clone()),
                    });
                }
                assumptions.push(GroupAssumption {
                    vars,
                    cases: cases.expect("packs are never empty"),
                });
            }
            let percent = task.percent * pack.len() as f64 / self.count as f64;
            let _ = feed.send(Task::Partition(PartitionTask {
                assumptions,
                pivot1: self.uncontroversial1.len(),
                unpacked: pack,
                ranges: task.ranges.clone(),
                pivot2: task.pivot2,
                splittable: task.splittable.clone(),
                percent,
                key: Some(key),
            }));
        }
    }

    /// Stage two refinement: bisect the real feature under the round-robin
    /// cursor, or retire it from `splittable` once it is narrow enough.
    pub(crate) fn split_range(&self, task: &PartitionTask, feed: &Sender<Task>) {
        let feature = &self.uncontroversial2[task.pivot2];
        let (lower, upper) = task.ranges[feature];
        let pivot2 = (task.pivot2 + 1) % self.uncontroversial2.len();
        if upper - lower <= self.difference {
            debug!(target: "engine.worker1", feature = %feature, "range_exhausted");
            let mut splittable = task.splittable.clone();
            splittable.retain(|candidate| candidate != feature);
            let _ = feed.send(Task::Partition(PartitionTask {
                assumptions: task.assumptions.clone(),
                pivot1: task.pivot1,
                unpacked: task.unpacked.clone(),
                ranges: task.ranges.clone(),
                pivot2,
                splittable,
                percent: task.percent,
                key: None,
            }));
        } else {
            let middle = lower + (upper - lower) / 2.0;
            debug!(target: "engine.worker1", feature = %feature, middle, "range_bisected");
            for half in [(lower, middle), (middle, upper)] {
                let mut ranges = task.ranges.clone();
                ranges.insert(feature.clone(), half);
                let _ = feed.send(Task::Partition(PartitionTask {
                    assumptions: task.assumptions.clone(),
                    pivot1: task.pivot1,
                    unpacked: task.unpacked.clone(),
                    ranges,
                    pivot2,
                    splittable: task.splittable.clone(),
                    percent: task.percent / 2.0,
                    key: None,
                }));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{Analysis, InitialState};
    use core_cfg::CfgBuilder;
    use core_config::{FeatureSpec, Tunables};
    use core_expr::{LinExpr, Variable};
    use crossbeam_channel::unbounded;
    use std::collections::BTreeSet;

    fn analysis(difference: f64) -> Analysis {
        let mut builder = CfgBuilder::new();
        builder.assign(vec![(
            Variable::new("o1"),
            LinExpr::var(Variable::new("x01")),
        )]);
        let cfg = builder.build();
        let spec = FeatureSpec::parse("1\ns01\n").unwrap();
        let inputs: BTreeSet<Variable> = ["s01", "x01", "x02"]
            .iter()
            .map(|n| Variable::new(n))
            .collect();
        let outputs = BTreeSet::from([Variable::new("o1")]);
        Analysis::new(
            cfg,
            InitialState::top(),
            inputs,
            outputs,
            BTreeSet::new(),
            &spec,
            &Tunables {
                widening: 0,
                difference,
                workers: Some(1),
            },
        )
        .unwrap()
    }

    #[test]
    fn exhausted_feature_is_retired_with_the_cursor_advanced() {
        let analysis = analysis(1.0);
        let task = PartitionTask::seed(&[Variable::new("x01"), Variable::new("x02")]);
        let (feed, queue) = unbounded();
        analysis.split_range(&task, &feed);

        let Ok(Task::Partition(reposted)) = queue.try_recv() else {
            panic!("expected exactly one reposted task");
        };
        assert!(queue.try_recv().is_err());
        assert_eq!(reposted.percent, task.percent);
        assert_eq!(reposted.ranges, task.ranges);
        assert_eq!(reposted.pivot2, 1);
        assert_eq!(reposted.splittable, vec![Variable::new("x02")]);
        assert!(reposted.key.is_none());
    }

    #[test]
    fn wide_feature_bisects_into_equal_halves() {
        let analysis = analysis(0.25);
        let task = PartitionTask::seed(&[Variable::new("x01"), Variable::new("x02")]);
        let (feed, queue) = unbounded();
        analysis.split_range(&task, &feed);

        let mut halves = Vec::new();
        while let Ok(Task::Partition(next)) = queue.try_recv() {
            halves.push(next);
        }
        assert_eq!(halves.len(), 2);
        let x01 = Variable::new("x01");
        assert_eq!(halves[0].ranges[&x01], (0.0, 0.5));
        assert_eq!(halves[1].ranges[&x01], (0.5, 1.0));
        for half in &halves {
            assert_eq!(half.percent, 50.0);
            assert_eq!(half.pivot2, 1);
            assert_eq!(half.splittable, task.splittable);
            assert_eq!(half.ranges[&Variable::new("x02")], (0.0, 1.0));
        }
    }
}
