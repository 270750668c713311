//! Bias-analysis worker: backward preimages and pairwise intersection.
//!
//! Per pattern, the worker computes the preimage of every
//! `(output class, sensitive value)` pair by traversing the graph backward
//! under the pattern's forced activation sets. Two preimages witness bias
//! when their intersection survives after the sensitive and one-hot
//! variables are projected away and the chunk's range box is re-imposed:
//! some fixed uncontroversial input then reaches different classes under
//! different sensitive values.

use crate::driver::Analysis;
use crate::task::{Chunk, PatternJob, Ranges};
use crate::traverse::BackwardTraversal;
use crate::pattern::ActivationPattern;
use core_domain::Poly;
use core_expr::{CmpOp, Formula, Term, Variable};
use crossbeam_channel::{Receiver, Sender};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, info_span, warn};

/// Preimage states per `(chosen class, sensitive value)` pair. The map is
/// ordered so pair iteration is deterministic across runs.
type CheckMap = BTreeMap<(Variable, Variable), Vec<Poly>>;

impl Analysis {
    pub(crate) fn worker2(
        &self,
        id: usize,
        queue: Receiver<PatternJob>,
        feed: Sender<PatternJob>,
        total: usize,
    ) {
        let span = info_span!(target: "engine.worker2", "worker2", id);
        let _enter = span.enter();
        loop {
            match queue.recv() {
                Ok(PatternJob::Pattern {
                    index,
                    pattern,
                    chunks,
                }) => self.check_pattern(id, index, total, &pattern, &chunks),
                Ok(PatternJob::Stop) | Err(_) => {
                    let _ = feed.send(PatternJob::Stop);
                    break;
                }
            }
        }
    }

    fn check_pattern(
        &self,
        id: usize,
        index: usize,
        total: usize,
        pattern: &ActivationPattern,
        chunks: &[Chunk],
    ) {
        info!(
            target: "engine.worker2",
            worker = id,
            pattern = index,
            total,
            chunks = chunks.len(),
            "pattern_start"
        );
        let check = self.preimages(pattern);
        for chunk in chunks {
            let label = chunk.label();
            if chunk.unpacked.is_empty() {
                let mut partition = check.clone();
                for states in partition.values_mut() {
                    for state in states.iter_mut() {
                        state.forget(&self.sensitive);
                    }
                }
                self.bias_check(&label, &partition, &chunk.ranges, chunk.percent);
            } else {
                // The pack covers several raw combinations; each gets an
                // equal share of the chunk and its own copy of the states.
                let percent = chunk.percent / chunk.unpacked.len() as f64;
                for combination in &chunk.unpacked {
                    let mut partition = check.clone();
                    for states in partition.values_mut() {
                        for state in states.iter_mut() {
                            for one_hot in combination {
                                state.assume_conj(&one_hot.formula);
                            }
                            state.forget(&self.sensitive);
                        }
                    }
                    self.bias_check(&label, &partition, &chunk.ranges, percent);
                }
            }
        }
        self.shared.progress.add_analyzed(chunks.len());
        let snapshot = self.shared.progress.snapshot();
        info!(
            target: "engine.worker2",
            worker = id,
            analyzed = snapshot.analyzed,
            partitions = snapshot.partitions,
            biased = snapshot.biased,
            "progress"
        );
    }

    /// Backward preimage of every `(chosen class, sensitive value)` pair
    /// under the pattern's forced activation sets.
    fn preimages(&self, pattern: &ActivationPattern) -> CheckMap {
        let mut check = CheckMap::new();
        for (index, value) in self.values.iter().enumerate() {
            let (active, inactive) = pattern.pair(index);
            for chosen in &self.outputs {
                // The chosen class wins when every other class scores below
                // it. A single-class network has no losing class and no
                // constraint.
                let outcome = Formula::conjoin(
                    self.outputs
                        .iter()
                        .filter(|other| *other != chosen)
                        .map(|other| {
                            Formula::cmp(
                                Term::Var(other.clone()),
                                CmpOp::Lt,
                                Term::Var(chosen.clone()),
                            )
                        }),
                );
                let mut seed = self.initial.backward.clone();
                if let Some(outcome) = &outcome {
                    seed.assume_conj(outcome);
                }
                let terminals: Vec<Poly> = BackwardTraversal::new(
                    &self.cfg,
                    active,
                    inactive,
                    false,
                    self.cfg.out_node(),
                    seed,
                )
                .filter_map(|mut state| {
                    state.assume_conj(&value.formula);
                    (!state.is_bottom()).then_some(state)
                })
                .collect();
                debug!(
                    target: "engine.worker2",
                    chosen = %chosen,
                    sensitive = %value.var,
                    states = terminals.len(),
                    "preimage"
                );
                check.insert((chosen.clone(), value.var.clone()), terminals);
            }
        }
        check
    }

    /// Intersects preimages pairwise over differing classes and differing
    /// sensitive values, deduplicates witnesses, and folds the witnessed
    /// share of the chunk into the global biased counter.
    fn bias_check(&self, label: &str, check: &CheckMap, ranges: &Ranges, percent: f64) {
        let mut witnesses: BTreeSet<String> = BTreeSet::new();
        let mut biased_ranges: BTreeMap<Variable, (f64, f64)> = BTreeMap::new();
        let entries: Vec<(&(Variable, Variable), &Vec<Poly>)> = check.iter().collect();
        for i in 0..entries.len() {
            let ((class1, sensitive1), states1) = entries[i];
            for j in i + 1..entries.len() {
                let ((class2, sensitive2), states2) = entries[j];
                if class1 == class2 || sensitive1 == sensitive2 {
                    continue;
                }
                for state1 in states1.iter() {
                    for state2 in states2.iter() {
                        let mut intersection = state1.clone();
                        intersection.meet(state2);
                        for group in &self.uncontroversial1 {
                            intersection.forget(group);
                        }
                        for (feature, (lower, upper)) in ranges {
                            intersection.assume_conj(&Formula::band(*lower, feature, *upper));
                        }
                        if intersection.is_bottom() {
                            continue;
                        }
                        if witnesses.insert(intersection.canonical_key()) {
                            for feature in &self.uncontroversial2 {
                                let bound = intersection.bound(feature);
                                biased_ranges
                                    .entry(feature.clone())
                                    .and_modify(|(lo, hi)| {
                                        *lo = lo.min(bound.lo);
                                        *hi = hi.max(bound.hi);
                                    })
                                    .or_insert((bound.lo, bound.hi));
                            }
                            warn!(
                                target: "engine.bias",
                                chunk = label,
                                witness = %intersection,
                                "bias_found"
                            );
                        }
                    }
                }
            }
        }
        if witnesses.is_empty() {
            debug!(target: "engine.bias", chunk = label, "no_bias");
            return;
        }
        // Bounding-box share of the chunk; an over-approximation of the
        // true biased volume. Empty products are 1, so a chunk without real
        // features contributes its whole percentage.
        let total_volume: f64 = ranges.values().map(|(lower, upper)| upper - lower).product();
        let biased_volume: f64 = biased_ranges
            .values()
            .map(|(lower, upper)| upper - lower)
            .product();
        let contribution = percent * biased_volume / total_volume;
        let biased = self.shared.progress.add_biased(contribution);
        info!(
            target: "engine.bias",
            chunk = label,
            witnesses = witnesses.len(),
            contribution,
            biased,
            "chunk_biased"
        );
    }
}
