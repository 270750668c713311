//! Feasibility oracle for partitions of the input space.
//!
//! A partition is feasible when, for every value of the sensitive feature,
//! the forward pre-analysis leaves at most `widening` activations
//! unclassified. Each disjunctive activation doubles the backward state set,
//! so the cap bounds per-pattern work at `2^widening`.

use crate::driver::Analysis;
use crate::pattern::{ActivationPattern, ActivationSets};
use core_domain::BoxState;
use core_forward::PreAnalyzer;
use tracing::trace;

pub(crate) struct Feasibility {
    pub feasible: bool,
    /// One `(active, inactive)` pair per sensitive value analyzed so far;
    /// complete only when `feasible` or the caller asked to keep going.
    pub patterns: Vec<ActivationSets>,
    /// Disjunction count of the last sensitive value analyzed.
    pub disjunctions: usize,
}

impl Analysis {
    /// Runs the forward pre-analysis once per sensitive value.
    ///
    /// `key` replays forced activation sets recorded during packing. On the
    /// first infeasible sensitive value the loop aborts early unless
    /// `compute_anyway` is set.
    pub(crate) fn feasibility(
        &self,
        state: &BoxState,
        key: Option<&ActivationPattern>,
        compute_anyway: bool,
    ) -> Feasibility {
        let analyzer = PreAnalyzer::new(&self.cfg);
        let mut feasible = true;
        let mut patterns = Vec::with_capacity(self.values.len());
        let mut disjunctions = self.activations.len();
        for (index, value) in self.values.iter().enumerate() {
            let mut per_value = state.clone();
            per_value.assume(&value.formula);
            let forced = key.map(|key| key.pair(index));
            let (active, inactive) = analyzer.analyze(
                &per_value,
                forced.map(|(active, _)| active),
                forced.map(|(_, inactive)| inactive),
            );
            disjunctions = self.activations.len() - active.len() - inactive.len();
            trace!(
                target: "engine.feasibility",
                sensitive = %value.var,
                active = active.len(),
                inactive = inactive.len(),
                disjunctions,
                "classified"
            );
            if disjunctions > self.widening {
                feasible = false;
                if !compute_anyway {
                    break;
                }
            }
            patterns.push((active, inactive));
        }
        Feasibility {
            feasible,
            patterns,
            disjunctions,
        }
    }
}
