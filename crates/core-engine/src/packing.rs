//! One-hot packing of the uncontroversial categorical features.
//!
//! Enumerates every combination of one-hot values across the groups, runs
//! the full forward split for each combination, and buckets combinations by
//! the activation pattern they induce. Combinations that behave the same
//! can then be analyzed as a single coarser partition.

use crate::driver::Analysis;
use crate::pattern::ActivationPattern;
use core_domain::BoxState;
use core_expr::{OneHotN, cartesian, one_hots};
use core_forward::PreAnalyzer;
use crossbeam_channel::unbounded;
use std::thread;
use std::time::Instant;
use tracing::{debug, info};

impl Analysis {
    /// Fills the shared packs dictionary from the given entry state.
    ///
    /// Runs once per analysis: only the seed task still has unsplit one-hot
    /// groups, and every task it spawns is marked fully split.
    pub(crate) fn packing(&self, entry: &BoxState) {
        let start = Instant::now();
        let groups: Vec<Vec<_>> = self
            .uncontroversial1
            .iter()
            .map(|group| one_hots(group))
            .collect();

        let (sender, receiver) = unbounded::<OneHotN>();
        thread::scope(|scope| {
            scope.spawn(move || {
                for combination in cartesian(&groups) {
                    let _ = sender.send(combination);
                }
                // Dropping the sender closes the channel and drains the pool.
            });
            for _ in 0..self.workers.saturating_sub(1).max(1) {
                let receiver = receiver.clone();
                scope.spawn(move || {
                    let analyzer = PreAnalyzer::new(&self.cfg);
                    while let Ok(combination) = receiver.recv() {
                        self.pack_combination(&analyzer, entry, combination);
                    }
                });
            }
        });

        let packs = self.shared.packs.lock().expect("packs mutex poisoned");
        let combinations: usize = packs.values().map(Vec::len).sum();
        debug_assert_eq!(combinations, self.count);
        info!(
            target: "engine.packing",
            packs = packs.len(),
            combinations,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "packing_complete"
        );
        for (key, pack) in packs.iter() {
            debug!(
                target: "engine.packing",
                pattern = %key,
                size = pack.len(),
                score = key.score() + pack.len(),
                "pack"
            );
        }
    }

    fn pack_combination(&self, analyzer: &PreAnalyzer<'_>, entry: &BoxState, combination: OneHotN) {
        let mut based = entry.clone();
        for one_hot in &combination {
            based.assume(&one_hot.formula);
        }
        let mut pairs = Vec::with_capacity(self.values.len());
        for value in &self.values {
            let mut per_value = based.clone();
            per_value.assume(&value.formula);
            pairs.push(analyzer.analyze(&per_value, None, None));
        }
        let key = ActivationPattern::new(pairs);
        let mut packs = self.shared.packs.lock().expect("packs mutex poisoned");
        packs.entry(key).or_default().push(combination);
    }
}
