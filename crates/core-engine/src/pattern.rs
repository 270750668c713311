//! Abstract activation patterns and their compression.
//!
//! A pattern records, per sensitive value, which activation nodes the
//! forward pre-analysis proved always active and always inactive. Patterns
//! key the shared dictionaries, so equality and hashing are structural over
//! the sorted node-id sets.

use crate::task::Chunk;
use core_cfg::NodeId;
use std::collections::BTreeSet;
use std::fmt;

pub type ActivationSets = (BTreeSet<NodeId>, BTreeSet<NodeId>);

#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct ActivationPattern {
    pairs: Vec<ActivationSets>,
}

impl ActivationPattern {
    pub fn new(pairs: Vec<ActivationSets>) -> Self {
        debug_assert!(
            pairs
                .iter()
                .all(|(active, inactive)| active.is_disjoint(inactive)),
            "a node cannot be both active and inactive"
        );
        Self { pairs }
    }

    pub fn pairs(&self) -> &[ActivationSets] {
        &self.pairs
    }

    /// Forced sets for one sensitive value position.
    pub fn pair(&self, index: usize) -> (&BTreeSet<NodeId>, &BTreeSet<NodeId>) {
        let (active, inactive) = &self.pairs[index];
        (active, inactive)
    }

    /// Total number of forced classifications across all sensitive values.
    /// Higher scores mean the partition is closer to full determinism.
    pub fn score(&self) -> usize {
        self.pairs
            .iter()
            .map(|(active, inactive)| active.len() + inactive.len())
            .sum()
    }

    /// True when `self` forces everything `weaker` forces, position by
    /// position. The weaker pattern's backward traversal then enumerates a
    /// superset of the stricter one's cases.
    pub fn refines(&self, weaker: &ActivationPattern) -> bool {
        self.pairs.len() == weaker.pairs.len()
            && self
                .pairs
                .iter()
                .zip(&weaker.pairs)
                .all(|((active, inactive), (weak_active, weak_inactive))| {
                    weak_active.is_subset(active) && weak_inactive.is_subset(inactive)
                })
    }
}

impl fmt::Display for ActivationPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sets = |set: &BTreeSet<NodeId>| {
            let ids: Vec<String> = set.iter().map(NodeId::to_string).collect();
            format!("{{{}}}", ids.join(", "))
        };
        let pairs: Vec<String> = self
            .pairs
            .iter()
            .map(|(active, inactive)| format!("{}, {}", sets(active), sets(inactive)))
            .collect();
        f.write_str(&pairs.join(" | "))
    }
}

/// Merges patterns that subsume one another, keeping the weaker key as the
/// representative and pooling the chunk lists.
///
/// Entries are considered in ascending chunk count, each against the already
/// compressed entries, first match wins. The result is ordered by descending
/// chunk count, ready to prioritize the bias-analysis queue.
pub fn compress(
    mut patterns: Vec<(ActivationPattern, Vec<Chunk>)>,
) -> Vec<(ActivationPattern, Vec<Chunk>)> {
    patterns.sort_by(|(key1, chunks1), (key2, chunks2)| {
        chunks1
            .len()
            .cmp(&chunks2.len())
            .then_with(|| key1.cmp(key2))
    });

    let mut compressed: Vec<(ActivationPattern, Vec<Chunk>)> = Vec::new();
    'next: for (key, chunks) in patterns {
        for position in 0..compressed.len() {
            if key.refines(&compressed[position].0) {
                compressed[position].1.extend(chunks);
                continue 'next;
            }
            if compressed[position].0.refines(&key) {
                // The new key is the weaker one; it takes over the pooled
                // entry and moves to the end of the scan order.
                let (_, mut pooled) = compressed.remove(position);
                pooled.extend(chunks);
                compressed.push((key, pooled));
                continue 'next;
            }
        }
        compressed.push((key, chunks));
    }

    compressed.sort_by(|(key1, chunks1), (key2, chunks2)| {
        chunks2
            .len()
            .cmp(&chunks1.len())
            .then_with(|| key1.cmp(key2))
    });
    compressed
}
