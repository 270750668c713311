//! Global progress counters shared by both worker pools.
//!
//! Percentages are `f64` accumulated through a CAS loop on `AtomicU64` bit
//! patterns; integer counters are plain atomics. `snapshot` reads each
//! counter once with relaxed ordering, which is all the progress reporting
//! needs.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Threshold for "the whole input space has been explored", with a little
/// slack for the float dust percent splitting leaves behind.
pub(crate) const COMPLETE: f64 = 100.0 - 1e-6;

/// `f64` accumulator over an `AtomicU64` bit pattern.
#[derive(Debug, Default)]
pub struct AtomicF64(AtomicU64);

impl AtomicF64 {
    pub fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    /// Adds `delta` and returns the updated value.
    pub fn add(&self, delta: f64) -> f64 {
        let mut current = self.0.load(Ordering::Relaxed);
        loop {
            let next = f64::from_bits(current) + delta;
            match self.0.compare_exchange_weak(
                current,
                next.to_bits(),
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return next,
                Err(observed) => current = observed,
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct Progress {
    biased: AtomicF64,
    feasible: AtomicF64,
    explored: AtomicF64,
    analyzed: AtomicUsize,
    partitions: AtomicUsize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSnapshot {
    pub biased: f64,
    pub feasible: f64,
    pub explored: f64,
    pub analyzed: usize,
    pub partitions: usize,
}

impl Progress {
    pub fn add_biased(&self, percent: f64) -> f64 {
        self.biased.add(percent)
    }

    pub fn add_feasible(&self, percent: f64) -> f64 {
        self.feasible.add(percent)
    }

    pub fn add_explored(&self, percent: f64) -> f64 {
        self.explored.add(percent)
    }

    pub fn add_analyzed(&self, count: usize) -> usize {
        self.analyzed.fetch_add(count, Ordering::Relaxed) + count
    }

    pub fn incr_partitions(&self) -> usize {
        self.partitions.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            biased: self.biased.load(),
            feasible: self.feasible.load(),
            explored: self.explored.load(),
            analyzed: self.analyzed.load(Ordering::Relaxed),
            partitions: self.partitions.load(Ordering::Relaxed),
        }
    }
}
