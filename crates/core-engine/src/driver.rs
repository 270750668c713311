//! Analysis driver: owns the shared state, seeds the queues, runs the two
//! worker pools, and aggregates the result.
//!
//! The pre-analysis pool is joined before the pattern dictionary is read, so
//! compression always sees the final dictionary. Termination of each pool is
//! the sentinel protocol: the driver (queue two) or any worker that sees the
//! explored share saturate (queue one) posts a `Stop`, and every worker
//! re-posts it before exiting.

use crate::counters::Progress;
use crate::pattern::{ActivationPattern, compress};
use crate::task::{Chunk, PartitionTask, PatternJob, Task};
use ahash::AHashMap;
use core_cfg::{Cfg, NodeId};
use core_config::{FeatureSpec, SpecError, Tunables};
use core_domain::{BoxState, Poly};
use core_expr::{Formula, OneHot1, OneHotN, Variable, one_hots};
use crossbeam_channel::unbounded;
use std::collections::BTreeSet;
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Paired initial state: the forward component seeds the pre-analysis, the
/// backward component seeds the preimage computation.
#[derive(Clone, Debug, Default)]
pub struct InitialState {
    pub forward: BoxState,
    pub backward: Poly,
}

impl InitialState {
    pub fn top() -> Self {
        Self::default()
    }
}

#[derive(Default)]
pub(crate) struct Shared {
    pub packs: Mutex<AHashMap<ActivationPattern, Vec<OneHotN>>>,
    pub patterns: Mutex<AHashMap<ActivationPattern, Vec<Chunk>>>,
    pub progress: Progress,
}

pub struct Analysis {
    pub(crate) cfg: Cfg,
    pub(crate) initial: InitialState,
    pub(crate) outputs: Vec<Variable>,
    pub(crate) activations: BTreeSet<NodeId>,
    pub(crate) sensitive: Vec<Variable>,
    /// One-hot values of the sensitive feature, in group order.
    pub(crate) values: Vec<OneHot1>,
    /// One-hot encoded uncontroversial feature groups.
    pub(crate) uncontroversial1: Vec<Vec<Variable>>,
    /// Real-valued uncontroversial features, in name order.
    pub(crate) uncontroversial2: Vec<Variable>,
    /// `[0, 1]` bounds over the sensitive and one-hot encoded variables.
    pub(crate) bounds: Formula,
    /// Total one-hot combinations across all groups.
    pub(crate) count: usize,
    pub(crate) widening: usize,
    pub(crate) difference: f64,
    pub(crate) workers: usize,
    pub(crate) shared: Shared,
}

/// Aggregated outcome of one `analyze` run.
#[derive(Debug, Clone)]
pub struct Summary {
    pub feasible: f64,
    pub explored: f64,
    pub biased: f64,
    pub partitions: usize,
    pub analyzed: usize,
    pub patterns: usize,
    pub compressed: usize,
    pub pre_time: Duration,
    pub analysis_time: Duration,
}

impl Summary {
    /// The one-line result: feasible share, biased share, phase timings.
    pub fn result_line(&self) -> String {
        format!(
            "{} ({}% biased) {}s {}s",
            self.feasible,
            self.biased,
            self.pre_time.as_secs_f64(),
            self.analysis_time.as_secs_f64()
        )
    }
}

impl Analysis {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cfg: Cfg,
        initial: InitialState,
        inputs: BTreeSet<Variable>,
        outputs: BTreeSet<Variable>,
        activations: BTreeSet<NodeId>,
        spec: &FeatureSpec,
        tunables: &Tunables,
    ) -> Result<Self, SpecError> {
        spec.validate(&inputs)?;
        let sensitive = spec.sensitive.clone();
        let values = one_hots(&sensitive);
        let uncontroversial1 = spec.one_hot_groups.clone();
        let uncontroversial2 = spec.real_features(&inputs);
        let bounds = Formula::conjoin(
            sensitive
                .iter()
                .chain(uncontroversial1.iter().flatten())
                .map(|var| Formula::band(0.0, var, 1.0)),
        )
        .expect("the sensitive feature has at least one variable");
        let count = uncontroversial1.iter().map(Vec::len).product();
        let workers = tunables.workers.unwrap_or_else(|| {
            thread::available_parallelism()
                .map(std::num::NonZeroUsize::get)
                .unwrap_or(1)
        });
        Ok(Self {
            cfg,
            initial,
            outputs: outputs.into_iter().collect(),
            activations,
            sensitive,
            values,
            uncontroversial1,
            uncontroversial2,
            bounds,
            count,
            widening: tunables.widening,
            difference: tunables.difference,
            workers: workers.max(1),
            shared: Shared::default(),
        })
    }

    /// Runs both phases to completion and returns the aggregate result.
    pub fn analyze(&self) -> Summary {
        info!(
            target: "engine.driver",
            widening = self.widening,
            difference = self.difference,
            workers = self.workers,
            sensitive_values = self.values.len(),
            one_hot_groups = self.uncontroversial1.len(),
            real_features = self.uncontroversial2.len(),
            "analysis_start"
        );

        let pre_start = Instant::now();
        let (feed1, queue1) = unbounded::<Task>();
        let _ = feed1.send(Task::Partition(PartitionTask::seed(&self.uncontroversial2)));
        thread::scope(|scope| {
            for id in 0..self.workers {
                let queue = queue1.clone();
                let feed = feed1.clone();
                scope.spawn(move || self.worker1(id, queue, feed));
            }
        });
        let pre_time = pre_start.elapsed();

        let recorded: Vec<(ActivationPattern, Vec<Chunk>)> = {
            let patterns = self.shared.patterns.lock().expect("patterns mutex poisoned");
            patterns
                .iter()
                .map(|(key, chunks)| (key.clone(), chunks.clone()))
                .collect()
        };
        let raw_patterns = recorded.len();
        let snapshot = self.shared.progress.snapshot();
        info!(
            target: "engine.driver",
            patterns = raw_patterns,
            partitions = snapshot.partitions,
            feasible = snapshot.feasible,
            explored = snapshot.explored,
            "pre_analysis_complete"
        );
        for (key, chunks) in &recorded {
            debug!(target: "engine.driver", pattern = %key, chunks = chunks.len(), "pattern");
        }

        let prioritized = compress(recorded);
        let compressed = prioritized.len();
        if compressed < raw_patterns {
            info!(
                target: "engine.driver",
                compressed,
                raw = raw_patterns,
                "patterns_compressed"
            );
        }

        let analysis_start = Instant::now();
        let (feed2, queue2) = unbounded::<PatternJob>();
        for (index, (pattern, chunks)) in prioritized.into_iter().enumerate() {
            let _ = feed2.send(PatternJob::Pattern {
                index: index + 1,
                pattern,
                chunks,
            });
        }
        let _ = feed2.send(PatternJob::Stop);
        thread::scope(|scope| {
            for id in 0..self.workers {
                let queue = queue2.clone();
                let feed = feed2.clone();
                scope.spawn(move || self.worker2(id, queue, feed, compressed));
            }
        });
        let analysis_time = analysis_start.elapsed();

        let progress = self.shared.progress.snapshot();
        let summary = Summary {
            feasible: progress.feasible,
            explored: progress.explored,
            biased: progress.biased,
            partitions: progress.partitions,
            analyzed: progress.analyzed,
            patterns: raw_patterns,
            compressed,
            pre_time,
            analysis_time,
        };
        info!(
            target: "engine.driver",
            feasible = summary.feasible,
            explored = summary.explored,
            biased = summary.biased,
            partitions = summary.partitions,
            analyzed = summary.analyzed,
            "analysis_complete"
        );
        summary
    }

    /// Progress counters, readable mid-run from tests and callers.
    pub fn progress(&self) -> crate::counters::ProgressSnapshot {
        self.shared.progress.snapshot()
    }
}
