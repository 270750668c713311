//! Two-phase bias analysis of a feed-forward ReLU classifier.
//!
//! Phase one partitions the input space until every partition leaves few
//! enough activations unclassified, grouping partitions by the activation
//! pattern a forward interval analysis induces. Phase two, per pattern,
//! computes backward preimages of every output class under every sensitive
//! value and intersects them pairwise; a non-empty intersection over fixed
//! uncontroversial inputs witnesses bias. Both phases run on blocking-queue
//! worker pools, one worker per logical CPU by default.
//!
//! The entry point is [`Analysis`]: construct it from a classifier graph,
//! a feature specification, and tunables, then call
//! [`analyze`](Analysis::analyze).

mod bias;
mod counters;
mod driver;
mod feasibility;
mod packing;
mod partition;
mod pattern;
mod task;
mod traverse;

pub use counters::{AtomicF64, Progress, ProgressSnapshot};
pub use driver::{Analysis, InitialState, Summary};
pub use pattern::{ActivationPattern, ActivationSets, compress};
pub use task::{Chunk, GroupAssumption, PartitionTask, PatternJob, Ranges, Task};
pub use traverse::BackwardTraversal;
