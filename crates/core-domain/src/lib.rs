//! Numeric abstract domains backing the analysis.
//!
//! Two domains, one per analysis direction. The forward pre-analysis runs on
//! interval boxes ([`BoxState`]): non-relational, cheap, good enough to
//! classify activations. The backward analysis runs on conjunctions of linear
//! constraints ([`Poly`]): relational, with projection and bounding built on
//! Fourier-Motzkin elimination. Both are plain value types; deep copy is
//! `Clone` and no operation can fail, so callers own their states outright.

mod boxes;
mod interval;
mod poly;

pub use boxes::BoxState;
pub use interval::Interval;
pub use poly::{LinCons, Poly};

/// Comparison slack for floating-point constraint arithmetic.
pub const EPS: f64 = 1e-9;
