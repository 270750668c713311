//! Forward interval pre-analysis over the classifier graph.
//!
//! One pass from the entry node classifies every activation as always
//! active, always inactive, or neither (disjunctive) under the given entry
//! box. The caller may force classifications it already knows; forced nodes
//! are assumed rather than tested, which is how previously computed
//! activation patterns are replayed on refined partitions.

use core_cfg::{Cfg, NodeId, NodeKind};
use core_domain::{BoxState, Interval};
use std::collections::BTreeSet;
use tracing::trace;

pub struct PreAnalyzer<'a> {
    cfg: &'a Cfg,
}

impl<'a> PreAnalyzer<'a> {
    pub fn new(cfg: &'a Cfg) -> Self {
        Self { cfg }
    }

    /// Classifies every activation node under `entry`.
    ///
    /// Returns the always-active and always-inactive node sets; activation
    /// nodes in neither set are disjunctive. A bottom entry admits no
    /// concrete run, so every activation is classified active.
    pub fn analyze(
        &self,
        entry: &BoxState,
        forced_active: Option<&BTreeSet<NodeId>>,
        forced_inactive: Option<&BTreeSet<NodeId>>,
    ) -> (BTreeSet<NodeId>, BTreeSet<NodeId>) {
        let mut state = entry.clone();
        let mut active = BTreeSet::new();
        let mut inactive = BTreeSet::new();
        for id in self.cfg.ids() {
            match self.cfg.node(id) {
                NodeKind::Entry => {}
                NodeKind::Assign(stmts) => {
                    for (var, expr) in stmts {
                        state.assign(var.clone(), expr);
                    }
                }
                NodeKind::Relu(var) => {
                    let bound = state.bound(var);
                    if state.is_bottom() {
                        active.insert(id);
                        continue;
                    }
                    if forced_active.is_some_and(|forced| forced.contains(&id)) {
                        state.set(var.clone(), bound.meet(Interval::new(0.0, f64::INFINITY)));
                        active.insert(id);
                    } else if forced_inactive.is_some_and(|forced| forced.contains(&id)) {
                        state.set(var.clone(), Interval::point(0.0));
                        inactive.insert(id);
                    } else if bound.lo >= 0.0 {
                        active.insert(id);
                    } else if bound.hi <= 0.0 {
                        state.set(var.clone(), Interval::point(0.0));
                        inactive.insert(id);
                    } else {
                        // Disjunctive: the output still cannot go negative.
                        state.set(var.clone(), Interval::new(0.0, bound.hi));
                    }
                    trace!(
                        target: "forward.relu",
                        node = %id,
                        var = %var,
                        lo = bound.lo,
                        hi = bound.hi,
                        "classified"
                    );
                }
            }
        }
        (active, inactive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_cfg::CfgBuilder;
    use core_expr::{Formula, LinExpr, Variable};

    fn var(name: &str) -> Variable {
        Variable::new(name)
    }

    /// h := x + offset, then ReLU(h), then o := h.
    fn shifted_relu(offset: f64) -> (Cfg, NodeId) {
        let mut builder = CfgBuilder::new();
        builder.assign(vec![(var("h"), LinExpr::var(var("x")).with_constant(offset))]);
        let relu = builder.relu(var("h"));
        builder.assign(vec![(var("o"), LinExpr::var(var("h")))]);
        (builder.build(), relu)
    }

    fn unit_entry() -> BoxState {
        let mut entry = BoxState::top();
        entry.assume(&Formula::band(0.0, &var("x"), 1.0));
        entry
    }

    #[test]
    fn nonnegative_preactivation_is_active() {
        let (cfg, relu) = shifted_relu(0.0);
        let (active, inactive) = PreAnalyzer::new(&cfg).analyze(&unit_entry(), None, None);
        assert!(active.contains(&relu));
        assert!(inactive.is_empty());
    }

    #[test]
    fn nonpositive_preactivation_is_inactive() {
        let (cfg, relu) = shifted_relu(-2.0);
        let (active, inactive) = PreAnalyzer::new(&cfg).analyze(&unit_entry(), None, None);
        assert!(inactive.contains(&relu));
        assert!(active.is_empty());
    }

    #[test]
    fn straddling_preactivation_is_disjunctive() {
        let (cfg, _) = shifted_relu(-0.5);
        let (active, inactive) = PreAnalyzer::new(&cfg).analyze(&unit_entry(), None, None);
        assert!(active.is_empty());
        assert!(inactive.is_empty());
    }

    #[test]
    fn forced_sets_override_the_interval_test() {
        let (cfg, relu) = shifted_relu(-0.5);
        let forced = BTreeSet::from([relu]);
        let analyzer = PreAnalyzer::new(&cfg);

        let (active, inactive) = analyzer.analyze(&unit_entry(), Some(&forced), None);
        assert!(active.contains(&relu));
        assert!(inactive.is_empty());

        let (active, inactive) = analyzer.analyze(&unit_entry(), None, Some(&forced));
        assert!(inactive.contains(&relu));
        assert!(active.is_empty());
    }

    #[test]
    fn inactive_relu_zeroes_its_variable_downstream() {
        // h := x - 2 is always negative on [0, 1]; o := h + 1 must see h = 0.
        let mut builder = CfgBuilder::new();
        builder.assign(vec![(var("h"), LinExpr::var(var("x")).with_constant(-2.0))]);
        builder.relu(var("h"));
        builder.assign(vec![(var("o"), LinExpr::var(var("h")).with_constant(1.0))]);
        let cfg = builder.build();

        let mut state = unit_entry();
        let analyzer = PreAnalyzer::new(&cfg);
        let (_, inactive) = analyzer.analyze(&state, None, None);
        assert_eq!(inactive.len(), 1);

        // Replay the walk to observe the final bound on o.
        for id in cfg.ids() {
            if let NodeKind::Assign(stmts) = cfg.node(id) {
                for (v, e) in stmts {
                    state.assign(v.clone(), e);
                }
            } else if let NodeKind::Relu(v) = cfg.node(id) {
                state.set(v.clone(), Interval::point(0.0));
            }
        }
        assert_eq!(state.bound(&var("o")), Interval::point(1.0));
    }
}
