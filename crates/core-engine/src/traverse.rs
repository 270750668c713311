//! Lazy backward traversal of the classifier graph.
//!
//! Starting from an output-side state, the traversal walks the chain toward
//! the entry node, substituting affine assignments and branching on
//! activation nodes that are neither forced active nor forced inactive. It
//! is an explicit iterator over a stack of `(node, state)` frames, which
//! keeps the fan-out visible: each disjunctive activation at most doubles
//! the frames in flight, so a pattern with d disjunctive nodes yields at
//! most 2^d terminal states.

use core_cfg::{Cfg, NodeId, NodeKind};
use core_domain::Poly;
use core_expr::{LinExpr, Variable};
use std::collections::BTreeSet;

pub struct BackwardTraversal<'a> {
    cfg: &'a Cfg,
    active: &'a BTreeSet<NodeId>,
    inactive: &'a BTreeSet<NodeId>,
    join: bool,
    stack: Vec<(NodeId, Poly)>,
}

impl<'a> BackwardTraversal<'a> {
    pub fn new(
        cfg: &'a Cfg,
        active: &'a BTreeSet<NodeId>,
        inactive: &'a BTreeSet<NodeId>,
        join: bool,
        start: NodeId,
        seed: Poly,
    ) -> Self {
        Self {
            cfg,
            active,
            inactive,
            join,
            stack: vec![(start, seed)],
        }
    }

    /// Moves to the predecessor, or yields the state at the chain head.
    fn descend(&mut self, node: NodeId, state: Poly) -> Option<Poly> {
        match self.cfg.predecessor(node) {
            Some(pred) => {
                self.stack.push((pred, state));
                None
            }
            None => Some(state),
        }
    }
}

impl Iterator for BackwardTraversal<'_> {
    type Item = Poly;

    fn next(&mut self) -> Option<Poly> {
        while let Some((node, mut state)) = self.stack.pop() {
            match self.cfg.node(node) {
                NodeKind::Entry => return Some(state),
                NodeKind::Assign(stmts) => {
                    for (var, expr) in stmts.iter().rev() {
                        state.substitute(var, expr);
                    }
                    if state.is_bottom() {
                        continue;
                    }
                    if let Some(done) = self.descend(node, state) {
                        return Some(done);
                    }
                }
                NodeKind::Relu(var) => {
                    if self.active.contains(&node) {
                        relu_active(&mut state, var);
                        if state.is_bottom() {
                            continue;
                        }
                        if let Some(done) = self.descend(node, state) {
                            return Some(done);
                        }
                    } else if self.inactive.contains(&node) {
                        relu_inactive(&mut state, var);
                        if state.is_bottom() {
                            continue;
                        }
                        if let Some(done) = self.descend(node, state) {
                            return Some(done);
                        }
                    } else {
                        let mut on = state.clone();
                        let mut off = state;
                        relu_active(&mut on, var);
                        relu_inactive(&mut off, var);
                        if self.join {
                            let joined = on.join(&off);
                            if joined.is_bottom() {
                                continue;
                            }
                            if let Some(done) = self.descend(node, joined) {
                                return Some(done);
                            }
                        } else {
                            // Inactive branch below the active one on the
                            // stack, so active-side states surface first.
                            let pred = self.cfg.predecessor(node);
                            for branch in [off, on] {
                                if branch.is_bottom() {
                                    continue;
                                }
                                match pred {
                                    Some(pred) => self.stack.push((pred, branch)),
                                    None => return Some(branch),
                                }
                            }
                        }
                    }
                }
            }
        }
        None
    }
}

/// Backward ReLU, active side: the pre-activation was non-negative.
fn relu_active(state: &mut Poly, var: &Variable) {
    state.add_cons(LinExpr::var(var.clone()), false);
}

/// Backward ReLU, inactive side: the output was zero and the pre-activation
/// strictly negative. The substitution runs first so the added constraint
/// ranges over the pre-activation once the walk crosses the defining
/// assignment.
fn relu_inactive(state: &mut Poly, var: &Variable) {
    state.substitute(var, &LinExpr::constant(0.0));
    state.add_cons(LinExpr::var(var.clone()).scaled(-1.0), true);
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_cfg::CfgBuilder;
    use core_expr::Formula;

    fn var(name: &str) -> Variable {
        Variable::new(name)
    }

    /// h := x - 0.5, ReLU(h), o := h.
    fn relu_chain() -> (Cfg, NodeId) {
        let mut builder = CfgBuilder::new();
        builder.assign(vec![(var("h"), LinExpr::var(var("x")).with_constant(-0.5))]);
        let relu = builder.relu(var("h"));
        builder.assign(vec![(var("o"), LinExpr::var(var("h")))]);
        (builder.build(), relu)
    }

    fn seed_outputs_above(threshold: f64) -> Poly {
        let mut seed = Poly::top();
        seed.add_cons(LinExpr::var(var("o")).with_constant(-threshold), true);
        seed
    }

    fn in_unit_box(mut state: Poly) -> Poly {
        state.assume_conj(&Formula::band(0.0, &var("x"), 1.0));
        state
    }

    #[test]
    fn forced_active_follows_one_branch() {
        let (cfg, relu) = relu_chain();
        let active = BTreeSet::from([relu]);
        let inactive = BTreeSet::new();
        let states: Vec<Poly> =
            BackwardTraversal::new(&cfg, &active, &inactive, false, cfg.out_node(), seed_outputs_above(0.25))
                .map(in_unit_box)
                .filter(|s| !s.is_bottom())
                .collect();
        assert_eq!(states.len(), 1);
        let bound = states[0].bound(&var("x"));
        assert!((bound.lo - 0.75).abs() < 1e-6);
    }

    #[test]
    fn forced_inactive_prunes_positive_outputs() {
        let (cfg, relu) = relu_chain();
        let active = BTreeSet::new();
        let inactive = BTreeSet::from([relu]);
        // o > 0.25 is impossible when the activation is off.
        let states: Vec<Poly> =
            BackwardTraversal::new(&cfg, &active, &inactive, false, cfg.out_node(), seed_outputs_above(0.25))
                .collect();
        assert!(states.is_empty());
    }

    #[test]
    fn disjunctive_node_yields_both_viable_branches() {
        let (cfg, _) = relu_chain();
        let none = BTreeSet::new();
        // o >= 0 holds on both sides of the split.
        let mut seed = Poly::top();
        seed.add_cons(LinExpr::var(var("o")), false);
        let states: Vec<Poly> = BackwardTraversal::new(&cfg, &none, &none, false, cfg.out_node(), seed)
            .map(in_unit_box)
            .filter(|s| !s.is_bottom())
            .collect();
        assert_eq!(states.len(), 2);
    }

    #[test]
    fn fan_out_is_bounded_by_disjunctive_count() {
        // Two disjunctive activations in sequence: at most four terminals.
        let mut builder = CfgBuilder::new();
        builder.assign(vec![
            (var("h1"), LinExpr::var(var("x")).with_constant(-0.25)),
            (var("h2"), LinExpr::var(var("y")).with_constant(-0.75)),
        ]);
        builder.relu(var("h1"));
        builder.relu(var("h2"));
        builder.assign(vec![(
            var("o"),
            LinExpr::var(var("h1")).with_term(var("h2"), 1.0),
        )]);
        let cfg = builder.build();
        let none = BTreeSet::new();
        let mut seed = Poly::top();
        seed.add_cons(LinExpr::var(var("o")), false);
        let count = BackwardTraversal::new(&cfg, &none, &none, false, cfg.out_node(), seed).count();
        assert!(count <= 4);
        assert!(count >= 1);
    }

    #[test]
    fn join_mode_collapses_the_split() {
        let (cfg, _) = relu_chain();
        let none = BTreeSet::new();
        let mut seed = Poly::top();
        seed.add_cons(LinExpr::var(var("o")), false);
        let states: Vec<Poly> = BackwardTraversal::new(&cfg, &none, &none, true, cfg.out_node(), seed).collect();
        assert_eq!(states.len(), 1);
    }
}
