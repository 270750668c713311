//! Interval box domain for the forward pre-analysis.
//!
//! A state maps variables to closed intervals; absent variables are
//! unconstrained. Conjunctive assumptions tighten bounds, disjunctive
//! assumptions are resolved as the interval hull of the branch results.
//! Relational atoms (variable against variable) are outside the domain and
//! leave the state unchanged.

use crate::Interval;
use core_expr::{CmpOp, Comparison, Formula, LinExpr, Term, Variable};
use std::collections::BTreeMap;

#[derive(Clone, Debug, Default)]
pub struct BoxState {
    bounds: BTreeMap<Variable, Interval>,
    bottom: bool,
}

impl BoxState {
    pub fn top() -> Self {
        Self::default()
    }

    pub fn is_bottom(&self) -> bool {
        self.bottom
    }

    pub fn bound(&self, var: &Variable) -> Interval {
        self.bounds.get(var).copied().unwrap_or(Interval::TOP)
    }

    pub fn set(&mut self, var: Variable, interval: Interval) {
        if interval.is_empty() {
            self.bottom = true;
        }
        self.bounds.insert(var, interval);
    }

    /// Interval evaluation of a linear expression under the current bounds.
    pub fn eval(&self, expr: &LinExpr) -> Interval {
        let mut acc = Interval::point(expr.constant_part());
        for (var, coeff) in expr.terms() {
            acc = acc.add(self.bound(var).scale(coeff));
        }
        acc
    }

    /// Forward affine assignment `var := expr`.
    pub fn assign(&mut self, var: Variable, expr: &LinExpr) {
        let value = self.eval(expr);
        self.set(var, value);
    }

    pub fn assume(&mut self, formula: &Formula) {
        if self.bottom {
            return;
        }
        match formula {
            Formula::Cmp(cmp) => self.assume_cmp(cmp),
            Formula::And(left, right) => {
                self.assume(left);
                self.assume(right);
            }
            Formula::Or(left, right) => {
                let mut a = self.clone();
                let mut b = self.clone();
                a.assume(left);
                b.assume(right);
                *self = a.join(&b);
            }
        }
    }

    fn assume_cmp(&mut self, cmp: &Comparison) {
        // Strictness collapses to the closed bound in this domain.
        match (&cmp.lhs, &cmp.rhs) {
            (Term::Lit(lo), Term::Var(var)) => {
                let tightened = self.bound(var).meet(Interval::new(*lo, f64::INFINITY));
                self.set(var.clone(), tightened);
            }
            (Term::Var(var), Term::Lit(hi)) => {
                let tightened = self.bound(var).meet(Interval::new(f64::NEG_INFINITY, *hi));
                self.set(var.clone(), tightened);
            }
            (Term::Lit(lhs), Term::Lit(rhs)) => {
                let holds = match cmp.op {
                    CmpOp::Le => lhs <= rhs,
                    CmpOp::Lt => lhs < rhs,
                };
                if !holds {
                    self.bottom = true;
                }
            }
            (Term::Var(_), Term::Var(_)) => {}
        }
    }

    pub fn join(&self, other: &BoxState) -> BoxState {
        if self.bottom {
            return other.clone();
        }
        if other.bottom {
            return self.clone();
        }
        let mut bounds = BTreeMap::new();
        for (var, interval) in &self.bounds {
            if let Some(theirs) = other.bounds.get(var) {
                let hull = interval.hull(*theirs);
                if hull != Interval::TOP {
                    bounds.insert(var.clone(), hull);
                }
            }
        }
        BoxState {
            bounds,
            bottom: false,
        }
    }
}
