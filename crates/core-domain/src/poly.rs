//! Relational constraint domain for the backward analysis.
//!
//! A state is a conjunction of linear constraints `expr >= 0` / `expr > 0`
//! over named variables. Projection (`forget`), variable bounding, and the
//! emptiness test are all built on Fourier-Motzkin elimination with row
//! normalization and deduplication between steps to keep the combinatorial
//! growth in check. Backward assignment is plain substitution, so a state
//! that started over output variables ends up ranging over inputs once the
//! traversal reaches the entry node.
//!
//! Rows are normalized on insertion: the largest variable coefficient is
//! scaled to magnitude 1. That makes the canonical key stable under the
//! different orders in which equivalent states can be produced.

use crate::{EPS, Interval};
use core_expr::{CmpOp, Formula, LinExpr, Term, Variable};
use std::collections::BTreeSet;
use std::fmt;
use tracing::trace;

/// One linear constraint `expr >= 0` (`> 0` when strict).
#[derive(Clone, Debug)]
pub struct LinCons {
    expr: LinExpr,
    strict: bool,
}

impl LinCons {
    pub fn new(expr: LinExpr, strict: bool) -> Self {
        Self { expr, strict }
    }

    pub fn expr(&self) -> &LinExpr {
        &self.expr
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Scales the largest variable coefficient to magnitude 1. Constant rows
    /// are left as they are.
    fn normalized(mut self) -> Self {
        let magnitude = self
            .expr
            .terms()
            .map(|(_, coeff)| coeff.abs())
            .fold(0.0f64, f64::max);
        if magnitude > 0.0 {
            self.expr = self.expr.scaled(1.0 / magnitude);
        }
        self
    }

    /// Constant rows either hold (drop them) or refute the whole state.
    fn constant_verdict(&self) -> Option<bool> {
        if !self.expr.is_constant() {
            return None;
        }
        let value = self.expr.constant_part();
        let holds = if self.strict {
            value >= EPS
        } else {
            value >= -EPS
        };
        Some(holds)
    }

    fn quantized(&self) -> (Vec<(Variable, i64)>, i64, bool) {
        let grid = |value: f64| (value * 1e9).round() as i64;
        let terms = self
            .expr
            .terms()
            .map(|(var, coeff)| (var.clone(), grid(coeff)))
            .collect();
        (terms, grid(self.expr.constant_part()), self.strict)
    }
}

impl fmt::Display for LinCons {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} 0", self.expr, if self.strict { ">" } else { ">=" })
    }
}

#[derive(Clone, Debug, Default)]
pub struct Poly {
    cons: Vec<LinCons>,
    bottom: bool,
}

impl Poly {
    pub fn top() -> Self {
        Self::default()
    }

    pub fn constraints(&self) -> &[LinCons] {
        &self.cons
    }

    /// Adds `expr >= 0` (or `> 0`), normalizing and discarding duplicates.
    pub fn add_cons(&mut self, expr: LinExpr, strict: bool) {
        if self.bottom {
            return;
        }
        let row = LinCons::new(expr, strict).normalized();
        match row.constant_verdict() {
            Some(true) => {}
            Some(false) => self.bottom = true,
            None => {
                let key = row.quantized();
                if !self.cons.iter().any(|c| c.quantized() == key) {
                    self.cons.push(row);
                }
            }
        }
    }

    /// Assumes a pure conjunction of comparisons. Disjunctions never reach
    /// the relational domain; hitting one is a caller bug.
    pub fn assume_conj(&mut self, formula: &Formula) {
        let atoms = formula
            .conjuncts()
            .expect("relational states only take conjunctive assumptions");
        for cmp in atoms {
            // lhs OP rhs  becomes  rhs - lhs >= 0  (strict for <).
            let mut expr = LinExpr::default();
            match &cmp.rhs {
                Term::Lit(value) => expr.add_constant(*value),
                Term::Var(var) => expr.add_scaled(&LinExpr::var(var.clone()), 1.0),
            }
            match &cmp.lhs {
                Term::Lit(value) => expr.add_constant(-*value),
                Term::Var(var) => expr.add_scaled(&LinExpr::var(var.clone()), -1.0),
            }
            self.add_cons(expr, cmp.op == CmpOp::Lt);
        }
    }

    pub fn meet(&mut self, other: &Poly) {
        if other.bottom {
            self.bottom = true;
        }
        if self.bottom {
            return;
        }
        for row in &other.cons {
            self.add_cons(row.expr.clone(), row.strict);
        }
    }

    /// Backward affine assignment `var := expr`: occurrences of `var` are
    /// replaced by the expression.
    pub fn substitute(&mut self, var: &Variable, expr: &LinExpr) {
        if self.bottom {
            return;
        }
        let rows = std::mem::take(&mut self.cons);
        for mut row in rows {
            let coeff = row.expr.take_term(var);
            if coeff != 0.0 {
                row.expr.add_scaled(expr, coeff);
            }
            self.add_cons(row.expr, row.strict);
        }
    }

    /// Projects the given variables out of the state.
    pub fn forget<'a>(&mut self, vars: impl IntoIterator<Item = &'a Variable>) {
        if self.bottom {
            return;
        }
        for var in vars {
            match eliminate(std::mem::take(&mut self.cons), var) {
                Some(rows) => self.cons = rows,
                None => {
                    self.bottom = true;
                    return;
                }
            }
        }
    }

    pub fn is_bottom(&self) -> bool {
        if self.bottom {
            return true;
        }
        let mut rows = self.cons.clone();
        loop {
            let Some(var) = pivot_var(&rows, None) else {
                return false;
            };
            match eliminate(rows, &var) {
                Some(next) => rows = next,
                None => return true,
            }
        }
    }

    /// Projected interval of one variable.
    pub fn bound(&self, var: &Variable) -> Interval {
        if self.bottom {
            return Interval::new(f64::INFINITY, f64::NEG_INFINITY);
        }
        let mut rows = self.cons.clone();
        while let Some(other) = pivot_var(&rows, Some(var)) {
            match eliminate(rows, &other) {
                Some(next) => rows = next,
                None => return Interval::new(f64::INFINITY, f64::NEG_INFINITY),
            }
        }
        let mut interval = Interval::TOP;
        for row in &rows {
            let coeff = row.expr.coefficient(var);
            let rest = row.expr.constant_part();
            if coeff > 0.0 {
                interval.lo = interval.lo.max(-rest / coeff);
            } else if coeff < 0.0 {
                interval.hi = interval.hi.min(-rest / coeff);
            }
        }
        interval
    }

    /// Interval of an arbitrary linear expression over the state.
    pub fn bound_expr(&self, expr: &LinExpr) -> Interval {
        if expr.is_constant() {
            return Interval::point(expr.constant_part());
        }
        let slack = fresh_var(self, expr);
        let mut probe = self.clone();
        let mut low = LinExpr::var(slack.clone());
        low.add_scaled(expr, -1.0);
        probe.add_cons(low.clone(), false);
        probe.add_cons(low.scaled(-1.0), false);
        probe.bound(&slack)
    }

    /// True when every concrete point of the state satisfies the constraint.
    pub fn entails(&self, cons: &LinCons) -> bool {
        if self.bottom {
            return true;
        }
        let lo = self.bound_expr(&cons.expr).lo;
        if cons.strict { lo >= EPS } else { lo >= -EPS }
    }

    /// Sound weak join: keeps the constraints of either operand that the
    /// other entails. Coarser than the convex hull but never unsound.
    pub fn join(&self, other: &Poly) -> Poly {
        if self.bottom {
            return other.clone();
        }
        if other.bottom {
            return self.clone();
        }
        let mut joined = Poly::top();
        for row in &self.cons {
            if other.entails(row) {
                joined.add_cons(row.expr.clone(), row.strict);
            }
        }
        for row in &other.cons {
            if self.entails(row) {
                joined.add_cons(row.expr.clone(), row.strict);
            }
        }
        joined
    }

    /// Stable textual key of the normalized constraint set, used to
    /// deduplicate equivalent witnesses.
    pub fn canonical_key(&self) -> String {
        if self.bottom {
            return "bottom".to_string();
        }
        let mut rows: Vec<String> = self
            .cons
            .iter()
            .map(|row| {
                let (terms, constant, strict) = row.quantized();
                let body: Vec<String> = terms
                    .iter()
                    .map(|(var, coeff)| format!("{coeff}*{var}"))
                    .collect();
                format!(
                    "{}{:+}{}",
                    body.join(""),
                    constant,
                    if strict { ">" } else { ">=" }
                )
            })
            .collect();
        rows.sort();
        rows.dedup();
        rows.join(";")
    }
}

impl fmt::Display for Poly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.bottom {
            return f.write_str("bottom");
        }
        if self.cons.is_empty() {
            return f.write_str("top");
        }
        let rows: Vec<String> = self.cons.iter().map(|row| row.to_string()).collect();
        write!(f, "{{{}}}", rows.join(", "))
    }
}

/// Fresh variable name for slack introduction; retries until it clashes with
/// neither the state nor the probed expression.
fn fresh_var(state: &Poly, expr: &LinExpr) -> Variable {
    let taken = |candidate: &Variable| {
        expr.coefficient(candidate) != 0.0
            || state
                .cons
                .iter()
                .any(|row| row.expr.coefficient(candidate) != 0.0)
    };
    let mut suffix = 0usize;
    loop {
        let candidate = Variable::new(format!("__slack{suffix}"));
        if !taken(&candidate) {
            return candidate;
        }
        suffix += 1;
    }
}

/// Variable to eliminate next: fewest lower-by-upper row combinations,
/// classic Fourier ordering. `keep` is exempt from elimination.
fn pivot_var(rows: &[LinCons], keep: Option<&Variable>) -> Option<Variable> {
    let mut candidates: BTreeSet<&Variable> = BTreeSet::new();
    for row in rows {
        candidates.extend(row.expr.vars());
    }
    if let Some(keep) = keep {
        candidates.remove(keep);
    }
    candidates
        .into_iter()
        .min_by_key(|var| {
            let lowers = rows.iter().filter(|r| r.expr.coefficient(var) > 0.0).count();
            let uppers = rows.iter().filter(|r| r.expr.coefficient(var) < 0.0).count();
            (lowers * uppers, (*var).clone())
        })
        .cloned()
}

/// One Fourier-Motzkin step: eliminates `var` from the rows. Returns `None`
/// when a contradictory constant row appears.
fn eliminate(rows: Vec<LinCons>, var: &Variable) -> Option<Vec<LinCons>> {
    let mut lowers: Vec<(f64, LinExpr, bool)> = Vec::new();
    let mut uppers: Vec<(f64, LinExpr, bool)> = Vec::new();
    let mut rest: Vec<LinCons> = Vec::new();
    for mut row in rows {
        let coeff = row.expr.take_term(var);
        if coeff > 0.0 {
            lowers.push((coeff, row.expr, row.strict));
        } else if coeff < 0.0 {
            uppers.push((coeff, row.expr, row.strict));
        } else {
            rest.push(row);
        }
    }
    trace!(
        target: "domain.poly",
        var = %var,
        lowers = lowers.len(),
        uppers = uppers.len(),
        "eliminate"
    );

    let mut out: Vec<LinCons> = Vec::with_capacity(rest.len() + lowers.len() * uppers.len());
    let mut seen: BTreeSet<(Vec<(Variable, i64)>, i64, bool)> = BTreeSet::new();
    let mut push = |row: LinCons| -> bool {
        let row = row.normalized();
        match row.constant_verdict() {
            Some(true) => true,
            Some(false) => false,
            None => {
                if seen.insert(row.quantized()) {
                    out.push(row);
                }
                true
            }
        }
    };

    for row in rest {
        if !push(row) {
            return None;
        }
    }
    // A lower row a*x + r >= 0 (a > 0) and an upper row a'*x + r' >= 0
    // (a' < 0) combine into (-a')*r + a*r' >= 0, cancelling x.
    for (lo_coeff, lo_rest, lo_strict) in &lowers {
        for (hi_coeff, hi_rest, hi_strict) in &uppers {
            let mut combined = lo_rest.scaled(-hi_coeff);
            combined.add_scaled(hi_rest, *lo_coeff);
            if !push(LinCons::new(combined, *lo_strict || *hi_strict)) {
                return None;
            }
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(name: &str) -> Variable {
        Variable::new(name)
    }

    fn assume_band(state: &mut Poly, name: &str, lo: f64, hi: f64) {
        state.assume_conj(&Formula::band(lo, &var(name), hi));
    }

    #[test]
    fn empty_state_is_not_bottom() {
        assert!(!Poly::top().is_bottom());
    }

    #[test]
    fn contradictory_band_is_bottom() {
        let mut state = Poly::top();
        assume_band(&mut state, "x", 0.0, 1.0);
        assume_band(&mut state, "x", 2.0, 3.0);
        assert!(state.is_bottom());
    }

    #[test]
    fn relational_contradiction_needs_elimination() {
        // x <= y, y <= z, z <= x - 1 has no solution.
        let mut state = Poly::top();
        state.assume_conj(&Formula::cmp(
            Term::Var(var("x")),
            CmpOp::Le,
            Term::Var(var("y")),
        ));
        state.assume_conj(&Formula::cmp(
            Term::Var(var("y")),
            CmpOp::Le,
            Term::Var(var("z")),
        ));
        let mut shifted = LinExpr::var(var("x"));
        shifted.add_scaled(&LinExpr::var(var("z")), -1.0);
        shifted.add_constant(-1.0);
        state.add_cons(shifted, false);
        assert!(state.is_bottom());

        // Dropping the last row leaves a satisfiable chain.
        let mut chain = Poly::top();
        chain.assume_conj(&Formula::cmp(
            Term::Var(var("x")),
            CmpOp::Le,
            Term::Var(var("y")),
        ));
        assert!(!chain.is_bottom());
    }

    #[test]
    fn substitution_rewrites_into_predecessor_variables() {
        // o - 0.25 > 0 under o := x - 0.3 becomes x - 0.55 > 0.
        let mut state = Poly::top();
        state.add_cons(LinExpr::var(var("o")).with_constant(-0.25), true);
        let rhs = LinExpr::var(var("x")).with_constant(-0.3);
        state.substitute(&var("o"), &rhs);
        assume_band(&mut state, "x", 0.0, 1.0);
        assert!(!state.is_bottom());
        let bound = state.bound(&var("x"));
        assert!((bound.lo - 0.55).abs() < 1e-6);
        assert!((bound.hi - 1.0).abs() < 1e-6);
    }

    #[test]
    fn forget_projects_away_relations() {
        let mut state = Poly::top();
        assume_band(&mut state, "x", 0.0, 1.0);
        state.assume_conj(&Formula::cmp(
            Term::Var(var("x")),
            CmpOp::Le,
            Term::Var(var("y")),
        ));
        assume_band(&mut state, "y", 0.0, 0.5);
        state.forget([&var("y")]);
        let bound = state.bound(&var("x"));
        assert!(bound.lo.abs() < 1e-6);
        assert!((bound.hi - 0.5).abs() < 1e-6);
    }

    #[test]
    fn meet_of_disjoint_halfspaces_is_bottom() {
        let mut left = Poly::top();
        left.add_cons(LinExpr::var(var("x")).with_constant(-0.55), true);
        let mut right = Poly::top();
        right.add_cons(LinExpr::var(var("x")).scaled(-1.0).with_constant(0.55), false);
        left.meet(&right);
        assert!(left.is_bottom());
    }

    #[test]
    fn canonical_key_is_insertion_order_independent() {
        let mut a = Poly::top();
        assume_band(&mut a, "x", 0.0, 1.0);
        assume_band(&mut a, "y", 0.25, 0.75);
        let mut b = Poly::top();
        assume_band(&mut b, "y", 0.25, 0.75);
        assume_band(&mut b, "x", 0.0, 1.0);
        assert_eq!(a.canonical_key(), b.canonical_key());
        assume_band(&mut b, "x", 0.0, 0.5);
        assert_ne!(a.canonical_key(), b.canonical_key());
    }

    #[test]
    fn scaled_rows_share_a_canonical_key() {
        let mut a = Poly::top();
        a.add_cons(LinExpr::var(var("x")).with_constant(-0.5), false);
        let mut b = Poly::top();
        b.add_cons(LinExpr::var(var("x")).scaled(4.0).with_constant(-2.0), false);
        assert_eq!(a.canonical_key(), b.canonical_key());
    }

    #[test]
    fn weak_join_keeps_shared_bounds() {
        let mut left = Poly::top();
        assume_band(&mut left, "x", 0.0, 0.4);
        let mut right = Poly::top();
        assume_band(&mut right, "x", 0.6, 1.0);
        let joined = left.join(&right);
        let bound = joined.bound(&var("x"));
        assert!(bound.lo.abs() < 1e-6);
        assert!((bound.hi - 1.0).abs() < 1e-6);
        assert!(!joined.is_bottom());
    }

    #[test]
    fn entails_respects_strictness() {
        let mut state = Poly::top();
        assume_band(&mut state, "x", 0.5, 1.0);
        let weak = LinCons::new(LinExpr::var(var("x")), false);
        let strict = LinCons::new(LinExpr::var(var("x")), true);
        let beyond = LinCons::new(LinExpr::var(var("x")).with_constant(-0.75), false);
        assert!(state.entails(&weak));
        assert!(state.entails(&strict));
        assert!(!state.entails(&beyond));
    }

    #[test]
    fn bound_expr_on_relations() {
        let mut state = Poly::top();
        assume_band(&mut state, "x", 0.0, 1.0);
        assume_band(&mut state, "y", 0.0, 1.0);
        let mut diff = LinExpr::var(var("x"));
        diff.add_scaled(&LinExpr::var(var("y")), -1.0);
        let bound = state.bound_expr(&diff);
        assert!((bound.lo + 1.0).abs() < 1e-6);
        assert!((bound.hi - 1.0).abs() < 1e-6);
    }
}
