//! Symbolic expressions over named input and neuron variables.
//!
//! Everything the analysis assumes on an abstract state is built here first:
//! linear comparisons, their `And`/`Or` combinations, and the sparse linear
//! expressions that appear on the right-hand side of affine assignments.
//! Formulas are plain trees; the abstract domains interpret them, nothing in
//! this crate evaluates over abstract values. A concrete evaluator (`eval`)
//! exists for tests and sanity checks only.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

mod onehot;

pub use onehot::{OneHot1, OneHotN, cartesian, one_hots};

/// An interned variable name. Cheap to clone; ordered and hashable so it can
/// key the maps the engine builds over features and neurons.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Variable(Arc<str>);

impl Variable {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Variable {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Operand of a comparison: a numeric literal or a variable.
#[derive(Clone, PartialEq, Debug)]
pub enum Term {
    Lit(f64),
    Var(Variable),
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Lit(value) => write!(f, "{value}"),
            Term::Var(var) => write!(f, "{var}"),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CmpOp {
    /// `lhs <= rhs`
    Le,
    /// `lhs < rhs`
    Lt,
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CmpOp::Le => "<=",
            CmpOp::Lt => "<",
        })
    }
}

/// A single linear comparison `lhs OP rhs`.
#[derive(Clone, PartialEq, Debug)]
pub struct Comparison {
    pub lhs: Term,
    pub op: CmpOp,
    pub rhs: Term,
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.lhs, self.op, self.rhs)
    }
}

/// Boolean combination of comparisons.
#[derive(Clone, PartialEq, Debug)]
pub enum Formula {
    Cmp(Comparison),
    And(Box<Formula>, Box<Formula>),
    Or(Box<Formula>, Box<Formula>),
}

impl Formula {
    pub fn cmp(lhs: Term, op: CmpOp, rhs: Term) -> Self {
        Formula::Cmp(Comparison { lhs, op, rhs })
    }

    pub fn and(left: Formula, right: Formula) -> Self {
        Formula::And(Box::new(left), Box::new(right))
    }

    pub fn or(left: Formula, right: Formula) -> Self {
        Formula::Or(Box::new(left), Box::new(right))
    }

    /// `lo <= var && var <= hi`.
    pub fn band(lo: f64, var: &Variable, hi: f64) -> Self {
        let lower = Formula::cmp(Term::Lit(lo), CmpOp::Le, Term::Var(var.clone()));
        let upper = Formula::cmp(Term::Var(var.clone()), CmpOp::Le, Term::Lit(hi));
        Formula::and(lower, upper)
    }

    /// Conjunction of the given formulas; `None` when the iterator is empty.
    pub fn conjoin(formulas: impl IntoIterator<Item = Formula>) -> Option<Formula> {
        formulas.into_iter().reduce(Formula::and)
    }

    /// Disjunction of the given formulas; `None` when the iterator is empty.
    pub fn disjoin(formulas: impl IntoIterator<Item = Formula>) -> Option<Formula> {
        formulas.into_iter().reduce(Formula::or)
    }

    /// The comparison leaves of a pure conjunction, or `None` if any `Or`
    /// occurs anywhere in the tree.
    pub fn conjuncts(&self) -> Option<Vec<&Comparison>> {
        let mut atoms = Vec::new();
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            match node {
                Formula::Cmp(cmp) => atoms.push(cmp),
                Formula::And(left, right) => {
                    stack.push(right);
                    stack.push(left);
                }
                Formula::Or(..) => return None,
            }
        }
        Some(atoms)
    }

    /// Concrete truth value under a total assignment. Unbound variables
    /// default to 0. Test support; the analysis itself never evaluates.
    pub fn eval(&self, env: &BTreeMap<Variable, f64>) -> bool {
        match self {
            Formula::Cmp(cmp) => {
                let value = |term: &Term| match term {
                    Term::Lit(v) => *v,
                    Term::Var(var) => env.get(var).copied().unwrap_or(0.0),
                };
                match cmp.op {
                    CmpOp::Le => value(&cmp.lhs) <= value(&cmp.rhs),
                    CmpOp::Lt => value(&cmp.lhs) < value(&cmp.rhs),
                }
            }
            Formula::And(left, right) => left.eval(env) && right.eval(env),
            Formula::Or(left, right) => left.eval(env) || right.eval(env),
        }
    }
}

impl fmt::Display for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Formula::Cmp(cmp) => write!(f, "{cmp}"),
            Formula::And(left, right) => write!(f, "({left} && {right})"),
            Formula::Or(left, right) => write!(f, "({left} || {right})"),
        }
    }
}

/// A sparse linear expression `sum(coeff * var) + constant`.
///
/// Zero coefficients are pruned eagerly so that `vars` and equality behave
/// structurally.
#[derive(Clone, PartialEq, Debug, Default)]
pub struct LinExpr {
    terms: BTreeMap<Variable, f64>,
    constant: f64,
}

impl LinExpr {
    pub fn constant(value: f64) -> Self {
        Self {
            terms: BTreeMap::new(),
            constant: value,
        }
    }

    /// The expression consisting of `var` with coefficient 1.
    pub fn var(var: Variable) -> Self {
        let mut terms = BTreeMap::new();
        terms.insert(var, 1.0);
        Self {
            terms,
            constant: 0.0,
        }
    }

    /// Builder-style term insertion, replacing any previous coefficient.
    pub fn with_term(mut self, var: Variable, coeff: f64) -> Self {
        self.set_term(var, coeff);
        self
    }

    pub fn with_constant(mut self, value: f64) -> Self {
        self.constant = value;
        self
    }

    pub fn set_term(&mut self, var: Variable, coeff: f64) {
        if coeff == 0.0 {
            self.terms.remove(&var);
        } else {
            self.terms.insert(var, coeff);
        }
    }

    pub fn coefficient(&self, var: &Variable) -> f64 {
        self.terms.get(var).copied().unwrap_or(0.0)
    }

    /// Removes `var` from the expression, returning its coefficient.
    pub fn take_term(&mut self, var: &Variable) -> f64 {
        self.terms.remove(var).unwrap_or(0.0)
    }

    pub fn constant_part(&self) -> f64 {
        self.constant
    }

    pub fn add_constant(&mut self, value: f64) {
        self.constant += value;
    }

    /// `self += factor * other`.
    pub fn add_scaled(&mut self, other: &LinExpr, factor: f64) {
        for (var, coeff) in &other.terms {
            let updated = self.coefficient(var) + factor * coeff;
            self.set_term(var.clone(), updated);
        }
        self.constant += factor * other.constant;
    }

    pub fn scaled(&self, factor: f64) -> LinExpr {
        let mut out = LinExpr::default();
        out.add_scaled(self, factor);
        out
    }

    pub fn terms(&self) -> impl Iterator<Item = (&Variable, f64)> {
        self.terms.iter().map(|(var, coeff)| (var, *coeff))
    }

    pub fn vars(&self) -> impl Iterator<Item = &Variable> {
        self.terms.keys()
    }

    pub fn is_constant(&self) -> bool {
        self.terms.is_empty()
    }
}

impl fmt::Display for LinExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (var, coeff) in &self.terms {
            if first {
                write!(f, "{coeff}*{var}")?;
                first = false;
            } else if *coeff < 0.0 {
                write!(f, " - {}*{var}", -coeff)?;
            } else {
                write!(f, " + {coeff}*{var}")?;
            }
        }
        if first {
            write!(f, "{}", self.constant)
        } else if self.constant < 0.0 {
            write!(f, " - {}", -self.constant)
        } else if self.constant > 0.0 {
            write!(f, " + {}", self.constant)
        } else {
            Ok(())
        }
    }
}
