//! Nonlinear expression trees.
//!
//! An [`Expr`] is one node of a scalar expression; it owns its children.
//! [`ExpressionTree`] wraps a root node with the caching and bookkeeping the
//! model layer needs: the set of referenced variables, a point-stamped value
//! cache, and the must-retape flag for expressions whose recorded operation
//! sequence depends on the evaluation point.

mod display;
mod matrix;
mod tokens;

pub use matrix::MatrixExpr;
pub use tokens::Token;

use std::cell::Cell;
use std::collections::{BTreeMap, BTreeSet};
use std::f64::consts;

use crate::error::EvalError;
use crate::tape::Tape;

pub(crate) use matrix::domain_eq;

/// A scalar expression node.
///
/// Binary arithmetic is binary; `Sum`, `Product`, `Min` and `Max` are n-ary.
/// The matrix bridges hold a matrix-valued subtree and reduce it to a scalar.
#[derive(Clone, Debug)]
pub enum Expr {
    /// Numeric literal. A NaN literal is legal and compares equal to itself
    /// under [`Expr::structurally_equal`].
    Number(f64),
    /// Reference to variable `idx`, scaled by `coef`.
    Variable { idx: usize, coef: f64 },
    /// The constant π.
    Pi,
    /// The constant e.
    E,
    Plus(Box<Expr>, Box<Expr>),
    Sum(Vec<Expr>),
    Minus(Box<Expr>, Box<Expr>),
    Negate(Box<Expr>),
    Times(Box<Expr>, Box<Expr>),
    Divide(Box<Expr>, Box<Expr>),
    Power(Box<Expr>, Box<Expr>),
    Product(Vec<Expr>),
    Abs(Box<Expr>),
    Square(Box<Expr>),
    Sqrt(Box<Expr>),
    Ln(Box<Expr>),
    Exp(Box<Expr>),
    Erf(Box<Expr>),
    Sin(Box<Expr>),
    Cos(Box<Expr>),
    Min(Vec<Expr>),
    Max(Vec<Expr>),
    /// `if(cond, then, else)`: selects `then` when `cond >= 0`, `else`
    /// otherwise (a NaN condition selects `else`). The selected branch can
    /// change with the input, so any tree containing this node must be
    /// re-recorded at every new point.
    If(Box<Expr>, Box<Expr>, Box<Expr>),
    /// Trace of a square matrix subexpression.
    MatrixTrace(Box<MatrixExpr>),
    /// Determinant of a square matrix subexpression.
    MatrixDeterminant(Box<MatrixExpr>),
    /// Value of a 1×1 matrix subexpression.
    MatrixToScalar(Box<MatrixExpr>),
}

impl Expr {
    /// Convenience constructor for an unscaled variable reference.
    pub fn variable(idx: usize) -> Expr {
        Expr::Variable { idx, coef: 1.0 }
    }

    /// Evaluate at `x` with IEEE semantics: domain violations propagate as
    /// NaN/±∞ rather than failing.
    ///
    /// `x` is the full variable vector; `x.len()` must cover every referenced
    /// index.
    pub fn evaluate(&self, x: &[f64]) -> f64 {
        match self {
            Expr::Number(v) => *v,
            Expr::Variable { idx, coef } => coef * x[*idx],
            Expr::Pi => consts::PI,
            Expr::E => consts::E,
            Expr::Plus(l, r) => l.evaluate(x) + r.evaluate(x),
            Expr::Sum(terms) => terms.iter().map(|t| t.evaluate(x)).sum(),
            Expr::Minus(l, r) => l.evaluate(x) - r.evaluate(x),
            Expr::Negate(c) => -c.evaluate(x),
            Expr::Times(l, r) => l.evaluate(x) * r.evaluate(x),
            Expr::Divide(l, r) => l.evaluate(x) / r.evaluate(x),
            Expr::Power(l, r) => l.evaluate(x).powf(r.evaluate(x)),
            Expr::Product(factors) => factors.iter().map(|t| t.evaluate(x)).product(),
            Expr::Abs(c) => c.evaluate(x).abs(),
            Expr::Square(c) => {
                let v = c.evaluate(x);
                v * v
            }
            Expr::Sqrt(c) => c.evaluate(x).sqrt(),
            Expr::Ln(c) => c.evaluate(x).ln(),
            Expr::Exp(c) => c.evaluate(x).exp(),
            Expr::Erf(c) => libm::erf(c.evaluate(x)),
            Expr::Sin(c) => c.evaluate(x).sin(),
            Expr::Cos(c) => c.evaluate(x).cos(),
            // Branch selection matches the tape opcodes: the first operand
            // wins ties, NaN falls through to the other side.
            Expr::Min(terms) => fold_select(terms, x, |acc, v| acc <= v),
            Expr::Max(terms) => fold_select(terms, x, |acc, v| acc >= v),
            Expr::If(cond, then, els) => {
                if cond.evaluate(x) >= 0.0 {
                    then.evaluate(x)
                } else {
                    els.evaluate(x)
                }
            }
            Expr::MatrixTrace(m) => m.evaluate_checked(x).map_or(f64::NAN, |m| {
                if m.is_square() {
                    m.trace()
                } else {
                    f64::NAN
                }
            }),
            Expr::MatrixDeterminant(m) => m.evaluate_checked(x).map_or(f64::NAN, |m| {
                if m.is_square() {
                    m.determinant()
                } else {
                    f64::NAN
                }
            }),
            Expr::MatrixToScalar(m) => m.evaluate_checked(x).map_or(f64::NAN, |m| {
                if m.nrows() == 1 && m.ncols() == 1 {
                    m[(0, 0)]
                } else {
                    f64::NAN
                }
            }),
        }
    }

    /// Strict evaluation: domain violations are reported instead of
    /// propagating as NaN.
    pub fn evaluate_checked(&self, x: &[f64]) -> Result<f64, EvalError> {
        match self {
            Expr::Divide(l, r) => {
                let denom = r.evaluate_checked(x)?;
                if denom == 0.0 {
                    return Err(EvalError::DivisionByZero);
                }
                Ok(l.evaluate_checked(x)? / denom)
            }
            Expr::Power(l, r) => {
                let base = l.evaluate_checked(x)?;
                let exp = r.evaluate_checked(x)?;
                if base < 0.0 && exp.fract() != 0.0 {
                    return Err(EvalError::PowDomain);
                }
                if base == 0.0 && exp < 0.0 {
                    return Err(EvalError::DivisionByZero);
                }
                Ok(base.powf(exp))
            }
            Expr::Sqrt(c) => {
                let v = c.evaluate_checked(x)?;
                if v < 0.0 {
                    return Err(EvalError::SqrtDomain);
                }
                Ok(v.sqrt())
            }
            Expr::Ln(c) => {
                let v = c.evaluate_checked(x)?;
                if v <= 0.0 {
                    return Err(EvalError::LogDomain);
                }
                Ok(v.ln())
            }
            Expr::Plus(l, r) => Ok(l.evaluate_checked(x)? + r.evaluate_checked(x)?),
            Expr::Minus(l, r) => Ok(l.evaluate_checked(x)? - r.evaluate_checked(x)?),
            Expr::Times(l, r) => Ok(l.evaluate_checked(x)? * r.evaluate_checked(x)?),
            Expr::Negate(c) => Ok(-c.evaluate_checked(x)?),
            Expr::Sum(terms) => {
                let mut acc = 0.0;
                for t in terms {
                    acc += t.evaluate_checked(x)?;
                }
                Ok(acc)
            }
            Expr::Product(factors) => {
                let mut acc = 1.0;
                for t in factors {
                    acc *= t.evaluate_checked(x)?;
                }
                Ok(acc)
            }
            Expr::Abs(c) => Ok(c.evaluate_checked(x)?.abs()),
            Expr::Square(c) => {
                let v = c.evaluate_checked(x)?;
                Ok(v * v)
            }
            Expr::Exp(c) => Ok(c.evaluate_checked(x)?.exp()),
            Expr::Erf(c) => Ok(libm::erf(c.evaluate_checked(x)?)),
            Expr::Sin(c) => Ok(c.evaluate_checked(x)?.sin()),
            Expr::Cos(c) => Ok(c.evaluate_checked(x)?.cos()),
            Expr::Min(terms) => {
                let mut acc = f64::NAN;
                for (k, t) in terms.iter().enumerate() {
                    let v = t.evaluate_checked(x)?;
                    if k == 0 || !(acc <= v) {
                        acc = v;
                    }
                }
                Ok(acc)
            }
            Expr::Max(terms) => {
                let mut acc = f64::NAN;
                for (k, t) in terms.iter().enumerate() {
                    let v = t.evaluate_checked(x)?;
                    if k == 0 || !(acc >= v) {
                        acc = v;
                    }
                }
                Ok(acc)
            }
            Expr::If(cond, then, els) => {
                if cond.evaluate_checked(x)? >= 0.0 {
                    then.evaluate_checked(x)
                } else {
                    els.evaluate_checked(x)
                }
            }
            Expr::MatrixTrace(m) => {
                let m = m.evaluate_checked(x)?;
                if !m.is_square() {
                    return Err(EvalError::DimensionMismatch {
                        reason: format!("trace of non-square {}x{}", m.nrows(), m.ncols()),
                    });
                }
                Ok(m.trace())
            }
            Expr::MatrixDeterminant(m) => {
                let m = m.evaluate_checked(x)?;
                if !m.is_square() {
                    return Err(EvalError::DimensionMismatch {
                        reason: format!("determinant of non-square {}x{}", m.nrows(), m.ncols()),
                    });
                }
                Ok(m.determinant())
            }
            Expr::MatrixToScalar(m) => {
                let m = m.evaluate_checked(x)?;
                if m.nrows() != 1 || m.ncols() != 1 {
                    return Err(EvalError::DimensionMismatch {
                        reason: format!("scalar extraction from {}x{}", m.nrows(), m.ncols()),
                    });
                }
                Ok(m[(0, 0)])
            }
            Expr::Number(_) | Expr::Variable { .. } | Expr::Pi | Expr::E => Ok(self.evaluate(x)),
        }
    }

    /// Indices of every variable referenced in this subtree, ascending.
    ///
    /// Matrix subtrees are constant with respect to the variables and
    /// contribute nothing.
    pub fn variable_indices(&self) -> BTreeSet<usize> {
        let mut out = BTreeSet::new();
        self.collect_variables(&mut out);
        out
    }

    fn collect_variables(&self, out: &mut BTreeSet<usize>) {
        match self {
            Expr::Variable { idx, .. } => {
                out.insert(*idx);
            }
            Expr::Number(_) | Expr::Pi | Expr::E => {}
            Expr::Plus(l, r)
            | Expr::Minus(l, r)
            | Expr::Times(l, r)
            | Expr::Divide(l, r)
            | Expr::Power(l, r) => {
                l.collect_variables(out);
                r.collect_variables(out);
            }
            Expr::Negate(c)
            | Expr::Abs(c)
            | Expr::Square(c)
            | Expr::Sqrt(c)
            | Expr::Ln(c)
            | Expr::Exp(c)
            | Expr::Erf(c)
            | Expr::Sin(c)
            | Expr::Cos(c) => c.collect_variables(out),
            Expr::Sum(terms) | Expr::Product(terms) | Expr::Min(terms) | Expr::Max(terms) => {
                for t in terms {
                    t.collect_variables(out);
                }
            }
            Expr::If(cond, then, els) => {
                cond.collect_variables(out);
                then.collect_variables(out);
                els.collect_variables(out);
            }
            Expr::MatrixTrace(_) | Expr::MatrixDeterminant(_) | Expr::MatrixToScalar(_) => {}
        }
    }

    /// Whether the recorded operation sequence can change with the input.
    /// True iff the subtree contains a conditional.
    pub fn requires_retape(&self) -> bool {
        match self {
            Expr::If(..) => true,
            Expr::Number(_)
            | Expr::Variable { .. }
            | Expr::Pi
            | Expr::E
            | Expr::MatrixTrace(_)
            | Expr::MatrixDeterminant(_)
            | Expr::MatrixToScalar(_) => false,
            Expr::Plus(l, r)
            | Expr::Minus(l, r)
            | Expr::Times(l, r)
            | Expr::Divide(l, r)
            | Expr::Power(l, r) => l.requires_retape() || r.requires_retape(),
            Expr::Negate(c)
            | Expr::Abs(c)
            | Expr::Square(c)
            | Expr::Sqrt(c)
            | Expr::Ln(c)
            | Expr::Exp(c)
            | Expr::Erf(c)
            | Expr::Sin(c)
            | Expr::Cos(c) => c.requires_retape(),
            Expr::Sum(terms) | Expr::Product(terms) | Expr::Min(terms) | Expr::Max(terms) => {
                terms.iter().any(Expr::requires_retape)
            }
        }
    }

    /// Recursive structural equality.
    ///
    /// Leaf values use domain equality: NaN compares equal to NaN. This is
    /// deliberately different from arithmetic comparison, which would make a
    /// NaN literal unequal to itself.
    pub fn structurally_equal(&self, other: &Expr) -> bool {
        use Expr::*;
        match (self, other) {
            (Number(a), Number(b)) => domain_eq(*a, *b),
            (Variable { idx: i, coef: a }, Variable { idx: j, coef: b }) => {
                i == j && domain_eq(*a, *b)
            }
            (Pi, Pi) | (E, E) => true,
            (Plus(a1, a2), Plus(b1, b2))
            | (Minus(a1, a2), Minus(b1, b2))
            | (Times(a1, a2), Times(b1, b2))
            | (Divide(a1, a2), Divide(b1, b2))
            | (Power(a1, a2), Power(b1, b2)) => {
                a1.structurally_equal(b1) && a2.structurally_equal(b2)
            }
            (Negate(a), Negate(b))
            | (Abs(a), Abs(b))
            | (Square(a), Square(b))
            | (Sqrt(a), Sqrt(b))
            | (Ln(a), Ln(b))
            | (Exp(a), Exp(b))
            | (Erf(a), Erf(b))
            | (Sin(a), Sin(b))
            | (Cos(a), Cos(b)) => a.structurally_equal(b),
            (Sum(a), Sum(b)) | (Product(a), Product(b)) | (Min(a), Min(b)) | (Max(a), Max(b)) => {
                a.len() == b.len()
                    && a.iter().zip(b.iter()).all(|(x, y)| x.structurally_equal(y))
            }
            (If(c1, t1, e1), If(c2, t2, e2)) => {
                c1.structurally_equal(c2)
                    && t1.structurally_equal(t2)
                    && e1.structurally_equal(e2)
            }
            (MatrixTrace(a), MatrixTrace(b))
            | (MatrixDeterminant(a), MatrixDeterminant(b))
            | (MatrixToScalar(a), MatrixToScalar(b)) => a.structurally_equal(b),
            _ => false,
        }
    }

    /// Flatten this expression onto the tape.
    ///
    /// `var_map` maps original variable indices to dense tape inputs, which
    /// must already be registered (input `d` lives at tape index `d`). `x` is
    /// the full-space recording point; conditionals evaluate their condition
    /// against it and record only the branch taken, reporting the fact
    /// through `retaped`.
    pub(crate) fn record(
        &self,
        tape: &mut Tape<f64>,
        var_map: &BTreeMap<usize, usize>,
        x: &[f64],
        retaped: &mut bool,
    ) -> u32 {
        use crate::opcode::OpCode;

        match self {
            Expr::Number(v) => tape.push_const(*v),
            Expr::Pi => tape.push_const(consts::PI),
            Expr::E => tape.push_const(consts::E),
            Expr::Variable { idx, coef } => {
                let dense = *var_map
                    .get(idx)
                    .expect("variable missing from the tape domain");
                let input = dense as u32;
                if *coef == 1.0 {
                    input
                } else {
                    let c = tape.push_const(*coef);
                    let v = coef * tape.value_at(input);
                    tape.push_op(OpCode::Mul, input, c, v)
                }
            }
            Expr::Plus(l, r) => {
                let a = l.record(tape, var_map, x, retaped);
                let b = r.record(tape, var_map, x, retaped);
                push_binary(tape, OpCode::Add, a, b)
            }
            Expr::Minus(l, r) => {
                let a = l.record(tape, var_map, x, retaped);
                let b = r.record(tape, var_map, x, retaped);
                push_binary(tape, OpCode::Sub, a, b)
            }
            Expr::Times(l, r) => {
                let a = l.record(tape, var_map, x, retaped);
                let b = r.record(tape, var_map, x, retaped);
                push_binary(tape, OpCode::Mul, a, b)
            }
            Expr::Divide(l, r) => {
                let a = l.record(tape, var_map, x, retaped);
                let b = r.record(tape, var_map, x, retaped);
                push_binary(tape, OpCode::Div, a, b)
            }
            Expr::Power(l, r) => {
                let a = l.record(tape, var_map, x, retaped);
                let b = r.record(tape, var_map, x, retaped);
                push_binary(tape, OpCode::Pow, a, b)
            }
            Expr::Sum(terms) => push_nary(tape, OpCode::Add, terms, var_map, x, retaped),
            Expr::Product(terms) => push_nary(tape, OpCode::Mul, terms, var_map, x, retaped),
            Expr::Min(terms) => push_nary(tape, OpCode::Min, terms, var_map, x, retaped),
            Expr::Max(terms) => push_nary(tape, OpCode::Max, terms, var_map, x, retaped),
            Expr::Negate(c) => {
                let a = c.record(tape, var_map, x, retaped);
                push_unary(tape, OpCode::Neg, a)
            }
            Expr::Abs(c) => {
                let a = c.record(tape, var_map, x, retaped);
                push_unary(tape, OpCode::Abs, a)
            }
            Expr::Square(c) => {
                let a = c.record(tape, var_map, x, retaped);
                push_unary(tape, OpCode::Square, a)
            }
            Expr::Sqrt(c) => {
                let a = c.record(tape, var_map, x, retaped);
                push_unary(tape, OpCode::Sqrt, a)
            }
            Expr::Ln(c) => {
                let a = c.record(tape, var_map, x, retaped);
                push_unary(tape, OpCode::Ln, a)
            }
            Expr::Exp(c) => {
                let a = c.record(tape, var_map, x, retaped);
                push_unary(tape, OpCode::Exp, a)
            }
            Expr::Erf(c) => {
                let a = c.record(tape, var_map, x, retaped);
                push_unary(tape, OpCode::Erf, a)
            }
            Expr::Sin(c) => {
                let a = c.record(tape, var_map, x, retaped);
                push_unary(tape, OpCode::Sin, a)
            }
            Expr::Cos(c) => {
                let a = c.record(tape, var_map, x, retaped);
                push_unary(tape, OpCode::Cos, a)
            }
            Expr::If(cond, then, els) => {
                *retaped = true;
                if cond.evaluate(x) >= 0.0 {
                    then.record(tape, var_map, x, retaped)
                } else {
                    els.record(tape, var_map, x, retaped)
                }
            }
            Expr::MatrixTrace(m) | Expr::MatrixDeterminant(m) | Expr::MatrixToScalar(m) => {
                assert!(
                    !m.has_variables(),
                    "matrix subexpressions must be variable-free"
                );
                tape.push_const(self.evaluate(x))
            }
        }
    }
}

/// Record a unary operation, computing its value at the recording point.
fn push_unary(tape: &mut Tape<f64>, op: crate::opcode::OpCode, a: u32) -> u32 {
    let v = crate::opcode::eval_forward(op, tape.value_at(a), 0.0);
    tape.push_op(op, a, crate::opcode::UNUSED, v)
}

/// Record a binary operation, computing its value at the recording point.
fn push_binary(tape: &mut Tape<f64>, op: crate::opcode::OpCode, a: u32, b: u32) -> u32 {
    let v = crate::opcode::eval_forward(op, tape.value_at(a), tape.value_at(b));
    tape.push_op(op, a, b, v)
}

/// Record an n-ary operation as a left-associated fold of its binary opcode.
fn push_nary(
    tape: &mut Tape<f64>,
    op: crate::opcode::OpCode,
    terms: &[Expr],
    var_map: &BTreeMap<usize, usize>,
    x: &[f64],
    retaped: &mut bool,
) -> u32 {
    let mut acc = terms[0].record(tape, var_map, x, retaped);
    for t in &terms[1..] {
        let rhs = t.record(tape, var_map, x, retaped);
        acc = push_binary(tape, op, acc, rhs);
    }
    acc
}

/// Fold an n-ary selection with the same tie/NaN behavior as the tape's
/// `Min`/`Max` opcodes.
fn fold_select(terms: &[Expr], x: &[f64], keep_acc: impl Fn(f64, f64) -> bool) -> f64 {
    let mut acc = f64::NAN;
    for (k, t) in terms.iter().enumerate() {
        let v = t.evaluate(x);
        if k == 0 || !keep_acc(acc, v) {
            acc = v;
        }
    }
    acc
}

/// An owning wrapper around a root [`Expr`] with the bookkeeping the model
/// and the derivative engine need.
#[derive(Debug)]
pub struct ExpressionTree {
    root: Expr,
    must_retape: bool,
    /// Original variable index → ordinal within this tree (ascending).
    var_map: BTreeMap<usize, usize>,
    /// `(point generation, value)` of the latest root evaluation.
    cached: Cell<Option<(u64, f64)>>,
    /// Number of root traversals performed; cache hits do not count.
    evals: Cell<u64>,
}

impl ExpressionTree {
    /// Wrap a root node. The variable map and the must-retape flag are
    /// derived here and never change afterwards.
    pub fn new(root: Expr) -> Self {
        let var_map = root
            .variable_indices()
            .into_iter()
            .enumerate()
            .map(|(pos, idx)| (idx, pos))
            .collect();
        let must_retape = root.requires_retape();
        ExpressionTree {
            root,
            must_retape,
            var_map,
            cached: Cell::new(None),
            evals: Cell::new(0),
        }
    }

    /// The root node.
    pub fn root(&self) -> &Expr {
        &self.root
    }

    /// Whether the tape must be re-recorded at every new point.
    pub fn must_retape(&self) -> bool {
        self.must_retape
    }

    /// Map from original variable index to this tree's ordinal numbering.
    pub fn variable_index_map(&self) -> &BTreeMap<usize, usize> {
        &self.var_map
    }

    /// Evaluate the root at `x`, reusing the cached value when `generation`
    /// matches the generation of the previous call.
    ///
    /// Callers own the generation contract: passing an unchanged generation
    /// with a genuinely different `x` returns the stale cached value.
    pub fn evaluate(&self, x: &[f64], generation: u64) -> f64 {
        if let Some((gen, val)) = self.cached.get() {
            if gen == generation {
                return val;
            }
        }
        let val = self.root.evaluate(x);
        self.evals.set(self.evals.get() + 1);
        self.cached.set(Some((generation, val)));
        val
    }

    /// Number of root traversals performed so far (cache hits excluded).
    pub fn evaluation_count(&self) -> u64 {
        self.evals.get()
    }

    /// Structural equality of the root nodes.
    pub fn structurally_equal(&self, other: &ExpressionTree) -> bool {
        self.root.structurally_equal(&other.root)
    }
}

impl Clone for ExpressionTree {
    fn clone(&self) -> Self {
        // A clone starts with cold caches; sharing a stamped value across
        // trees would couple their generations.
        ExpressionTree::new(self.root.clone())
    }
}
