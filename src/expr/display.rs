//! Infix rendering of expression trees.

use std::fmt;

use crate::expr::{Expr, MatrixExpr};

// Precedence levels: additive 1, multiplicative 2, unary minus 3, power 4,
// atoms and function calls 5. A child is parenthesized when its level is
// below what its position requires.
const ADD: u8 = 1;
const MUL: u8 = 2;
const NEG: u8 = 3;
const POW: u8 = 4;
const ATOM: u8 = 5;

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_prec(f, 0)
    }
}

impl Expr {
    fn prec(&self) -> u8 {
        match self {
            Expr::Plus(..) | Expr::Minus(..) | Expr::Sum(_) => ADD,
            Expr::Times(..) | Expr::Divide(..) | Expr::Product(_) => MUL,
            Expr::Variable { coef, .. } if *coef != 1.0 => MUL,
            Expr::Negate(_) => NEG,
            Expr::Power(..) | Expr::Square(_) => POW,
            _ => ATOM,
        }
    }

    fn fmt_prec(&self, f: &mut fmt::Formatter<'_>, min: u8) -> fmt::Result {
        let prec = self.prec();
        let parens = prec < min;
        if parens {
            write!(f, "(")?;
        }
        match self {
            Expr::Number(v) => write!(f, "{v}")?,
            Expr::Variable { idx, coef } => {
                if *coef == 1.0 {
                    write!(f, "x{idx}")?;
                } else {
                    write!(f, "{coef}*x{idx}")?;
                }
            }
            Expr::Pi => write!(f, "PI")?,
            Expr::E => write!(f, "E")?,
            Expr::Plus(l, r) => {
                l.fmt_prec(f, ADD)?;
                write!(f, " + ")?;
                r.fmt_prec(f, ADD)?;
            }
            Expr::Minus(l, r) => {
                l.fmt_prec(f, ADD)?;
                write!(f, " - ")?;
                r.fmt_prec(f, MUL)?;
            }
            Expr::Sum(terms) => {
                for (k, t) in terms.iter().enumerate() {
                    if k > 0 {
                        write!(f, " + ")?;
                    }
                    t.fmt_prec(f, ADD)?;
                }
            }
            Expr::Negate(c) => {
                write!(f, "-")?;
                c.fmt_prec(f, NEG)?;
            }
            Expr::Times(l, r) => {
                l.fmt_prec(f, MUL)?;
                write!(f, "*")?;
                r.fmt_prec(f, NEG)?;
            }
            Expr::Divide(l, r) => {
                l.fmt_prec(f, MUL)?;
                write!(f, "/")?;
                r.fmt_prec(f, NEG)?;
            }
            Expr::Product(terms) => {
                for (k, t) in terms.iter().enumerate() {
                    if k > 0 {
                        write!(f, "*")?;
                    }
                    t.fmt_prec(f, NEG)?;
                }
            }
            Expr::Power(l, r) => {
                l.fmt_prec(f, ATOM)?;
                write!(f, "^")?;
                r.fmt_prec(f, POW)?;
            }
            Expr::Square(c) => {
                c.fmt_prec(f, ATOM)?;
                write!(f, "^2")?;
            }
            Expr::Abs(c) => write!(f, "abs({c})")?,
            Expr::Sqrt(c) => write!(f, "sqrt({c})")?,
            Expr::Ln(c) => write!(f, "ln({c})")?,
            Expr::Exp(c) => write!(f, "exp({c})")?,
            Expr::Erf(c) => write!(f, "erf({c})")?,
            Expr::Sin(c) => write!(f, "sin({c})")?,
            Expr::Cos(c) => write!(f, "cos({c})")?,
            Expr::Min(terms) => fmt_call(f, "min", terms)?,
            Expr::Max(terms) => fmt_call(f, "max", terms)?,
            Expr::If(cond, then, els) => write!(f, "if({cond}, {then}, {els})")?,
            Expr::MatrixTrace(m) => write!(f, "trace({m})")?,
            Expr::MatrixDeterminant(m) => write!(f, "det({m})")?,
            Expr::MatrixToScalar(m) => write!(f, "scalar({m})")?,
        }
        if parens {
            write!(f, ")")?;
        }
        Ok(())
    }
}

fn fmt_call(f: &mut fmt::Formatter<'_>, name: &str, args: &[Expr]) -> fmt::Result {
    write!(f, "{name}(")?;
    for (k, a) in args.iter().enumerate() {
        if k > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{a}")?;
    }
    write!(f, ")")
}

impl fmt::Display for MatrixExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatrixExpr::Constant(m) => write!(f, "mat({}x{})", m.nrows(), m.ncols()),
            MatrixExpr::Identity(n) => write!(f, "I({n})"),
            MatrixExpr::Plus(a, b) => write!(f, "({a} + {b})"),
            MatrixExpr::Minus(a, b) => write!(f, "({a} - {b})"),
            MatrixExpr::Negate(a) => write!(f, "-{a}"),
            MatrixExpr::Times(a, b) => write!(f, "{a}*{b}"),
            MatrixExpr::ScalarTimes(s, m) => write!(f, "{s}*{m}"),
            MatrixExpr::Transpose(a) => write!(f, "transpose({a})"),
            MatrixExpr::Inverse(a) => write!(f, "inv({a})"),
            MatrixExpr::Diagonal(a) => write!(f, "diag({a})"),
            MatrixExpr::Submatrix {
                row_start,
                row_end,
                col_start,
                col_end,
                child,
            } => write!(f, "submat({child}, {row_start}..{row_end}, {col_start}..{col_end})"),
        }
    }
}
