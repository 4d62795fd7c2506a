//! Prefix/postfix linearization of expression trees.
//!
//! `to_postfix`/`to_prefix` flatten a tree into a token sequence;
//! `from_postfix`/`from_prefix` rebuild an equivalent tree (same shape, same
//! leaf values, child order preserved), so the two directions round-trip.
//! Reconstruction runs a stack machine with separate scalar and matrix
//! stacks; n-ary operators carry their arity in the token.

use nalgebra::DMatrix;

use crate::error::TokenStreamError;
use crate::expr::{Expr, MatrixExpr};

/// One token of a linearized expression.
#[derive(Clone, Debug, PartialEq)]
pub enum Token {
    // ── Scalar leaves ──
    Number(f64),
    Variable { idx: usize, coef: f64 },
    Pi,
    E,

    // ── Scalar operators ──
    Plus,
    Minus,
    Negate,
    Times,
    Divide,
    Power,
    Sum(usize),
    Product(usize),
    Min(usize),
    Max(usize),
    Abs,
    Square,
    Sqrt,
    Ln,
    Exp,
    Erf,
    Sin,
    Cos,
    If,

    // ── Scalar-valued matrix bridges ──
    MatrixTrace,
    MatrixDeterminant,
    MatrixToScalar,

    // ── Matrix leaves and operators ──
    MatrixConstant(DMatrix<f64>),
    MatrixIdentity(usize),
    MatrixPlus,
    MatrixMinus,
    MatrixNegate,
    MatrixTimes,
    MatrixScalarTimes,
    MatrixTranspose,
    MatrixInverse,
    MatrixDiagonal,
    MatrixSubmatrix {
        row_start: usize,
        row_end: usize,
        col_start: usize,
        col_end: usize,
    },
}

impl Token {
    fn name(&self) -> &'static str {
        match self {
            Token::Number(_) => "number",
            Token::Variable { .. } => "variable",
            Token::Pi => "pi",
            Token::E => "e",
            Token::Plus => "plus",
            Token::Minus => "minus",
            Token::Negate => "negate",
            Token::Times => "times",
            Token::Divide => "divide",
            Token::Power => "power",
            Token::Sum(_) => "sum",
            Token::Product(_) => "product",
            Token::Min(_) => "min",
            Token::Max(_) => "max",
            Token::Abs => "abs",
            Token::Square => "square",
            Token::Sqrt => "sqrt",
            Token::Ln => "ln",
            Token::Exp => "exp",
            Token::Erf => "erf",
            Token::Sin => "sin",
            Token::Cos => "cos",
            Token::If => "if",
            Token::MatrixTrace => "matrixTrace",
            Token::MatrixDeterminant => "matrixDeterminant",
            Token::MatrixToScalar => "matrixToScalar",
            Token::MatrixConstant(_) => "matrixConstant",
            Token::MatrixIdentity(_) => "matrixIdentity",
            Token::MatrixPlus => "matrixPlus",
            Token::MatrixMinus => "matrixMinus",
            Token::MatrixNegate => "matrixNegate",
            Token::MatrixTimes => "matrixTimes",
            Token::MatrixScalarTimes => "matrixScalarTimes",
            Token::MatrixTranspose => "matrixTranspose",
            Token::MatrixInverse => "matrixInverse",
            Token::MatrixDiagonal => "matrixDiagonal",
            Token::MatrixSubmatrix { .. } => "matrixSubmatrix",
        }
    }
}

impl Expr {
    /// Linearize to postfix (children before operator).
    pub fn to_postfix(&self) -> Vec<Token> {
        let mut out = Vec::new();
        self.emit(&mut out, false);
        out
    }

    /// Linearize to prefix (operator before children).
    pub fn to_prefix(&self) -> Vec<Token> {
        let mut out = Vec::new();
        self.emit(&mut out, true);
        out
    }

    /// Rebuild a tree from a postfix token sequence.
    pub fn from_postfix(tokens: &[Token]) -> Result<Expr, TokenStreamError> {
        reduce(tokens.iter(), true)
    }

    /// Rebuild a tree from a prefix token sequence.
    pub fn from_prefix(tokens: &[Token]) -> Result<Expr, TokenStreamError> {
        reduce(tokens.iter().rev(), false)
    }

    fn emit(&self, out: &mut Vec<Token>, prefix: bool) {
        let op = |e: &Expr| -> Token {
            match e {
                Expr::Number(v) => Token::Number(*v),
                Expr::Variable { idx, coef } => Token::Variable {
                    idx: *idx,
                    coef: *coef,
                },
                Expr::Pi => Token::Pi,
                Expr::E => Token::E,
                Expr::Plus(..) => Token::Plus,
                Expr::Minus(..) => Token::Minus,
                Expr::Negate(_) => Token::Negate,
                Expr::Times(..) => Token::Times,
                Expr::Divide(..) => Token::Divide,
                Expr::Power(..) => Token::Power,
                Expr::Sum(t) => Token::Sum(t.len()),
                Expr::Product(t) => Token::Product(t.len()),
                Expr::Min(t) => Token::Min(t.len()),
                Expr::Max(t) => Token::Max(t.len()),
                Expr::Abs(_) => Token::Abs,
                Expr::Square(_) => Token::Square,
                Expr::Sqrt(_) => Token::Sqrt,
                Expr::Ln(_) => Token::Ln,
                Expr::Exp(_) => Token::Exp,
                Expr::Erf(_) => Token::Erf,
                Expr::Sin(_) => Token::Sin,
                Expr::Cos(_) => Token::Cos,
                Expr::If(..) => Token::If,
                Expr::MatrixTrace(_) => Token::MatrixTrace,
                Expr::MatrixDeterminant(_) => Token::MatrixDeterminant,
                Expr::MatrixToScalar(_) => Token::MatrixToScalar,
            }
        };

        if prefix {
            out.push(op(self));
        }
        match self {
            Expr::Number(_) | Expr::Variable { .. } | Expr::Pi | Expr::E => {}
            Expr::Plus(l, r)
            | Expr::Minus(l, r)
            | Expr::Times(l, r)
            | Expr::Divide(l, r)
            | Expr::Power(l, r) => {
                l.emit(out, prefix);
                r.emit(out, prefix);
            }
            Expr::Negate(c)
            | Expr::Abs(c)
            | Expr::Square(c)
            | Expr::Sqrt(c)
            | Expr::Ln(c)
            | Expr::Exp(c)
            | Expr::Erf(c)
            | Expr::Sin(c)
            | Expr::Cos(c) => c.emit(out, prefix),
            Expr::Sum(terms) | Expr::Product(terms) | Expr::Min(terms) | Expr::Max(terms) => {
                for t in terms {
                    t.emit(out, prefix);
                }
            }
            Expr::If(cond, then, els) => {
                cond.emit(out, prefix);
                then.emit(out, prefix);
                els.emit(out, prefix);
            }
            Expr::MatrixTrace(m) | Expr::MatrixDeterminant(m) | Expr::MatrixToScalar(m) => {
                m.emit(out, prefix);
            }
        }
        if !prefix {
            out.push(op(self));
        }
    }
}

impl MatrixExpr {
    fn emit(&self, out: &mut Vec<Token>, prefix: bool) {
        let op = |m: &MatrixExpr| -> Token {
            match m {
                MatrixExpr::Constant(m) => Token::MatrixConstant(m.clone()),
                MatrixExpr::Identity(n) => Token::MatrixIdentity(*n),
                MatrixExpr::Plus(..) => Token::MatrixPlus,
                MatrixExpr::Minus(..) => Token::MatrixMinus,
                MatrixExpr::Negate(_) => Token::MatrixNegate,
                MatrixExpr::Times(..) => Token::MatrixTimes,
                MatrixExpr::ScalarTimes(..) => Token::MatrixScalarTimes,
                MatrixExpr::Transpose(_) => Token::MatrixTranspose,
                MatrixExpr::Inverse(_) => Token::MatrixInverse,
                MatrixExpr::Diagonal(_) => Token::MatrixDiagonal,
                MatrixExpr::Submatrix {
                    row_start,
                    row_end,
                    col_start,
                    col_end,
                    ..
                } => Token::MatrixSubmatrix {
                    row_start: *row_start,
                    row_end: *row_end,
                    col_start: *col_start,
                    col_end: *col_end,
                },
            }
        };

        if prefix {
            out.push(op(self));
        }
        match self {
            MatrixExpr::Constant(_) | MatrixExpr::Identity(_) => {}
            MatrixExpr::Plus(a, b) | MatrixExpr::Minus(a, b) | MatrixExpr::Times(a, b) => {
                a.emit(out, prefix);
                b.emit(out, prefix);
            }
            MatrixExpr::ScalarTimes(s, m) => {
                s.emit(out, prefix);
                m.emit(out, prefix);
            }
            MatrixExpr::Negate(a)
            | MatrixExpr::Transpose(a)
            | MatrixExpr::Inverse(a)
            | MatrixExpr::Diagonal(a) => a.emit(out, prefix),
            MatrixExpr::Submatrix { child, .. } => child.emit(out, prefix),
        }
        if !prefix {
            out.push(op(self));
        }
    }
}

/// Stack-machine reduction shared by both directions.
///
/// For postfix the tokens stream in order and operands pop last-child-first;
/// for prefix the tokens stream reversed and operands pop first-child-first.
fn reduce<'a>(
    tokens: impl Iterator<Item = &'a Token>,
    postfix: bool,
) -> Result<Expr, TokenStreamError> {
    let mut scalars: Vec<Expr> = Vec::new();
    let mut matrices: Vec<MatrixExpr> = Vec::new();

    for token in tokens {
        apply(token, &mut scalars, &mut matrices, postfix)?;
    }

    if !matrices.is_empty() {
        if scalars.is_empty() && matrices.len() == 1 {
            return Err(TokenStreamError::WrongKind { expected: "scalar" });
        }
        return Err(TokenStreamError::TrailingTokens {
            leftover: scalars.len() + matrices.len() - 1,
        });
    }
    match scalars.len() {
        1 => Ok(scalars.pop().unwrap()),
        0 => Err(TokenStreamError::MissingOperands {
            op: "empty stream",
            needed: 1,
            found: 0,
        }),
        n => Err(TokenStreamError::TrailingTokens { leftover: n - 1 }),
    }
}

fn pop_scalars(
    stack: &mut Vec<Expr>,
    n: usize,
    op: &'static str,
    postfix: bool,
) -> Result<Vec<Expr>, TokenStreamError> {
    if stack.len() < n {
        return Err(TokenStreamError::MissingOperands {
            op,
            needed: n,
            found: stack.len(),
        });
    }
    let mut children: Vec<Expr> = stack.split_off(stack.len() - n);
    if !postfix {
        // Reversed prefix iteration pushes children in reverse.
        children.reverse();
    }
    Ok(children)
}

fn pop_matrices(
    stack: &mut Vec<MatrixExpr>,
    n: usize,
    op: &'static str,
    postfix: bool,
) -> Result<Vec<MatrixExpr>, TokenStreamError> {
    if stack.len() < n {
        return Err(TokenStreamError::MissingOperands {
            op,
            needed: n,
            found: stack.len(),
        });
    }
    let mut children: Vec<MatrixExpr> = stack.split_off(stack.len() - n);
    if !postfix {
        children.reverse();
    }
    Ok(children)
}

fn apply(
    token: &Token,
    scalars: &mut Vec<Expr>,
    matrices: &mut Vec<MatrixExpr>,
    postfix: bool,
) -> Result<(), TokenStreamError> {
    let name = token.name();
    match token {
        // ── Scalar leaves ──
        Token::Number(v) => scalars.push(Expr::Number(*v)),
        Token::Variable { idx, coef } => scalars.push(Expr::Variable {
            idx: *idx,
            coef: *coef,
        }),
        Token::Pi => scalars.push(Expr::Pi),
        Token::E => scalars.push(Expr::E),

        // ── Scalar binary ──
        Token::Plus | Token::Minus | Token::Times | Token::Divide | Token::Power => {
            let mut c = pop_scalars(scalars, 2, name, postfix)?;
            let r = Box::new(c.pop().unwrap());
            let l = Box::new(c.pop().unwrap());
            scalars.push(match token {
                Token::Plus => Expr::Plus(l, r),
                Token::Minus => Expr::Minus(l, r),
                Token::Times => Expr::Times(l, r),
                Token::Divide => Expr::Divide(l, r),
                Token::Power => Expr::Power(l, r),
                _ => unreachable!(),
            });
        }

        // ── Scalar unary ──
        Token::Negate
        | Token::Abs
        | Token::Square
        | Token::Sqrt
        | Token::Ln
        | Token::Exp
        | Token::Erf
        | Token::Sin
        | Token::Cos => {
            let c = Box::new(pop_scalars(scalars, 1, name, postfix)?.pop().unwrap());
            scalars.push(match token {
                Token::Negate => Expr::Negate(c),
                Token::Abs => Expr::Abs(c),
                Token::Square => Expr::Square(c),
                Token::Sqrt => Expr::Sqrt(c),
                Token::Ln => Expr::Ln(c),
                Token::Exp => Expr::Exp(c),
                Token::Erf => Expr::Erf(c),
                Token::Sin => Expr::Sin(c),
                Token::Cos => Expr::Cos(c),
                _ => unreachable!(),
            });
        }

        // ── Scalar n-ary ──
        Token::Sum(n) | Token::Product(n) | Token::Min(n) | Token::Max(n) => {
            if *n == 0 {
                return Err(TokenStreamError::EmptyNary { op: name });
            }
            let children = pop_scalars(scalars, *n, name, postfix)?;
            scalars.push(match token {
                Token::Sum(_) => Expr::Sum(children),
                Token::Product(_) => Expr::Product(children),
                Token::Min(_) => Expr::Min(children),
                Token::Max(_) => Expr::Max(children),
                _ => unreachable!(),
            });
        }

        Token::If => {
            let mut c = pop_scalars(scalars, 3, name, postfix)?;
            let els = Box::new(c.pop().unwrap());
            let then = Box::new(c.pop().unwrap());
            let cond = Box::new(c.pop().unwrap());
            scalars.push(Expr::If(cond, then, els));
        }

        // ── Matrix bridges ──
        Token::MatrixTrace | Token::MatrixDeterminant | Token::MatrixToScalar => {
            let m = Box::new(pop_matrices(matrices, 1, name, postfix)?.pop().unwrap());
            scalars.push(match token {
                Token::MatrixTrace => Expr::MatrixTrace(m),
                Token::MatrixDeterminant => Expr::MatrixDeterminant(m),
                Token::MatrixToScalar => Expr::MatrixToScalar(m),
                _ => unreachable!(),
            });
        }

        // ── Matrix leaves ──
        Token::MatrixConstant(m) => matrices.push(MatrixExpr::Constant(m.clone())),
        Token::MatrixIdentity(n) => matrices.push(MatrixExpr::Identity(*n)),

        // ── Matrix binary ──
        Token::MatrixPlus | Token::MatrixMinus | Token::MatrixTimes => {
            let mut c = pop_matrices(matrices, 2, name, postfix)?;
            let r = Box::new(c.pop().unwrap());
            let l = Box::new(c.pop().unwrap());
            matrices.push(match token {
                Token::MatrixPlus => MatrixExpr::Plus(l, r),
                Token::MatrixMinus => MatrixExpr::Minus(l, r),
                Token::MatrixTimes => MatrixExpr::Times(l, r),
                _ => unreachable!(),
            });
        }

        Token::MatrixScalarTimes => {
            let m = Box::new(pop_matrices(matrices, 1, name, postfix)?.pop().unwrap());
            let s = pop_scalars(scalars, 1, name, postfix)?.pop().unwrap();
            if !s.variable_indices().is_empty() {
                return Err(TokenStreamError::VariableInMatrix);
            }
            matrices.push(MatrixExpr::ScalarTimes(Box::new(s), m));
        }

        // ── Matrix unary ──
        Token::MatrixNegate | Token::MatrixTranspose | Token::MatrixInverse | Token::MatrixDiagonal => {
            let m = Box::new(pop_matrices(matrices, 1, name, postfix)?.pop().unwrap());
            matrices.push(match token {
                Token::MatrixNegate => MatrixExpr::Negate(m),
                Token::MatrixTranspose => MatrixExpr::Transpose(m),
                Token::MatrixInverse => MatrixExpr::Inverse(m),
                Token::MatrixDiagonal => MatrixExpr::Diagonal(m),
                _ => unreachable!(),
            });
        }

        Token::MatrixSubmatrix {
            row_start,
            row_end,
            col_start,
            col_end,
        } => {
            let m = Box::new(pop_matrices(matrices, 1, name, postfix)?.pop().unwrap());
            matrices.push(MatrixExpr::Submatrix {
                row_start: *row_start,
                row_end: *row_end,
                col_start: *col_start,
                col_end: *col_end,
                child: m,
            });
        }
    }
    Ok(())
}
