//! Matrix-valued expression nodes.
//!
//! Matrix subexpressions appear as children of the scalar bridge nodes
//! (trace, determinant, one-by-one extraction). They are constant with
//! respect to the decision variables: the matrix-programming layer that
//! would introduce matrix variables sits above this crate. Reconstruction
//! from token streams rejects variable references inside matrix subtrees,
//! and the recorder asserts the same invariant.

use nalgebra::DMatrix;

use crate::error::EvalError;
use crate::expr::Expr;

/// A matrix-valued expression node. Owns its children.
#[derive(Clone, Debug)]
pub enum MatrixExpr {
    /// Explicit dense matrix.
    Constant(DMatrix<f64>),
    /// `n × n` identity.
    Identity(usize),
    Plus(Box<MatrixExpr>, Box<MatrixExpr>),
    Minus(Box<MatrixExpr>, Box<MatrixExpr>),
    Negate(Box<MatrixExpr>),
    /// Matrix product.
    Times(Box<MatrixExpr>, Box<MatrixExpr>),
    /// Scale by a variable-free scalar expression.
    ScalarTimes(Box<Expr>, Box<MatrixExpr>),
    Transpose(Box<MatrixExpr>),
    Inverse(Box<MatrixExpr>),
    /// Extract the diagonal of a square matrix as a column.
    Diagonal(Box<MatrixExpr>),
    /// Contiguous submatrix, inclusive index ranges.
    Submatrix {
        row_start: usize,
        row_end: usize,
        col_start: usize,
        col_end: usize,
        child: Box<MatrixExpr>,
    },
}

impl MatrixExpr {
    /// Strict evaluation. Dimension mismatches and singular inverses are
    /// reported; scalar children evaluate in strict mode too.
    pub fn evaluate_checked(&self, x: &[f64]) -> Result<DMatrix<f64>, EvalError> {
        match self {
            MatrixExpr::Constant(m) => Ok(m.clone()),
            MatrixExpr::Identity(n) => Ok(DMatrix::identity(*n, *n)),
            MatrixExpr::Plus(a, b) => {
                let (a, b) = (a.evaluate_checked(x)?, b.evaluate_checked(x)?);
                check_same_shape("plus", &a, &b)?;
                Ok(a + b)
            }
            MatrixExpr::Minus(a, b) => {
                let (a, b) = (a.evaluate_checked(x)?, b.evaluate_checked(x)?);
                check_same_shape("minus", &a, &b)?;
                Ok(a - b)
            }
            MatrixExpr::Negate(a) => Ok(-a.evaluate_checked(x)?),
            MatrixExpr::Times(a, b) => {
                let (a, b) = (a.evaluate_checked(x)?, b.evaluate_checked(x)?);
                if a.ncols() != b.nrows() {
                    return Err(EvalError::DimensionMismatch {
                        reason: format!(
                            "product of {}x{} and {}x{}",
                            a.nrows(),
                            a.ncols(),
                            b.nrows(),
                            b.ncols()
                        ),
                    });
                }
                Ok(a * b)
            }
            MatrixExpr::ScalarTimes(s, m) => {
                let scale = s.evaluate_checked(x)?;
                Ok(m.evaluate_checked(x)? * scale)
            }
            MatrixExpr::Transpose(a) => Ok(a.evaluate_checked(x)?.transpose()),
            MatrixExpr::Inverse(a) => {
                let m = a.evaluate_checked(x)?;
                check_square("inverse", &m)?;
                m.try_inverse().ok_or(EvalError::SingularMatrix)
            }
            MatrixExpr::Diagonal(a) => {
                let m = a.evaluate_checked(x)?;
                check_square("diagonal", &m)?;
                Ok(DMatrix::from_fn(m.nrows(), 1, |i, _| m[(i, i)]))
            }
            MatrixExpr::Submatrix {
                row_start,
                row_end,
                col_start,
                col_end,
                child,
            } => {
                let m = child.evaluate_checked(x)?;
                if *row_end >= m.nrows() || *col_end >= m.ncols() || row_start > row_end || col_start > col_end {
                    return Err(EvalError::DimensionMismatch {
                        reason: format!(
                            "submatrix [{row_start}..{row_end}, {col_start}..{col_end}] of {}x{}",
                            m.nrows(),
                            m.ncols()
                        ),
                    });
                }
                Ok(DMatrix::from_fn(
                    row_end - row_start + 1,
                    col_end - col_start + 1,
                    |i, j| m[(row_start + i, col_start + j)],
                ))
            }
        }
    }

    /// Whether a decision variable appears anywhere in this subtree.
    ///
    /// Must be false for every matrix subtree of a valid expression.
    pub fn has_variables(&self) -> bool {
        match self {
            MatrixExpr::Constant(_) | MatrixExpr::Identity(_) => false,
            MatrixExpr::Plus(a, b) | MatrixExpr::Minus(a, b) | MatrixExpr::Times(a, b) => {
                a.has_variables() || b.has_variables()
            }
            MatrixExpr::ScalarTimes(s, m) => !s.variable_indices().is_empty() || m.has_variables(),
            MatrixExpr::Negate(a)
            | MatrixExpr::Transpose(a)
            | MatrixExpr::Inverse(a)
            | MatrixExpr::Diagonal(a) => a.has_variables(),
            MatrixExpr::Submatrix { child, .. } => child.has_variables(),
        }
    }

    /// Recursive structural equality; matrix entries compare NaN == NaN.
    pub fn structurally_equal(&self, other: &MatrixExpr) -> bool {
        use MatrixExpr::*;
        match (self, other) {
            (Constant(a), Constant(b)) => {
                a.nrows() == b.nrows()
                    && a.ncols() == b.ncols()
                    && a.iter().zip(b.iter()).all(|(&x, &y)| domain_eq(x, y))
            }
            (Identity(a), Identity(b)) => a == b,
            (Plus(a1, a2), Plus(b1, b2))
            | (Minus(a1, a2), Minus(b1, b2))
            | (Times(a1, a2), Times(b1, b2)) => {
                a1.structurally_equal(b1) && a2.structurally_equal(b2)
            }
            (ScalarTimes(s1, m1), ScalarTimes(s2, m2)) => {
                s1.structurally_equal(s2) && m1.structurally_equal(m2)
            }
            (Negate(a), Negate(b))
            | (Transpose(a), Transpose(b))
            | (Inverse(a), Inverse(b))
            | (Diagonal(a), Diagonal(b)) => a.structurally_equal(b),
            (
                Submatrix {
                    row_start: ra,
                    row_end: rb,
                    col_start: ca,
                    col_end: cb,
                    child: ma,
                },
                Submatrix {
                    row_start: sa,
                    row_end: sb,
                    col_start: ta,
                    col_end: tb,
                    child: mb,
                },
            ) => ra == sa && rb == sb && ca == ta && cb == tb && ma.structurally_equal(mb),
            _ => false,
        }
    }
}

/// Value equality where NaN compares equal to NaN (domain equality, not
/// IEEE arithmetic equality).
pub(crate) fn domain_eq(a: f64, b: f64) -> bool {
    a == b || (a.is_nan() && b.is_nan())
}

fn check_same_shape(op: &str, a: &DMatrix<f64>, b: &DMatrix<f64>) -> Result<(), EvalError> {
    if a.nrows() != b.nrows() || a.ncols() != b.ncols() {
        return Err(EvalError::DimensionMismatch {
            reason: format!(
                "{op} of {}x{} and {}x{}",
                a.nrows(),
                a.ncols(),
                b.nrows(),
                b.ncols()
            ),
        });
    }
    Ok(())
}

fn check_square(op: &str, m: &DMatrix<f64>) -> Result<(), EvalError> {
    if !m.is_square() {
        return Err(EvalError::DimensionMismatch {
            reason: format!("{op} of non-square {}x{}", m.nrows(), m.ncols()),
        });
    }
    Ok(())
}
