//! Error types.
//!
//! Construction-time misuse and missing initialization surface as
//! [`ModelError`]. Arithmetic domain violations follow IEEE semantics by
//! default (NaN propagation); the strict evaluation mode reports them as
//! [`EvalError`] instead. Sweep-ordering violations are programming errors
//! and panic rather than returning an error.

use thiserror::Error;

use crate::model::RowId;

/// Errors from model construction and evaluation entry points.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    /// Construction must be index-contiguous: entity `got` was added when
    /// `expected` was the next free index.
    #[error("index out of range: expected index {expected}, got {got}")]
    IndexOutOfRange { expected: usize, got: usize },

    /// Inconsistent starts/indices/values triples.
    #[error("malformed sparse matrix: {reason}")]
    MalformedSparseMatrix { reason: String },

    /// A derivative or sweep entry point was called before
    /// `initialize_for_differentiation`.
    #[error("derivative tape not built; call initialize_for_differentiation first")]
    TapeNotBuilt,

    /// The row id does not name an objective or constraint of this model.
    #[error("unknown row {row:?}")]
    UnknownRow { row: RowId },

    /// A variable index referenced an out-of-bounds variable.
    #[error("variable index {idx} out of bounds ({num_vars} variables)")]
    UnknownVariable { idx: usize, num_vars: usize },
}

/// Strict-mode evaluation errors.
///
/// The default evaluation path never raises these; it propagates NaN/±∞ so
/// that solvers probing infeasible regions keep running.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvalError {
    #[error("logarithm of a non-positive value")]
    LogDomain,
    #[error("square root of a negative value")]
    SqrtDomain,
    #[error("division by zero")]
    DivisionByZero,
    #[error("negative base raised to a non-integer power")]
    PowDomain,
    #[error("matrix is singular")]
    SingularMatrix,
    #[error("matrix dimension mismatch: {reason}")]
    DimensionMismatch { reason: String },
}

/// Errors reconstructing an expression tree from a prefix or postfix token
/// stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenStreamError {
    /// An operator found fewer operands on the stack than its arity.
    #[error("operator {op} missing operands (needs {needed}, found {found})")]
    MissingOperands {
        op: &'static str,
        needed: usize,
        found: usize,
    },

    /// The stream left more than one expression on the stack.
    #[error("token stream does not reduce to a single expression ({leftover} left over)")]
    TrailingTokens { leftover: usize },

    /// The stream reduced to a matrix where a scalar was required, or
    /// vice versa.
    #[error("expression has the wrong kind: expected {expected}")]
    WrongKind { expected: &'static str },

    /// A decision variable appeared inside a matrix subtree. Matrix
    /// subexpressions are constant with respect to the variables.
    #[error("variable reference inside a matrix subexpression")]
    VariableInMatrix,

    /// An n-ary operator token declared arity zero.
    #[error("n-ary operator {op} with zero operands")]
    EmptyNary { op: &'static str },
}
