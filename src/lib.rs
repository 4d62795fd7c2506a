//! In-memory nonlinear program model with tape-based automatic
//! differentiation.
//!
//! A [`Model`] holds variables, objectives, constraints, sparse linear
//! coefficients, quadratic terms, and per-row nonlinear [`ExpressionTree`]s.
//! [`Model::initialize_for_differentiation`] merges each row's linear,
//! quadratic, and nonlinear content into a single expression and records all
//! of them onto one multi-output bytecode [`Tape`] over the dense
//! nonlinear-variable domain. Solver adapters then drive the evaluation API:
//! function values, dense objective gradients, the sparse constraint
//! Jacobian, and the sparse Hessian of the Lagrangian, with sparsity
//! patterns available separately and a `new_x` generation contract keeping
//! repeated evaluations at one point cheap.
//!
//! Evaluation is single-threaded: one current point, one generation counter,
//! no internal locking. Concurrent use requires external serialization or a
//! deep-cloned model per thread.

pub mod dual;
pub mod engine;
pub mod error;
pub mod expr;
pub mod float;
pub mod model;
pub mod opcode;
pub mod sparsity;
pub mod tape;
mod traits;

pub use dual::Dual;
pub use engine::DiffEngine;
pub use error::{EvalError, ModelError, TokenStreamError};
pub use expr::{Expr, ExpressionTree, MatrixExpr, Token};
pub use float::{Erf, Float};
pub use model::{
    Constraint, ConstraintKind, LinearCoefficients, MajorOrder, Model, Objective, QuadraticTerm,
    RowId, SparseVec, VarType, Variable,
};
pub use opcode::OpCode;
pub use sparsity::{HessianPattern, JacobianPattern, SparseHessian, SparseJacobian};
pub use tape::Tape;

/// Forward-mode dual numbers over `f64`.
pub type Dual64 = Dual<f64>;
/// Forward-mode dual numbers over `f32`.
pub type Dual32 = Dual<f32>;
