//! Elementary operations recorded on the tape.
//!
//! Expression trees are flattened into sequences of these opcodes. The
//! [`eval_forward`] and [`reverse_partials`] functions evaluate / differentiate
//! a single opcode and are generic over the scalar, so the same code drives
//! the primal sweep (`f64`) and the tangent-carrying second-order sweeps
//! ([`crate::Dual`]).

use num_traits::{Float as NumFloat, FloatConst};

use crate::float::Erf;

/// Sentinel for the unused second argument slot of unary opcodes.
pub const UNUSED: u32 = u32::MAX;

/// One elementary operation. Fits in a `u8`.
///
/// Binary ops use both argument slots; unary ops use slot 0 only
/// (slot 1 holds [`UNUSED`]).
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OpCode {
    /// Independent variable (leaf).
    Input,
    /// Scalar constant (leaf).
    Const,

    // ── Binary ──
    Add,
    Sub,
    Mul,
    Div,
    /// General power `a^b`.
    Pow,
    Max,
    Min,

    // ── Unary ──
    Neg,
    Abs,
    Square,
    Sqrt,
    Ln,
    Exp,
    Erf,
    Sin,
    Cos,
}

/// How an opcode contributes to second-derivative structure.
///
/// Used by the Hessian sparsity detection: linear ops only merge dependency
/// sets, nonlinear ops additionally create variable interactions, and
/// selection ops are piecewise linear (zero second derivative on each branch).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpClass {
    Linear,
    UnaryNonlinear,
    BinaryNonlinear,
    Selection,
}

/// Classify an opcode for sparsity detection.
///
/// `Abs` is kept in the nonlinear class: its second derivative vanishes
/// almost everywhere, but marking the interaction keeps the pattern a safe
/// superset. Panics on `Input`/`Const`, which are never classified.
pub fn classify(op: OpCode) -> OpClass {
    match op {
        OpCode::Add | OpCode::Sub | OpCode::Neg => OpClass::Linear,
        OpCode::Abs
        | OpCode::Square
        | OpCode::Sqrt
        | OpCode::Ln
        | OpCode::Exp
        | OpCode::Erf
        | OpCode::Sin
        | OpCode::Cos => OpClass::UnaryNonlinear,
        OpCode::Mul | OpCode::Div | OpCode::Pow => OpClass::BinaryNonlinear,
        OpCode::Max | OpCode::Min => OpClass::Selection,
        OpCode::Input | OpCode::Const => unreachable!("leaves are not classified"),
    }
}

/// Whether the opcode reads its second argument slot.
#[inline]
pub fn is_binary(op: OpCode) -> bool {
    matches!(
        op,
        OpCode::Add | OpCode::Sub | OpCode::Mul | OpCode::Div | OpCode::Pow | OpCode::Max | OpCode::Min
    )
}

/// Evaluate a single opcode.
///
/// For unary ops `b` is ignored. `Input`/`Const` are never re-evaluated.
#[inline]
pub fn eval_forward<T: NumFloat + FloatConst + Erf>(op: OpCode, a: T, b: T) -> T {
    match op {
        OpCode::Input | OpCode::Const => {
            unreachable!("Input/Const values are set directly, not evaluated")
        }

        OpCode::Add => a + b,
        OpCode::Sub => a - b,
        OpCode::Mul => a * b,
        OpCode::Div => a / b,
        OpCode::Pow => a.powf(b),
        OpCode::Max => {
            if a >= b {
                a
            } else {
                b
            }
        }
        OpCode::Min => {
            if a <= b {
                a
            } else {
                b
            }
        }

        OpCode::Neg => -a,
        OpCode::Abs => a.abs(),
        OpCode::Square => a * a,
        OpCode::Sqrt => a.sqrt(),
        OpCode::Ln => a.ln(),
        OpCode::Exp => a.exp(),
        OpCode::Erf => a.erf(),
        OpCode::Sin => a.sin(),
        OpCode::Cos => a.cos(),
    }
}

/// Partial derivatives `(∂r/∂a, ∂r/∂b)` of a single opcode.
///
/// `a`, `b` are the operand values and `r` the result value from the forward
/// sweep. For unary ops the second partial is zero. Domain violations follow
/// IEEE semantics and surface as NaN/±∞ in the partials.
#[inline]
pub fn reverse_partials<T: NumFloat + FloatConst + Erf>(op: OpCode, a: T, b: T, r: T) -> (T, T) {
    let zero = T::zero();
    let one = T::one();
    match op {
        OpCode::Input | OpCode::Const => (zero, zero),

        OpCode::Add => (one, one),
        OpCode::Sub => (one, -one),
        OpCode::Mul => (b, a),
        OpCode::Div => {
            let inv = one / b;
            (inv, -a * inv * inv)
        }
        OpCode::Pow => {
            // ∂(a^b)/∂a = b·a^(b−1),  ∂(a^b)/∂b = a^b·ln a
            (b * a.powf(b - one), r * a.ln())
        }
        OpCode::Max => {
            if a >= b {
                (one, zero)
            } else {
                (zero, one)
            }
        }
        OpCode::Min => {
            if a <= b {
                (one, zero)
            } else {
                (zero, one)
            }
        }

        OpCode::Neg => (-one, zero),
        OpCode::Abs => (a.signum(), zero),
        OpCode::Square => (a + a, zero),
        OpCode::Sqrt => {
            let two = one + one;
            (one / (two * r), zero)
        }
        OpCode::Ln => (one / a, zero),
        OpCode::Exp => (r, zero),
        OpCode::Erf => (T::FRAC_2_SQRT_PI() * (-a * a).exp(), zero),
        OpCode::Sin => (a.cos(), zero),
        OpCode::Cos => (-a.sin(), zero),
    }
}
