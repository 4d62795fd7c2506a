//! Base numeric abstractions shared by the tape layer.

use std::fmt::{Debug, Display};

use num_traits::{Float as NumFloat, FloatConst, FromPrimitive};

/// Trait bundle for the scalar types the tape can sweep over.
///
/// Implemented for the primitive floats and for [`crate::Dual`] over them, so
/// the same opcode evaluator serves both the primal forward sweep and the
/// tangent-carrying sweeps used for second-order derivatives.
pub trait Float:
    NumFloat + FloatConst + FromPrimitive + Erf + Copy + Send + Sync + Default + Debug + Display + 'static
{
}

impl Float for f32 {}
impl Float for f64 {}

/// The error function, `erf(x) = 2/√π ∫₀ˣ exp(−t²) dt`.
///
/// Neither `std` nor `num_traits` provides it; primitive floats route through
/// `libm`, and dual numbers apply the chain rule
/// (`d/dx erf(x) = 2/√π · exp(−x²)`).
pub trait Erf {
    fn erf(self) -> Self;
}

impl Erf for f32 {
    #[inline]
    fn erf(self) -> Self {
        libm::erff(self)
    }
}

impl Erf for f64 {
    #[inline]
    fn erf(self) -> Self {
        libm::erf(self)
    }
}

/// Zero test that looks at every component of a number.
///
/// The reverse sweep skips statements whose adjoint is zero. For a dual number
/// "zero" must mean both the value and the tangent, otherwise second-order
/// contributions would be dropped.
pub trait IsAllZero {
    fn is_all_zero(&self) -> bool;
}

impl IsAllZero for f32 {
    #[inline]
    fn is_all_zero(&self) -> bool {
        *self == 0.0
    }
}

impl IsAllZero for f64 {
    #[inline]
    fn is_all_zero(&self) -> bool {
        *self == 0.0
    }
}
