//! Forward-mode dual numbers.
//!
//! A [`Dual`] carries a value and a tangent through every elementary
//! operation. The derivative engine never exposes duals to callers; they are
//! the vehicle for the forward-over-reverse second-order sweeps, where the
//! tape is re-run on `Dual<f64>` (and, for second-order Taylor coefficients,
//! on `Dual<Dual<f64>>`).

use std::fmt::{self, Display};

use crate::float::{Erf, Float, IsAllZero};

/// Forward-mode dual number `re + eps·ε` with `ε² = 0`.
///
/// Equality and ordering compare the primal component only, so that branch
/// selection (`min`, `max`, conditionals) behaves exactly as it would on the
/// underlying float. Use [`IsAllZero`] when both components matter.
#[derive(Clone, Copy, Debug, Default)]
pub struct Dual<F: Float> {
    /// Primal (value) component.
    pub re: F,
    /// Tangent (derivative) component.
    pub eps: F,
}

impl<F: Float> Display for Dual<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} + {}ε", self.re, self.eps)
    }
}

impl<F: Float> Dual<F> {
    /// Pair a value with an arbitrary tangent.
    #[inline]
    pub fn new(re: F, eps: F) -> Self {
        Dual { re, eps }
    }

    /// A constant: zero tangent.
    #[inline]
    pub fn constant(re: F) -> Self {
        Dual { re, eps: F::zero() }
    }

    /// An independent variable: unit tangent.
    #[inline]
    pub fn variable(re: F) -> Self {
        Dual { re, eps: F::one() }
    }

    /// Chain rule helper: given `f(re)` and `f'(re)`, build the result dual.
    #[inline]
    pub(crate) fn chain(self, f_val: F, f_deriv: F) -> Self {
        Dual {
            re: f_val,
            eps: self.eps * f_deriv,
        }
    }
}

impl<F: Float> Erf for Dual<F> {
    #[inline]
    fn erf(self) -> Self {
        let d = F::FRAC_2_SQRT_PI() * (-self.re * self.re).exp();
        self.chain(self.re.erf(), d)
    }
}

impl<F: Float> IsAllZero for Dual<F> {
    #[inline]
    fn is_all_zero(&self) -> bool {
        self.re == F::zero() && self.eps == F::zero()
    }
}

// With the operator and num_traits impls from `crate::traits`, a dual over a
// tape scalar is itself a tape scalar. Nesting `Dual<Dual<F>>` is what gives
// the second-order Taylor coefficients of the order-2 forward sweep.
impl<F: Float> Float for Dual<F> {}
