//! `num_traits` implementations for [`Dual`].
//!
//! These exist so that the generic opcode evaluator
//! ([`crate::opcode::eval_forward`] / [`crate::opcode::reverse_partials`])
//! can run unchanged on tangent-carrying numbers. Every method propagates the
//! tangent by the usual chain rule; methods with zero derivative (rounding,
//! sign inspection) drop it.

use std::num::FpCategory;

use num_traits::{Float as NumFloat, FloatConst, FromPrimitive, Num, NumCast, One, ToPrimitive, Zero};

use crate::dual::Dual;
use crate::float::Float;

impl<F: Float> Zero for Dual<F> {
    #[inline]
    fn zero() -> Self {
        Dual::constant(F::zero())
    }
    #[inline]
    fn is_zero(&self) -> bool {
        self.re.is_zero()
    }
}

impl<F: Float> One for Dual<F> {
    #[inline]
    fn one() -> Self {
        Dual::constant(F::one())
    }
}

impl<F: Float> Num for Dual<F> {
    type FromStrRadixErr = F::FromStrRadixErr;
    fn from_str_radix(str: &str, radix: u32) -> Result<Self, Self::FromStrRadixErr> {
        F::from_str_radix(str, radix).map(Dual::constant)
    }
}

impl<F: Float> ToPrimitive for Dual<F> {
    #[inline]
    fn to_i64(&self) -> Option<i64> {
        self.re.to_i64()
    }
    #[inline]
    fn to_u64(&self) -> Option<u64> {
        self.re.to_u64()
    }
    #[inline]
    fn to_f64(&self) -> Option<f64> {
        self.re.to_f64()
    }
}

impl<F: Float> NumCast for Dual<F> {
    #[inline]
    fn from<T: ToPrimitive>(n: T) -> Option<Self> {
        F::from(n).map(Dual::constant)
    }
}

impl<F: Float> FromPrimitive for Dual<F> {
    #[inline]
    fn from_i64(n: i64) -> Option<Self> {
        F::from_i64(n).map(Dual::constant)
    }
    #[inline]
    fn from_u64(n: u64) -> Option<Self> {
        F::from_u64(n).map(Dual::constant)
    }
    #[inline]
    fn from_f64(n: f64) -> Option<Self> {
        F::from_f64(n).map(Dual::constant)
    }
}

impl<F: Float> FloatConst for Dual<F> {
    fn E() -> Self {
        Dual::constant(F::E())
    }
    fn FRAC_1_PI() -> Self {
        Dual::constant(F::FRAC_1_PI())
    }
    fn FRAC_1_SQRT_2() -> Self {
        Dual::constant(F::FRAC_1_SQRT_2())
    }
    fn FRAC_2_PI() -> Self {
        Dual::constant(F::FRAC_2_PI())
    }
    fn FRAC_2_SQRT_PI() -> Self {
        Dual::constant(F::FRAC_2_SQRT_PI())
    }
    fn FRAC_PI_2() -> Self {
        Dual::constant(F::FRAC_PI_2())
    }
    fn FRAC_PI_3() -> Self {
        Dual::constant(F::FRAC_PI_3())
    }
    fn FRAC_PI_4() -> Self {
        Dual::constant(F::FRAC_PI_4())
    }
    fn FRAC_PI_6() -> Self {
        Dual::constant(F::FRAC_PI_6())
    }
    fn FRAC_PI_8() -> Self {
        Dual::constant(F::FRAC_PI_8())
    }
    fn LN_10() -> Self {
        Dual::constant(F::LN_10())
    }
    fn LN_2() -> Self {
        Dual::constant(F::LN_2())
    }
    fn LOG10_E() -> Self {
        Dual::constant(F::LOG10_E())
    }
    fn LOG2_E() -> Self {
        Dual::constant(F::LOG2_E())
    }
    fn PI() -> Self {
        Dual::constant(F::PI())
    }
    fn SQRT_2() -> Self {
        Dual::constant(F::SQRT_2())
    }
}

impl<F: Float> NumFloat for Dual<F> {
    #[inline]
    fn nan() -> Self {
        Dual::constant(F::nan())
    }
    #[inline]
    fn infinity() -> Self {
        Dual::constant(F::infinity())
    }
    #[inline]
    fn neg_infinity() -> Self {
        Dual::constant(F::neg_infinity())
    }
    #[inline]
    fn neg_zero() -> Self {
        Dual::constant(F::neg_zero())
    }
    #[inline]
    fn min_value() -> Self {
        Dual::constant(F::min_value())
    }
    #[inline]
    fn min_positive_value() -> Self {
        Dual::constant(F::min_positive_value())
    }
    #[inline]
    fn max_value() -> Self {
        Dual::constant(F::max_value())
    }
    #[inline]
    fn epsilon() -> Self {
        Dual::constant(F::epsilon())
    }

    #[inline]
    fn is_nan(self) -> bool {
        self.re.is_nan()
    }
    #[inline]
    fn is_infinite(self) -> bool {
        self.re.is_infinite()
    }
    #[inline]
    fn is_finite(self) -> bool {
        self.re.is_finite()
    }
    #[inline]
    fn is_normal(self) -> bool {
        self.re.is_normal()
    }
    #[inline]
    fn classify(self) -> FpCategory {
        self.re.classify()
    }

    #[inline]
    fn floor(self) -> Self {
        Dual::constant(self.re.floor())
    }
    #[inline]
    fn ceil(self) -> Self {
        Dual::constant(self.re.ceil())
    }
    #[inline]
    fn round(self) -> Self {
        Dual::constant(self.re.round())
    }
    #[inline]
    fn trunc(self) -> Self {
        Dual::constant(self.re.trunc())
    }
    #[inline]
    fn fract(self) -> Self {
        Dual::new(self.re.fract(), self.eps)
    }

    #[inline]
    fn abs(self) -> Self {
        self.chain(self.re.abs(), self.re.signum())
    }
    #[inline]
    fn signum(self) -> Self {
        Dual::constant(self.re.signum())
    }
    #[inline]
    fn is_sign_positive(self) -> bool {
        self.re.is_sign_positive()
    }
    #[inline]
    fn is_sign_negative(self) -> bool {
        self.re.is_sign_negative()
    }

    #[inline]
    fn mul_add(self, a: Self, b: Self) -> Self {
        Dual {
            re: self.re.mul_add(a.re, b.re),
            eps: self.re * a.eps + self.eps * a.re + b.eps,
        }
    }
    #[inline]
    fn recip(self) -> Self {
        let inv = F::one() / self.re;
        self.chain(inv, -inv * inv)
    }

    #[inline]
    fn powi(self, n: i32) -> Self {
        let d = F::from_i32(n).unwrap_or_else(F::zero) * self.re.powi(n - 1);
        self.chain(self.re.powi(n), d)
    }
    #[inline]
    fn powf(self, n: Self) -> Self {
        // d(a^b) = a^b · (b′·ln a + b·a′/a)
        let r = self.re.powf(n.re);
        Dual {
            re: r,
            eps: r * (n.eps * self.re.ln() + n.re * self.eps / self.re),
        }
    }
    #[inline]
    fn sqrt(self) -> Self {
        let s = self.re.sqrt();
        let two = F::one() + F::one();
        self.chain(s, F::one() / (two * s))
    }
    #[inline]
    fn cbrt(self) -> Self {
        let c = self.re.cbrt();
        let three = F::from_i32(3).unwrap();
        self.chain(c, F::one() / (three * c * c))
    }
    #[inline]
    fn hypot(self, other: Self) -> Self {
        let r = self.re.hypot(other.re);
        Dual {
            re: r,
            eps: (self.re * self.eps + other.re * other.eps) / r,
        }
    }

    #[inline]
    fn exp(self) -> Self {
        let e = self.re.exp();
        self.chain(e, e)
    }
    #[inline]
    fn exp2(self) -> Self {
        let e = self.re.exp2();
        self.chain(e, e * F::LN_2())
    }
    #[inline]
    fn exp_m1(self) -> Self {
        let e = self.re.exp_m1();
        self.chain(e, e + F::one())
    }
    #[inline]
    fn ln(self) -> Self {
        self.chain(self.re.ln(), F::one() / self.re)
    }
    #[inline]
    fn log(self, base: Self) -> Self {
        self.ln() / base.ln()
    }
    #[inline]
    fn log2(self) -> Self {
        self.chain(self.re.log2(), F::one() / (self.re * F::LN_2()))
    }
    #[inline]
    fn log10(self) -> Self {
        self.chain(self.re.log10(), F::one() / (self.re * F::LN_10()))
    }
    #[inline]
    fn ln_1p(self) -> Self {
        self.chain(self.re.ln_1p(), F::one() / (F::one() + self.re))
    }

    #[inline]
    fn max(self, other: Self) -> Self {
        if self.re >= other.re {
            self
        } else {
            other
        }
    }
    #[inline]
    fn min(self, other: Self) -> Self {
        if self.re <= other.re {
            self
        } else {
            other
        }
    }
    #[inline]
    fn abs_sub(self, other: Self) -> Self {
        if self.re > other.re {
            self - other
        } else {
            Self::zero()
        }
    }

    #[inline]
    fn sin(self) -> Self {
        self.chain(self.re.sin(), self.re.cos())
    }
    #[inline]
    fn cos(self) -> Self {
        self.chain(self.re.cos(), -self.re.sin())
    }
    #[inline]
    fn tan(self) -> Self {
        let c = self.re.cos();
        self.chain(self.re.tan(), F::one() / (c * c))
    }
    #[inline]
    fn asin(self) -> Self {
        self.chain(self.re.asin(), F::one() / (F::one() - self.re * self.re).sqrt())
    }
    #[inline]
    fn acos(self) -> Self {
        self.chain(self.re.acos(), -F::one() / (F::one() - self.re * self.re).sqrt())
    }
    #[inline]
    fn atan(self) -> Self {
        self.chain(self.re.atan(), F::one() / (F::one() + self.re * self.re))
    }
    #[inline]
    fn atan2(self, other: Self) -> Self {
        // atan2(y, x): (x·y′ − y·x′) / (x² + y²)
        let denom = self.re * self.re + other.re * other.re;
        Dual {
            re: self.re.atan2(other.re),
            eps: (other.re * self.eps - self.re * other.eps) / denom,
        }
    }
    #[inline]
    fn sin_cos(self) -> (Self, Self) {
        (self.sin(), self.cos())
    }

    #[inline]
    fn sinh(self) -> Self {
        self.chain(self.re.sinh(), self.re.cosh())
    }
    #[inline]
    fn cosh(self) -> Self {
        self.chain(self.re.cosh(), self.re.sinh())
    }
    #[inline]
    fn tanh(self) -> Self {
        let c = self.re.cosh();
        self.chain(self.re.tanh(), F::one() / (c * c))
    }
    #[inline]
    fn asinh(self) -> Self {
        self.chain(self.re.asinh(), F::one() / (self.re * self.re + F::one()).sqrt())
    }
    #[inline]
    fn acosh(self) -> Self {
        self.chain(self.re.acosh(), F::one() / (self.re * self.re - F::one()).sqrt())
    }
    #[inline]
    fn atanh(self) -> Self {
        self.chain(self.re.atanh(), F::one() / (F::one() - self.re * self.re))
    }

    #[inline]
    fn integer_decode(self) -> (u64, i16, i8) {
        self.re.integer_decode()
    }
}
