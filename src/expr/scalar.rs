//! Numeric types for forward-mode differentiation of expressions.
//!
//! Expression evaluation is generic over [`Scalar`]:
//! - `f64` gives plain values
//! - [`Dual`] carries one directional derivative (Jacobian columns)
//! - [`HyperDual`] carries two directions and their mixed second derivative
//!   (Hessian entries)

use std::fmt::{self, Debug, Display};
use std::ops::{Add, Div, Mul, Neg, Sub};

/// Numeric type an expression can be evaluated with.
pub trait Scalar:
    Copy
    + Debug
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
    + Neg<Output = Self>
{
    /// `true` only for `f64`, which carries no derivative parts.
    const PLAIN: bool;

    /// Lift a plain value (zero derivative).
    fn constant(re: f64) -> Self;

    /// Lift a value seeded along the first and/or second direction.
    fn seeded(re: f64, first: bool, second: bool) -> Self;

    /// Primal value.
    fn re(&self) -> f64;

    /// Apply the chain rule given `f(re)`, `f'(re)` and `f''(re)`.
    fn chain(self, f: f64, df: f64, d2f: f64) -> Self;
}

impl Scalar for f64 {
    const PLAIN: bool = true;

    #[inline]
    fn constant(re: f64) -> Self {
        re
    }

    #[inline]
    fn seeded(re: f64, _first: bool, _second: bool) -> Self {
        re
    }

    #[inline]
    fn re(&self) -> f64 {
        *self
    }

    #[inline]
    fn chain(self, f: f64, _df: f64, _d2f: f64) -> Self {
        f
    }
}

/// Forward-mode dual number: a value paired with its tangent.
///
/// `Dual { re, eps }` represents `re + eps·ε` where `ε² = 0`.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Dual {
    /// Primal value.
    pub re: f64,
    /// Tangent value.
    pub eps: f64,
}

impl Dual {
    /// Create a new dual number.
    #[inline]
    pub fn new(re: f64, eps: f64) -> Self {
        Dual { re, eps }
    }
}

impl Display for Dual {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} + {}ε", self.re, self.eps)
    }
}

impl Scalar for Dual {
    const PLAIN: bool = false;

    #[inline]
    fn constant(re: f64) -> Self {
        Dual { re, eps: 0.0 }
    }

    #[inline]
    fn seeded(re: f64, first: bool, _second: bool) -> Self {
        Dual {
            re,
            eps: if first { 1.0 } else { 0.0 },
        }
    }

    #[inline]
    fn re(&self) -> f64 {
        self.re
    }

    #[inline]
    fn chain(self, f: f64, df: f64, _d2f: f64) -> Self {
        Dual {
            re: f,
            eps: self.eps * df,
        }
    }
}

impl Add for Dual {
    type Output = Self;
    #[inline]
    fn add(self, rhs: Self) -> Self {
        Dual {
            re: self.re + rhs.re,
            eps: self.eps + rhs.eps,
        }
    }
}

impl Sub for Dual {
    type Output = Self;
    #[inline]
    fn sub(self, rhs: Self) -> Self {
        Dual {
            re: self.re - rhs.re,
            eps: self.eps - rhs.eps,
        }
    }
}

impl Mul for Dual {
    type Output = Self;
    #[inline]
    fn mul(self, rhs: Self) -> Self {
        Dual {
            re: self.re * rhs.re,
            eps: self.re * rhs.eps + self.eps * rhs.re,
        }
    }
}

impl Div for Dual {
    type Output = Self;
    #[inline]
    fn div(self, rhs: Self) -> Self {
        let inv = 1.0 / rhs.re;
        Dual {
            re: self.re * inv,
            eps: (self.eps * rhs.re - self.re * rhs.eps) * inv * inv,
        }
    }
}

impl Neg for Dual {
    type Output = Self;
    #[inline]
    fn neg(self) -> Self {
        Dual {
            re: -self.re,
            eps: -self.eps,
        }
    }
}

/// Hyper-dual number `re + eps1·ε₁ + eps2·ε₂ + eps12·ε₁ε₂` with
/// `ε₁² = ε₂² = 0`.
///
/// Seeding direction `i` in `ε₁` and `j` in `ε₂` yields `∂²f/∂xᵢ∂xⱼ` in
/// `eps12`, exactly.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct HyperDual {
    pub re: f64,
    pub eps1: f64,
    pub eps2: f64,
    pub eps12: f64,
}

impl Display for HyperDual {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} + {}ε₁ + {}ε₂ + {}ε₁ε₂",
            self.re, self.eps1, self.eps2, self.eps12
        )
    }
}

impl Scalar for HyperDual {
    const PLAIN: bool = false;

    #[inline]
    fn constant(re: f64) -> Self {
        HyperDual {
            re,
            ..Default::default()
        }
    }

    #[inline]
    fn seeded(re: f64, first: bool, second: bool) -> Self {
        HyperDual {
            re,
            eps1: if first { 1.0 } else { 0.0 },
            eps2: if second { 1.0 } else { 0.0 },
            eps12: 0.0,
        }
    }

    #[inline]
    fn re(&self) -> f64 {
        self.re
    }

    #[inline]
    fn chain(self, f: f64, df: f64, d2f: f64) -> Self {
        HyperDual {
            re: f,
            eps1: df * self.eps1,
            eps2: df * self.eps2,
            eps12: df * self.eps12 + d2f * self.eps1 * self.eps2,
        }
    }
}

impl Add for HyperDual {
    type Output = Self;
    #[inline]
    fn add(self, rhs: Self) -> Self {
        HyperDual {
            re: self.re + rhs.re,
            eps1: self.eps1 + rhs.eps1,
            eps2: self.eps2 + rhs.eps2,
            eps12: self.eps12 + rhs.eps12,
        }
    }
}

impl Sub for HyperDual {
    type Output = Self;
    #[inline]
    fn sub(self, rhs: Self) -> Self {
        self + (-rhs)
    }
}

impl Mul for HyperDual {
    type Output = Self;
    #[inline]
    fn mul(self, rhs: Self) -> Self {
        HyperDual {
            re: self.re * rhs.re,
            eps1: self.re * rhs.eps1 + self.eps1 * rhs.re,
            eps2: self.re * rhs.eps2 + self.eps2 * rhs.re,
            eps12: self.re * rhs.eps12
                + self.eps1 * rhs.eps2
                + self.eps2 * rhs.eps1
                + self.eps12 * rhs.re,
        }
    }
}

impl Div for HyperDual {
    type Output = Self;
    #[inline]
    fn div(self, rhs: Self) -> Self {
        let inv = 1.0 / rhs.re;
        self * rhs.chain(inv, -inv * inv, 2.0 * inv * inv * inv)
    }
}

impl Neg for HyperDual {
    type Output = Self;
    #[inline]
    fn neg(self) -> Self {
        HyperDual {
            re: -self.re,
            eps1: -self.eps1,
            eps2: -self.eps2,
            eps12: -self.eps12,
        }
    }
}

/// Value, first and second derivative of `v^p` for a constant exponent.
pub fn power_terms(v: f64, p: f64) -> (f64, f64, f64) {
    if p == 0.0 {
        return (1.0, 0.0, 0.0);
    }
    let df = p * v.powf(p - 1.0);
    let d2f = if p == 1.0 {
        0.0
    } else {
        p * (p - 1.0) * v.powf(p - 2.0)
    };
    (v.powf(p), df, d2f)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_dual_product_rule() {
        // d/dx (x * x) at x = 3
        let x = Dual::seeded(3.0, true, false);
        let y = x * x;
        assert_relative_eq!(y.re, 9.0);
        assert_relative_eq!(y.eps, 6.0);
    }

    #[test]
    fn test_dual_quotient_rule() {
        let x = Dual::seeded(2.0, true, false);
        let y = Dual::constant(1.0) / x;
        assert_relative_eq!(y.eps, -0.25);
    }

    #[test]
    fn test_hyperdual_mixed_partial() {
        // f(x, y) = x^2 * y, d2f/dxdy = 2x
        let x = HyperDual::seeded(1.5, true, false);
        let y = HyperDual::seeded(4.0, false, true);
        let f = x * x * y;
        assert_relative_eq!(f.eps12, 3.0);
    }

    #[test]
    fn test_hyperdual_chain_second_order() {
        // d2/dx2 sin(x) = -sin(x)
        let x = HyperDual::seeded(0.7, true, true);
        let y = x.chain(x.re.sin(), x.re.cos(), -x.re.sin());
        assert_relative_eq!(y.eps12, -(0.7f64).sin());
    }

    #[test]
    fn test_power_terms_at_zero() {
        assert_eq!(power_terms(0.0, 2.0), (0.0, 0.0, 2.0));
        assert_eq!(power_terms(0.0, 1.0), (0.0, 1.0, 0.0));
    }
}
