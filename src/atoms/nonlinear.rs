//! Elementwise nonlinear atoms and derivative atoms.
//!
//! Derivative atoms ([`jacobian`], [`gradient`], [`hessian`]) build nodes that
//! are evaluated numerically by forward-mode differentiation. They are meant
//! for inspection through `value`; objective and constraints reject them.

use std::sync::Arc;

use crate::expr::{Expr, UnaryOp};

fn unary(op: UnaryOp, x: &Expr) -> Expr {
    Expr::Unary(op, Arc::new(x.clone()))
}

/// Sine (elementwise).
pub fn sin(x: &Expr) -> Expr {
    unary(UnaryOp::Sin, x)
}

/// Cosine (elementwise).
pub fn cos(x: &Expr) -> Expr {
    unary(UnaryOp::Cos, x)
}

/// Tangent (elementwise).
pub fn tan(x: &Expr) -> Expr {
    unary(UnaryOp::Tan, x)
}

/// Exponential (elementwise).
pub fn exp(x: &Expr) -> Expr {
    unary(UnaryOp::Exp, x)
}

/// Natural logarithm (elementwise).
pub fn log(x: &Expr) -> Expr {
    unary(UnaryOp::Log, x)
}

/// Square root (elementwise).
pub fn sqrt(x: &Expr) -> Expr {
    unary(UnaryOp::Sqrt, x)
}

/// Hyperbolic tangent (elementwise).
pub fn tanh(x: &Expr) -> Expr {
    unary(UnaryOp::Tanh, x)
}

/// Absolute value (elementwise).
pub fn abs(x: &Expr) -> Expr {
    unary(UnaryOp::Abs, x)
}

/// Power with a constant exponent (elementwise).
pub fn pow(x: &Expr, p: f64) -> Expr {
    Expr::Power(Arc::new(x.clone()), p)
}

/// Square (elementwise).
pub fn sq(x: &Expr) -> Expr {
    pow(x, 2.0)
}

/// Euclidean norm of all elements.
pub fn norm_2(x: &Expr) -> Expr {
    sqrt(&crate::atoms::sumsqr(x))
}

/// Jacobian of `f` (flattened) with respect to the symbol elements of `wrt`.
///
/// Result shape is `f.size() x wrt.size()`.
pub fn jacobian(f: &Expr, wrt: &Expr) -> Expr {
    Expr::Jacobian(Arc::new(f.clone()), Arc::new(wrt.clone()))
}

/// Gradient of a scalar `f` as a column vector.
pub fn gradient(f: &Expr, wrt: &Expr) -> Expr {
    jacobian(f, wrt).t()
}

/// Hessian of a scalar `f` with respect to the symbol elements of `wrt`.
pub fn hessian(f: &Expr, wrt: &Expr) -> Expr {
    Expr::Hessian(Arc::new(f.clone()), Arc::new(wrt.clone()))
}
