//! Affine atoms and operator overloading.
//!
//! Arithmetic operators are elementwise with scalar broadcasting; matrix
//! products go through [`matmul`] or [`Expr::matmul`]. Structural atoms:
//! - Sum, dot, trace
//! - Transpose, reshape, vec
//! - Vertical/horizontal concatenation

use std::ops::{Add, Div, Mul, Neg, Sub};
use std::sync::Arc;

use crate::expr::{constant, Expr, Shape};

// ============================================================================
// Operator overloading for Expr
// ============================================================================

impl Neg for Expr {
    type Output = Expr;

    fn neg(self) -> Expr {
        Expr::Neg(Arc::new(self))
    }
}

impl Neg for &Expr {
    type Output = Expr;

    fn neg(self) -> Expr {
        Expr::Neg(Arc::new(self.clone()))
    }
}

/// Implements a binary operator for every owned/borrowed `Expr` and `f64`
/// operand combination.
macro_rules! impl_binary_op {
    ($trait:ident, $method:ident, $build:expr) => {
        impl $trait for Expr {
            type Output = Expr;

            fn $method(self, rhs: Expr) -> Expr {
                $build(self, rhs)
            }
        }

        impl $trait for &Expr {
            type Output = Expr;

            fn $method(self, rhs: &Expr) -> Expr {
                $build(self.clone(), rhs.clone())
            }
        }

        impl $trait<&Expr> for Expr {
            type Output = Expr;

            fn $method(self, rhs: &Expr) -> Expr {
                $build(self, rhs.clone())
            }
        }

        impl $trait<Expr> for &Expr {
            type Output = Expr;

            fn $method(self, rhs: Expr) -> Expr {
                $build(self.clone(), rhs)
            }
        }

        impl $trait<f64> for Expr {
            type Output = Expr;

            fn $method(self, rhs: f64) -> Expr {
                $build(self, constant(rhs))
            }
        }

        impl $trait<f64> for &Expr {
            type Output = Expr;

            fn $method(self, rhs: f64) -> Expr {
                $build(self.clone(), constant(rhs))
            }
        }

        impl $trait<Expr> for f64 {
            type Output = Expr;

            fn $method(self, rhs: Expr) -> Expr {
                $build(constant(self), rhs)
            }
        }

        impl $trait<&Expr> for f64 {
            type Output = Expr;

            fn $method(self, rhs: &Expr) -> Expr {
                $build(constant(self), rhs.clone())
            }
        }
    };
}

fn add(a: Expr, b: Expr) -> Expr {
    Expr::Add(Arc::new(a), Arc::new(b))
}

fn sub(a: Expr, b: Expr) -> Expr {
    Expr::Add(Arc::new(a), Arc::new(Expr::Neg(Arc::new(b))))
}

fn mul(a: Expr, b: Expr) -> Expr {
    Expr::Mul(Arc::new(a), Arc::new(b))
}

fn div(a: Expr, b: Expr) -> Expr {
    Expr::Div(Arc::new(a), Arc::new(b))
}

impl_binary_op!(Add, add, add);
impl_binary_op!(Sub, sub, sub);
impl_binary_op!(Mul, mul, mul);
impl_binary_op!(Div, div, div);

impl Expr {
    /// Matrix product `self * other`.
    pub fn matmul(&self, other: &Expr) -> Expr {
        matmul(self, other)
    }
}

// ============================================================================
// Affine atom functions
// ============================================================================

/// Sum of all elements.
pub fn sum(expr: &Expr) -> Expr {
    Expr::Sum(Arc::new(expr.clone()))
}

/// Reshape an expression to a new shape (column-major).
pub fn reshape(expr: &Expr, shape: impl Into<Shape>) -> Expr {
    Expr::Reshape(Arc::new(expr.clone()), shape.into())
}

/// Stack all elements into a column vector.
pub fn vec(expr: &Expr) -> Expr {
    expr.vec()
}

/// Transpose an expression.
pub fn transpose(expr: &Expr) -> Expr {
    Expr::Transpose(Arc::new(expr.clone()))
}

/// Matrix trace.
pub fn trace(expr: &Expr) -> Expr {
    let shape = expr.shape();
    let n = shape.rows().min(shape.cols());
    let diagonal: Vec<usize> = (0..n).map(|i| shape.flat_index(i, i)).collect();
    sum(&expr.select(&diagonal))
}

/// Vertical concatenation.
pub fn vertcat(exprs: &[Expr]) -> Expr {
    match exprs {
        [single] => single.clone(),
        _ => Expr::VertCat(exprs.iter().cloned().map(Arc::new).collect()),
    }
}

/// Horizontal concatenation.
pub fn horzcat(exprs: &[Expr]) -> Expr {
    match exprs {
        [single] => single.clone(),
        _ => Expr::HorzCat(exprs.iter().cloned().map(Arc::new).collect()),
    }
}

/// Vertical concatenation of the vectorized operands.
pub fn veccat(exprs: &[Expr]) -> Expr {
    let parts: Vec<Expr> = exprs.iter().map(Expr::vec).collect();
    vertcat(&parts)
}

/// Matrix-vector or matrix-matrix multiplication.
pub fn matmul(a: &Expr, b: &Expr) -> Expr {
    Expr::MatMul(Arc::new(a.clone()), Arc::new(b.clone()))
}

/// Inner product of two equally shaped expressions.
pub fn dot(a: &Expr, b: &Expr) -> Expr {
    sum(&(a * b))
}

/// Sum of squares of all elements.
pub fn sumsqr(expr: &Expr) -> Expr {
    sum(&Expr::Power(Arc::new(expr.clone()), 2.0))
}
