//! Polynomial degree tracking.
//!
//! Determines whether an expression is constant, affine, quadratic or
//! nonlinear in a chosen set of symbols. The conic backend uses it to accept
//! quadratic objectives with affine constraints.

use super::expression::Expr;
use super::symbol::SymbolData;

/// Degree of an expression in a set of symbols.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Degree {
    /// Does not depend on the symbols.
    Constant,
    /// Affine function.
    Affine,
    /// Polynomial of degree two.
    Quadratic,
    /// Anything else.
    Nonlinear,
}

impl Degree {
    /// Check if the degree is at most affine.
    pub fn is_affine(self) -> bool {
        matches!(self, Degree::Constant | Degree::Affine)
    }

    /// Check if the degree is at most quadratic.
    pub fn is_quadratic(self) -> bool {
        self <= Degree::Quadratic
    }
}

/// Combine degrees for a product: a * b.
pub fn mul_degree(a: Degree, b: Degree) -> Degree {
    use Degree::*;
    match (a, b) {
        // Constants don't raise the degree
        (Constant, x) | (x, Constant) => x,
        (Affine, Affine) => Quadratic,
        _ => Nonlinear,
    }
}

fn combine_all<'a>(
    exprs: impl IntoIterator<Item = &'a std::sync::Arc<Expr>>,
    is_var: &dyn Fn(&SymbolData) -> bool,
) -> Degree {
    exprs
        .into_iter()
        .map(|e| e.degree(is_var))
        .max()
        .unwrap_or(Degree::Constant)
}

impl Expr {
    /// Degree of this expression in the symbols accepted by `is_var`.
    pub fn degree(&self, is_var: &dyn Fn(&SymbolData) -> bool) -> Degree {
        match self {
            Expr::Symbol(s) => {
                if is_var(s) {
                    Degree::Affine
                } else {
                    Degree::Constant
                }
            }
            Expr::Constant(_) => Degree::Constant,

            // Linear operations keep the degree
            Expr::Add(a, b) => a.degree(is_var).max(b.degree(is_var)),
            Expr::Neg(a)
            | Expr::Transpose(a)
            | Expr::Sum(a)
            | Expr::Index(a, _)
            | Expr::Reshape(a, _) => a.degree(is_var),
            Expr::VertCat(parts) | Expr::HorzCat(parts) => combine_all(parts, is_var),

            Expr::Mul(a, b) | Expr::MatMul(a, b) => mul_degree(a.degree(is_var), b.degree(is_var)),
            Expr::Div(a, b) => match b.degree(is_var) {
                Degree::Constant => a.degree(is_var),
                _ => Degree::Nonlinear,
            },

            Expr::Power(a, p) => {
                let d = a.degree(is_var);
                if d == Degree::Constant || *p == 0.0 {
                    Degree::Constant
                } else if *p == 1.0 {
                    d
                } else if *p == 2.0 {
                    mul_degree(d, d)
                } else {
                    Degree::Nonlinear
                }
            }
            Expr::Unary(_, a) => match a.degree(is_var) {
                Degree::Constant => Degree::Constant,
                _ => Degree::Nonlinear,
            },
            Expr::Jacobian(..) | Expr::Hessian(..) => {
                if self.symbols().iter().any(|s| is_var(s)) {
                    Degree::Nonlinear
                } else {
                    Degree::Constant
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::{sin, sumsqr};

    fn all(_: &SymbolData) -> bool {
        true
    }

    #[test]
    fn test_mul_degree() {
        assert_eq!(mul_degree(Degree::Constant, Degree::Affine), Degree::Affine);
        assert_eq!(mul_degree(Degree::Affine, Degree::Affine), Degree::Quadratic);
        assert_eq!(mul_degree(Degree::Quadratic, Degree::Affine), Degree::Nonlinear);
    }

    #[test]
    fn test_expression_degrees() {
        let x = Expr::symbol("x", 3);
        assert_eq!((2.0 * &x + 1.0).degree(&all), Degree::Affine);
        assert_eq!(sumsqr(&(&x - 1.0)).degree(&all), Degree::Quadratic);
        assert_eq!(sin(&x).degree(&all), Degree::Nonlinear);
        assert_eq!((&x / &x).degree(&all), Degree::Nonlinear);
    }

    #[test]
    fn test_degree_respects_predicate() {
        let x = Expr::symbol("x", ());
        let p = Expr::symbol("p", ());
        let px = x.as_symbol().unwrap().id;
        let only_x = move |s: &SymbolData| s.id == px;
        assert_eq!((&p * &x).degree(&only_x), Degree::Affine);
        assert_eq!(sin(&p).degree(&only_x), Degree::Constant);
    }
}
