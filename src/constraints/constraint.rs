//! Relational expressions.
//!
//! A constraint is kept exactly as the user wrote it:
//! - Eq: lhs == rhs
//! - Le: lhs <= rhs
//! - Bounded: lower <= middle <= upper (a chained double inequality)
//!
//! Normalization into bounds and a canonical middle happens in
//! [`crate::canon`] once the constraint is handed to an Opti instance.

use std::fmt;
use std::sync::Arc;

use crate::expr::{Expr, SymbolData};

/// A relational expression.
///
/// Equality is structural, which is how an Opti instance recognizes a
/// constraint it has registered.
#[derive(Debug, Clone, PartialEq)]
pub enum Constraint {
    /// Equality: lhs == rhs.
    Eq(Arc<Expr>, Arc<Expr>),

    /// Inequality: lhs <= rhs.
    Le(Arc<Expr>, Arc<Expr>),

    /// Double inequality: lower <= middle <= upper.
    Bounded {
        lower: Arc<Expr>,
        middle: Arc<Expr>,
        upper: Arc<Expr>,
    },
}

impl Constraint {
    /// Create an equality constraint: lhs == rhs.
    pub fn eq(lhs: Expr, rhs: Expr) -> Self {
        Constraint::Eq(Arc::new(lhs), Arc::new(rhs))
    }

    /// Create an inequality constraint: lhs <= rhs.
    pub fn le(lhs: Expr, rhs: Expr) -> Self {
        Constraint::Le(Arc::new(lhs), Arc::new(rhs))
    }

    /// Create a double inequality: lower <= middle <= upper.
    pub fn bounded(lower: Expr, middle: Expr, upper: Expr) -> Self {
        Constraint::Bounded {
            lower: Arc::new(lower),
            middle: Arc::new(middle),
            upper: Arc::new(upper),
        }
    }

    /// Chain another upper bound: `(a <= b) <= c` becomes `a <= b <= c`.
    ///
    /// Anything but a single inequality is returned unchanged.
    pub fn leq(self, upper: impl Into<Expr>) -> Constraint {
        match self {
            Constraint::Le(lower, middle) => Constraint::Bounded {
                lower,
                middle,
                upper: Arc::new(upper.into()),
            },
            other => other,
        }
    }

    /// Chain a lower bound: `(a <= b) >= c` becomes `c <= a <= b`.
    ///
    /// Anything but a single inequality is returned unchanged.
    pub fn geq(self, lower: impl Into<Expr>) -> Constraint {
        match self {
            Constraint::Le(middle, upper) => Constraint::Bounded {
                lower: Arc::new(lower.into()),
                middle,
                upper,
            },
            other => other,
        }
    }

    /// Check if this is an equality.
    pub fn is_equality(&self) -> bool {
        matches!(self, Constraint::Eq(..))
    }

    /// All operand expressions, left to right.
    pub fn expressions(&self) -> Vec<&Expr> {
        match self {
            Constraint::Eq(a, b) | Constraint::Le(a, b) => vec![a.as_ref(), b.as_ref()],
            Constraint::Bounded {
                lower,
                middle,
                upper,
            } => vec![lower.as_ref(), middle.as_ref(), upper.as_ref()],
        }
    }

    /// All symbols, sorted by id and deduplicated.
    pub fn symbols(&self) -> Vec<Arc<SymbolData>> {
        let mut syms: Vec<_> = self
            .expressions()
            .into_iter()
            .flat_map(|e| e.symbols())
            .collect();
        syms.sort_by_key(|s| s.id);
        syms.dedup_by_key(|s| s.id);
        syms
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let describe = |e: &Expr| match e.as_symbol() {
            Some(s) => s.name.clone(),
            None => format!("<{}>", e.shape()),
        };
        match self {
            Constraint::Eq(a, b) => write!(f, "{} == {}", describe(a), describe(b)),
            Constraint::Le(a, b) => write!(f, "{} <= {}", describe(a), describe(b)),
            Constraint::Bounded {
                lower,
                middle,
                upper,
            } => write!(
                f,
                "{} <= {} <= {}",
                describe(lower),
                describe(middle),
                describe(upper)
            ),
        }
    }
}

/// Extension trait for creating constraints from expressions.
pub trait ConstraintExt {
    /// Create equality constraint: self == rhs.
    fn equals(&self, rhs: impl Into<Expr>) -> Constraint;

    /// Create inequality constraint: self <= rhs.
    fn leq(&self, rhs: impl Into<Expr>) -> Constraint;

    /// Create inequality constraint: self >= rhs.
    fn geq(&self, rhs: impl Into<Expr>) -> Constraint;
}

impl ConstraintExt for Expr {
    fn equals(&self, rhs: impl Into<Expr>) -> Constraint {
        Constraint::eq(self.clone(), rhs.into())
    }

    fn leq(&self, rhs: impl Into<Expr>) -> Constraint {
        Constraint::le(self.clone(), rhs.into())
    }

    fn geq(&self, rhs: impl Into<Expr>) -> Constraint {
        Constraint::le(rhs.into(), self.clone())
    }
}
