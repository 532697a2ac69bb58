//! Constraint canonicalization.
//!
//! Canonicalization turns a user relation into `lower <= middle <= upper`:
//! - `middle` carries the decision-variable-dependent part, as a column
//! - `lower`/`upper` depend on parameters and constants only (or are ±inf)
//! - scalar operands are broadcast elementwise
//!
//! Which side becomes the middle follows the relation:
//! - `l <= r` with variable-free `r`: middle `l`, bounds `(-inf, r)`
//! - `l <= r` with variable-free `l`: middle `r`, bounds `(l, +inf)`, flipped
//! - both sides with variables: middle `l - r`, bounds `(-inf, 0)`
//! - equalities pick the variable side the same way, bound on both ends
//! - `lo <= m <= hi` with variables in `lo` or `hi` becomes the stacked
//!   inequality `[lo - m; m - hi] <= 0`
//!
//! A flipped record is reported to the user as `-middle` with bounds
//! `(-upper, -lower)`, so every relation reads as `lhs - rhs` and inequality
//! duals are non-negative when active.

use std::sync::Arc;

use crate::constraints::Constraint;
use crate::error::{OptiError, Result};
use crate::expr::{full, Expr, Shape, SymbolData, SymbolKind};

/// Form of the original relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationKind {
    /// lhs == rhs
    Equality,
    /// lhs <= rhs
    Inequality,
    /// lower <= middle <= upper
    DoubleInequality,
}

/// A relation in canonical `lower <= middle <= upper` form.
#[derive(Debug, Clone)]
pub struct CanonConstraint {
    /// The relation as the user wrote it.
    pub source: Constraint,
    /// Form of the relation.
    pub kind: RelationKind,
    /// Variable-dependent part, as a column.
    pub middle: Expr,
    /// Lower bound column.
    pub lower: Expr,
    /// Upper bound column.
    pub upper: Expr,
    /// The middle is the right-hand side of the relation.
    pub flipped: bool,
    /// Shape of the relation (and of its dual symbol).
    pub shape: Shape,
    /// Row scale: the backend sees `middle / scale`.
    pub scale: f64,
}

impl CanonConstraint {
    /// Number of rows.
    pub fn rows(&self) -> usize {
        self.shape.size()
    }

    /// The variable and its elements when the middle is a direct selection
    /// of one decision variable.
    pub fn simple(&self) -> Option<(&Arc<SymbolData>, Vec<usize>)> {
        self.middle
            .selection_of_symbol()
            .filter(|(s, _)| s.kind == SymbolKind::Variable)
    }

    /// Sign applied to rows and multipliers when reporting to the user.
    pub fn sign(&self) -> f64 {
        if self.flipped {
            -1.0
        } else {
            1.0
        }
    }

    /// Row expression as reported to the user.
    pub fn user_expr(&self) -> Expr {
        if self.flipped {
            -&self.middle
        } else {
            self.middle.clone()
        }
    }

    /// Lower bound as reported to the user.
    pub fn user_lower(&self) -> Expr {
        if self.flipped {
            -&self.upper
        } else {
            self.lower.clone()
        }
    }

    /// Upper bound as reported to the user.
    pub fn user_upper(&self) -> Expr {
        if self.flipped {
            -&self.lower
        } else {
            self.upper.clone()
        }
    }
}

fn has_variable(e: &Expr) -> bool {
    e.has_kind(SymbolKind::Variable)
}

fn mismatch(expected: Shape, got: Shape) -> OptiError {
    OptiError::ShapeMismatch {
        expected: expected.to_string(),
        got: got.to_string(),
    }
}

/// Lay `e` out as a column of `shape.size()` rows, repeating a scalar.
///
/// Selections stay selections so that simple bounds remain detectable.
fn broadcast_to(e: &Expr, shape: Shape) -> Expr {
    let n = shape.size();
    let own = e.shape();
    if own.is_scalar() && n != 1 {
        e.index(vec![0; n], Shape::vector(n))
    } else if matches!(e, Expr::Symbol(_) | Expr::Index(..) | Expr::Constant(_)) {
        e.index((0..n).collect(), Shape::vector(n))
    } else {
        e.vec()
    }
}

fn infinite(shape: Shape, value: f64) -> Expr {
    full(Shape::vector(shape.size()), value)
}

/// Canonicalize a relation with row scale `scale`.
///
/// Checks, in order: dual symbols, presence of a decision variable, shapes.
/// Scope is the caller's responsibility.
pub fn canonicalize(constraint: &Constraint, scale: f64) -> Result<CanonConstraint> {
    if let Some(dual) = constraint
        .symbols()
        .into_iter()
        .find(|s| s.kind == SymbolKind::Dual)
    {
        return Err(OptiError::DualForbidden {
            symbol: dual.describe(),
        });
    }
    if !constraint.symbols().iter().any(|s| s.kind == SymbolKind::Variable) {
        return Err(OptiError::NoDecisionVariable);
    }
    if constraint.expressions().iter().any(|e| e.has_derivative()) {
        return Err(OptiError::InvalidProblem(
            "derivative nodes are not allowed in constraints".into(),
        ));
    }
    if !(scale.is_finite() && scale != 0.0) {
        return Err(OptiError::InvalidProblem(format!(
            "constraint scale must be finite and nonzero, got {scale}"
        )));
    }

    let record = |kind, middle, lower, upper, flipped, shape| CanonConstraint {
        source: constraint.clone(),
        kind,
        middle,
        lower,
        upper,
        flipped,
        shape,
        scale,
    };

    match constraint {
        Constraint::Eq(l, r) => {
            let (sl, sr) = (l.try_shape()?, r.try_shape()?);
            let (vl, vr) = (has_variable(l), has_variable(r));
            if vl && vr {
                let shape = sl.broadcast(&sr).ok_or_else(|| mismatch(sl, sr))?;
                let middle = broadcast_to(&(l.as_ref() - r.as_ref()), shape);
                let zero = full(Shape::vector(shape.size()), 0.0);
                return Ok(record(
                    RelationKind::Equality,
                    middle,
                    zero.clone(),
                    zero,
                    false,
                    shape,
                ));
            }
            let (middle, bound, flipped) = if vl { (l, r, false) } else { (r, l, true) };
            let (sm, sb) = (middle.try_shape()?, bound.try_shape()?);
            if sb != sm && !sb.is_scalar() {
                return Err(mismatch(sm, sb));
            }
            let bound = broadcast_to(bound, sm);
            Ok(record(
                RelationKind::Equality,
                broadcast_to(middle, sm),
                bound.clone(),
                bound,
                flipped,
                sm,
            ))
        }
        Constraint::Le(l, r) => {
            let (sl, sr) = (l.try_shape()?, r.try_shape()?);
            let shape = sl.broadcast(&sr).ok_or_else(|| mismatch(sl, sr))?;
            let (vl, vr) = (has_variable(l), has_variable(r));
            let (middle, lower, upper, flipped) = if !vr {
                (
                    broadcast_to(l, shape),
                    infinite(shape, f64::NEG_INFINITY),
                    broadcast_to(r, shape),
                    false,
                )
            } else if !vl {
                (
                    broadcast_to(r, shape),
                    broadcast_to(l, shape),
                    infinite(shape, f64::INFINITY),
                    true,
                )
            } else {
                (
                    broadcast_to(&(l.as_ref() - r.as_ref()), shape),
                    infinite(shape, f64::NEG_INFINITY),
                    infinite(shape, 0.0),
                    false,
                )
            };
            Ok(record(
                RelationKind::Inequality,
                middle,
                lower,
                upper,
                flipped,
                shape,
            ))
        }
        Constraint::Bounded {
            lower,
            middle,
            upper,
        } => {
            let (sl, sm, su) = (lower.try_shape()?, middle.try_shape()?, upper.try_shape()?);
            let shape = sl
                .broadcast(&sm)
                .ok_or_else(|| mismatch(sm, sl))?
                .broadcast(&su)
                .ok_or_else(|| mismatch(sm, su))?;
            if has_variable(lower) || has_variable(upper) {
                let stacked = crate::atoms::vertcat(&[
                    broadcast_to(&(lower.as_ref() - middle.as_ref()), shape),
                    broadcast_to(&(middle.as_ref() - upper.as_ref()), shape),
                ]);
                let rows = Shape::vector(2 * shape.size());
                return Ok(record(
                    RelationKind::DoubleInequality,
                    stacked,
                    infinite(rows, f64::NEG_INFINITY),
                    infinite(rows, 0.0),
                    false,
                    rows,
                ));
            }
            Ok(record(
                RelationKind::DoubleInequality,
                broadcast_to(middle, shape),
                broadcast_to(lower, shape),
                broadcast_to(upper, shape),
                false,
                shape,
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraints::ConstraintExt;
    use crate::expr::{constant_vec, eval_f64, Bindings, InstanceId};
    use std::panic::Location;

    fn var(shape: impl Into<Shape>) -> Expr {
        Expr::Symbol(Arc::new(SymbolData::new(
            SymbolKind::Variable,
            Some(InstanceId::new()),
            shape.into(),
            "x",
            Location::caller(),
        )))
    }

    fn par(shape: impl Into<Shape>) -> Expr {
        Expr::Symbol(Arc::new(SymbolData::new(
            SymbolKind::Parameter,
            Some(InstanceId::new()),
            shape.into(),
            "p",
            Location::caller(),
        )))
    }

    fn values(e: &Expr) -> Vec<f64> {
        eval_f64(e, &Bindings::new()).unwrap().as_slice().to_vec()
    }

    #[test]
    fn test_upper_bound_on_variable_is_simple() {
        let x = var(3);
        let c = canonicalize(&x.leq(2.0), 1.0).unwrap();
        assert_eq!(c.kind, RelationKind::Inequality);
        assert!(!c.flipped);
        assert_eq!(c.simple().unwrap().1, vec![0, 1, 2]);
        assert_eq!(values(&c.upper), vec![2.0; 3]);
        assert!(values(&c.lower).iter().all(|v| *v == f64::NEG_INFINITY));
    }

    #[test]
    fn test_lower_bound_flips() {
        let x = var(());
        let c = canonicalize(&x.geq(1.0), 1.0).unwrap();
        assert!(c.flipped);
        assert!(c.simple().is_some());
        assert_eq!(values(&c.lower), vec![1.0]);
        assert_eq!(values(&c.user_upper()), vec![-1.0]);
    }

    #[test]
    fn test_scalar_variable_broadcast_stays_simple() {
        let x = var(());
        let c = canonicalize(&x.leq(constant_vec(vec![1.0, 2.0])), 1.0).unwrap();
        assert_eq!(c.rows(), 2);
        assert_eq!(c.simple().unwrap().1, vec![0, 0]);
    }

    #[test]
    fn test_variables_on_both_sides() {
        let x = var(());
        let y = var(());
        let c = canonicalize(&x.leq(&y), 1.0).unwrap();
        assert!(c.simple().is_none());
        assert_eq!(values(&c.upper), vec![0.0]);
    }

    #[test]
    fn test_equality_scalar_middle_against_vector_is_mismatch() {
        let x = var(());
        let err = canonicalize(&x.equals(constant_vec(vec![1.0, 2.0])), 1.0).unwrap_err();
        assert!(matches!(err, OptiError::ShapeMismatch { .. }));
        let y = var(2);
        assert!(canonicalize(&y.equals(1.0), 1.0).is_ok());
    }

    #[test]
    fn test_shape_mismatch() {
        let x = var(3);
        let err = canonicalize(&x.leq(constant_vec(vec![1.0, 2.0])), 1.0).unwrap_err();
        assert!(matches!(err, OptiError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_no_decision_variable() {
        let p = par(());
        let err = canonicalize(&p.leq(1.0), 1.0).unwrap_err();
        assert!(matches!(err, OptiError::NoDecisionVariable));
    }

    #[test]
    fn test_parametric_double_inequality() {
        let x = var(2);
        let p = par(());
        let c = canonicalize(&p.leq(&x).leq(3.0), 1.0).unwrap();
        assert_eq!(c.kind, RelationKind::DoubleInequality);
        assert!(c.simple().is_some());
        assert_eq!(values(&c.upper), vec![3.0, 3.0]);
    }

    #[test]
    fn test_double_inequality_with_variable_bound_is_stacked() {
        let x = var(());
        let y = var(());
        let c = canonicalize(&y.leq(&x).leq(1.0), 1.0).unwrap();
        assert_eq!(c.rows(), 2);
        assert!(c.simple().is_none());
    }
}
