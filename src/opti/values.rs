//! Assignment resolution for `set_value`, `set_initial` and substitutions.
//!
//! An assignment `target := values` is inverted element by element through
//! the affine map of `target`: every output element must be a constant or
//! `offset + coeff * s[k]`. The same symbol element may be reached several
//! times only with the same value.

use std::collections::HashMap;

use nalgebra::{DMatrix, DVector};

use crate::constraints::Constraint;
use crate::error::{OptiError, Result};
use crate::expr::{affine_map, eval_f64, Bindings, Expr, SymbolId};

/// Numeric data accepted by assignments, flattened column-major.
///
/// A single value broadcasts over every element of the target.
pub trait IntoValue {
    fn into_values(self) -> Vec<f64>;
}

impl IntoValue for f64 {
    fn into_values(self) -> Vec<f64> {
        vec![self]
    }
}

impl IntoValue for i32 {
    fn into_values(self) -> Vec<f64> {
        vec![self as f64]
    }
}

impl IntoValue for Vec<f64> {
    fn into_values(self) -> Vec<f64> {
        self
    }
}

impl IntoValue for &[f64] {
    fn into_values(self) -> Vec<f64> {
        self.to_vec()
    }
}

impl<const N: usize> IntoValue for [f64; N] {
    fn into_values(self) -> Vec<f64> {
        self.to_vec()
    }
}

impl IntoValue for DMatrix<f64> {
    fn into_values(self) -> Vec<f64> {
        self.as_slice().to_vec()
    }
}

impl IntoValue for &DMatrix<f64> {
    fn into_values(self) -> Vec<f64> {
        self.as_slice().to_vec()
    }
}

impl IntoValue for DVector<f64> {
    fn into_values(self) -> Vec<f64> {
        self.as_slice().to_vec()
    }
}

/// One resolved symbol element.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct ElementValue {
    pub symbol: SymbolId,
    pub element: usize,
    pub value: f64,
}

fn same(a: f64, b: f64) -> bool {
    a == b || (a - b).abs() <= 1e-12 * a.abs().max(b.abs()).max(1.0)
}

/// Invert `target := values` into element assignments.
pub(crate) fn resolve_assignment(target: &Expr, values: &[f64]) -> Result<Vec<ElementValue>> {
    let map = affine_map(target).ok_or(OptiError::ArbitraryExpression)?;
    let n = map.len();
    let values: Vec<f64> = match values.len() {
        len if len == n => values.to_vec(),
        1 => vec![values[0]; n],
        len => {
            return Err(OptiError::Inconsistent(format!(
                "expression has {n} elements but {len} values were given"
            )))
        }
    };

    let mut resolved = Vec::new();
    let mut seen: HashMap<(SymbolId, usize), f64> = HashMap::new();
    for (i, (entry, v)) in map.iter().zip(values).enumerate() {
        match entry.term {
            None => {
                if !same(entry.offset, v) {
                    return Err(OptiError::Inconsistent(format!(
                        "element {i} is the constant {} and cannot take the value {v}",
                        entry.offset
                    )));
                }
            }
            Some(t) => {
                let value = (v - entry.offset) / t.coeff;
                match seen.get(&(t.symbol, t.element)) {
                    Some(&prev) if !same(prev, value) => {
                        return Err(OptiError::Ambiguous(format!(
                            "element {} is assigned both {prev} and {value}",
                            t.element
                        )))
                    }
                    Some(_) => {}
                    None => {
                        seen.insert((t.symbol, t.element), value);
                        resolved.push(ElementValue {
                            symbol: t.symbol,
                            element: t.element,
                            value,
                        });
                    }
                }
            }
        }
    }
    Ok(resolved)
}

/// Split an equality `target == numbers` into its target and numbers.
///
/// The right-hand side must be free of symbols.
pub(crate) fn equality_parts(assignment: &Constraint) -> Result<(&Expr, Vec<f64>)> {
    let Constraint::Eq(lhs, rhs) = assignment else {
        return Err(OptiError::InvalidProblem(format!(
            "expected an equality 'symbol == value', got '{assignment}'"
        )));
    };
    let values = eval_f64(rhs, &Bindings::new())?;
    Ok((lhs.as_ref(), values.as_slice().to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::{vertcat, veccat};
    use crate::error::ErrorKind;
    use crate::expr::constant;

    fn id(e: &Expr) -> SymbolId {
        e.as_symbol().unwrap().id
    }

    #[test]
    fn test_plain_symbol() {
        let p = Expr::symbol("p", 3);
        let r = resolve_assignment(&p, &[1.0, 2.0, 3.0]).unwrap();
        assert_eq!(r.len(), 3);
        assert_eq!(r[2].value, 3.0);
        assert_eq!(r[2].symbol, id(&p));
    }

    #[test]
    fn test_scalar_broadcast() {
        let p = Expr::symbol("p", 3);
        let r = resolve_assignment(&p, &[7.0]).unwrap();
        assert!(r.iter().all(|e| e.value == 7.0));
    }

    #[test]
    fn test_affine_inversion() {
        let p = Expr::symbol("p", ());
        let r = resolve_assignment(&(2.0 * &p + 1.0), &[5.0]).unwrap();
        assert_eq!(r[0].value, 2.0);
    }

    #[test]
    fn test_repeated_element() {
        let p = Expr::symbol("p", ());
        let target = veccat(&[p.clone(), p.clone()]);
        assert_eq!(resolve_assignment(&target, &[3.0, 3.0]).unwrap().len(), 1);
        let err = resolve_assignment(&target, &[3.0, 4.0]).unwrap_err();
        assert!(matches!(err, OptiError::Ambiguous(_)));
        assert_eq!(err.kind(), ErrorKind::Structural);
    }

    #[test]
    fn test_constant_entries() {
        let p = Expr::symbol("p", ());
        let target = vertcat(&[constant(2.0), p.clone()]);
        assert_eq!(resolve_assignment(&target, &[2.0, 9.0]).unwrap()[0].value, 9.0);
        assert!(matches!(
            resolve_assignment(&target, &[5.0, 9.0]),
            Err(OptiError::Inconsistent(_))
        ));
    }

    #[test]
    fn test_length_mismatch() {
        let p = Expr::symbol("p", 3);
        assert!(matches!(
            resolve_assignment(&p, &[1.0, 2.0]),
            Err(OptiError::Inconsistent(_))
        ));
    }

    #[test]
    fn test_arbitrary_expression() {
        let p = Expr::symbol("p", 2);
        assert!(matches!(
            resolve_assignment(&(p.at(0) + p.at(1)), &[1.0]),
            Err(OptiError::ArbitraryExpression)
        ));
    }

    #[test]
    fn test_equality_parts() {
        use crate::constraints::ConstraintExt;
        let p = Expr::symbol("p", 2);
        let binding = p.equals(vec![1.0, 2.0]);
        let (target, values) = equality_parts(&binding).unwrap();
        assert_eq!(target, &p);
        assert_eq!(values, vec![1.0, 2.0]);
        assert!(equality_parts(&p.leq(1.0)).is_err());
    }
}
