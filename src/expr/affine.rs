//! Per-element affine decomposition.
//!
//! [`affine_map`] writes every element of an expression as
//! `offset + coeff * s[k]` with at most one symbol element per output element.
//! Expressions that need more (sums of distinct elements, products of
//! symbols, nonlinear functions of symbols) are reported as arbitrary by
//! returning `None`. Assignments (`set_value`, `set_initial`, substitutions)
//! invert this map element by element.

use super::expression::Expr;
use super::symbol::SymbolId;

/// `coeff * symbol[element]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Term {
    pub symbol: SymbolId,
    pub element: usize,
    pub coeff: f64,
}

/// One output element: `offset + term`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineEntry {
    pub offset: f64,
    pub term: Option<Term>,
}

impl AffineEntry {
    fn constant(offset: f64) -> Self {
        AffineEntry { offset, term: None }
    }

    fn scaled(self, factor: f64) -> Self {
        AffineEntry {
            offset: self.offset * factor,
            term: self
                .term
                .map(|t| Term {
                    coeff: t.coeff * factor,
                    ..t
                })
                .filter(|t| t.coeff != 0.0),
        }
    }

    fn plus(self, other: AffineEntry) -> Option<AffineEntry> {
        let term = match (self.term, other.term) {
            (None, t) | (t, None) => t,
            (Some(a), Some(b)) if a.symbol == b.symbol && a.element == b.element => Some(Term {
                coeff: a.coeff + b.coeff,
                ..a
            })
            .filter(|t| t.coeff != 0.0),
            _ => return None,
        };
        Some(AffineEntry {
            offset: self.offset + other.offset,
            term,
        })
    }

    fn times(self, other: AffineEntry) -> Option<AffineEntry> {
        match (self.term, other.term) {
            (None, _) => Some(other.scaled(self.offset)),
            (_, None) => Some(self.scaled(other.offset)),
            _ => None,
        }
    }
}

/// Decompose `expr` element-wise (column-major), or `None` if arbitrary.
pub fn affine_map(expr: &Expr) -> Option<Vec<AffineEntry>> {
    let shape = expr.try_shape().ok()?;
    let entries = match expr {
        Expr::Symbol(s) => (0..s.size())
            .map(|k| AffineEntry {
                offset: 0.0,
                term: Some(Term {
                    symbol: s.id,
                    element: k,
                    coeff: 1.0,
                }),
            })
            .collect(),
        Expr::Constant(m) => m.iter().map(|&v| AffineEntry::constant(v)).collect(),
        Expr::Add(a, b) => zip_broadcast(affine_map(a)?, affine_map(b)?, AffineEntry::plus)?,
        Expr::Mul(a, b) => zip_broadcast(affine_map(a)?, affine_map(b)?, AffineEntry::times)?,
        Expr::Div(a, b) => zip_broadcast(affine_map(a)?, affine_map(b)?, |x, y| {
            if y.term.is_some() || y.offset == 0.0 {
                None
            } else {
                Some(x.scaled(1.0 / y.offset))
            }
        })?,
        Expr::Neg(a) => affine_map(a)?.into_iter().map(|e| e.scaled(-1.0)).collect(),
        Expr::MatMul(a, b) => {
            let (sa, sb) = (a.try_shape().ok()?, b.try_shape().ok()?);
            let (ea, eb) = (affine_map(a)?, affine_map(b)?);
            if sa.cols() != sb.rows() {
                zip_broadcast(ea, eb, AffineEntry::times)?
            } else {
                let (m, k, n) = (sa.rows(), sa.cols(), sb.cols());
                let mut out = Vec::with_capacity(m * n);
                for j in 0..n {
                    for i in 0..m {
                        let mut acc = AffineEntry::constant(0.0);
                        for l in 0..k {
                            acc = acc.plus(ea[l * m + i].times(eb[j * k + l])?)?;
                        }
                        out.push(acc);
                    }
                }
                out
            }
        }
        Expr::Transpose(a) => {
            let src = a.try_shape().ok()?;
            let inner = affine_map(a)?;
            let mut out = Vec::with_capacity(src.size());
            for r in 0..src.rows() {
                for c in 0..src.cols() {
                    out.push(inner[src.flat_index(r, c)]);
                }
            }
            out
        }
        Expr::Sum(a) => {
            let mut acc = AffineEntry::constant(0.0);
            for e in affine_map(a)? {
                acc = acc.plus(e)?;
            }
            vec![acc]
        }
        Expr::Index(a, spec) => {
            let inner = affine_map(a)?;
            spec.elements.iter().map(|&i| inner[i]).collect()
        }
        Expr::VertCat(parts) => {
            let mut blocks = Vec::new();
            for p in parts {
                let rows = p.try_shape().ok()?.rows();
                let entries = affine_map(p)?;
                if !entries.is_empty() {
                    blocks.push((rows, entries));
                }
            }
            let mut out = Vec::with_capacity(shape.size());
            for c in 0..shape.cols() {
                for (rows, entries) in &blocks {
                    out.extend_from_slice(&entries[c * rows..(c + 1) * rows]);
                }
            }
            out
        }
        Expr::HorzCat(parts) => {
            let mut out = Vec::with_capacity(shape.size());
            for p in parts {
                out.extend(affine_map(p)?);
            }
            out
        }
        Expr::Reshape(a, _) => affine_map(a)?,
        Expr::Unary(op, a) => {
            let inner = affine_map(a)?;
            fold_constant(&inner, |v| op.terms(v).0)?
        }
        Expr::Power(a, p) => {
            let inner = affine_map(a)?;
            fold_constant(&inner, |v| v.powf(*p))?
        }
        Expr::Jacobian(..) | Expr::Hessian(..) => return None,
    };
    Some(entries)
}

fn zip_broadcast(
    a: Vec<AffineEntry>,
    b: Vec<AffineEntry>,
    op: impl Fn(AffineEntry, AffineEntry) -> Option<AffineEntry>,
) -> Option<Vec<AffineEntry>> {
    let n = a.len().max(b.len());
    let pick = |v: &[AffineEntry], i: usize| if v.len() == 1 { v[0] } else { v[i] };
    (0..n).map(|i| op(pick(&a, i), pick(&b, i))).collect()
}

fn fold_constant(entries: &[AffineEntry], f: impl Fn(f64) -> f64) -> Option<Vec<AffineEntry>> {
    entries
        .iter()
        .map(|e| match e.term {
            None => Some(AffineEntry::constant(f(e.offset))),
            Some(_) => None,
        })
        .collect()
}

impl Expr {
    /// The symbol elements this expression selects, if it is a pure
    /// (unit-coefficient, zero-offset) arrangement of symbol elements.
    pub fn selection(&self) -> Option<Vec<(SymbolId, usize)>> {
        affine_map(self)?
            .into_iter()
            .map(|e| match e.term {
                Some(t) if e.offset == 0.0 && t.coeff == 1.0 => Some((t.symbol, t.element)),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::{sin, sum, vertcat};
    use crate::expr::{constant, constant_matrix};

    fn id(e: &Expr) -> SymbolId {
        e.as_symbol().unwrap().id
    }

    #[test]
    fn test_scaled_shifted_element() {
        let x = Expr::symbol("x", 2);
        let map = affine_map(&(3.0 * x.at(1) - 2.0)).unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map[0].offset, -2.0);
        let t = map[0].term.unwrap();
        assert_eq!((t.symbol, t.element, t.coeff), (id(&x), 1, 3.0));
    }

    #[test]
    fn test_sum_of_distinct_elements_is_arbitrary() {
        let x = Expr::symbol("x", 2);
        assert!(affine_map(&sum(&x)).is_none());
        assert!(affine_map(&(&x * &x)).is_none());
        assert!(affine_map(&sin(&x)).is_none());
    }

    #[test]
    fn test_same_element_terms_merge() {
        let x = Expr::symbol("x", ());
        let map = affine_map(&(&x + 2.0 * &x)).unwrap();
        assert_eq!(map[0].term.unwrap().coeff, 3.0);
        let cancelled = affine_map(&(&x - &x)).unwrap();
        assert!(cancelled[0].term.is_none());
    }

    #[test]
    fn test_constant_matrix_product() {
        let x = Expr::symbol("x", 2);
        let a = constant_matrix(vec![2.0, 0.0, 0.0, 5.0], 2, 2);
        let map = affine_map(&a.matmul(&x)).unwrap();
        assert_eq!(map[1].term.unwrap().coeff, 5.0);
        assert_eq!(map[1].term.unwrap().element, 1);
    }

    #[test]
    fn test_selection() {
        let x = Expr::symbol("x", 2);
        let y = Expr::symbol("y", ());
        let sel = vertcat(&[y.clone(), x.clone()]).selection().unwrap();
        assert_eq!(sel, vec![(id(&y), 0), (id(&x), 0), (id(&x), 1)]);
        assert!(vertcat(&[x.clone(), constant(2.0)]).selection().is_none());
        assert!((2.0 * &x).selection().is_none());
    }
}
