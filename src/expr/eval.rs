//! Numerical evaluation of expressions.
//!
//! Evaluation is generic over [`Scalar`]; Jacobians and Hessians are built by
//! seeding one (or two) symbol elements per pass and reading the derivative
//! parts back out. Derivative nodes inside an expression are themselves
//! evaluated this way, which is why they only accept plain `f64` evaluation.

use std::collections::HashMap;

use nalgebra::DMatrix;

use super::expression::Expr;
use super::scalar::{power_terms, Dual, HyperDual, Scalar};
use super::shape::Shape;
use super::symbol::SymbolId;
use crate::error::{OptiError, Result};

/// Numeric values of symbols, column-major.
#[derive(Debug, Clone, Default)]
pub struct Bindings {
    values: HashMap<SymbolId, Vec<f64>>,
}

impl Bindings {
    /// Empty bindings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind all elements of a symbol.
    pub fn insert(&mut self, id: SymbolId, values: Vec<f64>) {
        self.values.insert(id, values);
    }

    /// Values bound to a symbol.
    pub fn get(&self, id: SymbolId) -> Option<&[f64]> {
        self.values.get(&id).map(|v| v.as_slice())
    }

    /// Check whether a symbol is bound.
    pub fn contains(&self, id: SymbolId) -> bool {
        self.values.contains_key(&id)
    }

    /// Overwrite bindings with those of `other`.
    pub fn extend(&mut self, other: Bindings) {
        self.values.extend(other.values);
    }
}

/// Which symbol elements carry the unit perturbations of a pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Seed {
    pub first: Option<(SymbolId, usize)>,
    pub second: Option<(SymbolId, usize)>,
}

/// Evaluated dense block, column-major.
#[derive(Debug, Clone)]
pub struct Block<T> {
    pub shape: Shape,
    pub data: Vec<T>,
}

impl<T: Scalar> Block<T> {
    fn map(self, f: impl Fn(T) -> T) -> Block<T> {
        Block {
            shape: self.shape,
            data: self.data.into_iter().map(f).collect(),
        }
    }
}

impl Block<f64> {
    /// Convert to a matrix.
    pub fn into_matrix(self) -> DMatrix<f64> {
        DMatrix::from_vec(self.shape.rows(), self.shape.cols(), self.data)
    }
}

/// Evaluate an expression with the given bindings and seed.
pub fn evaluate<T: Scalar>(expr: &Expr, bindings: &Bindings, seed: &Seed) -> Result<Block<T>> {
    let shape = expr.try_shape()?;
    let block = match expr {
        Expr::Symbol(s) => {
            let values = bindings.get(s.id).ok_or_else(|| OptiError::Unresolved {
                symbol: s.describe(),
            })?;
            if values.len() != s.size() {
                return Err(OptiError::Inconsistent(format!(
                    "{} is bound to {} values",
                    s.describe(),
                    values.len()
                )));
            }
            let data = values
                .iter()
                .enumerate()
                .map(|(k, &v)| {
                    T::seeded(
                        v,
                        seed.first == Some((s.id, k)),
                        seed.second == Some((s.id, k)),
                    )
                })
                .collect();
            Block { shape, data }
        }
        Expr::Constant(m) => Block {
            shape,
            data: m.iter().map(|&v| T::constant(v)).collect(),
        },
        Expr::Add(a, b) => elementwise(
            evaluate(a, bindings, seed)?,
            evaluate(b, bindings, seed)?,
            shape,
            |x, y| x + y,
        ),
        Expr::Mul(a, b) => elementwise(
            evaluate(a, bindings, seed)?,
            evaluate(b, bindings, seed)?,
            shape,
            |x, y| x * y,
        ),
        Expr::Div(a, b) => elementwise(
            evaluate(a, bindings, seed)?,
            evaluate(b, bindings, seed)?,
            shape,
            |x, y| x / y,
        ),
        Expr::Neg(a) => evaluate::<T>(a, bindings, seed)?.map(|x| -x),
        Expr::MatMul(a, b) => {
            let (ea, eb) = (evaluate(a, bindings, seed)?, evaluate(b, bindings, seed)?);
            if ea.shape.cols() == eb.shape.rows() {
                matmul(&ea, &eb)
            } else {
                elementwise(ea, eb, shape, |x, y| x * y)
            }
        }
        Expr::Transpose(a) => {
            let inner: Block<T> = evaluate(a, bindings, seed)?;
            let src = inner.shape;
            let mut data = Vec::with_capacity(src.size());
            for r in 0..src.rows() {
                for c in 0..src.cols() {
                    data.push(inner.data[src.flat_index(r, c)]);
                }
            }
            Block { shape, data }
        }
        Expr::Sum(a) => {
            let inner: Block<T> = evaluate(a, bindings, seed)?;
            let total = inner
                .data
                .into_iter()
                .fold(T::constant(0.0), |acc, x| acc + x);
            Block {
                shape,
                data: vec![total],
            }
        }
        Expr::Index(a, spec) => {
            let inner: Block<T> = evaluate(a, bindings, seed)?;
            Block {
                shape,
                data: spec.elements.iter().map(|&i| inner.data[i]).collect(),
            }
        }
        Expr::VertCat(parts) => {
            let blocks = parts
                .iter()
                .map(|p| evaluate::<T>(p, bindings, seed))
                .collect::<Result<Vec<_>>>()?;
            let mut data = Vec::with_capacity(shape.size());
            for c in 0..shape.cols() {
                for b in blocks.iter().filter(|b| b.shape.size() > 0) {
                    let rows = b.shape.rows();
                    data.extend_from_slice(&b.data[c * rows..(c + 1) * rows]);
                }
            }
            Block { shape, data }
        }
        Expr::HorzCat(parts) => {
            let mut data = Vec::with_capacity(shape.size());
            for p in parts {
                data.extend(evaluate::<T>(p, bindings, seed)?.data);
            }
            Block { shape, data }
        }
        Expr::Reshape(a, _) => Block {
            shape,
            data: evaluate::<T>(a, bindings, seed)?.data,
        },
        Expr::Unary(op, a) => evaluate::<T>(a, bindings, seed)?.map(|x| {
            let (f, df, d2f) = op.terms(x.re());
            x.chain(f, df, d2f)
        }),
        Expr::Power(a, p) => evaluate::<T>(a, bindings, seed)?.map(|x| {
            let (f, df, d2f) = power_terms(x.re(), *p);
            x.chain(f, df, d2f)
        }),
        Expr::Jacobian(f, wrt) | Expr::Hessian(f, wrt) => {
            if !T::PLAIN {
                return Err(OptiError::InvalidProblem(
                    "derivative nodes cannot be differentiated".into(),
                ));
            }
            let directions = wrt.selection().ok_or_else(|| {
                OptiError::InvalidProblem(
                    "derivatives must be taken with respect to symbol elements".into(),
                )
            })?;
            let m = if matches!(expr, Expr::Jacobian(..)) {
                jacobian_at(f, &directions, bindings)?
            } else {
                hessian_at(f, &directions, bindings)?
            };
            Block {
                shape,
                data: m.iter().map(|&v| T::constant(v)).collect(),
            }
        }
    };
    Ok(block)
}

fn elementwise<T: Scalar>(
    a: Block<T>,
    b: Block<T>,
    shape: Shape,
    op: impl Fn(T, T) -> T,
) -> Block<T> {
    let n = shape.size();
    let pick = |blk: &Block<T>, i: usize| {
        if blk.data.len() == 1 {
            blk.data[0]
        } else {
            blk.data[i]
        }
    };
    Block {
        shape,
        data: (0..n).map(|i| op(pick(&a, i), pick(&b, i))).collect(),
    }
}

fn matmul<T: Scalar>(a: &Block<T>, b: &Block<T>) -> Block<T> {
    let (m, k, n) = (a.shape.rows(), a.shape.cols(), b.shape.cols());
    let mut data = Vec::with_capacity(m * n);
    for j in 0..n {
        for i in 0..m {
            let mut acc = T::constant(0.0);
            for l in 0..k {
                acc = acc + a.data[l * m + i] * b.data[j * k + l];
            }
            data.push(acc);
        }
    }
    Block {
        shape: Shape::matrix(m, n),
        data,
    }
}

/// Evaluate to a plain matrix.
pub fn eval_f64(expr: &Expr, bindings: &Bindings) -> Result<DMatrix<f64>> {
    Ok(evaluate::<f64>(expr, bindings, &Seed::default())?.into_matrix())
}

/// Jacobian of `f` (flattened column-major) with respect to the listed
/// symbol elements, one forward pass per element.
pub fn jacobian_at(
    f: &Expr,
    wrt: &[(SymbolId, usize)],
    bindings: &Bindings,
) -> Result<DMatrix<f64>> {
    let m = f.try_shape()?.size();
    let present: Vec<SymbolId> = f.symbols().iter().map(|s| s.id).collect();
    let mut jac = DMatrix::zeros(m, wrt.len());
    for (col, &(id, k)) in wrt.iter().enumerate() {
        if !present.contains(&id) {
            continue;
        }
        let seed = Seed {
            first: Some((id, k)),
            second: None,
        };
        let block: Block<Dual> = evaluate(f, bindings, &seed)?;
        for (row, v) in block.data.iter().enumerate() {
            jac[(row, col)] = v.eps;
        }
    }
    Ok(jac)
}

/// Full symmetric Hessian of a scalar `f` with respect to the listed symbol
/// elements.
pub fn hessian_at(
    f: &Expr,
    wrt: &[(SymbolId, usize)],
    bindings: &Bindings,
) -> Result<DMatrix<f64>> {
    let shape = f.try_shape()?;
    if !shape.is_scalar() {
        return Err(OptiError::ShapeMismatch {
            expected: Shape::scalar().to_string(),
            got: shape.to_string(),
        });
    }
    let present: Vec<SymbolId> = f.symbols().iter().map(|s| s.id).collect();
    let n = wrt.len();
    let mut hess = DMatrix::zeros(n, n);
    for i in 0..n {
        if !present.contains(&wrt[i].0) {
            continue;
        }
        for j in i..n {
            if !present.contains(&wrt[j].0) {
                continue;
            }
            let seed = Seed {
                first: Some(wrt[i]),
                second: Some(wrt[j]),
            };
            let block: Block<HyperDual> = evaluate(f, bindings, &seed)?;
            let v = block.data[0].eps12;
            hess[(i, j)] = v;
            hess[(j, i)] = v;
        }
    }
    Ok(hess)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::{exp, sin, sum};
    use crate::expr::{constant_matrix, constant_vec};
    use approx::assert_relative_eq;

    fn bind(pairs: &[(&Expr, Vec<f64>)]) -> Bindings {
        let mut b = Bindings::new();
        for (e, v) in pairs {
            b.insert(e.as_symbol().unwrap().id, v.clone());
        }
        b
    }

    #[test]
    fn test_matmul_and_transpose() {
        let a = constant_matrix(vec![1.0, 3.0, 2.0, 4.0], 2, 2);
        let x = Expr::symbol("x", 2);
        let b = bind(&[(&x, vec![1.0, 1.0])]);
        let y = eval_f64(&a.matmul(&x), &b).unwrap();
        assert_eq!(y.as_slice(), &[3.0, 7.0]);
        let yt = eval_f64(&x.t().matmul(&a), &b).unwrap();
        assert_eq!(yt.as_slice(), &[4.0, 6.0]);
    }

    #[test]
    fn test_vertcat_of_matrices_is_column_major() {
        let top = constant_matrix(vec![1.0, 2.0], 1, 2);
        let bottom = constant_matrix(vec![3.0, 4.0], 1, 2);
        let v = crate::atoms::vertcat(&[top, bottom]);
        let m = eval_f64(&v, &Bindings::new()).unwrap();
        assert_eq!(m.as_slice(), &[1.0, 3.0, 2.0, 4.0]);
    }

    #[test]
    fn test_unbound_symbol_is_unresolved() {
        let x = Expr::symbol("x", ());
        assert!(matches!(
            eval_f64(&(&x + 1.0), &Bindings::new()),
            Err(OptiError::Unresolved { .. })
        ));
    }

    #[test]
    fn test_jacobian() {
        let x = Expr::symbol("x", 2);
        let id = x.as_symbol().unwrap().id;
        let f = constant_vec(vec![2.0, 3.0]) * &x * &x;
        let b = bind(&[(&x, vec![1.0, 2.0])]);
        let j = jacobian_at(&f, &[(id, 0), (id, 1)], &b).unwrap();
        assert_relative_eq!(j[(0, 0)], 4.0);
        assert_relative_eq!(j[(1, 1)], 12.0);
        assert_relative_eq!(j[(0, 1)], 0.0);
    }

    #[test]
    fn test_hessian() {
        let x = Expr::symbol("x", 2);
        let id = x.as_symbol().unwrap().id;
        let f = sin(&x.at(0)) * exp(&x.at(1)) + sum(&(&x * &x));
        let b = bind(&[(&x, vec![0.3, 0.2])]);
        let h = hessian_at(&f, &[(id, 0), (id, 1)], &b).unwrap();
        assert_relative_eq!(h[(0, 0)], -(0.3f64).sin() * (0.2f64).exp() + 2.0, epsilon = 1e-12);
        assert_relative_eq!(h[(0, 1)], (0.3f64).cos() * (0.2f64).exp(), epsilon = 1e-12);
        assert_relative_eq!(h[(1, 0)], h[(0, 1)]);
    }

    #[test]
    fn test_jacobian_node() {
        let x = Expr::symbol("x", 2);
        let f = &x * &x;
        let j = crate::atoms::jacobian(&f, &x);
        let b = bind(&[(&x, vec![1.0, 3.0])]);
        let m = eval_f64(&j, &b).unwrap();
        assert_eq!(m.shape(), (2, 2));
        assert_relative_eq!(m[(1, 1)], 6.0);
    }
}
