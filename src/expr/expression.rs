//! Core expression type for optistack.
//!
//! The `Expr` enum is an immutable tree using `Arc` for sharing. Every node is
//! a dense `rows x cols` matrix; leaves are symbols or constants.

use std::collections::HashMap;
use std::ops::Range;
use std::panic::Location;
use std::sync::Arc;

use nalgebra::DMatrix;

use super::shape::Shape;
use super::symbol::{SymbolData, SymbolId, SymbolKind};
use crate::error::{OptiError, Result};

/// Flat column-major element selection with an explicit result shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    /// Selected flat indices of the operand, in result order.
    pub elements: Vec<usize>,
    /// Shape of the selection.
    pub shape: Shape,
}

impl IndexSpec {
    /// Selection laid out as a column vector.
    pub fn column(elements: Vec<usize>) -> Self {
        let shape = Shape::vector(elements.len());
        IndexSpec { elements, shape }
    }
}

/// Elementwise unary functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Sin,
    Cos,
    Tan,
    Exp,
    Log,
    Sqrt,
    Tanh,
    Abs,
}

impl UnaryOp {
    /// Value, first and second derivative at `v`.
    pub fn terms(self, v: f64) -> (f64, f64, f64) {
        match self {
            UnaryOp::Sin => (v.sin(), v.cos(), -v.sin()),
            UnaryOp::Cos => (v.cos(), -v.sin(), -v.cos()),
            UnaryOp::Tan => {
                let t = v.tan();
                let sec2 = 1.0 + t * t;
                (t, sec2, 2.0 * t * sec2)
            }
            UnaryOp::Exp => {
                let e = v.exp();
                (e, e, e)
            }
            UnaryOp::Log => (v.ln(), 1.0 / v, -1.0 / (v * v)),
            UnaryOp::Sqrt => {
                let s = v.sqrt();
                (s, 0.5 / s, -0.25 / (s * v))
            }
            UnaryOp::Tanh => {
                let t = v.tanh();
                let d = 1.0 - t * t;
                (t, d, -2.0 * t * d)
            }
            UnaryOp::Abs => (v.abs(), if v < 0.0 { -1.0 } else { 1.0 }, 0.0),
        }
    }

    /// Function name.
    pub fn name(self) -> &'static str {
        match self {
            UnaryOp::Sin => "sin",
            UnaryOp::Cos => "cos",
            UnaryOp::Tan => "tan",
            UnaryOp::Exp => "exp",
            UnaryOp::Log => "log",
            UnaryOp::Sqrt => "sqrt",
            UnaryOp::Tanh => "tanh",
            UnaryOp::Abs => "abs",
        }
    }
}

/// The core expression type - an algebraic data type.
///
/// Structural equality compares trees node by node; symbols compare by id.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    // ========== Leaf nodes ==========
    /// A variable, parameter, dual or free symbol.
    Symbol(Arc<SymbolData>),
    /// A constant value.
    Constant(DMatrix<f64>),

    // ========== Elementwise arithmetic (scalar broadcasting) ==========
    /// Addition: a + b
    Add(Arc<Expr>, Arc<Expr>),
    /// Negation: -a
    Neg(Arc<Expr>),
    /// Elementwise multiplication: a .* b
    Mul(Arc<Expr>, Arc<Expr>),
    /// Elementwise division: a ./ b
    Div(Arc<Expr>, Arc<Expr>),

    // ========== Linear algebra and structure ==========
    /// Matrix product.
    MatMul(Arc<Expr>, Arc<Expr>),
    /// Transpose.
    Transpose(Arc<Expr>),
    /// Sum of all elements.
    Sum(Arc<Expr>),
    /// Element selection.
    Index(Arc<Expr>, IndexSpec),
    /// Vertical stack: [a; b; ...]
    VertCat(Vec<Arc<Expr>>),
    /// Horizontal stack: [a, b, ...]
    HorzCat(Vec<Arc<Expr>>),
    /// Column-major reshape.
    Reshape(Arc<Expr>, Shape),

    // ========== Nonlinear ==========
    /// Elementwise unary function.
    Unary(UnaryOp, Arc<Expr>),
    /// Elementwise power with a constant exponent.
    Power(Arc<Expr>, f64),

    // ========== Derivatives ==========
    /// Jacobian of the first operand with respect to the symbol elements of the second.
    Jacobian(Arc<Expr>, Arc<Expr>),
    /// Hessian of a scalar first operand with respect to the symbol elements of the second.
    Hessian(Arc<Expr>, Arc<Expr>),
}

impl Expr {
    /// Create a free symbol, not owned by any Opti instance.
    #[track_caller]
    pub fn symbol(name: impl Into<String>, shape: impl Into<Shape>) -> Expr {
        Expr::Symbol(Arc::new(SymbolData::new(
            SymbolKind::Free,
            None,
            shape.into(),
            name,
            Location::caller(),
        )))
    }

    /// Get the shape, reporting inconsistent operands.
    pub fn try_shape(&self) -> Result<Shape> {
        match self {
            Expr::Symbol(s) => Ok(s.shape),
            Expr::Constant(m) => Ok(Shape::matrix(m.nrows(), m.ncols())),
            Expr::Add(a, b) | Expr::Mul(a, b) | Expr::Div(a, b) => {
                let (sa, sb) = (a.try_shape()?, b.try_shape()?);
                sa.broadcast(&sb).ok_or_else(|| mismatch(sa, sb))
            }
            Expr::Neg(a) | Expr::Unary(_, a) | Expr::Power(a, _) => a.try_shape(),
            Expr::MatMul(a, b) => {
                let (sa, sb) = (a.try_shape()?, b.try_shape()?);
                sa.matmul(&sb).ok_or_else(|| mismatch(sa, sb))
            }
            Expr::Transpose(a) => Ok(a.try_shape()?.transpose()),
            Expr::Sum(a) => {
                a.try_shape()?;
                Ok(Shape::scalar())
            }
            Expr::Index(a, spec) => {
                let base = a.try_shape()?;
                if spec.elements.len() != spec.shape.size() {
                    return Err(OptiError::InvalidProblem(format!(
                        "selection of {} elements cannot have shape {}",
                        spec.elements.len(),
                        spec.shape
                    )));
                }
                if let Some(&bad) = spec.elements.iter().find(|&&i| i >= base.size()) {
                    return Err(OptiError::InvalidProblem(format!(
                        "index {bad} out of range for shape {base}"
                    )));
                }
                Ok(spec.shape)
            }
            Expr::VertCat(parts) => {
                let mut rows = 0;
                let mut cols = None;
                for p in parts {
                    let s = p.try_shape()?;
                    if s.size() == 0 {
                        continue;
                    }
                    match cols {
                        Some(c) if c != s.cols() => {
                            return Err(mismatch(Shape::matrix(rows, c), s));
                        }
                        _ => cols = Some(s.cols()),
                    }
                    rows += s.rows();
                }
                Ok(Shape::matrix(rows, cols.unwrap_or(1)))
            }
            Expr::HorzCat(parts) => {
                let mut cols = 0;
                let mut rows = None;
                for p in parts {
                    let s = p.try_shape()?;
                    if s.size() == 0 {
                        continue;
                    }
                    match rows {
                        Some(r) if r != s.rows() => {
                            return Err(mismatch(Shape::matrix(r, cols), s));
                        }
                        _ => rows = Some(s.rows()),
                    }
                    cols += s.cols();
                }
                Ok(Shape::matrix(rows.unwrap_or(1), cols))
            }
            Expr::Reshape(a, shape) => {
                let base = a.try_shape()?;
                if base.size() != shape.size() {
                    return Err(mismatch(*shape, base));
                }
                Ok(*shape)
            }
            Expr::Jacobian(f, wrt) => {
                Ok(Shape::matrix(f.try_shape()?.size(), wrt.try_shape()?.size()))
            }
            Expr::Hessian(f, wrt) => {
                let sf = f.try_shape()?;
                if !sf.is_scalar() {
                    return Err(mismatch(Shape::scalar(), sf));
                }
                let n = wrt.try_shape()?.size();
                Ok(Shape::matrix(n, n))
            }
        }
    }

    /// Get the shape of the expression (1x1 if the operands are inconsistent).
    pub fn shape(&self) -> Shape {
        self.try_shape().unwrap_or_else(|_| Shape::scalar())
    }

    /// Number of elements.
    pub fn size(&self) -> usize {
        self.shape().size()
    }

    /// The symbol, if this expression is a bare symbol.
    pub fn as_symbol(&self) -> Option<&Arc<SymbolData>> {
        match self {
            Expr::Symbol(s) => Some(s),
            _ => None,
        }
    }

    /// Check if this expression is a constant.
    pub fn is_constant(&self) -> bool {
        matches!(self, Expr::Constant(_))
    }

    /// Get the constant value if this is a constant expression.
    pub fn constant_value(&self) -> Option<&DMatrix<f64>> {
        match self {
            Expr::Constant(m) => Some(m),
            _ => None,
        }
    }

    /// A symbol and the selected elements, when this expression is a bare
    /// symbol or a direct element selection of one.
    pub fn selection_of_symbol(&self) -> Option<(&Arc<SymbolData>, Vec<usize>)> {
        match self {
            Expr::Symbol(s) => Some((s, (0..s.size()).collect())),
            Expr::Index(inner, spec) => match inner.as_ref() {
                Expr::Symbol(s) => Some((s, spec.elements.clone())),
                _ => None,
            },
            _ => None,
        }
    }

    /// Collect all symbols in this expression, sorted by id and deduplicated.
    pub fn symbols(&self) -> Vec<Arc<SymbolData>> {
        let mut syms = Vec::new();
        self.collect_symbols(&mut syms);
        syms.sort_by_key(|s| s.id);
        syms.dedup_by_key(|s| s.id);
        syms
    }

    fn collect_symbols(&self, syms: &mut Vec<Arc<SymbolData>>) {
        match self {
            Expr::Symbol(s) => syms.push(s.clone()),
            Expr::Constant(_) => {}
            Expr::Add(a, b)
            | Expr::Mul(a, b)
            | Expr::Div(a, b)
            | Expr::MatMul(a, b)
            | Expr::Jacobian(a, b)
            | Expr::Hessian(a, b) => {
                a.collect_symbols(syms);
                b.collect_symbols(syms);
            }
            Expr::Neg(a)
            | Expr::Transpose(a)
            | Expr::Sum(a)
            | Expr::Index(a, _)
            | Expr::Reshape(a, _)
            | Expr::Unary(_, a)
            | Expr::Power(a, _) => a.collect_symbols(syms),
            Expr::VertCat(parts) | Expr::HorzCat(parts) => {
                for p in parts {
                    p.collect_symbols(syms);
                }
            }
        }
    }

    /// Check whether any symbol of the given kind occurs.
    pub fn has_kind(&self, kind: SymbolKind) -> bool {
        self.symbols().iter().any(|s| s.kind == kind)
    }

    /// Check whether a derivative node occurs.
    pub fn has_derivative(&self) -> bool {
        match self {
            Expr::Jacobian(..) | Expr::Hessian(..) => true,
            Expr::Symbol(_) | Expr::Constant(_) => false,
            Expr::Add(a, b) | Expr::Mul(a, b) | Expr::Div(a, b) | Expr::MatMul(a, b) => {
                a.has_derivative() || b.has_derivative()
            }
            Expr::Neg(a)
            | Expr::Transpose(a)
            | Expr::Sum(a)
            | Expr::Index(a, _)
            | Expr::Reshape(a, _)
            | Expr::Unary(_, a)
            | Expr::Power(a, _) => a.has_derivative(),
            Expr::VertCat(parts) | Expr::HorzCat(parts) => {
                parts.iter().any(|p| p.has_derivative())
            }
        }
    }

    /// Replace symbols by expressions of the same shape.
    pub fn substitute(&self, map: &HashMap<SymbolId, Expr>) -> Expr {
        let sub = |e: &Arc<Expr>| Arc::new(e.substitute(map));
        match self {
            Expr::Symbol(s) => map.get(&s.id).cloned().unwrap_or_else(|| self.clone()),
            Expr::Constant(_) => self.clone(),
            Expr::Add(a, b) => Expr::Add(sub(a), sub(b)),
            Expr::Neg(a) => Expr::Neg(sub(a)),
            Expr::Mul(a, b) => Expr::Mul(sub(a), sub(b)),
            Expr::Div(a, b) => Expr::Div(sub(a), sub(b)),
            Expr::MatMul(a, b) => Expr::MatMul(sub(a), sub(b)),
            Expr::Transpose(a) => Expr::Transpose(sub(a)),
            Expr::Sum(a) => Expr::Sum(sub(a)),
            Expr::Index(a, spec) => Expr::Index(sub(a), spec.clone()),
            Expr::VertCat(parts) => Expr::VertCat(parts.iter().map(sub).collect()),
            Expr::HorzCat(parts) => Expr::HorzCat(parts.iter().map(sub).collect()),
            Expr::Reshape(a, shape) => Expr::Reshape(sub(a), *shape),
            Expr::Unary(op, a) => Expr::Unary(*op, sub(a)),
            Expr::Power(a, p) => Expr::Power(sub(a), *p),
            Expr::Jacobian(f, wrt) => Expr::Jacobian(sub(f), sub(wrt)),
            Expr::Hessian(f, wrt) => Expr::Hessian(sub(f), sub(wrt)),
        }
    }

    // ========== Element access ==========

    /// Select flat (column-major) elements into the given shape.
    ///
    /// Selections of selections and of constants are folded.
    pub fn index(&self, elements: Vec<usize>, shape: Shape) -> Expr {
        match self {
            Expr::Index(inner, spec) if elements.iter().all(|&i| i < spec.elements.len()) => {
                let composed = elements.iter().map(|&i| spec.elements[i]).collect();
                inner.index(composed, shape)
            }
            Expr::Constant(m) if elements.iter().all(|&i| i < m.len()) => {
                let data: Vec<f64> = elements.iter().map(|&i| m[i]).collect();
                Expr::Constant(DMatrix::from_vec(shape.rows(), shape.cols(), data))
            }
            _ => Expr::Index(Arc::new(self.clone()), IndexSpec { elements, shape }),
        }
    }

    /// Single element by flat index.
    pub fn at(&self, i: usize) -> Expr {
        self.index(vec![i], Shape::scalar())
    }

    /// Single element by row and column.
    pub fn elem(&self, row: usize, col: usize) -> Expr {
        self.at(self.shape().flat_index(row, col))
    }

    /// Flat elements as a column vector.
    pub fn select(&self, elements: &[usize]) -> Expr {
        self.index(elements.to_vec(), Shape::vector(elements.len()))
    }

    /// A contiguous flat range as a column vector.
    pub fn slice(&self, range: Range<usize>) -> Expr {
        let elements: Vec<usize> = range.collect();
        let shape = Shape::vector(elements.len());
        self.index(elements, shape)
    }

    /// Column `j` as a column vector.
    pub fn col(&self, j: usize) -> Expr {
        let shape = self.shape();
        let elements = (0..shape.rows()).map(|r| shape.flat_index(r, j)).collect();
        self.index(elements, Shape::vector(shape.rows()))
    }

    /// Row `i` as a row vector.
    pub fn row(&self, i: usize) -> Expr {
        let shape = self.shape();
        let elements = (0..shape.cols()).map(|c| shape.flat_index(i, c)).collect();
        self.index(elements, Shape::matrix(1, shape.cols()))
    }

    /// Transpose.
    pub fn t(&self) -> Expr {
        Expr::Transpose(Arc::new(self.clone()))
    }

    /// Stack all elements column-major into a column vector.
    pub fn vec(&self) -> Expr {
        let shape = self.shape();
        if shape.is_column() {
            self.clone()
        } else {
            Expr::Reshape(Arc::new(self.clone()), Shape::vector(shape.size()))
        }
    }
}

fn mismatch(expected: Shape, got: Shape) -> OptiError {
    OptiError::ShapeMismatch {
        expected: expected.to_string(),
        got: got.to_string(),
    }
}

// Convenient From implementations for automatic conversion
impl From<f64> for Expr {
    fn from(value: f64) -> Self {
        crate::expr::constant(value)
    }
}

impl From<i32> for Expr {
    fn from(value: i32) -> Self {
        crate::expr::constant(value as f64)
    }
}

impl From<&Expr> for Expr {
    fn from(expr: &Expr) -> Self {
        expr.clone()
    }
}

impl From<DMatrix<f64>> for Expr {
    fn from(value: DMatrix<f64>) -> Self {
        Expr::Constant(value)
    }
}

impl From<Vec<f64>> for Expr {
    fn from(value: Vec<f64>) -> Self {
        crate::expr::constant_vec(value)
    }
}
