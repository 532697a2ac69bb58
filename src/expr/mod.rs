//! Expression types and creation utilities.
//!
//! This module provides the expression layer the modeling engine works on:
//! - `Expr` - the expression tree
//! - `Shape` - 2-D shape information
//! - Symbols with instance ownership and declaration sites
//! - Constant creation via `constant()` and related functions
//! - Numerical evaluation with forward-mode derivatives
//! - Degree analysis and per-element affine decomposition

pub mod affine;
pub mod constant;
pub mod degree;
pub mod eval;
pub mod expression;
pub mod scalar;
pub mod shape;
pub mod symbol;

// Re-export main types
pub use affine::{affine_map, AffineEntry, Term};
pub use constant::{
    constant, constant_dmatrix, constant_matrix, constant_vec, eye, full, ones, zeros,
    IntoConstant,
};
pub use degree::Degree;
pub use eval::{eval_f64, evaluate, hessian_at, jacobian_at, Bindings, Block, Seed};
pub use expression::{Expr, IndexSpec, UnaryOp};
pub use scalar::{Dual, HyperDual, Scalar};
pub use shape::Shape;
pub use symbol::{InstanceId, SymbolData, SymbolId, SymbolKind};
