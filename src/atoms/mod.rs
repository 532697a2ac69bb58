//! Atom functions for building expressions.
//!
//! - **Affine atoms**: operators, sums, products, concatenation, reshaping
//! - **Nonlinear atoms**: elementwise functions and powers
//! - **Derivative atoms**: Jacobian, gradient and Hessian nodes

pub mod affine;
pub mod nonlinear;

// Re-export affine operations
pub use affine::{
    dot, horzcat, matmul, reshape, sum, sumsqr, trace, transpose, vec, veccat, vertcat,
};

// Re-export nonlinear atoms
pub use nonlinear::{
    abs, cos, exp, gradient, hessian, jacobian, log, norm_2, pow, sin, sq, sqrt, tan, tanh,
};
