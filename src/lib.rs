//! # optistack
//!
//! Declarative optimization modeling, transcribed into solver-ready programs.
//!
//! An [`Opti`] instance collects decision variables, parameters, an objective
//! and relational constraints written as ordinary expressions, and turns them
//! into a nonlinear (or conic) program for one of the registered backends.
//! Duals, linear scaling, simple bounds and symbol provenance are tracked on
//! the way in and undone on the way out.
//!
//! ## Quick Start
//!
//! ```ignore
//! use optistack::prelude::*;
//!
//! let mut opti = Opti::new();
//! let x = opti.variable(());
//! let y = opti.variable(());
//! let p = opti.parameter(());
//!
//! opti.minimize(sq(&(&x - 1.0)) + sq(&(&y - 2.0)))?;
//! let c = y.geq(&p);
//! opti.subject_to(c.clone())?;
//! opti.set_value(&p, 2.5)?;
//!
//! opti.solver("sqpmethod", SolverOptions::default())?;
//! let sol = opti.solve()?;
//! println!("y = {}, dual = {}", sol.value_scalar(&y)?, sol.value_scalar(&opti.dual(&c)?)?);
//! ```
//!
//! ## Backends
//!
//! | name | problem class | integer variables |
//! |---|---|---|
//! | `sqpmethod` | nlp | no |
//! | `clarabel` | conic | no |
//! | `bnb` | nlp, conic | yes |
//!
//! Every backend reaches the Clarabel interior-point solver for its QP
//! (sub)problems.
//!
//! ## Architecture
//!
//! - **Expression trees** built with the `Expr` enum and `Arc` sharing
//! - **Canonicalization** of relations into `lower <= middle <= upper`
//! - **Transcription** with per-element variable scaling, row and objective
//!   scaling, and optional folding of simple bounds
//! - **Evaluation** of arbitrary expressions before, during and after a solve

pub mod atoms;
pub mod canon;
pub mod constraints;
pub mod error;
pub mod expr;
pub mod opti;
pub mod solver;
pub mod sparse;

/// Prelude module for convenient imports.
///
/// ```ignore
/// use optistack::prelude::*;
/// ```
pub mod prelude {
    // Expression types
    pub use crate::expr::{
        constant, constant_dmatrix, constant_matrix, constant_vec, eye, full, ones, zeros, Expr,
        IntoConstant, Shape,
    };

    // Atoms
    pub use crate::atoms::{
        abs, cos, dot, exp, gradient, hessian, horzcat, jacobian, log, matmul, norm_2, pow,
        reshape, sin, sq, sqrt, sum, sumsqr, tan, tanh, trace, transpose, vec, veccat, vertcat,
    };

    // Constraints
    pub use crate::constraints::{Constraint, ConstraintExt};

    // Modeling
    pub use crate::opti::{Domain, Evaluator, IntoValue, Opti, OptiFunction, OptiSolution};

    // Solver
    pub use crate::solver::{NlpArgs, NlpFunction, SolveStatus, SolverOptions, SolverStats};

    // Errors
    pub use crate::error::{ErrorKind, OptiError, Result};
}

// Re-export main types at crate root
pub use error::{ErrorKind, OptiError, Result};
pub use opti::{Opti, OptiSolution};
pub use solver::{SolveStatus, SolverOptions};
