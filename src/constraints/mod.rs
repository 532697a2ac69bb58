//! Relational constraints written by the user.

pub mod constraint;

pub use constraint::{Constraint, ConstraintExt};
