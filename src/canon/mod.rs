//! Canonicalization of user relations.
//!
//! This module converts relations into `lower <= middle <= upper` records
//! (`CanonConstraint`) that the problem builder transcribes into general
//! rows or variable bounds.

pub mod canonicalizer;

pub use canonicalizer::{canonicalize, CanonConstraint, RelationKind};
