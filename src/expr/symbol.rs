//! Symbols: the leaves of every expression.
//!
//! A symbol carries a globally unique id, the id of the Opti instance that
//! declared it (if any), its kind and its declaration site. Ownership is
//! checked before any model operation touches an expression.

use std::fmt;
use std::panic::Location;
use std::sync::atomic::{AtomicU64, Ordering};

use super::shape::Shape;

/// Unique identifier for symbols. Ids are strictly increasing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymbolId(u64);

impl SymbolId {
    /// Generate a new unique ID.
    pub fn new() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(0);
        SymbolId(NEXT_ID.fetch_add(1, Ordering::SeqCst))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for SymbolId {
    fn default() -> Self {
        Self::new()
    }
}

/// Identifier of an Opti instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(u64);

impl InstanceId {
    /// Generate a new unique ID.
    pub fn new() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(0);
        InstanceId(NEXT_ID.fetch_add(1, Ordering::SeqCst))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for InstanceId {
    fn default() -> Self {
        Self::new()
    }
}

/// What a symbol stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolKind {
    /// Decision variable.
    Variable,
    /// Parameter with a user-assigned value.
    Parameter,
    /// Lagrange multiplier of a registered constraint.
    Dual,
    /// Symbol created outside of any Opti instance.
    Free,
}

impl SymbolKind {
    /// Human-readable name used in messages.
    pub fn describe(self) -> &'static str {
        match self {
            SymbolKind::Variable => "decision variable",
            SymbolKind::Parameter => "parameter",
            SymbolKind::Dual => "dual variable",
            SymbolKind::Free => "symbol",
        }
    }
}

/// Data for a symbol expression.
#[derive(Debug, Clone)]
pub struct SymbolData {
    /// Unique identifier.
    pub id: SymbolId,
    /// Kind of symbol.
    pub kind: SymbolKind,
    /// Declaring instance, `None` for free symbols.
    pub owner: Option<InstanceId>,
    /// Shape of the symbol.
    pub shape: Shape,
    /// Name for display.
    pub name: String,
    /// Source location of the declaring call.
    pub declared_at: &'static Location<'static>,
}

impl SymbolData {
    /// Create a new symbol declared at `location`.
    pub fn new(
        kind: SymbolKind,
        owner: Option<InstanceId>,
        shape: Shape,
        name: impl Into<String>,
        location: &'static Location<'static>,
    ) -> Self {
        SymbolData {
            id: SymbolId::new(),
            kind,
            owner,
            shape,
            name: name.into(),
            declared_at: location,
        }
    }

    /// Number of scalar elements.
    pub fn size(&self) -> usize {
        self.shape.size()
    }

    /// Full description used in error messages.
    pub fn describe(&self) -> String {
        match self.owner {
            Some(_) => format!(
                "{} '{}' of shape {}, declared at {}",
                self.kind.describe(),
                self.name,
                self.shape,
                self.declared_at
            ),
            None => format!("symbol '{}' of shape {}", self.name, self.shape),
        }
    }
}

impl PartialEq for SymbolData {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for SymbolData {}

impl fmt::Display for SymbolData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_ids_increase() {
        let a = SymbolId::new();
        let b = SymbolId::new();
        assert!(b > a);
    }

    #[test]
    fn test_describe_mentions_site() {
        let sym = SymbolData::new(
            SymbolKind::Parameter,
            Some(InstanceId::new()),
            Shape::vector(2),
            "p",
            Location::caller(),
        );
        let text = sym.describe();
        assert!(text.starts_with("parameter 'p' of shape 2x1"));
        assert!(text.contains("symbol.rs"));
    }

    #[test]
    fn test_free_symbol_description() {
        let sym = SymbolData::new(
            SymbolKind::Free,
            None,
            Shape::scalar(),
            "w",
            Location::caller(),
        );
        assert_eq!(sym.describe(), "symbol 'w' of shape 1x1");
    }
}
