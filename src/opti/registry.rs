//! Symbol registry of one Opti instance.
//!
//! Holds every variable, parameter and dual symbol declared on the instance
//! in declaration order, together with the per-element bookkeeping the
//! builder needs: domains, linear scale pairs, initial guesses and parameter
//! values.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::panic::Location;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::{OptiError, Result};
use crate::expr::{InstanceId, Shape, SymbolData, SymbolId, SymbolKind};

/// Domain of a decision variable element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Domain {
    #[default]
    Real,
    Integer,
}

impl FromStr for Domain {
    type Err = OptiError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "real" => Ok(Domain::Real),
            "integer" => Ok(Domain::Integer),
            other => Err(OptiError::InvalidProblem(format!(
                "unknown domain '{other}', expected 'real' or 'integer'"
            ))),
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Domain::Real => write!(f, "real"),
            Domain::Integer => write!(f, "integer"),
        }
    }
}

/// Registered symbol plus its per-element state.
#[derive(Debug, Clone)]
pub(crate) struct Entry {
    pub symbol: Arc<SymbolData>,
    pub domain: Vec<Domain>,
    pub scale: Vec<f64>,
    pub offset: Vec<f64>,
    /// Initial guess (variables and duals).
    pub initial: Vec<f64>,
    /// Assigned value (parameters); NaN until set.
    pub value: Vec<f64>,
}

impl Entry {
    fn new(symbol: Arc<SymbolData>) -> Self {
        let n = symbol.size();
        Entry {
            symbol,
            domain: vec![Domain::Real; n],
            scale: vec![1.0; n],
            offset: vec![0.0; n],
            initial: vec![0.0; n],
            value: vec![f64::NAN; n],
        }
    }

    /// Parameter value, if every element is finite.
    pub fn finite_value(&self) -> Option<&[f64]> {
        self.value
            .iter()
            .all(|v| v.is_finite())
            .then_some(self.value.as_slice())
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Registry {
    instance: InstanceId,
    entries: Vec<Entry>,
    index: HashMap<SymbolId, usize>,
    variables: usize,
    parameters: usize,
    duals: usize,
}

impl Registry {
    pub fn new(instance: InstanceId) -> Self {
        Registry {
            instance,
            entries: Vec::new(),
            index: HashMap::new(),
            variables: 0,
            parameters: 0,
            duals: 0,
        }
    }

    /// Declare a new symbol named `opti<inst>_<x|p|lam_g>_<k>`.
    pub fn declare(
        &mut self,
        kind: SymbolKind,
        shape: Shape,
        location: &'static Location<'static>,
    ) -> Arc<SymbolData> {
        let (prefix, counter) = match kind {
            SymbolKind::Variable => ("x", &mut self.variables),
            SymbolKind::Parameter => ("p", &mut self.parameters),
            SymbolKind::Dual | SymbolKind::Free => ("lam_g", &mut self.duals),
        };
        *counter += 1;
        let name = format!("opti{}_{}_{}", self.instance.raw(), prefix, *counter);
        let symbol = Arc::new(SymbolData::new(
            kind,
            Some(self.instance),
            shape,
            name,
            location,
        ));
        self.index.insert(symbol.id, self.entries.len());
        self.entries.push(Entry::new(symbol.clone()));
        symbol
    }

    pub fn get(&self, id: SymbolId) -> Option<&Entry> {
        self.index.get(&id).map(|&i| &self.entries[i])
    }

    pub fn get_mut(&mut self, id: SymbolId) -> Option<&mut Entry> {
        self.index.get(&id).map(|&i| &mut self.entries[i])
    }

    /// Entries in declaration order.
    pub fn entries(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter()
    }

    /// Entries of one kind, in declaration order.
    pub fn of_kind(&self, kind: SymbolKind) -> impl Iterator<Item = &Entry> {
        self.entries.iter().filter(move |e| e.symbol.kind == kind)
    }

    /// Drop dual symbols whose constraint is no longer registered.
    pub fn retain_duals(&mut self, live: &HashSet<SymbolId>) {
        self.entries
            .retain(|e| e.symbol.kind != SymbolKind::Dual || live.contains(&e.symbol.id));
        self.index = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.symbol.id, i))
            .collect();
    }

    /// Forget initial guesses of variables and duals.
    pub fn reset_initials(&mut self) {
        for e in &mut self.entries {
            e.initial.iter_mut().for_each(|v| *v = 0.0);
        }
    }

    /// Scope check: every symbol must be declared on this instance.
    pub fn check_scope(&self, symbols: &[Arc<SymbolData>]) -> Result<()> {
        for s in symbols {
            match s.owner {
                None => {
                    return Err(OptiError::DeclaredOutside {
                        symbol: s.describe(),
                    })
                }
                Some(owner) if owner != self.instance => {
                    return Err(OptiError::ForeignInstance {
                        symbol: s.describe(),
                    })
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declare_names_and_order() {
        let inst = InstanceId::new();
        let mut reg = Registry::new(inst);
        let x = reg.declare(SymbolKind::Variable, Shape::vector(2), Location::caller());
        let p = reg.declare(SymbolKind::Parameter, Shape::scalar(), Location::caller());
        let y = reg.declare(SymbolKind::Variable, Shape::scalar(), Location::caller());
        assert_eq!(x.name, format!("opti{}_x_1", inst.raw()));
        assert_eq!(p.name, format!("opti{}_p_1", inst.raw()));
        assert_eq!(y.name, format!("opti{}_x_2", inst.raw()));
        let vars: Vec<_> = reg.of_kind(SymbolKind::Variable).map(|e| e.symbol.id).collect();
        assert_eq!(vars, vec![x.id, y.id]);
        assert!(reg.get(p.id).unwrap().finite_value().is_none());
        assert_eq!(reg.get(x.id).unwrap().scale, vec![1.0, 1.0]);
    }

    #[test]
    fn test_check_scope() {
        let mut reg = Registry::new(InstanceId::new());
        let x = reg.declare(SymbolKind::Variable, Shape::scalar(), Location::caller());
        let mut other = Registry::new(InstanceId::new());
        let y = other.declare(SymbolKind::Variable, Shape::scalar(), Location::caller());
        assert!(reg.check_scope(&[x]).is_ok());
        assert!(matches!(
            reg.check_scope(&[y]),
            Err(OptiError::ForeignInstance { .. })
        ));
        let free = crate::expr::Expr::symbol("z", ());
        assert!(matches!(
            reg.check_scope(&free.symbols()),
            Err(OptiError::DeclaredOutside { .. })
        ));
    }

    #[test]
    fn test_retain_duals() {
        let mut reg = Registry::new(InstanceId::new());
        let x = reg.declare(SymbolKind::Variable, Shape::scalar(), Location::caller());
        let d1 = reg.declare(SymbolKind::Dual, Shape::scalar(), Location::caller());
        let d2 = reg.declare(SymbolKind::Dual, Shape::vector(2), Location::caller());
        reg.retain_duals(&HashSet::from([d2.id]));
        assert_eq!(reg.entries().count(), 2);
        assert!(reg.get(x.id).is_some());
        assert!(reg.get(d1.id).is_none());
        assert_eq!(reg.get(d2.id).unwrap().initial.len(), 2);
    }

    #[test]
    fn test_reset_initials() {
        let mut reg = Registry::new(InstanceId::new());
        let x = reg.declare(SymbolKind::Variable, Shape::vector(2), Location::caller());
        let p = reg.declare(SymbolKind::Parameter, Shape::scalar(), Location::caller());
        reg.get_mut(x.id).unwrap().initial = vec![3.0, 4.0];
        reg.get_mut(p.id).unwrap().value = vec![1.0];
        reg.reset_initials();
        assert_eq!(reg.get(x.id).unwrap().initial, vec![0.0, 0.0]);
        assert_eq!(reg.get(p.id).unwrap().finite_value(), Some(&[1.0][..]));
    }

    #[test]
    fn test_domain_parse() {
        assert_eq!("integer".parse::<Domain>().unwrap(), Domain::Integer);
        assert_eq!(Domain::Real.to_string(), "real");
        assert!("complex".parse::<Domain>().is_err());
    }
}
