//! Read-only evaluation of expressions against an instance state.
//!
//! An [`Evaluator`] is a snapshot: parameter values at the time it was taken
//! and, after a solve (or inside an iteration callback), the values of the
//! decision variables and duals. Plain evaluation enforces the scope and
//! state rules; evaluation with substitutions only needs every symbol to be
//! resolvable.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use nalgebra::DMatrix;

use super::values::{equality_parts, resolve_assignment};
use crate::constraints::Constraint;
use crate::error::{OptiError, Result};
use crate::expr::{
    eval_f64, Bindings, Expr, InstanceId, Shape, SymbolData, SymbolId, SymbolKind,
};

/// Variable and dual values of a solved (or in-progress) problem.
#[derive(Debug, Clone)]
pub(crate) struct SolvedState {
    pub bindings: Bindings,
    /// Variables of the solved problem.
    pub in_problem: HashSet<SymbolId>,
    /// Duals of the constraints registered at solve time.
    pub duals: HashSet<SymbolId>,
}

/// Evaluates expressions over the symbols of one Opti instance.
#[derive(Debug, Clone)]
pub struct Evaluator {
    instance: InstanceId,
    parameters: Bindings,
    solved: Option<SolvedState>,
    nx: usize,
    np: usize,
    ng: usize,
}

impl Evaluator {
    pub(crate) fn new(
        instance: InstanceId,
        parameters: Bindings,
        solved: Option<SolvedState>,
        counts: (usize, usize, usize),
    ) -> Self {
        Evaluator {
            instance,
            parameters,
            solved,
            nx: counts.0,
            np: counts.1,
            ng: counts.2,
        }
    }

    /// Whether variable and dual values are available.
    pub fn is_solved(&self) -> bool {
        self.solved.is_some()
    }

    fn check_scope(&self, symbols: &[Arc<SymbolData>]) -> Result<()> {
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

    fn base(&self) -> Bindings {
        let mut bindings = self.parameters.clone();
        if let Some(solved) = &self.solved {
            bindings.extend(solved.bindings.clone());
        }
        bindings
    }

    /// Numerical value of `expr`.
    ///
    /// Checks, in order: scope, solved state, membership of variables in the
    /// problem, parameter values, dual registration.
    pub fn value(&self, expr: &Expr) -> Result<DMatrix<f64>> {
        let symbols = expr.symbols();
        self.check_scope(&symbols)?;

        let needs_solution = symbols
            .iter()
            .any(|s| matches!(s.kind, SymbolKind::Variable | SymbolKind::Dual));
        let solved = match (&self.solved, needs_solution) {
            (None, true) => return Err(OptiError::NotSolved),
            (solved, _) => solved,
        };

        if let Some(solved) = solved {
            let missing: Vec<String> = symbols
                .iter()
                .filter(|s| s.kind == SymbolKind::Variable && !solved.in_problem.contains(&s.id))
                .map(|s| s.describe())
                .collect();
            if !missing.is_empty() {
                return Err(OptiError::NotInProblem {
                    symbols: missing.join(", "),
                });
            }
        }
        if let Some(p) = symbols
            .iter()
            .find(|s| s.kind == SymbolKind::Parameter && !self.parameters.contains(s.id))
        {
            return Err(OptiError::UnsetParameter {
                symbol: p.describe(),
            });
        }
        if let Some(solved) = solved {
            if let Some(d) = symbols
                .iter()
                .find(|s| s.kind == SymbolKind::Dual && !solved.duals.contains(&s.id))
            {
                return Err(OptiError::DualNotRegistered {
                    symbol: d.describe(),
                });
            }
        }

        eval_f64(expr, &self.base())
    }

    /// Numerical value of a scalar expression.
    pub fn value_scalar(&self, expr: &Expr) -> Result<f64> {
        scalar(self.value(expr)?)
    }

    /// Value of `expr` after substituting `symbol == value` equalities.
    ///
    /// Symbols neither substituted nor known to this evaluator fail with
    /// [`OptiError::Unresolved`].
    pub fn value_with(&self, expr: &Expr, substitutions: &[Constraint]) -> Result<DMatrix<f64>> {
        self.check_scope(&expr.symbols())?;
        let mut bindings = self.base();

        let mut touched: HashMap<SymbolId, Vec<Option<f64>>> = HashMap::new();
        for sub in substitutions {
            let (target, values) = equality_parts(sub)?;
            let symbols = target.symbols();
            self.check_scope(&symbols)?;
            for e in resolve_assignment(target, &values)? {
                let Some(symbol) = symbols.iter().find(|s| s.id == e.symbol) else {
                    continue;
                };
                let slot = touched
                    .entry(e.symbol)
                    .or_insert_with(|| vec![None; symbol.size()]);
                slot[e.element] = Some(e.value);
            }
        }

        for (id, elements) in touched {
            let values: Option<Vec<f64>> = match bindings.get(id) {
                Some(known) => Some(
                    known
                        .iter()
                        .zip(&elements)
                        .map(|(&k, v)| v.unwrap_or(k))
                        .collect(),
                ),
                None => elements.into_iter().collect(),
            };
            // Partially covered unknown symbols stay unresolved.
            if let Some(values) = values {
                bindings.insert(id, values);
            }
        }
        eval_f64(expr, &bindings)
    }

    /// Scalar counterpart of [`Evaluator::value_with`].
    pub fn value_scalar_with(&self, expr: &Expr, substitutions: &[Constraint]) -> Result<f64> {
        scalar(self.value_with(expr, substitutions)?)
    }
}

pub(crate) fn scalar(m: DMatrix<f64>) -> Result<f64> {
    if m.shape() != (1, 1) {
        return Err(OptiError::ShapeMismatch {
            expected: Shape::scalar().to_string(),
            got: Shape::matrix(m.nrows(), m.ncols()).to_string(),
        });
    }
    Ok(m[(0, 0)])
}

impl fmt::Display for Evaluator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Evaluator(instance {}, {} variables, {} parameters, {} constraints, {})",
            self.instance.raw(),
            self.nx,
            self.np,
            self.ng,
            if self.is_solved() { "solved" } else { "not solved" }
        )
    }
}
