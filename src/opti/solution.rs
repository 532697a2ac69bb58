//! Solution snapshot of one solve.

use std::fmt;

use nalgebra::DMatrix;

use super::evaluator::Evaluator;
use crate::constraints::Constraint;
use crate::error::Result;
use crate::expr::Expr;
use crate::solver::SolverStats;

/// Immutable result of a solve.
///
/// Stays valid after the instance is modified or solved again; evaluation
/// always refers to the problem as it was when this solution was produced.
#[derive(Debug, Clone)]
pub struct OptiSolution {
    evaluator: Evaluator,
    stats: SolverStats,
    solver: String,
    variables: Vec<Constraint>,
    parameters: Vec<Constraint>,
}

impl OptiSolution {
    pub(crate) fn new(
        evaluator: Evaluator,
        stats: SolverStats,
        solver: impl Into<String>,
        variables: Vec<Constraint>,
        parameters: Vec<Constraint>,
    ) -> Self {
        OptiSolution {
            evaluator,
            stats,
            solver: solver.into(),
            variables,
            parameters,
        }
    }

    /// Value of an expression at the solution.
    pub fn value(&self, expr: &Expr) -> Result<DMatrix<f64>> {
        self.evaluator.value(expr)
    }

    /// Value of a scalar expression at the solution.
    pub fn value_scalar(&self, expr: &Expr) -> Result<f64> {
        self.evaluator.value_scalar(expr)
    }

    /// Value of an expression with some symbols substituted.
    pub fn value_with(&self, expr: &Expr, substitutions: &[Constraint]) -> Result<DMatrix<f64>> {
        self.evaluator.value_with(expr, substitutions)
    }

    /// `variable == value` for every variable of the solved problem.
    ///
    /// Feed to `set_initials` to warm start a later solve.
    pub fn value_variables(&self) -> &[Constraint] {
        &self.variables
    }

    /// `parameter == value` for every parameter with a value.
    pub fn value_parameters(&self) -> &[Constraint] {
        &self.parameters
    }

    pub fn stats(&self) -> &SolverStats {
        &self.stats
    }

    pub fn evaluator(&self) -> &Evaluator {
        &self.evaluator
    }
}

impl fmt::Display for OptiSolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "OptiSolution ({})", self.solver)?;
        writeln!(f, "  status: {} ({})", self.stats.status, self.stats.return_status)?;
        writeln!(f, "  iterations: {}", self.stats.iter_count)?;
        write!(
            f,
            "  {} variables, {} parameters",
            self.variables.len(),
            self.parameters.len()
        )
    }
}
