//! Solver interface for optistack.
//!
//! This module provides:
//! - The backend contract every solver adapter implements
//! - A registry of backends resolved by name at `solver()` time
//! - Options, statuses and statistics shared by all backends
//! - The transcribed problem handed to a backend ([`NlpProblem`])
//!
//! Backends:
//!
//! | name | classes | discrete |
//! |---|---|---|
//! | `sqpmethod` | nlp | no |
//! | `clarabel` | conic | no |
//! | `bnb` | nlp, conic | yes |
//!
//! All QP subproblems are solved by Clarabel.

pub mod bnb;
pub mod clarabel;
pub mod conic;
pub mod nlp;
pub mod sqp;

use std::fmt;
use std::str::FromStr;

use nalgebra::DVector;

use crate::error::{OptiError, Result};

pub use self::clarabel::{solve_qp, QpSettings, QpSolution, QuadraticProgram};
pub use nlp::{FunctionCache, NlpArgs, NlpFunction, NlpProblem};

/// Solution status reported by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SolveStatus {
    /// KKT conditions satisfied to tolerance.
    Optimal,
    /// Iteration budget exhausted.
    MaxIterations,
    /// Wall-clock budget exhausted.
    TimeLimit,
    /// Branch-and-bound node budget exhausted.
    NodeLimit,
    /// Problem (or a subproblem) is infeasible.
    Infeasible,
    /// Objective is unbounded below.
    Unbounded,
    /// Numerical difficulties.
    NumericalError,
}

impl SolveStatus {
    /// Statuses that stop on a budget rather than on a property of the problem.
    pub fn is_limit(self) -> bool {
        matches!(
            self,
            SolveStatus::MaxIterations | SolveStatus::TimeLimit | SolveStatus::NodeLimit
        )
    }
}

impl fmt::Display for SolveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SolveStatus::Optimal => "Optimal",
            SolveStatus::MaxIterations => "MaxIterations",
            SolveStatus::TimeLimit => "TimeLimit",
            SolveStatus::NodeLimit => "NodeLimit",
            SolveStatus::Infeasible => "Infeasible",
            SolveStatus::Unbounded => "Unbounded",
            SolveStatus::NumericalError => "NumericalError",
        };
        write!(f, "{}", text)
    }
}

/// Statistics of one backend run.
#[derive(Debug, Clone, PartialEq)]
pub struct SolverStats {
    /// Outer iterations (QP steps for SQP, interior-point iterations for conic).
    pub iter_count: usize,
    /// Final status.
    pub status: SolveStatus,
    /// Whether the status is `Optimal`.
    pub success: bool,
    /// Human-readable status text from the backend.
    pub return_status: String,
    /// Branch-and-bound nodes explored.
    pub nodes: usize,
    /// Wall time in seconds.
    pub solve_time: f64,
}

impl SolverStats {
    pub(crate) fn new(status: SolveStatus, iter_count: usize, return_status: impl Into<String>) -> Self {
        SolverStats {
            iter_count,
            status,
            success: status == SolveStatus::Optimal,
            return_status: return_status.into(),
            nodes: 0,
            solve_time: 0.0,
        }
    }
}

/// Backend options.
#[derive(Debug, Clone)]
pub struct SolverOptions {
    /// Log every iteration at info level.
    pub verbose: bool,
    /// Maximum outer iterations.
    pub max_iter: usize,
    /// KKT tolerance.
    pub tol: f64,
    /// Fold constraints on plain variable selections into variable bounds.
    pub detect_simple_bounds: bool,
    /// Maximum branch-and-bound nodes.
    pub max_nodes: usize,
    /// Integrality tolerance.
    pub integer_tol: f64,
    /// Clarabel gap and feasibility tolerance for QP subproblems.
    pub qp_tol: f64,
    /// Time limit in seconds.
    pub time_limit: f64,
    /// Derivative overrides, preferred over the built-in derivative path.
    pub cache: FunctionCache,
}

impl Default for SolverOptions {
    fn default() -> Self {
        SolverOptions {
            verbose: false,
            max_iter: 100,
            tol: 1e-8,
            detect_simple_bounds: false,
            max_nodes: 1000,
            integer_tol: 1e-6,
            qp_tol: 1e-10,
            time_limit: f64::INFINITY,
            cache: FunctionCache::default(),
        }
    }
}

impl SolverOptions {
    /// Set verbosity.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Set the iteration limit.
    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    /// Set the KKT tolerance.
    pub fn with_tol(mut self, tol: f64) -> Self {
        self.tol = tol;
        self
    }

    /// Enable or disable simple-bound detection.
    pub fn with_detect_simple_bounds(mut self, detect: bool) -> Self {
        self.detect_simple_bounds = detect;
        self
    }

    /// Set the branch-and-bound node limit.
    pub fn with_max_nodes(mut self, max_nodes: usize) -> Self {
        self.max_nodes = max_nodes;
        self
    }

    /// Set the integrality tolerance.
    pub fn with_integer_tol(mut self, tol: f64) -> Self {
        self.integer_tol = tol;
        self
    }

    /// Set the QP subproblem tolerance.
    pub fn with_qp_tol(mut self, tol: f64) -> Self {
        self.qp_tol = tol;
        self
    }

    /// Set the time limit in seconds.
    pub fn with_time_limit(mut self, seconds: f64) -> Self {
        self.time_limit = seconds;
        self
    }

    /// Register a derivative override.
    pub fn with_function(mut self, function: NlpFunction) -> Self {
        self.cache.insert(function);
        self
    }

    /// Reject option values no backend can work with.
    pub fn validate(&self) -> Result<()> {
        if self.max_iter == 0 {
            return Err(OptiError::Capability("max_iter must be positive".into()));
        }
        for (name, v) in [
            ("tol", self.tol),
            ("integer_tol", self.integer_tol),
            ("qp_tol", self.qp_tol),
        ] {
            if !(v > 0.0) || !v.is_finite() {
                return Err(OptiError::Capability(format!(
                    "{} must be positive and finite, got {}",
                    name, v
                )));
            }
        }
        if !(self.time_limit > 0.0) {
            return Err(OptiError::Capability(format!(
                "time_limit must be positive, got {}",
                self.time_limit
            )));
        }
        Ok(())
    }
}

/// Declared problem class of an Opti instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProblemClass {
    /// General nonlinear program.
    Nlp,
    /// Quadratic objective with affine constraints.
    Conic,
}

impl FromStr for ProblemClass {
    type Err = OptiError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "nlp" => Ok(ProblemClass::Nlp),
            "conic" => Ok(ProblemClass::Conic),
            other => Err(OptiError::Capability(format!(
                "unknown problem class '{}'; expected 'nlp' or 'conic'",
                other
            ))),
        }
    }
}

impl fmt::Display for ProblemClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProblemClass::Nlp => write!(f, "nlp"),
            ProblemClass::Conic => write!(f, "conic"),
        }
    }
}

/// Backend-space iterate handed to the iteration callback.
#[derive(Debug, Clone)]
pub struct Iterate {
    /// Iteration index.
    pub iter: usize,
    /// Scaled decision vector.
    pub x: DVector<f64>,
    /// Scaled constraint multipliers.
    pub lam_g: DVector<f64>,
    /// Scaled bound multipliers.
    pub lam_x: DVector<f64>,
    /// Scaled objective.
    pub f: f64,
}

/// Per-iteration callback.
pub type IterationCallback<'a> = dyn FnMut(&Iterate) + 'a;

/// Backend output, in backend space.
#[derive(Debug, Clone)]
pub struct BackendResult {
    pub x: DVector<f64>,
    pub lam_g: DVector<f64>,
    pub lam_x: DVector<f64>,
    pub f: f64,
    pub g: DVector<f64>,
    pub stats: SolverStats,
}

/// A solver adapter.
pub trait Backend: Send + Sync {
    /// Registry name.
    fn name(&self) -> &'static str;

    /// Problem classes this backend accepts.
    fn classes(&self) -> &'static [ProblemClass];

    /// Whether integer-domain variables are supported.
    fn supports_discrete(&self) -> bool;

    /// Drive one solve to completion.
    fn solve(
        &self,
        problem: &NlpProblem,
        options: &SolverOptions,
        callback: &mut IterationCallback<'_>,
    ) -> Result<BackendResult>;
}

static BACKENDS: [&dyn Backend; 3] = [&sqp::SqpMethod, &conic::ClarabelConic, &bnb::BranchAndBound];

/// All registered backends.
pub fn backends() -> &'static [&'static dyn Backend] {
    &BACKENDS
}

/// Resolve a backend by name for a problem class.
pub fn lookup(name: &str, class: ProblemClass) -> Result<&'static dyn Backend> {
    let allowed: Vec<&str> = BACKENDS
        .iter()
        .filter(|b| b.classes().contains(&class))
        .map(|b| b.name())
        .collect();
    match BACKENDS.iter().find(|b| b.name() == name) {
        Some(b) if b.classes().contains(&class) => Ok(*b),
        Some(_) => Err(OptiError::Capability(format!(
            "solver '{}' does not handle {} problems; allowed: {}",
            name,
            class,
            allowed.join(", ")
        ))),
        None => Err(OptiError::Capability(format!(
            "unknown solver '{}'; allowed for {} problems: {}",
            name,
            class,
            allowed.join(", ")
        ))),
    }
}
