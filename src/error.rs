//! Error types for optistack.

use thiserror::Error;

use crate::solver::SolveStatus;

/// Coarse classification of an [`OptiError`].
///
/// Callers that need to react to a failure should match on the kind rather
/// than on the message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Symbol, dual or constraint from a different instance (or none).
    Scope,
    /// Shapes, missing decision variables, ambiguous assignments, bad arguments.
    Structural,
    /// Operation not allowed in the current instance state.
    State,
    /// Value on a variable, initial guess on a parameter, non-affine assignment.
    DomainMisuse,
    /// Backend unknown or unable to handle the problem class or domain.
    Capability,
    /// Backend finished without an acceptable status.
    SolverOutcome,
}

/// Error type for optistack operations.
#[derive(Debug, Error)]
pub enum OptiError {
    /// Symbol owned by another Opti instance.
    #[error("This expression has symbols belonging to a different instance of Opti: {symbol}")]
    ForeignInstance { symbol: String },

    /// Symbol created outside of any Opti instance.
    #[error("This expression has {symbol}, declared outside of Opti.")]
    DeclaredOutside { symbol: String },

    /// Shape mismatch.
    #[error("Constraint shape mismatch: expected {expected}, got {got}")]
    ShapeMismatch { expected: String, got: String },

    /// A relation without any decision variable.
    #[error("Constraint must contain decision variables.")]
    NoDecisionVariable,

    /// Dual symbol used inside a constraint or objective.
    #[error("Dual variables forbidden in this context: {symbol}")]
    DualForbidden { symbol: String },

    /// The same element receives two different values.
    #[error("Assignment is ambiguous: {0}")]
    Ambiguous(String),

    /// Value count or constant part does not match the assigned expression.
    #[error("Assignment is inconsistent: {0}")]
    Inconsistent(String),

    /// `to_function` input that is not a selection of symbol elements.
    #[error("Argument {index}: cannot use an arbitrary expression as an independent argument.")]
    ArbitraryArgument { index: usize },

    /// `to_function` inputs covering the same element twice.
    #[error("Arguments are not independent: {symbol} is covered by more than one argument.")]
    NotIndependent { symbol: String },

    /// Malformed model input not covered by a more specific variant.
    #[error("Invalid problem: {0}")]
    InvalidProblem(String),

    /// Evaluation of solution-dependent quantities before a solve.
    #[error("This action is forbidden since you have not solved the Opti stack yet (with calling 'solve').")]
    NotSolved,

    /// Variables that are declared but unused by the objective and constraints.
    #[error("This expression has symbols that do not appear in the constraints and objective: {symbols}")]
    NotInProblem { symbols: String },

    /// Parameter without a finite value.
    #[error("This expression depends on a parameter with unset value (forgot 'set_value', or set it to NaN/Inf): {symbol}")]
    UnsetParameter { symbol: String },

    /// Dual of a constraint that is not part of the current constraint list.
    #[error("This expression has a dual for a constraint that is not given to Opti: {symbol}")]
    DualNotRegistered { symbol: String },

    /// `dual()` of a constraint that is not currently registered.
    #[error("Unknown constraint: it is not part of the current constraint list.")]
    UnknownConstraint,

    /// `solve` before any backend was selected.
    #[error("You must call 'solver' on the Opti stack to select a solver.")]
    NoSolver,

    /// Symbol without a substitution or other value during evaluation.
    #[error("Unresolved symbol in evaluation: {symbol}")]
    Unresolved { symbol: String },

    /// `set_value` touching a decision variable.
    #[error("You cannot set a value for a variable: {symbol}. Use 'set_initial' instead.")]
    ValueForVariable { symbol: String },

    /// `set_initial` touching a parameter.
    #[error("You cannot set an initial value for a parameter: {symbol}. Use 'set_value' instead.")]
    InitialForParameter { symbol: String },

    /// Assignment target that is not an invertible affine map of symbol elements.
    #[error("You cannot set initial/value of an arbitrary expression. Use symbols or affine expressions of a single symbol element.")]
    ArbitraryExpression,

    /// Backend or problem class limitation.
    #[error("Capability error: {0}")]
    Capability(String),

    /// Backend returned a status the solve entry point does not accept.
    #[error("Solver '{solver}' returned status {status}")]
    SolverFailed { solver: String, status: SolveStatus },

    /// Numerical error.
    #[error("Numerical error: {0}")]
    NumericalError(String),
}

impl OptiError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            OptiError::ForeignInstance { .. } | OptiError::DeclaredOutside { .. } => ErrorKind::Scope,
            OptiError::ShapeMismatch { .. }
            | OptiError::NoDecisionVariable
            | OptiError::DualForbidden { .. }
            | OptiError::Ambiguous(_)
            | OptiError::Inconsistent(_)
            | OptiError::ArbitraryArgument { .. }
            | OptiError::NotIndependent { .. }
            | OptiError::InvalidProblem(_) => ErrorKind::Structural,
            OptiError::NotSolved
            | OptiError::NotInProblem { .. }
            | OptiError::UnsetParameter { .. }
            | OptiError::DualNotRegistered { .. }
            | OptiError::UnknownConstraint
            | OptiError::NoSolver
            | OptiError::Unresolved { .. } => ErrorKind::State,
            OptiError::ValueForVariable { .. }
            | OptiError::InitialForParameter { .. }
            | OptiError::ArbitraryExpression => ErrorKind::DomainMisuse,
            OptiError::Capability(_) => ErrorKind::Capability,
            OptiError::SolverFailed { .. } | OptiError::NumericalError(_) => {
                ErrorKind::SolverOutcome
            }
        }
    }

    /// The backend status, when this error reports a solver outcome.
    pub fn status(&self) -> Option<SolveStatus> {
        match self {
            OptiError::SolverFailed { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Result type for optistack operations.
pub type Result<T> = std::result::Result<T, OptiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        assert_eq!(OptiError::NotSolved.kind(), ErrorKind::State);
        assert_eq!(OptiError::NoDecisionVariable.kind(), ErrorKind::Structural);
        assert_eq!(
            OptiError::ForeignInstance { symbol: "x".into() }.kind(),
            ErrorKind::Scope
        );
        assert_eq!(OptiError::ArbitraryExpression.kind(), ErrorKind::DomainMisuse);
        assert_eq!(OptiError::Capability("foo".into()).kind(), ErrorKind::Capability);
    }

    #[test]
    fn test_solver_failed_carries_status() {
        let err = OptiError::SolverFailed {
            solver: "sqpmethod".into(),
            status: SolveStatus::Infeasible,
        };
        assert_eq!(err.kind(), ErrorKind::SolverOutcome);
        assert_eq!(err.status(), Some(SolveStatus::Infeasible));
        assert!(err.to_string().contains("Infeasible"));
    }
}
