//! The Opti modeling instance.
//!
//! An [`Opti`] owns the symbols it declares, an objective, an ordered list of
//! constraints with their dual symbols and the chosen backend. Solving
//! transcribes the current state (see [`builder`]), runs the backend and
//! returns an [`OptiSolution`] snapshot.
//!
//! # Example
//!
//! ```ignore
//! use optistack::prelude::*;
//!
//! let mut opti = Opti::new();
//! let x = opti.variable(());
//! let y = opti.variable(());
//! opti.minimize(sq(&(&x - 1.0)) + sq(&(&y - 2.0)))?;
//! opti.subject_to(x.leq(&y))?;
//! opti.solver("sqpmethod", SolverOptions::default())?;
//! let sol = opti.solve()?;
//! println!("x = {}", sol.value_scalar(&x)?);
//! ```

pub(crate) mod builder;
mod evaluator;
mod function;
mod registry;
mod solution;
mod values;

pub use evaluator::Evaluator;
pub use function::OptiFunction;
pub use registry::Domain;
pub use solution::OptiSolution;
pub use values::IntoValue;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::panic::Location;
use std::sync::Arc;

use nalgebra::{DMatrix, DVector};
use tracing::{debug, info, warn};

use crate::atoms::{veccat, vertcat};
use crate::canon::{canonicalize, CanonConstraint};
use crate::constraints::{Constraint, ConstraintExt};
use crate::error::{OptiError, Result};
use crate::expr::{
    constant, constant_matrix, Bindings, Expr, InstanceId, Shape, SymbolData, SymbolId,
    SymbolKind,
};
use crate::solver::{
    lookup, Backend, FunctionCache, Iterate, NlpFunction, ProblemClass, SolveStatus,
    SolverOptions,
};

use builder::{Layout, Model, Transcription};
use evaluator::SolvedState;
use values::{equality_parts, resolve_assignment, ElementValue};

/// A registered constraint and its dual symbol.
#[derive(Debug, Clone)]
pub(crate) struct Record {
    pub canon: CanonConstraint,
    pub dual: Arc<SymbolData>,
    pub location: &'static Location<'static>,
}

#[derive(Clone)]
struct SolverChoice {
    backend: &'static dyn Backend,
    options: SolverOptions,
}

type UserCallback = Box<dyn FnMut(usize, &Evaluator)>;

/// What an assignment writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Value,
    Initial,
}

/// An optimization modeling instance.
pub struct Opti {
    instance: InstanceId,
    class: ProblemClass,
    registry: registry::Registry,
    objective: Option<Expr>,
    f_scale: f64,
    records: Vec<Record>,
    solver: Option<SolverChoice>,
    callback: Option<UserCallback>,
    solved: Option<SolvedState>,
}

impl Default for Opti {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for Opti {
    /// Copies everything but the callback, the last solution and the
    /// initial guesses. Parameter values carry over.
    fn clone(&self) -> Self {
        let mut copy = self.duplicate();
        copy.registry.reset_initials();
        copy
    }
}

impl Opti {
    /// A new instance for general nonlinear programs.
    pub fn new() -> Self {
        Self::with_problem_class(ProblemClass::Nlp)
    }

    /// A new instance for conic (quadratic objective, affine constraint)
    /// programs.
    pub fn conic() -> Self {
        Self::with_problem_class(ProblemClass::Conic)
    }

    /// A new instance for the class named `"nlp"` or `"conic"`.
    pub fn with_class(class: &str) -> Result<Self> {
        Ok(Self::with_problem_class(class.parse()?))
    }

    fn with_problem_class(class: ProblemClass) -> Self {
        let instance = InstanceId::new();
        Opti {
            instance,
            class,
            registry: registry::Registry::new(instance),
            objective: None,
            f_scale: 1.0,
            records: Vec::new(),
            solver: None,
            callback: None,
            solved: None,
        }
    }

    /// Independent copy; see [`Clone`].
    pub fn copy(&self) -> Self {
        self.clone()
    }

    /// Copy that keeps initial guesses; used by exported functions.
    pub(crate) fn duplicate(&self) -> Self {
        Opti {
            instance: self.instance,
            class: self.class,
            registry: self.registry.clone(),
            objective: self.objective.clone(),
            f_scale: self.f_scale,
            records: self.records.clone(),
            solver: self.solver.clone(),
            callback: None,
            solved: None,
        }
    }

    pub fn problem_class(&self) -> ProblemClass {
        self.class
    }

    fn invalidate(&mut self) {
        self.solved = None;
    }

    // ========== Declarations ==========

    /// Declare a decision variable.
    #[track_caller]
    pub fn variable(&mut self, shape: impl Into<Shape>) -> Expr {
        let symbol = self
            .registry
            .declare(SymbolKind::Variable, shape.into(), Location::caller());
        self.invalidate();
        Expr::Symbol(symbol)
    }

    /// Declare a symmetric `n x n` decision variable.
    ///
    /// Only the `n(n+1)/2` upper-triangle elements are free; the returned
    /// expression selects them into a full symmetric matrix.
    #[track_caller]
    pub fn variable_symmetric(&mut self, n: usize) -> Expr {
        let free = n * (n + 1) / 2;
        let symbol = self
            .registry
            .declare(SymbolKind::Variable, Shape::vector(free), Location::caller());
        self.invalidate();
        let shape = Shape::matrix(n, n);
        let elements = (0..n * n)
            .map(|flat| {
                let (r, c) = shape.position(flat);
                let (i, j) = (r.min(c), r.max(c));
                j * (j + 1) / 2 + i
            })
            .collect();
        Expr::Symbol(symbol).index(elements, shape)
    }

    /// Declare a parameter. Its value is unset (NaN) until `set_value`.
    #[track_caller]
    pub fn parameter(&mut self, shape: impl Into<Shape>) -> Expr {
        let symbol = self
            .registry
            .declare(SymbolKind::Parameter, shape.into(), Location::caller());
        Expr::Symbol(symbol)
    }

    // ========== Objective and constraints ==========

    /// Set the objective, replacing any previous one.
    pub fn minimize(&mut self, objective: impl Into<Expr>) -> Result<()> {
        self.minimize_scaled(objective, 1.0)
    }

    /// Set the objective; the backend sees `objective / f_scale`.
    pub fn minimize_scaled(&mut self, objective: impl Into<Expr>, f_scale: f64) -> Result<()> {
        let objective = objective.into();
        let symbols = objective.symbols();
        self.registry.check_scope(&symbols)?;
        if let Some(dual) = symbols.iter().find(|s| s.kind == SymbolKind::Dual) {
            return Err(OptiError::DualForbidden {
                symbol: dual.describe(),
            });
        }
        let shape = objective.try_shape()?;
        if !shape.is_scalar() {
            return Err(OptiError::ShapeMismatch {
                expected: Shape::scalar().to_string(),
                got: shape.to_string(),
            });
        }
        if !(f_scale.is_finite() && f_scale > 0.0) {
            return Err(OptiError::InvalidProblem(format!(
                "objective scale must be finite and positive, got {f_scale}"
            )));
        }
        self.objective = Some(objective);
        self.f_scale = f_scale;
        self.invalidate();
        Ok(())
    }

    fn canonical(&self, constraint: &Constraint, scale: f64) -> Result<CanonConstraint> {
        self.registry.check_scope(&constraint.symbols())?;
        canonicalize(constraint, scale)
    }

    fn register(&mut self, canon: CanonConstraint, location: &'static Location<'static>) {
        let dual = self
            .registry
            .declare(SymbolKind::Dual, canon.shape, location);
        debug!(constraint = %canon.source, rows = canon.rows(), "constraint registered");
        self.records.push(Record {
            canon,
            dual,
            location,
        });
    }

    /// Add a constraint.
    #[track_caller]
    pub fn subject_to(&mut self, constraint: Constraint) -> Result<()> {
        self.subject_to_scaled(constraint, 1.0)
    }

    /// Add a constraint whose rows the backend sees divided by `scale`.
    #[track_caller]
    pub fn subject_to_scaled(&mut self, constraint: Constraint, scale: f64) -> Result<()> {
        let location = Location::caller();
        let canon = self.canonical(&constraint, scale)?;
        self.register(canon, location);
        self.invalidate();
        Ok(())
    }

    /// Add several constraints; nothing is added if any of them is rejected.
    #[track_caller]
    pub fn subject_to_all(&mut self, constraints: impl IntoIterator<Item = Constraint>) -> Result<()> {
        let location = Location::caller();
        let canon = constraints
            .into_iter()
            .map(|c| self.canonical(&c, 1.0))
            .collect::<Result<Vec<_>>>()?;
        for c in canon {
            self.register(c, location);
        }
        self.invalidate();
        Ok(())
    }

    /// Drop every constraint. Symbols and the objective are kept.
    pub fn clear_constraints(&mut self) {
        self.records.clear();
        self.registry.retain_duals(&HashSet::new());
        self.invalidate();
    }

    /// `lower <= middle <= upper`.
    pub fn bounded(
        lower: impl Into<Expr>,
        middle: impl Into<Expr>,
        upper: impl Into<Expr>,
    ) -> Constraint {
        Constraint::bounded(lower.into(), middle.into(), upper.into())
    }

    /// Dual symbol of a registered constraint, shaped like the constraint.
    pub fn dual(&self, constraint: &Constraint) -> Result<Expr> {
        self.registry.check_scope(&constraint.symbols())?;
        self.records
            .iter()
            .find(|r| &r.canon.source == constraint)
            .map(|r| Expr::Symbol(r.dual.clone()))
            .ok_or(OptiError::UnknownConstraint)
    }

    // ========== Values, initial guesses, scaling, domains ==========

    fn resolve(&self, target: &Expr, values: &[f64], kind: Target) -> Result<Vec<ElementValue>> {
        let symbols = target.symbols();
        self.registry.check_scope(&symbols)?;
        for s in &symbols {
            match (kind, s.kind) {
                (Target::Value, SymbolKind::Parameter)
                | (Target::Initial, SymbolKind::Variable | SymbolKind::Dual) => {}
                (Target::Value, _) => {
                    return Err(OptiError::ValueForVariable {
                        symbol: s.describe(),
                    })
                }
                (Target::Initial, _) => {
                    return Err(OptiError::InitialForParameter {
                        symbol: s.describe(),
                    })
                }
            }
        }
        resolve_assignment(target, values)
    }

    fn apply(&mut self, assignments: &[ElementValue], kind: Target) {
        for a in assignments {
            if let Some(entry) = self.registry.get_mut(a.symbol) {
                let slot = match kind {
                    Target::Value => &mut entry.value,
                    Target::Initial => &mut entry.initial,
                };
                slot[a.element] = a.value;
            }
        }
        self.invalidate();
    }

    /// Set parameter values. `target` may be any invertible affine
    /// arrangement of parameter elements.
    pub fn set_value(&mut self, target: &Expr, values: impl IntoValue) -> Result<()> {
        let resolved = self.resolve(target, &values.into_values(), Target::Value)?;
        self.apply(&resolved, Target::Value);
        Ok(())
    }

    /// Apply `parameter == value` equalities, all or nothing.
    pub fn set_values(&mut self, assignments: &[Constraint]) -> Result<()> {
        let mut resolved = Vec::new();
        for a in assignments {
            let (target, values) = equality_parts(a)?;
            resolved.extend(self.resolve(target, &values, Target::Value)?);
        }
        self.apply(&resolved, Target::Value);
        Ok(())
    }

    /// Set initial guesses of decision variables or duals.
    pub fn set_initial(&mut self, target: &Expr, values: impl IntoValue) -> Result<()> {
        let resolved = self.resolve(target, &values.into_values(), Target::Initial)?;
        self.apply(&resolved, Target::Initial);
        Ok(())
    }

    /// Apply `variable == value` equalities as initial guesses, all or
    /// nothing.
    pub fn set_initials(&mut self, assignments: &[Constraint]) -> Result<()> {
        let mut resolved = Vec::new();
        for a in assignments {
            let (target, values) = equality_parts(a)?;
            resolved.extend(self.resolve(target, &values, Target::Initial)?);
        }
        self.apply(&resolved, Target::Initial);
        Ok(())
    }

    /// Current initial guesses as `symbol == value` equalities, for every
    /// variable and every dual of the current constraints.
    pub fn initial(&self) -> Vec<Constraint> {
        self.registry
            .entries()
            .filter(|e| matches!(e.symbol.kind, SymbolKind::Variable | SymbolKind::Dual))
            .map(|e| {
                let shape = e.symbol.shape;
                Expr::Symbol(e.symbol.clone()).equals(constant_matrix(
                    e.initial.clone(),
                    shape.rows(),
                    shape.cols(),
                ))
            })
            .collect()
    }

    /// Elements of a single decision variable selected by `target`.
    fn variable_elements(&self, target: &Expr, what: &str) -> Result<(SymbolId, Vec<usize>)> {
        self.registry.check_scope(&target.symbols())?;
        match target.selection_of_symbol() {
            Some((s, elements)) if s.kind == SymbolKind::Variable => Ok((s.id, elements)),
            _ => Err(OptiError::InvalidProblem(format!(
                "{what} applies to a decision variable or a slice of one"
            ))),
        }
    }

    /// Set the linear scale of variable elements: `x = offset + scale * x_hat`.
    ///
    /// Scalars broadcast over the selected elements.
    pub fn set_linear_scale(
        &mut self,
        target: &Expr,
        scale: impl IntoValue,
        offset: impl IntoValue,
    ) -> Result<()> {
        let (id, elements) = self.variable_elements(target, "set_linear_scale")?;
        let n = elements.len();
        let expand = |v: Vec<f64>, what: &str| -> Result<Vec<f64>> {
            match v.len() {
                len if len == n => Ok(v),
                1 => Ok(vec![v[0]; n]),
                len => Err(OptiError::Inconsistent(format!(
                    "{what} has {len} entries for {n} elements"
                ))),
            }
        };
        let scale = expand(scale.into_values(), "scale")?;
        let offset = expand(offset.into_values(), "offset")?;
        if let Some(bad) = scale.iter().find(|s| !(s.is_finite() && **s != 0.0)) {
            return Err(OptiError::InvalidProblem(format!(
                "linear scale must be finite and nonzero, got {bad}"
            )));
        }
        if let Some(bad) = offset.iter().find(|o| !o.is_finite()) {
            return Err(OptiError::InvalidProblem(format!(
                "linear scale offset must be finite, got {bad}"
            )));
        }
        let mut seen: HashMap<usize, (f64, f64)> = HashMap::new();
        for ((&e, &s), &o) in elements.iter().zip(&scale).zip(&offset) {
            if let Some(prev) = seen.insert(e, (s, o)).filter(|prev| *prev != (s, o)) {
                return Err(OptiError::Ambiguous(format!(
                    "element {e} is given scale pairs {prev:?} and {:?}",
                    (s, o)
                )));
            }
        }
        if let Some(entry) = self.registry.get_mut(id) {
            for (e, (s, o)) in seen {
                entry.scale[e] = s;
                entry.offset[e] = o;
            }
        }
        self.invalidate();
        Ok(())
    }

    /// Set the domain of variable elements.
    pub fn set_domain(&mut self, target: &Expr, domain: Domain) -> Result<()> {
        let (id, elements) = self.variable_elements(target, "set_domain")?;
        if let Some(entry) = self.registry.get_mut(id) {
            for e in elements {
                entry.domain[e] = domain;
            }
        }
        self.invalidate();
        Ok(())
    }

    // ========== Solving ==========

    /// Select the backend by name.
    pub fn solver(&mut self, name: &str, options: SolverOptions) -> Result<()> {
        options.validate()?;
        let backend = lookup(name, self.class)?;
        info!(solver = name, class = %self.class, "solver selected");
        self.solver = Some(SolverChoice { backend, options });
        self.invalidate();
        Ok(())
    }

    /// Call `f(iteration, evaluator)` at every backend iteration.
    pub fn callback(&mut self, f: impl FnMut(usize, &Evaluator) + 'static) {
        self.callback = Some(Box::new(f));
    }

    pub fn clear_callback(&mut self) {
        self.callback = None;
    }

    fn model(&self) -> Model<'_> {
        Model {
            registry: &self.registry,
            objective: self.objective.as_ref(),
            f_scale: self.f_scale,
            records: &self.records,
            class: self.class,
            detect_simple_bounds: self
                .solver
                .as_ref()
                .is_some_and(|s| s.options.detect_simple_bounds),
        }
    }

    fn layout(&self) -> Layout {
        Layout::new(&self.model())
    }

    fn parameter_bindings(&self) -> Bindings {
        let mut bindings = Bindings::new();
        for entry in self.registry.of_kind(SymbolKind::Parameter) {
            if let Some(v) = entry.finite_value() {
                bindings.insert(entry.symbol.id, v.to_vec());
            }
        }
        bindings
    }

    /// Solve; any status but optimal is an error.
    pub fn solve(&mut self) -> Result<OptiSolution> {
        self.solve_accepting(false)
    }

    /// Solve; iteration, time and node limits return the last iterate.
    pub fn solve_limited(&mut self) -> Result<OptiSolution> {
        self.solve_accepting(true)
    }

    fn solve_accepting(&mut self, limits: bool) -> Result<OptiSolution> {
        let SolverChoice { backend, options } = self.solver.clone().ok_or(OptiError::NoSolver)?;
        let transcription = Transcription::build(&self.model(), options.cache.clone())?;
        let problem = &transcription.problem;
        if problem.has_discrete() && !backend.supports_discrete() {
            return Err(OptiError::Capability(format!(
                "solver '{}' does not support integer variables",
                backend.name()
            )));
        }

        let layout = &transcription.layout;
        let counts = (layout.nx, layout.np, layout.ng());
        let in_problem: HashSet<SymbolId> =
            layout.variables.iter().map(|s| s.symbol.id).collect();
        let duals: HashSet<SymbolId> = self.records.iter().map(|r| r.dual.id).collect();
        let state = |bindings| SolvedState {
            bindings,
            in_problem: in_problem.clone(),
            duals: duals.clone(),
        };
        let instance = self.instance;
        let parameters = self.parameter_bindings();

        info!(
            solver = backend.name(),
            nx = counts.0,
            ng = counts.2,
            np = counts.1,
            "solve start"
        );
        let mut user_callback = self.callback.take();
        let result = {
            let mut on_iterate = |it: &Iterate| {
                if let Some(cb) = user_callback.as_mut() {
                    let bindings = transcription.user_bindings(&it.x, &it.lam_g, &it.lam_x);
                    let evaluator =
                        Evaluator::new(instance, parameters.clone(), Some(state(bindings)), counts);
                    cb(it.iter, &evaluator);
                }
            };
            backend.solve(problem, &options, &mut on_iterate)
        };
        self.callback = user_callback;
        let result = result?;

        let status = result.stats.status;
        info!(
            solver = backend.name(),
            status = %status,
            iterations = result.stats.iter_count,
            "solve finished"
        );
        if !(status == SolveStatus::Optimal || (limits && status.is_limit())) {
            warn!(solver = backend.name(), status = %status, "solve rejected");
            return Err(OptiError::SolverFailed {
                solver: backend.name().to_string(),
                status,
            });
        }

        let solved = state(transcription.user_bindings(&result.x, &result.lam_g, &result.lam_x));
        let variables = layout
            .variables
            .iter()
            .filter_map(|slot| {
                let shape = slot.symbol.shape;
                solved.bindings.get(slot.symbol.id).map(|v| {
                    Expr::Symbol(slot.symbol.clone()).equals(constant_matrix(
                        v.to_vec(),
                        shape.rows(),
                        shape.cols(),
                    ))
                })
            })
            .collect();
        let parameter_values = self
            .registry
            .of_kind(SymbolKind::Parameter)
            .filter_map(|e| {
                let shape = e.symbol.shape;
                e.finite_value().map(|v| {
                    Expr::Symbol(e.symbol.clone()).equals(constant_matrix(
                        v.to_vec(),
                        shape.rows(),
                        shape.cols(),
                    ))
                })
            })
            .collect();

        let evaluator = Evaluator::new(instance, parameters, Some(solved.clone()), counts);
        self.solved = Some(solved);
        Ok(OptiSolution::new(
            evaluator,
            result.stats,
            backend.name(),
            variables,
            parameter_values,
        ))
    }

    // ========== Evaluation ==========

    /// Evaluator over the current state (solved values included while they
    /// are still valid).
    pub fn debug(&self) -> Evaluator {
        let layout = self.layout();
        Evaluator::new(
            self.instance,
            self.parameter_bindings(),
            self.solved.clone(),
            (layout.nx, layout.np, layout.ng()),
        )
    }

    /// Value of an expression; see [`Evaluator::value`].
    pub fn value(&self, expr: &Expr) -> Result<DMatrix<f64>> {
        self.debug().value(expr)
    }

    /// Value of a scalar expression.
    pub fn value_scalar(&self, expr: &Expr) -> Result<f64> {
        self.debug().value_scalar(expr)
    }

    /// Value of an expression with substitutions; see
    /// [`Evaluator::value_with`].
    pub fn value_with(&self, expr: &Expr, substitutions: &[Constraint]) -> Result<DMatrix<f64>> {
        self.debug().value_with(expr, substitutions)
    }

    // ========== Problem views ==========

    /// Decision vector: active variables in declaration order.
    pub fn x(&self) -> Expr {
        let parts: Vec<Expr> = self
            .layout()
            .variables
            .iter()
            .map(|s| Expr::Symbol(s.symbol.clone()))
            .collect();
        if parts.is_empty() {
            stack(parts)
        } else {
            veccat(&parts)
        }
    }

    /// Parameter vector: active parameters in declaration order.
    pub fn p(&self) -> Expr {
        let parts: Vec<Expr> = self
            .layout()
            .parameters
            .iter()
            .map(|s| Expr::Symbol(s.symbol.clone()))
            .collect();
        if parts.is_empty() {
            stack(parts)
        } else {
            veccat(&parts)
        }
    }

    /// Objective (zero when none was set).
    pub fn f(&self) -> Expr {
        self.objective.clone().unwrap_or_else(|| constant(0.0))
    }

    /// All constraint rows in user orientation.
    pub fn g(&self) -> Expr {
        stack(self.records.iter().map(|r| r.canon.user_expr()).collect())
    }

    pub fn lbg(&self) -> Expr {
        stack(self.records.iter().map(|r| r.canon.user_lower()).collect())
    }

    pub fn ubg(&self) -> Expr {
        stack(self.records.iter().map(|r| r.canon.user_upper()).collect())
    }

    /// Dual symbols of all constraints, stacked like [`Opti::g`].
    pub fn lam_g(&self) -> Expr {
        let parts: Vec<Expr> = self
            .records
            .iter()
            .map(|r| Expr::Symbol(r.dual.clone()).vec())
            .collect();
        stack(parts)
    }

    /// Number of decision elements.
    pub fn nx(&self) -> usize {
        self.layout().nx
    }

    /// Number of parameter elements.
    pub fn np(&self) -> usize {
        self.layout().np
    }

    /// Number of general rows handed to the backend (after folding simple
    /// bounds when detection is enabled).
    pub fn ng(&self) -> usize {
        self.layout().ng()
    }

    pub fn x_linear_scale(&self) -> DVector<f64> {
        DVector::from_vec(self.layout().x_scale)
    }

    pub fn x_linear_scale_offset(&self) -> DVector<f64> {
        DVector::from_vec(self.layout().x_offset)
    }

    /// Row scale of every user row.
    pub fn g_linear_scale(&self) -> DVector<f64> {
        DVector::from_iterator(
            self.records.iter().map(|r| r.canon.rows()).sum(),
            self.records
                .iter()
                .flat_map(|r| std::iter::repeat(r.canon.scale).take(r.canon.rows())),
        )
    }

    pub fn f_linear_scale(&self) -> f64 {
        self.f_scale
    }

    /// Which variable element sits at position `i` of [`Opti::x`].
    pub fn x_describe(&self, i: usize) -> Result<String> {
        let layout = self.layout();
        layout
            .variable_at(i)
            .map(|(slot, k)| format!("{} at nonzero {}", slot.symbol.describe(), k))
            .ok_or_else(|| {
                OptiError::InvalidProblem(format!(
                    "index {i} out of range for {} decision elements",
                    layout.nx
                ))
            })
    }

    /// Which constraint row sits at position `i` of [`Opti::g`].
    pub fn g_describe(&self, i: usize) -> Result<String> {
        let layout = self.layout();
        layout
            .record_at(i)
            .map(|(r, row)| {
                let record = &self.records[r];
                format!(
                    "constraint '{}' (row {}) added at {}",
                    record.canon.source, row, record.location
                )
            })
            .ok_or_else(|| {
                OptiError::InvalidProblem(format!(
                    "index {i} out of range for {} constraint rows",
                    layout.user_rows
                ))
            })
    }

    // ========== Functions ==========

    /// Wrap the whole solve as a function from `inputs` to `outputs`.
    ///
    /// Inputs must be independent selections of symbol elements: variables
    /// act as initial guesses, parameters as values, duals as multiplier
    /// warm starts.
    pub fn to_function(
        &self,
        name: &str,
        inputs: &[Expr],
        outputs: &[Expr],
    ) -> Result<OptiFunction> {
        let mut covered: HashSet<(SymbolId, usize)> = HashSet::new();
        for (index, input) in inputs.iter().enumerate() {
            let symbols = input.symbols();
            self.registry.check_scope(&symbols)?;
            let selection = input
                .selection()
                .ok_or(OptiError::ArbitraryArgument { index })?;
            for (id, element) in selection {
                if !covered.insert((id, element)) {
                    let symbol = symbols
                        .iter()
                        .find(|s| s.id == id)
                        .map(|s| s.describe())
                        .unwrap_or_default();
                    return Err(OptiError::NotIndependent { symbol });
                }
            }
        }
        let in_problem: HashSet<SymbolId> = self
            .layout()
            .variables
            .iter()
            .map(|s| s.symbol.id)
            .collect();
        let duals: HashSet<SymbolId> = self.records.iter().map(|r| r.dual.id).collect();
        for output in outputs {
            let symbols = output.symbols();
            self.registry.check_scope(&symbols)?;
            let missing: Vec<String> = symbols
                .iter()
                .filter(|s| s.kind == SymbolKind::Variable && !in_problem.contains(&s.id))
                .map(|s| s.describe())
                .collect();
            if !missing.is_empty() {
                return Err(OptiError::NotInProblem {
                    symbols: missing.join(", "),
                });
            }
            if let Some(d) = symbols
                .iter()
                .find(|s| s.kind == SymbolKind::Dual && !duals.contains(&s.id))
            {
                return Err(OptiError::DualNotRegistered {
                    symbol: d.describe(),
                });
            }
        }
        Ok(OptiFunction::new(
            name,
            self.duplicate(),
            inputs.to_vec(),
            outputs.to_vec(),
        ))
    }

    /// Write a function input: initial guesses for variables and duals,
    /// values for parameters.
    pub(crate) fn assign_input(&mut self, input: &Expr, values: &[f64]) -> Result<()> {
        for a in resolve_assignment(input, values)? {
            let Some(entry) = self.registry.get_mut(a.symbol) else {
                continue;
            };
            match entry.symbol.kind {
                SymbolKind::Parameter => entry.value[a.element] = a.value,
                _ => entry.initial[a.element] = a.value,
            }
        }
        self.invalidate();
        Ok(())
    }

    /// Turn a derivative function written in user-space quantities into the
    /// backend-space function the solver cache expects.
    ///
    /// The user function takes the decision vector [`Opti::x`], parameters
    /// [`Opti::p`], the objective multiplier and multipliers for every row of
    /// [`Opti::g`], and returns outputs in the layout of the named backend
    /// function.
    pub fn scale_helper(&self, function: NlpFunction) -> Result<NlpFunction> {
        self.layout().scale_map().wrap(function)
    }

    /// Built-in backend-space function `name` (`nlp_f`, `nlp_g`,
    /// `nlp_grad_f`, `nlp_jac_g` or `nlp_hess_l`) of the current
    /// transcription.
    pub fn backend_function(&self, name: &str) -> Result<NlpFunction> {
        Transcription::build(&self.model(), FunctionCache::new())?
            .problem
            .builtin_function(name)
    }
}

fn stack(parts: Vec<Expr>) -> Expr {
    if parts.is_empty() {
        crate::expr::zeros(Shape::vector(0))
    } else {
        vertcat(&parts)
    }
}

impl fmt::Debug for Opti {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Opti")
            .field("instance", &self.instance)
            .field("class", &self.class)
            .field("constraints", &self.records.len())
            .field("solver", &self.solver.as_ref().map(|s| s.backend.name()))
            .field("solved", &self.solved.is_some())
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Opti {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let layout = self.layout();
        let count = |kind| self.registry.of_kind(kind).count();
        writeln!(f, "Opti {{")?;
        writeln!(f, "  instance #{}", self.instance.raw())?;
        writeln!(f, "  problem class: {}", self.class)?;
        writeln!(
            f,
            "  #variables: {} (nx = {})",
            count(SymbolKind::Variable),
            layout.nx
        )?;
        writeln!(
            f,
            "  #parameters: {} (np = {})",
            count(SymbolKind::Parameter),
            layout.np
        )?;
        writeln!(
            f,
            "  #constraints: {} (ng = {})",
            self.records.len(),
            layout.ng()
        )?;
        match &self.solver {
            Some(s) => writeln!(f, "  solver: {}", s.backend.name())?,
            None => writeln!(f, "  solver: none")?,
        }
        write!(f, "}}")
    }
}
