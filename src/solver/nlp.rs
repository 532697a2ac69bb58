//! The transcribed problem handed to a backend.
//!
//! Backends see
//!
//! ```text
//! minimize    f(x, p)
//! subject to  lbg <= g(x, p) <= ubg
//!             lbx <= x <= ubx
//! ```
//!
//! in backend space (scaled variables, rows and objective). Derivatives are
//! evaluated in forward mode unless the [`FunctionCache`] carries an override
//! for the corresponding named function:
//!
//! | name | outputs |
//! |---|---|
//! | `nlp_f` | `[f]` |
//! | `nlp_g` | `[g]` |
//! | `nlp_grad_f` | `[f, grad_f]` |
//! | `nlp_jac_g` | `[g, jac_g]` |
//! | `nlp_hess_l` | `[hess_l]` (upper triangle suffices) |

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use nalgebra::{DMatrix, DVector};

use super::ProblemClass;
use crate::error::{OptiError, Result};
use crate::expr::{eval_f64, hessian_at, jacobian_at, Bindings, Expr, SymbolData, SymbolId};

/// Names of the derivative functions a problem exposes.
pub const FUNCTION_NAMES: [&str; 5] = ["nlp_f", "nlp_g", "nlp_grad_f", "nlp_jac_g", "nlp_hess_l"];

/// Inputs of a named problem function.
#[derive(Debug, Clone)]
pub struct NlpArgs {
    pub x: DVector<f64>,
    pub p: DVector<f64>,
    pub lam_f: f64,
    pub lam_g: DVector<f64>,
}

type Callable = dyn Fn(&NlpArgs) -> Result<Vec<DMatrix<f64>>> + Send + Sync;

/// A named numerical function over [`NlpArgs`].
#[derive(Clone)]
pub struct NlpFunction {
    name: String,
    eval: Arc<Callable>,
}

impl NlpFunction {
    /// Wrap a closure under a name.
    pub fn new(
        name: impl Into<String>,
        eval: impl Fn(&NlpArgs) -> Result<Vec<DMatrix<f64>>> + Send + Sync + 'static,
    ) -> Self {
        NlpFunction {
            name: name.into(),
            eval: Arc::new(eval),
        }
    }

    /// Function name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Evaluate.
    pub fn call(&self, args: &NlpArgs) -> Result<Vec<DMatrix<f64>>> {
        (self.eval)(args)
    }
}

impl fmt::Debug for NlpFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NlpFunction").field("name", &self.name).finish()
    }
}

/// Derivative overrides keyed by function name.
#[derive(Clone, Default)]
pub struct FunctionCache {
    functions: HashMap<String, NlpFunction>,
}

impl FunctionCache {
    /// Empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert (or replace) a function under its own name.
    pub fn insert(&mut self, function: NlpFunction) {
        self.functions.insert(function.name.clone(), function);
    }

    /// Look up a function.
    pub fn get(&self, name: &str) -> Option<&NlpFunction> {
        self.functions.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

impl fmt::Debug for FunctionCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.functions.keys().collect();
        names.sort();
        f.debug_set().entries(names).finish()
    }
}

/// A problem in backend space.
#[derive(Debug, Clone)]
pub struct NlpProblem {
    /// Scaled decision vector symbol.
    pub x: Arc<SymbolData>,
    /// Parameter vector symbol.
    pub p: Arc<SymbolData>,
    /// Objective multiplier symbol of the Lagrangian.
    pub lam_f: Arc<SymbolData>,
    /// Constraint multiplier symbol of the Lagrangian.
    pub lam_g: Arc<SymbolData>,
    /// Scaled objective.
    pub f: Expr,
    /// Scaled constraint rows, as a column.
    pub g: Expr,
    /// `lam_f * f + lam_g' g`.
    pub lagrangian: Expr,
    /// Parameter values.
    pub p_value: DVector<f64>,
    pub x0: DVector<f64>,
    pub lbx: DVector<f64>,
    pub ubx: DVector<f64>,
    pub lbg: DVector<f64>,
    pub ubg: DVector<f64>,
    pub lam_g0: DVector<f64>,
    pub lam_x0: DVector<f64>,
    /// Integer-domain flags per element of `x`.
    pub discrete: Vec<bool>,
    /// Scale of each element of `x` (user value = offset + scale * x).
    pub x_scale: DVector<f64>,
    /// Offset of each element of `x`.
    pub x_offset: DVector<f64>,
    /// Declared problem class.
    pub class: ProblemClass,
    /// Derivative overrides.
    pub cache: FunctionCache,
}

impl NlpProblem {
    /// Number of decision elements.
    pub fn nx(&self) -> usize {
        self.x.size()
    }

    /// Number of constraint rows.
    pub fn ng(&self) -> usize {
        self.lam_g.size()
    }

    /// Whether any element is integer-valued.
    pub fn has_discrete(&self) -> bool {
        self.discrete.iter().any(|&d| d)
    }

    /// Element `k` of `x` in user space.
    pub fn user_value(&self, x: &DVector<f64>, k: usize) -> f64 {
        self.x_offset[k] + self.x_scale[k] * x[k]
    }

    fn directions(&self) -> Vec<(SymbolId, usize)> {
        (0..self.nx()).map(|k| (self.x.id, k)).collect()
    }

    fn bindings(&self, x: &DVector<f64>) -> Bindings {
        let mut b = Bindings::new();
        b.insert(self.x.id, x.as_slice().to_vec());
        b.insert(self.p.id, self.p_value.as_slice().to_vec());
        b
    }

    fn args(&self, x: &DVector<f64>, lam_f: f64, lam_g: &DVector<f64>) -> NlpArgs {
        NlpArgs {
            x: x.clone(),
            p: self.p_value.clone(),
            lam_f,
            lam_g: lam_g.clone(),
        }
    }

    /// Output `index` of the cached override `name`, if one is registered.
    fn cached(
        &self,
        name: &str,
        index: usize,
        shape: (usize, usize),
        x: &DVector<f64>,
        lam_f: f64,
        lam_g: &DVector<f64>,
    ) -> Result<Option<DMatrix<f64>>> {
        let Some(function) = self.cache.get(name) else {
            return Ok(None);
        };
        let mut outputs = function.call(&self.args(x, lam_f, lam_g))?;
        if outputs.len() <= index {
            return Err(OptiError::Inconsistent(format!(
                "function '{}' returned {} outputs, expected at least {}",
                name,
                outputs.len(),
                index + 1
            )));
        }
        let out = outputs.swap_remove(index);
        if out.shape() != shape {
            return Err(OptiError::Inconsistent(format!(
                "function '{}' output {} has shape {}x{}, expected {}x{}",
                name,
                index,
                out.nrows(),
                out.ncols(),
                shape.0,
                shape.1
            )));
        }
        Ok(Some(out))
    }

    fn no_lam_g(&self) -> DVector<f64> {
        DVector::zeros(self.ng())
    }

    /// Objective value.
    pub fn eval_f(&self, x: &DVector<f64>) -> Result<f64> {
        if let Some(m) = self.cached("nlp_f", 0, (1, 1), x, 1.0, &self.no_lam_g())? {
            return Ok(m[(0, 0)]);
        }
        self.builtin_f(x)
    }

    /// Constraint values.
    pub fn eval_g(&self, x: &DVector<f64>) -> Result<DVector<f64>> {
        if let Some(m) = self.cached("nlp_g", 0, (self.ng(), 1), x, 1.0, &self.no_lam_g())? {
            return Ok(m.column(0).into_owned());
        }
        self.builtin_g(x)
    }

    /// Objective gradient.
    pub fn grad_f(&self, x: &DVector<f64>) -> Result<DVector<f64>> {
        if let Some(m) = self.cached("nlp_grad_f", 1, (self.nx(), 1), x, 1.0, &self.no_lam_g())? {
            return Ok(m.column(0).into_owned());
        }
        self.builtin_grad_f(x)
    }

    /// Constraint Jacobian, `ng x nx`.
    pub fn jac_g(&self, x: &DVector<f64>) -> Result<DMatrix<f64>> {
        let shape = (self.ng(), self.nx());
        if let Some(m) = self.cached("nlp_jac_g", 1, shape, x, 1.0, &self.no_lam_g())? {
            return Ok(m);
        }
        self.builtin_jac_g(x)
    }

    /// Hessian of `lam_f * f + lam_g' g`, symmetric.
    pub fn hess_l(&self, x: &DVector<f64>, lam_f: f64, lam_g: &DVector<f64>) -> Result<DMatrix<f64>> {
        let n = self.nx();
        if let Some(m) = self.cached("nlp_hess_l", 0, (n, n), x, lam_f, lam_g)? {
            return Ok(symmetrize_upper(m));
        }
        self.builtin_hess_l(x, lam_f, lam_g)
    }

    fn builtin_f(&self, x: &DVector<f64>) -> Result<f64> {
        Ok(eval_f64(&self.f, &self.bindings(x))?[(0, 0)])
    }

    fn builtin_g(&self, x: &DVector<f64>) -> Result<DVector<f64>> {
        if self.ng() == 0 {
            return Ok(DVector::zeros(0));
        }
        let m = eval_f64(&self.g, &self.bindings(x))?;
        Ok(DVector::from_column_slice(m.as_slice()))
    }

    fn builtin_grad_f(&self, x: &DVector<f64>) -> Result<DVector<f64>> {
        let jac = jacobian_at(&self.f, &self.directions(), &self.bindings(x))?;
        Ok(jac.row(0).transpose())
    }

    fn builtin_jac_g(&self, x: &DVector<f64>) -> Result<DMatrix<f64>> {
        if self.ng() == 0 {
            return Ok(DMatrix::zeros(0, self.nx()));
        }
        jacobian_at(&self.g, &self.directions(), &self.bindings(x))
    }

    fn builtin_hess_l(&self, x: &DVector<f64>, lam_f: f64, lam_g: &DVector<f64>) -> Result<DMatrix<f64>> {
        let mut b = self.bindings(x);
        b.insert(self.lam_f.id, vec![lam_f]);
        b.insert(self.lam_g.id, lam_g.as_slice().to_vec());
        hessian_at(&self.lagrangian, &self.directions(), &b)
    }

    /// The built-in (override-free) named function, for introspection.
    pub fn builtin_function(&self, name: &str) -> Result<NlpFunction> {
        let problem = Arc::new(self.clone());
        let with = move |args: &NlpArgs| {
            let mut p = problem.as_ref().clone();
            p.p_value = args.p.clone();
            p
        };
        let function = match name {
            "nlp_f" => NlpFunction::new(name, move |a| {
                Ok(vec![DMatrix::from_element(1, 1, with(a).builtin_f(&a.x)?)])
            }),
            "nlp_g" => NlpFunction::new(name, move |a| Ok(vec![column(with(a).builtin_g(&a.x)?)])),
            "nlp_grad_f" => NlpFunction::new(name, move |a| {
                let p = with(a);
                Ok(vec![
                    DMatrix::from_element(1, 1, p.builtin_f(&a.x)?),
                    column(p.builtin_grad_f(&a.x)?),
                ])
            }),
            "nlp_jac_g" => NlpFunction::new(name, move |a| {
                let p = with(a);
                Ok(vec![column(p.builtin_g(&a.x)?), p.builtin_jac_g(&a.x)?])
            }),
            "nlp_hess_l" => NlpFunction::new(name, move |a| {
                Ok(vec![with(a).builtin_hess_l(&a.x, a.lam_f, &a.lam_g)?])
            }),
            other => {
                return Err(OptiError::Capability(format!(
                    "no function named '{}'; available: {}",
                    other,
                    FUNCTION_NAMES.join(", ")
                )))
            }
        };
        Ok(function)
    }
}

fn column(v: DVector<f64>) -> DMatrix<f64> {
    let n = v.len();
    DMatrix::from_column_slice(n, 1, v.as_slice())
}

/// Mirror the upper triangle onto the lower one.
fn symmetrize_upper(mut m: DMatrix<f64>) -> DMatrix<f64> {
    for j in 0..m.ncols() {
        for i in (j + 1)..m.nrows() {
            m[(i, j)] = m[(j, i)];
        }
    }
    m
}
