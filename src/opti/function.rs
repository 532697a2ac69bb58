//! A solve packaged as a callable.

use std::fmt;

use nalgebra::DMatrix;
use tracing::debug;

use super::Opti;
use crate::error::{OptiError, Result};
use crate::expr::Expr;

/// Maps input values to output values through one full solve.
///
/// Built by [`Opti::to_function`]. Every call runs on a private copy of the
/// instance as it was when the function was created, so calls do not
/// influence each other or the original instance.
pub struct OptiFunction {
    name: String,
    opti: Opti,
    inputs: Vec<Expr>,
    outputs: Vec<Expr>,
}

impl Clone for OptiFunction {
    fn clone(&self) -> Self {
        OptiFunction {
            name: self.name.clone(),
            opti: self.opti.duplicate(),
            inputs: self.inputs.clone(),
            outputs: self.outputs.clone(),
        }
    }
}

impl OptiFunction {
    pub(crate) fn new(name: &str, opti: Opti, inputs: Vec<Expr>, outputs: Vec<Expr>) -> Self {
        OptiFunction {
            name: name.to_string(),
            opti,
            inputs,
            outputs,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn n_in(&self) -> usize {
        self.inputs.len()
    }

    pub fn n_out(&self) -> usize {
        self.outputs.len()
    }

    /// Solve with the given inputs and evaluate the outputs.
    ///
    /// Iteration, time and node limits still produce outputs; other
    /// unsuccessful statuses are errors.
    pub fn call(&self, args: &[DMatrix<f64>]) -> Result<Vec<DMatrix<f64>>> {
        if args.len() != self.inputs.len() {
            return Err(OptiError::InvalidProblem(format!(
                "function '{}' takes {} arguments, got {}",
                self.name,
                self.inputs.len(),
                args.len()
            )));
        }
        let mut opti = self.opti.duplicate();
        for (input, arg) in self.inputs.iter().zip(args) {
            opti.assign_input(input, arg.as_slice())?;
        }
        debug!(function = %self.name, "function call");
        let sol = opti.solve_limited()?;
        self.outputs.iter().map(|o| sol.value(o)).collect()
    }
}

impl fmt::Debug for OptiFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OptiFunction")
            .field("name", &self.name)
            .field("n_in", &self.inputs.len())
            .field("n_out", &self.outputs.len())
            .finish()
    }
}

impl fmt::Display for OptiFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:({} inputs)->({} outputs) Opti",
            self.name,
            self.inputs.len(),
            self.outputs.len()
        )
    }
}
