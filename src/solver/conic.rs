//! Direct QP backend for conic problems.
//!
//! A conic problem has a quadratic objective and affine constraints in the
//! scaled decision vector, so one expansion around `x = 0` gives the exact
//! QP, which Clarabel solves in one call.

use nalgebra::DVector;
use tracing::debug;

use super::clarabel::{solve_qp, QpSettings, QuadraticProgram};
use super::{
    Backend, BackendResult, IterationCallback, Iterate, NlpProblem, ProblemClass, SolveStatus,
    SolverOptions, SolverStats,
};
use crate::error::{OptiError, Result};
use crate::expr::SymbolData;

/// The `clarabel` backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClarabelConic;

impl Backend for ClarabelConic {
    fn name(&self) -> &'static str {
        "clarabel"
    }

    fn classes(&self) -> &'static [ProblemClass] {
        &[ProblemClass::Conic]
    }

    fn supports_discrete(&self) -> bool {
        false
    }

    fn solve(
        &self,
        problem: &NlpProblem,
        options: &SolverOptions,
        callback: &mut IterationCallback<'_>,
    ) -> Result<BackendResult> {
        let x_id = problem.x.id;
        let is_x = |s: &SymbolData| s.id == x_id;
        if !problem.f.degree(&is_x).is_quadratic() {
            return Err(OptiError::Capability(
                "solver 'clarabel' requires a quadratic objective".into(),
            ));
        }
        if problem.ng() > 0 && !problem.g.degree(&is_x).is_affine() {
            return Err(OptiError::Capability(
                "solver 'clarabel' requires affine constraints".into(),
            ));
        }

        let nx = problem.nx();
        let origin = DVector::zeros(nx);
        let h = problem.hess_l(&origin, 1.0, &DVector::zeros(problem.ng()))?;
        let h = (&h + h.transpose()) * 0.5;
        let scale = h.amax().max(1.0);
        if nx > 0 && h.clone().symmetric_eigen().eigenvalues.min() < -1e-9 * scale {
            return Err(OptiError::Capability(
                "solver 'clarabel' requires a convex objective".into(),
            ));
        }
        let g0 = problem.eval_g(&origin)?;
        let qp = QuadraticProgram {
            h,
            q: problem.grad_f(&origin)?,
            a: problem.jac_g(&origin)?,
            lba: &problem.lbg - &g0,
            uba: &problem.ubg - &g0,
            lbd: problem.lbx.clone(),
            ubd: problem.ubx.clone(),
        };
        let settings = QpSettings {
            verbose: options.verbose,
            max_iter: u32::try_from(options.max_iter).unwrap_or(u32::MAX),
            time_limit: options.time_limit,
            tol: options.qp_tol,
        };
        let sol = solve_qp(&qp, &settings)?;
        let iterations = sol.iterations as usize;

        let (x, f, g) = if sol.status == SolveStatus::Optimal || sol.status.is_limit() {
            let f = problem.eval_f(&sol.d)?;
            let g = problem.eval_g(&sol.d)?;
            (sol.d, f, g)
        } else {
            let x = problem.x0.clone();
            let f = problem.eval_f(&x)?;
            let g = problem.eval_g(&x)?;
            (x, f, g)
        };

        callback(&Iterate {
            iter: iterations,
            x: x.clone(),
            lam_g: sol.lam_a.clone(),
            lam_x: sol.lam_d.clone(),
            f,
        });
        debug!(nx, ng = problem.ng(), status = %sol.status, iterations, "clarabel done");

        let mut stats = SolverStats::new(sol.status, iterations, sol.status.to_string());
        stats.solve_time = sol.solve_time;
        Ok(BackendResult {
            x,
            lam_g: sol.lam_a,
            lam_x: sol.lam_d,
            f,
            g,
            stats,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::{dot, exp, sq};
    use crate::error::ErrorKind;
    use crate::expr::{Expr, Shape, SymbolKind};
    use crate::solver::FunctionCache;
    use approx::assert_abs_diff_eq;
    use std::panic::Location;
    use std::sync::Arc;

    fn sym(name: &str, n: usize) -> Arc<SymbolData> {
        Arc::new(SymbolData::new(
            SymbolKind::Free,
            None,
            Shape::vector(n),
            name,
            Location::caller(),
        ))
    }

    fn problem(f: impl Fn(&Expr) -> Expr, g: impl Fn(&Expr) -> Expr) -> NlpProblem {
        let (x, p, lam_f, lam_g) = (sym("x", 2), sym("p", 0), sym("lam_f", 1), sym("lam_g", 1));
        let xe = Expr::Symbol(x.clone());
        let f = f(&xe);
        let g = g(&xe);
        let lagrangian =
            Expr::Symbol(lam_f.clone()).at(0) * &f + dot(&Expr::Symbol(lam_g.clone()), &g);
        NlpProblem {
            x,
            p,
            lam_f,
            lam_g,
            f,
            g,
            lagrangian,
            p_value: DVector::zeros(0),
            x0: DVector::zeros(2),
            lbx: DVector::from_element(2, f64::NEG_INFINITY),
            ubx: DVector::from_element(2, f64::INFINITY),
            lbg: DVector::from_vec(vec![1.0]),
            ubg: DVector::from_vec(vec![f64::INFINITY]),
            lam_g0: DVector::zeros(1),
            lam_x0: DVector::zeros(2),
            discrete: vec![false; 2],
            x_scale: DVector::from_element(2, 1.0),
            x_offset: DVector::zeros(2),
            class: ProblemClass::Conic,
            cache: FunctionCache::new(),
        }
    }

    #[test]
    fn test_qp() {
        // min x0^2 + x1^2  s.t.  x0 + x1 >= 1
        let nlp = problem(|x| sq(&x.at(0)) + sq(&x.at(1)), |x| x.at(0) + x.at(1));
        let res = ClarabelConic
            .solve(&nlp, &SolverOptions::default(), &mut |_: &Iterate| {})
            .unwrap();
        assert_eq!(res.stats.status, SolveStatus::Optimal);
        assert_abs_diff_eq!(res.x[0], 0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(res.f, 0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(res.lam_g[0], -1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_rejects_nonlinear() {
        let nlp = problem(|x| exp(&x.at(0)), |x| x.at(0) + x.at(1));
        let err = ClarabelConic
            .solve(&nlp, &SolverOptions::default(), &mut |_: &Iterate| {})
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Capability);

        let nlp = problem(|x| sq(&x.at(0)), |x| sq(&x.at(0)) + x.at(1));
        assert!(ClarabelConic
            .solve(&nlp, &SolverOptions::default(), &mut |_: &Iterate| {})
            .is_err());
    }
}
