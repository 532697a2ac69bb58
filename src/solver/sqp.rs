//! Sequential quadratic programming.
//!
//! Each iteration solves the QP
//!
//! ```text
//! minimize    ½ dᵀ H d + ∇f(x)ᵀ d
//! subject to  lbg - g(x) <= J(x) d <= ubg - g(x)
//!             lbx - x    <=   d    <= ubx - x
//! ```
//!
//! with `H` the exact Hessian of the Lagrangian. An `H` that is not positive
//! definite gets its eigenvalues mirrored and floored; the floor follows the
//! stationarity residual, so steps far from a solution are damped and steps
//! close to one are (nearly) exact Newton steps. Steps are globalized with a
//! backtracking line search on the ℓ1 merit function `f + μ‖viol‖₁`; a
//! rejected full step gets one second-order correction before backtracking.

use std::time::Instant;

use nalgebra::{DMatrix, DVector};
use tracing::{debug, info, warn};

use super::clarabel::{solve_qp, QpSettings, QpSolution, QuadraticProgram};
use super::{
    Backend, BackendResult, IterationCallback, Iterate, NlpProblem, ProblemClass, SolveStatus,
    SolverOptions, SolverStats,
};
use crate::error::Result;

/// Sufficient decrease factor of the line search.
const ARMIJO: f64 = 1e-4;
/// Smallest step length tried.
const MIN_STEP: f64 = 1e-10;
/// Smallest floor on the eigenvalues of the QP Hessian.
const HESSIAN_FLOOR: f64 = 1e-8;

/// The `sqpmethod` backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqpMethod;

impl Backend for SqpMethod {
    fn name(&self) -> &'static str {
        "sqpmethod"
    }

    fn classes(&self) -> &'static [ProblemClass] {
        &[ProblemClass::Nlp]
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
        run(problem, options, callback)
    }
}

/// KKT residuals at a primal-dual point.
#[derive(Debug, Clone, Copy)]
struct Kkt {
    stationarity: f64,
    feasibility: f64,
    complementarity: f64,
}

impl Kkt {
    fn converged(&self, tol: f64, grad: &DVector<f64>) -> bool {
        let scaled = tol * grad.amax().max(1.0);
        self.stationarity <= scaled && self.feasibility <= tol && self.complementarity <= scaled
    }
}

fn violation(v: f64, lo: f64, hi: f64) -> f64 {
    (lo - v).max(v - hi).max(0.0)
}

fn complementarity(v: f64, lo: f64, hi: f64, lam: f64) -> f64 {
    if lo == hi || lam == 0.0 {
        0.0
    } else if lam > 0.0 {
        if hi.is_finite() {
            lam * (hi - v).abs()
        } else {
            lam
        }
    } else if lo.is_finite() {
        -lam * (v - lo).abs()
    } else {
        -lam
    }
}

/// Sum of bound violations of `g` and `x`.
fn infeasibility(problem: &NlpProblem, x: &DVector<f64>, g: &DVector<f64>) -> f64 {
    let rows: f64 = (0..g.len())
        .map(|i| violation(g[i], problem.lbg[i], problem.ubg[i]))
        .sum();
    let bounds: f64 = (0..x.len())
        .map(|k| violation(x[k], problem.lbx[k], problem.ubx[k]))
        .sum();
    rows + bounds
}

fn kkt(
    problem: &NlpProblem,
    x: &DVector<f64>,
    g: &DVector<f64>,
    grad: &DVector<f64>,
    jac: &DMatrix<f64>,
    lam_g: &DVector<f64>,
    lam_x: &DVector<f64>,
) -> Kkt {
    let residual = grad + jac.transpose() * lam_g + lam_x;
    let mut feasibility: f64 = 0.0;
    let mut comp: f64 = 0.0;
    for i in 0..g.len() {
        feasibility = feasibility.max(violation(g[i], problem.lbg[i], problem.ubg[i]));
        comp = comp.max(complementarity(g[i], problem.lbg[i], problem.ubg[i], lam_g[i]));
    }
    for k in 0..x.len() {
        feasibility = feasibility.max(violation(x[k], problem.lbx[k], problem.ubx[k]));
        comp = comp.max(complementarity(x[k], problem.lbx[k], problem.ubx[k], lam_x[k]));
    }
    Kkt {
        stationarity: if residual.is_empty() { 0.0 } else { residual.amax() },
        feasibility,
        complementarity: comp,
    }
}

/// Symmetric part of `h`; unless positive definite, with its eigenvalues
/// mirrored and floored at `floor`.
pub(crate) fn regularize(h: DMatrix<f64>, floor: f64) -> DMatrix<f64> {
    if h.is_empty() {
        return h;
    }
    let sym = (&h + h.transpose()) * 0.5;
    let eigen = sym.clone().symmetric_eigen();
    if eigen.eigenvalues.min() >= HESSIAN_FLOOR {
        return sym;
    }
    let floor = floor.max(HESSIAN_FLOOR);
    let values = eigen.eigenvalues.map(|l| l.abs().max(floor));
    &eigen.eigenvectors * DMatrix::from_diagonal(&values) * eigen.eigenvectors.transpose()
}

fn amax(v: &DVector<f64>) -> f64 {
    if v.is_empty() {
        0.0
    } else {
        v.amax()
    }
}

fn log_iteration(verbose: bool, iter: usize, f: f64, kkt: &Kkt) {
    if verbose {
        info!(
            iter,
            f,
            inf_pr = kkt.feasibility,
            inf_du = kkt.stationarity,
            compl = kkt.complementarity,
            "sqp iteration"
        );
    } else {
        debug!(
            iter,
            f,
            inf_pr = kkt.feasibility,
            inf_du = kkt.stationarity,
            compl = kkt.complementarity,
            "sqp iteration"
        );
    }
}

/// Accepted step of one iteration.
struct Step {
    x: DVector<f64>,
    alpha: f64,
}

fn merit(problem: &NlpProblem, x: &DVector<f64>, mu: f64) -> Result<f64> {
    let f = problem.eval_f(x)?;
    let g = problem.eval_g(x)?;
    Ok(f + mu * infeasibility(problem, x, &g))
}

/// Backtracking line search with one second-order correction.
#[allow(clippy::too_many_arguments)]
fn line_search(
    problem: &NlpProblem,
    qp: &QuadraticProgram,
    settings: &QpSettings,
    x: &DVector<f64>,
    g: &DVector<f64>,
    d: &DVector<f64>,
    phi0: f64,
    dphi: f64,
    mu: f64,
) -> Result<Option<Step>> {
    let mut alpha = 1.0;
    while alpha >= MIN_STEP {
        let trial = x + d * alpha;
        let phi = merit(problem, &trial, mu)?;
        if phi <= phi0 + ARMIJO * alpha * dphi {
            return Ok(Some(Step { x: trial, alpha }));
        }
        if alpha == 1.0 && !g.is_empty() {
            // Shift the linearization by the curvature the full step revealed.
            let shift = problem.eval_g(&trial)? - &qp.a * d;
            let corrected = QuadraticProgram {
                lba: &problem.lbg - &shift,
                uba: &problem.ubg - &shift,
                ..qp.clone()
            };
            let soc = solve_qp(&corrected, settings)?;
            if soc.status == SolveStatus::Optimal {
                let trial = x + &soc.d;
                if merit(problem, &trial, mu)? <= phi0 + ARMIJO * dphi {
                    return Ok(Some(Step { x: trial, alpha }));
                }
            }
        }
        alpha *= 0.5;
    }
    Ok(None)
}

fn run(
    problem: &NlpProblem,
    options: &SolverOptions,
    callback: &mut IterationCallback<'_>,
) -> Result<BackendResult> {
    let start = Instant::now();
    let mut x = problem.x0.clone();
    let mut lam_g = problem.lam_g0.clone();
    let mut lam_x = problem.lam_x0.clone();
    let mut mu: f64 = 0.0;
    let mut iter = 0;

    debug!(nx = problem.nx(), ng = problem.ng(), "sqpmethod start");

    let (status, f, g) = loop {
        let f = problem.eval_f(&x)?;
        let g = problem.eval_g(&x)?;
        let grad = problem.grad_f(&x)?;
        let jac = problem.jac_g(&x)?;

        callback(&Iterate {
            iter,
            x: x.clone(),
            lam_g: lam_g.clone(),
            lam_x: lam_x.clone(),
            f,
        });

        let residuals = kkt(problem, &x, &g, &grad, &jac, &lam_g, &lam_x);
        log_iteration(options.verbose, iter, f, &residuals);
        if residuals.converged(options.tol, &grad) {
            break (SolveStatus::Optimal, f, g);
        }
        if iter >= options.max_iter {
            break (SolveStatus::MaxIterations, f, g);
        }
        let elapsed = start.elapsed().as_secs_f64();
        if elapsed >= options.time_limit {
            break (SolveStatus::TimeLimit, f, g);
        }

        let floor = residuals.stationarity.clamp(HESSIAN_FLOOR, 1.0);
        let h = regularize(problem.hess_l(&x, 1.0, &lam_g)?, floor);
        let qp = QuadraticProgram {
            h,
            q: grad.clone(),
            a: jac,
            lba: &problem.lbg - &g,
            uba: &problem.ubg - &g,
            lbd: &problem.lbx - &x,
            ubd: &problem.ubx - &x,
        };
        let settings = QpSettings::from_options(options, options.time_limit - elapsed);
        let QpSolution {
            status: qp_status,
            d,
            lam_a,
            lam_d,
            ..
        } = solve_qp(&qp, &settings)?;
        match qp_status {
            SolveStatus::Optimal => {}
            SolveStatus::Infeasible | SolveStatus::Unbounded => {
                warn!(iter, status = %qp_status, "qp subproblem failed");
                break (qp_status, f, g);
            }
            other => {
                warn!(iter, status = %other, "qp subproblem failed");
                break (SolveStatus::NumericalError, f, g);
            }
        }

        mu = mu.max(amax(&lam_a).max(amax(&lam_d)) * 1.1 + 1e-8);
        let theta = infeasibility(problem, &x, &g);
        let phi0 = f + mu * theta;
        let dphi = grad.dot(&d) - mu * theta;

        let step = line_search(problem, &qp, &settings, &x, &g, &d, phi0, dphi, mu)?;
        let alpha = match step {
            Some(Step { x: next, alpha }) => {
                x = next;
                alpha
            }
            None => {
                warn!(iter, "line search failed, taking the shortest step");
                x += &d * MIN_STEP;
                MIN_STEP
            }
        };
        lam_g += (lam_a - &lam_g) * alpha;
        lam_x += (lam_d - &lam_x) * alpha;
        iter += 1;
    };

    let return_status = match status {
        SolveStatus::Optimal => "Solve_Succeeded",
        SolveStatus::MaxIterations => "Maximum_Iterations_Exceeded",
        SolveStatus::TimeLimit => "Maximum_CpuTime_Exceeded",
        SolveStatus::Infeasible => "Infeasible_Problem_Detected",
        SolveStatus::Unbounded => "Search_Direction_Becomes_Too_Small",
        _ => "Error_In_Step_Computation",
    };
    let mut stats = SolverStats::new(status, iter, return_status);
    stats.solve_time = start.elapsed().as_secs_f64();
    debug!(iter, status = %status, f, "sqpmethod done");

    Ok(BackendResult {
        x,
        lam_g,
        lam_x,
        f,
        g,
        stats,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::{dot, sq};
    use crate::expr::{Expr, Shape, SymbolData, SymbolKind};
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

    fn problem(f: impl Fn(&Expr) -> Expr, g: impl Fn(&Expr) -> Vec<Expr>, lbg: Vec<f64>, ubg: Vec<f64>) -> NlpProblem {
        let (x, p, lam_f) = (sym("x", 2), sym("p", 0), sym("lam_f", 1));
        let xe = Expr::Symbol(x.clone());
        let rows = g(&xe);
        let lam_g = sym("lam_g", rows.len());
        let f = f(&xe);
        let g = crate::atoms::vertcat(&rows);
        let mut lagrangian = Expr::Symbol(lam_f.clone()).at(0) * &f;
        if !rows.is_empty() {
            lagrangian = lagrangian + dot(&Expr::Symbol(lam_g.clone()), &g);
        }
        let ng = rows.len();
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
            lbg: DVector::from_vec(lbg),
            ubg: DVector::from_vec(ubg),
            lam_g0: DVector::zeros(ng),
            lam_x0: DVector::zeros(2),
            discrete: vec![false; 2],
            x_scale: DVector::from_element(2, 1.0),
            x_offset: DVector::zeros(2),
            class: ProblemClass::Nlp,
            cache: FunctionCache::new(),
        }
    }

    fn rosenbrock(x: &Expr) -> Expr {
        sq(&(1.0 - x.at(0))) + 100.0 * sq(&(x.at(1) - sq(&x.at(0))))
    }

    #[test]
    fn test_unconstrained_rosenbrock() {
        let nlp = problem(rosenbrock, |_| vec![], vec![], vec![]);
        let res = run(&nlp, &SolverOptions::default(), &mut |_: &Iterate| {}).unwrap();
        assert_eq!(res.stats.status, SolveStatus::Optimal);
        assert_abs_diff_eq!(res.x[0], 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(res.x[1], 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_equality_constrained() {
        // min x0 + x1  s.t.  x0^2 + x1^2 == 2, started near the minimizer
        let mut nlp = problem(
            |x| x.at(0) + x.at(1),
            |x| vec![sq(&x.at(0)) + sq(&x.at(1))],
            vec![2.0],
            vec![2.0],
        );
        nlp.x0 = DVector::from_vec(vec![-0.5, -1.5]);
        let res = run(&nlp, &SolverOptions::default(), &mut |_: &Iterate| {}).unwrap();
        assert_eq!(res.stats.status, SolveStatus::Optimal);
        assert_abs_diff_eq!(res.x[0], -1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(res.x[1], -1.0, epsilon = 1e-6);
        // 1 + 2 lam x0 = 0
        assert_abs_diff_eq!(res.lam_g[0], 0.5, epsilon = 1e-6);
    }

    #[test]
    fn test_max_iterations_and_callback() {
        let nlp = problem(rosenbrock, |_| vec![], vec![], vec![]);
        let options = SolverOptions::default().with_max_iter(2);
        let mut seen = Vec::new();
        let res = run(&nlp, &options, &mut |it: &Iterate| seen.push(it.iter)).unwrap();
        assert_eq!(res.stats.status, SolveStatus::MaxIterations);
        assert_eq!(res.stats.iter_count, 2);
        assert_eq!(seen, vec![0, 1, 2]);
    }

    #[test]
    fn test_warm_start_at_optimum() {
        let mut nlp = problem(rosenbrock, |_| vec![], vec![], vec![]);
        nlp.x0 = DVector::from_vec(vec![1.0, 1.0]);
        let res = run(&nlp, &SolverOptions::default(), &mut |_: &Iterate| {}).unwrap();
        assert_eq!(res.stats.iter_count, 0);
    }

    #[test]
    fn test_infeasible_linearization() {
        // x0 >= 1 and x0 <= 0
        let nlp = problem(
            |x| sq(&x.at(0)) + sq(&x.at(1)),
            |x| vec![x.at(0), x.at(0)],
            vec![1.0, f64::NEG_INFINITY],
            vec![f64::INFINITY, 0.0],
        );
        let res = run(&nlp, &SolverOptions::default(), &mut |_: &Iterate| {}).unwrap();
        assert_eq!(res.stats.status, SolveStatus::Infeasible);
    }

    #[test]
    fn test_regularize_indefinite() {
        let h = DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 0.0, -3.0]);
        let r = regularize(h, 1e-8);
        assert_abs_diff_eq!(r[(1, 1)], 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(r[(0, 0)], 1.0, epsilon = 1e-12);

        let zero = regularize(DMatrix::zeros(2, 2), 0.5);
        assert_abs_diff_eq!(zero[(0, 0)], 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(zero[(0, 1)], 0.0, epsilon = 1e-12);
    }
}
