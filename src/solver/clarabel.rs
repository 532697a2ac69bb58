//! Clarabel solver integration.
//!
//! Every backend reduces its work to quadratic programs of the form
//!
//! ```text
//! minimize    ½ dᵀ H d + qᵀ d
//! subject to  lba <= A d <= uba
//!             lbd <= d <= ubd
//! ```
//!
//! which are stuffed into Clarabel's `A d + s = b, s ∈ K` with a zero cone
//! for equal bounds and a nonnegative cone for each finite one-sided bound.
//! Multipliers are returned with the sign convention of the Lagrangian
//! `½ dᵀ H d + qᵀ d + λᵀ A d`: positive when an upper bound is active,
//! negative for an active lower bound.

use clarabel::algebra::CscMatrix as ClarabelCsc;
use clarabel::solver::{DefaultSettingsBuilder, DefaultSolver, IPSolver, SolverStatus, SupportedConeT};
use nalgebra::{DMatrix, DVector};
use tracing::trace;

use super::{SolveStatus, SolverOptions};
use crate::error::{OptiError, Result};
use crate::sparse::{csc_from_triplets, dense_upper_to_csc};

impl From<SolverStatus> for SolveStatus {
    fn from(status: SolverStatus) -> Self {
        match status {
            SolverStatus::Solved | SolverStatus::AlmostSolved => SolveStatus::Optimal,
            SolverStatus::PrimalInfeasible | SolverStatus::AlmostPrimalInfeasible => {
                SolveStatus::Infeasible
            }
            SolverStatus::DualInfeasible | SolverStatus::AlmostDualInfeasible => {
                SolveStatus::Unbounded
            }
            SolverStatus::MaxIterations => SolveStatus::MaxIterations,
            SolverStatus::MaxTime => SolveStatus::TimeLimit,
            _ => SolveStatus::NumericalError,
        }
    }
}

/// A bounded quadratic program.
#[derive(Debug, Clone)]
pub struct QuadraticProgram {
    /// Symmetric cost matrix.
    pub h: DMatrix<f64>,
    pub q: DVector<f64>,
    /// Constraint matrix.
    pub a: DMatrix<f64>,
    pub lba: DVector<f64>,
    pub uba: DVector<f64>,
    pub lbd: DVector<f64>,
    pub ubd: DVector<f64>,
}

/// QP solver settings.
#[derive(Debug, Clone)]
pub struct QpSettings {
    /// Print solver output.
    pub verbose: bool,
    /// Maximum iterations.
    pub max_iter: u32,
    /// Time limit in seconds.
    pub time_limit: f64,
    /// Gap and feasibility tolerance.
    pub tol: f64,
}

impl Default for QpSettings {
    fn default() -> Self {
        QpSettings {
            verbose: false,
            max_iter: 200,
            time_limit: f64::INFINITY,
            tol: 1e-10,
        }
    }
}

impl QpSettings {
    /// Settings for QP subproblems of a backend run.
    pub fn from_options(options: &SolverOptions, time_left: f64) -> Self {
        QpSettings {
            tol: options.qp_tol,
            time_limit: time_left.max(1e-3),
            ..QpSettings::default()
        }
    }
}

/// Solution of a QP.
#[derive(Debug, Clone)]
pub struct QpSolution {
    /// Solution status.
    pub status: SolveStatus,
    /// Primal solution.
    pub d: DVector<f64>,
    /// Multipliers of `A d`.
    pub lam_a: DVector<f64>,
    /// Multipliers of the bounds on `d`.
    pub lam_d: DVector<f64>,
    /// Optimal value.
    pub objective: f64,
    /// Number of iterations.
    pub iterations: u32,
    /// Solve time in seconds.
    pub solve_time: f64,
}

#[derive(Debug, Clone, Copy)]
enum RowOf {
    Constraint(usize),
    Bound(usize),
    Padding,
}

/// One row `sign * (row of A or I) d + s = rhs`.
#[derive(Debug, Clone, Copy)]
struct Row {
    of: RowOf,
    sign: f64,
    rhs: f64,
}

/// Sort bound pairs into zero-cone and nonnegative-cone rows.
///
/// Returns `None` if some pair can never be satisfied.
fn stuff_rows(qp: &QuadraticProgram) -> Option<(Vec<Row>, Vec<Row>)> {
    let mut zero = Vec::new();
    let mut nonneg = Vec::new();
    let pairs = (0..qp.lba.len())
        .map(|i| (RowOf::Constraint(i), qp.lba[i], qp.uba[i]))
        .chain((0..qp.lbd.len()).map(|i| (RowOf::Bound(i), qp.lbd[i], qp.ubd[i])));
    for (of, lo, hi) in pairs {
        if lo > hi || lo == f64::INFINITY || hi == f64::NEG_INFINITY || lo.is_nan() || hi.is_nan() {
            return None;
        }
        if lo == hi {
            zero.push(Row { of, sign: 1.0, rhs: hi });
            continue;
        }
        if hi.is_finite() {
            nonneg.push(Row { of, sign: 1.0, rhs: hi });
        }
        if lo.is_finite() {
            nonneg.push(Row { of, sign: -1.0, rhs: -lo });
        }
    }
    if zero.is_empty() && nonneg.is_empty() {
        nonneg.push(Row {
            of: RowOf::Padding,
            sign: 1.0,
            rhs: 1.0,
        });
    }
    Some((zero, nonneg))
}

/// Solve a QP with Clarabel.
pub fn solve_qp(qp: &QuadraticProgram, settings: &QpSettings) -> Result<QpSolution> {
    let n = qp.q.len();
    let (m_a, m_d) = (qp.lba.len(), qp.lbd.len());

    let Some((zero, nonneg)) = stuff_rows(qp) else {
        return Ok(QpSolution {
            status: SolveStatus::Infeasible,
            d: DVector::zeros(n),
            lam_a: DVector::zeros(m_a),
            lam_d: DVector::zeros(m_d),
            objective: f64::NAN,
            iterations: 0,
            solve_time: 0.0,
        });
    };
    let rows: Vec<Row> = zero.iter().chain(nonneg.iter()).copied().collect();

    let (mut ri, mut ci, mut vals) = (Vec::new(), Vec::new(), Vec::new());
    let mut b = Vec::with_capacity(rows.len());
    for (r, row) in rows.iter().enumerate() {
        match row.of {
            RowOf::Constraint(i) => {
                for j in 0..n {
                    let v = qp.a[(i, j)];
                    if v != 0.0 {
                        ri.push(r);
                        ci.push(j);
                        vals.push(row.sign * v);
                    }
                }
            }
            RowOf::Bound(i) => {
                ri.push(r);
                ci.push(i);
                vals.push(row.sign);
            }
            RowOf::Padding => {}
        }
        b.push(row.rhs);
    }
    let a = to_clarabel_csc(&csc_from_triplets(rows.len(), n, ri, ci, vals));
    let p = to_clarabel_csc(&dense_upper_to_csc(&qp.h));
    let q: Vec<f64> = qp.q.iter().copied().collect();

    let mut cones = Vec::new();
    if !zero.is_empty() {
        cones.push(SupportedConeT::ZeroConeT(zero.len()));
    }
    if !nonneg.is_empty() {
        cones.push(SupportedConeT::NonnegativeConeT(nonneg.len()));
    }

    let clarabel_settings = DefaultSettingsBuilder::default()
        .verbose(settings.verbose)
        .max_iter(settings.max_iter)
        .time_limit(settings.time_limit)
        .tol_gap_abs(settings.tol)
        .tol_gap_rel(settings.tol)
        .tol_feas(settings.tol)
        .build()
        .map_err(|e| OptiError::NumericalError(format!("invalid QP settings: {}", e)))?;

    let mut solver = DefaultSolver::new(&p, &q, &a, &b, &cones, clarabel_settings);
    solver.solve();

    let status: SolveStatus = solver.solution.status.into();
    let d = DVector::from_column_slice(&solver.solution.x);
    let mut lam_a = DVector::zeros(m_a);
    let mut lam_d = DVector::zeros(m_d);
    for (row, &z) in rows.iter().zip(solver.solution.z.iter()) {
        match row.of {
            RowOf::Constraint(i) => lam_a[i] += row.sign * z,
            RowOf::Bound(i) => lam_d[i] += row.sign * z,
            RowOf::Padding => {}
        }
    }
    let objective = compute_objective(&d, &qp.h, &qp.q);

    trace!(
        n,
        rows = rows.len(),
        status = %status,
        iterations = solver.info.iterations,
        "qp solved"
    );

    Ok(QpSolution {
        status,
        d,
        lam_a,
        lam_d,
        objective,
        iterations: solver.info.iterations,
        solve_time: solver.solution.solve_time,
    })
}

/// Convert nalgebra CSC to Clarabel CSC.
fn to_clarabel_csc(m: &nalgebra_sparse::CscMatrix<f64>) -> ClarabelCsc<f64> {
    ClarabelCsc::new(
        m.nrows(),
        m.ncols(),
        m.col_offsets().to_vec(),
        m.row_indices().to_vec(),
        m.values().to_vec(),
    )
}

/// Compute objective value: (1/2) d' H d + q' d.
fn compute_objective(d: &DVector<f64>, h: &DMatrix<f64>, q: &DVector<f64>) -> f64 {
    0.5 * (h * d).dot(d) + q.dot(d)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn unconstrained(n: usize) -> (DVector<f64>, DVector<f64>) {
        (
            DVector::from_element(n, f64::NEG_INFINITY),
            DVector::from_element(n, f64::INFINITY),
        )
    }

    #[test]
    fn test_default_settings() {
        let settings = QpSettings::default();
        assert!(!settings.verbose);
        assert_eq!(settings.max_iter, 200);
    }

    #[test]
    fn test_box_constrained_qp() {
        // min (d0 - 2)^2 + (d1 + 1)^2  s.t.  0 <= d <= 1
        let qp = QuadraticProgram {
            h: DMatrix::identity(2, 2) * 2.0,
            q: DVector::from_vec(vec![-4.0, 2.0]),
            a: DMatrix::zeros(0, 2),
            lba: DVector::zeros(0),
            uba: DVector::zeros(0),
            lbd: DVector::zeros(2),
            ubd: DVector::from_element(2, 1.0),
        };
        let sol = solve_qp(&qp, &QpSettings::default()).unwrap();
        assert_eq!(sol.status, SolveStatus::Optimal);
        assert_abs_diff_eq!(sol.d[0], 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(sol.d[1], 0.0, epsilon = 1e-6);
        // upper bound active: positive; lower bound active: negative
        assert_abs_diff_eq!(sol.lam_d[0], 2.0, epsilon = 1e-5);
        assert_abs_diff_eq!(sol.lam_d[1], -2.0, epsilon = 1e-5);
    }

    #[test]
    fn test_equality_row() {
        // min d0^2 + d1^2  s.t.  d0 + d1 == 2
        let (lbd, ubd) = unconstrained(2);
        let qp = QuadraticProgram {
            h: DMatrix::identity(2, 2) * 2.0,
            q: DVector::zeros(2),
            a: DMatrix::from_row_slice(1, 2, &[1.0, 1.0]),
            lba: DVector::from_vec(vec![2.0]),
            uba: DVector::from_vec(vec![2.0]),
            lbd,
            ubd,
        };
        let sol = solve_qp(&qp, &QpSettings::default()).unwrap();
        assert_eq!(sol.status, SolveStatus::Optimal);
        assert_abs_diff_eq!(sol.d[0], 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(sol.lam_a[0], -2.0, epsilon = 1e-5);
        assert_abs_diff_eq!(sol.objective, 2.0, epsilon = 1e-6);
    }

    #[test]
    fn test_crossed_bounds_are_infeasible() {
        let qp = QuadraticProgram {
            h: DMatrix::zeros(1, 1),
            q: DVector::zeros(1),
            a: DMatrix::zeros(0, 1),
            lba: DVector::zeros(0),
            uba: DVector::zeros(0),
            lbd: DVector::from_vec(vec![1.0]),
            ubd: DVector::from_vec(vec![0.0]),
        };
        let sol = solve_qp(&qp, &QpSettings::default()).unwrap();
        assert_eq!(sol.status, SolveStatus::Infeasible);
    }

    #[test]
    fn test_unbounded_lp() {
        let (lbd, ubd) = unconstrained(1);
        let qp = QuadraticProgram {
            h: DMatrix::zeros(1, 1),
            q: DVector::from_vec(vec![1.0]),
            a: DMatrix::zeros(0, 1),
            lba: DVector::zeros(0),
            uba: DVector::zeros(0),
            lbd,
            ubd,
        };
        let sol = solve_qp(&qp, &QpSettings::default()).unwrap();
        assert_eq!(sol.status, SolveStatus::Unbounded);
    }
}
