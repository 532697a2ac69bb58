//! Branch-and-bound over integer-domain variables.
//!
//! Nodes are explored depth first. Each node solves the continuous
//! relaxation of its class (`sqpmethod` for nlp, `clarabel` for conic) with
//! tightened variable bounds, branches on the most fractional integer
//! variable, and is pruned when infeasible or no better than the incumbent.
//! Integrality is judged in user space, so scaled variables branch on
//! integer user values.

use std::time::Instant;

use nalgebra::DVector;
use tracing::{debug, trace};

use super::conic::ClarabelConic;
use super::sqp::SqpMethod;
use super::{
    Backend, BackendResult, IterationCallback, NlpProblem, ProblemClass, SolveStatus,
    SolverOptions, SolverStats,
};
use crate::error::Result;

/// The `bnb` backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct BranchAndBound;

/// Bounds of one node, in backend space.
#[derive(Debug, Clone)]
struct SearchNode {
    lbx: DVector<f64>,
    ubx: DVector<f64>,
    depth: usize,
}

/// Branching choice: element and its fractional user value.
#[derive(Debug, Clone, Copy)]
struct BranchDecision {
    index: usize,
    value: f64,
}

impl BranchAndBound {
    fn relaxation(class: ProblemClass) -> &'static dyn Backend {
        match class {
            ProblemClass::Nlp => &SqpMethod,
            ProblemClass::Conic => &ClarabelConic,
        }
    }

    /// Most fractional integer element of `x`, if any.
    fn select_branching(problem: &NlpProblem, x: &DVector<f64>, tol: f64) -> Option<BranchDecision> {
        let mut best: Option<(f64, BranchDecision)> = None;
        for k in (0..problem.nx()).filter(|&k| problem.discrete[k]) {
            let value = problem.user_value(x, k);
            let frac = value - value.floor();
            let distance = frac.min(1.0 - frac);
            if distance > tol && best.map_or(true, |(d, _)| distance > d) {
                best = Some((distance, BranchDecision { index: k, value }));
            }
        }
        best.map(|(_, decision)| decision)
    }

    /// Children of `node` for a decision: (down, up).
    fn branch(problem: &NlpProblem, node: &SearchNode, decision: BranchDecision) -> (SearchNode, SearchNode) {
        let k = decision.index;
        let (s, o) = (problem.x_scale[k], problem.x_offset[k]);
        let down_user = decision.value.floor();
        let up_user = decision.value.ceil();
        let mut down = SearchNode {
            depth: node.depth + 1,
            ..node.clone()
        };
        let mut up = down.clone();
        // x_user = o + s * x, so a negative scale swaps the bound sides.
        if s > 0.0 {
            down.ubx[k] = down.ubx[k].min((down_user - o) / s);
            up.lbx[k] = up.lbx[k].max((up_user - o) / s);
        } else {
            down.lbx[k] = down.lbx[k].max((down_user - o) / s);
            up.ubx[k] = up.ubx[k].min((up_user - o) / s);
        }
        (down, up)
    }
}

impl Backend for BranchAndBound {
    fn name(&self) -> &'static str {
        "bnb"
    }

    fn classes(&self) -> &'static [ProblemClass] {
        &[ProblemClass::Nlp, ProblemClass::Conic]
    }

    fn supports_discrete(&self) -> bool {
        true
    }

    fn solve(
        &self,
        problem: &NlpProblem,
        options: &SolverOptions,
        callback: &mut IterationCallback<'_>,
    ) -> Result<BackendResult> {
        let start = Instant::now();
        let relaxation = Self::relaxation(problem.class);
        let mut queue = vec![SearchNode {
            lbx: problem.lbx.clone(),
            ubx: problem.ubx.clone(),
            depth: 0,
        }];
        let mut incumbent: Option<BackendResult> = None;
        let mut nodes_explored = 0;
        let mut nodes_pruned = 0;
        let mut iterations = 0;
        let mut limit: Option<SolveStatus> = None;
        let mut relaxation_failure: Option<SolveStatus> = None;

        debug!(relaxation = relaxation.name(), nx = problem.nx(), "bnb start");

        while let Some(node) = queue.pop() {
            if nodes_explored >= options.max_nodes {
                limit = Some(SolveStatus::NodeLimit);
                break;
            }
            let elapsed = start.elapsed().as_secs_f64();
            if elapsed >= options.time_limit {
                limit = Some(SolveStatus::TimeLimit);
                break;
            }
            nodes_explored += 1;

            let mut sub = problem.clone();
            sub.x0 = problem.x0.zip_zip_map(&node.lbx, &node.ubx, |x, lo, hi| x.max(lo).min(hi));
            sub.lbx = node.lbx.clone();
            sub.ubx = node.ubx.clone();
            let node_options = SolverOptions {
                time_limit: options.time_limit - elapsed,
                ..options.clone()
            };
            let res = relaxation.solve(&sub, &node_options, callback)?;
            iterations += res.stats.iter_count;

            match res.stats.status {
                SolveStatus::Optimal => {}
                SolveStatus::Infeasible => {
                    trace!(depth = node.depth, "node infeasible");
                    nodes_pruned += 1;
                    continue;
                }
                other => {
                    trace!(depth = node.depth, status = %other, "node relaxation failed");
                    relaxation_failure.get_or_insert(other);
                    nodes_pruned += 1;
                    continue;
                }
            }

            if let Some(best) = &incumbent {
                if res.f >= best.f - 1e-9 * best.f.abs().max(1.0) {
                    nodes_pruned += 1;
                    continue;
                }
            }

            match Self::select_branching(problem, &res.x, options.integer_tol) {
                None => {
                    debug!(depth = node.depth, f = res.f, "new incumbent");
                    incumbent = Some(res);
                }
                Some(decision) => {
                    let (down, up) = Self::branch(problem, &node, decision);
                    // Explore the side nearer to the relaxed value first.
                    if decision.value - decision.value.floor() < 0.5 {
                        queue.push(up);
                        queue.push(down);
                    } else {
                        queue.push(down);
                        queue.push(up);
                    }
                }
            }
        }

        debug!(nodes_explored, nodes_pruned, "bnb done");

        let (status, mut result) = match incumbent {
            Some(best) => (limit.unwrap_or(SolveStatus::Optimal), best),
            None => {
                let status = limit
                    .or(relaxation_failure)
                    .unwrap_or(SolveStatus::Infeasible);
                let x = problem.x0.clone();
                let f = problem.eval_f(&x)?;
                let g = problem.eval_g(&x)?;
                let stats = SolverStats::new(status, 0, "");
                (
                    status,
                    BackendResult {
                        x,
                        lam_g: DVector::zeros(problem.ng()),
                        lam_x: DVector::zeros(problem.nx()),
                        f,
                        g,
                        stats,
                    },
                )
            }
        };
        let mut stats = SolverStats::new(status, iterations, status.to_string());
        stats.nodes = nodes_explored;
        stats.solve_time = start.elapsed().as_secs_f64();
        result.stats = stats;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::{dot, sq};
    use crate::expr::{Expr, Shape, SymbolData, SymbolKind};
    use crate::solver::{FunctionCache, Iterate};
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

    // min (x0 - 1.4)^2 + (x1 - 2.6)^2  s.t.  x0 + x1 <= 3.5, both integer
    fn problem(class: ProblemClass) -> NlpProblem {
        let (x, p, lam_f, lam_g) = (sym("x", 2), sym("p", 0), sym("lam_f", 1), sym("lam_g", 1));
        let xe = Expr::Symbol(x.clone());
        let f = sq(&(xe.at(0) - 1.4)) + sq(&(xe.at(1) - 2.6));
        let g = xe.at(0) + xe.at(1);
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
            lbx: DVector::from_element(2, -10.0),
            ubx: DVector::from_element(2, 10.0),
            lbg: DVector::from_vec(vec![f64::NEG_INFINITY]),
            ubg: DVector::from_vec(vec![3.5]),
            lam_g0: DVector::zeros(1),
            lam_x0: DVector::zeros(2),
            discrete: vec![true, true],
            x_scale: DVector::from_element(2, 1.0),
            x_offset: DVector::zeros(2),
            class,
            cache: FunctionCache::new(),
        }
    }

    #[test]
    fn test_integer_qp() {
        for class in [ProblemClass::Conic, ProblemClass::Nlp] {
            let nlp = problem(class);
            let res = BranchAndBound
                .solve(&nlp, &SolverOptions::default(), &mut |_: &Iterate| {})
                .unwrap();
            assert_eq!(res.stats.status, SolveStatus::Optimal);
            assert_abs_diff_eq!(res.x[0], 1.0, epsilon = 1e-6);
            assert_abs_diff_eq!(res.x[1], 2.0, epsilon = 1e-6);
            assert!(res.stats.nodes >= 1);
        }
    }

    #[test]
    fn test_node_limit() {
        let nlp = problem(ProblemClass::Conic);
        let options = SolverOptions::default().with_max_nodes(1);
        let res = BranchAndBound
            .solve(&nlp, &options, &mut |_: &Iterate| {})
            .unwrap();
        assert_eq!(res.stats.status, SolveStatus::NodeLimit);
        assert_eq!(res.stats.nodes, 1);
    }

    #[test]
    fn test_branching_respects_scale() {
        let mut nlp = problem(ProblemClass::Conic);
        nlp.x_scale = DVector::from_vec(vec![-2.0, 1.0]);
        nlp.x_offset = DVector::from_vec(vec![1.0, 0.0]);
        // x0 = 0.3 is user value 1 - 0.6 = 0.4
        let decision =
            BranchAndBound::select_branching(&nlp, &DVector::from_vec(vec![0.3, 2.0]), 1e-6).unwrap();
        assert_eq!(decision.index, 0);
        let node = SearchNode {
            lbx: nlp.lbx.clone(),
            ubx: nlp.ubx.clone(),
            depth: 0,
        };
        let (down, up) = BranchAndBound::branch(&nlp, &node, decision);
        // user <= 0  <=>  x >= 0.5 ; user >= 1  <=>  x <= 0
        assert_abs_diff_eq!(down.lbx[0], 0.5);
        assert_abs_diff_eq!(up.ubx[0], 0.0);
    }
}
