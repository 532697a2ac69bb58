//! Backend solve tests.
//!
//! Define test cases as data, then run them programmatically on every
//! backend that accepts their problem class.

use approx::assert_abs_diff_eq;
use optistack::prelude::*;

/// Tolerance for comparing floating point results
const TOL: f64 = 1e-5;

/// A test case definition
struct TestCase {
    name: &'static str,
    /// Builds the instance and returns (opti, expected objective)
    build: fn() -> (Opti, f64),
}

/// Problems with a quadratic objective and affine constraints.
fn conic_test_cases() -> Vec<TestCase> {
    vec![
        TestCase {
            name: "projection_onto_halfspace",
            build: || {
                // minimize x^2 + y^2 s.t. x + y >= 1
                // optimal: x = y = 1/2, value = 1/2
                let mut opti = Opti::conic();
                let x = opti.variable(());
                let y = opti.variable(());
                opti.minimize(sq(&x) + sq(&y)).unwrap();
                opti.subject_to((&x + &y).geq(1.0)).unwrap();
                (opti, 0.5)
            },
        },
        TestCase {
            name: "box_constrained_lp",
            build: || {
                // minimize -x0 - 2 x1 s.t. 0 <= x <= 1, x0 + x1 <= 1.5
                // optimal: x = [0.5, 1], value = -2.5
                let mut opti = Opti::conic();
                let x = opti.variable(2);
                opti.minimize(-1.0 * x.at(0) - 2.0 * x.at(1)).unwrap();
                opti.subject_to(Opti::bounded(0.0, x.clone(), 1.0)).unwrap();
                opti.subject_to((x.at(0) + x.at(1)).leq(1.5)).unwrap();
                (opti, -2.5)
            },
        },
        TestCase {
            name: "equality_constrained_qp",
            build: || {
                // minimize ||x - [1, 2, 3]||^2 s.t. sum(x) == 0
                // optimal: x = [-1, 0, 1], value = 12
                let mut opti = Opti::conic();
                let x = opti.variable(3);
                let target = constant_vec(vec![1.0, 2.0, 3.0]);
                opti.minimize(sumsqr(&(&x - &target))).unwrap();
                opti.subject_to(sum(&x).equals(0.0)).unwrap();
                (opti, 12.0)
            },
        },
        TestCase {
            name: "parametric_bound",
            build: || {
                // minimize (x - 4)^2 s.t. x <= p, p = 1
                // optimal: x = 1, value = 9
                let mut opti = Opti::conic();
                let x = opti.variable(());
                let p = opti.parameter(());
                opti.minimize(sq(&(&x - 4.0))).unwrap();
                opti.subject_to(x.leq(&p)).unwrap();
                opti.set_value(&p, 1.0).unwrap();
                (opti, 9.0)
            },
        },
    ]
}

/// General nonlinear problems.
fn nlp_test_cases() -> Vec<TestCase> {
    vec![
        TestCase {
            name: "rosenbrock",
            build: || {
                // minimize (1 - x)^2 + 100 (y - x^2)^2
                // optimal: x = y = 1, value = 0
                let mut opti = Opti::new();
                let x = opti.variable(());
                let y = opti.variable(());
                opti.minimize(sq(&(1.0 - &x)) + 100.0 * sq(&(&y - sq(&x))))
                    .unwrap();
                (opti, 0.0)
            },
        },
        TestCase {
            name: "circle_constraint",
            build: || {
                // minimize x + y s.t. x^2 + y^2 <= 2
                // optimal: x = y = -1, value = -2
                let mut opti = Opti::new();
                let x = opti.variable(2);
                opti.minimize(sum(&x)).unwrap();
                opti.subject_to(sumsqr(&x).leq(2.0)).unwrap();
                opti.set_initial(&x, vec![0.5, -0.5]).unwrap();
                (opti, -2.0)
            },
        },
        TestCase {
            name: "exp_with_equality",
            build: || {
                // minimize exp(x) + exp(y) s.t. x + y == 0
                // optimal: x = y = 0, value = 2
                let mut opti = Opti::new();
                let x = opti.variable(());
                let y = opti.variable(());
                opti.minimize(exp(&x) + exp(&y)).unwrap();
                opti.subject_to((&x + &y).equals(0.0)).unwrap();
                opti.set_initial(&x, 1.0).unwrap();
                (opti, 2.0)
            },
        },
        TestCase {
            name: "log_barrier_like",
            build: || {
                // minimize x - log(x) s.t. x >= 0.1
                // optimal: x = 1, value = 1
                let mut opti = Opti::new();
                let x = opti.variable(());
                opti.minimize(&x - log(&x)).unwrap();
                opti.subject_to(x.geq(0.1)).unwrap();
                opti.set_initial(&x, 2.0).unwrap();
                (opti, 1.0)
            },
        },
    ]
}

fn run(case: &TestCase, solver: &str, detect: bool) {
    let (mut opti, expected) = (case.build)();
    opti.solver(
        solver,
        SolverOptions::default().with_detect_simple_bounds(detect),
    )
    .unwrap_or_else(|e| panic!("{} on {}: {}", case.name, solver, e));
    let sol = opti
        .solve()
        .unwrap_or_else(|e| panic!("{} on {}: {}", case.name, solver, e));
    let value = sol.value_scalar(&opti.f()).unwrap();
    assert!(
        (value - expected).abs() < TOL,
        "{} on {} (detect = {}): got {}, expected {}",
        case.name,
        solver,
        detect,
        value,
        expected
    );
    assert!(sol.stats().success);
}

#[test]
fn test_conic_cases() {
    for case in conic_test_cases() {
        for solver in ["clarabel", "bnb"] {
            run(&case, solver, false);
            run(&case, solver, true);
        }
    }
}

#[test]
fn test_nlp_cases() {
    for case in nlp_test_cases() {
        for solver in ["sqpmethod", "bnb"] {
            run(&case, solver, false);
        }
        run(&case, "sqpmethod", true);
    }
}

#[test]
fn test_conic_duals_match_sqp() {
    let duals = |conic: bool| {
        let mut opti = if conic { Opti::conic() } else { Opti::new() };
        let x = opti.variable(());
        let y = opti.variable(());
        opti.minimize(sq(&x) + sq(&y)).unwrap();
        let c = (&x + &y).geq(1.0);
        let b = x.leq(0.25);
        opti.subject_to_all([c.clone(), b.clone()]).unwrap();
        let name = if conic { "clarabel" } else { "sqpmethod" };
        opti.solver(name, SolverOptions::default().with_detect_simple_bounds(true))
            .unwrap();
        let sol = opti.solve().unwrap();
        (
            sol.value_scalar(&opti.dual(&c).unwrap()).unwrap(),
            sol.value_scalar(&opti.dual(&b).unwrap()).unwrap(),
        )
    };
    // x = 1/4, y = 3/4: 2y = lam_c, 2x - lam_c + lam_b = 0
    let (lc, lb) = duals(true);
    assert_abs_diff_eq!(lc, 1.5, epsilon = TOL);
    assert_abs_diff_eq!(lb, 1.0, epsilon = TOL);
    let (lc2, lb2) = duals(false);
    assert_abs_diff_eq!(lc, lc2, epsilon = TOL);
    assert_abs_diff_eq!(lb, lb2, epsilon = TOL);
}

#[test]
fn test_solver_selection() {
    let mut nlp = Opti::new();
    let err = nlp.solver("ipopt", SolverOptions::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Capability);
    let err = nlp.solver("clarabel", SolverOptions::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Capability);
    let err = nlp
        .solver("sqpmethod", SolverOptions::default().with_max_iter(0))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Capability);
    let err = nlp
        .solver("sqpmethod", SolverOptions::default().with_tol(-1.0))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Capability);

    let mut conic = Opti::conic();
    let err = conic.solver("sqpmethod", SolverOptions::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Capability);
    conic.solver("bnb", SolverOptions::default()).unwrap();

    assert_eq!(Opti::with_class("foo").unwrap_err().kind(), ErrorKind::Capability);
    assert!(Opti::with_class("conic").is_ok());

    let mut empty = Opti::new();
    assert!(matches!(empty.solve(), Err(OptiError::NoSolver)));
    empty.solver("sqpmethod", SolverOptions::default()).unwrap();
    assert_eq!(empty.solve().unwrap_err().kind(), ErrorKind::Structural);
}

#[test]
fn test_conic_rejects_nonlinear() {
    let mut opti = Opti::conic();
    let x = opti.variable(());
    opti.minimize(exp(&x)).unwrap();
    opti.solver("clarabel", SolverOptions::default()).unwrap();
    assert_eq!(opti.solve().unwrap_err().kind(), ErrorKind::Capability);

    let mut opti = Opti::conic();
    let x = opti.variable(());
    opti.minimize(sq(&x)).unwrap();
    opti.subject_to(sq(&x).leq(1.0)).unwrap();
    opti.solver("clarabel", SolverOptions::default()).unwrap();
    assert_eq!(opti.solve().unwrap_err().kind(), ErrorKind::Capability);
}

#[test]
fn test_node_limit() {
    let mut opti = Opti::conic();
    let x = opti.variable(2);
    opti.minimize(sq(&(&x.at(0) - 0.5)) + sq(&(&x.at(1) - 0.5)))
        .unwrap();
    opti.set_domain(&x, Domain::Integer).unwrap();
    opti.solver("bnb", SolverOptions::default().with_max_nodes(1))
        .unwrap();
    assert_eq!(opti.solve().unwrap_err().status(), Some(SolveStatus::NodeLimit));
    let sol = opti.solve_limited().unwrap();
    assert_eq!(sol.stats().status, SolveStatus::NodeLimit);
    assert_eq!(sol.stats().nodes, 1);
}

#[test]
fn test_integer_with_scaling() {
    // scaled integer variable: branching happens on the user value
    let mut opti = Opti::conic();
    let n = opti.variable(());
    opti.minimize(sq(&(&n - 7.3))).unwrap();
    opti.set_domain(&n, Domain::Integer).unwrap();
    opti.set_linear_scale(&n, 10.0, 1.0).unwrap();
    opti.solver("bnb", SolverOptions::default()).unwrap();
    let sol = opti.solve().unwrap();
    assert_abs_diff_eq!(sol.value_scalar(&n).unwrap(), 7.0, epsilon = 1e-6);
}
