//! Solves packaged as functions.

use approx::assert_abs_diff_eq;
use nalgebra::DMatrix;
use optistack::prelude::*;

fn scalar(v: f64) -> DMatrix<f64> {
    DMatrix::from_element(1, 1, v)
}

/// min (x - p)^2 + (y - 2p)^2  s.t.  x + y >= 1
fn parametric() -> (Opti, Expr, Expr, Expr, Constraint) {
    let mut opti = Opti::new();
    let x = opti.variable(());
    let y = opti.variable(());
    let p = opti.parameter(());
    opti.minimize(sq(&(&x - &p)) + sq(&(&y - 2.0 * &p))).unwrap();
    let c = (&x + &y).geq(1.0);
    opti.subject_to(c.clone()).unwrap();
    opti.solver("sqpmethod", SolverOptions::default()).unwrap();
    (opti, x, y, p, c)
}

/// A function input and the outputs expected from it.
struct TestCase {
    name: &'static str,
    p: f64,
    x: f64,
    y: f64,
}

fn call_cases() -> Vec<TestCase> {
    vec![
        TestCase {
            name: "inactive",
            p: 3.0,
            x: 3.0,
            y: 6.0,
        },
        TestCase {
            name: "active",
            p: -1.0,
            x: 1.0,
            y: 0.0,
        },
        TestCase {
            name: "boundary",
            p: 1.0 / 3.0,
            x: 1.0 / 3.0,
            y: 2.0 / 3.0,
        },
    ]
}

#[test]
fn test_parametric_calls() {
    let (opti, x, y, p, _) = parametric();
    let f = opti.to_function("solver", &[p.clone()], &[x, y]).unwrap();
    assert_eq!(f.name(), "solver");
    assert_eq!((f.n_in(), f.n_out()), (1, 2));

    for case in call_cases() {
        let out = f.call(&[scalar(case.p)]).unwrap();
        assert!((out[0][(0, 0)] - case.x).abs() < 1e-5, "{}: x", case.name);
        assert!((out[1][(0, 0)] - case.y).abs() < 1e-5, "{}: y", case.name);
    }

    // calls run on a private copy
    assert!(matches!(
        opti.value(&p),
        Err(OptiError::UnsetParameter { .. })
    ));
    assert!(!opti.debug().is_solved());
}

#[test]
fn test_variable_and_dual_inputs() {
    let (opti, x, y, p, c) = parametric();
    let lam = opti.dual(&c).unwrap();
    let f = opti
        .to_function(
            "warm",
            &[p.clone(), veccat(&[x.clone(), y.clone()]), opti.lam_g()],
            &[x.clone(), lam.clone(), &x + &y],
        )
        .unwrap();
    let out = f
        .call(&[
            scalar(-1.0),
            DMatrix::from_column_slice(2, 1, &[1.0, 0.0]),
            scalar(4.0),
        ])
        .unwrap();
    assert_abs_diff_eq!(out[0][(0, 0)], 1.0, epsilon = 1e-5);
    // d/dx: 2(x + 1) = lam
    assert_abs_diff_eq!(out[1][(0, 0)], 4.0, epsilon = 1e-5);
    assert_abs_diff_eq!(out[2][(0, 0)], 1.0, epsilon = 1e-5);
}

#[test]
fn test_argument_checks() {
    let (mut opti, x, _, p, c) = parametric();
    let z = opti.variable(2);

    let err = opti
        .to_function("f", &[vertcat(&[x.clone(), constant(2.0)])], &[x.clone()])
        .unwrap_err();
    assert!(matches!(err, OptiError::ArbitraryArgument { index: 0 }));

    let err = opti
        .to_function("f", &[p.clone(), 2.0 * &p], &[x.clone()])
        .unwrap_err();
    assert!(matches!(err, OptiError::ArbitraryArgument { index: 1 }));

    let err = opti
        .to_function("f", &[z.clone(), z.at(0)], &[x.clone()])
        .unwrap_err();
    assert!(matches!(err, OptiError::NotIndependent { .. }));

    // disjoint slices are fine
    opti.to_function("f", &[z.at(0), z.at(1), p.clone()], &[x.clone()])
        .unwrap();

    let mut other = Opti::new();
    let w = other.variable(());
    let err = opti.to_function("f", &[w.clone()], &[x.clone()]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Scope);
    let err = opti.to_function("f", &[p.clone()], &[w]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Scope);

    // outputs must be part of the problem when the function is built
    let err = opti.to_function("f", &[p.clone()], &[z.at(1)]).unwrap_err();
    assert!(matches!(err, OptiError::NotInProblem { .. }));
    let lam = opti.dual(&c).unwrap();
    let mut cleared = opti.copy();
    cleared.clear_constraints();
    let err = cleared.to_function("f", &[p.clone()], &[lam]).unwrap_err();
    assert!(matches!(err, OptiError::DualNotRegistered { .. }));

    let f = opti.to_function("f", &[p], &[x]).unwrap();
    let err = f.call(&[]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Structural);
    assert!(f.to_string().contains("f:"));
}

#[test]
fn test_call_outcomes() {
    let mut opti = Opti::new();
    let x = opti.variable(());
    let y = opti.variable(());
    let p = opti.parameter(());
    opti.minimize(sq(&(1.0 - &x)) + 100.0 * sq(&(&y - sq(&x))))
        .unwrap();
    opti.subject_to(x.leq(&p)).unwrap();
    opti.solver("sqpmethod", SolverOptions::default().with_max_iter(1))
        .unwrap();
    let f = opti.to_function("limited", &[p.clone()], &[x.clone()]).unwrap();
    // iteration limits still produce outputs
    let out = f.call(&[scalar(5.0)]).unwrap();
    assert!(out[0][(0, 0)].is_finite());

    let mut infeasible = opti.copy();
    infeasible.subject_to(x.geq(&p + 1.0)).unwrap();
    infeasible.solver("sqpmethod", SolverOptions::default()).unwrap();
    let f = infeasible.to_function("bad", &[p], &[x]).unwrap();
    let err = f.call(&[scalar(0.0)]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SolverOutcome);
}
