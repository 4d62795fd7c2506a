//! Per-operator derivative checks: every elementary operator against a
//! central finite difference, through the full model/tape path.

mod common;

use approx::assert_relative_eq;
use common::finite_diff;
use tapir::{Expr, Model, RowId, SparseVec, VarType};

/// Wrap a single-row expression over `n` variables into a model.
fn model_of(expr: Expr, n: usize) -> Model {
    let mut model = Model::new();
    for i in 0..n {
        model
            .add_variable(i, format!("x{i}"), -100.0, 100.0, VarType::Continuous)
            .unwrap();
    }
    model
        .add_objective(0, "f", false, 0.0, 1.0, SparseVec::default())
        .unwrap();
    model.set_nonlinear_expression(RowId::Objective(0), expr).unwrap();
    model.initialize_for_differentiation().unwrap();
    model
}

fn check_gradient(expr: Expr, x: &[f64], tol: f64) {
    let mut model = model_of(expr.clone(), x.len());
    let grad = model.calculate_objective_function_gradient(x, 0, true).unwrap();

    let mut f = |p: &[f64]| expr.evaluate(p);
    for j in 0..x.len() {
        let fd = finite_diff(&mut f, x, j);
        assert_relative_eq!(grad[j], fd, max_relative = tol, epsilon = tol);
    }
}

fn unary(build: fn(Box<Expr>) -> Expr) -> Expr {
    build(Box::new(Expr::variable(0)))
}

#[test]
fn unary_operators() {
    check_gradient(unary(Expr::Negate), &[1.7], 1e-6);
    check_gradient(unary(Expr::Abs), &[-2.5], 1e-6);
    check_gradient(unary(Expr::Square), &[3.0], 1e-6);
    check_gradient(unary(Expr::Sqrt), &[4.2], 1e-6);
    check_gradient(unary(Expr::Ln), &[2.3], 1e-6);
    check_gradient(unary(Expr::Exp), &[0.8], 1e-6);
    check_gradient(unary(Expr::Erf), &[0.4], 1e-6);
    check_gradient(unary(Expr::Sin), &[1.1], 1e-6);
    check_gradient(unary(Expr::Cos), &[0.3], 1e-6);
}

#[test]
fn binary_operators() {
    let xy = |f: fn(Box<Expr>, Box<Expr>) -> Expr| {
        f(Box::new(Expr::variable(0)), Box::new(Expr::variable(1)))
    };
    check_gradient(xy(Expr::Plus), &[1.0, 2.0], 1e-6);
    check_gradient(xy(Expr::Minus), &[3.0, 5.0], 1e-6);
    check_gradient(xy(Expr::Times), &[1.5, -2.0], 1e-6);
    check_gradient(xy(Expr::Divide), &[3.0, 1.7], 1e-6);
    // Power needs a positive base for the general a^b rule.
    check_gradient(xy(Expr::Power), &[2.2, 1.3], 1e-5);
}

#[test]
fn nary_operators() {
    let terms = vec![
        Expr::variable(0),
        Expr::Times(Box::new(Expr::variable(1)), Box::new(Expr::variable(2))),
        Expr::Number(0.5),
    ];
    check_gradient(Expr::Sum(terms.clone()), &[1.0, 2.0, 3.0], 1e-6);
    check_gradient(Expr::Product(terms.clone()), &[1.2, 0.7, 2.0], 1e-6);
    // Away from ties, min/max differentiate as the active branch.
    check_gradient(Expr::Min(terms.clone()), &[4.0, 1.0, 2.0], 1e-6);
    check_gradient(Expr::Max(terms), &[4.0, 1.0, 2.0], 1e-6);
}

#[test]
fn constants_have_zero_derivative() {
    let expr = Expr::Times(
        Box::new(Expr::Plus(Box::new(Expr::Pi), Box::new(Expr::E))),
        Box::new(Expr::variable(0)),
    );
    let mut model = model_of(expr, 1);
    let grad = model
        .calculate_objective_function_gradient(&[2.0], 0, true)
        .unwrap();
    assert_relative_eq!(
        grad[0],
        std::f64::consts::PI + std::f64::consts::E,
        max_relative = 1e-12
    );
}

#[test]
fn composed_expression_second_derivatives() {
    // f = sin(x0)·exp(x1) + sqrt(x0·x1)
    let expr = Expr::Plus(
        Box::new(Expr::Times(
            Box::new(Expr::Sin(Box::new(Expr::variable(0)))),
            Box::new(Expr::Exp(Box::new(Expr::variable(1)))),
        )),
        Box::new(Expr::Sqrt(Box::new(Expr::Times(
            Box::new(Expr::variable(0)),
            Box::new(Expr::variable(1)),
        )))),
    );
    let x = [0.9, 1.4];
    let mut model = model_of(expr.clone(), 2);
    let hess = model
        .calculate_lagrangian_hessian(&x, &[1.0], &[], true, 2)
        .unwrap();

    let mut f = |p: &[f64]| expr.evaluate(p);
    for i in 0..2 {
        for j in i..2 {
            let fd = common::finite_diff2(&mut f, &x, i, j);
            assert_relative_eq!(hess.get(i, j), fd, max_relative = 1e-4, epsilon = 1e-6);
        }
    }
}

#[test]
fn erf_derivative_shape() {
    // d/dx erf(x) = 2/√π · exp(−x²)
    let expr = unary(Expr::Erf);
    let mut model = model_of(expr, 1);
    for &x in &[-1.5, 0.0, 0.7, 2.0] {
        let grad = model.calculate_objective_function_gradient(&[x], 0, true).unwrap();
        let expected = std::f64::consts::FRAC_2_SQRT_PI * (-x * x).exp();
        assert_relative_eq!(grad[0], expected, max_relative = 1e-12);
    }
}
