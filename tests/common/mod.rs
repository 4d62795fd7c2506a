//! Shared fixtures: the worked four-variable Lagrangian model and
//! finite-difference helpers.
#![allow(dead_code)]

use tapir::{Expr, MajorOrder, Model, RowId, SparseVec, VarType};

/// The reference problem:
///
/// ```text
/// min  x0² + 9·x1
/// s.t. 33 − 105 + 1.37·x1 + 2·x3 + 5·x1 ≤ 10
///      ln(x0·x3) + 7·x2 ≥ 10
/// ```
///
/// `33` is the first constraint's constant term; `−105 + 1.37·x1 + 2·x3`
/// lives in its nonlinear expression and `5·x1` in the linear coefficients.
/// The objective's `x0²` and the second constraint's `ln(x0·x3)` are
/// nonlinear; `9·x1` and `7·x2` are linear coefficients. The nonlinear
/// variables are therefore {x0, x1, x3}, with x2 appearing only linearly.
pub fn lag_example() -> Model {
    let mut model = Model::new();
    for (i, name) in ["x0", "x1", "x2", "x3"].iter().enumerate() {
        model
            .add_variable(i, *name, f64::NEG_INFINITY, f64::INFINITY, VarType::Continuous)
            .unwrap();
    }
    model
        .add_objective(
            0,
            "minCost",
            false,
            0.0,
            1.0,
            SparseVec::from_pairs([(1, 9.0)]),
        )
        .unwrap();
    model
        .add_constraint(0, "row0", f64::NEG_INFINITY, 10.0, 33.0)
        .unwrap();
    model.add_constraint(1, "row1", 10.0, f64::INFINITY, 0.0).unwrap();
    model
        .set_linear_coefficients(
            MajorOrder::RowMajor,
            vec![0, 1, 2],
            vec![1, 2],
            vec![5.0, 7.0],
        )
        .unwrap();

    model
        .set_nonlinear_expression(
            RowId::Objective(0),
            Expr::Square(Box::new(Expr::variable(0))),
        )
        .unwrap();
    model
        .set_nonlinear_expression(
            RowId::Constraint(0),
            Expr::Plus(
                Box::new(Expr::Plus(
                    Box::new(Expr::Number(-105.0)),
                    Box::new(Expr::Variable { idx: 1, coef: 1.37 }),
                )),
                Box::new(Expr::Variable { idx: 3, coef: 2.0 }),
            ),
        )
        .unwrap();
    model
        .set_nonlinear_expression(
            RowId::Constraint(1),
            Expr::Ln(Box::new(Expr::Times(
                Box::new(Expr::variable(0)),
                Box::new(Expr::variable(3)),
            ))),
        )
        .unwrap();
    model
}

/// The reference evaluation point.
pub fn lag_point() -> Vec<f64> {
    vec![1.0, 5.0, 10.0, 5.0]
}

/// Central finite difference of `f` in coordinate `j` at `x`.
pub fn finite_diff(f: &mut dyn FnMut(&[f64]) -> f64, x: &[f64], j: usize) -> f64 {
    let h = 1e-6 * x[j].abs().max(1.0);
    let mut xp = x.to_vec();
    let mut xm = x.to_vec();
    xp[j] += h;
    xm[j] -= h;
    (f(&xp) - f(&xm)) / (2.0 * h)
}

/// Central second difference `∂²f/∂xi∂xj` at `x`.
pub fn finite_diff2(f: &mut dyn FnMut(&[f64]) -> f64, x: &[f64], i: usize, j: usize) -> f64 {
    let h = 1e-4 * x[i].abs().max(1.0);
    let k = 1e-4 * x[j].abs().max(1.0);
    let mut eval = |di: f64, dj: f64| {
        let mut p = x.to_vec();
        p[i] += di;
        p[j] += dj;
        f(&p)
    };
    (eval(h, k) - eval(h, -k) - eval(-h, k) + eval(-h, -k)) / (4.0 * h * k)
}
