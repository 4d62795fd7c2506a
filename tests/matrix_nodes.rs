//! Matrix-valued subexpressions under the scalar bridges.

use approx::assert_relative_eq;
use nalgebra::DMatrix;
use tapir::{EvalError, Expr, MatrixExpr, Model, RowId, SparseVec, VarType};

fn mat2(entries: &[f64; 4]) -> MatrixExpr {
    MatrixExpr::Constant(DMatrix::from_row_slice(2, 2, entries))
}

#[test]
fn trace_and_determinant_evaluate() {
    let tree = Expr::Plus(
        Box::new(Expr::MatrixTrace(Box::new(mat2(&[1.0, 2.0, 3.0, 4.0])))),
        Box::new(Expr::MatrixDeterminant(Box::new(mat2(&[2.0, 0.0, 0.0, 3.0])))),
    );
    assert_relative_eq!(tree.evaluate(&[]), 5.0 + 6.0, max_relative = 1e-12);
}

#[test]
fn matrix_algebra_composes() {
    // trace(Aᵀ·(2·I)) = 2·trace(A)
    let a = mat2(&[1.0, 5.0, -2.0, 4.0]);
    let tree = Expr::MatrixTrace(Box::new(MatrixExpr::Times(
        Box::new(MatrixExpr::Transpose(Box::new(a))),
        Box::new(MatrixExpr::ScalarTimes(
            Box::new(Expr::Number(2.0)),
            Box::new(MatrixExpr::Identity(2)),
        )),
    )));
    assert_relative_eq!(tree.evaluate(&[]), 10.0, max_relative = 1e-12);
}

#[test]
fn inverse_of_a_singular_matrix() {
    let tree = Expr::MatrixToScalar(Box::new(MatrixExpr::Submatrix {
        row_start: 0,
        row_end: 0,
        col_start: 0,
        col_end: 0,
        child: Box::new(MatrixExpr::Inverse(Box::new(mat2(&[1.0, 1.0, 1.0, 1.0])))),
    }));
    // Lenient evaluation propagates NaN; strict mode reports.
    assert!(tree.evaluate(&[]).is_nan());
    assert_eq!(tree.evaluate_checked(&[]), Err(EvalError::SingularMatrix));
}

#[test]
fn inverse_round_trips_through_submatrix() {
    // inv([[2, 0], [0, 4]])[1, 1] = 0.25
    let tree = Expr::MatrixToScalar(Box::new(MatrixExpr::Submatrix {
        row_start: 1,
        row_end: 1,
        col_start: 1,
        col_end: 1,
        child: Box::new(MatrixExpr::Inverse(Box::new(mat2(&[2.0, 0.0, 0.0, 4.0])))),
    }));
    assert_relative_eq!(tree.evaluate(&[]), 0.25, max_relative = 1e-12);
}

#[test]
fn diagonal_extraction() {
    let tree = Expr::MatrixToScalar(Box::new(MatrixExpr::Submatrix {
        row_start: 1,
        row_end: 1,
        col_start: 0,
        col_end: 0,
        child: Box::new(MatrixExpr::Diagonal(Box::new(mat2(&[7.0, 1.0, 2.0, 9.0])))),
    }));
    assert_relative_eq!(tree.evaluate(&[]), 9.0, max_relative = 1e-12);
}

#[test]
fn dimension_mismatches_are_strict_errors() {
    let bad = Expr::MatrixTrace(Box::new(MatrixExpr::Constant(DMatrix::from_row_slice(
        1,
        2,
        &[1.0, 2.0],
    ))));
    assert!(bad.evaluate(&[]).is_nan());
    assert!(matches!(
        bad.evaluate_checked(&[]),
        Err(EvalError::DimensionMismatch { .. })
    ));

    let bad = Expr::MatrixToScalar(Box::new(mat2(&[1.0, 2.0, 3.0, 4.0])));
    assert!(bad.evaluate(&[]).is_nan());
    assert!(matches!(
        bad.evaluate_checked(&[]),
        Err(EvalError::DimensionMismatch { .. })
    ));
}

#[test]
fn matrix_bridges_record_as_constants() {
    // Objective: x0² + trace(A), A constant.
    let mut model = Model::new();
    model.add_variable(0, "x0", -5.0, 5.0, VarType::Continuous).unwrap();
    model
        .add_objective(0, "obj", false, 0.0, 1.0, SparseVec::default())
        .unwrap();
    model
        .set_nonlinear_expression(
            RowId::Objective(0),
            Expr::Plus(
                Box::new(Expr::Square(Box::new(Expr::variable(0)))),
                Box::new(Expr::MatrixTrace(Box::new(mat2(&[1.0, 0.0, 0.0, 2.0])))),
            ),
        )
        .unwrap();
    model.initialize_for_differentiation().unwrap();

    let x = [3.0];
    let val = model
        .calculate_function_value(RowId::Objective(0), &x, true)
        .unwrap();
    assert_relative_eq!(val, 12.0, max_relative = 1e-12);

    let grad = model.calculate_objective_function_gradient(&x, 0, false).unwrap();
    assert_relative_eq!(grad[0], 6.0, max_relative = 1e-12);

    // A constant subtree contributes nothing to the Hessian pattern beyond
    // the genuinely nonlinear part.
    let hess = model.lagrangian_hessian_sparsity_pattern().unwrap();
    assert_eq!(hess.rows, vec![0]);
    assert_eq!(hess.cols, vec![0]);
}
