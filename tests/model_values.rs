//! Model construction, structural queries, function values, and caching.

mod common;

use approx::assert_relative_eq;
use common::{lag_example, lag_point};
use tapir::{
    ConstraintKind, Expr, MajorOrder, Model, ModelError, RowId, SparseVec, VarType,
};

#[test]
fn row_id_raw_convention() {
    assert_eq!(RowId::from_raw(-1), RowId::Objective(0));
    assert_eq!(RowId::from_raw(-2), RowId::Objective(1));
    assert_eq!(RowId::from_raw(0), RowId::Constraint(0));
    assert_eq!(RowId::from_raw(3), RowId::Constraint(3));
    assert_eq!(RowId::Objective(1).raw(), -2);
    assert_eq!(RowId::Constraint(2).raw(), 2);
    // Ordering follows the raw indices.
    assert!(RowId::Objective(1) < RowId::Objective(0));
    assert!(RowId::Objective(0) < RowId::Constraint(0));
    assert!(RowId::Constraint(0) < RowId::Constraint(1));
}

#[test]
fn var_type_codes_round_trip() {
    for code in ['C', 'B', 'I', 'D', 'J', 'S'] {
        assert_eq!(VarType::from_code(code).unwrap().code(), code);
    }
    assert!(VarType::from_code('X').is_none());
}

#[test]
fn construction_must_be_contiguous() {
    let mut model = Model::new();
    let err = model
        .add_variable(1, "x1", 0.0, 1.0, VarType::Continuous)
        .unwrap_err();
    assert_eq!(err, ModelError::IndexOutOfRange { expected: 0, got: 1 });

    model.add_variable(0, "x0", 0.0, 1.0, VarType::Continuous).unwrap();
    let err = model
        .add_objective(2, "obj", false, 0.0, 1.0, SparseVec::default())
        .unwrap_err();
    assert_eq!(err, ModelError::IndexOutOfRange { expected: 0, got: 2 });

    let err = model.add_constraint(5, "con", 0.0, 1.0, 0.0).unwrap_err();
    assert_eq!(err, ModelError::IndexOutOfRange { expected: 0, got: 5 });
}

#[test]
fn malformed_sparse_coefficients_are_rejected() {
    let mut model = Model::new();
    for i in 0..3 {
        model
            .add_variable(i, format!("x{i}"), 0.0, 1.0, VarType::Continuous)
            .unwrap();
    }
    model.add_constraint(0, "c0", 0.0, 1.0, 0.0).unwrap();
    model.add_constraint(1, "c1", 0.0, 1.0, 0.0).unwrap();

    // starts too short
    let err = model
        .set_linear_coefficients(MajorOrder::RowMajor, vec![0, 1], vec![0], vec![1.0])
        .unwrap_err();
    assert!(matches!(err, ModelError::MalformedSparseMatrix { .. }));

    // decreasing starts
    let err = model
        .set_linear_coefficients(MajorOrder::RowMajor, vec![0, 2, 1], vec![0, 1], vec![1.0, 2.0])
        .unwrap_err();
    assert!(matches!(err, ModelError::MalformedSparseMatrix { .. }));

    // starts disagree with value count
    let err = model
        .set_linear_coefficients(MajorOrder::RowMajor, vec![0, 1, 3], vec![0, 1], vec![1.0, 2.0])
        .unwrap_err();
    assert!(matches!(err, ModelError::MalformedSparseMatrix { .. }));

    // column index out of bounds
    let err = model
        .set_linear_coefficients(MajorOrder::RowMajor, vec![0, 1, 2], vec![0, 9], vec![1.0, 2.0])
        .unwrap_err();
    assert!(matches!(err, ModelError::MalformedSparseMatrix { .. }));
}

#[test]
fn column_major_input_is_transposed() {
    let mut model = Model::new();
    for i in 0..3 {
        model
            .add_variable(i, format!("x{i}"), 0.0, 1.0, VarType::Continuous)
            .unwrap();
    }
    model.add_constraint(0, "c0", 0.0, 1.0, 0.0).unwrap();
    model.add_constraint(1, "c1", 0.0, 1.0, 0.0).unwrap();

    // Matrix: row0 = [1, 0, 3], row1 = [0, 2, 4], given column-major.
    model
        .set_linear_coefficients(
            MajorOrder::ColumnMajor,
            vec![0, 1, 2, 4],
            vec![0, 1, 0, 1],
            vec![1.0, 2.0, 3.0, 4.0],
        )
        .unwrap();

    let row_major = model.linear_coefficients_row_major().unwrap();
    assert_eq!(row_major.starts, vec![0, 2, 4]);
    assert_eq!(row_major.indices, vec![0, 2, 1, 2]);
    assert_eq!(row_major.values, vec![1.0, 3.0, 2.0, 4.0]);

    // And back again.
    let col_major = model.linear_coefficients_column_major().unwrap();
    assert_eq!(col_major.starts, vec![0, 1, 2, 4]);
    assert_eq!(col_major.indices, vec![0, 1, 0, 1]);
    assert_eq!(col_major.values, vec![1.0, 2.0, 3.0, 4.0]);
}

#[test]
fn constraint_kinds_classify_bounds() {
    let mut model = Model::new();
    model.add_constraint(0, "eq", 3.0, 3.0, 0.0).unwrap();
    model.add_constraint(1, "le", f64::NEG_INFINITY, 4.0, 0.0).unwrap();
    model.add_constraint(2, "ge", 2.0, f64::INFINITY, 0.0).unwrap();
    model.add_constraint(3, "range", 0.0, 1.0, 0.0).unwrap();
    model
        .add_constraint(4, "free", f64::NEG_INFINITY, f64::INFINITY, 0.0)
        .unwrap();
    assert_eq!(
        model.constraint_kinds(),
        vec![
            ConstraintKind::Equality,
            ConstraintKind::UpperBounded,
            ConstraintKind::LowerBounded,
            ConstraintKind::Range,
            ConstraintKind::Free,
        ]
    );
}

#[test]
fn function_values_match_the_worked_example() {
    let mut model = lag_example();
    let x = lag_point();

    let obj = model
        .calculate_function_value(RowId::Objective(0), &x, true)
        .unwrap();
    assert_relative_eq!(obj, 46.0, max_relative = 1e-12);

    let con0 = model
        .calculate_function_value(RowId::Constraint(0), &x, false)
        .unwrap();
    // 33 − 105 + 1.37·5 + 2·5 + 5·5
    assert_relative_eq!(con0, -30.15, max_relative = 1e-12);

    let con1 = model
        .calculate_function_value(RowId::Constraint(1), &x, false)
        .unwrap();
    assert_relative_eq!(con1, 5.0f64.ln() + 70.0, max_relative = 1e-12);

    let all_con = model.calculate_all_constraint_function_values(&x, false).unwrap();
    assert_relative_eq!(all_con[0], -30.15, max_relative = 1e-12);
    assert_relative_eq!(all_con[1], 5.0f64.ln() + 70.0, max_relative = 1e-12);

    let all_obj = model.calculate_all_objective_function_values(&x, false).unwrap();
    assert_relative_eq!(all_obj[0], 46.0, max_relative = 1e-12);
}

#[test]
fn ad_and_direct_value_paths_agree() {
    let mut model = lag_example();
    model.initialize_for_differentiation().unwrap();
    let x = lag_point();

    let direct = model.calculate_all_constraint_function_values(&x, true).unwrap();
    let ad = model
        .calculate_all_constraint_function_values_with_order(&x, &[1.0], &[1.0, 1.0], true, 1)
        .unwrap();
    assert_relative_eq!(direct[0], ad[0], max_relative = 1e-12);
    assert_relative_eq!(direct[1], ad[1], max_relative = 1e-12);

    let obj = model
        .calculate_all_objective_function_values_with_order(&x, &[1.0], &[1.0, 1.0], false, 1)
        .unwrap();
    assert_relative_eq!(obj[0], 46.0, max_relative = 1e-12);
}

#[test]
fn cached_values_skip_tree_traversal() {
    let mut model = lag_example();
    let x = lag_point();

    let first = model
        .calculate_function_value(RowId::Constraint(1), &x, true)
        .unwrap();
    let evals_after_first = model
        .expression_tree(RowId::Constraint(1))
        .unwrap()
        .evaluation_count();
    assert_eq!(evals_after_first, 1);

    // Same point, new_x = false: the cached root value is reused.
    let second = model
        .calculate_function_value(RowId::Constraint(1), &x, false)
        .unwrap();
    assert_eq!(first.to_bits(), second.to_bits());
    assert_eq!(
        model
            .expression_tree(RowId::Constraint(1))
            .unwrap()
            .evaluation_count(),
        1
    );

    // Declaring a new point invalidates the cache.
    model
        .calculate_function_value(RowId::Constraint(1), &x, true)
        .unwrap();
    assert_eq!(
        model
            .expression_tree(RowId::Constraint(1))
            .unwrap()
            .evaluation_count(),
        2
    );
}

#[test]
fn derivative_entry_points_require_initialization() {
    let mut model = lag_example();
    let x = lag_point();

    let err = model
        .calculate_objective_function_gradient(&x, 0, true)
        .unwrap_err();
    assert_eq!(err, ModelError::TapeNotBuilt);
    let err = model.forward_sweep(0, &[1.0, 5.0, 5.0]).unwrap_err();
    assert_eq!(err, ModelError::TapeNotBuilt);
    let err = model.jacobian_sparsity_pattern().unwrap_err();
    assert_eq!(err, ModelError::TapeNotBuilt);

    // Function values do not need the tape.
    assert!(model.calculate_function_value(RowId::Objective(0), &x, true).is_ok());
}

#[test]
fn unknown_rows_and_variables_are_reported() {
    let mut model = lag_example();
    let x = lag_point();

    let err = model
        .calculate_function_value(RowId::Constraint(7), &x, true)
        .unwrap_err();
    assert_eq!(err, ModelError::UnknownRow { row: RowId::Constraint(7) });

    let err = model
        .add_quadratic_term(RowId::Objective(0), 0, 11, 1.0)
        .unwrap_err();
    assert_eq!(err, ModelError::UnknownVariable { idx: 11, num_vars: 4 });

    let err = model
        .set_nonlinear_expression(RowId::Objective(3), Expr::Number(0.0))
        .unwrap_err();
    assert_eq!(err, ModelError::UnknownRow { row: RowId::Objective(3) });
}

#[test]
fn structure_changes_invalidate_the_engine() {
    let mut model = lag_example();
    model.initialize_for_differentiation().unwrap();
    let before = model.structure_version();

    model.add_constraint(2, "extra", 0.0, 1.0, 0.0).unwrap();
    assert!(model.structure_version() > before);

    // The stale engine is dropped; derivatives need a re-initialize.
    let err = model.jacobian_sparsity_pattern().unwrap_err();
    assert_eq!(err, ModelError::TapeNotBuilt);

    // Re-initializing against a linear store that no longer covers every
    // constraint row is refused.
    let err = model.initialize_for_differentiation().unwrap_err();
    assert!(matches!(err, ModelError::MalformedSparseMatrix { .. }));

    model
        .set_linear_coefficients(
            MajorOrder::RowMajor,
            vec![0, 1, 2, 2],
            vec![1, 2],
            vec![5.0, 7.0],
        )
        .unwrap();
    model.initialize_for_differentiation().unwrap();
    assert!(model.jacobian_sparsity_pattern().is_ok());
}

#[test]
fn multiple_objectives_are_supported() {
    let mut model = Model::new();
    model
        .add_variable(0, "x0", 0.0, 10.0, VarType::Continuous)
        .unwrap();
    model
        .add_objective(0, "first", false, 1.0, 1.0, SparseVec::from_pairs([(0, 2.0)]))
        .unwrap();
    model
        .add_objective(1, "second", true, 0.0, 1.0, SparseVec::from_pairs([(0, -1.0)]))
        .unwrap();
    model
        .set_nonlinear_expression(RowId::Objective(1), Expr::Exp(Box::new(Expr::variable(0))))
        .unwrap();
    model.initialize_for_differentiation().unwrap();

    let vals = model
        .calculate_all_objective_function_values(&[2.0], true)
        .unwrap();
    assert_relative_eq!(vals[0], 5.0, max_relative = 1e-12);
    assert_relative_eq!(vals[1], 2.0f64.exp() - 2.0, max_relative = 1e-12);

    let g0 = model.calculate_objective_function_gradient(&[2.0], 0, false).unwrap();
    assert_relative_eq!(g0[0], 2.0, max_relative = 1e-12);
    let g1 = model.calculate_objective_function_gradient(&[2.0], 1, false).unwrap();
    assert_relative_eq!(g1[0], 2.0f64.exp() - 1.0, max_relative = 1e-10);
}
