//! First derivatives: objective gradients, the sparse Jacobian, the raw
//! sweep contract, and finite-difference agreement.

mod common;

use approx::assert_relative_eq;
use common::{finite_diff, lag_example, lag_point};
use tapir::RowId;

#[test]
fn nonlinear_variable_map_is_dense_and_ascending() {
    let mut model = lag_example();
    model.initialize_for_differentiation().unwrap();

    let map = model.nonlinear_variables_index_map().unwrap();
    let pairs: Vec<(usize, usize)> = map.into_iter().collect();
    // x2 appears only linearly and stays out of the tape domain.
    assert_eq!(pairs, vec![(0, 0), (1, 1), (3, 2)]);
    assert_eq!(model.nonlinear_variables().unwrap(), vec![0, 1, 3]);
}

#[test]
fn objective_gradient_matches_the_worked_example() {
    let mut model = lag_example();
    model.initialize_for_differentiation().unwrap();
    let x = lag_point();

    let grad = model.calculate_objective_function_gradient(&x, 0, true).unwrap();
    assert_eq!(grad.len(), 4);
    assert_relative_eq!(grad[0], 2.0, max_relative = 1e-12); // 2·x0 from AD
    assert_relative_eq!(grad[1], 9.0, max_relative = 1e-12); // declared coefficient
    assert_relative_eq!(grad[2], 0.0, max_relative = 1e-12);
    assert_relative_eq!(grad[3], 0.0, max_relative = 1e-12);
}

#[test]
fn jacobian_matches_the_worked_example() {
    let mut model = lag_example();
    model.initialize_for_differentiation().unwrap();
    let x = lag_point();

    let jac = model
        .calculate_all_constraint_function_gradients(&x, &[1.0], &[1.0, 1.0], true, 1)
        .unwrap();

    assert_eq!(jac.starts, vec![0, 2, 5]);
    // Constant (linear-only) entries lead each row.
    assert_eq!(jac.con_vals, vec![0, 1]);
    assert_eq!(jac.indices, vec![1, 3, 2, 0, 3]);

    let row0: Vec<(usize, f64)> = jac.row(0).collect();
    assert_eq!(row0[0].0, 1);
    assert_relative_eq!(row0[0].1, 6.37, max_relative = 1e-12); // 1.37 + 5
    assert_eq!(row0[1].0, 3);
    assert_relative_eq!(row0[1].1, 2.0, max_relative = 1e-12);

    let row1: Vec<(usize, f64)> = jac.row(1).collect();
    assert_eq!(row1[0].0, 2);
    assert_relative_eq!(row1[0].1, 7.0, max_relative = 1e-12); // constant entry
    assert_eq!(row1[1].0, 0);
    assert_relative_eq!(row1[1].1, 1.0, max_relative = 1e-12); // 1/x0
    assert_eq!(row1[2].0, 3);
    assert_relative_eq!(row1[2].1, 0.2, max_relative = 1e-12); // 1/x3
}

#[test]
fn forward_sweeps_follow_the_taylor_contract() {
    let mut model = lag_example();
    model.initialize_for_differentiation().unwrap();

    // Dense point over {x0, x1, x3}.
    let vals = model.forward_sweep(0, &[1.0, 5.0, 5.0]).unwrap();
    // Taped rows in row order: objective, constraint 0, constraint 1.
    assert_relative_eq!(vals[0], 1.0, max_relative = 1e-12); // x0²
    assert_relative_eq!(vals[1], -63.15, max_relative = 1e-12); // −105 + 6.37·x1 + 2·x3
    assert_relative_eq!(vals[2], 5.0f64.ln(), max_relative = 1e-12);

    // Directional derivatives along the x3 unit direction.
    let dir = model.forward_sweep(1, &[0.0, 0.0, 1.0]).unwrap();
    assert_relative_eq!(dir[0], 0.0, max_relative = 1e-12);
    assert_relative_eq!(dir[1], 2.0, max_relative = 1e-12);
    assert_relative_eq!(dir[2], 0.2, max_relative = 1e-12); // 1/x3

    // Second-order Taylor coefficients along the same direction:
    // ½·vᵀH_row·v with zero second-order input coefficients.
    let coeffs = model.forward_sweep(2, &[0.0, 0.0, 0.0]).unwrap();
    assert_relative_eq!(coeffs[0], 0.0, max_relative = 1e-12);
    assert_relative_eq!(coeffs[1], 0.0, max_relative = 1e-12);
    assert_relative_eq!(coeffs[2], -0.02, max_relative = 1e-10); // ½·(−1/x3²)
}

#[test]
fn reverse_sweep_returns_weighted_row_gradients() {
    let mut model = lag_example();
    model.initialize_for_differentiation().unwrap();

    model.forward_sweep(0, &[1.0, 5.0, 5.0]).unwrap();
    // Unit weight on the last taped row: its gradient over the dense domain.
    let grad = model.reverse_sweep(1, &[0.0, 0.0, 1.0]).unwrap();
    assert_relative_eq!(grad[0], 1.0, max_relative = 1e-12); // 1/x0
    assert_relative_eq!(grad[1], 0.0, max_relative = 1e-12);
    assert_relative_eq!(grad[2], 0.2, max_relative = 1e-12); // 1/x3

    // Weighted combination across all taped rows.
    let lag = model.reverse_sweep(1, &[1.0, 2.0, 1.0]).unwrap();
    assert_relative_eq!(lag[0], 2.0 + 1.0, max_relative = 1e-12); // 2·x0 + 1/x0
    assert_relative_eq!(lag[1], 2.0 * 6.37, max_relative = 1e-12);
    assert_relative_eq!(lag[2], 2.0 * 2.0 + 0.2, max_relative = 1e-12);
}

#[test]
fn interleaved_second_order_reverse_sweep() {
    let mut model = lag_example();
    model.initialize_for_differentiation().unwrap();

    model.forward_sweep(0, &[1.0, 5.0, 5.0]).unwrap();
    model.forward_sweep(1, &[0.0, 0.0, 1.0]).unwrap();
    let out = model.reverse_sweep(2, &[1.0, 2.0, 1.0]).unwrap();
    assert_eq!(out.len(), 6);
    // Even slots: first partials of the weighted sum.
    assert_relative_eq!(out[0], 3.0, max_relative = 1e-12);
    assert_relative_eq!(out[2], 12.74, max_relative = 1e-12);
    assert_relative_eq!(out[4], 4.2, max_relative = 1e-12);
    // Odd slots: the Hessian column for the x3 unit direction.
    assert_relative_eq!(out[1], 0.0, max_relative = 1e-12);
    assert_relative_eq!(out[3], 0.0, max_relative = 1e-12);
    assert_relative_eq!(out[5], -0.04, max_relative = 1e-12); // −1/x3²
}

#[test]
#[should_panic(expected = "order-0")]
fn reverse_before_forward_fails_fast() {
    let mut model = lag_example();
    model.initialize_for_differentiation().unwrap();
    let _ = model.reverse_sweep(1, &[1.0, 0.0, 0.0]);
}

#[test]
#[should_panic(expected = "order-1")]
fn second_order_reverse_needs_a_direction() {
    let mut model = lag_example();
    model.initialize_for_differentiation().unwrap();
    model.forward_sweep(0, &[1.0, 5.0, 5.0]).unwrap();
    let _ = model.reverse_sweep(2, &[1.0, 0.0, 0.0]);
}

#[test]
fn gradients_agree_with_finite_differences() {
    let points = [
        vec![0.8, 2.0, 1.5, 3.0],
        vec![2.5, -1.0, 0.5, 0.7],
        vec![1.2, 4.0, -2.0, 9.0],
    ];
    for x in points {
        let mut model = lag_example();
        model.initialize_for_differentiation().unwrap();

        let grad = model.calculate_objective_function_gradient(&x, 0, true).unwrap();
        let jac = model
            .calculate_all_constraint_function_gradients(&x, &[1.0], &[1.0, 1.0], false, 1)
            .unwrap();

        let mut obj_f = |p: &[f64]| {
            let mut m = lag_example();
            m.calculate_function_value(RowId::Objective(0), p, true).unwrap()
        };
        for j in 0..4 {
            let fd = finite_diff(&mut obj_f, &x, j);
            assert_relative_eq!(grad[j], fd, max_relative = 1e-5, epsilon = 1e-7);
        }

        for row in 0..2 {
            let mut con_f = |p: &[f64]| {
                let mut m = lag_example();
                m.calculate_function_value(RowId::Constraint(row), p, true).unwrap()
            };
            let mut dense = vec![0.0; 4];
            for (j, v) in jac.row(row) {
                dense[j] = v;
            }
            for j in 0..4 {
                let fd = finite_diff(&mut con_f, &x, j);
                assert_relative_eq!(dense[j], fd, max_relative = 1e-5, epsilon = 1e-7);
            }
        }
    }
}
