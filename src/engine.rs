//! The derivative engine.
//!
//! Built once per model structure by
//! [`Model::initialize_for_differentiation`](crate::Model::initialize_for_differentiation).
//! For every row with nonlinear or quadratic content it derives a *merged*
//! expression — the original tree plus the row's quadratic terms plus the
//! declared linear terms of variables that are already nonlinear in that row
//! — and records all merged rows onto one multi-output tape whose inputs are
//! the dense nonlinear variables. Variables that appear only linearly in a
//! row stay in the sparse linear store and surface as constant Jacobian
//! entries ahead of the differentiated ones.
//!
//! Sweeps follow the Taylor-coefficient contract: `forward(0)` establishes
//! the point, `forward(1, v)` a direction, `reverse(1, w)` the gradient of
//! the weighted row sum, and `reverse(2, w)` the interleaved first/second
//! order adjoints that yield one Hessian column per direction. The
//! higher-level iterate pass drives those sweeps to fill values, gradients,
//! the sparse Jacobian, and the sparse Lagrangian Hessian consistently from
//! a single point.

use std::collections::BTreeMap;

use tracing::debug;

use crate::dual::Dual;
use crate::error::ModelError;
use crate::expr::{Expr, ExpressionTree};
use crate::model::{Model, RowId};
use crate::sparsity::{
    detect_hessian_pattern, HessianPattern, JacobianPattern, SparseHessian, SparseJacobian,
};
use crate::tape::Tape;

/// Per-objective evaluation plan.
struct ObjPlan {
    constant: f64,
    /// All declared coefficients (dense gradient initialization).
    coefficients: Vec<(usize, f64)>,
    /// Declared coefficients left outside the merged tree.
    linear_only: Vec<(usize, f64)>,
    /// Merged-tree variables as `(original, dense)`, ascending.
    ad: Vec<(usize, usize)>,
    /// Position among the tape outputs, if the row is taped.
    output_pos: Option<usize>,
}

/// Per-constraint evaluation plan.
struct ConPlan {
    constant: f64,
    linear_only: Vec<(usize, f64)>,
    ad: Vec<(usize, usize)>,
    output_pos: Option<usize>,
}

/// Tape, merged expressions, sweep state, and derivative caches.
pub struct DiffEngine {
    // ── Structure (fixed at build) ──
    num_vars: usize,
    var_map: BTreeMap<usize, usize>,
    reverse_map: Vec<usize>,
    merged: BTreeMap<RowId, ExpressionTree>,
    taped_rows: Vec<RowId>,
    obj_plans: Vec<ObjPlan>,
    con_plans: Vec<ConPlan>,
    must_retape: bool,
    jac_pattern: JacobianPattern,

    // ── Tape and sweep state ──
    tape: Tape<f64>,
    tape_built: bool,
    x_full: Vec<f64>,
    x_dense: Vec<f64>,
    forward0_done: bool,
    tangent_vals: Vec<Dual<f64>>,
    tangent_valid: bool,

    // ── Point-stamped caches ──
    generation: u64,
    /// Highest derivative order evaluated at the current generation
    /// (−1 = nothing yet).
    highest_order: i8,
    obj_values: Vec<f64>,
    con_values: Vec<f64>,
    obj_gradients: Vec<Vec<f64>>,
    jacobian: SparseJacobian,
    hess_pattern: Option<HessianPattern>,
    hessian: SparseHessian,
    /// Pattern entry positions per dense column.
    hess_col_entries: Vec<Vec<usize>>,
}

impl DiffEngine {
    /// Derive the merged per-row expressions, the dense variable domain, and
    /// the Jacobian layout from a fully constructed model.
    pub(crate) fn build(model: &Model) -> Result<DiffEngine, ModelError> {
        let num_vars = model.num_variables();

        // A linear store set before the last constraint was added no longer
        // covers every row; refuse to derive structure from it.
        if let Some(l) = &model.linear {
            if l.starts.len() != model.num_constraints() + 1 {
                return Err(ModelError::MalformedSparseMatrix {
                    reason: format!(
                        "linear coefficients cover {} rows but the model has {} constraints",
                        l.starts.len() - 1,
                        model.num_constraints()
                    ),
                });
            }
        }

        // Validate tree variable references before anything else.
        for tree in model.expressions.values() {
            if let Some(&idx) = tree.variable_index_map().keys().next_back() {
                if idx >= num_vars {
                    return Err(ModelError::UnknownVariable { idx, num_vars });
                }
            }
        }

        // Per-row nonlinear variable sets: original tree plus quadratic terms.
        let mut row_nl: BTreeMap<RowId, std::collections::BTreeSet<usize>> = BTreeMap::new();
        for (&row, tree) in &model.expressions {
            row_nl
                .entry(row)
                .or_default()
                .extend(tree.variable_index_map().keys().copied());
        }
        for t in &model.quadratic {
            let set = row_nl.entry(t.row).or_default();
            set.insert(t.first);
            set.insert(t.second);
        }

        // Dense tape domain: union of all rows' nonlinear variables,
        // ascending original index.
        let mut domain = std::collections::BTreeSet::new();
        for set in row_nl.values() {
            domain.extend(set.iter().copied());
        }
        let reverse_map: Vec<usize> = domain.iter().copied().collect();
        let var_map: BTreeMap<usize, usize> = reverse_map
            .iter()
            .copied()
            .enumerate()
            .map(|(dense, orig)| (orig, dense))
            .collect();

        // Merged expression per nonlinear row.
        let mut merged: BTreeMap<RowId, ExpressionTree> = BTreeMap::new();
        for (&row, nl_set) in &row_nl {
            let mut parts: Vec<Expr> = Vec::new();
            if let Some(tree) = model.expressions.get(&row) {
                parts.push(tree.root().clone());
            }
            for t in model.quadratic.iter().filter(|t| t.row == row) {
                parts.push(Expr::Times(
                    Box::new(Expr::Variable {
                        idx: t.first,
                        coef: t.coef,
                    }),
                    Box::new(Expr::variable(t.second)),
                ));
            }
            for (j, c) in declared_linear(model, row) {
                if nl_set.contains(&j) {
                    parts.push(Expr::Variable { idx: j, coef: c });
                }
            }
            let mut iter = parts.into_iter();
            let mut root = iter.next().expect("nonlinear row without content");
            for part in iter {
                root = Expr::Plus(Box::new(root), Box::new(part));
            }
            merged.insert(row, ExpressionTree::new(root));
        }

        let taped_rows: Vec<RowId> = merged.keys().copied().collect();
        let output_pos: BTreeMap<RowId, usize> = taped_rows
            .iter()
            .copied()
            .enumerate()
            .map(|(pos, row)| (row, pos))
            .collect();
        let must_retape = merged.values().any(ExpressionTree::must_retape);

        // Evaluation plans.
        let mut obj_plans = Vec::with_capacity(model.num_objectives());
        for (k, obj) in model.objectives.iter().enumerate() {
            let row = RowId::Objective(k);
            let ad = merged_vars(&merged, &var_map, row);
            obj_plans.push(ObjPlan {
                constant: obj.constant,
                coefficients: obj.coefficients.iter().collect(),
                linear_only: split_linear_only(obj.coefficients.iter(), &ad),
                ad,
                output_pos: output_pos.get(&row).copied(),
            });
        }
        let mut con_plans = Vec::with_capacity(model.num_constraints());
        for (i, con) in model.constraints.iter().enumerate() {
            let row = RowId::Constraint(i);
            let ad = merged_vars(&merged, &var_map, row);
            con_plans.push(ConPlan {
                constant: con.constant,
                linear_only: split_linear_only(declared_linear(model, row).into_iter(), &ad),
                ad,
                output_pos: output_pos.get(&row).copied(),
            });
        }

        // Jacobian layout: constant (linear-only) entries first, then the
        // differentiated ones, each group ascending by variable index.
        let mut starts = Vec::with_capacity(con_plans.len() + 1);
        let mut indices = Vec::new();
        let mut con_vals = Vec::with_capacity(con_plans.len());
        let mut values = Vec::new();
        starts.push(0);
        for plan in &con_plans {
            con_vals.push(plan.linear_only.len());
            for &(j, c) in &plan.linear_only {
                indices.push(j);
                values.push(c);
            }
            for &(j, _) in &plan.ad {
                indices.push(j);
                values.push(0.0);
            }
            starts.push(indices.len());
        }
        let jac_pattern = JacobianPattern {
            starts: starts.clone(),
            indices: indices.clone(),
            con_vals: con_vals.clone(),
        };
        let jacobian = SparseJacobian {
            starts,
            indices,
            con_vals,
            values,
        };

        let num_objectives = model.num_objectives();
        let num_constraints = model.num_constraints();
        let n_dense = reverse_map.len();
        Ok(DiffEngine {
            num_vars,
            var_map,
            reverse_map,
            merged,
            taped_rows,
            obj_plans,
            con_plans,
            must_retape,
            jac_pattern,
            tape: Tape::new(),
            tape_built: false,
            x_full: vec![0.0; num_vars],
            x_dense: vec![0.0; n_dense],
            forward0_done: false,
            tangent_vals: Vec::new(),
            tangent_valid: false,
            generation: u64::MAX,
            highest_order: -1,
            obj_values: vec![0.0; num_objectives],
            con_values: vec![0.0; num_constraints],
            obj_gradients: vec![vec![0.0; num_vars]; num_objectives],
            jacobian,
            hess_pattern: None,
            hessian: SparseHessian {
                rows: Vec::new(),
                cols: Vec::new(),
                values: Vec::new(),
            },
            hess_col_entries: Vec::new(),
        })
    }

    // ── Structure accessors ──

    /// Number of rows recorded on the tape.
    pub fn num_taped_rows(&self) -> usize {
        self.taped_rows.len()
    }

    /// Size of the dense nonlinear-variable domain.
    pub fn num_nonlinear_variables(&self) -> usize {
        self.reverse_map.len()
    }

    /// Original variable index → dense tape input.
    pub fn variable_map(&self) -> &BTreeMap<usize, usize> {
        &self.var_map
    }

    /// Dense tape input → original variable index.
    pub fn reverse_variable_map(&self) -> &[usize] {
        &self.reverse_map
    }

    /// Taped rows in tape-output order.
    pub fn taped_rows(&self) -> &[RowId] {
        &self.taped_rows
    }

    /// The merged expression of a row (original ⊕ quadratic ⊕ folded linear).
    pub fn merged_expression(&self, row: RowId) -> Option<&ExpressionTree> {
        self.merged.get(&row)
    }

    /// The Jacobian sparsity pattern.
    pub fn jacobian_pattern(&self) -> &JacobianPattern {
        &self.jac_pattern
    }

    /// The Lagrangian Hessian sparsity pattern (built on first use).
    pub fn hessian_pattern(&mut self) -> &HessianPattern {
        self.ensure_hessian_pattern();
        self.hess_pattern.as_ref().unwrap()
    }

    // ── Cached results ──

    pub fn objective_values(&self) -> &[f64] {
        &self.obj_values
    }

    pub fn constraint_values(&self) -> &[f64] {
        &self.con_values
    }

    pub fn objective_gradient(&self, objective: usize) -> &[f64] {
        &self.obj_gradients[objective]
    }

    pub fn jacobian(&self) -> &SparseJacobian {
        &self.jacobian
    }

    pub fn hessian(&self) -> &SparseHessian {
        &self.hessian
    }

    // ── Raw sweeps ──

    /// Forward sweep. Order 0 establishes the point from dense `vals`;
    /// order 1 sweeps a direction; order 2 sweeps second-order input Taylor
    /// coefficients. Orders above 0 panic without the preceding order at the
    /// current point.
    pub fn forward(&mut self, order: u8, vals: &[f64]) -> Vec<f64> {
        let n = self.reverse_map.len();
        assert_eq!(vals.len(), n, "dense argument has wrong length");
        match order {
            0 => {
                self.x_dense.copy_from_slice(vals);
                for (dense, &orig) in self.reverse_map.iter().enumerate() {
                    self.x_full[orig] = vals[dense];
                }
                if !self.tape_built || self.must_retape {
                    self.record_tape();
                } else {
                    self.tape.forward(&self.x_dense);
                }
                self.forward0_done = true;
                self.tangent_valid = false;
                self.tape.output_values()
            }
            1 => {
                assert!(
                    self.forward0_done,
                    "order-1 forward sweep requires an order-0 sweep at the current point"
                );
                let inputs: Vec<Dual<f64>> = self
                    .x_dense
                    .iter()
                    .zip(vals)
                    .map(|(&x, &v)| Dual::new(x, v))
                    .collect();
                let mut buf = std::mem::take(&mut self.tangent_vals);
                self.tape.forward_tangent(&inputs, &mut buf);
                self.tangent_vals = buf;
                self.tangent_valid = true;
                self.taped_rows
                    .iter()
                    .enumerate()
                    .map(|(pos, _)| self.tangent_vals[self.tape.output_indices[pos] as usize].eps)
                    .collect()
            }
            2 => {
                assert!(
                    self.tangent_valid,
                    "order-2 forward sweep requires an order-1 sweep at the current point"
                );
                // y(t) = f(x + v·t + k·t²); the second Taylor coefficient is
                // ½·vᵀHv + ∇f·k, read off a nested-dual sweep.
                let two = 2.0;
                let inputs: Vec<Dual<Dual<f64>>> = self
                    .x_dense
                    .iter()
                    .enumerate()
                    .map(|(d, &x)| {
                        let v = self.tangent_vals[d].eps;
                        Dual {
                            re: Dual::new(x, v),
                            eps: Dual::new(v, two * vals[d]),
                        }
                    })
                    .collect();
                let mut buf: Vec<Dual<Dual<f64>>> = Vec::new();
                self.tape.forward_tangent(&inputs, &mut buf);
                self.taped_rows
                    .iter()
                    .enumerate()
                    .map(|(pos, _)| {
                        0.5 * buf[self.tape.output_indices[pos] as usize].eps.eps
                    })
                    .collect()
            }
            _ => panic!("forward sweep supports orders 0..=2, got {order}"),
        }
    }

    /// Reverse sweep with one weight per taped row.
    ///
    /// Order 1 returns the dense gradient of the weighted row sum; order 2
    /// returns interleaved `[∂L/∂x_k, Hessian entry]` pairs for the
    /// direction of the preceding order-1 forward sweep. Panics without the
    /// matching forward sweeps.
    pub fn reverse(&mut self, order: u8, weights: &[f64]) -> Vec<f64> {
        assert_eq!(
            weights.len(),
            self.taped_rows.len(),
            "one weight per taped row required"
        );
        match order {
            1 => {
                assert!(
                    self.forward0_done,
                    "reverse sweep requires an order-0 forward sweep at the current point"
                );
                self.tape.reverse_seeded(weights)
            }
            2 => {
                assert!(
                    self.tangent_valid,
                    "order-2 reverse sweep requires an order-1 forward sweep at the current point"
                );
                let mut adjoints: Vec<Dual<f64>> = Vec::new();
                self.tape
                    .reverse_tangent_seeded(&self.tangent_vals, weights, &mut adjoints);
                let n = self.reverse_map.len();
                let mut out = Vec::with_capacity(2 * n);
                for adj in adjoints.iter().take(n) {
                    out.push(adj.re);
                    out.push(adj.eps);
                }
                out
            }
            _ => panic!("reverse sweep supports orders 1 and 2, got {order}"),
        }
    }

    // ── Iterate pass ──

    /// Compute everything up to `highest_order` at `x`, reusing whatever the
    /// current generation already holds.
    pub(crate) fn iterate(
        &mut self,
        model: &Model,
        x: &[f64],
        generation: u64,
        obj_weights: &[f64],
        con_weights: &[f64],
        highest_order: u8,
    ) -> Result<(), ModelError> {
        debug_assert_eq!(x.len(), self.num_vars, "wrong number of variables");
        if generation != self.generation {
            self.x_full.copy_from_slice(x);
            for (dense, &orig) in self.reverse_map.iter().enumerate() {
                self.x_dense[dense] = x[orig];
            }
            self.generation = generation;
            self.highest_order = -1;
            self.forward0_done = false;
            self.tangent_valid = false;
        }
        if (highest_order as i8) <= self.highest_order {
            return Ok(());
        }

        if self.highest_order < 0 {
            if highest_order == 0 {
                self.zero_order_direct(model, generation);
            } else {
                self.zero_order_ad();
            }
            self.highest_order = 0;
        }
        if highest_order == 1 && self.highest_order < 1 {
            self.first_order();
            self.highest_order = 1;
        }
        if highest_order == 2 && self.highest_order < 2 {
            self.second_order(obj_weights, con_weights);
            self.highest_order = 2;
        }
        Ok(())
    }

    /// Values only, from the original trees (no tape involved).
    fn zero_order_direct(&mut self, model: &Model, generation: u64) {
        let x = &self.x_full;
        for (k, obj) in model.objectives.iter().enumerate() {
            let linear: f64 = obj.coefficients.iter().map(|(j, c)| c * x[j]).sum();
            let quadratic = quadratic_sum(model, RowId::Objective(k), x);
            let nonlinear = model
                .expressions
                .get(&RowId::Objective(k))
                .map_or(0.0, |t| t.evaluate(x, generation));
            self.obj_values[k] = obj.constant + linear + quadratic + nonlinear;
        }
        for (i, con) in model.constraints.iter().enumerate() {
            let linear: f64 = match &model.linear {
                Some(l) => {
                    let (idx, val) = l.segment(i);
                    idx.iter().zip(val).map(|(&j, &c)| c * x[j]).sum()
                }
                None => 0.0,
            };
            let quadratic = quadratic_sum(model, RowId::Constraint(i), x);
            let nonlinear = model
                .expressions
                .get(&RowId::Constraint(i))
                .map_or(0.0, |t| t.evaluate(x, generation));
            self.con_values[i] = con.constant + linear + quadratic + nonlinear;
        }
    }

    /// Values from an order-0 forward sweep plus the linear/constant parts.
    fn zero_order_ad(&mut self) {
        let x_dense = self.x_dense.clone();
        let outs = self.forward(0, &x_dense);
        let x = &self.x_full;
        for (k, plan) in self.obj_plans.iter().enumerate() {
            let linear: f64 = plan.linear_only.iter().map(|&(j, c)| c * x[j]).sum();
            let taped = plan.output_pos.map_or(0.0, |pos| outs[pos]);
            self.obj_values[k] = plan.constant + linear + taped;
        }
        for (i, plan) in self.con_plans.iter().enumerate() {
            let linear: f64 = plan.linear_only.iter().map(|&(j, c)| c * x[j]).sum();
            let taped = plan.output_pos.map_or(0.0, |pos| outs[pos]);
            self.con_values[i] = plan.constant + linear + taped;
        }
    }

    fn ensure_forward0(&mut self) {
        if !self.forward0_done {
            let x_dense = self.x_dense.clone();
            self.forward(0, &x_dense);
        }
    }

    /// Reset objective gradients to the declared linear coefficients; the
    /// differentiated entries overwrite their slots afterwards.
    fn init_objective_gradients(&mut self) {
        for (k, plan) in self.obj_plans.iter().enumerate() {
            let grad = &mut self.obj_gradients[k];
            grad.iter_mut().for_each(|g| *g = 0.0);
            for &(j, c) in &plan.coefficients {
                grad[j] = c;
            }
        }
    }

    /// First derivatives. Chooses reverse mode (one sweep per taped row) or
    /// forward mode (one sweep per dense variable), whichever needs fewer
    /// sweeps.
    fn first_order(&mut self) {
        self.ensure_forward0();
        self.init_objective_gradients();

        let n = self.reverse_map.len();
        let m = self.taped_rows.len();
        if m == 0 {
            return;
        }

        if m <= n {
            let mut weights = vec![0.0; m];
            for pos in 0..m {
                weights[pos] = 1.0;
                let grad = self.tape.reverse_seeded(&weights);
                weights[pos] = 0.0;
                self.scatter_row_gradient(self.taped_rows[pos], &grad);
            }
        } else {
            let mut dir = vec![0.0; n];
            for j in 0..n {
                dir[j] = 1.0;
                let col = self.forward(1, &dir);
                dir[j] = 0.0;
                self.scatter_jacobian_column(j, &col);
            }
        }
    }

    /// Second derivatives; also fills the Jacobian and objective gradients
    /// from the same sweep sequence so that everything reported for this
    /// point is mutually consistent.
    fn second_order(&mut self, obj_weights: &[f64], con_weights: &[f64]) {
        self.ensure_forward0();
        self.ensure_hessian_pattern();
        self.init_objective_gradients();

        let weights: Vec<f64> = self
            .taped_rows
            .iter()
            .map(|row| match row {
                RowId::Objective(k) => obj_weights[*k],
                RowId::Constraint(i) => con_weights[*i],
            })
            .collect();

        let n = self.reverse_map.len();
        self.hessian.values.iter_mut().for_each(|v| *v = 0.0);

        let mut dir = vec![0.0; n];
        for j in 0..n {
            dir[j] = 1.0;
            let col = self.forward(1, &dir);
            dir[j] = 0.0;
            self.scatter_jacobian_column(j, &col);

            if self.taped_rows.is_empty() {
                continue;
            }
            let interleaved = self.reverse(2, &weights);
            for &k in &self.hess_col_entries[j] {
                let i = self.hessian.rows[k];
                self.hessian.values[k] = interleaved[2 * i + 1];
            }
        }
    }

    /// Write one merged row's dense-domain gradient into the objective
    /// gradient or the Jacobian row it belongs to.
    fn scatter_row_gradient(&mut self, row: RowId, grad: &[f64]) {
        match row {
            RowId::Objective(k) => {
                for &(orig, dense) in &self.obj_plans[k].ad {
                    self.obj_gradients[k][orig] = grad[dense];
                }
            }
            RowId::Constraint(i) => {
                let plan = &self.con_plans[i];
                let base = self.jacobian.starts[i] + self.jacobian.con_vals[i];
                for (t, &(_, dense)) in plan.ad.iter().enumerate() {
                    self.jacobian.values[base + t] = grad[dense];
                }
            }
        }
    }

    /// Write one Jacobian column (per-row directional derivatives along the
    /// dense unit direction `j`) into every row that carries variable `j`.
    fn scatter_jacobian_column(&mut self, j: usize, col: &[f64]) {
        for (k, plan) in self.obj_plans.iter().enumerate() {
            if let Some(pos) = plan.output_pos {
                if let Ok(t) = plan.ad.binary_search_by_key(&j, |&(_, dense)| dense) {
                    let orig = plan.ad[t].0;
                    self.obj_gradients[k][orig] = col[pos];
                }
            }
        }
        for (i, plan) in self.con_plans.iter().enumerate() {
            if let Some(pos) = plan.output_pos {
                if let Ok(t) = plan.ad.binary_search_by_key(&j, |&(_, dense)| dense) {
                    let base = self.jacobian.starts[i] + self.jacobian.con_vals[i];
                    self.jacobian.values[base + t] = col[pos];
                }
            }
        }
    }

    /// Record every merged row onto a fresh tape at the current point.
    fn record_tape(&mut self) {
        let n = self.reverse_map.len();
        let mut tape = Tape::with_capacity(n + 16 * self.merged.len());
        for d in 0..n {
            tape.new_input(self.x_dense[d]);
        }
        let mut retaped = false;
        let mut outputs = Vec::with_capacity(self.merged.len());
        for tree in self.merged.values() {
            let root = tree.root().record(&mut tape, &self.var_map, &self.x_full, &mut retaped);
            outputs.push(root);
        }
        tape.set_outputs(&outputs);
        if self.tape_built {
            debug!(entries = tape.len(), "tape re-recorded at new point");
        } else {
            debug!(
                entries = tape.len(),
                inputs = n,
                outputs = outputs.len(),
                "tape recorded"
            );
        }
        self.tape = tape;
        self.tape_built = true;
    }

    /// Build the Hessian pattern once per structure. Records the tape at the
    /// origin if no point has been seen yet; the pattern depends only on the
    /// recorded operation sequence.
    fn ensure_hessian_pattern(&mut self) {
        if self.hess_pattern.is_some() {
            return;
        }
        if !self.tape_built {
            self.record_tape();
        }
        let pattern = detect_hessian_pattern(&self.tape);
        debug!(nnz = pattern.nnz(), "Hessian sparsity pattern detected");

        let n = self.reverse_map.len();
        let mut col_entries = vec![Vec::new(); n];
        for (k, &c) in pattern.cols.iter().enumerate() {
            col_entries[c].push(k);
        }
        self.hessian = SparseHessian {
            rows: pattern.rows.clone(),
            cols: pattern.cols.clone(),
            values: vec![0.0; pattern.nnz()],
        };
        self.hess_col_entries = col_entries;
        self.hess_pattern = Some(pattern);
    }
}

/// Declared linear coefficients of a row as `(variable, coefficient)` pairs.
fn declared_linear(model: &Model, row: RowId) -> Vec<(usize, f64)> {
    match row {
        RowId::Objective(k) => model.objectives[k].coefficients.iter().collect(),
        RowId::Constraint(i) => match &model.linear {
            Some(l) => {
                let (idx, val) = l.segment(i);
                idx.iter().copied().zip(val.iter().copied()).collect()
            }
            None => Vec::new(),
        },
    }
}

/// The merged tree's variables as `(original, dense)` pairs, ascending.
fn merged_vars(
    merged: &BTreeMap<RowId, ExpressionTree>,
    var_map: &BTreeMap<usize, usize>,
    row: RowId,
) -> Vec<(usize, usize)> {
    merged.get(&row).map_or_else(Vec::new, |tree| {
        tree.variable_index_map()
            .keys()
            .map(|&orig| (orig, var_map[&orig]))
            .collect()
    })
}

/// Declared coefficients whose variable is not differentiated in this row,
/// ascending by variable index.
fn split_linear_only(
    declared: impl Iterator<Item = (usize, f64)>,
    ad: &[(usize, usize)],
) -> Vec<(usize, f64)> {
    let mut out: Vec<(usize, f64)> = declared
        .filter(|(j, _)| ad.binary_search_by_key(j, |&(orig, _)| orig).is_err())
        .collect();
    out.sort_by_key(|&(j, _)| j);
    out
}

/// Sum of a row's quadratic terms at `x`.
fn quadratic_sum(model: &Model, row: RowId, x: &[f64]) -> f64 {
    model
        .quadratic
        .iter()
        .filter(|t| t.row == row)
        .map(|t| t.coef * x[t.first] * x[t.second])
        .sum()
}
