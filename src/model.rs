//! The in-memory problem container.
//!
//! A [`Model`] owns the declarative data of a nonlinear program: variables,
//! objectives, constraints, sparse linear coefficients, quadratic terms, and
//! one nonlinear expression tree per row that has one. Construction is
//! append-only and index-contiguous; after
//! [`initialize_for_differentiation`](Model::initialize_for_differentiation)
//! the structure is frozen and the evaluation API is live.
//!
//! Evaluation entry points share a single "current point": passing
//! `new_x = true` advances the point generation, which is the sole
//! cache-invalidation mechanism. Passing `new_x = false` with a genuinely
//! different `x` is a caller error and yields unspecified (stale) results.
//! The model is not internally synchronized; concurrent use requires
//! external serialization.

use std::collections::BTreeMap;

use tracing::debug;

use crate::engine::DiffEngine;
use crate::error::ModelError;
use crate::expr::{Expr, ExpressionTree};
use crate::sparsity::{HessianPattern, JacobianPattern, SparseHessian, SparseJacobian};

/// Variable domain type, mirroring the single-character codes of the
/// interchange format (`C`, `B`, `I`, `D`, `J`, `S`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum VarType {
    #[default]
    Continuous,
    Binary,
    Integer,
    SemiContinuous,
    SemiInteger,
    String,
}

impl VarType {
    /// Parse the single-character interchange code.
    pub fn from_code(code: char) -> Option<VarType> {
        match code {
            'C' => Some(VarType::Continuous),
            'B' => Some(VarType::Binary),
            'I' => Some(VarType::Integer),
            'D' => Some(VarType::SemiContinuous),
            'J' => Some(VarType::SemiInteger),
            'S' => Some(VarType::String),
            _ => None,
        }
    }

    /// The single-character interchange code.
    pub fn code(&self) -> char {
        match self {
            VarType::Continuous => 'C',
            VarType::Binary => 'B',
            VarType::Integer => 'I',
            VarType::SemiContinuous => 'D',
            VarType::SemiInteger => 'J',
            VarType::String => 'S',
        }
    }
}

/// A decision variable. Bounds default to `[0, +∞)`.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Variable {
    pub name: String,
    pub var_type: VarType,
    pub lb: f64,
    pub ub: f64,
}

impl Default for Variable {
    fn default() -> Self {
        Variable {
            name: String::new(),
            var_type: VarType::Continuous,
            lb: 0.0,
            ub: f64::INFINITY,
        }
    }
}

/// Sparse coefficient vector, kept sorted by index.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SparseVec {
    pub indices: Vec<usize>,
    pub values: Vec<f64>,
}

impl SparseVec {
    /// Build from `(index, value)` pairs; sorts by index.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (usize, f64)>) -> SparseVec {
        let mut pairs: Vec<(usize, f64)> = pairs.into_iter().collect();
        pairs.sort_by_key(|&(i, _)| i);
        SparseVec {
            indices: pairs.iter().map(|&(i, _)| i).collect(),
            values: pairs.iter().map(|&(_, v)| v).collect(),
        }
    }

    /// Iterate `(index, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.indices.iter().copied().zip(self.values.iter().copied())
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    /// Whether no entries are stored.
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// An objective row. The weight multiplier is carried for solver adapters;
/// it does not scale the evaluated function, and neither does `maximize`.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Objective {
    pub name: String,
    pub maximize: bool,
    pub constant: f64,
    pub weight: f64,
    pub coefficients: SparseVec,
}

/// A constraint row. Bounds default to `(−∞, +∞)`.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Constraint {
    pub name: String,
    pub constant: f64,
    pub lb: f64,
    pub ub: f64,
}

impl Default for Constraint {
    fn default() -> Self {
        Constraint {
            name: String::new(),
            constant: 0.0,
            lb: f64::NEG_INFINITY,
            ub: f64::INFINITY,
        }
    }
}

/// Classification of a constraint by its bounds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ConstraintKind {
    /// `lb == ub`.
    Equality,
    /// Finite upper bound only.
    UpperBounded,
    /// Finite lower bound only.
    LowerBounded,
    /// Both bounds finite, distinct.
    Range,
    /// Both bounds infinite.
    Free,
}

impl Constraint {
    /// Classify by bounds.
    pub fn kind(&self) -> ConstraintKind {
        let lb_finite = self.lb.is_finite();
        let ub_finite = self.ub.is_finite();
        match (lb_finite, ub_finite) {
            (true, true) if self.lb == self.ub => ConstraintKind::Equality,
            (true, true) => ConstraintKind::Range,
            (false, true) => ConstraintKind::UpperBounded,
            (true, false) => ConstraintKind::LowerBounded,
            (false, false) => ConstraintKind::Free,
        }
    }
}

/// One quadratic term `coef · x[first] · x[second]` of a row.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct QuadraticTerm {
    pub row: RowId,
    pub first: usize,
    pub second: usize,
    pub coef: f64,
}

/// Identifies an objective or a constraint.
///
/// The legacy convention threads signed indices through every API (`-1` for
/// the first objective, non-negative for constraints); here the sign
/// convention exists only at [`RowId::from_raw`]/[`RowId::raw`], and
/// everything else works with the tagged form. Ordering reproduces the raw
/// ordering: `… < Objective(1) < Objective(0) < Constraint(0) < …`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RowId {
    Objective(usize),
    Constraint(usize),
}

impl RowId {
    /// From the legacy signed index: negative selects an objective
    /// (`-1` → `Objective(0)`), non-negative a constraint.
    pub fn from_raw(raw: i64) -> RowId {
        if raw < 0 {
            RowId::Objective((-raw - 1) as usize)
        } else {
            RowId::Constraint(raw as usize)
        }
    }

    /// The legacy signed index.
    pub fn raw(&self) -> i64 {
        match self {
            RowId::Objective(k) => -(*k as i64) - 1,
            RowId::Constraint(i) => *i as i64,
        }
    }

    /// Whether this row is an objective.
    pub fn is_objective(&self) -> bool {
        matches!(self, RowId::Objective(_))
    }
}

impl PartialOrd for RowId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RowId {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.raw().cmp(&other.raw())
    }
}

/// Storage order of a sparse coefficient matrix.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MajorOrder {
    RowMajor,
    ColumnMajor,
}

/// Sparse linear constraint coefficients as validated
/// starts/indices/values triples.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LinearCoefficients {
    pub major: MajorOrder,
    pub starts: Vec<usize>,
    pub indices: Vec<usize>,
    pub values: Vec<f64>,
}

impl LinearCoefficients {
    /// Validate and build. `n_major` is the number of major dimensions
    /// (rows for row-major), `n_minor` the number of minor ones.
    pub fn new(
        major: MajorOrder,
        starts: Vec<usize>,
        indices: Vec<usize>,
        values: Vec<f64>,
        n_major: usize,
        n_minor: usize,
    ) -> Result<LinearCoefficients, ModelError> {
        let malformed = |reason: String| ModelError::MalformedSparseMatrix { reason };
        if starts.len() != n_major + 1 {
            return Err(malformed(format!(
                "starts has {} entries, expected {}",
                starts.len(),
                n_major + 1
            )));
        }
        if starts[0] != 0 {
            return Err(malformed("starts[0] must be 0".into()));
        }
        if starts.windows(2).any(|w| w[0] > w[1]) {
            return Err(malformed("starts must be non-decreasing".into()));
        }
        if *starts.last().unwrap() != indices.len() || indices.len() != values.len() {
            return Err(malformed(format!(
                "starts ends at {} but {} indices and {} values given",
                starts.last().unwrap(),
                indices.len(),
                values.len()
            )));
        }
        if let Some(&bad) = indices.iter().find(|&&i| i >= n_minor) {
            return Err(malformed(format!(
                "index {bad} out of bounds for minor dimension {n_minor}"
            )));
        }
        Ok(LinearCoefficients {
            major,
            starts,
            indices,
            values,
        })
    }

    /// Number of stored coefficients.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no coefficients are stored.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// One major-dimension segment as `(indices, values)`.
    pub fn segment(&self, major_idx: usize) -> (&[usize], &[f64]) {
        let span = self.starts[major_idx]..self.starts[major_idx + 1];
        (&self.indices[span.clone()], &self.values[span])
    }

    /// Transpose into the other major order via counting sort. Entries in
    /// each new segment come out ordered by the old major index, so the
    /// result is deterministic.
    pub fn transposed(&self, n_minor: usize) -> LinearCoefficients {
        let n_major = self.starts.len() - 1;
        let mut counts = vec![0usize; n_minor + 1];
        for &idx in &self.indices {
            counts[idx + 1] += 1;
        }
        for i in 0..n_minor {
            counts[i + 1] += counts[i];
        }
        let starts = counts.clone();

        let mut indices = vec![0usize; self.indices.len()];
        let mut values = vec![0.0f64; self.values.len()];
        let mut cursor = counts;
        for major in 0..n_major {
            for k in self.starts[major]..self.starts[major + 1] {
                let minor = self.indices[k];
                let pos = cursor[minor];
                cursor[minor] += 1;
                indices[pos] = major;
                values[pos] = self.values[k];
            }
        }

        LinearCoefficients {
            major: match self.major {
                MajorOrder::RowMajor => MajorOrder::ColumnMajor,
                MajorOrder::ColumnMajor => MajorOrder::RowMajor,
            },
            starts,
            indices,
            values,
        }
    }
}

/// The problem instance.
#[derive(Default)]
pub struct Model {
    pub(crate) variables: Vec<Variable>,
    pub(crate) objectives: Vec<Objective>,
    pub(crate) constraints: Vec<Constraint>,
    /// Declared linear constraint coefficients, stored row-major.
    pub(crate) linear: Option<LinearCoefficients>,
    pub(crate) quadratic: Vec<QuadraticTerm>,
    /// Original nonlinear expression per row.
    pub(crate) expressions: BTreeMap<RowId, ExpressionTree>,
    /// Bumped by every structure-changing call.
    structure_version: u64,
    /// Bumped by every `new_x = true` evaluation call.
    generation: u64,
    engine: Option<DiffEngine>,
}

impl Model {
    /// An empty model.
    pub fn new() -> Model {
        Model::default()
    }

    fn touch_structure(&mut self) {
        self.structure_version += 1;
        // Derived state is rebuilt by the next initialize call.
        self.engine = None;
    }

    // ── Construction ──

    /// Append variable `idx`. Indices must arrive contiguously.
    pub fn add_variable(
        &mut self,
        idx: usize,
        name: impl Into<String>,
        lb: f64,
        ub: f64,
        var_type: VarType,
    ) -> Result<(), ModelError> {
        if idx != self.variables.len() {
            return Err(ModelError::IndexOutOfRange {
                expected: self.variables.len(),
                got: idx,
            });
        }
        self.variables.push(Variable {
            name: name.into(),
            var_type,
            lb,
            ub,
        });
        self.touch_structure();
        Ok(())
    }

    /// Append objective `idx` (0-based; raw id `-(idx+1)`).
    pub fn add_objective(
        &mut self,
        idx: usize,
        name: impl Into<String>,
        maximize: bool,
        constant: f64,
        weight: f64,
        coefficients: SparseVec,
    ) -> Result<(), ModelError> {
        if idx != self.objectives.len() {
            return Err(ModelError::IndexOutOfRange {
                expected: self.objectives.len(),
                got: idx,
            });
        }
        for (var, _) in coefficients.iter() {
            self.check_variable(var)?;
        }
        if coefficients.indices.windows(2).any(|w| w[0] >= w[1]) {
            return Err(ModelError::MalformedSparseMatrix {
                reason: "objective coefficients must be strictly increasing by index".into(),
            });
        }
        self.objectives.push(Objective {
            name: name.into(),
            maximize,
            constant,
            weight,
            coefficients,
        });
        self.touch_structure();
        Ok(())
    }

    /// Append constraint `idx`.
    pub fn add_constraint(
        &mut self,
        idx: usize,
        name: impl Into<String>,
        lb: f64,
        ub: f64,
        constant: f64,
    ) -> Result<(), ModelError> {
        if idx != self.constraints.len() {
            return Err(ModelError::IndexOutOfRange {
                expected: self.constraints.len(),
                got: idx,
            });
        }
        self.constraints.push(Constraint {
            name: name.into(),
            constant,
            lb,
            ub,
        });
        self.touch_structure();
        Ok(())
    }

    /// Set the linear constraint coefficients from starts/indices/values
    /// triples in either major order. Stored row-major.
    pub fn set_linear_coefficients(
        &mut self,
        major: MajorOrder,
        starts: Vec<usize>,
        indices: Vec<usize>,
        values: Vec<f64>,
    ) -> Result<(), ModelError> {
        let (n_major, n_minor) = match major {
            MajorOrder::RowMajor => (self.constraints.len(), self.variables.len()),
            MajorOrder::ColumnMajor => (self.variables.len(), self.constraints.len()),
        };
        let coeffs = LinearCoefficients::new(major, starts, indices, values, n_major, n_minor)?;
        let row_major = match major {
            MajorOrder::RowMajor => coeffs,
            MajorOrder::ColumnMajor => coeffs.transposed(n_minor),
        };
        debug!(
            nnz = row_major.len(),
            constraints = self.constraints.len(),
            "linear coefficients set"
        );
        self.linear = Some(row_major);
        self.touch_structure();
        Ok(())
    }

    /// Append one quadratic term.
    pub fn add_quadratic_term(
        &mut self,
        row: RowId,
        first: usize,
        second: usize,
        coef: f64,
    ) -> Result<(), ModelError> {
        self.check_row(row)?;
        self.check_variable(first)?;
        self.check_variable(second)?;
        self.quadratic.push(QuadraticTerm {
            row,
            first,
            second,
            coef,
        });
        self.touch_structure();
        Ok(())
    }

    /// Attach the nonlinear expression of a row, replacing any previous one.
    pub fn set_nonlinear_expression(&mut self, row: RowId, root: Expr) -> Result<(), ModelError> {
        self.check_row(row)?;
        self.expressions.insert(row, ExpressionTree::new(root));
        self.touch_structure();
        Ok(())
    }

    fn check_row(&self, row: RowId) -> Result<(), ModelError> {
        let known = match row {
            RowId::Objective(k) => k < self.objectives.len(),
            RowId::Constraint(i) => i < self.constraints.len(),
        };
        if known {
            Ok(())
        } else {
            Err(ModelError::UnknownRow { row })
        }
    }

    fn check_variable(&self, idx: usize) -> Result<(), ModelError> {
        if idx < self.variables.len() {
            Ok(())
        } else {
            Err(ModelError::UnknownVariable {
                idx,
                num_vars: self.variables.len(),
            })
        }
    }

    // ── Structural queries ──

    /// Number of variables.
    pub fn num_variables(&self) -> usize {
        self.variables.len()
    }

    /// Number of objectives.
    pub fn num_objectives(&self) -> usize {
        self.objectives.len()
    }

    /// Number of constraints.
    pub fn num_constraints(&self) -> usize {
        self.constraints.len()
    }

    /// All variables, in index order.
    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    /// All objectives, in index order.
    pub fn objectives(&self) -> &[Objective] {
        &self.objectives
    }

    /// All constraints, in index order.
    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    /// Bound classification of every constraint.
    pub fn constraint_kinds(&self) -> Vec<ConstraintKind> {
        self.constraints.iter().map(Constraint::kind).collect()
    }

    /// Declared linear coefficients, row-major. `None` if never set.
    pub fn linear_coefficients_row_major(&self) -> Option<&LinearCoefficients> {
        self.linear.as_ref()
    }

    /// Declared linear coefficients transposed to column-major.
    pub fn linear_coefficients_column_major(&self) -> Option<LinearCoefficients> {
        self.linear
            .as_ref()
            .map(|l| l.transposed(self.variables.len()))
    }

    /// All quadratic terms.
    pub fn quadratic_terms(&self) -> &[QuadraticTerm] {
        &self.quadratic
    }

    /// Distinct rows carrying quadratic terms, ascending.
    pub fn quadratic_row_ids(&self) -> Vec<RowId> {
        let mut rows: Vec<RowId> = self.quadratic.iter().map(|t| t.row).collect();
        rows.sort();
        rows.dedup();
        rows
    }

    /// Rows with a nonlinear expression, ascending.
    pub fn nonlinear_row_ids(&self) -> Vec<RowId> {
        self.expressions.keys().copied().collect()
    }

    /// The original expression tree of a row, if any.
    pub fn expression_tree(&self, row: RowId) -> Option<&ExpressionTree> {
        self.expressions.get(&row)
    }

    /// Monotone counter bumped by every structure-changing call.
    pub fn structure_version(&self) -> u64 {
        self.structure_version
    }

    /// Current point generation (bumped by `new_x = true`).
    pub fn point_generation(&self) -> u64 {
        self.generation
    }

    // ── Evaluation ──

    /// Build the derivative engine: merge linear and quadratic contributions
    /// into per-row expressions and set up the dense tape domain. Must be
    /// called after construction and before any derivative or sweep entry
    /// point; function values work without it.
    pub fn initialize_for_differentiation(&mut self) -> Result<(), ModelError> {
        let engine = DiffEngine::build(self)?;
        debug!(
            taped_rows = engine.num_taped_rows(),
            nonlinear_variables = engine.num_nonlinear_variables(),
            "derivative engine initialized"
        );
        self.engine = Some(engine);
        Ok(())
    }

    fn bump_generation(&mut self, new_x: bool) -> u64 {
        if new_x {
            self.generation += 1;
        }
        self.generation
    }

    fn engine_mut(&mut self) -> Result<&mut DiffEngine, ModelError> {
        self.engine.as_mut().ok_or(ModelError::TapeNotBuilt)
    }

    /// Value of one row at `x` via direct tree evaluation.
    ///
    /// Row value = declared constant + linear terms + quadratic terms +
    /// nonlinear expression. The per-tree value cache is keyed by the point
    /// generation, so repeated calls at the same point skip the traversal.
    pub fn calculate_function_value(
        &mut self,
        row: RowId,
        x: &[f64],
        new_x: bool,
    ) -> Result<f64, ModelError> {
        self.check_row(row)?;
        assert_eq!(x.len(), self.variables.len(), "wrong number of variables");
        let generation = self.bump_generation(new_x);

        let linear: f64 = match row {
            RowId::Objective(k) => self.objectives[k]
                .coefficients
                .iter()
                .map(|(j, c)| c * x[j])
                .sum(),
            RowId::Constraint(i) => match &self.linear {
                Some(l) if i + 1 < l.starts.len() => {
                    let (idx, val) = l.segment(i);
                    idx.iter().zip(val).map(|(&j, &c)| c * x[j]).sum()
                }
                _ => 0.0,
            },
        };
        let quadratic: f64 = self
            .quadratic
            .iter()
            .filter(|t| t.row == row)
            .map(|t| t.coef * x[t.first] * x[t.second])
            .sum();
        let nonlinear = self
            .expressions
            .get(&row)
            .map_or(0.0, |tree| tree.evaluate(x, generation));
        let constant = match row {
            RowId::Objective(k) => self.objectives[k].constant,
            RowId::Constraint(i) => self.constraints[i].constant,
        };

        Ok(constant + linear + quadratic + nonlinear)
    }

    /// All objective values via direct tree evaluation.
    pub fn calculate_all_objective_function_values(
        &mut self,
        x: &[f64],
        new_x: bool,
    ) -> Result<Vec<f64>, ModelError> {
        let mut first = new_x;
        (0..self.objectives.len())
            .map(|k| {
                let v = self.calculate_function_value(RowId::Objective(k), x, first);
                first = false;
                v
            })
            .collect()
    }

    /// All constraint values via direct tree evaluation.
    pub fn calculate_all_constraint_function_values(
        &mut self,
        x: &[f64],
        new_x: bool,
    ) -> Result<Vec<f64>, ModelError> {
        let mut first = new_x;
        (0..self.constraints.len())
            .map(|i| {
                let v = self.calculate_function_value(RowId::Constraint(i), x, first);
                first = false;
                v
            })
            .collect()
    }

    /// All objective values, computing derivative information up to
    /// `highest_order` in the same pass (0, 1, or 2).
    pub fn calculate_all_objective_function_values_with_order(
        &mut self,
        x: &[f64],
        obj_weights: &[f64],
        con_weights: &[f64],
        new_x: bool,
        highest_order: u8,
    ) -> Result<Vec<f64>, ModelError> {
        self.iterate(x, obj_weights, con_weights, new_x, highest_order)?;
        Ok(self.engine_mut()?.objective_values().to_vec())
    }

    /// All constraint values, computing derivative information up to
    /// `highest_order` in the same pass (0, 1, or 2).
    pub fn calculate_all_constraint_function_values_with_order(
        &mut self,
        x: &[f64],
        obj_weights: &[f64],
        con_weights: &[f64],
        new_x: bool,
        highest_order: u8,
    ) -> Result<Vec<f64>, ModelError> {
        self.iterate(x, obj_weights, con_weights, new_x, highest_order)?;
        Ok(self.engine_mut()?.constraint_values().to_vec())
    }

    /// Dense gradient of one objective (length = number of variables).
    pub fn calculate_objective_function_gradient(
        &mut self,
        x: &[f64],
        objective: usize,
        new_x: bool,
    ) -> Result<Vec<f64>, ModelError> {
        if objective >= self.objectives.len() {
            return Err(ModelError::UnknownRow {
                row: RowId::Objective(objective),
            });
        }
        let obj_w = vec![0.0; self.objectives.len()];
        let con_w = vec![0.0; self.constraints.len()];
        self.iterate(x, &obj_w, &con_w, new_x, 1)?;
        Ok(self.engine_mut()?.objective_gradient(objective).to_vec())
    }

    /// Sparse row-major Jacobian of all constraints.
    pub fn calculate_all_constraint_function_gradients(
        &mut self,
        x: &[f64],
        obj_weights: &[f64],
        con_weights: &[f64],
        new_x: bool,
        highest_order: u8,
    ) -> Result<SparseJacobian, ModelError> {
        self.iterate(x, obj_weights, con_weights, new_x, highest_order.max(1))?;
        Ok(self.engine_mut()?.jacobian().clone())
    }

    /// Upper-triangular Hessian of the Lagrangian
    /// `∑ obj_weights[k]·objective_k + ∑ con_weights[i]·constraint_i`,
    /// 0-based over the dense nonlinear-variable space.
    ///
    /// Changing the weights without `new_x = true` returns the cached
    /// Hessian of the previous weights.
    pub fn calculate_lagrangian_hessian(
        &mut self,
        x: &[f64],
        obj_weights: &[f64],
        con_weights: &[f64],
        new_x: bool,
        highest_order: u8,
    ) -> Result<SparseHessian, ModelError> {
        self.iterate(x, obj_weights, con_weights, new_x, highest_order.max(2))?;
        Ok(self.engine_mut()?.hessian().clone())
    }

    /// Hessian of a single row: the Lagrangian Hessian with a unit weight on
    /// that row and zeros elsewhere. The pattern stays the full Lagrangian
    /// pattern; entries contributed by other rows are zero.
    pub fn calculate_hessian(
        &mut self,
        x: &[f64],
        row: RowId,
        new_x: bool,
    ) -> Result<SparseHessian, ModelError> {
        self.check_row(row)?;
        let mut obj_w = vec![0.0; self.objectives.len()];
        let mut con_w = vec![0.0; self.constraints.len()];
        match row {
            RowId::Objective(k) => obj_w[k] = 1.0,
            RowId::Constraint(i) => con_w[i] = 1.0,
        }
        self.calculate_lagrangian_hessian(x, &obj_w, &con_w, new_x, 2)
    }

    /// The Jacobian sparsity pattern. Structural, value-independent, and
    /// stable until the model structure changes.
    pub fn jacobian_sparsity_pattern(&mut self) -> Result<JacobianPattern, ModelError> {
        Ok(self.engine_mut()?.jacobian_pattern().clone())
    }

    /// The Lagrangian Hessian sparsity pattern, upper triangle over the
    /// dense nonlinear-variable space.
    pub fn lagrangian_hessian_sparsity_pattern(&mut self) -> Result<HessianPattern, ModelError> {
        Ok(self.engine_mut()?.hessian_pattern().clone())
    }

    /// Map from original variable index to its dense position in the tape
    /// domain (the union of all rows' nonlinear variables, ascending).
    pub fn nonlinear_variables_index_map(&mut self) -> Result<BTreeMap<usize, usize>, ModelError> {
        Ok(self.engine_mut()?.variable_map().clone())
    }

    /// Dense position → original variable index.
    pub fn nonlinear_variables(&mut self) -> Result<Vec<usize>, ModelError> {
        Ok(self.engine_mut()?.reverse_variable_map().to_vec())
    }

    // ── Raw sweeps ──

    /// AD forward sweep over the dense domain.
    ///
    /// Order 0 re-evaluates at `vals` (the dense point) and returns the
    /// taped row values; order 1 treats `vals` as a direction and returns
    /// per-row directional derivatives; order 2 treats `vals` as the
    /// second-order input Taylor coefficient and returns the second-order
    /// output coefficients. Each order requires the previous one at the same
    /// point; violations panic.
    pub fn forward_sweep(&mut self, order: u8, vals: &[f64]) -> Result<Vec<f64>, ModelError> {
        let engine = self.engine.as_mut().ok_or(ModelError::TapeNotBuilt)?;
        Ok(engine.forward(order, vals))
    }

    /// AD reverse sweep with one weight per taped row.
    ///
    /// Order 1 returns the gradient of the weighted row sum over the dense
    /// domain; order 2 returns the interleaved first/second-order adjoints
    /// (`result[2k]` = weighted first partial, `result[2k+1]` = Hessian
    /// entry for the direction of the preceding order-1 forward sweep).
    /// Requires the matching forward sweeps; violations panic.
    pub fn reverse_sweep(&mut self, order: u8, weights: &[f64]) -> Result<Vec<f64>, ModelError> {
        let engine = self.engine.as_mut().ok_or(ModelError::TapeNotBuilt)?;
        Ok(engine.reverse(order, weights))
    }

    fn iterate(
        &mut self,
        x: &[f64],
        obj_weights: &[f64],
        con_weights: &[f64],
        new_x: bool,
        highest_order: u8,
    ) -> Result<(), ModelError> {
        assert_eq!(x.len(), self.variables.len(), "wrong number of variables");
        assert_eq!(
            obj_weights.len(),
            self.objectives.len(),
            "one objective weight per objective required"
        );
        assert_eq!(
            con_weights.len(),
            self.constraints.len(),
            "one constraint weight per constraint required"
        );
        assert!(highest_order <= 2, "highest_order must be 0, 1, or 2");
        let generation = self.bump_generation(new_x);

        // The engine is moved out for the duration of the call so it can
        // read the model while being driven mutably.
        let mut engine = self.engine.take().ok_or(ModelError::TapeNotBuilt)?;
        let result = engine.iterate(self, x, generation, obj_weights, con_weights, highest_order);
        self.engine = Some(engine);
        result
    }
}
