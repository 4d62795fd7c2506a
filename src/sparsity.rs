//! Sparse derivative structures and structural sparsity detection.
//!
//! Patterns are purely structural: they depend on the recorded operation
//! sequence, never on the numeric point. The Hessian pattern is detected by
//! walking the tape forward propagating input-dependency bitsets and marking
//! variable interactions at nonlinear operations.

use std::collections::BTreeSet;

use crate::float::Float;
use crate::opcode::{classify, is_binary, OpClass, OpCode, UNUSED};
use crate::tape::Tape;

/// Row-major Jacobian sparsity over the constraint rows.
///
/// Within each row, entries for purely-linear variables come first (their
/// partials are constants) followed by the algorithmically differentiated
/// entries in ascending variable order. `con_vals[row]` is the length of the
/// constant prefix.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct JacobianPattern {
    /// One more entry than the number of constraint rows; non-decreasing.
    pub starts: Vec<usize>,
    /// Variable (column) indices, segment per row.
    pub indices: Vec<usize>,
    /// Number of leading constant (linear-only) entries per row.
    pub con_vals: Vec<usize>,
}

impl JacobianPattern {
    /// Number of structural nonzeros.
    pub fn nnz(&self) -> usize {
        self.indices.len()
    }

    /// Column indices of one row's segment.
    pub fn row_indices(&self, row: usize) -> &[usize] {
        &self.indices[self.starts[row]..self.starts[row + 1]]
    }
}

/// Upper-triangular Hessian sparsity, 0-based over the dense
/// nonlinear-variable space, sorted by `(row, col)` with `row <= col`.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HessianPattern {
    pub rows: Vec<usize>,
    pub cols: Vec<usize>,
}

impl HessianPattern {
    /// Number of structural nonzeros.
    pub fn nnz(&self) -> usize {
        self.rows.len()
    }

    /// Whether `(i, j)` (in either order) is in the pattern.
    pub fn contains(&self, i: usize, j: usize) -> bool {
        let (r, c) = if i <= j { (i, j) } else { (j, i) };
        self.rows
            .iter()
            .zip(self.cols.iter())
            .any(|(&pr, &pc)| pr == r && pc == c)
    }
}

/// Row-major sparse Jacobian: the pattern plus the partial-derivative values.
#[derive(Clone, Debug, PartialEq)]
pub struct SparseJacobian {
    pub starts: Vec<usize>,
    pub indices: Vec<usize>,
    pub con_vals: Vec<usize>,
    pub values: Vec<f64>,
}

impl SparseJacobian {
    /// `(column, value)` pairs of one row's segment.
    pub fn row(&self, row: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        let span = self.starts[row]..self.starts[row + 1];
        self.indices[span.clone()]
            .iter()
            .copied()
            .zip(self.values[span].iter().copied())
    }
}

/// Upper-triangular sparse Hessian: pattern positions plus values.
#[derive(Clone, Debug, PartialEq)]
pub struct SparseHessian {
    pub rows: Vec<usize>,
    pub cols: Vec<usize>,
    pub values: Vec<f64>,
}

impl SparseHessian {
    /// Number of stored entries.
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// Value at `(i, j)` (in either order), zero if outside the pattern.
    pub fn get(&self, i: usize, j: usize) -> f64 {
        let (r, c) = if i <= j { (i, j) } else { (j, i) };
        self.rows
            .iter()
            .zip(self.cols.iter())
            .position(|(&pr, &pc)| pr == r && pc == c)
            .map_or(0.0, |k| self.values[k])
    }
}

/// Detect the Hessian sparsity pattern of the weighted sum of all tape
/// outputs.
///
/// Propagates input-dependency bitsets forward through the tape. Linear ops
/// merge dependency sets; unary nonlinear ops mark every pair within the
/// operand's set; `Mul` marks cross pairs between its operands' sets; `Div`
/// additionally marks pairs within the divisor's set, and `Pow` pairs within
/// the whole union (both operands can curve). Selection ops (`Min`, `Max`)
/// are piecewise linear and only merge.
pub(crate) fn detect_hessian_pattern<F: Float>(tape: &Tape<F>) -> HessianPattern {
    let num_inputs = tape.num_inputs();
    let num_words = num_inputs.div_ceil(64);
    let mut deps: Vec<Vec<u64>> = vec![vec![0u64; num_words]; tape.len()];
    let mut interactions: BTreeSet<(usize, usize)> = BTreeSet::new();

    let mut input_idx = 0usize;
    for i in 0..tape.len() {
        match tape.opcodes[i] {
            OpCode::Input => {
                deps[i][input_idx / 64] |= 1u64 << (input_idx % 64);
                input_idx += 1;
            }
            OpCode::Const => {}
            op => {
                let [a_idx, b_idx] = tape.arg_indices[i];
                let a = a_idx as usize;

                match classify(op) {
                    OpClass::Linear | OpClass::Selection => {
                        union_into(&mut deps, i, a);
                        if is_binary(op) && b_idx != UNUSED {
                            union_into(&mut deps, i, b_idx as usize);
                        }
                    }
                    OpClass::UnaryNonlinear => {
                        union_into(&mut deps, i, a);
                        mark_pairs_within(&deps[i].clone(), num_inputs, &mut interactions);
                    }
                    OpClass::BinaryNonlinear => {
                        let b = b_idx as usize;
                        let deps_a = deps[a].clone();
                        let deps_b = deps[b].clone();
                        union_into(&mut deps, i, a);
                        union_into(&mut deps, i, b);
                        mark_cross_pairs(&deps_a, &deps_b, num_inputs, &mut interactions);
                        match op {
                            // ∂²(a/b)/∂b² ≠ 0
                            OpCode::Div => {
                                mark_pairs_within(&deps_b, num_inputs, &mut interactions)
                            }
                            // a^b curves in both operands
                            OpCode::Pow => {
                                mark_pairs_within(&deps[i].clone(), num_inputs, &mut interactions)
                            }
                            _ => {}
                        }
                    }
                }
            }
        }
    }

    let mut rows = Vec::with_capacity(interactions.len());
    let mut cols = Vec::with_capacity(interactions.len());
    for (r, c) in interactions {
        rows.push(r);
        cols.push(c);
    }
    HessianPattern { rows, cols }
}

/// Union `deps[src]` into `deps[dst]`.
fn union_into(deps: &mut [Vec<u64>], dst: usize, src: usize) {
    if dst == src {
        return;
    }
    let src_deps = deps[src].clone();
    for (d, s) in deps[dst].iter_mut().zip(src_deps) {
        *d |= s;
    }
}

/// Mark every unordered pair within one dependency set (upper triangle).
fn mark_pairs_within(dep_set: &[u64], num_inputs: usize, out: &mut BTreeSet<(usize, usize)>) {
    let bits = extract_bits(dep_set, num_inputs);
    for (k, &i) in bits.iter().enumerate() {
        for &j in &bits[k..] {
            out.insert((i, j));
        }
    }
}

/// Mark every pair with one index from each set (upper triangle).
fn mark_cross_pairs(
    deps_a: &[u64],
    deps_b: &[u64],
    num_inputs: usize,
    out: &mut BTreeSet<(usize, usize)>,
) {
    let bits_a = extract_bits(deps_a, num_inputs);
    let bits_b = extract_bits(deps_b, num_inputs);
    for &a in &bits_a {
        for &b in &bits_b {
            out.insert(if a <= b { (a, b) } else { (b, a) });
        }
    }
}

/// Set bit positions of a bitset, ascending.
fn extract_bits(bitset: &[u64], max_bits: usize) -> Vec<usize> {
    let mut result = Vec::new();
    for (word_idx, &word) in bitset.iter().enumerate() {
        let mut w = word;
        while w != 0 {
            let bit = w.trailing_zeros() as usize;
            let pos = word_idx * 64 + bit;
            if pos < max_bits {
                result.push(pos);
            }
            w &= w - 1;
        }
    }
    result
}
