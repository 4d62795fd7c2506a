//! Re-evaluable multi-output bytecode tape.
//!
//! The tape stores opcodes rather than precomputed multipliers, so it can be
//! swept repeatedly at new inputs without re-recording. One tape carries every
//! merged row expression of a problem: inputs are the dense nonlinear
//! variables, and each row's root becomes one output.
//!
//! The recorded operation sequence reflects one execution path. Expressions
//! with data-dependent branches (conditionals) must be re-recorded at every
//! new point; the expression layer reports this via its must-retape flag.

use num_traits::{Float as NumFloat, FloatConst};

use crate::dual::Dual;
use crate::float::{Erf, Float, IsAllZero};
use crate::opcode::{self, OpCode, UNUSED};

/// A bytecode tape over scalar type `F`.
pub struct Tape<F: Float> {
    pub(crate) opcodes: Vec<OpCode>,
    pub(crate) arg_indices: Vec<[u32; 2]>,
    pub(crate) values: Vec<F>,
    pub(crate) num_inputs: u32,
    pub(crate) num_entries: u32,
    /// Tape indices of the row roots, in row order.
    pub(crate) output_indices: Vec<u32>,
}

impl<F: Float> Tape<F> {
    /// Create an empty tape.
    pub fn new() -> Self {
        Tape {
            opcodes: Vec::new(),
            arg_indices: Vec::new(),
            values: Vec::new(),
            num_inputs: 0,
            num_entries: 0,
            output_indices: Vec::new(),
        }
    }

    /// Create a tape with pre-allocated capacity.
    pub fn with_capacity(est_ops: usize) -> Self {
        Tape {
            opcodes: Vec::with_capacity(est_ops),
            arg_indices: Vec::with_capacity(est_ops),
            values: Vec::with_capacity(est_ops),
            num_inputs: 0,
            num_entries: 0,
            output_indices: Vec::new(),
        }
    }

    /// Register an independent variable. Inputs must be registered before any
    /// operation, so input `i` lives at tape index `i`.
    #[inline]
    pub fn new_input(&mut self, value: F) -> u32 {
        debug_assert_eq!(
            self.num_inputs, self.num_entries,
            "inputs must be registered first"
        );
        let idx = self.num_entries;
        self.num_entries += 1;
        self.num_inputs += 1;
        self.opcodes.push(OpCode::Input);
        self.arg_indices.push([UNUSED, UNUSED]);
        self.values.push(value);
        idx
    }

    /// Record a scalar constant.
    #[inline]
    pub fn push_const(&mut self, value: F) -> u32 {
        let idx = self.num_entries;
        self.num_entries += 1;
        self.opcodes.push(OpCode::Const);
        self.arg_indices.push([UNUSED, UNUSED]);
        self.values.push(value);
        idx
    }

    /// Record an operation whose value at the recording point is `value`.
    ///
    /// Constant subcomputations fold into a single `Const`, and the safe
    /// identity patterns (`x + 0`, `x − 0`, `x · 1`, `x / 1`) short-circuit to
    /// the live operand. Folding decisions depend only on operand constness,
    /// so the tape structure is stable across recording points.
    #[inline]
    pub fn push_op(&mut self, op: OpCode, arg0: u32, arg1: u32, value: F) -> u32 {
        let arg0_const = self.opcodes[arg0 as usize] == OpCode::Const;
        let arg1_const = arg1 == UNUSED || self.opcodes[arg1 as usize] == OpCode::Const;
        if arg0_const && arg1_const {
            return self.push_const(value);
        }

        if arg1 != UNUSED {
            let zero = F::zero();
            let one = F::one();
            match op {
                OpCode::Add => {
                    if arg1_const && self.values[arg1 as usize] == zero {
                        return arg0;
                    }
                    if arg0_const && self.values[arg0 as usize] == zero {
                        return arg1;
                    }
                }
                OpCode::Sub => {
                    if arg1_const && self.values[arg1 as usize] == zero {
                        return arg0;
                    }
                }
                OpCode::Mul => {
                    if arg1_const && self.values[arg1 as usize] == one {
                        return arg0;
                    }
                    if arg0_const && self.values[arg0 as usize] == one {
                        return arg1;
                    }
                }
                OpCode::Div => {
                    if arg1_const && self.values[arg1 as usize] == one {
                        return arg0;
                    }
                }
                _ => {}
            }
        }

        let idx = self.num_entries;
        self.num_entries += 1;
        self.opcodes.push(op);
        self.arg_indices.push([arg0, arg1]);
        self.values.push(value);
        idx
    }

    /// Mark the row roots, in row order.
    pub fn set_outputs(&mut self, indices: &[u32]) {
        self.output_indices = indices.to_vec();
    }

    /// Recorded value (or latest swept value) at a tape index.
    #[inline]
    pub fn value_at(&self, idx: u32) -> F {
        self.values[idx as usize]
    }

    /// Number of independent variables.
    #[inline]
    pub fn num_inputs(&self) -> usize {
        self.num_inputs as usize
    }

    /// Number of outputs (taped rows).
    #[inline]
    pub fn num_outputs(&self) -> usize {
        self.output_indices.len()
    }

    /// Total number of tape entries (inputs + constants + operations).
    #[inline]
    pub fn len(&self) -> usize {
        self.opcodes.len()
    }

    /// Whether the tape holds no entries at all.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.opcodes.is_empty()
    }

    /// Output values after the latest sweep, in row order.
    pub fn output_values(&self) -> Vec<F> {
        self.output_indices
            .iter()
            .map(|&idx| self.values[idx as usize])
            .collect()
    }

    // ── Sweeps ──

    /// Primal forward sweep: re-evaluate the tape at new inputs, in place.
    pub fn forward(&mut self, inputs: &[F]) {
        assert_eq!(inputs.len(), self.num_inputs as usize, "wrong number of inputs");

        for (i, &v) in inputs.iter().enumerate() {
            self.values[i] = v;
        }

        for i in 0..self.opcodes.len() {
            match self.opcodes[i] {
                OpCode::Input | OpCode::Const => continue,
                op => {
                    let [a_idx, b_idx] = self.arg_indices[i];
                    let a = self.values[a_idx as usize];
                    let b = if b_idx != UNUSED {
                        self.values[b_idx as usize]
                    } else {
                        F::zero()
                    };
                    self.values[i] = opcode::eval_forward(op, a, b);
                }
            }
        }
    }

    /// Tangent-carrying forward sweep into an external buffer.
    ///
    /// Reads opcodes and constants from `self` but does not mutate it.
    /// Generic over the scalar so it serves both `Dual<F>` (first tangent
    /// order) and `Dual<Dual<F>>` (second Taylor coefficient).
    pub fn forward_tangent<T>(&self, inputs: &[T], buf: &mut Vec<T>)
    where
        T: NumFloat + FloatConst + Erf,
    {
        assert_eq!(inputs.len(), self.num_inputs as usize, "wrong number of inputs");

        let n = self.num_entries as usize;
        buf.clear();
        buf.resize(n, T::zero());

        let mut input_idx = 0usize;
        for i in 0..self.opcodes.len() {
            match self.opcodes[i] {
                OpCode::Input => {
                    buf[i] = inputs[input_idx];
                    input_idx += 1;
                }
                OpCode::Const => {
                    buf[i] = T::from(self.values[i]).unwrap();
                }
                op => {
                    let [a_idx, b_idx] = self.arg_indices[i];
                    let a = buf[a_idx as usize];
                    let b = if b_idx != UNUSED {
                        buf[b_idx as usize]
                    } else {
                        T::zero()
                    };
                    buf[i] = opcode::eval_forward(op, a, b);
                }
            }
        }
    }

    /// Weighted reverse sweep over the primal values.
    ///
    /// Seeds output `k` with `seeds[k]` and returns the adjoints of the
    /// inputs: `∑_k seeds[k] · ∂output_k/∂x`. Requires a prior [`forward`]
    /// (or the original recording) at the point of interest.
    pub fn reverse_seeded(&self, seeds: &[F]) -> Vec<F> {
        assert_eq!(
            seeds.len(),
            self.output_indices.len(),
            "seeds length must match number of outputs"
        );

        let n = self.num_entries as usize;
        let mut adjoints = vec![F::zero(); n];
        for (&out_idx, &w) in self.output_indices.iter().zip(seeds.iter()) {
            if w != F::zero() {
                adjoints[out_idx as usize] = adjoints[out_idx as usize] + w;
            }
        }

        self.reverse_core(&mut adjoints, |i| {
            let [a_idx, b_idx] = self.arg_indices[i];
            let a = self.values[a_idx as usize];
            let b = if b_idx != UNUSED {
                self.values[b_idx as usize]
            } else {
                F::zero()
            };
            opcode::reverse_partials(self.opcodes[i], a, b, self.values[i])
        });

        adjoints.truncate(self.num_inputs as usize);
        adjoints
    }

    /// Weighted reverse sweep over tangent-carrying values.
    ///
    /// `tangent_vals` must come from a [`forward_tangent`] sweep on this tape.
    /// Writes the full adjoint buffer into `buf`; entries `0..num_inputs` hold
    /// the input adjoints, whose tangent components are one Hessian column
    /// when the forward sweep used a unit direction.
    pub fn reverse_tangent_seeded(
        &self,
        tangent_vals: &[Dual<F>],
        seeds: &[F],
        buf: &mut Vec<Dual<F>>,
    ) {
        assert_eq!(
            seeds.len(),
            self.output_indices.len(),
            "seeds length must match number of outputs"
        );
        assert_eq!(tangent_vals.len(), self.num_entries as usize, "stale tangent buffer");

        let n = self.num_entries as usize;
        buf.clear();
        buf.resize(n, Dual::constant(F::zero()));
        for (&out_idx, &w) in self.output_indices.iter().zip(seeds.iter()) {
            if w != F::zero() {
                buf[out_idx as usize] = buf[out_idx as usize] + Dual::constant(w);
            }
        }

        for i in (0..self.opcodes.len()).rev() {
            match self.opcodes[i] {
                OpCode::Input | OpCode::Const => continue,
                op => {
                    let adj = buf[i];
                    if adj.is_all_zero() {
                        continue;
                    }
                    buf[i] = Dual::constant(F::zero());

                    let [a_idx, b_idx] = self.arg_indices[i];
                    let a = tangent_vals[a_idx as usize];
                    let b = if b_idx != UNUSED {
                        tangent_vals[b_idx as usize]
                    } else {
                        Dual::constant(F::zero())
                    };
                    let r = tangent_vals[i];
                    let (da, db) = opcode::reverse_partials(op, a, b, r);

                    buf[a_idx as usize] = buf[a_idx as usize] + da * adj;
                    if b_idx != UNUSED {
                        buf[b_idx as usize] = buf[b_idx as usize] + db * adj;
                    }
                }
            }
        }
    }

    /// Core primal reverse loop with zero-adjoint skipping.
    fn reverse_core(&self, adjoints: &mut [F], partials: impl Fn(usize) -> (F, F)) {
        for i in (0..self.opcodes.len()).rev() {
            match self.opcodes[i] {
                OpCode::Input | OpCode::Const => continue,
                _ => {
                    let adj = adjoints[i];
                    if adj == F::zero() {
                        continue;
                    }
                    adjoints[i] = F::zero();

                    let [a_idx, b_idx] = self.arg_indices[i];
                    let (da, db) = partials(i);
                    adjoints[a_idx as usize] = adjoints[a_idx as usize] + da * adj;
                    if b_idx != UNUSED {
                        adjoints[b_idx as usize] = adjoints[b_idx as usize] + db * adj;
                    }
                }
            }
        }
    }
}

impl<F: Float> Default for Tape<F> {
    fn default() -> Self {
        Self::new()
    }
}
