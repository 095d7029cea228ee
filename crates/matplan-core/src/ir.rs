//! Linear intermediate representation for matrix computations.
//!
//! A computation is an ordered list of commands over two flat, index-addressed
//! tables: matrices (2-D buffers with a defined lifetime) and submatrices
//! (rectangular views onto them). Commands hold ids, never references, so a
//! structural rewrite is a table edit plus a remap pass over the commands.
//!
//! Rewrites mark dead commands as [`Command::NoOp`] while in flight and call
//! [`Computation::renumber`] before returning; a renumbered computation
//! contains no `NoOp` and no unreferenced table entries.

use crate::{Error, Result};

/// Identifier of a matrix: an index into `Computation::matrices`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MatrixId(pub usize);

impl MatrixId {
    /// Create a new matrix id.
    pub fn new(id: usize) -> Self {
        Self(id)
    }

    /// Get the underlying index.
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Identifier of a submatrix: an index into `Computation::submatrices`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubmatrixId(pub usize);

impl SubmatrixId {
    /// Create a new submatrix id.
    pub fn new(id: usize) -> Self {
        Self(id)
    }

    /// Get the underlying index.
    pub fn index(&self) -> usize {
        self.0
    }
}

// ──────────────────────────────── Matrix ─────────────────────────────────

/// A 2-D numeric buffer with a fixed extent and a bounded lifetime.
///
/// The lifetime is delimited by an allocate and a deallocate command, both
/// optional: input matrices have no allocate (they exist before the sequence
/// starts) and output matrices have no deallocate (they outlive it).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Matrix {
    pub rows: usize,
    pub cols: usize,

    /// Designated input of the computation; content is provided externally.
    pub is_input: bool,

    /// Designated output of the computation; content is consumed externally.
    pub is_output: bool,
}

impl Matrix {
    /// Create a temporary (non-input, non-output) matrix.
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            is_input: false,
            is_output: false,
        }
    }
}

// ─────────────────────────────── Submatrix ───────────────────────────────

/// A rectangular view onto a matrix.
///
/// Submatrices are produced during compilation and treated as immutable by
/// the optimizer, except that a coalescing merge redirects `matrix` to the
/// surviving buffer. Offsets and extents are never edited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Submatrix {
    pub matrix: MatrixId,
    pub row_offset: usize,
    pub num_rows: usize,
    pub col_offset: usize,
    pub num_cols: usize,
}

// ──────────────────────────────── Command ────────────────────────────────

/// One program element of a computation, tagged by kind.
///
/// Operand arity and meaning are fixed per kind; legality (index ranges,
/// dimension agreement, ordering) is validated by the checker rather than
/// encoded in the type, since it depends on cross-referenced table state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Allocate `matrix` with zeroed content. Content becomes defined.
    AllocZeroed { matrix: MatrixId },

    /// Allocate `matrix` with undefined content. The first access must be a
    /// full write.
    AllocUndefined { matrix: MatrixId },

    /// Release `matrix`. Its content is no longer defined.
    Deallocate { matrix: MatrixId },

    /// Forward operation of a component: reads `input`, produces `output`.
    Propagate {
        component: crate::topology::ComponentId,
        input: SubmatrixId,
        output: SubmatrixId,
    },

    /// Backward operation of a component: reads `output_deriv`, produces
    /// `input_deriv`. Updatable components also adjust their parameters,
    /// which is a side effect not captured by the operands.
    Backprop {
        component: crate::topology::ComponentId,
        output_deriv: SubmatrixId,
        input_deriv: SubmatrixId,
    },

    /// Copy `source` into `dest` (overwrite).
    Copy {
        source: SubmatrixId,
        dest: SubmatrixId,
    },

    /// Add `source` into `dest` (accumulate).
    Add {
        source: SubmatrixId,
        dest: SubmatrixId,
    },

    /// Marker separating the forward section from the backward section.
    Boundary,

    /// Dead command awaiting removal by [`Computation::renumber`].
    NoOp,
}

// ────────────────────────── ComputationRequest ───────────────────────────

/// Read-only request metadata: which matrices the caller designated as
/// inputs and outputs. Used here only to validate the `is_input`/`is_output`
/// flags already attached to the matrix table.
#[derive(Debug, Clone, Default)]
pub struct ComputationRequest {
    pub inputs: Vec<MatrixId>,
    pub outputs: Vec<MatrixId>,
}

// ────────────────────────────── Computation ──────────────────────────────

/// The mutable IR: an ordered command list plus its matrix and submatrix
/// tables. This is what the optimizer reads and rewrites in place.
#[derive(Debug, Clone, Default)]
pub struct Computation {
    pub commands: Vec<Command>,
    pub matrices: Vec<Matrix>,
    pub submatrices: Vec<Submatrix>,
}

impl Computation {
    /// Create an empty computation.
    pub fn new() -> Self {
        Self::default()
    }

    // ── Table access ──

    /// Get a matrix by id.
    pub fn matrix(&self, id: MatrixId) -> Result<&Matrix> {
        self.matrices
            .get(id.index())
            .ok_or_else(|| Error::Internal(format!("matrix {:?} not found", id)))
    }

    /// Get a mutable matrix by id.
    pub fn matrix_mut(&mut self, id: MatrixId) -> Result<&mut Matrix> {
        self.matrices
            .get_mut(id.index())
            .ok_or_else(|| Error::Internal(format!("matrix {:?} not found", id)))
    }

    /// Get a submatrix by id.
    pub fn submatrix(&self, id: SubmatrixId) -> Result<&Submatrix> {
        self.submatrices
            .get(id.index())
            .ok_or_else(|| Error::Internal(format!("submatrix {:?} not found", id)))
    }

    /// Number of matrices in the table.
    pub fn num_matrices(&self) -> usize {
        self.matrices.len()
    }

    /// Number of submatrices in the table.
    pub fn num_submatrices(&self) -> usize {
        self.submatrices.len()
    }

    // ── Construction ──

    /// Append a matrix and return its id.
    pub fn add_matrix(&mut self, matrix: Matrix) -> MatrixId {
        let id = MatrixId::new(self.matrices.len());
        self.matrices.push(matrix);
        id
    }

    /// Append a submatrix and return its id.
    pub fn add_submatrix(&mut self, submatrix: Submatrix) -> SubmatrixId {
        let id = SubmatrixId::new(self.submatrices.len());
        self.submatrices.push(submatrix);
        id
    }

    /// Append a submatrix covering the whole of `matrix`.
    pub fn add_whole_submatrix(&mut self, matrix: MatrixId) -> Result<SubmatrixId> {
        let m = self.matrix(matrix)?;
        let sub = Submatrix {
            matrix,
            row_offset: 0,
            num_rows: m.rows,
            col_offset: 0,
            num_cols: m.cols,
        };
        Ok(self.add_submatrix(sub))
    }

    // ── Queries ──

    /// Does `id` view the entirety of its matrix?
    pub fn is_whole_matrix(&self, id: SubmatrixId) -> Result<bool> {
        let sub = self.submatrix(id)?;
        let m = self.matrix(sub.matrix)?;
        Ok(sub.row_offset == 0
            && sub.num_rows == m.rows
            && sub.col_offset == 0
            && sub.num_cols == m.cols)
    }

    /// Does `id` cover every row of its matrix?
    pub fn spans_all_rows(&self, id: SubmatrixId) -> Result<bool> {
        let sub = self.submatrix(id)?;
        let m = self.matrix(sub.matrix)?;
        Ok(sub.row_offset == 0 && sub.num_rows == m.rows)
    }

    /// The submatrix operands of a command, in declaration order.
    pub fn command_submatrices(&self, command: &Command) -> Vec<SubmatrixId> {
        match *command {
            Command::Propagate { input, output, .. } => vec![input, output],
            Command::Backprop {
                output_deriv,
                input_deriv,
                ..
            } => vec![output_deriv, input_deriv],
            Command::Copy { source, dest } | Command::Add { source, dest } => vec![source, dest],
            Command::AllocZeroed { .. }
            | Command::AllocUndefined { .. }
            | Command::Deallocate { .. }
            | Command::Boundary
            | Command::NoOp => vec![],
        }
    }

    // ── Renumbering ──

    /// Compact the computation after a rewrite.
    ///
    /// Strips `NoOp` commands, drops submatrices no longer referenced by any
    /// command, drops matrices no longer referenced by any surviving
    /// submatrix, command, or input/output flag, and remaps every id held by
    /// commands and submatrices.
    ///
    /// Every id referenced by a surviving command must be live; a dangling
    /// reference is an internal error.
    pub fn renumber(&mut self) -> Result<()> {
        self.commands.retain(|c| !matches!(c, Command::NoOp));

        // Submatrices referenced by the surviving commands.
        let mut sub_used = vec![false; self.submatrices.len()];
        for command in &self.commands {
            for sub_id in self.command_submatrices(command) {
                *sub_used
                    .get_mut(sub_id.index())
                    .ok_or_else(|| Error::Internal(format!("submatrix {:?} not found", sub_id)))? =
                    true;
            }
        }

        // Matrices referenced by surviving submatrices, commands, or flags.
        let mut mat_used = vec![false; self.matrices.len()];
        for (i, matrix) in self.matrices.iter().enumerate() {
            if matrix.is_input || matrix.is_output {
                mat_used[i] = true;
            }
        }
        for (i, sub) in self.submatrices.iter().enumerate() {
            if sub_used[i] {
                mat_used[sub.matrix.index()] = true;
            }
        }
        for command in &self.commands {
            match *command {
                Command::AllocZeroed { matrix }
                | Command::AllocUndefined { matrix }
                | Command::Deallocate { matrix } => {
                    *mat_used.get_mut(matrix.index()).ok_or_else(|| {
                        Error::Internal(format!("matrix {:?} not found", matrix))
                    })? = true;
                }
                _ => {}
            }
        }

        let mat_map = build_renumbering(&mat_used);
        let sub_map = build_renumbering(&sub_used);

        // Rebuild the tables.
        let old_submatrices = std::mem::take(&mut self.submatrices);
        for (i, mut sub) in old_submatrices.into_iter().enumerate() {
            if sub_used[i] {
                sub.matrix = MatrixId::new(
                    mat_map[sub.matrix.index()]
                        .ok_or_else(|| Error::Internal("submatrix of removed matrix".into()))?,
                );
                self.submatrices.push(sub);
            }
        }
        let old_matrices = std::mem::take(&mut self.matrices);
        for (i, matrix) in old_matrices.into_iter().enumerate() {
            if mat_used[i] {
                self.matrices.push(matrix);
            }
        }

        // Remap command operands.
        let remap_mat = |id: MatrixId| -> Result<MatrixId> {
            mat_map[id.index()]
                .map(MatrixId::new)
                .ok_or_else(|| Error::Internal("command references removed matrix".into()))
        };
        let remap_sub = |id: SubmatrixId| -> Result<SubmatrixId> {
            sub_map[id.index()]
                .map(SubmatrixId::new)
                .ok_or_else(|| Error::Internal("command references removed submatrix".into()))
        };
        for command in &mut self.commands {
            match command {
                Command::AllocZeroed { matrix }
                | Command::AllocUndefined { matrix }
                | Command::Deallocate { matrix } => {
                    *matrix = remap_mat(*matrix)?;
                }
                Command::Propagate { input, output, .. } => {
                    *input = remap_sub(*input)?;
                    *output = remap_sub(*output)?;
                }
                Command::Backprop {
                    output_deriv,
                    input_deriv,
                    ..
                } => {
                    *output_deriv = remap_sub(*output_deriv)?;
                    *input_deriv = remap_sub(*input_deriv)?;
                }
                Command::Copy { source, dest } | Command::Add { source, dest } => {
                    *source = remap_sub(*source)?;
                    *dest = remap_sub(*dest)?;
                }
                Command::Boundary | Command::NoOp => {}
            }
        }

        Ok(())
    }
}

/// Old index → new index for entries flagged used, `None` for dropped ones.
fn build_renumbering(used: &[bool]) -> Vec<Option<usize>> {
    let mut next = 0;
    used.iter()
        .map(|&u| {
            if u {
                let id = next;
                next += 1;
                Some(id)
            } else {
                None
            }
        })
        .collect()
}
