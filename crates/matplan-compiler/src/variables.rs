//! Variable partitioning.
//!
//! A *variable* is the atomic dependency unit: a maximal column interval of
//! one matrix, chosen so that the column range of every submatrix in the
//! program equals a union of whole variables. The partition is the coarsest
//! one with that property: splitting only happens at column boundaries some
//! submatrix actually references.
//!
//! Variables are numbered densely across all matrices; ids of one matrix's
//! variables are contiguous, so per-submatrix variable sets are plain ranges.

use matplan_core::{Computation, Error, MatrixId, Result, SubmatrixId};
use std::ops::Range;

/// The column partition of every matrix in a computation.
///
/// Built once per [`crate::Analysis`] snapshot; total over well-formed input
/// (submatrix ranges inside their matrix's bounds — the checker's concern,
/// not this one's).
#[derive(Debug)]
pub struct VariablePartition {
    /// Per matrix, ascending column split points, always including 0 and
    /// the matrix's column count. `n + 1` split points delimit `n` variables.
    split_points: Vec<Vec<usize>>,

    /// Per matrix, the id of its first variable; one extra trailing entry
    /// equal to the total variable count.
    matrix_first_variable: Vec<usize>,

    /// Owning matrix of each variable.
    variable_to_matrix: Vec<MatrixId>,
}

impl VariablePartition {
    /// Build the partition from the full matrix and submatrix tables.
    ///
    /// A submatrix referencing a matrix outside the table is an internal
    /// error, never a panic; the checker reports such ids as diagnostics
    /// before any analysis is built.
    pub fn new(computation: &Computation) -> Result<Self> {
        let mut split_points: Vec<Vec<usize>> = computation
            .matrices
            .iter()
            .map(|m| vec![0, m.cols])
            .collect();

        for sub in &computation.submatrices {
            let points = split_points.get_mut(sub.matrix.index()).ok_or_else(|| {
                Error::Internal(format!(
                    "submatrix references matrix {:?} out of range",
                    sub.matrix
                ))
            })?;
            points.push(sub.col_offset);
            points.push(sub.col_offset + sub.num_cols);
        }

        let mut matrix_first_variable = Vec::with_capacity(computation.num_matrices() + 1);
        let mut variable_to_matrix = Vec::new();
        let mut next = 0;
        for (m, points) in split_points.iter_mut().enumerate() {
            points.sort_unstable();
            points.dedup();
            matrix_first_variable.push(next);
            // A zero-column matrix has the single split point 0 and no variables.
            let num_vars = points.len() - 1;
            next += num_vars;
            variable_to_matrix.extend(std::iter::repeat(MatrixId::new(m)).take(num_vars));
        }
        matrix_first_variable.push(next);

        Ok(Self {
            split_points,
            matrix_first_variable,
            variable_to_matrix,
        })
    }

    /// Total number of variables across all matrices.
    pub fn num_variables(&self) -> usize {
        self.variable_to_matrix.len()
    }

    /// The matrix a variable belongs to. This mapping is total and fixed for
    /// the lifetime of the partition.
    pub fn matrix_of_variable(&self, variable: usize) -> Result<MatrixId> {
        self.variable_to_matrix
            .get(variable)
            .copied()
            .ok_or_else(|| Error::Internal(format!("variable {} not found", variable)))
    }

    /// Ids of all variables of one matrix, as a contiguous range.
    pub fn variables_for_matrix(&self, matrix: MatrixId) -> Result<Range<usize>> {
        let m = matrix.index();
        if m + 1 >= self.matrix_first_variable.len() {
            return Err(Error::Internal(format!("matrix {:?} not found", matrix)));
        }
        Ok(self.matrix_first_variable[m]..self.matrix_first_variable[m + 1])
    }

    /// Column extents `[start, end)` of one variable within its matrix.
    pub fn column_range(&self, variable: usize) -> Result<Range<usize>> {
        let matrix = self.matrix_of_variable(variable)?;
        let local = variable - self.matrix_first_variable[matrix.index()];
        let points = &self.split_points[matrix.index()];
        Ok(points[local]..points[local + 1])
    }

    /// Ids of the variables a submatrix's column range covers.
    ///
    /// By construction the range equals a contiguous run of whole variables;
    /// a boundary that is not a split point means the partition and the
    /// submatrix table are out of sync, which is an internal error.
    pub fn variables_for_submatrix(
        &self,
        computation: &Computation,
        id: SubmatrixId,
    ) -> Result<Range<usize>> {
        let sub = computation.submatrix(id)?;
        let points = &self.split_points[sub.matrix.index()];
        let base = self.matrix_first_variable[sub.matrix.index()];
        let start = points
            .binary_search(&sub.col_offset)
            .map_err(|_| Error::Internal(format!("stale partition for submatrix {:?}", id)))?;
        let end = points
            .binary_search(&(sub.col_offset + sub.num_cols))
            .map_err(|_| Error::Internal(format!("stale partition for submatrix {:?}", id)))?;
        Ok(base + start..base + end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use matplan_core::{Matrix, Submatrix};

    fn computation_with_views() -> (Computation, MatrixId, MatrixId) {
        let mut computation = Computation::new();
        let a = computation.add_matrix(Matrix::new(4, 10));
        let b = computation.add_matrix(Matrix::new(2, 5));
        // Views on `a`: columns [2, 6) and [4, 8).
        computation.add_submatrix(Submatrix {
            matrix: a,
            row_offset: 0,
            num_rows: 4,
            col_offset: 2,
            num_cols: 4,
        });
        computation.add_submatrix(Submatrix {
            matrix: a,
            row_offset: 1,
            num_rows: 2,
            col_offset: 4,
            num_cols: 4,
        });
        // One whole view on `b`.
        computation.add_whole_submatrix(b).unwrap();
        (computation, a, b)
    }

    #[test]
    fn test_partition_boundaries() {
        let (computation, a, b) = computation_with_views();
        let partition = VariablePartition::new(&computation).unwrap();

        // `a` splits at {0, 2, 4, 6, 8, 10} -> 5 variables; `b` is one variable.
        assert_eq!(partition.num_variables(), 6);
        assert_eq!(partition.variables_for_matrix(a).unwrap(), 0..5);
        assert_eq!(partition.variables_for_matrix(b).unwrap(), 5..6);
        assert_eq!(partition.column_range(0).unwrap(), 0..2);
        assert_eq!(partition.column_range(2).unwrap(), 4..6);
        assert_eq!(partition.column_range(4).unwrap(), 8..10);
        assert_eq!(partition.matrix_of_variable(5).unwrap(), b);
    }

    #[test]
    fn test_submatrix_range_is_union_of_whole_variables() {
        let (computation, _, _) = computation_with_views();
        let partition = VariablePartition::new(&computation).unwrap();

        // Every submatrix's column range must be an exact variable run.
        for i in 0..computation.num_submatrices() {
            let id = SubmatrixId::new(i);
            let vars = partition
                .variables_for_submatrix(&computation, id)
                .unwrap();
            let sub = computation.submatrix(id).unwrap();
            assert_eq!(
                partition.column_range(vars.start).unwrap().start,
                sub.col_offset
            );
            assert_eq!(
                partition.column_range(vars.end - 1).unwrap().end,
                sub.col_offset + sub.num_cols
            );
        }
    }

    #[test]
    fn test_partition_is_coarsest() {
        let (computation, a, _) = computation_with_views();
        let partition = VariablePartition::new(&computation).unwrap();

        // Every interior split point of `a` is the boundary of some submatrix;
        // merging any two adjacent variables would break exactness for it.
        for variable in partition.variables_for_matrix(a).unwrap() {
            let range = partition.column_range(variable).unwrap();
            if range.end == computation.matrix(a).unwrap().cols {
                continue;
            }
            let is_submatrix_boundary = computation.submatrices.iter().any(|s| {
                s.matrix == a && (s.col_offset == range.end || s.col_offset + s.num_cols == range.end)
            });
            assert!(
                is_submatrix_boundary,
                "split at column {} is not justified by any submatrix",
                range.end
            );
        }
    }

    #[test]
    fn test_dangling_submatrix_reference_is_an_error() {
        let mut computation = Computation::new();
        computation.add_submatrix(Submatrix {
            matrix: MatrixId::new(3),
            row_offset: 0,
            num_rows: 1,
            col_offset: 0,
            num_cols: 1,
        });
        assert!(matches!(
            VariablePartition::new(&computation),
            Err(Error::Internal(_))
        ));
    }

    #[test]
    fn test_unreferenced_matrix_is_one_variable() {
        let mut computation = Computation::new();
        let m = computation.add_matrix(Matrix::new(3, 7));
        let partition = VariablePartition::new(&computation).unwrap();
        assert_eq!(partition.variables_for_matrix(m).unwrap(), 0..1);
        assert_eq!(partition.column_range(0).unwrap(), 0..7);
    }
}
