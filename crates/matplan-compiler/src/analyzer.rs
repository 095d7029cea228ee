//! The analysis snapshot.
//!
//! [`Analysis`] composes the variable partition, per-command attributes and
//! both access indices into one read-only view of a command sequence. It is
//! built whole and never patched: after any structural change to commands,
//! matrices or submatrices, every derived structure here is stale, so each
//! consumer (checker, optimization pass) constructs a fresh `Analysis` from
//! the computation it is about to inspect.

use crate::accesses::{
    compute_matrix_accesses, compute_variable_accesses, Access, MatrixAccesses,
};
use crate::attributes::{compute_command_attributes, CommandAttributes};
use crate::variables::VariablePartition;
use matplan_core::{Computation, MatrixId, Result, Topology};

/// Immutable analysis of one command sequence, valid exactly until the
/// sequence is next mutated.
#[derive(Debug)]
pub struct Analysis {
    pub variables: VariablePartition,
    pub command_attributes: Vec<CommandAttributes>,
    pub variable_accesses: Vec<Vec<Access>>,
    pub matrix_accesses: Vec<MatrixAccesses>,
}

impl Analysis {
    /// Analyze a computation from scratch.
    pub fn new(topology: &Topology, computation: &Computation) -> Result<Self> {
        let variables = VariablePartition::new(computation)?;
        let command_attributes =
            compute_command_attributes(topology, computation, &variables)?;
        let variable_accesses =
            compute_variable_accesses(variables.num_variables(), &command_attributes);
        let matrix_accesses = compute_matrix_accesses(computation, &command_attributes)?;

        Ok(Self {
            variables,
            command_attributes,
            variable_accesses,
            matrix_accesses,
        })
    }

    /// Position of the first command accessing a matrix's content, if any.
    pub fn first_matrix_access(&self, matrix: MatrixId) -> Option<usize> {
        self.matrix_accesses
            .get(matrix.index())
            .and_then(|r| r.accesses.first())
            .map(|a| a.command)
    }

    /// Position of the last command accessing a matrix's content, if any.
    pub fn last_matrix_access(&self, matrix: MatrixId) -> Option<usize> {
        self.matrix_accesses
            .get(matrix.index())
            .and_then(|r| r.accesses.last())
            .map(|a| a.command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use matplan_core::{Command, Matrix, Topology};

    #[test]
    fn test_analysis_composes_all_indices() {
        let mut computation = Computation::new();
        let a = computation.add_matrix(Matrix::new(2, 4));
        let b = computation.add_matrix(Matrix::new(2, 4));
        let sub_a = computation.add_whole_submatrix(a).unwrap();
        let sub_b = computation.add_whole_submatrix(b).unwrap();
        computation.commands = vec![
            Command::AllocZeroed { matrix: a },
            Command::AllocUndefined { matrix: b },
            Command::Copy {
                source: sub_a,
                dest: sub_b,
            },
            Command::Deallocate { matrix: a },
            Command::Deallocate { matrix: b },
        ];

        let analysis = Analysis::new(&Topology::new(), &computation).unwrap();

        assert_eq!(analysis.command_attributes.len(), 5);
        assert_eq!(analysis.variables.num_variables(), 2);
        assert_eq!(analysis.matrix_accesses.len(), 2);
        assert_eq!(analysis.first_matrix_access(a), Some(2));
        assert_eq!(analysis.last_matrix_access(a), Some(2));
        assert_eq!(analysis.first_matrix_access(b), Some(2));
    }

    #[test]
    fn test_unaccessed_matrix_has_no_first_access() {
        let mut computation = Computation::new();
        let m = computation.add_matrix(Matrix::new(1, 1));
        computation.commands = vec![
            Command::AllocZeroed { matrix: m },
            Command::Deallocate { matrix: m },
        ];

        let analysis = Analysis::new(&Topology::new(), &computation).unwrap();
        assert_eq!(analysis.first_matrix_access(m), None);
    }
}
