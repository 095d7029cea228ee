//! Access indexing: per-variable and per-matrix chronological access lists.
//!
//! Both indices invert the per-command attribute records into "who touches
//! this, and when" form. Consolidation rule: a command that both reads and
//! writes a unit yields a single `ReadWrite` record; at most one record per
//! command index per unit, ascending by command index.

use crate::attributes::CommandAttributes;
use matplan_core::{Command, Computation, Error, Result};

/// How a command touches a variable or matrix.
///
/// `ReadWrite` is dominant: a read combined with a write at the same command
/// collapses to `ReadWrite`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessType {
    Read,
    Write,
    ReadWrite,
}

/// One consolidated access record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Access {
    pub command: usize,
    pub access_type: AccessType,
}

/// Walk two sorted, deduplicated id slices in lockstep, emitting each id
/// once with its consolidated access type.
fn merge_sorted<T: Ord + Copy>(reads: &[T], writes: &[T], mut emit: impl FnMut(T, AccessType)) {
    let (mut i, mut j) = (0, 0);
    loop {
        match (reads.get(i), writes.get(j)) {
            (Some(&r), Some(&w)) if r == w => {
                emit(r, AccessType::ReadWrite);
                i += 1;
                j += 1;
            }
            (Some(&r), Some(&w)) if r < w => {
                emit(r, AccessType::Read);
                i += 1;
            }
            (Some(_), Some(&w)) => {
                emit(w, AccessType::Write);
                j += 1;
            }
            (Some(&r), None) => {
                emit(r, AccessType::Read);
                i += 1;
            }
            (None, Some(&w)) => {
                emit(w, AccessType::Write);
                j += 1;
            }
            (None, None) => break,
        }
    }
}

/// Per-variable access lists, indexed by variable id.
///
/// Records are appended in command order, so each list is strictly
/// increasing by command index without further sorting.
pub fn compute_variable_accesses(
    num_variables: usize,
    attributes: &[CommandAttributes],
) -> Vec<Vec<Access>> {
    let mut accesses: Vec<Vec<Access>> = vec![Vec::new(); num_variables];

    for (command, attrs) in attributes.iter().enumerate() {
        merge_sorted(
            &attrs.variables_read,
            &attrs.variables_written,
            |variable, access_type| {
                accesses[variable].push(Access {
                    command,
                    access_type,
                })
            },
        );
    }

    accesses
}

/// Lifetime and access record of one matrix.
#[derive(Debug, Clone)]
pub struct MatrixAccesses {
    /// Position of the allocate command; `None` for inputs, which exist
    /// before the sequence starts.
    pub allocate_command: Option<usize>,

    /// Position of the deallocate command; `None` for outputs, which
    /// outlive the sequence.
    pub deallocate_command: Option<usize>,

    /// Consolidated accesses, ascending by command index. A matrix's own
    /// allocate/deallocate commands are not listed here; they bound the
    /// lifetime rather than touch content.
    pub accesses: Vec<Access>,

    pub is_input: bool,
    pub is_output: bool,
}

/// Per-matrix access records, indexed by matrix id.
///
/// Allocate/deallocate positions come from the command kinds, access lists
/// from the attribute records. Duplicate sizing commands keep the first
/// position seen; the checker rejects the duplicates themselves. A command
/// naming a matrix outside the table is an internal error.
pub fn compute_matrix_accesses(
    computation: &Computation,
    attributes: &[CommandAttributes],
) -> Result<Vec<MatrixAccesses>> {
    let mut records: Vec<MatrixAccesses> = computation
        .matrices
        .iter()
        .map(|m| MatrixAccesses {
            allocate_command: None,
            deallocate_command: None,
            accesses: Vec::new(),
            is_input: m.is_input,
            is_output: m.is_output,
        })
        .collect();

    for (c, command) in computation.commands.iter().enumerate() {
        match *command {
            Command::AllocZeroed { matrix } | Command::AllocUndefined { matrix } => {
                let record = records.get_mut(matrix.index()).ok_or_else(|| {
                    Error::Internal(format!("command {} allocates matrix {:?} out of range", c, matrix))
                })?;
                if record.allocate_command.is_none() {
                    record.allocate_command = Some(c);
                }
            }
            Command::Deallocate { matrix } => {
                let record = records.get_mut(matrix.index()).ok_or_else(|| {
                    Error::Internal(format!(
                        "command {} deallocates matrix {:?} out of range",
                        c, matrix
                    ))
                })?;
                if record.deallocate_command.is_none() {
                    record.deallocate_command = Some(c);
                }
            }
            _ => {}
        }
    }

    for (c, attrs) in attributes.iter().enumerate() {
        for matrix in attrs.matrices_read.iter().chain(&attrs.matrices_written) {
            if matrix.index() >= records.len() {
                return Err(Error::Internal(format!(
                    "command {} accesses matrix {:?} out of range",
                    c, matrix
                )));
            }
        }
        merge_sorted(
            &attrs.matrices_read,
            &attrs.matrices_written,
            |matrix, access_type| {
                let record = &mut records[matrix.index()];
                if record.allocate_command == Some(c) || record.deallocate_command == Some(c) {
                    return;
                }
                record.accesses.push(Access {
                    command: c,
                    access_type,
                });
            },
        );
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::compute_command_attributes;
    use crate::variables::VariablePartition;
    use matplan_core::{Matrix, Topology};

    fn copy_then_add_computation() -> (Computation, matplan_core::MatrixId, matplan_core::MatrixId)
    {
        let mut computation = Computation::new();
        let a = computation.add_matrix(Matrix::new(2, 3));
        let b = computation.add_matrix(Matrix::new(2, 3));
        let sub_a = computation.add_whole_submatrix(a).unwrap();
        let sub_b = computation.add_whole_submatrix(b).unwrap();
        computation.commands = vec![
            Command::AllocZeroed { matrix: a },
            Command::AllocUndefined { matrix: b },
            Command::Copy {
                source: sub_a,
                dest: sub_b,
            },
            Command::Add {
                source: sub_a,
                dest: sub_b,
            },
            Command::Deallocate { matrix: a },
            Command::Deallocate { matrix: b },
        ];
        (computation, a, b)
    }

    #[test]
    fn test_variable_access_consolidation() {
        let (computation, a, b) = copy_then_add_computation();
        let partition = VariablePartition::new(&computation).unwrap();
        let attrs =
            compute_command_attributes(&Topology::new(), &computation, &partition).unwrap();
        let accesses = compute_variable_accesses(partition.num_variables(), &attrs);

        let var_a = partition.variables_for_matrix(a).unwrap().start;
        let var_b = partition.variables_for_matrix(b).unwrap().start;

        // `a`: written by the zeroed allocation, read by copy and add.
        assert_eq!(
            accesses[var_a],
            vec![
                Access {
                    command: 0,
                    access_type: AccessType::Write
                },
                Access {
                    command: 2,
                    access_type: AccessType::Read
                },
                Access {
                    command: 3,
                    access_type: AccessType::Read
                },
            ]
        );

        // `b`: pure write by copy, read-write by add.
        assert_eq!(
            accesses[var_b],
            vec![
                Access {
                    command: 2,
                    access_type: AccessType::Write
                },
                Access {
                    command: 3,
                    access_type: AccessType::ReadWrite
                },
            ]
        );

        // Strictly increasing command indices, one record per command.
        for list in &accesses {
            for pair in list.windows(2) {
                assert!(pair[0].command < pair[1].command);
            }
        }
    }

    #[test]
    fn test_matrix_tracker_lifetimes() {
        let (computation, a, b) = copy_then_add_computation();
        let partition = VariablePartition::new(&computation).unwrap();
        let attrs =
            compute_command_attributes(&Topology::new(), &computation, &partition).unwrap();
        let records = compute_matrix_accesses(&computation, &attrs).unwrap();

        let rec_a = &records[a.index()];
        assert_eq!(rec_a.allocate_command, Some(0));
        assert_eq!(rec_a.deallocate_command, Some(4));
        // The zeroed allocation itself is not an access record.
        assert_eq!(
            rec_a.accesses.iter().map(|a| a.command).collect::<Vec<_>>(),
            vec![2, 3]
        );

        let rec_b = &records[b.index()];
        assert_eq!(rec_b.allocate_command, Some(1));
        assert_eq!(rec_b.deallocate_command, Some(5));
        assert_eq!(rec_b.accesses[0].access_type, AccessType::Write);
        assert_eq!(rec_b.accesses[1].access_type, AccessType::ReadWrite);
    }

    #[test]
    fn test_io_flags_copied_from_matrix_table() {
        let mut computation = Computation::new();
        let m = computation.add_matrix(Matrix {
            rows: 1,
            cols: 1,
            is_input: true,
            is_output: false,
        });
        let records = compute_matrix_accesses(&computation, &[]).unwrap();
        assert!(records[m.index()].is_input);
        assert!(!records[m.index()].is_output);
        assert_eq!(records[m.index()].allocate_command, None);
    }

    #[test]
    fn test_sizing_command_with_dangling_matrix_is_an_error() {
        let mut computation = Computation::new();
        computation.commands = vec![Command::Deallocate {
            matrix: matplan_core::MatrixId::new(5),
        }];
        let attrs = vec![CommandAttributes::default()];
        assert!(matches!(
            compute_matrix_accesses(&computation, &attrs),
            Err(Error::Internal(_))
        ));
    }
}
