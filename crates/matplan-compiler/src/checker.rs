//! Structural invariant checking.
//!
//! The checker consumes a fresh [`Analysis`] snapshot and validates five
//! classes of invariant over the command sequence. A violation is a defect
//! in compilation or in the optimizer itself, reported as a fatal diagnostic
//! naming the offending command index; it is never a recoverable runtime
//! condition. Each class is independently toggleable so a suspected defect
//! can be bisected.

use crate::accesses::AccessType;
use crate::analyzer::Analysis;
use matplan_core::{
    CheckConfig, Command, Computation, ComputationRequest, Error, MatrixId, Result, SubmatrixId,
    Topology,
};

/// Validate the `is_input`/`is_output` flags against the request.
///
/// Every requested input must exist, be distinct, and be flagged; no matrix
/// may be flagged without being requested. Same for outputs.
pub fn validate_io_flags(
    request: &ComputationRequest,
    computation: &Computation,
) -> Result<()> {
    let check_side = |ids: &[MatrixId], flagged: &dyn Fn(&matplan_core::Matrix) -> bool,
                      side: &str|
     -> Result<()> {
        let mut seen = ids.to_vec();
        seen.sort_unstable();
        seen.dedup();
        if seen.len() != ids.len() {
            return Err(Error::BadRequest(format!("duplicate {} matrix in request", side)));
        }
        for &id in ids {
            let matrix = computation
                .matrices
                .get(id.index())
                .ok_or_else(|| Error::BadRequest(format!("{} matrix {:?} out of range", side, id)))?;
            if !flagged(matrix) {
                return Err(Error::BadRequest(format!(
                    "matrix {:?} requested as {} but not flagged",
                    id, side
                )));
            }
        }
        let num_flagged = computation.matrices.iter().filter(|m| flagged(m)).count();
        if num_flagged != ids.len() {
            return Err(Error::BadRequest(format!(
                "{} matrices flagged as {} but {} requested",
                num_flagged,
                side,
                ids.len()
            )));
        }
        Ok(())
    };

    check_side(&request.inputs, &|m| m.is_input, "input")?;
    check_side(&request.outputs, &|m| m.is_output, "output")
}

/// Validate that every operand id lands inside its table.
///
/// Runs before the analysis is built: the analysis dereferences operand ids
/// wholesale, so a malformed sequence must be reported as a diagnostic here
/// rather than surfacing as an internal error from the analysis itself.
fn check_id_ranges(topology: &Topology, computation: &Computation) -> Result<()> {
    let sub_in_range = |c: usize, id: SubmatrixId| -> Result<()> {
        let sub = computation
            .submatrices
            .get(id.index())
            .ok_or_else(|| Error::BadIndex {
                command: c,
                message: format!("submatrix {:?} out of range", id),
            })?;
        if sub.matrix.index() >= computation.num_matrices() {
            return Err(Error::BadIndex {
                command: c,
                message: format!(
                    "submatrix {:?} references matrix {:?} out of range",
                    id, sub.matrix
                ),
            });
        }
        Ok(())
    };

    for (c, command) in computation.commands.iter().enumerate() {
        match *command {
            Command::AllocZeroed { matrix }
            | Command::AllocUndefined { matrix }
            | Command::Deallocate { matrix } => {
                if matrix.index() >= computation.num_matrices() {
                    return Err(Error::BadIndex {
                        command: c,
                        message: format!("matrix {:?} out of range", matrix),
                    });
                }
            }
            Command::Propagate {
                component,
                input,
                output,
            } => {
                if component.index() >= topology.num_components() {
                    return Err(Error::BadIndex {
                        command: c,
                        message: format!("component {:?} out of range", component),
                    });
                }
                sub_in_range(c, input)?;
                sub_in_range(c, output)?;
            }
            Command::Backprop {
                component,
                output_deriv,
                input_deriv,
            } => {
                if component.index() >= topology.num_components() {
                    return Err(Error::BadIndex {
                        command: c,
                        message: format!("component {:?} out of range", component),
                    });
                }
                sub_in_range(c, output_deriv)?;
                sub_in_range(c, input_deriv)?;
            }
            Command::Copy { source, dest } | Command::Add { source, dest } => {
                sub_in_range(c, source)?;
                sub_in_range(c, dest)?;
            }
            Command::Boundary | Command::NoOp => {}
        }
    }
    Ok(())
}

/// Validates one computation against one analysis snapshot.
pub struct Checker<'a> {
    config: &'a CheckConfig,
    topology: &'a Topology,
    request: &'a ComputationRequest,
    computation: &'a Computation,
    analysis: Analysis,
}

impl<'a> Checker<'a> {
    /// Analyze the computation and prepare to check it.
    pub fn new(
        config: &'a CheckConfig,
        topology: &'a Topology,
        request: &'a ComputationRequest,
        computation: &'a Computation,
    ) -> Result<Self> {
        if config.check_indexes {
            check_id_ranges(topology, computation)?;
        }
        let analysis = Analysis::new(topology, computation)?;
        Ok(Self {
            config,
            topology,
            request,
            computation,
            analysis,
        })
    }

    /// Run every enabled check class.
    pub fn check(&self) -> Result<()> {
        if self.config.check_indexes {
            self.check_indexes()?;
        }
        if self.config.check_order {
            self.check_order()?;
        }
        if self.config.check_undefined {
            self.check_undefined_reads()?;
        }
        if self.config.check_allocation {
            self.check_allocation_writes()?;
        }
        if self.config.check_matrix_accesses {
            self.check_matrix_accesses()?;
        }
        Ok(())
    }

    // ── Check 1: indexes and dimensions ──

    fn submatrix_at(&self, command: usize, id: SubmatrixId) -> Result<&matplan_core::Submatrix> {
        let sub = self
            .computation
            .submatrices
            .get(id.index())
            .ok_or_else(|| Error::BadIndex {
                command,
                message: format!("submatrix {:?} out of range", id),
            })?;
        let matrix = self
            .computation
            .matrices
            .get(sub.matrix.index())
            .ok_or_else(|| Error::BadIndex {
                command,
                message: format!("submatrix {:?} references matrix {:?} out of range", id, sub.matrix),
            })?;
        if sub.num_rows == 0
            || sub.num_cols == 0
            || sub.row_offset + sub.num_rows > matrix.rows
            || sub.col_offset + sub.num_cols > matrix.cols
        {
            return Err(Error::BadIndex {
                command,
                message: format!("submatrix {:?} outside matrix bounds", id),
            });
        }
        Ok(sub)
    }

    fn check_indexes(&self) -> Result<()> {
        validate_io_flags(self.request, self.computation)?;

        for (c, command) in self.computation.commands.iter().enumerate() {
            match *command {
                Command::AllocZeroed { matrix }
                | Command::AllocUndefined { matrix }
                | Command::Deallocate { matrix } => {
                    if matrix.index() >= self.computation.num_matrices() {
                        return Err(Error::BadIndex {
                            command: c,
                            message: format!("matrix {:?} out of range", matrix),
                        });
                    }
                }
                Command::Propagate {
                    component,
                    input,
                    output,
                } => {
                    let comp =
                        self.topology
                            .component(component)
                            .map_err(|_| Error::BadIndex {
                                command: c,
                                message: format!("component {:?} out of range", component),
                            })?;
                    let in_sub = self.submatrix_at(c, input)?;
                    let out_sub = self.submatrix_at(c, output)?;
                    if in_sub.num_cols != comp.input_dim {
                        return Err(Error::BadIndex {
                            command: c,
                            message: format!(
                                "propagate input has {} columns, component '{}' expects {}",
                                in_sub.num_cols, comp.name, comp.input_dim
                            ),
                        });
                    }
                    if out_sub.num_cols != comp.output_dim {
                        return Err(Error::BadIndex {
                            command: c,
                            message: format!(
                                "propagate output has {} columns, component '{}' produces {}",
                                out_sub.num_cols, comp.name, comp.output_dim
                            ),
                        });
                    }
                    if in_sub.num_rows != out_sub.num_rows {
                        return Err(Error::BadIndex {
                            command: c,
                            message: format!(
                                "propagate row counts differ: {} vs {}",
                                in_sub.num_rows, out_sub.num_rows
                            ),
                        });
                    }
                }
                Command::Backprop {
                    component,
                    output_deriv,
                    input_deriv,
                } => {
                    let comp =
                        self.topology
                            .component(component)
                            .map_err(|_| Error::BadIndex {
                                command: c,
                                message: format!("component {:?} out of range", component),
                            })?;
                    let out_sub = self.submatrix_at(c, output_deriv)?;
                    let in_sub = self.submatrix_at(c, input_deriv)?;
                    if out_sub.num_cols != comp.output_dim {
                        return Err(Error::BadIndex {
                            command: c,
                            message: format!(
                                "backprop output derivative has {} columns, component '{}' expects {}",
                                out_sub.num_cols, comp.name, comp.output_dim
                            ),
                        });
                    }
                    if in_sub.num_cols != comp.input_dim {
                        return Err(Error::BadIndex {
                            command: c,
                            message: format!(
                                "backprop input derivative has {} columns, component '{}' produces {}",
                                in_sub.num_cols, comp.name, comp.input_dim
                            ),
                        });
                    }
                    if in_sub.num_rows != out_sub.num_rows {
                        return Err(Error::BadIndex {
                            command: c,
                            message: format!(
                                "backprop row counts differ: {} vs {}",
                                out_sub.num_rows, in_sub.num_rows
                            ),
                        });
                    }
                }
                Command::Copy { source, dest } | Command::Add { source, dest } => {
                    let src = self.submatrix_at(c, source)?;
                    let dst = self.submatrix_at(c, dest)?;
                    if source == dest {
                        return Err(Error::BadIndex {
                            command: c,
                            message: "source and destination are the same submatrix".into(),
                        });
                    }
                    if src.num_rows != dst.num_rows || src.num_cols != dst.num_cols {
                        return Err(Error::BadIndex {
                            command: c,
                            message: format!(
                                "shape mismatch: {}x{} vs {}x{}",
                                src.num_rows, src.num_cols, dst.num_rows, dst.num_cols
                            ),
                        });
                    }
                }
                Command::Boundary | Command::NoOp => {}
            }
        }
        Ok(())
    }

    // ── Check 2: forward/backward ordering ──

    fn check_order(&self) -> Result<()> {
        let mut boundary = None;
        for (c, command) in self.computation.commands.iter().enumerate() {
            if matches!(command, Command::Boundary) {
                if boundary.is_some() {
                    return Err(Error::Ordering {
                        command: c,
                        message: "duplicate forward/backward boundary marker".into(),
                    });
                }
                boundary = Some(c);
            }
        }
        let boundary = boundary.ok_or_else(|| Error::Ordering {
            command: self.computation.commands.len(),
            message: "missing forward/backward boundary marker".into(),
        })?;

        for (c, command) in self.computation.commands.iter().enumerate() {
            match command {
                Command::Propagate { .. } if c > boundary => {
                    return Err(Error::Ordering {
                        command: c,
                        message: "propagate after the boundary marker".into(),
                    });
                }
                Command::Backprop { .. } if c < boundary => {
                    return Err(Error::Ordering {
                        command: c,
                        message: "backprop before the boundary marker".into(),
                    });
                }
                _ => {}
            }
        }
        Ok(())
    }

    // ── Check 3: undefined reads ──

    fn check_undefined_reads(&self) -> Result<()> {
        for (variable, accesses) in self.analysis.variable_accesses.iter().enumerate() {
            let matrix = self.analysis.variables.matrix_of_variable(variable)?;
            if self.computation.matrix(matrix)?.is_input {
                // Input content is available before the sequence starts.
                continue;
            }
            if let Some(first) = accesses.first() {
                if first.access_type != AccessType::Write {
                    let columns = self.analysis.variables.column_range(variable)?;
                    return Err(Error::UndefinedRead {
                        command: first.command,
                        message: format!(
                            "variable {} (matrix {:?}, columns {}..{}) read before any write",
                            variable, matrix, columns.start, columns.end
                        ),
                    });
                }
            }
        }
        Ok(())
    }

    // ── Check 4: undefined allocations fully written before read ──

    fn check_allocation_writes(&self) -> Result<()> {
        for (m, record) in self.analysis.matrix_accesses.iter().enumerate() {
            let Some(alloc) = record.allocate_command else {
                continue;
            };
            if !matches!(
                self.computation.commands.get(alloc),
                Some(Command::AllocUndefined { .. })
            ) {
                continue;
            }
            if let Some(first) = record.accesses.first() {
                if first.access_type != AccessType::Write {
                    return Err(Error::AllocationRead {
                        command: first.command,
                        message: format!(
                            "matrix {} allocated undefined at command {} but its first \
                             access is not a full write",
                            m, alloc
                        ),
                    });
                }
            }
        }
        Ok(())
    }

    // ── Check 5: accesses within matrix lifetimes ──

    fn check_matrix_accesses(&self) -> Result<()> {
        // Duplicate sizing commands, and sizing commands that contradict the
        // input/output flags.
        let mut allocated = vec![false; self.computation.num_matrices()];
        let mut deallocated = vec![false; self.computation.num_matrices()];
        for (c, command) in self.computation.commands.iter().enumerate() {
            match *command {
                Command::AllocZeroed { matrix } | Command::AllocUndefined { matrix } => {
                    let m = matrix.index();
                    if allocated[m] {
                        return Err(Error::MatrixBounds {
                            command: c,
                            message: format!("matrix {} allocated twice", m),
                        });
                    }
                    if self.computation.matrix(matrix)?.is_input {
                        return Err(Error::MatrixBounds {
                            command: c,
                            message: format!("input matrix {} must not be allocated", m),
                        });
                    }
                    allocated[m] = true;
                }
                Command::Deallocate { matrix } => {
                    let m = matrix.index();
                    if deallocated[m] {
                        return Err(Error::MatrixBounds {
                            command: c,
                            message: format!("matrix {} deallocated twice", m),
                        });
                    }
                    if self.computation.matrix(matrix)?.is_output {
                        return Err(Error::MatrixBounds {
                            command: c,
                            message: format!("output matrix {} must not be deallocated", m),
                        });
                    }
                    deallocated[m] = true;
                }
                _ => {}
            }
        }

        for (m, record) in self.analysis.matrix_accesses.iter().enumerate() {
            let report_at = record.accesses.first().map(|a| a.command).unwrap_or(0);
            if !record.is_input && record.allocate_command.is_none() {
                return Err(Error::MatrixBounds {
                    command: report_at,
                    message: format!("matrix {} has no allocate command", m),
                });
            }
            if !record.is_output && record.deallocate_command.is_none() {
                return Err(Error::MatrixBounds {
                    command: report_at,
                    message: format!("matrix {} has no deallocate command", m),
                });
            }
            if let (Some(alloc), Some(dealloc)) =
                (record.allocate_command, record.deallocate_command)
            {
                if dealloc <= alloc {
                    return Err(Error::MatrixBounds {
                        command: dealloc,
                        message: format!("matrix {} deallocated before allocation", m),
                    });
                }
            }
            for access in &record.accesses {
                if let Some(alloc) = record.allocate_command {
                    if access.command <= alloc {
                        return Err(Error::MatrixBounds {
                            command: access.command,
                            message: format!("matrix {} accessed before its allocation", m),
                        });
                    }
                }
                if let Some(dealloc) = record.deallocate_command {
                    if access.command >= dealloc {
                        return Err(Error::MatrixBounds {
                            command: access.command,
                            message: format!("matrix {} accessed after its deallocation", m),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}
