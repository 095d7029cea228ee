//! Per-command read/write attributes.
//!
//! This module is the single place that encodes what each command kind means
//! in dependency terms. Attributes are a pure function of a command's
//! operands and the current variable partition; they are derived on every
//! analysis rebuild and never persisted.

use crate::variables::VariablePartition;
use matplan_core::{Command, Computation, MatrixId, Result, SubmatrixId, Topology};

/// Derived dependency facts for one command.
///
/// All four id vectors are sorted and deduplicated. `has_side_effects` marks
/// commands whose numeric effect is not fully captured by their declared
/// writes (parameter-updating backward passes); such commands are never
/// eligible for elimination.
#[derive(Debug, Default, Clone)]
pub struct CommandAttributes {
    pub variables_read: Vec<usize>,
    pub variables_written: Vec<usize>,
    pub matrices_read: Vec<MatrixId>,
    pub matrices_written: Vec<MatrixId>,
    pub has_side_effects: bool,
}

impl CommandAttributes {
    fn sort_and_dedup(&mut self) {
        self.variables_read.sort_unstable();
        self.variables_read.dedup();
        self.variables_written.sort_unstable();
        self.variables_written.dedup();
        self.matrices_read.sort_unstable();
        self.matrices_read.dedup();
        self.matrices_written.sort_unstable();
        self.matrices_written.dedup();
    }

    /// Record a read through a submatrix.
    fn record_read(
        &mut self,
        computation: &Computation,
        partition: &VariablePartition,
        sub: SubmatrixId,
    ) -> Result<()> {
        self.variables_read
            .extend(partition.variables_for_submatrix(computation, sub)?);
        self.matrices_read.push(computation.submatrix(sub)?.matrix);
        Ok(())
    }

    /// Record a write through a submatrix.
    ///
    /// A write is only *pure* if nothing of the prior content survives it:
    /// - an accumulating write (`adds`) reads what it adds to;
    /// - a write covering part of a variable's rows leaves the other rows of
    ///   that variable observable, so the touched variables are read too;
    /// - at matrix level, a write that does not cover the matrix's full
    ///   variable set with full rows still depends on prior content.
    fn record_write(
        &mut self,
        computation: &Computation,
        partition: &VariablePartition,
        sub: SubmatrixId,
        adds: bool,
    ) -> Result<()> {
        let variables = partition.variables_for_submatrix(computation, sub)?;
        let matrix = computation.submatrix(sub)?.matrix;
        let full_rows = computation.spans_all_rows(sub)?;
        let all_variables = variables == partition.variables_for_matrix(matrix)?;

        if adds || !full_rows {
            self.variables_read.extend(variables.clone());
        }
        self.variables_written.extend(variables);

        if adds || !full_rows || !all_variables {
            self.matrices_read.push(matrix);
        }
        self.matrices_written.push(matrix);
        Ok(())
    }
}

/// Derive one attribute record per command.
///
/// Exhaustive over command kinds; an unrecognized kind cannot occur because
/// [`Command`] is a closed sum type.
pub fn compute_command_attributes(
    topology: &Topology,
    computation: &Computation,
    partition: &VariablePartition,
) -> Result<Vec<CommandAttributes>> {
    let mut all = Vec::with_capacity(computation.commands.len());

    for command in &computation.commands {
        let mut attrs = CommandAttributes::default();
        match *command {
            Command::AllocZeroed { matrix } => {
                // Content becomes defined (and known): a full pure write.
                attrs
                    .variables_written
                    .extend(partition.variables_for_matrix(matrix)?);
                attrs.matrices_written.push(matrix);
            }
            // No variable effect: content is respectively not yet, or no
            // longer, defined. The matrix tracker picks these up by kind.
            Command::AllocUndefined { .. } | Command::Deallocate { .. } => {}
            Command::Propagate {
                component,
                input,
                output,
            } => {
                let c = topology.component(component)?;
                attrs.record_read(computation, partition, input)?;
                attrs.record_write(computation, partition, output, c.propagate_adds)?;
            }
            Command::Backprop {
                component,
                output_deriv,
                input_deriv,
            } => {
                let c = topology.component(component)?;
                attrs.record_read(computation, partition, output_deriv)?;
                attrs.record_write(computation, partition, input_deriv, c.backprop_adds)?;
                attrs.has_side_effects = c.updates_parameters;
            }
            Command::Copy { source, dest } => {
                attrs.record_read(computation, partition, source)?;
                attrs.record_write(computation, partition, dest, false)?;
            }
            Command::Add { source, dest } => {
                attrs.record_read(computation, partition, source)?;
                attrs.record_write(computation, partition, dest, true)?;
            }
            Command::Boundary | Command::NoOp => {}
        }
        attrs.sort_and_dedup();
        all.push(attrs);
    }

    Ok(all)
}
