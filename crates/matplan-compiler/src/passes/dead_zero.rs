//! Dead zero-initialization removal.
//!
//! A zeroed allocation pays for a memset the program may never observe: if
//! the matrix's first access after allocation is a full pure write, the
//! zeros are overwritten before anything reads them, and the allocation can
//! be demoted to an undefined one.

use crate::accesses::AccessType;
use crate::analyzer::Analysis;
use crate::passes::Pass;
use matplan_core::{Command, Computation, Result, Topology};

pub struct RemoveUnnecessaryZeroingPass;

impl Pass for RemoveUnnecessaryZeroingPass {
    fn name(&self) -> &str {
        "remove_unnecessary_zeroing"
    }

    fn run(&self, topology: &Topology, computation: &mut Computation) -> Result<bool> {
        let analysis = Analysis::new(topology, computation)?;
        let mut changed = false;

        for (m, record) in analysis.matrix_accesses.iter().enumerate() {
            let Some(alloc) = record.allocate_command else {
                continue;
            };
            let Some(Command::AllocZeroed { matrix }) = computation.commands.get(alloc).copied()
            else {
                continue;
            };

            let zeroing_unobserved = match record.accesses.first() {
                Some(first) => first.access_type == AccessType::Write,
                // Never accessed: the zeros are only observable if the matrix
                // is an output.
                None => !record.is_output,
            };
            if zeroing_unobserved {
                computation.commands[alloc] = Command::AllocUndefined { matrix };
                changed = true;
                tracing::debug!(matrix = m, command = alloc, "demoted zeroed allocation");
            }
        }

        Ok(changed)
    }
}
