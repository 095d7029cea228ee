//! Sizing-command motion.
//!
//! Moves each allocate command immediately before its matrix's first access
//! and each deallocate immediately after its last access. This shrinks the
//! interval during which a buffer must exist and therefore the peak
//! concurrently-live storage, without reordering any two commands that touch
//! the same matrix.
//!
//! Implemented as one stable sort: every command gets a key
//! `(anchor, class, original position)` where non-sizing commands anchor at
//! their own position with class 1, allocates anchor at the first access
//! with class 0 (just before it) and deallocates at the last access with
//! class 2 (just after it). Stability keeps everything else in program
//! order.

use crate::analyzer::Analysis;
use crate::passes::Pass;
use matplan_core::{Command, Computation, Result, Topology};

pub struct MoveSizingCommandsPass;

impl Pass for MoveSizingCommandsPass {
    fn name(&self) -> &str {
        "move_sizing_commands"
    }

    fn run(&self, topology: &Topology, computation: &mut Computation) -> Result<bool> {
        let analysis = Analysis::new(topology, computation)?;

        let keys: Vec<(usize, u8, usize)> = computation
            .commands
            .iter()
            .enumerate()
            .map(|(i, command)| match *command {
                Command::AllocZeroed { matrix } | Command::AllocUndefined { matrix } => {
                    match analysis.first_matrix_access(matrix) {
                        Some(first) => (first, 0, i),
                        // Never accessed: leave the allocation in place.
                        None => (i, 1, i),
                    }
                }
                Command::Deallocate { matrix } => match analysis.last_matrix_access(matrix) {
                    Some(last) => (last, 2, i),
                    None => (i, 1, i),
                },
                _ => (i, 1, i),
            })
            .collect();

        let mut order: Vec<usize> = (0..computation.commands.len()).collect();
        order.sort_by_key(|&i| keys[i]);

        if order.iter().enumerate().all(|(new, &old)| new == old) {
            return Ok(false);
        }

        computation.commands = order.iter().map(|&i| computation.commands[i]).collect();
        tracing::debug!("moved sizing commands");
        Ok(true)
    }
}
