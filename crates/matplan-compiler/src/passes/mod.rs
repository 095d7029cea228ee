//! Optimization passes over the command sequence.

mod dead_zero;
mod merge;
mod move_sizing;

pub use dead_zero::RemoveUnnecessaryZeroingPass;
pub use merge::MergeMatricesPass;
pub use move_sizing::MoveSizingCommandsPass;

use matplan_core::{Computation, Result, Topology};

/// A structural rewrite of a computation.
///
/// `run()` returns `Ok(true)` if the pass changed the sequence and
/// `Ok(false)` at a fixed point. A pass that finds no opportunity is a
/// no-op, not an error. Each pass derives its own [`crate::Analysis`] from
/// the computation it receives, so it can never consult a snapshot that
/// predates a mutation.
pub trait Pass {
    /// Pass name, used for logging.
    fn name(&self) -> &str;

    /// Run the pass once on the given computation.
    fn run(&self, topology: &Topology, computation: &mut Computation) -> Result<bool>;
}
