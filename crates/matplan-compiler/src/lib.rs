//! Analysis, verification and optimization of matplan computations.
//!
//! This crate is the analysis-and-optimization stage of the compiler: it
//! takes an already-compiled, correct-but-naive command sequence and
//!
//! 1. derives a dependency model at *variable* granularity (column intervals
//!    of matrices, finer than whole matrices, coarser than elements),
//! 2. verifies structural invariants of the sequence, and
//! 3. rewrites the sequence to reduce memory footprint and redundant work
//!    without changing the numeric result.
//!
//! The pipeline is strictly snapshot-based: every consumer derives a fresh
//! [`Analysis`] from the computation it is handed, and every structural
//! rewrite invalidates all derived state, which is therefore recomputed from
//! scratch rather than patched.
//!
//! # Example
//!
//! ```no_run
//! use matplan_compiler::{check, optimize};
//! use matplan_core::{CheckConfig, Computation, ComputationRequest, OptimizeConfig, Topology};
//!
//! # fn main() -> matplan_core::Result<()> {
//! # let topology = Topology::new();
//! # let mut request = ComputationRequest::default();
//! # let mut computation = Computation::new();
//! check(&CheckConfig::default(), &topology, &request, &computation)?;
//! optimize(&OptimizeConfig::default(), &topology, &mut request, &mut computation)?;
//! check(&CheckConfig::default(), &topology, &request, &computation)?;
//! # Ok(())
//! # }
//! ```

pub mod accesses;
pub mod analyzer;
pub mod attributes;
pub mod checker;
pub mod passes;
pub mod variables;

pub use accesses::{Access, AccessType, MatrixAccesses};
pub use analyzer::Analysis;
pub use attributes::CommandAttributes;
pub use checker::Checker;
pub use passes::{MergeMatricesPass, MoveSizingCommandsPass, Pass, RemoveUnnecessaryZeroingPass};
pub use variables::VariablePartition;

use matplan_core::{
    CheckConfig, Computation, ComputationRequest, Error, Matrix, MatrixId, OptimizeConfig, Result,
    Topology,
};

/// Optimize a computation in place.
///
/// Runs, under their respective toggles: the buffer-coalescing pass to a
/// fixed point (each merge can remove a copy that was blocking another
/// merge), then dead-zero-initialization removal once, then sizing-command
/// motion once. With the master toggle off the computation is returned
/// unchanged.
///
/// Coalescing can compact the matrix table and shift ids, so the request is
/// rewritten alongside: every rewrite preserves the input/output flags and
/// the table's relative order, and a requested matrix is re-identified
/// afterwards by its rank among the same-flag matrices.
///
/// The computation must be well-formed; [`check`] establishes that, and
/// should be run both before optimization (validating compilation's output)
/// and after (validating this stage's own output), at least in testing.
#[tracing::instrument(skip_all, fields(
    num_commands = computation.commands.len(),
    num_matrices = computation.num_matrices()
))]
pub fn optimize(
    config: &OptimizeConfig,
    topology: &Topology,
    request: &mut ComputationRequest,
    computation: &mut Computation,
) -> Result<()> {
    checker::validate_io_flags(request, computation)?;

    if !config.optimize {
        return Ok(());
    }

    let input_ranks = flag_ranks(&request.inputs, computation, |m| m.is_input)?;
    let output_ranks = flag_ranks(&request.outputs, computation, |m| m.is_output)?;

    if config.merge_matrices {
        let pass = MergeMatricesPass;
        loop {
            let _span = tracing::debug_span!("pass", name = pass.name()).entered();
            if !pass.run(topology, computation)? {
                break;
            }
        }
    }

    if config.remove_unnecessary_zeroing {
        let pass = RemoveUnnecessaryZeroingPass;
        let _span = tracing::debug_span!("pass", name = pass.name()).entered();
        pass.run(topology, computation)?;
    }

    if config.move_sizing_commands {
        let pass = MoveSizingCommandsPass;
        let _span = tracing::debug_span!("pass", name = pass.name()).entered();
        pass.run(topology, computation)?;
    }

    request.inputs = ids_at_ranks(&input_ranks, computation, |m| m.is_input)?;
    request.outputs = ids_at_ranks(&output_ranks, computation, |m| m.is_output)?;
    Ok(())
}

fn flagged_ids(computation: &Computation, flagged: fn(&Matrix) -> bool) -> Vec<MatrixId> {
    computation
        .matrices
        .iter()
        .enumerate()
        .filter(|(_, m)| flagged(m))
        .map(|(i, _)| MatrixId::new(i))
        .collect()
}

/// Rank of each requested matrix among the same-flag matrices, in table
/// order. Valid input after [`checker::validate_io_flags`] has passed.
fn flag_ranks(
    ids: &[MatrixId],
    computation: &Computation,
    flagged: fn(&Matrix) -> bool,
) -> Result<Vec<usize>> {
    let table = flagged_ids(computation, flagged);
    ids.iter()
        .map(|id| {
            table
                .iter()
                .position(|f| f == id)
                .ok_or_else(|| Error::Internal(format!("requested matrix {:?} not flagged", id)))
        })
        .collect()
}

/// Resolve ranks recorded before optimization against the current table.
fn ids_at_ranks(
    ranks: &[usize],
    computation: &Computation,
    flagged: fn(&Matrix) -> bool,
) -> Result<Vec<MatrixId>> {
    let table = flagged_ids(computation, flagged);
    ranks
        .iter()
        .map(|&rank| {
            table.get(rank).copied().ok_or_else(|| {
                Error::Internal("flagged matrix lost during optimization".into())
            })
        })
        .collect()
}

/// Verify a computation's structural invariants without mutating it.
///
/// A pipeline gate for the surrounding compiler: a violation is a defect in
/// compilation or optimization, reported as a fatal diagnostic naming the
/// offending command and invariant class.
#[tracing::instrument(skip_all, fields(num_commands = computation.commands.len()))]
pub fn check(
    config: &CheckConfig,
    topology: &Topology,
    request: &ComputationRequest,
    computation: &Computation,
) -> Result<()> {
    Checker::new(config, topology, request, computation)?.check()
}

#[cfg(test)]
mod tests {
    use super::*;
    use matplan_core::{Command, Matrix};

    #[test]
    fn test_master_toggle_off_is_identity() {
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
            Command::Deallocate { matrix: a },
            Command::Deallocate { matrix: b },
        ];
        let before = computation.clone();

        let config = OptimizeConfig {
            optimize: false,
            ..OptimizeConfig::default()
        };
        optimize(
            &config,
            &Topology::new(),
            &mut ComputationRequest::default(),
            &mut computation,
        )
        .unwrap();

        assert_eq!(computation.commands, before.commands);
        assert_eq!(computation.matrices, before.matrices);
        assert_eq!(computation.submatrices, before.submatrices);
    }

    #[test]
    fn test_optimize_rejects_mismatched_request() {
        let mut computation = Computation::new();
        computation.add_matrix(Matrix {
            rows: 1,
            cols: 1,
            is_input: true,
            is_output: false,
        });

        let err = optimize(
            &OptimizeConfig::default(),
            &Topology::new(),
            &mut ComputationRequest::default(),
            &mut computation,
        )
        .unwrap_err();
        assert!(matches!(err, matplan_core::Error::BadRequest(_)));
    }
}
