//! Buffer coalescing.
//!
//! Two matrices can share one buffer when one of them dies at the exact
//! command where the other is born with a full overwrite:
//!
//! - a whole-matrix `Copy` whose source is never accessed again and whose
//!   destination was never accessed before — the copy itself then moves
//!   nothing and is deleted;
//! - an in-place-capable `Propagate`/`Backprop` whose input dies at the
//!   command and whose output is born by it.
//!
//! The pass performs at most one merge per invocation; the driver re-runs it
//! to a fixed point, re-deriving the analysis in between, because deleting a
//! copy can unblock a further merge.

use crate::accesses::AccessType;
use crate::analyzer::Analysis;
use crate::passes::Pass;
use matplan_core::{Command, Computation, MatrixId, Result, SubmatrixId, Topology};

pub struct MergeMatricesPass;

impl Pass for MergeMatricesPass {
    fn name(&self) -> &str {
        "merge_matrices"
    }

    fn run(&self, topology: &Topology, computation: &mut Computation) -> Result<bool> {
        let analysis = Analysis::new(topology, computation)?;

        let mut merge = None;
        for (c, command) in computation.commands.iter().enumerate() {
            let candidate = match *command {
                Command::Copy { source, dest } => Some((source, dest, true)),
                Command::Propagate {
                    component,
                    input,
                    output,
                } => topology
                    .component(component)?
                    .propagate_in_place
                    .then_some((input, output, false)),
                Command::Backprop {
                    component,
                    output_deriv,
                    input_deriv,
                } => topology
                    .component(component)?
                    .backprop_in_place
                    .then_some((output_deriv, input_deriv, false)),
                _ => None,
            };
            let Some((src_sub, dst_sub, is_copy)) = candidate else {
                continue;
            };
            // Parameter updates are effects outside the operand model; such
            // a command is never deleted or rewritten around.
            if analysis.command_attributes[c].has_side_effects {
                continue;
            }
            if let Some((src, dst)) = mergeable(&analysis, computation, c, src_sub, dst_sub)? {
                merge = Some((c, src, dst, is_copy));
                break;
            }
        }

        let Some((c, src, dst, is_copy)) = merge else {
            return Ok(false);
        };
        perform_merge(&analysis, computation, c, src, dst, is_copy)?;
        Ok(true)
    }
}

/// Decide whether the matrices under `src_sub`/`dst_sub` may share a buffer
/// at command `c`, where `c` reads the source and writes the destination.
fn mergeable(
    analysis: &Analysis,
    computation: &Computation,
    c: usize,
    src_sub: SubmatrixId,
    dst_sub: SubmatrixId,
) -> Result<Option<(MatrixId, MatrixId)>> {
    // Only whole-matrix operands: anything narrower leaves content of the
    // other matrix aliased at unrelated offsets.
    if !computation.is_whole_matrix(src_sub)? || !computation.is_whole_matrix(dst_sub)? {
        return Ok(None);
    }
    let src = computation.submatrix(src_sub)?.matrix;
    let dst = computation.submatrix(dst_sub)?.matrix;
    if src == dst {
        return Ok(None);
    }

    let src_matrix = computation.matrix(src)?;
    let dst_matrix = computation.matrix(dst)?;
    if src_matrix.rows != dst_matrix.rows || src_matrix.cols != dst_matrix.cols {
        return Ok(None);
    }

    // The source's content must be allowed to disappear at `c` (so not an
    // input or output buffer), and the destination must be writable (so not
    // an input buffer). The destination may be an output: the result is then
    // produced straight into the output buffer.
    if src_matrix.is_input || src_matrix.is_output || dst_matrix.is_input {
        return Ok(None);
    }

    // Source dies here: `c` is its last access, and it has a proper lifetime.
    let src_rec = &analysis.matrix_accesses[src.index()];
    if src_rec.allocate_command.is_none() || src_rec.deallocate_command.is_none() {
        return Ok(None);
    }
    if src_rec.accesses.last().map(|a| a.command) != Some(c) {
        return Ok(None);
    }

    // Destination is born here: allocated earlier, never touched before `c`,
    // and fully overwritten at `c`. A ReadWrite at `c` (accumulating output,
    // partial write) would observe the source's content instead of the
    // destination's own.
    let dst_rec = &analysis.matrix_accesses[dst.index()];
    match dst_rec.allocate_command {
        Some(alloc) if alloc < c => {}
        _ => return Ok(None),
    }
    match dst_rec.accesses.first() {
        Some(a) if a.command == c && a.access_type == AccessType::Write => {}
        _ => return Ok(None),
    }

    Ok(Some((src, dst)))
}

/// Merge `dst`'s buffer into `src`'s (or vice versa when `dst` is an
/// output): keep the earlier allocate and the later deallocate, drop the
/// other two sizing commands and (for a copy) the command itself, and
/// redirect every submatrix of the discarded matrix to the survivor.
fn perform_merge(
    analysis: &Analysis,
    computation: &mut Computation,
    c: usize,
    src: MatrixId,
    dst: MatrixId,
    is_copy: bool,
) -> Result<()> {
    let survivor = if computation.matrix(dst)?.is_output {
        dst
    } else {
        src
    };
    let discarded = if survivor == src { dst } else { src };

    // The merged lifetime runs from the source's allocation to the
    // destination's deallocation; the two interior sizing commands go away.
    if let Some(dealloc) = analysis.matrix_accesses[src.index()].deallocate_command {
        computation.commands[dealloc] = Command::NoOp;
    }
    if let Some(alloc) = analysis.matrix_accesses[dst.index()].allocate_command {
        computation.commands[alloc] = Command::NoOp;
    }
    if is_copy {
        computation.commands[c] = Command::NoOp;
    }

    // Surviving sizing commands of the discarded matrix now size the
    // survivor's buffer.
    for command in &mut computation.commands {
        match command {
            Command::AllocZeroed { matrix }
            | Command::AllocUndefined { matrix }
            | Command::Deallocate { matrix }
                if *matrix == discarded =>
            {
                *matrix = survivor;
            }
            _ => {}
        }
    }
    for sub in &mut computation.submatrices {
        if sub.matrix == discarded {
            sub.matrix = survivor;
        }
    }

    tracing::debug!(
        command = c,
        survivor = survivor.index(),
        discarded = discarded.index(),
        removed_copy = is_copy,
        "merged matrices"
    );

    computation.renumber()
}

#[cfg(test)]
mod tests {
    use super::*;
    use matplan_core::{Component, Matrix};

    /// A -> copy -> B -> copy -> C, where each source dies at its copy and
    /// each destination is born by it.
    fn copy_chain() -> (Topology, Computation) {
        let mut computation = Computation::new();
        let a = computation.add_matrix(Matrix::new(2, 3));
        let b = computation.add_matrix(Matrix::new(2, 3));
        let c = computation.add_matrix(Matrix::new(2, 3));
        let sub_a = computation.add_whole_submatrix(a).unwrap();
        let sub_b = computation.add_whole_submatrix(b).unwrap();
        let sub_c = computation.add_whole_submatrix(c).unwrap();
        computation.commands = vec![
            Command::AllocZeroed { matrix: a },
            Command::AllocUndefined { matrix: b },
            Command::Copy {
                source: sub_a,
                dest: sub_b,
            },
            Command::Deallocate { matrix: a },
            Command::AllocUndefined { matrix: c },
            Command::Copy {
                source: sub_b,
                dest: sub_c,
            },
            Command::Deallocate { matrix: b },
            Command::Deallocate { matrix: c },
        ];
        (Topology::new(), computation)
    }

    #[test]
    fn test_copy_merge_removes_copy_and_matrix() {
        let (topology, mut computation) = copy_chain();
        let num_matrices = computation.num_matrices();
        let num_commands = computation.commands.len();

        let changed = MergeMatricesPass.run(&topology, &mut computation).unwrap();
        assert!(changed);

        // One matrix and three commands gone (copy + one alloc + one dealloc).
        assert_eq!(computation.num_matrices(), num_matrices - 1);
        assert_eq!(computation.commands.len(), num_commands - 3);
        assert!(!computation
            .commands
            .iter()
            .any(|c| matches!(c, Command::NoOp)));
    }

    #[test]
    fn test_merge_reaches_fixed_point() {
        let (topology, mut computation) = copy_chain();
        while MergeMatricesPass.run(&topology, &mut computation).unwrap() {}

        // Converged: another run changes nothing.
        let before = computation.clone();
        assert!(!MergeMatricesPass.run(&topology, &mut computation).unwrap());
        assert_eq!(computation.commands, before.commands);
        assert_eq!(computation.matrices, before.matrices);
    }

    #[test]
    fn test_in_place_propagate_merges() {
        let mut topology = Topology::new();
        let mut component = Component::new("relu", 3, 3);
        component.propagate_in_place = true;
        let comp = topology.add_component(component);

        let mut computation = Computation::new();
        let a = computation.add_matrix(Matrix::new(2, 3));
        let b = computation.add_matrix(Matrix::new(2, 3));
        let out = computation.add_matrix(Matrix {
            rows: 2,
            cols: 3,
            is_input: false,
            is_output: true,
        });
        let sub_a = computation.add_whole_submatrix(a).unwrap();
        let sub_b = computation.add_whole_submatrix(b).unwrap();
        let sub_out = computation.add_whole_submatrix(out).unwrap();
        computation.commands = vec![
            Command::AllocZeroed { matrix: a },
            Command::AllocUndefined { matrix: b },
            Command::Propagate {
                component: comp,
                input: sub_a,
                output: sub_b,
            },
            Command::Deallocate { matrix: a },
            Command::AllocUndefined { matrix: out },
            Command::Propagate {
                component: comp,
                input: sub_b,
                output: sub_out,
            },
            Command::Deallocate { matrix: b },
        ];

        // First merge: A/B share a buffer through the first propagate.
        assert!(MergeMatricesPass.run(&topology, &mut computation).unwrap());
        // Second merge: the survivor is merged into the output buffer.
        assert!(MergeMatricesPass.run(&topology, &mut computation).unwrap());
        assert!(!MergeMatricesPass.run(&topology, &mut computation).unwrap());

        assert_eq!(computation.num_matrices(), 1);
        let survivor = &computation.matrices[0];
        assert!(survivor.is_output, "output flag survives the merges");
        // Output matrices keep no deallocate.
        assert!(!computation
            .commands
            .iter()
            .any(|c| matches!(c, Command::Deallocate { .. })));
    }

    #[test]
    fn test_accumulating_destination_blocks_merge() {
        let (topology, mut computation) = copy_chain();
        // Turn the dying copy into an Add: the destination's first access is
        // then ReadWrite and the merge must not fire for it.
        let Command::Copy { source, dest } = computation.commands[2] else {
            panic!("expected copy at command 2");
        };
        computation.commands[2] = Command::Add { source, dest };
        // The second copy (B -> C) still merges, so count matrices instead
        // of asserting no change at all.
        let before = computation.num_matrices();
        while MergeMatricesPass.run(&topology, &mut computation).unwrap() {}
        assert_eq!(computation.num_matrices(), before - 1);
    }

    #[test]
    fn test_parameter_updating_backprop_is_not_merged() {
        let mut topology = Topology::new();
        let mut component = Component::new("affine", 3, 3);
        component.backprop_in_place = true;
        component.updates_parameters = true;
        let comp = topology.add_component(component);

        let mut computation = Computation::new();
        let a = computation.add_matrix(Matrix::new(2, 3));
        let b = computation.add_matrix(Matrix::new(2, 3));
        let sub_a = computation.add_whole_submatrix(a).unwrap();
        let sub_b = computation.add_whole_submatrix(b).unwrap();
        computation.commands = vec![
            Command::AllocZeroed { matrix: a },
            Command::AllocUndefined { matrix: b },
            Command::Backprop {
                component: comp,
                output_deriv: sub_a,
                input_deriv: sub_b,
            },
            Command::Deallocate { matrix: a },
            Command::Deallocate { matrix: b },
        ];

        assert!(!MergeMatricesPass.run(&topology, &mut computation).unwrap());

        // The same shape without the parameter update does merge.
        topology.components[0].updates_parameters = false;
        assert!(MergeMatricesPass.run(&topology, &mut computation).unwrap());
    }

    #[test]
    fn test_input_matrix_is_never_discarded() {
        let mut computation = Computation::new();
        let a = computation.add_matrix(Matrix {
            rows: 2,
            cols: 3,
            is_input: true,
            is_output: false,
        });
        let b = computation.add_matrix(Matrix::new(2, 3));
        let sub_a = computation.add_whole_submatrix(a).unwrap();
        let sub_b = computation.add_whole_submatrix(b).unwrap();
        computation.commands = vec![
            Command::AllocUndefined { matrix: b },
            Command::Copy {
                source: sub_a,
                dest: sub_b,
            },
            Command::Deallocate { matrix: a },
            Command::Deallocate { matrix: b },
        ];

        // Merging would clobber the caller's input buffer.
        assert!(!MergeMatricesPass
            .run(&Topology::new(), &mut computation)
            .unwrap());
    }
}
