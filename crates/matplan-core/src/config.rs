//! Configuration toggles for the optimizer and the checker.
//!
//! Every pass and every check class is independently disableable so a
//! suspected defect can be bisected to one rewrite or one invariant.

/// Toggles for `optimize()`.
#[derive(Debug, Clone, Copy)]
pub struct OptimizeConfig {
    /// Master switch; when off, `optimize()` returns the sequence unchanged.
    pub optimize: bool,

    /// Buffer-coalescing pass (run to a fixed point).
    pub merge_matrices: bool,

    /// Demote zeroed allocations whose zeroing is never observed.
    pub remove_unnecessary_zeroing: bool,

    /// Move allocate/deallocate commands to tighten matrix lifetimes.
    pub move_sizing_commands: bool,
}

impl Default for OptimizeConfig {
    fn default() -> Self {
        Self {
            optimize: true,
            merge_matrices: true,
            remove_unnecessary_zeroing: true,
            move_sizing_commands: true,
        }
    }
}

/// Toggles for `check()`, one per invariant class.
#[derive(Debug, Clone, Copy)]
pub struct CheckConfig {
    /// Operand index ranges and dimension agreement.
    pub check_indexes: bool,

    /// Propagate/backprop placement relative to the boundary marker.
    pub check_order: bool,

    /// No variable is read before it is written.
    pub check_undefined: bool,

    /// Matrices allocated undefined are fully written before any read.
    pub check_allocation: bool,

    /// No matrix access outside its allocate/deallocate lifetime.
    pub check_matrix_accesses: bool,
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            check_indexes: true,
            check_order: true,
            check_undefined: true,
            check_allocation: true,
            check_matrix_accesses: true,
        }
    }
}
