//! Core IR data model for the matplan computation optimizer.
//!
//! This crate provides the types shared by the compilation stages:
//! - Linear command IR (`Command`, `Computation`, `Matrix`, `Submatrix`)
//! - Component property table (`Topology`, `Component`)
//! - Request metadata (`ComputationRequest`)
//! - Configuration toggles (`OptimizeConfig`, `CheckConfig`)

pub mod config;
pub mod ir;
pub mod topology;

// Re-export commonly used types
pub use config::{CheckConfig, OptimizeConfig};
pub use ir::{Command, Computation, ComputationRequest, Matrix, MatrixId, Submatrix, SubmatrixId};
pub use topology::{Component, ComponentId, Topology};

/// Result type using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type shared by the matplan crates.
///
/// The checker variants are fatal diagnostics: they indicate a defect in
/// compilation or in the optimizer itself, identified by the offending
/// command index, and are not recoverable runtime conditions.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An operand index is out of range or operand dimensions are
    /// inconsistent with the invoked component's declared shapes.
    #[error("bad index or dimension at command {command}: {message}")]
    BadIndex { command: usize, message: String },

    /// A propagate/backprop command is on the wrong side of the
    /// forward/backward boundary marker, or the marker itself is missing
    /// or duplicated.
    #[error("ordering violation at command {command}: {message}")]
    Ordering { command: usize, message: String },

    /// A command reads a variable before any command writes it.
    #[error("undefined read at command {command}: {message}")]
    UndefinedRead { command: usize, message: String },

    /// A matrix allocated with undefined contents is read, or only
    /// partially written, before its first full write.
    #[error("read of undefined allocation at command {command}: {message}")]
    AllocationRead { command: usize, message: String },

    /// A matrix is accessed outside its allocate/deallocate lifetime.
    #[error("out-of-lifetime access at command {command}: {message}")]
    MatrixBounds { command: usize, message: String },

    /// The computation's input/output flags disagree with the request.
    #[error("request mismatch: {0}")]
    BadRequest(String),

    /// Internal invariant breakage (dangling id, unexpected command shape).
    #[error("internal error: {0}")]
    Internal(String),
}
