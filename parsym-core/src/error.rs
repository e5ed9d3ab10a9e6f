//! Error types for the driver.

use crate::comm::CommError;
use crate::engine::EngineError;
use thiserror::Error;

/// Errors that abort a solve outright.
///
/// These are never retried internally. Recoverable solver outcomes
/// (singular matrix, wrong inertia, fatal numerical failure) are reported
/// through [`crate::SolveStatus`] instead, so that the calling algorithm
/// can decide how to react.
#[derive(Error, Debug)]
pub enum DriverError {
    /// Structural data disagrees across processes (mismatched dimensions
    /// or nonzero counts). Fatal configuration error, not retried.
    #[error("Inconsistent structure across processes: {0}")]
    StructuralInconsistency(String),

    /// A collective operation failed; the whole step is abandoned.
    #[error("Collective operation failed: {0}")]
    Comm(#[from] CommError),

    /// The solver engine rejected its input outside of a factorization.
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// Invalid driver configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Result type for driver operations.
pub type DriverResult<T> = Result<T, DriverError>;
