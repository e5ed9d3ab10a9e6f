//! Solver engine abstraction.
//!
//! An engine owns the actual factorization and triangular solves. The
//! driver talks to it through [`SymLinearEngine`]: it announces the
//! matrix format it wants, gets its structural state initialized once per
//! sparsity pattern, and is then handed values and right-hand sides on
//! every solve. Engines report eigenvalue-sign information (inertia) when
//! they can.

mod dense;
mod ldl;

pub use dense::DenseEigenEngine;
pub use ldl::LdlEngine;

use crate::linalg::SparseCsc;
use thiserror::Error;

/// Matrix format an engine consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatrixFormat {
    /// Raw symmetric triplets, duplicates summed by the engine.
    Triplet,
    /// Deduplicated upper triangle in compressed-column form.
    CompressedUpper,
}

/// Outcome of a factorize-and-solve call.
///
/// Anything but `Success` invalidates the solution buffers; the caller
/// decides whether to perturb and retry, request more quality, or give
/// up. The driver never retries internally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveStatus {
    /// Factorization and solves completed.
    Success,
    /// The matrix is singular (or numerically so).
    Singular,
    /// Factorization succeeded but the number of negative eigenvalues
    /// differs from what the caller required.
    WrongInertia,
    /// Unrecoverable numerical failure.
    Fatal,
}

/// Hard engine errors: contract violations, not numerical outcomes.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Solve called before the structure was initialized.
    #[error("Engine structure has not been initialized")]
    NotInitialized,

    /// The driver handed the engine the wrong matrix format.
    #[error("Engine requires the {required:?} format")]
    FormatMismatch {
        /// Format this engine consumes.
        required: MatrixFormat,
    },

    /// Buffer sizes disagree with the initialized structure.
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Expected size.
        expected: usize,
        /// Size received.
        actual: usize,
    },
}

/// Matrix view handed to an engine, in the format it asked for.
#[derive(Debug, Clone, Copy)]
pub enum EngineMatrix<'a> {
    /// Symmetric triplet data; either triangle, duplicates allowed.
    Triplet {
        /// Matrix dimension.
        dim: usize,
        /// Row indices.
        rows: &'a [usize],
        /// Column indices.
        cols: &'a [usize],
        /// Entry values (summed per `(row, col)` pair).
        values: &'a [f64],
    },
    /// Compressed upper triangle (CSC, deduplicated, sorted).
    CompressedUpper(&'a SparseCsc),
}

impl EngineMatrix<'_> {
    /// Matrix dimension.
    pub fn dim(&self) -> usize {
        match self {
            EngineMatrix::Triplet { dim, .. } => *dim,
            EngineMatrix::CompressedUpper(m) => m.rows(),
        }
    }
}

/// A factorization backend for sparse symmetric indefinite systems.
///
/// Implementations are selected at construction time and owned
/// exclusively by one driver; they carry all solver-internal state
/// (symbolic data, factors, quality level) across calls.
pub trait SymLinearEngine {
    /// Format this engine wants its matrices in.
    fn matrix_format(&self) -> MatrixFormat;

    /// Initialize structural state from a sparsity pattern. Values in
    /// `matrix` may be arbitrary; only the pattern is consulted. Called
    /// once per pattern, before the first solve and again after any
    /// structure change.
    fn init_structure(&mut self, matrix: &EngineMatrix<'_>) -> Result<(), EngineError>;

    /// Factorize (when `new_matrix` is set) and solve for `nrhs`
    /// right-hand sides stored contiguously in `rhs_sol`, which is
    /// overwritten with the solutions on success.
    ///
    /// With `check_neg_evals` set, a successful factorization whose
    /// negative-eigenvalue count differs from `expected_neg_evals`
    /// returns [`SolveStatus::WrongInertia`].
    fn multi_solve(
        &mut self,
        new_matrix: bool,
        matrix: &EngineMatrix<'_>,
        rhs_sol: &mut [f64],
        nrhs: usize,
        check_neg_evals: bool,
        expected_neg_evals: usize,
    ) -> Result<SolveStatus, EngineError>;

    /// Negative-eigenvalue count of the most recent successful
    /// factorization.
    fn num_neg_evals(&self) -> Option<usize>;

    /// Switch to a more conservative numerical strategy for subsequent
    /// solves. Returns `false`, leaving state unchanged, when already at
    /// the most conservative setting.
    fn increase_quality(&mut self) -> bool;

    /// Whether this engine reports inertia. Static capability, valid
    /// before any call.
    fn provides_inertia(&self) -> bool;
}
