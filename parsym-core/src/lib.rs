//! Parsym: a distributed driver for sparse symmetric indefinite linear systems.
//!
//! This library coordinates the solution of `A x = b` for a sparse symmetric
//! indefinite matrix `A` whose triplet entries are sharded across a fixed set
//! of cooperating processes. It does not factorize anything itself; instead
//! it prepares the system for a pluggable solver engine:
//!
//! - **Gathering**: each rank's local triplet shard is collected on a
//!   coordinating rank, with duplicate `(row, col)` entries summed.
//! - **Structure caching**: index arrays, gather layouts, and the
//!   triplet-to-compressed conversion are derived once per sparsity pattern
//!   and reused across value-only updates, detected by a cheap version tag.
//! - **Scaling**: an optional equilibration method scales the matrix and
//!   right-hand sides before the engine sees them and un-scales solutions
//!   afterwards.
//!
//! The factorization backend, the scaling algorithm, and the collective
//! communication layer are all trait seams with in-tree implementations:
//! an LDL^T engine (sparse, compressed format), a dense eigendecomposition
//! engine (triplet format), symmetric Ruiz equilibration, and two
//! communicators (single-process and an in-memory threaded simulation).
//!
//! # Example
//!
//! ```
//! use parsym_core::{
//!     DistributedTripletMatrix, DriverSettings, ParTSymDriver, SolveStatus,
//! };
//! use parsym_core::comm::SingleProcess;
//! use parsym_core::engine::LdlEngine;
//!
//! // Upper triangle of a 2x2 symmetric positive definite matrix.
//! let mut a = DistributedTripletMatrix::new(2);
//! a.set_structure(vec![0, 0, 1], vec![0, 1, 1]);
//! a.set_values(vec![2.0, 1.0, 2.0]);
//!
//! let mut driver = ParTSymDriver::new(
//!     Box::new(LdlEngine::new()),
//!     None,
//!     Box::new(SingleProcess),
//!     DriverSettings::default(),
//! ).unwrap();
//!
//! let mut rhs = vec![vec![3.0, 3.0]];
//! let status = driver.multi_solve(&a, &mut rhs, false, 0).unwrap();
//! assert_eq!(status, SolveStatus::Success);
//! assert!((rhs[0][0] - 1.0).abs() < 1e-8);
//! assert!((rhs[0][1] - 1.0).abs() < 1e-8);
//! ```

#![warn(clippy::all)]

pub mod comm;
pub mod driver;
pub mod engine;
pub mod error;
pub mod linalg;
pub mod scaling;
pub mod settings;

// Re-export main types
pub use driver::ParTSymDriver;
pub use engine::{MatrixFormat, SolveStatus, SymLinearEngine};
pub use error::{DriverError, DriverResult};
pub use linalg::triplet::DistributedTripletMatrix;
pub use scaling::ScalingMethod;
pub use settings::DriverSettings;
