//! Matrix types and structural utilities.
//!
//! Triplet storage for the distributed symmetric matrix and the
//! triplet-to-compressed structural converter used when the engine
//! requires a compressed representation.

pub mod compressed;
pub mod triplet;

/// Sparse matrix in CSC format (upper triangle only for symmetric data).
pub type SparseCsc = sprs::CsMat<f64>;
