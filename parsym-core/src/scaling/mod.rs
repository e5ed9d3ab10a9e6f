//! Scaling methods for the assembled matrix.
//!
//! A scaling method looks at the assembled symmetric matrix and either
//! produces one positive factor per row/column or declines. The driver
//! applies the factors symmetrically (`v[i,j] * s[i] * s[j]`, rhs
//! `b[i] * s[i]`) and multiplies solutions by `s[i]` afterwards.

mod ruiz;

pub use ruiz::RuizEquilibration;

/// Computes per-row/column scale factors for a symmetric triplet matrix.
///
/// Returning `None` means the method recommends leaving this matrix
/// unscaled; the driver then solves the original system.
pub trait ScalingMethod {
    /// Compute factors for the assembled matrix, or decline.
    ///
    /// `rows`/`cols`/`values` are the assembled triplets (duplicates
    /// still present; implementations must treat them as summed).
    fn compute_factors(
        &self,
        dim: usize,
        rows: &[usize],
        cols: &[usize],
        values: &[f64],
    ) -> Option<Vec<f64>>;
}
