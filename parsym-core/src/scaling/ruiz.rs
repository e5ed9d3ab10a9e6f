//! Symmetric Ruiz equilibration.
//!
//! Iteratively scales rows and columns of the symmetric matrix by the
//! inverse square root of their infinity norms, so entry magnitudes end
//! up balanced around 1. Because the matrix is symmetric, a single
//! factor vector serves both sides and symmetry is preserved.

use super::ScalingMethod;
use std::collections::HashMap;

/// Symmetric inf-norm equilibration with a decline heuristic.
///
/// Declines to scale when the row norms are already within
/// `decline_ratio` of each other; equilibrating a balanced matrix only
/// perturbs it.
pub struct RuizEquilibration {
    iters: usize,
    decline_ratio: f64,
}

impl RuizEquilibration {
    /// Equilibration with `iters` sweeps and the default decline ratio.
    pub fn new(iters: usize) -> Self {
        Self {
            iters,
            decline_ratio: 10.0,
        }
    }

    /// Override the ratio of largest to smallest row norm below which the
    /// method declines to scale.
    pub fn with_decline_ratio(mut self, ratio: f64) -> Self {
        assert!(ratio >= 1.0, "decline ratio must be at least 1");
        self.decline_ratio = ratio;
        self
    }
}

impl ScalingMethod for RuizEquilibration {
    fn compute_factors(
        &self,
        dim: usize,
        rows: &[usize],
        cols: &[usize],
        values: &[f64],
    ) -> Option<Vec<f64>> {
        if self.iters == 0 || dim == 0 {
            return None;
        }

        // Merge duplicates first; equilibration must see the summed
        // entries the engine will see.
        let mut merged: HashMap<(usize, usize), f64> = HashMap::new();
        for ((&i, &j), &v) in rows.iter().zip(cols.iter()).zip(values.iter()) {
            let key = if i <= j { (i, j) } else { (j, i) };
            *merged.entry(key).or_insert(0.0) += v;
        }
        let entries: Vec<((usize, usize), f64)> = merged.into_iter().collect();

        let row_norms = |scale: &[f64]| {
            let mut norms = vec![0.0_f64; dim];
            for &((i, j), v) in &entries {
                let scaled = (v * scale[i] * scale[j]).abs();
                norms[i] = norms[i].max(scaled);
                if i != j {
                    norms[j] = norms[j].max(scaled);
                }
            }
            norms
        };

        let mut scale = vec![1.0_f64; dim];
        let initial = row_norms(&scale);
        let max_norm = initial.iter().cloned().fold(0.0_f64, f64::max);
        let min_norm = initial
            .iter()
            .cloned()
            .filter(|&n| n > 0.0)
            .fold(f64::INFINITY, f64::min);
        if max_norm == 0.0 {
            return None;
        }
        if max_norm / min_norm <= self.decline_ratio {
            return None;
        }

        for _ in 0..self.iters {
            let norms = row_norms(&scale);
            for (s, &norm) in scale.iter_mut().zip(norms.iter()) {
                if norm > 1e-12 {
                    *s /= norm.sqrt();
                }
            }
        }
        Some(scale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declines_on_balanced_matrix() {
        let method = RuizEquilibration::new(5);
        // [[2, 1], [1, 2]]: row norms identical.
        let factors = method.compute_factors(2, &[0, 0, 1], &[0, 1, 1], &[2.0, 1.0, 2.0]);
        assert!(factors.is_none());
    }

    #[test]
    fn test_balances_row_norms() {
        let method = RuizEquilibration::new(10).with_decline_ratio(1.0);
        // diag(1e6, 1e-6, 1): wildly unbalanced.
        let rows = [0, 1, 2];
        let cols = [0, 1, 2];
        let vals = [1e6, 1e-6, 1.0];
        let scale = method.compute_factors(3, &rows, &cols, &vals).unwrap();

        for i in 0..3 {
            let scaled = (vals[i] * scale[i] * scale[i]).abs();
            assert!(
                (scaled - 1.0).abs() < 1e-6,
                "row {} norm after equilibration: {}",
                i,
                scaled
            );
        }
    }

    #[test]
    fn test_duplicates_treated_as_summed() {
        let method = RuizEquilibration::new(10).with_decline_ratio(1.0);
        // (0,0) entered as 500000 + 500000; must be seen as 1e6.
        let split = method
            .compute_factors(2, &[0, 0, 1], &[0, 0, 1], &[5e5, 5e5, 1.0])
            .unwrap();
        let whole = method
            .compute_factors(2, &[0, 1], &[0, 1], &[1e6, 1.0])
            .unwrap();
        for (a, b) in split.iter().zip(whole.iter()) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn test_empty_matrix_declines() {
        let method = RuizEquilibration::new(5);
        assert!(method.compute_factors(3, &[], &[], &[]).is_none());
    }
}
