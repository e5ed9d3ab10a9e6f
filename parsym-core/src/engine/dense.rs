//! Dense eigendecomposition engine.
//!
//! A triplet-format engine backed by nalgebra's symmetric
//! eigendecomposition. Inertia is exact (it is read off the eigenvalue
//! signs), which makes this the reference engine for inertia-sensitive
//! callers and for small problems; cost is O(n^3), so it does not scale
//! past modest dimensions.

use super::{EngineError, EngineMatrix, MatrixFormat, SolveStatus, SymLinearEngine};
use nalgebra::{DMatrix, DVector};

/// Relative cutoff under which an eigenvalue counts as zero.
const SINGULARITY_TOL: f64 = 1e-12;

struct EigenData {
    eigenvectors: DMatrix<f64>,
    eigenvalues: DVector<f64>,
}

/// Dense engine consuming raw triplets; exact inertia, no quality ladder.
pub struct DenseEigenEngine {
    dim: usize,
    initialized: bool,
    eigen: Option<EigenData>,
    num_neg_evals: Option<usize>,
}

impl DenseEigenEngine {
    /// Create the engine.
    pub fn new() -> Self {
        Self {
            dim: 0,
            initialized: false,
            eigen: None,
            num_neg_evals: None,
        }
    }

    fn assemble(&self, rows: &[usize], cols: &[usize], values: &[f64]) -> DMatrix<f64> {
        let mut a = DMatrix::zeros(self.dim, self.dim);
        for ((&i, &j), &v) in rows.iter().zip(cols.iter()).zip(values.iter()) {
            a[(i, j)] += v;
            if i != j {
                a[(j, i)] += v;
            }
        }
        a
    }

    fn factorize(&mut self, a: DMatrix<f64>) -> SolveStatus {
        if a.iter().any(|v| !v.is_finite()) {
            self.num_neg_evals = None;
            return SolveStatus::Fatal;
        }
        let eig = a.symmetric_eigen();
        let max_abs = eig.eigenvalues.amax();
        if max_abs == 0.0
            || eig
                .eigenvalues
                .iter()
                .any(|&ev| ev.abs() < SINGULARITY_TOL * max_abs)
        {
            self.num_neg_evals = None;
            return SolveStatus::Singular;
        }
        self.num_neg_evals = Some(eig.eigenvalues.iter().filter(|&&ev| ev < 0.0).count());
        self.eigen = Some(EigenData {
            eigenvectors: eig.eigenvectors,
            eigenvalues: eig.eigenvalues,
        });
        SolveStatus::Success
    }
}

impl Default for DenseEigenEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SymLinearEngine for DenseEigenEngine {
    fn matrix_format(&self) -> MatrixFormat {
        MatrixFormat::Triplet
    }

    fn init_structure(&mut self, matrix: &EngineMatrix<'_>) -> Result<(), EngineError> {
        match matrix {
            EngineMatrix::Triplet { dim, .. } => {
                self.dim = *dim;
                self.initialized = true;
                self.eigen = None;
                self.num_neg_evals = None;
                Ok(())
            }
            EngineMatrix::CompressedUpper(_) => Err(EngineError::FormatMismatch {
                required: MatrixFormat::Triplet,
            }),
        }
    }

    fn multi_solve(
        &mut self,
        new_matrix: bool,
        matrix: &EngineMatrix<'_>,
        rhs_sol: &mut [f64],
        nrhs: usize,
        check_neg_evals: bool,
        expected_neg_evals: usize,
    ) -> Result<SolveStatus, EngineError> {
        let (rows, cols, values) = match matrix {
            EngineMatrix::Triplet {
                dim,
                rows,
                cols,
                values,
            } => {
                if *dim != self.dim {
                    return Err(EngineError::DimensionMismatch {
                        expected: self.dim,
                        actual: *dim,
                    });
                }
                (*rows, *cols, *values)
            }
            EngineMatrix::CompressedUpper(_) => {
                return Err(EngineError::FormatMismatch {
                    required: MatrixFormat::Triplet,
                })
            }
        };
        if !self.initialized {
            return Err(EngineError::NotInitialized);
        }
        if rhs_sol.len() != nrhs * self.dim {
            return Err(EngineError::DimensionMismatch {
                expected: nrhs * self.dim,
                actual: rhs_sol.len(),
            });
        }

        if new_matrix || self.eigen.is_none() {
            let a = self.assemble(rows, cols, values);
            let status = self.factorize(a);
            if status != SolveStatus::Success {
                return Ok(status);
            }
        }

        if check_neg_evals && self.num_neg_evals != Some(expected_neg_evals) {
            return Ok(SolveStatus::WrongInertia);
        }

        let eig = self.eigen.as_ref().unwrap();
        for k in 0..nrhs {
            let rhs = &mut rhs_sol[k * self.dim..(k + 1) * self.dim];
            let b = DVector::from_column_slice(rhs);
            // x = V diag(1/lambda) V^T b
            let mut y = eig.eigenvectors.transpose() * b;
            for (yi, &ev) in y.iter_mut().zip(eig.eigenvalues.iter()) {
                *yi /= ev;
            }
            let x = &eig.eigenvectors * y;
            rhs.copy_from_slice(x.as_slice());
        }
        Ok(SolveStatus::Success)
    }

    fn num_neg_evals(&self) -> Option<usize> {
        self.num_neg_evals
    }

    fn increase_quality(&mut self) -> bool {
        // Exact decomposition: nothing more conservative to switch to.
        false
    }

    fn provides_inertia(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triplet<'a>(
        dim: usize,
        rows: &'a [usize],
        cols: &'a [usize],
        values: &'a [f64],
    ) -> EngineMatrix<'a> {
        EngineMatrix::Triplet {
            dim,
            rows,
            cols,
            values,
        }
    }

    #[test]
    fn test_solve_with_duplicate_triplets() {
        // (0,0) split into 1.0 + 1.0; effective matrix [[2, 1], [1, 2]].
        let rows = [0, 0, 0, 1];
        let cols = [0, 0, 1, 1];
        let vals = [1.0, 1.0, 1.0, 2.0];
        let m = triplet(2, &rows, &cols, &vals);

        let mut engine = DenseEigenEngine::new();
        engine.init_structure(&m).unwrap();
        let mut rhs = vec![3.0, 3.0];
        let status = engine.multi_solve(true, &m, &mut rhs, 1, false, 0).unwrap();
        assert_eq!(status, SolveStatus::Success);
        assert!((rhs[0] - 1.0).abs() < 1e-10);
        assert!((rhs[1] - 1.0).abs() < 1e-10);
    }

    #[test]
    fn test_exact_inertia() {
        // Eigenvalues of [[0, 1], [1, 0]] are +1 and -1.
        let rows = [0];
        let cols = [1];
        let vals = [1.0];
        let m = triplet(2, &rows, &cols, &vals);

        let mut engine = DenseEigenEngine::new();
        engine.init_structure(&m).unwrap();
        let mut rhs = vec![1.0, 2.0];
        let status = engine.multi_solve(true, &m, &mut rhs, 1, true, 1).unwrap();
        assert_eq!(status, SolveStatus::Success);
        assert_eq!(engine.num_neg_evals(), Some(1));
        // [[0,1],[1,0]] x = [1,2] => x = [2,1]
        assert!((rhs[0] - 2.0).abs() < 1e-10);
        assert!((rhs[1] - 1.0).abs() < 1e-10);
    }

    #[test]
    fn test_singular_detected() {
        let rows = [0, 0, 1];
        let cols = [0, 1, 1];
        let vals = [1.0, 1.0, 1.0]; // [[1,1],[1,1]] is rank 1
        let m = triplet(2, &rows, &cols, &vals);

        let mut engine = DenseEigenEngine::new();
        engine.init_structure(&m).unwrap();
        let mut rhs = vec![1.0, 1.0];
        let status = engine.multi_solve(true, &m, &mut rhs, 1, false, 0).unwrap();
        assert_eq!(status, SolveStatus::Singular);
    }

    #[test]
    fn test_no_quality_ladder() {
        let mut engine = DenseEigenEngine::new();
        assert!(!engine.increase_quality());
        assert!(!engine.increase_quality());
    }
}
