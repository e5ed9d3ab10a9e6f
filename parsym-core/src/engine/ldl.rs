//! Sparse LDL^T engine.
//!
//! Factorizes the assembled matrix with the `ldl` crate (up-looking
//! LDL^T without pivoting) and reads the inertia off the sign pattern of
//! D. The symbolic work (elimination tree, column counts) is done once
//! per sparsity pattern in [`init_structure`](SymLinearEngine::init_structure)
//! and reused across value-only refactorizations.
//!
//! The quality ladder is the iterative-refinement step count: each
//! quality increase doubles it up to a cap, after which no further
//! increase is available.

use super::{EngineError, EngineMatrix, MatrixFormat, SolveStatus, SymLinearEngine};
use crate::linalg::SparseCsc;

const INITIAL_REFINE_ITERS: usize = 1;
const MAX_REFINE_ITERS: usize = 8;

/// LDL^T factorization data: L in CSC form plus the D diagonal.
struct LdlFactorData {
    l_p: Vec<usize>,
    l_i: Vec<usize>,
    l_x: Vec<f64>,
    d: Vec<f64>,
    d_inv: Vec<f64>,
}

/// Sparse LDL^T engine over the compressed upper triangle.
pub struct LdlEngine {
    dim: usize,
    /// Pivots with magnitude below this are treated as singular.
    min_pivot: f64,
    /// Iterative refinement steps per solve (the quality knob).
    refine_iters: usize,

    // Symbolic state, valid for the current pattern
    etree: Option<Vec<Option<usize>>>,
    l_nz: Option<Vec<usize>>,

    factorization: Option<LdlFactorData>,
    num_neg_evals: Option<usize>,

    // Reusable factorization workspaces
    bwork: Vec<ldl::Marker>,
    iwork: Vec<usize>,
    fwork: Vec<f64>,
}

impl LdlEngine {
    /// Create an engine with the default pivot threshold.
    pub fn new() -> Self {
        Self::with_min_pivot(1e-12)
    }

    /// Create an engine that treats pivots below `min_pivot` as singular.
    pub fn with_min_pivot(min_pivot: f64) -> Self {
        assert!(min_pivot > 0.0, "pivot threshold must be positive");
        Self {
            dim: 0,
            min_pivot,
            refine_iters: INITIAL_REFINE_ITERS,
            etree: None,
            l_nz: None,
            factorization: None,
            num_neg_evals: None,
            bwork: Vec::new(),
            iwork: Vec::new(),
            fwork: Vec::new(),
        }
    }

    /// Refactorize from the values in `mat`. Returns the status; on
    /// success the factors and the inertia are stored.
    fn factorize(&mut self, mat: &SparseCsc) -> SolveStatus {
        let indptr = mat.indptr();
        let a_p = indptr.raw_storage();
        let a_i = mat.indices();
        let a_x = mat.data();

        let etree = self.etree.as_ref().unwrap();
        let l_nz = self.l_nz.as_ref().unwrap();
        let nnz_l: usize = l_nz.iter().sum();

        let f = self.factorization.get_or_insert_with(|| LdlFactorData {
            l_p: Vec::new(),
            l_i: Vec::new(),
            l_x: Vec::new(),
            d: Vec::new(),
            d_inv: Vec::new(),
        });
        f.l_p.resize(self.dim + 1, 0);
        f.l_i.resize(nnz_l, 0);
        f.l_x.resize(nnz_l, 0.0);
        f.d.resize(self.dim, 0.0);
        f.d_inv.resize(self.dim, 0.0);

        self.bwork.fill(ldl::Marker::Unused);
        self.iwork.fill(0);
        self.fwork.fill(0.0);

        let result = ldl::factor(
            self.dim,
            a_p,
            a_i,
            a_x,
            &mut f.l_p,
            &mut f.l_i,
            &mut f.l_x,
            &mut f.d,
            &mut f.d_inv,
            l_nz,
            etree,
            &mut self.bwork,
            &mut self.iwork,
            &mut self.fwork,
        );

        if result.is_err() {
            // Unpivoted LDL hit a zero pivot; the matrix is singular for
            // this algorithm. Upstream may perturb and retry.
            self.num_neg_evals = None;
            return SolveStatus::Singular;
        }

        if f.d.iter().any(|d| !d.is_finite()) {
            self.num_neg_evals = None;
            return SolveStatus::Fatal;
        }
        if f.d.iter().any(|d| d.abs() < self.min_pivot) {
            self.num_neg_evals = None;
            return SolveStatus::Singular;
        }

        self.num_neg_evals = Some(f.d.iter().filter(|&&d| d < 0.0).count());
        SolveStatus::Success
    }

    /// Solve with the current factors, refining against `mat`.
    fn solve_one(&self, mat: &SparseCsc, b: &[f64], x: &mut [f64]) {
        let f = self.factorization.as_ref().unwrap();
        x.copy_from_slice(b);
        ldl::solve(self.dim, &f.l_p, &f.l_i, &f.l_x, &f.d_inv, x);

        let mut residual = vec![0.0; self.dim];
        let mut correction = vec![0.0; self.dim];
        for _ in 0..self.refine_iters {
            residual.copy_from_slice(b);
            sym_upper_spmv(mat, x, &mut residual, -1.0);
            correction.copy_from_slice(&residual);
            ldl::solve(self.dim, &f.l_p, &f.l_i, &f.l_x, &f.d_inv, &mut correction);
            for (xi, &ci) in x.iter_mut().zip(correction.iter()) {
                *xi += ci;
            }
        }
    }
}

impl Default for LdlEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SymLinearEngine for LdlEngine {
    fn matrix_format(&self) -> MatrixFormat {
        MatrixFormat::CompressedUpper
    }

    fn init_structure(&mut self, matrix: &EngineMatrix<'_>) -> Result<(), EngineError> {
        let mat = match matrix {
            EngineMatrix::CompressedUpper(m) => *m,
            EngineMatrix::Triplet { .. } => {
                return Err(EngineError::FormatMismatch {
                    required: MatrixFormat::CompressedUpper,
                })
            }
        };
        let n = mat.rows();
        self.dim = n;
        self.factorization = None;
        self.num_neg_evals = None;

        let indptr = mat.indptr();
        let a_p = indptr.raw_storage();
        let a_i = mat.indices();

        let mut work = vec![0; n];
        let mut l_nz = vec![0; n];
        let mut etree = vec![None; n];
        ldl::etree(n, a_p, a_i, &mut work, &mut l_nz, &mut etree).map_err(|_| {
            EngineError::DimensionMismatch {
                expected: n,
                actual: a_p.len().saturating_sub(1),
            }
        })?;

        self.etree = Some(etree);
        self.l_nz = Some(l_nz);
        self.bwork = vec![ldl::Marker::Unused; n];
        self.iwork = vec![0; 3 * n];
        self.fwork = vec![0.0; n];
        Ok(())
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
        let mat = match matrix {
            EngineMatrix::CompressedUpper(m) => *m,
            EngineMatrix::Triplet { .. } => {
                return Err(EngineError::FormatMismatch {
                    required: MatrixFormat::CompressedUpper,
                })
            }
        };
        if self.etree.is_none() {
            return Err(EngineError::NotInitialized);
        }
        if mat.rows() != self.dim {
            return Err(EngineError::DimensionMismatch {
                expected: self.dim,
                actual: mat.rows(),
            });
        }
        if rhs_sol.len() != nrhs * self.dim {
            return Err(EngineError::DimensionMismatch {
                expected: nrhs * self.dim,
                actual: rhs_sol.len(),
            });
        }

        if new_matrix || self.factorization.is_none() {
            let status = self.factorize(mat);
            if status != SolveStatus::Success {
                return Ok(status);
            }
        }

        if check_neg_evals && self.num_neg_evals != Some(expected_neg_evals) {
            return Ok(SolveStatus::WrongInertia);
        }

        let mut x = vec![0.0; self.dim];
        for k in 0..nrhs {
            let rhs = &mut rhs_sol[k * self.dim..(k + 1) * self.dim];
            let b = rhs.to_vec();
            self.solve_one(mat, &b, &mut x);
            rhs.copy_from_slice(&x);
        }
        Ok(SolveStatus::Success)
    }

    fn num_neg_evals(&self) -> Option<usize> {
        self.num_neg_evals
    }

    fn increase_quality(&mut self) -> bool {
        if self.refine_iters >= MAX_REFINE_ITERS {
            return false;
        }
        self.refine_iters = (self.refine_iters * 2).min(MAX_REFINE_ITERS);
        true
    }

    fn provides_inertia(&self) -> bool {
        true
    }
}

/// y += alpha * A * x for a symmetric matrix stored as its upper
/// triangle in CSC.
fn sym_upper_spmv(mat: &SparseCsc, x: &[f64], y: &mut [f64], alpha: f64) {
    for (&val, (row, col)) in mat.iter() {
        y[row] += alpha * val * x[col];
        if row != col {
            y[col] += alpha * val * x[row];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::compressed::TripletToCscConverter;

    fn compressed(dim: usize, rows: &[usize], cols: &[usize], vals: &[f64]) -> SparseCsc {
        let mut conv = TripletToCscConverter::new(dim, rows, cols);
        conv.update_values(vals);
        conv.matrix().clone()
    }

    #[test]
    fn test_solve_positive_definite() {
        // [[2, 1], [1, 2]] * x = [3, 3] => x = [1, 1]
        let mat = compressed(2, &[0, 0, 1], &[0, 1, 1], &[2.0, 1.0, 2.0]);
        let mut engine = LdlEngine::new();
        engine
            .init_structure(&EngineMatrix::CompressedUpper(&mat))
            .unwrap();

        let mut rhs = vec![3.0, 3.0];
        let status = engine
            .multi_solve(true, &EngineMatrix::CompressedUpper(&mat), &mut rhs, 1, false, 0)
            .unwrap();
        assert_eq!(status, SolveStatus::Success);
        assert!((rhs[0] - 1.0).abs() < 1e-9, "x[0] = {}", rhs[0]);
        assert!((rhs[1] - 1.0).abs() < 1e-9, "x[1] = {}", rhs[1]);
        assert_eq!(engine.num_neg_evals(), Some(0));
    }

    #[test]
    fn test_inertia_of_indefinite_matrix() {
        // diag(2, -3, 5): one negative eigenvalue.
        let mat = compressed(3, &[0, 1, 2], &[0, 1, 2], &[2.0, -3.0, 5.0]);
        let mut engine = LdlEngine::new();
        engine
            .init_structure(&EngineMatrix::CompressedUpper(&mat))
            .unwrap();

        let mut rhs = vec![2.0, 3.0, 5.0];
        let status = engine
            .multi_solve(true, &EngineMatrix::CompressedUpper(&mat), &mut rhs, 1, true, 1)
            .unwrap();
        assert_eq!(status, SolveStatus::Success);
        assert_eq!(engine.num_neg_evals(), Some(1));
        assert!((rhs[0] - 1.0).abs() < 1e-10);
        assert!((rhs[1] + 1.0).abs() < 1e-10);
        assert!((rhs[2] - 1.0).abs() < 1e-10);
    }

    #[test]
    fn test_wrong_inertia_reported() {
        let mat = compressed(2, &[0, 1], &[0, 1], &[1.0, -1.0]);
        let mut engine = LdlEngine::new();
        engine
            .init_structure(&EngineMatrix::CompressedUpper(&mat))
            .unwrap();

        let mut rhs = vec![1.0, 1.0];
        let status = engine
            .multi_solve(true, &EngineMatrix::CompressedUpper(&mat), &mut rhs, 1, true, 0)
            .unwrap();
        assert_eq!(status, SolveStatus::WrongInertia);
    }

    #[test]
    fn test_singular_matrix_detected() {
        let mat = compressed(2, &[0, 1], &[0, 1], &[1.0, 0.0]);
        let mut engine = LdlEngine::new();
        engine
            .init_structure(&EngineMatrix::CompressedUpper(&mat))
            .unwrap();

        let mut rhs = vec![1.0, 1.0];
        let status = engine
            .multi_solve(true, &EngineMatrix::CompressedUpper(&mat), &mut rhs, 1, false, 0)
            .unwrap();
        assert_eq!(status, SolveStatus::Singular);
        assert_eq!(engine.num_neg_evals(), None);
    }

    #[test]
    fn test_quality_ladder_saturates() {
        let mut engine = LdlEngine::new();
        let mut increases = 0;
        while engine.increase_quality() {
            increases += 1;
            assert!(increases < 16, "quality ladder must saturate");
        }
        assert!(!engine.increase_quality());
        assert!(!engine.increase_quality());
    }

    #[test]
    fn test_refactorize_without_new_structure() {
        let mut conv = TripletToCscConverter::new(2, &[0, 0, 1], &[0, 1, 1]);
        conv.update_values(&[2.0, 0.0, 2.0]);
        let mut engine = LdlEngine::new();
        engine
            .init_structure(&EngineMatrix::CompressedUpper(conv.matrix()))
            .unwrap();

        let mut rhs = vec![2.0, 4.0];
        engine
            .multi_solve(true, &EngineMatrix::CompressedUpper(conv.matrix()), &mut rhs, 1, false, 0)
            .unwrap();
        assert!((rhs[0] - 1.0).abs() < 1e-9);
        assert!((rhs[1] - 2.0).abs() < 1e-9);

        // Same pattern, new values.
        conv.update_values(&[4.0, 0.0, 8.0]);
        let mut rhs = vec![2.0, 4.0];
        engine
            .multi_solve(true, &EngineMatrix::CompressedUpper(conv.matrix()), &mut rhs, 1, false, 0)
            .unwrap();
        assert!((rhs[0] - 0.5).abs() < 1e-9);
        assert!((rhs[1] - 0.5).abs() < 1e-9);
    }
}
