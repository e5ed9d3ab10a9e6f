//! Triplet to compressed-format structural conversion.
//!
//! Engines that work on a compressed representation receive the upper
//! triangle of the symmetric matrix in CSC format with duplicate entries
//! merged. The conversion is purely structural: the index mapping from
//! triplet position to compressed position is built once per sparsity
//! pattern, after which values are refreshed in O(nnz) on every solve.

use super::SparseCsc;

/// Structural converter from symmetric triplet form to deduplicated
/// compressed-column upper-triangle form.
///
/// Deterministic given a pattern: the compressed entries are ordered by
/// `(col, row)`, and triplets referring to the same `(row, col)` pair
/// (in either triangle) map to the same compressed position, where their
/// values are summed.
pub struct TripletToCscConverter {
    dim: usize,
    /// Triplet position -> compressed data position.
    position_map: Vec<usize>,
    /// Compressed pattern with in-place refreshable values.
    matrix: SparseCsc,
}

impl TripletToCscConverter {
    /// Build the converter for a triplet pattern. Values are initialized
    /// to zero; call [`update_values`](Self::update_values) before use.
    pub fn new(dim: usize, rows: &[usize], cols: &[usize]) -> Self {
        debug_assert_eq!(rows.len(), cols.len());
        let nnz_triplet = rows.len();

        // Normalize every triplet to the upper triangle and sort by
        // (col, row), remembering where each one came from.
        let mut entries: Vec<(usize, usize, usize)> = rows
            .iter()
            .zip(cols.iter())
            .enumerate()
            .map(|(k, (&i, &j))| {
                let (r, c) = if i <= j { (i, j) } else { (j, i) };
                (c, r, k)
            })
            .collect();
        entries.sort_unstable();

        let mut indptr = vec![0usize; dim + 1];
        let mut indices = Vec::with_capacity(nnz_triplet);
        let mut position_map = vec![0usize; nnz_triplet];

        let mut last: Option<(usize, usize)> = None;
        for &(c, r, k) in &entries {
            if last != Some((c, r)) {
                indices.push(r);
                indptr[c + 1] += 1;
                last = Some((c, r));
            }
            position_map[k] = indices.len() - 1;
        }
        for c in 0..dim {
            indptr[c + 1] += indptr[c];
        }

        let nnz = indices.len();
        let matrix = SparseCsc::new_csc((dim, dim), indptr, indices, vec![0.0; nnz]);

        Self {
            dim,
            position_map,
            matrix,
        }
    }

    /// Matrix dimension.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Number of distinct structural nonzeros in the compressed pattern.
    pub fn nnz_compressed(&self) -> usize {
        self.matrix.nnz()
    }

    /// Refresh the compressed values from triplet values, summing
    /// duplicates.
    ///
    /// # Panics
    ///
    /// Panics if `triplet_values` does not match the pattern this
    /// converter was built for.
    pub fn update_values(&mut self, triplet_values: &[f64]) {
        assert_eq!(
            triplet_values.len(),
            self.position_map.len(),
            "value array does not match the converted pattern"
        );
        let data = self.matrix.data_mut();
        data.fill(0.0);
        for (&pos, &v) in self.position_map.iter().zip(triplet_values.iter()) {
            data[pos] += v;
        }
    }

    /// The compressed matrix (upper triangle, CSC).
    pub fn matrix(&self) -> &SparseCsc {
        &self.matrix
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convert_merges_duplicates() {
        // (0,1) appears twice, once mirrored into the lower triangle.
        let rows = vec![0, 1, 1, 2];
        let cols = vec![1, 0, 1, 2];
        let mut conv = TripletToCscConverter::new(3, &rows, &cols);

        assert_eq!(conv.nnz_compressed(), 3);

        conv.update_values(&[1.0, 2.0, 4.0, 8.0]);
        let m = conv.matrix();
        // Column 1 holds (0,1)=3 (summed) and (1,1)=4.
        let col1 = m.outer_view(1).unwrap();
        let vals: Vec<f64> = col1.iter().map(|(_, &v)| v).collect();
        assert_eq!(vals, vec![3.0, 4.0]);
        let col2 = m.outer_view(2).unwrap();
        assert_eq!(col2.iter().next().unwrap().1, &8.0);
    }

    #[test]
    fn test_value_refresh_keeps_pattern() {
        let rows = vec![0, 0, 1];
        let cols = vec![0, 1, 1];
        let mut conv = TripletToCscConverter::new(2, &rows, &cols);
        conv.update_values(&[2.0, 1.0, 2.0]);
        let before: Vec<usize> = conv.matrix().indices().to_vec();
        conv.update_values(&[5.0, -1.0, 7.0]);
        assert_eq!(conv.matrix().indices(), before.as_slice());
        assert_eq!(conv.matrix().data(), &[5.0, -1.0, 7.0]);
    }

    #[test]
    fn test_deterministic_ordering() {
        // Same pattern presented in two different triplet orders must
        // produce the same compressed structure.
        let a = TripletToCscConverter::new(3, &[0, 1, 2], &[1, 1, 2]);
        let b = TripletToCscConverter::new(3, &[2, 1, 0], &[2, 1, 1]);
        assert_eq!(a.matrix().indices(), b.matrix().indices());
        assert_eq!(
            a.matrix().indptr().raw_storage(),
            b.matrix().indptr().raw_storage()
        );
    }
}
