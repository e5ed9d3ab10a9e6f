//! Distributed symmetric matrix in triplet form.

/// The local shard of a symmetric matrix distributed across processes.
///
/// Each process holds the `(row, col, value)` triplets it owns; the
/// logical matrix is the union of all shards with duplicate `(row, col)`
/// pairs summed. Only one triangle needs to be stored (by convention the
/// upper one, `col >= row`), and all indices are 0-based: this is the one
/// place that convention is stated, everything else in the crate follows
/// it.
///
/// Two version tags let the driver tell pattern changes from value
/// changes without comparing arrays: `structure_tag` moves whenever the
/// pattern or dimension is edited, `values_tag` whenever values are
/// written. Both are monotonically increasing per instance.
#[derive(Debug, Clone)]
pub struct DistributedTripletMatrix {
    dim: usize,
    rows: Vec<usize>,
    cols: Vec<usize>,
    values: Vec<f64>,
    structure_tag: u64,
    values_tag: u64,
}

impl DistributedTripletMatrix {
    /// Create an empty matrix of dimension `dim` with no local entries.
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            rows: Vec::new(),
            cols: Vec::new(),
            values: Vec::new(),
            structure_tag: 1,
            values_tag: 1,
        }
    }

    /// Matrix dimension (number of rows = columns).
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Number of triplet entries in the local shard.
    pub fn local_nnz(&self) -> usize {
        self.rows.len()
    }

    /// Row indices of the local shard.
    pub fn rows(&self) -> &[usize] {
        &self.rows
    }

    /// Column indices of the local shard.
    pub fn cols(&self) -> &[usize] {
        &self.cols
    }

    /// Values of the local shard.
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Version tag of the sparsity pattern.
    pub fn structure_tag(&self) -> u64 {
        self.structure_tag
    }

    /// Version tag of the values.
    pub fn values_tag(&self) -> u64 {
        self.values_tag
    }

    /// Replace the local sparsity pattern. Existing values are discarded;
    /// [`set_values`](Self::set_values) must be called before the next
    /// solve.
    ///
    /// # Panics
    ///
    /// Panics if `rows` and `cols` differ in length or any index is out of
    /// range.
    pub fn set_structure(&mut self, rows: Vec<usize>, cols: Vec<usize>) {
        assert_eq!(rows.len(), cols.len(), "row/col index arrays must match");
        for (&i, &j) in rows.iter().zip(cols.iter()) {
            assert!(i < self.dim && j < self.dim, "triplet index out of range");
        }
        self.rows = rows;
        self.cols = cols;
        self.values = vec![0.0; self.rows.len()];
        self.structure_tag += 1;
        self.values_tag += 1;
    }

    /// Resize the matrix, discarding the local shard. A dimension change
    /// is always a structure change.
    pub fn set_dim(&mut self, dim: usize) {
        self.dim = dim;
        self.rows.clear();
        self.cols.clear();
        self.values.clear();
        self.structure_tag += 1;
        self.values_tag += 1;
    }

    /// Replace the values of the local shard, keeping the pattern.
    ///
    /// # Panics
    ///
    /// Panics if `values` does not match the pattern length.
    pub fn set_values(&mut self, values: Vec<f64>) {
        assert_eq!(
            values.len(),
            self.rows.len(),
            "value array must match the pattern"
        );
        self.values = values;
        self.values_tag += 1;
    }

    /// Overwrite a single value by its position in the local shard.
    pub fn set_value(&mut self, pos: usize, value: f64) {
        self.values[pos] = value;
        self.values_tag += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_track_edits() {
        let mut a = DistributedTripletMatrix::new(3);
        let s0 = a.structure_tag();
        let v0 = a.values_tag();

        a.set_structure(vec![0, 1], vec![0, 2]);
        assert!(a.structure_tag() > s0);
        assert!(a.values_tag() > v0);

        let s1 = a.structure_tag();
        a.set_values(vec![1.0, 2.0]);
        assert_eq!(a.structure_tag(), s1, "value writes must not move the structure tag");
        assert!(a.values_tag() > v0);

        a.set_value(1, 5.0);
        assert_eq!(a.structure_tag(), s1);
        assert_eq!(a.values()[1], 5.0);
    }

    #[test]
    fn test_dim_change_is_structural() {
        let mut a = DistributedTripletMatrix::new(3);
        a.set_structure(vec![0], vec![0]);
        let s = a.structure_tag();
        a.set_dim(4);
        assert!(a.structure_tag() > s);
        assert_eq!(a.local_nnz(), 0);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_rejects_out_of_range_index() {
        let mut a = DistributedTripletMatrix::new(2);
        a.set_structure(vec![0, 2], vec![0, 2]);
    }
}
