//! Collective gathers for the distributed matrix.
//!
//! Two independent gathers exist: index arrays move only when the
//! structure changed, values move on every solve. Both use the per-rank
//! counts and offsets computed during the most recent structural gather;
//! the coordinator validates every contribution against that layout, so
//! a stale layout can never silently reassemble data in the wrong order.

use crate::comm::{Collective, GatherLayout};
use crate::error::DriverResult;
use crate::linalg::triplet::DistributedTripletMatrix;

/// Gather the triplet index arrays onto the coordinator.
///
/// Returns `(rows, cols)`, `Some` on the coordinator only. Called only
/// when the structure changed.
pub(crate) fn gather_index_arrays(
    matrix: &DistributedTripletMatrix,
    layout: Option<&GatherLayout>,
    comm: &dyn Collective,
) -> DriverResult<(Option<Vec<usize>>, Option<Vec<usize>>)> {
    let rows = comm.gather_usize(matrix.rows(), layout)?;
    let cols = comm.gather_usize(matrix.cols(), layout)?;
    Ok((rows, cols))
}

/// Gather the triplet values onto the coordinator. Called on every
/// solve; `Some` on the coordinator only.
pub(crate) fn gather_values(
    matrix: &DistributedTripletMatrix,
    layout: Option<&GatherLayout>,
    comm: &dyn Collective,
) -> DriverResult<Option<Vec<f64>>> {
    Ok(comm.gather_f64(matrix.values(), layout)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::SingleProcess;

    #[test]
    fn test_single_process_gather_is_identity() {
        let mut a = DistributedTripletMatrix::new(3);
        a.set_structure(vec![0, 1, 2], vec![0, 1, 2]);
        a.set_values(vec![1.0, 2.0, 3.0]);

        let layout = GatherLayout::from_counts(vec![3]);
        let comm = SingleProcess;
        let (rows, cols) = gather_index_arrays(&a, Some(&layout), &comm).unwrap();
        assert_eq!(rows.unwrap(), vec![0, 1, 2]);
        assert_eq!(cols.unwrap(), vec![0, 1, 2]);
        let values = gather_values(&a, Some(&layout), &comm).unwrap();
        assert_eq!(values.unwrap(), vec![1.0, 2.0, 3.0]);
    }
}
