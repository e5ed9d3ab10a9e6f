//! Single-process communicator.

use super::{check_layout, Collective, CommError, GatherLayout};

/// The degenerate size-1 topology: every collective is a local copy.
///
/// This is the communicator to use when the driver runs inside a
/// non-distributed application.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleProcess;

impl Collective for SingleProcess {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn gather_scalar(&self, local: usize) -> Result<Option<Vec<usize>>, CommError> {
        Ok(Some(vec![local]))
    }

    fn gather_usize(
        &self,
        local: &[usize],
        layout: Option<&GatherLayout>,
    ) -> Result<Option<Vec<usize>>, CommError> {
        if let Some(layout) = layout {
            check_layout(&[local.len()], layout)?;
        }
        Ok(Some(local.to_vec()))
    }

    fn gather_f64(
        &self,
        local: &[f64],
        layout: Option<&GatherLayout>,
    ) -> Result<Option<Vec<f64>>, CommError> {
        if let Some(layout) = layout {
            check_layout(&[local.len()], layout)?;
        }
        Ok(Some(local.to_vec()))
    }

    fn broadcast_f64(&self, _buf: &mut [f64]) -> Result<(), CommError> {
        Ok(())
    }

    fn broadcast_scalar(&self, value: u64) -> Result<u64, CommError> {
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gathers_are_copies() {
        let comm = SingleProcess;
        assert_eq!(comm.gather_scalar(7).unwrap(), Some(vec![7]));
        let layout = GatherLayout::from_counts(vec![2]);
        let gathered = comm.gather_f64(&[1.0, 2.0], Some(&layout)).unwrap();
        assert_eq!(gathered, Some(vec![1.0, 2.0]));
    }

    #[test]
    fn test_layout_validated() {
        let comm = SingleProcess;
        let layout = GatherLayout::from_counts(vec![3]);
        assert!(comm.gather_f64(&[1.0], Some(&layout)).is_err());
    }
}
