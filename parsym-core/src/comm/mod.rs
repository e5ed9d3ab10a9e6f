//! Process topology and collective operations.
//!
//! The driver runs in lockstep on a fixed set of cooperating processes.
//! All inter-process communication goes through the [`Collective`] trait;
//! there is no shared mutable state between ranks outside these calls.
//! Two implementations ship with the crate: [`SingleProcess`] for the
//! degenerate size-1 topology and [`InMemoryComm`] which simulates an
//! arbitrary topology on threads, so the collective protocol is testable
//! without a real MPI binding.

mod local;
mod memory;

pub use local::SingleProcess;
pub use memory::{InMemoryCluster, InMemoryComm};

use thiserror::Error;

/// Errors from collective operations.
///
/// A failure on any participant fails the whole step for every
/// participant; there are no partial gathers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommError {
    /// A participant dropped out or reported failure mid-collective.
    #[error("Participant on rank {rank} failed during a collective step")]
    ParticipantFailure {
        /// Rank of the failed participant.
        rank: usize,
    },

    /// Contribution lengths disagree with the expected layout.
    #[error("Gather layout mismatch: {0}")]
    LayoutMismatch(String),
}

/// Role of a process in the topology.
///
/// Exactly one rank is the coordinator; it owns the assembled matrix and
/// (unless engine calls are replicated) is the only rank that talks to
/// the solver engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessRole {
    /// This rank assembles gathered data and drives the engine.
    Coordinator,
    /// This rank only contributes its local shard.
    Worker,
}

/// Immutable per-run descriptor of this process's place in the topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessTopology {
    /// This process's rank, `0..size`.
    pub rank: usize,
    /// Total number of cooperating processes.
    pub size: usize,
}

impl ProcessTopology {
    /// Role of this process. Rank 0 coordinates.
    pub fn role(&self) -> ProcessRole {
        if self.rank == 0 {
            ProcessRole::Coordinator
        } else {
            ProcessRole::Worker
        }
    }
}

/// Per-rank element counts and offsets for reassembling a gathered array.
///
/// Only the coordinator holds a layout. It is recomputed whenever local
/// shard sizes change (a structure change), never on value-only updates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatherLayout {
    /// Number of elements contributed by each rank.
    pub counts: Vec<usize>,
    /// Offset of each rank's block in the assembled array.
    pub displs: Vec<usize>,
}

impl GatherLayout {
    /// Build a layout from per-rank counts.
    pub fn from_counts(counts: Vec<usize>) -> Self {
        let mut displs = Vec::with_capacity(counts.len());
        let mut offset = 0;
        for &c in &counts {
            displs.push(offset);
            offset += c;
        }
        Self { counts, displs }
    }

    /// Total number of elements across all ranks.
    pub fn total(&self) -> usize {
        self.counts.iter().sum()
    }
}

/// Blocking collective operations over a fixed process topology.
///
/// Every method is a suspension point: all ranks must call it (in the
/// same order) before any rank proceeds. Gather results are `Some` on
/// the coordinator and `None` on workers; `layout` is likewise only
/// consulted on the coordinator, mirroring `MPI_Gatherv` semantics.
pub trait Collective {
    /// This process's rank.
    fn rank(&self) -> usize;

    /// Total process count.
    fn size(&self) -> usize;

    /// Gather one `usize` per rank, in rank order.
    fn gather_scalar(&self, local: usize) -> Result<Option<Vec<usize>>, CommError>;

    /// Gather variable-length `usize` arrays according to `layout`.
    fn gather_usize(
        &self,
        local: &[usize],
        layout: Option<&GatherLayout>,
    ) -> Result<Option<Vec<usize>>, CommError>;

    /// Gather variable-length `f64` arrays according to `layout`.
    fn gather_f64(
        &self,
        local: &[f64],
        layout: Option<&GatherLayout>,
    ) -> Result<Option<Vec<f64>>, CommError>;

    /// Broadcast a `f64` buffer from the coordinator to all ranks.
    fn broadcast_f64(&self, buf: &mut [f64]) -> Result<(), CommError>;

    /// Broadcast one `u64` from the coordinator to all ranks.
    fn broadcast_scalar(&self, value: u64) -> Result<u64, CommError>;

    /// Topology descriptor for this process.
    fn topology(&self) -> ProcessTopology {
        ProcessTopology {
            rank: self.rank(),
            size: self.size(),
        }
    }
}

/// Validate gathered block lengths against an expected layout.
pub(crate) fn check_layout(
    counts_seen: &[usize],
    layout: &GatherLayout,
) -> Result<(), CommError> {
    if counts_seen.len() != layout.counts.len() {
        return Err(CommError::LayoutMismatch(format!(
            "{} contributions for {} ranks",
            counts_seen.len(),
            layout.counts.len()
        )));
    }
    for (rank, (&seen, &expected)) in counts_seen.iter().zip(layout.counts.iter()).enumerate() {
        if seen != expected {
            return Err(CommError::LayoutMismatch(format!(
                "rank {} contributed {} elements, layout expects {}",
                rank, seen, expected
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_from_counts() {
        let layout = GatherLayout::from_counts(vec![3, 0, 2]);
        assert_eq!(layout.displs, vec![0, 3, 3]);
        assert_eq!(layout.total(), 5);
    }

    #[test]
    fn test_role_assignment() {
        let coord = ProcessTopology { rank: 0, size: 4 };
        let worker = ProcessTopology { rank: 3, size: 4 };
        assert_eq!(coord.role(), ProcessRole::Coordinator);
        assert_eq!(worker.role(), ProcessRole::Worker);
    }

    #[test]
    fn test_check_layout_rejects_mismatch() {
        let layout = GatherLayout::from_counts(vec![2, 2]);
        assert!(check_layout(&[2, 2], &layout).is_ok());
        assert!(check_layout(&[2, 3], &layout).is_err());
        assert!(check_layout(&[2], &layout).is_err());
    }
}
