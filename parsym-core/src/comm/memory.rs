//! In-memory communicator for simulated topologies.
//!
//! Runs the collective protocol across threads of one process, one thread
//! per simulated rank. Every collective is a full barrier: each rank
//! deposits its contribution, waits for all others, reads the assembled
//! round, and the last rank out resets the slot for the next round.
//!
//! This exists so the gather/broadcast protocol can be exercised against
//! topologies of arbitrary size without binding a real MPI library; the
//! trait surface is shaped so an MPI-backed implementation can slot in
//! later.

use std::sync::{Arc, Condvar, Mutex};

use super::{check_layout, Collective, CommError, GatherLayout};

#[derive(Debug, Clone)]
enum Payload {
    U(Vec<usize>),
    F(Vec<f64>),
    S(u64),
}

#[derive(Debug)]
struct RoundState {
    /// Per-rank contributions for the round being collected.
    slots: Vec<Option<Payload>>,
    deposited: usize,
    /// Completed round, visible until every rank has consumed it.
    snapshot: Option<Arc<Vec<Payload>>>,
    consumed: usize,
    /// Rank of the first participant that failed, if any.
    failed: Option<usize>,
}

#[derive(Debug)]
struct Shared {
    size: usize,
    state: Mutex<RoundState>,
    cond: Condvar,
}

/// A simulated cluster; hands out one [`InMemoryComm`] per rank.
#[derive(Debug)]
pub struct InMemoryCluster {
    shared: Arc<Shared>,
}

impl InMemoryCluster {
    /// Create a cluster of `size` simulated ranks.
    pub fn new(size: usize) -> Self {
        assert!(size > 0, "cluster needs at least one rank");
        Self {
            shared: Arc::new(Shared {
                size,
                state: Mutex::new(RoundState {
                    slots: vec![None; size],
                    deposited: 0,
                    snapshot: None,
                    consumed: 0,
                    failed: None,
                }),
                cond: Condvar::new(),
            }),
        }
    }

    /// Consume the cluster, producing the per-rank communicators.
    pub fn comms(self) -> Vec<InMemoryComm> {
        (0..self.shared.size)
            .map(|rank| InMemoryComm {
                rank,
                shared: Arc::clone(&self.shared),
            })
            .collect()
    }
}

/// One rank's endpoint in an [`InMemoryCluster`].
///
/// Dropping a communicator while others are still exchanging marks the
/// rank as failed; every pending and subsequent collective on the
/// remaining ranks then fails as a whole, matching the no-partial-gather
/// rule.
#[derive(Debug)]
pub struct InMemoryComm {
    rank: usize,
    shared: Arc<Shared>,
}

impl InMemoryComm {
    /// Mark this rank as failed, failing the current and all future
    /// collective steps on every rank. Used to test whole-step failure.
    pub fn fail(&self) {
        let mut st = match self.shared.state.lock() {
            Ok(g) => g,
            Err(p) => p.into_inner(),
        };
        if st.failed.is_none() {
            st.failed = Some(self.rank);
        }
        self.shared.cond.notify_all();
    }

    /// One full barrier exchange: deposit, wait for everyone, read all
    /// contributions in rank order.
    fn exchange(&self, payload: Payload) -> Result<Arc<Vec<Payload>>, CommError> {
        let fail = |rank| CommError::ParticipantFailure { rank };

        let mut st = self
            .shared
            .state
            .lock()
            .map_err(|_| fail(self.rank))?;

        // Wait for the previous round to be fully consumed.
        while st.snapshot.is_some() && st.failed.is_none() {
            st = self.shared.cond.wait(st).map_err(|_| fail(self.rank))?;
        }
        if let Some(rank) = st.failed {
            return Err(fail(rank));
        }

        st.slots[self.rank] = Some(payload);
        st.deposited += 1;

        if st.deposited == self.shared.size {
            let round: Vec<Payload> = st.slots.iter_mut().map(|s| s.take().unwrap()).collect();
            st.snapshot = Some(Arc::new(round));
            st.consumed = 0;
            self.shared.cond.notify_all();
        } else {
            while st.snapshot.is_none() && st.failed.is_none() {
                st = self.shared.cond.wait(st).map_err(|_| fail(self.rank))?;
            }
            // A materialized snapshot means the round completed; a rank
            // dropping out afterwards must not poison it retroactively.
            if st.snapshot.is_none() {
                if let Some(rank) = st.failed {
                    return Err(fail(rank));
                }
            }
        }

        let result = Arc::clone(st.snapshot.as_ref().unwrap());
        st.consumed += 1;
        if st.consumed == self.shared.size {
            st.snapshot = None;
            st.deposited = 0;
            for s in st.slots.iter_mut() {
                *s = None;
            }
            self.shared.cond.notify_all();
        }
        Ok(result)
    }

    fn is_coordinator(&self) -> bool {
        self.rank == 0
    }
}

impl Drop for InMemoryComm {
    fn drop(&mut self) {
        let mut st = match self.shared.state.lock() {
            Ok(g) => g,
            Err(p) => p.into_inner(),
        };
        // A rank disappearing mid-exchange fails the step for everyone.
        if (st.deposited > 0 || st.snapshot.is_some()) && st.failed.is_none() {
            st.failed = Some(self.rank);
            self.shared.cond.notify_all();
        }
    }
}

impl Collective for InMemoryComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.shared.size
    }

    fn gather_scalar(&self, local: usize) -> Result<Option<Vec<usize>>, CommError> {
        let round = self.exchange(Payload::S(local as u64))?;
        if !self.is_coordinator() {
            return Ok(None);
        }
        let values = round
            .iter()
            .map(|p| match p {
                Payload::S(v) => Ok(*v as usize),
                _ => Err(CommError::LayoutMismatch(
                    "mixed payloads in scalar gather".to_string(),
                )),
            })
            .collect::<Result<Vec<usize>, CommError>>()?;
        Ok(Some(values))
    }

    fn gather_usize(
        &self,
        local: &[usize],
        layout: Option<&GatherLayout>,
    ) -> Result<Option<Vec<usize>>, CommError> {
        let round = self.exchange(Payload::U(local.to_vec()))?;
        if !self.is_coordinator() {
            return Ok(None);
        }
        let mut counts_seen = Vec::with_capacity(round.len());
        let mut assembled = Vec::new();
        for p in round.iter() {
            match p {
                Payload::U(block) => {
                    counts_seen.push(block.len());
                    assembled.extend_from_slice(block);
                }
                _ => {
                    return Err(CommError::LayoutMismatch(
                        "mixed payloads in usize gather".to_string(),
                    ))
                }
            }
        }
        if let Some(layout) = layout {
            check_layout(&counts_seen, layout)?;
        }
        Ok(Some(assembled))
    }

    fn gather_f64(
        &self,
        local: &[f64],
        layout: Option<&GatherLayout>,
    ) -> Result<Option<Vec<f64>>, CommError> {
        let round = self.exchange(Payload::F(local.to_vec()))?;
        if !self.is_coordinator() {
            return Ok(None);
        }
        let mut counts_seen = Vec::with_capacity(round.len());
        let mut assembled = Vec::new();
        for p in round.iter() {
            match p {
                Payload::F(block) => {
                    counts_seen.push(block.len());
                    assembled.extend_from_slice(block);
                }
                _ => {
                    return Err(CommError::LayoutMismatch(
                        "mixed payloads in f64 gather".to_string(),
                    ))
                }
            }
        }
        if let Some(layout) = layout {
            check_layout(&counts_seen, layout)?;
        }
        Ok(Some(assembled))
    }

    fn broadcast_f64(&self, buf: &mut [f64]) -> Result<(), CommError> {
        let payload = if self.is_coordinator() {
            Payload::F(buf.to_vec())
        } else {
            Payload::F(Vec::new())
        };
        let round = self.exchange(payload)?;
        if self.is_coordinator() {
            return Ok(());
        }
        match &round[0] {
            Payload::F(data) if data.len() == buf.len() => {
                buf.copy_from_slice(data);
                Ok(())
            }
            Payload::F(data) => Err(CommError::LayoutMismatch(format!(
                "broadcast of {} elements into a buffer of {}",
                data.len(),
                buf.len()
            ))),
            _ => Err(CommError::LayoutMismatch(
                "mixed payloads in broadcast".to_string(),
            )),
        }
    }

    fn broadcast_scalar(&self, value: u64) -> Result<u64, CommError> {
        let round = self.exchange(Payload::S(value))?;
        match &round[0] {
            Payload::S(v) => Ok(*v),
            _ => Err(CommError::LayoutMismatch(
                "mixed payloads in scalar broadcast".to_string(),
            )),
        }
    }
}
