//! Pending candidate queue.
//!
//! Holds remote candidates that arrive before the remote description has
//! been applied. Drained once, in receipt order, right after the description
//! is set.

use crate::signal::IceCandidate;

use std::collections::VecDeque;
use tracing::warn;

/// Upper bound on buffered candidates per session.
pub const MAX_PENDING_CANDIDATES: usize = 256;

/// FIFO of candidates awaiting the remote description.
#[derive(Debug)]
pub struct CandidateBuffer {
    pending: VecDeque<IceCandidate>,
    capacity: usize,
    dropped: u64,
}

impl Default for CandidateBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl CandidateBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(MAX_PENDING_CANDIDATES)
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            pending: VecDeque::new(),
            capacity,
            dropped: 0,
        }
    }

    /// Queue a candidate. Returns `false` if the buffer is full and the
    /// candidate was dropped.
    pub fn push(&mut self, candidate: IceCandidate) -> bool {
        if self.pending.len() >= self.capacity {
            self.dropped += 1;
            warn!(
                target: "call.negotiation",
                capacity = self.capacity,
                dropped = self.dropped,
                "Candidate buffer full, dropping candidate"
            );
            return false;
        }
        self.pending.push_back(candidate);
        true
    }

    /// Take every buffered candidate in receipt order, leaving the buffer empty.
    pub fn drain(&mut self) -> Vec<IceCandidate> {
        self.pending.drain(..).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Candidates dropped on overflow.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}
