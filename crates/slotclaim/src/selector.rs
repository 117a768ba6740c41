//! Choosing the candidates for one attempt.

use rand::seq::SliceRandom;
use rand::Rng;

use crate::pool::CandidatePool;
use crate::types::{Candidate, CandidateId, ClaimError, ClaimResult};

/// Default number of candidates clicked together in one attempt.
pub const DEFAULT_GROUP_SIZE: usize = 2;

/// Distinct candidates submitted together in one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptGroup {
    candidates: Vec<Candidate>,
}

impl AttemptGroup {
    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    pub fn ids(&self) -> Vec<CandidateId> {
        self.candidates.iter().map(|c| c.id).collect()
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

/// Draws attempt groups uniformly at random without replacement.
#[derive(Debug, Clone, Copy)]
pub struct SlotSelector {
    group_size: usize,
}

impl Default for SlotSelector {
    fn default() -> Self {
        Self::new(DEFAULT_GROUP_SIZE)
    }
}

impl SlotSelector {
    pub fn new(group_size: usize) -> Self {
        Self {
            group_size: group_size.max(1),
        }
    }

    pub fn group_size(&self) -> usize {
        self.group_size
    }

    /// Pick `min(group_size, pool.len())` distinct candidates.
    pub fn select<R: Rng + ?Sized>(
        &self,
        pool: &CandidatePool,
        rng: &mut R,
    ) -> ClaimResult<AttemptGroup> {
        let remaining: Vec<&Candidate> = pool.remaining().collect();
        if remaining.is_empty() {
            return Err(ClaimError::CandidatePoolExhausted);
        }

        let candidates = remaining
            .choose_multiple(rng, self.group_size)
            .map(|c| (*c).clone())
            .collect();
        Ok(AttemptGroup { candidates })
    }
}
