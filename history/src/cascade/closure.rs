//! Transitive closure by frontier expansion
//!
//! Each round the caller looks up everything derived from the current
//! frontier and feeds it back through [`Closure::advance`]. Only ids not seen
//! before form the next frontier, so cycles in the source data terminate.

use std::collections::BTreeSet;

#[derive(Debug, Clone, Default)]
pub struct Closure {
    members: BTreeSet<u64>,
    frontier: Vec<u64>,
    rounds: usize,
}

impl Closure {
    pub fn new(seeds: impl IntoIterator<Item = u64>) -> Self {
        let mut closure = Self::default();
        closure.advance(seeds);
        closure.rounds = 0;
        closure
    }

    /// Ids added in the last round, still to be expanded.
    pub fn frontier(&self) -> &[u64] {
        &self.frontier
    }

    pub fn is_settled(&self) -> bool {
        self.frontier.is_empty()
    }

    /// Merge the ids found for the current frontier.
    ///
    /// Returns how many of them were new.
    pub fn advance(&mut self, found: impl IntoIterator<Item = u64>) -> usize {
        self.frontier = found
            .into_iter()
            .filter(|id| self.members.insert(*id))
            .collect();
        self.rounds += 1;
        self.frontier.len()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Expansion rounds run so far.
    pub fn rounds(&self) -> usize {
        self.rounds
    }

    pub fn into_members(self) -> BTreeSet<u64> {
        self.members
    }
}
