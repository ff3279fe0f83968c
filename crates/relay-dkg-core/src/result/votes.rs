//! Vote tally over submitted DKG results

use super::DkgResultHash;
use std::collections::{HashMap, HashSet};

/// Number of submissions and votes each result hash received for one request.
///
/// Hashes with zero votes are never stored. The tally is plain data: callers
/// serialize mutation themselves (the chain owns the authoritative copy).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DkgResultsVotes(HashMap<DkgResultHash, usize>);

impl DkgResultsVotes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, hash: &DkgResultHash) -> bool {
        self.0.contains_key(hash)
    }

    /// Add one vote for `hash`, creating the entry at 1 on first sight.
    pub fn vote(&mut self, hash: DkgResultHash) -> usize {
        let votes = self.0.entry(hash).or_insert(0);
        *votes += 1;
        *votes
    }

    /// Votes for `hash`, zero when absent
    pub fn votes(&self, hash: &DkgResultHash) -> usize {
        self.0.get(hash).copied().unwrap_or(0)
    }

    /// All hashes sharing the maximum vote count. Ties are kept.
    pub fn leads(&self) -> HashSet<DkgResultHash> {
        let max = self.max_votes();
        self.0
            .iter()
            .filter(|(_, votes)| **votes == max)
            .map(|(hash, _)| *hash)
            .collect()
    }

    /// True iff `hash` is the single leader.
    pub fn is_only_lead(&self, hash: &DkgResultHash) -> bool {
        let leads = self.leads();
        leads.len() == 1 && leads.contains(hash)
    }

    /// The single leader, if there is exactly one
    pub fn only_lead(&self) -> Option<DkgResultHash> {
        let leads = self.leads();
        if leads.len() == 1 {
            leads.into_iter().next()
        } else {
            None
        }
    }

    /// Whether the leader has more votes than the dishonest members could cast.
    pub fn lead_has_enough_votes(&self, dishonest_threshold: usize) -> bool {
        self.max_votes() > dishonest_threshold
    }

    /// Highest vote count, zero for an empty tally
    pub fn max_votes(&self) -> usize {
        self.0.values().copied().max().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&DkgResultHash, &usize)> {
        self.0.iter()
    }
}

impl FromIterator<(DkgResultHash, usize)> for DkgResultsVotes {
    fn from_iter<I: IntoIterator<Item = (DkgResultHash, usize)>>(iter: I) -> Self {
        Self(iter.into_iter().filter(|(_, votes)| *votes > 0).collect())
    }
}
