//! Reciprocal Rank Fusion over independently ranked signal lists.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::Signal;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedCandidate {
    pub id: String,
    pub lexical_rank: Option<usize>,
    pub dense_rank: Option<usize>,
    pub sparse_rank: Option<usize>,
    pub fused_score: f64,
}

impl FusedCandidate {
    fn new(id: String) -> Self {
        Self {
            id,
            lexical_rank: None,
            dense_rank: None,
            sparse_rank: None,
            fused_score: 0.0,
        }
    }

    /// Number of signal lists this candidate appeared in.
    pub fn presence(&self) -> usize {
        [self.lexical_rank, self.dense_rank, self.sparse_rank]
            .iter()
            .filter(|rank| rank.is_some())
            .count()
    }

    fn rank_slot(&mut self, signal: Signal) -> &mut Option<usize> {
        match signal {
            Signal::Lexical => &mut self.lexical_rank,
            Signal::Dense => &mut self.dense_rank,
            Signal::Sparse => &mut self.sparse_rank,
        }
    }
}

/// Contribution of a 1-indexed rank.
pub fn rrf_contribution(rank: usize, k: f64) -> f64 {
    1.0 / (k + rank as f64)
}

/// Sums `1 / (k + rank)` per candidate across `lists`. Ties on the fused
/// score go to candidates present in more lists, then to the smaller id.
/// A repeated id within one list only counts at its first position.
pub fn fuse(lists: &[(Signal, Vec<String>)], k: f64) -> Vec<FusedCandidate> {
    let mut by_id = HashMap::<String, FusedCandidate>::new();

    for (signal, ids) in lists {
        let mut seen = HashSet::<&str>::new();
        let mut rank = 0usize;
        for id in ids {
            if !seen.insert(id.as_str()) {
                continue;
            }
            rank += 1;
            let candidate = by_id
                .entry(id.clone())
                .or_insert_with(|| FusedCandidate::new(id.clone()));
            let slot = candidate.rank_slot(*signal);
            if slot.is_none() {
                *slot = Some(rank);
                candidate.fused_score += rrf_contribution(rank, k);
            }
        }
    }

    let mut fused = by_id.into_values().collect::<Vec<_>>();
    fused.sort_by(|left, right| {
        right
            .fused_score
            .total_cmp(&left.fused_score)
            .then_with(|| right.presence().cmp(&left.presence()))
            .then_with(|| left.id.cmp(&right.id))
    });
    fused
}
