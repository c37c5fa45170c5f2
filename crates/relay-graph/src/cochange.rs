use std::collections::BTreeMap;

use relay_config::GraphConfig;
use relay_core::CommitRecord;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileNode {
    pub path: String,
    pub total_commit_count: u64,
    /// Co-occurrence counts keyed by the other path. Mirrored on both nodes.
    pub co_changes: BTreeMap<String, u64>,
    pub first_seen: i64,
    pub last_modified: i64,
}

impl FileNode {
    fn new(path: String, timestamp: i64) -> Self {
        Self {
            path,
            total_commit_count: 0,
            co_changes: BTreeMap::new(),
            first_seen: timestamp,
            last_modified: timestamp,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CoChangeScore {
    pub co_occurrence_count: u64,
    pub jaccard: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    pub path: String,
    pub co_occurrence_count: u64,
    pub jaccard: f64,
    pub total_commit_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestOutcome {
    pub commit: String,
    pub files: usize,
    pub pairs_updated: usize,
    pub pairs_skipped: bool,
}

/// Jaccard similarity of two files' commit histories given their totals and
/// the number of commits they share.
pub fn jaccard(co_occurrence: u64, count_a: u64, count_b: u64) -> f64 {
    let union = count_a
        .saturating_add(count_b)
        .saturating_sub(co_occurrence);
    if union == 0 {
        return 0.0;
    }
    (co_occurrence as f64 / union as f64).clamp(0.0, 1.0)
}

/// Append-only per-file co-change counters. Scores are never stored; they
/// are derived from the counters on every read.
#[derive(Debug, Clone)]
pub struct CoChangeGraph {
    nodes: BTreeMap<String, FileNode>,
    total_commits: u64,
    edge_count: usize,
    pair_cap: usize,
}

impl Default for CoChangeGraph {
    fn default() -> Self {
        Self::new(&GraphConfig::default())
    }
}

impl CoChangeGraph {
    pub fn new(config: &GraphConfig) -> Self {
        Self {
            nodes: BTreeMap::new(),
            total_commits: 0,
            edge_count: 0,
            pair_cap: config.pair_cap,
        }
    }

    pub fn ingest(&mut self, commit: &CommitRecord) -> IngestOutcome {
        let paths = commit.unique_paths();
        self.total_commits += 1;

        for path in &paths {
            let node = self
                .nodes
                .entry(path.clone())
                .or_insert_with(|| FileNode::new(path.clone(), commit.timestamp));
            node.total_commit_count += 1;
            node.first_seen = node.first_seen.min(commit.timestamp);
            node.last_modified = node.last_modified.max(commit.timestamp);
        }

        let mut outcome = IngestOutcome {
            commit: commit.hash.clone(),
            files: paths.len(),
            pairs_updated: 0,
            pairs_skipped: false,
        };

        if paths.len() > self.pair_cap {
            tracing::warn!(
                commit = %commit.hash,
                files = paths.len(),
                pair_cap = self.pair_cap,
                "commit exceeds pair cap; skipping co-change pair updates"
            );
            outcome.pairs_skipped = true;
            return outcome;
        }

        for (index, left) in paths.iter().enumerate() {
            for right in &paths[index + 1..] {
                if self.bump_pair(left, right) {
                    self.edge_count += 1;
                }
                outcome.pairs_updated += 1;
            }
        }

        outcome
    }

    /// Returns true when the pair had never co-changed before.
    fn bump_pair(&mut self, left: &str, right: &str) -> bool {
        let mut created = false;
        if let Some(node) = self.nodes.get_mut(left) {
            let count = node.co_changes.entry(right.to_owned()).or_insert(0);
            created = *count == 0;
            *count += 1;
        }
        if let Some(node) = self.nodes.get_mut(right) {
            *node.co_changes.entry(left.to_owned()).or_insert(0) += 1;
        }
        created
    }

    pub fn node(&self, path: &str) -> Option<&FileNode> {
        self.nodes.get(path)
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    pub fn file_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn total_commits(&self) -> u64 {
        self.total_commits
    }

    /// Number of unordered file pairs that co-changed at least once.
    pub fn edge_count(&self) -> usize {
        self.edge_count
    }

    pub fn co_occurrence(&self, a: &str, b: &str) -> u64 {
        self.nodes
            .get(a)
            .and_then(|node| node.co_changes.get(b))
            .copied()
            .unwrap_or(0)
    }

    pub fn score(&self, a: &str, b: &str) -> Option<CoChangeScore> {
        if a == b {
            return None;
        }
        let left = self.nodes.get(a)?;
        let right = self.nodes.get(b)?;
        let co_occurrence_count = left.co_changes.get(b).copied().unwrap_or(0);
        Some(CoChangeScore {
            co_occurrence_count,
            jaccard: jaccard(
                co_occurrence_count,
                left.total_commit_count,
                right.total_commit_count,
            ),
        })
    }

    /// Co-occurrences expected if the two files changed independently.
    pub fn expected_co_occurrence(&self, a: &str, b: &str) -> Option<f64> {
        if self.total_commits == 0 {
            return None;
        }
        let left = self.nodes.get(a)?;
        let right = self.nodes.get(b)?;
        Some(
            left.total_commit_count as f64 * right.total_commit_count as f64
                / self.total_commits as f64,
        )
    }

    /// Observed over expected co-occurrence. Files that are hot everywhere
    /// score near 1.0; genuinely coupled files score well above it.
    pub fn significance(&self, a: &str, b: &str) -> Option<f64> {
        let expected = self.expected_co_occurrence(a, b)?;
        if expected <= 0.0 {
            return None;
        }
        Some(self.co_occurrence(a, b) as f64 / expected)
    }

    /// Files that co-changed with `path`, strongest first. Unknown paths
    /// yield an empty list.
    pub fn neighbors(&self, path: &str, min_score: f64, limit: Option<usize>) -> Vec<Neighbor> {
        let Some(node) = self.nodes.get(path) else {
            return Vec::new();
        };

        let mut neighbors = node
            .co_changes
            .iter()
            .filter_map(|(other, co)| {
                let other_node = self.nodes.get(other)?;
                let score = jaccard(*co, node.total_commit_count, other_node.total_commit_count);
                (score >= min_score).then(|| Neighbor {
                    path: other.clone(),
                    co_occurrence_count: *co,
                    jaccard: score,
                    total_commit_count: other_node.total_commit_count,
                })
            })
            .collect::<Vec<_>>();

        neighbors.sort_by(|left, right| {
            right
                .jaccard
                .total_cmp(&left.jaccard)
                .then_with(|| right.co_occurrence_count.cmp(&left.co_occurrence_count))
                .then_with(|| left.path.cmp(&right.path))
        });
        if let Some(limit) = limit {
            neighbors.truncate(limit);
        }
        neighbors
    }
}
