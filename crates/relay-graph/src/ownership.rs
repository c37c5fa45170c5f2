use std::collections::{HashMap, VecDeque};

use relay_config::OwnershipConfig;
use relay_core::CommitRecord;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerStats {
    pub author: String,
    pub commit_count: u64,
    pub lines_changed: u64,
    pub last_touched: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileActivity {
    pub path: String,
    pub commit_count: u64,
    pub total_lines_changed: u64,
    /// Mean lines changed over the commits that reported diff stats.
    pub avg_change_size: Option<f64>,
}

#[derive(Debug, Clone, Default)]
struct FileOwnership {
    authors: HashMap<String, OwnerStats>,
    timestamps: VecDeque<i64>,
    commit_count: u64,
    total_lines: u64,
    commits_with_lines: u64,
}

/// Per-file author statistics and a bounded commit-timestamp history used to
/// evaluate churn at query time.
#[derive(Debug, Clone)]
pub struct OwnershipTracker {
    files: HashMap<String, FileOwnership>,
    timestamp_history: usize,
    max_tracked_authors: usize,
}

impl Default for OwnershipTracker {
    fn default() -> Self {
        Self::new(&OwnershipConfig::default())
    }
}

impl OwnershipTracker {
    pub fn new(config: &OwnershipConfig) -> Self {
        Self {
            files: HashMap::new(),
            timestamp_history: config.timestamp_history,
            max_tracked_authors: config.max_tracked_authors.max(1),
        }
    }

    pub fn ingest(&mut self, commit: &CommitRecord) {
        let author = commit.author_or_unknown();

        for (path, lines) in commit.lines_by_path() {
            let file = self.files.entry(path).or_default();
            file.commit_count += 1;
            if let Some(lines) = lines {
                file.total_lines = file.total_lines.saturating_add(lines);
                file.commits_with_lines += 1;
            }

            if !file.authors.contains_key(author)
                && file.authors.len() >= self.max_tracked_authors
            {
                evict_weakest_author(&mut file.authors);
            }
            let stats = file
                .authors
                .entry(author.to_owned())
                .or_insert_with(|| OwnerStats {
                    author: author.to_owned(),
                    commit_count: 0,
                    lines_changed: 0,
                    last_touched: commit.timestamp,
                });
            stats.commit_count += 1;
            stats.lines_changed = stats.lines_changed.saturating_add(lines.unwrap_or(0));
            stats.last_touched = stats.last_touched.max(commit.timestamp);

            if self.timestamp_history > 0 {
                if file.timestamps.len() >= self.timestamp_history {
                    file.timestamps.pop_front();
                }
                file.timestamps.push_back(commit.timestamp);
            }
        }
    }

    /// Top authors of `path` by commit count, then lines changed, then name.
    pub fn owners(&self, path: &str, top_n: usize) -> Vec<OwnerStats> {
        let Some(file) = self.files.get(path) else {
            return Vec::new();
        };

        let mut owners = file.authors.values().cloned().collect::<Vec<_>>();
        owners.sort_by(|left, right| {
            right
                .commit_count
                .cmp(&left.commit_count)
                .then_with(|| right.lines_changed.cmp(&left.lines_changed))
                .then_with(|| left.author.cmp(&right.author))
        });
        owners.truncate(top_n);
        owners
    }

    /// Retained commits to `path` at or after `now - window_seconds`.
    /// Saturates at the configured timestamp history.
    pub fn recent_churn(&self, path: &str, now: i64, window_seconds: i64) -> u64 {
        let Some(file) = self.files.get(path) else {
            return 0;
        };
        let cutoff = now.saturating_sub(window_seconds);
        file.timestamps
            .iter()
            .filter(|timestamp| **timestamp >= cutoff)
            .count() as u64
    }

    pub fn activity(&self, path: &str) -> Option<FileActivity> {
        let file = self.files.get(path)?;
        let avg_change_size = (file.commits_with_lines > 0)
            .then(|| file.total_lines as f64 / file.commits_with_lines as f64);
        Some(FileActivity {
            path: path.to_owned(),
            commit_count: file.commit_count,
            total_lines_changed: file.total_lines,
            avg_change_size,
        })
    }
}

fn evict_weakest_author(authors: &mut HashMap<String, OwnerStats>) {
    let weakest = authors
        .values()
        .min_by(|left, right| {
            left.commit_count
                .cmp(&right.commit_count)
                .then_with(|| left.last_touched.cmp(&right.last_touched))
                .then_with(|| right.author.cmp(&left.author))
        })
        .map(|stats| stats.author.clone());

    if let Some(author) = weakest {
        tracing::debug!(author = %author, "evicting least active author from ownership map");
        authors.remove(&author);
    }
}
