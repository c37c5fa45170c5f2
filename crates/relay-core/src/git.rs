use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use thiserror::Error;

use crate::{ChangedFile, CommitRecord, normalize_path};

#[derive(Debug, Error)]
pub enum GitSourceError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("git error: {0}")]
    Git(String),
}

/// Commit source backed by a local git repository.
///
/// Commits are read newest-first from HEAD and handed out oldest-first so
/// they can be ingested in commit order. Merge commits are skipped; their
/// changes are already represented by the commits they merge.
pub struct GitCommitSource {
    repo: gix::Repository,
    workspace: PathBuf,
}

impl GitCommitSource {
    pub fn open(workspace: &Path) -> Option<Self> {
        gix::discover(workspace).ok().map(|repo| Self {
            repo,
            workspace: workspace.to_path_buf(),
        })
    }

    pub fn head_commit_hash(&self) -> Option<String> {
        let head_id = self.repo.head_id().ok()?.detach();
        Some(head_id.to_string().to_ascii_lowercase())
    }

    /// Reads up to `limit` non-merge commits reachable from HEAD, stopping
    /// early at `stop_at` (exclusive) so callers can resume incrementally.
    ///
    /// A commit whose object or diff cannot be read is logged and skipped;
    /// the rest of the history is still returned.
    pub fn commits(
        &self,
        limit: usize,
        stop_at: Option<&str>,
    ) -> Result<Vec<CommitRecord>, GitSourceError> {
        self.collect_commits(limit, stop_at, |hash| self.changed_files_for_commit(hash))
    }

    fn collect_commits(
        &self,
        limit: usize,
        stop_at: Option<&str>,
        diff: impl Fn(&str) -> Result<Vec<ChangedFile>, GitSourceError>,
    ) -> Result<Vec<CommitRecord>, GitSourceError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let head_id = self
            .repo
            .head_id()
            .map_err(|err| GitSourceError::Git(format!("failed to resolve HEAD: {err}")))?
            .detach();

        let walk = self
            .repo
            .rev_walk([head_id])
            .sorting(gix::revision::walk::Sorting::ByCommitTime(
                gix::traverse::commit::simple::CommitTimeOrder::NewestFirst,
            ))
            .all()
            .map_err(|err| GitSourceError::Git(format!("failed to start revision walk: {err}")))?;

        let mut records = Vec::with_capacity(limit.min(1024));
        for entry in walk {
            if records.len() >= limit {
                break;
            }

            let info = entry
                .map_err(|err| GitSourceError::Git(format!("revision walk entry failed: {err}")))?;
            let hash = info.id.to_string().to_ascii_lowercase();
            if stop_at.is_some_and(|stop| stop.eq_ignore_ascii_case(&hash)) {
                break;
            }

            let commit = match self.repo.find_commit(info.id) {
                Ok(commit) => commit,
                Err(err) => {
                    tracing::warn!(commit = %hash, error = %err, "skipping unreadable commit");
                    continue;
                }
            };
            if commit.parent_ids().count() > 1 {
                tracing::debug!(commit = %hash, "skipping merge commit");
                continue;
            }

            let author = commit
                .author()
                .ok()
                .map(|signature| decode_text(signature.name.as_ref()))
                .unwrap_or_default();
            let message = decode_text(commit.message_raw_sloppy().as_ref());
            let timestamp = commit.time().map(|time| time.seconds).unwrap_or(0);
            let changed_files = match diff(&hash) {
                Ok(files) => files,
                Err(err) => {
                    tracing::warn!(
                        commit = %hash,
                        error = %err,
                        "skipping commit whose changed files could not be read"
                    );
                    continue;
                }
            };

            records.push(CommitRecord {
                hash,
                author,
                timestamp,
                changed_files,
                message,
                embedding: None,
            });
        }

        records.reverse();
        Ok(records)
    }

    fn changed_files_for_commit(&self, hash: &str) -> Result<Vec<ChangedFile>, GitSourceError> {
        let output = Command::new("git")
            .arg("-C")
            .arg(&self.workspace)
            .args([
                "diff-tree",
                "--numstat",
                "--no-commit-id",
                "-r",
                "--root",
                hash,
            ])
            .output()?;
        if !output.status.success() {
            return Err(GitSourceError::Git(format!(
                "git diff-tree failed for commit {hash}: status {}",
                output.status
            )));
        }

        Ok(parse_numstat(&String::from_utf8_lossy(&output.stdout)))
    }
}

fn parse_numstat(stdout: &str) -> Vec<ChangedFile> {
    let mut files = BTreeMap::<String, Option<u64>>::new();
    for line in stdout.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let mut parts = line.splitn(3, '\t');
        let added = parts.next().unwrap_or_default().trim();
        let removed = parts.next().unwrap_or_default().trim();
        let raw_path = parts.next().unwrap_or_default().trim();
        if raw_path.is_empty() {
            continue;
        }

        let path = normalize_path(&normalize_rename_path(raw_path));
        if path.is_empty() {
            continue;
        }

        // binary files report "-" for both counts
        let lines = match (added.parse::<u64>(), removed.parse::<u64>()) {
            (Ok(added), Ok(removed)) => Some(added.saturating_add(removed)),
            _ => None,
        };
        files.insert(path, lines);
    }

    files
        .into_iter()
        .map(|(path, lines_changed)| ChangedFile {
            path,
            lines_changed,
        })
        .collect()
}

fn normalize_rename_path(path: &str) -> String {
    let value = path.trim();
    if let Some((left, right)) = value.rsplit_once("=>") {
        if let Some((prefix, _)) = left.rsplit_once('{') {
            let (renamed, suffix) = right.split_once('}').unwrap_or((right, ""));
            return format!("{prefix}{}{suffix}", renamed.trim());
        }
        return right.trim().to_owned();
    }

    value.to_owned()
}

fn decode_text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim().to_owned()
}
