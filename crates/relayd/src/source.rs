use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};
use relay_analysis::SkippedCommit;
use relay_core::{ChangeProposal, CommitRecord, GitCommitSource};

#[derive(Debug, Default)]
pub struct LoadedCommits {
    pub commits: Vec<CommitRecord>,
    /// Lines that could not be parsed as a commit record.
    pub skipped: Vec<SkippedCommit>,
}

/// Reads one JSON `CommitRecord` per line. Blank lines are ignored and
/// malformed lines are logged and skipped.
pub fn read_commit_lines(reader: impl BufRead) -> Result<LoadedCommits> {
    let mut loaded = LoadedCommits::default();

    for (index, line) in reader.lines().enumerate() {
        let line_number = index + 1;
        let line = line.with_context(|| format!("failed to read commit line {line_number}"))?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        match serde_json::from_str::<CommitRecord>(trimmed) {
            Ok(commit) => loaded.commits.push(commit),
            Err(err) => {
                tracing::warn!(line = line_number, error = %err, "skipping malformed commit record");
                loaded.skipped.push(SkippedCommit {
                    hash: String::new(),
                    reason: format!("line {line_number}: {err}"),
                });
            }
        }
    }

    Ok(loaded)
}

pub fn load_commit_file(path: &Path) -> Result<LoadedCommits> {
    let file = File::open(path)
        .with_context(|| format!("failed to open commit file {}", path.display()))?;
    read_commit_lines(BufReader::new(file))
}

/// Commits of the git repository containing `workspace`, oldest first.
pub fn load_git_commits(workspace: &Path, limit: usize) -> Result<Vec<CommitRecord>> {
    let source = GitCommitSource::open(workspace).with_context(|| {
        format!("no git repository found at {}", workspace.display())
    })?;
    let commits = source
        .commits(limit, None)
        .context("failed to read git history")?;
    tracing::info!(
        commits = commits.len(),
        head = source.head_commit_hash().as_deref().unwrap_or("none"),
        "read git history"
    );
    Ok(commits)
}

/// Parses a JSON array of change proposals.
pub fn load_proposals(path: &Path) -> Result<Vec<ChangeProposal>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read proposals file {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse proposals file {}", path.display()))
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn malformed_lines_are_skipped() {
        let input = concat!(
            r#"{"hash":"c1","author":"alice","timestamp":1,"changed_files":["a","b"]}"#,
            "\n",
            "not json\n",
            "\n",
            r#"{"hash":"c2","author":"bob","timestamp":2,"changed_files":[{"path":"a","lines_changed":4}]}"#,
            "\n",
        );

        let loaded = read_commit_lines(Cursor::new(input)).expect("read");

        assert_eq!(loaded.commits.len(), 2);
        assert_eq!(loaded.commits[1].hash, "c2");
        assert_eq!(loaded.skipped.len(), 1);
        assert!(loaded.skipped[0].reason.starts_with("line 2:"));
    }

    #[test]
    fn proposals_accept_file_set_alias() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("proposals.json");
        std::fs::write(
            &path,
            r#"[{"id":"42","title":"Dark mode","file_set":["src/Settings.tsx"]},{"id":"43"}]"#,
        )
        .expect("write");

        let proposals = load_proposals(&path).expect("load");

        assert_eq!(proposals.len(), 2);
        assert_eq!(proposals[0].files, vec!["src/Settings.tsx"]);
        assert!(proposals[1].files.is_empty());
    }
}
