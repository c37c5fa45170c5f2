use std::collections::{BTreeMap, BTreeSet};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

mod git;

pub use git::{GitCommitSource, GitSourceError};

pub type RepoId = String;

pub const DEFAULT_REPO: &str = "default";
pub const UNKNOWN_AUTHOR: &str = "unknown";

const TEST_PATH_INDICATORS: &[&str] = &[
    "/test/",
    "/tests/",
    "/__tests__/",
    ".test.",
    ".spec.",
    "_test.",
    "_spec.",
    "/test_",
    "/spec_",
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommitError {
    #[error("commit hash must not be empty")]
    EmptyHash,
    #[error("commit {hash} lists an empty file path")]
    EmptyPath { hash: String },
    #[error("commit {hash} has an invalid embedding: {reason}")]
    InvalidEmbedding { hash: String, reason: String },
}

/// One entry of a commit's changed-file list.
///
/// Accepts either a bare path string or an object carrying diff stats, so
/// commit sources that do not compute line counts can still be ingested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawChangedFile")]
pub struct ChangedFile {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lines_changed: Option<u64>,
}

impl ChangedFile {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            lines_changed: None,
        }
    }

    pub fn with_lines(path: impl Into<String>, lines_changed: u64) -> Self {
        Self {
            path: path.into(),
            lines_changed: Some(lines_changed),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawChangedFile {
    Path(String),
    Detailed {
        path: String,
        #[serde(default)]
        additions: Option<u64>,
        #[serde(default)]
        deletions: Option<u64>,
        #[serde(default)]
        lines_changed: Option<u64>,
    },
}

impl From<RawChangedFile> for ChangedFile {
    fn from(raw: RawChangedFile) -> Self {
        match raw {
            RawChangedFile::Path(path) => Self::new(path),
            RawChangedFile::Detailed {
                path,
                additions,
                deletions,
                lines_changed,
            } => {
                let from_stats = match (additions, deletions) {
                    (None, None) => None,
                    (added, removed) => {
                        Some(added.unwrap_or(0).saturating_add(removed.unwrap_or(0)))
                    }
                };
                Self {
                    path,
                    lines_changed: lines_changed.or(from_stats),
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitRecord {
    pub hash: String,
    #[serde(default)]
    pub author: String,
    pub timestamp: i64,
    #[serde(default)]
    pub changed_files: Vec<ChangedFile>,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl CommitRecord {
    pub fn new<I, S>(
        hash: impl Into<String>,
        author: impl Into<String>,
        timestamp: i64,
        files: I,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            hash: hash.into(),
            author: author.into(),
            timestamp,
            changed_files: files.into_iter().map(ChangedFile::new).collect(),
            message: String::new(),
            embedding: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn with_changed_files(mut self, files: Vec<ChangedFile>) -> Self {
        self.changed_files = files;
        self
    }

    pub fn validate(&self) -> Result<(), CommitError> {
        if self.hash.trim().is_empty() {
            return Err(CommitError::EmptyHash);
        }

        if self
            .changed_files
            .iter()
            .any(|file| normalize_path(&file.path).is_empty())
        {
            return Err(CommitError::EmptyPath {
                hash: self.hash.clone(),
            });
        }

        if let Some(embedding) = &self.embedding {
            if embedding.is_empty() {
                return Err(CommitError::InvalidEmbedding {
                    hash: self.hash.clone(),
                    reason: "vector is empty".to_owned(),
                });
            }
            if embedding.iter().any(|value| !value.is_finite()) {
                return Err(CommitError::InvalidEmbedding {
                    hash: self.hash.clone(),
                    reason: "vector contains a non-finite component".to_owned(),
                });
            }
        }

        Ok(())
    }

    /// Normalized, deduplicated changed paths in lexical order.
    pub fn unique_paths(&self) -> Vec<String> {
        self.changed_files
            .iter()
            .map(|file| normalize_path(&file.path))
            .filter(|path| !path.is_empty())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Lines changed per normalized path; duplicate entries are summed.
    pub fn lines_by_path(&self) -> BTreeMap<String, Option<u64>> {
        let mut lines = BTreeMap::<String, Option<u64>>::new();
        for file in &self.changed_files {
            let path = normalize_path(&file.path);
            if path.is_empty() {
                continue;
            }
            let entry = lines.entry(path).or_insert(None);
            if let Some(value) = file.lines_changed {
                *entry = Some(entry.unwrap_or(0).saturating_add(value));
            }
        }
        lines
    }

    pub fn author_or_unknown(&self) -> &str {
        let author = self.author.trim();
        if author.is_empty() {
            UNKNOWN_AUTHOR
        } else {
            author
        }
    }

    pub fn subject(&self) -> &str {
        self.message.lines().next().unwrap_or_default().trim()
    }
}

/// An open, unmerged change proposal supplied by the proposal source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeProposal {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub author: String,
    #[serde(default, alias = "file_set")]
    pub files: Vec<String>,
}

impl ChangeProposal {
    pub fn new<I, S>(id: impl Into<String>, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.into(),
            title: String::new(),
            author: String::new(),
            files: files.into_iter().map(Into::into).collect(),
        }
    }

    pub fn normalized_files(&self) -> BTreeSet<String> {
        normalize_file_set(self.files.iter().map(String::as_str))
    }
}

pub fn normalize_path(path: &str) -> String {
    let mut normalized = path.trim().replace('\\', "/");
    while let Some(rest) = normalized.strip_prefix("./") {
        normalized = rest.to_owned();
    }
    while normalized.contains("//") {
        normalized = normalized.replace("//", "/");
    }
    normalized
}

pub fn normalize_file_set<'a>(paths: impl IntoIterator<Item = &'a str>) -> BTreeSet<String> {
    paths
        .into_iter()
        .map(normalize_path)
        .filter(|path| !path.is_empty())
        .collect()
}

pub fn is_test_file(path: &str) -> bool {
    let lowered = format!("/{}", normalize_path(path).to_ascii_lowercase());
    TEST_PATH_INDICATORS
        .iter()
        .any(|indicator| lowered.contains(indicator))
}

/// Test files among `candidates` whose path mentions the stem of `source`.
pub fn related_test_files<'a>(
    source: &str,
    candidates: impl IntoIterator<Item = &'a str>,
) -> Vec<String> {
    let source = normalize_path(source);
    let Some(stem) = file_stem(&source) else {
        return Vec::new();
    };

    candidates
        .into_iter()
        .filter(|candidate| *candidate != source && is_test_file(candidate))
        .filter(|candidate| {
            candidate
                .rsplit('/')
                .next()
                .is_some_and(|name| name.contains(stem))
        })
        .map(str::to_owned)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn file_stem(path: &str) -> Option<&str> {
    let name = path.rsplit('/').next()?;
    let stem = name.split('.').next()?;
    (!stem.is_empty()).then_some(stem)
}

/// Lowercased alphanumeric tokens, shared by the lexical index and query
/// expansion so both sides agree on term boundaries.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|ch: char| !ch.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
        .collect()
}

pub fn now_unix_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_secs() as i64)
        .unwrap_or(0)
}
