use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

mod fusion;
mod hybrid;
mod index;

pub use fusion::{FusedCandidate, fuse, rrf_contribution};
pub use hybrid::{
    Degradation, HybridRetriever, RetrievalCandidate, SearchRequest, SearchResponse, SignalSet,
};
pub use index::{CommitIndex, IndexedCommit};

pub const FALLBACK_NO_QUERY_VECTOR: &str = "no_query_vector";
pub const FALLBACK_DENSE_SOURCE_ABSENT: &str = "dense_source_absent";
pub const FALLBACK_DENSE_SOURCE_FAILED: &str = "dense_source_failed";
pub const FALLBACK_EXPANSION_MODEL_ABSENT: &str = "expansion_model_absent";
pub const FALLBACK_SPARSE_SOURCE_FAILED: &str = "sparse_source_failed";
pub const FALLBACK_EMBEDDINGS_DISABLED: &str = "embeddings_disabled";
pub const FALLBACK_EMBEDDING_TIMEOUT: &str = "embedding_timeout";
pub const FALLBACK_EMBEDDING_FAILED: &str = "embedding_failed";
pub const FALLBACK_DEADLINE_EXPIRED: &str = "deadline_expired";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    Lexical,
    Dense,
    Sparse,
}

impl Signal {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lexical => "lexical",
            Self::Dense => "dense",
            Self::Sparse => "sparse",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("invalid search input: {0}")]
    InvalidInput(String),
    #[error("{signal} signal unavailable: {reason}")]
    SourceUnavailable { signal: Signal, reason: String },
}

/// A commit id with the raw score its signal assigned. Lists are returned
/// best first; the position in the list is the rank.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedHit {
    pub id: String,
    pub score: f64,
}

pub trait LexicalSource: Send + Sync {
    fn rank_lexical(
        &self,
        query: &str,
        since: Option<i64>,
        limit: usize,
    ) -> Result<Vec<RankedHit>, RetrievalError>;
}

pub trait DenseSource: Send + Sync {
    fn rank_dense(
        &self,
        query_vector: &[f32],
        since: Option<i64>,
        limit: usize,
    ) -> Result<Vec<RankedHit>, RetrievalError>;
}

pub trait SparseSource: Send + Sync {
    fn rank_sparse(
        &self,
        query: &str,
        since: Option<i64>,
        limit: usize,
    ) -> Result<Vec<RankedHit>, RetrievalError>;
}
