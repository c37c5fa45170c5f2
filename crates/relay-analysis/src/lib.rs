use relay_core::CommitError;
use relay_retrieval::RetrievalError;
use thiserror::Error;

mod conflict;
mod engine;
mod impact;

pub use conflict::{ConflictReport, ConflictScorer, RiskBucket, highest_risk};
pub use engine::{Engine, IngestSummary, RepoStats, SkippedCommit};
pub use impact::{
    AuthorContribution, FileChurn, ImpactOptions, ImpactSet, ImpactedFile, QueryImpact,
    RelatedFile, SeedOwners, TestRelationship, aggregate_candidates, build_impact_set,
};

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("commit rejected: {0}")]
    Commit(#[from] CommitError),
    #[error("commit {hash} was already ingested into repository {repo}")]
    DuplicateCommit { repo: String, hash: String },
    #[error("retrieval error: {0}")]
    Retrieval(#[from] RetrievalError),
    #[error("failed to lock shared resource: {0}")]
    LockPoisoned(String),
}
