use std::time::Instant;

use relay_config::RetrievalConfig;
use serde::{Deserialize, Serialize};

use crate::fusion::fuse;
use crate::index::CommitIndex;
use crate::{
    DenseSource, FALLBACK_DEADLINE_EXPIRED, FALLBACK_DENSE_SOURCE_ABSENT,
    FALLBACK_DENSE_SOURCE_FAILED, FALLBACK_EXPANSION_MODEL_ABSENT, FALLBACK_NO_QUERY_VECTOR,
    FALLBACK_SPARSE_SOURCE_FAILED, LexicalSource, RankedHit, RetrievalError, Signal, SparseSource,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalSet {
    pub lexical: bool,
    pub dense: bool,
    pub sparse: bool,
}

impl Default for SignalSet {
    fn default() -> Self {
        Self {
            lexical: true,
            dense: true,
            sparse: true,
        }
    }
}

impl SignalSet {
    pub fn lexical_only() -> Self {
        Self {
            lexical: true,
            dense: false,
            sparse: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query_text: String,
    pub query_vector: Option<Vec<f32>>,
    pub size: usize,
    pub signals: SignalSet,
    pub since: Option<i64>,
    pub deadline: Option<Instant>,
}

impl SearchRequest {
    pub fn new(query_text: impl Into<String>, size: usize) -> Self {
        Self {
            query_text: query_text.into(),
            query_vector: None,
            size,
            signals: SignalSet::default(),
            since: None,
            deadline: None,
        }
    }

    pub fn with_vector(mut self, query_vector: Option<Vec<f32>>) -> Self {
        self.query_vector = query_vector;
        self
    }

    pub fn with_signals(mut self, signals: SignalSet) -> Self {
        self.signals = signals;
        self
    }

    pub fn with_since(mut self, since: Option<i64>) -> Self {
        self.since = since;
        self
    }

    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalCandidate {
    pub id: String,
    pub lexical_rank: Option<usize>,
    pub dense_rank: Option<usize>,
    pub sparse_rank: Option<usize>,
    pub fused_score: f64,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub message: String,
}

/// A signal that was requested but did not contribute to the ranking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Degradation {
    pub signal: Signal,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl Degradation {
    pub fn new(signal: Signal, reason: &str) -> Self {
        Self {
            signal,
            reason: reason.to_owned(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SearchResponse {
    pub candidates: Vec<RetrievalCandidate>,
    pub signals_used: Vec<Signal>,
    pub degraded: Vec<Degradation>,
    pub truncated: bool,
    pub timed_out: bool,
}

/// Fuses the lexical, dense and sparse rankings of commits with RRF.
///
/// Lexical is the mandatory baseline: its failure fails the query. Dense
/// and sparse failures are logged and reported in
/// [`SearchResponse::degraded`] instead.
pub struct HybridRetriever<'a> {
    lexical: &'a dyn LexicalSource,
    dense: Option<&'a dyn DenseSource>,
    sparse: Option<&'a dyn SparseSource>,
    details: Option<&'a CommitIndex>,
    config: &'a RetrievalConfig,
}

impl<'a> HybridRetriever<'a> {
    pub fn new(lexical: &'a dyn LexicalSource, config: &'a RetrievalConfig) -> Self {
        Self {
            lexical,
            dense: None,
            sparse: None,
            details: None,
            config,
        }
    }

    /// Every signal served by `index`; sparse only when it carries an
    /// expansion model.
    pub fn over_index(index: &'a CommitIndex, config: &'a RetrievalConfig) -> Self {
        let retriever = Self::new(index, config).with_dense(index);
        let retriever = if index.has_expansion() {
            retriever.with_sparse(index)
        } else {
            retriever
        };
        retriever.with_details(index)
    }

    pub fn with_dense(mut self, dense: &'a dyn DenseSource) -> Self {
        self.dense = Some(dense);
        self
    }

    pub fn with_sparse(mut self, sparse: &'a dyn SparseSource) -> Self {
        self.sparse = Some(sparse);
        self
    }

    pub fn with_details(mut self, details: &'a CommitIndex) -> Self {
        self.details = Some(details);
        self
    }

    pub fn search(&self, request: &SearchRequest) -> Result<SearchResponse, RetrievalError> {
        let query = request.query_text.trim();
        if query.is_empty() {
            return Err(RetrievalError::InvalidInput(
                "query text must not be empty".to_owned(),
            ));
        }
        if request.size == 0 {
            return Err(RetrievalError::InvalidInput(
                "size must be at least 1".to_owned(),
            ));
        }
        if !request.signals.lexical {
            return Err(RetrievalError::InvalidInput(
                "the lexical signal cannot be disabled".to_owned(),
            ));
        }

        let mut response = SearchResponse::default();
        let max_size = self.config.max_size.max(1);
        let size = if request.size > max_size {
            response.truncated = true;
            max_size
        } else {
            request.size
        };
        let window = self.config.rank_window.max(size);

        let lexical = self.lexical.rank_lexical(query, request.since, window)?;
        let mut lists = vec![(Signal::Lexical, hit_ids(lexical))];
        response.signals_used.push(Signal::Lexical);

        if request.signals.dense {
            if deadline_passed(request.deadline) {
                self.expire(&mut response, Signal::Dense);
            } else if let Some(list) = self.dense_list(request, window, &mut response) {
                lists.push((Signal::Dense, list));
                response.signals_used.push(Signal::Dense);
            }
        }

        if request.signals.sparse {
            if deadline_passed(request.deadline) {
                self.expire(&mut response, Signal::Sparse);
            } else if let Some(list) = self.sparse_list(query, request, window, &mut response) {
                lists.push((Signal::Sparse, list));
                response.signals_used.push(Signal::Sparse);
            }
        }

        let mut fused = fuse(&lists, self.config.rrf_k);
        fused.truncate(size);

        response.candidates = fused
            .into_iter()
            .map(|candidate| {
                let mut result = RetrievalCandidate {
                    id: candidate.id,
                    lexical_rank: candidate.lexical_rank,
                    dense_rank: candidate.dense_rank,
                    sparse_rank: candidate.sparse_rank,
                    fused_score: candidate.fused_score,
                    files: Vec::new(),
                    author: String::new(),
                    timestamp: 0,
                    message: String::new(),
                };
                if let Some(commit) = self.details.and_then(|index| index.get(&result.id)) {
                    result.files = commit.files.clone();
                    result.author = commit.author.clone();
                    result.timestamp = commit.timestamp;
                    result.message = commit.message.clone();
                }
                result
            })
            .collect();

        Ok(response)
    }

    fn dense_list(
        &self,
        request: &SearchRequest,
        window: usize,
        response: &mut SearchResponse,
    ) -> Option<Vec<String>> {
        let Some(vector) = request.query_vector.as_deref() else {
            tracing::debug!("no query vector; dense signal skipped");
            response
                .degraded
                .push(Degradation::new(Signal::Dense, FALLBACK_NO_QUERY_VECTOR));
            return None;
        };
        let Some(dense) = self.dense else {
            response
                .degraded
                .push(Degradation::new(Signal::Dense, FALLBACK_DENSE_SOURCE_ABSENT));
            return None;
        };

        match dense.rank_dense(vector, request.since, window) {
            Ok(hits) => Some(hit_ids(hits)),
            Err(err) => {
                tracing::warn!(error = %err, "dense signal unavailable; continuing without it");
                response.degraded.push(
                    Degradation::new(Signal::Dense, FALLBACK_DENSE_SOURCE_FAILED)
                        .with_detail(err.to_string()),
                );
                None
            }
        }
    }

    fn sparse_list(
        &self,
        query: &str,
        request: &SearchRequest,
        window: usize,
        response: &mut SearchResponse,
    ) -> Option<Vec<String>> {
        let Some(sparse) = self.sparse else {
            tracing::debug!("no expansion model configured; sparse signal skipped");
            response.degraded.push(Degradation::new(
                Signal::Sparse,
                FALLBACK_EXPANSION_MODEL_ABSENT,
            ));
            return None;
        };

        match sparse.rank_sparse(query, request.since, window) {
            Ok(hits) => Some(hit_ids(hits)),
            Err(err) => {
                tracing::warn!(error = %err, "sparse signal unavailable; continuing without it");
                response.degraded.push(
                    Degradation::new(Signal::Sparse, FALLBACK_SPARSE_SOURCE_FAILED)
                        .with_detail(err.to_string()),
                );
                None
            }
        }
    }

    fn expire(&self, response: &mut SearchResponse, signal: Signal) {
        tracing::warn!(signal = %signal, "search deadline expired; returning partial ranking");
        response.timed_out = true;
        response.truncated = true;
        response
            .degraded
            .push(Degradation::new(signal, FALLBACK_DEADLINE_EXPIRED));
    }
}

fn hit_ids(hits: Vec<RankedHit>) -> Vec<String> {
    hits.into_iter().map(|hit| hit.id).collect()
}

fn deadline_passed(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|deadline| Instant::now() >= deadline)
}

#[cfg(test)]
mod tests {
    use relay_config::RetrievalConfig;
    use relay_core::CommitRecord;

    use super::*;
    use crate::rrf_contribution;

    struct FailingSource;

    impl LexicalSource for FailingSource {
        fn rank_lexical(
            &self,
            _query: &str,
            _since: Option<i64>,
            _limit: usize,
        ) -> Result<Vec<RankedHit>, RetrievalError> {
            Err(RetrievalError::SourceUnavailable {
                signal: Signal::Lexical,
                reason: "index offline".to_owned(),
            })
        }
    }

    impl DenseSource for FailingSource {
        fn rank_dense(
            &self,
            _query_vector: &[f32],
            _since: Option<i64>,
            _limit: usize,
        ) -> Result<Vec<RankedHit>, RetrievalError> {
            Err(RetrievalError::SourceUnavailable {
                signal: Signal::Dense,
                reason: "vector store offline".to_owned(),
            })
        }
    }

    impl SparseSource for FailingSource {
        fn rank_sparse(
            &self,
            _query: &str,
            _since: Option<i64>,
            _limit: usize,
        ) -> Result<Vec<RankedHit>, RetrievalError> {
            Err(RetrievalError::SourceUnavailable {
                signal: Signal::Sparse,
                reason: "expansion model offline".to_owned(),
            })
        }
    }

    fn commit(hash: &str, message: &str, files: &[&str], embedding: Vec<f32>) -> CommitRecord {
        CommitRecord::new(hash, "dev", 1_700_000_000, files.iter().copied())
            .with_message(message)
            .with_embedding(embedding)
    }

    fn auth_index() -> CommitIndex {
        let mut index = CommitIndex::default();
        index.insert(&commit(
            "c-login",
            "Fix authentication bug in login form",
            &["src/auth/login.ts"],
            vec![-1.0, 0.0, 0.0],
        ));
        index.insert(&commit(
            "c-token",
            "Authentication token refresh",
            &["src/auth/token.ts"],
            vec![0.0, 0.0, 1.0],
        ));
        index.insert(&commit(
            "c-session",
            "Session bug when cookies expire",
            &["src/auth/session.ts"],
            vec![1.0, 0.0, 0.0],
        ));
        index.insert(&commit(
            "c-theme",
            "Dark mode toggle",
            &["src/settings/theme.ts"],
            vec![0.5, 0.5, 0.0],
        ));
        index
    }

    fn ids(response: &SearchResponse) -> Vec<&str> {
        response
            .candidates
            .iter()
            .map(|candidate| candidate.id.as_str())
            .collect()
    }

    #[test]
    fn lexical_only_search_matches_pure_lexical_ranking() {
        let index = auth_index();
        let config = RetrievalConfig::default();
        let retriever = HybridRetriever::over_index(&index, &config);

        let response = retriever
            .search(&SearchRequest::new("authentication bug", 10))
            .expect("search");

        let lexical = index
            .rank_lexical("authentication bug", None, 10)
            .expect("lexical");
        assert_eq!(
            ids(&response),
            lexical.iter().map(|hit| hit.id.as_str()).collect::<Vec<_>>()
        );
        assert_eq!(ids(&response)[0], "c-login");
        assert_eq!(response.signals_used, vec![Signal::Lexical]);
        assert!(
            response
                .candidates
                .iter()
                .all(|candidate| candidate.dense_rank.is_none())
        );
        assert_eq!(
            response
                .degraded
                .iter()
                .map(|entry| entry.reason.as_str())
                .collect::<Vec<_>>(),
            vec![FALLBACK_NO_QUERY_VECTOR, FALLBACK_EXPANSION_MODEL_ABSENT]
        );
        assert_eq!(response.candidates[0].files, vec!["src/auth/login.ts".to_owned()]);
        assert!(!response.truncated);
    }

    #[test]
    fn dense_signal_reranks_deterministically() {
        let index = auth_index();
        let config = RetrievalConfig::default();
        let retriever = HybridRetriever::over_index(&index, &config);

        let lexical_only = retriever
            .search(&SearchRequest::new("authentication bug", 10))
            .expect("lexical search");
        let lexical_order = ids(&lexical_only);
        assert_eq!(lexical_order.len(), 3);
        assert!(!lexical_order.contains(&"c-theme"));

        // The query vector points straight at the session commit and away
        // from the login commit.
        let hybrid = retriever
            .search(
                &SearchRequest::new("authentication bug", 10)
                    .with_vector(Some(vec![1.0, 0.0, 0.0])),
            )
            .expect("hybrid search");

        assert_eq!(hybrid.signals_used, vec![Signal::Lexical, Signal::Dense]);
        assert_ne!(ids(&hybrid), lexical_order);

        let session = hybrid
            .candidates
            .iter()
            .find(|candidate| candidate.id == "c-session")
            .expect("session candidate");
        assert_eq!(session.dense_rank, Some(1));
        let lexical_rank = session.lexical_rank.expect("session lexical rank");
        assert_eq!(
            session.fused_score,
            rrf_contribution(lexical_rank, 60.0) + rrf_contribution(1, 60.0)
        );
        assert_eq!(
            ids(&hybrid),
            vec!["c-session", "c-login", "c-token", "c-theme"]
        );
        assert!(ids(&hybrid).contains(&"c-theme"));
    }

    #[test]
    fn empty_query_is_rejected() {
        let index = auth_index();
        let config = RetrievalConfig::default();
        let err = HybridRetriever::over_index(&index, &config)
            .search(&SearchRequest::new("   ", 10))
            .expect_err("empty query");
        assert!(matches!(err, RetrievalError::InvalidInput(_)));
    }

    #[test]
    fn lexical_failure_fails_the_query() {
        let config = RetrievalConfig::default();
        let err = HybridRetriever::new(&FailingSource, &config)
            .search(&SearchRequest::new("auth", 10))
            .expect_err("lexical failure");
        assert!(matches!(
            err,
            RetrievalError::SourceUnavailable {
                signal: Signal::Lexical,
                ..
            }
        ));
    }

    #[test]
    fn dense_and_sparse_failures_degrade() {
        let index = auth_index();
        let config = RetrievalConfig::default();
        let failing = FailingSource;
        let retriever = HybridRetriever::new(&index, &config)
            .with_dense(&failing)
            .with_sparse(&failing);

        let response = retriever
            .search(
                &SearchRequest::new("authentication", 10).with_vector(Some(vec![1.0, 0.0, 0.0])),
            )
            .expect("degraded search succeeds");

        assert_eq!(response.signals_used, vec![Signal::Lexical]);
        assert_eq!(response.candidates.len(), 2);
        let reasons = response
            .degraded
            .iter()
            .map(|entry| (entry.signal, entry.reason.as_str()))
            .collect::<Vec<_>>();
        assert_eq!(
            reasons,
            vec![
                (Signal::Dense, FALLBACK_DENSE_SOURCE_FAILED),
                (Signal::Sparse, FALLBACK_SPARSE_SOURCE_FAILED)
            ]
        );
        assert!(response.degraded[0].detail.is_some());
    }

    #[test]
    fn mismatched_query_dimension_degrades_dense() {
        let index = auth_index();
        let config = RetrievalConfig::default();
        let response = HybridRetriever::over_index(&index, &config)
            .search(
                &SearchRequest::new("authentication bug", 10).with_vector(Some(vec![1.0, 0.0])),
            )
            .expect("search");

        assert_eq!(response.signals_used, vec![Signal::Lexical]);
        assert!(
            response
                .candidates
                .iter()
                .all(|candidate| candidate.dense_rank.is_none())
        );
        let dense = response
            .degraded
            .iter()
            .find(|entry| entry.signal == Signal::Dense)
            .expect("dense degradation");
        assert_eq!(dense.reason, FALLBACK_DENSE_SOURCE_FAILED);
        assert!(
            dense
                .detail
                .as_deref()
                .is_some_and(|detail| detail.contains("dimension 2"))
        );
    }

    #[test]
    fn oversized_requests_are_capped_and_flagged() {
        let index = auth_index();
        let config = RetrievalConfig {
            max_size: 1,
            ..RetrievalConfig::default()
        };
        let response = HybridRetriever::over_index(&index, &config)
            .search(&SearchRequest::new("authentication bug", 50))
            .expect("search");

        assert!(response.truncated);
        assert_eq!(response.candidates.len(), 1);
    }

    #[test]
    fn expired_deadline_returns_lexical_partial_result() {
        let index = auth_index();
        let config = RetrievalConfig::default();
        let response = HybridRetriever::over_index(&index, &config)
            .search(
                &SearchRequest::new("authentication bug", 10)
                    .with_vector(Some(vec![1.0, 0.0, 0.0]))
                    .with_deadline(Some(Instant::now())),
            )
            .expect("search");

        assert!(response.timed_out);
        assert!(response.truncated);
        assert_eq!(response.signals_used, vec![Signal::Lexical]);
        assert_eq!(ids(&response)[0], "c-login");
    }

    #[test]
    fn lexical_only_signal_set_skips_optional_signals_quietly() {
        let index = auth_index();
        let config = RetrievalConfig::default();
        let response = HybridRetriever::over_index(&index, &config)
            .search(
                &SearchRequest::new("authentication bug", 10)
                    .with_vector(Some(vec![1.0, 0.0, 0.0]))
                    .with_signals(SignalSet::lexical_only()),
            )
            .expect("search");

        assert_eq!(response.signals_used, vec![Signal::Lexical]);
        assert!(response.degraded.is_empty());
    }
}
