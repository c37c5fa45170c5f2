use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use relay_config::RelayConfig;
use relay_core::{ChangeProposal, CommitRecord, RepoId, normalize_path};
use relay_graph::{
    CoChangeGraph, ExploreRequest, ExploreResult, FileActivity, IngestOutcome, Neighbor,
    OwnerStats, OwnershipTracker, explore,
};
use relay_infer::{
    EmbeddingProvider, EmbeddingProviderOverrides, ExpansionModel, InferError,
    embed_with_timeout, load_embedding_provider_from_config, load_expansion_model_from_config,
};
use relay_retrieval::{
    CommitIndex, Degradation, FALLBACK_EMBEDDING_FAILED, FALLBACK_EMBEDDING_TIMEOUT,
    FALLBACK_EMBEDDINGS_DISABLED, HybridRetriever, SearchRequest, SearchResponse, Signal,
};
use serde::{Deserialize, Serialize};

use crate::conflict::{ConflictReport, ConflictScorer};
use crate::impact::{ImpactOptions, ImpactSet, QueryImpact, aggregate_candidates, build_impact_set};
use crate::AnalysisError;

struct RepoState {
    graph: CoChangeGraph,
    ownership: OwnershipTracker,
    index: CommitIndex,
    last_commit: Option<String>,
}

impl RepoState {
    fn new(config: &RelayConfig, expansion: Option<Arc<dyn ExpansionModel>>) -> Self {
        let index = CommitIndex::new(&config.retrieval);
        let index = match expansion {
            Some(model) => index.with_expansion(model),
            None => index,
        };
        Self {
            graph: CoChangeGraph::new(&config.graph),
            ownership: OwnershipTracker::new(&config.ownership),
            index,
            last_commit: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedCommit {
    pub hash: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct IngestSummary {
    pub repo: String,
    pub ingested: usize,
    /// Commits whose pairwise updates were skipped by the pair cap.
    pub pair_capped: usize,
    pub skipped: Vec<SkippedCommit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_commit: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoStats {
    pub repo: String,
    pub commits: u64,
    pub files: usize,
    pub co_change_edges: usize,
    pub embedded_commits: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_commit: Option<String>,
}

/// Shared analysis context: configuration, optional model collaborators and
/// per-repository state.
///
/// Each repository sits behind its own lock. Ingestion holds a repository's
/// write lock for the counter updates of a single commit; queries only take
/// read locks, so they never wait on each other. Unknown repositories answer
/// queries as if they were empty.
pub struct Engine {
    config: RelayConfig,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    expansion: Option<Arc<dyn ExpansionModel>>,
    repos: RwLock<HashMap<RepoId, Arc<RwLock<RepoState>>>>,
}

impl Engine {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            config,
            embedder: None,
            expansion: None,
            repos: RwLock::new(HashMap::new()),
        }
    }

    /// Engine with the embedding provider and expansion model named by the
    /// configuration.
    pub fn from_config(config: RelayConfig) -> Self {
        let embedder =
            load_embedding_provider_from_config(&config, EmbeddingProviderOverrides::default())
                .map(|loaded| Arc::<dyn EmbeddingProvider>::from(loaded.provider));
        let expansion = load_expansion_model_from_config(&config)
            .map(|loaded| Arc::<dyn ExpansionModel>::from(loaded.model));

        Self {
            embedder,
            expansion,
            ..Self::new(config)
        }
    }

    pub fn with_embedding_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(provider);
        self
    }

    /// Must be attached before any commit is ingested.
    pub fn with_expansion_model(mut self, model: Arc<dyn ExpansionModel>) -> Self {
        self.expansion = Some(model);
        self
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn has_embedding_provider(&self) -> bool {
        self.embedder.is_some()
    }

    pub fn repositories(&self) -> Result<Vec<RepoId>, AnalysisError> {
        let repos = self
            .repos
            .read()
            .map_err(|_| AnalysisError::LockPoisoned("repository registry".to_owned()))?;
        let mut names = repos.keys().cloned().collect::<Vec<_>>();
        names.sort();
        Ok(names)
    }

    pub fn repo_stats(&self, repo: &str) -> Result<Option<RepoStats>, AnalysisError> {
        self.read_repo(repo, None, |state| {
            Some(RepoStats {
                repo: repo.to_owned(),
                commits: state.graph.total_commits(),
                files: state.graph.file_count(),
                co_change_edges: state.graph.edge_count(),
                embedded_commits: state.index.embedded_commits(),
                last_commit: state.last_commit.clone(),
            })
        })
    }

    /// Validates and applies one commit. Commits of a repository must arrive
    /// in commit order; a hash seen before is rejected without side effects.
    pub fn ingest(&self, repo: &str, commit: &CommitRecord) -> Result<IngestOutcome, AnalysisError> {
        commit.validate()?;

        let handle = self.repo_handle(repo)?;
        let mut state = handle
            .write()
            .map_err(|_| AnalysisError::LockPoisoned(format!("repository {repo}")))?;

        if state.index.contains(&commit.hash) {
            return Err(AnalysisError::DuplicateCommit {
                repo: repo.to_owned(),
                hash: commit.hash.clone(),
            });
        }

        let outcome = state.graph.ingest(commit);
        state.ownership.ingest(commit);
        state.index.insert(commit);
        state.last_commit = Some(commit.hash.clone());

        tracing::debug!(
            repo = %repo,
            commit = %commit.hash,
            files = outcome.files,
            pairs = outcome.pairs_updated,
            "commit ingested"
        );
        Ok(outcome)
    }

    /// Ingests `commits` in order. A commit that fails validation or
    /// duplicates an earlier hash is logged and skipped; the rest still
    /// apply.
    pub fn ingest_stream<I>(&self, repo: &str, commits: I) -> Result<IngestSummary, AnalysisError>
    where
        I: IntoIterator<Item = CommitRecord>,
    {
        let mut summary = IngestSummary {
            repo: repo.to_owned(),
            ..IngestSummary::default()
        };

        for commit in commits {
            match self.ingest(repo, &commit) {
                Ok(outcome) => {
                    summary.ingested += 1;
                    if outcome.pairs_skipped {
                        summary.pair_capped += 1;
                    }
                    summary.last_commit = Some(commit.hash);
                }
                Err(err @ (AnalysisError::Commit(_) | AnalysisError::DuplicateCommit { .. })) => {
                    tracing::warn!(
                        repo = %repo,
                        commit = %commit.hash,
                        error = %err,
                        "skipping commit"
                    );
                    summary.skipped.push(SkippedCommit {
                        hash: commit.hash,
                        reason: err.to_string(),
                    });
                }
                Err(err) => return Err(err),
            }
        }

        tracing::info!(
            repo = %repo,
            ingested = summary.ingested,
            skipped = summary.skipped.len(),
            pair_capped = summary.pair_capped,
            "commit stream ingested"
        );
        Ok(summary)
    }

    pub fn neighbors(
        &self,
        repo: &str,
        path: &str,
        min_score: f64,
        limit: Option<usize>,
    ) -> Result<Vec<Neighbor>, AnalysisError> {
        let path = normalize_path(path);
        self.read_repo(repo, Vec::new(), |state| {
            state.graph.neighbors(&path, min_score, limit)
        })
    }

    /// Top owners of `path`; `top_n` defaults to `ownership.top_n`.
    pub fn owners(
        &self,
        repo: &str,
        path: &str,
        top_n: Option<usize>,
    ) -> Result<Vec<OwnerStats>, AnalysisError> {
        let path = normalize_path(path);
        let top_n = top_n.unwrap_or(self.config.ownership.top_n);
        self.read_repo(repo, Vec::new(), |state| state.ownership.owners(&path, top_n))
    }

    /// Commits to `path` within the configured churn window before `now`.
    pub fn recent_churn(&self, repo: &str, path: &str, now: i64) -> Result<u64, AnalysisError> {
        let path = normalize_path(path);
        let window = self.config.ownership.churn_window_seconds();
        self.read_repo(repo, 0, |state| {
            state.ownership.recent_churn(&path, now, window)
        })
    }

    pub fn activity(&self, repo: &str, path: &str) -> Result<Option<FileActivity>, AnalysisError> {
        let path = normalize_path(path);
        self.read_repo(repo, None, |state| state.ownership.activity(&path))
    }

    pub fn search(
        &self,
        repo: &str,
        request: &SearchRequest,
    ) -> Result<SearchResponse, AnalysisError> {
        let Some(handle) = self.existing_repo(repo)? else {
            let empty = CommitIndex::new(&self.config.retrieval);
            return Ok(HybridRetriever::over_index(&empty, &self.config.retrieval).search(request)?);
        };
        let state = handle
            .read()
            .map_err(|_| AnalysisError::LockPoisoned(format!("repository {repo}")))?;
        Ok(HybridRetriever::over_index(&state.index, &self.config.retrieval).search(request)?)
    }

    /// Free-text search. The query is embedded first when a provider is
    /// attached; a slow or failing provider only drops the dense signal.
    pub async fn search_text(
        &self,
        repo: &str,
        query: &str,
        size: usize,
        since: Option<i64>,
    ) -> Result<SearchResponse, AnalysisError> {
        let mut request = SearchRequest::new(query, size).with_since(since);
        let mut degraded = Vec::new();

        match &self.embedder {
            None => {
                request.signals.dense = false;
                degraded.push(Degradation::new(Signal::Dense, FALLBACK_EMBEDDINGS_DISABLED));
            }
            Some(_) if query.trim().is_empty() => {}
            Some(provider) => {
                let timeout = self.config.retrieval.embedding_timeout();
                match embed_with_timeout(provider.as_ref(), query, timeout).await {
                    Ok(vector) => request.query_vector = Some(vector),
                    Err(err) => {
                        let reason = match &err {
                            InferError::Timeout(_) => FALLBACK_EMBEDDING_TIMEOUT,
                            _ => FALLBACK_EMBEDDING_FAILED,
                        };
                        tracing::warn!(
                            repo = %repo,
                            error = %err,
                            "query embedding unavailable; searching without the dense signal"
                        );
                        request.signals.dense = false;
                        degraded.push(
                            Degradation::new(Signal::Dense, reason).with_detail(err.to_string()),
                        );
                    }
                }
            }
        }

        let mut response = self.search(repo, &request)?;
        degraded.append(&mut response.degraded);
        response.degraded = degraded;
        Ok(response)
    }

    pub fn explore(
        &self,
        repo: &str,
        request: &ExploreRequest,
    ) -> Result<ExploreResult, AnalysisError> {
        let Some(handle) = self.existing_repo(repo)? else {
            return Ok(explore(&CoChangeGraph::new(&self.config.graph), request));
        };
        let state = handle
            .read()
            .map_err(|_| AnalysisError::LockPoisoned(format!("repository {repo}")))?;
        Ok(explore(&state.graph, request))
    }

    pub fn impact_set(
        &self,
        repo: &str,
        seeds: &[String],
        now: i64,
    ) -> Result<ImpactSet, AnalysisError> {
        let options = self.impact_options(now);
        let seeds = seeds.iter().map(String::as_str);
        let Some(handle) = self.existing_repo(repo)? else {
            let graph = CoChangeGraph::new(&self.config.graph);
            let ownership = OwnershipTracker::new(&self.config.ownership);
            return Ok(build_impact_set(&graph, &ownership, seeds, &options));
        };
        let state = handle
            .read()
            .map_err(|_| AnalysisError::LockPoisoned(format!("repository {repo}")))?;
        Ok(build_impact_set(
            &state.graph,
            &state.ownership,
            seeds,
            &options,
        ))
    }

    /// Search for `query`, roll the matching commits up into impacted files
    /// and authors, then build the impact set and co-change graph around the
    /// top files.
    pub async fn impact_for_query(
        &self,
        repo: &str,
        query: &str,
        now: i64,
    ) -> Result<QueryImpact, AnalysisError> {
        let size = self
            .config
            .impact
            .result_cap
            .clamp(1, self.config.retrieval.max_size.max(1));
        let search = self.search_text(repo, query, size, None).await?;
        let (impacted_files, top_authors) = aggregate_candidates(&search.candidates);

        let seeds = impacted_files
            .iter()
            .take(self.config.impact.query_seed_limit)
            .map(|file| file.path.clone())
            .collect::<Vec<_>>();

        let impact = self.impact_set(repo, &seeds, now)?;
        let graph = self.explore(
            repo,
            &ExploreRequest::from_config(seeds.iter().cloned(), &self.config.explore),
        )?;

        Ok(QueryImpact {
            query: query.to_owned(),
            search,
            impacted_files,
            top_authors,
            impact,
            graph,
        })
    }

    pub fn conflicts(
        &self,
        candidate_id: &str,
        candidate_files: &[String],
        proposals: &[ChangeProposal],
        include_all: bool,
    ) -> Vec<ConflictReport> {
        ConflictScorer::new(self.config.conflict).score(
            candidate_id,
            candidate_files.iter().map(String::as_str),
            proposals,
            include_all,
        )
    }

    fn impact_options(&self, now: i64) -> ImpactOptions {
        ImpactOptions {
            result_cap: self.config.impact.result_cap,
            min_score: self.config.impact.min_score,
            owner_top_n: self.config.ownership.top_n,
            now,
            churn_window_seconds: self.config.ownership.churn_window_seconds(),
        }
    }

    fn existing_repo(&self, repo: &str) -> Result<Option<Arc<RwLock<RepoState>>>, AnalysisError> {
        let repos = self
            .repos
            .read()
            .map_err(|_| AnalysisError::LockPoisoned("repository registry".to_owned()))?;
        Ok(repos.get(repo).cloned())
    }

    fn repo_handle(&self, repo: &str) -> Result<Arc<RwLock<RepoState>>, AnalysisError> {
        if repo.trim().is_empty() {
            return Err(AnalysisError::InvalidInput(
                "repository name must not be empty".to_owned(),
            ));
        }
        if let Some(handle) = self.existing_repo(repo)? {
            return Ok(handle);
        }

        let mut repos = self
            .repos
            .write()
            .map_err(|_| AnalysisError::LockPoisoned("repository registry".to_owned()))?;
        let handle = repos.entry(repo.to_owned()).or_insert_with(|| {
            tracing::info!(repo = %repo, "registering repository");
            Arc::new(RwLock::new(RepoState::new(
                &self.config,
                self.expansion.clone(),
            )))
        });
        Ok(Arc::clone(handle))
    }

    fn read_repo<T>(
        &self,
        repo: &str,
        missing: T,
        read: impl FnOnce(&RepoState) -> T,
    ) -> Result<T, AnalysisError> {
        let Some(handle) = self.existing_repo(repo)? else {
            return Ok(missing);
        };
        let state = handle
            .read()
            .map_err(|_| AnalysisError::LockPoisoned(format!("repository {repo}")))?;
        Ok(read(&state))
    }
}
