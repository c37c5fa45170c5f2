use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const RELAY_DIR_NAME: &str = ".relay";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const DEFAULT_PAIR_CAP: usize = 100;
pub const DEFAULT_OWNER_TOP_N: usize = 3;
pub const DEFAULT_CHURN_WINDOW_DAYS: u32 = 30;
pub const DEFAULT_TIMESTAMP_HISTORY: usize = 256;
pub const DEFAULT_MAX_TRACKED_AUTHORS: usize = 64;
pub const DEFAULT_RRF_K: f64 = 60.0;
pub const DEFAULT_MAX_SEARCH_SIZE: usize = 200;
pub const DEFAULT_RANK_WINDOW: usize = 100;
pub const DEFAULT_EMBEDDING_TIMEOUT_MS: u64 = 2_000;
pub const DEFAULT_OLLAMA_ENDPOINT: &str = "http://127.0.0.1:11434/api/embeddings";
pub const DEFAULT_OLLAMA_MODEL: &str = "nomic-embed-text";
pub const DEFAULT_EXPANSION_WEIGHT: f64 = 0.5;
pub const DEFAULT_EXPLORE_RADIUS: usize = 1;
pub const DEFAULT_VERTEX_CAP: usize = 1000;
pub const DEFAULT_MAX_CONNECTIONS_PER_VERTEX: usize = 20;
pub const DEFAULT_EXPLORE_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_IMPACT_RESULT_CAP: usize = 50;
pub const DEFAULT_IMPACT_MIN_SCORE: f64 = 0.3;
pub const DEFAULT_QUERY_SEED_LIMIT: usize = 10;
pub const DEFAULT_MEDIUM_THRESHOLD: u32 = 20;
pub const DEFAULT_HIGH_THRESHOLD: u32 = 60;

const SECONDS_PER_DAY: i64 = 24 * 60 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingProviderKind {
    #[default]
    Mock,
    Ollama,
}

impl EmbeddingProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mock => "mock",
            Self::Ollama => "ollama",
        }
    }
}

impl std::str::FromStr for EmbeddingProviderKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "mock" => Ok(Self::Mock),
            "ollama" => Ok(Self::Ollama),
            other => Err(format!(
                "invalid embedding provider '{other}', expected one of: mock, ollama"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExpansionProviderKind {
    #[default]
    None,
    Lexicon,
}

impl ExpansionProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Lexicon => "lexicon",
        }
    }
}

impl std::str::FromStr for ExpansionProviderKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "none" => Ok(Self::None),
            "lexicon" => Ok(Self::Lexicon),
            other => Err(format!(
                "invalid expansion provider '{other}', expected one of: none, lexicon"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RelayConfig {
    #[serde(default)]
    pub graph: GraphConfig,
    #[serde(default)]
    pub ownership: OwnershipConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embeddings: EmbeddingsConfig,
    #[serde(default)]
    pub expansion: ExpansionConfig,
    #[serde(default)]
    pub explore: ExploreConfig,
    #[serde(default)]
    pub impact: ImpactConfig,
    #[serde(default)]
    pub conflict: ConflictConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphConfig {
    /// Commits touching more distinct files than this skip pairwise edge updates.
    #[serde(default = "default_pair_cap")]
    pub pair_cap: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            pair_cap: default_pair_cap(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnershipConfig {
    #[serde(default = "default_owner_top_n")]
    pub top_n: usize,
    #[serde(default = "default_churn_window_days")]
    pub churn_window_days: u32,
    #[serde(default = "default_timestamp_history")]
    pub timestamp_history: usize,
    #[serde(default = "default_max_tracked_authors")]
    pub max_tracked_authors: usize,
}

impl OwnershipConfig {
    pub fn churn_window_seconds(&self) -> i64 {
        i64::from(self.churn_window_days) * SECONDS_PER_DAY
    }
}

impl Default for OwnershipConfig {
    fn default() -> Self {
        Self {
            top_n: default_owner_top_n(),
            churn_window_days: default_churn_window_days(),
            timestamp_history: default_timestamp_history(),
            max_tracked_authors: default_max_tracked_authors(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f64,
    #[serde(default = "default_max_search_size")]
    pub max_size: usize,
    #[serde(default = "default_rank_window")]
    pub rank_window: usize,
    #[serde(default = "default_embedding_timeout_ms")]
    pub embedding_timeout_ms: u64,
    #[serde(default = "default_message_boost")]
    pub message_boost: f64,
    #[serde(default = "default_author_boost")]
    pub author_boost: f64,
    #[serde(default = "default_path_boost")]
    pub path_boost: f64,
}

impl RetrievalConfig {
    pub fn embedding_timeout(&self) -> Duration {
        Duration::from_millis(self.embedding_timeout_ms)
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            rrf_k: default_rrf_k(),
            max_size: default_max_search_size(),
            rank_window: default_rank_window(),
            embedding_timeout_ms: default_embedding_timeout_ms(),
            message_boost: default_message_boost(),
            author_boost: default_author_boost(),
            path_boost: default_path_boost(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct EmbeddingsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub provider: EmbeddingProviderKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpansionConfig {
    #[serde(default)]
    pub provider: ExpansionProviderKind,
    /// Weight given to expanded terms; the query's own terms weigh 1.0.
    #[serde(default = "default_expansion_weight")]
    pub expansion_weight: f64,
    #[serde(default)]
    pub synonyms: BTreeMap<String, Vec<String>>,
}

impl Default for ExpansionConfig {
    fn default() -> Self {
        Self {
            provider: ExpansionProviderKind::None,
            expansion_weight: default_expansion_weight(),
            synonyms: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExploreConfig {
    #[serde(default = "default_explore_radius")]
    pub radius: usize,
    #[serde(default = "default_vertex_cap")]
    pub vertex_cap: usize,
    #[serde(default = "default_min_co_change_count")]
    pub min_co_change_count: u64,
    /// Fan-out limit: each frontier vertex contributes at most this many of
    /// its most significant neighbors to the next hop.
    #[serde(default = "default_max_connections_per_vertex")]
    pub max_connections_per_vertex: usize,
    #[serde(default = "default_explore_timeout_ms")]
    pub timeout_ms: u64,
}

impl ExploreConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for ExploreConfig {
    fn default() -> Self {
        Self {
            radius: default_explore_radius(),
            vertex_cap: default_vertex_cap(),
            min_co_change_count: default_min_co_change_count(),
            max_connections_per_vertex: default_max_connections_per_vertex(),
            timeout_ms: default_explore_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactConfig {
    #[serde(default = "default_impact_result_cap")]
    pub result_cap: usize,
    #[serde(default = "default_impact_min_score")]
    pub min_score: f64,
    #[serde(default = "default_query_seed_limit")]
    pub query_seed_limit: usize,
}

impl Default for ImpactConfig {
    fn default() -> Self {
        Self {
            result_cap: default_impact_result_cap(),
            min_score: default_impact_min_score(),
            query_seed_limit: default_query_seed_limit(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictConfig {
    /// Scores at or above this value are at least `medium` risk.
    #[serde(default = "default_medium_threshold")]
    pub medium_threshold: u32,
    /// Scores at or above this value are `high` risk.
    #[serde(default = "default_high_threshold")]
    pub high_threshold: u32,
}

impl Default for ConflictConfig {
    fn default() -> Self {
        Self {
            medium_threshold: default_medium_threshold(),
            high_threshold: default_high_threshold(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("failed to serialize config TOML: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

pub fn relay_dir(workspace_root: impl AsRef<Path>) -> PathBuf {
    workspace_root.as_ref().join(RELAY_DIR_NAME)
}

pub fn config_path(workspace_root: impl AsRef<Path>) -> PathBuf {
    relay_dir(workspace_root).join(CONFIG_FILE_NAME)
}

pub fn load_workspace_config(workspace_root: impl AsRef<Path>) -> Result<RelayConfig, ConfigError> {
    let path = config_path(workspace_root);
    if !path.exists() {
        return Ok(RelayConfig::default());
    }

    let raw = fs::read_to_string(path)?;
    parse_config(&raw)
}

pub fn parse_config(raw: &str) -> Result<RelayConfig, ConfigError> {
    let parsed: RelayConfig = toml::from_str(raw)?;
    Ok(normalize_config(parsed))
}

pub fn ensure_workspace_config(
    workspace_root: impl AsRef<Path>,
) -> Result<RelayConfig, ConfigError> {
    let workspace_root = workspace_root.as_ref();
    fs::create_dir_all(relay_dir(workspace_root))?;

    let path = config_path(workspace_root);
    if path.exists() {
        return load_workspace_config(workspace_root);
    }

    let config = RelayConfig::default();
    let content = toml::to_string_pretty(&config)?;
    fs::write(path, content)?;

    Ok(config)
}

pub fn validate_config(config: &RelayConfig) -> Vec<ConfigWarning> {
    let mut warnings = Vec::new();

    let conflict = &config.conflict;
    if conflict.medium_threshold == 0 || conflict.high_threshold > 100 {
        warnings.push(ConfigWarning {
            code: "conflict_threshold_out_of_range",
            message: format!(
                "conflict thresholds must lie in 1..=100 (medium={}, high={})",
                conflict.medium_threshold, conflict.high_threshold
            ),
        });
    }
    if conflict.medium_threshold >= conflict.high_threshold {
        warnings.push(ConfigWarning {
            code: "conflict_thresholds_out_of_order",
            message: format!(
                "conflict.medium_threshold ({}) should be below conflict.high_threshold ({}); medium risk can never be reported",
                conflict.medium_threshold, conflict.high_threshold
            ),
        });
    }

    if !(config.retrieval.rrf_k.is_finite() && config.retrieval.rrf_k > 0.0) {
        warnings.push(ConfigWarning {
            code: "rrf_k_not_positive",
            message: format!(
                "retrieval.rrf_k must be a positive number, got {}",
                config.retrieval.rrf_k
            ),
        });
    }
    if config.retrieval.max_size == 0 || config.retrieval.rank_window == 0 {
        warnings.push(ConfigWarning {
            code: "zero_retrieval_window",
            message: "retrieval.max_size and retrieval.rank_window must be positive".to_owned(),
        });
    }
    if config.embeddings.enabled && config.retrieval.embedding_timeout_ms == 0 {
        warnings.push(ConfigWarning {
            code: "embedding_timeout_zero",
            message: "embeddings are enabled but retrieval.embedding_timeout_ms is 0; every query will run without the dense signal".to_owned(),
        });
    }

    if config.graph.pair_cap < 2 {
        warnings.push(ConfigWarning {
            code: "pair_cap_too_small",
            message: format!(
                "graph.pair_cap is {}; no co-change edges can ever be recorded",
                config.graph.pair_cap
            ),
        });
    }
    if config.ownership.timestamp_history == 0 {
        warnings.push(ConfigWarning {
            code: "zero_timestamp_history",
            message: "ownership.timestamp_history is 0; recent churn will always be 0".to_owned(),
        });
    }
    if config.explore.vertex_cap == 0 {
        warnings.push(ConfigWarning {
            code: "zero_vertex_cap",
            message: "explore.vertex_cap is 0; graph exploration will always be empty".to_owned(),
        });
    }
    if config.explore.max_connections_per_vertex == 0 {
        warnings.push(ConfigWarning {
            code: "zero_max_connections",
            message: "explore.max_connections_per_vertex is 0; exploration will return seeds only"
                .to_owned(),
        });
    }
    if matches!(config.expansion.provider, ExpansionProviderKind::Lexicon)
        && config.expansion.synonyms.is_empty()
    {
        warnings.push(ConfigWarning {
            code: "expansion_lexicon_empty",
            message: "expansion.provider is lexicon but expansion.synonyms is empty".to_owned(),
        });
    }

    warnings
}

fn normalize_optional(input: Option<String>) -> Option<String> {
    input
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn normalize_config(mut config: RelayConfig) -> RelayConfig {
    config.embeddings.endpoint = normalize_optional(config.embeddings.endpoint.take());
    config.embeddings.model = normalize_optional(config.embeddings.model.take());

    config.expansion.synonyms = std::mem::take(&mut config.expansion.synonyms)
        .into_iter()
        .filter_map(|(term, expansions)| {
            let term = term.trim().to_ascii_lowercase();
            if term.is_empty() {
                return None;
            }
            let expansions = expansions
                .into_iter()
                .map(|value| value.trim().to_ascii_lowercase())
                .filter(|value| !value.is_empty() && *value != term)
                .collect::<Vec<_>>();
            Some((term, expansions))
        })
        .collect();

    config
}

fn default_pair_cap() -> usize {
    DEFAULT_PAIR_CAP
}

fn default_owner_top_n() -> usize {
    DEFAULT_OWNER_TOP_N
}

fn default_churn_window_days() -> u32 {
    DEFAULT_CHURN_WINDOW_DAYS
}

fn default_timestamp_history() -> usize {
    DEFAULT_TIMESTAMP_HISTORY
}

fn default_max_tracked_authors() -> usize {
    DEFAULT_MAX_TRACKED_AUTHORS
}

fn default_rrf_k() -> f64 {
    DEFAULT_RRF_K
}

fn default_max_search_size() -> usize {
    DEFAULT_MAX_SEARCH_SIZE
}

fn default_rank_window() -> usize {
    DEFAULT_RANK_WINDOW
}

fn default_embedding_timeout_ms() -> u64 {
    DEFAULT_EMBEDDING_TIMEOUT_MS
}

fn default_message_boost() -> f64 {
    3.0
}

fn default_author_boost() -> f64 {
    2.0
}

fn default_path_boost() -> f64 {
    1.0
}

fn default_expansion_weight() -> f64 {
    DEFAULT_EXPANSION_WEIGHT
}

fn default_explore_radius() -> usize {
    DEFAULT_EXPLORE_RADIUS
}

fn default_vertex_cap() -> usize {
    DEFAULT_VERTEX_CAP
}

fn default_min_co_change_count() -> u64 {
    1
}

fn default_max_connections_per_vertex() -> usize {
    DEFAULT_MAX_CONNECTIONS_PER_VERTEX
}

fn default_explore_timeout_ms() -> u64 {
    DEFAULT_EXPLORE_TIMEOUT_MS
}

fn default_impact_result_cap() -> usize {
    DEFAULT_IMPACT_RESULT_CAP
}

fn default_impact_min_score() -> f64 {
    DEFAULT_IMPACT_MIN_SCORE
}

fn default_query_seed_limit() -> usize {
    DEFAULT_QUERY_SEED_LIMIT
}

fn default_medium_threshold() -> u32 {
    DEFAULT_MEDIUM_THRESHOLD
}

fn default_high_threshold() -> u32 {
    DEFAULT_HIGH_THRESHOLD
}
