use std::time::Duration;

use async_trait::async_trait;
use relay_config::{EmbeddingProviderKind, ExpansionProviderKind, RelayConfig};
use thiserror::Error;

mod embedding;
mod expansion;

pub use embedding::{MOCK_EMBEDDING_DIM, MockEmbeddingProvider, OllamaEmbeddingProvider};
pub use expansion::{LexiconExpansionModel, WeightedTerm};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EmbeddingProviderOverrides {
    pub enabled: Option<bool>,
    pub provider: Option<EmbeddingProviderKind>,
    pub model: Option<String>,
    pub endpoint: Option<String>,
}

pub struct LoadedEmbeddingProvider {
    pub provider: Box<dyn EmbeddingProvider>,
    pub provider_name: String,
    pub model_name: String,
}

pub struct LoadedExpansionModel {
    pub model: Box<dyn ExpansionModel>,
    pub model_name: String,
}

#[derive(Debug, Error)]
pub enum InferError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("response decoding failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid embedding response: {0}")]
    InvalidEmbeddingResponse(String),
    #[error("embedding request timed out after {0} ms")]
    Timeout(u64),
    #[error("{0}")]
    ModelUnavailable(String),
}

/// Turns free text into a dense vector comparable with commit embeddings.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>, InferError>;
}

/// Learned or lexicon-driven term expansion used by the sparse signal.
pub trait ExpansionModel: Send + Sync {
    fn expand(&self, text: &str) -> Result<Vec<WeightedTerm>, InferError>;
}

pub fn load_embedding_provider_from_config(
    config: &RelayConfig,
    overrides: EmbeddingProviderOverrides,
) -> Option<LoadedEmbeddingProvider> {
    let selected_enabled = overrides.enabled.unwrap_or(config.embeddings.enabled);
    if !selected_enabled {
        return None;
    }

    let selected_provider = overrides.provider.unwrap_or(config.embeddings.provider);
    let selected_model = first_non_empty(overrides.model, config.embeddings.model.clone());
    let selected_endpoint = first_non_empty(overrides.endpoint, config.embeddings.endpoint.clone());

    let loaded = match selected_provider {
        EmbeddingProviderKind::Mock => LoadedEmbeddingProvider {
            provider: Box::new(MockEmbeddingProvider),
            provider_name: EmbeddingProviderKind::Mock.as_str().to_owned(),
            model_name: format!("mock-{MOCK_EMBEDDING_DIM}d"),
        },
        EmbeddingProviderKind::Ollama => {
            let provider = OllamaEmbeddingProvider::new(selected_endpoint, selected_model);
            LoadedEmbeddingProvider {
                model_name: provider.model_name().to_owned(),
                provider: Box::new(provider),
                provider_name: EmbeddingProviderKind::Ollama.as_str().to_owned(),
            }
        }
    };

    tracing::debug!(
        provider = %loaded.provider_name,
        model = %loaded.model_name,
        "embedding provider loaded"
    );
    Some(loaded)
}

pub fn load_expansion_model_from_config(config: &RelayConfig) -> Option<LoadedExpansionModel> {
    match config.expansion.provider {
        ExpansionProviderKind::None => None,
        ExpansionProviderKind::Lexicon => {
            let model = LexiconExpansionModel::new(
                config.expansion.synonyms.clone(),
                config.expansion.expansion_weight as f32,
            );
            Some(LoadedExpansionModel {
                model_name: format!("lexicon-{}", model.len()),
                model: Box::new(model),
            })
        }
    }
}

/// Bounds a single embedding call; the caller decides whether a timeout is
/// fatal or just drops the dense signal.
pub async fn embed_with_timeout(
    provider: &dyn EmbeddingProvider,
    text: &str,
    timeout: Duration,
) -> Result<Vec<f32>, InferError> {
    match tokio::time::timeout(timeout, provider.embed_text(text)).await {
        Ok(result) => result,
        Err(_) => Err(InferError::Timeout(timeout.as_millis() as u64)),
    }
}

pub(crate) fn normalize_optional(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn first_non_empty(left: Option<String>, right: Option<String>) -> Option<String> {
    normalize_optional(left).or_else(|| normalize_optional(right))
}
