use async_trait::async_trait;
use relay_config::{DEFAULT_OLLAMA_ENDPOINT, DEFAULT_OLLAMA_MODEL};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::{EmbeddingProvider, InferError, normalize_optional};

pub const MOCK_EMBEDDING_DIM: usize = 64;

/// Deterministic hashed bag-of-words embedding. Texts sharing tokens land
/// near each other, which is enough to exercise the dense signal offline.
#[derive(Debug, Default, Clone, Copy)]
pub struct MockEmbeddingProvider;

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>, InferError> {
        Ok(mock_embedding_for_text(text))
    }
}

#[derive(Debug, Clone)]
pub struct OllamaEmbeddingProvider {
    client: reqwest::Client,
    endpoint: String,
    model: String,
}

impl OllamaEmbeddingProvider {
    pub fn new(endpoint: Option<String>, model: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: normalize_optional(endpoint)
                .unwrap_or_else(|| DEFAULT_OLLAMA_ENDPOINT.to_owned()),
            model: normalize_optional(model).unwrap_or_else(|| DEFAULT_OLLAMA_MODEL.to_owned()),
        }
    }

    pub fn model_name(&self) -> &str {
        &self.model
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn request_embedding(&self, text: &str) -> Result<Vec<f32>, InferError> {
        let body = json!({
            "model": self.model,
            "prompt": text
        });

        let response_value: Value = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        extract_embedding_vector(&response_value)
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbeddingProvider {
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>, InferError> {
        self.request_embedding(text).await
    }
}

/// Response bodies accepted from an embedding endpoint: Ollama's legacy
/// `/api/embeddings`, its batched `/api/embed`, OpenAI-style `data` lists
/// and a bare array.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum EmbeddingResponse {
    Single { embedding: Vec<f64> },
    Batch { embeddings: Vec<Vec<f64>> },
    Listed { data: Vec<ListedEmbedding> },
    Bare(Vec<f64>),
}

#[derive(Debug, Deserialize)]
struct ListedEmbedding {
    embedding: Vec<f64>,
}

impl EmbeddingResponse {
    fn into_first(self) -> Option<Vec<f64>> {
        match self {
            Self::Single { embedding } | Self::Bare(embedding) => Some(embedding),
            Self::Batch { embeddings } => embeddings.into_iter().next(),
            Self::Listed { data } => data.into_iter().next().map(|item| item.embedding),
        }
    }
}

fn extract_embedding_vector(response: &Value) -> Result<Vec<f32>, InferError> {
    let invalid = |reason: &str| InferError::InvalidEmbeddingResponse(reason.to_owned());

    let raw = EmbeddingResponse::deserialize(response)
        .ok()
        .and_then(EmbeddingResponse::into_first)
        .ok_or_else(|| invalid("no embedding vector in response body"))?;

    let mut vector = raw.into_iter().map(|value| value as f32).collect::<Vec<_>>();
    if vector.is_empty() || vector.iter().any(|value| !value.is_finite()) {
        return Err(invalid("embedding vector is empty or not finite"));
    }
    if !unit_normalize(&mut vector) {
        return Err(invalid("embedding vector has zero magnitude"));
    }
    Ok(vector)
}

fn mock_embedding_for_text(text: &str) -> Vec<f32> {
    let mut embedding = vec![0.0f32; MOCK_EMBEDDING_DIM];
    for token in relay_core::tokenize(text) {
        let hash = fnv1a(&token);
        let bucket = (hash % MOCK_EMBEDDING_DIM as u64) as usize;
        embedding[bucket] += if hash & 0x100 == 0 { 1.0 } else { -1.0 };
    }

    // tokens may cancel out; a zero vector is left as is
    unit_normalize(&mut embedding);
    embedding
}

fn fnv1a(token: &str) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0100_0000_01b3;

    token.bytes().fold(OFFSET_BASIS, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(PRIME)
    })
}

/// Scales `vector` to unit length in place. Returns false and leaves it
/// untouched when its magnitude is zero.
fn unit_normalize(vector: &mut [f32]) -> bool {
    let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
    if magnitude <= f32::EPSILON {
        return false;
    }
    vector.iter_mut().for_each(|value| *value /= magnitude);
    true
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn mock_embedding_provider_is_deterministic_and_normalized() {
        let provider = MockEmbeddingProvider;

        let first = provider
            .embed_text("Fix authentication bug in login flow")
            .await
            .expect("first embedding");
        let second = provider
            .embed_text("fix AUTHENTICATION bug in login flow")
            .await
            .expect("second embedding");

        assert_eq!(first.len(), MOCK_EMBEDDING_DIM);
        assert_eq!(first, second);

        let norm_sq = first
            .iter()
            .map(|value| value * value)
            .fold(0.0f32, |acc, value| acc + value);
        assert!((norm_sq - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn mock_embedding_of_blank_text_is_zero() {
        let vector = MockEmbeddingProvider
            .embed_text("   ")
            .await
            .expect("embedding");
        assert!(vector.iter().all(|value| *value == 0.0));
    }

    #[test]
    fn embedding_vector_is_found_in_known_response_shapes() {
        let ollama = json!({"embedding": [3.0, 4.0]});
        assert_eq!(
            extract_embedding_vector(&ollama).expect("ollama shape"),
            vec![0.6, 0.8]
        );

        let openai = json!({"data": [{"embedding": [0.0, 2.0]}]});
        assert_eq!(
            extract_embedding_vector(&openai).expect("openai shape"),
            vec![0.0, 1.0]
        );

        let batched = json!({"embeddings": [[0.0, 0.0, 5.0], [1.0, 0.0, 0.0]]});
        assert_eq!(
            extract_embedding_vector(&batched).expect("batched shape"),
            vec![0.0, 0.0, 1.0]
        );

        for broken in [
            json!({"embedding": []}),
            json!({"embedding": [0.0, 0.0]}),
            json!({"embedding": [1e300]}),
            json!({"vector": [1.0]}),
        ] {
            assert!(matches!(
                extract_embedding_vector(&broken),
                Err(InferError::InvalidEmbeddingResponse(_))
            ));
        }
    }

    #[test]
    fn ollama_provider_falls_back_to_default_endpoint_and_model() {
        let provider = OllamaEmbeddingProvider::new(Some("  ".to_owned()), None);
        assert_eq!(provider.endpoint(), DEFAULT_OLLAMA_ENDPOINT);
        assert_eq!(provider.model_name(), DEFAULT_OLLAMA_MODEL);
    }
}
