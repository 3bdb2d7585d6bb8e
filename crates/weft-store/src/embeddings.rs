use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tracing::debug;

use weft_core::config::EmbeddingConfig;
use weft_core::error::{Result, WeftError};

/// Trait for embedding providers (OpenAI-compatible APIs).
pub trait EmbeddingProvider: Send + Sync + 'static {
    /// Embed a batch of texts into vectors.
    fn embed(&self, texts: &[String]) -> BoxFuture<'_, Result<Vec<Vec<f32>>>>;
    /// Number of dimensions in the embedding vectors.
    fn dimensions(&self) -> usize;
}

/// HTTP-based embedding provider compatible with OpenAI, Ollama, etc.
pub struct HttpEmbeddingProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    dims: usize,
}

impl HttpEmbeddingProvider {
    pub fn new(base_url: &str, api_key: Option<&str>, model: &str, dims: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.map(String::from),
            model: model.to_string(),
            dims,
        }
    }

    /// Build from the `[embedding]` section. `base_url` may be omitted for
    /// the `openai` and `ollama` providers.
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        let base_url = match (&config.base_url, config.provider.as_str()) {
            (Some(url), _) => url.clone(),
            (None, "openai") => "https://api.openai.com/v1".to_string(),
            (None, "ollama") => "http://localhost:11434/v1".to_string(),
            (None, other) => {
                return Err(WeftError::Config(format!(
                    "embedding provider '{}' needs a base_url",
                    other
                )))
            }
        };
        Ok(Self::new(
            &base_url,
            config.api_key.as_deref(),
            &config.model,
            config.dimensions,
        ))
    }
}

#[derive(Serialize)]
struct EmbeddingRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

/// Put the returned vectors back in input order and check that every text
/// got exactly one. Providers that omit `index` are taken in response order.
fn vectors_in_input_order(response: EmbeddingResponse, texts: usize) -> Result<Vec<Vec<f32>>> {
    if response.data.len() != texts {
        return Err(WeftError::Knowledge(format!(
            "embedding API returned {} vectors for {} texts",
            response.data.len(),
            texts
        )));
    }
    let mut slots: Vec<Option<Vec<f32>>> = vec![None; texts];
    for (position, item) in response.data.into_iter().enumerate() {
        let slot = item.index.unwrap_or(position);
        match slots.get_mut(slot) {
            Some(entry) if entry.is_none() => *entry = Some(item.embedding),
            _ => {
                return Err(WeftError::Knowledge(format!(
                    "embedding API returned a bad or repeated index {}",
                    slot
                )))
            }
        }
    }
    Ok(slots.into_iter().flatten().collect())
}

impl EmbeddingProvider for HttpEmbeddingProvider {
    fn embed(&self, texts: &[String]) -> BoxFuture<'_, Result<Vec<Vec<f32>>>> {
        let texts = texts.to_vec();
        Box::pin(async move {
            if texts.is_empty() {
                return Ok(Vec::new());
            }
            let count = texts.len();
            let mut req = self
                .client
                .post(format!("{}/embeddings", self.base_url))
                .json(&EmbeddingRequest {
                    model: self.model.clone(),
                    input: texts,
                });
            if let Some(key) = &self.api_key {
                req = req.bearer_auth(key);
            }

            let resp = req.send().await.map_err(|e| {
                WeftError::Knowledge(format!("embedding request to {} failed: {}", self.base_url, e))
            })?;
            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(WeftError::Knowledge(format!(
                    "embedding model '{}' answered {}: {}",
                    self.model, status, body
                )));
            }

            let body: EmbeddingResponse = resp
                .json()
                .await
                .map_err(|e| WeftError::Knowledge(format!("unreadable embedding response: {}", e)))?;
            debug!(model = %self.model, texts = count, "Embedded texts");
            vectors_in_input_order(body, count)
        })
    }

    fn dimensions(&self) -> usize {
        self.dims
    }
}

/// Cosine similarity of two vectors; 0.0 when lengths differ or either is zero.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let (dot, norm_a, norm_b) = a
        .iter()
        .zip(b)
        .fold((0.0f32, 0.0f32, 0.0f32), |(dot, na, nb), (x, y)| {
            (dot + x * y, na + x * x, nb + y * y)
        });
    let denom = (norm_a * norm_b).sqrt();
    if denom == 0.0 {
        0.0
    } else {
        dot / denom
    }
}

/// Little-endian f32 blob, the on-disk embedding format.
pub(crate) fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|f| f.to_le_bytes()).collect()
}

pub(crate) fn decode_vector(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity_identical() {
        let sim = cosine_similarity(&[1.0, 0.0, 0.0], &[1.0, 0.0, 0.0]);
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let sim = cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]);
        assert!(sim.abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_mismatched_lengths() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn test_vector_blob_layout() {
        let blob = encode_vector(&[0.5, -2.0]);
        assert_eq!(blob.len(), 8);
        assert_eq!(decode_vector(&blob), vec![0.5, -2.0]);
    }

    #[test]
    fn test_response_reordered_by_index() {
        let response: EmbeddingResponse = serde_json::from_str(
            r#"{"data": [
                {"index": 1, "embedding": [0.0, 1.0]},
                {"index": 0, "embedding": [1.0, 0.0]}
            ]}"#,
        )
        .unwrap();
        let vectors = vectors_in_input_order(response, 2).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn test_response_count_must_match_input() {
        let response: EmbeddingResponse =
            serde_json::from_str(r#"{"data": [{"embedding": [1.0]}]}"#).unwrap();
        let err = vectors_in_input_order(response, 2).unwrap_err();
        assert!(err.to_string().contains("1 vectors for 2 texts"));

        let repeated: EmbeddingResponse = serde_json::from_str(
            r#"{"data": [{"index": 0, "embedding": [1.0]}, {"index": 0, "embedding": [2.0]}]}"#,
        )
        .unwrap();
        assert!(vectors_in_input_order(repeated, 2).is_err());
    }

    #[test]
    fn test_from_config_needs_url_for_unknown_provider() {
        let config = EmbeddingConfig {
            provider: "custom".into(),
            model: "m".into(),
            base_url: None,
            api_key: None,
            dimensions: 8,
        };
        assert!(HttpEmbeddingProvider::from_config(&config).is_err());

        let config = EmbeddingConfig {
            provider: "ollama".into(),
            ..config
        };
        let provider = HttpEmbeddingProvider::from_config(&config).unwrap();
        assert_eq!(provider.dimensions(), 8);
        assert_eq!(provider.base_url, "http://localhost:11434/v1");
    }
}
