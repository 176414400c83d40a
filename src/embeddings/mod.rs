//! Embedding providers for the clustering enrichment.
//!
//! Embeddings convert text into dense vectors that capture semantic
//! meaning. The learning loop embeds agent descriptions and clusters
//! them for observability only; nothing downstream consumes the result.

pub mod cluster;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};

use crate::config::EmbeddingsConfig;

/// Error type for embedding operations.
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("HTTP request failed: {0}")]
    HttpError(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited {
        retry_after: Option<std::time::Duration>,
    },

    #[error("Authentication failed")]
    AuthFailed,
}

impl From<reqwest::Error> for EmbeddingError {
    fn from(e: reqwest::Error) -> Self {
        EmbeddingError::HttpError(e.to_string())
    }
}

/// Trait for embedding providers.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Get the embedding dimension.
    fn dimension(&self) -> usize;

    /// Get the model name.
    fn model_name(&self) -> &str;

    /// Generate embeddings for a batch of texts, one vector per input.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

/// OpenAI embedding provider using the `/v1/embeddings` endpoint.
pub struct OpenAiEmbeddings {
    client: reqwest::Client,
    config: EmbeddingsConfig,
}

impl OpenAiEmbeddings {
    /// Create a new OpenAI embedding provider.
    pub fn new(config: EmbeddingsConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    /// Endpoint URL from the configured base, normalizing a trailing
    /// slash or `/v1` suffix so both spellings of a base URL work.
    fn api_url(&self) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        let base = base.strip_suffix("/v1").unwrap_or(base);
        format!("{base}/v1/embeddings")
    }
}

#[derive(Debug, Serialize)]
struct OpenAiEmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbeddingResponse {
    data: Vec<OpenAiEmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbeddingData {
    embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddings {
    fn dimension(&self) -> usize {
        self.config.dimension
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = OpenAiEmbeddingRequest {
            model: &self.config.model,
            input: texts,
        };

        let mut builder = self.client.post(self.api_url()).json(&request);
        if let Some(key) = self.config.api_key.as_ref() {
            builder = builder.header("Authorization", format!("Bearer {}", key.expose_secret()));
        }

        let response = builder.send().await?;
        let status = response.status();

        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(EmbeddingError::AuthFailed);
        }

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .map(std::time::Duration::from_secs);
            return Err(EmbeddingError::RateLimited { retry_after });
        }

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::HttpError(format!(
                "Status {}: {}",
                status, error_text
            )));
        }

        let result: OpenAiEmbeddingResponse = response.json().await.map_err(|e| {
            EmbeddingError::InvalidResponse(format!("Failed to parse response: {}", e))
        })?;

        Ok(result.data.into_iter().map(|d| d.embedding).collect())
    }
}

/// A mock embedding provider for testing.
///
/// Generates deterministic unit vectors from a hash of the input text.
pub struct MockEmbeddings {
    dimension: usize,
}

impl MockEmbeddings {
    /// Create a new mock embeddings provider with the given dimension.
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddings {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        "mock-embedding"
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        use std::hash::{Hash, Hasher};

        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            let mut hasher = std::collections::hash_map::DefaultHasher::new();
            text.hash(&mut hasher);
            let mut seed = hasher.finish();

            let mut embedding = Vec::with_capacity(self.dimension);
            for _ in 0..self.dimension {
                // Simple LCG for deterministic pseudo-random values
                seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1);
                let value = (seed as f32 / u64::MAX as f32) * 2.0 - 1.0;
                embedding.push(value);
            }

            // Normalize to unit length
            let magnitude: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
            if magnitude > 0.0 {
                for x in &mut embedding {
                    *x /= magnitude;
                }
            }

            out.push(embedding);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider_with_base(base_url: &str) -> OpenAiEmbeddings {
        OpenAiEmbeddings::new(EmbeddingsConfig {
            base_url: base_url.to_string(),
            model: "text-embedding-3-small".to_string(),
            dimension: 1536,
            api_key: None,
        })
    }

    #[test]
    fn test_api_url_from_configured_base() {
        let provider = provider_with_base("https://openrouter.ai/api");
        assert_eq!(provider.api_url(), "https://openrouter.ai/api/v1/embeddings");

        let provider = provider_with_base("https://api.openai.com");
        assert_eq!(provider.api_url(), "https://api.openai.com/v1/embeddings");
    }

    #[test]
    fn test_api_url_normalizes_trailing_slash_and_v1() {
        let provider = provider_with_base("https://openrouter.ai/api/");
        assert_eq!(provider.api_url(), "https://openrouter.ai/api/v1/embeddings");

        let provider = provider_with_base("https://openrouter.ai/api/v1");
        assert_eq!(provider.api_url(), "https://openrouter.ai/api/v1/embeddings");

        let provider = provider_with_base("http://localhost:8080");
        assert_eq!(provider.api_url(), "http://localhost:8080/v1/embeddings");
    }

    #[tokio::test]
    async fn test_mock_embeddings_normalized() {
        let provider = MockEmbeddings::new(128);

        let embeddings = provider.embed_batch(&["hello world".to_string()]).await.unwrap();
        assert_eq!(embeddings[0].len(), 128);

        let magnitude: f32 = embeddings[0].iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((magnitude - 1.0).abs() < 0.001);
    }

    #[tokio::test]
    async fn test_mock_embeddings_deterministic() {
        let provider = MockEmbeddings::new(64);

        let a = provider.embed_batch(&["test".to_string()]).await.unwrap();
        let b = provider.embed_batch(&["test".to_string()]).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_mock_embeddings_distinct_texts() {
        let provider = MockEmbeddings::new(64);

        let texts = vec!["hello".to_string(), "world".to_string()];
        let embeddings = provider.embed_batch(&texts).await.unwrap();

        assert_eq!(embeddings.len(), 2);
        assert_ne!(embeddings[0], embeddings[1]);
    }

    #[tokio::test]
    async fn test_empty_batch_is_empty() {
        let provider = MockEmbeddings::new(16);
        let embeddings = provider.embed_batch(&[]).await.unwrap();
        assert!(embeddings.is_empty());
    }
}
