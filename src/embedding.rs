//! Embedding service abstraction and implementations.
//!
//! Defines the [`Embedder`] trait and the concrete [`HttpEmbedder`], which
//! calls an OpenAI-style embeddings API with retry and backoff. The
//! retriever receives the embedder as an injected `Arc<dyn Embedder>`
//! handle, so tests can substitute a fake without process-wide state.
//!
//! # Contract
//!
//! `embed` maps text to a vector of exactly [`dims`](Embedder::dims)
//! floats and must be deterministic for identical input within a
//! deployment. The retriever relies on `dims` to build the zero vector
//! used for empty-query searches.
//!
//! # Retry Strategy
//!
//! The HTTP embedder uses exponential backoff for transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::time::Duration;

use crate::config::EmbeddingConfig;

/// Trait for embedding services.
///
/// Implementations must be `Send + Sync`; a single instance is shared by
/// all concurrent pipeline executions.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;
    /// Embed a single text into a vector of [`dims`](Embedder::dims) floats.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Embedding service backed by an OpenAI-style `POST /v1/embeddings` API.
///
/// Requires the API key to be present in the environment variable named
/// by `embedding.api_key_env` at construction time.
pub struct HttpEmbedder {
    endpoint: String,
    model: String,
    dims: usize,
    api_key: String,
    max_retries: u32,
    timeout: Duration,
}

impl HttpEmbedder {
    /// Create a new HTTP embedder from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if `model` or `dims` is not set in config, or if
    /// the configured API key environment variable is not set.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for HTTP embedder"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for HTTP embedder"))?;

        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| anyhow::anyhow!("{} environment variable not set", config.api_key_env))?;

        Ok(Self {
            endpoint: config.endpoint.clone(),
            model,
            dims,
            api_key,
            max_retries: config.max_retries,
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let client = reqwest::Client::builder().timeout(self.timeout).build()?;

        let body = serde_json::json!({
            "model": self.model,
            "input": [text],
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, 8s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = client
                .post(&self.endpoint)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        return parse_embedding_response(&json);
                    }

                    // Rate limited or server error — retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err = Some(anyhow::anyhow!(
                            "Embedding API error {}: {}",
                            status,
                            body_text
                        ));
                        continue;
                    }

                    // Client error (not 429) — don't retry
                    let body_text = response.text().await.unwrap_or_default();
                    bail!("Embedding API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Embedding failed after retries")))
    }
}

/// Parse an OpenAI-style embeddings API response.
///
/// Extracts the first `data[].embedding` array.
fn parse_embedding_response(json: &serde_json::Value) -> Result<Vec<f32>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid embedding response: missing data array"))?;

    let embedding = data
        .first()
        .and_then(|item| item.get("embedding"))
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid embedding response: missing embedding"))?;

    Ok(embedding
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_embedding_response() {
        let json = serde_json::json!({
            "data": [{"embedding": [0.25, -1.0, 0.5]}]
        });
        let vec = parse_embedding_response(&json).unwrap();
        assert_eq!(vec, vec![0.25, -1.0, 0.5]);
    }

    #[test]
    fn test_parse_embedding_response_missing_data() {
        let json = serde_json::json!({"error": "nope"});
        assert!(parse_embedding_response(&json).is_err());
    }

    #[test]
    fn test_parse_embedding_response_empty_data() {
        let json = serde_json::json!({"data": []});
        assert!(parse_embedding_response(&json).is_err());
    }
}
