//! HTTP inference providers.
//!
//! Both the embedding model and the cross-encoder-style reranker are reached
//! through the same request shape:
//!
//! ```text
//! POST {url}/api/embeddings   {"model": "...", "prompt": "..."}
//! 200 OK                      {"embedding": [0.1, -0.2, ...]}
//! ```
//!
//! Any other status, a malformed body, or a transport error is reported as
//! [`RetrievalError::ProviderUnavailable`]. Providers never retry; that is
//! the caller's decision.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{RetrievalError, RetrievalResult};

/// A remote model that turns a prompt into a vector.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Model identifier sent with every request.
    fn model_name(&self) -> &str;

    async fn embed(&self, prompt: &str) -> RetrievalResult<Vec<f32>>;
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

/// Provider speaking the Ollama `/api/embeddings` protocol.
///
/// Owns one `reqwest::Client` for its whole lifetime; connections are pooled
/// and released when the provider is dropped.
pub struct OllamaProvider {
    client: reqwest::Client,
    endpoint: String,
    model: String,
}

impl OllamaProvider {
    pub fn new(url: &str, model: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/api/embeddings", url.trim_end_matches('/')),
            model: model.to_string(),
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, prompt: &str) -> RetrievalResult<Vec<f32>> {
        let body = EmbeddingRequest {
            model: &self.model,
            prompt,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RetrievalError::ProviderUnavailable(format!(
                        "{} timed out",
                        self.endpoint
                    ))
                } else {
                    RetrievalError::ProviderUnavailable(format!(
                        "connection error (is the provider running at {}?): {}",
                        self.endpoint, e
                    ))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(RetrievalError::ProviderUnavailable(format!(
                "{} returned {}: {}",
                self.model,
                status,
                crate::text::truncate_chars(&text, 200)
            )));
        }

        let parsed: EmbeddingResponse = response.json().await.map_err(|e| {
            RetrievalError::ProviderUnavailable(format!("invalid provider response: {}", e))
        })?;

        if parsed.embedding.is_empty() {
            return Err(RetrievalError::ProviderUnavailable(
                "provider returned an empty embedding".to_string(),
            ));
        }
        Ok(parsed.embedding)
    }
}
