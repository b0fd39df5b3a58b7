//! Ollama-compatible HTTP embedding provider (`POST /api/embeddings`).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{check_dimensions, l2_normalize, EmbeddingProvider};
use crate::config::EmbeddingConfig;
use crate::error::{CortexError, Result};

pub struct OllamaEmbeddingProvider {
    http: reqwest::Client,
    url: String,
    model: String,
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

impl OllamaEmbeddingProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| CortexError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            url: format!("{}/api/embeddings", config.url.trim_end_matches('/')),
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let resp = self
            .http
            .post(&self.url)
            .json(&EmbeddingRequest {
                model: &self.model,
                prompt: text,
            })
            .send()
            .await
            .map_err(|e| CortexError::Embedding(format!("request to {} failed: {e}", self.url)))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(CortexError::Embedding(format!("HTTP {status}: {body}")));
        }

        let mut embedding = resp
            .json::<EmbeddingResponse>()
            .await
            .map_err(|e| CortexError::Embedding(format!("malformed response: {e}")))?
            .embedding;

        check_dimensions(&embedding)?;
        l2_normalize(&mut embedding);
        Ok(embedding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::EMBEDDING_DIM;
    use crate::test_http::{post_json, serve, Recorded};

    async fn provider_replying(
        reply: serde_json::Value,
        seen: &Recorded,
    ) -> OllamaEmbeddingProvider {
        let router = post_json(axum::Router::new(), "/api/embeddings", 200, reply, seen);
        let url = serve(router).await;
        OllamaEmbeddingProvider::new(&EmbeddingConfig {
            url,
            ..Default::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn embeds_and_normalizes() {
        let seen = Recorded::default();
        let mut raw = vec![0.0f32; EMBEDDING_DIM];
        raw[0] = 2.0;
        let provider = provider_replying(serde_json::json!({ "embedding": raw }), &seen).await;

        let v = provider.embed("hello").await.unwrap();
        assert_eq!(v.len(), EMBEDDING_DIM);
        assert!((v[0] - 1.0).abs() < 1e-6);

        let body = seen.lock().unwrap()[0].clone();
        assert_eq!(body["model"], "all-minilm");
        assert_eq!(body["prompt"], "hello");
    }

    #[tokio::test]
    async fn wrong_dimension_is_an_error() {
        let seen = Recorded::default();
        let reply = serde_json::json!({ "embedding": [0.1, 0.2] });
        let provider = provider_replying(reply, &seen).await;

        let err = provider.embed("hello").await.unwrap_err();
        assert!(matches!(err, CortexError::Embedding(_)));
    }
}
