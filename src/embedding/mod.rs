//! Text-to-vector embedding.
//!
//! Embedding computation is delegated to an external model server; this module
//! only defines the [`EmbeddingProvider`] seam and an HTTP implementation for
//! Ollama-compatible endpoints. The provider is created via [`create_provider`].

pub mod ollama;

use async_trait::async_trait;

use crate::error::{CortexError, Result};

/// Number of dimensions in the embedding vectors. The vector index is created with
/// this width, so every provider must produce exactly this many values.
pub const EMBEDDING_DIM: usize = 384;

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text string into an L2-normalized vector.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Create an embedding provider from config.
pub fn create_provider(
    config: &crate::config::EmbeddingConfig,
) -> Result<Box<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "ollama" => Ok(Box::new(ollama::OllamaEmbeddingProvider::new(config)?)),
        other => Err(CortexError::Config(format!(
            "unknown embedding provider: {other}. Supported: ollama"
        ))),
    }
}

/// Scale `v` to unit length in place. Zero vectors are left untouched.
pub fn l2_normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
}

/// Reject vectors the index cannot hold.
pub fn check_dimensions(v: &[f32]) -> Result<()> {
    if v.len() != EMBEDDING_DIM {
        return Err(CortexError::Embedding(format!(
            "expected {EMBEDDING_DIM} dimensions, got {}",
            v.len()
        )));
    }
    if v.iter().any(|x| !x.is_finite()) {
        return Err(CortexError::Embedding("embedding contains non-finite values".into()));
    }
    Ok(())
}
