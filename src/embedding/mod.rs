//! Embedding providers for semantic search
//!
//! Backends:
//! - Hashed TF-IDF fallback (no external dependencies)
//! - OpenAI-compatible HTTP API (feature `remote`)

mod tfidf;

#[cfg(feature = "remote")]
mod openai;

pub use tfidf::TfIdfEmbedder;

#[cfg(feature = "remote")]
pub use openai::OpenAiEmbedder;

use std::sync::Arc;

use tracing::warn;

use crate::config::Config;
use crate::error::{MemoryError, Result};

/// Trait for embedding generators
pub trait Embedder: Send + Sync {
    /// Generate embedding for a single text
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embeddings for multiple texts (batch)
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    /// Get embedding dimensions
    fn dimension(&self) -> usize;

    /// Get provider name
    fn name(&self) -> &str;
}

/// Create an embedder from configuration.
pub fn create_embedder(config: &Config) -> Result<Arc<dyn Embedder>> {
    match config.semantic.provider.as_str() {
        "tfidf" => Ok(Arc::new(TfIdfEmbedder::new(config.semantic.dimension))),
        #[cfg(feature = "remote")]
        "openai" => Ok(Arc::new(OpenAiEmbedder::from_config(&config.semantic)?)),
        #[cfg(not(feature = "remote"))]
        "openai" => Err(MemoryError::Config(
            "Embedding provider 'openai' requires the 'remote' feature".into(),
        )),
        other => Err(MemoryError::Config(format!(
            "Unknown embedding provider: {}",
            other
        ))),
    }
}

/// Embedder from config when semantic search is enabled; None disables
/// vector search rather than failing the caller.
pub fn provider_from_config(config: &Config) -> Option<Arc<dyn Embedder>> {
    if !config.semantic.enabled {
        return None;
    }
    match create_embedder(config) {
        Ok(embedder) => Some(embedder),
        Err(err) => {
            warn!(error = %err, "embedding provider unavailable, semantic search disabled");
            None
        }
    }
}

/// Cosine similarity between two vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

/// Cosine distance, as fed to the clustering pipeline.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    1.0 - cosine_similarity(a, b)
}
