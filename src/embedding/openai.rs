//! OpenAI-compatible embedding provider (feature `remote`)
//!
//! Works against any endpoint implementing the `/embeddings` API,
//! including proxies. Credentials come from the environment variable
//! named in the configuration; the key never lands on disk.

use reqwest::blocking::Client;

use crate::config::SemanticConfig;
use crate::embedding::Embedder;
use crate::error::{MemoryError, Result};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "text-embedding-3-small";

/// Batch ceiling accepted by the embeddings endpoint.
const MAX_BATCH: usize = 2048;

pub struct OpenAiEmbedder {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    dimension: usize,
}

impl OpenAiEmbedder {
    pub fn from_config(config: &SemanticConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            MemoryError::Config(format!(
                "API key not found in env var: {}",
                config.api_key_env
            ))
        })?;

        Ok(Self {
            client: Client::new(),
            api_key,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            model: config
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            dimension: config.dimension,
        })
    }

    fn request(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>> {
        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&serde_json::json!({
                "input": inputs,
                "model": self.model,
            }))
            .send()
            .map_err(|err| MemoryError::Embedding(err.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            return Err(MemoryError::Embedding(format!(
                "Embedding API error {}: {}",
                status, body
            )));
        }

        let data: serde_json::Value = response
            .json()
            .map_err(|err| MemoryError::Embedding(err.to_string()))?;
        let embeddings = data["data"]
            .as_array()
            .ok_or_else(|| MemoryError::Embedding("Invalid response format".into()))?
            .iter()
            .map(|item| {
                item["embedding"]
                    .as_array()
                    .map(|arr| {
                        arr.iter()
                            .filter_map(|v| v.as_f64().map(|f| f as f32))
                            .collect()
                    })
                    .unwrap_or_default()
            })
            .collect();

        Ok(embeddings)
    }
}

impl Embedder for OpenAiEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut embeddings = self.request(&[text])?;
        embeddings
            .pop()
            .ok_or_else(|| MemoryError::Embedding("Empty embedding response".into()))
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut all = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(MAX_BATCH) {
            all.extend(self.request(chunk)?);
        }
        Ok(all)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "openai"
    }
}
