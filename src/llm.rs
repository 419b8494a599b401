//! LLM provider for memory summarization and pattern extraction
//!
//! The core only depends on the `Summarizer` trait; the
//! OpenAI-compatible chat provider behind the `remote` feature is one
//! implementation of it.

use serde::{Deserialize, Serialize};

use std::sync::Arc;

use crate::config::Config;
use crate::error::Result;

#[cfg(feature = "remote")]
use crate::error::MemoryError;

/// An error-fix pattern extracted from session content.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ErrorPattern {
    /// The error message or symptom
    pub error: Option<String>,
    /// The root cause
    pub cause: Option<String>,
    /// How it was fixed
    pub fix: Option<String>,
    /// Where it occurred (file, module, component)
    pub context: Option<String>,
}

/// LLM capability used by compaction and session analysis.
pub trait Summarizer: Send + Sync {
    /// Summarize memory contents (ordered oldest to newest) into one
    /// replacement memory. An error aborts the caller's in-flight
    /// operation.
    fn summarize(&self, memories: &[String]) -> Result<String>;

    /// Extract error-fix patterns from session content. Failures and
    /// unparseable responses yield an empty list.
    fn extract_patterns(&self, content: &str) -> Vec<ErrorPattern>;
}

/// Build the fixed compaction prompt for a cluster's contents, oldest
/// to newest.
pub fn build_compaction_prompt(contents: &[String]) -> String {
    let numbered: Vec<String> = contents
        .iter()
        .enumerate()
        .map(|(i, content)| format!("{}. {}", i + 1, content))
        .collect();

    format!(
        "Summarize the following {count} related memories into a single, comprehensive memory.\n\
         \n\
         Rules:\n\
         - Preserve all key facts, decisions, and important context\n\
         - Be concise but complete\n\
         - Use clear, direct language\n\
         - If memories contradict each other, keep the most recent information\n\
         - Output only the summary, no preamble or explanation\n\
         \n\
         Memories (oldest to newest):\n\
         {memories}\n\
         \n\
         Summary:",
        count = contents.len(),
        memories = numbered.join("\n"),
    )
}

/// Build the pattern-extraction prompt for session content.
pub fn build_extract_patterns_prompt(content: &str) -> String {
    format!(
        "Analyze the following session content and extract any error-fix patterns.\n\
         \n\
         For each pattern found, return a JSON array of objects with these fields:\n\
         - \"error\": The error message or symptom\n\
         - \"cause\": The root cause\n\
         - \"fix\": How it was fixed\n\
         - \"context\": Where it occurred (file, module, component)\n\
         \n\
         Return ONLY a JSON array. If no patterns found, return: []\n\
         \n\
         Session content:\n\
         {content}",
        content = content,
    )
}

/// Parse a pattern-extraction response, tolerating markdown code
/// fences. Anything unparseable is an empty list.
pub fn parse_patterns(raw: &str) -> Vec<ErrorPattern> {
    let text = strip_code_fences(raw);
    serde_json::from_str(text).unwrap_or_default()
}

fn strip_code_fences(raw: &str) -> &str {
    let mut text = raw.trim();
    if let Some(rest) = text.strip_prefix("```") {
        // Drop the fence line, which may carry a language tag
        text = match rest.split_once('\n') {
            Some((_, body)) => body,
            None => rest,
        };
    }
    if let Some(body) = text.trim_end().strip_suffix("```") {
        text = body;
    }
    text.trim()
}

/// OpenAI-compatible chat completion provider (feature `remote`).
#[cfg(feature = "remote")]
pub struct ChatSummarizer {
    client: reqwest::blocking::Client,
    api_key: String,
    base_url: String,
    model: String,
}

#[cfg(feature = "remote")]
impl ChatSummarizer {
    pub fn from_config(config: &Config) -> Result<Self> {
        let api_key = std::env::var(&config.llm.api_key_env).map_err(|_| {
            MemoryError::Config(format!(
                "API key not found in env var: {}",
                config.llm.api_key_env
            ))
        })?;

        Ok(Self {
            client: reqwest::blocking::Client::new(),
            api_key,
            base_url: config
                .llm
                .base_url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            model: config.llm.model.clone(),
        })
    }

    fn complete(&self, prompt: &str) -> Result<String> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&serde_json::json!({
                "model": self.model,
                "max_tokens": 1024,
                "messages": [{"role": "user", "content": prompt}],
            }))
            .send()
            .map_err(|err| MemoryError::Llm(err.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            return Err(MemoryError::Llm(format!(
                "Chat API error {}: {}",
                status, body
            )));
        }

        let data: serde_json::Value = response
            .json()
            .map_err(|err| MemoryError::Llm(err.to_string()))?;
        let text = data["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| MemoryError::Llm("Invalid response format".into()))?;
        Ok(text.trim().to_string())
    }
}

#[cfg(feature = "remote")]
impl Summarizer for ChatSummarizer {
    fn summarize(&self, memories: &[String]) -> Result<String> {
        if memories.is_empty() {
            return Err(MemoryError::InvalidInput("No memories to summarize".into()));
        }
        self.complete(&build_compaction_prompt(memories))
    }

    fn extract_patterns(&self, content: &str) -> Vec<ErrorPattern> {
        if content.is_empty() {
            return Vec::new();
        }
        match self.complete(&build_extract_patterns_prompt(content)) {
            Ok(raw) => parse_patterns(&raw),
            Err(_) => Vec::new(),
        }
    }
}

/// Summarizer from config when one is available; None disables
/// compaction rather than failing the caller.
pub fn summarizer_from_config(config: &Config) -> Option<Arc<dyn Summarizer>> {
    if !config.semantic.enabled {
        return None;
    }
    remote_summarizer(config)
}

#[cfg(feature = "remote")]
fn remote_summarizer(config: &Config) -> Option<Arc<dyn Summarizer>> {
    match ChatSummarizer::from_config(config) {
        Ok(provider) => Some(Arc::new(provider)),
        Err(err) => {
            tracing::warn!(error = %err, "chat provider unavailable");
            None
        }
    }
}

#[cfg(not(feature = "remote"))]
fn remote_summarizer(_config: &Config) -> Option<Arc<dyn Summarizer>> {
    None
}
