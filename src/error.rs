//! Error types for mnemon

use thiserror::Error;

/// Result type alias for mnemon operations
pub type Result<T> = std::result::Result<T, MemoryError>;

/// Main error type for mnemon
#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MemoryError {
    /// Validation errors fail fast; everything else degrades the feature
    /// rather than the user operation.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            MemoryError::InvalidInput(_) | MemoryError::Config(_)
        )
    }
}
