//! Mnemon - persistent memory for AI coding agents
//!
//! Durably records short textual observations tagged with category,
//! scope, and provenance; retrieves them by keyword and vector
//! similarity; organizes them hierarchically across projects; and
//! periodically compacts or prunes its own contents.

pub mod compaction;
pub mod config;
pub mod embedding;
pub mod error;
pub mod events;
pub mod groups;
pub mod hook;
pub mod llm;
pub mod paths;
pub mod prune;
pub mod relevance;
pub mod session;
pub mod store;
pub mod types;
pub mod vector;

pub use error::{MemoryError, Result};
pub use store::MemoryStore;
pub use types::*;
pub use vector::VectorStore;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
