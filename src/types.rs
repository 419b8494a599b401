//! Core types for mnemon

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};

/// A memory record: one durable observation made by an agent or user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    /// Opaque identifier, `mem_` + 12 lowercase hex chars
    pub id: String,
    /// Main content of the memory
    pub content: String,
    /// Memory category
    pub category: Category,
    /// Visibility tier
    pub scope: Scope,
    /// Absolute project path; set iff scope is project
    pub project_path: Option<String>,
    /// Whether the memory is loaded into startup context
    pub pinned: bool,
    /// Owner group names; non-empty iff scope is group
    #[serde(default)]
    pub groups: Vec<String>,
    /// When the memory was created
    pub created_at: DateTime<Utc>,
    /// When the memory was last updated
    pub updated_at: DateTime<Utc>,
    /// When the memory expires (None = never)
    pub expires_at: Option<DateTime<Utc>>,
    /// Origin of the memory (e.g. "user_explicit", "auto_session")
    pub source: String,
    /// Arbitrary metadata as JSON
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    /// Number of times the memory was returned to a caller
    #[serde(default)]
    pub access_count: i64,
    /// When the memory was last returned to a caller
    pub last_accessed_at: Option<DateTime<Utc>>,
}

impl Memory {
    /// A memory is expired when `expires_at` is set and in the past.
    pub fn is_expired(&self) -> bool {
        is_expired(self.expires_at.as_ref())
    }

    /// Age in whole days.
    pub fn age_days(&self) -> i64 {
        (Utc::now() - self.created_at).num_days()
    }
}

/// Expiry check shared by the stores.
pub fn is_expired(expires_at: Option<&DateTime<Utc>>) -> bool {
    match expires_at {
        Some(at) => Utc::now() > *at,
        None => false,
    }
}

/// Compute an expiration instant from a creation time and a day count.
pub fn calculate_expiration(
    created_at: DateTime<Utc>,
    days: Option<i64>,
) -> Option<DateTime<Utc>> {
    days.map(|d| created_at + Duration::days(d))
}

/// Memory category classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Facts about the codebase, architecture, patterns
    #[default]
    Factual,
    /// User preferences, choices made, rejected options
    Decision,
    /// Completed tasks, what was done
    TaskHistory,
    /// Conversation summaries
    SessionSummary,
}

/// Keyword lists for category auto-detection, checked in order.
const DECISION_KEYWORDS: &[&str] = &[
    "prefer",
    "chose",
    "decided",
    "rejected",
    "instead of",
    "rather than",
    "don't use",
    "always use",
    "never use",
    "should use",
    "shouldn't",
];

const TASK_KEYWORDS: &[&str] = &[
    "completed",
    "implemented",
    "fixed",
    "added",
    "removed",
    "refactored",
    "updated",
    "created",
    "deployed",
    "migrated",
];

const SUMMARY_KEYWORDS: &[&str] = &[
    "session",
    "summary",
    "discussed",
    "covered",
    "worked on",
    "today we",
    "in this session",
];

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Factual => "factual",
            Category::Decision => "decision",
            Category::TaskHistory => "task_history",
            Category::SessionSummary => "session_summary",
        }
    }

    pub fn all() -> &'static [Category] {
        &[
            Category::Factual,
            Category::Decision,
            Category::TaskHistory,
            Category::SessionSummary,
        ]
    }

    /// Human-readable name for display surfaces.
    pub fn display_name(&self) -> &'static str {
        match self {
            Category::Factual => "Factual Knowledge",
            Category::Decision => "Decision",
            Category::TaskHistory => "Task History",
            Category::SessionSummary => "Session Summary",
        }
    }

    /// Auto-detect a category from content using case-insensitive
    /// keyword presence. Decision indicators win over task history,
    /// which wins over session summaries; everything else is factual.
    pub fn detect(content: &str) -> Category {
        let lower = content.to_lowercase();

        if DECISION_KEYWORDS.iter().any(|k| lower.contains(k)) {
            return Category::Decision;
        }
        if TASK_KEYWORDS.iter().any(|k| lower.contains(k)) {
            return Category::TaskHistory;
        }
        if SUMMARY_KEYWORDS.iter().any(|k| lower.contains(k)) {
            return Category::SessionSummary;
        }

        Category::Factual
    }

    /// Resolve a caller-supplied category string, falling back to
    /// auto-detection when it is missing or not a valid category.
    pub fn normalize(requested: Option<&str>, content: &str) -> Category {
        match requested.and_then(|s| s.parse().ok()) {
            Some(category) => category,
            None => Category::detect(content),
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "factual" => Ok(Category::Factual),
            "decision" => Ok(Category::Decision),
            "task_history" => Ok(Category::TaskHistory),
            "session_summary" => Ok(Category::SessionSummary),
            _ => Err(format!("Unknown category: {}", s)),
        }
    }
}

/// Visibility tier for a memory.
///
/// The scope determines which database file holds the row: project
/// memories live in the project file, group and global memories both
/// live in the global file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Private to one project directory
    #[default]
    Project,
    /// Shared among a named set of projects
    Group,
    /// Visible everywhere
    Global,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Project => "project",
            Scope::Group => "group",
            Scope::Global => "global",
        }
    }

    pub fn all() -> &'static [Scope] {
        &[Scope::Project, Scope::Group, Scope::Global]
    }

    /// Group and global rows share the global database file.
    pub fn uses_global_file(&self) -> bool {
        matches!(self, Scope::Group | Scope::Global)
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Scope {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "project" => Ok(Scope::Project),
            "group" => Ok(Scope::Group),
            "global" => Ok(Scope::Global),
            _ => Err(format!("Unknown scope: {}", s)),
        }
    }
}

/// Input for saving a new memory
#[derive(Debug, Clone)]
pub struct SaveMemory {
    pub content: String,
    /// Auto-detected from content when not provided
    pub category: Option<Category>,
    pub scope: Scope,
    pub pinned: bool,
    pub source: String,
    pub metadata: HashMap<String, serde_json::Value>,
    pub expires_at: Option<DateTime<Utc>>,
    /// Required non-empty for group scope
    pub groups: Vec<String>,
}

impl Default for SaveMemory {
    fn default() -> Self {
        Self {
            content: String::new(),
            category: None,
            scope: Scope::Project,
            pinned: false,
            source: "user_explicit".to_string(),
            metadata: HashMap::new(),
            expires_at: None,
            groups: Vec::new(),
        }
    }
}

impl SaveMemory {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }
}

/// Input for updating a memory; `None` fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct UpdateMemory {
    pub content: Option<String>,
    pub category: Option<Category>,
    pub pinned: Option<bool>,
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

impl UpdateMemory {
    pub fn is_empty(&self) -> bool {
        self.content.is_none()
            && self.category.is_none()
            && self.pinned.is_none()
            && self.metadata.is_none()
    }
}

/// Generate a unique memory ID: `mem_` + 12 lowercase hex chars.
pub fn generate_memory_id() -> String {
    format!("mem_{}", random_hex_suffix())
}

/// Generate a unique session ID: `sess_` + 12 lowercase hex chars.
pub fn generate_session_id() -> String {
    format!("sess_{}", random_hex_suffix())
}

fn random_hex_suffix() -> String {
    let mut bytes = [0u8; 6];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Truncate text for display, appending an ellipsis.
pub fn truncate_text(text: &str, max_length: usize) -> String {
    if text.chars().count() <= max_length {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_length.saturating_sub(3)).collect();
    format!("{}...", cut)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_id_format() {
        let id = generate_memory_id();
        assert!(id.starts_with("mem_"));
        assert_eq!(id.len(), 16);
        assert!(id[4..].chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));

        let other = generate_memory_id();
        assert_ne!(id, other);
    }

    #[test]
    fn test_session_id_format() {
        let id = generate_session_id();
        assert!(id.starts_with("sess_"));
        assert_eq!(id.len(), 17);
    }

    #[test]
    fn test_category_detection() {
        assert_eq!(
            Category::detect("User prefers functional components"),
            Category::Decision
        );
        assert_eq!(
            Category::detect("Implemented login feature"),
            Category::TaskHistory
        );
        assert_eq!(
            Category::detect("In this session we debugged the cache"),
            Category::SessionSummary
        );
        assert_eq!(
            Category::detect("The API uses JWT tokens"),
            Category::Factual
        );
    }

    #[test]
    fn test_category_detection_order() {
        // "decided" outranks "implemented" even when both appear
        assert_eq!(
            Category::detect("Decided to keep what we implemented"),
            Category::Decision
        );
    }

    #[test]
    fn test_category_normalize() {
        assert_eq!(
            Category::normalize(Some("decision"), "anything"),
            Category::Decision
        );
        // Invalid strings fall back to auto-detection
        assert_eq!(
            Category::normalize(Some("bogus"), "Fixed the build"),
            Category::TaskHistory
        );
        assert_eq!(
            Category::normalize(None, "The schema uses UUID keys"),
            Category::Factual
        );
    }

    #[test]
    fn test_scope_roundtrip() {
        for scope in Scope::all() {
            assert_eq!(scope.as_str().parse::<Scope>().unwrap(), *scope);
        }
        assert!("workspace".parse::<Scope>().is_err());
    }

    #[test]
    fn test_expiry() {
        assert!(!is_expired(None));
        let past = Utc::now() - Duration::hours(1);
        assert!(is_expired(Some(&past)));
        let future = Utc::now() + Duration::hours(1);
        assert!(!is_expired(Some(&future)));
    }

    #[test]
    fn test_calculate_expiration() {
        let now = Utc::now();
        assert_eq!(calculate_expiration(now, None), None);
        assert_eq!(calculate_expiration(now, Some(30)), Some(now + Duration::days(30)));
    }

    #[test]
    fn test_memory_serde_round_trip() {
        let mut metadata = HashMap::new();
        metadata.insert("ticket".to_string(), serde_json::json!("MEM-7"));

        let memory = Memory {
            id: generate_memory_id(),
            content: "round trip me".to_string(),
            category: Category::Decision,
            scope: Scope::Group,
            project_path: None,
            pinned: true,
            groups: vec!["backend".to_string()],
            created_at: Utc::now(),
            updated_at: Utc::now(),
            expires_at: None,
            source: "user_explicit".to_string(),
            metadata,
            access_count: 3,
            last_accessed_at: Some(Utc::now()),
        };

        let raw = serde_json::to_string(&memory).unwrap();
        let parsed: Memory = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.id, memory.id);
        assert_eq!(parsed.category, memory.category);
        assert_eq!(parsed.scope, memory.scope);
        assert_eq!(parsed.groups, memory.groups);
        assert_eq!(parsed.metadata, memory.metadata);
        assert_eq!(parsed.access_count, memory.access_count);
        assert_eq!(parsed.created_at, memory.created_at);
    }

    #[test]
    fn test_truncate_text() {
        assert_eq!(truncate_text("short", 10), "short");
        assert_eq!(truncate_text("a longer piece of text", 10), "a longe...");
    }
}
