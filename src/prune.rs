//! Memory pruning
//!
//! Rule-based cleanup without summarization: select candidates by age,
//! access history, and category, then delete them from both the SQL
//! store and the vector mirror. Pinned memories are kept unless the
//! caller overrides.

use std::collections::HashMap;

use chrono::{Duration, Utc};
use serde::Serialize;
use tracing::warn;

use crate::store::MemoryStore;
use crate::types::{Category, Memory, Scope};
use crate::vector::VectorStore;

/// Upper bound on memories examined per scope.
const SCAN_LIMIT: usize = 10_000;

/// Filters for candidate selection.
#[derive(Debug, Clone, Default)]
pub struct PruneFilter {
    /// Limit to one scope; None checks all three
    pub scope: Option<Scope>,
    /// Only memories older than this many days
    pub older_than_days: Option<i64>,
    /// Only memories never returned to a caller
    pub never_accessed: bool,
    /// Limit to one category
    pub category: Option<Category>,
    /// Keep pinned memories (default true)
    pub exclude_pinned: bool,
}

impl PruneFilter {
    pub fn new() -> Self {
        Self {
            exclude_pinned: true,
            ..Default::default()
        }
    }
}

/// A memory identified for pruning.
#[derive(Debug, Clone)]
pub struct PruneCandidate {
    pub memory: Memory,
    /// e.g. ["older than 90d", "never accessed"]
    pub reasons: Vec<String>,
}

/// Dry-run summary of what would be pruned.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PruneSummary {
    pub total: usize,
    pub by_scope: HashMap<String, usize>,
    pub by_category: HashMap<String, usize>,
    pub by_reason: HashMap<String, usize>,
}

/// Engine for identifying and removing old or unused memories.
pub struct PruningEngine {
    store: MemoryStore,
    vectors: Option<VectorStore>,
}

impl PruningEngine {
    pub fn new(store: MemoryStore, vectors: Option<VectorStore>) -> Self {
        Self { store, vectors }
    }

    /// Find memories matching the filter. When both an age and an
    /// access condition are given, both must hold; otherwise any given
    /// condition suffices.
    pub fn find_candidates(&self, filter: &PruneFilter) -> Vec<PruneCandidate> {
        let now = Utc::now();
        let scopes: Vec<Scope> = match filter.scope {
            Some(scope) => vec![scope],
            None => Scope::all().to_vec(),
        };

        let mut candidates = Vec::new();
        for scope in scopes {
            let memories = match self
                .store
                .list(scope, filter.category, false, SCAN_LIMIT, false)
            {
                Ok(memories) => memories,
                Err(err) => {
                    warn!(scope = %scope, error = %err, "prune scan skipped scope");
                    continue;
                }
            };

            for memory in memories {
                if filter.exclude_pinned && memory.pinned {
                    continue;
                }

                let mut reasons = Vec::new();
                if let Some(days) = filter.older_than_days {
                    if now - memory.created_at >= Duration::days(days) {
                        reasons.push(format!("older than {}d", days));
                    }
                }
                if filter.never_accessed && memory.access_count == 0 {
                    reasons.push("never accessed".to_string());
                }

                let qualifies = if filter.older_than_days.is_some() && filter.never_accessed {
                    reasons.len() >= 2
                } else {
                    !reasons.is_empty()
                };
                if qualifies {
                    candidates.push(PruneCandidate { memory, reasons });
                }
            }
        }

        candidates
    }

    /// Delete the given candidates from both stores. A failed vector
    /// delete is reported but does not abort the batch.
    pub fn prune(&self, candidates: &[PruneCandidate]) -> usize {
        let mut deleted = 0;

        for candidate in candidates {
            let memory = &candidate.memory;
            match self.store.delete_by_id(&memory.id) {
                Ok(true) => {
                    deleted += 1;
                    if let Some(vectors) = &self.vectors {
                        if !vectors.delete(&memory.id, memory.scope) {
                            warn!(memory_id = %memory.id, "vector mirror not removed during prune");
                        }
                    }
                }
                Ok(false) => {}
                Err(err) => {
                    warn!(memory_id = %memory.id, error = %err, "prune delete failed");
                }
            }
        }

        deleted
    }

    /// Summarize candidates by scope, category, and reason for dry-run
    /// display.
    pub fn get_prune_summary(&self, candidates: &[PruneCandidate]) -> PruneSummary {
        let mut summary = PruneSummary {
            total: candidates.len(),
            ..Default::default()
        };

        for candidate in candidates {
            let memory = &candidate.memory;
            *summary
                .by_scope
                .entry(memory.scope.as_str().to_string())
                .or_insert(0) += 1;
            *summary
                .by_category
                .entry(memory.category.as_str().to_string())
                .or_insert(0) += 1;
            for reason in &candidate.reasons {
                *summary.by_reason.entry(reason.clone()).or_insert(0) += 1;
            }
        }

        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_config;
    use crate::embedding::TfIdfEmbedder;
    use crate::types::SaveMemory;
    use std::sync::Arc;
    use tempfile::TempDir;

    struct Fixture {
        _base: TempDir,
        _project: TempDir,
        store: MemoryStore,
        vectors: VectorStore,
        engine: PruningEngine,
    }

    fn fixture() -> Fixture {
        let base = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();
        let config = load_config(Some(base.path().to_path_buf())).unwrap();
        let store = MemoryStore::new(config.clone(), Some(project.path().to_path_buf()));
        let vectors = VectorStore::new(
            config,
            Some(project.path().to_path_buf()),
            Some(Arc::new(TfIdfEmbedder::new(64))),
        );
        let engine = PruningEngine::new(store.clone(), Some(vectors.clone()));
        Fixture {
            _base: base,
            _project: project,
            store,
            vectors,
            engine,
        }
    }

    fn save(store: &MemoryStore, content: &str, pinned: bool) -> Memory {
        store
            .save(SaveMemory {
                content: content.to_string(),
                pinned,
                ..Default::default()
            })
            .unwrap()
    }

    #[test]
    fn test_never_accessed_filter() {
        let f = fixture();
        let untouched = save(&f.store, "never read", false);
        let read = save(&f.store, "frequently read", false);
        f.store.record_access(&read.id, Scope::Project);

        let filter = PruneFilter {
            never_accessed: true,
            ..PruneFilter::new()
        };
        let candidates = f.engine.find_candidates(&filter);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].memory.id, untouched.id);
        assert_eq!(candidates[0].reasons, vec!["never accessed"]);
    }

    #[test]
    fn test_pinned_excluded_unless_overridden() {
        let f = fixture();
        save(&f.store, "pinned but unread", true);
        save(&f.store, "unpinned and unread", false);

        let filter = PruneFilter {
            never_accessed: true,
            ..PruneFilter::new()
        };
        assert_eq!(f.engine.find_candidates(&filter).len(), 1);

        let override_filter = PruneFilter {
            never_accessed: true,
            exclude_pinned: false,
            ..Default::default()
        };
        assert_eq!(f.engine.find_candidates(&override_filter).len(), 2);
    }

    #[test]
    fn test_both_conditions_must_hold_when_both_given() {
        let f = fixture();
        // Recent and never accessed: fails the age condition
        save(&f.store, "new but unread", false);

        let filter = PruneFilter {
            older_than_days: Some(30),
            never_accessed: true,
            ..PruneFilter::new()
        };
        assert!(f.engine.find_candidates(&filter).is_empty());

        // With only the access condition it qualifies
        let access_only = PruneFilter {
            never_accessed: true,
            ..PruneFilter::new()
        };
        assert_eq!(f.engine.find_candidates(&access_only).len(), 1);
    }

    #[test]
    fn test_prune_removes_sql_and_vector_rows() {
        let f = fixture();
        let memory = save(&f.store, "prune target", false);
        f.vectors
            .add(&memory.id, &memory.content, memory.category, Scope::Project, &[])
            .unwrap();
        assert_eq!(f.vectors.count(Scope::Project), 1);

        let filter = PruneFilter {
            never_accessed: true,
            ..PruneFilter::new()
        };
        let candidates = f.engine.find_candidates(&filter);
        assert_eq!(f.engine.prune(&candidates), 1);

        assert!(f.store.get_by_id(&memory.id).unwrap().is_none());
        assert_eq!(f.vectors.count(Scope::Project), 0);

        // Pruning the same candidates again deletes nothing
        assert_eq!(f.engine.prune(&candidates), 0);
    }

    #[test]
    fn test_prune_summary_counts() {
        let f = fixture();
        save(&f.store, "alpha", false);
        save(&f.store, "beta", false);

        let filter = PruneFilter {
            never_accessed: true,
            ..PruneFilter::new()
        };
        let candidates = f.engine.find_candidates(&filter);
        let summary = f.engine.get_prune_summary(&candidates);

        assert_eq!(summary.total, 2);
        assert_eq!(summary.by_scope.get("project"), Some(&2));
        assert_eq!(summary.by_reason.get("never accessed"), Some(&2));
    }
}
