//! Relevance scoring and retrieval
//!
//! Assembles the startup context an agent sees when a session begins
//! and serves hybrid retrieval: vector search first, keyword fill when
//! it comes up short, pinned memories kept separate so callers can
//! treat them differently.

use std::collections::HashSet;
use std::path::Path;

use chrono::{Duration, Utc};
use serde::Serialize;
use tracing::warn;

use crate::config::Config;
use crate::store::MemoryStore;
use crate::types::{Category, Memory, Scope};
use crate::vector::{VectorSearchResult, VectorStore};

/// Context loaded at session start, shaped for the startup JSON
/// consumed by agent runtimes.
#[derive(Debug, Clone, Serialize)]
pub struct StartupContext {
    pub pinned_memories: Vec<Memory>,
    pub group_memories: Vec<Memory>,
    pub has_previous_session: bool,
    pub previous_session_id: Option<String>,
    pub previous_session_summaries: Vec<Memory>,
}

/// Memories relevant to a query, by source.
#[derive(Debug, Clone)]
pub struct RelevantMemories {
    pub semantic_results: Vec<VectorSearchResult>,
    pub keyword_results: Vec<Memory>,
    pub pinned: Vec<Memory>,
}

impl RelevantMemories {
    /// All unique memory ids across the three sources.
    pub fn all_memory_ids(&self) -> HashSet<String> {
        let mut ids: HashSet<String> = self
            .semantic_results
            .iter()
            .map(|r| r.memory_id.clone())
            .collect();
        ids.extend(self.keyword_results.iter().map(|m| m.id.clone()));
        ids.extend(self.pinned.iter().map(|m| m.id.clone()));
        ids
    }
}

/// Engine for determining relevant memories.
pub struct RelevanceEngine {
    config: Config,
    store: MemoryStore,
    vectors: Option<VectorStore>,
}

impl RelevanceEngine {
    pub fn new(config: Config, store: MemoryStore, vectors: Option<VectorStore>) -> Self {
        Self {
            config,
            store,
            vectors,
        }
    }

    /// Assemble the context to load at session start: pinned project
    /// and global memories, group memories per the inclusion rule
    /// (None excludes them, ["all"] keeps every group, any other list
    /// keeps its named groups), and the latest previous-session
    /// summaries from the last 7 days.
    pub fn get_startup_context(
        &self,
        _project_path: &Path,
        include_groups: Option<&[String]>,
    ) -> StartupContext {
        let mut pinned_memories = Vec::new();
        match self.store.list_pinned(Scope::Project) {
            Ok(memories) => pinned_memories.extend(memories),
            Err(err) => warn!(error = %err, "pinned project memories unavailable"),
        }
        match self.store.list_pinned(Scope::Global) {
            Ok(memories) => pinned_memories.extend(memories),
            Err(err) => warn!(error = %err, "pinned global memories unavailable"),
        }

        let group_memories = match include_groups {
            None => Vec::new(),
            Some(names) if names.iter().any(|n| n.eq_ignore_ascii_case("all")) => self
                .store
                .list_by_group(None, false, None, 100)
                .unwrap_or_default(),
            Some(names) => {
                let mut seen = HashSet::new();
                let mut merged = Vec::new();
                for name in names {
                    for memory in self
                        .store
                        .list_by_group(Some(name), false, None, 100)
                        .unwrap_or_default()
                    {
                        if seen.insert(memory.id.clone()) {
                            merged.push(memory);
                        }
                    }
                }
                merged
            }
        };

        let mut has_previous_session = false;
        let mut previous_session_id = None;
        let mut previous_session_summaries = Vec::new();

        match self
            .store
            .list(Scope::Project, Some(Category::SessionSummary), false, 10, false)
        {
            Ok(summaries) => {
                if !summaries.is_empty() {
                    has_previous_session = true;
                    let cutoff = Utc::now() - Duration::days(7);
                    for summary in summaries {
                        if summary.created_at < cutoff {
                            continue;
                        }
                        let session_id = summary
                            .metadata
                            .get("session_id")
                            .and_then(|v| v.as_str())
                            .map(String::from);
                        let Some(session_id) = session_id else {
                            continue;
                        };
                        if previous_session_id.is_none() {
                            previous_session_id = Some(session_id.clone());
                        }
                        if previous_session_id.as_deref() == Some(session_id.as_str()) {
                            previous_session_summaries.push(summary);
                        }
                    }
                }
            }
            Err(err) => warn!(error = %err, "previous session lookup failed"),
        }

        StartupContext {
            pinned_memories,
            group_memories,
            has_previous_session,
            previous_session_id,
            previous_session_summaries,
        }
    }

    /// Get memories relevant to a query. Vector search runs first;
    /// keyword search over project then global fills any shortfall,
    /// deduplicated by id.
    pub fn get_relevant_memories(
        &self,
        query: &str,
        current_files: Option<&[String]>,
        limit: Option<usize>,
        threshold: Option<f32>,
        include_pinned: bool,
    ) -> RelevantMemories {
        let limit = limit.unwrap_or(self.config.relevance.search_limit);

        // File names sharpen the embedding without dragging in content
        let search_context = match current_files {
            Some(files) if !files.is_empty() => {
                let names: Vec<&str> = files
                    .iter()
                    .take(5)
                    .filter_map(|f| Path::new(f).file_name().and_then(|n| n.to_str()))
                    .collect();
                format!("{} {}", query, names.join(" "))
            }
            _ => query.to_string(),
        };

        let mut semantic_results = Vec::new();
        if let Some(vectors) = &self.vectors {
            if vectors.is_enabled() {
                match vectors.search_combined(&search_context, limit, threshold, None, None) {
                    Ok(results) => semantic_results = results,
                    Err(err) => warn!(error = %err, "semantic search failed"),
                }
            }
        }

        let mut keyword_results: Vec<Memory> = Vec::new();
        if semantic_results.len() < limit {
            let remaining = limit - semantic_results.len();
            let semantic_ids: HashSet<&str> = semantic_results
                .iter()
                .map(|r| r.memory_id.as_str())
                .collect();

            match self.store.search_keyword(query, Scope::Project, remaining) {
                Ok(found) => keyword_results.extend(
                    found
                        .into_iter()
                        .filter(|m| !semantic_ids.contains(m.id.as_str())),
                ),
                Err(err) => warn!(error = %err, "project keyword search failed"),
            }

            if self.config.relevance.include_global && keyword_results.len() < remaining {
                let keyword_ids: HashSet<String> =
                    keyword_results.iter().map(|m| m.id.clone()).collect();
                match self.store.search_keyword(
                    query,
                    Scope::Global,
                    remaining - keyword_results.len(),
                ) {
                    Ok(found) => keyword_results.extend(found.into_iter().filter(|m| {
                        !semantic_ids.contains(m.id.as_str()) && !keyword_ids.contains(&m.id)
                    })),
                    Err(err) => warn!(error = %err, "global keyword search failed"),
                }
            }
        }

        let mut pinned = Vec::new();
        if include_pinned {
            pinned.extend(self.store.list_pinned(Scope::Project).unwrap_or_default());
            pinned.extend(self.store.list_pinned(Scope::Global).unwrap_or_default());
        }

        RelevantMemories {
            semantic_results,
            keyword_results,
            pinned,
        }
    }

    /// Decision memories created within the last `days`.
    pub fn get_recent_decisions(&self, days: i64, limit: usize) -> Vec<Memory> {
        let cutoff = Utc::now() - Duration::days(days);
        self.store
            .list(Scope::Project, Some(Category::Decision), false, limit * 2, false)
            .unwrap_or_default()
            .into_iter()
            .filter(|m| m.created_at >= cutoff)
            .take(limit)
            .collect()
    }

    /// Most recent factual memories.
    pub fn get_recent_facts(&self, limit: usize) -> Vec<Memory> {
        self.store
            .list(Scope::Project, Some(Category::Factual), false, limit, false)
            .unwrap_or_default()
    }

    /// Advisory relevance score in [0, 1]: semantic similarity carries
    /// most of the weight, with boosts for pinned memories, decisions,
    /// recency, and literal keyword hits. Not used to reorder vector
    /// results; exposed for callers.
    pub fn score_memory_relevance(
        &self,
        memory: &Memory,
        query: Option<&str>,
        semantic_score: Option<f32>,
    ) -> f32 {
        let mut score = 0.0;

        if let Some(semantic) = semantic_score {
            score = semantic * 0.6;
        }

        if memory.pinned {
            score += 0.3;
        }

        if memory.category == Category::Decision {
            score += 0.1;
        }

        let age_days = memory.age_days();
        if (0..=7).contains(&age_days) {
            score += 0.1 * (1.0 - age_days as f32 / 7.0);
        }

        if let Some(query) = query {
            if memory
                .content
                .to_lowercase()
                .contains(&query.to_lowercase())
            {
                score += 0.2;
            }
        }

        score.min(1.0)
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
        project: TempDir,
        store: MemoryStore,
        engine: RelevanceEngine,
    }

    fn fixture(with_vectors: bool) -> Fixture {
        let base = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();
        let config = load_config(Some(base.path().to_path_buf())).unwrap();
        let store = MemoryStore::new(config.clone(), Some(project.path().to_path_buf()));
        let vectors = with_vectors.then(|| {
            VectorStore::new(
                config.clone(),
                Some(project.path().to_path_buf()),
                Some(Arc::new(TfIdfEmbedder::new(128))),
            )
        });
        let engine = RelevanceEngine::new(config, store.clone(), vectors);
        Fixture {
            _base: base,
            project,
            store,
            engine,
        }
    }

    fn save(store: &MemoryStore, content: &str, scope: Scope, pinned: bool) -> Memory {
        store
            .save(SaveMemory {
                content: content.to_string(),
                scope,
                pinned,
                groups: if scope == Scope::Group {
                    vec!["backend".to_string()]
                } else {
                    Vec::new()
                },
                ..Default::default()
            })
            .unwrap()
    }

    #[test]
    fn test_startup_context_pinned_and_groups() {
        let f = fixture(false);
        save(&f.store, "pinned project note", Scope::Project, true);
        save(&f.store, "pinned global note", Scope::Global, true);
        save(&f.store, "unpinned note", Scope::Project, false);
        save(&f.store, "backend convention", Scope::Group, false);

        let without_groups = f.engine.get_startup_context(f.project.path(), None);
        assert_eq!(without_groups.pinned_memories.len(), 2);
        assert!(without_groups.group_memories.is_empty());
        assert!(!without_groups.has_previous_session);

        let all_groups = f
            .engine
            .get_startup_context(f.project.path(), Some(&["all".to_string()]));
        assert_eq!(all_groups.group_memories.len(), 1);

        let named = f
            .engine
            .get_startup_context(f.project.path(), Some(&["frontend".to_string()]));
        assert!(named.group_memories.is_empty());
    }

    #[test]
    fn test_startup_context_previous_session() {
        let f = fixture(false);
        let mut metadata = std::collections::HashMap::new();
        metadata.insert("session_id".to_string(), serde_json::json!("sess_abcabcabcabc"));
        f.store
            .save(SaveMemory {
                content: "Covered the migration plan".to_string(),
                category: Some(Category::SessionSummary),
                metadata,
                source: "auto_session".to_string(),
                ..Default::default()
            })
            .unwrap();

        let context = f.engine.get_startup_context(f.project.path(), None);
        assert!(context.has_previous_session);
        assert_eq!(
            context.previous_session_id.as_deref(),
            Some("sess_abcabcabcabc")
        );
        assert_eq!(context.previous_session_summaries.len(), 1);
    }

    #[test]
    fn test_relevant_memories_keyword_fallback() {
        let f = fixture(false);
        save(&f.store, "connection pool sizing notes", Scope::Project, false);
        save(&f.store, "pool party planning", Scope::Global, false);

        let relevant = f
            .engine
            .get_relevant_memories("pool", None, Some(5), None, true);
        assert!(relevant.semantic_results.is_empty());
        assert_eq!(relevant.keyword_results.len(), 2);
    }

    #[test]
    fn test_relevant_memories_semantic_then_fill() {
        let f = fixture(true);
        let memory = save(&f.store, "database connection pooling", Scope::Project, false);
        let vectors = VectorStore::new(
            f.store.config().clone(),
            Some(f.project.path().to_path_buf()),
            Some(Arc::new(TfIdfEmbedder::new(128))),
        );
        vectors
            .add(&memory.id, &memory.content, memory.category, Scope::Project, &[])
            .unwrap();

        let relevant = f.engine.get_relevant_memories(
            "database connection pooling",
            None,
            Some(5),
            Some(0.5),
            false,
        );
        assert_eq!(relevant.semantic_results.len(), 1);
        // Keyword fill skips ids already found semantically
        assert!(relevant
            .keyword_results
            .iter()
            .all(|m| m.id != memory.id));
    }

    #[test]
    fn test_score_memory_relevance() {
        let f = fixture(false);
        let pinned = save(&f.store, "Prefer composition over inheritance", Scope::Project, true);

        // Pinned decision saved just now: 0.3 + 0.1 + ~0.1 recency
        let score = f.engine.score_memory_relevance(&pinned, None, None);
        assert!(score > 0.45 && score <= 0.51, "score was {}", score);

        // Keyword hit adds 0.2
        let with_query = f
            .engine
            .score_memory_relevance(&pinned, Some("composition"), None);
        assert!((with_query - score - 0.2).abs() < 1e-6);

        // Semantic similarity dominates and the score is capped at 1
        let full = f
            .engine
            .score_memory_relevance(&pinned, Some("composition"), Some(1.0));
        assert!(full <= 1.0);
    }

    #[test]
    fn test_recent_decisions_and_facts() {
        let f = fixture(false);
        save(&f.store, "Chose SQLite over Postgres for local state", Scope::Project, false);
        save(&f.store, "The scheduler runs every five minutes", Scope::Project, false);

        let decisions = f.engine.get_recent_decisions(30, 5);
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].category, Category::Decision);

        let facts = f.engine.get_recent_facts(5);
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].category, Category::Factual);
    }
}
