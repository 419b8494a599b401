//! Retrieval, compaction, and pruning exercised together
//!
//! Runs the hybrid retrieval path and the two lifecycle engines
//! offline: the deterministic TF-IDF embedder stands in for a remote
//! provider and a scripted summarizer stands in for the LLM.

use std::sync::Arc;

use pretty_assertions::assert_eq;
use tempfile::TempDir;

use mnemon::compaction::CompactionEngine;
use mnemon::config::{load_config, Config};
use mnemon::embedding::TfIdfEmbedder;
use mnemon::error::{MemoryError, Result};
use mnemon::events::EventLog;
use mnemon::llm::{ErrorPattern, Summarizer};
use mnemon::prune::{PruneFilter, PruningEngine};
use mnemon::relevance::RelevanceEngine;
use mnemon::store::MemoryStore;
use mnemon::types::{SaveMemory, Scope};
use mnemon::vector::VectorStore;

struct ScriptedSummarizer {
    response: std::result::Result<String, String>,
}

impl Summarizer for ScriptedSummarizer {
    fn summarize(&self, _memories: &[String]) -> Result<String> {
        match &self.response {
            Ok(text) => Ok(text.clone()),
            Err(message) => Err(MemoryError::Llm(message.clone())),
        }
    }

    fn extract_patterns(&self, _content: &str) -> Vec<ErrorPattern> {
        Vec::new()
    }
}

struct World {
    _base: TempDir,
    _project: TempDir,
    config: Config,
    store: MemoryStore,
    vectors: VectorStore,
}

impl World {
    fn new() -> Self {
        let base = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();
        let config = load_config(Some(base.path().to_path_buf())).unwrap();
        let store = MemoryStore::new(config.clone(), Some(project.path().to_path_buf()));
        let vectors = VectorStore::new(
            config.clone(),
            Some(project.path().to_path_buf()),
            Some(Arc::new(TfIdfEmbedder::new(128))),
        );
        Self {
            _base: base,
            _project: project,
            config,
            store,
            vectors,
        }
    }

    fn save_mirrored(&self, content: &str) -> mnemon::types::Memory {
        let memory = self.store.save(SaveMemory::new(content)).unwrap();
        self.vectors
            .add(&memory.id, &memory.content, memory.category, Scope::Project, &[])
            .unwrap();
        memory
    }
}

#[test]
fn semantic_search_finds_mirrored_memories() {
    let world = World::new();
    let target = world.save_mirrored("connection pool exhaustion under load");
    world.save_mirrored("standup notes from tuesday");

    let results = world
        .vectors
        .search(
            "connection pool exhaustion under load",
            Scope::Project,
            5,
            Some(0.5),
            None,
            None,
            false,
        )
        .unwrap();
    assert!(!results.is_empty());
    assert_eq!(results[0].memory_id, target.id);
}

#[test]
fn missing_vector_degrades_search_not_correctness() {
    let world = World::new();
    // Saved without a mirror
    let unmirrored = world
        .store
        .save(SaveMemory::new("tokenizer cache invalidation rules"))
        .unwrap();

    let engine = RelevanceEngine::new(
        world.config.clone(),
        world.store.clone(),
        Some(world.vectors.clone()),
    );
    let relevant = engine.get_relevant_memories("tokenizer cache", None, Some(5), Some(0.5), false);

    // The keyword leg still surfaces it
    assert!(relevant.semantic_results.is_empty());
    assert_eq!(relevant.keyword_results.len(), 1);
    assert_eq!(relevant.keyword_results[0].id, unmirrored.id);
}

#[test]
fn compaction_replaces_duplicates_in_both_stores() {
    let world = World::new();
    let duplicate = "Retries use exponential backoff with jitter";
    let originals: Vec<String> = (0..3)
        .map(|_| world.save_mirrored(duplicate).id)
        .collect();
    let survivor = world.save_mirrored("Release notes are drawn from merged PRs");

    let engine = CompactionEngine::new(
        world.store.clone(),
        world.vectors.clone(),
        Arc::new(ScriptedSummarizer {
            response: Ok("All retries use exponential backoff with jitter".to_string()),
        }),
    );

    let report = engine
        .compact(Some(Scope::Project), None, None, 0.85, 3, Scope::Project, &[])
        .unwrap();
    assert_eq!(report.clusters_found, 1);
    assert_eq!(report.compacted.len(), 1);
    assert!(report.error.is_none());

    let summary = &report.compacted[0].memory;
    assert_eq!(summary.source, "auto_compaction");
    let compacted_from = summary
        .metadata
        .get("compacted_from")
        .and_then(|v| v.as_array())
        .unwrap();
    assert_eq!(compacted_from.len(), 3);

    for id in &originals {
        assert!(world.store.get_by_id(id).unwrap().is_none());
    }
    assert!(world.store.get_by_id(&survivor.id).unwrap().is_some());

    // Vector store: survivor + summary
    assert_eq!(world.vectors.count(Scope::Project), 2);

    // Idempotent across retries: a second run finds nothing to do
    let again = engine
        .compact(Some(Scope::Project), None, None, 0.85, 3, Scope::Project, &[])
        .unwrap();
    assert_eq!(again.clusters_found, 0);
}

#[test]
fn compaction_with_too_few_candidates_is_a_no_op() {
    let world = World::new();
    world.save_mirrored("only memory in the store");

    let engine = CompactionEngine::new(
        world.store.clone(),
        world.vectors.clone(),
        Arc::new(ScriptedSummarizer {
            response: Ok("unused".to_string()),
        }),
    );
    let clusters = engine
        .find_clusters(Some(Scope::Project), None, None, 0.85, 3)
        .unwrap();
    assert!(clusters.is_empty());
}

#[test]
fn llm_failure_keeps_originals_and_reports() {
    let world = World::new();
    let duplicate = "Secrets rotate every ninety days";
    let ids: Vec<String> = (0..3)
        .map(|_| world.save_mirrored(duplicate).id)
        .collect();

    let engine = CompactionEngine::new(
        world.store.clone(),
        world.vectors.clone(),
        Arc::new(ScriptedSummarizer {
            response: Err("provider timeout".to_string()),
        }),
    );
    let report = engine
        .compact(Some(Scope::Project), None, None, 0.85, 3, Scope::Project, &[])
        .unwrap();

    assert!(report.compacted.is_empty());
    assert!(report.error.as_deref().unwrap().contains("provider timeout"));
    for id in &ids {
        assert!(world.store.get_by_id(id).unwrap().is_some());
    }
}

#[test]
fn pruning_respects_access_tracking() {
    let world = World::new();
    let read = world.save_mirrored("frequently used fact");
    let unread = world.save_mirrored("never consulted fact");
    world.store.record_access(&read.id, Scope::Project);

    let engine = PruningEngine::new(world.store.clone(), Some(world.vectors.clone()));
    let filter = PruneFilter {
        never_accessed: true,
        ..PruneFilter::new()
    };
    let candidates = engine.find_candidates(&filter);
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].memory.id, unread.id);

    assert_eq!(engine.prune(&candidates), 1);
    assert!(world.store.get_by_id(&unread.id).unwrap().is_none());
    assert!(world.store.get_by_id(&read.id).unwrap().is_some());
    assert_eq!(world.vectors.count(Scope::Project), 1);
}

#[test]
fn event_log_feeds_usage_analytics() {
    let world = World::new();
    let events = EventLog::new(&world.config);

    events.log("startup", None, None, None, None);
    events.log("search", None, None, Some(2), None);
    events.log("search", None, None, Some(0), None);
    events.log("session", Some("start"), None, None, None);
    events.log("session", Some("summarize"), None, None, None);

    let counts = events.get_command_counts(7);
    assert_eq!(counts.get("search"), Some(&2));
    assert_eq!(counts.get("session summarize"), Some(&1));

    let search = events.get_search_stats(7);
    assert_eq!(search.total_searches, 2);
    assert_eq!(search.zero_result_count, 1);

    let sessions = events.get_session_stats(7);
    assert_eq!(sessions.startup_count, 1);
    assert!((sessions.summarize_rate - 1.0).abs() < 1e-9);
}
