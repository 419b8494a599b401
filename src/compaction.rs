//! Memory compaction
//!
//! Replaces dense groups of near-duplicate memories with one
//! LLM-generated summary each. Clustering is DBSCAN over precomputed
//! cosine distances with `eps = 1 - similarity_threshold` and
//! `min_samples = min_cluster_size`; noise points are left alone.
//!
//! Each cluster is replaced independently: create the summary, mirror
//! it, then delete the originals. An LLM failure aborts the run but
//! keeps clusters already replaced, and the report says which ones.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::warn;

use crate::embedding::cosine_distance;
use crate::error::{MemoryError, Result};
use crate::llm::Summarizer;
use crate::store::MemoryStore;
use crate::types::{Category, Memory, SaveMemory, Scope};
use crate::vector::VectorStore;

/// Upper bound on memories examined per scope.
const SCAN_LIMIT: usize = 10_000;

const NOISE: i32 = -1;
const UNVISITED: i32 = -2;

/// A cluster of similar memories to be compacted.
#[derive(Debug, Clone, Default)]
pub struct MemoryCluster {
    pub memories: Vec<Memory>,
    pub embeddings: Vec<Vec<f32>>,
}

impl MemoryCluster {
    pub fn ids(&self) -> Vec<String> {
        self.memories.iter().map(|m| m.id.clone()).collect()
    }

    /// Member contents ordered by creation time, oldest first.
    pub fn contents(&self) -> Vec<String> {
        let mut ordered: Vec<&Memory> = self.memories.iter().collect();
        ordered.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        ordered.iter().map(|m| m.content.clone()).collect()
    }

    pub fn size(&self) -> usize {
        self.memories.len()
    }

    /// Most common category among members; ties resolve to the tied
    /// category seen first in creation order.
    fn dominant_category(&self) -> Category {
        let mut ordered: Vec<&Memory> = self.memories.iter().collect();
        ordered.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        let mut counts: HashMap<Category, usize> = HashMap::new();
        for memory in &ordered {
            *counts.entry(memory.category).or_insert(0) += 1;
        }

        let best = counts.values().copied().max().unwrap_or(0);
        ordered
            .iter()
            .map(|m| m.category)
            .find(|c| counts.get(c) == Some(&best))
            .unwrap_or_default()
    }
}

/// One successfully replaced cluster.
#[derive(Debug, Clone)]
pub struct CompactedCluster {
    pub memory: Memory,
    pub replaced_ids: Vec<String>,
}

/// Outcome of a compaction run. `error` is set when an LLM failure
/// aborted the run; clusters in `compacted` were already replaced and
/// stay replaced.
#[derive(Debug, Default)]
pub struct CompactionReport {
    pub clusters_found: usize,
    pub compacted: Vec<CompactedCluster>,
    pub error: Option<String>,
}

/// Dry-run description of discovered clusters.
#[derive(Debug, Clone, Serialize)]
pub struct ClusterSummary {
    pub cluster_count: usize,
    pub total_memories: usize,
    pub avg_cluster_size: f32,
    pub clusters: Vec<ClusterInfo>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClusterInfo {
    pub index: usize,
    pub size: usize,
    pub memory_ids: Vec<String>,
    pub previews: Vec<String>,
}

/// Engine for clustering and compacting similar memories.
pub struct CompactionEngine {
    store: MemoryStore,
    vectors: VectorStore,
    summarizer: Arc<dyn Summarizer>,
}

impl CompactionEngine {
    pub fn new(store: MemoryStore, vectors: VectorStore, summarizer: Arc<dyn Summarizer>) -> Self {
        Self {
            store,
            vectors,
            summarizer,
        }
    }

    /// Find clusters of similar memories. Returns an empty list when
    /// fewer than `min_cluster_size` candidates match the filters.
    pub fn find_clusters(
        &self,
        scope: Option<Scope>,
        category: Option<Category>,
        older_than_days: Option<i64>,
        similarity_threshold: f32,
        min_cluster_size: usize,
    ) -> Result<Vec<MemoryCluster>> {
        let embedder = self.vectors.embedder().ok_or_else(|| {
            MemoryError::Embedding("Compaction requires an embedding provider".into())
        })?;

        let memories = self.candidate_memories(scope, category, older_than_days);
        if memories.len() < min_cluster_size {
            return Ok(Vec::new());
        }

        let contents: Vec<&str> = memories.iter().map(|m| m.content.as_str()).collect();
        let embeddings = embedder.embed_batch(&contents)?;

        let distances = distance_matrix(&embeddings);
        let eps = 1.0 - similarity_threshold;
        let labels = dbscan(&distances, eps, min_cluster_size);

        let mut clusters: HashMap<i32, MemoryCluster> = HashMap::new();
        for (i, label) in labels.iter().enumerate() {
            if *label == NOISE {
                continue;
            }
            let cluster = clusters.entry(*label).or_default();
            cluster.memories.push(memories[i].clone());
            cluster.embeddings.push(embeddings[i].clone());
        }

        // Clusters come back in label order
        let mut ordered: Vec<(i32, MemoryCluster)> = clusters.into_iter().collect();
        ordered.sort_by_key(|(label, _)| *label);
        Ok(ordered
            .into_iter()
            .map(|(_, cluster)| cluster)
            .filter(|cluster| cluster.size() >= min_cluster_size)
            .collect())
    }

    fn candidate_memories(
        &self,
        scope: Option<Scope>,
        category: Option<Category>,
        older_than_days: Option<i64>,
    ) -> Vec<Memory> {
        let scopes: Vec<Scope> = match scope {
            Some(scope) => vec![scope],
            None => Scope::all().to_vec(),
        };
        let cutoff = older_than_days.map(|days| Utc::now() - Duration::days(days));

        let mut memories = Vec::new();
        for scope in scopes {
            let found = match self.store.list(scope, category, false, SCAN_LIMIT, false) {
                Ok(found) => found,
                Err(err) => {
                    warn!(scope = %scope, error = %err, "compaction scan skipped scope");
                    continue;
                }
            };
            memories.extend(found.into_iter().filter(|m| match cutoff {
                Some(cutoff) => m.created_at < cutoff,
                None => true,
            }));
        }
        memories
    }

    /// Generate the LLM summary for a cluster. An error here aborts
    /// the whole run.
    pub fn generate_summary(&self, cluster: &MemoryCluster) -> Result<String> {
        self.summarizer.summarize(&cluster.contents())
    }

    /// Replace one cluster with a single compacted memory: create the
    /// summary row, mirror it, delete the originals.
    pub fn compact_cluster(
        &self,
        cluster: &MemoryCluster,
        summary: &str,
        target_scope: Scope,
        target_groups: &[String],
    ) -> Result<Memory> {
        let category = cluster.dominant_category();
        let groups = if target_scope == Scope::Group {
            target_groups.to_vec()
        } else {
            Vec::new()
        };

        let mut metadata = HashMap::new();
        metadata.insert("compacted_from".to_string(), json!(cluster.ids()));
        metadata.insert("compacted_at".to_string(), json!(Utc::now().to_rfc3339()));
        metadata.insert("original_count".to_string(), json!(cluster.size()));

        let new_memory = self.store.save(SaveMemory {
            content: summary.to_string(),
            category: Some(category),
            scope: target_scope,
            source: "auto_compaction".to_string(),
            metadata,
            groups,
            ..Default::default()
        })?;

        if let Err(err) = self.vectors.add(
            &new_memory.id,
            &new_memory.content,
            new_memory.category,
            target_scope,
            &new_memory.groups,
        ) {
            warn!(memory_id = %new_memory.id, error = %err, "compacted memory vector mirror failed");
        }

        for memory in &cluster.memories {
            if let Err(err) = self.store.delete_by_id(&memory.id) {
                warn!(memory_id = %memory.id, error = %err, "failed to delete compacted original");
            }
            self.vectors.delete(&memory.id, memory.scope);
        }

        Ok(new_memory)
    }

    /// Run the full pipeline: cluster, summarize, replace. An LLM
    /// failure aborts the run; clusters already replaced are kept and
    /// listed in the report.
    #[allow(clippy::too_many_arguments)]
    pub fn compact(
        &self,
        scope: Option<Scope>,
        category: Option<Category>,
        older_than_days: Option<i64>,
        similarity_threshold: f32,
        min_cluster_size: usize,
        target_scope: Scope,
        target_groups: &[String],
    ) -> Result<CompactionReport> {
        let clusters = self.find_clusters(
            scope,
            category,
            older_than_days,
            similarity_threshold,
            min_cluster_size,
        )?;

        let mut report = CompactionReport {
            clusters_found: clusters.len(),
            ..Default::default()
        };

        for cluster in &clusters {
            let summary = match self.generate_summary(cluster) {
                Ok(summary) => summary,
                Err(err) => {
                    report.error = Some(err.to_string());
                    break;
                }
            };
            match self.compact_cluster(cluster, &summary, target_scope, target_groups) {
                Ok(memory) => report.compacted.push(CompactedCluster {
                    memory,
                    replaced_ids: cluster.ids(),
                }),
                Err(err) => {
                    report.error = Some(err.to_string());
                    break;
                }
            }
        }

        Ok(report)
    }

    /// Describe discovered clusters for dry-run display.
    pub fn get_cluster_summary(&self, clusters: &[MemoryCluster]) -> ClusterSummary {
        let total_memories: usize = clusters.iter().map(|c| c.size()).sum();
        let avg_cluster_size = if clusters.is_empty() {
            0.0
        } else {
            total_memories as f32 / clusters.len() as f32
        };

        ClusterSummary {
            cluster_count: clusters.len(),
            total_memories,
            avg_cluster_size,
            clusters: clusters
                .iter()
                .enumerate()
                .map(|(index, cluster)| ClusterInfo {
                    index,
                    size: cluster.size(),
                    memory_ids: cluster.ids(),
                    previews: cluster
                        .memories
                        .iter()
                        .map(|m| crate::types::truncate_text(&m.content, 80))
                        .collect(),
                })
                .collect(),
        }
    }
}

fn distance_matrix(embeddings: &[Vec<f32>]) -> Vec<Vec<f32>> {
    let n = embeddings.len();
    let mut matrix = vec![vec![0.0_f32; n]; n];
    for i in 0..n {
        for j in (i + 1)..n {
            let d = cosine_distance(&embeddings[i], &embeddings[j]);
            matrix[i][j] = d;
            matrix[j][i] = d;
        }
    }
    matrix
}

/// DBSCAN over a precomputed distance matrix. A point's neighborhood
/// includes itself, matching the usual `min_samples` semantics. Noise
/// points get label -1.
fn dbscan(distances: &[Vec<f32>], eps: f32, min_samples: usize) -> Vec<i32> {
    let n = distances.len();
    let mut labels = vec![UNVISITED; n];
    let mut cluster = 0;

    for i in 0..n {
        if labels[i] != UNVISITED {
            continue;
        }

        let neighbors = region_query(distances, i, eps);
        if neighbors.len() < min_samples {
            labels[i] = NOISE;
            continue;
        }

        labels[i] = cluster;
        let mut queue: VecDeque<usize> = neighbors.into_iter().collect();
        while let Some(j) = queue.pop_front() {
            if labels[j] == NOISE {
                // Border point reached from a core point
                labels[j] = cluster;
            }
            if labels[j] != UNVISITED {
                continue;
            }
            labels[j] = cluster;

            let j_neighbors = region_query(distances, j, eps);
            if j_neighbors.len() >= min_samples {
                queue.extend(j_neighbors);
            }
        }

        cluster += 1;
    }

    labels
}

fn region_query(distances: &[Vec<f32>], point: usize, eps: f32) -> Vec<usize> {
    distances[point]
        .iter()
        .enumerate()
        .filter(|(_, d)| **d <= eps)
        .map(|(j, _)| j)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_config;
    use crate::embedding::TfIdfEmbedder;
    use tempfile::TempDir;

    struct MockSummarizer {
        response: std::result::Result<String, String>,
    }

    impl Summarizer for MockSummarizer {
        fn summarize(&self, _memories: &[String]) -> Result<String> {
            match &self.response {
                Ok(text) => Ok(text.clone()),
                Err(message) => Err(MemoryError::Llm(message.clone())),
            }
        }

        fn extract_patterns(&self, _content: &str) -> Vec<crate::llm::ErrorPattern> {
            Vec::new()
        }
    }

    struct Fixture {
        _base: TempDir,
        _project: TempDir,
        store: MemoryStore,
        vectors: VectorStore,
    }

    fn fixture() -> Fixture {
        let base = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();
        let config = load_config(Some(base.path().to_path_buf())).unwrap();
        let store = MemoryStore::new(config.clone(), Some(project.path().to_path_buf()));
        let vectors = VectorStore::new(
            config,
            Some(project.path().to_path_buf()),
            Some(Arc::new(TfIdfEmbedder::new(128))),
        );
        Fixture {
            _base: base,
            _project: project,
            store,
            vectors,
        }
    }

    fn engine(f: &Fixture, response: std::result::Result<&str, &str>) -> CompactionEngine {
        CompactionEngine::new(
            f.store.clone(),
            f.vectors.clone(),
            Arc::new(MockSummarizer {
                response: response.map(String::from).map_err(String::from),
            }),
        )
    }

    fn save(store: &MemoryStore, content: &str) -> Memory {
        store.save(SaveMemory::new(content)).unwrap()
    }

    #[test]
    fn test_dbscan_groups_tight_points() {
        // Three coincident points and one far away
        let embeddings = vec![
            vec![1.0, 0.0],
            vec![1.0, 0.0],
            vec![1.0, 0.0],
            vec![0.0, 1.0],
        ];
        let distances = distance_matrix(&embeddings);
        let labels = dbscan(&distances, 0.15, 3);

        assert_eq!(labels[0], labels[1]);
        assert_eq!(labels[1], labels[2]);
        assert_ne!(labels[0], NOISE);
        assert_eq!(labels[3], NOISE);
    }

    #[test]
    fn test_dbscan_all_noise_below_min_samples() {
        let embeddings = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
        let distances = distance_matrix(&embeddings);
        let labels = dbscan(&distances, 0.15, 3);
        assert!(labels.iter().all(|l| *l == NOISE));
    }

    #[test]
    fn test_too_few_candidates_yields_no_clusters() {
        let f = fixture();
        save(&f.store, "only one note");
        let engine = engine(&f, Ok("summary"));

        let clusters = engine
            .find_clusters(Some(Scope::Project), None, None, 0.85, 3)
            .unwrap();
        assert!(clusters.is_empty());
    }

    #[test]
    fn test_compact_replaces_cluster() {
        let f = fixture();
        let duplicate = "Team prefers rebasing over merge commits";
        let a = save(&f.store, duplicate);
        let b = save(&f.store, duplicate);
        let c = save(&f.store, duplicate);
        let outlier = save(&f.store, "The build cache lives on the CI volume");

        for m in [&a, &b, &c, &outlier] {
            f.vectors
                .add(&m.id, &m.content, m.category, Scope::Project, &[])
                .unwrap();
        }

        let engine = engine(&f, Ok("Consolidated: the team rebases instead of merging"));
        let report = engine
            .compact(Some(Scope::Project), None, None, 0.85, 3, Scope::Project, &[])
            .unwrap();

        assert_eq!(report.clusters_found, 1);
        assert_eq!(report.compacted.len(), 1);
        assert!(report.error.is_none());

        let compacted = &report.compacted[0];
        assert_eq!(compacted.replaced_ids.len(), 3);

        let stored = f.store.get_by_id(&compacted.memory.id).unwrap().unwrap();
        assert_eq!(stored.source, "auto_compaction");
        assert_eq!(
            stored.content,
            "Consolidated: the team rebases instead of merging"
        );
        let from = stored.metadata.get("compacted_from").unwrap();
        for id in [&a.id, &b.id, &c.id] {
            assert!(from.as_array().unwrap().iter().any(|v| v.as_str() == Some(id)));
            // Originals are gone from both stores
            assert!(f.store.get_by_id(id).unwrap().is_none());
        }
        assert_eq!(
            stored.metadata.get("original_count").and_then(|v| v.as_i64()),
            Some(3)
        );

        // Outlier untouched
        assert!(f.store.get_by_id(&outlier.id).unwrap().is_some());
        // Vector store holds the outlier plus the new summary
        assert_eq!(f.vectors.count(Scope::Project), 2);
    }

    #[test]
    fn test_llm_failure_aborts_without_partial_deletes() {
        let f = fixture();
        let duplicate = "Deploys happen from the release branch";
        let ids: Vec<String> = (0..3).map(|_| save(&f.store, duplicate).id).collect();

        let engine = engine(&f, Err("model unavailable"));
        let report = engine
            .compact(Some(Scope::Project), None, None, 0.85, 3, Scope::Project, &[])
            .unwrap();

        assert_eq!(report.clusters_found, 1);
        assert!(report.compacted.is_empty());
        assert!(report.error.as_deref().unwrap().contains("model unavailable"));

        // Nothing was deleted
        for id in &ids {
            assert!(f.store.get_by_id(id).unwrap().is_some());
        }
    }

    #[test]
    fn test_dominant_category_tie_break() {
        let f = fixture();
        let older = save(&f.store, "Chose tabs for indentation");
        std::thread::sleep(std::time::Duration::from_millis(5));
        let newer = save(&f.store, "The linter runs in CI");

        let cluster = MemoryCluster {
            memories: vec![newer, older],
            embeddings: Vec::new(),
        };
        // One decision, one factual; the older member wins the tie
        assert_eq!(cluster.dominant_category(), Category::Decision);
    }
}
