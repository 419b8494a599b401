//! Vector store for semantic search
//!
//! Mirrors memories into a per-scope SQLite vector table. Vectors are
//! stored as little-endian f32 blobs and scanned in process; scores
//! are cosine similarity in [0, 1], computed as 1 - distance. The
//! mirror is best-effort: a missing vector degrades search, never
//! correctness, and the global file holds both global- and
//! group-scoped vectors discriminated by the scope column.

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::{params, Connection};
use serde::Serialize;
use tracing::warn;

use crate::config::Config;
use crate::embedding::{cosine_similarity, provider_from_config, Embedder};
use crate::error::{MemoryError, Result};
use crate::paths;
use crate::types::{Category, Scope};

const TABLE_SQL: &str = "CREATE TABLE IF NOT EXISTS memory_vectors (
    memory_id TEXT PRIMARY KEY,
    content TEXT NOT NULL,
    category TEXT NOT NULL,
    scope TEXT NOT NULL,
    groups TEXT NOT NULL DEFAULT '[]',
    vector BLOB NOT NULL
)";

/// Result from vector similarity search
#[derive(Debug, Clone, Serialize)]
pub struct VectorSearchResult {
    pub memory_id: String,
    pub content: String,
    pub score: f32,
    pub category: Category,
    pub scope: Scope,
    pub groups: Vec<String>,
}

/// An entry queued for batch insertion.
#[derive(Debug, Clone)]
pub struct VectorEntry {
    pub memory_id: String,
    pub content: String,
    pub category: Category,
    pub groups: Vec<String>,
}

/// Per-scope vector index bound to an optional current project.
pub struct VectorStore {
    config: Config,
    project_path: Option<PathBuf>,
    embedder: Option<Arc<dyn Embedder>>,
    global_conn: Arc<Mutex<Option<Connection>>>,
    project_conn: Arc<Mutex<Option<Connection>>>,
}

impl Clone for VectorStore {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            project_path: self.project_path.clone(),
            embedder: self.embedder.clone(),
            global_conn: self.global_conn.clone(),
            project_conn: self.project_conn.clone(),
        }
    }
}

impl VectorStore {
    /// Create a vector store with an injected embedding provider.
    pub fn new(
        config: Config,
        project_path: Option<PathBuf>,
        embedder: Option<Arc<dyn Embedder>>,
    ) -> Self {
        let project_path = project_path.map(|p| paths::resolve_path(&p));
        Self {
            config,
            project_path,
            embedder,
            global_conn: Arc::new(Mutex::new(None)),
            project_conn: Arc::new(Mutex::new(None)),
        }
    }

    /// Create a vector store, loading the provider named in the
    /// configuration. The provider being unavailable disables search
    /// instead of failing.
    pub fn from_config(config: Config, project_path: Option<PathBuf>) -> Self {
        let embedder = provider_from_config(&config);
        Self::new(config, project_path, embedder)
    }

    /// Semantic search is enabled and a provider is available.
    pub fn is_enabled(&self) -> bool {
        self.config.semantic.enabled && self.embedder.is_some()
    }

    pub fn embedder(&self) -> Option<Arc<dyn Embedder>> {
        self.embedder.clone()
    }

    fn with_conn<T>(&self, scope: Scope, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let (handle, dir) = if scope.uses_global_file() {
            (&self.global_conn, self.config.global_path().join("vectors"))
        } else {
            let project = self.project_path.as_ref().ok_or_else(|| {
                MemoryError::InvalidInput("No project path set for project-scoped vectors".into())
            })?;
            let storage = paths::project_storage_dir(&self.config, project)?;
            (&self.project_conn, storage.join("vectors"))
        };

        let mut guard = handle.lock();
        if guard.is_none() {
            std::fs::create_dir_all(&dir)?;
            let conn = Connection::open(dir.join("vectors.db"))?;
            conn.execute_batch(TABLE_SQL)?;
            *guard = Some(conn);
        }
        f(guard.as_ref().expect("connection opened above"))
    }

    /// Add a memory to the vector store. Returns false when semantic
    /// search is disabled. At most one row exists per memory id.
    pub fn add(
        &self,
        memory_id: &str,
        content: &str,
        category: Category,
        scope: Scope,
        groups: &[String],
    ) -> Result<bool> {
        let embedder = match &self.embedder {
            Some(embedder) => embedder,
            None => return Ok(false),
        };

        let vector = embedder.embed(content)?;
        let groups_json = serde_json::to_string(groups)?;

        self.with_conn(scope, |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO memory_vectors \
                 (memory_id, content, category, scope, groups, vector) \
                 VALUES (?, ?, ?, ?, ?, ?)",
                params![
                    memory_id,
                    content,
                    category.as_str(),
                    scope.as_str(),
                    groups_json,
                    vector_to_blob(&vector),
                ],
            )?;
            Ok(())
        })?;
        Ok(true)
    }

    /// Add multiple memories with one embedding call and one write.
    pub fn add_batch(&self, entries: &[VectorEntry], scope: Scope) -> Result<bool> {
        if entries.is_empty() {
            return Ok(true);
        }
        let embedder = match &self.embedder {
            Some(embedder) => embedder,
            None => return Ok(false),
        };

        let contents: Vec<&str> = entries.iter().map(|e| e.content.as_str()).collect();
        let vectors = embedder.embed_batch(&contents)?;

        self.with_conn(scope, |conn| {
            let tx = conn.unchecked_transaction()?;
            {
                let mut stmt = tx.prepare_cached(
                    "INSERT OR REPLACE INTO memory_vectors \
                     (memory_id, content, category, scope, groups, vector) \
                     VALUES (?, ?, ?, ?, ?, ?)",
                )?;
                for (entry, vector) in entries.iter().zip(vectors.iter()) {
                    stmt.execute(params![
                        entry.memory_id,
                        entry.content,
                        entry.category.as_str(),
                        scope.as_str(),
                        serde_json::to_string(&entry.groups)?,
                        vector_to_blob(vector),
                    ])?;
                }
            }
            tx.commit()?;
            Ok(())
        })?;
        Ok(true)
    }

    /// Search for similar memories in one scope's index.
    ///
    /// The query is embedded, the nearest 3x`limit` rows by cosine
    /// distance are kept, the threshold drops weak matches, then the
    /// category and group/scope filters apply before truncating to
    /// `limit`. An embedding failure logs and returns no results.
    #[allow(clippy::too_many_arguments)]
    pub fn search(
        &self,
        query: &str,
        scope: Scope,
        limit: usize,
        threshold: Option<f32>,
        category: Option<Category>,
        include_groups: Option<&[String]>,
        exclude_group_scope: bool,
    ) -> Result<Vec<VectorSearchResult>> {
        let embedder = match &self.embedder {
            Some(embedder) => embedder,
            None => return Ok(Vec::new()),
        };
        let threshold = threshold.unwrap_or(self.config.semantic.threshold);

        let query_vector = match embedder.embed(query) {
            Ok(vector) => vector,
            Err(err) => {
                warn!(error = %err, "query embedding failed, returning no results");
                return Ok(Vec::new());
            }
        };

        let mut scored = self.with_conn(scope, |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT memory_id, content, category, scope, groups, vector FROM memory_vectors",
            )?;
            let rows: Vec<VectorSearchResult> = stmt
                .query_map([], |row| {
                    let category: String = row.get(2)?;
                    let row_scope: String = row.get(3)?;
                    let groups: String = row.get(4)?;
                    let blob: Vec<u8> = row.get(5)?;
                    Ok(VectorSearchResult {
                        memory_id: row.get(0)?,
                        content: row.get(1)?,
                        score: cosine_similarity(&query_vector, &blob_to_vector(&blob)),
                        category: category.parse().unwrap_or_default(),
                        scope: row_scope.parse().unwrap_or_default(),
                        groups: serde_json::from_str(&groups).unwrap_or_default(),
                    })
                })?
                .filter_map(|r| r.ok())
                .collect();
            Ok(rows)
        })?;

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit * 3);
        scored.retain(|r| r.score >= threshold);

        if let Some(category) = category {
            scored.retain(|r| r.category == category);
        }

        if exclude_group_scope {
            scored.retain(|r| r.scope != Scope::Group);
        } else if let Some(names) = include_groups {
            let include_all = names.iter().any(|n| n.eq_ignore_ascii_case("all"));
            if !include_all {
                scored.retain(|r| {
                    r.scope != Scope::Group || r.groups.iter().any(|g| names.contains(g))
                });
            }
        }

        scored.truncate(limit);
        Ok(scored)
    }

    /// Search project and global indexes together.
    ///
    /// The global leg excludes group-scoped rows unless `include_groups`
    /// asks for them: `["all"]` keeps every group row, any other list
    /// keeps rows whose groups intersect it.
    pub fn search_combined(
        &self,
        query: &str,
        limit: usize,
        threshold: Option<f32>,
        category: Option<Category>,
        include_groups: Option<&[String]>,
    ) -> Result<Vec<VectorSearchResult>> {
        let mut results = Vec::new();

        if self.project_path.is_some() {
            match self.search(query, Scope::Project, limit, threshold, category, None, false) {
                Ok(found) => results.extend(found),
                Err(err) => warn!(error = %err, "project vector search failed"),
            }
        }

        if self.config.relevance.include_global {
            let exclude_group_scope = include_groups.is_none();
            match self.search(
                query,
                Scope::Global,
                limit,
                threshold,
                category,
                include_groups,
                exclude_group_scope,
            ) {
                Ok(found) => results.extend(found),
                Err(err) => warn!(error = %err, "global vector search failed"),
            }
        }

        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(limit);
        Ok(results)
    }

    /// Delete a memory's vector. Best-effort.
    pub fn delete(&self, memory_id: &str, scope: Scope) -> bool {
        let result = self.with_conn(scope, |conn| {
            Ok(conn.execute(
                "DELETE FROM memory_vectors WHERE memory_id = ?",
                [memory_id],
            )?)
        });
        match result {
            Ok(removed) => removed > 0,
            Err(err) => {
                warn!(memory_id, error = %err, "vector delete failed");
                false
            }
        }
    }

    /// Delete a memory's vector from both project and global indexes.
    pub fn delete_by_id(&self, memory_id: &str) -> bool {
        let mut deleted = false;
        if self.project_path.is_some() {
            deleted = self.delete(memory_id, Scope::Project) || deleted;
        }
        self.delete(memory_id, Scope::Global) || deleted
    }

    /// Drop and recreate the vector table for a scope.
    pub fn reset(&self, scope: Scope) -> bool {
        let result = self.with_conn(scope, |conn| {
            conn.execute_batch("DROP TABLE IF EXISTS memory_vectors")?;
            conn.execute_batch(TABLE_SQL)?;
            Ok(())
        });
        if let Err(err) = result {
            warn!(error = %err, "vector reset failed");
            return false;
        }
        true
    }

    /// Count vectors in a scope's index.
    pub fn count(&self, scope: Scope) -> i64 {
        self.with_conn(scope, |conn| {
            Ok(conn.query_row("SELECT COUNT(*) FROM memory_vectors", [], |row| row.get(0))?)
        })
        .unwrap_or(0)
    }
}

fn vector_to_blob(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn blob_to_vector(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}
