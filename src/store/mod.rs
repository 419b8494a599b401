//! SQL-backed memory store
//!
//! One database file per scope: project memories live under the
//! project's storage directory, group and global memories share the
//! global file. The store owns lazily opened connections for both and
//! never assumes exclusive ownership of the files.

mod migrations;
mod queries;

use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use tracing::warn;

pub(crate) use queries::{keyword_predicate, list_in_file, memory_from_row, search_in_file, MEMORY_COLUMNS};

use crate::config::Config;
use crate::error::{MemoryError, Result};
use crate::paths;
use crate::types::{generate_memory_id, Category, Memory, SaveMemory, Scope, UpdateMemory};

/// Per-project statistics for the cross-project overview.
#[derive(Debug, Clone, Serialize)]
pub struct ProjectStats {
    pub project_path: PathBuf,
    pub memory_count: i64,
    pub last_updated: Option<chrono::DateTime<Utc>>,
}

/// SQL-backed memory store bound to an optional current project.
pub struct MemoryStore {
    config: Config,
    project_path: Option<PathBuf>,
    global_conn: Arc<Mutex<Option<Connection>>>,
    project_conn: Arc<Mutex<Option<Connection>>>,
    descendants: Arc<Mutex<Option<Vec<(PathBuf, PathBuf)>>>>,
}

impl Clone for MemoryStore {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            project_path: self.project_path.clone(),
            global_conn: self.global_conn.clone(),
            project_conn: self.project_conn.clone(),
            descendants: self.descendants.clone(),
        }
    }
}

impl MemoryStore {
    /// Create a store. Project-scoped operations require a project
    /// path; global and group operations work without one.
    pub fn new(config: Config, project_path: Option<PathBuf>) -> Self {
        let project_path = project_path.map(|p| paths::resolve_path(&p));
        Self {
            config,
            project_path,
            global_conn: Arc::new(Mutex::new(None)),
            project_conn: Arc::new(Mutex::new(None)),
            descendants: Arc::new(Mutex::new(None)),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn project_path(&self) -> Option<&Path> {
        self.project_path.as_deref()
    }

    /// Path to the global database file.
    pub fn global_db_path(&self) -> PathBuf {
        self.config.global_path().join("memories.db")
    }

    /// Run `f` against the connection for a scope, opening it (and
    /// migrating the file) on first use. The guard is released on every
    /// exit path.
    fn with_conn<T>(&self, scope: Scope, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let (handle, db_path) = if scope.uses_global_file() {
            (&self.global_conn, self.global_db_path())
        } else {
            let project = self.project_path.as_ref().ok_or_else(|| {
                MemoryError::InvalidInput("No project path set for project-scoped operation".into())
            })?;
            let storage = paths::project_storage_dir(&self.config, project)?;
            (&self.project_conn, storage.join("memories.db"))
        };

        let mut guard = handle.lock();
        if guard.is_none() {
            if let Some(parent) = db_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let conn = Connection::open(&db_path)?;
            migrations::init_schema(&conn)?;
            *guard = Some(conn);
        }
        f(guard.as_ref().expect("connection opened above"))
    }

    // ──────────────────────────────────────────────────────────
    // CRUD
    // ──────────────────────────────────────────────────────────

    /// Save a new memory, auto-detecting the category when none is
    /// given.
    pub fn save(&self, input: SaveMemory) -> Result<Memory> {
        if input.content.trim().is_empty() {
            return Err(MemoryError::InvalidInput(
                "Memory content cannot be empty".into(),
            ));
        }
        if input.scope == Scope::Group && input.groups.is_empty() {
            return Err(MemoryError::InvalidInput(
                "Group-scoped memories require at least one group".into(),
            ));
        }

        let groups = if input.scope == Scope::Group {
            normalize_groups(&input.groups)
        } else {
            Vec::new()
        };
        let category = input
            .category
            .unwrap_or_else(|| Category::detect(&input.content));
        let now = Utc::now();
        let project_path = match input.scope {
            Scope::Project => self
                .project_path
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
            _ => None,
        };

        let memory = Memory {
            id: generate_memory_id(),
            content: input.content,
            category,
            scope: input.scope,
            project_path,
            pinned: input.pinned,
            groups,
            created_at: now,
            updated_at: now,
            expires_at: input.expires_at,
            source: input.source,
            metadata: input.metadata,
            access_count: 0,
            last_accessed_at: None,
        };

        self.with_conn(input.scope, |conn| insert_memory(conn, &memory))?;
        Ok(memory)
    }

    /// Get a memory by ID from a specific scope's file. Expired
    /// memories are reported as absent.
    pub fn get(&self, id: &str, scope: Scope) -> Result<Option<Memory>> {
        self.with_conn(scope, |conn| {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {} FROM memories WHERE id = ?",
                MEMORY_COLUMNS
            ))?;
            let memory = stmt.query_row([id], memory_from_row).optional()?;
            Ok(memory.filter(|m| !m.is_expired()))
        })
    }

    /// Get a memory by ID, searching the project file first, then the
    /// global file.
    pub fn get_by_id(&self, id: &str) -> Result<Option<Memory>> {
        if self.project_path.is_some() {
            if let Some(memory) = self.get(id, Scope::Project)? {
                return Ok(Some(memory));
            }
        }
        self.get(id, Scope::Global)
    }

    /// List memories in a scope, newest first.
    pub fn list(
        &self,
        scope: Scope,
        category: Option<Category>,
        pinned_only: bool,
        limit: usize,
        include_expired: bool,
    ) -> Result<Vec<Memory>> {
        self.with_conn(scope, |conn| {
            let mut sql = format!(
                "SELECT {} FROM memories WHERE scope = ?",
                MEMORY_COLUMNS
            );
            let mut params: Vec<Box<dyn rusqlite::ToSql>> =
                vec![Box::new(scope.as_str().to_string())];

            if let Some(category) = category {
                sql.push_str(" AND category = ?");
                params.push(Box::new(category.as_str().to_string()));
            }
            if pinned_only {
                sql.push_str(" AND pinned = 1");
            }
            sql.push_str(" ORDER BY created_at DESC LIMIT ?");
            params.push(Box::new(limit as i64));

            let mut stmt = conn.prepare_cached(&sql)?;
            let param_refs: Vec<&dyn rusqlite::ToSql> =
                params.iter().map(|p| p.as_ref()).collect();
            let memories: Vec<Memory> = stmt
                .query_map(param_refs.as_slice(), memory_from_row)?
                .filter_map(|r| r.ok())
                .filter(|m| include_expired || !m.is_expired())
                .collect();
            Ok(memories)
        })
    }

    /// List all pinned memories in a scope.
    pub fn list_pinned(&self, scope: Scope) -> Result<Vec<Memory>> {
        self.list(scope, None, true, 100, false)
    }

    /// List group-scoped memories, optionally filtered to one group.
    /// `None` or `"all"` disables the name filter.
    pub fn list_by_group(
        &self,
        name: Option<&str>,
        pinned_only: bool,
        category: Option<Category>,
        limit: usize,
    ) -> Result<Vec<Memory>> {
        let rows = self.with_conn(Scope::Group, |conn| {
            let mut sql = format!(
                "SELECT {} FROM memories WHERE scope = 'group'",
                MEMORY_COLUMNS
            );
            let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

            if let Some(category) = category {
                sql.push_str(" AND category = ?");
                params.push(Box::new(category.as_str().to_string()));
            }
            if pinned_only {
                sql.push_str(" AND pinned = 1");
            }
            sql.push_str(" ORDER BY created_at DESC");

            let mut stmt = conn.prepare_cached(&sql)?;
            let param_refs: Vec<&dyn rusqlite::ToSql> =
                params.iter().map(|p| p.as_ref()).collect();
            let memories: Vec<Memory> = stmt
                .query_map(param_refs.as_slice(), memory_from_row)?
                .filter_map(|r| r.ok())
                .filter(|m| !m.is_expired())
                .collect();
            Ok(memories)
        })?;

        let filter_name = name.filter(|n| !n.eq_ignore_ascii_case("all"));
        let mut memories: Vec<Memory> = match filter_name {
            Some(name) => rows
                .into_iter()
                .filter(|m| m.groups.iter().any(|g| g == name))
                .collect(),
            None => rows,
        };
        memories.truncate(limit);
        Ok(memories)
    }

    /// Keyword search over content. Multi-term queries split on
    /// whitespace and every term must appear (case-insensitive). Empty
    /// queries return nothing.
    pub fn search_keyword(&self, query: &str, scope: Scope, limit: usize) -> Result<Vec<Memory>> {
        let (clause, terms) = match keyword_predicate(query) {
            Some(built) => built,
            None => return Ok(Vec::new()),
        };

        self.with_conn(scope, |conn| {
            let sql = format!(
                "SELECT {} FROM memories WHERE scope = ? AND {} ORDER BY created_at DESC LIMIT ?",
                MEMORY_COLUMNS, clause
            );
            let mut params: Vec<Box<dyn rusqlite::ToSql>> =
                vec![Box::new(scope.as_str().to_string())];
            params.extend(
                terms
                    .into_iter()
                    .map(|t| Box::new(t) as Box<dyn rusqlite::ToSql>),
            );
            params.push(Box::new(limit as i64));

            let mut stmt = conn.prepare_cached(&sql)?;
            let param_refs: Vec<&dyn rusqlite::ToSql> =
                params.iter().map(|p| p.as_ref()).collect();
            let memories: Vec<Memory> = stmt
                .query_map(param_refs.as_slice(), memory_from_row)?
                .filter_map(|r| r.ok())
                .filter(|m| !m.is_expired())
                .collect();
            Ok(memories)
        })
    }

    /// Keyword search across project, global, and group-scoped rows.
    ///
    /// Group rows follow the inclusion rule: `None` excludes them,
    /// `["all"]` includes every group, any other list keeps rows whose
    /// groups intersect it. Results are deduplicated by id and sorted
    /// newest first.
    pub fn search_with_groups(
        &self,
        query: &str,
        include_project: bool,
        include_global: bool,
        include_groups: Option<&[String]>,
        limit: usize,
    ) -> Result<Vec<Memory>> {
        let mut merged = Vec::new();

        if include_project && self.project_path.is_some() {
            merged.extend(self.search_keyword(query, Scope::Project, limit)?);
        }
        if include_global {
            merged.extend(self.search_keyword(query, Scope::Global, limit)?);
        }
        if let Some(names) = include_groups {
            let include_all = names.iter().any(|n| n.eq_ignore_ascii_case("all"));
            let group_rows = self.search_group_rows(query, limit)?;
            merged.extend(group_rows.into_iter().filter(|m| {
                include_all || m.groups.iter().any(|g| names.contains(g))
            }));
        }

        let mut merged = dedup_by_id(merged);
        merged.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        merged.truncate(limit);
        Ok(merged)
    }

    fn search_group_rows(&self, query: &str, limit: usize) -> Result<Vec<Memory>> {
        let (clause, terms) = match keyword_predicate(query) {
            Some(built) => built,
            None => return Ok(Vec::new()),
        };

        self.with_conn(Scope::Group, |conn| {
            let sql = format!(
                "SELECT {} FROM memories WHERE scope = 'group' AND {} \
                 ORDER BY created_at DESC LIMIT ?",
                MEMORY_COLUMNS, clause
            );
            let mut params: Vec<Box<dyn rusqlite::ToSql>> = terms
                .into_iter()
                .map(|t| Box::new(t) as Box<dyn rusqlite::ToSql>)
                .collect();
            params.push(Box::new(limit as i64));

            let mut stmt = conn.prepare_cached(&sql)?;
            let param_refs: Vec<&dyn rusqlite::ToSql> =
                params.iter().map(|p| p.as_ref()).collect();
            let memories: Vec<Memory> = stmt
                .query_map(param_refs.as_slice(), memory_from_row)?
                .filter_map(|r| r.ok())
                .filter(|m| !m.is_expired())
                .collect();
            Ok(memories)
        })
    }

    /// Update mutable fields on a memory. At least one field must be
    /// provided.
    pub fn update(
        &self,
        id: &str,
        scope: Scope,
        changes: UpdateMemory,
    ) -> Result<Option<Memory>> {
        if changes.is_empty() {
            return Err(MemoryError::InvalidInput(
                "Update requires at least one field".into(),
            ));
        }
        if self.get(id, scope)?.is_none() {
            return Ok(None);
        }

        let mut sets = vec!["updated_at = ?".to_string()];
        let mut params: Vec<Box<dyn rusqlite::ToSql>> =
            vec![Box::new(Utc::now().to_rfc3339())];

        if let Some(content) = changes.content {
            sets.push("content = ?".to_string());
            params.push(Box::new(content));
        }
        if let Some(category) = changes.category {
            sets.push("category = ?".to_string());
            params.push(Box::new(category.as_str().to_string()));
        }
        if let Some(pinned) = changes.pinned {
            sets.push("pinned = ?".to_string());
            params.push(Box::new(pinned as i64));
        }
        if let Some(metadata) = changes.metadata {
            sets.push("metadata = ?".to_string());
            params.push(Box::new(serde_json::to_string(&metadata)?));
        }
        params.push(Box::new(id.to_string()));

        self.with_conn(scope, |conn| {
            let sql = format!("UPDATE memories SET {} WHERE id = ?", sets.join(", "));
            let param_refs: Vec<&dyn rusqlite::ToSql> =
                params.iter().map(|p| p.as_ref()).collect();
            conn.execute(&sql, param_refs.as_slice())?;
            Ok(())
        })?;

        self.get(id, scope)
    }

    pub fn pin(&self, id: &str, scope: Scope) -> Result<Option<Memory>> {
        self.update(
            id,
            scope,
            UpdateMemory {
                pinned: Some(true),
                ..Default::default()
            },
        )
    }

    pub fn unpin(&self, id: &str, scope: Scope) -> Result<Option<Memory>> {
        self.update(
            id,
            scope,
            UpdateMemory {
                pinned: Some(false),
                ..Default::default()
            },
        )
    }

    // ──────────────────────────────────────────────────────────
    // Group membership
    // ──────────────────────────────────────────────────────────

    /// Add the memory to more groups. The memory must be group-scoped.
    pub fn add_groups(&self, id: &str, names: &[String]) -> Result<Option<Memory>> {
        let memory = match self.require_group_scoped(id)? {
            Some(memory) => memory,
            None => return Ok(None),
        };

        let mut merged: BTreeSet<String> = memory.groups.into_iter().collect();
        merged.extend(names.iter().cloned());
        self.write_groups(id, merged.into_iter().collect())
    }

    /// Remove the memory from groups. The result must keep at least
    /// one group; use `set_scope` to leave group scope entirely.
    pub fn remove_groups(&self, id: &str, names: &[String]) -> Result<Option<Memory>> {
        let memory = match self.require_group_scoped(id)? {
            Some(memory) => memory,
            None => return Ok(None),
        };

        let remaining: Vec<String> = memory
            .groups
            .into_iter()
            .filter(|g| !names.contains(g))
            .collect();
        if remaining.is_empty() {
            return Err(MemoryError::InvalidInput(
                "Cannot remove all groups from a group-scoped memory; change its scope instead"
                    .into(),
            ));
        }
        self.write_groups(id, remaining)
    }

    /// Replace the memory's group set. Must be non-empty.
    pub fn set_groups(&self, id: &str, names: &[String]) -> Result<Option<Memory>> {
        if names.is_empty() {
            return Err(MemoryError::InvalidInput(
                "Group-scoped memories require at least one group".into(),
            ));
        }
        if self.require_group_scoped(id)?.is_none() {
            return Ok(None);
        }
        self.write_groups(id, normalize_groups(names))
    }

    fn require_group_scoped(&self, id: &str) -> Result<Option<Memory>> {
        let memory = match self.get(id, Scope::Group)? {
            Some(memory) => memory,
            None => return Ok(None),
        };
        if memory.scope != Scope::Group {
            return Err(MemoryError::InvalidInput(format!(
                "Memory {} is not group-scoped",
                id
            )));
        }
        Ok(Some(memory))
    }

    fn write_groups(&self, id: &str, groups: Vec<String>) -> Result<Option<Memory>> {
        let groups_json = serde_json::to_string(&groups)?;
        self.with_conn(Scope::Group, |conn| {
            conn.execute(
                "UPDATE memories SET groups = ?, updated_at = ? WHERE id = ?",
                params![groups_json, Utc::now().to_rfc3339(), id],
            )?;
            Ok(())
        })?;
        self.get(id, Scope::Group)
    }

    // ──────────────────────────────────────────────────────────
    // Scope transitions
    // ──────────────────────────────────────────────────────────

    /// Change a memory's scope, moving the row between files when the
    /// old and new scope are stored apart. The id is preserved.
    pub fn set_scope(
        &self,
        id: &str,
        new_scope: Scope,
        groups: Option<Vec<String>>,
    ) -> Result<Option<Memory>> {
        let new_groups = match new_scope {
            Scope::Group => {
                let groups = groups.unwrap_or_default();
                if groups.is_empty() {
                    return Err(MemoryError::InvalidInput(
                        "Group scope requires at least one group".into(),
                    ));
                }
                normalize_groups(&groups)
            }
            _ => Vec::new(),
        };

        let memory = match self.get_by_id(id)? {
            Some(memory) => memory,
            None => return Ok(None),
        };
        let old_scope = memory.scope;
        let now = Utc::now();
        let new_project_path = match new_scope {
            Scope::Project => {
                if self.project_path.is_none() {
                    return Err(MemoryError::InvalidInput(
                        "No project path set for project-scoped operation".into(),
                    ));
                }
                self.project_path
                    .as_ref()
                    .map(|p| p.to_string_lossy().into_owned())
            }
            _ => None,
        };

        if old_scope.uses_global_file() == new_scope.uses_global_file() {
            let groups_json = serde_json::to_string(&new_groups)?;
            self.with_conn(new_scope, |conn| {
                conn.execute(
                    "UPDATE memories SET scope = ?, groups = ?, project_path = ?, updated_at = ? \
                     WHERE id = ?",
                    params![
                        new_scope.as_str(),
                        groups_json,
                        new_project_path,
                        now.to_rfc3339(),
                        id
                    ],
                )?;
                Ok(())
            })?;
        } else {
            // Cross-file move: insert first so readers never lose the row
            let mut moved = memory;
            moved.scope = new_scope;
            moved.groups = new_groups;
            moved.project_path = new_project_path;
            moved.updated_at = now;
            self.with_conn(new_scope, |conn| insert_memory(conn, &moved))?;
            self.with_conn(old_scope, |conn| {
                conn.execute("DELETE FROM memories WHERE id = ?", [id])?;
                Ok(())
            })?;
        }

        self.get(id, new_scope)
    }

    /// Move a project memory to global scope (or into a group). A new
    /// row with a fresh id is created in the target scope.
    pub fn promote(
        &self,
        id: &str,
        from_project: Option<&Path>,
        to_group: Option<&str>,
    ) -> Result<Option<Memory>> {
        let source = match from_project {
            Some(path) => MemoryStore::new(self.config.clone(), Some(path.to_path_buf())),
            None => self.clone(),
        };

        let memory = match source.get(id, Scope::Project)? {
            Some(memory) => memory,
            None => return Ok(None),
        };

        let (scope, groups) = match to_group {
            Some(group) => (Scope::Group, vec![group.to_string()]),
            None => (Scope::Global, Vec::new()),
        };

        let promoted = self.save(SaveMemory {
            content: memory.content,
            category: Some(memory.category),
            scope,
            pinned: memory.pinned,
            source: memory.source,
            metadata: memory.metadata,
            expires_at: memory.expires_at,
            groups,
        })?;

        source.delete(id, Scope::Project)?;
        Ok(Some(promoted))
    }

    /// Move a global or group memory into a project. A new row with a
    /// fresh id is created in the project file.
    pub fn unpromote(&self, id: &str, to_project: &Path) -> Result<Option<Memory>> {
        let memory = match self.get(id, Scope::Global)? {
            Some(memory) => memory,
            None => return Ok(None),
        };
        if memory.scope == Scope::Project {
            return Err(MemoryError::InvalidInput(format!(
                "Memory {} is not global or group-scoped",
                id
            )));
        }

        let target = MemoryStore::new(self.config.clone(), Some(to_project.to_path_buf()));
        let demoted = target.save(SaveMemory {
            content: memory.content,
            category: Some(memory.category),
            scope: Scope::Project,
            pinned: memory.pinned,
            source: memory.source,
            metadata: memory.metadata,
            expires_at: memory.expires_at,
            groups: Vec::new(),
        })?;

        self.delete(id, Scope::Global)?;
        Ok(Some(demoted))
    }

    // ──────────────────────────────────────────────────────────
    // Deletion
    // ──────────────────────────────────────────────────────────

    /// Delete a memory from a scope's file.
    pub fn delete(&self, id: &str, scope: Scope) -> Result<bool> {
        self.with_conn(scope, |conn| {
            let removed = conn.execute("DELETE FROM memories WHERE id = ?", [id])?;
            Ok(removed > 0)
        })
    }

    /// Delete a memory by ID, searching project then global.
    pub fn delete_by_id(&self, id: &str) -> Result<bool> {
        if self.project_path.is_some() && self.delete(id, Scope::Project)? {
            return Ok(true);
        }
        self.delete(id, Scope::Global)
    }

    /// Delete every memory whose content matches the keyword query.
    pub fn delete_matching(&self, query: &str, scope: Scope) -> Result<usize> {
        let (clause, terms) = match keyword_predicate(query) {
            Some(built) => built,
            None => return Ok(0),
        };
        self.with_conn(scope, |conn| {
            let sql = format!("DELETE FROM memories WHERE {}", clause);
            let param_refs: Vec<&dyn rusqlite::ToSql> =
                terms.iter().map(|t| t as &dyn rusqlite::ToSql).collect();
            Ok(conn.execute(&sql, param_refs.as_slice())?)
        })
    }

    /// Remove expired memories from a scope's file.
    pub fn cleanup_expired(&self, scope: Scope) -> Result<usize> {
        self.with_conn(scope, |conn| {
            Ok(conn.execute(
                "DELETE FROM memories WHERE expires_at IS NOT NULL AND expires_at < ?",
                [Utc::now().to_rfc3339()],
            )?)
        })
    }

    /// Delete all memories in a scope's file.
    pub fn reset(&self, scope: Scope) -> Result<usize> {
        self.with_conn(scope, |conn| {
            Ok(conn.execute("DELETE FROM memories", [])?)
        })
    }

    /// Count memories in a scope's file.
    pub fn count(&self, scope: Scope) -> Result<i64> {
        self.with_conn(scope, |conn| {
            Ok(conn.query_row("SELECT COUNT(*) FROM memories", [], |row| row.get(0))?)
        })
    }

    // ──────────────────────────────────────────────────────────
    // Access tracking (best-effort, never raises)
    // ──────────────────────────────────────────────────────────

    /// Record that a memory was returned to a caller.
    pub fn record_access(&self, id: &str, scope: Scope) {
        let result = self.with_conn(scope, |conn| {
            conn.execute(
                "UPDATE memories SET access_count = access_count + 1, last_accessed_at = ? \
                 WHERE id = ?",
                params![Utc::now().to_rfc3339(), id],
            )?;
            Ok(())
        });
        if let Err(err) = result {
            warn!(memory_id = id, error = %err, "failed to record memory access");
        }
    }

    /// Record access for a batch of memories in one statement.
    pub fn record_access_batch(&self, ids: &[String], scope: Scope) {
        if ids.is_empty() {
            return;
        }
        let result = self.with_conn(scope, |conn| {
            let placeholders = vec!["?"; ids.len()].join(", ");
            let sql = format!(
                "UPDATE memories SET access_count = access_count + 1, last_accessed_at = ? \
                 WHERE id IN ({})",
                placeholders
            );
            let now = Utc::now().to_rfc3339();
            let mut params: Vec<&dyn rusqlite::ToSql> = Vec::with_capacity(ids.len() + 1);
            params.push(&now);
            params.extend(ids.iter().map(|id| id as &dyn rusqlite::ToSql));
            conn.execute(&sql, params.as_slice())?;
            Ok(())
        });
        if let Err(err) = result {
            warn!(count = ids.len(), error = %err, "failed to record batch memory access");
        }
    }

    // ──────────────────────────────────────────────────────────
    // Hierarchical reads (current project + stored descendants)
    // ──────────────────────────────────────────────────────────

    /// Stored projects strictly below the current one, cached for the
    /// lifetime of this store instance.
    pub fn descendant_projects(&self) -> Vec<(PathBuf, PathBuf)> {
        let mut guard = self.descendants.lock();
        if guard.is_none() {
            let found = match &self.project_path {
                Some(parent) => {
                    paths::find_descendant_projects(&self.config, parent, paths::MAX_DESCENDANTS)
                }
                None => Vec::new(),
            };
            *guard = Some(found);
        }
        guard.clone().unwrap_or_default()
    }

    /// List memories from the current project and every stored
    /// descendant project, merged newest first. Reads only; writes
    /// never fan out.
    pub fn list_with_descendants(
        &self,
        category: Option<Category>,
        pinned_only: bool,
        limit: usize,
    ) -> Result<Vec<Memory>> {
        if self.project_path.is_none() {
            return Err(MemoryError::InvalidInput(
                "No project path set for descendant listing".into(),
            ));
        }

        let mut merged = self.list(Scope::Project, category, pinned_only, limit, false)?;
        for (_, storage_dir) in self.descendant_projects() {
            merged.extend(list_in_file(
                &storage_dir.join("memories.db"),
                category,
                pinned_only,
                limit,
            ));
        }

        let mut merged = dedup_by_id(merged);
        merged.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        merged.truncate(limit);
        Ok(merged)
    }

    /// Keyword search across the current project and every stored
    /// descendant project.
    pub fn search_with_descendants(&self, query: &str, limit: usize) -> Result<Vec<Memory>> {
        if self.project_path.is_none() {
            return Err(MemoryError::InvalidInput(
                "No project path set for descendant search".into(),
            ));
        }

        let mut merged = self.search_keyword(query, Scope::Project, limit)?;
        for (_, storage_dir) in self.descendant_projects() {
            merged.extend(search_in_file(
                &storage_dir.join("memories.db"),
                query,
                limit,
            ));
        }

        let mut merged = dedup_by_id(merged);
        merged.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        merged.truncate(limit);
        Ok(merged)
    }

    // ──────────────────────────────────────────────────────────
    // Cross-project aggregators (user visibility, not agents)
    // ──────────────────────────────────────────────────────────

    /// List memories from every tracked project, plus the global file
    /// when requested. `None` as the project path denotes global.
    pub fn list_all_projects(
        &self,
        category: Option<Category>,
        pinned_only: bool,
        limit_per_project: usize,
        include_global: bool,
    ) -> Vec<(Option<PathBuf>, Vec<Memory>)> {
        let mut results = Vec::new();

        if include_global {
            let memories =
                list_in_file(&self.global_db_path(), category, pinned_only, limit_per_project);
            if !memories.is_empty() {
                results.push((None, memories));
            }
        }

        for (original, db_path) in self.tracked_project_files() {
            let memories = list_in_file(&db_path, category, pinned_only, limit_per_project);
            if !memories.is_empty() {
                results.push((Some(original), memories));
            }
        }

        results
    }

    /// Keyword search across every tracked project.
    pub fn search_all_projects(
        &self,
        query: &str,
        limit_per_project: usize,
        include_global: bool,
    ) -> Vec<(Option<PathBuf>, Vec<Memory>)> {
        let mut results = Vec::new();

        if include_global {
            let memories = search_in_file(&self.global_db_path(), query, limit_per_project);
            if !memories.is_empty() {
                results.push((None, memories));
            }
        }

        for (original, db_path) in self.tracked_project_files() {
            let memories = search_in_file(&db_path, query, limit_per_project);
            if !memories.is_empty() {
                results.push((Some(original), memories));
            }
        }

        results
    }

    /// Per-project counts and last-updated timestamps.
    pub fn get_all_project_stats(&self) -> Vec<ProjectStats> {
        let mut stats = Vec::new();

        for (original, db_path) in self.tracked_project_files() {
            let row = Connection::open_with_flags(
                &db_path,
                rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY,
            )
            .and_then(|conn| {
                conn.query_row(
                    "SELECT COUNT(*), MAX(updated_at) FROM memories",
                    [],
                    |row| {
                        Ok((row.get::<_, i64>(0)?, row.get::<_, Option<String>>(1)?))
                    },
                )
            });

            match row {
                Ok((memory_count, last_updated)) => stats.push(ProjectStats {
                    project_path: original,
                    memory_count,
                    last_updated: last_updated.and_then(|raw| {
                        chrono::DateTime::parse_from_rfc3339(&raw)
                            .map(|dt| dt.with_timezone(&Utc))
                            .ok()
                    }),
                }),
                // Skip projects with unreadable databases
                Err(_) => continue,
            }
        }

        stats
    }

    /// Enumerate `(original_project_path, db_path)` for every tracked
    /// project directory, sorted by storage directory name.
    fn tracked_project_files(&self) -> Vec<(PathBuf, PathBuf)> {
        let projects_dir = self.config.projects_path();
        let entries = match std::fs::read_dir(&projects_dir) {
            Ok(entries) => entries,
            Err(_) => return Vec::new(),
        };

        let mut dirs: Vec<PathBuf> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect();
        dirs.sort();

        dirs.into_iter()
            .filter_map(|dir| {
                let db_path = dir.join("memories.db");
                if !db_path.exists() {
                    return None;
                }
                let original = paths::read_project_ref(&dir.join(paths::PROJECT_REF_FILE))
                    .unwrap_or_else(|| dir.clone());
                Some((original, db_path))
            })
            .collect()
    }
}

fn insert_memory(conn: &Connection, memory: &Memory) -> Result<()> {
    conn.execute(
        "INSERT INTO memories \
         (id, content, category, scope, project_path, pinned, \
          created_at, updated_at, expires_at, source, metadata, groups, \
          access_count, last_accessed_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            memory.id,
            memory.content,
            memory.category.as_str(),
            memory.scope.as_str(),
            memory.project_path,
            memory.pinned as i64,
            memory.created_at.to_rfc3339(),
            memory.updated_at.to_rfc3339(),
            memory.expires_at.map(|at| at.to_rfc3339()),
            memory.source,
            serde_json::to_string(&memory.metadata)?,
            serde_json::to_string(&memory.groups)?,
            memory.access_count,
            memory.last_accessed_at.map(|at| at.to_rfc3339()),
        ],
    )?;
    Ok(())
}

fn normalize_groups(groups: &[String]) -> Vec<String> {
    let unique: BTreeSet<String> = groups.iter().cloned().collect();
    unique.into_iter().collect()
}

fn dedup_by_id(memories: Vec<Memory>) -> Vec<Memory> {
    let mut seen = HashSet::new();
    memories
        .into_iter()
        .filter(|m| seen.insert(m.id.clone()))
        .collect()
}
