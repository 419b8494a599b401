//! Row mapping and short-lived per-file query helpers
//!
//! Cross-project and descendant reads open each database file in a
//! short-lived connection; a broken or foreign file yields an empty
//! result instead of failing the scan.

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OpenFlags, Row};
use tracing::debug;

use crate::types::{Category, Memory, Scope};

/// Column list shared by every memory SELECT.
pub(crate) const MEMORY_COLUMNS: &str = "id, content, category, scope, project_path, pinned, \
     created_at, updated_at, expires_at, source, metadata, groups, \
     access_count, last_accessed_at";

/// Parse a memory from a database row.
pub(crate) fn memory_from_row(row: &Row) -> rusqlite::Result<Memory> {
    let category_str: String = row.get("category")?;
    let scope_str: String = row.get("scope")?;
    let pinned: i64 = row.get("pinned")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    let expires_at: Option<String> = row.get("expires_at")?;
    let metadata_str: String = row.get("metadata")?;
    let groups_str: String = row.get("groups")?;
    let last_accessed_at: Option<String> = row.get("last_accessed_at")?;

    let metadata: HashMap<String, serde_json::Value> =
        serde_json::from_str(&metadata_str).unwrap_or_default();
    let groups: Vec<String> = serde_json::from_str(&groups_str).unwrap_or_default();

    Ok(Memory {
        id: row.get("id")?,
        content: row.get("content")?,
        category: category_str.parse().unwrap_or(Category::Factual),
        scope: scope_str.parse().unwrap_or(Scope::Project),
        project_path: row.get("project_path")?,
        pinned: pinned != 0,
        groups,
        created_at: parse_timestamp(&created_at),
        updated_at: parse_timestamp(&updated_at),
        expires_at: expires_at.as_deref().and_then(parse_timestamp_opt),
        source: row.get("source")?,
        metadata,
        access_count: row.get("access_count")?,
        last_accessed_at: last_accessed_at.as_deref().and_then(parse_timestamp_opt),
    })
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    parse_timestamp_opt(raw).unwrap_or_else(Utc::now)
}

fn parse_timestamp_opt(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

/// Build the AND-across-tokens keyword predicate for a query.
///
/// Every whitespace-separated token must appear in `content`
/// (case-insensitive). Returns None for empty or whitespace-only
/// queries, which callers turn into an empty result.
pub(crate) fn keyword_predicate(query: &str) -> Option<(String, Vec<String>)> {
    let terms: Vec<&str> = query.split_whitespace().collect();
    if terms.is_empty() {
        return None;
    }

    let clause = terms
        .iter()
        .map(|_| "content LIKE ?")
        .collect::<Vec<_>>()
        .join(" AND ");
    let params = terms.iter().map(|t| format!("%{}%", t)).collect();

    Some((clause, params))
}

/// List memories from a database file via a short-lived connection.
pub(crate) fn list_in_file(
    db_path: &Path,
    category: Option<Category>,
    pinned_only: bool,
    limit: usize,
) -> Vec<Memory> {
    let conn = match open_read_only(db_path) {
        Some(conn) => conn,
        None => return Vec::new(),
    };

    let mut sql = format!("SELECT {} FROM memories WHERE 1=1", MEMORY_COLUMNS);
    let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

    if let Some(category) = category {
        sql.push_str(" AND category = ?");
        params.push(Box::new(category.as_str().to_string()));
    }
    if pinned_only {
        sql.push_str(" AND pinned = 1");
    }
    sql.push_str(" ORDER BY created_at DESC LIMIT ?");
    params.push(Box::new(limit as i64));

    run_memory_query(&conn, &sql, params)
}

/// Keyword-search memories in a database file via a short-lived
/// connection.
pub(crate) fn search_in_file(db_path: &Path, query: &str, limit: usize) -> Vec<Memory> {
    let (clause, terms) = match keyword_predicate(query) {
        Some(built) => built,
        None => return Vec::new(),
    };
    let conn = match open_read_only(db_path) {
        Some(conn) => conn,
        None => return Vec::new(),
    };

    let sql = format!(
        "SELECT {} FROM memories WHERE {} ORDER BY created_at DESC LIMIT ?",
        MEMORY_COLUMNS, clause
    );
    let mut params: Vec<Box<dyn rusqlite::ToSql>> = terms
        .into_iter()
        .map(|t| Box::new(t) as Box<dyn rusqlite::ToSql>)
        .collect();
    params.push(Box::new(limit as i64));

    run_memory_query(&conn, &sql, params)
}

fn open_read_only(db_path: &Path) -> Option<Connection> {
    if !db_path.exists() {
        return None;
    }
    match Connection::open_with_flags(db_path, OpenFlags::SQLITE_OPEN_READ_ONLY) {
        Ok(conn) => Some(conn),
        Err(err) => {
            debug!(path = %db_path.display(), error = %err, "skipping unreadable database file");
            None
        }
    }
}

fn run_memory_query(
    conn: &Connection,
    sql: &str,
    params: Vec<Box<dyn rusqlite::ToSql>>,
) -> Vec<Memory> {
    let result = (|| -> crate::error::Result<Vec<Memory>> {
        let mut stmt = conn.prepare(sql)?;
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let memories = stmt
            .query_map(param_refs.as_slice(), memory_from_row)?
            .filter_map(|r| r.ok())
            .filter(|m| !m.is_expired())
            .collect();
        Ok(memories)
    })();

    match result {
        Ok(memories) => memories,
        Err(err) => {
            debug!(error = %err, "memory query against file failed");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_predicate_tokens() {
        let (clause, params) = keyword_predicate("poetry test").unwrap();
        assert_eq!(clause, "content LIKE ? AND content LIKE ?");
        assert_eq!(params, vec!["%poetry%", "%test%"]);
    }

    #[test]
    fn test_keyword_predicate_empty() {
        assert!(keyword_predicate("").is_none());
        assert!(keyword_predicate("   \t ").is_none());
    }

    #[test]
    fn test_missing_file_is_empty() {
        let missing = Path::new("/nonexistent/memories.db");
        assert!(list_in_file(missing, None, false, 10).is_empty());
        assert!(search_in_file(missing, "anything", 10).is_empty());
    }
}
