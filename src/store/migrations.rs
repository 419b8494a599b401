//! Schema initialization and migrations for memory databases
//!
//! Every scope file is opened through `init_schema`, which creates the
//! current table shape, upgrades older files in place, and only then
//! creates the indexes that reference migrated columns. Three
//! historical shapes are tolerated:
//!
//! 1. no `groups`, no `shared_groups` column
//! 2. legacy `shared_groups` column, no `groups`
//! 3. no `access_count` / `last_accessed_at` columns

use rusqlite::Connection;

use crate::error::Result;

/// Initialize or upgrade a memories database.
pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS memories (
            id TEXT PRIMARY KEY,
            content TEXT NOT NULL,
            category TEXT NOT NULL,
            scope TEXT NOT NULL,
            project_path TEXT,
            pinned INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            expires_at TEXT,
            source TEXT NOT NULL,
            metadata TEXT NOT NULL DEFAULT '{}',
            groups TEXT NOT NULL DEFAULT '[]',
            access_count INTEGER NOT NULL DEFAULT 0,
            last_accessed_at TEXT
        );
        "#,
    )?;

    migrate_columns(conn)?;

    // Indexes reference migrated columns, so they come last
    conn.execute_batch(
        r#"
        CREATE INDEX IF NOT EXISTS idx_memories_category ON memories(category);
        CREATE INDEX IF NOT EXISTS idx_memories_pinned ON memories(pinned);
        CREATE INDEX IF NOT EXISTS idx_memories_created ON memories(created_at);
        CREATE INDEX IF NOT EXISTS idx_memories_scope ON memories(scope);
        CREATE INDEX IF NOT EXISTS idx_memories_access_count ON memories(access_count);
        "#,
    )?;

    Ok(())
}

fn migrate_columns(conn: &Connection) -> Result<()> {
    let has_groups = column_exists(conn, "memories", "groups")?;
    let has_shared_groups = column_exists(conn, "memories", "shared_groups")?;

    if !has_groups && !has_shared_groups {
        conn.execute(
            "ALTER TABLE memories ADD COLUMN groups TEXT NOT NULL DEFAULT '[]'",
            [],
        )?;
    } else if has_shared_groups && !has_groups {
        // Legacy files used shared_groups without a dedicated group
        // scope; rows that carried groups become group-scoped.
        conn.execute(
            "ALTER TABLE memories ADD COLUMN groups TEXT NOT NULL DEFAULT '[]'",
            [],
        )?;
        conn.execute("UPDATE memories SET groups = shared_groups", [])?;
        conn.execute(
            "UPDATE memories SET scope = 'group' WHERE groups != '[]'",
            [],
        )?;
    }

    if !column_exists(conn, "memories", "access_count")? {
        conn.execute(
            "ALTER TABLE memories ADD COLUMN access_count INTEGER NOT NULL DEFAULT 0",
            [],
        )?;
        conn.execute("ALTER TABLE memories ADD COLUMN last_accessed_at TEXT", [])?;
    }

    Ok(())
}

fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn legacy_shared_groups_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE memories (
                id TEXT PRIMARY KEY,
                content TEXT NOT NULL,
                category TEXT NOT NULL,
                scope TEXT NOT NULL,
                project_path TEXT,
                pinned INTEGER DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                expires_at TEXT,
                source TEXT NOT NULL,
                metadata TEXT DEFAULT '{}',
                shared_groups TEXT DEFAULT '[]'
            );
            INSERT INTO memories VALUES
              ('mem_aaaaaaaaaaaa', 'shared note', 'factual', 'global', NULL, 0,
               '2024-01-01T00:00:00+00:00', '2024-01-01T00:00:00+00:00', NULL,
               'user_explicit', '{}', '["backend"]'),
              ('mem_bbbbbbbbbbbb', 'plain note', 'factual', 'global', NULL, 0,
               '2024-01-02T00:00:00+00:00', '2024-01-02T00:00:00+00:00', NULL,
               'user_explicit', '{}', '[]');
            "#,
        )
        .unwrap();
        conn
    }

    #[test]
    fn test_fresh_schema() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        assert!(column_exists(&conn, "memories", "groups").unwrap());
        assert!(column_exists(&conn, "memories", "access_count").unwrap());
        assert!(column_exists(&conn, "memories", "last_accessed_at").unwrap());
    }

    #[test]
    fn test_migration_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();
    }

    #[test]
    fn test_shared_groups_migration() {
        let conn = legacy_shared_groups_db();
        init_schema(&conn).unwrap();

        let (groups, scope): (String, String) = conn
            .query_row(
                "SELECT groups, scope FROM memories WHERE id = 'mem_aaaaaaaaaaaa'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(groups, r#"["backend"]"#);
        assert_eq!(scope, "group");

        // Rows without shared groups keep their scope
        let scope: String = conn
            .query_row(
                "SELECT scope FROM memories WHERE id = 'mem_bbbbbbbbbbbb'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(scope, "global");
    }

    #[test]
    fn test_missing_access_columns_added() {
        let conn = legacy_shared_groups_db();
        init_schema(&conn).unwrap();

        let count: i64 = conn
            .query_row(
                "SELECT access_count FROM memories WHERE id = 'mem_aaaaaaaaaaaa'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 0);
    }
}
