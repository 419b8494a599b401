//! Command event log
//!
//! Append-only SQLite log of command invocations, feeding the usage
//! analytics queries. Writing never raises; observability must not
//! break a user operation. Read-side aggregations degrade to zeroed
//! results on any failure.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{Duration, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use serde::Serialize;
use tracing::warn;

use crate::config::Config;
use crate::error::Result;

/// A logged command event.
#[derive(Debug, Clone, Serialize)]
pub struct CommandEvent {
    pub id: i64,
    pub timestamp: String,
    pub command: String,
    pub subcommand: Option<String>,
    pub project_path: Option<String>,
    pub result_count: Option<i64>,
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Search effectiveness statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SearchStats {
    pub total_searches: i64,
    pub avg_result_count: f64,
    pub zero_result_count: i64,
    pub zero_result_rate: f64,
}

/// Session compliance statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionStats {
    pub startup_count: i64,
    pub session_starts: i64,
    pub session_ends: i64,
    pub summarize_count: i64,
    /// summarize_count / max(startup_count, session_starts, 1), in [0, 1]
    pub summarize_rate: f64,
}

/// SQLite-based append-only event log.
pub struct EventLog {
    db_path: PathBuf,
    conn: Arc<Mutex<Option<Connection>>>,
}

impl Clone for EventLog {
    fn clone(&self) -> Self {
        Self {
            db_path: self.db_path.clone(),
            conn: self.conn.clone(),
        }
    }
}

impl EventLog {
    pub fn new(config: &Config) -> Self {
        Self {
            db_path: config.base_path.join("events.db"),
            conn: Arc::new(Mutex::new(None)),
        }
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let mut guard = self.conn.lock();
        if guard.is_none() {
            if let Some(parent) = self.db_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let conn = Connection::open(&self.db_path)?;
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS events (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    timestamp TEXT NOT NULL,
                    command TEXT NOT NULL,
                    subcommand TEXT,
                    project_path TEXT,
                    result_count INTEGER,
                    metadata TEXT NOT NULL DEFAULT '{}'
                );
                CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events(timestamp);
                CREATE INDEX IF NOT EXISTS idx_events_command ON events(command);
                "#,
            )?;
            *guard = Some(conn);
        }
        f(guard.as_ref().expect("connection opened above"))
    }

    /// Log a command event. Never raises.
    pub fn log(
        &self,
        command: &str,
        subcommand: Option<&str>,
        project_path: Option<&str>,
        result_count: Option<i64>,
        metadata: Option<&HashMap<String, serde_json::Value>>,
    ) {
        let metadata_json = metadata
            .map(|m| serde_json::to_string(m).unwrap_or_else(|_| "{}".to_string()))
            .unwrap_or_else(|| "{}".to_string());

        let result = self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO events (timestamp, command, subcommand, project_path, result_count, metadata) \
                 VALUES (?, ?, ?, ?, ?, ?)",
                params![
                    Utc::now().to_rfc3339(),
                    command,
                    subcommand,
                    project_path,
                    result_count,
                    metadata_json,
                ],
            )?;
            Ok(())
        });
        if let Err(err) = result {
            warn!(command, error = %err, "event log write failed");
        }
    }

    /// Most recent events, newest first.
    pub fn get_recent_events(&self, limit: usize) -> Vec<CommandEvent> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT id, timestamp, command, subcommand, project_path, result_count, metadata \
                 FROM events ORDER BY id DESC LIMIT ?",
            )?;
            let events = stmt
                .query_map([limit as i64], |row| {
                    let metadata: String = row.get(6)?;
                    Ok(CommandEvent {
                        id: row.get(0)?,
                        timestamp: row.get(1)?,
                        command: row.get(2)?,
                        subcommand: row.get(3)?,
                        project_path: row.get(4)?,
                        result_count: row.get(5)?,
                        metadata: serde_json::from_str(&metadata).unwrap_or_default(),
                    })
                })?
                .filter_map(|r| r.ok())
                .collect();
            Ok(events)
        })
        .unwrap_or_default()
    }

    /// Command frequency counts within a time window, keyed by
    /// `command` or `command subcommand`.
    pub fn get_command_counts(&self, since_days: i64) -> HashMap<String, i64> {
        let cutoff = (Utc::now() - Duration::days(since_days)).to_rfc3339();
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT command, subcommand, COUNT(*) FROM events \
                 WHERE timestamp >= ? GROUP BY command, subcommand",
            )?;
            let mut counts = HashMap::new();
            let rows = stmt.query_map([&cutoff], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?;
            for row in rows.flatten() {
                let (command, subcommand, count) = row;
                let key = match subcommand {
                    Some(sub) => format!("{} {}", command, sub),
                    None => command,
                };
                counts.insert(key, count);
            }
            Ok(counts)
        })
        .unwrap_or_default()
    }

    /// Search effectiveness within a time window.
    pub fn get_search_stats(&self, since_days: i64) -> SearchStats {
        let cutoff = (Utc::now() - Duration::days(since_days)).to_rfc3339();
        self.with_conn(|conn| {
            let total: i64 = conn.query_row(
                "SELECT COUNT(*) FROM events WHERE command = 'search' AND timestamp >= ?",
                [&cutoff],
                |row| row.get(0),
            )?;
            if total == 0 {
                return Ok(SearchStats::default());
            }

            let (avg, zero): (Option<f64>, Option<i64>) = conn.query_row(
                "SELECT AVG(result_count), SUM(CASE WHEN result_count = 0 THEN 1 ELSE 0 END) \
                 FROM events \
                 WHERE command = 'search' AND timestamp >= ? AND result_count IS NOT NULL",
                [&cutoff],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;

            let zero_result_count = zero.unwrap_or(0);
            Ok(SearchStats {
                total_searches: total,
                avg_result_count: avg.unwrap_or(0.0),
                zero_result_count,
                zero_result_rate: zero_result_count as f64 / total as f64,
            })
        })
        .unwrap_or_default()
    }

    /// Session compliance within a time window.
    pub fn get_session_stats(&self, since_days: i64) -> SessionStats {
        let cutoff = (Utc::now() - Duration::days(since_days)).to_rfc3339();
        self.with_conn(|conn| {
            let count_where = |clause: &str| -> Result<i64> {
                let sql = format!(
                    "SELECT COUNT(*) FROM events WHERE {} AND timestamp >= ?",
                    clause
                );
                Ok(conn.query_row(&sql, [&cutoff], |row| row.get(0))?)
            };

            let startup_count = count_where("command = 'startup'")?;
            let session_starts =
                count_where("command = 'session' AND subcommand = 'start'")?;
            let session_ends = count_where("command = 'session' AND subcommand = 'end'")?;
            let summarize_count =
                count_where("command = 'session' AND subcommand = 'summarize'")?;

            let denominator = startup_count.max(session_starts).max(1);
            let summarize_rate = (summarize_count as f64 / denominator as f64).clamp(0.0, 1.0);

            Ok(SessionStats {
                startup_count,
                session_starts,
                session_ends,
                summarize_count,
                summarize_rate,
            })
        })
        .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_config;
    use tempfile::TempDir;

    fn event_log() -> (TempDir, EventLog) {
        let base = TempDir::new().unwrap();
        let config = load_config(Some(base.path().to_path_buf())).unwrap();
        let log = EventLog::new(&config);
        (base, log)
    }

    #[test]
    fn test_command_counts_keying() {
        let (_base, log) = event_log();
        log.log("search", None, None, Some(3), None);
        log.log("search", None, None, Some(0), None);
        log.log("session", Some("start"), None, None, None);

        let counts = log.get_command_counts(30);
        assert_eq!(counts.get("search"), Some(&2));
        assert_eq!(counts.get("session start"), Some(&1));
    }

    #[test]
    fn test_search_stats() {
        let (_base, log) = event_log();
        log.log("search", None, None, Some(4), None);
        log.log("search", None, None, Some(0), None);
        log.log("search", None, None, Some(2), None);
        // Other commands are ignored
        log.log("list", None, None, Some(9), None);

        let stats = log.get_search_stats(30);
        assert_eq!(stats.total_searches, 3);
        assert!((stats.avg_result_count - 2.0).abs() < 1e-9);
        assert_eq!(stats.zero_result_count, 1);
        assert!((stats.zero_result_rate - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_recent_events_newest_first() {
        let (_base, log) = event_log();
        log.log("save", None, Some("/tmp/project"), None, None);
        log.log("search", None, None, Some(2), None);

        let events = log.get_recent_events(10);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].command, "search");
        assert_eq!(events[0].result_count, Some(2));
        assert_eq!(events[1].command, "save");
        assert_eq!(events[1].project_path.as_deref(), Some("/tmp/project"));
    }

    #[test]
    fn test_search_stats_empty_window() {
        let (_base, log) = event_log();
        let stats = log.get_search_stats(30);
        assert_eq!(stats.total_searches, 0);
        assert_eq!(stats.zero_result_rate, 0.0);
    }

    #[test]
    fn test_session_stats_rate_clamped() {
        let (_base, log) = event_log();
        log.log("startup", None, None, None, None);
        log.log("session", Some("start"), None, None, None);
        log.log("session", Some("summarize"), None, None, None);
        log.log("session", Some("summarize"), None, None, None);
        log.log("session", Some("end"), None, None, None);

        let stats = log.get_session_stats(30);
        assert_eq!(stats.startup_count, 1);
        assert_eq!(stats.session_starts, 1);
        assert_eq!(stats.session_ends, 1);
        assert_eq!(stats.summarize_count, 2);
        // 2 summaries / max(1, 1, 1) clamps to 1.0
        assert!((stats.summarize_rate - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_log_never_raises() {
        let base = TempDir::new().unwrap();
        let mut config = load_config(Some(base.path().to_path_buf())).unwrap();
        // Point the log at an unwritable location
        config.base_path = PathBuf::from("/proc/nonexistent");
        let log = EventLog::new(&config);
        log.log("search", None, None, Some(1), None);
        assert!(log.get_command_counts(30).is_empty());
    }
}
