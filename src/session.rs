//! Session management
//!
//! Sessions are recorded in a JSON array file per scope
//! (`summaries/sessions.json`), newest first and capped at the 100
//! most recent. Session summaries are ordinary memories with
//! `metadata.session_id` stamped in.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use crate::config::Config;
use crate::error::Result;
use crate::paths;
use crate::store::MemoryStore;
use crate::types::{generate_session_id, Category, Memory, SaveMemory, Scope};
use crate::vector::VectorStore;

/// Maximum number of session records kept on disk.
const MAX_SESSIONS: usize = 100;

/// A bounded window during which an agent operated in a project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub project_path: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub summary_count: u32,
    #[serde(default)]
    pub metadata: std::collections::HashMap<String, serde_json::Value>,
}

/// Manages session records and summary memories.
pub struct SessionManager {
    config: Config,
    store: MemoryStore,
    vectors: Option<VectorStore>,
    project_path: Option<PathBuf>,
    current: Arc<Mutex<Option<Session>>>,
}

impl SessionManager {
    pub fn new(
        config: Config,
        store: MemoryStore,
        vectors: Option<VectorStore>,
        project_path: Option<PathBuf>,
    ) -> Self {
        let project_path = project_path.map(|p| paths::resolve_path(&p));
        Self {
            config,
            store,
            vectors,
            project_path,
            current: Arc::new(Mutex::new(None)),
        }
    }

    /// Path to the sessions file for this scope.
    pub fn sessions_file(&self) -> Result<PathBuf> {
        let dir = match &self.project_path {
            Some(project) => paths::project_storage_dir(&self.config, project)?,
            None => self.config.global_path(),
        };
        Ok(dir.join("summaries").join("sessions.json"))
    }

    fn load_sessions(&self) -> Vec<Session> {
        let file = match self.sessions_file() {
            Ok(file) => file,
            Err(_) => return Vec::new(),
        };
        std::fs::read_to_string(file)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default()
    }

    fn save_sessions(&self, sessions: &[Session]) -> Result<()> {
        let file = self.sessions_file()?;
        if let Some(parent) = file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&file, serde_json::to_string_pretty(sessions)?)?;
        Ok(())
    }

    /// Start a new session, prepending it to the record file.
    pub fn start_session(
        &self,
        metadata: Option<std::collections::HashMap<String, serde_json::Value>>,
    ) -> Result<Session> {
        let session = Session {
            id: generate_session_id(),
            project_path: self
                .project_path
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default(),
            started_at: Utc::now(),
            ended_at: None,
            summary_count: 0,
            metadata: metadata.unwrap_or_default(),
        };

        let mut sessions = self.load_sessions();
        sessions.insert(0, session.clone());
        sessions.truncate(MAX_SESSIONS);
        self.save_sessions(&sessions)?;

        *self.current.lock() = Some(session.clone());
        Ok(session)
    }

    /// End a session by id, or the current one when none is given.
    pub fn end_session(&self, session_id: Option<&str>) -> Result<Option<Session>> {
        let target_id = match session_id {
            Some(id) => Some(id.to_string()),
            None => self.current.lock().as_ref().map(|s| s.id.clone()),
        };
        let target_id = match target_id {
            Some(id) => id,
            None => return Ok(None),
        };

        let mut sessions = self.load_sessions();
        let mut ended = None;
        for session in &mut sessions {
            if session.id == target_id {
                session.ended_at = Some(Utc::now());
                ended = Some(session.clone());
                break;
            }
        }

        if ended.is_some() {
            self.save_sessions(&sessions)?;
            let mut current = self.current.lock();
            if current.as_ref().map(|s| s.id.as_str()) == Some(target_id.as_str()) {
                *current = None;
            }
        }

        Ok(ended)
    }

    pub fn get_current_session(&self) -> Option<Session> {
        self.current.lock().clone()
    }

    pub fn get_session(&self, session_id: &str) -> Option<Session> {
        self.load_sessions().into_iter().find(|s| s.id == session_id)
    }

    /// The most recently started session, if any.
    pub fn get_last_session(&self) -> Option<Session> {
        self.load_sessions().into_iter().next()
    }

    /// Recent sessions, most recent first.
    pub fn list_sessions(&self, limit: usize) -> Vec<Session> {
        let mut sessions = self.load_sessions();
        sessions.truncate(limit);
        sessions
    }

    /// Record a session summary as a memory, stamped with the session
    /// id and mirrored into the vector store when enabled.
    pub fn add_summary(
        &self,
        content: &str,
        session_id: Option<&str>,
        metadata: Option<std::collections::HashMap<String, serde_json::Value>>,
    ) -> Result<Memory> {
        let target_id = match session_id {
            Some(id) => Some(id.to_string()),
            None => self.current.lock().as_ref().map(|s| s.id.clone()),
        };
        let target_session = target_id.as_deref().and_then(|id| self.get_session(id));

        let mut memory_metadata = metadata.unwrap_or_default();
        if let Some(session) = &target_session {
            memory_metadata.insert("session_id".to_string(), json!(session.id));
        }

        let memory = self.store.save(SaveMemory {
            content: content.to_string(),
            category: Some(Category::SessionSummary),
            scope: Scope::Project,
            source: "auto_session".to_string(),
            metadata: memory_metadata,
            ..Default::default()
        })?;

        if let Some(vectors) = &self.vectors {
            if vectors.is_enabled() {
                if let Err(err) = vectors.add(
                    &memory.id,
                    &memory.content,
                    memory.category,
                    Scope::Project,
                    &[],
                ) {
                    warn!(memory_id = %memory.id, error = %err, "summary vector mirror failed");
                }
            }
        }

        if let Some(session) = target_session {
            let mut sessions = self.load_sessions();
            for stored in &mut sessions {
                if stored.id == session.id {
                    stored.summary_count += 1;
                    break;
                }
            }
            self.save_sessions(&sessions)?;
            let mut current = self.current.lock();
            if let Some(cur) = current.as_mut() {
                if cur.id == session.id {
                    cur.summary_count += 1;
                }
            }
        }

        Ok(memory)
    }

    /// Summaries recorded for a session, newest first.
    pub fn get_session_summaries(
        &self,
        session_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Memory>> {
        let summaries = self.store.list(
            Scope::Project,
            Some(Category::SessionSummary),
            false,
            limit * 2,
            false,
        )?;

        let mut summaries: Vec<Memory> = match session_id {
            Some(id) => summaries
                .into_iter()
                .filter(|m| {
                    m.metadata.get("session_id").and_then(|v| v.as_str()) == Some(id)
                })
                .collect(),
            None => summaries,
        };
        summaries.truncate(limit);
        Ok(summaries)
    }

    /// Summaries from the most recent session.
    pub fn load_last_session_context(&self) -> Result<Vec<Memory>> {
        match self.get_last_session() {
            Some(session) => self.get_session_summaries(Some(&session.id), 10),
            None => Ok(Vec::new()),
        }
    }

    /// True when the configured summary cadence divides the message
    /// count.
    pub fn should_summarize(&self, message_count: u32) -> bool {
        if !self.config.autosave.session_summary {
            return false;
        }
        let interval = self.config.autosave.summary_interval_messages;
        interval > 0 && message_count > 0 && message_count % interval == 0
    }

    /// Drop session records older than `keep_days`. Returns how many
    /// were removed.
    pub fn cleanup_old_sessions(&self, keep_days: i64) -> Result<usize> {
        let mut sessions = self.load_sessions();
        let cutoff = Utc::now() - Duration::days(keep_days);

        let before = sessions.len();
        sessions.retain(|s| s.started_at >= cutoff);
        let removed = before - sessions.len();

        if removed > 0 {
            self.save_sessions(&sessions)?;
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_config;
    use tempfile::TempDir;

    struct Fixture {
        _base: TempDir,
        _project: TempDir,
        manager: SessionManager,
        store: MemoryStore,
    }

    fn fixture() -> Fixture {
        let base = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();
        let config = load_config(Some(base.path().to_path_buf())).unwrap();
        let store = MemoryStore::new(config.clone(), Some(project.path().to_path_buf()));
        let manager = SessionManager::new(
            config,
            store.clone(),
            None,
            Some(project.path().to_path_buf()),
        );
        Fixture {
            _base: base,
            _project: project,
            manager,
            store,
        }
    }

    #[test]
    fn test_start_and_end_session() {
        let f = fixture();
        let session = f.manager.start_session(None).unwrap();
        assert!(session.id.starts_with("sess_"));
        assert!(session.ended_at.is_none());
        assert_eq!(f.manager.get_current_session().unwrap().id, session.id);

        let ended = f.manager.end_session(None).unwrap().unwrap();
        assert!(ended.ended_at.is_some());
        assert!(f.manager.get_current_session().is_none());

        // Ending a missing session is a nullable result
        assert!(f.manager.end_session(Some("sess_missing00000")).unwrap().is_none());
    }

    #[test]
    fn test_sessions_newest_first_and_capped() {
        let f = fixture();
        let first = f.manager.start_session(None).unwrap();
        let second = f.manager.start_session(None).unwrap();

        let listed = f.manager.list_sessions(10);
        assert_eq!(listed[0].id, second.id);
        assert_eq!(listed[1].id, first.id);
        assert_eq!(f.manager.get_last_session().unwrap().id, second.id);
    }

    #[test]
    fn test_add_summary_stamps_session_and_counts() {
        let f = fixture();
        let session = f.manager.start_session(None).unwrap();

        let memory = f
            .manager
            .add_summary("Worked on the retry logic", None, None)
            .unwrap();
        assert_eq!(memory.category, Category::SessionSummary);
        assert_eq!(memory.source, "auto_session");
        assert_eq!(
            memory.metadata.get("session_id").and_then(|v| v.as_str()),
            Some(session.id.as_str())
        );

        let stored = f.manager.get_session(&session.id).unwrap();
        assert_eq!(stored.summary_count, 1);

        // The summary is an ordinary memory in the project file
        let found = f.store.get_by_id(&memory.id).unwrap().unwrap();
        assert_eq!(found.content, "Worked on the retry logic");
    }

    #[test]
    fn test_load_last_session_context() {
        let f = fixture();
        let first = f.manager.start_session(None).unwrap();
        f.manager
            .add_summary("summary for first", Some(&first.id), None)
            .unwrap();

        let second = f.manager.start_session(None).unwrap();
        f.manager
            .add_summary("summary for second", Some(&second.id), None)
            .unwrap();

        let context = f.manager.load_last_session_context().unwrap();
        assert_eq!(context.len(), 1);
        assert_eq!(context[0].content, "summary for second");
    }

    #[test]
    fn test_should_summarize_cadence() {
        let f = fixture();
        // Default interval is 20
        assert!(!f.manager.should_summarize(0));
        assert!(!f.manager.should_summarize(7));
        assert!(f.manager.should_summarize(20));
        assert!(f.manager.should_summarize(40));
    }

    #[test]
    fn test_cleanup_old_sessions() {
        let f = fixture();
        f.manager.start_session(None).unwrap();
        assert_eq!(f.manager.cleanup_old_sessions(30).unwrap(), 0);
        assert_eq!(f.manager.list_sessions(10).len(), 1);
    }
}
