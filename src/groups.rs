//! Workspace group registry
//!
//! Named sets of projects stored in `groups.yaml` at the base path.
//! Mutations rewrite the file atomically (temp file + rename); the
//! parsed registry is cached per instance.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{MemoryError, Result};
use crate::paths::resolve_path;

/// A workspace group containing related projects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceGroup {
    pub name: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub projects: Vec<PathBuf>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct GroupsFile {
    #[serde(default)]
    groups: BTreeMap<String, GroupEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GroupEntry {
    created_at: DateTime<Utc>,
    #[serde(default)]
    projects: Vec<PathBuf>,
}

/// Registry of workspace groups backed by `groups.yaml`.
pub struct GroupRegistry {
    groups_file: PathBuf,
    cache: Arc<Mutex<Option<BTreeMap<String, WorkspaceGroup>>>>,
}

impl GroupRegistry {
    pub fn new(config: &Config) -> Self {
        Self {
            groups_file: config.base_path.join("groups.yaml"),
            cache: Arc::new(Mutex::new(None)),
        }
    }

    fn load(&self) -> BTreeMap<String, WorkspaceGroup> {
        let mut guard = self.cache.lock();
        if let Some(groups) = guard.as_ref() {
            return groups.clone();
        }

        let parsed = std::fs::read_to_string(&self.groups_file)
            .ok()
            .and_then(|raw| serde_yaml::from_str::<GroupsFile>(&raw).ok())
            .unwrap_or_default();

        let groups: BTreeMap<String, WorkspaceGroup> = parsed
            .groups
            .into_iter()
            .map(|(name, entry)| {
                let group = WorkspaceGroup {
                    name: name.clone(),
                    created_at: entry.created_at,
                    projects: entry.projects,
                };
                (name, group)
            })
            .collect();

        *guard = Some(groups.clone());
        groups
    }

    fn store(&self, groups: BTreeMap<String, WorkspaceGroup>) -> Result<()> {
        let file = GroupsFile {
            groups: groups
                .iter()
                .map(|(name, group)| {
                    (
                        name.clone(),
                        GroupEntry {
                            created_at: group.created_at,
                            projects: group.projects.clone(),
                        },
                    )
                })
                .collect(),
        };

        let raw = serde_yaml::to_string(&file)?;
        if let Some(parent) = self.groups_file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.groups_file.with_extension("yaml.tmp");
        std::fs::write(&tmp, raw)?;
        std::fs::rename(&tmp, &self.groups_file)?;

        *self.cache.lock() = Some(groups);
        Ok(())
    }

    /// Create a new group. The name must be unused.
    pub fn create(&self, name: &str) -> Result<WorkspaceGroup> {
        let mut groups = self.load();
        if groups.contains_key(name) {
            return Err(MemoryError::InvalidInput(format!(
                "Group '{}' already exists",
                name
            )));
        }

        let group = WorkspaceGroup {
            name: name.to_string(),
            created_at: Utc::now(),
            projects: Vec::new(),
        };
        groups.insert(name.to_string(), group.clone());
        self.store(groups)?;
        Ok(group)
    }

    /// Delete a group. Returns false when it does not exist.
    pub fn delete(&self, name: &str) -> Result<bool> {
        let mut groups = self.load();
        if groups.remove(name).is_none() {
            return Ok(false);
        }
        self.store(groups)?;
        Ok(true)
    }

    pub fn get(&self, name: &str) -> Option<WorkspaceGroup> {
        self.load().get(name).cloned()
    }

    pub fn list(&self) -> Vec<WorkspaceGroup> {
        self.load().into_values().collect()
    }

    /// Add a project to a group, resolving the path first.
    pub fn add_project(&self, name: &str, project_path: &Path) -> Result<WorkspaceGroup> {
        let mut groups = self.load();
        let group = groups.get_mut(name).ok_or_else(|| {
            MemoryError::InvalidInput(format!("Group '{}' does not exist", name))
        })?;

        let resolved = resolve_path(project_path);
        if !group.projects.contains(&resolved) {
            group.projects.push(resolved);
        }
        let updated = group.clone();
        self.store(groups)?;
        Ok(updated)
    }

    /// Remove a project from a group, resolving the path first.
    pub fn remove_project(&self, name: &str, project_path: &Path) -> Result<WorkspaceGroup> {
        let mut groups = self.load();
        let group = groups.get_mut(name).ok_or_else(|| {
            MemoryError::InvalidInput(format!("Group '{}' does not exist", name))
        })?;

        let resolved = resolve_path(project_path);
        group.projects.retain(|p| p != &resolved);
        let updated = group.clone();
        self.store(groups)?;
        Ok(updated)
    }

    /// All groups containing a project.
    pub fn get_groups_for_project(&self, project_path: &Path) -> Vec<WorkspaceGroup> {
        let resolved = resolve_path(project_path);
        self.load()
            .into_values()
            .filter(|group| group.projects.contains(&resolved))
            .collect()
    }

    /// Projects that share at least one group with the given project,
    /// excluding the project itself.
    pub fn get_sibling_projects(&self, project_path: &Path) -> Vec<PathBuf> {
        let resolved = resolve_path(project_path);
        let mut siblings: Vec<PathBuf> = Vec::new();
        for group in self.get_groups_for_project(project_path) {
            for project in group.projects {
                if project != resolved && !siblings.contains(&project) {
                    siblings.push(project);
                }
            }
        }
        siblings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_config;
    use tempfile::TempDir;

    fn registry() -> (TempDir, GroupRegistry) {
        let base = TempDir::new().unwrap();
        let config = load_config(Some(base.path().to_path_buf())).unwrap();
        let registry = GroupRegistry::new(&config);
        (base, registry)
    }

    #[test]
    fn test_create_and_duplicate_rejected() {
        let (_base, registry) = registry();
        let group = registry.create("backend").unwrap();
        assert_eq!(group.name, "backend");
        assert!(group.projects.is_empty());

        let err = registry.create("backend").unwrap_err();
        assert!(matches!(err, MemoryError::InvalidInput(_)));
    }

    #[test]
    fn test_membership_round_trip() {
        let (_base, registry) = registry();
        registry.create("backend").unwrap();

        let project_a = TempDir::new().unwrap();
        let project_b = TempDir::new().unwrap();

        registry.add_project("backend", project_a.path()).unwrap();
        // Adding twice keeps one entry
        registry.add_project("backend", project_a.path()).unwrap();
        let group = registry.add_project("backend", project_b.path()).unwrap();
        assert_eq!(group.projects.len(), 2);

        let for_a = registry.get_groups_for_project(project_a.path());
        assert_eq!(for_a.len(), 1);

        let siblings = registry.get_sibling_projects(project_a.path());
        assert_eq!(siblings, vec![resolve_path(project_b.path())]);

        let group = registry.remove_project("backend", project_a.path()).unwrap();
        assert_eq!(group.projects.len(), 1);
        assert!(registry.get_groups_for_project(project_a.path()).is_empty());
    }

    #[test]
    fn test_persists_across_instances() {
        let base = TempDir::new().unwrap();
        let config = load_config(Some(base.path().to_path_buf())).unwrap();

        let registry = GroupRegistry::new(&config);
        registry.create("infra").unwrap();
        drop(registry);

        let reloaded = GroupRegistry::new(&config);
        assert!(reloaded.get("infra").is_some());
        assert_eq!(reloaded.list().len(), 1);
    }

    #[test]
    fn test_delete() {
        let (_base, registry) = registry();
        registry.create("shortlived").unwrap();
        assert!(registry.delete("shortlived").unwrap());
        assert!(!registry.delete("shortlived").unwrap());
        assert!(registry.get("shortlived").is_none());
    }

    #[test]
    fn test_missing_group_errors() {
        let (_base, registry) = registry();
        let project = TempDir::new().unwrap();
        assert!(registry.add_project("ghost", project.path()).is_err());
        assert!(registry.remove_project("ghost", project.path()).is_err());
    }
}
