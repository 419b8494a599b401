//! Storage path resolution
//!
//! Each project gets a storage directory under `projects/` keyed by the
//! first 16 hex chars of SHA-256 of its resolved absolute path. A
//! `.project_path` back-reference file inside the directory records the
//! path that created it, which is what cross-project and descendant
//! scans read back.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::config::Config;
use crate::error::Result;

/// Default cap on descendant enumeration results.
pub const MAX_DESCENDANTS: usize = 20;

/// Back-reference file name inside a project storage directory.
pub const PROJECT_REF_FILE: &str = ".project_path";

/// Resolve a path to its canonical absolute form. Falls back to
/// joining the current directory when the path does not exist yet.
pub fn resolve_path(path: &Path) -> PathBuf {
    if let Ok(resolved) = path.canonicalize() {
        return resolved;
    }
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    }
}

/// First 16 hex chars of SHA-256 of the resolved project path.
pub fn hash_project_path(project_path: &Path) -> String {
    let resolved = resolve_path(project_path);
    let mut hasher = Sha256::new();
    hasher.update(resolved.to_string_lossy().as_bytes());
    hex::encode(hasher.finalize())[..16].to_string()
}

/// Storage directory for a project, created on first use.
///
/// Writes the `.project_path` back-reference the first time the
/// directory is created; an existing back-reference is never rewritten.
pub fn project_storage_dir(config: &Config, project_path: &Path) -> Result<PathBuf> {
    let resolved = resolve_path(project_path);
    let storage = config.projects_path().join(hash_project_path(&resolved));

    std::fs::create_dir_all(&storage)?;

    let ref_file = storage.join(PROJECT_REF_FILE);
    if !ref_file.exists() {
        std::fs::write(&ref_file, resolved.to_string_lossy().as_bytes())?;
    }

    std::fs::create_dir_all(storage.join("summaries"))?;

    Ok(storage)
}

/// Resolve the original project path stored for a hash, if any.
pub fn resolve_project_from_hash(config: &Config, project_hash: &str) -> Option<PathBuf> {
    let ref_file = config
        .projects_path()
        .join(project_hash)
        .join(PROJECT_REF_FILE);
    read_project_ref(&ref_file)
}

/// Read a `.project_path` back-reference file.
pub fn read_project_ref(ref_file: &Path) -> Option<PathBuf> {
    let raw = std::fs::read_to_string(ref_file).ok()?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(PathBuf::from(trimmed))
}

/// Find stored projects that are strict descendants of `parent_dir`.
///
/// Scans `projects/*/.project_path` and returns
/// `(original_project_path, storage_dir)` pairs, capped at
/// `max_results`. Parents with two or fewer path components (e.g. `/`
/// or `/home`) return nothing, so a store rooted near the filesystem
/// root cannot fan out over everything.
pub fn find_descendant_projects(
    config: &Config,
    parent_dir: &Path,
    max_results: usize,
) -> Vec<(PathBuf, PathBuf)> {
    let parent = resolve_path(parent_dir);

    if parent.components().count() <= 2 {
        return Vec::new();
    }

    let projects_dir = config.projects_path();
    let entries = match std::fs::read_dir(&projects_dir) {
        Ok(entries) => entries,
        Err(_) => return Vec::new(),
    };

    let mut results = Vec::new();
    for entry in entries.flatten() {
        let storage_dir = entry.path();
        if !storage_dir.is_dir() {
            continue;
        }

        let original = match read_project_ref(&storage_dir.join(PROJECT_REF_FILE)) {
            Some(path) => path,
            None => continue,
        };

        // Strict descendant: under the parent but not the parent itself
        if !original.starts_with(&parent) || original == parent {
            continue;
        }

        results.push((original, storage_dir));
        if results.len() >= max_results {
            break;
        }
    }

    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_config;
    use tempfile::TempDir;

    fn test_config(dir: &TempDir) -> Config {
        load_config(Some(dir.path().to_path_buf())).unwrap()
    }

    #[test]
    fn test_hash_is_stable_and_hex16() {
        let dir = TempDir::new().unwrap();
        let hash = hash_project_path(dir.path());
        assert_eq!(hash.len(), 16);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(hash, hash_project_path(dir.path()));
    }

    #[test]
    fn test_same_resolution_shares_directory() {
        let base = TempDir::new().unwrap();
        let config = test_config(&base);

        let project = TempDir::new().unwrap();
        let nested = project.path().join("sub").join("..");
        std::fs::create_dir_all(project.path().join("sub")).unwrap();

        let a = project_storage_dir(&config, project.path()).unwrap();
        let b = project_storage_dir(&config, &nested).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_back_reference_written_once() {
        let base = TempDir::new().unwrap();
        let config = test_config(&base);
        let project = TempDir::new().unwrap();

        let storage = project_storage_dir(&config, project.path()).unwrap();
        let ref_file = storage.join(PROJECT_REF_FILE);
        let first = std::fs::read_to_string(&ref_file).unwrap();

        // Second resolution leaves the back-reference untouched
        project_storage_dir(&config, project.path()).unwrap();
        assert_eq!(std::fs::read_to_string(&ref_file).unwrap(), first);

        let resolved = resolve_path(project.path());
        assert_eq!(PathBuf::from(first.trim()), resolved);
    }

    #[test]
    fn test_descendants_strict_and_capped() {
        let base = TempDir::new().unwrap();
        let config = test_config(&base);

        let parent = TempDir::new().unwrap();
        let child = parent.path().join("svc");
        let grandchild = parent.path().join("svc").join("api");
        std::fs::create_dir_all(&grandchild).unwrap();

        project_storage_dir(&config, parent.path()).unwrap();
        project_storage_dir(&config, &child).unwrap();
        project_storage_dir(&config, &grandchild).unwrap();

        let found = find_descendant_projects(&config, parent.path(), MAX_DESCENDANTS);
        let paths: Vec<_> = found.iter().map(|(p, _)| p.clone()).collect();

        assert_eq!(found.len(), 2);
        assert!(paths.contains(&resolve_path(&child)));
        assert!(paths.contains(&resolve_path(&grandchild)));
        // The parent itself is never a descendant
        assert!(!paths.contains(&resolve_path(parent.path())));

        let capped = find_descendant_projects(&config, parent.path(), 1);
        assert_eq!(capped.len(), 1);
    }

    #[test]
    fn test_shallow_parent_returns_nothing() {
        let base = TempDir::new().unwrap();
        let config = test_config(&base);
        assert!(find_descendant_projects(&config, Path::new("/"), MAX_DESCENDANTS).is_empty());
        assert!(find_descendant_projects(&config, Path::new("/home"), MAX_DESCENDANTS).is_empty());
    }

    #[test]
    fn test_resolve_from_hash() {
        let base = TempDir::new().unwrap();
        let config = test_config(&base);
        let project = TempDir::new().unwrap();

        project_storage_dir(&config, project.path()).unwrap();
        let hash = hash_project_path(project.path());

        assert_eq!(
            resolve_project_from_hash(&config, &hash),
            Some(resolve_path(project.path()))
        );
        assert_eq!(resolve_project_from_hash(&config, "deadbeefdeadbeef"), None);
    }
}
