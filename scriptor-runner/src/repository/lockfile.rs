//! Lockfile repository
//!
//! Version pins per project, stored as JSON:
//!
//! ```json
//! { "version": 1, "projects": { "<project hash>": { "<script>": "<version>" } } }
//! ```
//!
//! The engine only reads pins. Writing happens through [`JsonLockfileStore::pin`],
//! called by whatever layer manages project configuration.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::warn;

const LOCKFILE_VERSION: u32 = 1;

/// Read access to version pins
pub trait LockfileStore: Send + Sync {
    /// Pinned version of `script_name` for the given project, if any
    fn get_pinned(&self, project_hash: &str, script_name: &str) -> Option<String>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Lockfile {
    #[serde(default)]
    version: u32,
    #[serde(default)]
    projects: BTreeMap<String, BTreeMap<String, String>>,
}

/// Lockfile stored as a single JSON document
pub struct JsonLockfileStore {
    path: PathBuf,
}

impl JsonLockfileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<Lockfile> {
        if !self.path.exists() {
            return Ok(Lockfile::default());
        }
        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read lockfile {}", self.path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse lockfile {}", self.path.display()))
    }

    /// Pin `script_name` to `version` for a project
    ///
    /// Written to a temporary file first and renamed over the lockfile.
    pub fn pin(&self, project_hash: &str, script_name: &str, version: &str) -> Result<()> {
        let mut lockfile = self.read()?;
        lockfile.version = LOCKFILE_VERSION;
        lockfile
            .projects
            .entry(project_hash.to_string())
            .or_default()
            .insert(script_name.to_string(), version.to_string());

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let tmp = self.path.with_extension("json.tmp");
        let body = serde_json::to_string_pretty(&lockfile)?;
        std::fs::write(&tmp, body)
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;

        Ok(())
    }
}

impl LockfileStore for JsonLockfileStore {
    fn get_pinned(&self, project_hash: &str, script_name: &str) -> Option<String> {
        match self.read() {
            Ok(lockfile) => lockfile
                .projects
                .get(project_hash)
                .and_then(|scripts| scripts.get(script_name))
                .cloned(),
            Err(e) => {
                warn!("Ignoring unreadable lockfile: {:#}", e);
                None
            }
        }
    }
}

/// Compute the lockfile key for a project
///
/// Hashes the names and contents of `<project>/.ai/directives/custom/*.md`
/// in sorted order. Projects without that directory share the `"default"`
/// key.
pub fn project_hash(project_root: &Path) -> Result<String> {
    let directives = project_root.join(".ai").join("directives").join("custom");
    if !directives.is_dir() {
        return Ok("default".to_string());
    }

    let mut files: Vec<PathBuf> = std::fs::read_dir(&directives)
        .with_context(|| format!("Failed to list {}", directives.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().is_some_and(|ext| ext == "md"))
        .collect();
    files.sort();

    let mut lines = Vec::with_capacity(files.len());
    for file in &files {
        let content =
            std::fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        lines.push(format!("{}:{:x}", name, Sha256::digest(&content)));
    }

    let combined = format!("{:x}", Sha256::digest(lines.join("\n").as_bytes()));
    Ok(combined[..16].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_lockfile_has_no_pins() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonLockfileStore::new(dir.path().join("scripts.lock.json"));
        assert!(store.get_pinned("default", "maps").is_none());
    }

    #[test]
    fn test_pin_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonLockfileStore::new(dir.path().join("nested").join("scripts.lock.json"));

        store.pin("abc", "maps", "1.0.0").unwrap();
        store.pin("abc", "enrich", "0.3.1").unwrap();
        store.pin("other", "maps", "2.0.0").unwrap();
        store.pin("abc", "maps", "1.1.0").unwrap();

        assert_eq!(store.get_pinned("abc", "maps").as_deref(), Some("1.1.0"));
        assert_eq!(store.get_pinned("abc", "enrich").as_deref(), Some("0.3.1"));
        assert_eq!(store.get_pinned("other", "maps").as_deref(), Some("2.0.0"));
        assert!(store.get_pinned("missing", "maps").is_none());

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(raw["version"], 1);
    }

    #[test]
    fn test_corrupt_lockfile_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scripts.lock.json");
        std::fs::write(&path, "{ not json").unwrap();

        let store = JsonLockfileStore::new(path);
        assert!(store.get_pinned("default", "maps").is_none());
        assert!(store.pin("default", "maps", "1.0.0").is_err());
    }

    #[test]
    fn test_project_hash_default_without_directives() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(project_hash(dir.path()).unwrap(), "default");
    }

    #[test]
    fn test_project_hash_tracks_content() {
        let dir = tempfile::tempdir().unwrap();
        let directives = dir.path().join(".ai").join("directives").join("custom");
        std::fs::create_dir_all(&directives).unwrap();
        std::fs::write(directives.join("a.md"), "alpha").unwrap();
        std::fs::write(directives.join("notes.txt"), "ignored").unwrap();

        let first = project_hash(dir.path()).unwrap();
        assert_eq!(first.len(), 16);
        assert_eq!(project_hash(dir.path()).unwrap(), first);

        std::fs::write(directives.join("notes.txt"), "still ignored").unwrap();
        assert_eq!(project_hash(dir.path()).unwrap(), first);

        std::fs::write(directives.join("a.md"), "beta").unwrap();
        assert_ne!(project_hash(dir.path()).unwrap(), first);
    }
}
