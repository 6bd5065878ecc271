//! In-memory collaborators shared by the runner's tests

use anyhow::Result;
use async_trait::async_trait;
use scriptor_client::RegistryScript;
use scriptor_core::domain::record::ExecutionRecord;
use scriptor_core::domain::script::InvocationKind;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use crate::repository::{LockfileStore, Registry};

/// Registry holding published versions in memory
#[derive(Default)]
pub struct FakeRegistry {
    scripts: Mutex<Vec<RegistryScript>>,
    pub records: Mutex<Vec<ExecutionRecord>>,
}

impl FakeRegistry {
    /// Publish `content` as `name@version`; the newest publish is latest
    pub fn publish(&self, name: &str, version: &str, kind: InvocationKind, content: &str) {
        let mut scripts = self.scripts.lock().unwrap();
        for script in scripts.iter_mut().filter(|s| s.name == name) {
            script.latest_version = Some(version.to_string());
        }
        scripts.push(RegistryScript {
            name: name.to_string(),
            version: version.to_string(),
            latest_version: Some(version.to_string()),
            category: Some("tools".to_string()),
            subcategory: None,
            description: None,
            module_path: None,
            kind,
            extension: None,
            content: content.to_string(),
            content_hash: Some(format!("{:x}", Sha256::digest(content.as_bytes()))),
            dependencies: vec![],
            required_env_vars: vec![],
            cost_per_unit: None,
            cost_unit: None,
        });
    }

    /// Overwrite the published hash of every version of `name`
    pub fn corrupt_hash(&self, name: &str) {
        let mut scripts = self.scripts.lock().unwrap();
        for script in scripts.iter_mut().filter(|s| s.name == name) {
            script.content_hash = Some("00".repeat(32));
        }
    }
}

#[async_trait]
impl Registry for FakeRegistry {
    async fn find_script(&self, name: &str) -> Option<RegistryScript> {
        self.scripts
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|s| s.name == name)
            .cloned()
    }

    async fn get_version(&self, name: &str, version: &str) -> Option<RegistryScript> {
        self.scripts
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.name == name && s.version == version)
            .cloned()
    }

    async fn record_execution(&self, record: &ExecutionRecord) -> Result<()> {
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}

/// Lockfile backed by a map of `(project hash, script) -> version`
#[derive(Default)]
pub struct StaticLockfile {
    pins: HashMap<(String, String), String>,
}

impl StaticLockfile {
    pub fn pin(mut self, project_hash: &str, script: &str, version: &str) -> Self {
        self.pins.insert(
            (project_hash.to_string(), script.to_string()),
            version.to_string(),
        );
        self
    }
}

impl LockfileStore for StaticLockfile {
    fn get_pinned(&self, project_hash: &str, script_name: &str) -> Option<String> {
        self.pins
            .get(&(project_hash.to_string(), script_name.to_string()))
            .cloned()
    }
}

/// Write `content` to `root/relative`, creating parent directories
pub fn write_file(root: &Path, relative: &str, content: &str) -> std::path::PathBuf {
    let path = root.join(relative);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, content).unwrap();
    path
}
