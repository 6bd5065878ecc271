//! Dependency checks and installation
//!
//! Dependencies are Lua modules. Availability is checked by `require`-ing
//! the import name in a fresh execution sandbox; missing modules are
//! installed with a luarocks-compatible installer into the runner's tree.
//!
//! Every missing dependency gets one install attempt before the report is
//! returned, so a caller sees all failures at once.

use async_trait::async_trait;
use scriptor_core::domain::script::{Dependency, ScriptDescriptor};
use scriptor_lua::{ModuleRegistry, SearchPaths, create_execution_sandbox};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::FailedInstall;

/// Import names whose package is published under another name
const PACKAGE_MAP: &[(&str, &str)] = &[
    ("lfs", "luafilesystem"),
    ("cjson", "lua-cjson"),
    ("socket", "luasocket"),
    ("ltn12", "luasocket"),
    ("mime", "luasocket"),
    ("ssl", "luasec"),
    ("yaml", "lyaml"),
    ("posix", "luaposix"),
    ("zlib", "lua-zlib"),
    ("cURL", "lua-curl"),
    ("rex_pcre", "lrexlib-pcre"),
    ("utf8", "luautf8"),
    ("sqlite3", "lsqlite3"),
];

/// Installable package for an import name
///
/// Only the first segment of dotted imports (`socket.http`) is used.
pub fn package_for_import(import_name: &str) -> &str {
    let root = import_name.split('.').next().unwrap_or(import_name);
    PACKAGE_MAP
        .iter()
        .find(|(import, _)| *import == root)
        .map(|(_, package)| *package)
        .unwrap_or(root)
}

/// Primary import name for a package
pub fn import_for_package(package: &str) -> &str {
    PACKAGE_MAP
        .iter()
        .find(|(_, p)| *p == package)
        .map(|(import, _)| *import)
        .unwrap_or(package)
}

/// Process-wide cache of successful probes
///
/// Only positive results are kept; a missing module is probed again on the
/// next request.
#[derive(Debug, Clone, Default)]
pub struct ProbeCache {
    available: Arc<RwLock<HashMap<String, bool>>>,
}

impl ProbeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_known_available(&self, import_name: &str) -> bool {
        self.available
            .read()
            .map(|map| map.get(import_name).copied().unwrap_or(false))
            .unwrap_or(false)
    }

    pub fn mark_available(&self, import_name: &str) {
        if let Ok(mut map) = self.available.write() {
            map.insert(import_name.to_string(), true);
        }
    }
}

/// Checks whether a module can be loaded
#[async_trait]
pub trait DependencyProbe: Send + Sync {
    async fn is_available(&self, import_name: &str) -> bool;
}

/// Probe that `require`s the module in an execution sandbox
pub struct LuaProbe {
    paths: SearchPaths,
}

impl LuaProbe {
    pub fn new(paths: SearchPaths) -> Self {
        Self { paths }
    }
}

#[async_trait]
impl DependencyProbe for LuaProbe {
    async fn is_available(&self, import_name: &str) -> bool {
        let paths = self.paths.clone();
        let name = import_name.to_string();

        let probed = tokio::task::spawn_blocking(move || -> mlua::Result<bool> {
            let lua = create_execution_sandbox(&ModuleRegistry::new(), &paths)?;
            lua.load("return (pcall(require, ...))")
                .set_name("probe")
                .call::<bool>(name)
        })
        .await;

        match probed {
            Ok(Ok(available)) => available,
            Ok(Err(e)) => {
                warn!(module = import_name, "Probe failed: {}", e);
                false
            }
            Err(e) => {
                warn!(module = import_name, "Probe task failed: {}", e);
                false
            }
        }
    }
}

/// Installs one package
#[async_trait]
pub trait PackageInstaller: Send + Sync {
    /// Install `package`, optionally constrained; the error is a readable reason
    async fn install(&self, package: &str, constraint: Option<&str>) -> Result<(), String>;
}

/// Installer that shells out to a luarocks-compatible program
pub struct CommandInstaller {
    program: String,
    tree: PathBuf,
    timeout: Duration,
}

impl CommandInstaller {
    pub fn new(program: impl Into<String>, tree: PathBuf, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            tree,
            timeout,
        }
    }

    /// Arguments for one install
    pub fn install_args(&self, package: &str, constraint: Option<&str>) -> Vec<String> {
        let mut args = vec![
            "install".to_string(),
            "--tree".to_string(),
            self.tree.display().to_string(),
            package.to_string(),
        ];
        if let Some(version) = constraint.and_then(normalize_constraint) {
            args.push(version);
        }
        args
    }
}

/// Strip `==`/`=` prefixes; empty constraints mean "any version"
pub fn normalize_constraint(constraint: &str) -> Option<String> {
    let trimmed = constraint.trim();
    let stripped = trimmed
        .strip_prefix("==")
        .or_else(|| trimmed.strip_prefix('='))
        .unwrap_or(trimmed)
        .trim();
    if stripped.is_empty() {
        None
    } else {
        Some(stripped.to_string())
    }
}

#[async_trait]
impl PackageInstaller for CommandInstaller {
    async fn install(&self, package: &str, constraint: Option<&str>) -> Result<(), String> {
        let args = self.install_args(package, constraint);
        info!(package, program = %self.program, "Installing dependency");

        let child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| format!("failed to start {}: {}", self.program, e))?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(format!("installer failed: {}", e)),
            Err(_) => {
                return Err(format!(
                    "installer timed out after {}s",
                    self.timeout.as_secs()
                ));
            }
        };

        debug!(package, stdout = %String::from_utf8_lossy(&output.stdout), "Installer output");

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let last = stderr.lines().rev().find(|l| !l.trim().is_empty()).unwrap_or("");
            Err(format!("{} ({})", output.status, last.trim()))
        }
    }
}

/// Outcome of [`DependencyManager::ensure_installed`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstallReport {
    /// Packages installed during this call
    pub installed: Vec<String>,
    pub failed: Vec<FailedInstall>,
}

impl InstallReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Probes and installs script dependencies
pub struct DependencyManager {
    probe: Arc<dyn DependencyProbe>,
    installer: Arc<dyn PackageInstaller>,
    cache: ProbeCache,
}

impl DependencyManager {
    pub fn new(
        probe: Arc<dyn DependencyProbe>,
        installer: Arc<dyn PackageInstaller>,
        cache: ProbeCache,
    ) -> Self {
        Self {
            probe,
            installer,
            cache,
        }
    }

    async fn is_available(&self, import_name: &str) -> bool {
        if self.cache.is_known_available(import_name) {
            return true;
        }
        let available = self.probe.is_available(import_name).await;
        if available {
            self.cache.mark_available(import_name);
        }
        available
    }

    /// Declared dependencies that cannot currently be loaded
    pub async fn missing<'a>(&self, dependencies: &'a [Dependency]) -> Vec<&'a Dependency> {
        let mut missing = Vec::new();
        let mut seen = HashSet::new();
        for dependency in dependencies {
            if seen.insert(dependency.import_name.as_str())
                && !self.is_available(&dependency.import_name).await
            {
                missing.push(dependency);
            }
        }
        missing
    }

    /// Install every missing dependency of `descriptor`
    ///
    /// A no-op when everything is already available.
    pub async fn ensure_installed(&self, descriptor: &ScriptDescriptor) -> InstallReport {
        let mut report = InstallReport::default();

        for dependency in self.missing(&descriptor.dependencies).await {
            let package = dependency
                .package_name
                .as_deref()
                .unwrap_or_else(|| package_for_import(&dependency.import_name))
                .to_string();

            let outcome = self
                .installer
                .install(&package, dependency.version_constraint.as_deref())
                .await;

            let reason = match outcome {
                Ok(()) => {
                    if self.probe.is_available(&dependency.import_name).await {
                        self.cache.mark_available(&dependency.import_name);
                        report.installed.push(package);
                        continue;
                    }
                    format!(
                        "installed '{}' but '{}' still cannot be loaded",
                        package, dependency.import_name
                    )
                }
                Err(reason) => reason,
            };

            warn!(
                script = %descriptor.name,
                module = %dependency.import_name,
                package = %package,
                "Dependency install failed: {}",
                reason
            );
            report.failed.push(FailedInstall {
                import_name: dependency.import_name.clone(),
                package,
                reason,
            });
        }

        report
    }
}
