//! Runner configuration
//!
//! Defines where scripts, logs and outputs live on disk, how to reach the
//! registry, and the limits applied to every execution.

use anyhow::{Context, bail};
use scriptor_core::domain::execution::{DEFAULT_TIMEOUT_SECONDS, MAX_TIMEOUT_SECONDS};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::service::OutputLimits;

/// Runner configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Root of all per-user state (default `~/.scriptor`)
    pub home: PathBuf,

    /// Registry base URL; the registry tier is disabled when unset
    pub registry_url: Option<String>,

    /// HTTP timeout for registry calls
    pub registry_timeout: Duration,

    /// Deadline used when a request does not set one
    pub default_timeout: Duration,

    /// Requests asking for more than this are rejected
    pub max_timeout: Duration,

    /// Time between SIGTERM and SIGKILL for timed-out child processes
    pub kill_grace: Duration,

    /// Output size limits
    pub limits: OutputLimits,

    /// Package installer program (luarocks-compatible command line)
    pub installer: String,

    /// Upper bound for a single package installation
    pub install_timeout: Duration,
}

impl Config {
    /// Creates a configuration with defaults rooted at `home`
    pub fn new(home: PathBuf) -> Self {
        Self {
            home,
            registry_url: None,
            registry_timeout: Duration::from_secs(10),
            default_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECONDS),
            max_timeout: Duration::from_secs(MAX_TIMEOUT_SECONDS),
            kill_grace: Duration::from_secs(5),
            limits: OutputLimits::default(),
            installer: "luarocks".to_string(),
            install_timeout: Duration::from_secs(300),
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Recognised variables (all optional):
    /// - SCRIPTOR_HOME (default: ~/.scriptor)
    /// - SCRIPTOR_REGISTRY_URL
    /// - SCRIPTOR_REGISTRY_TIMEOUT (seconds, default: 10)
    /// - SCRIPTOR_DEFAULT_TIMEOUT (seconds, default: 300)
    /// - SCRIPTOR_MAX_TIMEOUT (seconds, default: 1800)
    /// - SCRIPTOR_KILL_GRACE (seconds, default: 5)
    /// - SCRIPTOR_MAX_ARRAY_ITEMS (default: 1000)
    /// - SCRIPTOR_MAX_STRING_CHARS (default: 10000)
    /// - SCRIPTOR_MAX_LOG_LINES (default: 500)
    /// - SCRIPTOR_MAX_RESPONSE_BYTES (default: 1000000)
    /// - SCRIPTOR_INSTALLER (default: luarocks)
    /// - SCRIPTOR_INSTALL_TIMEOUT (seconds, default: 300)
    pub fn from_env() -> anyhow::Result<Self> {
        let home = match std::env::var("SCRIPTOR_HOME") {
            Ok(home) if !home.is_empty() => PathBuf::from(home),
            _ => default_home(),
        };

        let mut config = Self::new(home);

        config.registry_url = std::env::var("SCRIPTOR_REGISTRY_URL")
            .ok()
            .filter(|url| !url.is_empty());

        if let Some(secs) = env_parse::<u64>("SCRIPTOR_REGISTRY_TIMEOUT")? {
            config.registry_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("SCRIPTOR_DEFAULT_TIMEOUT")? {
            config.default_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("SCRIPTOR_MAX_TIMEOUT")? {
            config.max_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("SCRIPTOR_KILL_GRACE")? {
            config.kill_grace = Duration::from_secs(secs);
        }
        if let Some(n) = env_parse::<usize>("SCRIPTOR_MAX_ARRAY_ITEMS")? {
            config.limits.max_array_items = n;
        }
        if let Some(n) = env_parse::<usize>("SCRIPTOR_MAX_STRING_CHARS")? {
            config.limits.max_string_chars = n;
        }
        if let Some(n) = env_parse::<usize>("SCRIPTOR_MAX_LOG_LINES")? {
            config.limits.max_log_lines = n;
        }
        if let Some(n) = env_parse::<usize>("SCRIPTOR_MAX_RESPONSE_BYTES")? {
            config.limits.max_response_bytes = n;
        }
        if let Ok(installer) = std::env::var("SCRIPTOR_INSTALLER") {
            if !installer.is_empty() {
                config.installer = installer;
            }
        }
        if let Some(secs) = env_parse::<u64>("SCRIPTOR_INSTALL_TIMEOUT")? {
            config.install_timeout = Duration::from_secs(secs);
        }

        Ok(config)
    }

    /// Sets the registry URL
    pub fn with_registry(mut self, url: impl Into<String>) -> Self {
        self.registry_url = Some(url.into());
        self
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.home.as_os_str().is_empty() {
            bail!("home cannot be empty");
        }

        if let Some(url) = &self.registry_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                bail!("registry_url must start with http:// or https://");
            }
        }

        if self.default_timeout.as_secs() == 0 {
            bail!("default_timeout must be greater than 0");
        }

        if self.max_timeout.as_secs() > MAX_TIMEOUT_SECONDS {
            bail!("max_timeout cannot exceed {} seconds", MAX_TIMEOUT_SECONDS);
        }

        if self.default_timeout > self.max_timeout {
            bail!("default_timeout cannot exceed max_timeout");
        }

        if self.limits.max_array_items == 0
            || self.limits.max_string_chars == 0
            || self.limits.max_log_lines == 0
            || self.limits.max_response_bytes == 0
        {
            bail!("output limits must be greater than 0");
        }

        if self.installer.trim().is_empty() {
            bail!("installer cannot be empty");
        }

        Ok(())
    }

    /// User tier root
    pub fn user_scripts_dir(&self) -> PathBuf {
        self.home.join("scripts")
    }

    /// Local append-only execution log
    pub fn history_file(&self) -> PathBuf {
        self.home.join(".runs").join("history.jsonl")
    }

    /// Default directory for offloaded results
    pub fn outputs_dir(&self) -> PathBuf {
        self.home.join("outputs")
    }

    /// Tree the package installer installs into
    pub fn rocks_tree(&self) -> PathBuf {
        self.home.join("lua_modules")
    }

    pub fn lockfile_path(&self) -> PathBuf {
        self.home.join("scripts.lock.json")
    }

    /// Project tier root for a given project
    pub fn project_scripts_dir(project: &Path) -> PathBuf {
        project.join(".ai").join("scripts")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(default_home())
    }
}

fn default_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".scriptor")
}

/// Parse an optional environment variable, failing on malformed values
fn env_parse<T>(name: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("Invalid value for {}: '{}'", name, raw)),
        _ => Ok(None),
    }
}
