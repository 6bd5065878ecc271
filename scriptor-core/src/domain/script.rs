//! Script domain types
//!
//! A `ScriptDescriptor` is built fresh on every resolution call and says
//! exactly where a script lives and how it has to be invoked.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

/// Storage tier a script was resolved from.
///
/// Precedence is fixed: `Project` > `User` > `Registry`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Project,
    User,
    Registry,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Project => "project",
            Tier::User => "user",
            Tier::Registry => "registry",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a script is invoked
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationKind {
    /// In-process call of the script's `execute(params)` function
    #[default]
    Function,
    /// Child process receiving parameters as command-line flags
    Cli,
}

impl fmt::Display for InvocationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvocationKind::Function => f.write_str("function"),
            InvocationKind::Cli => f.write_str("cli"),
        }
    }
}

/// Where the script's code lives, tagged by invocation strategy.
///
/// Decided once when the descriptor is built; the engine never re-detects it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Entry {
    /// Lua source exposing `execute(params)`
    Function { entry_point: PathBuf },
    /// Executable or interpreted file run as a child process
    Cli { executable_path: PathBuf },
    /// Code cached in the registry; must be materialized before it can run
    Registry {
        module_path: String,
        kind: InvocationKind,
    },
}

impl Entry {
    pub fn kind(&self) -> InvocationKind {
        match self {
            Entry::Function { .. } => InvocationKind::Function,
            Entry::Cli { .. } => InvocationKind::Cli,
            Entry::Registry { kind, .. } => *kind,
        }
    }

    /// Local path of the entry, if the script is on disk
    pub fn path(&self) -> Option<&Path> {
        match self {
            Entry::Function { entry_point } => Some(entry_point),
            Entry::Cli { executable_path } => Some(executable_path),
            Entry::Registry { .. } => None,
        }
    }
}

/// A declared dependency of a script
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    /// Name used to load the module (`require("lfs")`)
    pub import_name: String,
    /// Installable package name, when it differs from the import name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_name: Option<String>,
    /// Version constraint such as `1.8.0` or `>=1.2`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_constraint: Option<String>,
}

impl Dependency {
    pub fn new(import_name: impl Into<String>) -> Self {
        Self {
            import_name: import_name.into(),
            package_name: None,
            version_constraint: None,
        }
    }

    pub fn with_package(mut self, package: impl Into<String>) -> Self {
        self.package_name = Some(package.into());
        self
    }

    pub fn with_constraint(mut self, constraint: impl Into<String>) -> Self {
        self.version_constraint = Some(constraint.into());
        self
    }
}

/// Resolved identity of an executable unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptDescriptor {
    pub name: String,
    pub category: Option<String>,
    pub subcategory: Option<String>,
    pub tier: Tier,
    pub entry: Entry,
    /// Required for the registry tier, optional for local files
    pub version: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
    #[serde(default)]
    pub required_env_vars: BTreeSet<String>,
    pub cost_per_unit: Option<f64>,
    pub cost_unit: Option<String>,
}

impl ScriptDescriptor {
    pub fn invocation_kind(&self) -> InvocationKind {
        self.entry.kind()
    }

    /// True when the script can run without a materialization step
    pub fn is_local(&self) -> bool {
        self.tier != Tier::Registry
    }
}
