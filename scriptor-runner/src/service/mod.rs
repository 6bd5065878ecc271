//! Service layer
//!
//! Services hold the engine's business logic: resolving scripts, managing
//! their dependencies, bounding output and recording executions. They use
//! the repositories for external state.

mod dependencies;
mod history;
mod logger;
pub mod metadata;
mod output;
mod resolver;

pub use dependencies::{
    CommandInstaller, DependencyManager, DependencyProbe, InstallReport, LuaProbe,
    PackageInstaller, ProbeCache, import_for_package, normalize_constraint, package_for_import,
};
pub use history::{ExecutionHistory, ScriptStats};
pub use logger::{ExecutionLogger, terminal_record};
pub use output::{BoundedOutput, OutputLimits, OutputManager, summarize};
pub use resolver::{Resolution, ScriptResolver, categories, find_in_root};
