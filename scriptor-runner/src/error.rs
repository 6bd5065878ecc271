//! Error taxonomy for resolution and execution
//!
//! None of these errors cross the engine boundary as `Err`: the engine turns
//! every `EngineError` into an `ExecutionResult` through [`EngineError::status`]
//! and [`EngineError::detail`].

use scriptor_core::domain::execution::{ErrorDetail, ExecutionStatus};
use scriptor_core::domain::script::ScriptDescriptor;
use serde::Serialize;
use serde_json::json;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Longest traceback kept in an error detail
pub const MAX_TRACEBACK_CHARS: usize = 2000;

/// Resolution failures
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("Script '{name}' not found in project, user or registry")]
    NotFound { name: String },

    /// Present in the registry only; recoverable by materializing it
    #[error("Script '{name}' is not available locally ({hint})")]
    NotFoundLocally {
        name: String,
        hint: String,
        descriptor: Box<ScriptDescriptor>,
        advisory: Option<String>,
    },

    #[error("Script '{name}' at {} is invalid: {reason}", .path.display())]
    InvalidScript {
        name: String,
        path: PathBuf,
        reason: String,
    },

    #[error("Failed to materialize '{name}': {reason}")]
    MaterializeFailed { name: String, reason: String },
}

/// A dependency that could not be installed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedInstall {
    pub import_name: String,
    pub package: String,
    pub reason: String,
}

/// Everything that can end an execution early
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Script '{name}' not found")]
    ScriptNotFound { name: String },

    #[error("Script '{name}' is only available in the registry")]
    ScriptNotFoundLocally {
        name: String,
        version: Option<String>,
        hint: String,
        advisory: Option<String>,
    },

    #[error("Script '{name}' is invalid: {reason}")]
    InvalidScript { name: String, reason: String },

    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    #[error("Validation failed: {}", .blockers.join("; "))]
    ValidationFailed {
        missing_env_vars: Vec<String>,
        blockers: Vec<String>,
    },

    #[error("Failed to install {} dependencies", .failed.len())]
    DependencyInstallFailed {
        installed: Vec<String>,
        failed: Vec<FailedInstall>,
    },

    #[error("{message}")]
    ExecutionError {
        message: String,
        traceback: Option<String>,
        missing_module: Option<String>,
    },

    #[error("Execution timed out after {}s", .after.as_secs())]
    ExecutionTimeout { after: Duration },
}

impl EngineError {
    /// Build an execution error, capping the traceback
    pub fn execution(message: impl Into<String>, traceback: Option<String>) -> Self {
        Self::ExecutionError {
            message: message.into(),
            traceback: traceback.map(|t| truncate_chars(&t, MAX_TRACEBACK_CHARS)),
            missing_module: None,
        }
    }

    /// Attach the name of a module the script failed to load
    pub fn with_missing_module(mut self, module: Option<String>) -> Self {
        if let Self::ExecutionError { missing_module, .. } = &mut self {
            *missing_module = module;
        }
        self
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::ScriptNotFound { .. } => "SCRIPT_NOT_FOUND",
            Self::ScriptNotFoundLocally { .. } => "SCRIPT_NOT_FOUND_LOCALLY",
            Self::InvalidScript { .. } => "INVALID_SCRIPT",
            Self::InvalidRequest { .. } => "INVALID_REQUEST",
            Self::ValidationFailed { .. } => "VALIDATION_FAILED",
            Self::DependencyInstallFailed { .. } => "DEPENDENCY_INSTALL_FAILED",
            Self::ExecutionError { .. } => "EXECUTION_ERROR",
            Self::ExecutionTimeout { .. } => "EXECUTION_TIMEOUT",
        }
    }

    /// Status reported for this error
    pub fn status(&self) -> ExecutionStatus {
        match self {
            Self::ValidationFailed { .. } => ExecutionStatus::ValidationFailed,
            Self::ExecutionTimeout { .. } => ExecutionStatus::Timeout,
            _ => ExecutionStatus::Error,
        }
    }

    /// Machine-readable detail for the result
    pub fn detail(&self) -> ErrorDetail {
        let detail = ErrorDetail::new(self.code(), self.to_string());
        match self {
            Self::ScriptNotFound { .. }
            | Self::InvalidScript { .. }
            | Self::InvalidRequest { .. } => detail,
            Self::ScriptNotFoundLocally {
                version,
                hint,
                advisory,
                ..
            } => detail.with_details(json!({
                "version": version,
                "hint": hint,
                "advisory": advisory,
            })),
            Self::ValidationFailed {
                missing_env_vars,
                blockers,
            } => detail.with_details(json!({
                "missing_env_vars": missing_env_vars,
                "blockers": blockers,
            })),
            Self::DependencyInstallFailed { installed, failed } => {
                detail.with_details(json!({
                    "dependency_error": {
                        "installed": installed,
                        "failed": failed,
                    }
                }))
            }
            Self::ExecutionError {
                traceback,
                missing_module,
                ..
            } => {
                let detail = match missing_module {
                    Some(module) => detail.with_details(json!({ "missing_module": module })),
                    None => detail,
                };
                match traceback {
                    Some(traceback) => detail.with_traceback(traceback.clone()),
                    None => detail,
                }
            }
            Self::ExecutionTimeout { after } => {
                detail.with_details(json!({ "timeout_seconds": after.as_secs() }))
            }
        }
    }
}

impl From<ResolveError> for EngineError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::NotFound { name } => Self::ScriptNotFound { name },
            ResolveError::NotFoundLocally {
                name,
                hint,
                descriptor,
                advisory,
            } => Self::ScriptNotFoundLocally {
                name,
                version: descriptor.version,
                hint,
                advisory,
            },
            ResolveError::InvalidScript { name, reason, .. }
            | ResolveError::MaterializeFailed { name, reason } => {
                Self::InvalidScript { name, reason }
            }
        }
    }
}

/// Module named in a Lua `module 'x' not found` message, if any
pub fn missing_module(text: &str) -> Option<String> {
    let start = text.find("module '")? + "module '".len();
    let rest = &text[start..];
    let end = rest.find('\'')?;
    rest[end..]
        .starts_with("' not found")
        .then(|| rest[..end].to_string())
}

/// Keep at most `max` characters of `text`
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
