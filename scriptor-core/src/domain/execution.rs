//! Execution request and result types

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use uuid::Uuid;

use crate::domain::script::Tier;

/// Timeout applied when a request does not carry one
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 300;

/// Hard ceiling for `timeout_seconds`; larger values are rejected
pub const MAX_TIMEOUT_SECONDS: u64 = 1800;

/// Caller-controlled knobs for a single invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionOptions {
    /// Project root; enables the project tier when present
    pub project_context: Option<PathBuf>,
    /// Lockfile key for the project, computed by the caller
    pub project_hash: Option<String>,
    /// Resolve and validate only
    pub dry_run: bool,
    /// Wall-clock deadline; `None` means the configured default
    pub timeout_seconds: Option<u64>,
    pub save_output: bool,
    pub output_file_path: Option<PathBuf>,
    /// Materialize registry-only scripts into the user tier before running
    pub auto_download: bool,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            project_context: None,
            project_hash: None,
            dry_run: false,
            timeout_seconds: None,
            save_output: true,
            output_file_path: None,
            auto_download: false,
        }
    }
}

/// One invocation of a named script
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub script_name: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(default)]
    pub options: ExecutionOptions,
}

impl ExecutionRequest {
    pub fn new(script_name: impl Into<String>) -> Self {
        Self {
            script_name: script_name.into(),
            parameters: Map::new(),
            options: ExecutionOptions::default(),
        }
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn with_options(mut self, options: ExecutionOptions) -> Self {
        self.options = options;
        self
    }
}

/// Terminal status of an execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    Error,
    Timeout,
    ValidationFailed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Success => "success",
            ExecutionStatus::Error => "error",
            ExecutionStatus::Timeout => "timeout",
            ExecutionStatus::ValidationFailed => "validation_failed",
        }
    }
}

/// Timing and accounting for an execution
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionMetadata {
    /// Always populated, even on failure or timeout
    pub duration_sec: f64,
    /// `cost_per_unit * rows_processed`, or 0 when either is unknown
    pub cost_usd: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows_processed: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_calls_made: Option<u64>,
}

/// Machine-readable failure detail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub details: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traceback: Option<String>,
}

impl ErrorDetail {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: Value::Null,
            traceback: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    pub fn with_traceback(mut self, traceback: impl Into<String>) -> Self {
        self.traceback = Some(traceback.into());
        self
    }
}

/// What kind of value was cut down
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TruncationKind {
    Array,
    String,
    Logs,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TruncationWarning {
    #[serde(rename = "type")]
    pub kind: TruncationKind,
    pub original_count: usize,
    pub kept_count: usize,
}

/// A result written to disk instead of (or in addition to) being returned inline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputFileInfo {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub summary: Value,
}

/// Outcome of one invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub execution_id: Uuid,
    pub script: String,
    pub status: ExecutionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<Tier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
    pub metadata: ExecutionMetadata,
    /// Captured stderr lines, cli invocations only
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub truncation_warnings: BTreeMap<String, TruncationWarning>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_file: Option<OutputFileInfo>,
    /// Non-blocking notice, e.g. a lockfile pin older than the latest release
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advisory: Option<String>,
}

impl ExecutionResult {
    pub fn new(execution_id: Uuid, script: impl Into<String>, status: ExecutionStatus) -> Self {
        Self {
            execution_id,
            script: script.into(),
            status,
            tier: None,
            version: None,
            data: None,
            error: None,
            metadata: ExecutionMetadata::default(),
            logs: Vec::new(),
            truncation_warnings: BTreeMap::new(),
            output_file: None,
            advisory: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }
}
