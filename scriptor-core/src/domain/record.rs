//! Execution log records
//!
//! One record is one line of the local history file and one row sent to
//! the registry's execution log.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::domain::execution::ExecutionStatus;

/// Status as stored in the history log.
///
/// `Running` marks the start record written before a script is invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Running,
    Success,
    Error,
    Timeout,
    ValidationFailed,
}

impl From<ExecutionStatus> for RecordStatus {
    fn from(status: ExecutionStatus) -> Self {
        match status {
            ExecutionStatus::Success => RecordStatus::Success,
            ExecutionStatus::Error => RecordStatus::Error,
            ExecutionStatus::Timeout => RecordStatus::Timeout,
            ExecutionStatus::ValidationFailed => RecordStatus::ValidationFailed,
        }
    }
}

/// A single self-contained execution record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub execution_id: Uuid,
    pub script: String,
    pub status: RecordStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_sec: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inputs: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows_processed: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_calls_made: Option<u64>,
}

impl ExecutionRecord {
    pub fn is_terminal(&self) -> bool {
        self.status != RecordStatus::Running
    }
}
