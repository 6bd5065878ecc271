//! Execution logging
//!
//! Two independent sinks: the local history file and the registry. The local
//! write always happens first; a registry failure is logged and dropped.
//! Nothing here ever fails the execution being logged.

use anyhow::{Context, Result};
use scriptor_core::domain::execution::{ExecutionRequest, ExecutionResult};
use scriptor_core::domain::record::{ExecutionRecord, RecordStatus};
use serde_json::{Map, Value};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::repository::Registry;

/// Keys kept from inputs/outputs in the local history file
const LOCAL_PREVIEW_KEYS: usize = 5;

/// Writes execution records to the local history and the registry
pub struct ExecutionLogger {
    history_file: PathBuf,
    registry: Arc<dyn Registry>,
}

impl ExecutionLogger {
    pub fn new(history_file: PathBuf, registry: Arc<dyn Registry>) -> Self {
        Self {
            history_file,
            registry,
        }
    }

    pub fn history_file(&self) -> &Path {
        &self.history_file
    }

    /// Record that an execution is about to run
    ///
    /// Local only, so long-running scripts show up in the history.
    pub async fn start(
        &self,
        execution_id: Uuid,
        request: &ExecutionRequest,
        version: Option<&str>,
    ) {
        let record = ExecutionRecord {
            timestamp: chrono::Utc::now(),
            execution_id,
            script: request.script_name.clone(),
            status: RecordStatus::Running,
            duration_sec: None,
            project: project_label(request),
            inputs: preview(&Value::Object(request.parameters.clone())),
            outputs: None,
            error: None,
            cost_usd: None,
            script_version: version.map(str::to_string),
            rows_processed: None,
            api_calls_made: None,
        };

        if let Err(e) = self.append_local(&record).await {
            warn!(script = %record.script, "Failed to write start record: {:#}", e);
        }
    }

    /// Record the terminal state of an execution
    pub async fn finish(&self, request: &ExecutionRequest, result: &ExecutionResult) {
        let record = terminal_record(request, result);

        let local = ExecutionRecord {
            inputs: record.inputs.as_ref().and_then(preview),
            outputs: record.outputs.as_ref().and_then(preview),
            ..record.clone()
        };
        if let Err(e) = self.append_local(&local).await {
            warn!(script = %record.script, "Failed to write execution record: {:#}", e);
        }

        match self.registry.record_execution(&record).await {
            Ok(()) => debug!(script = %record.script, "Execution recorded remotely"),
            Err(e) => warn!(script = %record.script, "{:#}", e),
        }
    }

    /// Append one record as a single line
    ///
    /// The whole line goes out in one `write` on a file opened with
    /// O_APPEND, so concurrent appenders never interleave within a line.
    async fn append_local(&self, record: &ExecutionRecord) -> Result<()> {
        let mut line = serde_json::to_vec(record).context("Failed to serialize record")?;
        line.push(b'\n');
        let path = self.history_file.clone();

        tokio::task::spawn_blocking(move || -> Result<()> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("Failed to open {}", path.display()))?;
            file.write_all(&line)
                .with_context(|| format!("Failed to append to {}", path.display()))?;
            Ok(())
        })
        .await
        .context("History writer task panicked")?
    }
}

/// Build the record stored for a finished execution
pub fn terminal_record(request: &ExecutionRequest, result: &ExecutionResult) -> ExecutionRecord {
    ExecutionRecord {
        timestamp: chrono::Utc::now(),
        execution_id: result.execution_id,
        script: result.script.clone(),
        status: result.status.into(),
        duration_sec: Some(round_to(result.metadata.duration_sec, 3)),
        project: project_label(request),
        inputs: Some(Value::Object(request.parameters.clone())),
        outputs: result.data.clone(),
        error: result.error.as_ref().map(|e| e.message.clone()),
        cost_usd: Some(round_to(result.metadata.cost_usd, 4)),
        script_version: result.version.clone(),
        rows_processed: result.metadata.rows_processed,
        api_calls_made: result.metadata.api_calls_made,
    }
}

fn project_label(request: &ExecutionRequest) -> Option<String> {
    request
        .options
        .project_context
        .as_ref()
        .map(|p| p.display().to_string())
}

/// First few keys of an object; other values are kept whole
fn preview(value: &Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::Object(map) if map.is_empty() => None,
        Value::Object(map) => Some(Value::Object(
            map.iter()
                .take(LOCAL_PREVIEW_KEYS)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect::<Map<String, Value>>(),
        )),
        other => Some(other.clone()),
    }
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}
