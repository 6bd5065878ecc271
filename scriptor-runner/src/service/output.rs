//! Output bounding
//!
//! Keeps results small enough to hand back inline. Oversized arrays, strings
//! and log buffers are cut down with a warning per field. When saving is
//! enabled, results over the response ceiling are written to disk in full and
//! replaced inline by a pointer plus a short summary.

use scriptor_core::domain::execution::{
    ExecutionOptions, OutputFileInfo, TruncationKind, TruncationWarning,
};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const SUMMARY_DEPTH: usize = 2;
const SUMMARY_KEYS: usize = 10;
const SUMMARY_ITEMS: usize = 5;
const SUMMARY_SCALAR_CHARS: usize = 100;
const SUMMARY_TOP_SCALAR_CHARS: usize = 200;

/// Size limits applied to every result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputLimits {
    pub max_array_items: usize,
    pub max_string_chars: usize,
    pub max_log_lines: usize,
    /// Serialized size above which results are offloaded
    pub max_response_bytes: usize,
}

impl Default for OutputLimits {
    fn default() -> Self {
        Self {
            max_array_items: 1000,
            max_string_chars: 10_000,
            max_log_lines: 500,
            max_response_bytes: 1_000_000,
        }
    }
}

/// Result data after bounding
#[derive(Debug, Clone)]
pub struct BoundedOutput {
    pub data: Value,
    pub logs: Vec<String>,
    pub warnings: BTreeMap<String, TruncationWarning>,
    pub output_file: Option<OutputFileInfo>,
}

/// Applies [`OutputLimits`] and handles offloading
pub struct OutputManager {
    limits: OutputLimits,
    outputs_dir: PathBuf,
}

impl OutputManager {
    /// Creates an output manager writing default offload files under `outputs_dir`
    pub fn new(limits: OutputLimits, outputs_dir: PathBuf) -> Self {
        Self { limits, outputs_dir }
    }

    /// Bound `data` and `logs` for one execution of `script`
    ///
    /// Never fails. If an offload file cannot be written the data is
    /// truncated in place instead.
    pub async fn bound(
        &self,
        script: &str,
        data: Value,
        logs: Vec<String>,
        options: &ExecutionOptions,
    ) -> BoundedOutput {
        let mut warnings = BTreeMap::new();
        let logs = self.bound_logs(logs, &mut warnings);
        let mut output_file = None;

        if options.save_output {
            let size = serde_json::to_vec(&data).map(|v| v.len()).unwrap_or(0);
            let oversized = size > self.limits.max_response_bytes;
            let explicit = options
                .output_file_path
                .as_deref()
                .map(|path| resolve_output_path(path, options.project_context.as_deref()));

            if oversized || explicit.is_some() {
                let path = explicit.unwrap_or_else(|| self.default_output_path(script));
                match write_output(&path, &data).await {
                    Ok(size_bytes) => {
                        info!(
                            script,
                            path = %path.display(),
                            size_bytes,
                            "Saved full result to file"
                        );
                        let info = OutputFileInfo {
                            path,
                            size_bytes,
                            summary: summarize(&data),
                        };

                        if oversized {
                            let inline = json!({
                                "output_file": info.path,
                                "file_size_bytes": info.size_bytes,
                                "summary": info.summary,
                            });
                            return BoundedOutput {
                                data: inline,
                                logs,
                                warnings,
                                output_file: Some(info),
                            };
                        }
                        output_file = Some(info);
                    }
                    Err(e) => {
                        warn!(script, path = %path.display(), "Failed to save result: {:#}", e);
                    }
                }
            }
        }

        let data = self.truncate(data, &mut warnings);
        BoundedOutput {
            data,
            logs,
            warnings,
            output_file,
        }
    }

    /// Truncate arrays and strings anywhere in `data`
    pub fn truncate(
        &self,
        data: Value,
        warnings: &mut BTreeMap<String, TruncationWarning>,
    ) -> Value {
        truncate_value(data, "", &self.limits, warnings)
    }

    /// Keep the first `max_log_lines` lines
    pub fn bound_logs(
        &self,
        mut logs: Vec<String>,
        warnings: &mut BTreeMap<String, TruncationWarning>,
    ) -> Vec<String> {
        if logs.len() > self.limits.max_log_lines {
            warnings.insert(
                "logs".to_string(),
                TruncationWarning {
                    kind: TruncationKind::Logs,
                    original_count: logs.len(),
                    kept_count: self.limits.max_log_lines,
                },
            );
            logs.truncate(self.limits.max_log_lines);
        }
        logs
    }

    fn default_output_path(&self, script: &str) -> PathBuf {
        self.outputs_dir.join(script).join(format!(
            "{}_results.json",
            chrono::Utc::now().timestamp_millis()
        ))
    }
}

fn resolve_output_path(path: &Path, project: Option<&Path>) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    match project {
        Some(project) => project.join(path),
        None => std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf()),
    }
}

async fn write_output(path: &Path, data: &Value) -> anyhow::Result<u64> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let body = serde_json::to_vec_pretty(data)?;
    tokio::fs::write(path, &body).await?;
    Ok(body.len() as u64)
}

fn warning_key(path: &str) -> String {
    if path.is_empty() {
        "root".to_string()
    } else {
        path.to_string()
    }
}

fn truncate_value(
    value: Value,
    path: &str,
    limits: &OutputLimits,
    warnings: &mut BTreeMap<String, TruncationWarning>,
) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (key, child) in map {
                let child_path = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", path, key)
                };
                out.insert(key, truncate_value(child, &child_path, limits, warnings));
            }
            Value::Object(out)
        }
        Value::Array(mut items) => {
            if items.len() > limits.max_array_items {
                warnings.insert(
                    warning_key(path),
                    TruncationWarning {
                        kind: TruncationKind::Array,
                        original_count: items.len(),
                        kept_count: limits.max_array_items,
                    },
                );
                items.truncate(limits.max_array_items);
            }
            Value::Array(
                items
                    .into_iter()
                    .enumerate()
                    .map(|(i, item)| {
                        truncate_value(item, &format!("{}[{}]", path, i), limits, warnings)
                    })
                    .collect(),
            )
        }
        Value::String(s) => {
            let count = s.chars().count();
            if count > limits.max_string_chars {
                warnings.insert(
                    warning_key(path),
                    TruncationWarning {
                        kind: TruncationKind::String,
                        original_count: count,
                        kept_count: limits.max_string_chars,
                    },
                );
                Value::String(crate::error::truncate_chars(&s, limits.max_string_chars))
            } else {
                Value::String(s)
            }
        }
        other => other,
    }
}

/// Short structural preview of a result
pub fn summarize(data: &Value) -> Value {
    match data {
        Value::Object(_) | Value::Array(_) => summarize_at(data, 0),
        scalar => Value::String(scalar_preview(scalar, SUMMARY_TOP_SCALAR_CHARS)),
    }
}

fn summarize_at(data: &Value, depth: usize) -> Value {
    if depth >= SUMMARY_DEPTH {
        return json!({ "_type": type_name(data), "_summary": "Max depth reached" });
    }

    match data {
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, value) in map.iter().take(SUMMARY_KEYS) {
                out.insert(key.clone(), summarize_child(value, depth));
            }
            if map.len() > SUMMARY_KEYS {
                out.insert("_other_keys".to_string(), json!(map.len() - SUMMARY_KEYS));
            }
            Value::Object(out)
        }
        Value::Array(items) => {
            let mut out: Vec<Value> = items
                .iter()
                .take(SUMMARY_ITEMS)
                .map(|item| summarize_child(item, depth))
                .collect();
            if items.len() > SUMMARY_ITEMS {
                out.push(Value::String(format!(
                    "_and_{}_more_items",
                    items.len() - SUMMARY_ITEMS
                )));
            }
            Value::Array(out)
        }
        scalar => Value::String(scalar_preview(scalar, SUMMARY_TOP_SCALAR_CHARS)),
    }
}

fn summarize_child(value: &Value, depth: usize) -> Value {
    match value {
        Value::Object(_) | Value::Array(_) => summarize_at(value, depth + 1),
        scalar => Value::String(scalar_preview(scalar, SUMMARY_SCALAR_CHARS)),
    }
}

fn scalar_preview(value: &Value, max: usize) -> String {
    let text = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    crate::error::truncate_chars(&text, max)
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
