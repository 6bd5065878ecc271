//! Run history and per-script statistics over the local history file

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use scriptor_core::domain::record::{ExecutionRecord, RecordStatus};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use tracing::debug;

const MAX_COMMON_ERRORS: usize = 3;

/// Aggregated outcome of a script's recent runs
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScriptStats {
    pub total_runs: usize,
    pub success_rate: f64,
    pub error_rate: f64,
    pub avg_duration_sec: f64,
    pub common_errors: Vec<String>,
}

/// Read side of the local history file
pub struct ExecutionHistory {
    history_file: PathBuf,
}

impl ExecutionHistory {
    pub fn new(history_file: PathBuf) -> Self {
        Self { history_file }
    }

    /// Records from the last `days` days, newest first
    ///
    /// Lines that fail to parse are skipped.
    pub async fn history(
        &self,
        days: u32,
        script: Option<&str>,
        project: Option<&str>,
    ) -> Result<Vec<ExecutionRecord>> {
        let raw = match tokio::fs::read_to_string(&self.history_file).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to read {}", self.history_file.display())
                });
            }
        };

        let cutoff = Utc::now() - Duration::days(i64::from(days));
        let mut records: Vec<ExecutionRecord> = raw
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str::<ExecutionRecord>(line) {
                Ok(record) => Some(record),
                Err(e) => {
                    debug!("Skipping malformed history line: {}", e);
                    None
                }
            })
            .filter(|record| record.timestamp > cutoff)
            .filter(|record| script.is_none_or(|s| record.script == s))
            .filter(|record| project.is_none_or(|p| record.project.as_deref() == Some(p)))
            .collect();

        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(records)
    }

    /// Per-script statistics over the last `days` days
    ///
    /// Start records are ignored; every other status that is not a success
    /// counts as an error.
    pub async fn stats(
        &self,
        days: u32,
        project: Option<&str>,
    ) -> Result<BTreeMap<String, ScriptStats>> {
        #[derive(Default)]
        struct Tally {
            success: usize,
            failed: usize,
            duration: f64,
            errors: BTreeSet<String>,
        }

        let records = self.history(days, None, project).await?;
        let mut tallies: BTreeMap<String, Tally> = BTreeMap::new();

        for record in records.iter().filter(|r| r.is_terminal()) {
            let tally = tallies.entry(record.script.clone()).or_default();
            tally.duration += record.duration_sec.unwrap_or(0.0);
            if record.status == RecordStatus::Success {
                tally.success += 1;
            } else {
                tally.failed += 1;
                if let Some(error) = &record.error {
                    tally.errors.insert(error.clone());
                }
            }
        }

        Ok(tallies
            .into_iter()
            .map(|(script, tally)| {
                let total = tally.success + tally.failed;
                let rate = |n: usize| if total > 0 { n as f64 / total as f64 } else { 0.0 };
                let stats = ScriptStats {
                    total_runs: total,
                    success_rate: rate(tally.success),
                    error_rate: rate(tally.failed),
                    avg_duration_sec: if total > 0 {
                        tally.duration / total as f64
                    } else {
                        0.0
                    },
                    common_errors: tally.errors.into_iter().take(MAX_COMMON_ERRORS).collect(),
                };
                (script, stats)
            })
            .collect())
    }
}
