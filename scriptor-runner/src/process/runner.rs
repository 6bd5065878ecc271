//! CLI-kind executor
//!
//! Runs a script file as a child process in its own process group.
//! Parameters become flags, stdout is read as one JSON document, and stderr
//! is collected line by line as the execution's logs. On deadline the whole
//! group gets SIGTERM, then SIGKILL once the grace period is over.

use serde_json::{Map, Value, json};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::error::{EngineError, MAX_TRACEBACK_CHARS, missing_module, truncate_chars};
use crate::process::flags::render_flags;

/// Interpreters picked by file extension; anything else is executed directly
const INTERPRETERS: &[(&str, &str)] = &[
    ("sh", "sh"),
    ("bash", "bash"),
    ("py", "python3"),
    ("rb", "ruby"),
    ("js", "node"),
    ("pl", "perl"),
];

/// Stderr lines quoted in the error message of a failed run
const STDERR_TAIL_LINES: usize = 20;

/// Outcome of one child process run
///
/// Logs are kept even when the run failed or timed out.
#[derive(Debug)]
pub struct CliRun {
    pub outcome: Result<Value, EngineError>,
    pub logs: Vec<String>,
}

/// Environment given to child processes on top of the runner's own
#[derive(Debug, Clone, Default)]
pub struct ChildEnv {
    pub vars: Vec<(String, String)>,
}

impl ChildEnv {
    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.push((key.into(), value.into()));
        self
    }
}

/// Spawns and supervises cli-kind scripts
pub struct CommandRunner {
    kill_grace: Duration,
}

impl CommandRunner {
    pub fn new(kill_grace: Duration) -> Self {
        Self { kill_grace }
    }

    /// Program and leading arguments used to run `path`
    pub fn invocation(path: &Path) -> (PathBuf, Vec<String>) {
        let interpreter = path
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| INTERPRETERS.iter().find(|(e, _)| *e == ext))
            .map(|(_, program)| *program);

        match interpreter {
            Some(program) => (
                PathBuf::from(program),
                vec![path.display().to_string()],
            ),
            None => (path.to_path_buf(), Vec::new()),
        }
    }

    /// Run `path` with `params` rendered as flags
    pub async fn run(
        &self,
        name: &str,
        path: &Path,
        params: &Map<String, Value>,
        timeout: Duration,
        env: &ChildEnv,
    ) -> CliRun {
        let (program, mut args) = Self::invocation(path);
        args.extend(render_flags(params));
        debug!(script = name, program = %program.display(), ?args, "Spawning script");

        let mut command = Command::new(&program);
        command
            .args(&args)
            .envs(env.vars.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = path.parent() {
            command.current_dir(dir);
        }
        #[cfg(unix)]
        command.process_group(0);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                return CliRun {
                    outcome: Err(EngineError::execution(
                        format!("Failed to start {}: {}", program.display(), e),
                        None,
                    )),
                    logs: Vec::new(),
                };
            }
        };

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let script = name.to_string();
        let stdout_task = tokio::spawn(read_all(stdout));
        let stderr_task = tokio::spawn(read_lines(stderr, script));

        let status = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                stdout_task.abort();
                stderr_task.abort();
                return CliRun {
                    outcome: Err(EngineError::execution(
                        format!("Failed to wait for script: {}", e),
                        None,
                    )),
                    logs: Vec::new(),
                };
            }
            Err(_) => {
                warn!(script = name, "Deadline passed; terminating script");
                self.terminate(&mut child).await;
                stdout_task.abort();
                let logs = collect_logs(stderr_task).await;
                return CliRun {
                    outcome: Err(EngineError::ExecutionTimeout { after: timeout }),
                    logs,
                };
            }
        };

        let stdout = stdout_task.await.unwrap_or_default();
        let logs = collect_logs(stderr_task).await;
        let outcome = interpret_output(&stdout, status.code(), &logs);

        CliRun { outcome, logs }
    }

    /// SIGTERM the process group, then SIGKILL after the grace period
    async fn terminate(&self, child: &mut Child) {
        #[cfg(unix)]
        if let Some(pid) = child.id() {
            // SAFETY: signalling a process group we created; a stale id only
            // yields ESRCH
            unsafe {
                libc::kill(-(pid as i32), libc::SIGTERM);
            }
            if tokio::time::timeout(self.kill_grace, child.wait()).await.is_ok() {
                return;
            }
            warn!(pid, "Script ignored SIGTERM; killing process group");
            unsafe {
                libc::kill(-(pid as i32), libc::SIGKILL);
            }
        }

        if let Err(e) = child.kill().await {
            debug!("Kill after timeout: {}", e);
        }
    }
}

/// Turn captured stdout and the exit code into a payload
///
/// A JSON document on stdout is authoritative whatever the exit code.
/// Without one, exit code 0 wraps the raw text and anything else is an
/// error quoting the end of stderr.
pub fn interpret_output(
    stdout: &str,
    code: Option<i32>,
    logs: &[String],
) -> Result<Value, EngineError> {
    let trimmed = stdout.trim();
    if !trimmed.is_empty() {
        if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
            return Ok(value);
        }
    }

    if code == Some(0) {
        return Ok(json!({ "output": stdout }));
    }

    let tail_start = logs.len().saturating_sub(STDERR_TAIL_LINES);
    let tail = logs[tail_start..].join("\n");
    let message = match code {
        Some(code) => format!("Script exited with code {}", code),
        None => "Script was terminated by a signal".to_string(),
    };
    let traceback = (!tail.is_empty()).then(|| truncate_chars(&tail, MAX_TRACEBACK_CHARS));

    Err(EngineError::execution(message, traceback).with_missing_module(missing_module(&tail)))
}

async fn read_all<R: AsyncRead + Unpin>(handle: Option<R>) -> String {
    let mut buf = Vec::new();
    if let Some(mut handle) = handle {
        let _ = handle.read_to_end(&mut buf).await;
    }
    String::from_utf8_lossy(&buf).into_owned()
}

async fn read_lines<R: AsyncRead + Unpin>(handle: Option<R>, script: String) -> Vec<String> {
    let mut logs = Vec::new();
    let Some(handle) = handle else {
        return logs;
    };

    // Lines are decoded lossily so a stray invalid byte cannot end the stream
    let mut reader = BufReader::new(handle);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\n', '\r']).to_string();
                debug!(target: "script", script = %script, "{}", line);
                logs.push(line);
            }
            Err(e) => {
                debug!(script = %script, "Stopped reading stderr: {}", e);
                break;
            }
        }
    }
    logs
}

async fn collect_logs(task: tokio::task::JoinHandle<Vec<String>>) -> Vec<String> {
    // Grandchildren that escaped the process group may hold stderr open
    match tokio::time::timeout(Duration::from_secs(1), task).await {
        Ok(Ok(logs)) => logs,
        _ => Vec::new(),
    }
}
