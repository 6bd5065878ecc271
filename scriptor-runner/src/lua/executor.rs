//! Function-kind executor
//!
//! Runs a Lua script's `execute(params)` on a blocking worker thread. The
//! deadline is enforced twice:
//! - an instruction hook inside the VM aborts pure Lua code once it passes;
//! - the engine stops waiting for the worker when it passes.
//!
//! A native call blocked inside a C module cannot be interrupted. In that
//! case the worker is abandoned and finishes on its own.

use scriptor_lua::{
    EnvModule, LogModule, ModuleRegistry, SearchPaths, create_execution_sandbox,
    is_deadline_error, load_script, set_deadline,
};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::error::{EngineError, missing_module};
use crate::lua::sinks::{ProcessEnv, TracingLogSink};

/// Runs function-kind scripts in-process
pub struct FunctionExecutor {
    rocks_tree: PathBuf,
}

impl FunctionExecutor {
    /// Creates an executor resolving installed modules from `rocks_tree`
    pub fn new(rocks_tree: PathBuf) -> Self {
        Self { rocks_tree }
    }

    /// `require` search paths for a script
    ///
    /// The script's own directory comes first, then its tier roots (for
    /// shared helper modules), then the installer tree.
    pub fn search_paths(&self, entry_point: &Path, tier_roots: &[PathBuf]) -> SearchPaths {
        let mut paths = SearchPaths::new();
        if let Some(dir) = entry_point.parent() {
            paths = paths.with_module_dir(dir);
        }
        for root in tier_roots {
            if root.is_dir() {
                paths = paths.with_module_dir(root);
            }
        }
        paths.with_rocks_tree(&self.rocks_tree)
    }

    /// Call `execute(params)` and return its JSON result
    pub async fn execute(
        &self,
        name: &str,
        entry_point: &Path,
        params: Value,
        timeout: Duration,
        paths: SearchPaths,
    ) -> Result<Value, EngineError> {
        let source = tokio::fs::read_to_string(entry_point).await.map_err(|e| {
            EngineError::execution(
                format!("Failed to read {}: {}", entry_point.display(), e),
                None,
            )
        })?;

        let script = name.to_string();
        let deadline = Instant::now() + timeout;
        let worker = tokio::task::spawn_blocking(move || {
            run_function(&script, &source, &params, &paths, deadline, timeout)
        });

        match tokio::time::timeout(timeout, worker).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(EngineError::execution(
                format!("Script worker failed: {}", e),
                None,
            )),
            Err(_) => {
                warn!(script = name, "Deadline passed; abandoning script worker");
                Err(EngineError::ExecutionTimeout { after: timeout })
            }
        }
    }
}

fn run_function(
    name: &str,
    source: &str,
    params: &Value,
    paths: &SearchPaths,
    deadline: Instant,
    timeout: Duration,
) -> Result<Value, EngineError> {
    let mut modules = ModuleRegistry::new();
    modules.register(LogModule::new(TracingLogSink::new(name)));
    modules.register(EnvModule::new(ProcessEnv));

    let lua = create_execution_sandbox(&modules, paths).map_err(|e| {
        EngineError::execution(format!("Failed to create execution sandbox: {}", e), None)
    })?;
    set_deadline(&lua, deadline);

    let definition = load_script(&lua, source, name).map_err(|e| {
        let text = format!("{:#}", e);
        if text.contains(scriptor_lua::DEADLINE_EXCEEDED) {
            return EngineError::ExecutionTimeout { after: timeout };
        }
        EngineError::InvalidScript {
            name: name.to_string(),
            reason: text,
        }
    })?;

    debug!(script = name, "Calling execute");
    definition
        .call(&lua, params)
        .map_err(|e| lua_failure(&e, timeout))
}

fn lua_failure(error: &mlua::Error, timeout: Duration) -> EngineError {
    if is_deadline_error(error) {
        return EngineError::ExecutionTimeout { after: timeout };
    }

    let text = error.to_string();
    let message = text.lines().next().unwrap_or("Script raised an error").to_string();
    let traceback = text.contains('\n').then(|| text.clone());

    EngineError::execution(message, traceback).with_missing_module(missing_module(&text))
}
