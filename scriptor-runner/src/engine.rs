//! Execution engine
//!
//! Drives one request through its states:
//! resolving, validating, installing dependencies, executing, bounding the
//! output and logging. Every outcome comes back as an [`ExecutionResult`];
//! failures are described by its `status` and `error` fields, never by a
//! returned `Err`.

use anyhow::Result;
use scriptor_core::domain::execution::{
    ExecutionOptions, ExecutionRequest, ExecutionResult, ExecutionStatus,
};
use scriptor_core::domain::script::{Entry, ScriptDescriptor};
use scriptor_lua::SearchPaths;
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{EngineError, ResolveError, missing_module};
use crate::lua::FunctionExecutor;
use crate::process::{ChildEnv, CommandRunner};
use crate::repository::{DisabledRegistry, HttpRegistry, JsonLockfileStore, LockfileStore, Registry};
use crate::service::{
    CommandInstaller, DependencyManager, DependencyProbe, ExecutionHistory, ExecutionLogger,
    LuaProbe, OutputManager, PackageInstaller, ProbeCache, Resolution, ScriptResolver,
};

/// Message used when a script reports an error without describing it
const UNDESCRIBED_ERROR: &str = "Script reported an error";

/// Data and accounting extracted from a successful payload
#[derive(Debug, Clone, PartialEq)]
pub struct Completed {
    pub data: Value,
    pub rows_processed: Option<u64>,
    pub api_calls_made: Option<u64>,
}

enum Finished {
    DryRun(Value),
    Ran(Completed),
}

/// What is known about a request when it ends
#[derive(Default)]
struct Progress {
    descriptor: Option<ScriptDescriptor>,
    advisory: Option<String>,
    executing_since: Option<Instant>,
    logs: Vec<String>,
}

/// Resolves, validates and runs scripts
///
/// Holds no per-request state, so one engine can serve many concurrent
/// executions.
pub struct ExecutionEngine {
    default_timeout: Duration,
    max_timeout: Duration,
    resolver: ScriptResolver,
    dependencies: DependencyManager,
    functions: FunctionExecutor,
    commands: CommandRunner,
    output: OutputManager,
    logger: ExecutionLogger,
    history: ExecutionHistory,
}

impl ExecutionEngine {
    /// Build an engine with the production collaborators
    pub fn from_config(config: &Config) -> Result<Self> {
        let registry: Arc<dyn Registry> = match &config.registry_url {
            Some(url) => Arc::new(HttpRegistry::new(url, config.registry_timeout)?),
            None => Arc::new(DisabledRegistry),
        };
        let lockfile = Arc::new(JsonLockfileStore::new(config.lockfile_path()));
        let probe = Arc::new(LuaProbe::new(
            SearchPaths::new().with_rocks_tree(config.rocks_tree()),
        ));
        let installer = Arc::new(CommandInstaller::new(
            config.installer.clone(),
            config.rocks_tree(),
            config.install_timeout,
        ));

        Ok(Self::new(config, registry, lockfile, probe, installer))
    }

    pub fn new(
        config: &Config,
        registry: Arc<dyn Registry>,
        lockfile: Arc<dyn LockfileStore>,
        probe: Arc<dyn DependencyProbe>,
        installer: Arc<dyn PackageInstaller>,
    ) -> Self {
        Self {
            default_timeout: config.default_timeout,
            max_timeout: config.max_timeout,
            resolver: ScriptResolver::new(config.user_scripts_dir(), registry.clone(), lockfile),
            dependencies: DependencyManager::new(probe, installer, ProbeCache::new()),
            functions: FunctionExecutor::new(config.rocks_tree()),
            commands: CommandRunner::new(config.kill_grace),
            output: OutputManager::new(config.limits, config.outputs_dir()),
            logger: ExecutionLogger::new(config.history_file(), registry),
            history: ExecutionHistory::new(config.history_file()),
        }
    }

    /// Resolve a script without running it
    pub async fn resolve(
        &self,
        name: &str,
        options: &ExecutionOptions,
    ) -> Result<Resolution, ResolveError> {
        self.resolver
            .resolve(
                name,
                options.project_context.as_deref(),
                options.project_hash.as_deref(),
            )
            .await
    }

    /// Download a registry script into the user tier
    pub async fn materialize(
        &self,
        name: &str,
        version: Option<&str>,
        options: &ExecutionOptions,
    ) -> Result<ScriptDescriptor, ResolveError> {
        self.resolver
            .materialize(name, version, options.project_hash.as_deref())
            .await
    }

    /// Read access to the local execution log
    pub fn history(&self) -> &ExecutionHistory {
        &self.history
    }

    /// Run one request to completion
    pub async fn execute(&self, request: ExecutionRequest) -> ExecutionResult {
        let execution_id = Uuid::new_v4();
        let received = Instant::now();
        info!(execution_id = %execution_id, script = %request.script_name, "Execution requested");

        let mut progress = Progress::default();
        let outcome = self.drive(execution_id, &request, &mut progress).await;
        let duration = progress.executing_since.unwrap_or(received).elapsed();

        let mut result = ExecutionResult::new(
            execution_id,
            request.script_name.clone(),
            ExecutionStatus::Success,
        );
        if let Some(descriptor) = &progress.descriptor {
            result.tier = Some(descriptor.tier);
            result.version = descriptor.version.clone();
        }
        result.advisory = progress.advisory.take();
        result.metadata.duration_sec = duration.as_secs_f64();

        match outcome {
            Ok(Finished::DryRun(data)) => {
                result.data = Some(data);
                info!(execution_id = %execution_id, "Dry run complete");
                return result;
            }
            Ok(Finished::Ran(completed)) => {
                result.metadata.cost_usd = progress
                    .descriptor
                    .as_ref()
                    .and_then(|d| d.cost_per_unit)
                    .zip(completed.rows_processed)
                    .map(|(cost, rows)| cost * rows as f64)
                    .unwrap_or(0.0);
                result.metadata.rows_processed = completed.rows_processed;
                result.metadata.api_calls_made = completed.api_calls_made;

                let bounded = self
                    .output
                    .bound(
                        &request.script_name,
                        completed.data,
                        std::mem::take(&mut progress.logs),
                        &request.options,
                    )
                    .await;
                result.data = Some(bounded.data);
                result.logs = bounded.logs;
                result.truncation_warnings = bounded.warnings;
                result.output_file = bounded.output_file;
            }
            Err(err) => {
                match &err {
                    EngineError::ExecutionError { .. } | EngineError::ExecutionTimeout { .. } => {
                        warn!(
                            execution_id = %execution_id,
                            script = %request.script_name,
                            "{}",
                            err
                        )
                    }
                    _ => debug!(
                        execution_id = %execution_id,
                        script = %request.script_name,
                        "{}",
                        err
                    ),
                }
                result.status = err.status();
                result.error = Some(err.detail());

                let mut warnings = BTreeMap::new();
                result.logs = self
                    .output
                    .bound_logs(std::mem::take(&mut progress.logs), &mut warnings);
                result.truncation_warnings = warnings;
            }
        }

        info!(
            execution_id = %execution_id,
            script = %request.script_name,
            status = result.status.as_str(),
            duration_sec = result.metadata.duration_sec,
            "Execution finished"
        );

        if !request.options.dry_run {
            self.logger.finish(&request, &result).await;
        }
        result
    }

    async fn drive(
        &self,
        execution_id: Uuid,
        request: &ExecutionRequest,
        progress: &mut Progress,
    ) -> Result<Finished, EngineError> {
        check_name(&request.script_name)?;
        let options = &request.options;

        let descriptor = self.resolve_for_run(request, progress).await?;
        progress.descriptor = Some(descriptor.clone());

        let timeout = self.validate(&descriptor, options)?;
        if options.dry_run {
            let data = self.readiness(&descriptor, progress.advisory.as_deref()).await;
            return Ok(Finished::DryRun(data));
        }

        let report = self.dependencies.ensure_installed(&descriptor).await;
        if !report.is_success() {
            return Err(EngineError::DependencyInstallFailed {
                installed: report.installed,
                failed: report.failed,
            });
        }
        if !report.installed.is_empty() {
            info!(
                script = %descriptor.name,
                installed = ?report.installed,
                "Installed dependencies"
            );
        }

        // Runs that reach this point leave two local lines: this `running`
        // record and the terminal one from `finish`, sharing the execution id.
        self.logger
            .start(execution_id, request, descriptor.version.as_deref())
            .await;
        progress.executing_since = Some(Instant::now());
        info!(
            execution_id = %execution_id,
            script = %descriptor.name,
            tier = %descriptor.tier,
            kind = %descriptor.invocation_kind(),
            timeout_sec = timeout.as_secs(),
            "Executing script"
        );

        let payload = self.invoke(&descriptor, request, timeout, progress).await?;
        interpret_payload(payload).map(Finished::Ran)
    }

    async fn resolve_for_run(
        &self,
        request: &ExecutionRequest,
        progress: &mut Progress,
    ) -> Result<ScriptDescriptor, EngineError> {
        let options = &request.options;

        match self.resolve(&request.script_name, options).await {
            Ok(resolution) => {
                progress.advisory = resolution.advisory;
                Ok(resolution.descriptor)
            }
            Err(ResolveError::NotFoundLocally {
                name,
                descriptor,
                advisory,
                ..
            }) if options.auto_download && !options.dry_run => {
                info!(
                    script = %name,
                    version = ?descriptor.version,
                    "Downloading script before running"
                );
                progress.advisory = advisory;
                Ok(self
                    .materialize(&name, descriptor.version.as_deref(), options)
                    .await?)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Check everything that must hold before anything is installed or run
    ///
    /// Returns the effective deadline.
    fn validate(
        &self,
        descriptor: &ScriptDescriptor,
        options: &ExecutionOptions,
    ) -> Result<Duration, EngineError> {
        let missing_env_vars: Vec<String> = descriptor
            .required_env_vars
            .iter()
            .filter(|name| !env_present(name))
            .cloned()
            .collect();
        let mut blockers: Vec<String> = missing_env_vars
            .iter()
            .map(|name| format!("Missing environment variable: {}", name))
            .collect();

        let timeout = match options.timeout_seconds {
            None => self.default_timeout,
            Some(secs) => Duration::from_secs(secs.max(1)),
        };
        if timeout > self.max_timeout {
            blockers.push(format!(
                "timeout_seconds {} exceeds the maximum of {} seconds",
                timeout.as_secs(),
                self.max_timeout.as_secs()
            ));
        }

        if blockers.is_empty() {
            Ok(timeout)
        } else {
            Err(EngineError::ValidationFailed {
                missing_env_vars,
                blockers,
            })
        }
    }

    /// Dry-run payload; probes dependencies but never installs or invokes
    async fn readiness(&self, descriptor: &ScriptDescriptor, advisory: Option<&str>) -> Value {
        let missing: Vec<&str> = self
            .dependencies
            .missing(&descriptor.dependencies)
            .await
            .into_iter()
            .map(|dependency| dependency.import_name.as_str())
            .collect();

        let mut data = json!({
            "dry_run": true,
            "ready": true,
            "script": descriptor.name,
            "tier": descriptor.tier,
            "invocation": descriptor.invocation_kind(),
            "version": descriptor.version,
            "dependencies": descriptor.dependencies,
            "missing_dependencies": missing,
            "required_env": descriptor.required_env_vars,
        });
        if let Some(advisory) = advisory {
            data["advisory"] = json!(advisory);
        }
        data
    }

    async fn invoke(
        &self,
        descriptor: &ScriptDescriptor,
        request: &ExecutionRequest,
        timeout: Duration,
        progress: &mut Progress,
    ) -> Result<Value, EngineError> {
        let roots = self.tier_roots(request.options.project_context.as_deref());

        match &descriptor.entry {
            Entry::Function { entry_point } => {
                let paths = self.functions.search_paths(entry_point, &roots);
                self.functions
                    .execute(
                        &descriptor.name,
                        entry_point,
                        Value::Object(request.parameters.clone()),
                        timeout,
                        paths,
                    )
                    .await
            }
            Entry::Cli { executable_path } => {
                let paths = self.functions.search_paths(executable_path, &roots);
                let env = ChildEnv::default()
                    .with_var("LUA_PATH", format!("{};;", paths.lua_path()))
                    .with_var("LUA_CPATH", format!("{};;", paths.lua_cpath()));

                let run = self
                    .commands
                    .run(
                        &descriptor.name,
                        executable_path,
                        &request.parameters,
                        timeout,
                        &env,
                    )
                    .await;
                progress.logs = run.logs;
                run.outcome
            }
            Entry::Registry { .. } => Err(EngineError::ScriptNotFoundLocally {
                name: descriptor.name.clone(),
                version: descriptor.version.clone(),
                hint: "download the script into the user tier before running it".to_string(),
                advisory: None,
            }),
        }
    }

    fn tier_roots(&self, project: Option<&Path>) -> Vec<PathBuf> {
        let mut roots = Vec::with_capacity(2);
        if let Some(project) = project {
            roots.push(Config::project_scripts_dir(project));
        }
        roots.push(self.resolver.user_root().to_path_buf());
        roots
    }
}

/// Split a script's payload into result data and accounting fields
///
/// An object with `"status": "error"` is a failure described by its
/// `error` field. Otherwise the `data` field is the result when present,
/// and the whole payload when not.
pub fn interpret_payload(payload: Value) -> Result<Completed, EngineError> {
    let Value::Object(mut map) = payload else {
        return Ok(Completed {
            data: payload,
            rows_processed: None,
            api_calls_made: None,
        });
    };

    if map.get("status").and_then(Value::as_str) == Some("error") {
        let (message, nested_traceback) = match map.get("error") {
            Some(Value::String(message)) => (message.clone(), None),
            Some(Value::Object(error)) => (
                error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or(UNDESCRIBED_ERROR)
                    .to_string(),
                error
                    .get("traceback")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            ),
            _ => (UNDESCRIBED_ERROR.to_string(), None),
        };
        let traceback = map
            .get("traceback")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or(nested_traceback);
        let module = missing_module(&message);

        return Err(EngineError::execution(message, traceback).with_missing_module(module));
    }

    let rows_processed = counter(&map, "rows_processed");
    let api_calls_made = counter(&map, "api_calls_made");
    let data = match map.remove("data") {
        Some(data) => data,
        None => Value::Object(map),
    };

    Ok(Completed {
        data,
        rows_processed,
        api_calls_made,
    })
}

fn counter(map: &Map<String, Value>, key: &str) -> Option<u64> {
    map.get("metadata")
        .and_then(|metadata| metadata.get(key))
        .or_else(|| map.get(key))
        .and_then(Value::as_u64)
}

fn check_name(name: &str) -> Result<(), EngineError> {
    let invalid = name.trim().is_empty()
        || name.contains(['/', '\\'])
        || name == "."
        || name == "..";
    if invalid {
        return Err(EngineError::InvalidRequest {
            reason: format!("'{}' is not a valid script name", name),
        });
    }
    Ok(())
}

fn env_present(name: &str) -> bool {
    std::env::var_os(name).is_some_and(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeRegistry, StaticLockfile, write_file};
    use async_trait::async_trait;
    use scriptor_core::domain::record::{ExecutionRecord, RecordStatus};
    use scriptor_core::domain::script::{InvocationKind, Tier};
    use std::collections::HashSet;
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct StaticProbe(bool);

    #[async_trait]
    impl DependencyProbe for StaticProbe {
        async fn is_available(&self, _import_name: &str) -> bool {
            self.0
        }
    }

    #[derive(Default)]
    struct FailingInstaller {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl PackageInstaller for FailingInstaller {
        async fn install(&self, package: &str, _constraint: Option<&str>) -> Result<(), String> {
            self.calls.lock().unwrap().push(package.to_string());
            Err("exit status 1".to_string())
        }
    }

    struct Harness {
        dir: TempDir,
        registry: Arc<FakeRegistry>,
        installer: Arc<FailingInstaller>,
        engine: ExecutionEngine,
    }

    impl Harness {
        fn user_root(&self) -> PathBuf {
            self.dir.path().join("home").join("scripts")
        }

        fn history_file(&self) -> PathBuf {
            self.dir.path().join("home").join(".runs").join("history.jsonl")
        }
    }

    fn harness_with(
        probe: bool,
        lockfile: StaticLockfile,
        tweak: impl FnOnce(&mut Config),
    ) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::new(dir.path().join("home"));
        tweak(&mut config);

        let registry = Arc::new(FakeRegistry::default());
        let installer = Arc::new(FailingInstaller::default());
        let engine = ExecutionEngine::new(
            &config,
            registry.clone(),
            Arc::new(lockfile),
            Arc::new(StaticProbe(probe)),
            installer.clone(),
        );

        Harness {
            dir,
            registry,
            installer,
            engine,
        }
    }

    fn harness() -> Harness {
        harness_with(true, StaticLockfile::default(), |_| {})
    }

    fn request(name: &str, options: ExecutionOptions) -> ExecutionRequest {
        ExecutionRequest::new(name).with_options(options)
    }

    fn read_records(path: &Path) -> Vec<ExecutionRecord> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_project_tier_wins_over_user_tier() {
        let h = harness();
        write_file(
            &h.user_root(),
            "util/greet.sh",
            "echo '{\"data\": {\"from\": \"user\"}}'\n",
        );
        let project = h.dir.path().join("project");
        write_file(
            &Config::project_scripts_dir(&project),
            "greet.sh",
            "echo '{\"data\": {\"from\": \"project\"}}'\n",
        );

        let options = ExecutionOptions {
            project_context: Some(project),
            ..Default::default()
        };
        let result = h.engine.execute(request("greet", options)).await;
        assert_eq!(result.status, ExecutionStatus::Success);
        assert_eq!(result.tier, Some(Tier::Project));
        assert_eq!(result.data.unwrap()["from"], "project");

        let result = h.engine.execute(ExecutionRequest::new("greet")).await;
        assert_eq!(result.tier, Some(Tier::User));
        assert_eq!(result.data.unwrap()["from"], "user");
    }

    #[tokio::test]
    async fn test_unknown_script_is_not_found_and_logged() {
        let h = harness();
        let result = h.engine.execute(ExecutionRequest::new("ghost")).await;

        assert_eq!(result.status, ExecutionStatus::Error);
        assert_eq!(result.error.unwrap().code, "SCRIPT_NOT_FOUND");
        assert!(result.metadata.duration_sec >= 0.0);

        let records = h.engine.history().history(1, None, None).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, RecordStatus::Error);
        assert_eq!(records[0].execution_id, result.execution_id);
    }

    #[tokio::test]
    async fn test_invalid_script_name() {
        let h = harness();
        let result = h.engine.execute(ExecutionRequest::new("../escape")).await;
        assert_eq!(result.error.unwrap().code, "INVALID_REQUEST");
    }

    #[tokio::test]
    async fn test_registry_only_script_needs_download() {
        let h = harness_with(
            true,
            StaticLockfile::default().pin("proj-1", "maps", "1.0.0"),
            |_| {},
        );
        h.registry.publish(
            "maps",
            "1.0.0",
            InvocationKind::Cli,
            "# @version 1.0.0\necho '{\"data\": {\"v\": 1}}'\n",
        );
        h.registry.publish(
            "maps",
            "2.0.0",
            InvocationKind::Cli,
            "# @version 2.0.0\necho '{\"data\": {\"v\": 2}}'\n",
        );

        let mut options = ExecutionOptions {
            project_hash: Some("proj-1".to_string()),
            ..Default::default()
        };
        let result = h.engine.execute(request("maps", options.clone())).await;
        assert_eq!(result.status, ExecutionStatus::Error);
        let error = result.error.unwrap();
        assert_eq!(error.code, "SCRIPT_NOT_FOUND_LOCALLY");
        assert_eq!(error.details["version"], "1.0.0");
        assert!(error.details["hint"].as_str().unwrap().contains("auto_download"));
        assert!(!h.user_root().join("tools").join("maps.sh").exists());

        options.auto_download = true;
        let result = h.engine.execute(request("maps", options)).await;
        assert_eq!(result.status, ExecutionStatus::Success, "{:?}", result.error);
        assert_eq!(result.tier, Some(Tier::User));
        assert_eq!(result.version.as_deref(), Some("1.0.0"));
        assert_eq!(result.data.unwrap()["v"], 1);
        assert!(result.advisory.unwrap().contains("2.0.0"));
        assert!(h.user_root().join("tools").join("maps.sh").exists());
    }

    #[tokio::test]
    async fn test_array_truncation_boundary() {
        let h = harness();
        write_file(
            &h.user_root(),
            "lists.lua",
            r#"
            return {
                execute = function()
                    local items, exact = {}, {}
                    for i = 1, 1001 do items[i] = i end
                    for i = 1, 1000 do exact[i] = i end
                    return { status = "success", data = { items = items, exact = exact } }
                end,
            }
            "#,
        );

        let result = h.engine.execute(ExecutionRequest::new("lists")).await;
        assert_eq!(result.status, ExecutionStatus::Success, "{:?}", result.error);

        let data = result.data.unwrap();
        assert_eq!(data["items"].as_array().unwrap().len(), 1000);
        assert_eq!(data["exact"].as_array().unwrap().len(), 1000);

        let warning = &result.truncation_warnings["items"];
        assert_eq!(warning.original_count, 1001);
        assert_eq!(warning.kept_count, 1000);
        assert!(!result.truncation_warnings.contains_key("exact"));
    }

    #[tokio::test]
    async fn test_oversized_result_is_offloaded() {
        let h = harness_with(true, StaticLockfile::default(), |config| {
            config.limits.max_response_bytes = 200;
        });
        write_file(
            &h.user_root(),
            "big.lua",
            r#"
            return {
                execute = function()
                    local rows = {}
                    for i = 1, 100 do rows[i] = "row-" .. i end
                    return { status = "success", data = { rows = rows } }
                end,
            }
            "#,
        );

        let result = h.engine.execute(ExecutionRequest::new("big")).await;
        assert_eq!(result.status, ExecutionStatus::Success, "{:?}", result.error);

        let data = result.data.unwrap();
        assert!(data.get("output_file").is_some());
        assert!(data.get("summary").is_some());

        let info = result.output_file.unwrap();
        assert!(info.path.starts_with(h.dir.path().join("home").join("outputs").join("big")));
        let saved: Value = serde_json::from_slice(&std::fs::read(&info.path).unwrap()).unwrap();
        assert_eq!(saved["rows"].as_array().unwrap().len(), 100);
        assert_eq!(saved["rows"][99], "row-100");
    }

    #[tokio::test]
    async fn test_timeout_reports_deadline_duration() {
        let h = harness();
        write_file(&h.user_root(), "sleepy.sh", "echo napping >&2\nsleep 5\n");

        let options = ExecutionOptions {
            timeout_seconds: Some(1),
            ..Default::default()
        };
        let result = h.engine.execute(request("sleepy", options)).await;

        assert_eq!(result.status, ExecutionStatus::Timeout);
        assert_eq!(result.error.unwrap().code, "EXECUTION_TIMEOUT");
        assert!(result.metadata.duration_sec >= 0.9, "{}", result.metadata.duration_sec);
        assert!(result.metadata.duration_sec < 3.0, "{}", result.metadata.duration_sec);
        assert_eq!(result.logs, vec!["napping"]);
    }

    #[tokio::test]
    async fn test_dry_run_never_installs_or_invokes() {
        let h = harness_with(false, StaticLockfile::default(), |_| {});
        let path = write_file(
            &h.user_root(),
            "marker.sh",
            "# @version 0.3.0\n# @dependency lfs\ntouch sentinel\necho '{}'\n",
        );
        let sentinel = path.parent().unwrap().join("sentinel");

        let options = ExecutionOptions {
            dry_run: true,
            ..Default::default()
        };
        let result = h.engine.execute(request("marker", options)).await;

        assert_eq!(result.status, ExecutionStatus::Success);
        let data = result.data.unwrap();
        assert_eq!(data["dry_run"], true);
        assert_eq!(data["ready"], true);
        assert_eq!(data["invocation"], "cli");
        assert_eq!(data["version"], "0.3.0");
        assert_eq!(data["missing_dependencies"], json!(["lfs"]));
        assert!(!sentinel.exists());
        assert!(h.installer.calls.lock().unwrap().is_empty());
        assert!(!h.history_file().exists());
    }

    #[tokio::test]
    async fn test_dry_run_with_blockers_fails_validation() {
        let h = harness_with(false, StaticLockfile::default(), |_| {});
        let path = write_file(
            &h.user_root(),
            "blocked.sh",
            "# @dependency lfs\n# @env SCRIPTOR_ENGINE_DRY_RUN_UNSET\ntouch sentinel\necho '{}'\n",
        );

        let options = ExecutionOptions {
            dry_run: true,
            ..Default::default()
        };
        let result = h.engine.execute(request("blocked", options)).await;

        assert_eq!(result.status, ExecutionStatus::ValidationFailed);
        let error = result.error.unwrap();
        assert_eq!(error.code, "VALIDATION_FAILED");
        assert_eq!(
            error.details["missing_env_vars"],
            json!(["SCRIPTOR_ENGINE_DRY_RUN_UNSET"])
        );
        assert!(!path.parent().unwrap().join("sentinel").exists());
        assert!(h.installer.calls.lock().unwrap().is_empty());
        assert!(!h.history_file().exists());
    }

    #[tokio::test]
    async fn test_compiled_executable_runs_directly() {
        let h = harness();
        let target = h.user_root().join("bin").join("mytrue");
        std::fs::create_dir_all(target.parent().unwrap()).unwrap();
        std::fs::copy("/bin/true", &target).unwrap();

        let result = h.engine.execute(ExecutionRequest::new("mytrue")).await;

        assert_eq!(result.status, ExecutionStatus::Success, "{:?}", result.error);
        assert_eq!(result.tier, Some(Tier::User));
        assert_eq!(result.data.unwrap(), json!({ "output": "" }));
    }

    #[tokio::test]
    async fn test_failed_dependency_blocks_execution() {
        let h = harness_with(false, StaticLockfile::default(), |_| {});
        let path = write_file(
            &h.user_root(),
            "needs_fs.sh",
            "# @dependency lfs\n# @dependency yaml\ntouch sentinel\necho '{}'\n",
        );

        let result = h.engine.execute(ExecutionRequest::new("needs_fs")).await;

        assert_eq!(result.status, ExecutionStatus::Error);
        let error = result.error.unwrap();
        assert_eq!(error.code, "DEPENDENCY_INSTALL_FAILED");
        let failed = error.details["dependency_error"]["failed"].as_array().unwrap();
        assert_eq!(failed.len(), 2);
        assert_eq!(failed[0]["import_name"], "lfs");
        assert_eq!(failed[0]["package"], "luafilesystem");
        assert_eq!(error.details["dependency_error"]["installed"], json!([]));
        assert_eq!(
            *h.installer.calls.lock().unwrap(),
            vec!["luafilesystem".to_string(), "lyaml".to_string()]
        );
        assert!(!path.parent().unwrap().join("sentinel").exists());
    }

    #[tokio::test]
    async fn test_missing_env_vars_are_listed_exactly() {
        let h = harness();
        let path = write_file(
            &h.user_root(),
            "needs_env.sh",
            "# @env SCRIPTOR_ENGINE_TEST_UNSET_B, SCRIPTOR_ENGINE_TEST_UNSET_A PATH\ntouch sentinel\necho '{}'\n",
        );

        let result = h.engine.execute(ExecutionRequest::new("needs_env")).await;

        assert_eq!(result.status, ExecutionStatus::ValidationFailed);
        let error = result.error.unwrap();
        assert_eq!(
            error.details["missing_env_vars"],
            json!(["SCRIPTOR_ENGINE_TEST_UNSET_A", "SCRIPTOR_ENGINE_TEST_UNSET_B"])
        );
        assert!(!path.parent().unwrap().join("sentinel").exists());
    }

    #[tokio::test]
    async fn test_timeout_above_ceiling_is_rejected() {
        let h = harness();
        write_file(&h.user_root(), "quick.sh", "echo '{}'\n");

        let options = ExecutionOptions {
            timeout_seconds: Some(1801),
            ..Default::default()
        };
        let result = h.engine.execute(request("quick", options)).await;

        assert_eq!(result.status, ExecutionStatus::ValidationFailed);
        let blockers = result.error.unwrap().details["blockers"].clone();
        assert!(blockers[0].as_str().unwrap().contains("1800"));
    }

    #[tokio::test]
    async fn test_script_reported_error() {
        let h = harness();
        write_file(
            &h.user_root(),
            "picky.sh",
            "echo '{\"status\": \"error\", \"error\": {\"message\": \"bad input\", \"traceback\": \"at line 3\"}}'\nexit 1\n",
        );

        let result = h.engine.execute(ExecutionRequest::new("picky")).await;

        assert_eq!(result.status, ExecutionStatus::Error);
        let error = result.error.unwrap();
        assert_eq!(error.code, "EXECUTION_ERROR");
        assert_eq!(error.message, "bad input");
        assert_eq!(error.traceback.as_deref(), Some("at line 3"));
    }

    #[tokio::test]
    async fn test_cost_and_remote_record() {
        let h = harness();
        write_file(
            &h.user_root(),
            "billing.lua",
            r#"
            return {
                version = "1.1.0",
                cost_per_unit = 0.5,
                execute = function(params)
                    return {
                        status = "success",
                        data = { ok = true, who = params.who },
                        metadata = { rows_processed = 4, api_calls_made = 2 },
                    }
                end,
            }
            "#,
        );

        let result = h
            .engine
            .execute(ExecutionRequest::new("billing").with_parameter("who", "ada"))
            .await;

        assert_eq!(result.status, ExecutionStatus::Success, "{:?}", result.error);
        assert_eq!(result.data.as_ref().unwrap()["who"], "ada");
        assert_eq!(result.metadata.cost_usd, 2.0);
        assert_eq!(result.metadata.rows_processed, Some(4));
        assert_eq!(result.metadata.api_calls_made, Some(2));

        let remote = h.registry.records.lock().unwrap();
        assert_eq!(remote.len(), 1);
        assert_eq!(remote[0].status, RecordStatus::Success);
        assert_eq!(remote[0].script_version.as_deref(), Some("1.1.0"));
    }

    #[tokio::test]
    async fn test_concurrent_executions_write_whole_lines() {
        let h = Arc::new(harness());
        for n in 0..50 {
            write_file(
                &h.user_root(),
                &format!("batch/job_{}.sh", n),
                &format!("echo 'line from {n}' >&2\necho '{{\"data\": {{\"n\": {n}}}}}'\n"),
            );
        }

        let mut handles = Vec::new();
        for n in 0..50 {
            let h = h.clone();
            handles.push(tokio::spawn(async move {
                h.engine.execute(ExecutionRequest::new(format!("job_{}", n))).await
            }));
        }

        let mut ids = HashSet::new();
        for (n, handle) in handles.into_iter().enumerate() {
            let result = handle.await.unwrap();
            assert_eq!(result.status, ExecutionStatus::Success, "{:?}", result.error);
            assert_eq!(result.data.unwrap()["n"], n);
            assert_eq!(result.logs, vec![format!("line from {}", n)]);
            ids.insert(result.execution_id);
        }

        let records = read_records(&h.history_file());
        let terminal: Vec<_> = records.iter().filter(|r| r.is_terminal()).collect();
        assert_eq!(terminal.len(), 50);
        assert_eq!(records.len(), 100);
        for record in terminal {
            assert!(ids.contains(&record.execution_id));
        }
    }

    #[test]
    fn test_interpret_payload_shapes() {
        let completed = interpret_payload(json!({ "rows": [1, 2], "rows_processed": 2 })).unwrap();
        assert_eq!(completed.data["rows"], json!([1, 2]));
        assert_eq!(completed.rows_processed, Some(2));

        let completed = interpret_payload(json!([1, 2, 3])).unwrap();
        assert_eq!(completed.data, json!([1, 2, 3]));

        let err = interpret_payload(json!({ "status": "error", "error": "module 'lfs' not found" }))
            .unwrap_err();
        match err {
            EngineError::ExecutionError { missing_module, .. } => {
                assert_eq!(missing_module.as_deref(), Some("lfs"));
            }
            other => panic!("unexpected: {:?}", other),
        }

        let err = interpret_payload(json!({ "status": "error" })).unwrap_err();
        assert_eq!(err.to_string(), UNDESCRIBED_ERROR);
    }
}
