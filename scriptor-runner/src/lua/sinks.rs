//! Concrete implementations of LogSink and VarProvider for the runner
//!
//! Script log lines go to `tracing` under the `script` target, and the
//! `env` module sees the runner's process environment.

use scriptor_core::domain::log::LogLevel;
use scriptor_lua::{LogSink, VarProvider};
use tracing::{debug, error, info, warn};

/// Forwards script log lines to `tracing`
pub struct TracingLogSink {
    script: String,
}

impl TracingLogSink {
    pub fn new(script: impl Into<String>) -> Self {
        Self {
            script: script.into(),
        }
    }
}

impl LogSink for TracingLogSink {
    fn write(&mut self, level: LogLevel, message: &str) {
        let script = self.script.as_str();
        match level {
            LogLevel::Debug => debug!(target: "script", script, "{}", message),
            LogLevel::Info => info!(target: "script", script, "{}", message),
            LogLevel::Warning => warn!(target: "script", script, "{}", message),
            LogLevel::Error => error!(target: "script", script, "{}", message),
        }
    }
}

/// Environment variables of the runner process
pub struct ProcessEnv;

impl VarProvider for ProcessEnv {
    fn get(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }

    fn keys(&self) -> Vec<String> {
        std::env::vars().map(|(key, _)| key).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_env_reads_environment() {
        let env = ProcessEnv;
        let path = env.get("PATH");
        assert_eq!(path, std::env::var("PATH").ok());
        assert!(env.get("SCRIPTOR_SURELY_UNSET_VARIABLE").is_none());
        if path.is_some() {
            assert!(env.keys().contains(&"PATH".to_string()));
        }
    }

    #[test]
    fn test_tracing_sink_accepts_all_levels() {
        let mut sink = TracingLogSink::new("demo");
        for level in LogLevel::ALL {
            sink.write(level, "message");
        }
    }
}
