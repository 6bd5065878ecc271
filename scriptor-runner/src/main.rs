//! Scriptor Runner
//!
//! Executes one request and prints its result.
//!
//! The request is a JSON `ExecutionRequest` read from the file named by the
//! first argument, or from stdin when no argument (or `-`) is given. The
//! `ExecutionResult` is written to stdout as JSON; diagnostics go to stderr.

use anyhow::{Context, Result};
use scriptor_core::domain::execution::ExecutionRequest;
use scriptor_runner::{Config, ExecutionEngine};
use tokio::io::AsyncReadExt;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "scriptor_runner=info,scriptor_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = load_config()?;
    info!(
        "Loaded configuration: home={}, registry={}",
        config.home.display(),
        config.registry_url.as_deref().unwrap_or("disabled")
    );

    let request = read_request(std::env::args().nth(1)).await?;
    let engine = ExecutionEngine::from_config(&config).context("Failed to initialize engine")?;

    let result = engine.execute(request).await;
    let body = serde_json::to_string_pretty(&result).context("Failed to serialize result")?;
    println!("{}", body);

    Ok(())
}

/// Loads configuration from environment variables with fallback to defaults
fn load_config() -> Result<Config> {
    match Config::from_env() {
        Ok(config) => {
            config.validate()?;
            Ok(config)
        }
        Err(e) => {
            info!("Failed to load config from environment ({:#}), using defaults", e);
            let config = Config::default();
            config.validate()?;
            Ok(config)
        }
    }
}

async fn read_request(source: Option<String>) -> Result<ExecutionRequest> {
    let raw = match source.as_deref() {
        None | Some("-") => {
            let mut raw = String::new();
            tokio::io::stdin()
                .read_to_string(&mut raw)
                .await
                .context("Failed to read request from stdin")?;
            raw
        }
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read request from {}", path))?,
    };

    serde_json::from_str(&raw).context("Request is not a valid ExecutionRequest")
}
