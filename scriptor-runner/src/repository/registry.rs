//! Registry repository
//!
//! Wraps the registry client so that an unreachable or misbehaving registry
//! looks like "not found remotely" to the resolver. Only `record_execution`
//! reports failures, and the execution logger swallows those.

use anyhow::{Context, Result};
use async_trait::async_trait;
use scriptor_client::{ClientError, RegistryClient, RegistryScript};
use scriptor_core::domain::record::ExecutionRecord;
use std::time::Duration;
use tracing::warn;

/// Repository trait for the remote script registry
#[async_trait]
pub trait Registry: Send + Sync {
    /// Latest published version of a script, if the registry has it
    async fn find_script(&self, name: &str) -> Option<RegistryScript>;

    /// One exact version of a script
    async fn get_version(&self, name: &str, version: &str) -> Option<RegistryScript>;

    /// Store an execution record remotely
    async fn record_execution(&self, record: &ExecutionRecord) -> Result<()>;
}

/// HTTP implementation of Registry
pub struct HttpRegistry {
    client: RegistryClient,
}

impl HttpRegistry {
    /// Creates a registry repository with a bounded request timeout
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build registry HTTP client")?;

        Ok(Self {
            client: RegistryClient::with_client(base_url, http),
        })
    }
}

#[async_trait]
impl Registry for HttpRegistry {
    async fn find_script(&self, name: &str) -> Option<RegistryScript> {
        match self.client.find_script(name).await {
            Ok(script) => script,
            Err(e) => {
                lookup_failed(name, None, &e);
                None
            }
        }
    }

    async fn get_version(&self, name: &str, version: &str) -> Option<RegistryScript> {
        match self.client.get_version(name, version).await {
            Ok(script) => script,
            Err(e) => {
                lookup_failed(name, Some(version), &e);
                None
            }
        }
    }

    async fn record_execution(&self, record: &ExecutionRecord) -> Result<()> {
        self.client
            .record_execution(record)
            .await
            .context("Failed to record execution in registry")
    }
}

fn lookup_failed(name: &str, version: Option<&str>, error: &ClientError) {
    if error.is_transient() {
        warn!(
            script = name,
            version,
            "Registry unreachable, treating as not found: {}",
            error
        );
    } else {
        warn!(script = name, version, "Registry rejected lookup: {}", error);
    }
}

/// Registry used when no registry URL is configured
pub struct DisabledRegistry;

#[async_trait]
impl Registry for DisabledRegistry {
    async fn find_script(&self, _name: &str) -> Option<RegistryScript> {
        None
    }

    async fn get_version(&self, _name: &str, _version: &str) -> Option<RegistryScript> {
        None
    }

    async fn record_execution(&self, _record: &ExecutionRecord) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_registry_degrades_to_none() {
        // Nothing listens on port 9 of localhost in the test environment
        let registry = HttpRegistry::new("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();

        assert!(registry.find_script("anything").await.is_none());
        assert!(registry.get_version("anything", "1.0.0").await.is_none());
    }

    #[tokio::test]
    async fn test_disabled_registry() {
        let registry = DisabledRegistry;
        assert!(registry.find_script("x").await.is_none());
    }
}
