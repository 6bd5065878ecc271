//! Script lookup endpoints

use crate::RegistryClient;
use crate::error::Result;
use scriptor_core::dto::registry::RegistryScript;
use tracing::debug;

impl RegistryClient {
    // =============================================================================
    // Script Lookup
    // =============================================================================

    /// Fetch the latest published version of a script
    ///
    /// # Returns
    /// `None` when the registry does not know the script
    pub async fn find_script(&self, name: &str) -> Result<Option<RegistryScript>> {
        let url = format!("{}/api/scripts/{}", self.base_url, name);
        debug!("GET {}", url);
        let response = self.client.get(&url).send().await?;

        self.handle_optional_response(response).await
    }

    /// Fetch one exact version of a script
    ///
    /// # Returns
    /// `None` when either the script or that version does not exist
    pub async fn get_version(&self, name: &str, version: &str) -> Result<Option<RegistryScript>> {
        let url = format!("{}/api/scripts/{}/versions/{}", self.base_url, name, version);
        debug!("GET {}", url);
        let response = self.client.get(&url).send().await?;

        self.handle_optional_response(response).await
    }
}

#[cfg(test)]
mod tests {
    use crate::RegistryClient;
    use crate::test_server::serve_once;

    #[tokio::test]
    async fn test_find_script_parses_payload() {
        let body = r#"{"name":"word_count","version":"1.2.0","category":"text","content":"return {}"}"#;
        let (url, request) = serve_once(200, body).await;

        let client = RegistryClient::new(url);
        let script = client.find_script("word_count").await.unwrap().unwrap();

        assert_eq!(script.version, "1.2.0");
        assert_eq!(script.category.as_deref(), Some("text"));

        let raw = request.await.unwrap();
        assert!(raw.starts_with("GET /api/scripts/word_count "));
    }

    #[tokio::test]
    async fn test_get_version_not_found_is_none() {
        let (url, request) = serve_once(404, r#"{"error":"not found"}"#).await;

        let client = RegistryClient::new(url);
        let script = client.get_version("word_count", "9.9.9").await.unwrap();
        assert!(script.is_none());

        let raw = request.await.unwrap();
        assert!(raw.starts_with("GET /api/scripts/word_count/versions/9.9.9 "));
    }

    #[tokio::test]
    async fn test_server_error_is_api_error() {
        let (url, _request) = serve_once(500, "boom").await;

        let client = RegistryClient::new(url);
        let err = client.find_script("x").await.unwrap_err();
        assert!(err.is_transient());
    }
}
