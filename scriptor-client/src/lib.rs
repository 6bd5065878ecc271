//! Scriptor Registry Client
//!
//! A small, type-safe HTTP client for the remote script registry.
//!
//! The registry stores published scripts and their versions, and collects
//! execution records. The runner wraps this client so that any transport
//! failure degrades to "not found remotely".
//!
//! # Example
//!
//! ```no_run
//! use scriptor_client::RegistryClient;
//!
//! #[tokio::main]
//! async fn main() -> scriptor_client::Result<()> {
//!     let client = RegistryClient::new("http://localhost:8080");
//!
//!     if let Some(script) = client.find_script("word_count").await? {
//!         println!("latest: {}", script.version);
//!     }
//!     Ok(())
//! }
//! ```

pub mod error;
mod executions;
mod scripts;

pub use error::{ClientError, Result};
pub use scriptor_core::dto::registry::RegistryScript;

use reqwest::Client;
use serde::de::DeserializeOwned;

/// HTTP client for the script registry API
///
/// Endpoints:
/// - `GET  /api/scripts/{name}` latest version of a script
/// - `GET  /api/scripts/{name}/versions/{version}` a pinned version
/// - `POST /api/executions` execution records
#[derive(Debug, Clone)]
pub struct RegistryClient {
    /// Base URL of the registry (e.g., "http://localhost:8080")
    base_url: String,
    client: Client,
}

impl RegistryClient {
    /// Create a new registry client
    ///
    /// # Example
    /// ```
    /// use scriptor_client::RegistryClient;
    ///
    /// let client = RegistryClient::new("http://localhost:8080/");
    /// assert_eq!(client.base_url(), "http://localhost:8080");
    /// ```
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    /// Create a registry client with a configured reqwest `Client`
    ///
    /// Use this to set request timeouts, proxies or TLS options.
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    // =============================================================================
    // Response Handlers
    // =============================================================================

    /// Check the status code and deserialize the JSON body
    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::api_error(status.as_u16(), error_text));
        }

        response
            .json()
            .await
            .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {}", e)))
    }

    /// Like `handle_response`, but a 404 becomes `Ok(None)`
    async fn handle_optional_response<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<Option<T>> {
        match self.handle_response(response).await {
            Err(e) if e.is_not_found() => Ok(None),
            other => other.map(Some),
        }
    }

    /// Check the status code of a response without a body
    async fn handle_empty_response(&self, response: reqwest::Response) -> Result<()> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::api_error(status.as_u16(), error_text));
        }

        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_server {
    //! One-shot HTTP server returning a canned response

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    /// Serve a single request; the receiver yields the raw request text
    pub async fn serve_once(status: u16, body: &str) -> (String, oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let body = body.to_string();
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 64 * 1024];
            let mut request = Vec::new();
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                if n == 0 || request_complete(&request) {
                    break;
                }
            }
            let response = format!(
                "HTTP/1.1 {} X\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = tx.send(String::from_utf8_lossy(&request).to_string());
        });

        (format!("http://{}", addr), rx)
    }

    fn request_complete(request: &[u8]) -> bool {
        let text = String::from_utf8_lossy(request);
        let Some(header_end) = text.find("\r\n\r\n") else {
            return false;
        };
        let content_length = text[..header_end]
            .lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                name.eq_ignore_ascii_case("content-length")
                    .then(|| value.trim().parse::<usize>().ok())
                    .flatten()
            })
            .unwrap_or(0);
        request.len() >= header_end + 4 + content_length
    }
}
