//! Execution record endpoint

use crate::RegistryClient;
use crate::error::Result;
use scriptor_core::domain::record::ExecutionRecord;

impl RegistryClient {
    /// Store an execution record in the registry's execution log
    pub async fn record_execution(&self, record: &ExecutionRecord) -> Result<()> {
        let url = format!("{}/api/executions", self.base_url);
        let response = self.client.post(&url).json(record).send().await?;

        self.handle_empty_response(response).await
    }
}

#[cfg(test)]
mod tests {
    use crate::RegistryClient;
    use crate::test_server::serve_once;
    use scriptor_core::domain::record::{ExecutionRecord, RecordStatus};

    fn record() -> ExecutionRecord {
        ExecutionRecord {
            timestamp: chrono::Utc::now(),
            execution_id: uuid::Uuid::new_v4(),
            script: "word_count".to_string(),
            status: RecordStatus::Success,
            duration_sec: Some(0.25),
            project: None,
            inputs: None,
            outputs: None,
            error: None,
            cost_usd: Some(0.0),
            script_version: Some("1.0.0".to_string()),
            rows_processed: None,
            api_calls_made: None,
        }
    }

    #[tokio::test]
    async fn test_record_execution_posts_json() {
        let (url, request) = serve_once(201, "").await;

        let client = RegistryClient::new(url);
        client.record_execution(&record()).await.unwrap();

        let raw = request.await.unwrap();
        assert!(raw.starts_with("POST /api/executions "));
        assert!(raw.contains(r#""script":"word_count""#));
        assert!(raw.contains(r#""status":"success""#));
    }

    #[tokio::test]
    async fn test_record_execution_surfaces_rejection() {
        let (url, _request) = serve_once(422, "schema mismatch").await;

        let client = RegistryClient::new(url);
        let err = client.record_execution(&record()).await.unwrap_err();
        assert!(err.to_string().contains("422"));
    }
}
