//! Status callbacks to the orchestrator.

use async_trait::async_trait;

use conveyor_core::{StatusAck, StatusReport};

use crate::error::WorkerError;

/// Narrow seam through which workers report task outcomes.
#[async_trait]
pub trait StatusReporter: Send + Sync {
    /// Deliver one report and return the authoritative status after it was
    /// applied.
    async fn report(&self, report: &StatusReport) -> Result<StatusAck, WorkerError>;
}

/// Reports over HTTP to `POST {base}/api/v1/tasks/{id}/status`.
pub struct HttpStatusReporter {
    client: reqwest::Client,
    base_url: String,
}

impl HttpStatusReporter {
    /// Create a reporter for the orchestrator at `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl StatusReporter for HttpStatusReporter {
    async fn report(&self, report: &StatusReport) -> Result<StatusAck, WorkerError> {
        let url = format!("{}/api/v1/tasks/{}/status", self.base_url, report.task_id);
        let response = self
            .client
            .post(url)
            .json(report)
            .send()
            .await
            .map_err(|e| WorkerError::Report(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(WorkerError::Report(format!("{status}: {body}")));
        }
        response
            .json::<StatusAck>()
            .await
            .map_err(|e| WorkerError::Report(e.to_string()))
    }
}
