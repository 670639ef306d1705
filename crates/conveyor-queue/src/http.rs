//! HTTP work queue client.
//!
//! Implements [`WorkQueue`] against an orchestrator's queue endpoints so
//! workers can run as separate processes on other hosts. The blocking
//! dequeue becomes a long-poll; every other operation maps 1:1 onto a
//! request. The wire DTOs here are shared with the orchestrator's handlers.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use conveyor_core::WorkerInfo;

use crate::error::QueueError;
use crate::queue::{NackDisposition, QueueEnvelope, QueueStats, WorkQueue};

/// Body for the long-poll dequeue endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DequeueRequest {
    pub worker_id: Uuid,
    pub timeout_secs: u64,
}

/// Body for worker registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterWorkerRequest {
    pub id: Uuid,
    pub address: String,
    pub task_types: Vec<String>,
}

/// Response for retry promotion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromotedResponse {
    pub promoted: usize,
}

/// Response for lease reaping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReapedResponse {
    pub reaped: Vec<QueueEnvelope>,
}

/// Response listing known task types.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnownTypesResponse {
    pub types: Vec<String>,
}

/// Response listing dead-letter contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLettersResponse {
    pub dead_letters: Vec<QueueEnvelope>,
}

/// Queue client speaking to a remote orchestrator.
pub struct HttpWorkQueue {
    client: reqwest::Client,
    base_url: String,
}

impl HttpWorkQueue {
    /// Create a client for the orchestrator at `base_url`
    /// (e.g. `http://orchestrator:8080`).
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1{}", self.base_url, path)
    }

    fn transport(e: reqwest::Error) -> QueueError {
        QueueError::Transport(e.to_string())
    }

    async fn expect_ok(response: reqwest::Response) -> Result<reqwest::Response, QueueError> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(QueueError::Transport(format!("{status}: {body}")))
        }
    }
}

#[async_trait]
impl WorkQueue for HttpWorkQueue {
    async fn enqueue(&self, envelope: QueueEnvelope) -> Result<(), QueueError> {
        let url = self.url(&format!("/queue/{}", envelope.task.task_type));
        let response = self
            .client
            .post(url)
            .json(&envelope)
            .send()
            .await
            .map_err(Self::transport)?;
        Self::expect_ok(response).await.map(|_| ())
    }

    async fn dequeue(
        &self,
        task_type: &str,
        worker_id: Uuid,
        timeout: Duration,
    ) -> Result<Option<QueueEnvelope>, QueueError> {
        let url = self.url(&format!("/queue/{task_type}/dequeue"));
        let body = DequeueRequest {
            worker_id,
            timeout_secs: timeout.as_secs(),
        };
        let response = self
            .client
            .post(url)
            .json(&body)
            // Allow the server its full long-poll window plus slack.
            .timeout(timeout + Duration::from_secs(10))
            .send()
            .await
            .map_err(Self::transport)?;

        if response.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        let response = Self::expect_ok(response).await?;
        let envelope = response
            .json::<QueueEnvelope>()
            .await
            .map_err(|e| QueueError::Payload(e.to_string()))?;
        Ok(Some(envelope))
    }

    async fn ack(&self, envelope: &QueueEnvelope) -> Result<(), QueueError> {
        let response = self
            .client
            .post(self.url("/queue/ack"))
            .json(envelope)
            .send()
            .await
            .map_err(Self::transport)?;
        Self::expect_ok(response).await.map(|_| ())
    }

    async fn nack(&self, envelope: &QueueEnvelope) -> Result<NackDisposition, QueueError> {
        let response = self
            .client
            .post(self.url("/queue/nack"))
            .json(envelope)
            .send()
            .await
            .map_err(Self::transport)?;
        Self::expect_ok(response)
            .await?
            .json::<NackDisposition>()
            .await
            .map_err(|e| QueueError::Payload(e.to_string()))
    }

    async fn process_retries(&self, task_type: &str) -> Result<usize, QueueError> {
        let response = self
            .client
            .post(self.url(&format!("/queue/{task_type}/process-retries")))
            .send()
            .await
            .map_err(Self::transport)?;
        Ok(Self::expect_ok(response)
            .await?
            .json::<PromotedResponse>()
            .await
            .map_err(|e| QueueError::Payload(e.to_string()))?
            .promoted)
    }

    async fn reap_orphaned(&self, task_type: &str) -> Result<Vec<QueueEnvelope>, QueueError> {
        let response = self
            .client
            .post(self.url(&format!("/queue/{task_type}/reap")))
            .send()
            .await
            .map_err(Self::transport)?;
        Ok(Self::expect_ok(response)
            .await?
            .json::<ReapedResponse>()
            .await
            .map_err(|e| QueueError::Payload(e.to_string()))?
            .reaped)
    }

    async fn stats(&self, task_type: &str) -> Result<QueueStats, QueueError> {
        let response = self
            .client
            .get(self.url(&format!("/queue/{task_type}/stats")))
            .send()
            .await
            .map_err(Self::transport)?;
        Self::expect_ok(response)
            .await?
            .json::<QueueStats>()
            .await
            .map_err(|e| QueueError::Payload(e.to_string()))
    }

    async fn dead_letters(&self, task_type: &str) -> Result<Vec<QueueEnvelope>, QueueError> {
        let response = self
            .client
            .get(self.url(&format!("/queue/{task_type}/dead-letters")))
            .send()
            .await
            .map_err(Self::transport)?;
        Ok(Self::expect_ok(response)
            .await?
            .json::<DeadLettersResponse>()
            .await
            .map_err(|e| QueueError::Payload(e.to_string()))?
            .dead_letters)
    }

    async fn known_types(&self) -> Result<Vec<String>, QueueError> {
        let response = self
            .client
            .get(self.url("/queue/types"))
            .send()
            .await
            .map_err(Self::transport)?;
        Ok(Self::expect_ok(response)
            .await?
            .json::<KnownTypesResponse>()
            .await
            .map_err(|e| QueueError::Payload(e.to_string()))?
            .types)
    }

    async fn register_worker(&self, info: WorkerInfo) -> Result<(), QueueError> {
        let body = RegisterWorkerRequest {
            id: info.id,
            address: info.address,
            task_types: info.task_types,
        };
        let response = self
            .client
            .post(self.url("/workers"))
            .json(&body)
            .send()
            .await
            .map_err(Self::transport)?;
        Self::expect_ok(response).await.map(|_| ())
    }

    async fn update_heartbeat(&self, worker_id: Uuid) -> Result<(), QueueError> {
        let response = self
            .client
            .put(self.url(&format!("/workers/{worker_id}/heartbeat")))
            .send()
            .await
            .map_err(Self::transport)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(QueueError::WorkerNotFound(worker_id));
        }
        Self::expect_ok(response).await.map(|_| ())
    }

    async fn get_active_workers(&self, task_type: &str) -> Result<Vec<WorkerInfo>, QueueError> {
        let response = self
            .client
            .get(self.url(&format!("/workers?type={task_type}")))
            .send()
            .await
            .map_err(Self::transport)?;
        Self::expect_ok(response)
            .await?
            .json::<Vec<WorkerInfo>>()
            .await
            .map_err(|e| QueueError::Payload(e.to_string()))
    }
}
