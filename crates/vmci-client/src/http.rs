//! HTTP client for the dispatcher endpoints.

use std::time::Duration;

use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use vmci_core::protocol::{
    Ack, CreateTaskRequest, ErrorResponse, TaskPollRequest, TaskPollResponse,
    TaskUpdateFinishRequest, TaskUpdateShellRequest, TaskUpdateStartRequest,
    WorkerKeepAliveRequest, WorkerResponse,
};
use vmci_core::{Task, TaskConfiguration, TaskId, TaskShellRecord, WorkerId};

use crate::error::ClientError;

/// Per-request timeout unless configured otherwise.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP client for the dispatcher API.
#[derive(Debug, Clone)]
pub struct DispatcherClient {
    inner: reqwest::Client,
    base_url: String,
}

impl DispatcherClient {
    /// Create a new client with [`DEFAULT_TIMEOUT`].
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self, ClientError> {
        let inner = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            inner,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    // ========================================================================
    // Worker RPC
    // ========================================================================

    /// Ask for a pending task. `None` means there is no work right now.
    pub async fn poll(&self, worker_id: &WorkerId) -> Result<Option<Task>, ClientError> {
        let request = TaskPollRequest {
            worker_id: worker_id.clone(),
        };
        let response: TaskPollResponse = self.post_json("/dispatcher/task/poll", &request).await?;
        Ok(response.task)
    }

    pub async fn update_start(&self, task_id: &TaskId) -> Result<(), ClientError> {
        let request = TaskUpdateStartRequest {
            task_id: task_id.clone(),
        };
        let _: Ack = self.post_json("/dispatcher/task/update/start", &request).await?;
        Ok(())
    }

    pub async fn update_finish(&self, task_id: &TaskId, exit_code: i32) -> Result<(), ClientError> {
        let request = TaskUpdateFinishRequest {
            task_id: task_id.clone(),
            exit_code,
        };
        let _: Ack = self.post_json("/dispatcher/task/update/finish", &request).await?;
        Ok(())
    }

    /// Replace the output of record `(task_id, index)`.
    pub async fn update_shell(
        &self,
        worker_id: &WorkerId,
        task_id: &TaskId,
        index: u32,
        output: &str,
    ) -> Result<(), ClientError> {
        let request = TaskUpdateShellRequest {
            worker_id: worker_id.clone(),
            task_id: task_id.clone(),
            index,
            output: output.to_string(),
        };
        let _: Ack = self.post_json("/dispatcher/task/update/shell", &request).await?;
        Ok(())
    }

    pub async fn keep_alive(&self, worker_id: &WorkerId) -> Result<(), ClientError> {
        let request = WorkerKeepAliveRequest {
            worker_id: worker_id.clone(),
        };
        let _: Ack = self.post_json("/dispatcher/worker/keepalive", &request).await?;
        Ok(())
    }

    // ========================================================================
    // Operator API
    // ========================================================================

    /// Submit a new task.
    pub async fn create_task(
        &self,
        configuration: TaskConfiguration,
        project: Option<String>,
        commit: Option<String>,
    ) -> Result<Task, ClientError> {
        let request = CreateTaskRequest {
            configuration,
            project,
            commit,
        };
        self.post_json("/v1/tasks", &request).await
    }

    pub async fn list_tasks(&self) -> Result<Vec<Task>, ClientError> {
        self.get_json("/v1/tasks").await
    }

    pub async fn get_task(&self, task_id: &TaskId) -> Result<Task, ClientError> {
        self.get_json(&format!("/v1/tasks/{}", task_id)).await
    }

    /// Shell output records of a task, ordered by index.
    pub async fn task_shell(&self, task_id: &TaskId) -> Result<Vec<TaskShellRecord>, ClientError> {
        self.get_json(&format!("/v1/tasks/{}/shell", task_id)).await
    }

    pub async fn list_workers(&self) -> Result<Vec<WorkerResponse>, ClientError> {
        self.get_json("/v1/workers").await
    }

    /// Check if the dispatcher is healthy.
    pub async fn health(&self) -> Result<bool, ClientError> {
        let url = format!("{}/health", self.base_url);
        debug!(url = %url, "Checking health");

        let response = self.inner.get(&url).send().await?;
        Ok(response.status().is_success())
    }

    // ========================================================================
    // Plumbing
    // ========================================================================

    /// Get JSON from an endpoint.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "GET request");

        let response = self.inner.get(&url).send().await?;
        Self::decode(path, response).await
    }

    /// Post a JSON body and decode the JSON answer.
    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, ClientError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "POST request");

        let response = self.inner.post(&url).json(body).send().await?;
        Self::decode(path, response).await
    }

    async fn decode<T: DeserializeOwned>(path: &str, response: Response) -> Result<T, ClientError> {
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorResponse>(&text)
                .map(|e| e.error)
                .unwrap_or(text);

            return Err(if status == StatusCode::NOT_FOUND {
                ClientError::NotFound(format!("{path}: {message}"))
            } else {
                ClientError::Api {
                    status: status.as_u16(),
                    message,
                }
            });
        }

        response
            .json()
            .await
            .map_err(|e| ClientError::Serialization(e.to_string()))
    }
}
