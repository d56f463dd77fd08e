//! Chunk worker HTTP client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, warn};
use url::Url;

use crate::error::{WorkerClientError, WorkerClientResult};
use crate::types::{parse_result_key, ProcessRequest};
use crate::worker::ChunkWorker;

/// Configuration for the worker client.
#[derive(Debug, Clone)]
pub struct WorkerClientConfig {
    /// URL the chunk requests are posted to
    pub endpoint: String,
    /// Per-request timeout
    pub request_timeout: Duration,
}

impl Default for WorkerClientConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8080/".to_string(),
            request_timeout: Duration::from_secs(120),
        }
    }
}

impl WorkerClientConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            endpoint: std::env::var("WORKER_ENDPOINT")
                .unwrap_or_else(|_| "http://localhost:8080/".to_string()),
            request_timeout: Duration::from_secs(
                std::env::var("DISPATCH_REQUEST_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(120),
            ),
        }
    }
}

/// [`ChunkWorker`] reached over HTTP POST.
///
/// Each call is a single attempt; retries belong to the caller.
#[derive(Debug, Clone)]
pub struct HttpChunkWorker {
    http: Client,
    endpoint: Url,
    request_timeout: Duration,
}

impl HttpChunkWorker {
    pub fn new(config: WorkerClientConfig) -> WorkerClientResult<Self> {
        let endpoint = Url::parse(&config.endpoint)
            .map_err(|e| WorkerClientError::InvalidEndpoint(format!("{}: {}", config.endpoint, e)))?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(WorkerClientError::InvalidEndpoint(config.endpoint));
        }

        let http = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(WorkerClientError::Network)?;

        Ok(Self {
            http,
            endpoint,
            request_timeout: config.request_timeout,
        })
    }

    /// Create from environment variables.
    pub fn from_env() -> WorkerClientResult<Self> {
        Self::new(WorkerClientConfig::from_env())
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl ChunkWorker for HttpChunkWorker {
    async fn process(&self, chunk_key: &str) -> WorkerClientResult<String> {
        debug!(chunk_key, endpoint = %self.endpoint, "Dispatching chunk");

        let response = self
            .http
            .post(self.endpoint.clone())
            .json(&ProcessRequest::new(chunk_key))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    WorkerClientError::Timeout(self.request_timeout.as_secs())
                } else {
                    WorkerClientError::Network(e)
                }
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                WorkerClientError::Timeout(self.request_timeout.as_secs())
            } else {
                WorkerClientError::Network(e)
            }
        })?;

        if !status.is_success() {
            warn!(chunk_key, status = status.as_u16(), "Worker rejected chunk");
            return Err(WorkerClientError::request_failed(status.as_u16(), body));
        }

        parse_result_key(&body)
    }
}
