//! Chunk worker client error types.

use thiserror::Error;

pub type WorkerClientResult<T> = Result<T, WorkerClientError>;

#[derive(Debug, Error)]
pub enum WorkerClientError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Timeout after {0} seconds")]
    Timeout(u64),

    #[error("Worker returned {status}: {body}")]
    RequestFailed { status: u16, body: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid worker endpoint: {0}")]
    InvalidEndpoint(String),
}

impl WorkerClientError {
    pub fn request_failed(status: u16, body: impl Into<String>) -> Self {
        Self::RequestFailed {
            status,
            body: body.into(),
        }
    }

    pub fn invalid_response(msg: impl Into<String>) -> Self {
        Self::InvalidResponse(msg.into())
    }

    /// Transport failures are retryable; a worker's explicit answer is not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            WorkerClientError::Timeout(_) | WorkerClientError::Network(_)
        )
    }

    pub fn is_timeout(&self) -> bool {
        match self {
            WorkerClientError::Timeout(_) => true,
            WorkerClientError::Network(e) => e.is_timeout(),
            _ => false,
        }
    }
}
