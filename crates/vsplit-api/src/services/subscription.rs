//! Subscription handshake callback.

use reqwest::StatusCode;
use thiserror::Error;
use tracing::{info, warn};
use vsplit_pipeline::{retry_async_if, RetryConfig};

use crate::error::{ApiError, ApiResult};
use crate::metrics;

#[derive(Debug, Error)]
enum ConfirmError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("event source answered {0}")]
    Status(StatusCode),
}

impl ConfirmError {
    fn is_retryable(&self) -> bool {
        match self {
            ConfirmError::Transport(_) => true,
            ConfirmError::Status(status) => status.is_server_error(),
        }
    }
}

/// Complete a subscription handshake by fetching its confirmation URL.
///
/// The client's own timeout bounds each attempt.
pub async fn confirm_subscription(
    http: &reqwest::Client,
    subscribe_url: &str,
    retry: &RetryConfig,
) -> ApiResult<()> {
    let result = retry_async_if(retry, ConfirmError::is_retryable, || async {
        let response = http.get(subscribe_url).send().await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(ConfirmError::Status(status))
        }
    })
    .await
    .into_result();

    match result {
        Ok(()) => {
            info!("Subscription confirmed");
            metrics::record_handshake("confirmed");
            Ok(())
        }
        Err(e) => {
            warn!("Subscription confirmation failed: {}", e);
            metrics::record_handshake("failed");
            Err(ApiError::bad_gateway(format!(
                "subscription confirmation failed: {}",
                e
            )))
        }
    }
}
