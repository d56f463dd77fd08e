//! Application state.

use std::sync::Arc;

use vsplit_pipeline::{EventClassifier, Pipeline, PipelineConfig, RetryConfig};
use vsplit_storage::ObjectStore;

use crate::config::ApiConfig;
use crate::error::{ApiError, ApiResult};
use crate::services::{RunLauncher, SourceRunner};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub classifier: Arc<EventClassifier>,
    pub store: Arc<dyn ObjectStore>,
    pub launcher: RunLauncher,
    /// Client for subscription confirmation callbacks
    pub http: reqwest::Client,
    pub handshake_retry: RetryConfig,
}

impl AppState {
    /// Create the production state: S3 store, ffmpeg codec, HTTP workers.
    pub async fn new(
        config: ApiConfig,
        pipeline_config: PipelineConfig,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let classifier = EventClassifier::new(pipeline_config.layout(), pipeline_config.bucket.clone());
        let pipeline = Pipeline::connect(pipeline_config).await?;
        let store = pipeline.store();

        Ok(Self::from_parts(config, classifier, store, Arc::new(pipeline))?)
    }

    /// Assemble state from already built collaborators.
    pub fn from_parts(
        config: ApiConfig,
        classifier: EventClassifier,
        store: Arc<dyn ObjectStore>,
        runner: Arc<dyn SourceRunner>,
    ) -> ApiResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.handshake_timeout)
            .build()
            .map_err(|e| ApiError::internal(format!("failed to build HTTP client: {}", e)))?;
        let handshake_retry = RetryConfig::new("confirm_subscription")
            .with_max_retries(config.handshake_max_retries);
        let launcher = RunLauncher::new(runner, config.single_flight);

        Ok(Self {
            config,
            classifier: Arc::new(classifier),
            store,
            launcher,
            http,
            handshake_retry,
        })
    }
}
