//! Pipeline configuration.

use std::path::PathBuf;
use std::time::Duration;

use vsplit_media::DEFAULT_MEDIA_TIMEOUT_SECS;
use vsplit_models::{KeyLayout, MergeMode, SplitPolicy, DEFAULT_SOURCE_EXTENSIONS};
use vsplit_worker_client::WorkerClientConfig;

use crate::dispatcher::DispatchConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::retry::RetryConfig;

/// Pipeline configuration, built once and threaded through every component.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Bucket notifications must come from; `None` accepts any bucket
    pub bucket: Option<String>,
    /// Key namespace prefix (may be empty)
    pub prefix: String,
    /// Extensions treated as source videos
    pub source_extensions: Vec<String>,
    pub split_policy: SplitPolicy,
    pub merge_mode: MergeMode,
    /// Chunk worker URL
    pub worker_endpoint: String,
    /// Maximum simultaneous worker requests
    pub concurrency_limit: usize,
    /// Timeout for one worker request
    pub request_timeout: Duration,
    /// Upper bound for a whole dispatch round
    pub overall_timeout: Duration,
    /// Retries for transient worker failures
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    /// Timeout for a single ffmpeg/ffprobe invocation
    pub media_timeout_secs: u64,
    /// Scratch root; the system temp dir when unset
    pub work_dir: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            bucket: None,
            prefix: String::new(),
            source_extensions: DEFAULT_SOURCE_EXTENSIONS
                .iter()
                .map(|e| e.to_string())
                .collect(),
            split_policy: SplitPolicy::default(),
            merge_mode: MergeMode::default(),
            worker_endpoint: "http://localhost:8080/".to_string(),
            concurrency_limit: 4,
            request_timeout: Duration::from_secs(120),
            overall_timeout: Duration::from_secs(900),
            max_retries: 2,
            retry_base_delay: Duration::from_millis(500),
            media_timeout_secs: DEFAULT_MEDIA_TIMEOUT_SECS,
            work_dir: None,
        }
    }
}

impl PipelineConfig {
    /// Create config from environment variables.
    ///
    /// Unparseable numbers fall back to defaults; an invalid split policy or
    /// merge mode is an error.
    pub fn from_env() -> PipelineResult<Self> {
        let defaults = Self::default();

        let split_policy = match std::env::var("SPLIT_POLICY") {
            Ok(v) if !v.trim().is_empty() => v
                .parse::<SplitPolicy>()
                .map_err(|e| PipelineError::config(e.to_string()))?,
            _ => defaults.split_policy,
        };

        let merge_mode = match std::env::var("MERGE_MODE") {
            Ok(v) if !v.trim().is_empty() => v
                .parse::<MergeMode>()
                .map_err(|e| PipelineError::config(e.to_string()))?,
            _ => defaults.merge_mode,
        };

        let source_extensions = std::env::var("SOURCE_EXTENSIONS")
            .ok()
            .map(|v| {
                v.split(',')
                    .map(|e| e.trim().to_string())
                    .filter(|e| !e.is_empty())
                    .collect::<Vec<_>>()
            })
            .filter(|exts| !exts.is_empty())
            .unwrap_or(defaults.source_extensions);

        Ok(Self {
            bucket: std::env::var("S3_BUCKET").ok().filter(|b| !b.is_empty()),
            prefix: std::env::var("PIPELINE_PREFIX").unwrap_or_default(),
            source_extensions,
            split_policy,
            merge_mode,
            worker_endpoint: std::env::var("WORKER_ENDPOINT")
                .unwrap_or(defaults.worker_endpoint),
            concurrency_limit: std::env::var("DISPATCH_CONCURRENCY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.concurrency_limit),
            request_timeout: Duration::from_secs(
                std::env::var("DISPATCH_REQUEST_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(120),
            ),
            overall_timeout: Duration::from_secs(
                std::env::var("DISPATCH_OVERALL_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(900),
            ),
            max_retries: std::env::var("DISPATCH_MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_retries),
            retry_base_delay: defaults.retry_base_delay,
            media_timeout_secs: std::env::var("MEDIA_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.media_timeout_secs),
            work_dir: std::env::var("WORK_DIR")
                .ok()
                .filter(|d| !d.is_empty())
                .map(PathBuf::from),
        })
    }

    /// Key layout for this namespace.
    pub fn layout(&self) -> KeyLayout {
        KeyLayout::new(self.prefix.clone()).with_source_extensions(&self.source_extensions)
    }

    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            concurrency_limit: self.concurrency_limit,
            overall_timeout: self.overall_timeout,
            retry: RetryConfig::new("dispatch_chunk")
                .with_max_retries(self.max_retries)
                .with_base_delay(self.retry_base_delay),
        }
    }

    pub fn worker_config(&self) -> WorkerClientConfig {
        WorkerClientConfig {
            endpoint: self.worker_endpoint.clone(),
            request_timeout: self.request_timeout,
        }
    }
}
