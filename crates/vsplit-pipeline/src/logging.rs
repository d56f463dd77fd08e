//! Structured run logging utilities.
//!
//! Provides consistent, structured logging for pipeline runs with
//! tracing spans and contextual information.

use tracing::{error, info, warn, Span};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::EnvFilter;

/// Tracing targets of the workspace crates. Targets are module paths, so
/// each crate needs its own directive.
pub const LOG_TARGETS: &[&str] = &[
    "vsplit_models",
    "vsplit_storage",
    "vsplit_media",
    "vsplit_worker_client",
    "vsplit_pipeline",
    "vsplit_api",
];

/// `RUST_LOG` filter with `info` enabled for every workspace crate.
pub fn env_filter() -> EnvFilter {
    LOG_TARGETS
        .iter()
        .filter_map(|target| format!("{}=info", target).parse::<Directive>().ok())
        .fold(EnvFilter::from_default_env(), EnvFilter::add_directive)
}

/// Run logger for structured logging with consistent formatting.
///
/// Every line carries the source key and the operation, so the log of one
/// run can be filtered out of interleaved concurrent runs.
#[derive(Debug, Clone)]
pub struct RunLogger {
    source_key: String,
    operation: String,
}

impl RunLogger {
    /// Create a new logger for a source key and operation
    /// (e.g. "pipeline_run", "split", "merge").
    pub fn new(source_key: &str, operation: &str) -> Self {
        Self {
            source_key: source_key.to_string(),
            operation: operation.to_string(),
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(
            source_key = %self.source_key,
            operation = %self.operation,
            "Run started: {}", message
        );
    }

    pub fn log_progress(&self, message: &str) {
        info!(
            source_key = %self.source_key,
            operation = %self.operation,
            "Run progress: {}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            source_key = %self.source_key,
            operation = %self.operation,
            "Run warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            source_key = %self.source_key,
            operation = %self.operation,
            "Run error: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            source_key = %self.source_key,
            operation = %self.operation,
            "Run completed: {}", message
        );
    }

    pub fn source_key(&self) -> &str {
        &self.source_key
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Create a tracing span for this run.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "run",
            source_key = %self.source_key,
            operation = %self.operation
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_filter_names_real_targets() {
        let own_crate = module_path!().split("::").next().unwrap();
        assert!(LOG_TARGETS.contains(&own_crate));

        let rendered = env_filter().to_string().to_lowercase();
        for target in LOG_TARGETS {
            assert!(
                rendered.contains(&format!("{}=info", target)),
                "{target} missing from {rendered}"
            );
        }
    }

    #[test]
    fn test_run_logger_creation() {
        let logger = RunLogger::new("uploads/clip.mp4", "pipeline_run");

        assert_eq!(logger.source_key(), "uploads/clip.mp4");
        assert_eq!(logger.operation(), "pipeline_run");
    }
}
