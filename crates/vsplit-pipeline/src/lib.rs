//! Chunked video split/dispatch/merge pipeline.
//!
//! This crate provides:
//! - Event classification for inbound storage notifications
//! - Splitting a source into fixed-size chunks
//! - Bounded, deadline-limited dispatch of chunks to workers
//! - Verified reassembly of processed chunks
//! - The end-to-end [`Pipeline`] runner

pub mod classifier;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod logging;
pub mod merger;
pub mod metrics;
pub mod pipeline;
pub mod retry;
pub mod splitter;

pub use classifier::{EventClass, EventClassifier, SkipReason, SkippedKey};
pub use config::PipelineConfig;
pub use dispatcher::{DispatchConfig, Dispatcher};
pub use error::{PipelineError, PipelineResult};
pub use logging::{env_filter, RunLogger, LOG_TARGETS};
pub use merger::{MergeReport, Merger};
pub use pipeline::{Pipeline, RunReport};
pub use retry::{retry_async, retry_async_if, RetryConfig, RetryResult};
pub use splitter::{SplitOutcome, Splitter};
