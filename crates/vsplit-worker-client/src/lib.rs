//! Client for the per-chunk transform worker service.
//!
//! The dispatcher talks to workers through the [`ChunkWorker`] trait;
//! [`HttpChunkWorker`] is the production implementation.

pub mod client;
pub mod error;
pub mod types;
pub mod worker;

pub use client::{HttpChunkWorker, WorkerClientConfig};
pub use error::{WorkerClientError, WorkerClientResult};
pub use types::{parse_result_key, ProcessRequest, ProcessResponse};
pub use worker::ChunkWorker;
