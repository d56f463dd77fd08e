//! Chunk worker abstraction.

use async_trait::async_trait;

use crate::error::WorkerClientResult;

/// A stateless per-chunk transform service.
///
/// Workers pull the chunk bytes from storage themselves; only the key
/// travels over the wire. On success the worker answers with the key of the
/// processed chunk.
#[async_trait]
pub trait ChunkWorker: Send + Sync {
    async fn process(&self, chunk_key: &str) -> WorkerClientResult<String>;
}
