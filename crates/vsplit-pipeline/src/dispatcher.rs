//! Bounded fan-out of chunks to the worker pool.
//!
//! Every chunk gets exactly one terminal [`ChunkResult`]. Requests run
//! concurrently up to the concurrency limit; a single overall deadline
//! bounds the whole round. When it fires, unfinished chunks are abandoned
//! and reported as `timeout`.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use vsplit_models::{Chunk, ChunkResult, DispatchSummary};
use vsplit_worker_client::ChunkWorker;

use crate::metrics;
use crate::retry::RetryConfig;

/// Limits for one dispatch round.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Maximum requests in flight; 0 is treated as 1
    pub concurrency_limit: usize,
    /// Upper bound for the whole round
    pub overall_timeout: Duration,
    /// Backoff for transient worker failures
    pub retry: RetryConfig,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: 4,
            overall_timeout: Duration::from_secs(900),
            retry: RetryConfig::new("dispatch_chunk").with_max_retries(2),
        }
    }
}

/// Sends chunk keys to a [`ChunkWorker`] and collects the results.
#[derive(Clone)]
pub struct Dispatcher {
    worker: Arc<dyn ChunkWorker>,
    config: DispatchConfig,
}

impl Dispatcher {
    pub fn new(worker: Arc<dyn ChunkWorker>, config: DispatchConfig) -> Self {
        Self { worker, config }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Dispatch every chunk and wait for all outcomes or the deadline.
    ///
    /// Returns one result per input chunk, sorted by sequence index.
    pub async fn dispatch(&self, chunks: &[Chunk]) -> Vec<ChunkResult> {
        if chunks.is_empty() {
            return Vec::new();
        }

        let limit = self.config.concurrency_limit.max(1);
        let deadline = Instant::now() + self.config.overall_timeout;
        let semaphore = Semaphore::new(limit);
        let attempts: Vec<AtomicU32> = chunks.iter().map(|_| AtomicU32::new(0)).collect();
        let mut slots: Vec<Option<ChunkResult>> = vec![None; chunks.len()];

        info!(
            chunks = chunks.len(),
            concurrency_limit = limit,
            overall_timeout_secs = self.config.overall_timeout.as_secs_f64(),
            "Dispatching chunks"
        );

        {
            let mut pending: FuturesUnordered<_> = chunks
                .iter()
                .enumerate()
                .map(|(pos, chunk)| {
                    let semaphore = &semaphore;
                    let attempts = &attempts[pos];
                    async move { (pos, self.run_chunk(chunk, semaphore, attempts).await) }
                })
                .collect();

            loop {
                match tokio::time::timeout_at(deadline, pending.next()).await {
                    Ok(Some((pos, result))) => {
                        let slot = &mut slots[pos];
                        if slot.is_none() {
                            metrics::record_chunk_dispatched(result.status.as_str());
                            *slot = Some(result);
                        } else {
                            debug!(sequence_index = result.sequence_index, "Ignoring duplicate completion");
                        }
                    }
                    Ok(None) => break,
                    Err(_) => {
                        warn!(
                            unfinished = pending.len(),
                            "Dispatch deadline reached, abandoning outstanding chunks"
                        );
                        break;
                    }
                }
            }
        }

        let mut results: Vec<ChunkResult> = slots
            .into_iter()
            .zip(chunks)
            .zip(&attempts)
            .map(|((slot, chunk), attempts)| {
                slot.unwrap_or_else(|| {
                    metrics::record_chunk_dispatched("timeout");
                    ChunkResult::timeout(
                        chunk,
                        "overall dispatch deadline reached",
                        attempts.load(Ordering::SeqCst),
                    )
                })
            })
            .collect();
        results.sort_by_key(|r| r.sequence_index);

        info!(summary = %DispatchSummary::from_results(&results), "Dispatch finished");
        results
    }

    /// Drive one chunk to a terminal outcome.
    ///
    /// A concurrency slot is held only while a request is in flight, not
    /// while waiting out a retry backoff.
    async fn run_chunk(&self, chunk: &Chunk, semaphore: &Semaphore, attempts: &AtomicU32) -> ChunkResult {
        let retry = &self.config.retry;
        let mut attempt = 0u32;

        loop {
            let outcome = {
                let _permit = match semaphore.acquire().await {
                    Ok(permit) => permit,
                    Err(_) => return ChunkResult::failed(chunk, "dispatcher closed", attempt),
                };
                attempt += 1;
                attempts.store(attempt, Ordering::SeqCst);
                self.worker.process(&chunk.key).await
            };

            match outcome {
                Ok(result_key) => {
                    debug!(
                        sequence_index = chunk.sequence_index,
                        chunk_key = %chunk.key,
                        result_key = %result_key,
                        attempt,
                        "Chunk processed"
                    );
                    return ChunkResult::ok(chunk, result_key, attempt);
                }
                Err(e) if e.is_retryable() && attempt <= retry.max_retries => {
                    let delay = retry.delay_for_attempt(attempt);
                    warn!(
                        sequence_index = chunk.sequence_index,
                        chunk_key = %chunk.key,
                        attempt,
                        "Transient worker failure, retrying in {:?}: {}", delay, e
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) if e.is_timeout() => {
                    warn!(sequence_index = chunk.sequence_index, chunk_key = %chunk.key, "Chunk timed out: {}", e);
                    return ChunkResult::timeout(chunk, e.to_string(), attempt);
                }
                Err(e) => {
                    warn!(sequence_index = chunk.sequence_index, chunk_key = %chunk.key, "Chunk failed: {}", e);
                    return ChunkResult::failed(chunk, e.to_string(), attempt);
                }
            }
        }
    }
}
