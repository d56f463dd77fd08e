//! Chunk and per-chunk dispatch result models.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A contiguous, ordered slice of a source video stored as its own object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Chunk {
    /// Zero-based position of the chunk in the source
    pub sequence_index: usize,
    /// Storage key of the uploaded chunk
    pub key: String,
}

impl Chunk {
    pub fn new(sequence_index: usize, key: impl Into<String>) -> Self {
        Self {
            sequence_index,
            key: key.into(),
        }
    }
}

/// Terminal outcome of dispatching one chunk to the worker pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStatus {
    /// Worker returned a result key
    Ok,
    /// Worker rejected the chunk or the request failed
    Failed,
    /// No answer before the request or dispatch deadline
    Timeout,
}

impl ChunkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkStatus::Ok => "ok",
            ChunkStatus::Failed => "failed",
            ChunkStatus::Timeout => "timeout",
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, ChunkStatus::Ok)
    }
}

impl fmt::Display for ChunkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of dispatching a single chunk.
///
/// Always carries the originating sequence index so results can be put back
/// in order regardless of completion order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkResult {
    pub sequence_index: usize,
    /// Key of the chunk that was dispatched
    pub chunk_key: String,
    /// Key of the processed chunk; only set when `status` is `Ok`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_key: Option<String>,
    pub status: ChunkStatus,
    /// Requests issued for this chunk, including retries
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ChunkResult {
    pub fn ok(chunk: &Chunk, result_key: impl Into<String>, attempts: u32) -> Self {
        Self {
            sequence_index: chunk.sequence_index,
            chunk_key: chunk.key.clone(),
            result_key: Some(result_key.into()),
            status: ChunkStatus::Ok,
            attempts,
            error: None,
        }
    }

    pub fn failed(chunk: &Chunk, error: impl Into<String>, attempts: u32) -> Self {
        Self {
            sequence_index: chunk.sequence_index,
            chunk_key: chunk.key.clone(),
            result_key: None,
            status: ChunkStatus::Failed,
            attempts,
            error: Some(error.into()),
        }
    }

    pub fn timeout(chunk: &Chunk, error: impl Into<String>, attempts: u32) -> Self {
        Self {
            sequence_index: chunk.sequence_index,
            chunk_key: chunk.key.clone(),
            result_key: None,
            status: ChunkStatus::Timeout,
            attempts,
            error: Some(error.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status.is_ok()
    }
}

/// Per-status tally of a dispatch round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchSummary {
    pub ok: usize,
    pub failed: usize,
    pub timed_out: usize,
}

impl DispatchSummary {
    pub fn from_results(results: &[ChunkResult]) -> Self {
        results.iter().fold(Self::default(), |mut acc, r| {
            match r.status {
                ChunkStatus::Ok => acc.ok += 1,
                ChunkStatus::Failed => acc.failed += 1,
                ChunkStatus::Timeout => acc.timed_out += 1,
            }
            acc
        })
    }

    pub fn total(&self) -> usize {
        self.ok + self.failed + self.timed_out
    }

    pub fn all_ok(&self) -> bool {
        self.failed == 0 && self.timed_out == 0
    }
}

impl fmt::Display for DispatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ok={} failed={} timeout={}",
            self.ok, self.failed, self.timed_out
        )
    }
}
