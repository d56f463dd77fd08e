//! Shared data models for the vsplit pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Chunks and per-chunk dispatch results
//! - Split and merge policies
//! - The storage key layout and key classification
//! - The manifest line format

pub mod chunk;
pub mod error;
pub mod keys;
pub mod manifest;
pub mod policy;

// Re-export common types
pub use chunk::{Chunk, ChunkResult, ChunkStatus, DispatchSummary};
pub use error::{ModelError, ModelResult};
pub use keys::{KeyKind, KeyLayout, SourceParts, DEFAULT_SOURCE_EXTENSIONS};
pub use manifest::{parse_manifest, render_manifest, ManifestEntry, Marker, RunPhase, RunView};
pub use policy::{MergeMode, SplitPolicy};
