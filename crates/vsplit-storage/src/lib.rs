//! Object storage gateway.
//!
//! This crate provides:
//! - The [`ObjectStore`] trait (get/put/delete/list/exists)
//! - An S3-compatible client (AWS, MinIO, R2)
//! - An in-memory store used by tests and local runs
//! - The append-only [`ManifestLog`]

pub mod client;
pub mod error;
pub mod manifest;
pub mod memory;
pub mod store;

pub use client::{S3Client, S3Config};
pub use error::{StorageError, StorageResult};
pub use manifest::ManifestLog;
pub use memory::MemoryStore;
pub use store::{content_type_for, ObjectStore};
