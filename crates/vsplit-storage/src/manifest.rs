//! Append-only manifest log on top of an object store.
//!
//! The store has no append primitive, so every append rewrites the whole
//! object. Each flush re-reads the stored object and appends to what is
//! there, so two runs on the same source never drop each other's lines.
//! A failed flush leaves the in-memory copy at what was last read.

use std::sync::Arc;

use tracing::{debug, warn};
use vsplit_models::{parse_manifest, render_manifest, ManifestEntry, Marker, RunView};

use crate::error::{StorageError, StorageResult};
use crate::store::ObjectStore;

const MANIFEST_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// Durable progress log for one source.
pub struct ManifestLog {
    store: Arc<dyn ObjectStore>,
    key: String,
    entries: Vec<ManifestEntry>,
}

impl ManifestLog {
    /// Load the manifest at `key`, or start an empty one if it does not exist.
    pub async fn open(store: Arc<dyn ObjectStore>, key: impl Into<String>) -> StorageResult<Self> {
        let key = key.into();
        let entries = read_entries(store.as_ref(), &key).await?;
        debug!(manifest = %key, entries = entries.len(), "Opened manifest");
        Ok(Self {
            store,
            key,
            entries,
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    /// Entries of the latest run.
    pub fn latest_run(&self) -> RunView<'_> {
        RunView::latest(&self.entries)
    }

    pub async fn append(&mut self, entry: ManifestEntry) -> StorageResult<()> {
        self.append_all(vec![entry]).await
    }

    pub async fn mark(&mut self, marker: Marker, detail: impl Into<String>) -> StorageResult<()> {
        self.append(ManifestEntry::marker_with(marker, detail)).await
    }

    /// Append several entries with a single flush.
    pub async fn append_all(&mut self, entries: Vec<ManifestEntry>) -> StorageResult<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let stored = read_entries(self.store.as_ref(), &self.key).await?;
        if stored.len() != self.entries.len() {
            debug!(
                manifest = %self.key,
                stored = stored.len(),
                local = self.entries.len(),
                "Manifest changed since last flush"
            );
        }

        let mut updated = stored;
        let kept = updated.len();
        updated.extend(entries);

        let body = render_manifest(&updated);
        let result = self
            .store
            .put(&self.key, body.into_bytes(), MANIFEST_CONTENT_TYPE)
            .await;
        if result.is_err() {
            updated.truncate(kept);
        }
        self.entries = updated;
        result
    }

    /// Record an error marker, logging instead of failing when the flush fails.
    pub async fn record_error(&mut self, detail: impl Into<String>) {
        let detail = detail.into();
        if let Err(e) = self.append(ManifestEntry::error(detail.clone())).await {
            warn!(
                manifest = %self.key,
                error = %e,
                "Failed to record error marker: {}", detail
            );
        }
    }
}

async fn read_entries(store: &dyn ObjectStore, key: &str) -> StorageResult<Vec<ManifestEntry>> {
    match store.get(key).await {
        Ok(bytes) => Ok(parse_manifest(&String::from_utf8_lossy(&bytes))),
        Err(StorageError::NotFound(_)) => Ok(Vec::new()),
        Err(e) => Err(e),
    }
}
