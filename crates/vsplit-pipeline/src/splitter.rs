//! Source splitting.
//!
//! Downloads a source, cuts it into fixed-size chunks with the media codec,
//! uploads each chunk under its deterministic key and records the ordered
//! key list in the manifest. Re-running a split of the same source under the
//! same policy overwrites the same keys.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;
use tracing::{debug, info};
use vsplit_media::{VideoCodec, VideoInfo};
use vsplit_models::{Chunk, KeyLayout, ManifestEntry, Marker, SourceParts, SplitPolicy};
use vsplit_storage::{content_type_for, ManifestLog, ObjectStore};

use crate::error::{PipelineError, PipelineResult};
use crate::logging::RunLogger;

/// Result of a completed split.
#[derive(Debug, Clone)]
pub struct SplitOutcome {
    pub source_key: String,
    /// Ordered chunks; sequence indices are `0..chunks.len()`
    pub chunks: Vec<Chunk>,
    pub manifest_key: String,
    /// Stream format and frame count of the source
    pub source_info: VideoInfo,
}

impl SplitOutcome {
    pub fn chunk_keys(&self) -> Vec<&str> {
        self.chunks.iter().map(|c| c.key.as_str()).collect()
    }
}

/// Create a scratch directory under `work_dir`, or the system temp dir.
pub(crate) fn scratch_dir(work_dir: Option<&Path>, prefix: &str) -> std::io::Result<TempDir> {
    let mut builder = tempfile::Builder::new();
    builder.prefix(prefix);
    match work_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            builder.tempdir_in(dir)
        }
        None => builder.tempdir(),
    }
}

pub struct Splitter {
    store: Arc<dyn ObjectStore>,
    codec: Arc<dyn VideoCodec>,
    layout: KeyLayout,
    policy: SplitPolicy,
    work_dir: Option<PathBuf>,
}

impl Splitter {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        codec: Arc<dyn VideoCodec>,
        layout: KeyLayout,
        policy: SplitPolicy,
    ) -> Self {
        Self {
            store,
            codec,
            layout,
            policy,
            work_dir: None,
        }
    }

    pub fn with_work_dir(mut self, work_dir: Option<PathBuf>) -> Self {
        self.work_dir = work_dir;
        self
    }

    pub fn policy(&self) -> SplitPolicy {
        self.policy
    }

    /// Split a source, opening its manifest.
    pub async fn split(&self, source_key: &str) -> PipelineResult<SplitOutcome> {
        let source = self.layout.parse_source(source_key)?;
        let mut log = ManifestLog::open(self.store.clone(), self.layout.manifest_key(&source))
            .await
            .map_err(PipelineError::manifest)?;
        self.split_with_log(source_key, &mut log).await
    }

    /// Split a source, recording progress in an already open manifest.
    ///
    /// The manifest holds the full ordered chunk list before this returns
    /// `Ok`. On error an `ERROR` marker is recorded and no `SPLIT COMPLETE`
    /// is written.
    pub async fn split_with_log(
        &self,
        source_key: &str,
        log: &mut ManifestLog,
    ) -> PipelineResult<SplitOutcome> {
        let source = self.layout.parse_source(source_key)?;
        let logger = RunLogger::new(source_key, "split");

        log.mark(Marker::RunStarted, source_key)
            .await
            .map_err(PipelineError::manifest)?;
        logger.log_start(&format!("policy={}", self.policy));

        match self.split_inner(source_key, &source, log).await {
            Ok(outcome) => {
                logger.log_completion(&format!(
                    "{} chunks, {} frames",
                    outcome.chunks.len(),
                    outcome.source_info.frame_count
                ));
                Ok(outcome)
            }
            Err(e) => {
                logger.log_error(&e.to_string());
                log.record_error(format!("split: {}", e)).await;
                Err(e)
            }
        }
    }

    async fn split_inner(
        &self,
        source_key: &str,
        source: &SourceParts,
        log: &mut ManifestLog,
    ) -> PipelineResult<SplitOutcome> {
        let scratch = scratch_dir(self.work_dir.as_deref(), "vsplit-split-")?;
        let local_source = scratch.path().join(format!("source.{}", source.ext));

        self.store.download_to(source_key, &local_source).await?;

        let source_info = self.codec.probe(&local_source).await?;
        if source_info.frame_count == 0 {
            return Err(PipelineError::decode(format!(
                "{} has no video frames",
                source_key
            )));
        }

        let frames_per_chunk = self.policy.frames_per_chunk(source_info.fps);
        debug!(
            source_key,
            frames_per_chunk,
            expected_chunks = self.policy.expected_chunks(source_info.frame_count, source_info.fps),
            "Splitting source"
        );

        let parts = self
            .codec
            .split(
                &local_source,
                &source_info,
                frames_per_chunk,
                &scratch.path().join("chunks"),
            )
            .await?;
        if parts.is_empty() {
            return Err(PipelineError::decode(format!("{} produced no chunks", source_key)));
        }

        let mut total_frames = 0u64;
        for part in &parts {
            let info = self.codec.probe(part).await?;
            source_info
                .ensure_same_format(&info)
                .map_err(|e| PipelineError::decode(format!("{}: {}", part.display(), e)))?;
            total_frames += info.frame_count;
        }
        if total_frames != source_info.frame_count {
            return Err(PipelineError::decode(format!(
                "chunks hold {} frames, source has {}",
                total_frames, source_info.frame_count
            )));
        }

        let mut chunks = Vec::with_capacity(parts.len());
        for (index, part) in parts.iter().enumerate() {
            let key = self.layout.chunk_key(source, index);
            self.store
                .upload_from(part, &key, content_type_for(&key))
                .await?;
            chunks.push(Chunk::new(index, key));
        }

        let mut entries: Vec<ManifestEntry> = chunks
            .iter()
            .map(|c| ManifestEntry::chunk(c.key.clone()))
            .collect();
        entries.push(ManifestEntry::marker_with(
            Marker::SplitComplete,
            format!("chunks={} frames={}", chunks.len(), total_frames),
        ));
        log.append_all(entries)
            .await
            .map_err(PipelineError::manifest)?;

        info!(source_key, chunks = chunks.len(), frames = total_frames, "Split complete");

        Ok(SplitOutcome {
            source_key: source_key.to_string(),
            chunks,
            manifest_key: log.key().to_string(),
            source_info,
        })
    }
}
