//! Reassembly of processed chunks into the output object.
//!
//! The merged file is built and verified locally; the output key is written
//! with a single whole-object put, bracketed by `START UPLOADING` and
//! `STOP UPLOADING` markers. Intermediates are deleted only after the output
//! is confirmed stored.

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};
use vsplit_media::VideoCodec;
use vsplit_models::{Chunk, ChunkResult, KeyKind, KeyLayout, ManifestEntry, Marker, MergeMode};
use vsplit_storage::{content_type_for, ManifestLog, ObjectStore, StorageError};

use crate::error::{PipelineError, PipelineResult};
use crate::logging::RunLogger;
use crate::retry::{retry_async, RetryConfig};
use crate::splitter::{scratch_dir, SplitOutcome};

/// Summary of a successful merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    pub output_key: String,
    pub chunk_count: usize,
    /// Sequence indices replaced by their unprocessed chunk
    pub substituted: Vec<usize>,
    pub frame_count: u64,
    pub deleted_intermediates: usize,
}

/// One merge input, in sequence order.
#[derive(Debug, Clone)]
struct MergeInput {
    sequence_index: usize,
    key: String,
    substituted: bool,
}

pub struct Merger {
    store: Arc<dyn ObjectStore>,
    codec: Arc<dyn VideoCodec>,
    layout: KeyLayout,
    mode: MergeMode,
    work_dir: Option<PathBuf>,
    confirm_retry: RetryConfig,
}

impl Merger {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        codec: Arc<dyn VideoCodec>,
        layout: KeyLayout,
        mode: MergeMode,
    ) -> Self {
        Self {
            store,
            codec,
            layout,
            mode,
            work_dir: None,
            confirm_retry: RetryConfig::new("confirm_output")
                .with_max_retries(3)
                .with_base_delay(Duration::from_millis(200)),
        }
    }

    pub fn with_work_dir(mut self, work_dir: Option<PathBuf>) -> Self {
        self.work_dir = work_dir;
        self
    }

    pub fn mode(&self) -> MergeMode {
        self.mode
    }

    /// Merge the results of a split into `output_key`, opening its manifest.
    pub async fn merge(
        &self,
        split: &SplitOutcome,
        results: &[ChunkResult],
        output_key: &str,
    ) -> PipelineResult<MergeReport> {
        let mut log = ManifestLog::open(self.store.clone(), split.manifest_key.clone())
            .await
            .map_err(PipelineError::manifest)?;
        self.merge_with_log(split, results, output_key, &mut log).await
    }

    /// Merge, recording progress in an already open manifest.
    ///
    /// On error an `ERROR` marker is recorded, nothing is written under
    /// `output_key` and intermediates are left in place.
    pub async fn merge_with_log(
        &self,
        split: &SplitOutcome,
        results: &[ChunkResult],
        output_key: &str,
        log: &mut ManifestLog,
    ) -> PipelineResult<MergeReport> {
        let logger = RunLogger::new(&split.source_key, "merge");
        logger.log_start(&format!("mode={} output={}", self.mode, output_key));

        let selected = order_results(&split.chunks, results)
            .and_then(|ordered| select_inputs(self.mode, &split.chunks, &ordered));
        let outcome = match selected {
            Ok(inputs) => self.merge_inputs(split, &inputs, output_key, log).await,
            Err(e) => Err(e),
        };

        let (frame_count, inputs) = match outcome {
            Ok(merged) => merged,
            Err(e) => {
                logger.log_error(&e.to_string());
                log.record_error(format!("merge: {}", e)).await;
                return Err(e);
            }
        };

        let deleted = self
            .delete_intermediates(split, results, output_key, &logger)
            .await;
        if let Err(e) = log
            .mark(Marker::IntermediatesDeleted, deleted.to_string())
            .await
        {
            logger.log_warning(&format!("could not record cleanup: {}", e));
        }

        let substituted: Vec<usize> = inputs
            .iter()
            .filter(|i| i.substituted)
            .map(|i| i.sequence_index)
            .collect();
        logger.log_completion(&format!(
            "{} chunks, {} frames, {} substituted, {} intermediates deleted",
            inputs.len(),
            frame_count,
            substituted.len(),
            deleted
        ));

        Ok(MergeReport {
            output_key: output_key.to_string(),
            chunk_count: inputs.len(),
            substituted,
            frame_count,
            deleted_intermediates: deleted,
        })
    }

    /// Download, verify, concatenate and publish. Returns the merged frame
    /// count and the inputs used.
    async fn merge_inputs(
        &self,
        split: &SplitOutcome,
        inputs: &[MergeInput],
        output_key: &str,
        log: &mut ManifestLog,
    ) -> PipelineResult<(u64, Vec<MergeInput>)> {
        let substituted = inputs.iter().filter(|i| i.substituted).count();
        log.mark(
            Marker::MergeStarted,
            format!("inputs={} substituted={}", inputs.len(), substituted),
        )
        .await
        .map_err(PipelineError::manifest)?;

        let scratch = scratch_dir(self.work_dir.as_deref(), "vsplit-merge-")?;
        let ext = output_key
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_string())
            .unwrap_or_else(|| "mp4".to_string());

        let mut local_inputs = Vec::with_capacity(inputs.len());
        let mut expected_frames = 0u64;
        for input in inputs {
            let path = scratch
                .path()
                .join("inputs")
                .join(format!("{:05}.{}", input.sequence_index, ext));
            self.store.download_to(&input.key, &path).await?;

            let info = self.codec.verify(&path).await.map_err(|e| {
                PipelineError::decode(format!("chunk {} ({}): {}", input.sequence_index, input.key, e))
            })?;
            split.source_info.ensure_same_format(&info).map_err(|e| {
                PipelineError::decode(format!("chunk {} ({}): {}", input.sequence_index, input.key, e))
            })?;

            expected_frames += info.frame_count;
            local_inputs.push(path);
        }

        let merged = scratch.path().join(format!("merged.{}", ext));
        self.codec.concat(&local_inputs, &merged).await?;

        let merged_info = self
            .codec
            .verify(&merged)
            .await
            .map_err(|e| PipelineError::decode(format!("merged output: {}", e)))?;
        split
            .source_info
            .ensure_same_format(&merged_info)
            .map_err(|e| PipelineError::decode(format!("merged output: {}", e)))?;
        if merged_info.frame_count != expected_frames {
            return Err(PipelineError::decode(format!(
                "merged output has {} frames, inputs hold {}",
                merged_info.frame_count, expected_frames
            )));
        }

        log.mark(Marker::StartUploading, output_key)
            .await
            .map_err(PipelineError::manifest)?;

        self.store
            .upload_from(&merged, output_key, content_type_for(output_key))
            .await?;
        self.confirm_stored(output_key).await?;

        log.append_all(vec![
            ManifestEntry::marker_with(Marker::StopUploading, output_key),
            ManifestEntry::marker_with(
                Marker::MergeComplete,
                format!("frames={}", merged_info.frame_count),
            ),
        ])
        .await
        .map_err(PipelineError::manifest)?;

        info!(
            source_key = %split.source_key,
            output_key,
            frames = merged_info.frame_count,
            "Merged output stored"
        );

        Ok((merged_info.frame_count, inputs.to_vec()))
    }

    /// Wait until the output is visible in the store.
    async fn confirm_stored(&self, key: &str) -> PipelineResult<()> {
        let visible = retry_async(&self.confirm_retry, || async {
            match self.store.exists(key).await {
                Ok(true) => Ok(()),
                Ok(false) => Err(StorageError::not_found(key)),
                Err(e) => Err(e),
            }
        })
        .await
        .into_result();

        visible.map_err(|e| {
            PipelineError::Storage(StorageError::upload_failed(format!(
                "{} not visible after upload: {}",
                key, e
            )))
        })
    }

    /// Best-effort removal of chunk and result objects. Returns the number
    /// of keys deleted.
    async fn delete_intermediates(
        &self,
        split: &SplitOutcome,
        results: &[ChunkResult],
        output_key: &str,
        logger: &RunLogger,
    ) -> usize {
        let protected = [
            split.source_key.as_str(),
            split.manifest_key.as_str(),
            output_key,
        ];

        let candidates: BTreeSet<&str> = split
            .chunks
            .iter()
            .map(|c| c.key.as_str())
            .chain(results.iter().filter_map(|r| r.result_key.as_deref()))
            .filter(|key| !protected.contains(key))
            .filter(|key| {
                matches!(
                    self.layout.classify(key),
                    KeyKind::Chunk { .. } | KeyKind::Result { .. }
                )
            })
            .collect();

        let mut deleted = 0;
        for key in candidates {
            match self.store.delete(key).await {
                Ok(()) => deleted += 1,
                Err(e) => warn!(key, "Failed to delete intermediate: {}", e),
            }
        }
        logger.log_progress(&format!("deleted {} intermediates", deleted));
        deleted
    }
}

/// Results indexed by sequence, validated against the split's chunks.
fn order_results<'a>(
    chunks: &[Chunk],
    results: &'a [ChunkResult],
) -> PipelineResult<Vec<&'a ChunkResult>> {
    let mut by_index: HashMap<usize, &ChunkResult> = HashMap::with_capacity(results.len());
    for result in results {
        if by_index.insert(result.sequence_index, result).is_some() {
            return Err(PipelineError::incomplete(format!(
                "duplicate result for chunk {}",
                result.sequence_index
            )));
        }
    }

    if results.len() != chunks.len() {
        return Err(PipelineError::incomplete(format!(
            "{} results for {} chunks",
            results.len(),
            chunks.len()
        )));
    }

    chunks
        .iter()
        .enumerate()
        .map(|(position, chunk)| {
            if chunk.sequence_index != position {
                return Err(PipelineError::incomplete(format!(
                    "chunk at position {} has sequence index {}",
                    position, chunk.sequence_index
                )));
            }
            let result = by_index.get(&position).copied().ok_or_else(|| {
                PipelineError::incomplete(format!("missing result for chunk {}", position))
            })?;
            if result.chunk_key != chunk.key {
                return Err(PipelineError::incomplete(format!(
                    "result for chunk {} refers to {}, expected {}",
                    position, result.chunk_key, chunk.key
                )));
            }
            Ok(result)
        })
        .collect()
}

/// Pick the object merged for each chunk according to the merge mode.
fn select_inputs(
    mode: MergeMode,
    chunks: &[Chunk],
    ordered: &[&ChunkResult],
) -> PipelineResult<Vec<MergeInput>> {
    let failed: Vec<usize> = ordered
        .iter()
        .filter(|r| !r.is_ok() || r.result_key.is_none())
        .map(|r| r.sequence_index)
        .collect();

    if mode == MergeMode::Strict && !failed.is_empty() {
        return Err(PipelineError::MergeAborted { failed });
    }

    Ok(chunks
        .iter()
        .zip(ordered)
        .map(|(chunk, result)| match (&result.result_key, result.is_ok()) {
            (Some(key), true) => MergeInput {
                sequence_index: chunk.sequence_index,
                key: key.clone(),
                substituted: false,
            },
            _ => MergeInput {
                sequence_index: chunk.sequence_index,
                key: chunk.key.clone(),
                substituted: true,
            },
        })
        .collect())
}
