//! End-to-end run for one source: split, dispatch, merge.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::Instrument;
use vsplit_media::{FfmpegCodec, VideoCodec};
use vsplit_models::{DispatchSummary, KeyLayout, Marker};
use vsplit_storage::{ManifestLog, ObjectStore, S3Client};
use vsplit_worker_client::{ChunkWorker, HttpChunkWorker};

use crate::config::PipelineConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{PipelineError, PipelineResult};
use crate::logging::RunLogger;
use crate::merger::Merger;
use crate::metrics;
use crate::splitter::Splitter;

/// Outcome of a completed run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub source_key: String,
    pub output_key: String,
    pub chunk_count: usize,
    pub ok: usize,
    pub failed: usize,
    pub timed_out: usize,
    /// Chunks merged unprocessed (degraded mode only)
    pub substituted: Vec<usize>,
    pub frame_count: u64,
    pub deleted_intermediates: usize,
    #[serde(with = "duration_secs")]
    pub elapsed: Duration,
}

mod duration_secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }
}

/// Wires the splitter, dispatcher and merger over one store and worker pool.
#[derive(Clone)]
pub struct Pipeline {
    config: PipelineConfig,
    layout: KeyLayout,
    store: Arc<dyn ObjectStore>,
    splitter: Arc<Splitter>,
    dispatcher: Dispatcher,
    merger: Arc<Merger>,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        store: Arc<dyn ObjectStore>,
        codec: Arc<dyn VideoCodec>,
        worker: Arc<dyn ChunkWorker>,
    ) -> Self {
        let layout = config.layout();
        let splitter = Splitter::new(store.clone(), codec.clone(), layout.clone(), config.split_policy)
            .with_work_dir(config.work_dir.clone());
        let merger = Merger::new(store.clone(), codec, layout.clone(), config.merge_mode)
            .with_work_dir(config.work_dir.clone());
        let dispatcher = Dispatcher::new(worker, config.dispatch_config());

        Self {
            config,
            layout,
            store,
            splitter: Arc::new(splitter),
            dispatcher,
            merger: Arc::new(merger),
        }
    }

    /// Build the production pipeline: S3 store, ffmpeg codec, HTTP workers.
    pub async fn connect(config: PipelineConfig) -> PipelineResult<Self> {
        let store = S3Client::from_env().await?;
        let worker = HttpChunkWorker::new(config.worker_config())
            .map_err(|e| PipelineError::config(e.to_string()))?;
        let codec = FfmpegCodec::new(config.media_timeout_secs);
        Ok(Self::new(
            config,
            Arc::new(store),
            Arc::new(codec),
            Arc::new(worker),
        ))
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn layout(&self) -> &KeyLayout {
        &self.layout
    }

    pub fn store(&self) -> Arc<dyn ObjectStore> {
        self.store.clone()
    }

    /// Run the whole pipeline for one source key.
    pub async fn run(&self, source_key: &str) -> PipelineResult<RunReport> {
        let logger = RunLogger::new(source_key, "pipeline_run");
        let span = logger.create_span();
        let started = Instant::now();

        let result = self.run_inner(source_key, &logger, started).instrument(span).await;

        let elapsed = started.elapsed().as_secs_f64();
        match &result {
            Ok(report) => {
                metrics::record_run("ok", elapsed);
                logger.log_completion(&format!(
                    "output={} chunks={} ok={} failed={} timeout={}",
                    report.output_key, report.chunk_count, report.ok, report.failed, report.timed_out
                ));
            }
            Err(e) => {
                metrics::record_run(e.kind(), elapsed);
                logger.log_error(&e.to_string());
            }
        }
        result
    }

    async fn run_inner(
        &self,
        source_key: &str,
        logger: &RunLogger,
        started: Instant,
    ) -> PipelineResult<RunReport> {
        let source = self.layout.parse_source(source_key)?;
        let output_key = self.layout.output_key(&source);
        logger.log_start(&format!(
            "policy={} mode={} output={}",
            self.config.split_policy, self.config.merge_mode, output_key
        ));

        let mut log = ManifestLog::open(self.store.clone(), self.layout.manifest_key(&source))
            .await
            .map_err(PipelineError::manifest)?;

        let split = self.splitter.split_with_log(source_key, &mut log).await?;
        logger.log_progress(&format!("split into {} chunks", split.chunks.len()));

        let results = self.dispatcher.dispatch(&split.chunks).await;
        let summary = DispatchSummary::from_results(&results);
        log.mark(Marker::DispatchComplete, summary.to_string())
            .await
            .map_err(PipelineError::manifest)?;
        if summary.all_ok() {
            logger.log_progress(&format!("dispatch {}", summary));
        } else {
            logger.log_warning(&format!("dispatch {}", summary));
        }

        let merge = self
            .merger
            .merge_with_log(&split, &results, &output_key, &mut log)
            .await?;

        Ok(RunReport {
            source_key: source_key.to_string(),
            output_key: merge.output_key,
            chunk_count: split.chunks.len(),
            ok: summary.ok,
            failed: summary.failed,
            timed_out: summary.timed_out,
            substituted: merge.substituted,
            frame_count: merge.frame_count,
            deleted_intermediates: merge.deleted_intermediates,
            elapsed: started.elapsed(),
        })
    }
}
