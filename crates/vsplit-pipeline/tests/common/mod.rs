//! Test doubles shared by the pipeline integration tests.
#![allow(dead_code)]

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use vsplit_media::{parse_frame_rate, MediaError, MediaResult, VideoCodec, VideoInfo};
use vsplit_models::{KeyKind, KeyLayout};
use vsplit_storage::{MemoryStore, ObjectStore};
use vsplit_worker_client::{ChunkWorker, WorkerClientError, WorkerClientResult};

/// A "video" file: stream format plus an ordered list of frame ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FakeVideo {
    pub width: u32,
    pub height: u32,
    pub pix_fmt: String,
    pub frame_rate: String,
    pub frames: Vec<u64>,
    #[serde(default)]
    pub corrupt: bool,
}

impl FakeVideo {
    pub fn new(frame_count: u64) -> Self {
        Self {
            width: 640,
            height: 360,
            pix_fmt: "yuv420p".to_string(),
            frame_rate: "30/1".to_string(),
            frames: (0..frame_count).collect(),
            corrupt: false,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap()
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        serde_json::from_slice(bytes).unwrap()
    }

    fn info(&self) -> VideoInfo {
        let fps = parse_frame_rate(&self.frame_rate).unwrap_or(0.0);
        VideoInfo {
            duration: if fps > 0.0 { self.frames.len() as f64 / fps } else { 0.0 },
            width: self.width,
            height: self.height,
            pix_fmt: self.pix_fmt.clone(),
            frame_rate: self.frame_rate.clone(),
            fps,
            frame_count: self.frames.len() as u64,
            codec: "fake".to_string(),
            size: 0,
        }
    }
}

async fn read_video(path: &Path) -> MediaResult<FakeVideo> {
    let bytes = tokio::fs::read(path).await?;
    serde_json::from_slice(&bytes)
        .map_err(|e| MediaError::invalid_video(format!("{}: {}", path.display(), e)))
}

async fn write_video(path: &Path, video: &FakeVideo) -> MediaResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, video.to_bytes()).await?;
    Ok(())
}

/// Deterministic [`VideoCodec`] over JSON-described videos.
#[derive(Debug, Default)]
pub struct FakeCodec;

#[async_trait]
impl VideoCodec for FakeCodec {
    async fn probe(&self, path: &Path) -> MediaResult<VideoInfo> {
        Ok(read_video(path).await?.info())
    }

    async fn split(
        &self,
        input: &Path,
        _info: &VideoInfo,
        frames_per_chunk: u64,
        out_dir: &Path,
    ) -> MediaResult<Vec<PathBuf>> {
        let video = read_video(input).await?;
        let ext = input.extension().and_then(|e| e.to_str()).unwrap_or("mp4");
        let mut parts = Vec::new();
        for (i, frames) in video.frames.chunks(frames_per_chunk.max(1) as usize).enumerate() {
            let path = out_dir.join(format!("part{:05}.{}", i, ext));
            let part = FakeVideo {
                frames: frames.to_vec(),
                ..video.clone()
            };
            write_video(&path, &part).await?;
            parts.push(path);
        }
        Ok(parts)
    }

    async fn verify(&self, path: &Path) -> MediaResult<VideoInfo> {
        let video = read_video(path).await?;
        if video.corrupt {
            return Err(MediaError::invalid_video(format!("{} is corrupt", path.display())));
        }
        if video.frames.is_empty() {
            return Err(MediaError::invalid_video(format!("{} has no frames", path.display())));
        }
        Ok(video.info())
    }

    async fn concat(&self, inputs: &[PathBuf], output: &Path) -> MediaResult<()> {
        let mut merged: Option<FakeVideo> = None;
        for input in inputs {
            let video = read_video(input).await?;
            match merged.as_mut() {
                None => merged = Some(video),
                Some(acc) => {
                    if !acc.info().same_format(&video.info()) {
                        return Err(MediaError::format_mismatch(
                            acc.info().format_summary(),
                            video.info().format_summary(),
                        ));
                    }
                    acc.frames.extend(video.frames);
                }
            }
        }
        let merged = merged.ok_or_else(|| MediaError::invalid_video("Nothing to concatenate"))?;
        write_video(output, &merged).await
    }
}

/// Worker that copies each chunk to its result key, optionally changing it.
pub struct TransformWorker {
    store: MemoryStore,
    layout: KeyLayout,
    transform: Box<dyn Fn(FakeVideo) -> FakeVideo + Send + Sync>,
}

impl TransformWorker {
    pub fn identity(store: MemoryStore, layout: KeyLayout) -> Self {
        Self::new(store, layout, |v| v)
    }

    pub fn new(
        store: MemoryStore,
        layout: KeyLayout,
        transform: impl Fn(FakeVideo) -> FakeVideo + Send + Sync + 'static,
    ) -> Self {
        Self {
            store,
            layout,
            transform: Box::new(transform),
        }
    }
}

#[async_trait]
impl ChunkWorker for TransformWorker {
    async fn process(&self, chunk_key: &str) -> WorkerClientResult<String> {
        let bytes = self
            .store
            .get(chunk_key)
            .await
            .map_err(|e| WorkerClientError::request_failed(404, e.to_string()))?;
        let video = (self.transform)(FakeVideo::from_bytes(&bytes));
        let result_key = self.layout.result_key(chunk_key);
        self.store
            .put(&result_key, video.to_bytes(), "video/mp4")
            .await
            .map_err(|e| WorkerClientError::request_failed(500, e.to_string()))?;
        Ok(result_key)
    }
}

/// Worker that answers with the derived result key without touching storage.
pub struct EchoWorker {
    layout: KeyLayout,
}

impl EchoWorker {
    pub fn new(layout: KeyLayout) -> Self {
        Self { layout }
    }
}

#[async_trait]
impl ChunkWorker for EchoWorker {
    async fn process(&self, chunk_key: &str) -> WorkerClientResult<String> {
        Ok(self.layout.result_key(chunk_key))
    }
}

/// Wraps a worker with latency, injected failures and in-flight accounting.
pub struct InstrumentedWorker {
    inner: Arc<dyn ChunkWorker>,
    layout: KeyLayout,
    delay: Duration,
    /// Indices whose chunk always fails with a non-retryable error
    fail_indices: HashSet<usize>,
    /// Indices that never answer
    hang_indices: HashSet<usize>,
    /// Transient failures returned before the first success, per key
    transient_failures: usize,
    transient_seen: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    calls: AtomicUsize,
}

impl InstrumentedWorker {
    pub fn new(inner: Arc<dyn ChunkWorker>, layout: KeyLayout) -> Self {
        Self {
            inner,
            layout,
            delay: Duration::ZERO,
            fail_indices: HashSet::new(),
            hang_indices: HashSet::new(),
            transient_failures: 0,
            transient_seen: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing(mut self, indices: impl IntoIterator<Item = usize>) -> Self {
        self.fail_indices = indices.into_iter().collect();
        self
    }

    pub fn hanging(mut self, indices: impl IntoIterator<Item = usize>) -> Self {
        self.hang_indices = indices.into_iter().collect();
        self
    }

    pub fn with_transient_failures(mut self, count: usize) -> Self {
        self.transient_failures = count;
        self
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn index_of(&self, chunk_key: &str) -> Option<usize> {
        match self.layout.classify(chunk_key) {
            KeyKind::Chunk { index } => Some(index),
            _ => None,
        }
    }

    /// Delay proportional to the reverse index, so later chunks finish first.
    fn reversed_delay(&self, index: Option<usize>) -> Duration {
        match index {
            Some(i) => self.delay + Duration::from_millis((20usize.saturating_sub(i) * 5) as u64),
            None => self.delay,
        }
    }
}

struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ChunkWorker for InstrumentedWorker {
    async fn process(&self, chunk_key: &str) -> WorkerClientResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlightGuard(&self.in_flight);

        let index = self.index_of(chunk_key);
        tokio::time::sleep(self.reversed_delay(index)).await;

        if index.is_some_and(|i| self.hang_indices.contains(&i)) {
            std::future::pending::<()>().await;
        }
        if index.is_some_and(|i| self.fail_indices.contains(&i)) {
            return Err(WorkerClientError::request_failed(500, "injected failure"));
        }
        if self.transient_failures > 0 {
            let mut seen = self.transient_seen.lock().unwrap();
            let failures = seen.iter().filter(|k| k.as_str() == chunk_key).count();
            if failures < self.transient_failures {
                seen.push(chunk_key.to_string());
                return Err(WorkerClientError::Timeout(1));
            }
        }

        self.inner.process(chunk_key).await
    }
}

/// Chunks `<stem>/part<i>.mp4` for `0..count`.
pub fn chunks(stem: &str, count: usize) -> Vec<vsplit_models::Chunk> {
    (0..count)
        .map(|i| vsplit_models::Chunk::new(i, format!("{stem}/part{i}.mp4")))
        .collect()
}

/// Store a fake source video.
pub async fn seed_source(store: &MemoryStore, key: &str, video: &FakeVideo) {
    store.put(key, video.to_bytes(), "video/mp4").await.unwrap();
}
