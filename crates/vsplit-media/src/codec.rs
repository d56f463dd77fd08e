//! Video codec operations used by the pipeline: probe, split, verify, concat.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::probe::{probe_video, VideoInfo};

/// Name stem of split outputs; ffmpeg appends a five-digit index.
const SEGMENT_STEM: &str = "part";
const CONCAT_LIST_NAME: &str = "concat_list.txt";

/// Default timeout for a single ffmpeg/ffprobe invocation.
pub const DEFAULT_MEDIA_TIMEOUT_SECS: u64 = 600;

/// Media operations the splitter and merger rely on.
#[async_trait]
pub trait VideoCodec: Send + Sync {
    /// Stream format and exact frame count of a local file.
    async fn probe(&self, path: &Path) -> MediaResult<VideoInfo>;

    /// Split `input` into ordered local files of `frames_per_chunk` frames
    /// each (the last may be shorter), preserving the source stream format.
    async fn split(
        &self,
        input: &Path,
        info: &VideoInfo,
        frames_per_chunk: u64,
        out_dir: &Path,
    ) -> MediaResult<Vec<PathBuf>>;

    /// Decode the whole file; fails on any corrupt frame.
    async fn verify(&self, path: &Path) -> MediaResult<VideoInfo>;

    /// Concatenate `inputs` in the given order without re-encoding.
    async fn concat(&self, inputs: &[PathBuf], output: &Path) -> MediaResult<()>;
}

/// [`VideoCodec`] backed by the ffmpeg and ffprobe CLIs.
#[derive(Debug, Clone)]
pub struct FfmpegCodec {
    timeout_secs: u64,
}

impl Default for FfmpegCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MEDIA_TIMEOUT_SECS)
    }
}

impl FfmpegCodec {
    pub fn new(timeout_secs: u64) -> Self {
        Self { timeout_secs }
    }

    fn runner(&self) -> FfmpegRunner {
        FfmpegRunner::new().with_timeout(self.timeout_secs)
    }
}

#[async_trait]
impl VideoCodec for FfmpegCodec {
    async fn probe(&self, path: &Path) -> MediaResult<VideoInfo> {
        probe_video(path, self.timeout_secs).await
    }

    async fn split(
        &self,
        input: &Path,
        info: &VideoInfo,
        frames_per_chunk: u64,
        out_dir: &Path,
    ) -> MediaResult<Vec<PathBuf>> {
        let ext = input
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("mp4")
            .to_string();

        tokio::fs::create_dir_all(out_dir).await?;
        let cmd = build_split_command(input, info, frames_per_chunk, out_dir, &ext);

        info!(
            input = %input.display(),
            frames_per_chunk,
            total_frames = info.frame_count,
            "Splitting video"
        );
        self.runner().run(&cmd).await?;

        let parts = list_segments(out_dir, &ext).await?;
        if parts.is_empty() {
            return Err(MediaError::invalid_video("Split produced no chunks"));
        }
        debug!("Split {} into {} chunks", input.display(), parts.len());
        Ok(parts)
    }

    async fn verify(&self, path: &Path) -> MediaResult<VideoInfo> {
        let cmd = FfmpegCommand::new(path, "-")
            .output_args(["-xerror", "-map", "0:v:0"])
            .format("null");
        self.runner().run(&cmd).await?;

        let info = self.probe(path).await?;
        if info.frame_count == 0 {
            return Err(MediaError::invalid_video(format!(
                "{} has no decodable frames",
                path.display()
            )));
        }
        Ok(info)
    }

    async fn concat(&self, inputs: &[PathBuf], output: &Path) -> MediaResult<()> {
        if inputs.is_empty() {
            return Err(MediaError::invalid_video("Nothing to concatenate"));
        }

        let list_dir = output.parent().unwrap_or_else(|| Path::new("."));
        let list_path = list_dir.join(CONCAT_LIST_NAME);
        tokio::fs::write(&list_path, concat_list(inputs)).await?;

        let cmd = FfmpegCommand::new(&list_path, output)
            .input_args(["-f", "concat", "-safe", "0"])
            .stream_copy();

        info!(inputs = inputs.len(), output = %output.display(), "Concatenating chunks");
        let result = self.runner().run(&cmd).await;
        let _ = tokio::fs::remove_file(&list_path).await;
        result
    }
}

/// Frame indices at which a new chunk starts.
///
/// Always returns at least one entry: a boundary at or past the end of the
/// stream yields a single chunk.
pub fn segment_boundaries(total_frames: u64, frames_per_chunk: u64) -> Vec<u64> {
    let step = frames_per_chunk.max(1);
    let mut boundaries: Vec<u64> = (1..)
        .map(|i| i * step)
        .take_while(|b| *b < total_frames)
        .collect();
    if boundaries.is_empty() {
        boundaries.push(step);
    }
    boundaries
}

fn build_split_command(
    input: &Path,
    info: &VideoInfo,
    frames_per_chunk: u64,
    out_dir: &Path,
    ext: &str,
) -> FfmpegCommand {
    let step = frames_per_chunk.max(1);
    let boundaries = segment_boundaries(info.frame_count, step)
        .iter()
        .map(|b| b.to_string())
        .collect::<Vec<_>>()
        .join(",");

    let (video_codec, audio_codec) = match ext.to_lowercase().as_str() {
        "webm" => ("libvpx-vp9", "libopus"),
        _ => ("libx264", "aac"),
    };

    let pattern = out_dir.join(format!("{}%05d.{}", SEGMENT_STEM, ext));

    let mut cmd = FfmpegCommand::new(input, pattern)
        .output_args(["-map", "0:v:0", "-map", "0:a?"])
        .video_codec(video_codec)
        .preset("veryfast")
        .crf(23);

    if !info.pix_fmt.is_empty() {
        cmd = cmd.pixel_format(info.pix_fmt.clone());
    }

    cmd.output_args([
        "-force_key_frames".to_string(),
        format!("expr:gte(n,n_forced*{})", step),
        "-fps_mode".to_string(),
        "passthrough".to_string(),
    ])
    .audio_codec(audio_codec)
    .audio_bitrate("128k")
    .format("segment")
    .output_args([
        "-segment_frames".to_string(),
        boundaries,
        "-reset_timestamps".to_string(),
        "1".to_string(),
    ])
}

/// Split outputs in `dir`, ordered by index.
async fn list_segments(dir: &Path, ext: &str) -> MediaResult<Vec<PathBuf>> {
    let mut indexed = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let index = name
            .strip_prefix(SEGMENT_STEM)
            .and_then(|rest| rest.strip_suffix(&format!(".{}", ext)))
            .and_then(|digits| digits.parse::<u64>().ok());
        if let Some(index) = index {
            indexed.push((index, path));
        }
    }
    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, path)| path).collect())
}

/// Body of an ffmpeg concat-demuxer list.
pub fn concat_list(inputs: &[PathBuf]) -> String {
    inputs
        .iter()
        .map(|p| {
            let escaped = p.to_string_lossy().replace('\'', r"'\''");
            format!("file '{}'\n", escaped)
        })
        .collect()
}
