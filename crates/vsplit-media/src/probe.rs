//! FFprobe video information.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::warn;

use crate::command::check_ffprobe;
use crate::error::{MediaError, MediaResult};

/// Video file information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoInfo {
    /// Duration in seconds
    pub duration: f64,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Pixel format (color model), e.g. `yuv420p`
    pub pix_fmt: String,
    /// Exact frame rate as reported by the container, e.g. `30000/1001`
    pub frame_rate: String,
    /// Frame rate (fps)
    pub fps: f64,
    /// Decoded video frames
    pub frame_count: u64,
    /// Video codec
    pub codec: String,
    /// File size in bytes
    pub size: u64,
}

impl VideoInfo {
    /// Width, height, pixel format and frame rate all match.
    pub fn same_format(&self, other: &VideoInfo) -> bool {
        self.width == other.width
            && self.height == other.height
            && self.pix_fmt == other.pix_fmt
            && same_rate(&self.frame_rate, &other.frame_rate)
    }

    /// Short description used in mismatch errors.
    pub fn format_summary(&self) -> String {
        format!(
            "{}x{} {} @ {}",
            self.width, self.height, self.pix_fmt, self.frame_rate
        )
    }

    /// Fail with [`MediaError::FormatMismatch`] unless `other` matches.
    pub fn ensure_same_format(&self, other: &VideoInfo) -> MediaResult<()> {
        if self.same_format(other) {
            Ok(())
        } else {
            Err(MediaError::format_mismatch(
                self.format_summary(),
                other.format_summary(),
            ))
        }
    }
}

/// FFprobe JSON output format.
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    format: Option<FfprobeFormat>,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
    size: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: String,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    pix_fmt: Option<String>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    nb_frames: Option<String>,
    nb_read_frames: Option<String>,
}

/// Probe a video file, decoding it to count frames exactly.
pub async fn probe_video(path: impl AsRef<Path>, timeout_secs: u64) -> MediaResult<VideoInfo> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(MediaError::FileNotFound(path.to_path_buf()));
    }

    check_ffprobe()?;

    let child = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-count_frames",
            "-select_streams",
            "v:0",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let output = match tokio::time::timeout(
        Duration::from_secs(timeout_secs),
        child.wait_with_output(),
    )
    .await
    {
        Ok(output) => output?,
        Err(_) => {
            warn!("FFprobe timed out after {} seconds", timeout_secs);
            return Err(MediaError::Timeout(timeout_secs));
        }
    };

    if !output.status.success() {
        return Err(MediaError::FfprobeFailed {
            message: format!("FFprobe failed on {}", path.display()),
            stderr: Some(String::from_utf8_lossy(&output.stderr).trim().to_string()),
        });
    }

    parse_probe_output(&output.stdout)
}

/// Build [`VideoInfo`] from ffprobe's JSON output.
pub fn parse_probe_output(json: &[u8]) -> MediaResult<VideoInfo> {
    let probe: FfprobeOutput = serde_json::from_slice(json)?;

    let video_stream = probe
        .streams
        .iter()
        .find(|s| s.codec_type == "video")
        .ok_or_else(|| MediaError::invalid_video("No video stream found"))?;

    let width = video_stream.width.unwrap_or(0);
    let height = video_stream.height.unwrap_or(0);
    if width == 0 || height == 0 {
        return Err(MediaError::invalid_video("Video stream has no dimensions"));
    }

    let usable = |rate: &Option<String>| rate.clone().filter(|r| parse_frame_rate(r).is_some());
    let frame_rate = usable(&video_stream.r_frame_rate)
        .or_else(|| usable(&video_stream.avg_frame_rate))
        .ok_or_else(|| MediaError::invalid_video("Video stream has no frame rate"))?;
    let fps = parse_frame_rate(&frame_rate).unwrap_or(0.0);

    let frame_count = video_stream
        .nb_read_frames
        .as_ref()
        .or(video_stream.nb_frames.as_ref())
        .and_then(|n| n.parse::<u64>().ok())
        .unwrap_or(0);

    let format = probe.format.as_ref();
    let duration = format
        .and_then(|f| f.duration.as_ref())
        .and_then(|d| d.parse::<f64>().ok())
        .unwrap_or(0.0);
    let size = format
        .and_then(|f| f.size.as_ref())
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(0);

    Ok(VideoInfo {
        duration,
        width,
        height,
        pix_fmt: video_stream.pix_fmt.clone().unwrap_or_default(),
        frame_rate,
        fps,
        frame_count,
        codec: video_stream.codec_name.clone().unwrap_or_default(),
        size,
    })
}

/// Parse frame rate string (e.g., "30/1" or "29.97").
pub fn parse_frame_rate(s: &str) -> Option<f64> {
    if let Some((num, den)) = s.split_once('/') {
        let num: f64 = num.trim().parse().ok()?;
        let den: f64 = den.trim().parse().ok()?;
        if den > 0.0 && num > 0.0 {
            return Some(num / den);
        }
        return None;
    }
    s.trim().parse().ok().filter(|fps: &f64| *fps > 0.0)
}

/// Compare two rates by value, so `30/1` equals `60/2`.
fn same_rate(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    match (parse_rational(a), parse_rational(b)) {
        (Some((an, ad)), Some((bn, bd))) => an * bd == bn * ad,
        _ => false,
    }
}

fn parse_rational(s: &str) -> Option<(u128, u128)> {
    let (num, den) = s.split_once('/').unwrap_or((s, "1"));
    let num = num.trim().parse::<u128>().ok()?;
    let den = den.trim().parse::<u128>().ok()?;
    (den > 0).then_some((num, den))
}
