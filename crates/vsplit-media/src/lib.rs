//! FFmpeg CLI wrapper for chunked video processing.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building
//! - A runner with kill-on-timeout
//! - Exact stream probing (frame count, pixel format, frame rate)
//! - The [`VideoCodec`] operations used by the pipeline: split, verify, concat

pub mod codec;
pub mod command;
pub mod error;
pub mod probe;

pub use codec::{concat_list, segment_boundaries, FfmpegCodec, VideoCodec, DEFAULT_MEDIA_TIMEOUT_SECS};
pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner};
pub use error::{MediaError, MediaResult};
pub use probe::{parse_frame_rate, parse_probe_output, probe_video, VideoInfo};
