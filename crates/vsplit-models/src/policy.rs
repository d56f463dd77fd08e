//! Split and merge policies.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ModelError;

/// Where chunk boundaries fall when splitting a source.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum SplitPolicy {
    /// A boundary every `n` frames
    Frames(u64),
    /// A boundary every `d` seconds of presentation time
    Seconds(f64),
}

impl SplitPolicy {
    /// Number of frames per chunk for a stream at `fps` frames per second.
    ///
    /// Never returns 0.
    pub fn frames_per_chunk(&self, fps: f64) -> u64 {
        match *self {
            SplitPolicy::Frames(n) => n.max(1),
            SplitPolicy::Seconds(d) => ((d * fps).round() as u64).max(1),
        }
    }

    /// Expected chunk count for a stream of `total_frames` frames.
    pub fn expected_chunks(&self, total_frames: u64, fps: f64) -> u64 {
        let per_chunk = self.frames_per_chunk(fps);
        total_frames.div_ceil(per_chunk)
    }
}

impl Default for SplitPolicy {
    fn default() -> Self {
        SplitPolicy::Seconds(10.0)
    }
}

impl fmt::Display for SplitPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SplitPolicy::Frames(n) => write!(f, "frames:{}", n),
            SplitPolicy::Seconds(d) => write!(f, "seconds:{}", d),
        }
    }
}

impl FromStr for SplitPolicy {
    type Err = ModelError;

    /// Parses `frames:<n>` or `seconds:<d>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, value) = s
            .trim()
            .split_once(':')
            .ok_or_else(|| ModelError::invalid_policy(s))?;

        match kind.trim().to_lowercase().as_str() {
            "frames" => {
                let n: u64 = value
                    .trim()
                    .parse()
                    .map_err(|_| ModelError::invalid_policy(s))?;
                if n == 0 {
                    return Err(ModelError::invalid_policy(s));
                }
                Ok(SplitPolicy::Frames(n))
            }
            "seconds" => {
                let d: f64 = value
                    .trim()
                    .parse()
                    .map_err(|_| ModelError::invalid_policy(s))?;
                if !d.is_finite() || d <= 0.0 {
                    return Err(ModelError::invalid_policy(s));
                }
                Ok(SplitPolicy::Seconds(d))
            }
            _ => Err(ModelError::invalid_policy(s)),
        }
    }
}

/// What the merger does when a chunk was not processed successfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MergeMode {
    /// Any failed or timed-out chunk aborts the merge
    #[default]
    Strict,
    /// Failed chunks are replaced by their original, unprocessed chunk
    Degraded,
}

impl MergeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            MergeMode::Strict => "strict",
            MergeMode::Degraded => "degraded",
        }
    }
}

impl fmt::Display for MergeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for MergeMode {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "strict" => Ok(MergeMode::Strict),
            "degraded" => Ok(MergeMode::Degraded),
            _ => Err(ModelError::InvalidMergeMode(s.to_string())),
        }
    }
}
