//! Manifest line format.
//!
//! A manifest is plain text: one chunk key per line, interleaved with
//! lifecycle marker lines such as `START UPLOADING: clip_merged.mp4`.
//! A marker is one or more upper-case words, optionally followed by `: ` and
//! a free-form detail. An unrecognized marker name whose detail contains a
//! `/` is a chunk key under an upper-case directory. Every other non-empty
//! line is a chunk key.
//!
//! Readers are permissive: unknown markers are kept as [`Marker::Unknown`]
//! and otherwise ignored.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

fn marker_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([A-Z_]+(?: [A-Z_]+)*)(?:: ?(.*))?$").expect("valid marker regex")
    })
}

/// Lifecycle marker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Marker {
    RunStarted,
    SplitComplete,
    DispatchComplete,
    MergeStarted,
    StartUploading,
    StopUploading,
    MergeComplete,
    IntermediatesDeleted,
    Error,
    Unknown(String),
}

impl Marker {
    pub fn as_str(&self) -> &str {
        match self {
            Marker::RunStarted => "RUN STARTED",
            Marker::SplitComplete => "SPLIT COMPLETE",
            Marker::DispatchComplete => "DISPATCH COMPLETE",
            Marker::MergeStarted => "MERGE STARTED",
            Marker::StartUploading => "START UPLOADING",
            Marker::StopUploading => "STOP UPLOADING",
            Marker::MergeComplete => "MERGE COMPLETE",
            Marker::IntermediatesDeleted => "INTERMEDIATES DELETED",
            Marker::Error => "ERROR",
            Marker::Unknown(name) => name,
        }
    }

    fn from_name(name: &str) -> Self {
        match name {
            "RUN STARTED" => Marker::RunStarted,
            "SPLIT COMPLETE" => Marker::SplitComplete,
            "DISPATCH COMPLETE" => Marker::DispatchComplete,
            "MERGE STARTED" => Marker::MergeStarted,
            "START UPLOADING" => Marker::StartUploading,
            "STOP UPLOADING" => Marker::StopUploading,
            "MERGE COMPLETE" => Marker::MergeComplete,
            "INTERMEDIATES DELETED" => Marker::IntermediatesDeleted,
            "ERROR" => Marker::Error,
            other => Marker::Unknown(other.to_string()),
        }
    }
}

impl fmt::Display for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One manifest line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ManifestEntry {
    ChunkKey(String),
    Marker {
        marker: Marker,
        detail: Option<String>,
    },
}

impl ManifestEntry {
    pub fn chunk(key: impl Into<String>) -> Self {
        Self::ChunkKey(key.into())
    }

    pub fn marker(marker: Marker) -> Self {
        Self::Marker {
            marker,
            detail: None,
        }
    }

    pub fn marker_with(marker: Marker, detail: impl Into<String>) -> Self {
        Self::Marker {
            marker,
            detail: Some(detail.into()),
        }
    }

    pub fn error(detail: impl Into<String>) -> Self {
        Self::marker_with(Marker::Error, detail)
    }

    pub fn is_marker(&self, expected: &Marker) -> bool {
        matches!(self, ManifestEntry::Marker { marker, .. } if marker == expected)
    }

    /// Parse one line; blank lines yield `None`.
    pub fn parse_line(line: &str) -> Option<Self> {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            return None;
        }
        if let Some(caps) = marker_regex().captures(line) {
            let name = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            let detail = caps
                .get(2)
                .map(|m| m.as_str().trim().to_string())
                .filter(|d| !d.is_empty());
            let marker = Marker::from_name(name);
            let key_like = detail.as_deref().is_some_and(|d| d.contains('/'));
            if !(matches!(marker, Marker::Unknown(_)) && key_like) {
                return Some(ManifestEntry::Marker { marker, detail });
            }
        }
        Some(ManifestEntry::ChunkKey(line.to_string()))
    }

    /// Render as a single line (no trailing newline).
    pub fn to_line(&self) -> String {
        match self {
            ManifestEntry::ChunkKey(key) => key.clone(),
            ManifestEntry::Marker {
                marker,
                detail: None,
            } => marker.to_string(),
            ManifestEntry::Marker {
                marker,
                detail: Some(detail),
            } => format!("{}: {}", marker, single_line(detail)),
        }
    }
}

fn single_line(text: &str) -> String {
    text.split(['\r', '\n'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parse a whole manifest body.
pub fn parse_manifest(text: &str) -> Vec<ManifestEntry> {
    text.lines().filter_map(ManifestEntry::parse_line).collect()
}

/// Render entries, one per line, with a trailing newline.
pub fn render_manifest(entries: &[ManifestEntry]) -> String {
    let mut body = String::new();
    for entry in entries {
        body.push_str(&entry.to_line());
        body.push('\n');
    }
    body
}

/// Phase of the latest run recorded in a manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    /// No run recorded
    Empty,
    Splitting,
    Split,
    Dispatched,
    Merging,
    /// Output upload in progress; the output key must not be treated as ready
    Uploading,
    Complete,
    Failed,
}

/// Read-only view over the latest run in a manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunView<'a> {
    entries: &'a [ManifestEntry],
}

impl<'a> RunView<'a> {
    /// View of the entries after the last `RUN STARTED` marker.
    pub fn latest(entries: &'a [ManifestEntry]) -> Self {
        let start = entries
            .iter()
            .rposition(|e| e.is_marker(&Marker::RunStarted))
            .unwrap_or(0);
        Self {
            entries: &entries[start..],
        }
    }

    pub fn entries(&self) -> &'a [ManifestEntry] {
        self.entries
    }

    /// Chunk keys of the run, in sequence order.
    pub fn chunk_keys(&self) -> Vec<&'a str> {
        self.entries
            .iter()
            .filter_map(|e| match e {
                ManifestEntry::ChunkKey(key) => Some(key.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<&'a str> {
        self.entries
            .iter()
            .filter_map(|e| match e {
                ManifestEntry::Marker {
                    marker: Marker::Error,
                    detail,
                } => Some(detail.as_deref().unwrap_or("")),
                _ => None,
            })
            .collect()
    }

    pub fn phase(&self) -> RunPhase {
        let mut phase = RunPhase::Empty;
        for entry in self.entries {
            let ManifestEntry::Marker { marker, .. } = entry else {
                continue;
            };
            phase = match marker {
                Marker::RunStarted => RunPhase::Splitting,
                Marker::SplitComplete => RunPhase::Split,
                Marker::DispatchComplete => RunPhase::Dispatched,
                Marker::MergeStarted => RunPhase::Merging,
                Marker::StartUploading => RunPhase::Uploading,
                Marker::StopUploading | Marker::MergeComplete | Marker::IntermediatesDeleted => {
                    RunPhase::Complete
                }
                Marker::Error => RunPhase::Failed,
                Marker::Unknown(_) => phase,
            };
        }
        phase
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_lines() {
        assert_eq!(
            ManifestEntry::parse_line("clip/part0.mp4"),
            Some(ManifestEntry::chunk("clip/part0.mp4"))
        );
        assert_eq!(
            ManifestEntry::parse_line("START UPLOADING"),
            Some(ManifestEntry::marker(Marker::StartUploading))
        );
        assert_eq!(
            ManifestEntry::parse_line("ERROR: merge: chunk 2 is corrupt"),
            Some(ManifestEntry::error("merge: chunk 2 is corrupt"))
        );
        assert_eq!(
            ManifestEntry::parse_line("SOMETHING NEW: x"),
            Some(ManifestEntry::marker_with(
                Marker::Unknown("SOMETHING NEW".to_string()),
                "x"
            ))
        );
        assert_eq!(ManifestEntry::parse_line("   "), None);
    }

    #[test]
    fn test_upper_case_keys_are_not_markers() {
        assert_eq!(
            ManifestEntry::parse_line("CLIP/part0.mp4"),
            Some(ManifestEntry::chunk("CLIP/part0.mp4"))
        );
        assert_eq!(
            ManifestEntry::parse_line("MY CLIP/part1.MOV"),
            Some(ManifestEntry::chunk("MY CLIP/part1.MOV"))
        );
        assert_eq!(
            ManifestEntry::parse_line("CLIPS: A/part0.mp4"),
            Some(ManifestEntry::chunk("CLIPS: A/part0.mp4"))
        );
        // Known markers keep key-like details.
        assert_eq!(
            ManifestEntry::parse_line("START UPLOADING: CLIPS: A_merged.mp4"),
            Some(ManifestEntry::marker_with(
                Marker::StartUploading,
                "CLIPS: A_merged.mp4"
            ))
        );
    }

    #[test]
    fn test_upper_case_chunk_keys_round_trip() {
        let entries = vec![
            ManifestEntry::marker_with(Marker::RunStarted, "CLIPS: A.mp4"),
            ManifestEntry::chunk("CLIPS: A/part0.mp4"),
            ManifestEntry::chunk("CLIPS: A/part1.mp4"),
            ManifestEntry::marker_with(Marker::SplitComplete, "chunks=2"),
        ];
        let parsed = parse_manifest(&render_manifest(&entries));
        assert_eq!(parsed, entries);
        assert_eq!(
            RunView::latest(&parsed).chunk_keys(),
            vec!["CLIPS: A/part0.mp4", "CLIPS: A/part1.mp4"]
        );
    }

    #[test]
    fn test_detail_is_flattened() {
        let entry = ManifestEntry::error("line one\nline two\r\n");
        assert_eq!(entry.to_line(), "ERROR: line one line two");
    }

    #[test]
    fn test_render_and_parse() {
        let entries = vec![
            ManifestEntry::marker_with(Marker::RunStarted, "clip.mp4"),
            ManifestEntry::chunk("clip/part0.mp4"),
            ManifestEntry::chunk("clip/part1.mp4"),
            ManifestEntry::marker_with(Marker::SplitComplete, "chunks=2 frames=150"),
        ];
        let text = render_manifest(&entries);
        assert_eq!(
            text,
            "RUN STARTED: clip.mp4\nclip/part0.mp4\nclip/part1.mp4\nSPLIT COMPLETE: chunks=2 frames=150\n"
        );
        assert_eq!(parse_manifest(&text), entries);
    }

    #[test]
    fn test_latest_run_view() {
        let text = "RUN STARTED: clip.mp4\n\
                    clip/part0.mp4\n\
                    ERROR: split: decode failed\n\
                    RUN STARTED: clip.mp4\n\
                    clip/part0.mp4\n\
                    clip/part1.mp4\n\
                    SPLIT COMPLETE: chunks=2\n\
                    DISPATCH COMPLETE: ok=2 failed=0 timeout=0\n\
                    MERGE STARTED\n\
                    START UPLOADING: clip_merged.mp4\n";
        let entries = parse_manifest(text);
        let view = RunView::latest(&entries);

        assert_eq!(view.chunk_keys(), vec!["clip/part0.mp4", "clip/part1.mp4"]);
        assert!(view.errors().is_empty());
        assert_eq!(view.phase(), RunPhase::Uploading);
    }

    #[test]
    fn test_phase_progression() {
        let mut entries = vec![ManifestEntry::marker(Marker::RunStarted)];
        assert_eq!(RunView::latest(&entries).phase(), RunPhase::Splitting);

        entries.push(ManifestEntry::marker(Marker::Unknown("NOTE".into())));
        assert_eq!(RunView::latest(&entries).phase(), RunPhase::Splitting);

        entries.push(ManifestEntry::marker(Marker::StopUploading));
        assert_eq!(RunView::latest(&entries).phase(), RunPhase::Complete);

        entries.push(ManifestEntry::error("cleanup"));
        assert_eq!(RunView::latest(&entries).phase(), RunPhase::Failed);
        assert_eq!(RunView::latest(&entries).errors(), vec!["cleanup"]);

        assert_eq!(RunView::latest(&[]).phase(), RunPhase::Empty);
    }
}
