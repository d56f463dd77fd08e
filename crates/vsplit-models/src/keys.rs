//! Storage key layout.
//!
//! Every key the pipeline writes is derived here from the source key, and
//! [`KeyLayout::classify`] maps any key back to the namespace it belongs to.
//! The event classifier relies on this partition to keep the pipeline's own
//! writes from being treated as new sources.
//!
//! For a source `<dir>/<stem>.<ext>`:
//!
//! | kind        | key                                   |
//! |-------------|---------------------------------------|
//! | chunk *i*   | `<dir>/<stem>/part<i>.<ext>`          |
//! | result *i*  | `<dir>/<stem>/part<i>_cmpl.<ext>`     |
//! | output      | `<dir>/<stem>_merged.<ext>`           |
//! | manifest    | `<dir>/<stem>/manifest.<ext>.txt`     |
//! | event dump  | `<prefix>/events/<ts>-<id>.json`      |

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use crate::error::{ModelError, ModelResult};
use crate::manifest::ManifestEntry;

/// Default extensions accepted as source videos.
pub const DEFAULT_SOURCE_EXTENSIONS: &[&str] = &["mp4", "mov", "mkv", "webm", "avi", "m4v"];

pub const CHUNK_PREFIX: &str = "part";
/// Suffix the chunk worker appends to processed chunks.
pub const RESULT_SUFFIX: &str = "_cmpl";
pub const OUTPUT_SUFFIX: &str = "_merged";
pub const MANIFEST_STEM: &str = "manifest";
pub const MANIFEST_EXT: &str = "txt";
pub const EVENTS_DIR: &str = "events";

fn chunk_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^part(\d+)(_cmpl)?\.[A-Za-z0-9]+$").expect("valid chunk regex"))
}

/// Namespace a storage key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum KeyKind {
    /// A genuine new source video
    Source,
    /// A chunk produced by the splitter
    Chunk { index: usize },
    /// A processed chunk written by the worker
    Result { index: Option<usize> },
    /// A merged output object
    Output,
    /// A run manifest
    Manifest,
    /// An archived raw notification
    EventArchive,
    /// Outside the pipeline's namespace or not a video
    Foreign,
}

impl KeyKind {
    /// True for keys written by the pipeline or its workers.
    pub fn is_pipeline_owned(&self) -> bool {
        !matches!(self, KeyKind::Source | KeyKind::Foreign)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            KeyKind::Source => "source",
            KeyKind::Chunk { .. } => "chunk",
            KeyKind::Result { .. } => "result",
            KeyKind::Output => "output",
            KeyKind::Manifest => "manifest",
            KeyKind::EventArchive => "event_archive",
            KeyKind::Foreign => "foreign",
        }
    }
}

/// Decomposed source key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceParts {
    /// Directory part without trailing slash; empty at the bucket root
    pub dir: String,
    pub stem: String,
    /// Extension as written in the key (case preserved)
    pub ext: String,
}

impl SourceParts {
    fn join(&self, name: &str) -> String {
        if self.dir.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", self.dir, name)
        }
    }

    /// Directory that holds the per-source intermediates.
    pub fn run_dir(&self) -> String {
        self.join(&self.stem)
    }
}

/// Key derivation and classification for one pipeline namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyLayout {
    prefix: String,
    source_extensions: Vec<String>,
}

impl Default for KeyLayout {
    fn default() -> Self {
        Self::new("")
    }
}

impl KeyLayout {
    /// Layout rooted at `prefix` (may be empty) with default source extensions.
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into().trim_matches('/').to_string();
        Self {
            prefix,
            source_extensions: DEFAULT_SOURCE_EXTENSIONS
                .iter()
                .map(|e| e.to_string())
                .collect(),
        }
    }

    pub fn with_source_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.source_extensions = extensions
            .into_iter()
            .map(|e| e.as_ref().trim().trim_start_matches('.').to_lowercase())
            .filter(|e| !e.is_empty())
            .collect();
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn source_extensions(&self) -> &[String] {
        &self.source_extensions
    }

    /// Key relative to the prefix, or `None` when outside it.
    fn strip_prefix<'a>(&self, key: &'a str) -> Option<&'a str> {
        if self.prefix.is_empty() {
            return Some(key);
        }
        key.strip_prefix(self.prefix.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
    }

    /// Split a source key into directory, stem and extension.
    pub fn parse_source(&self, key: &str) -> ModelResult<SourceParts> {
        if self.classify(key) != KeyKind::Source {
            return Err(ModelError::invalid_source_key(key));
        }
        split_key(key).ok_or_else(|| ModelError::invalid_source_key(key))
    }

    pub fn chunk_key(&self, source: &SourceParts, index: usize) -> String {
        format!("{}/{}{}.{}", source.run_dir(), CHUNK_PREFIX, index, source.ext)
    }

    /// Key the worker writes for a processed chunk.
    pub fn result_key(&self, chunk_key: &str) -> String {
        match chunk_key.rsplit_once('.') {
            Some((base, ext)) if !base.ends_with('/') && !ext.contains('/') => {
                format!("{}{}.{}", base, RESULT_SUFFIX, ext)
            }
            _ => format!("{}{}", chunk_key, RESULT_SUFFIX),
        }
    }

    pub fn output_key(&self, source: &SourceParts) -> String {
        source.join(&format!("{}{}.{}", source.stem, OUTPUT_SUFFIX, source.ext))
    }

    /// Sources sharing a stem share the run directory, so the manifest name
    /// carries the source extension.
    pub fn manifest_key(&self, source: &SourceParts) -> String {
        format!(
            "{}/{}.{}.{}",
            source.run_dir(),
            MANIFEST_STEM,
            source.ext,
            MANIFEST_EXT
        )
    }

    /// Key for an archived raw notification.
    pub fn event_archive_key(&self, timestamp: &str, id: &str) -> String {
        let name = format!("{}/{}-{}.json", EVENTS_DIR, timestamp, id);
        if self.prefix.is_empty() {
            name
        } else {
            format!("{}/{}", self.prefix, name)
        }
    }

    /// Map a key to the namespace it belongs to.
    pub fn classify(&self, key: &str) -> KeyKind {
        if key.is_empty() || key.ends_with('/') {
            return KeyKind::Foreign;
        }
        let Some(relative) = self.strip_prefix(key) else {
            return KeyKind::Foreign;
        };
        if relative.is_empty() {
            return KeyKind::Foreign;
        }
        if relative.starts_with(&format!("{}/", EVENTS_DIR)) {
            return KeyKind::EventArchive;
        }

        let (parent, name) = match relative.rsplit_once('/') {
            Some((parent, name)) => (Some(parent), name),
            None => (None, relative),
        };

        if is_manifest_name(name) {
            return KeyKind::Manifest;
        }

        if parent.is_some() {
            if let Some(caps) = chunk_name_regex().captures(name) {
                let index = caps.get(1).and_then(|m| m.as_str().parse::<usize>().ok());
                return match (caps.get(2).is_some(), index) {
                    (true, index) => KeyKind::Result { index },
                    (false, Some(index)) => KeyKind::Chunk { index },
                    (false, None) => KeyKind::Foreign,
                };
            }
        }

        let Some((stem, ext)) = name.rsplit_once('.') else {
            return KeyKind::Foreign;
        };
        if stem.is_empty() {
            return KeyKind::Foreign;
        }
        if stem.ends_with(RESULT_SUFFIX) {
            return KeyKind::Result { index: None };
        }
        if stem.ends_with(OUTPUT_SUFFIX) {
            return KeyKind::Output;
        }

        let ext = ext.to_lowercase();
        if !self.source_extensions.iter().any(|e| *e == ext) {
            return KeyKind::Foreign;
        }
        // Chunk keys must read back from the manifest as chunk keys.
        match split_key(key) {
            Some(parts) if chunk_line_is_unambiguous(&parts) => KeyKind::Source,
            _ => KeyKind::Foreign,
        }
    }
}

/// `manifest.txt` or `manifest.<ext>.txt`.
fn is_manifest_name(name: &str) -> bool {
    let Some(rest) = name
        .strip_prefix(MANIFEST_STEM)
        .and_then(|r| r.strip_suffix(MANIFEST_EXT))
    else {
        return false;
    };
    match rest {
        "." => true,
        _ => rest
            .strip_prefix('.')
            .and_then(|r| r.strip_suffix('.'))
            .is_some_and(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric())),
    }
}

fn chunk_line_is_unambiguous(source: &SourceParts) -> bool {
    let line = format!("{}/{}0.{}", source.run_dir(), CHUNK_PREFIX, source.ext);
    matches!(ManifestEntry::parse_line(&line), Some(ManifestEntry::ChunkKey(_)))
}

fn split_key(key: &str) -> Option<SourceParts> {
    let (dir, name) = match key.rsplit_once('/') {
        Some((dir, name)) => (dir.to_string(), name),
        None => (String::new(), key),
    };
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(SourceParts {
        dir,
        stem: stem.to_string(),
        ext: ext.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clip_example_keys() {
        let layout = KeyLayout::default();
        let source = layout.parse_source("clip.mp4").unwrap();

        assert_eq!(layout.chunk_key(&source, 0), "clip/part0.mp4");
        assert_eq!(layout.chunk_key(&source, 3), "clip/part3.mp4");
        assert_eq!(layout.result_key("clip/part3.mp4"), "clip/part3_cmpl.mp4");
        assert_eq!(layout.output_key(&source), "clip_merged.mp4");
        assert_eq!(layout.manifest_key(&source), "clip/manifest.mp4.txt");
    }

    #[test]
    fn test_same_stem_sources_have_distinct_manifests() {
        let layout = KeyLayout::default();
        let mp4 = layout.parse_source("clip.mp4").unwrap();
        let mov = layout.parse_source("clip.mov").unwrap();

        assert_ne!(layout.manifest_key(&mp4), layout.manifest_key(&mov));
        assert_eq!(layout.manifest_key(&mov), "clip/manifest.mov.txt");
        assert_ne!(layout.chunk_key(&mp4, 0), layout.chunk_key(&mov, 0));
        assert_ne!(layout.output_key(&mp4), layout.output_key(&mov));
    }

    #[test]
    fn test_marker_shaped_sources_are_foreign() {
        let layout = KeyLayout::default();
        // The chunk key `ERROR: x/part0.mp4` would read back as an error marker.
        assert_eq!(layout.classify("ERROR: x.mp4"), KeyKind::Foreign);
        assert!(layout.parse_source("ERROR: x.mp4").is_err());
        // Unknown upper-case prefixes stay usable.
        assert_eq!(layout.classify("CLIPS: A.mp4"), KeyKind::Source);
    }

    #[test]
    fn test_prefixed_layout() {
        let layout = KeyLayout::new("/videos/");
        assert_eq!(layout.prefix(), "videos");

        let source = layout.parse_source("videos/2024/My Clip.MOV").unwrap();
        assert_eq!(source.dir, "videos/2024");
        assert_eq!(source.stem, "My Clip");
        assert_eq!(layout.chunk_key(&source, 1), "videos/2024/My Clip/part1.MOV");
        assert_eq!(layout.output_key(&source), "videos/2024/My Clip_merged.MOV");
        assert_eq!(
            layout.event_archive_key("20240101T000000Z", "abc"),
            "videos/events/20240101T000000Z-abc.json"
        );
    }

    #[test]
    fn test_classify() {
        let layout = KeyLayout::default();
        assert_eq!(layout.classify("clip.mp4"), KeyKind::Source);
        assert_eq!(layout.classify("uploads/clip.webm"), KeyKind::Source);
        assert_eq!(layout.classify("clip/part2.mp4"), KeyKind::Chunk { index: 2 });
        assert_eq!(
            layout.classify("clip/part2_cmpl.mp4"),
            KeyKind::Result { index: Some(2) }
        );
        assert_eq!(layout.classify("clip_cmpl.mp4"), KeyKind::Result { index: None });
        assert_eq!(layout.classify("clip_merged.mp4"), KeyKind::Output);
        assert_eq!(layout.classify("clip/manifest.txt"), KeyKind::Manifest);
        assert_eq!(layout.classify("clip/manifest.mp4.txt"), KeyKind::Manifest);
        assert_eq!(layout.classify("clip/manifest..txt"), KeyKind::Foreign);
        assert_eq!(layout.classify("events/x-1.json"), KeyKind::EventArchive);
        assert_eq!(layout.classify("notes.txt"), KeyKind::Foreign);
        assert_eq!(layout.classify("folder/"), KeyKind::Foreign);
        assert_eq!(layout.classify(""), KeyKind::Foreign);
        assert_eq!(layout.classify(".mp4"), KeyKind::Foreign);
    }

    #[test]
    fn test_classify_outside_prefix_is_foreign() {
        let layout = KeyLayout::new("videos");
        assert_eq!(layout.classify("other/clip.mp4"), KeyKind::Foreign);
        assert_eq!(layout.classify("videosclip.mp4"), KeyKind::Foreign);
        assert_eq!(layout.classify("videos/clip.mp4"), KeyKind::Source);
    }

    #[test]
    fn test_custom_extensions() {
        let layout = KeyLayout::default().with_source_extensions([".TS", "mp4"]);
        assert_eq!(layout.classify("a.ts"), KeyKind::Source);
        assert_eq!(layout.classify("a.mkv"), KeyKind::Foreign);
    }

    #[test]
    fn test_parse_source_rejects_pipeline_keys() {
        let layout = KeyLayout::default();
        assert!(layout.parse_source("clip/part0.mp4").is_err());
        assert!(layout.parse_source("clip_merged.mp4").is_err());
        assert!(layout.parse_source("readme.md").is_err());
    }

    /// Every key derived from a source must classify as pipeline-owned,
    /// otherwise the pipeline would re-trigger itself.
    #[test]
    fn test_derived_keys_never_classify_as_source() {
        let stems = [
            "clip",
            "part1",
            "a b",
            "x.y",
            "events",
            "manifest",
            "UPPER",
            "part0_cmpl",
            "CLIPS: A",
            "ERROR: x",
        ];
        let dirs = ["", "uploads", "uploads/nested/deep"];
        let exts = ["mp4", "MOV", "webm", "m4v"];

        for prefix in ["", "ns", "ns/inner"] {
            let layout = KeyLayout::new(prefix);
            for dir in dirs {
                for stem in stems {
                    for ext in exts {
                        let mut key = String::new();
                        if !prefix.is_empty() {
                            key.push_str(prefix);
                            key.push('/');
                        }
                        if !dir.is_empty() {
                            key.push_str(dir);
                            key.push('/');
                        }
                        key.push_str(&format!("{stem}.{ext}"));

                        let Ok(source) = layout.parse_source(&key) else {
                            // Reserved names are never sources in the first place.
                            assert_ne!(layout.classify(&key), KeyKind::Source);
                            continue;
                        };

                        let mut produced = vec![
                            layout.output_key(&source),
                            layout.manifest_key(&source),
                            layout.event_archive_key("20240101T000000Z", "id"),
                        ];
                        for i in [0usize, 1, 9, 10, 123] {
                            let chunk = layout.chunk_key(&source, i);
                            produced.push(layout.result_key(&chunk));
                            produced.push(chunk);
                        }

                        for derived in produced {
                            let kind = layout.classify(&derived);
                            assert!(
                                kind.is_pipeline_owned(),
                                "{derived} derived from {key} classified as {kind:?}"
                            );
                        }
                    }
                }
            }
        }
    }
}
