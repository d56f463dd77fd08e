//! Pipeline error types.

use thiserror::Error;
use vsplit_media::MediaError;
use vsplit_models::ModelError;
use vsplit_storage::StorageError;

pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// The source or a chunk could not be decoded, or has the wrong format
    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// The manifest could not be read or flushed
    #[error("Manifest error: {0}")]
    Manifest(String),

    #[error("Incomplete results: {0}")]
    IncompleteResults(String),

    #[error("Merge aborted: chunks {failed:?} did not complete")]
    MergeAborted { failed: Vec<usize> },

    #[error("Malformed event: {0}")]
    MalformedEvent(String),

    #[error("Subscription handshake failed: {0}")]
    Handshake(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    Model(#[from] ModelError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// Wrap a failed manifest read or flush.
    pub fn manifest(err: StorageError) -> Self {
        Self::Manifest(err.to_string())
    }

    pub fn incomplete(msg: impl Into<String>) -> Self {
        Self::IncompleteResults(msg.into())
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedEvent(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Errors that end a pipeline run. Intake errors never reach a run.
    pub fn is_fatal_to_run(&self) -> bool {
        !matches!(
            self,
            PipelineError::MalformedEvent(_) | PipelineError::Handshake(_)
        )
    }

    /// Short label used in metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Decode(_) => "decode",
            PipelineError::Storage(_) => "storage",
            PipelineError::Manifest(_) => "manifest",
            PipelineError::IncompleteResults(_) => "incomplete_results",
            PipelineError::MergeAborted { .. } => "merge_aborted",
            PipelineError::MalformedEvent(_) => "malformed_event",
            PipelineError::Handshake(_) => "handshake",
            PipelineError::Config(_) => "config",
            PipelineError::Model(_) => "invalid_input",
            PipelineError::Io(_) => "io",
        }
    }
}

impl From<MediaError> for PipelineError {
    fn from(err: MediaError) -> Self {
        match err {
            MediaError::Io(e) => PipelineError::Io(e),
            e if e.is_decode_error() => PipelineError::Decode(e.to_string()),
            e => PipelineError::Config(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_error_mapping() {
        let err: PipelineError = MediaError::invalid_video("no frames").into();
        assert!(matches!(err, PipelineError::Decode(_)));

        let err: PipelineError = MediaError::FfmpegNotFound.into();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn test_fatality() {
        assert!(PipelineError::decode("bad").is_fatal_to_run());
        assert!(PipelineError::MergeAborted { failed: vec![2] }.is_fatal_to_run());
        assert!(!PipelineError::malformed("no key").is_fatal_to_run());
        assert_eq!(
            PipelineError::MergeAborted { failed: vec![1, 3] }.to_string(),
            "Merge aborted: chunks [1, 3] did not complete"
        );
    }
}
