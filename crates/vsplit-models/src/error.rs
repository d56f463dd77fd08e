//! Model parsing errors.

use thiserror::Error;

pub type ModelResult<T> = Result<T, ModelError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("Invalid split policy '{0}' (expected frames:<n> or seconds:<d>)")]
    InvalidPolicy(String),

    #[error("Invalid merge mode '{0}' (expected strict or degraded)")]
    InvalidMergeMode(String),

    #[error("Invalid source key: {0}")]
    InvalidSourceKey(String),
}

impl ModelError {
    pub fn invalid_policy(value: impl Into<String>) -> Self {
        Self::InvalidPolicy(value.into())
    }

    pub fn invalid_source_key(key: impl Into<String>) -> Self {
        Self::InvalidSourceKey(key.into())
    }
}
