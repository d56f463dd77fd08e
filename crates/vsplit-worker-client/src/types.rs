//! Request/response types for the chunk worker service.

use serde::{Deserialize, Serialize};

use crate::error::{WorkerClientError, WorkerClientResult};

/// Body posted to the worker for one chunk.
///
/// The key is sent under both names; older workers read `key`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessRequest {
    pub chunk_key: String,
    pub key: String,
}

impl ProcessRequest {
    pub fn new(chunk_key: impl Into<String>) -> Self {
        let chunk_key = chunk_key.into();
        Self {
            key: chunk_key.clone(),
            chunk_key,
        }
    }
}

/// JSON form of a worker answer.
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessResponse {
    #[serde(default)]
    pub result_key: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
}

/// Extract the result key from a 2xx response body.
///
/// Accepts `{"result_key": ...}`, `{"key": ...}`, a JSON string, or the
/// bare key as plain text.
pub fn parse_result_key(body: &str) -> WorkerClientResult<String> {
    let body = body.trim();
    if body.is_empty() {
        return Err(WorkerClientError::invalid_response("empty body"));
    }

    if body.starts_with('{') {
        let response: ProcessResponse = serde_json::from_str(body)
            .map_err(|e| WorkerClientError::invalid_response(e.to_string()))?;
        return response
            .result_key
            .or(response.key)
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .ok_or_else(|| WorkerClientError::invalid_response("no result key in body"));
    }

    if body.starts_with('"') {
        let key: String = serde_json::from_str(body)
            .map_err(|e| WorkerClientError::invalid_response(e.to_string()))?;
        let key = key.trim().to_string();
        if key.is_empty() {
            return Err(WorkerClientError::invalid_response("empty result key"));
        }
        return Ok(key);
    }

    if body.lines().count() > 1 {
        return Err(WorkerClientError::invalid_response(
            "multi-line plain-text body",
        ));
    }
    Ok(body.to_string())
}
