//! Queue message envelope.
//!
//! A message body is the base64 encoding of a UTF-8 JSON object
//! `{ "indexId": number, "blobName"?: string }`.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use pipeline_types::JobId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors decoding a queue message body.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Message body is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Message body is not a valid job reference: {0}")]
    Json(#[from] serde_json::Error),
}

/// Reference to a job carried by both queues.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobReference {
    pub index_id: JobId,
    /// Container holding the upload; required by the ingest stage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob_name: Option<String>,
}

impl JobReference {
    pub fn new(index_id: JobId) -> Self {
        Self {
            index_id,
            blob_name: None,
        }
    }

    pub fn with_blob_name(mut self, blob_name: impl Into<String>) -> Self {
        self.blob_name = Some(blob_name.into());
        self
    }

    /// Container name, if present and non-blank.
    pub fn container(&self) -> Option<&str> {
        self.blob_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }
}

/// Encode a reference into a queue message body.
pub fn encode(reference: &JobReference) -> Result<String, CodecError> {
    let json = serde_json::to_vec(reference)?;
    Ok(BASE64.encode(json))
}

/// Decode a queue message body.
pub fn decode(text: &str) -> Result<JobReference, CodecError> {
    let bytes = BASE64.decode(text.trim())?;
    Ok(serde_json::from_slice(&bytes)?)
}
