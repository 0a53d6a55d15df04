//! Indexing gateway for the external search service.
//!
//! Four submission operations, one per artifact, each a single request with
//! no built-in retry. Failures come back as a tagged [`IndexingError`] so
//! callers decide retry or discard from the tag instead of the message text.

mod client;
mod mock;

pub use client::{SearchClientConfig, SearchServiceClient};
pub use mock::{MockIndexingGateway, ScriptedFailure, Submission};

use std::time::Duration;

use async_trait::async_trait;
use pipeline_types::ArtifactKind;
use serde_json::Value;
use thiserror::Error;

/// Classification tag of an [`IndexingError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexingErrorKind {
    /// Throttled by the service; worth retrying later
    RateLimited,
    /// A referenced resource does not exist
    NotFound,
    /// The service rejected the document or the request
    Invalid,
    /// Transport failures, server errors, anything else
    Unknown,
}

/// Failure of one submission, tagged at the gateway boundary.
#[derive(Debug, Error)]
pub enum IndexingError {
    #[error("Rate limited while submitting {artifact}: {message}")]
    RateLimited {
        artifact: ArtifactKind,
        retry_after: Option<Duration>,
        message: String,
    },

    #[error("Not found while submitting {artifact}: {message}")]
    NotFound {
        artifact: ArtifactKind,
        message: String,
    },

    #[error("Invalid {artifact} (HTTP {status}): {message}")]
    Invalid {
        artifact: ArtifactKind,
        status: u16,
        message: String,
    },

    #[error("Failed to submit {artifact}: {message}")]
    Unknown {
        artifact: ArtifactKind,
        message: String,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl IndexingError {
    pub fn kind(&self) -> IndexingErrorKind {
        match self {
            IndexingError::RateLimited { .. } => IndexingErrorKind::RateLimited,
            IndexingError::NotFound { .. } => IndexingErrorKind::NotFound,
            IndexingError::Invalid { .. } | IndexingError::Config(_) => IndexingErrorKind::Invalid,
            IndexingError::Unknown { .. } => IndexingErrorKind::Unknown,
        }
    }

    /// Artifact whose submission failed, if any.
    pub fn artifact(&self) -> Option<ArtifactKind> {
        match self {
            IndexingError::RateLimited { artifact, .. }
            | IndexingError::NotFound { artifact, .. }
            | IndexingError::Invalid { artifact, .. }
            | IndexingError::Unknown { artifact, .. } => Some(*artifact),
            IndexingError::Config(_) => None,
        }
    }

    /// Build an error of the given kind. Used by test doubles.
    pub fn of_kind(kind: IndexingErrorKind, artifact: ArtifactKind, message: impl Into<String>) -> Self {
        let message = message.into();
        match kind {
            IndexingErrorKind::RateLimited => IndexingError::RateLimited {
                artifact,
                retry_after: None,
                message,
            },
            IndexingErrorKind::NotFound => IndexingError::NotFound { artifact, message },
            IndexingErrorKind::Invalid => IndexingError::Invalid {
                artifact,
                status: 400,
                message,
            },
            IndexingErrorKind::Unknown => IndexingError::Unknown { artifact, message },
        }
    }
}

/// Successful submission result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Created,
    /// An artifact with the same name already exists on the service
    AlreadyExists,
}

/// Submission operations against the search service.
#[async_trait]
pub trait IndexingGateway: Send + Sync {
    /// Submit one definition document.
    async fn submit(
        &self,
        artifact: ArtifactKind,
        definition: &Value,
    ) -> Result<SubmitOutcome, IndexingError>;

    async fn submit_datasource(&self, definition: &Value) -> Result<SubmitOutcome, IndexingError> {
        self.submit(ArtifactKind::Datasource, definition).await
    }

    async fn submit_index(&self, definition: &Value) -> Result<SubmitOutcome, IndexingError> {
        self.submit(ArtifactKind::Index, definition).await
    }

    async fn submit_skillset(&self, definition: &Value) -> Result<SubmitOutcome, IndexingError> {
        self.submit(ArtifactKind::Skillset, definition).await
    }

    async fn submit_indexer(&self, definition: &Value) -> Result<SubmitOutcome, IndexingError> {
        self.submit(ArtifactKind::Indexer, definition).await
    }
}
