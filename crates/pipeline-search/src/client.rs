//! HTTP client for the search service's REST API.

use std::time::Duration;

use async_trait::async_trait;
use pipeline_types::{ArtifactKind, SearchSettings};
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tracing::{debug, warn};

use crate::{IndexingError, IndexingGateway, SubmitOutcome};

/// Connection parameters for [`SearchServiceClient`].
#[derive(Debug, Clone)]
pub struct SearchClientConfig {
    /// Service URL without trailing slash, e.g. `https://svc.search.windows.net`
    pub endpoint: String,
    pub api_key: SecretString,
    pub api_version: String,
    pub timeout: Duration,
}

impl SearchClientConfig {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_key: SecretString::from(api_key.into()),
            api_version: "2024-07-01".to_string(),
            timeout: Duration::from_secs(60),
        }
    }

    /// Build from settings. Endpoint and key are required.
    pub fn from_settings(settings: &SearchSettings) -> Result<Self, IndexingError> {
        if settings.endpoint.trim().is_empty() {
            return Err(IndexingError::Config("search.endpoint is not set".to_string()));
        }
        let api_key = settings
            .api_key
            .as_deref()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| IndexingError::Config("search.api_key is not set".to_string()))?;

        let mut config = Self::new(settings.endpoint.as_str(), api_key);
        config.api_version = settings.api_version.clone();
        config.timeout = Duration::from_secs(settings.timeout_secs);
        Ok(config)
    }
}

/// Collection path of each artifact kind.
fn collection(artifact: ArtifactKind) -> &'static str {
    match artifact {
        ArtifactKind::Datasource => "datasources",
        ArtifactKind::Index => "indexes",
        ArtifactKind::Skillset => "skillsets",
        ArtifactKind::Indexer => "indexers",
    }
}

/// Whether a 400 body reports a missing referenced resource.
fn reports_missing_reference(body: &str) -> bool {
    let lower = body.to_lowercase();
    lower.contains("not found") || lower.contains("does not exist")
}

fn parse_retry_after(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// [`IndexingGateway`] over the search service REST API.
pub struct SearchServiceClient {
    client: Client,
    config: SearchClientConfig,
}

impl SearchServiceClient {
    pub fn new(config: SearchClientConfig) -> Result<Self, IndexingError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| IndexingError::Config(e.to_string()))?;

        Ok(Self { client, config })
    }

    fn url(&self, artifact: ArtifactKind) -> String {
        format!(
            "{}/{}?api-version={}",
            self.config.endpoint,
            collection(artifact),
            self.config.api_version
        )
    }

    /// Map a non-success response to its tag.
    async fn classify(artifact: ArtifactKind, response: reqwest::Response) -> IndexingError {
        let status = response.status();
        let retry_after = parse_retry_after(&response);
        let body = response.text().await.unwrap_or_default();
        let message = if body.is_empty() {
            format!("HTTP {}", status)
        } else {
            format!("HTTP {}: {}", status, body)
        };

        match status {
            StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE => {
                IndexingError::RateLimited {
                    artifact,
                    retry_after,
                    message,
                }
            }
            StatusCode::NOT_FOUND => IndexingError::NotFound { artifact, message },
            StatusCode::BAD_REQUEST if reports_missing_reference(&body) => {
                IndexingError::NotFound { artifact, message }
            }
            s if s.is_client_error() => IndexingError::Invalid {
                artifact,
                status: s.as_u16(),
                message,
            },
            _ => IndexingError::Unknown { artifact, message },
        }
    }
}

#[async_trait]
impl IndexingGateway for SearchServiceClient {
    async fn submit(
        &self,
        artifact: ArtifactKind,
        definition: &Value,
    ) -> Result<SubmitOutcome, IndexingError> {
        let url = self.url(artifact);
        debug!(artifact = %artifact, "Submitting definition");

        let response = self
            .client
            .post(&url)
            .header("api-key", self.config.api_key.expose_secret())
            .header("Content-Type", "application/json")
            .json(definition)
            .send()
            .await
            .map_err(|e| IndexingError::Unknown {
                artifact,
                message: e.to_string(),
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(SubmitOutcome::Created);
        }
        if status == StatusCode::CONFLICT {
            warn!(artifact = %artifact, "Artifact already exists, treating as submitted");
            return Ok(SubmitOutcome::AlreadyExists);
        }

        Err(Self::classify(artifact, response).await)
    }
}
