//! Cache invalidation of the public job listing once fresh rows are in the store.

use async_trait::async_trait;
use jobsync_storage::{FetchError, HttpClientConfig, HttpFetcher};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::info;

use crate::config::PurgeConfig;

#[derive(Debug, Error)]
pub enum PurgeError {
    #[error(transparent)]
    Http(#[from] FetchError),
    #[error("purge rejected: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PurgeOutcome {
    NotConfigured,
    /// Nothing was written, or a batch failed.
    Skipped,
    Purged { urls: usize },
    Failed { error: String },
}

#[async_trait]
pub trait CachePurger: Send + Sync {
    /// Returns how many URLs were invalidated.
    async fn purge(&self) -> Result<usize, PurgeError>;
}

#[derive(Debug, Deserialize)]
struct CloudflareEnvelope {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    errors: Vec<serde_json::Value>,
}

pub struct CloudflarePurger {
    http: HttpFetcher,
    endpoint: String,
    api_token: String,
    urls: Vec<String>,
}

impl CloudflarePurger {
    pub fn new(config: &PurgeConfig, user_agent: &str) -> Result<Self, PurgeError> {
        let http = HttpFetcher::new(
            "cloudflare",
            HttpClientConfig::with_timeout(config.timeout, user_agent),
        )?;
        Ok(Self {
            http,
            endpoint: format!(
                "{}/zones/{}/purge_cache",
                config.api_base.trim_end_matches('/'),
                config.zone_id
            ),
            api_token: config.api_token.clone(),
            urls: config.urls.clone(),
        })
    }
}

#[async_trait]
impl CachePurger for CloudflarePurger {
    async fn purge(&self) -> Result<usize, PurgeError> {
        if self.urls.is_empty() {
            return Ok(0);
        }
        let body = json!({ "files": self.urls });
        let response = self
            .http
            .send_idempotent(&self.endpoint, |client| {
                client
                    .post(&self.endpoint)
                    .bearer_auth(&self.api_token)
                    .json(&body)
            })
            .await?;
        let envelope: CloudflareEnvelope =
            response.json().await.map_err(|err| {
                PurgeError::Http(FetchError::Decode {
                    url: self.endpoint.clone(),
                    message: err.to_string(),
                })
            })?;
        if !envelope.success {
            let errors = serde_json::to_string(&envelope.errors).unwrap_or_default();
            return Err(PurgeError::Rejected(errors));
        }
        info!(urls = self.urls.len(), "public cache purged");
        Ok(self.urls.len())
    }
}
