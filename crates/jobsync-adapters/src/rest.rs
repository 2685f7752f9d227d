//! Credentialed REST search APIs (EURES, Randstad).

use std::time::Duration;

use async_trait::async_trait;
use jobsync_core::RawPosting;
use jobsync_storage::{HttpClientConfig, HttpFetcher};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::{text_or_none, AdapterError, FetchedBatch, SourceAdapter, SourceFetch, SourceKind};

pub const EURES_SOURCE: &str = "EURES";
pub const RANDSTAD_SOURCE: &str = "Randstad";
pub const DEFAULT_EURES_URL: &str =
    "https://ec.europa.eu/eures/eures-searchengine/v2/search/job/consult";
pub const DEFAULT_RANDSTAD_URL: &str = "https://api.randstad.com/v1/jobs";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestDialect {
    /// POST search with a subscription-key header; results under `items[].header`.
    Eures,
    /// GET with bearer token; results as a top-level array or under `items`.
    Randstad,
}

#[derive(Debug, Clone)]
pub struct RestSourceConfig {
    pub source_name: String,
    pub dialect: RestDialect,
    pub endpoint: String,
    pub credential: Option<String>,
    pub country: String,
    pub limit: usize,
    pub timeout: Duration,
    pub user_agent: String,
}

impl RestSourceConfig {
    pub fn eures(credential: Option<String>) -> Self {
        Self {
            source_name: EURES_SOURCE.to_string(),
            dialect: RestDialect::Eures,
            endpoint: DEFAULT_EURES_URL.to_string(),
            credential,
            country: "LU".to_string(),
            limit: 50,
            timeout: Duration::from_secs(20),
            user_agent: "jobsync/0.1".to_string(),
        }
    }

    pub fn randstad(credential: Option<String>) -> Self {
        Self {
            source_name: RANDSTAD_SOURCE.to_string(),
            dialect: RestDialect::Randstad,
            endpoint: DEFAULT_RANDSTAD_URL.to_string(),
            limit: 20,
            ..Self::eures(credential)
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EuresItem {
    header: EuresHeader,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EuresHeader {
    handle: Value,
    title: String,
    #[serde(default)]
    employer: Option<EuresEmployer>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    published_date: Option<String>,
    url: String,
}

#[derive(Debug, Deserialize)]
struct EuresEmployer {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RandstadJob {
    job_id: Value,
    title: String,
    #[serde(default)]
    client_name: Option<String>,
    #[serde(default)]
    city: Option<String>,
    #[serde(default)]
    posted_date: Option<String>,
    url: String,
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => text_or_none(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn map_item(dialect: RestDialect, item: Value, source_name: &str) -> Option<RawPosting> {
    let posting = match dialect {
        RestDialect::Eures => {
            let item: EuresItem = serde_json::from_value(item).ok()?;
            let header = item.header;
            RawPosting {
                title: text_or_none(&header.title)?,
                company: header.employer.and_then(|e| e.name).as_deref().and_then(text_or_none),
                location: header.location.as_deref().and_then(text_or_none),
                posted_at: header.published_date,
                external_id: id_string(&header.handle)?,
                source_url: text_or_none(&header.url)?,
                source_name: source_name.to_string(),
                contact_info: None,
            }
        }
        RestDialect::Randstad => {
            let job: RandstadJob = serde_json::from_value(item).ok()?;
            RawPosting {
                title: text_or_none(&job.title)?,
                company: job.client_name.as_deref().and_then(text_or_none),
                location: job.city.as_deref().and_then(text_or_none),
                posted_at: job.posted_date,
                external_id: id_string(&job.job_id)?,
                source_url: text_or_none(&job.url)?,
                source_name: source_name.to_string(),
                contact_info: None,
            }
        }
    };
    Some(posting)
}

/// Maps a decoded response body; items that do not fit the dialect are counted as skipped.
pub fn map_response(
    dialect: RestDialect,
    body: Value,
    source_name: &str,
) -> Result<FetchedBatch, AdapterError> {
    let items = match (dialect, body) {
        (RestDialect::Randstad, Value::Array(items)) => items,
        (_, Value::Object(mut map)) => match map.remove("items") {
            Some(Value::Array(items)) => items,
            Some(Value::Null) | None => Vec::new(),
            Some(_) => return Err(AdapterError::parse(source_name, "`items` is not an array")),
        },
        _ => return Err(AdapterError::parse(source_name, "unexpected response shape")),
    };

    let mut batch = FetchedBatch::default();
    for item in items {
        match map_item(dialect, item, source_name) {
            Some(posting) => batch.postings.push(posting),
            None => {
                debug!(source = source_name, "skipping item that does not match the schema");
                batch.skipped_records += 1;
            }
        }
    }
    Ok(batch)
}

pub struct RestSearchAdapter {
    config: RestSourceConfig,
    http: HttpFetcher,
}

impl RestSearchAdapter {
    pub fn new(config: RestSourceConfig) -> Result<Self, AdapterError> {
        let http = HttpFetcher::new(
            config.source_name.clone(),
            HttpClientConfig::with_timeout(config.timeout, config.user_agent.clone()),
        )
        .map_err(|err| AdapterError::http(&config.source_name, err))?;
        Ok(Self { config, http })
    }

    async fn request(&self, credential: &str) -> Result<Value, AdapterError> {
        let endpoint = self.config.endpoint.as_str();
        let response = match self.config.dialect {
            RestDialect::Eures => {
                let body = json!({
                    "dataSetCode": "EURES_Search",
                    "filters": [{ "facetCode": "LOCATION", "facetValues": [self.config.country] }],
                    "resultsPerPage": self.config.limit,
                });
                self.http
                    .send_idempotent(endpoint, |client| {
                        client
                            .post(endpoint)
                            .header("X-Subscription-Key", credential)
                            .json(&body)
                    })
                    .await
            }
            RestDialect::Randstad => {
                let limit = self.config.limit.to_string();
                self.http
                    .send_idempotent(endpoint, |client| {
                        client
                            .get(endpoint)
                            .bearer_auth(credential)
                            .query(&[
                                ("countryCode", self.config.country.as_str()),
                                ("limit", limit.as_str()),
                            ])
                    })
                    .await
            }
        }
        .map_err(|err| AdapterError::http(&self.config.source_name, err))?;

        response
            .json::<Value>()
            .await
            .map_err(|err| AdapterError::parse(&self.config.source_name, err.to_string()))
    }
}

#[async_trait]
impl SourceAdapter for RestSearchAdapter {
    fn source_name(&self) -> &str {
        &self.config.source_name
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Rest
    }

    async fn fetch(&self) -> Result<SourceFetch, AdapterError> {
        let Some(credential) = self.config.credential.as_deref() else {
            return Ok(SourceFetch::Disabled {
                reason: format!("{} credential not configured", self.config.source_name),
            });
        };
        let body = self.request(credential).await?;
        let batch = map_response(self.config.dialect, body, &self.config.source_name)?;
        info!(
            source = %self.config.source_name,
            postings = batch.postings.len(),
            skipped = batch.skipped_records,
            "search results mapped"
        );
        Ok(SourceFetch::Fetched(batch))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eures_items_map_from_headers() {
        let body = json!({
            "items": [
                { "header": {
                    "handle": "LU-4411",
                    "title": "Event Manager",
                    "employer": { "name": "Lux Event SA" },
                    "publishedDate": "2024-03-01",
                    "url": "https://ec.europa.eu/eures/jobs/LU-4411"
                } },
                { "header": { "handle": "LU-4412", "title": "Cuisinier" } }
            ]
        });
        let batch = map_response(RestDialect::Eures, body, EURES_SOURCE).expect("map");
        assert_eq!(batch.postings.len(), 1);
        assert_eq!(batch.skipped_records, 1);
        let job = &batch.postings[0];
        assert_eq!(job.external_id, "LU-4411");
        assert_eq!(job.company.as_deref(), Some("Lux Event SA"));
        assert_eq!(job.location, None);
        assert_eq!(job.posted_at.as_deref(), Some("2024-03-01"));
        assert_eq!(job.source_name, EURES_SOURCE);
    }

    #[test]
    fn randstad_accepts_bare_arrays_and_numeric_ids() {
        let body = json!([
            { "jobId": 981, "title": "Cariste", "clientName": "Cargolux", "city": "Sandweiler",
              "postedDate": "2024-02-15T08:00:00Z", "url": "https://www.randstad.lu/jobs/981" },
            { "jobId": null, "title": "Sans id", "url": "https://www.randstad.lu/jobs/x" }
        ]);
        let batch = map_response(RestDialect::Randstad, body, RANDSTAD_SOURCE).expect("map");
        assert_eq!(batch.postings.len(), 1);
        assert_eq!(batch.skipped_records, 1);
        assert_eq!(batch.postings[0].external_id, "981");
        assert_eq!(batch.postings[0].location.as_deref(), Some("Sandweiler"));

        let wrapped = json!({ "items": [
            { "jobId": "A1", "title": "Réceptionniste", "url": "https://www.randstad.lu/jobs/A1" }
        ] });
        let batch = map_response(RestDialect::Randstad, wrapped, RANDSTAD_SOURCE).expect("map");
        assert_eq!(batch.postings[0].external_id, "A1");
    }

    #[test]
    fn unexpected_shapes_are_parse_errors() {
        assert!(map_response(RestDialect::Eures, json!([1, 2]), EURES_SOURCE).is_err());
        assert!(map_response(RestDialect::Eures, json!({ "items": "none" }), EURES_SOURCE).is_err());
        let empty = map_response(RestDialect::Eures, json!({ "total": 0 }), EURES_SOURCE)
            .expect("empty result");
        assert!(empty.postings.is_empty());
    }

    #[tokio::test]
    async fn missing_credential_disables_the_source() {
        let adapter = RestSearchAdapter::new(RestSourceConfig::randstad(None)).expect("adapter");
        match adapter.fetch().await.expect("fetch") {
            SourceFetch::Disabled { reason } => assert!(reason.contains("Randstad")),
            other => panic!("expected disabled, got {other:?}"),
        }
    }
}
