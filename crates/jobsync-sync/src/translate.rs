//! Per-locale translation of newly inserted postings through a chat-completion service.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use jobsync_core::{CanonicalPosting, Locale, LocalizedText, PersistedRecord, StoredRecord, Translations};
use jobsync_storage::RequestThrottle;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::TranslationConfig;
use crate::plan::{PlannedUpdate, SyncPlan};

#[derive(Debug, Error)]
pub enum TranslationError {
    #[error("completion request failed: {0}")]
    Request(String),
    #[error("completion response is not a translation object: {0}")]
    MalformedResponse(String),
    #[error("completion response lacks locale `{0}`")]
    MissingLocale(Locale),
}

/// Anything that answers a system+user prompt with a JSON document.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete_json(&self, system: &str, user: &str) -> Result<String, TranslationError>;
}

pub struct OpenAiCompletions {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiCompletions {
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, TranslationError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TranslationError::Request(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
        })
    }

    /// `None` when no API key is configured.
    pub fn from_config(config: &TranslationConfig) -> Result<Option<Self>, TranslationError> {
        config
            .api_key
            .as_deref()
            .map(|key| Self::new(key, config.base_url.clone(), config.model.clone(), config.timeout))
            .transpose()
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl CompletionBackend for OpenAiCompletions {
    async fn complete_json(&self, system: &str, user: &str) -> Result<String, TranslationError> {
        let start = Instant::now();
        let body = json!({
            "model": self.model,
            "temperature": 0,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user },
            ],
        });

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| TranslationError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(TranslationError::Request(format!(
                "status {}: {}",
                status.as_u16(),
                error_text.chars().take(200).collect::<String>()
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| TranslationError::MalformedResponse(e.to_string()))?;
        debug!(model = %self.model, duration_ms = start.elapsed().as_millis(), "completion returned");

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| TranslationError::MalformedResponse("no choices in response".into()))
    }
}

const SYSTEM_PROMPT: &str = "You translate job posting titles and locations. \
Reply with one JSON object only, no prose.";

fn user_prompt(posting: &CanonicalPosting) -> String {
    let codes = Locale::ALL.map(Locale::code).join(", ");
    format!(
        "Translate this job posting into each of these locales: {codes}.\n\
         Return a JSON object whose keys are exactly those locale codes; each value is an \
         object with string fields \"title\" and \"location\". Keep proper nouns as they are.\n\
         Title: {}\nLocation: {}",
        posting.title, posting.location
    )
}

/// Accepts only an object carrying every locale, each with a non-empty title and location.
pub fn parse_translations(raw: &str) -> Result<Translations, TranslationError> {
    let cleaned = raw
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    let value: Value = serde_json::from_str(cleaned)
        .map_err(|e| TranslationError::MalformedResponse(e.to_string()))?;
    let object = value
        .as_object()
        .ok_or_else(|| TranslationError::MalformedResponse("top level is not an object".into()))?;

    let mut translations = Translations::new();
    for locale in Locale::ALL {
        let entry = object
            .get(locale.code())
            .ok_or(TranslationError::MissingLocale(locale))?;
        let text: LocalizedText = serde_json::from_value(entry.clone()).map_err(|e| {
            TranslationError::MalformedResponse(format!("locale `{locale}`: {e}"))
        })?;
        if text.title.trim().is_empty() || text.location.trim().is_empty() {
            return Err(TranslationError::MalformedResponse(format!(
                "locale `{locale}` has an empty field"
            )));
        }
        translations.insert(locale, text);
    }
    Ok(translations)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TranslationStats {
    pub attempted: usize,
    pub translated: usize,
    pub failed: usize,
    /// Already translated, or translation switched off.
    pub skipped: usize,
}

/// A plan whose new postings went through translation; the only input the applier takes.
#[derive(Debug, Clone)]
pub struct ReadyPlan {
    inserts: Vec<CanonicalPosting>,
    updates: Vec<PlannedUpdate>,
    run_date: String,
}

impl ReadyPlan {
    pub fn inserts(&self) -> &[CanonicalPosting] {
        &self.inserts
    }

    pub fn updates(&self) -> &[PlannedUpdate] {
        &self.updates
    }

    pub fn insert_records(&self) -> Vec<PersistedRecord> {
        self.inserts
            .iter()
            .map(|posting| PersistedRecord::from_posting(posting, &self.run_date))
            .collect()
    }

    pub fn update_records(&self) -> Vec<StoredRecord> {
        self.updates.iter().map(|u| u.payload.clone()).collect()
    }

    pub fn postings(&self) -> impl Iterator<Item = &CanonicalPosting> {
        self.inserts
            .iter()
            .chain(self.updates.iter().map(|u| &u.posting))
    }
}

pub struct Translator {
    backend: Option<Arc<dyn CompletionBackend>>,
    throttle: RequestThrottle,
}

impl Translator {
    pub fn new(backend: Option<Arc<dyn CompletionBackend>>, spacing: Duration) -> Self {
        Self {
            backend,
            throttle: RequestThrottle::new(spacing),
        }
    }

    pub fn disabled() -> Self {
        Self::new(None, Duration::ZERO)
    }

    /// Translates new postings one at a time; updates pass through untouched.
    pub async fn translate(&self, plan: SyncPlan) -> (ReadyPlan, TranslationStats) {
        let SyncPlan {
            mut to_insert,
            to_update,
            run_date,
        } = plan;
        let mut stats = TranslationStats::default();

        for posting in &mut to_insert {
            let Some(backend) = self.backend.as_deref() else {
                stats.skipped += 1;
                continue;
            };
            if !posting.translations.is_empty() {
                stats.skipped += 1;
                continue;
            }
            self.throttle.acquire().await;
            stats.attempted += 1;
            match translate_one(backend, posting).await {
                Ok(translations) => {
                    posting.translations = translations;
                    stats.translated += 1;
                }
                Err(err) => {
                    warn!(source_url = %posting.source_url, error = %err, "leaving posting untranslated");
                    stats.failed += 1;
                }
            }
        }
        info!(
            attempted = stats.attempted,
            translated = stats.translated,
            failed = stats.failed,
            skipped = stats.skipped,
            "translation finished"
        );

        (
            ReadyPlan {
                inserts: to_insert,
                updates: to_update,
                run_date,
            },
            stats,
        )
    }
}

async fn translate_one(
    backend: &dyn CompletionBackend,
    posting: &CanonicalPosting,
) -> Result<Translations, TranslationError> {
    let raw = backend.complete_json(SYSTEM_PROMPT, &user_prompt(posting)).await?;
    parse_translations(&raw)
}
