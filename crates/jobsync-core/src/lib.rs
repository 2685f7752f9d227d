//! Core domain model for the job posting sync pipeline.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const CRATE_NAME: &str = "jobsync-core";

pub const JOBS_SECTION: &str = "jobs";

pub const DEFAULT_TITLE: &str = "Untitled";
pub const DEFAULT_COMPANY: &str = "Confidential";
pub const DEFAULT_LOCATION: &str = "Luxembourg";
pub const DEFAULT_CATEGORY: &str = "Other";
pub const DEFAULT_CONTACT_INFO: &str = "See details on the source site";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawPosting {
    pub title: String,
    pub company: Option<String>,
    pub location: Option<String>,
    pub posted_at: Option<String>,
    pub external_id: String,
    pub source_url: String,
    pub source_name: String,
    pub contact_info: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    En,
    Es,
    Fr,
    De,
    Lb,
    Pt,
}

impl Locale {
    pub const ALL: [Locale; 6] = [
        Locale::En,
        Locale::Es,
        Locale::Fr,
        Locale::De,
        Locale::Lb,
        Locale::Pt,
    ];

    pub fn code(self) -> &'static str {
        match self {
            Locale::En => "en",
            Locale::Es => "es",
            Locale::Fr => "fr",
            Locale::De => "de",
            Locale::Lb => "lb",
            Locale::Pt => "pt",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|locale| locale.code().eq_ignore_ascii_case(code.trim()))
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalizedText {
    pub title: String,
    pub location: String,
}

/// Per-locale title/location pairs. Keys are always drawn from [`Locale::ALL`].
pub type Translations = BTreeMap<Locale, LocalizedText>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalPosting {
    pub title: String,
    pub company: String,
    pub location: String,
    pub category: String,
    pub source_name: String,
    /// External stable key; exactly one posting per URL survives dedup.
    pub source_url: String,
    pub posted_at: Option<String>,
    pub contact_info: String,
    pub requires_driver: bool,
    #[serde(default)]
    pub translations: Translations,
}

impl CanonicalPosting {
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(&self.title, &self.company)
    }

    pub fn posted_at_utc(&self) -> Option<DateTime<Utc>> {
        self.posted_at.as_deref().and_then(parse_posted_at)
    }
}

/// Merge key built from normalized title and company. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of(title: &str, company: &str) -> Self {
        Self(format!(
            "{}_{}",
            normalize_fragment(title),
            normalize_fragment(company)
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lower-cases and drops every character outside `[a-z0-9]`.
pub fn normalize_fragment(input: &str) -> String {
    input
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        .collect()
}

/// Parses the date shapes sources actually emit: RFC 3339, naive timestamps and plain dates.
pub fn parse_posted_at(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    for format in ["%Y-%m-%d", "%d/%m/%Y", "%d.%m.%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
        }
    }
    None
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RecordMetadata {
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub contact_info: String,
    #[serde(default)]
    pub date: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub translations: Translations,
    #[serde(default)]
    pub requires_driver: bool,
}

/// Store-side row shape, keyed by `(section, link_url)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedRecord {
    pub section: String,
    pub title: String,
    /// Company.
    pub subtitle: String,
    /// Location.
    pub description: String,
    pub link_url: String,
    /// Category.
    pub badge_text: String,
    pub metadata: RecordMetadata,
}

impl PersistedRecord {
    /// Maps a posting onto the jobs section. `date_fallback` is used when the posting has no date.
    pub fn from_posting(posting: &CanonicalPosting, date_fallback: &str) -> Self {
        Self {
            section: JOBS_SECTION.to_string(),
            title: posting.title.clone(),
            subtitle: posting.company.clone(),
            description: posting.location.clone(),
            link_url: posting.source_url.clone(),
            badge_text: posting.category.clone(),
            metadata: RecordMetadata {
                source: posting.source_name.clone(),
                contact_info: posting.contact_info.clone(),
                date: posting
                    .posted_at
                    .clone()
                    .unwrap_or_else(|| date_fallback.to_string()),
                translations: posting.translations.clone(),
                requires_driver: posting.requires_driver,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub id: Uuid,
    #[serde(flatten)]
    pub record: PersistedRecord,
}
