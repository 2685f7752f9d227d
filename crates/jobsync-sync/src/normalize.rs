//! Raw posting → canonical posting, including category assignment.

use std::path::Path;

use anyhow::{Context, Result};
use jobsync_core::{
    CanonicalPosting, RawPosting, Translations, DEFAULT_CATEGORY, DEFAULT_COMPANY,
    DEFAULT_CONTACT_INFO, DEFAULT_LOCATION, DEFAULT_TITLE,
};
use serde::Deserialize;

pub const TRANSPORT_CATEGORY: &str = "Transport & Logistics";
const LICENCE_HINTS: &[&str] = &["permis", "licence", "license", "führerschein"];

/// Keywords this short must match a whole title token ("it" should not hit "recruiter").
const WHOLE_TOKEN_MAX_CHARS: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CategoryRule {
    pub category: String,
    pub keywords: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct CategoryRulesFile {
    #[serde(default)]
    rules: Vec<CategoryRule>,
}

/// Ordered keyword table; the first rule with a matching keyword wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryTable {
    rules: Vec<CategoryRule>,
}

impl Default for CategoryTable {
    fn default() -> Self {
        Self::builtin()
    }
}

impl CategoryTable {
    pub fn builtin() -> Self {
        let rule = |category: &str, keywords: &[&str]| CategoryRule {
            category: category.to_string(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
        };
        Self::new(vec![
            rule(
                "IT & Technology",
                &["software", "developer", "tech", "data", "it", "informatique"],
            ),
            rule("Healthcare", &["infirmier", "nurse", "santé", "médical", "soins"]),
            rule("Construction", &["construction", "bâtiment", "ouvrier", "maçon"]),
            rule("Sales & Retail", &["vente", "sales", "comercial"]),
            rule("Hospitality", &["cuisine", "serveur", "hotel", "restaurante"]),
            rule(TRANSPORT_CATEGORY, &["chauffeur", "livreur", "driver"]),
            rule("Finance & Accounting", &["comptable", "finance", "bank", "banque"]),
        ])
    }

    pub fn new(rules: Vec<CategoryRule>) -> Self {
        let rules = rules
            .into_iter()
            .map(|rule| CategoryRule {
                keywords: rule
                    .keywords
                    .iter()
                    .map(|k| k.trim().to_lowercase())
                    .filter(|k| !k.is_empty())
                    .collect(),
                category: rule.category,
            })
            .collect();
        Self { rules }
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let file: CategoryRulesFile =
            serde_yaml::from_str(text).context("parsing category rules")?;
        anyhow::ensure!(!file.rules.is_empty(), "category rules file has no rules");
        Ok(Self::new(file.rules))
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml_str(&text).with_context(|| format!("loading {}", path.display()))
    }

    pub fn rules(&self) -> &[CategoryRule] {
        &self.rules
    }

    /// Keywords of up to three characters, including ones loaded from a rules file, only
    /// match a whole title token; longer ones match anywhere in the title.
    pub fn categorize(&self, title: &str) -> &str {
        let lowered = title.to_lowercase();
        let tokens: Vec<&str> = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .collect();
        self.rules
            .iter()
            .find(|rule| {
                rule.keywords.iter().any(|keyword| {
                    if keyword.chars().count() <= WHOLE_TOKEN_MAX_CHARS {
                        tokens.contains(&keyword.as_str())
                    } else {
                        lowered.contains(keyword.as_str())
                    }
                })
            })
            .map(|rule| rule.category.as_str())
            .unwrap_or(DEFAULT_CATEGORY)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    categories: CategoryTable,
}

impl Normalizer {
    pub fn new(categories: CategoryTable) -> Self {
        Self { categories }
    }

    pub fn normalize(&self, raw: RawPosting) -> CanonicalPosting {
        let title = non_blank(Some(raw.title)).unwrap_or_else(|| DEFAULT_TITLE.to_string());
        let category = self.categories.categorize(&title).to_string();
        let requires_driver = requires_driver(&title, &category);
        CanonicalPosting {
            company: non_blank(raw.company).unwrap_or_else(|| DEFAULT_COMPANY.to_string()),
            location: non_blank(raw.location).unwrap_or_else(|| DEFAULT_LOCATION.to_string()),
            category,
            source_name: raw.source_name,
            source_url: raw.source_url.trim().to_string(),
            posted_at: non_blank(raw.posted_at),
            contact_info: non_blank(raw.contact_info)
                .unwrap_or_else(|| DEFAULT_CONTACT_INFO.to_string()),
            requires_driver,
            translations: Translations::new(),
            title,
        }
    }

    pub fn normalize_all(&self, raw: Vec<RawPosting>) -> Vec<CanonicalPosting> {
        raw.into_iter().map(|r| self.normalize(r)).collect()
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Transport roles, or any title hinting at a driving licence.
pub fn requires_driver(title: &str, category: &str) -> bool {
    if category == TRANSPORT_CATEGORY {
        return true;
    }
    let lowered = title.to_lowercase();
    LICENCE_HINTS.iter().any(|hint| lowered.contains(hint))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(title: &str) -> RawPosting {
        RawPosting {
            title: title.to_string(),
            company: None,
            location: Some("  ".to_string()),
            posted_at: Some(String::new()),
            external_id: "x".to_string(),
            source_url: " https://example.lu/x ".to_string(),
            source_name: "EURES".to_string(),
            contact_info: None,
        }
    }

    #[test]
    fn categorization_is_deterministic() {
        let table = CategoryTable::builtin();
        assert_eq!(table.categorize("Infirmier de nuit"), "Healthcare");
        assert_eq!(table.categorize("Senior Developer (Rust)"), "IT & Technology");
        assert_eq!(table.categorize("Barman"), "Other");
    }

    #[test]
    fn first_matching_rule_wins() {
        let table = CategoryTable::builtin();
        // "data" (IT) is listed before "bank" (Finance).
        assert_eq!(table.categorize("Bank Data Analyst"), "IT & Technology");
        assert_eq!(table.categorize("Chauffeur de direction - banque"), TRANSPORT_CATEGORY);
    }

    #[test]
    fn short_keywords_match_whole_tokens_only() {
        let table = CategoryTable::builtin();
        assert_eq!(table.categorize("IT Support"), "IT & Technology");
        assert_eq!(table.categorize("Recruiter"), "Other");
        assert_eq!(table.categorize("Responsable IT/Infra"), "IT & Technology");
    }

    #[test]
    fn accented_keywords_match_accented_titles() {
        let table = CategoryTable::builtin();
        assert_eq!(table.categorize("Aide SOINS à domicile"), "Healthcare");
        assert_eq!(table.categorize("Chef de chantier BÂTIMENT"), "Construction");
    }

    #[test]
    fn missing_fields_get_defaults() {
        let posting = Normalizer::default().normalize(raw("   "));
        assert_eq!(posting.title, DEFAULT_TITLE);
        assert_eq!(posting.company, DEFAULT_COMPANY);
        assert_eq!(posting.location, DEFAULT_LOCATION);
        assert_eq!(posting.category, DEFAULT_CATEGORY);
        assert_eq!(posting.contact_info, DEFAULT_CONTACT_INFO);
        assert_eq!(posting.posted_at, None);
        assert_eq!(posting.source_url, "https://example.lu/x");
        assert!(posting.translations.is_empty());
    }

    #[test]
    fn driver_flag_follows_category_and_licence_mentions() {
        let normalizer = Normalizer::default();
        assert!(normalizer.normalize(raw("Livreur")).requires_driver);
        assert!(normalizer.normalize(raw("Vendeur (permis B requis)")).requires_driver);
        assert!(!normalizer.normalize(raw("Vendeur")).requires_driver);
    }

    #[test]
    fn yaml_override_replaces_the_table_in_order() {
        let table = CategoryTable::from_yaml_str(
            "rules:\n  - category: Events\n    keywords: [event, Festival]\n  - category: Hospitality\n    keywords: [serveur]\n",
        )
        .expect("rules");
        assert_eq!(table.rules().len(), 2);
        assert_eq!(table.categorize("Event Manager"), "Events");
        assert_eq!(table.categorize("FESTIVAL crew"), "Events");
        assert_eq!(table.categorize("Infirmier"), "Other");
        assert!(CategoryTable::from_yaml_str("rules: []").is_err());
    }

    #[test]
    fn short_yaml_keywords_follow_the_whole_token_rule() {
        let table = CategoryTable::from_yaml_str(
            "rules:\n  - category: Hospitality\n    keywords: [bar]\n",
        )
        .expect("rules");
        assert_eq!(table.categorize("Serveur de bar"), "Hospitality");
        assert_eq!(table.categorize("Barista"), "Other");
    }

    #[test]
    fn yaml_override_loads_from_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("categories.yaml");
        std::fs::write(&path, "rules:\n  - category: Events\n    keywords: [event]\n").expect("write");
        let table = CategoryTable::from_yaml_file(&path).expect("load");
        assert_eq!(table.categorize("Event Manager"), "Events");
        assert!(CategoryTable::from_yaml_file(&dir.path().join("missing.yaml")).is_err());
    }
}
