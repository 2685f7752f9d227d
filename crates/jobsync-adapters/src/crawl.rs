//! Authenticated crawl of the ADEM job board: log in, open a search session, page
//! through listing fragments.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use jobsync_core::RawPosting;
use jobsync_storage::{HttpClientConfig, HttpFetcher};
use regex::Regex;
use reqwest::Url;
use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::{text_or_none, AdapterError, FetchedBatch, SourceAdapter, SourceFetch, SourceKind};

pub const ADEM_BOARD_SOURCE: &str = "ADEM (board)";
pub const DEFAULT_BOARD_URL: &str = "https://jobboard.adem.lu";

const LISTING_SELECTOR: &str = ".listing-item";
const DETAIL_LINK_SELECTOR: &str = r#"a[href*="/display-job/"]"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListingField {
    Company,
    Location,
}

#[derive(Debug, Clone, Copy)]
pub struct LabeledField {
    pub label: &'static str,
    pub field: ListingField,
}

pub const ADEM_LABELS: &[LabeledField] = &[
    LabeledField {
        label: "Employeur:",
        field: ListingField::Company,
    },
    LabeledField {
        label: "Commune:",
        field: ListingField::Location,
    },
];

/// Pulls `Label: value` pairs out of a listing's flattened text.
#[derive(Debug, Clone)]
pub struct LabelExtractor {
    rules: Vec<(ListingField, Regex)>,
    labels: Vec<&'static str>,
}

impl LabelExtractor {
    pub fn new(labels: &[LabeledField]) -> Result<Self, regex::Error> {
        let rules = labels
            .iter()
            .map(|l| {
                Regex::new(&format!(r"{}\s*([^\n]+)", regex::escape(l.label)))
                    .map(|re| (l.field, re))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            rules,
            labels: labels.iter().map(|l| l.label).collect(),
        })
    }

    pub fn extract(&self, text: &str) -> HashMap<ListingField, String> {
        let mut out = HashMap::new();
        for (field, re) in &self.rules {
            let value = re
                .captures(text)
                .and_then(|caps| caps.get(1))
                .and_then(|m| text_or_none(self.cut_at_next_label(m.as_str())))
                .filter(|v| v != "-");
            if let Some(value) = value {
                out.entry(*field).or_insert(value);
            }
        }
        out
    }

    // An empty value lets `\s*` run into the following line, which may be another label.
    fn cut_at_next_label<'t>(&self, value: &'t str) -> &'t str {
        let end = self
            .labels
            .iter()
            .filter_map(|label| value.find(label))
            .min()
            .unwrap_or(value.len());
        &value[..end]
    }
}

/// Absolute detail URL with query and fragment removed, so the same posting always
/// yields the same link.
pub fn canonical_detail_url(base_url: &str, href: &str) -> Option<String> {
    let mut url = Url::parse(base_url).ok()?.join(href.trim()).ok()?;
    url.set_query(None);
    url.set_fragment(None);
    Some(url.to_string())
}

fn parse_selector(selector: &str, source_name: &str) -> Result<Selector, AdapterError> {
    Selector::parse(selector).map_err(|e| AdapterError::parse(source_name, e.to_string()))
}

/// Parses one page of listing markup. Items without a detail link or title are skipped.
pub fn parse_listing_fragment(
    html: &str,
    base_url: &str,
    extractor: &LabelExtractor,
    source_name: &str,
) -> Result<FetchedBatch, AdapterError> {
    let item_sel = parse_selector(LISTING_SELECTOR, source_name)?;
    let link_sel = parse_selector(DETAIL_LINK_SELECTOR, source_name)?;
    let id_re = Regex::new(r"/display-job/(\d+)")
        .map_err(|e| AdapterError::parse(source_name, e.to_string()))?;

    let document = Html::parse_fragment(html);
    let mut batch = FetchedBatch::default();
    for item in document.select(&item_sel) {
        match parse_listing_item(item, &link_sel, &id_re, base_url, extractor, source_name) {
            Some(posting) => batch.postings.push(posting),
            None => batch.skipped_records += 1,
        }
    }
    Ok(batch)
}

fn parse_listing_item(
    item: ElementRef<'_>,
    link_sel: &Selector,
    id_re: &Regex,
    base_url: &str,
    extractor: &LabelExtractor,
    source_name: &str,
) -> Option<RawPosting> {
    let link = item.select(link_sel).next()?;
    let href = link.value().attr("href")?;
    let title = text_or_none(&link.text().collect::<String>())?;
    let source_url = canonical_detail_url(base_url, href)?;
    let external_id = id_re
        .captures(href)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| source_url.clone());

    let text = item.text().collect::<Vec<_>>().join("\n");
    let mut fields = extractor.extract(&text);

    Some(RawPosting {
        title,
        company: fields.remove(&ListingField::Company),
        location: fields.remove(&ListingField::Location),
        posted_at: None,
        external_id,
        source_url,
        source_name: source_name.to_string(),
        contact_info: None,
    })
}

/// The decoded `searchId` query value; the listing request encodes it again.
pub fn extract_search_id(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()?
        .query_pairs()
        .find(|(key, _)| key == "searchId")
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.is_empty())
}

fn listing_request(
    client: &reqwest::Client,
    url: &str,
    search_id: &str,
    page: &str,
) -> reqwest::RequestBuilder {
    client.get(url).query(&[
        ("action", "request_for_listings"),
        ("listing_type[equal]", "Job"),
        ("searchId", search_id),
        ("provider", ""),
        ("page", page),
    ])
}

#[async_trait]
pub trait CrawlSession: Send {
    /// Markup for the next listing page, or `None` once the page budget is spent.
    async fn next_page(&mut self) -> Result<Option<String>, AdapterError>;
    async fn close(&mut self);
}

#[async_trait]
pub trait CrawlConnector: Send + Sync {
    /// False when credentials are missing; the adapter then reports itself disabled.
    fn is_configured(&self) -> bool {
        true
    }

    fn base_url(&self) -> &str;

    async fn open(&self) -> Result<Box<dyn CrawlSession>, AdapterError>;
}

#[derive(Debug, Clone)]
pub struct BoardCredentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct AdemBoardConfig {
    pub base_url: String,
    pub credentials: Option<BoardCredentials>,
    pub max_pages: u32,
    pub search_filter: String,
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for AdemBoardConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BOARD_URL.to_string(),
            credentials: None,
            max_pages: 3,
            search_filter: "94200".to_string(),
            timeout: Duration::from_secs(20),
            user_agent: "jobsync/0.1".to_string(),
        }
    }
}

pub struct AdemBoardConnector {
    config: AdemBoardConfig,
}

impl AdemBoardConnector {
    pub fn new(config: AdemBoardConfig) -> Self {
        Self { config }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn auth_error(reason: impl Into<String>) -> AdapterError {
        AdapterError::Authentication {
            source_name: ADEM_BOARD_SOURCE.to_string(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl CrawlConnector for AdemBoardConnector {
    fn is_configured(&self) -> bool {
        self.config.credentials.is_some()
    }

    fn base_url(&self) -> &str {
        &self.config.base_url
    }

    async fn open(&self) -> Result<Box<dyn CrawlSession>, AdapterError> {
        let credentials = self
            .config
            .credentials
            .as_ref()
            .ok_or_else(|| Self::auth_error("no credentials configured"))?;

        // Fresh client per session so cookies never leak between runs.
        let http = HttpFetcher::new(
            ADEM_BOARD_SOURCE,
            HttpClientConfig {
                cookie_store: true,
                ..HttpClientConfig::with_timeout(self.config.timeout, self.config.user_agent.clone())
            },
        )
        .map_err(|err| AdapterError::http(ADEM_BOARD_SOURCE, err))?;

        let login = http
            .client()
            .post(self.url("/login?c=1"))
            .form(&[
                ("username", credentials.username.as_str()),
                ("password", credentials.password.as_str()),
            ])
            .send()
            .await
            .map_err(|err| AdapterError::http(ADEM_BOARD_SOURCE, err.into()))?;
        if !login.status().is_success() {
            return Err(Self::auth_error(format!(
                "login returned status {}",
                login.status().as_u16()
            )));
        }
        debug!(source = ADEM_BOARD_SOURCE, "login accepted");

        let search_url = self.url("/search-results-jobs/");
        let filter = self.config.search_filter.as_str();
        let search = http
            .send_idempotent(&search_url, |client| {
                client.get(&search_url).query(&[
                    ("action", "search"),
                    ("listing_type[equal]", "Job"),
                    ("quick_search", "true"),
                    ("adem_diff_public_search[multi_like][]", filter),
                ])
            })
            .await
            .map_err(|err| AdapterError::http(ADEM_BOARD_SOURCE, err))?;
        let search_id = extract_search_id(search.url().as_str()).ok_or_else(|| {
            Self::auth_error("search did not redirect to a search session; login likely rejected")
        })?;
        info!(source = ADEM_BOARD_SOURCE, %search_id, "search session opened");

        Ok(Box::new(AdemBoardSession {
            http,
            listings_url: self.url("/ajax/"),
            search_id,
            next_page: 1,
            max_pages: self.config.max_pages,
        }))
    }
}

#[derive(Debug, Deserialize)]
struct ListingEnvelope {
    html: Option<String>,
}

struct AdemBoardSession {
    http: HttpFetcher,
    listings_url: String,
    search_id: String,
    next_page: u32,
    max_pages: u32,
}

#[async_trait]
impl CrawlSession for AdemBoardSession {
    async fn next_page(&mut self) -> Result<Option<String>, AdapterError> {
        if self.next_page > self.max_pages {
            return Ok(None);
        }
        let page = self.next_page.to_string();
        let url = &self.listings_url;
        let search_id = self.search_id.as_str();
        let response = self
            .http
            .send_idempotent(url, |client| listing_request(client, url, search_id, &page))
            .await
            .map_err(|err| AdapterError::http(ADEM_BOARD_SOURCE, err))?;
        let envelope: ListingEnvelope = response.json().await.map_err(|err| {
            AdapterError::parse(ADEM_BOARD_SOURCE, format!("listing page {page}: {err}"))
        })?;
        self.next_page += 1;
        envelope.html.map(Some).ok_or_else(|| {
            AdapterError::parse(ADEM_BOARD_SOURCE, format!("listing page {page} has no html"))
        })
    }

    async fn close(&mut self) {
        // Dropping the client discards the session cookies.
        self.next_page = self.max_pages + 1;
        debug!(source = ADEM_BOARD_SOURCE, search_id = %self.search_id, "session closed");
    }
}

pub struct BoardCrawlAdapter<C> {
    connector: C,
    extractor: LabelExtractor,
}

impl<C: CrawlConnector> BoardCrawlAdapter<C> {
    pub fn new(connector: C, labels: &[LabeledField]) -> Result<Self, AdapterError> {
        let extractor = LabelExtractor::new(labels)
            .map_err(|err| AdapterError::parse(ADEM_BOARD_SOURCE, err.to_string()))?;
        Ok(Self {
            connector,
            extractor,
        })
    }

    async fn crawl(&self, session: &mut dyn CrawlSession) -> Result<FetchedBatch, AdapterError> {
        let mut batch = FetchedBatch::default();
        let mut pages = 0usize;
        loop {
            let fragment = match session.next_page().await {
                Ok(Some(fragment)) => fragment,
                Ok(None) => break,
                Err(err) if pages == 0 => return Err(err),
                Err(err) => {
                    warn!(
                        source = ADEM_BOARD_SOURCE,
                        pages,
                        error = %err,
                        "page fetch failed; keeping listings gathered so far"
                    );
                    break;
                }
            };
            pages += 1;
            let page = parse_listing_fragment(
                &fragment,
                self.connector.base_url(),
                &self.extractor,
                ADEM_BOARD_SOURCE,
            )?;
            debug!(
                source = ADEM_BOARD_SOURCE,
                page = pages,
                listings = page.postings.len(),
                "listing page parsed"
            );
            batch.extend(page);
        }
        Ok(batch)
    }
}

#[async_trait]
impl<C: CrawlConnector> SourceAdapter for BoardCrawlAdapter<C> {
    fn source_name(&self) -> &str {
        ADEM_BOARD_SOURCE
    }

    fn kind(&self) -> SourceKind {
        SourceKind::AuthenticatedCrawl
    }

    async fn fetch(&self) -> Result<SourceFetch, AdapterError> {
        if !self.connector.is_configured() {
            return Ok(SourceFetch::Disabled {
                reason: "board credentials not configured".to_string(),
            });
        }
        let mut session = self.connector.open().await?;
        let result = self.crawl(session.as_mut()).await;
        session.close().await;
        let batch = result?;
        info!(
            source = ADEM_BOARD_SOURCE,
            postings = batch.postings.len(),
            skipped = batch.skipped_records,
            "board crawl finished"
        );
        Ok(SourceFetch::Fetched(batch))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    const PAGE_ONE: &str = r#"
        <div class="listing-item">
          <h3><a href="/display-job/1234/Chef-de-partie.html?searchId=abc#top">Chef de partie</a></h3>
          <div><span>Employeur:</span> <span>Hôtel Le Place</span></div>
          <div>Commune: Luxembourg-Ville</div>
        </div>
        <div class="listing-item">
          <h3><a href="/display-job/5678/Magasinier.html">  Magasinier  </a></h3>
          <div>Employeur: -</div>
          <div>Commune: Contern</div>
        </div>
        <div class="listing-item"><p>Sponsored block</p></div>
    "#;

    fn extractor() -> LabelExtractor {
        LabelExtractor::new(ADEM_LABELS).expect("labels")
    }

    #[test]
    fn fragment_items_become_postings() {
        let batch =
            parse_listing_fragment(PAGE_ONE, DEFAULT_BOARD_URL, &extractor(), ADEM_BOARD_SOURCE)
                .expect("parse");

        assert_eq!(batch.skipped_records, 1);
        assert_eq!(batch.postings.len(), 2);

        let chef = &batch.postings[0];
        assert_eq!(chef.title, "Chef de partie");
        assert_eq!(chef.external_id, "1234");
        assert_eq!(
            chef.source_url,
            "https://jobboard.adem.lu/display-job/1234/Chef-de-partie.html"
        );
        assert_eq!(chef.company.as_deref(), Some("Hôtel Le Place"));
        assert_eq!(chef.location.as_deref(), Some("Luxembourg-Ville"));

        let store = &batch.postings[1];
        assert_eq!(store.title, "Magasinier");
        assert_eq!(store.company, None, "a dash placeholder is not a company");
        assert_eq!(store.location.as_deref(), Some("Contern"));
    }

    #[test]
    fn label_table_is_data_driven() {
        let labels = [LabeledField {
            label: "Lieu de travail:",
            field: ListingField::Location,
        }];
        let extractor = LabelExtractor::new(&labels).expect("labels");
        let fields = extractor.extract("Poste\nLieu de travail:   Esch-sur-Alzette\nCDI");
        assert_eq!(
            fields.get(&ListingField::Location).map(String::as_str),
            Some("Esch-sur-Alzette")
        );
        assert!(!fields.contains_key(&ListingField::Company));
    }

    #[test]
    fn search_id_comes_from_the_redirect_url() {
        assert_eq!(
            extract_search_id("https://jobboard.adem.lu/search-results-jobs/?searchId=71%2E5&action=search"),
            Some("71.5".to_string())
        );
        assert_eq!(extract_search_id("https://jobboard.adem.lu/login?c=1"), None);
    }

    #[test]
    fn listing_request_encodes_the_search_id_once() {
        let search_id = extract_search_id(
            "https://jobboard.adem.lu/search-results-jobs/?searchId=71%2E5&action=search",
        )
        .expect("search id");
        let request = listing_request(
            &reqwest::Client::new(),
            "https://jobboard.adem.lu/ajax/",
            &search_id,
            "2",
        )
        .build()
        .expect("request");
        let query = request.url().query().unwrap_or_default();
        assert!(query.contains("searchId=71.5"), "{query}");
        assert!(!query.contains("%25"), "{query}");
        assert!(query.contains("page=2"));
    }

    #[test]
    fn empty_value_does_not_swallow_the_next_label() {
        let html = r#"
            <div class="listing-item">
              <a href="/display-job/42/Vendeur.html">Vendeur</a>
              <div>Employeur: </div>
              <div>Commune: Contern</div>
            </div>
        "#;
        let batch = parse_listing_fragment(html, DEFAULT_BOARD_URL, &extractor(), ADEM_BOARD_SOURCE)
            .expect("parse");
        let posting = &batch.postings[0];
        assert_eq!(posting.company, None);
        assert_eq!(posting.location.as_deref(), Some("Contern"));

        let fields = extractor().extract("Employeur: Cactus Commune: Bertrange");
        assert_eq!(
            fields.get(&ListingField::Company).map(String::as_str),
            Some("Cactus")
        );
    }

    #[test]
    fn detail_urls_are_canonical() {
        assert_eq!(
            canonical_detail_url("https://jobboard.adem.lu/", "/display-job/9/x.html?a=1#b"),
            Some("https://jobboard.adem.lu/display-job/9/x.html".to_string())
        );
        assert_eq!(
            canonical_detail_url("https://jobboard.adem.lu", "https://other.lu/display-job/3"),
            Some("https://other.lu/display-job/3".to_string())
        );
    }

    struct ScriptedSession {
        pages: VecDeque<Result<Option<String>, AdapterError>>,
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl CrawlSession for ScriptedSession {
        async fn next_page(&mut self) -> Result<Option<String>, AdapterError> {
            self.pages.pop_front().unwrap_or(Ok(None))
        }

        async fn close(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    struct ScriptedConnector {
        configured: bool,
        login_fails: bool,
        pages: std::sync::Mutex<Option<VecDeque<Result<Option<String>, AdapterError>>>>,
        closed: Arc<AtomicBool>,
    }

    impl ScriptedConnector {
        fn new(pages: Vec<Result<Option<String>, AdapterError>>) -> Self {
            Self {
                configured: true,
                login_fails: false,
                pages: std::sync::Mutex::new(Some(pages.into())),
                closed: Arc::new(AtomicBool::new(false)),
            }
        }
    }

    #[async_trait]
    impl CrawlConnector for ScriptedConnector {
        fn is_configured(&self) -> bool {
            self.configured
        }

        fn base_url(&self) -> &str {
            DEFAULT_BOARD_URL
        }

        async fn open(&self) -> Result<Box<dyn CrawlSession>, AdapterError> {
            if self.login_fails {
                return Err(AdapterError::Authentication {
                    source_name: ADEM_BOARD_SOURCE.to_string(),
                    reason: "login returned status 401".to_string(),
                });
            }
            let pages = self.pages.lock().expect("lock").take().unwrap_or_default();
            Ok(Box::new(ScriptedSession {
                pages,
                closed: self.closed.clone(),
            }))
        }
    }

    fn page_failure() -> AdapterError {
        AdapterError::http(
            ADEM_BOARD_SOURCE,
            jobsync_storage::FetchError::HttpStatus {
                status: 502,
                url: "https://jobboard.adem.lu/ajax/".to_string(),
            },
        )
    }

    #[tokio::test]
    async fn mid_crawl_failure_keeps_earlier_pages_and_closes_session() {
        let connector = ScriptedConnector::new(vec![Ok(Some(PAGE_ONE.to_string())), Err(page_failure())]);
        let closed = connector.closed.clone();
        let adapter = BoardCrawlAdapter::new(connector, ADEM_LABELS).expect("adapter");

        let SourceFetch::Fetched(batch) = adapter.fetch().await.expect("fetch") else {
            panic!("expected fetched batch");
        };
        assert_eq!(batch.postings.len(), 2);
        assert!(closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn failure_on_first_page_is_an_error_and_still_closes() {
        let connector = ScriptedConnector::new(vec![Err(page_failure())]);
        let closed = connector.closed.clone();
        let adapter = BoardCrawlAdapter::new(connector, ADEM_LABELS).expect("adapter");

        assert!(matches!(adapter.fetch().await, Err(AdapterError::Http { .. })));
        assert!(closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn rejected_login_is_an_authentication_error() {
        let mut connector = ScriptedConnector::new(vec![]);
        connector.login_fails = true;
        let adapter = BoardCrawlAdapter::new(connector, ADEM_LABELS).expect("adapter");
        assert!(matches!(
            adapter.fetch().await,
            Err(AdapterError::Authentication { .. })
        ));
    }

    #[tokio::test]
    async fn unconfigured_board_is_disabled() {
        let adapter = BoardCrawlAdapter::new(
            AdemBoardConnector::new(AdemBoardConfig::default()),
            ADEM_LABELS,
        )
        .expect("adapter");
        assert!(matches!(
            adapter.fetch().await,
            Ok(SourceFetch::Disabled { .. })
        ));
    }
}
