//! Source adapter contracts + careers-page adapter implementations.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info_span, Instrument};

pub const CRATE_NAME: &str = "jobwatch-adapters";

pub const CAPGEMINI_SELECTOR: &str = "div.table-td.table-title";

/// Screen-reader label rendered inside every Capgemini title cell.
pub const CAPGEMINI_LABELS: &[&str] = &["Nazwa stanowiska"];

/// Capgemini titles glue their text nodes together, matching history already recorded for it.
pub const CAPGEMINI_TEXT_SEPARATOR: &str = "";

pub const DEFAULT_TEXT_SEPARATOR: &str = " ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AdapterKind {
    Capgemini,
    HtmlSelector,
    HtmlFile,
}

impl fmt::Display for AdapterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AdapterKind::Capgemini => "capgemini",
            AdapterKind::HtmlSelector => "html-selector",
            AdapterKind::HtmlFile => "html-file",
        };
        f.write_str(name)
    }
}

/// One monitored careers page, as listed in the source registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Stable key recorded with every observation.
    pub source_id: String,
    pub display_name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub adapter: AdapterKind,
    /// Page URL, or a filesystem path for `html-file`.
    pub listing_url: String,
    #[serde(default)]
    pub selector: Option<String>,
    #[serde(default)]
    pub strip_text: Vec<String>,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("building http client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("reading {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid selector {selector:?}: {message}")]
    Selector { selector: String, message: String },
    #[error("source {source_id} uses adapter {kind} but has no selector")]
    MissingSelector { source_id: String, kind: AdapterKind },
    #[error("selector {selector:?} matched no positions at {url}")]
    NoPositions { selector: String, url: String },
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: Some("jobwatch-bot/0.1".to_string()),
        }
    }
}

/// Plain HTTP page fetcher. Each call is a single attempt.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> Result<Self, FetchError> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().map_err(FetchError::Client)?;
        Ok(Self { client })
    }

    pub async fn fetch_text(&self, source_id: &str, url: &str) -> Result<String, FetchError> {
        let span = info_span!("http_fetch", source_id, url);
        async {
            let resp = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|source| FetchError::Request {
                    url: url.to_string(),
                    source,
                })?;

            let status = resp.status();
            if !status.is_success() {
                return Err(FetchError::HttpStatus {
                    status: status.as_u16(),
                    url: resp.url().to_string(),
                });
            }

            let body = resp.text().await.map_err(|source| FetchError::Request {
                url: url.to_string(),
                source,
            })?;
            debug!(bytes = body.len(), "fetched listing page");
            Ok::<String, FetchError>(body)
        }
        .instrument(span)
        .await
    }
}

/// Produces the current list of position titles for one source.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn kind(&self) -> AdapterKind;

    /// Titles in page order. Duplicates are passed through untouched.
    async fn fetch_positions(&self, source: &SourceConfig) -> Result<Vec<String>, FetchError>;
}

/// Selector and label rules applied to one listing page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingRules {
    pub selector: String,
    pub strip_text: Vec<String>,
    /// Placed between the trimmed text nodes of one element.
    pub text_separator: &'static str,
}

impl ListingRules {
    /// Config values win over adapter defaults; built-in labels are always stripped.
    fn resolve(
        kind: AdapterKind,
        source: &SourceConfig,
        default_selector: Option<&str>,
        built_in_labels: &[&str],
        text_separator: &'static str,
    ) -> Result<Self, FetchError> {
        let selector = source
            .selector
            .as_deref()
            .or(default_selector)
            .ok_or_else(|| FetchError::MissingSelector {
                source_id: source.source_id.clone(),
                kind,
            })?
            .to_string();

        let mut strip_text: Vec<String> = built_in_labels.iter().map(|s| s.to_string()).collect();
        for label in &source.strip_text {
            if !strip_text.contains(label) {
                strip_text.push(label.clone());
            }
        }

        Ok(Self {
            selector,
            strip_text,
            text_separator,
        })
    }

    /// A listing page with no matching titles did not render the expected layout.
    fn require_positions(
        &self,
        titles: Vec<String>,
        url: &str,
    ) -> Result<Vec<String>, FetchError> {
        if titles.is_empty() {
            return Err(FetchError::NoPositions {
                selector: self.selector.clone(),
                url: url.to_string(),
            });
        }
        Ok(titles)
    }
}

/// Extracts one title per element matched by `rules.selector`.
///
/// Text nodes are trimmed and joined with `rules.text_separator`, labels are
/// removed, and elements left empty are skipped.
pub fn parse_positions(html: &str, rules: &ListingRules) -> Result<Vec<String>, FetchError> {
    let selector = Selector::parse(&rules.selector).map_err(|e| FetchError::Selector {
        selector: rules.selector.clone(),
        message: e.to_string(),
    })?;
    let document = Html::parse_document(html);

    Ok(document
        .select(&selector)
        .filter_map(|node| {
            let joined = node
                .text()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
                .join(rules.text_separator);
            let stripped = rules
                .strip_text
                .iter()
                .fold(joined, |text, label| text.replace(label.as_str(), ""));
            let title = stripped.trim();
            if title.is_empty() {
                None
            } else {
                Some(title.to_string())
            }
        })
        .collect())
}

#[derive(Debug, Clone)]
struct HttpListingAdapter {
    kind: AdapterKind,
    http: Arc<HttpFetcher>,
    default_selector: Option<&'static str>,
    built_in_labels: &'static [&'static str],
    text_separator: &'static str,
}

#[derive(Debug, Clone, Copy)]
struct HtmlFileAdapter;

#[async_trait]
impl SourceAdapter for HttpListingAdapter {
    fn kind(&self) -> AdapterKind {
        self.kind
    }

    async fn fetch_positions(&self, source: &SourceConfig) -> Result<Vec<String>, FetchError> {
        let rules = ListingRules::resolve(
            self.kind,
            source,
            self.default_selector,
            self.built_in_labels,
            self.text_separator,
        )?;
        let html = self
            .http
            .fetch_text(&source.source_id, &source.listing_url)
            .await?;
        let titles = parse_positions(&html, &rules)?;
        rules.require_positions(titles, &source.listing_url)
    }
}

#[async_trait]
impl SourceAdapter for HtmlFileAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::HtmlFile
    }

    async fn fetch_positions(&self, source: &SourceConfig) -> Result<Vec<String>, FetchError> {
        let rules = ListingRules::resolve(
            AdapterKind::HtmlFile,
            source,
            None,
            &[],
            DEFAULT_TEXT_SEPARATOR,
        )?;
        let path = PathBuf::from(&source.listing_url);
        let html = fs::read_to_string(&path)
            .await
            .map_err(|source| FetchError::Read { path, source })?;
        let titles = parse_positions(&html, &rules)?;
        rules.require_positions(titles, &source.listing_url)
    }
}

pub fn capgemini_adapter(http: Arc<HttpFetcher>) -> impl SourceAdapter {
    HttpListingAdapter {
        kind: AdapterKind::Capgemini,
        http,
        default_selector: Some(CAPGEMINI_SELECTOR),
        built_in_labels: CAPGEMINI_LABELS,
        text_separator: CAPGEMINI_TEXT_SEPARATOR,
    }
}

pub fn html_selector_adapter(http: Arc<HttpFetcher>) -> impl SourceAdapter {
    HttpListingAdapter {
        kind: AdapterKind::HtmlSelector,
        http,
        default_selector: None,
        built_in_labels: &[],
        text_separator: DEFAULT_TEXT_SEPARATOR,
    }
}

pub fn html_file_adapter() -> impl SourceAdapter {
    HtmlFileAdapter
}

pub fn adapter_for_kind(kind: AdapterKind, http: Arc<HttpFetcher>) -> Box<dyn SourceAdapter> {
    match kind {
        AdapterKind::Capgemini => Box::new(capgemini_adapter(http)),
        AdapterKind::HtmlSelector => Box::new(html_selector_adapter(http)),
        AdapterKind::HtmlFile => Box::new(html_file_adapter()),
    }
}

/// Explicit mapping from source id to the adapter that scrapes it.
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: BTreeMap<String, Box<dyn SourceAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_sources<'a>(
        sources: impl IntoIterator<Item = &'a SourceConfig>,
        http: Arc<HttpFetcher>,
    ) -> Self {
        let mut registry = Self::new();
        for source in sources {
            registry.register(
                source.source_id.clone(),
                adapter_for_kind(source.adapter, Arc::clone(&http)),
            );
        }
        registry
    }

    pub fn register(&mut self, source_id: impl Into<String>, adapter: Box<dyn SourceAdapter>) {
        self.adapters.insert(source_id.into(), adapter);
    }

    pub fn get(&self, source_id: &str) -> Option<&dyn SourceAdapter> {
        self.adapters.get(source_id).map(|a| a.as_ref())
    }

    pub fn source_ids(&self) -> impl Iterator<Item = &str> {
        self.adapters.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const CAPGEMINI_PAGE: &str = r#"
        <html><body>
          <div class="table">
            <div class="table-tr">
              <div class="table-td table-title">
                <span class="sr-only">Nazwa stanowiska</span>
                <a href="/jobs/1">Java Developer</a>
              </div>
              <div class="table-td table-location">Warszawa</div>
            </div>
            <div class="table-tr">
              <div class="table-td table-title">
                <span class="sr-only">Nazwa stanowiska</span>
                <a href="/jobs/2">Senior <b>Data</b> Engineer</a>
              </div>
            </div>
            <div class="table-tr">
              <div class="table-td table-title">
                <span class="sr-only">Nazwa stanowiska</span>
                <a href="/jobs/3">Java Developer</a>
              </div>
            </div>
            <div class="table-tr">
              <div class="table-td table-title"><span class="sr-only">Nazwa stanowiska</span></div>
            </div>
          </div>
        </body></html>
    "#;

    fn source(kind: AdapterKind, url: &str, selector: Option<&str>) -> SourceConfig {
        SourceConfig {
            source_id: "acme".to_string(),
            display_name: "Acme".to_string(),
            enabled: true,
            adapter: kind,
            listing_url: url.to_string(),
            selector: selector.map(ToString::to_string),
            strip_text: Vec::new(),
        }
    }

    fn selector_rules(cfg: &SourceConfig) -> Result<ListingRules, FetchError> {
        ListingRules::resolve(AdapterKind::HtmlSelector, cfg, None, &[], DEFAULT_TEXT_SEPARATOR)
    }

    fn capgemini_rules() -> ListingRules {
        ListingRules::resolve(
            AdapterKind::Capgemini,
            &source(AdapterKind::Capgemini, "https://example.invalid", None),
            Some(CAPGEMINI_SELECTOR),
            CAPGEMINI_LABELS,
            CAPGEMINI_TEXT_SEPARATOR,
        )
        .unwrap()
    }

    #[test]
    fn capgemini_titles_drop_the_label_and_keep_duplicates() {
        let titles = parse_positions(CAPGEMINI_PAGE, &capgemini_rules()).unwrap();
        assert_eq!(
            titles,
            vec![
                "Java Developer".to_string(),
                "SeniorDataEngineer".to_string(),
                "Java Developer".to_string(),
            ]
        );
    }

    #[test]
    fn selector_rules_join_text_nodes_with_spaces() {
        let cfg = source(AdapterKind::HtmlSelector, "https://example.invalid", Some("li"));
        let rules = selector_rules(&cfg).unwrap();
        let titles =
            parse_positions("<ul><li>Senior <b>Data</b> Engineer</li></ul>", &rules).unwrap();
        assert_eq!(titles, vec!["Senior Data Engineer".to_string()]);
    }

    #[test]
    fn empty_listing_is_a_no_positions_error() {
        let rules = capgemini_rules();
        let shell = "<html><body><div id='app'></div><script src='app.js'></script></body></html>";
        let titles = parse_positions(shell, &rules).unwrap();
        assert!(titles.is_empty());

        let err = rules
            .require_positions(titles, "https://example.invalid/jobs")
            .unwrap_err();
        assert!(matches!(
            err,
            FetchError::NoPositions { ref selector, ref url }
                if selector == CAPGEMINI_SELECTOR && url == "https://example.invalid/jobs"
        ));
    }

    #[tokio::test]
    async fn html_file_adapter_rejects_listing_without_matches() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("listing.html");
        std::fs::write(&path, "<ol><li class='closed'>Nothing open</li></ol>").unwrap();

        let cfg = source(AdapterKind::HtmlFile, path.to_str().unwrap(), Some("li.job"));
        let err = html_file_adapter().fetch_positions(&cfg).await.unwrap_err();
        assert!(matches!(err, FetchError::NoPositions { .. }));
        assert!(err.to_string().contains("li.job"));
    }

    #[test]
    fn configured_selector_overrides_default() {
        let cfg = source(
            AdapterKind::Capgemini,
            "https://example.invalid",
            Some("div.table-location"),
        );
        let rules = ListingRules::resolve(
            AdapterKind::Capgemini,
            &cfg,
            Some(CAPGEMINI_SELECTOR),
            CAPGEMINI_LABELS,
            CAPGEMINI_TEXT_SEPARATOR,
        )
        .unwrap();
        assert_eq!(rules.selector, "div.table-location");
        assert_eq!(rules.strip_text, vec!["Nazwa stanowiska".to_string()]);
    }

    #[test]
    fn configured_labels_are_stripped_once() {
        let mut cfg = source(AdapterKind::HtmlSelector, "https://example.invalid", Some("li"));
        cfg.strip_text = vec!["NEW:".to_string(), "NEW:".to_string()];
        let rules = selector_rules(&cfg).unwrap();
        assert_eq!(rules.strip_text.len(), 1);
        let titles =
            parse_positions("<ul><li>NEW: Tester</li><li>Analyst</li></ul>", &rules).unwrap();
        assert_eq!(titles, vec!["Tester".to_string(), "Analyst".to_string()]);
    }

    #[test]
    fn selector_adapter_requires_a_selector() {
        let cfg = source(AdapterKind::HtmlSelector, "https://example.invalid", None);
        let err = selector_rules(&cfg).unwrap_err();
        assert!(matches!(err, FetchError::MissingSelector { .. }));
        assert!(err.to_string().contains("html-selector"));
    }

    #[test]
    fn malformed_selector_is_a_fetch_error() {
        let rules = ListingRules {
            selector: "div[".to_string(),
            strip_text: Vec::new(),
            text_separator: DEFAULT_TEXT_SEPARATOR,
        };
        let err = parse_positions("<div>x</div>", &rules).unwrap_err();
        assert!(matches!(err, FetchError::Selector { .. }));
    }

    #[tokio::test]
    async fn html_file_adapter_reads_local_listing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("listing.html");
        std::fs::write(
            &path,
            "<ol><li class='job'>Engineer</li><li class='job'>Analyst</li></ol>",
        )
        .unwrap();

        let adapter = html_file_adapter();
        let cfg = source(AdapterKind::HtmlFile, path.to_str().unwrap(), Some("li.job"));
        let titles = adapter.fetch_positions(&cfg).await.unwrap();
        assert_eq!(titles, vec!["Engineer".to_string(), "Analyst".to_string()]);
        assert_eq!(adapter.kind(), AdapterKind::HtmlFile);
    }

    #[tokio::test]
    async fn missing_listing_file_is_a_fetch_error() {
        let dir = tempdir().unwrap();
        let cfg = source(
            AdapterKind::HtmlFile,
            dir.path().join("gone.html").to_str().unwrap(),
            Some("li"),
        );
        let err = html_file_adapter().fetch_positions(&cfg).await.unwrap_err();
        assert!(matches!(err, FetchError::Read { .. }));
    }

    #[test]
    fn registry_maps_each_source_to_its_adapter_kind() {
        let http = Arc::new(HttpFetcher::new(HttpClientConfig::default()).unwrap());
        let mut capgemini = source(AdapterKind::Capgemini, "https://example.invalid", None);
        capgemini.source_id = "Capgemini".to_string();
        let mut local = source(AdapterKind::HtmlFile, "listing.html", Some("li"));
        local.source_id = "local".to_string();

        assert!(AdapterRegistry::new().is_empty());
        let registry = AdapterRegistry::for_sources([&capgemini, &local], http);
        assert!(!registry.is_empty());
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get("Capgemini").unwrap().kind(), AdapterKind::Capgemini);
        assert_eq!(registry.get("local").unwrap().kind(), AdapterKind::HtmlFile);
        assert!(registry.get("unknown").is_none());
        assert_eq!(registry.source_ids().collect::<Vec<_>>(), vec!["Capgemini", "local"]);
    }

    #[test]
    fn source_config_deserializes_kebab_case_kinds() {
        let cfg: SourceConfig = serde_json::from_str(
            r#"{"source_id":"Capgemini","display_name":"Capgemini","adapter":"capgemini","listing_url":"https://example.invalid"}"#,
        )
        .unwrap();
        assert!(cfg.enabled);
        assert_eq!(cfg.adapter, AdapterKind::Capgemini);
        assert!(cfg.selector.is_none());
        assert!(cfg.strip_text.is_empty());
    }
}
