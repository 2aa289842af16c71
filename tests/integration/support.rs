//! Shared fixtures for the integration tests
//!
//! The scripted components here stand in for the HTTP stack so the engine
//! scenarios run without a network; the selector specs and page builders
//! produce markup the real extractor reads in the wiremock tests.

use async_trait::async_trait;
use chrono::Utc;
use souk_scrape::checkpoint::CheckpointLog;
use souk_scrape::config::{CategoryEntry, Config, EngineConfig, IdentityConfig, OutputConfig};
use souk_scrape::engine::{Engine, Session};
use souk_scrape::extract::{ExtractError, Extractor, Record, SelectorSpec};
use souk_scrape::fetch::{FetchError, FetchedPage, Fetcher};
use souk_scrape::output::{OutputResult, RecordSink, RunSummary};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use url::Url;

/// Serves canned bodies keyed by exact URL; anything else gets a 404.
///
/// Every fetch is recorded so tests can assert which pages were actually
/// requested, and how often.
pub struct StubFetcher {
    pages: HashMap<String, (u16, String)>,
    hits: Mutex<Vec<String>>,
}

impl StubFetcher {
    pub fn serving(pages: Vec<(&str, u16, String)>) -> Self {
        Self {
            pages: pages
                .into_iter()
                .map(|(url, status, body)| (url.to_string(), (status, body)))
                .collect(),
            hits: Mutex::new(Vec::new()),
        }
    }

    /// URLs fetched so far, in request order
    pub fn fetched(&self) -> Vec<String> {
        self.hits.lock().unwrap().clone()
    }
}

#[async_trait]
impl Fetcher for StubFetcher {
    async fn fetch(&self, _session: &Session, url: &Url) -> Result<FetchedPage, FetchError> {
        self.hits.lock().unwrap().push(url.to_string());
        let (status, body) = self
            .pages
            .get(url.as_str())
            .cloned()
            .unwrap_or((404, String::new()));
        Ok(FetchedPage {
            final_url: url.to_string(),
            status,
            content_type: Some("text/html".to_string()),
            body,
            elapsed: Duration::from_millis(30),
        })
    }
}

/// Reads the record count from a "records:N;" marker in the body
pub struct MarkerExtractor;

impl Extractor for MarkerExtractor {
    fn extract(&self, body: &str, page_url: &Url) -> Result<Vec<Record>, ExtractError> {
        let count = body
            .split("records:")
            .nth(1)
            .and_then(|rest| rest.split(';').next())
            .and_then(|n| n.parse::<usize>().ok())
            .unwrap_or(0);
        Ok((0..count)
            .map(|i| Record {
                title: format!("Item {}", i),
                price: "120".to_string(),
                condition: "Used".to_string(),
                description: String::new(),
                posted_at: "N/A".to_string(),
                url: page_url.to_string(),
                captured_at: Utc::now(),
            })
            .collect())
    }
}

/// Sink that keeps records in memory
#[derive(Default)]
pub struct MemorySink {
    records: Mutex<Vec<Record>>,
}

impl MemorySink {
    pub fn count(&self) -> usize {
        self.records.lock().unwrap().len()
    }
}

impl RecordSink for MemorySink {
    fn write(&self, record: &Record) -> OutputResult<()> {
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }

    fn flush(&self) -> OutputResult<()> {
        Ok(())
    }
}

/// Filler that keeps bodies over the thin-page threshold
pub fn page_chrome() -> String {
    "<nav class=\"site\">categories account saved-searches help</nav>".repeat(16)
}

/// Body carrying a marker the [`MarkerExtractor`] turns into `records` records
pub fn marker_body(records: usize) -> String {
    format!(
        "<html><body>records:{};{}</body></html>",
        records,
        page_chrome()
    )
}

/// One listing card in the markup the wiremock tests serve
pub fn listing_card(title: &str, price: &str) -> String {
    format!(
        r#"<article class="listing">
            <a class="item-link" href="/item/{}"><h2 class="title">{}</h2></a>
            <span class="price">{}</span>
        </article>"#,
        title.len(),
        title,
        price
    )
}

/// Full listing page around the given cards
pub fn listing_page(cards: &[String]) -> String {
    format!(
        "<html><body>{}{}</body></html>",
        cards.join("\n"),
        page_chrome()
    )
}

/// Listing page past the end of a category: chrome but zero cards
pub fn empty_listing_page() -> String {
    format!(
        "<html><body><div class=\"no-results\">Nothing matched</div>{}</body></html>",
        page_chrome()
    )
}

/// Selectors matching the markup [`listing_card`] produces
pub fn listing_selectors() -> SelectorSpec {
    SelectorSpec {
        card: "article.listing".to_string(),
        title: "h2.title".to_string(),
        price: Some("span.price".to_string()),
        condition: None,
        description: None,
        posted_at: None,
        link: Some("a.item-link".to_string()),
    }
}

pub fn category(id: &str, url: &str, selectors: SelectorSpec) -> CategoryEntry {
    CategoryEntry {
        id: id.to_string(),
        url: url.to_string(),
        page_param: "page".to_string(),
        selectors,
    }
}

/// Config with short delays so tests finish quickly; paths live in `dir`
pub fn test_config(dir: &Path, categories: Vec<CategoryEntry>) -> Config {
    Config {
        engine: EngineConfig {
            workers: 2,
            base_delay_ms: 25,
            min_delay_ms: 25,
            max_delay_ms: 400,
            retry_backoff_ms: 25,
            session_pool_size: 2,
            queue_capacity: 8,
            ..EngineConfig::default()
        },
        identity: IdentityConfig::default(),
        output: OutputConfig {
            csv_path: dir.join("out.csv").to_string_lossy().into_owned(),
            checkpoint_path: dir.join("progress.jsonl").to_string_lossy().into_owned(),
        },
        categories,
    }
}

/// Assembles an engine over scripted components, opening the checkpoint
/// log at the config's path
pub fn build_engine(
    config: &Config,
    fetcher: Arc<dyn Fetcher>,
    sink: Arc<MemorySink>,
) -> Engine {
    let (checkpoint, _) =
        CheckpointLog::open(Path::new(&config.output.checkpoint_path), "test-hash").unwrap();
    let mut extractors: HashMap<String, Arc<dyn Extractor>> = HashMap::new();
    for cat in &config.categories {
        extractors.insert(cat.id.clone(), Arc::new(MarkerExtractor));
    }
    Engine::new(
        config,
        fetcher,
        extractors,
        sink as Arc<dyn RecordSink>,
        Arc::new(checkpoint),
    )
    .unwrap()
}

/// Runs the engine without ever raising the stop flag
pub async fn run_to_end(engine: Engine) -> RunSummary {
    let (_stop_tx, stop_rx) = watch::channel(false);
    engine.run(stop_rx).await.unwrap()
}
