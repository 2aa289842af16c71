//! End-to-end scrapes against wiremock servers
//!
//! These go through `run_scrape`, the same assembly the binary uses: real
//! HTTP sessions, the CSS extractor configured per category, the CSV sink,
//! and the checkpoint log. Request counts are enforced with wiremock
//! expectations, verified when each mock server drops.

use crate::support::{
    category, empty_listing_page, listing_card, listing_page, listing_selectors, page_chrome,
    test_config,
};
use souk_scrape::checkpoint::read_summary;
use souk_scrape::config::{Config, IdentityConfig};
use souk_scrape::engine::run_scrape;
use souk_scrape::output::RunSummary;
use std::path::Path;
use std::time::Duration;
use tokio::sync::watch;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn scrape(config: &Config) -> RunSummary {
    let (_stop_tx, stop_rx) = watch::channel(false);
    run_scrape(config, "it-hash", stop_rx).await.unwrap()
}

fn html_response(body: String) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .set_body_string(body)
        .insert_header("content-type", "text/html; charset=utf-8")
}

#[tokio::test]
async fn test_scrape_writes_rows_and_checkpoint() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    // Three pages: two with cards, then the empty page that ends the walk.
    // Most specific matchers are mounted first; the bare path catches the
    // un-paginated first page.
    Mock::given(method("GET"))
        .and(path("/laptops"))
        .and(query_param("page", "3"))
        .respond_with(html_response(empty_listing_page()))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/laptops"))
        .and(query_param("page", "2"))
        .respond_with(html_response(listing_page(&[listing_card(
            "Galaxy S21",
            "2 900 DH",
        )])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/laptops"))
        .respond_with(html_response(listing_page(&[
            listing_card("ThinkPad T14", "3 500 DH"),
            listing_card("Dell XPS 13", "4 200 DH"),
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let base = format!("{}/laptops", server.uri());
    let config = test_config(
        dir.path(),
        vec![category("laptops", &base, listing_selectors())],
    );

    let summary = scrape(&config).await;

    assert!(!summary.cancelled);
    assert_eq!(summary.categories["laptops"].done, 3);
    assert_eq!(summary.categories["laptops"].failed, 0);
    assert_eq!(summary.categories["laptops"].records, 3);

    // Header plus one row per record, fields quoted, links made absolute
    let csv = std::fs::read_to_string(&config.output.csv_path).unwrap();
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines.len(), 4);
    assert_eq!(
        lines[0],
        "\"Title\",\"Price\",\"Condition\",\"Description\",\"Post Date\",\"URL\",\"Scraped at\""
    );
    assert!(csv.contains("\"ThinkPad T14\""));
    assert!(csv.contains("\"Galaxy S21\""));
    assert!(csv.contains("\"3 500 DH\""));
    assert!(csv.contains(&format!("\"{}/item/", server.uri())));

    let (on_disk, report) = read_summary(Path::new(&config.output.checkpoint_path)).unwrap();
    assert_eq!(report.done_jobs, 3);
    assert_eq!(on_disk.categories["laptops"].records, 3);
}

#[tokio::test]
async fn test_finished_run_is_not_refetched() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    // Each page may be served exactly once across BOTH runs
    Mock::given(method("GET"))
        .and(path("/phones"))
        .and(query_param("page", "2"))
        .respond_with(html_response(empty_listing_page()))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/phones"))
        .respond_with(html_response(listing_page(&[listing_card(
            "Pixel 7",
            "3 100 DH",
        )])))
        .expect(1)
        .mount(&server)
        .await;

    let base = format!("{}/phones", server.uri());
    let config = test_config(
        dir.path(),
        vec![category("phones", &base, listing_selectors())],
    );

    let first = scrape(&config).await;
    assert_eq!(first.categories["phones"].done, 2);
    assert_eq!(first.categories["phones"].records, 1);
    let csv_after_first = std::fs::read_to_string(&config.output.csv_path).unwrap();

    let second = scrape(&config).await;
    assert_eq!(second.total_done(), 0);
    assert!(second.categories.is_empty());

    // No new rows, no second header
    let csv_after_second = std::fs::read_to_string(&config.output.csv_path).unwrap();
    assert_eq!(csv_after_first, csv_after_second);
}

#[tokio::test]
async fn test_throttled_page_recovers_after_backoff() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    // The first hit on page 1 throttles; the retry gets the real page
    Mock::given(method("GET"))
        .and(path("/laptops"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/laptops"))
        .and(query_param("page", "2"))
        .respond_with(html_response(empty_listing_page()))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/laptops"))
        .respond_with(html_response(listing_page(&[listing_card(
            "ThinkPad T14",
            "3 500 DH",
        )])))
        .expect(1)
        .mount(&server)
        .await;

    let base = format!("{}/laptops", server.uri());
    let config = test_config(
        dir.path(),
        vec![category("laptops", &base, listing_selectors())],
    );

    let summary = scrape(&config).await;

    assert_eq!(summary.categories["laptops"].done, 2);
    assert_eq!(summary.categories["laptops"].failed, 0);
    assert_eq!(summary.categories["laptops"].records, 1);
}

#[tokio::test]
async fn test_slow_page_times_out_and_is_retried() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    // The first response takes longer than the request deadline; the
    // retry is served immediately
    Mock::given(method("GET"))
        .and(path("/laptops"))
        .respond_with(
            html_response(listing_page(&[listing_card("ThinkPad T14", "3 500 DH")]))
                .set_delay(Duration::from_millis(1500)),
        )
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/laptops"))
        .and(query_param("page", "2"))
        .respond_with(html_response(empty_listing_page()))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/laptops"))
        .respond_with(html_response(listing_page(&[listing_card(
            "ThinkPad T14",
            "3 500 DH",
        )])))
        .expect(1)
        .mount(&server)
        .await;

    let base = format!("{}/laptops", server.uri());
    let mut config = test_config(
        dir.path(),
        vec![category("laptops", &base, listing_selectors())],
    );
    config.engine.request_timeout_secs = 1;

    let summary = scrape(&config).await;

    assert_eq!(summary.categories["laptops"].done, 2);
    assert_eq!(summary.categories["laptops"].failed, 0);
    assert_eq!(summary.categories["laptops"].records, 1);
}

#[tokio::test]
async fn test_challenge_page_counts_as_block() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    // A 200 wrapping a verification wall is a block, not content
    let challenge = format!(
        "<html><body><h1>Are you human?</h1><p>Complete the check to continue.</p>{}</body></html>",
        page_chrome()
    );
    Mock::given(method("GET"))
        .and(path("/laptops"))
        .respond_with(html_response(challenge))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/laptops"))
        .and(query_param("page", "2"))
        .respond_with(html_response(empty_listing_page()))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/laptops"))
        .respond_with(html_response(listing_page(&[listing_card(
            "MacBook Air",
            "8 000 DH",
        )])))
        .expect(1)
        .mount(&server)
        .await;

    let base = format!("{}/laptops", server.uri());
    let config = test_config(
        dir.path(),
        vec![category("laptops", &base, listing_selectors())],
    );

    let summary = scrape(&config).await;

    assert_eq!(summary.categories["laptops"].done, 2);
    assert_eq!(summary.categories["laptops"].failed, 0);
    assert_eq!(summary.categories["laptops"].records, 1);
}

#[tokio::test]
async fn test_hard_failure_mid_category_moves_on() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    // Page 2 is gone for good; exactly one request, no retries, and the
    // category continues past it
    Mock::given(method("GET"))
        .and(path("/laptops"))
        .and(query_param("page", "4"))
        .respond_with(html_response(empty_listing_page()))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/laptops"))
        .and(query_param("page", "3"))
        .respond_with(html_response(listing_page(&[listing_card(
            "ThinkPad X1",
            "6 400 DH",
        )])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/laptops"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/laptops"))
        .respond_with(html_response(listing_page(&[
            listing_card("ThinkPad T14", "3 500 DH"),
            listing_card("Dell XPS 13", "4 200 DH"),
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let base = format!("{}/laptops", server.uri());
    let config = test_config(
        dir.path(),
        vec![category("laptops", &base, listing_selectors())],
    );

    let summary = scrape(&config).await;

    assert_eq!(summary.categories["laptops"].done, 3);
    assert_eq!(summary.categories["laptops"].failed, 1);
    assert_eq!(summary.categories["laptops"].records, 3);

    let (_, report) = read_summary(Path::new(&config.output.checkpoint_path)).unwrap();
    assert_eq!(report.done_jobs, 3);
    assert_eq!(report.failed_jobs, 1);
}

#[tokio::test]
async fn test_unreadable_first_page_aborts_category() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    // Cards are present but none has a title the selectors can read: the
    // site's markup changed, and probing deeper would be pointless
    let broken = format!(
        "<html><body>\
         <article class=\"listing\"><span class=\"price\">9 DH</span></article>\
         <article class=\"listing\"><span class=\"price\">12 DH</span></article>\
         {}</body></html>",
        page_chrome()
    );
    Mock::given(method("GET"))
        .and(path("/laptops"))
        .and(query_param("page", "2"))
        .respond_with(html_response(empty_listing_page()))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/laptops"))
        .respond_with(html_response(broken))
        .expect(1)
        .mount(&server)
        .await;

    let base = format!("{}/laptops", server.uri());
    let config = test_config(
        dir.path(),
        vec![category("laptops", &base, listing_selectors())],
    );

    let summary = scrape(&config).await;

    assert_eq!(summary.categories["laptops"].done, 0);
    assert_eq!(summary.categories["laptops"].failed, 1);

    // Nothing but the header made it to the CSV
    let csv = std::fs::read_to_string(&config.output.csv_path).unwrap();
    assert_eq!(csv.lines().count(), 1);
}

#[tokio::test]
async fn test_requests_carry_configured_identity() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    // wiremock compares header values after splitting them at commas, so
    // the identity under test sticks to comma-free values
    let agent = "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0";
    let language = "fr-MA";

    // The mock only matches requests presenting the configured identity;
    // a bare request would fall through to a 404 and fail the category
    Mock::given(method("GET"))
        .and(path("/laptops"))
        .and(header("user-agent", agent))
        .and(header("accept-language", language))
        .and(header("dnt", "1"))
        .respond_with(html_response(empty_listing_page()))
        .expect(1)
        .mount(&server)
        .await;

    let base = format!("{}/laptops", server.uri());
    let mut config = test_config(
        dir.path(),
        vec![category("laptops", &base, listing_selectors())],
    );
    config.identity = IdentityConfig {
        user_agents: vec![agent.to_string()],
        accept_language: language.to_string(),
        proxies: Vec::new(),
    };

    let summary = scrape(&config).await;

    assert_eq!(summary.categories["laptops"].done, 1);
    assert_eq!(summary.categories["laptops"].failed, 0);
}
