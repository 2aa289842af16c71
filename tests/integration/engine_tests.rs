//! Engine scenarios over scripted components
//!
//! These run the full controller/worker machinery with a stub fetcher on
//! tokio's paused clock, so pacing delays and retry backoffs cost no wall
//! time. The checkpoint log and its replay are real files throughout.

use crate::support::{
    build_engine, category, marker_body, listing_selectors, run_to_end, MemorySink, StubFetcher,
};
use async_trait::async_trait;
use souk_scrape::checkpoint::{read_summary, CheckpointLog};
use souk_scrape::engine::Session;
use souk_scrape::fetch::{FetchError, FetchedPage, Fetcher};
use souk_scrape::state::JobId;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use url::Url;

#[tokio::test(start_paused = true)]
async fn test_multi_category_run_to_completion() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = crate::support::test_config(
        dir.path(),
        vec![
            category("laptops", "https://market.test/laptops", listing_selectors()),
            category("phones", "https://market.test/phones", listing_selectors()),
        ],
    );
    config.engine.workers = 3;
    config.engine.max_pages = 10;

    // Three full pages per category, then the empty page that ends it
    let fetcher = Arc::new(StubFetcher::serving(vec![
        ("https://market.test/laptops", 200, marker_body(5)),
        ("https://market.test/laptops?page=2", 200, marker_body(5)),
        ("https://market.test/laptops?page=3", 200, marker_body(5)),
        ("https://market.test/laptops?page=4", 200, marker_body(0)),
        ("https://market.test/phones", 200, marker_body(5)),
        ("https://market.test/phones?page=2", 200, marker_body(5)),
        ("https://market.test/phones?page=3", 200, marker_body(5)),
        ("https://market.test/phones?page=4", 200, marker_body(0)),
    ]));
    let sink = Arc::new(MemorySink::default());
    let engine = build_engine(&config, fetcher.clone(), sink.clone());

    let summary = run_to_end(engine).await;

    assert!(!summary.cancelled);
    assert_eq!(summary.categories["laptops"].done, 4);
    assert_eq!(summary.categories["laptops"].records, 15);
    assert_eq!(summary.categories["phones"].done, 4);
    assert_eq!(summary.categories["phones"].records, 15);
    assert_eq!(summary.total_failed(), 0);
    assert_eq!(sink.count(), 30);
    // Nothing past the empty pages was probed
    assert_eq!(fetcher.fetched().len(), 8);

    // The checkpoint log on disk tells the same story: six content pages
    // and two empty-page terminations
    let (on_disk, report) =
        read_summary(Path::new(&config.output.checkpoint_path)).unwrap();
    assert_eq!(report.done_jobs, 8);
    assert_eq!(report.failed_jobs, 0);
    assert_eq!(on_disk.total_records(), 30);
}

#[tokio::test(start_paused = true)]
async fn test_resume_skips_checkpointed_pages() {
    let dir = tempfile::tempdir().unwrap();
    let config = crate::support::test_config(
        dir.path(),
        vec![
            category("laptops", "https://market.test/laptops", listing_selectors()),
            category("phones", "https://market.test/phones", listing_selectors()),
        ],
    );

    // A previous run finished laptops outright and got three pages into
    // phones before dying
    {
        let (log, _) =
            CheckpointLog::open(Path::new(&config.output.checkpoint_path), "test-hash").unwrap();
        log.mark_done(&JobId::new("laptops", 1, "https://market.test/laptops"), 5)
            .unwrap();
        log.mark_done(
            &JobId::new("laptops", 2, "https://market.test/laptops?page=2"),
            5,
        )
        .unwrap();
        log.mark_empty(&JobId::new(
            "laptops",
            3,
            "https://market.test/laptops?page=3",
        ))
        .unwrap();
        log.mark_done(&JobId::new("phones", 1, "https://market.test/phones"), 5)
            .unwrap();
        log.mark_done(
            &JobId::new("phones", 2, "https://market.test/phones?page=2"),
            5,
        )
        .unwrap();
        log.mark_done(
            &JobId::new("phones", 3, "https://market.test/phones?page=3"),
            5,
        )
        .unwrap();
    }

    let fetcher = Arc::new(StubFetcher::serving(vec![
        ("https://market.test/phones?page=4", 200, marker_body(4)),
        ("https://market.test/phones?page=5", 200, marker_body(0)),
    ]));
    let sink = Arc::new(MemorySink::default());
    let engine = build_engine(&config, fetcher.clone(), sink.clone());

    let summary = run_to_end(engine).await;

    // Pages 1 through 3 of phones never hit the network again; the run
    // picks up at page 4 and stops at the empty page 5
    assert_eq!(
        fetcher.fetched(),
        vec![
            "https://market.test/phones?page=4".to_string(),
            "https://market.test/phones?page=5".to_string(),
        ]
    );
    assert!(!summary.categories.contains_key("laptops"));
    assert_eq!(summary.categories["phones"].done, 2);
    assert_eq!(summary.categories["phones"].records, 4);
    assert_eq!(sink.count(), 4);

    // The log now covers both runs
    let (on_disk, _) = read_summary(Path::new(&config.output.checkpoint_path)).unwrap();
    assert_eq!(on_disk.categories["laptops"].done, 3);
    assert_eq!(on_disk.categories["laptops"].records, 10);
    assert_eq!(on_disk.categories["phones"].done, 5);
    assert_eq!(on_disk.categories["phones"].records, 19);
}

/// Raises the stop flag while the n-th fetch is in flight
struct FlipStop {
    inner: Arc<StubFetcher>,
    stop: watch::Sender<bool>,
    at: usize,
    seen: AtomicUsize,
}

#[async_trait]
impl Fetcher for FlipStop {
    async fn fetch(&self, session: &Session, url: &Url) -> Result<FetchedPage, FetchError> {
        if self.seen.fetch_add(1, Ordering::SeqCst) + 1 == self.at {
            let _ = self.stop.send(true);
        }
        self.inner.fetch(session, url).await
    }
}

#[tokio::test(start_paused = true)]
async fn test_stop_flag_preserves_progress_for_next_run() {
    let dir = tempfile::tempdir().unwrap();
    let pages = || {
        vec![
            ("https://market.test/laptops", 200, marker_body(2)),
            ("https://market.test/laptops?page=2", 200, marker_body(2)),
            ("https://market.test/laptops?page=3", 200, marker_body(2)),
            ("https://market.test/laptops?page=4", 200, marker_body(2)),
            ("https://market.test/laptops?page=5", 200, marker_body(0)),
        ]
    };
    let config = crate::support::test_config(
        dir.path(),
        vec![category("laptops", "https://market.test/laptops", listing_selectors())],
    );

    // First run: the stop flag goes up while page 2 is being fetched. The
    // in-flight page still completes and is checkpointed; page 3 is never
    // requested.
    let inner = Arc::new(StubFetcher::serving(pages()));
    let (stop_tx, stop_rx) = watch::channel(false);
    let fetcher = Arc::new(FlipStop {
        inner: inner.clone(),
        stop: stop_tx,
        at: 2,
        seen: AtomicUsize::new(0),
    });
    let sink = Arc::new(MemorySink::default());
    let engine = build_engine(&config, fetcher, sink.clone());

    let first = engine.run(stop_rx).await.unwrap();

    assert!(first.cancelled);
    assert_eq!(first.categories["laptops"].done, 2);
    assert_eq!(first.categories["laptops"].records, 4);
    assert_eq!(
        inner.fetched(),
        vec![
            "https://market.test/laptops".to_string(),
            "https://market.test/laptops?page=2".to_string(),
        ]
    );

    // Second run: picks up exactly where the first left off
    let fetcher = Arc::new(StubFetcher::serving(pages()));
    let sink = Arc::new(MemorySink::default());
    let engine = build_engine(&config, fetcher.clone(), sink.clone());

    let second = run_to_end(engine).await;

    assert!(!second.cancelled);
    assert_eq!(
        fetcher.fetched(),
        vec![
            "https://market.test/laptops?page=3".to_string(),
            "https://market.test/laptops?page=4".to_string(),
            "https://market.test/laptops?page=5".to_string(),
        ]
    );
    assert_eq!(second.categories["laptops"].done, 3);
    assert_eq!(second.categories["laptops"].records, 4);

    // Across both runs every page was fetched exactly once
    let (on_disk, report) =
        read_summary(Path::new(&config.output.checkpoint_path)).unwrap();
    assert_eq!(report.done_jobs, 5);
    assert_eq!(on_disk.categories["laptops"].records, 8);
}

#[tokio::test(start_paused = true)]
async fn test_failure_past_first_page_wastes_one_page() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = crate::support::test_config(
        dir.path(),
        vec![category("laptops", "https://market.test/laptops", listing_selectors())],
    );
    config.engine.max_attempts = 2;

    // Page 2 throttles on every attempt; the category moves past it after
    // the attempts run out
    let fetcher = Arc::new(StubFetcher::serving(vec![
        ("https://market.test/laptops", 200, marker_body(3)),
        ("https://market.test/laptops?page=2", 429, String::new()),
        ("https://market.test/laptops?page=3", 200, marker_body(2)),
        ("https://market.test/laptops?page=4", 200, marker_body(0)),
    ]));
    let sink = Arc::new(MemorySink::default());
    let engine = build_engine(&config, fetcher.clone(), sink.clone());

    let summary = run_to_end(engine).await;

    assert_eq!(summary.categories["laptops"].done, 3);
    assert_eq!(summary.categories["laptops"].failed, 1);
    assert_eq!(summary.categories["laptops"].records, 5);

    let page_two_fetches = fetcher
        .fetched()
        .iter()
        .filter(|url| url.ends_with("page=2"))
        .count();
    assert_eq!(page_two_fetches, 2);

    // The failed page stays out of the frontier, so a rerun would retry it
    let (_, report) = read_summary(Path::new(&config.output.checkpoint_path)).unwrap();
    assert_eq!(report.done_jobs, 3);
    assert_eq!(report.failed_jobs, 1);
}
