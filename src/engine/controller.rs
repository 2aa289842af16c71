//! Run controller: owns the queue, the workers, and completion
//!
//! The controller seeds one page per category, then reacts to worker
//! events: successes advance the category's cursor, retryable failures
//! are re-enqueued after an exponential backoff, and terminal failures
//! move the cursor or abort the category. The run is complete when no
//! job is outstanding and every cursor has terminated. A raised stop
//! flag instead closes the queue, lets in-flight requests finish, and
//! leaves everything unfetched for the next run.

use crate::checkpoint::CheckpointLog;
use crate::config::Config;
use crate::engine::detector::BlockDetector;
use crate::engine::enumerator::{Enumerator, PageOutcome};
use crate::engine::limiter::RateLimiter;
use crate::engine::session::SessionPool;
use crate::engine::worker::{Worker, WorkerEvent};
use crate::extract::{CssExtractor, Extractor};
use crate::fetch::{Fetcher, HttpFetcher};
use crate::output::{CsvSink, RecordSink, RunSummary};
use crate::state::Job;
use crate::{Result, SoukError};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch, Mutex};

/// Ceiling on the exponential retry backoff
const RETRY_BACKOFF_CAP: Duration = Duration::from_secs(60);

/// Mutable bookkeeping for one run of the event loop
struct RunState {
    summary: RunSummary,
    /// Jobs sent to the queue that have not reported a terminal event
    outstanding: usize,
    /// Terminal successes, for progress logging
    completed: u64,
}

/// The assembled scraping engine
///
/// [`Engine::new`] accepts the fetcher, extractors, sink, and checkpoint
/// as trait objects; [`run_scrape`] builds the real HTTP stack. Tests
/// plug in scripted components and run the identical machinery.
pub struct Engine {
    config: Config,
    limiter: Arc<RateLimiter>,
    sessions: Arc<SessionPool>,
    fetcher: Arc<dyn Fetcher>,
    extractors: Arc<HashMap<String, Arc<dyn Extractor>>>,
    sink: Arc<dyn RecordSink>,
    checkpoint: Arc<CheckpointLog>,
}

impl Engine {
    /// Assembles an engine around the given components
    ///
    /// Every configured category must have an extractor, otherwise its
    /// jobs could never produce records.
    pub fn new(
        config: &Config,
        fetcher: Arc<dyn Fetcher>,
        extractors: HashMap<String, Arc<dyn Extractor>>,
        sink: Arc<dyn RecordSink>,
        checkpoint: Arc<CheckpointLog>,
    ) -> Result<Self> {
        for category in &config.categories {
            if !extractors.contains_key(&category.id) {
                return Err(SoukError::Engine(format!(
                    "no extractor registered for category '{}'",
                    category.id
                )));
            }
        }

        Ok(Self {
            config: config.clone(),
            limiter: Arc::new(RateLimiter::new(&config.engine)),
            sessions: Arc::new(SessionPool::new(
                config.engine.session_pool_size,
                config.identity.clone(),
            )?),
            fetcher,
            extractors: Arc::new(extractors),
            sink,
            checkpoint,
        })
    }

    /// Shared handle to the rate limiter, for observation
    pub fn limiter(&self) -> Arc<RateLimiter> {
        Arc::clone(&self.limiter)
    }

    /// Shared handle to the session pool, for observation
    pub fn sessions(&self) -> Arc<SessionPool> {
        Arc::clone(&self.sessions)
    }

    /// Runs the scrape to completion or until `stop` is raised
    ///
    /// Returns the per-category summary of this run. Jobs completed in
    /// previous runs are skipped and do not appear in it.
    pub async fn run(self, stop: watch::Receiver<bool>) -> Result<RunSummary> {
        let started = Instant::now();

        let frontier = self.checkpoint.frontier_snapshot();
        if !frontier.is_empty() {
            tracing::info!("Resuming: {} pages already checkpointed", frontier.len());
        }
        let mut enumerator = Enumerator::new(
            &self.config.categories,
            frontier,
            self.config.engine.max_pages,
        )?;

        let (job_tx, job_rx) = mpsc::channel::<Job>(self.config.engine.queue_capacity);
        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<WorkerEvent>();
        let (drain_tx, drain_rx) = watch::channel(false);
        let queue = Arc::new(Mutex::new(job_rx));

        let mut workers = Vec::with_capacity(self.config.engine.workers);
        for id in 0..self.config.engine.workers {
            let worker = Worker {
                id,
                queue: Arc::clone(&queue),
                events: event_tx.clone(),
                limiter: Arc::clone(&self.limiter),
                sessions: Arc::clone(&self.sessions),
                fetcher: Arc::clone(&self.fetcher),
                extractors: Arc::clone(&self.extractors),
                sink: Arc::clone(&self.sink),
                checkpoint: Arc::clone(&self.checkpoint),
                detector: BlockDetector::new(),
                max_attempts: self.config.engine.max_attempts,
                drain: drain_rx.clone(),
            };
            workers.push(tokio::spawn(worker.run()));
        }
        // Workers hold the only remaining event senders; the channel
        // closes itself once they all exit
        drop(event_tx);

        let mut state = RunState {
            summary: RunSummary::default(),
            outstanding: 0,
            completed: 0,
        };
        let mut cancelled = false;

        for job in enumerator.initial_jobs() {
            tracing::info!("Starting {} at {}", job.id, job.url);
            if job_tx.send(job).await.is_err() {
                break;
            }
            state.outstanding += 1;
        }

        if state.outstanding == 0 {
            tracing::info!("Nothing to do: every category is already complete");
        } else {
            let mut stop_rx = stop;
            let stopped = flag_raised(&mut stop_rx);
            tokio::pin!(stopped);

            loop {
                tokio::select! {
                    // Stop wins when an event is ready at the same time
                    biased;

                    _ = &mut stopped => {
                        tracing::info!("Stop requested; letting in-flight requests finish");
                        cancelled = true;
                        break;
                    }
                    event = event_rx.recv() => {
                        let event = match event {
                            Some(event) => event,
                            None => break,
                        };
                        self.handle_event(event, &mut enumerator, &mut state, &job_tx, &drain_rx)
                            .await;
                        if state.outstanding == 0 && enumerator.all_finished() {
                            break;
                        }
                    }
                }
            }
        }

        // Queued jobs are discarded from here on; they were never
        // checkpointed, so the next run enumerates them again
        let _ = drain_tx.send(true);
        drop(job_tx);

        // Jobs that were mid-fetch when we stopped still report in
        while let Some(event) = event_rx.recv().await {
            match event {
                WorkerEvent::Done { job, records } => {
                    state.summary.record_done(&job.id.category, records)
                }
                WorkerEvent::EmptyPage { job } => state.summary.record_done(&job.id.category, 0),
                WorkerEvent::Failed { job, reason } => {
                    tracing::warn!("{} failed permanently: {}", job.id, reason);
                    state.summary.record_failed(&job.id.category);
                }
                WorkerEvent::Retry { .. } => {}
            }
        }
        for worker in workers {
            let _ = worker.await;
        }

        if let Err(err) = self.sink.flush() {
            tracing::error!("Final sink flush failed: {}", err);
        }

        let mut summary = state.summary;
        summary.duration = Some(started.elapsed());
        summary.cancelled = cancelled;
        tracing::info!(
            "Run {}: {} jobs done, {} failed, {} records in {}s",
            if cancelled { "cancelled" } else { "complete" },
            summary.total_done(),
            summary.total_failed(),
            summary.total_records(),
            summary.duration.unwrap_or_default().as_secs()
        );
        Ok(summary)
    }

    /// Applies one worker event to the run state
    async fn handle_event(
        &self,
        event: WorkerEvent,
        enumerator: &mut Enumerator,
        state: &mut RunState,
        job_tx: &mpsc::Sender<Job>,
        drain_rx: &watch::Receiver<bool>,
    ) {
        match event {
            WorkerEvent::Done { job, records } => {
                state.outstanding -= 1;
                state.completed += 1;
                state.summary.record_done(&job.id.category, records);
                if state.completed % 10 == 0 {
                    tracing::info!(
                        "Progress: {} pages done, {} records",
                        state.completed,
                        state.summary.total_records()
                    );
                }
                self.advance(enumerator, &job, PageOutcome::Content, state, job_tx)
                    .await;
            }
            WorkerEvent::EmptyPage { job } => {
                state.outstanding -= 1;
                state.completed += 1;
                state.summary.record_done(&job.id.category, 0);
                self.advance(enumerator, &job, PageOutcome::Empty, state, job_tx)
                    .await;
            }
            WorkerEvent::Retry { job, reason } => {
                let backoff = retry_backoff(self.config.engine.retry_backoff(), job.attempts);
                tracing::info!(
                    "Retrying {} in {}ms after {} (attempt {}/{})",
                    job.id,
                    backoff.as_millis(),
                    reason,
                    job.attempts,
                    self.config.engine.max_attempts
                );
                let tx = job_tx.clone();
                let mut drain = drain_rx.clone();
                tokio::spawn(async move {
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {
                            let _ = tx.send(job).await;
                        }
                        _ = flag_raised(&mut drain) => {}
                    }
                });
            }
            WorkerEvent::Failed { job, reason } => {
                tracing::warn!("{} failed permanently: {}", job.id, reason);
                state.outstanding -= 1;
                state.summary.record_failed(&job.id.category);
                self.advance(enumerator, &job, PageOutcome::Failed, state, job_tx)
                    .await;
            }
        }
    }

    /// Feeds a page outcome to the enumerator and enqueues the next page
    async fn advance(
        &self,
        enumerator: &mut Enumerator,
        job: &Job,
        outcome: PageOutcome,
        state: &mut RunState,
        job_tx: &mpsc::Sender<Job>,
    ) {
        if let Some(next) = enumerator.advance(&job.id.category, outcome) {
            if job_tx.send(next).await.is_ok() {
                state.outstanding += 1;
            }
        }
    }
}

/// Builds the production engine from a loaded config and runs it
///
/// This is the binary's whole scrape path: a fresh HTTP fetcher, one CSS
/// extractor per category, the CSV sink, and the checkpoint log opened
/// under the current config hash.
pub async fn run_scrape(
    config: &Config,
    config_hash: &str,
    stop: watch::Receiver<bool>,
) -> Result<RunSummary> {
    let (checkpoint, _report) = CheckpointLog::open(
        Path::new(&config.output.checkpoint_path),
        config_hash,
    )?;
    let sink = CsvSink::open(Path::new(&config.output.csv_path))?;
    let fetcher = HttpFetcher::new(config.engine.request_timeout());

    let mut extractors: HashMap<String, Arc<dyn Extractor>> = HashMap::new();
    for category in &config.categories {
        extractors.insert(
            category.id.clone(),
            Arc::new(CssExtractor::new(&category.selectors)?),
        );
    }

    let engine = Engine::new(
        config,
        Arc::new(fetcher),
        extractors,
        Arc::new(sink),
        Arc::new(checkpoint),
    )?;
    engine.run(stop).await
}

/// Doubles the base backoff per attempt already spent, up to the cap
fn retry_backoff(base: Duration, attempts: u32) -> Duration {
    let shift = attempts.saturating_sub(1).min(6);
    base.saturating_mul(1 << shift).min(RETRY_BACKOFF_CAP)
}

/// Resolves when the watch flag turns true; pends forever if the sender
/// is gone, since the flag can then never be raised
async fn flag_raised(rx: &mut watch::Receiver<bool>) {
    if *rx.borrow() {
        return;
    }
    loop {
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
        if *rx.borrow() {
            return;
        }
    }
}
