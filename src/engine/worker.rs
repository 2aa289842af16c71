//! Worker loop: drives one job at a time from queue to terminal event
//!
//! Each worker draws a job from the shared queue, checks a session out of
//! the pool, waits for the target's pacing slot, fetches, classifies, and
//! either writes records or reports the failure. Every dequeued job ends
//! in exactly one event back to the controller; nothing a single job does
//! can abort the run.

use crate::checkpoint::CheckpointLog;
use crate::engine::detector::{BlockDetector, Classification};
use crate::engine::limiter::RateLimiter;
use crate::engine::session::SessionPool;
use crate::engine::Outcome;
use crate::extract::Extractor;
use crate::fetch::{FetchedPage, Fetcher};
use crate::output::RecordSink;
use crate::state::{Job, JobStatus};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};

/// Why a job ended in failed-permanent
#[derive(Debug, Clone)]
pub(crate) enum FailReason {
    /// The target answered with a non-retryable status
    HardError(u16),
    /// Retryable failures used up every allowed attempt
    AttemptsExhausted(Outcome),
    /// The page had cards but none of them could be read
    ExtractionMismatch(String),
    /// The engine's own plumbing failed for this job
    Internal(String),
}

impl fmt::Display for FailReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailReason::HardError(status) => write!(f, "status {}", status),
            FailReason::AttemptsExhausted(last) => {
                write!(f, "attempts exhausted (last: {})", last)
            }
            FailReason::ExtractionMismatch(msg) => write!(f, "extraction mismatch: {}", msg),
            FailReason::Internal(msg) => write!(f, "internal: {}", msg),
        }
    }
}

/// What a worker reports back for one dequeued job
#[derive(Debug)]
pub(crate) enum WorkerEvent {
    /// Records checkpointed and written to the sink
    Done { job: Job, records: u64 },
    /// Clean page with zero records: the category is exhausted
    EmptyPage { job: Job },
    /// Retryable failure; the job is pending again with its attempt
    /// count advanced, and the controller re-enqueues it after backoff
    Retry { job: Job, reason: Outcome },
    /// The job is failed-permanent and checkpointed as such
    Failed { job: Job, reason: FailReason },
}

/// One worker task's handles into the shared machinery
pub(crate) struct Worker {
    pub id: usize,
    pub queue: Arc<Mutex<mpsc::Receiver<Job>>>,
    pub events: mpsc::UnboundedSender<WorkerEvent>,
    pub limiter: Arc<RateLimiter>,
    pub sessions: Arc<SessionPool>,
    pub fetcher: Arc<dyn Fetcher>,
    pub extractors: Arc<HashMap<String, Arc<dyn Extractor>>>,
    pub sink: Arc<dyn RecordSink>,
    pub checkpoint: Arc<CheckpointLog>,
    pub detector: BlockDetector,
    pub max_attempts: u32,
    pub drain: watch::Receiver<bool>,
}

impl Worker {
    /// Runs until the queue closes
    ///
    /// Once the drain flag is up, jobs still sitting in the queue are
    /// discarded unfetched; they were never checkpointed, so the next run
    /// picks them up again.
    pub async fn run(self) {
        loop {
            let job = {
                let mut queue = self.queue.lock().await;
                queue.recv().await
            };
            let job = match job {
                Some(job) => job,
                None => break,
            };

            if *self.drain.borrow() {
                tracing::debug!("Worker {}: discarding {} on shutdown", self.id, job.id);
                continue;
            }

            let event = self.process(job).await;
            if self.events.send(event).is_err() {
                break;
            }
        }
        tracing::debug!("Worker {} exiting", self.id);
    }

    /// Carries one job through fetch, classification, and output
    async fn process(&self, mut job: Job) -> WorkerEvent {
        if let Err(err) = job.begin_attempt() {
            return self.fail(job, FailReason::Internal(err.to_string()));
        }

        let lease = match self.sessions.acquire().await {
            Ok(lease) => lease,
            Err(err) => return self.fail(job, FailReason::Internal(err.to_string())),
        };

        self.limiter.wait_for(&job.target).await;

        tracing::debug!(
            "Worker {}: fetching {} (attempt {}/{}, session {})",
            self.id,
            job.id,
            job.attempts,
            self.max_attempts,
            lease.session().id()
        );

        let page = match self.fetcher.fetch(lease.session(), &job.url).await {
            Ok(page) => page,
            Err(err) => {
                tracing::debug!("Worker {}: {}", self.id, err);
                self.limiter.report(&job.target, Outcome::NetworkError);
                self.sessions.release(lease, Outcome::NetworkError);
                return self.retry_or_fail(job, Outcome::NetworkError);
            }
        };

        match self.detector.classify(&page) {
            Classification::SoftBlock(reason) => {
                tracing::warn!("Worker {}: {} soft-blocked: {}", self.id, job.id, reason);
                self.limiter.report(&job.target, Outcome::SoftBlock);
                self.sessions.release(lease, Outcome::SoftBlock);
                self.retry_or_fail(job, Outcome::SoftBlock)
            }
            Classification::HardError(status) => {
                self.limiter.report(&job.target, Outcome::HardError);
                self.sessions.release(lease, Outcome::HardError);
                self.fail(job, FailReason::HardError(status))
            }
            Classification::Success => {
                // The session goes back before extraction; parsing does
                // not need to hold an identity hostage
                self.limiter.report(&job.target, Outcome::Success);
                self.sessions.release(lease, Outcome::Success);
                self.complete(job, &page)
            }
        }
    }

    /// Extracts, writes, and checkpoints a successfully fetched page
    fn complete(&self, mut job: Job, page: &FetchedPage) -> WorkerEvent {
        let extractor = match self.extractors.get(&job.id.category) {
            Some(extractor) => Arc::clone(extractor),
            None => {
                let reason = FailReason::Internal(format!(
                    "no extractor for category {}",
                    job.id.category
                ));
                return self.fail(job, reason);
            }
        };

        let records = match extractor.extract(&page.body, &job.url) {
            Ok(records) => records,
            Err(err) => {
                tracing::warn!("Worker {}: {} unreadable: {}", self.id, job.id, err);
                return self.fail(job, FailReason::ExtractionMismatch(err.to_string()));
            }
        };

        if records.is_empty() {
            if let Err(err) = self.checkpoint.mark_empty(&job.id) {
                return self.fail(
                    job,
                    FailReason::Internal(format!("checkpoint append failed: {}", err)),
                );
            }
            mark_status(&mut job, JobStatus::Done);
            tracing::debug!("Worker {}: {} empty", self.id, job.id);
            return WorkerEvent::EmptyPage { job };
        }

        for record in &records {
            if let Err(err) = self.sink.write(record) {
                return self.fail(
                    job,
                    FailReason::Internal(format!("sink write failed: {}", err)),
                );
            }
        }

        let count = records.len() as u64;
        // Records are on disk; the checkpoint acknowledges them last
        if let Err(err) = self.checkpoint.mark_done(&job.id, count) {
            return self.fail(
                job,
                FailReason::Internal(format!("checkpoint append failed: {}", err)),
            );
        }
        mark_status(&mut job, JobStatus::Done);
        tracing::debug!(
            "Worker {}: {} done, {} records in {}ms",
            self.id,
            job.id,
            count,
            page.elapsed.as_millis()
        );
        WorkerEvent::Done {
            job,
            records: count,
        }
    }

    /// Re-enqueues the job if attempts remain, otherwise fails it
    fn retry_or_fail(&self, mut job: Job, reason: Outcome) -> WorkerEvent {
        if job.attempts >= self.max_attempts {
            return self.fail(job, FailReason::AttemptsExhausted(reason));
        }
        mark_status(&mut job, JobStatus::Pending);
        WorkerEvent::Retry { job, reason }
    }

    /// Marks the job failed-permanent in the checkpoint log and reports it
    fn fail(&self, mut job: Job, reason: FailReason) -> WorkerEvent {
        if let Err(err) = self.checkpoint.mark_failed(&job.id) {
            tracing::error!("Checkpoint append failed for {}: {}", job.id, err);
        }
        mark_status(&mut job, JobStatus::FailedPermanent);
        WorkerEvent::Failed { job, reason }
    }
}

/// Applies a transition that is legal on every path that reaches it
fn mark_status(job: &mut Job, to: JobStatus) {
    if let Err(err) = job.transition(to) {
        tracing::error!("{}: {}", job.id, err);
    }
}
