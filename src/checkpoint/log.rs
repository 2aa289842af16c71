//! Append-only JSON-lines checkpoint log
//!
//! Write-then-acknowledge: an entry is flushed and synced to disk before the
//! in-memory frontier advances, so a crash between the two never loses a
//! completed job and never marks an incomplete one done. Appends serialize
//! under one lock; each append is a single short line.

use crate::checkpoint::{CheckpointEntry, CheckpointResult, JobOutcome};
use crate::output::{CategoryTally, RunSummary};
use crate::state::JobId;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::sync::Mutex;

/// What replaying an existing log found
#[derive(Debug, Clone, Default)]
pub struct ReplayReport {
    /// Identities in the frontier (outcome done or empty)
    pub done_jobs: usize,

    /// Identities whose last outcome was failed
    pub failed_jobs: usize,

    /// Unreadable lines skipped (torn tail from a crash, unknown kinds)
    pub skipped_lines: usize,

    /// Config hash of the most recent run header in the log
    pub last_config_hash: Option<String>,
}

/// Frontier value for one completed identity
#[derive(Debug, Clone, Copy)]
struct FrontierEntry {
    outcome: JobOutcome,
    records: u64,
}

struct LogInner {
    file: File,
    /// Identities that completed (done or empty); never re-fetched
    frontier: HashMap<JobId, FrontierEntry>,
    /// Identities whose last outcome was failed; a rerun retries them
    failed: HashSet<JobId>,
}

/// Durable append-only checkpoint store
pub struct CheckpointLog {
    inner: Mutex<LogInner>,
}

impl CheckpointLog {
    /// Opens the log, replaying any existing entries into the frontier
    ///
    /// Appends a run header carrying the current config hash. If the log was
    /// written under a different config hash, a warning is logged; the run
    /// still proceeds (the frontier stays valid, pacing just re-adapts).
    pub fn open(path: &Path, config_hash: &str) -> CheckpointResult<(Self, ReplayReport)> {
        let mut inner = LogInner {
            file: OpenOptions::new().create(true).append(true).open(path)?,
            frontier: HashMap::new(),
            failed: HashSet::new(),
        };
        let mut report = ReplayReport::default();

        // Replay through a separate read handle; the append handle stays at
        // the end of the file either way.
        if let Ok(read_file) = File::open(path) {
            replay(read_file, &mut inner.frontier, &mut inner.failed, &mut report);
        }

        report.done_jobs = inner.frontier.len();
        report.failed_jobs = inner.failed.len();

        if let Some(previous) = &report.last_config_hash {
            if previous != config_hash {
                tracing::warn!(
                    "Checkpoint log was written under a different configuration \
                     (was {}, now {}); resuming anyway",
                    &previous[..12.min(previous.len())],
                    &config_hash[..12.min(config_hash.len())]
                );
            }
        }

        if report.done_jobs > 0 || report.failed_jobs > 0 {
            tracing::info!(
                "Replayed checkpoint log: {} done, {} failed, {} unreadable lines",
                report.done_jobs,
                report.failed_jobs,
                report.skipped_lines
            );
        }

        let header = CheckpointEntry::Run {
            config_hash: config_hash.to_string(),
            started_at: Utc::now(),
        };
        append_entry(&mut inner.file, &header)?;

        Ok((
            Self {
                inner: Mutex::new(inner),
            },
            report,
        ))
    }

    /// Returns true if this identity already completed (done or empty)
    pub fn is_done(&self, id: &JobId) -> bool {
        self.inner.lock().unwrap().frontier.contains_key(id)
    }

    /// Returns the completed outcome for this identity, if any
    ///
    /// Failed identities return None: they are retryable on a rerun.
    pub fn lookup(&self, id: &JobId) -> Option<JobOutcome> {
        self.inner
            .lock()
            .unwrap()
            .frontier
            .get(id)
            .map(|e| e.outcome)
    }

    /// Records a job as done with its record count
    ///
    /// Idempotent: an identity already in the frontier is not re-appended,
    /// and `false` is returned.
    pub fn mark_done(&self, id: &JobId, records: u64) -> CheckpointResult<bool> {
        self.mark_completed(id, JobOutcome::Done, records)
    }

    /// Records an empty-page termination for a job
    ///
    /// Empty pages join the frontier so a resumed run does not walk past
    /// the end of a category again.
    pub fn mark_empty(&self, id: &JobId) -> CheckpointResult<bool> {
        self.mark_completed(id, JobOutcome::Empty, 0)
    }

    /// Records a job as failed-permanent
    ///
    /// Failed identities are retained in the log but kept out of the
    /// frontier, so a rerun picks them up again.
    pub fn mark_failed(&self, id: &JobId) -> CheckpointResult<bool> {
        let mut inner = self.inner.lock().unwrap();
        if inner.frontier.contains_key(id) || inner.failed.contains(id) {
            return Ok(false);
        }

        let entry = CheckpointEntry::Job {
            id: id.clone(),
            outcome: JobOutcome::Failed,
            records: 0,
            at: Utc::now(),
        };
        append_entry(&mut inner.file, &entry)?;
        inner.failed.insert(id.clone());
        Ok(true)
    }

    fn mark_completed(
        &self,
        id: &JobId,
        outcome: JobOutcome,
        records: u64,
    ) -> CheckpointResult<bool> {
        let mut inner = self.inner.lock().unwrap();
        if inner.frontier.contains_key(id) {
            return Ok(false);
        }

        let entry = CheckpointEntry::Job {
            id: id.clone(),
            outcome,
            records,
            at: Utc::now(),
        };
        // The append is durable before the frontier advances
        append_entry(&mut inner.file, &entry)?;
        inner.frontier.insert(id.clone(), FrontierEntry { outcome, records });
        inner.failed.remove(id);
        Ok(true)
    }

    /// Snapshot of the frontier for the enumerator, taken once at startup
    pub fn frontier_snapshot(&self) -> HashMap<JobId, JobOutcome> {
        self.inner
            .lock()
            .unwrap()
            .frontier
            .iter()
            .map(|(id, e)| (id.clone(), e.outcome))
            .collect()
    }

    /// Rebuilds per-category tallies from the log contents
    pub fn summary(&self) -> RunSummary {
        let inner = self.inner.lock().unwrap();
        summarize(&inner.frontier, &inner.failed)
    }
}

/// Rebuilds per-category tallies from a log file on disk
///
/// Backs the offline `--stats` view: the file is only read, so no run
/// header is appended. Duration is unknown there.
pub fn read_summary(path: &Path) -> CheckpointResult<(RunSummary, ReplayReport)> {
    let mut frontier = HashMap::new();
    let mut failed = HashSet::new();
    let mut report = ReplayReport::default();

    let file = File::open(path)?;
    replay(file, &mut frontier, &mut failed, &mut report);
    report.done_jobs = frontier.len();
    report.failed_jobs = failed.len();

    Ok((summarize(&frontier, &failed), report))
}

fn summarize(frontier: &HashMap<JobId, FrontierEntry>, failed: &HashSet<JobId>) -> RunSummary {
    let mut categories: std::collections::BTreeMap<String, CategoryTally> =
        std::collections::BTreeMap::new();

    for (id, entry) in frontier {
        let tally = categories.entry(id.category.clone()).or_default();
        tally.done += 1;
        tally.records += entry.records;
    }
    for id in failed {
        let tally = categories.entry(id.category.clone()).or_default();
        tally.failed += 1;
    }

    RunSummary {
        categories,
        duration: None,
        cancelled: false,
    }
}

/// Serializes one entry, appends it, and syncs the file
fn append_entry(file: &mut File, entry: &CheckpointEntry) -> CheckpointResult<()> {
    let line = serde_json::to_string(entry)?;
    writeln!(file, "{}", line)?;
    file.sync_data()?;
    Ok(())
}

/// Replays a log file into the in-memory maps
///
/// A torn final line (crash mid-append) and lines of unknown shape are
/// skipped with a warning rather than failing the whole replay.
fn replay(
    file: File,
    frontier: &mut HashMap<JobId, FrontierEntry>,
    failed: &mut HashSet<JobId>,
    report: &mut ReplayReport,
) {
    let reader = BufReader::new(file);
    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(_) => {
                report.skipped_lines += 1;
                continue;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<CheckpointEntry>(&line) {
            Ok(CheckpointEntry::Run { config_hash, .. }) => {
                report.last_config_hash = Some(config_hash);
            }
            Ok(CheckpointEntry::Job {
                id,
                outcome,
                records,
                ..
            }) => match outcome {
                JobOutcome::Done | JobOutcome::Empty => {
                    frontier.insert(id.clone(), FrontierEntry { outcome, records });
                    failed.remove(&id);
                }
                JobOutcome::Failed => {
                    if !frontier.contains_key(&id) {
                        failed.insert(id);
                    }
                }
            },
            Err(e) => {
                tracing::warn!("Skipping unreadable checkpoint line: {}", e);
                report.skipped_lines += 1;
            }
        }
    }
}
