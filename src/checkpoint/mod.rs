//! Checkpoint module: durable resume state
//!
//! The checkpoint log is the single source of truth for resume. Every job
//! that reaches a terminal outcome gets one appended JSON line; on startup
//! the log is replayed into the in-memory frontier and every already-done
//! identity is skipped by the enumerator.

mod log;

pub use log::{read_summary, CheckpointLog, ReplayReport};

use crate::state::JobId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Checkpoint-specific errors
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Result type alias for checkpoint operations
pub type CheckpointResult<T> = std::result::Result<T, CheckpointError>;

/// Terminal outcome of one job, as recorded in the log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOutcome {
    /// Page fetched and its records written to the sink
    Done,

    /// Page fetched clean but held no records: the category ends here
    Empty,

    /// Job exhausted its attempts or hit a non-retryable failure
    Failed,
}

/// One line of the checkpoint log
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CheckpointEntry {
    /// Written once per engine start
    Run {
        config_hash: String,
        started_at: DateTime<Utc>,
    },

    /// Written when a job reaches a terminal outcome
    Job {
        #[serde(flatten)]
        id: JobId,
        outcome: JobOutcome,
        records: u64,
        at: DateTime<Utc>,
    },
}
