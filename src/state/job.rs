//! Job state definitions for tracking scrape progress
//!
//! A job is one listing page of one category. Jobs move through an explicit
//! state machine so retry and failure policy live in data, not control flow.

use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

/// Represents the current state of a scrape job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobStatus {
    // ===== Active States =====
    /// Job is created or re-enqueued and waiting for a worker
    Pending,

    /// Job is currently being fetched by a worker
    InFlight,

    // ===== Terminal States =====
    /// Job completed and its records are checkpointed
    Done,

    /// Job exhausted its attempts or hit a non-retryable failure
    FailedPermanent,
}

impl JobStatus {
    /// Returns true if this is a terminal state (no further processing needed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::FailedPermanent)
    }

    /// Returns true if this is an active state (job may still be processed)
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Returns true if this represents a successful completion
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Done)
    }

    /// Returns true if the transition from this state to `to` is allowed
    ///
    /// Allowed transitions:
    /// - `Pending -> InFlight` (worker picked the job up)
    /// - `InFlight -> Done` (records written and checkpointed)
    /// - `InFlight -> Pending` (retryable failure, job re-enqueued)
    /// - `InFlight -> FailedPermanent` (attempts exhausted or non-retryable)
    pub fn can_transition_to(&self, to: JobStatus) -> bool {
        matches!(
            (self, to),
            (Self::Pending, Self::InFlight)
                | (Self::InFlight, Self::Done)
                | (Self::InFlight, Self::Pending)
                | (Self::InFlight, Self::FailedPermanent)
        )
    }

    /// Converts the job status to its checkpoint-log string representation
    pub fn to_log_string(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InFlight => "in_flight",
            Self::Done => "done",
            Self::FailedPermanent => "failed_permanent",
        }
    }

    /// Parses a job status from its checkpoint-log string representation
    ///
    /// Returns None if the string doesn't match any known status.
    pub fn from_log_string(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "in_flight" => Some(Self::InFlight),
            "done" => Some(Self::Done),
            "failed_permanent" => Some(Self::FailedPermanent),
            _ => None,
        }
    }

    /// Returns all possible job statuses
    pub fn all_statuses() -> Vec<JobStatus> {
        vec![
            Self::Pending,
            Self::InFlight,
            Self::Done,
            Self::FailedPermanent,
        ]
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_log_string())
    }
}

/// Identity of a job: (category id, page index, URL)
///
/// Unique within a run; the checkpoint log keys on this identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId {
    pub category: String,
    pub page: u32,
    pub url: String,
}

impl JobId {
    pub fn new(category: impl Into<String>, page: u32, url: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            page,
            url: url.into(),
        }
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} p.{}", self.category, self.page)
    }
}

/// One unit of work: fetch a listing page, extract its records
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    /// Parsed form of `id.url`, ready for the Fetcher
    pub url: Url,
    /// Pacing key for the Rate Limiter (the URL host)
    pub target: String,
    /// Number of fetches performed so far for this job
    pub attempts: u32,
    pub status: JobStatus,
}

impl Job {
    /// Creates a pending job for one page of a category
    pub fn new(category: impl Into<String>, page: u32, url: Url) -> Self {
        let target = url.host_str().unwrap_or_default().to_string();
        Self {
            id: JobId::new(category, page, url.to_string()),
            url,
            target,
            attempts: 0,
            status: JobStatus::Pending,
        }
    }

    /// Moves the job to `to`, enforcing the state machine
    pub fn transition(&mut self, to: JobStatus) -> crate::Result<()> {
        if !self.status.can_transition_to(to) {
            return Err(crate::SoukError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    /// Marks the job in-flight and counts the fetch that is about to happen
    pub fn begin_attempt(&mut self) -> crate::Result<()> {
        self.transition(JobStatus::InFlight)?;
        self.attempts += 1;
        Ok(())
    }
}
