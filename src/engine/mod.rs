//! The scraping engine: sessions, pacing, block detection, page
//! enumeration, and the worker pool that ties them together.
//!
//! The engine consumes category listings page by page. Each page is a
//! [`crate::state::Job`] that flows through a bounded queue to a pool of
//! workers; every fetch attempt is paced per target host by the
//! [`RateLimiter`], carried by a [`Session`] from the rotating pool, and
//! classified by the [`BlockDetector`] before its records are extracted
//! and written out. Outcomes feed back into pacing and session health.
//!
//! [`run_scrape`] wires the real HTTP stack together from a loaded
//! config; [`Engine`] accepts any [`crate::fetch::Fetcher`],
//! [`crate::extract::Extractor`], and [`crate::output::RecordSink`] so
//! tests can drive the same machinery without a network.

mod controller;
mod detector;
mod enumerator;
mod limiter;
mod session;
mod worker;

pub use controller::{run_scrape, Engine};
pub use detector::{BlockDetector, Classification};
pub use enumerator::{Enumerator, FinishReason};
pub use limiter::RateLimiter;
pub use session::{Session, SessionLease, SessionPool};

use std::fmt;

/// Outcome of one fetch attempt, as reported to the rate limiter and
/// the session pool.
///
/// This is the feedback vocabulary shared by the pacing and session
/// layers. It is coarser than [`Classification`]: by the time an
/// outcome is reported, the engine only cares how the attempt should
/// affect delay and session health, not why it happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The target served real content.
    Success,
    /// The target is throttling or challenging us. Back off hard.
    SoftBlock,
    /// The request never completed (timeout, connect failure).
    NetworkError,
    /// The target answered with a non-retryable error status.
    HardError,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Success => write!(f, "success"),
            Outcome::SoftBlock => write!(f, "soft-block"),
            Outcome::NetworkError => write!(f, "network-error"),
            Outcome::HardError => write!(f, "hard-error"),
        }
    }
}
