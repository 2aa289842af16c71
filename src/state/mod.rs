//! State module for tracking scrape progress
//!
//! This module provides the data-shaped state the engine mutates as work
//! proceeds.
//!
//! # Components
//!
//! - `Job` / `JobStatus`: one listing page and its retry state machine
//! - `RateState`: per-target pacing state for the adaptive rate limiter

mod job;
mod rate;

// Re-export main types
pub use job::{Job, JobId, JobStatus};
pub use rate::RateState;
