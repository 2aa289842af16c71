//! Per-target rate state for adaptive pacing
//!
//! Each target host gets one `RateState` shared by every worker fetching from
//! it. The current delay moves multiplicatively: down after a streak of clean
//! successes, up sharply on soft blocks, up gently on network errors, always
//! clamped to the configured floor and ceiling.

use crate::config::EngineConfig;
use std::time::{Duration, Instant};

/// Consecutive successes required before the delay is lowered
const SUCCESS_STREAK_THRESHOLD: u32 = 15;

/// Multiplier applied to the delay after a success streak
const SUCCESS_FACTOR: f64 = 0.9;

/// Multiplier applied to the delay on a soft block
const SOFT_BLOCK_FACTOR: f64 = 2.0;

/// Multiplier applied to the delay on a network error
const NETWORK_ERROR_FACTOR: f64 = 1.2;

/// Tracks pacing state for a single target host
#[derive(Debug, Clone)]
pub struct RateState {
    /// Current inter-request delay for this target
    current_delay: Duration,

    /// Consecutive clean successes since the last block or error
    success_streak: u32,

    /// Consecutive network errors since the last success
    failure_streak: u32,

    /// When the last request to this target was issued
    last_request_at: Option<Instant>,
}

impl RateState {
    /// Creates state for a fresh target, starting at the base delay
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            current_delay: config.base_delay(),
            success_streak: 0,
            failure_streak: 0,
            last_request_at: None,
        }
    }

    /// Returns the current inter-request delay for this target
    pub fn current_delay(&self) -> Duration {
        self.current_delay
    }

    /// Returns the consecutive network-error count since the last success
    pub fn failure_streak(&self) -> u32 {
        self.failure_streak
    }

    /// Records that a request was just issued to this target
    pub fn record_request(&mut self, now: Instant) {
        self.last_request_at = Some(now);
    }

    /// Returns how long the caller must still wait before the next request
    ///
    /// Returns None if the target is ready (no previous request, or the
    /// current delay has already elapsed). The recorded request instant may
    /// lie in the future when a slot was reserved ahead; the wait then
    /// covers the remainder of that slot plus the delay.
    pub fn time_until_ready(&self, now: Instant) -> Option<Duration> {
        let last = self.last_request_at?;
        let ready_at = last + self.current_delay;
        let remaining = ready_at.saturating_duration_since(now);
        if remaining.is_zero() {
            None
        } else {
            Some(remaining)
        }
    }

    /// Records a clean success
    ///
    /// After `SUCCESS_STREAK_THRESHOLD` consecutive successes the delay is
    /// lowered by `SUCCESS_FACTOR` toward the floor and the streak restarts.
    pub fn on_success(&mut self, config: &EngineConfig) {
        self.failure_streak = 0;
        self.success_streak += 1;
        if self.success_streak >= SUCCESS_STREAK_THRESHOLD {
            self.current_delay = self
                .current_delay
                .mul_f64(SUCCESS_FACTOR)
                .max(config.min_delay());
            self.success_streak = 0;
        }
    }

    /// Records a soft block: delay doubles up to the ceiling, streak resets
    pub fn on_soft_block(&mut self, config: &EngineConfig) {
        self.success_streak = 0;
        self.failure_streak += 1;
        self.current_delay = self
            .current_delay
            .mul_f64(SOFT_BLOCK_FACTOR)
            .min(config.max_delay());
    }

    /// Records a network error: a gentler increase than a soft block
    ///
    /// Transient network trouble is not a block signal, so the delay grows
    /// by `NETWORK_ERROR_FACTOR` only.
    pub fn on_network_error(&mut self, config: &EngineConfig) {
        self.success_streak = 0;
        self.failure_streak += 1;
        self.current_delay = self
            .current_delay
            .mul_f64(NETWORK_ERROR_FACTOR)
            .min(config.max_delay());
    }

    /// Records a hard error: the streak resets but the delay holds
    pub fn on_hard_error(&mut self) {
        self.success_streak = 0;
    }
}
