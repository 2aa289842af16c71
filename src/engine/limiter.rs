//! Adaptive per-target request pacing
//!
//! One [`RateLimiter`] is shared by every worker. Each target host has its
//! own [`RateState`]; the limiter serializes access to it by handing out
//! reserved fire times. A caller takes the lock, claims the earliest slot
//! the current delay allows, moves the slot forward for whoever comes
//! next, then sleeps outside the lock until its own slot arrives. Two
//! workers can therefore never fire inside the same delay window, no
//! matter how they interleave.

use crate::config::EngineConfig;
use crate::engine::Outcome;
use crate::state::RateState;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Upper bound of the uniform random jitter added to every wait, in ms
const JITTER_MAX_MS: u64 = 500;

/// Shared pacing gate for all targets
pub struct RateLimiter {
    config: EngineConfig,
    states: Mutex<HashMap<String, RateState>>,
}

impl RateLimiter {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            config: config.clone(),
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Waits until a request against `target` is allowed to fire
    ///
    /// Reserves the next slot under the lock, so concurrent callers line
    /// up behind each other at the current delay, then sleeps until the
    /// reserved instant. Jitter widens the slot it reserves, which keeps
    /// the spacing guarantee intact for the caller after this one.
    pub async fn wait_for(&self, target: &str) {
        let wait = {
            let mut states = self.states.lock().unwrap();
            let state = states
                .entry(target.to_string())
                .or_insert_with(|| RateState::new(&self.config));

            let now = Instant::now();
            let jitter = Duration::from_millis(rand::random_range(0..=JITTER_MAX_MS));
            let fire_at = match state.time_until_ready(now) {
                Some(remaining) => now + remaining + jitter,
                None => now + jitter,
            };
            state.record_request(fire_at);
            fire_at.saturating_duration_since(now)
        };

        if !wait.is_zero() {
            tracing::trace!("Pacing {}: waiting {}ms", target, wait.as_millis());
            tokio::time::sleep(wait).await;
        }
    }

    /// Feeds one attempt's outcome back into the target's delay
    pub fn report(&self, target: &str, outcome: Outcome) {
        let mut states = self.states.lock().unwrap();
        let state = states
            .entry(target.to_string())
            .or_insert_with(|| RateState::new(&self.config));

        match outcome {
            Outcome::Success => state.on_success(&self.config),
            Outcome::SoftBlock => {
                state.on_soft_block(&self.config);
                tracing::warn!(
                    "Soft block from {}: delay now {}ms",
                    target,
                    state.current_delay().as_millis()
                );
            }
            Outcome::NetworkError => {
                state.on_network_error(&self.config);
                tracing::debug!(
                    "Network error against {}: delay now {}ms ({} in a row)",
                    target,
                    state.current_delay().as_millis(),
                    state.failure_streak()
                );
            }
            Outcome::HardError => state.on_hard_error(),
        }
    }

    /// Current inter-request delay for a target, base delay if unseen
    pub fn current_delay(&self, target: &str) -> Duration {
        self.states
            .lock()
            .unwrap()
            .get(target)
            .map(|s| s.current_delay())
            .unwrap_or_else(|| self.config.base_delay())
    }
}
