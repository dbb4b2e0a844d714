//! Exponential backoff for a watcher's fetch retries.
//!
//! Independent of the adaptive poll interval in [`crate::interval`]: backoff
//! governs how soon to retry *after a fetch error*, while the adaptive
//! interval governs spacing between successful polls.

use std::time::Duration;

const INITIAL_DELAY: Duration = Duration::from_secs(1);
const FACTOR: u32 = 2;
const MAX_DELAY: Duration = Duration::from_secs(30);

/// Tunables for [`Backoff`]. Tests shrink these to keep retry loops fast.
#[derive(Debug, Clone, Copy)]
pub struct BackoffConfig {
    pub initial_delay: Duration,
    pub factor: u32,
    pub max_delay: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self { initial_delay: INITIAL_DELAY, factor: FACTOR, max_delay: MAX_DELAY }
    }
}

/// Stateful exponential backoff: `1s, 2s, 4s, 8s, 16s, 30s, 30s, ...` by
/// default.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    config: BackoffConfig,
    next_delay: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::with_config(BackoffConfig::default())
    }
}

impl Backoff {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_config(config: BackoffConfig) -> Self {
        Self { next_delay: config.initial_delay, config }
    }

    /// The delay to wait before the next retry, advancing the internal state
    /// for the following call.
    pub fn next(&mut self) -> Duration {
        let delay = self.next_delay;
        self.next_delay = (self.next_delay * self.config.factor).min(self.config.max_delay);
        delay
    }

    /// Reset to the initial delay. Call this after a successful fetch so a
    /// later error starts backing off from scratch rather than from whatever
    /// delay an earlier, unrelated failure streak had reached.
    pub fn reset(&mut self) {
        self.next_delay = self.config.initial_delay;
    }
}
