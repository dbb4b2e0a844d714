//! Adaptive poll interval estimation.
//!
//! Each watcher tracks an exponential moving average of its own fetch
//! latency and derives the next poll interval from it, so cheap topics poll
//! quickly and expensive ones back off automatically without a human tuning
//! per-topic intervals by hand.

use std::time::Duration;

/// Smoothing factor for the fetch-duration EMA. Lower is smoother/slower to
/// react; higher tracks recent samples more aggressively.
pub const EMA_ALPHA: f64 = 0.3;

/// Floor for the adaptive interval: even an instant fetch polls no faster
/// than this.
pub const BASE_INTERVAL: Duration = Duration::from_secs(1);

/// Ceiling for the adaptive interval: even a very slow fetch polls no slower
/// than this.
pub const MAX_INTERVAL: Duration = Duration::from_secs(10);

/// Multiplier applied to a single fetch duration before clamping, so the
/// poll interval stays well clear of the latency it's built from.
const TARGET_MULTIPLIER: f64 = 3.0;

/// Tunables for [`AdaptiveInterval`]. Exposed as configuration rather than
/// baked-in constants so tests can shrink them to keep polling loops fast
/// without changing the algorithm.
#[derive(Debug, Clone, Copy)]
pub struct IntervalConfig {
    pub base_interval: Duration,
    pub max_interval: Duration,
    pub ema_alpha: f64,
    pub target_multiplier: f64,
}

impl Default for IntervalConfig {
    fn default() -> Self {
        Self {
            base_interval: BASE_INTERVAL,
            max_interval: MAX_INTERVAL,
            ema_alpha: EMA_ALPHA,
            target_multiplier: TARGET_MULTIPLIER,
        }
    }
}

/// Tracks a fetch-duration EMA and derives the next poll interval from it.
///
/// `current_seconds` starts at `base_interval`, so the very first `observe()`
/// call folds the first sample into the EMA
/// (`currentInterval = 0.3·target + 0.7·currentInterval`) rather than seeding
/// it directly.
#[derive(Debug, Clone, Copy)]
pub struct AdaptiveInterval {
    config: IntervalConfig,
    current_seconds: f64,
}

impl Default for AdaptiveInterval {
    fn default() -> Self {
        Self::new(IntervalConfig::default())
    }
}

impl AdaptiveInterval {
    #[must_use]
    pub fn new(config: IntervalConfig) -> Self {
        Self { current_seconds: config.base_interval.as_secs_f64(), config }
    }

    /// Record one fetch's wall-clock duration and return the interval to
    /// wait before the next fetch.
    ///
    /// The target is computed by clamping `multiplier * duration` into
    /// `[base_interval, max_interval]` *before* folding it into the EMA, so a
    /// single extreme sample can't drag the average outside the configured
    /// band even transiently.
    pub fn observe(&mut self, duration: Duration) -> Duration {
        let raw_target_seconds = duration.as_secs_f64() * self.config.target_multiplier;
        let clamped_seconds = raw_target_seconds
            .clamp(self.config.base_interval.as_secs_f64(), self.config.max_interval.as_secs_f64());

        self.current_seconds =
            self.config.ema_alpha * clamped_seconds + (1.0 - self.config.ema_alpha) * self.current_seconds;

        Duration::from_secs_f64(self.current_seconds)
    }

    /// The most recently computed interval.
    #[must_use]
    pub fn current(&self) -> Duration {
        Duration::from_secs_f64(self.current_seconds)
    }

    /// Reset to the base interval. Called when a watcher recovers from an
    /// error state so the first successful poll after recovery emits quickly
    /// rather than inheriting whatever interval it had drifted to before the
    /// failure streak began.
    pub fn reset(&mut self) {
        self.current_seconds = self.config.base_interval.as_secs_f64();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_poll_at_500ms_matches_the_worked_example() {
        let mut interval = AdaptiveInterval::default();
        let next = interval.observe(Duration::from_millis(500));
        // target = clamp(3*0.5, 1, 10) = 1.5; ema = 0.3*1.5 + 0.7*1 = 1.15
        assert!((next.as_secs_f64() - 1.15).abs() < 1e-9);
    }

    #[test]
    fn first_poll_at_5s_matches_the_worked_example() {
        let mut interval = AdaptiveInterval::default();
        let next = interval.observe(Duration::from_secs(5));
        // target = clamp(15, 1, 10) = 10; ema = 0.3*10 + 0.7*1 = 3.7
        assert!((next.as_secs_f64() - 3.7).abs() < 1e-9);
    }

    #[test]
    fn fast_fetches_stay_at_the_base_interval() {
        let mut interval = AdaptiveInterval::default();
        let next = interval.observe(Duration::from_millis(1));
        assert_eq!(next, BASE_INTERVAL);
    }

    #[test]
    fn repeated_slow_fetches_converge_toward_the_cap_without_jumping_there() {
        let mut interval = AdaptiveInterval::default();
        let first = interval.observe(Duration::from_secs(30));
        assert!(first < MAX_INTERVAL);
        let mut last = first;
        for _ in 0..30 {
            last = interval.observe(Duration::from_secs(30));
        }
        assert!((last.as_secs_f64() - MAX_INTERVAL.as_secs_f64()).abs() < 0.01);
    }

    #[test]
    fn reset_returns_to_the_base_interval() {
        let mut interval = AdaptiveInterval::default();
        interval.observe(Duration::from_secs(5));
        interval.reset();
        assert_eq!(interval.current(), BASE_INTERVAL);
    }

    #[test]
    fn current_before_any_observation_is_the_base_interval() {
        let interval = AdaptiveInterval::default();
        assert_eq!(interval.current(), BASE_INTERVAL);
    }
}
