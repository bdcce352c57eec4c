//! Configuration for the sync engine.

use std::time::Duration;

/// Configuration for the core sync engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long a cache entry stays fresh before a read falls back to
    /// the store.
    pub cache_validity: Duration,
    /// Coalescing window for change notifications.
    pub throttle_window: Duration,
    /// Level delta below which a transition counts as stable.
    pub trend_threshold: f64,
    /// Maximum entries kept in a core's recent-insight history.
    pub recent_insights_limit: usize,
    /// Maximum entries kept in the navigation history.
    pub nav_history_limit: usize,
    /// Maximum events retained by the event feed for detail contexts.
    pub event_history_limit: usize,
    /// Retry behavior for offline queue replay.
    pub retry: RetryConfig,
}

impl EngineConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self {
            cache_validity: Duration::from_secs(300),
            throttle_window: Duration::from_millis(50),
            trend_threshold: 0.05,
            recent_insights_limit: 10,
            nav_history_limit: 20,
            event_history_limit: 1000,
            retry: RetryConfig::default(),
        }
    }

    /// Sets the cache validity window.
    pub fn with_cache_validity(mut self, validity: Duration) -> Self {
        self.cache_validity = validity;
        self
    }

    /// Sets the notification coalescing window.
    pub fn with_throttle_window(mut self, window: Duration) -> Self {
        self.throttle_window = window;
        self
    }

    /// Sets the trend threshold.
    pub fn with_trend_threshold(mut self, threshold: f64) -> Self {
        self.trend_threshold = threshold;
        self
    }

    /// Sets the recent-insight history limit.
    pub fn with_recent_insights_limit(mut self, limit: usize) -> Self {
        self.recent_insights_limit = limit;
        self
    }

    /// Sets the navigation history limit.
    pub fn with_nav_history_limit(mut self, limit: usize) -> Self {
        self.nav_history_limit = limit;
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Retry behavior for offline queue replay.
///
/// Delays double per failed attempt, capped at `max_delay`, with an
/// optional spread of up to 25% so a burst of queued cores does not
/// retry in lockstep.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Attempts before an entry is dead-lettered.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Ceiling on the backoff delay.
    pub max_delay: Duration,
    /// Whether to spread delays with jitter.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a retry configuration with the given attempt ceiling.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            add_jitter: true,
        }
    }

    /// Creates a configuration that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            add_jitter: false,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Disables jitter.
    pub fn without_jitter(mut self) -> Self {
        self.add_jitter = false;
        self
    }

    /// Calculates the delay before a given attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        // Doublings beyond the cap's reach saturate anyway
        let doublings = attempt.saturating_sub(1).min(16);
        let delay = self
            .initial_delay
            .saturating_mul(1u32 << doublings)
            .min(self.max_delay);

        if self.add_jitter {
            let spread_nanos = (delay.as_nanos() / 4) as u64;
            if spread_nanos > 0 {
                let nanos = u64::from(clock_nanos());
                return delay + Duration::from_nanos(nanos % spread_nanos);
            }
        }
        delay
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(5)
    }
}

/// Sub-second clock reading used to spread retry delays without an RNG
/// dependency.
fn clock_nanos() -> u32 {
    use std::time::SystemTime;
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_config_builder() {
        let config = EngineConfig::new()
            .with_cache_validity(Duration::from_secs(60))
            .with_throttle_window(Duration::from_millis(10))
            .with_trend_threshold(0.1)
            .with_nav_history_limit(5);

        assert_eq!(config.cache_validity, Duration::from_secs(60));
        assert_eq!(config.throttle_window, Duration::from_millis(10));
        assert_eq!(config.trend_threshold, 0.1);
        assert_eq!(config.nav_history_limit, 5);
    }

    #[test]
    fn retry_config_no_retry() {
        let config = RetryConfig::no_retry();
        assert_eq!(config.max_attempts, 1);
        assert_eq!(config.delay_for_attempt(1), Duration::ZERO);
    }

    #[test]
    fn retry_delay_doubles_per_attempt() {
        let config = RetryConfig::new(5)
            .with_initial_delay(Duration::from_millis(100))
            .without_jitter();

        assert_eq!(config.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(400));
    }

    #[test]
    fn retry_delay_respects_max() {
        let config = RetryConfig::new(10)
            .with_initial_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(5));

        let delay = config.delay_for_attempt(8);
        assert!(delay >= Duration::from_secs(5));
        assert!(delay <= Duration::from_millis(6250)); // 5s + 25% jitter
    }

    #[test]
    fn retry_jitter_stays_within_spread() {
        let config = RetryConfig::new(5).with_initial_delay(Duration::from_millis(100));

        for attempt in 1..=4 {
            let flat = config.clone().without_jitter().delay_for_attempt(attempt);
            let jittered = config.delay_for_attempt(attempt);
            assert!(jittered >= flat);
            assert!(jittered < flat + flat / 4 + Duration::from_nanos(1));
        }
    }
}
