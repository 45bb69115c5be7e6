//! Exponential backoff for reconnecting the chat stream

use std::time::Duration;

use rand::Rng;

use crate::config::ReconnectConfig;

/// Exponential backoff configuration
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    /// Base delay in milliseconds
    pub base_delay_ms: u64,
    /// Growth factor applied per attempt
    pub multiplier: f64,
    /// Jitter is drawn uniformly from `0..max_jitter_ms`
    pub max_jitter_ms: u64,
    /// Maximum delay in milliseconds
    pub max_delay_ms: u64,
    /// Attempts allowed before the session is abandoned
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            multiplier: 1.5,
            max_jitter_ms: 1_000,
            max_delay_ms: 30_000, // 30 seconds
            max_attempts: 10,
        }
    }
}

impl From<&ReconnectConfig> for BackoffConfig {
    fn from(config: &ReconnectConfig) -> Self {
        Self {
            base_delay_ms: config.base_delay_ms,
            multiplier: config.multiplier,
            max_jitter_ms: config.max_jitter_ms,
            max_delay_ms: config.max_delay_ms,
            max_attempts: config.max_attempts,
        }
    }
}

/// Bounded exponential backoff with additive jitter.
///
/// Attempt `n` (1-based) waits `min(base * multiplier^n + jitter, max)`.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    config: BackoffConfig,
    attempt: u32,
}

impl ReconnectBackoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Delay for a given attempt and jitter, without touching the counter
    pub fn delay_for(&self, attempt: u32, jitter_ms: u64) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let base = self.config.base_delay_ms as f64 * self.config.multiplier.powi(exponent);
        let delay = (base + jitter_ms as f64).min(self.config.max_delay_ms as f64);
        Duration::from_millis(delay.max(0.0) as u64)
    }

    /// Consume an attempt and return its delay, or `None` once the maximum
    /// number of attempts has been used.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }
        self.attempt += 1;
        Some(self.delay_for(self.attempt, self.sample_jitter()))
    }

    fn sample_jitter(&self) -> u64 {
        if self.config.max_jitter_ms == 0 {
            return 0;
        }
        rand::rng().random_range(0..self.config.max_jitter_ms)
    }

    /// Reset the backoff to initial state
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Get the current attempt number
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempt >= self.config.max_attempts
    }
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self::new(BackoffConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter() -> BackoffConfig {
        BackoffConfig {
            max_jitter_ms: 0,
            ..BackoffConfig::default()
        }
    }

    #[test]
    fn test_first_attempt_uses_one_growth_step() {
        let backoff = ReconnectBackoff::default();
        assert_eq!(backoff.delay_for(1, 0), Duration::from_millis(1_500));
        assert_eq!(backoff.delay_for(1, 999), Duration::from_millis(2_499));
    }

    #[test]
    fn test_delay_is_non_decreasing_and_capped() {
        let backoff = ReconnectBackoff::default();
        let mut previous = Duration::ZERO;
        for attempt in 1..=20 {
            let delay = backoff.delay_for(attempt, 0);
            assert!(delay >= previous, "attempt {attempt} shrank");
            assert!(delay <= Duration::from_millis(30_000));
            previous = delay;
        }
        assert_eq!(backoff.delay_for(10, 999), Duration::from_millis(30_000));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let mut backoff = ReconnectBackoff::default();
        let delay = backoff.next_delay().unwrap();
        assert!(delay >= Duration::from_millis(1_500));
        assert!(delay < Duration::from_millis(2_500));
    }

    #[test]
    fn test_exhausts_after_max_attempts() {
        let mut backoff = ReconnectBackoff::new(BackoffConfig {
            max_attempts: 3,
            ..no_jitter()
        });

        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert!(backoff.is_exhausted());
        assert_eq!(backoff.next_delay(), None);
        assert_eq!(backoff.attempt(), 3);
    }

    #[test]
    fn test_reset() {
        let mut backoff = ReconnectBackoff::new(no_jitter());

        backoff.next_delay();
        backoff.next_delay();
        backoff.next_delay();

        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(1_500)));
    }
}
