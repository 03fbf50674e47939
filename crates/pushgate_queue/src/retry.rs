//! Retry budget, exponential backoff and TTL for push jobs.

use pushgate_config::QueueConfig;
use std::time::Duration;

/// Per-queue job settings.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSettings {
    /// Total attempts, the first one included. Zero is treated as one.
    pub attempts: u32,
    /// Delay before the first retry.
    pub backoff: Duration,
    /// Lifetime of a job measured from enqueue.
    pub ttl: Duration,
    /// Jobs processed at the same time.
    pub concurrency: usize,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self::from(&QueueConfig::default())
    }
}

impl From<&QueueConfig> for JobSettings {
    fn from(config: &QueueConfig) -> Self {
        Self {
            attempts: config.attempts,
            backoff: Duration::from_millis(config.backoff_ms),
            ttl: Duration::from_secs(config.ttl_secs),
            concurrency: config.concurrency,
        }
    }
}

impl JobSettings {
    /// Delay before the retry that follows attempt number `attempts_made` (1-based).
    ///
    /// The first retry waits `backoff`, every further one twice as long as the previous.
    #[must_use]
    pub fn delay_after(&self, attempts_made: u32) -> Duration {
        let exponent = attempts_made.saturating_sub(1).min(31);
        self.backoff.saturating_mul(1u32 << exponent)
    }

    /// Whether another attempt is allowed after `attempts_made` attempts.
    #[must_use]
    pub fn should_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.attempts.max(1)
    }

    pub(crate) fn permits(&self) -> usize {
        self.concurrency.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles() {
        let settings = JobSettings {
            backoff: Duration::from_secs(2),
            ..Default::default()
        };
        assert_eq!(settings.delay_after(1), Duration::from_secs(2));
        assert_eq!(settings.delay_after(2), Duration::from_secs(4));
        assert_eq!(settings.delay_after(3), Duration::from_secs(8));
    }

    #[test]
    fn retry_budget() {
        let settings = JobSettings {
            attempts: 3,
            ..Default::default()
        };
        assert!(settings.should_retry(1));
        assert!(settings.should_retry(2));
        assert!(!settings.should_retry(3));

        let once = JobSettings {
            attempts: 0,
            ..Default::default()
        };
        assert!(!once.should_retry(1));
    }

    #[test]
    fn huge_attempt_numbers_do_not_overflow() {
        let settings = JobSettings::default();
        assert_eq!(settings.delay_after(u32::MAX), settings.delay_after(32));
    }
}
