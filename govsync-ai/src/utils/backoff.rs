//! AI call retry policy
//!
//! Exponential backoff with a ceiling and a bounded number of attempts.
//! The delay schedule is a pure function; sleeping goes through an injected
//! [`Clock`] so tests run without real waits.

use async_trait::async_trait;
use govsync_common::config::SyncConfig;
use std::time::Duration;

/// Backoff parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Total attempts including the first one
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            max_attempts: config.max_attempts.max(1),
        }
    }

    /// Delay after failed attempt `attempt` (1-based): `min(initial * 2^(n-1), max)`
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let factor = 1u32 << exponent;
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Next state after attempt `attempt` failed with a retryable error
    ///
    /// A server-provided wait (`Retry-After`) replaces the computed delay but
    /// is still capped at `max_delay`.
    pub fn after_failure(&self, attempt: u32, requested: Option<Duration>) -> RetryState {
        if attempt >= self.max_attempts {
            return RetryState::Deferred { attempts: attempt };
        }
        let delay = requested
            .map(|d| d.min(self.max_delay))
            .unwrap_or_else(|| self.delay_for_attempt(attempt));
        RetryState::Backoff { attempt, delay }
    }
}

/// Retry state of one candidate's AI call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    /// Attempt `n` is in flight
    Attempting(u32),
    /// Attempt `attempt` failed; wait `delay` before the next one
    Backoff { attempt: u32, delay: Duration },
    /// Retries exhausted (or the error was final)
    Deferred { attempts: u32 },
}

/// Time source for backoff sleeps
#[async_trait]
pub trait Clock: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Real clock backed by `tokio::time`
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1000),
            max_attempts: 5,
        }
    }

    #[test]
    fn test_delay_doubles_until_ceiling() {
        let policy = policy();
        let delays: Vec<u64> = (1..=6)
            .map(|n| policy.delay_for_attempt(n).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1000, 1000]);
    }

    #[test]
    fn test_delay_never_overflows() {
        let policy = policy();
        assert_eq!(policy.delay_for_attempt(u32::MAX), Duration::from_millis(1000));
    }

    #[test]
    fn test_after_failure_defers_on_last_attempt() {
        let policy = policy();
        assert_eq!(
            policy.after_failure(1, None),
            RetryState::Backoff {
                attempt: 1,
                delay: Duration::from_millis(100)
            }
        );
        assert_eq!(
            policy.after_failure(5, None),
            RetryState::Deferred { attempts: 5 }
        );
    }

    #[test]
    fn test_retry_after_is_honoured_but_capped() {
        let policy = policy();
        assert_eq!(
            policy.after_failure(1, Some(Duration::from_millis(700))),
            RetryState::Backoff {
                attempt: 1,
                delay: Duration::from_millis(700)
            }
        );
        assert_eq!(
            policy.after_failure(2, Some(Duration::from_secs(60))),
            RetryState::Backoff {
                attempt: 2,
                delay: Duration::from_millis(1000)
            }
        );
    }

    #[test]
    fn test_from_config_keeps_at_least_one_attempt() {
        let config = SyncConfig {
            max_attempts: 0,
            ..SyncConfig::default()
        };
        assert_eq!(RetryPolicy::from_config(&config).max_attempts, 1);
    }
}
