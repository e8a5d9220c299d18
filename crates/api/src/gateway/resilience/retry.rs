//! Exponential backoff schedule.

use std::time::Duration;

use crate::config::RetryConfig;
use crate::gateway::GatewayError;

/// Upper bound on any single backoff delay.
pub const MAX_BACKOFF: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    #[must_use]
    pub const fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Delay after failed attempt number `attempt` (1-based):
    /// `base * multiplier^(attempt - 1)`, capped at [`MAX_BACKOFF`].
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.config.backoff_base.as_secs_f64() * self.config.backoff_multiplier.powi(exponent);
        Duration::try_from_secs_f64(secs).map_or(MAX_BACKOFF, |delay| delay.min(MAX_BACKOFF))
    }

    /// Whether another attempt should follow `error` on attempt `attempt`.
    #[must_use]
    pub const fn should_retry(&self, attempt: u32, error: &GatewayError) -> bool {
        attempt < self.config.max_attempts && !matches!(error, GatewayError::CircuitOpen(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_attempts: u32, base_ms: u64, multiplier: f64) -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            max_attempts,
            backoff_base: Duration::from_millis(base_ms),
            backoff_multiplier: multiplier,
        })
    }

    #[test]
    fn test_delay_grows_exponentially() {
        let p = policy(5, 500, 2.0);
        assert_eq!(p.delay_after(1), Duration::from_millis(500));
        assert_eq!(p.delay_after(2), Duration::from_millis(1000));
        assert_eq!(p.delay_after(3), Duration::from_millis(2000));
    }

    #[test]
    fn test_delay_capped() {
        let p = policy(50, 1000, 10.0);
        assert_eq!(p.delay_after(10), MAX_BACKOFF);
        assert_eq!(p.delay_after(u32::MAX), MAX_BACKOFF);
    }

    #[test]
    fn test_constant_backoff() {
        let p = policy(3, 200, 1.0);
        assert_eq!(p.delay_after(1), p.delay_after(3));
    }

    #[test]
    fn test_should_retry_until_exhausted() {
        let p = policy(3, 100, 2.0);
        let err = GatewayError::Network("connection refused".to_string());
        assert!(p.should_retry(1, &err));
        assert!(p.should_retry(2, &err));
        assert!(!p.should_retry(3, &err));
    }

    #[test]
    fn test_open_circuit_not_retried() {
        let p = policy(3, 100, 2.0);
        assert!(!p.should_retry(1, &GatewayError::CircuitOpen("payment-submit")));
    }
}
