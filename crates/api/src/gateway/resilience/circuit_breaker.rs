//! Count-based sliding window circuit breaker.

use std::collections::VecDeque;
use std::fmt;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::CircuitBreakerConfig;
use crate::gateway::GatewayError;

/// Externally visible breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Closed => "CLOSED",
            Self::Open => "OPEN",
            Self::HalfOpen => "HALF_OPEN",
        })
    }
}

#[derive(Debug)]
enum Phase {
    /// `window` holds the outcome of recent calls, `true` for failure.
    Closed { window: VecDeque<bool> },
    Open { until: Instant },
    HalfOpen { issued: u32, succeeded: u32 },
}

impl Phase {
    const fn state(&self) -> CircuitState {
        match self {
            Self::Closed { .. } => CircuitState::Closed,
            Self::Open { .. } => CircuitState::Open,
            Self::HalfOpen { .. } => CircuitState::HalfOpen,
        }
    }
}

#[derive(Debug)]
struct Inner {
    phase: Phase,
    /// Bumped on every transition so outcomes from a previous phase are ignored.
    generation: u64,
}

/// Guards one gateway operation.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: &'static str,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(name: &'static str, config: CircuitBreakerConfig) -> Self {
        Self {
            name,
            config,
            inner: Mutex::new(Inner {
                phase: Phase::Closed {
                    window: VecDeque::with_capacity(config.sliding_window_size),
                },
                generation: 0,
            }),
        }
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Current state. An open breaker whose cooldown has elapsed still
    /// reports `Open` until the next call probes it.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.inner.lock().phase.state()
    }

    /// Ask to make a call.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::CircuitOpen`] while open, or while half-open
    /// with every trial call already issued.
    pub fn try_acquire(&self) -> Result<CallPermit<'_>, GatewayError> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let probe = match &mut inner.phase {
            Phase::Closed { .. } => false,
            Phase::Open { until } => {
                if Instant::now() < *until {
                    return Err(GatewayError::CircuitOpen(self.name));
                }
                true
            }
            Phase::HalfOpen { issued, .. } => {
                if *issued >= self.config.half_open_calls {
                    return Err(GatewayError::CircuitOpen(self.name));
                }
                *issued += 1;
                false
            }
        };
        if probe {
            self.transition(
                inner,
                Phase::HalfOpen {
                    issued: 1,
                    succeeded: 0,
                },
            );
        }

        Ok(CallPermit {
            breaker: self,
            generation: inner.generation,
            recorded: false,
        })
    }

    fn record(&self, generation: u64, failed: bool) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        if inner.generation != generation {
            return;
        }

        let next = match &mut inner.phase {
            Phase::Closed { window } => {
                window.push_back(failed);
                while window.len() > self.config.sliding_window_size {
                    window.pop_front();
                }
                self.exceeds_threshold(window).then(|| self.open_phase())
            }
            Phase::HalfOpen { succeeded, .. } => {
                if failed {
                    Some(self.open_phase())
                } else {
                    *succeeded += 1;
                    (*succeeded >= self.config.half_open_calls).then(|| Phase::Closed {
                        window: VecDeque::with_capacity(self.config.sliding_window_size),
                    })
                }
            }
            Phase::Open { .. } => None,
        };

        if let Some(phase) = next {
            self.transition(inner, phase);
        }
    }

    fn exceeds_threshold(&self, window: &VecDeque<bool>) -> bool {
        if window.len() < self.config.minimum_calls || window.is_empty() {
            return false;
        }
        let failures = window.iter().filter(|failed| **failed).count();
        #[allow(clippy::cast_precision_loss)]
        let rate = failures as f32 * 100.0 / window.len() as f32;
        rate >= self.config.failure_rate_threshold
    }

    fn open_phase(&self) -> Phase {
        Phase::Open {
            until: Instant::now() + self.config.open_cooldown,
        }
    }

    fn transition(&self, inner: &mut Inner, phase: Phase) {
        let from = inner.phase.state();
        let to = phase.state();
        inner.phase = phase;
        inner.generation += 1;

        if to == CircuitState::Open {
            warn!(breaker = self.name, %from, %to, "Circuit breaker opened");
        } else {
            info!(breaker = self.name, %from, %to, "Circuit breaker state changed");
        }
    }
}

/// Permission for one call. Report the outcome with [`CallPermit::success`]
/// or [`CallPermit::failure`]; dropping an unreported permit counts as a
/// failure.
#[derive(Debug)]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    recorded: bool,
}

impl CallPermit<'_> {
    pub fn success(mut self) {
        self.recorded = true;
        self.breaker.record(self.generation, false);
    }

    pub fn failure(mut self) {
        self.recorded = true;
        self.breaker.record(self.generation, true);
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.recorded {
            self.breaker.record(self.generation, true);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn breaker(threshold: f32, minimum: usize, window: usize) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                failure_rate_threshold: threshold,
                minimum_calls: minimum,
                sliding_window_size: window,
                open_cooldown: Duration::from_secs(5),
                half_open_calls: 2,
            },
        )
    }

    fn fail(cb: &CircuitBreaker) {
        cb.try_acquire().unwrap().failure();
    }

    fn succeed(cb: &CircuitBreaker) {
        cb.try_acquire().unwrap().success();
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_minimum_failures() {
        let cb = breaker(50.0, 4, 8);
        for _ in 0..3 {
            fail(&cb);
            assert_eq!(cb.state(), CircuitState::Closed);
        }
        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(matches!(
            cb.try_acquire(),
            Err(GatewayError::CircuitOpen("test"))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stays_closed_below_threshold() {
        let cb = breaker(50.0, 4, 8);
        succeed(&cb);
        succeed(&cb);
        succeed(&cb);
        fail(&cb);
        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_forgets_old_calls() {
        let cb = breaker(50.0, 4, 4);
        fail(&cb);
        succeed(&cb);
        succeed(&cb);
        succeed(&cb);
        // the first failure slides out of the window
        succeed(&cb);
        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_after_cooldown_then_closes() {
        let cb = breaker(50.0, 2, 4);
        fail(&cb);
        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(5)).await;
        let first = cb.try_acquire().unwrap();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        let second = cb.try_acquire().unwrap();
        assert!(cb.try_acquire().is_err(), "only two trial calls allowed");

        first.success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        second.success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens() {
        let cb = breaker(50.0, 2, 4);
        fail(&cb);
        fail(&cb);
        tokio::time::advance(Duration::from_secs(5)).await;

        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Open);
        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(cb.try_acquire().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_permit_counts_as_failure() {
        let cb = breaker(100.0, 1, 1);
        drop(cb.try_acquire().unwrap());
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_outcome_ignored_after_transition() {
        let cb = breaker(50.0, 2, 4);
        let late = cb.try_acquire().unwrap();
        fail(&cb);
        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(5)).await;
        succeed(&cb);
        late.failure();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }
}
