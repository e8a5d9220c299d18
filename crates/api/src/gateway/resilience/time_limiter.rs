//! Per-attempt wall-clock bound.

use std::future::Future;

use tracing::warn;

use crate::config::TimeLimiterConfig;
use crate::gateway::GatewayError;

#[derive(Debug, Clone, Copy)]
pub struct TimeLimiter {
    config: TimeLimiterConfig,
}

impl TimeLimiter {
    #[must_use]
    pub const fn new(config: TimeLimiterConfig) -> Self {
        Self { config }
    }

    /// Run `call` on its own task, failing with [`GatewayError::Timeout`]
    /// once the bound elapses. The task is aborted on timeout when
    /// `cancel_on_timeout` is set and left to finish otherwise.
    ///
    /// # Errors
    ///
    /// Returns the call's own error, or `Timeout`.
    pub async fn run<F, T>(&self, name: &'static str, call: F) -> Result<T, GatewayError>
    where
        F: Future<Output = Result<T, GatewayError>> + Send + 'static,
        T: Send + 'static,
    {
        let mut handle = tokio::spawn(call);
        match tokio::time::timeout(self.config.timeout, &mut handle).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(join_error)) => Err(GatewayError::System(format!(
                "gateway call task failed: {join_error}"
            ))),
            Err(_) => {
                if self.config.cancel_on_timeout {
                    handle.abort();
                }
                warn!(
                    operation = name,
                    timeout_ms = u64::try_from(self.config.timeout.as_millis()).unwrap_or(u64::MAX),
                    "Gateway call timed out"
                );
                Err(GatewayError::Timeout(self.config.timeout))
            }
        }
    }
}
