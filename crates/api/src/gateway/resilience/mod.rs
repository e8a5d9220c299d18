//! Resilience decorators for gateway calls.
//!
//! Each operation gets its own [`ResiliencePolicy`], composed as
//! retry → circuit breaker → time limiter → transport. Retry is outermost,
//! so every attempt is recorded by the breaker and bounded by the limiter.
//! An open breaker fails the call at once and is never retried.

mod circuit_breaker;
mod retry;
mod time_limiter;

use std::future::Future;
use std::sync::Arc;

use tracing::warn;

pub use circuit_breaker::{CallPermit, CircuitBreaker, CircuitState};
pub use retry::{MAX_BACKOFF, RetryPolicy};
pub use time_limiter::TimeLimiter;

use super::{
    GatewayError, GatewayResult, OrderTransactions, PaymentGateway, SubmitRequest,
    TransactionDetail,
};
use crate::config::{GatewayConfig, ResilienceConfig};

pub const SUBMIT_BREAKER: &str = "payment-submit";
pub const QUERY_BREAKER: &str = "payment-query";

/// Retry, circuit breaker, and timeout for one operation.
#[derive(Debug)]
pub struct ResiliencePolicy {
    breaker: CircuitBreaker,
    retry: RetryPolicy,
    limiter: TimeLimiter,
}

impl ResiliencePolicy {
    #[must_use]
    pub fn new(name: &'static str, config: &ResilienceConfig) -> Self {
        Self {
            breaker: CircuitBreaker::new(name, config.circuit_breaker),
            retry: RetryPolicy::new(config.retry),
            limiter: TimeLimiter::new(config.time_limiter),
        }
    }

    #[must_use]
    pub const fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Run `make_call` under the policy, creating a fresh future per attempt.
    ///
    /// # Errors
    ///
    /// Returns the last attempt's error once retries are exhausted, or
    /// [`GatewayError::CircuitOpen`] as soon as the breaker rejects a call.
    pub async fn call<F, Fut, T>(&self, mut make_call: F) -> Result<T, GatewayError>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T, GatewayError>> + Send + 'static,
        T: Send + 'static,
    {
        let name = self.breaker.name();
        let max_attempts = self.retry.max_attempts();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let error = match self.attempt(make_call()).await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            if !self.retry.should_retry(attempt, &error) {
                if attempt > 1 {
                    warn!(operation = name, attempt, error = %error, "Gateway call failed after retries");
                }
                return Err(error);
            }

            let delay = self.retry.delay_after(attempt);
            warn!(
                operation = name,
                attempt,
                max_attempts,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %error,
                "Gateway call failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn attempt<Fut, T>(&self, call: Fut) -> Result<T, GatewayError>
    where
        Fut: Future<Output = Result<T, GatewayError>> + Send + 'static,
        T: Send + 'static,
    {
        let permit = self.breaker.try_acquire()?;
        let result = self.limiter.run(self.breaker.name(), call).await;
        if result.is_ok() {
            permit.success();
        } else {
            permit.failure();
        }
        result
    }
}

/// [`PaymentGateway`] decorator applying separate submit and query policies.
#[derive(Debug)]
pub struct ResilientGateway<G> {
    inner: G,
    submit: Arc<ResiliencePolicy>,
    query: Arc<ResiliencePolicy>,
}

impl<G: Clone> Clone for ResilientGateway<G> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            submit: Arc::clone(&self.submit),
            query: Arc::clone(&self.query),
        }
    }
}

impl<G: PaymentGateway> ResilientGateway<G> {
    #[must_use]
    pub fn new(inner: G, config: &GatewayConfig) -> Self {
        Self::with_policies(inner, &config.submit, &config.query)
    }

    #[must_use]
    pub fn with_policies(inner: G, submit: &ResilienceConfig, query: &ResilienceConfig) -> Self {
        Self {
            inner,
            submit: Arc::new(ResiliencePolicy::new(SUBMIT_BREAKER, submit)),
            query: Arc::new(ResiliencePolicy::new(QUERY_BREAKER, query)),
        }
    }

    #[must_use]
    pub fn submit_circuit(&self) -> CircuitState {
        self.submit.breaker().state()
    }

    #[must_use]
    pub fn query_circuit(&self) -> CircuitState {
        self.query.breaker().state()
    }
}

impl<G: PaymentGateway> PaymentGateway for ResilientGateway<G> {
    async fn submit(&self, request: &SubmitRequest) -> Result<GatewayResult, GatewayError> {
        let request = request.clone();
        self.submit
            .call(|| {
                let gateway = self.inner.clone();
                let request = request.clone();
                async move { gateway.submit(&request).await }
            })
            .await
    }

    async fn query_status(&self, transaction_key: &str) -> Result<TransactionDetail, GatewayError> {
        let key = transaction_key.to_string();
        self.query
            .call(|| {
                let gateway = self.inner.clone();
                let key = key.clone();
                async move { gateway.query_status(&key).await }
            })
            .await
    }

    async fn query_by_order(&self, order_id: &str) -> Result<OrderTransactions, GatewayError> {
        let order_id = order_id.to_string();
        self.query
            .call(|| {
                let gateway = self.inner.clone();
                let order_id = order_id.clone();
                async move { gateway.query_by_order(&order_id).await }
            })
            .await
    }
}
