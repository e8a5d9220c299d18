//! Integration tests for Mercato.
//!
//! # Running Tests
//!
//! ```bash
//! # In-process tests (router over the in-memory store, HTTP transport
//! # against a fake gateway)
//! cargo test -p mercato-integration-tests
//!
//! # Live tests against a running server
//! MERCATO_BASE_URL=http://localhost:3000 cargo test -p mercato-integration-tests -- --ignored
//! ```
//!
//! # Test Categories
//!
//! - `orders_api` - Order placement, coupons, and points through the router
//! - `payments_api` - Payment requests, callbacks, and admin sweeps
//! - `http_gateway` - `reqwest` transport and resilience against a fake gateway
//! - `live_server` - Smoke tests against a deployed server (ignored by default)
//!
//! This library holds the shared fixtures.

#![cfg_attr(not(test), forbid(unsafe_code))]
#![allow(clippy::missing_panics_doc)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{Method, Request, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use mercato_api::config::{
    CircuitBreakerConfig, GatewayConfig, ResilienceConfig, RetryConfig, SchedulerConfig,
    TimeLimiterConfig,
};
use mercato_api::gateway::{
    GatewayError, GatewayResult, OrderTransactions, PaymentGateway, SubmitRequest,
    TransactionDetail,
};
use mercato_api::state::AppState;
use mercato_api::store::MemoryStore;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{Value, json};
use tower::ServiceExt;
use url::Url;

pub const CALLBACK_URL: &str = "http://localhost:3000/api/v1/payments/callback";

// =============================================================================
// Scripted gateway
// =============================================================================

#[derive(Default)]
struct ScriptedInner {
    submit_answers: VecDeque<Result<GatewayResult, GatewayError>>,
    transactions: HashMap<String, TransactionDetail>,
    submitted: Vec<SubmitRequest>,
}

/// In-process [`PaymentGateway`] answering from a script.
///
/// Submissions pop queued answers (a network error once the queue is
/// empty). Queries answer from the recorded transactions.
#[derive(Clone, Default)]
pub struct ScriptedGateway {
    inner: Arc<Mutex<ScriptedInner>>,
}

impl ScriptedGateway {
    /// Queue the answer to the next submission.
    pub fn answer_submit(&self, answer: Result<GatewayResult, GatewayError>) {
        self.inner.lock().submit_answers.push_back(answer);
    }

    /// Record a transaction the gateway will report on queries.
    pub fn record_transaction(&self, key: &str, order_id: &str, status: &str, reason: Option<&str>) {
        self.inner.lock().transactions.insert(
            key.to_string(),
            TransactionDetail {
                transaction_key: key.to_string(),
                order_id: order_id.to_string(),
                card_type: "SAMSUNG".to_string(),
                card_no: "1234-5678-9814-1451".to_string(),
                amount: 5000,
                status: status.to_string(),
                reason: reason.map(str::to_string),
            },
        );
    }

    /// Every submission seen so far.
    pub fn submitted(&self) -> Vec<SubmitRequest> {
        self.inner.lock().submitted.clone()
    }
}

impl PaymentGateway for ScriptedGateway {
    async fn submit(&self, request: &SubmitRequest) -> Result<GatewayResult, GatewayError> {
        let mut inner = self.inner.lock();
        inner.submitted.push(request.clone());
        inner
            .submit_answers
            .pop_front()
            .unwrap_or_else(|| Err(GatewayError::Network("connection refused".to_string())))
    }

    async fn query_status(&self, transaction_key: &str) -> Result<TransactionDetail, GatewayError> {
        self.inner
            .lock()
            .transactions
            .get(transaction_key)
            .cloned()
            .ok_or_else(|| GatewayError::System(format!("unknown transaction {transaction_key}")))
    }

    async fn query_by_order(&self, order_id: &str) -> Result<OrderTransactions, GatewayError> {
        let transactions = self
            .inner
            .lock()
            .transactions
            .values()
            .filter(|t| t.order_id == order_id)
            .map(TransactionDetail::result)
            .collect();
        Ok(OrderTransactions {
            order_id: order_id.to_string(),
            transactions,
        })
    }
}

/// A submission the gateway accepted but has not settled.
#[must_use]
pub fn accepted(key: &str) -> Result<GatewayResult, GatewayError> {
    Ok(GatewayResult {
        transaction_key: key.to_string(),
        status: "PENDING".to_string(),
        reason: None,
    })
}

// =============================================================================
// In-process application
// =============================================================================

/// The full router over an in-memory store and a scripted gateway.
pub struct TestApp {
    pub store: MemoryStore,
    pub gateway: ScriptedGateway,
    router: Router,
}

impl TestApp {
    #[must_use]
    pub fn new() -> Self {
        let store = MemoryStore::new();
        let gateway = ScriptedGateway::default();
        let state = AppState::new(
            store.clone(),
            gateway.clone(),
            CALLBACK_URL,
            SchedulerConfig::default(),
        );

        Self {
            store,
            gateway,
            router: mercato_api::router(state),
        }
    }

    /// Send one request through the router and decode the JSON body.
    ///
    /// Non-JSON bodies come back as a JSON string.
    pub async fn send(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let request = builder.body(body).expect("Failed to build request");

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Router is infallible");

        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("Failed to read body");
        let value = serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
        (status, value)
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.send(Method::GET, uri, None).await
    }

    pub async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.send(Method::POST, uri, Some(body)).await
    }
}

impl Default for TestApp {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Fake gateway over HTTP
// =============================================================================

#[derive(Default)]
struct FakeGatewayInner {
    transactions: Mutex<Vec<TransactionDetail>>,
    /// Remaining calls answered with a `FAIL` envelope and HTTP 500.
    failures_left: AtomicUsize,
    /// Delay before every answer.
    delay: Mutex<Duration>,
    calls: AtomicUsize,
    merchant_ids: Mutex<Vec<String>>,
}

/// An axum server speaking the gateway's JSON API on a random local port.
#[derive(Clone)]
pub struct FakeGateway {
    inner: Arc<FakeGatewayInner>,
    base_url: Url,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderQuery {
    order_id: String,
}

impl FakeGateway {
    /// Start the server on `127.0.0.1:0`.
    pub async fn start() -> Self {
        let inner = Arc::new(FakeGatewayInner::default());

        let app = Router::new()
            .route("/api/v1/payments", post(fake_submit).get(fake_by_order))
            .route("/api/v1/payments/{key}", get(fake_status))
            .with_state(Arc::clone(&inner));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind fake gateway");
        let addr = listener.local_addr().expect("Fake gateway has no address");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("Fake gateway stopped");
        });

        let base_url = format!("http://{addr}/")
            .parse()
            .expect("Fake gateway URL is valid");
        Self { inner, base_url }
    }

    #[must_use]
    pub fn base_url(&self) -> Url {
        self.base_url.clone()
    }

    /// Answer the next `n` calls with a `FAIL` envelope.
    pub fn fail_next(&self, n: usize) {
        self.inner.failures_left.store(n, Ordering::SeqCst);
    }

    /// Delay every answer.
    pub fn set_delay(&self, delay: Duration) {
        *self.inner.delay.lock() = delay;
    }

    /// Overwrite the status of a recorded transaction.
    pub fn settle(&self, key: &str, status: &str, reason: Option<&str>) {
        for t in self.inner.transactions.lock().iter_mut() {
            if t.transaction_key == key {
                t.status = status.to_string();
                t.reason = reason.map(str::to_string);
            }
        }
    }

    /// Requests received so far, failed ones included.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.inner.calls.load(Ordering::SeqCst)
    }

    /// `X-USER-ID` header values received.
    #[must_use]
    pub fn merchant_ids(&self) -> Vec<String> {
        self.inner.merchant_ids.lock().clone()
    }
}

async fn intercept(inner: &FakeGatewayInner, headers: &axum::http::HeaderMap) -> Option<Value> {
    inner.calls.fetch_add(1, Ordering::SeqCst);
    if let Some(id) = headers.get("X-USER-ID").and_then(|v| v.to_str().ok()) {
        inner.merchant_ids.lock().push(id.to_string());
    }

    let delay = *inner.delay.lock();
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    let failing = inner
        .failures_left
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    failing.then(|| {
        json!({
            "meta": {"result": "FAIL", "errorCode": "INTERNAL_ERROR", "message": "temporarily unavailable"},
            "data": null
        })
    })
}

fn ok(data: Value) -> (StatusCode, Json<Value>) {
    (
        StatusCode::OK,
        Json(json!({"meta": {"result": "SUCCESS"}, "data": data})),
    )
}

async fn fake_submit(
    State(inner): State<Arc<FakeGatewayInner>>,
    headers: axum::http::HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    if let Some(fail) = intercept(&inner, &headers).await {
        return (StatusCode::INTERNAL_SERVER_ERROR, Json(fail));
    }

    let field = |name: &str| body[name].as_str().unwrap_or_default().to_string();
    let mut transactions = inner.transactions.lock();
    let key = format!("20260301:TR:{:06}", transactions.len() + 1);
    transactions.push(TransactionDetail {
        transaction_key: key.clone(),
        order_id: field("orderId"),
        card_type: field("cardType"),
        card_no: field("cardNo"),
        amount: field("amount").parse().unwrap_or_default(),
        status: "PENDING".to_string(),
        reason: None,
    });

    ok(json!({"transactionKey": key, "status": "PENDING", "reason": null}))
}

async fn fake_status(
    State(inner): State<Arc<FakeGatewayInner>>,
    headers: axum::http::HeaderMap,
    Path(key): Path<String>,
) -> (StatusCode, Json<Value>) {
    if let Some(fail) = intercept(&inner, &headers).await {
        return (StatusCode::INTERNAL_SERVER_ERROR, Json(fail));
    }

    let found = inner
        .transactions
        .lock()
        .iter()
        .find(|t| t.transaction_key == key)
        .cloned();
    match found {
        Some(detail) => ok(serde_json::to_value(detail).expect("Detail serializes")),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({
                "meta": {"result": "FAIL", "errorCode": "NOT_FOUND", "message": "no such transaction"},
                "data": null
            })),
        ),
    }
}

async fn fake_by_order(
    State(inner): State<Arc<FakeGatewayInner>>,
    headers: axum::http::HeaderMap,
    Query(query): Query<OrderQuery>,
) -> (StatusCode, Json<Value>) {
    if let Some(fail) = intercept(&inner, &headers).await {
        return (StatusCode::INTERNAL_SERVER_ERROR, Json(fail));
    }

    let transactions: Vec<Value> = inner
        .transactions
        .lock()
        .iter()
        .filter(|t| t.order_id == query.order_id)
        .map(|t| json!({"transactionKey": t.transaction_key, "status": t.status, "reason": t.reason}))
        .collect();
    ok(json!({"orderId": query.order_id, "transactions": transactions}))
}

/// Gateway settings pointing at `base_url` with test-sized timeouts.
#[must_use]
pub fn gateway_config(base_url: Url) -> GatewayConfig {
    let policy = ResilienceConfig {
        circuit_breaker: CircuitBreakerConfig {
            failure_rate_threshold: 50.0,
            minimum_calls: 4,
            sliding_window_size: 8,
            open_cooldown: Duration::from_millis(200),
            half_open_calls: 1,
        },
        retry: RetryConfig {
            max_attempts: 3,
            backoff_base: Duration::from_millis(20),
            backoff_multiplier: 2.0,
        },
        time_limiter: TimeLimiterConfig {
            timeout: Duration::from_millis(300),
            cancel_on_timeout: true,
        },
    };

    GatewayConfig {
        base_url,
        user_id: "135135".to_string(),
        callback_url: CALLBACK_URL.to_string(),
        connect_timeout: Duration::from_secs(1),
        read_timeout: Duration::from_secs(2),
        submit: policy.clone(),
        query: policy,
    }
}

/// A submission payload for `order_id`.
#[must_use]
pub fn submit_request(order_id: &str) -> SubmitRequest {
    SubmitRequest {
        order_id: order_id.to_string(),
        card_type: "SAMSUNG".to_string(),
        card_no: "1234-5678-9814-1451".to_string(),
        amount: "5000".to_string(),
        callback_url: CALLBACK_URL.to_string(),
    }
}
