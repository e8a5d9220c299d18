//! HTTP transport for the payment gateway.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};
use url::Url;

use super::{
    GatewayError, GatewayResult, OrderTransactions, PaymentGateway, SubmitRequest,
    TransactionDetail,
};
use crate::config::GatewayConfig;

const USER_ID_HEADER: &str = "X-USER-ID";

/// Gateway response envelope.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    meta: Meta,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Meta {
    result: String,
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl Meta {
    fn is_success(&self) -> bool {
        self.result == "SUCCESS"
    }

    fn describe(&self) -> String {
        match (&self.error_code, &self.message) {
            (Some(code), Some(message)) => format!("{code}: {message}"),
            (Some(code), None) => code.clone(),
            (None, Some(message)) => message.clone(),
            (None, None) => format!("gateway returned {}", self.result),
        }
    }
}

/// `reqwest`-backed [`PaymentGateway`].
#[derive(Clone)]
pub struct HttpGateway {
    inner: Arc<HttpGatewayInner>,
}

struct HttpGatewayInner {
    client: reqwest::Client,
    payments_url: Url,
    read_timeout: Duration,
}

impl HttpGateway {
    /// Build a client for the gateway described by `config`.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::System` if the merchant id is not a valid
    /// header value, the base URL cannot be extended, or the client fails
    /// to build.
    pub fn new(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            USER_ID_HEADER,
            HeaderValue::from_str(&config.user_id)
                .map_err(|e| GatewayError::System(format!("invalid merchant id: {e}")))?,
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(config.connect_timeout)
            .timeout(config.read_timeout)
            .build()
            .map_err(|e| GatewayError::System(format!("failed to build HTTP client: {e}")))?;

        let payments_url = config
            .base_url
            .join("api/v1/payments")
            .map_err(|e| GatewayError::System(format!("invalid gateway base URL: {e}")))?;

        Ok(Self {
            inner: Arc::new(HttpGatewayInner {
                client,
                payments_url,
                read_timeout: config.read_timeout,
            }),
        })
    }

    fn transaction_url(&self, transaction_key: &str) -> Result<Url, GatewayError> {
        let mut url = self.inner.payments_url.clone();
        url.path_segments_mut()
            .map_err(|()| GatewayError::System("gateway URL cannot have a path".to_string()))?
            .push(transaction_key);
        Ok(url)
    }

    fn order_url(&self, order_id: &str) -> Url {
        let mut url = self.inner.payments_url.clone();
        url.query_pairs_mut().append_pair("orderId", order_id);
        url
    }

    fn classify(&self, error: &reqwest::Error) -> GatewayError {
        if error.is_timeout() {
            GatewayError::Timeout(self.inner.read_timeout)
        } else if error.is_connect() || error.is_request() {
            GatewayError::Network(error.to_string())
        } else {
            GatewayError::System(error.to_string())
        }
    }

    async fn decode<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, GatewayError> {
        let status = response.status();
        let body = response.text().await.map_err(|e| self.classify(&e))?;

        let envelope: Envelope<T> = match serde_json::from_str(&body) {
            Ok(envelope) => envelope,
            Err(e) if status.is_success() => {
                return Err(GatewayError::System(format!(
                    "malformed gateway response: {e}"
                )));
            }
            Err(_) => {
                return Err(GatewayError::System(format!(
                    "gateway returned HTTP {status}"
                )));
            }
        };

        if !status.is_success() || !envelope.meta.is_success() {
            return Err(GatewayError::System(envelope.meta.describe()));
        }

        envelope
            .data
            .ok_or_else(|| GatewayError::System("gateway response has no data".to_string()))
    }
}

impl PaymentGateway for HttpGateway {
    #[instrument(skip(self, request), fields(order_id = %request.order_id))]
    async fn submit(&self, request: &SubmitRequest) -> Result<GatewayResult, GatewayError> {
        let response = self
            .inner
            .client
            .post(self.inner.payments_url.clone())
            .json(request)
            .send()
            .await
            .map_err(|e| self.classify(&e))?;

        let result: GatewayResult = self.decode(response).await?;
        debug!(
            transaction_key = %result.transaction_key,
            status = %result.status,
            "Payment submitted to gateway"
        );
        Ok(result)
    }

    #[instrument(skip(self))]
    async fn query_status(&self, transaction_key: &str) -> Result<TransactionDetail, GatewayError> {
        let url = self.transaction_url(transaction_key)?;
        let response = self
            .inner
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.classify(&e))?;

        self.decode(response).await
    }

    #[instrument(skip(self))]
    async fn query_by_order(&self, order_id: &str) -> Result<OrderTransactions, GatewayError> {
        let response = self
            .inner
            .client
            .get(self.order_url(order_id))
            .send()
            .await
            .map_err(|e| self.classify(&e))?;

        self.decode(response).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn gateway(base: &str) -> HttpGateway {
        let config = GatewayConfig {
            base_url: Url::parse(base).unwrap(),
            user_id: "135135".to_string(),
            callback_url: "http://localhost:3000/api/v1/payments/callback".to_string(),
            connect_timeout: Duration::from_secs(1),
            read_timeout: Duration::from_secs(2),
            submit: crate::config::ResilienceConfig::default(),
            query: crate::config::ResilienceConfig::default(),
        };
        HttpGateway::new(&config).unwrap()
    }

    #[test]
    fn test_payments_url_joined_to_base() {
        let gw = gateway("http://localhost:8082");
        assert_eq!(
            gw.inner.payments_url.as_str(),
            "http://localhost:8082/api/v1/payments"
        );
    }

    #[test]
    fn test_transaction_url_escapes_key() {
        let gw = gateway("http://localhost:8082/");
        let url = gw.transaction_url("20250816:TR:9577c5").unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:8082/api/v1/payments/20250816:TR:9577c5"
        );
        let url = gw.transaction_url("a/b").unwrap();
        assert_eq!(url.as_str(), "http://localhost:8082/api/v1/payments/a%2Fb");
    }

    #[test]
    fn test_order_url_has_query() {
        let gw = gateway("http://localhost:8082");
        assert_eq!(
            gw.order_url("1001").as_str(),
            "http://localhost:8082/api/v1/payments?orderId=1001"
        );
    }

    #[test]
    fn test_invalid_merchant_id_rejected() {
        let config = GatewayConfig {
            base_url: Url::parse("http://localhost:8082").unwrap(),
            user_id: "bad\nid".to_string(),
            callback_url: String::new(),
            connect_timeout: Duration::from_secs(1),
            read_timeout: Duration::from_secs(2),
            submit: crate::config::ResilienceConfig::default(),
            query: crate::config::ResilienceConfig::default(),
        };
        assert!(matches!(
            HttpGateway::new(&config),
            Err(GatewayError::System(_))
        ));
    }

    #[test]
    fn test_meta_describe() {
        let meta: Meta = serde_json::from_str(
            r#"{"result": "FAIL", "errorCode": "Bad Request", "message": "invalid card"}"#,
        )
        .unwrap();
        assert!(!meta.is_success());
        assert_eq!(meta.describe(), "Bad Request: invalid card");
    }
}
