//! Operator-triggered payment reconciliation.
//!
//! Runs the same sweeps the API schedules, once, against the configured
//! database and payment gateway.
//!
//! # Usage
//!
//! ```bash
//! mercato payments recover
//! mercato payments recover --order-id 42
//! mercato payments archive
//! ```
//!
//! # Environment Variables
//!
//! Same as the API server: `MERCATO_DATABASE_URL`, `PG_*`, `PAYMENT_*`.

use mercato_api::config::{ApiConfig, ConfigError};
use mercato_api::gateway::{GatewayError, HttpGateway, ResilientGateway};
use mercato_api::payments::{PaymentError, PaymentRecoveryScheduler};
use mercato_api::store::{PgStore, create_pool};
use mercato_core::OrderId;
use thiserror::Error;

/// Errors from reconciliation commands.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database connection error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Gateway client error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Reconciliation failed: {0}")]
    Payment(#[from] PaymentError),

    #[error("Could not render summary: {0}")]
    Render(#[from] serde_json::Error),
}

type Scheduler = PaymentRecoveryScheduler<PgStore, ResilientGateway<HttpGateway>>;

async fn scheduler() -> Result<Scheduler, ReconcileError> {
    let config = ApiConfig::from_env()?;

    tracing::info!("Connecting to database...");
    let pool = create_pool(&config.database_url).await?;

    let transport = HttpGateway::new(&config.gateway)?;
    let gateway = ResilientGateway::new(transport, &config.gateway);

    Ok(PaymentRecoveryScheduler::new(
        PgStore::new(pool),
        gateway,
        config.scheduler,
    ))
}

/// Recover one payment, or sweep every stale pending payment.
///
/// # Errors
///
/// Returns `ReconcileError` if setup fails, the order has no payment, or the
/// pending payments cannot be listed.
pub async fn recover(order_id: Option<OrderId>) -> Result<(), ReconcileError> {
    let scheduler = scheduler().await?;

    if let Some(order_id) = order_id {
        let outcome = scheduler.manual_recovery(order_id).await?;
        tracing::info!(
            order_id = %order_id,
            outcome = %serde_json::to_string(&outcome)?,
            "Payment recovery finished"
        );
        return Ok(());
    }

    let summary = scheduler.recover_pending_payments().await?;
    tracing::info!(summary = %serde_json::to_string(&summary)?, "Recovery sweep finished");
    Ok(())
}

/// Archive terminal payments past the retention window.
///
/// # Errors
///
/// Returns `ReconcileError` if setup fails or the candidates cannot be listed.
pub async fn archive() -> Result<(), ReconcileError> {
    let scheduler = scheduler().await?;

    let summary = scheduler.archive_terminal_payments().await?;
    tracing::info!(summary = %serde_json::to_string(&summary)?, "Archival sweep finished");
    Ok(())
}
