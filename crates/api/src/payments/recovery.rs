//! Background reconciliation of payments with the gateway.
//!
//! Two duties run on their own timers:
//!
//! - the recovery sweep re-queries `PENDING` payments older than the
//!   staleness threshold and settles them from the gateway's answer
//! - the archival sweep moves terminal payments older than the retention
//!   window to `ARCHIVED`
//!
//! Both can also be triggered on demand. A failure on one payment never
//! stops the sweep.

use chrono::{DateTime, NaiveTime, Utc};
use mercato_core::{OrderId, PaymentStatus};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::PaymentError;
use super::model::{GatewayStatus, Payment, Resolution};
use crate::config::SchedulerConfig;
use crate::gateway::{GatewayError, GatewayResult, PaymentGateway};
use crate::store::{Store, UnitOfWork};

/// Failure reason when the gateway could not be asked.
pub const QUERY_FAILED_REASON: &str = "payment timed out: gateway status check failed";

/// Failure reason when the gateway has no transaction for the order.
pub const NO_TRANSACTION_REASON: &str = "payment timed out: no transaction found at gateway";

/// What recovery did to one payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecoveryOutcome {
    Completed,
    Failed,
    StillPending,
    /// Failed because the gateway could not confirm it.
    TimedOut,
    /// Not `PENDING` any more; left alone.
    Skipped,
}

/// Counts from one recovery sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoverySummary {
    pub examined: usize,
    pub completed: usize,
    pub failed: usize,
    pub still_pending: usize,
    pub timed_out: usize,
    pub skipped: usize,
    pub errors: usize,
}

impl RecoverySummary {
    fn record(&mut self, outcome: RecoveryOutcome) {
        match outcome {
            RecoveryOutcome::Completed => self.completed += 1,
            RecoveryOutcome::Failed => self.failed += 1,
            RecoveryOutcome::StillPending => self.still_pending += 1,
            RecoveryOutcome::TimedOut => self.timed_out += 1,
            RecoveryOutcome::Skipped => self.skipped += 1,
        }
    }
}

/// Counts from one archival sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveSummary {
    pub examined: usize,
    pub archived: usize,
    pub skipped: usize,
    pub errors: usize,
}

/// Periodic and on-demand payment reconciliation.
#[derive(Clone)]
pub struct PaymentRecoveryScheduler<S, G> {
    store: S,
    gateway: G,
    config: SchedulerConfig,
}

impl<S: Store, G: PaymentGateway> PaymentRecoveryScheduler<S, G> {
    pub const fn new(store: S, gateway: G, config: SchedulerConfig) -> Self {
        Self {
            store,
            gateway,
            config,
        }
    }

    /// Settle every stale `PENDING` payment from the gateway's answer.
    ///
    /// # Errors
    ///
    /// Returns an error only if the stale payments cannot be listed.
    #[instrument(skip(self))]
    pub async fn recover_pending_payments(&self) -> Result<RecoverySummary, PaymentError> {
        let cutoff = Utc::now() - self.config.pending_staleness;
        let pending = self.store.find_stale_pending_payments(cutoff).await?;

        let mut summary = RecoverySummary::default();
        if pending.is_empty() {
            debug!("No stale pending payments");
            return Ok(summary);
        }

        for payment in &pending {
            summary.examined += 1;
            match self.recover_one(payment).await {
                Ok(outcome) => summary.record(outcome),
                Err(e) => {
                    error!(order_id = %payment.order_id(), error = %e, "Payment recovery failed");
                    summary.errors += 1;
                }
            }
        }

        info!(
            examined = summary.examined,
            completed = summary.completed,
            failed = summary.failed,
            still_pending = summary.still_pending,
            timed_out = summary.timed_out,
            skipped = summary.skipped,
            errors = summary.errors,
            "Payment recovery sweep finished"
        );
        Ok(summary)
    }

    /// Recover one order's payment on request. A payment that is no longer
    /// `PENDING` is left as is.
    ///
    /// # Errors
    ///
    /// Returns `PaymentNotFound` if the order has no payment.
    #[instrument(skip(self))]
    pub async fn manual_recovery(&self, order_id: OrderId) -> Result<RecoveryOutcome, PaymentError> {
        let payment = self
            .store
            .find_payment_by_order(order_id)
            .await?
            .ok_or(PaymentError::PaymentNotFound(order_id))?;
        self.recover_one(&payment).await
    }

    /// Archive terminal payments past the retention window.
    ///
    /// # Errors
    ///
    /// Returns an error only if the candidates cannot be listed.
    #[instrument(skip(self))]
    pub async fn archive_terminal_payments(&self) -> Result<ArchiveSummary, PaymentError> {
        let cutoff = Utc::now() - self.config.retention;
        let candidates = self.store.find_archivable_payments(cutoff).await?;

        let mut summary = ArchiveSummary::default();
        for payment in &candidates {
            summary.examined += 1;
            match self.archive_one(payment.order_id()).await {
                Ok(true) => summary.archived += 1,
                Ok(false) => summary.skipped += 1,
                Err(e) => {
                    error!(order_id = %payment.order_id(), error = %e, "Payment archival failed");
                    summary.errors += 1;
                }
            }
        }

        info!(
            examined = summary.examined,
            archived = summary.archived,
            skipped = summary.skipped,
            errors = summary.errors,
            "Payment archival sweep finished"
        );
        Ok(summary)
    }

    /// Start the recovery and archival loops. Both stop when `shutdown` is
    /// cancelled.
    pub fn spawn(self, shutdown: CancellationToken) -> SchedulerHandles {
        let recovery = tokio::spawn(self.clone().run_recovery(shutdown.clone()));
        let archival = tokio::spawn(self.run_archival(shutdown));
        SchedulerHandles { recovery, archival }
    }

    async fn run_recovery(self, shutdown: CancellationToken) {
        let period = self.config.recovery_interval;
        if period.is_zero() {
            error!("Payment recovery interval is zero; recovery loop not started");
            return;
        }
        info!(interval_ms = u64::try_from(period.as_millis()).unwrap_or(u64::MAX), "Payment recovery loop started");

        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.recover_pending_payments().await {
                        error!(error = %e, "Payment recovery sweep aborted");
                    }
                }
                () = shutdown.cancelled() => {
                    info!("Payment recovery loop stopped");
                    return;
                }
            }
        }
    }

    async fn run_archival(self, shutdown: CancellationToken) {
        let at = self.config.archival_daily_at;
        info!(daily_at = %at.format("%H:%M"), "Payment archival loop started");

        loop {
            let now = Utc::now();
            let next = next_daily_run(now, at);
            let wait = (next - now)
                .to_std()
                .unwrap_or(std::time::Duration::from_secs(60));
            debug!(next_run = %next, "Next payment archival scheduled");

            tokio::select! {
                () = tokio::time::sleep(wait) => {
                    if let Err(e) = self.archive_terminal_payments().await {
                        error!(error = %e, "Payment archival sweep aborted");
                    }
                }
                () = shutdown.cancelled() => {
                    info!("Payment archival loop stopped");
                    return;
                }
            }
        }
    }

    async fn recover_one(&self, payment: &Payment) -> Result<RecoveryOutcome, PaymentError> {
        if payment.status() != PaymentStatus::Pending {
            return Ok(RecoveryOutcome::Skipped);
        }
        let order_id = payment.order_id();
        let lookup = self.lookup(payment).await;

        let now = Utc::now();
        let mut uow = self.store.begin().await?;
        let mut current = uow
            .lock_payment(order_id)
            .await?
            .ok_or(PaymentError::PaymentNotFound(order_id))?;
        if current.status() != PaymentStatus::Pending {
            // settled by a callback while the gateway was being queried
            return Ok(RecoveryOutcome::Skipped);
        }

        let outcome = match lookup {
            Ok(Some(result)) => {
                if current.payment_key().is_none() {
                    current.assign_payment_key(&result.transaction_key, now)?;
                }
                match current.apply_gateway_result(&result, now)? {
                    Resolution::Completed => RecoveryOutcome::Completed,
                    Resolution::Failed => RecoveryOutcome::Failed,
                    Resolution::StillPending => RecoveryOutcome::StillPending,
                }
            }
            Ok(None) if current.created_at() <= now - self.config.pending_staleness => {
                current.fail(NO_TRANSACTION_REASON, now)?;
                RecoveryOutcome::TimedOut
            }
            Ok(None) => RecoveryOutcome::StillPending,
            Err(error) => {
                warn!(order_id = %order_id, error = %error, "Gateway status check failed");
                current.fail(QUERY_FAILED_REASON, now)?;
                RecoveryOutcome::TimedOut
            }
        };

        if current != *payment {
            uow.save_payment(&current).await?;
            uow.commit().await?;
        }

        info!(order_id = %order_id, ?outcome, status = %current.status(), "Payment reconciled");
        Ok(outcome)
    }

    async fn lookup(&self, payment: &Payment) -> Result<Option<GatewayResult>, GatewayError> {
        if let Some(key) = payment.payment_key() {
            let detail = self.gateway.query_status(key).await?;
            return Ok(Some(detail.result()));
        }

        let recorded = self
            .gateway
            .query_by_order(&payment.order_id().to_string())
            .await?;
        Ok(pick_transaction(recorded.transactions))
    }

    async fn archive_one(&self, order_id: OrderId) -> Result<bool, PaymentError> {
        let mut uow = self.store.begin().await?;
        let Some(mut payment) = uow.lock_payment(order_id).await? else {
            return Ok(false);
        };
        if !payment.status().is_archivable() {
            return Ok(false);
        }

        payment.archive(Utc::now())?;
        uow.save_payment(&payment).await?;
        uow.commit().await?;
        Ok(true)
    }
}

/// Handles to the two background loops.
#[derive(Debug)]
pub struct SchedulerHandles {
    recovery: JoinHandle<()>,
    archival: JoinHandle<()>,
}

impl SchedulerHandles {
    /// Wait for both loops to exit.
    pub async fn join(self) {
        for (name, handle) in [("recovery", self.recovery), ("archival", self.archival)] {
            if let Err(e) = handle.await {
                error!(task = name, error = %e, "Payment scheduler task panicked");
            }
        }
    }
}

/// Prefer a settled transaction over in-flight ones, then the most recent.
fn pick_transaction(transactions: Vec<GatewayResult>) -> Option<GatewayResult> {
    let settled = transactions.iter().rposition(|t| {
        matches!(
            GatewayStatus::parse(&t.status),
            GatewayStatus::Success | GatewayStatus::Failed
        )
    });
    match settled {
        Some(index) => transactions.into_iter().nth(index),
        None => transactions.into_iter().last(),
    }
}

/// The first occurrence of `at` (UTC) strictly after `now`.
#[must_use]
pub fn next_daily_run(now: DateTime<Utc>, at: NaiveTime) -> DateTime<Utc> {
    let today = now.date_naive().and_time(at).and_utc();
    if now < today {
        today
    } else {
        today + chrono::Duration::days(1)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use chrono::{Duration, TimeZone};
    use mercato_core::{CardNumber, Money, UserId};
    use parking_lot::Mutex;

    use super::*;
    use crate::gateway::{OrderTransactions, SubmitRequest, TransactionDetail};
    use crate::payments::NewPayment;
    use crate::store::MemoryStore;

    /// Gateway answering status queries from fixed tables.
    #[derive(Clone, Default)]
    struct StatusTable {
        by_key: Arc<Mutex<HashMap<String, Result<(String, Option<String>), GatewayError>>>>,
        by_order: Arc<Mutex<HashMap<String, Vec<GatewayResult>>>>,
    }

    impl StatusTable {
        fn answer(&self, key: &str, status: &str, reason: Option<&str>) {
            self.by_key.lock().insert(
                key.to_string(),
                Ok((status.to_string(), reason.map(str::to_string))),
            );
        }

        fn fail(&self, key: &str, error: GatewayError) {
            self.by_key.lock().insert(key.to_string(), Err(error));
        }
    }

    impl PaymentGateway for StatusTable {
        async fn submit(&self, _request: &SubmitRequest) -> Result<GatewayResult, GatewayError> {
            Err(GatewayError::System("not used".to_string()))
        }

        async fn query_status(&self, key: &str) -> Result<TransactionDetail, GatewayError> {
            let entry = self
                .by_key
                .lock()
                .get(key)
                .cloned()
                .unwrap_or_else(|| Err(GatewayError::System("unknown transaction".to_string())));
            let (status, reason) = entry?;
            Ok(TransactionDetail {
                transaction_key: key.to_string(),
                order_id: String::new(),
                card_type: "KB".to_string(),
                card_no: "1111-****-****-4444".to_string(),
                amount: 5000,
                status,
                reason,
            })
        }

        async fn query_by_order(&self, order_id: &str) -> Result<OrderTransactions, GatewayError> {
            Ok(OrderTransactions {
                order_id: order_id.to_string(),
                transactions: self.by_order.lock().get(order_id).cloned().unwrap_or_default(),
            })
        }
    }

    fn config() -> SchedulerConfig {
        SchedulerConfig {
            pending_staleness: Duration::minutes(30),
            retention: Duration::days(7),
            ..SchedulerConfig::default()
        }
    }

    async fn payment(store: &MemoryStore, order: i64, key: Option<&str>, age: Duration) -> OrderId {
        let order_id = OrderId::new(order);
        store
            .insert_payment(NewPayment {
                user_id: UserId::new(1),
                order_id,
                card_type: "KB".to_string(),
                card_no: CardNumber::parse("1111-2222-3333-4444").unwrap(),
                amount: Money::new(5000).unwrap(),
                callback_url: "http://localhost/cb".to_string(),
            })
            .await
            .unwrap();
        if let Some(key) = key {
            let mut uow = store.begin().await.unwrap();
            let mut p = uow.lock_payment(order_id).await.unwrap().unwrap();
            p.assign_payment_key(key, Utc::now()).unwrap();
            uow.save_payment(&p).await.unwrap();
            uow.commit().await.unwrap();
        }
        store.backdate_payment(order_id, age);
        order_id
    }

    async fn status_of(store: &MemoryStore, order_id: OrderId) -> Payment {
        store.find_payment_by_order(order_id).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_recovery_applies_gateway_outcomes() {
        let store = MemoryStore::new();
        let gateway = StatusTable::default();
        let stale = Duration::minutes(45);
        let ok = payment(&store, 1, Some("TR-1"), stale).await;
        let declined = payment(&store, 2, Some("TR-2"), stale).await;
        let waiting = payment(&store, 3, Some("TR-3"), stale).await;
        gateway.answer("TR-1", "SUCCESS", None);
        gateway.answer("TR-2", "FAILED", Some("limit exceeded"));
        gateway.answer("TR-3", "PENDING", None);

        let scheduler = PaymentRecoveryScheduler::new(store.clone(), gateway, config());
        let summary = scheduler.recover_pending_payments().await.unwrap();
        assert_eq!(summary.examined, 3);
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.still_pending, 1);

        let completed = status_of(&store, ok).await;
        assert_eq!(completed.status(), PaymentStatus::Completed);
        assert_eq!(completed.transaction_id(), Some("TR-1"));
        let failed = status_of(&store, declined).await;
        assert_eq!(failed.failure_reason(), Some("limit exceeded"));
        assert_eq!(status_of(&store, waiting).await.status(), PaymentStatus::Pending);
    }

    #[tokio::test]
    async fn test_query_failure_is_isolated() {
        let store = MemoryStore::new();
        let gateway = StatusTable::default();
        let stale = Duration::minutes(45);
        let broken = payment(&store, 1, Some("TR-1"), stale).await;
        let healthy = payment(&store, 2, Some("TR-2"), stale).await;
        gateway.fail("TR-1", GatewayError::Timeout(std::time::Duration::from_secs(3)));
        gateway.answer("TR-2", "SUCCESS", None);

        let scheduler = PaymentRecoveryScheduler::new(store.clone(), gateway, config());
        let summary = scheduler.recover_pending_payments().await.unwrap();
        assert_eq!(summary.timed_out, 1);
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.errors, 0);

        let timed_out = status_of(&store, broken).await;
        assert_eq!(timed_out.status(), PaymentStatus::Failed);
        assert_eq!(timed_out.failure_reason(), Some(QUERY_FAILED_REASON));
        assert_eq!(status_of(&store, healthy).await.status(), PaymentStatus::Completed);
    }

    #[tokio::test]
    async fn test_fresh_pending_payments_not_swept() {
        let store = MemoryStore::new();
        let gateway = StatusTable::default();
        let fresh = payment(&store, 1, Some("TR-1"), Duration::minutes(5)).await;
        gateway.answer("TR-1", "SUCCESS", None);

        let scheduler = PaymentRecoveryScheduler::new(store.clone(), gateway, config());
        let summary = scheduler.recover_pending_payments().await.unwrap();
        assert_eq!(summary, RecoverySummary::default());
        assert_eq!(status_of(&store, fresh).await.status(), PaymentStatus::Pending);
    }

    #[tokio::test]
    async fn test_payment_without_key_uses_order_lookup() {
        let store = MemoryStore::new();
        let gateway = StatusTable::default();
        let found = payment(&store, 1, None, Duration::minutes(45)).await;
        let missing = payment(&store, 2, None, Duration::minutes(45)).await;
        gateway.by_order.lock().insert(
            "1".to_string(),
            vec![
                GatewayResult {
                    transaction_key: "TR-old".to_string(),
                    status: "FAILED".to_string(),
                    reason: Some("declined".to_string()),
                },
                GatewayResult {
                    transaction_key: "TR-new".to_string(),
                    status: "PENDING".to_string(),
                    reason: None,
                },
            ],
        );

        let scheduler = PaymentRecoveryScheduler::new(store.clone(), gateway, config());
        let summary = scheduler.recover_pending_payments().await.unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.timed_out, 1);

        let settled = status_of(&store, found).await;
        assert_eq!(settled.payment_key(), Some("TR-old"));
        assert_eq!(settled.status(), PaymentStatus::Failed);
        let timed_out = status_of(&store, missing).await;
        assert_eq!(timed_out.failure_reason(), Some(NO_TRANSACTION_REASON));
    }

    #[tokio::test]
    async fn test_manual_recovery() {
        let store = MemoryStore::new();
        let gateway = StatusTable::default();
        let order_id = payment(&store, 1, Some("TR-1"), Duration::minutes(1)).await;
        gateway.answer("TR-1", "SUCCESS", None);
        let scheduler = PaymentRecoveryScheduler::new(store.clone(), gateway, config());

        assert_eq!(
            scheduler.manual_recovery(order_id).await.unwrap(),
            RecoveryOutcome::Completed
        );
        assert_eq!(
            scheduler.manual_recovery(order_id).await.unwrap(),
            RecoveryOutcome::Skipped
        );
        assert!(matches!(
            scheduler.manual_recovery(OrderId::new(404)).await,
            Err(PaymentError::PaymentNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_archival_moves_old_terminal_payments() {
        let store = MemoryStore::new();
        let gateway = StatusTable::default();
        let old = payment(&store, 1, Some("TR-1"), Duration::minutes(45)).await;
        let recent = payment(&store, 2, Some("TR-2"), Duration::minutes(45)).await;
        let pending = payment(&store, 3, Some("TR-3"), Duration::days(10)).await;
        gateway.answer("TR-1", "SUCCESS", None);
        gateway.answer("TR-2", "FAILED", None);
        gateway.answer("TR-3", "PENDING", None);

        let scheduler = PaymentRecoveryScheduler::new(store.clone(), gateway, config());
        scheduler.recover_pending_payments().await.unwrap();
        store.backdate_payment(old, Duration::days(8));

        let summary = scheduler.archive_terminal_payments().await.unwrap();
        assert_eq!(summary.archived, 1);
        assert_eq!(status_of(&store, old).await.status(), PaymentStatus::Archived);
        assert_eq!(status_of(&store, recent).await.status(), PaymentStatus::Failed);
        assert_eq!(status_of(&store, pending).await.status(), PaymentStatus::Pending);

        let again = scheduler.archive_terminal_payments().await.unwrap();
        assert_eq!(again.archived, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loops_stop_on_shutdown() {
        let store = MemoryStore::new();
        let scheduler = PaymentRecoveryScheduler::new(store, StatusTable::default(), config());
        let shutdown = CancellationToken::new();
        let handles = scheduler.spawn(shutdown.clone());

        tokio::time::sleep(std::time::Duration::from_secs(600)).await;
        shutdown.cancel();
        handles.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_skips_recovery_loop() {
        let store = MemoryStore::new();
        let mut config = config();
        config.recovery_interval = std::time::Duration::ZERO;
        let scheduler = PaymentRecoveryScheduler::new(store, StatusTable::default(), config);
        let shutdown = CancellationToken::new();
        let handles = scheduler.spawn(shutdown.clone());

        handles.recovery.await.unwrap();
        assert!(!handles.archival.is_finished());

        shutdown.cancel();
        handles.archival.await.unwrap();
    }

    #[test]
    fn test_next_daily_run_later_today() {
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 1, 30, 0).unwrap();
        let at = NaiveTime::from_hms_opt(2, 0, 0).unwrap();
        assert_eq!(
            next_daily_run(now, at),
            Utc.with_ymd_and_hms(2025, 3, 10, 2, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_next_daily_run_rolls_to_tomorrow() {
        let at = NaiveTime::from_hms_opt(2, 0, 0).unwrap();
        let exactly = Utc.with_ymd_and_hms(2025, 12, 31, 2, 0, 0).unwrap();
        assert_eq!(
            next_daily_run(exactly, at),
            Utc.with_ymd_and_hms(2026, 1, 1, 2, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_pick_transaction_prefers_settled() {
        let tx = |key: &str, status: &str| GatewayResult {
            transaction_key: key.to_string(),
            status: status.to_string(),
            reason: None,
        };
        let picked = pick_transaction(vec![tx("a", "SUCCESS"), tx("b", "PENDING")]).unwrap();
        assert_eq!(picked.transaction_key, "a");
        let picked = pick_transaction(vec![tx("a", "PENDING"), tx("b", "approved")]).unwrap();
        assert_eq!(picked.transaction_key, "b");
        assert!(pick_transaction(Vec::new()).is_none());
    }
}
