//! Application state shared across handlers.

use std::sync::Arc;

use crate::config::SchedulerConfig;
use crate::gateway::PaymentGateway;
use crate::ledger::PointsLedger;
use crate::orders::OrderCoordinator;
use crate::payments::{PaymentRecoveryScheduler, PaymentService};
use crate::store::Backend;

/// Application state shared across all handlers.
///
/// Cheaply cloneable via `Arc`; generic over the storage backend and the
/// payment gateway so tests can run the real router in memory.
pub struct AppState<S, G> {
    inner: Arc<AppStateInner<S, G>>,
}

struct AppStateInner<S, G> {
    store: S,
    orders: OrderCoordinator<S>,
    points: PointsLedger<S>,
    payments: PaymentService<S, G>,
    recovery: PaymentRecoveryScheduler<S, G>,
}

impl<S, G> Clone for AppState<S, G> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: Backend, G: PaymentGateway> AppState<S, G> {
    /// Wire every service over one backend and one gateway client.
    pub fn new(
        store: S,
        gateway: G,
        callback_url: impl Into<String>,
        scheduler: SchedulerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                orders: OrderCoordinator::new(store.clone()),
                points: PointsLedger::new(store.clone()),
                payments: PaymentService::new(store.clone(), gateway.clone(), callback_url),
                recovery: PaymentRecoveryScheduler::new(store.clone(), gateway, scheduler),
                store,
            }),
        }
    }

    /// Get a reference to the storage backend.
    #[must_use]
    pub fn store(&self) -> &S {
        &self.inner.store
    }

    #[must_use]
    pub fn orders(&self) -> &OrderCoordinator<S> {
        &self.inner.orders
    }

    #[must_use]
    pub fn points(&self) -> &PointsLedger<S> {
        &self.inner.points
    }

    #[must_use]
    pub fn payments(&self) -> &PaymentService<S, G> {
        &self.inner.payments
    }

    /// The reconciliation scheduler, for on-demand sweeps.
    #[must_use]
    pub fn recovery(&self) -> &PaymentRecoveryScheduler<S, G> {
        &self.inner.recovery
    }
}
