//! `PostgreSQL` backend.
//!
//! # Tables
//!
//! - `users` - login ids, which also key points accounts
//! - `products` - catalog prices and inventory levels
//! - `coupons` - single-use discounts
//! - `points` - balances with a version bumped on every write
//! - `orders` / `order_lines` - placed orders
//! - `payments` - one per order
//!
//! Row locks are `SELECT ... FOR UPDATE` inside a database transaction, so
//! a [`PgTx`] holds its locks until it commits or is dropped.
//!
//! # Migrations
//!
//! Migrations live in `crates/api/migrations/` and run via:
//! ```bash
//! cargo run -p mercato-cli -- migrate
//! ```

use std::time::Duration;

use chrono::{DateTime, Utc};
use mercato_core::{
    AccountId, CouponId, CouponKind, Money, OrderId, PaymentId, PaymentStatus, ProductId, UserId,
};
use secrecy::ExposeSecret;
use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool, Postgres, Transaction};

use super::{CatalogLookup, Store, StoreError, UnitOfWork, UserLookup};
use crate::ledger::coupon::{Coupon, Discount};
use crate::ledger::inventory::InventoryItem;
use crate::ledger::points::PointsAccount;
use crate::orders::{NewOrder, Order, OrderLine};
use crate::payments::model::{NewPayment, Payment};

/// Embedded schema migrations.
pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Create a `PostgreSQL` connection pool with sensible defaults.
///
/// # Errors
///
/// Returns `sqlx::Error` if the connection cannot be established.
pub async fn create_pool(database_url: &secrecy::SecretString) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url.expose_secret())
        .await
}

fn conflict_on_unique(e: sqlx::Error, what: &str) -> StoreError {
    if let sqlx::Error::Database(ref db_err) = e
        && db_err.is_unique_violation()
    {
        return StoreError::Conflict(what.to_string());
    }
    StoreError::Database(e)
}

// =============================================================================
// Rows
// =============================================================================

#[derive(FromRow)]
struct CouponRow {
    id: CouponId,
    owner_id: UserId,
    name: String,
    kind: CouponKind,
    value: Money,
    max_amount: Option<Money>,
    min_order_amount: Option<Money>,
    expires_at: DateTime<Utc>,
    used: bool,
    used_at: Option<DateTime<Utc>>,
}

impl TryFrom<CouponRow> for Coupon {
    type Error = StoreError;

    fn try_from(row: CouponRow) -> Result<Self, Self::Error> {
        let discount = Discount::from_parts(row.kind, row.value, row.max_amount).map_err(|e| {
            StoreError::DataCorruption(format!("invalid discount on coupon {}: {e}", row.id))
        })?;

        Ok(Self {
            id: row.id,
            owner: row.owner_id,
            name: row.name,
            discount,
            min_order_amount: row.min_order_amount,
            expires_at: row.expires_at,
            used: row.used,
            used_at: row.used_at,
        })
    }
}

const COUPON_COLUMNS: &str = "id, owner_id, name, kind, value, max_amount, min_order_amount, \
                              expires_at, used, used_at";

#[derive(FromRow)]
struct OrderRow {
    id: OrderId,
    user_id: UserId,
    coupon_id: Option<CouponId>,
    total_amount: Money,
    discount_amount: Money,
    charged_amount: Money,
    created_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct OrderLineRow {
    product_id: ProductId,
    quantity: i64,
    unit_price: Money,
}

impl OrderRow {
    fn into_order(self, lines: Vec<OrderLineRow>) -> Order {
        Order {
            id: self.id,
            user_id: self.user_id,
            lines: lines
                .into_iter()
                .map(|l| OrderLine {
                    product_id: l.product_id,
                    quantity: l.quantity,
                    unit_price: l.unit_price,
                })
                .collect(),
            coupon_id: self.coupon_id,
            total_amount: self.total_amount,
            discount_amount: self.discount_amount,
            charged_amount: self.charged_amount,
            created_at: self.created_at,
        }
    }
}

#[derive(FromRow)]
struct PaymentRow {
    id: PaymentId,
    user_id: UserId,
    order_id: OrderId,
    payment_key: Option<String>,
    card_type: String,
    card_no: String,
    amount: Money,
    callback_url: String,
    status: PaymentStatus,
    transaction_id: Option<String>,
    processed_at: Option<DateTime<Utc>>,
    failure_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<PaymentRow> for Payment {
    fn from(row: PaymentRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            order_id: row.order_id,
            payment_key: row.payment_key,
            card_type: row.card_type,
            card_no: row.card_no,
            amount: row.amount,
            callback_url: row.callback_url,
            status: row.status,
            transaction_id: row.transaction_id,
            processed_at: row.processed_at,
            failure_reason: row.failure_reason,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

const PAYMENT_COLUMNS: &str = "id, user_id, order_id, payment_key, card_type, card_no, amount, \
                               callback_url, status, transaction_id, processed_at, \
                               failure_reason, created_at, updated_at";

// =============================================================================
// Unit of work
// =============================================================================

/// A database transaction holding row locks.
pub struct PgTx {
    tx: Transaction<'static, Postgres>,
}

impl UnitOfWork for PgTx {
    async fn lock_inventory(
        &mut self,
        product_id: ProductId,
    ) -> Result<Option<InventoryItem>, StoreError> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT stock FROM products WHERE id = $1 FOR UPDATE")
                .bind(product_id)
                .fetch_optional(&mut *self.tx)
                .await?;

        Ok(row.map(|(available,)| InventoryItem {
            product_id,
            available,
        }))
    }

    async fn save_inventory(&mut self, item: &InventoryItem) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE products SET stock = $2, updated_at = now() WHERE id = $1")
            .bind(item.product_id)
            .bind(item.available)
            .execute(&mut *self.tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn lock_coupon(&mut self, coupon_id: CouponId) -> Result<Option<Coupon>, StoreError> {
        let row: Option<CouponRow> = sqlx::query_as(&format!(
            "SELECT {COUPON_COLUMNS} FROM coupons WHERE id = $1 FOR UPDATE"
        ))
        .bind(coupon_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(Coupon::try_from).transpose()
    }

    async fn save_coupon(&mut self, coupon: &Coupon) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE coupons SET used = $2, used_at = $3 WHERE id = $1")
            .bind(coupon.id)
            .bind(coupon.used)
            .bind(coupon.used_at)
            .execute(&mut *self.tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn lock_points(&mut self, account_id: &AccountId) -> Result<PointsAccount, StoreError> {
        sqlx::query("INSERT INTO points (account_id) VALUES ($1) ON CONFLICT DO NOTHING")
            .bind(account_id)
            .execute(&mut *self.tx)
            .await?;

        let (balance, version): (Money, i64) =
            sqlx::query_as("SELECT balance, version FROM points WHERE account_id = $1 FOR UPDATE")
                .bind(account_id)
                .fetch_one(&mut *self.tx)
                .await?;

        Ok(PointsAccount {
            account_id: account_id.clone(),
            balance,
            version,
        })
    }

    async fn save_points(&mut self, account: &PointsAccount) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE points SET balance = $2, version = $3, updated_at = now() WHERE account_id = $1",
        )
        .bind(&account.account_id)
        .bind(account.balance)
        .bind(account.version)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn lock_payment(&mut self, order_id: OrderId) -> Result<Option<Payment>, StoreError> {
        let row: Option<PaymentRow> = sqlx::query_as(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE order_id = $1 FOR UPDATE"
        ))
        .bind(order_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(row.map(Payment::from))
    }

    async fn save_payment(&mut self, payment: &Payment) -> Result<(), StoreError> {
        let result = sqlx::query(
            r"
            UPDATE payments
            SET payment_key = $2, status = $3, transaction_id = $4,
                processed_at = $5, failure_reason = $6, updated_at = $7
            WHERE id = $1
            ",
        )
        .bind(payment.id)
        .bind(payment.payment_key.as_deref())
        .bind(payment.status)
        .bind(payment.transaction_id.as_deref())
        .bind(payment.processed_at)
        .bind(payment.failure_reason.as_deref())
        .bind(payment.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| conflict_on_unique(e, "payment key already recorded"))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn insert_order(&mut self, order: NewOrder) -> Result<Order, StoreError> {
        let (id, created_at): (OrderId, DateTime<Utc>) = sqlx::query_as(
            r"
            INSERT INTO orders (user_id, coupon_id, total_amount, discount_amount, charged_amount)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, created_at
            ",
        )
        .bind(order.user_id())
        .bind(order.coupon_id())
        .bind(order.total_amount())
        .bind(order.discount_amount())
        .bind(order.charged_amount())
        .fetch_one(&mut *self.tx)
        .await?;

        for (line_no, line) in (1_i32..).zip(order.lines()) {
            sqlx::query(
                r"
                INSERT INTO order_lines (order_id, line_no, product_id, quantity, unit_price)
                VALUES ($1, $2, $3, $4, $5)
                ",
            )
            .bind(id)
            .bind(line_no)
            .bind(line.product_id)
            .bind(line.quantity)
            .bind(line.unit_price)
            .execute(&mut *self.tx)
            .await?;
        }

        Ok(order.into_order(id, created_at))
    }

    async fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }
}

// =============================================================================
// Store
// =============================================================================

/// `PostgreSQL`-backed [`Store`].
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply pending migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if a migration fails.
    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        MIGRATOR.run(&self.pool).await
    }
}

impl Store for PgStore {
    type Tx = PgTx;

    async fn begin(&self) -> Result<PgTx, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(PgTx { tx })
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn find_order(&self, order_id: OrderId) -> Result<Option<Order>, StoreError> {
        let row: Option<OrderRow> = sqlx::query_as(
            r"
            SELECT id, user_id, coupon_id, total_amount, discount_amount, charged_amount, created_at
            FROM orders
            WHERE id = $1
            ",
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let lines: Vec<OrderLineRow> = sqlx::query_as(
            r"
            SELECT product_id, quantity, unit_price
            FROM order_lines
            WHERE order_id = $1
            ORDER BY line_no
            ",
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(Some(row.into_order(lines)))
    }

    async fn find_coupon(&self, coupon_id: CouponId) -> Result<Option<Coupon>, StoreError> {
        let row: Option<CouponRow> =
            sqlx::query_as(&format!("SELECT {COUPON_COLUMNS} FROM coupons WHERE id = $1"))
                .bind(coupon_id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(Coupon::try_from).transpose()
    }

    async fn find_points(
        &self,
        account_id: &AccountId,
    ) -> Result<Option<PointsAccount>, StoreError> {
        let row: Option<(Money, i64)> =
            sqlx::query_as("SELECT balance, version FROM points WHERE account_id = $1")
                .bind(account_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(balance, version)| PointsAccount {
            account_id: account_id.clone(),
            balance,
            version,
        }))
    }

    async fn insert_payment(&self, payment: NewPayment) -> Result<Payment, StoreError> {
        let order_id = payment.order_id;
        let row: PaymentRow = sqlx::query_as(&format!(
            r"
            INSERT INTO payments (user_id, order_id, card_type, card_no, amount, callback_url)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {PAYMENT_COLUMNS}
            "
        ))
        .bind(payment.user_id)
        .bind(order_id)
        .bind(&payment.card_type)
        .bind(payment.card_no.masked())
        .bind(payment.amount)
        .bind(&payment.callback_url)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| conflict_on_unique(e, &format!("order {order_id} already has a payment")))?;

        Ok(row.into())
    }

    async fn find_payment_by_order(&self, order_id: OrderId) -> Result<Option<Payment>, StoreError> {
        let row: Option<PaymentRow> = sqlx::query_as(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE order_id = $1"
        ))
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Payment::from))
    }

    async fn find_stale_pending_payments(
        &self,
        created_before: DateTime<Utc>,
    ) -> Result<Vec<Payment>, StoreError> {
        let rows: Vec<PaymentRow> = sqlx::query_as(&format!(
            r"
            SELECT {PAYMENT_COLUMNS} FROM payments
            WHERE status = 'PENDING' AND created_at < $1
            ORDER BY created_at, id
            "
        ))
        .bind(created_before)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Payment::from).collect())
    }

    async fn find_archivable_payments(
        &self,
        updated_before: DateTime<Utc>,
    ) -> Result<Vec<Payment>, StoreError> {
        let rows: Vec<PaymentRow> = sqlx::query_as(&format!(
            r"
            SELECT {PAYMENT_COLUMNS} FROM payments
            WHERE status IN ('COMPLETED', 'FAILED', 'CANCELLED') AND updated_at < $1
            ORDER BY updated_at, id
            "
        ))
        .bind(updated_before)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Payment::from).collect())
    }
}

impl CatalogLookup for PgStore {
    async fn current_price(&self, product_id: ProductId) -> Result<Option<Money>, StoreError> {
        let row: Option<(Money,)> = sqlx::query_as("SELECT price FROM products WHERE id = $1")
            .bind(product_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|(price,)| price))
    }
}

impl UserLookup for PgStore {
    async fn user_exists(&self, user_id: UserId) -> Result<bool, StoreError> {
        let (exists,): (bool,) =
            sqlx::query_as("SELECT EXISTS (SELECT 1 FROM users WHERE id = $1)")
                .bind(user_id)
                .fetch_one(&self.pool)
                .await?;

        Ok(exists)
    }

    async fn account_id_for(&self, user_id: UserId) -> Result<Option<AccountId>, StoreError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT login_id FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|(login_id,)| {
            AccountId::parse(&login_id).map_err(|e| {
                StoreError::DataCorruption(format!("invalid login id for user {user_id}: {e}"))
            })
        })
        .transpose()
    }
}
