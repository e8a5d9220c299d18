//! Embedded in-memory backend.
//!
//! Committed rows live in one table set behind a `RwLock`. Row locks come
//! from a lock table holding one async mutex per resource key, so a unit of
//! work waiting on a row parks its task instead of spinning. Writes are
//! staged on the unit of work and applied together on commit.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};
use mercato_core::{
    AccountId, AccountIdError, CouponId, Money, OrderId, PaymentId, PaymentStatus, ProductId,
    UserId,
};
use parking_lot::{Mutex, RwLock};
use tokio::sync::OwnedMutexGuard;

use super::{CatalogLookup, Store, StoreError, UnitOfWork, UserLookup};
use crate::ledger::coupon::{Coupon, Discount};
use crate::ledger::inventory::InventoryItem;
use crate::ledger::points::PointsAccount;
use crate::orders::{NewOrder, Order};
use crate::payments::model::{NewPayment, Payment};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ResourceKey {
    Inventory(ProductId),
    Coupon(CouponId),
    Points(AccountId),
    Payment(OrderId),
}

/// One async mutex per resource, created on first use.
///
/// A slot nobody holds or waits on has a strong count of one (the table's
/// own reference) and is dropped on the next acquire.
#[derive(Default)]
struct LockTable {
    slots: Mutex<HashMap<ResourceKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl LockTable {
    async fn acquire(&self, key: ResourceKey) -> OwnedMutexGuard<()> {
        let slot = {
            let mut slots = self.slots.lock();
            slots.retain(|_, slot| Arc::strong_count(slot) > 1);
            Arc::clone(slots.entry(key).or_default())
        };
        slot.lock_owned().await
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.slots.lock().len()
    }
}

#[derive(Debug, Clone)]
struct Product {
    #[allow(dead_code)]
    name: String,
    price: Money,
    stock: i64,
}

#[derive(Default)]
struct Tables {
    products: HashMap<ProductId, Product>,
    users: HashMap<UserId, AccountId>,
    coupons: HashMap<CouponId, Coupon>,
    points: HashMap<AccountId, PointsAccount>,
    orders: HashMap<OrderId, Order>,
    payments: HashMap<OrderId, Payment>,
}

#[derive(Default)]
struct Sequences {
    product: AtomicI64,
    user: AtomicI64,
    coupon: AtomicI64,
    order: AtomicI64,
    payment: AtomicI64,
}

fn next(seq: &AtomicI64) -> i64 {
    seq.fetch_add(1, Ordering::Relaxed) + 1
}

#[derive(Default)]
struct MemoryInner {
    locks: LockTable,
    tables: RwLock<Tables>,
    seq: Sequences,
}

/// In-memory [`Store`].
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<MemoryInner>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // ==========================================================================
    // Seeding
    // ==========================================================================

    /// Add a product with its price and stock.
    pub fn insert_product(&self, name: &str, price: Money, stock: i64) -> ProductId {
        let id = ProductId::new(next(&self.inner.seq.product));
        self.inner.tables.write().products.insert(
            id,
            Product {
                name: name.to_string(),
                price,
                stock,
            },
        );
        id
    }

    /// Register a user under a login id, which also keys their points account.
    ///
    /// # Errors
    ///
    /// Returns [`AccountIdError`] if the login id is not valid.
    pub fn insert_user(&self, login_id: &str) -> Result<UserId, AccountIdError> {
        let account_id = AccountId::parse(login_id)?;
        let id = UserId::new(next(&self.inner.seq.user));
        self.inner.tables.write().users.insert(id, account_id);
        Ok(id)
    }

    /// Issue an unused coupon to `owner`.
    pub fn insert_coupon(
        &self,
        owner: UserId,
        discount: Discount,
        min_order_amount: Option<Money>,
        expires_at: DateTime<Utc>,
    ) -> CouponId {
        let id = CouponId::new(next(&self.inner.seq.coupon));
        self.inner.tables.write().coupons.insert(
            id,
            Coupon {
                id,
                owner,
                name: format!("coupon-{id}"),
                discount,
                min_order_amount,
                expires_at,
                used: false,
                used_at: None,
            },
        );
        id
    }

    /// Committed stock for a product.
    #[must_use]
    pub fn stock_level(&self, product_id: ProductId) -> Option<i64> {
        self.inner
            .tables
            .read()
            .products
            .get(&product_id)
            .map(|p| p.stock)
    }

    /// Shift a payment's timestamps `age` into the past.
    pub fn backdate_payment(&self, order_id: OrderId, age: chrono::Duration) {
        let at = Utc::now() - age;
        if let Some(payment) = self.inner.tables.write().payments.get_mut(&order_id) {
            payment.created_at = at;
            payment.updated_at = at;
        }
    }
}

/// Unit of work over a [`MemoryStore`].
pub struct MemoryTx {
    store: Arc<MemoryInner>,
    held: HashMap<ResourceKey, OwnedMutexGuard<()>>,
    inventory: HashMap<ProductId, i64>,
    coupons: HashMap<CouponId, Coupon>,
    points: HashMap<AccountId, PointsAccount>,
    payments: HashMap<OrderId, Payment>,
    orders: Vec<Order>,
}

impl MemoryTx {
    fn new(store: Arc<MemoryInner>) -> Self {
        Self {
            store,
            held: HashMap::new(),
            inventory: HashMap::new(),
            coupons: HashMap::new(),
            points: HashMap::new(),
            payments: HashMap::new(),
            orders: Vec::new(),
        }
    }

    async fn acquire(&mut self, key: ResourceKey) {
        if self.held.contains_key(&key) {
            return;
        }
        let guard = self.store.locks.acquire(key.clone()).await;
        self.held.insert(key, guard);
    }

    fn ensure_held(&self, key: &ResourceKey) -> Result<(), StoreError> {
        if self.held.contains_key(key) {
            Ok(())
        } else {
            Err(StoreError::Conflict(format!(
                "{key:?} written without holding its lock"
            )))
        }
    }

    fn read_inventory(&self, product_id: ProductId) -> Option<InventoryItem> {
        let available = match self.inventory.get(&product_id) {
            Some(staged) => *staged,
            None => self.store.tables.read().products.get(&product_id)?.stock,
        };
        Some(InventoryItem {
            product_id,
            available,
        })
    }

    fn read_coupon(&self, coupon_id: CouponId) -> Option<Coupon> {
        self.coupons
            .get(&coupon_id)
            .cloned()
            .or_else(|| self.store.tables.read().coupons.get(&coupon_id).cloned())
    }

    fn read_points(&self, account_id: &AccountId) -> PointsAccount {
        self.points
            .get(account_id)
            .cloned()
            .or_else(|| self.store.tables.read().points.get(account_id).cloned())
            .unwrap_or_else(|| PointsAccount::empty(account_id.clone()))
    }

    fn read_payment(&self, order_id: OrderId) -> Option<Payment> {
        self.payments
            .get(&order_id)
            .cloned()
            .or_else(|| self.store.tables.read().payments.get(&order_id).cloned())
    }
}

impl UnitOfWork for MemoryTx {
    async fn lock_inventory(
        &mut self,
        product_id: ProductId,
    ) -> Result<Option<InventoryItem>, StoreError> {
        self.acquire(ResourceKey::Inventory(product_id)).await;
        Ok(self.read_inventory(product_id))
    }

    async fn save_inventory(&mut self, item: &InventoryItem) -> Result<(), StoreError> {
        self.ensure_held(&ResourceKey::Inventory(item.product_id))?;
        if item.available < 0 {
            return Err(StoreError::Conflict(format!(
                "negative stock for product {}",
                item.product_id
            )));
        }
        self.inventory.insert(item.product_id, item.available);
        Ok(())
    }

    async fn lock_coupon(&mut self, coupon_id: CouponId) -> Result<Option<Coupon>, StoreError> {
        self.acquire(ResourceKey::Coupon(coupon_id)).await;
        Ok(self.read_coupon(coupon_id))
    }

    async fn save_coupon(&mut self, coupon: &Coupon) -> Result<(), StoreError> {
        self.ensure_held(&ResourceKey::Coupon(coupon.id))?;
        self.coupons.insert(coupon.id, coupon.clone());
        Ok(())
    }

    async fn lock_points(&mut self, account_id: &AccountId) -> Result<PointsAccount, StoreError> {
        self.acquire(ResourceKey::Points(account_id.clone())).await;
        Ok(self.read_points(account_id))
    }

    async fn save_points(&mut self, account: &PointsAccount) -> Result<(), StoreError> {
        self.ensure_held(&ResourceKey::Points(account.account_id.clone()))?;
        self.points
            .insert(account.account_id.clone(), account.clone());
        Ok(())
    }

    async fn lock_payment(&mut self, order_id: OrderId) -> Result<Option<Payment>, StoreError> {
        self.acquire(ResourceKey::Payment(order_id)).await;
        Ok(self.read_payment(order_id))
    }

    async fn save_payment(&mut self, payment: &Payment) -> Result<(), StoreError> {
        self.ensure_held(&ResourceKey::Payment(payment.order_id()))?;
        self.payments.insert(payment.order_id(), payment.clone());
        Ok(())
    }

    async fn insert_order(&mut self, order: NewOrder) -> Result<Order, StoreError> {
        let id = OrderId::new(next(&self.store.seq.order));
        let order = order.into_order(id, Utc::now());
        self.orders.push(order.clone());
        Ok(order)
    }

    async fn commit(self) -> Result<(), StoreError> {
        let Self {
            store,
            held,
            inventory,
            coupons,
            points,
            payments,
            orders,
        } = self;

        {
            let mut tables = store.tables.write();
            for (product_id, available) in inventory {
                let product = tables
                    .products
                    .get_mut(&product_id)
                    .ok_or(StoreError::NotFound)?;
                product.stock = available;
            }
            tables.coupons.extend(coupons);
            tables.points.extend(points);
            tables.payments.extend(payments);
            tables
                .orders
                .extend(orders.into_iter().map(|order| (order.id, order)));
        }

        drop(held);
        Ok(())
    }
}

impl Store for MemoryStore {
    type Tx = MemoryTx;

    async fn begin(&self) -> Result<MemoryTx, StoreError> {
        Ok(MemoryTx::new(Arc::clone(&self.inner)))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn find_order(&self, order_id: OrderId) -> Result<Option<Order>, StoreError> {
        Ok(self.inner.tables.read().orders.get(&order_id).cloned())
    }

    async fn find_coupon(&self, coupon_id: CouponId) -> Result<Option<Coupon>, StoreError> {
        Ok(self.inner.tables.read().coupons.get(&coupon_id).cloned())
    }

    async fn find_points(
        &self,
        account_id: &AccountId,
    ) -> Result<Option<PointsAccount>, StoreError> {
        Ok(self.inner.tables.read().points.get(account_id).cloned())
    }

    async fn insert_payment(&self, payment: NewPayment) -> Result<Payment, StoreError> {
        let mut tables = self.inner.tables.write();
        if tables.payments.contains_key(&payment.order_id) {
            return Err(StoreError::Conflict(format!(
                "order {} already has a payment",
                payment.order_id
            )));
        }
        let id = PaymentId::new(next(&self.inner.seq.payment));
        let payment = payment.into_payment(id, Utc::now());
        tables.payments.insert(payment.order_id(), payment.clone());
        Ok(payment)
    }

    async fn find_payment_by_order(&self, order_id: OrderId) -> Result<Option<Payment>, StoreError> {
        Ok(self.inner.tables.read().payments.get(&order_id).cloned())
    }

    async fn find_stale_pending_payments(
        &self,
        created_before: DateTime<Utc>,
    ) -> Result<Vec<Payment>, StoreError> {
        let mut found: Vec<Payment> = self
            .inner
            .tables
            .read()
            .payments
            .values()
            .filter(|p| p.status() == PaymentStatus::Pending && p.created_at() < created_before)
            .cloned()
            .collect();
        found.sort_by_key(Payment::created_at);
        Ok(found)
    }

    async fn find_archivable_payments(
        &self,
        updated_before: DateTime<Utc>,
    ) -> Result<Vec<Payment>, StoreError> {
        let mut found: Vec<Payment> = self
            .inner
            .tables
            .read()
            .payments
            .values()
            .filter(|p| p.status().is_archivable() && p.updated_at() < updated_before)
            .cloned()
            .collect();
        found.sort_by_key(Payment::updated_at);
        Ok(found)
    }
}

impl CatalogLookup for MemoryStore {
    async fn current_price(&self, product_id: ProductId) -> Result<Option<Money>, StoreError> {
        Ok(self
            .inner
            .tables
            .read()
            .products
            .get(&product_id)
            .map(|p| p.price))
    }
}

impl UserLookup for MemoryStore {
    async fn user_exists(&self, user_id: UserId) -> Result<bool, StoreError> {
        Ok(self.inner.tables.read().users.contains_key(&user_id))
    }

    async fn account_id_for(&self, user_id: UserId) -> Result<Option<AccountId>, StoreError> {
        Ok(self.inner.tables.read().users.get(&user_id).cloned())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_uncommitted_writes_are_discarded() {
        let store = MemoryStore::new();
        let product = store.insert_product("tea", Money::new(100).unwrap(), 5);

        let mut uow = store.begin().await.unwrap();
        let mut item = uow.lock_inventory(product).await.unwrap().unwrap();
        item.available = 1;
        uow.save_inventory(&item).await.unwrap();
        drop(uow);

        assert_eq!(store.stock_level(product), Some(5));
    }

    #[tokio::test]
    async fn test_commit_applies_staged_writes() {
        let store = MemoryStore::new();
        let product = store.insert_product("tea", Money::new(100).unwrap(), 5);

        let mut uow = store.begin().await.unwrap();
        let mut item = uow.lock_inventory(product).await.unwrap().unwrap();
        item.available = 2;
        uow.save_inventory(&item).await.unwrap();
        // reads inside the unit of work see its own staged writes
        assert_eq!(uow.lock_inventory(product).await.unwrap().unwrap().available, 2);
        uow.commit().await.unwrap();

        assert_eq!(store.stock_level(product), Some(2));
    }

    #[tokio::test]
    async fn test_save_without_lock_rejected() {
        let store = MemoryStore::new();
        let product = store.insert_product("tea", Money::new(100).unwrap(), 5);
        let mut uow = store.begin().await.unwrap();
        let err = uow
            .save_inventory(&InventoryItem {
                product_id: product,
                available: 0,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_lock_blocks_second_unit_of_work_until_release() {
        let store = MemoryStore::new();
        let product = store.insert_product("tea", Money::new(100).unwrap(), 5);

        let mut first = store.begin().await.unwrap();
        first.lock_inventory(product).await.unwrap();

        let contender = {
            let store = store.clone();
            tokio::spawn(async move {
                let mut second = store.begin().await.unwrap();
                second.lock_inventory(product).await.unwrap().unwrap().available
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!contender.is_finished());

        let mut item = first.lock_inventory(product).await.unwrap().unwrap();
        item.available = 4;
        first.save_inventory(&item).await.unwrap();
        first.commit().await.unwrap();

        assert_eq!(contender.await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_released_lock_slots_are_pruned() {
        let store = MemoryStore::new();
        let products: Vec<_> = (0..8)
            .map(|i| store.insert_product(&format!("tea-{i}"), Money::new(100).unwrap(), 5))
            .collect();

        for product in &products {
            let mut uow = store.begin().await.unwrap();
            uow.lock_inventory(*product).await.unwrap();
            uow.commit().await.unwrap();
        }
        // only the most recently released slot survives until the next acquire
        assert_eq!(store.inner.locks.len(), 1);

        let mut held = store.begin().await.unwrap();
        held.lock_inventory(products[0]).await.unwrap();
        let mut other = store.begin().await.unwrap();
        other.lock_inventory(products[1]).await.unwrap();
        drop(other);
        assert_eq!(store.inner.locks.len(), 2);

        let mut next = store.begin().await.unwrap();
        next.lock_inventory(products[2]).await.unwrap();
        // the held slot stays, the dropped one is gone
        assert_eq!(store.inner.locks.len(), 2);
        drop(next);
        drop(held);
    }

    #[tokio::test]
    async fn test_points_account_created_lazily_on_commit() {
        let store = MemoryStore::new();
        let user = store.insert_user("buyer01").unwrap();
        let account_id = store.account_id_for(user).await.unwrap().unwrap();
        assert!(store.find_points(&account_id).await.unwrap().is_none());

        let mut uow = store.begin().await.unwrap();
        let account = uow.lock_points(&account_id).await.unwrap();
        assert_eq!(account.balance, Money::ZERO);
        uow.save_points(&account).await.unwrap();
        uow.commit().await.unwrap();

        assert!(store.find_points(&account_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_duplicate_payment_conflicts() {
        let store = MemoryStore::new();
        let new_payment = || NewPayment {
            user_id: UserId::new(1),
            order_id: OrderId::new(7),
            card_type: "KB".to_string(),
            card_no: mercato_core::CardNumber::parse("1111-2222-3333-4444").unwrap(),
            amount: Money::new(100).unwrap(),
            callback_url: "http://localhost/cb".to_string(),
        };
        store.insert_payment(new_payment()).await.unwrap();
        assert!(matches!(
            store.insert_payment(new_payment()).await,
            Err(StoreError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_stale_pending_listing() {
        let store = MemoryStore::new();
        for order in 1..=3 {
            store
                .insert_payment(NewPayment {
                    user_id: UserId::new(1),
                    order_id: OrderId::new(order),
                    card_type: "KB".to_string(),
                    card_no: mercato_core::CardNumber::parse("1111-2222-3333-4444").unwrap(),
                    amount: Money::new(100).unwrap(),
                    callback_url: "http://localhost/cb".to_string(),
                })
                .await
                .unwrap();
        }
        store.backdate_payment(OrderId::new(2), chrono::Duration::hours(2));
        store.backdate_payment(OrderId::new(3), chrono::Duration::hours(1));

        let stale = store
            .find_stale_pending_payments(Utc::now() - chrono::Duration::minutes(30))
            .await
            .unwrap();
        let ids: Vec<_> = stale.iter().map(Payment::order_id).collect();
        assert_eq!(ids, vec![OrderId::new(2), OrderId::new(3)]);
    }
}
