//! Persistence for carts, coupons, orders and pending payments.
//!
//! Every write that spans two records is a single trait method so that an
//! implementation can make it atomic: attaching a coupon together with the
//! redemption, detaching it together with the release, and placing an order
//! together with retiring its cart.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::aggregates::{Address, Cart, Coupon, Order, PricedCart};
use crate::domain::value_objects::{CouponCode, OrderId, ProductId, UserId};
use crate::ports::PaymentIntent;

pub mod memory;
pub mod postgres;

pub use memory::{MemoryAddressBook, MemoryCatalog, MemoryStore};
pub use postgres::{PgAddressBook, PgCatalog, PgStore};

#[derive(Error, Debug)]
pub enum StoreError {
    /// A compare-and-swap write found the record in a different state.
    #[error("record was modified concurrently")]
    Conflict,

    /// A uniqueness constraint rejected the write.
    #[error("record already exists")]
    Duplicate,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// A gateway checkout that is waiting for the payment callback.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingPayment {
    pub intent: PaymentIntent,
    pub priced: PricedCart,
    /// Version of the cart when it was priced. The order is only placed if
    /// the cart is still at this version when the payment is confirmed.
    pub cart_version: u64,
    pub address: Address,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait Store: Send + Sync {
    /// The user's non-expired cart, if there is one.
    async fn active_cart(&self, user: UserId) -> Result<Option<Cart>, StoreError>;

    /// Inserts a brand new cart. Fails with [`StoreError::Conflict`] when the
    /// user already has an active cart.
    async fn insert_cart(&self, cart: &Cart) -> Result<(), StoreError>;

    /// Replaces the stored cart if its version is still `expected_version`.
    async fn update_cart(&self, cart: &Cart, expected_version: u64) -> Result<(), StoreError>;

    async fn coupon(&self, code: &CouponCode) -> Result<Option<Coupon>, StoreError>;

    /// Writes `cart` (which has `code` attached) and records the redemption by
    /// `user`. Fails with [`StoreError::Duplicate`] if the user had already
    /// redeemed the coupon.
    async fn attach_coupon(&self, cart: &Cart, expected_version: u64, code: &CouponCode, user: UserId) -> Result<(), StoreError>;

    /// Writes `cart` (with the coupon detached) and releases the redemption.
    async fn detach_coupon(&self, cart: &Cart, expected_version: u64, code: &CouponCode, user: UserId) -> Result<(), StoreError>;

    async fn save_pending_payment(&self, pending: &PendingPayment) -> Result<(), StoreError>;
    async fn pending_payment(&self, intent_id: &str) -> Result<Option<PendingPayment>, StoreError>;

    /// Inserts `order`, retires its source cart and discards any pending
    /// payments for that cart in one step.
    ///
    /// With `expected_cart_version` the cart must be unchanged since it was
    /// priced; without it any still-active cart is retired. A cart that is
    /// already retired yields [`StoreError::Conflict`]; an order that already
    /// exists for the same cart yields [`StoreError::Duplicate`].
    async fn place_order(&self, order: &Order, expected_cart_version: Option<u64>) -> Result<(), StoreError>;

    async fn order(&self, id: OrderId) -> Result<Option<Order>, StoreError>;
    /// The order paid for by the gateway payment `payment_reference`.
    async fn order_for_payment(&self, payment_reference: &str) -> Result<Option<Order>, StoreError>;
    async fn orders_for_user(&self, user: UserId) -> Result<Vec<Order>, StoreError>;
    /// Fails with [`StoreError::Conflict`] when the order does not exist.
    async fn mark_cancelled(&self, id: OrderId) -> Result<(), StoreError>;

    async fn favorites(&self, user: UserId) -> Result<Vec<ProductId>, StoreError>;
    /// Returns `false` when the product was already a favorite.
    async fn add_favorite(&self, user: UserId, product: ProductId) -> Result<bool, StoreError>;
    async fn remove_favorite(&self, user: UserId, product: ProductId) -> Result<bool, StoreError>;
}
