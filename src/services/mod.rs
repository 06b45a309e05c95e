//! Checkout services and the [`Storefront`] facade over them.
//!
//! Every mutating operation takes the acting user explicitly, holds that
//! user's lock for its whole duration and writes carts with compare-and-swap,
//! retrying a bounded number of times when another process got there first.

use rust_decimal::Decimal;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::domain::aggregates::{Cart, DiscountRule, LineItem, Order};
use crate::domain::value_objects::{AddressId, CartId, CouponCode, OrderId, ProductId, UserId};
use crate::ports::{AddressBook, Catalog, GatewayResponse, PaymentGateway};
use crate::publisher::EventPublisher;
use crate::store::Store;
use crate::{CheckoutError, Result};

pub mod cart;
pub mod checkout;
pub mod coupons;
pub mod favorites;
pub mod locks;
pub mod orders;
pub mod pricing;
pub mod stock;

pub use cart::{AddItemOutcome, CartStore};
pub use checkout::{CheckoutOrchestrator, CheckoutOutcome};
pub use coupons::CouponValidator;
pub use favorites::Favorites;
pub use locks::UserLocks;
pub use orders::OrderLifecycle;
pub use pricing::{compute_total, Quote};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ServiceSettings {
    /// Extra attempts after a cart write loses a compare-and-swap.
    pub conflict_retries: u32,
    /// How long to wait for the gateway to verify a payment.
    pub verify_timeout: Duration,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self { conflict_retries: 3, verify_timeout: Duration::from_secs(5) }
    }
}

/// Everything the services share.
#[derive(Clone)]
pub struct Context {
    pub(crate) store: Arc<dyn Store>,
    pub(crate) catalog: Arc<dyn Catalog>,
    pub(crate) addresses: Arc<dyn AddressBook>,
    pub(crate) gateway: Arc<dyn PaymentGateway>,
    pub(crate) locks: UserLocks,
    pub(crate) events: EventPublisher,
    pub(crate) settings: ServiceSettings,
}

impl Context {
    pub fn new(
        store: Arc<dyn Store>,
        catalog: Arc<dyn Catalog>,
        addresses: Arc<dyn AddressBook>,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Self {
        Self {
            store, catalog, addresses, gateway,
            locks: UserLocks::new(),
            events: EventPublisher::disabled(),
            settings: ServiceSettings::default(),
        }
    }

    pub fn with_events(mut self, events: EventPublisher) -> Self {
        self.events = events;
        self
    }

    pub fn with_settings(mut self, settings: ServiceSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Runs `op` until it succeeds, fails with something other than
    /// [`CheckoutError::Conflict`], or runs out of attempts.
    pub(crate) async fn retry_on_conflict<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Err(CheckoutError::Conflict) if attempt < self.settings.conflict_retries => {
                    attempt += 1;
                    debug!(attempt, "cart write conflicted, retrying");
                }
                other => return other,
            }
        }
    }

    /// Discount rule of the coupon attached to `cart`, if any.
    pub(crate) async fn attached_rule(&self, cart: &Cart) -> Result<DiscountRule> {
        Ok(coupons::attached_coupon(self, cart).await?.map(|c| c.rule()).unwrap_or_default())
    }

    pub(crate) async fn summarize(&self, cart: &Cart) -> Result<CartSummary> {
        let rule = self.attached_rule(cart).await?;
        Ok(CartSummary::priced(cart, rule))
    }
}

/// A cart as the customer sees it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CartSummary {
    pub cart_id: Option<CartId>,
    pub lines: Vec<LineItem>,
    pub item_count: u32,
    pub grand_total: Decimal,
    pub coupon: Option<CouponCode>,
    pub discount: Decimal,
    pub total: Decimal,
}

impl CartSummary {
    /// What a user without an active cart sees.
    pub fn empty() -> Self {
        Self {
            cart_id: None, lines: vec![], item_count: 0, grand_total: Decimal::ZERO,
            coupon: None, discount: Decimal::ZERO, total: Decimal::ZERO,
        }
    }

    pub fn priced(cart: &Cart, rule: DiscountRule) -> Self {
        let quote = compute_total(cart.grand_total(), rule);
        Self {
            cart_id: Some(cart.id()),
            lines: cart.lines().to_vec(),
            item_count: cart.lines().iter().map(|l| l.quantity).sum(),
            grand_total: cart.grand_total(),
            coupon: cart.coupon().cloned(),
            discount: quote.discount,
            total: quote.total,
        }
    }
}

/// The operation surface of the checkout core.
#[derive(Clone)]
pub struct Storefront {
    pub carts: CartStore,
    pub coupons: CouponValidator,
    pub checkout: CheckoutOrchestrator,
    pub orders: OrderLifecycle,
    pub favorites: Favorites,
}

impl Storefront {
    pub fn new(ctx: Context) -> Self {
        Self {
            carts: CartStore::new(ctx.clone()),
            coupons: CouponValidator::new(ctx.clone()),
            checkout: CheckoutOrchestrator::new(ctx.clone()),
            orders: OrderLifecycle::new(ctx.clone()),
            favorites: Favorites::new(ctx),
        }
    }

    pub async fn add_item(&self, user: UserId, product: ProductId) -> Result<AddItemOutcome> {
        self.carts.add_item(user, product).await
    }

    pub async fn increment_item(&self, user: UserId, product: ProductId) -> Result<CartSummary> {
        self.carts.increment_item(user, product).await
    }

    pub async fn decrement_item(&self, user: UserId, product: ProductId) -> Result<CartSummary> {
        self.carts.decrement_item(user, product).await
    }

    pub async fn remove_item(&self, user: UserId, product: ProductId) -> Result<CartSummary> {
        self.carts.remove_item(user, product).await
    }

    pub async fn view_cart(&self, user: UserId) -> Result<CartSummary> {
        self.carts.view(user).await
    }

    pub async fn apply_coupon(&self, user: UserId, code: &CouponCode) -> Result<CartSummary> {
        self.coupons.apply_coupon(user, code).await
    }

    pub async fn remove_coupon(&self, user: UserId) -> Result<CartSummary> {
        self.coupons.remove_coupon(user).await
    }

    pub async fn initiate_checkout(&self, user: UserId, address: AddressId, method: crate::PaymentMethod) -> Result<CheckoutOutcome> {
        self.checkout.initiate_checkout(user, address, method).await
    }

    pub async fn confirm_payment(&self, response: &GatewayResponse) -> Result<Order> {
        self.checkout.confirm_payment(response).await
    }

    pub async fn cancel_order(&self, order: OrderId) -> Result<Order> {
        self.orders.cancel_order(order).await
    }

    pub async fn order(&self, order: OrderId) -> Result<Order> {
        self.orders.order(order).await
    }

    pub async fn orders_for_user(&self, user: UserId) -> Result<Vec<Order>> {
        self.orders.orders_for_user(user).await
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::Harness;
    use super::*;

    #[tokio::test]
    async fn test_retry_gives_up_after_configured_attempts() {
        let h = Harness::new();
        let mut calls = 0;
        let result: Result<()> = h.ctx.retry_on_conflict(|| {
            calls += 1;
            async { Err(CheckoutError::Conflict) }
        }).await;
        assert!(matches!(result, Err(CheckoutError::Conflict)));
        assert_eq!(calls, 4);
    }

    #[tokio::test]
    async fn test_retry_stops_on_other_errors() {
        let h = Harness::new();
        let mut calls = 0;
        let result: Result<()> = h.ctx.retry_on_conflict(|| {
            calls += 1;
            async { Err(CheckoutError::CouponExpired) }
        }).await;
        assert!(matches!(result, Err(CheckoutError::CouponExpired)));
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_empty_summary() {
        let empty = CartSummary::empty();
        assert_eq!(empty.cart_id, None);
        assert_eq!(empty.total, Decimal::ZERO);
    }
}
