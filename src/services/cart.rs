//! Cart store.
//!
//! Each operation loads the user's active cart, applies one mutation to it
//! and writes it back against the version it was loaded at.

use serde::Serialize;
use tracing::{debug, info, instrument};

use super::stock::check_availability;
use super::{coupons, CartSummary, Context};
use crate::domain::aggregates::{Cart, Product};
use crate::domain::events::{CartEvent, DomainEvent};
use crate::domain::value_objects::{ProductId, UserId};
use crate::{CheckoutError, Entity, Result};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "cart", rename_all = "snake_case")]
pub enum AddItemOutcome {
    Added(CartSummary),
    /// The product already had a line; nothing changed.
    AlreadyInCart(CartSummary),
}

impl AddItemOutcome {
    pub fn cart(&self) -> &CartSummary {
        match self {
            Self::Added(cart) | Self::AlreadyInCart(cart) => cart,
        }
    }
}

#[derive(Clone)]
pub struct CartStore {
    ctx: Context,
}

impl CartStore {
    pub fn new(ctx: Context) -> Self { Self { ctx } }

    async fn active_cart(&self, user: UserId) -> Result<Cart> {
        self.ctx.store.active_cart(user).await?.ok_or(CheckoutError::NotFound(Entity::Cart))
    }

    async fn product(&self, id: ProductId) -> Result<Product> {
        self.ctx.catalog.product(id).await?.ok_or(CheckoutError::NotFound(Entity::Product))
    }

    /// Minimum total the attached coupon demands, if a coupon is attached.
    async fn coupon_minimum(&self, cart: &Cart) -> Result<Option<rust_decimal::Decimal>> {
        Ok(coupons::attached_coupon(&self.ctx, cart).await?.map(|c| c.min_amount()))
    }

    /// Puts one unit of `product` into the user's cart, opening a cart first
    /// if the user has none.
    #[instrument(skip(self), fields(%user, %product))]
    pub async fn add_item(&self, user: UserId, product: ProductId) -> Result<AddItemOutcome> {
        let _guard = self.ctx.locks.acquire(user).await;
        let (cart, added, created) = self.ctx.retry_on_conflict(|| self.try_add(user, product)).await?;
        let summary = self.ctx.summarize(&cart).await?;
        if !added {
            debug!(cart_id = %cart.id(), "product already in cart");
            return Ok(AddItemOutcome::AlreadyInCart(summary));
        }

        let mut events = Vec::with_capacity(2);
        if created {
            info!(cart_id = %cart.id(), "cart opened");
            events.push(DomainEvent::Cart(CartEvent::Created { cart_id: cart.id(), user_id: user }));
        }
        events.push(DomainEvent::Cart(CartEvent::ItemAdded { cart_id: cart.id(), product_id: product }));
        self.ctx.events.publish_all(events).await;
        Ok(AddItemOutcome::Added(summary))
    }

    async fn try_add(&self, user: UserId, product_id: ProductId) -> Result<(Cart, bool, bool)> {
        let product = self.product(product_id).await?;
        match self.ctx.store.active_cart(user).await? {
            Some(cart) if cart.line(product_id).is_some() => Ok((cart, false, false)),
            Some(mut cart) => {
                check_availability(&product, 1)?;
                let expected = cart.version();
                cart.add_line(&product)?;
                self.ctx.store.update_cart(&cart, expected).await?;
                Ok((cart, true, false))
            }
            None => {
                check_availability(&product, 1)?;
                let mut cart = Cart::open(user);
                cart.add_line(&product)?;
                self.ctx.store.insert_cart(&cart).await?;
                Ok((cart, true, true))
            }
        }
    }

    #[instrument(skip(self), fields(%user, %product))]
    pub async fn increment_item(&self, user: UserId, product: ProductId) -> Result<CartSummary> {
        let _guard = self.ctx.locks.acquire(user).await;
        let (cart, quantity) = self.ctx.retry_on_conflict(|| self.try_increment(user, product)).await?;
        self.ctx.events.publish(DomainEvent::Cart(CartEvent::QuantityChanged { cart_id: cart.id(), product_id: product, quantity })).await;
        self.ctx.summarize(&cart).await
    }

    async fn try_increment(&self, user: UserId, product_id: ProductId) -> Result<(Cart, u32)> {
        let mut cart = self.active_cart(user).await?;
        let current = cart.line(product_id).ok_or(CheckoutError::NotFound(Entity::CartItem))?.quantity;
        let product = self.product(product_id).await?;
        check_availability(&product, current + 1)?;

        let expected = cart.version();
        let quantity = cart.increment(&product)?.quantity;
        self.ctx.store.update_cart(&cart, expected).await?;
        Ok((cart, quantity))
    }

    /// Takes one unit off a line. The line disappears when its quantity
    /// reaches zero. Fails when the cart would drop below the minimum of its
    /// attached coupon.
    #[instrument(skip(self), fields(%user, %product))]
    pub async fn decrement_item(&self, user: UserId, product: ProductId) -> Result<CartSummary> {
        let _guard = self.ctx.locks.acquire(user).await;
        let (cart, quantity) = self.ctx.retry_on_conflict(|| self.try_decrement(user, product)).await?;
        let event = match quantity {
            Some(quantity) => CartEvent::QuantityChanged { cart_id: cart.id(), product_id: product, quantity },
            None => CartEvent::ItemRemoved { cart_id: cart.id(), product_id: product },
        };
        self.ctx.events.publish(DomainEvent::Cart(event)).await;
        self.ctx.summarize(&cart).await
    }

    async fn try_decrement(&self, user: UserId, product_id: ProductId) -> Result<(Cart, Option<u32>)> {
        let mut cart = self.active_cart(user).await?;
        if cart.line(product_id).is_none() {
            return Err(CheckoutError::NotFound(Entity::CartItem));
        }
        let product = self.product(product_id).await?;
        let minimum = self.coupon_minimum(&cart).await?;

        let expected = cart.version();
        let quantity = cart.decrement(&product, minimum)?.map(|line| line.quantity);
        self.ctx.store.update_cart(&cart, expected).await?;
        Ok((cart, quantity))
    }

    #[instrument(skip(self), fields(%user, %product))]
    pub async fn remove_item(&self, user: UserId, product: ProductId) -> Result<CartSummary> {
        let _guard = self.ctx.locks.acquire(user).await;
        let cart = self.ctx.retry_on_conflict(|| self.try_remove(user, product)).await?;
        self.ctx.events.publish(DomainEvent::Cart(CartEvent::ItemRemoved { cart_id: cart.id(), product_id: product })).await;
        self.ctx.summarize(&cart).await
    }

    async fn try_remove(&self, user: UserId, product_id: ProductId) -> Result<Cart> {
        let mut cart = self.active_cart(user).await?;
        let minimum = self.coupon_minimum(&cart).await?;
        let expected = cart.version();
        cart.remove_line(product_id, minimum)?;
        self.ctx.store.update_cart(&cart, expected).await?;
        Ok(cart)
    }

    /// The user's active cart, or an empty summary when there is none.
    pub async fn view(&self, user: UserId) -> Result<CartSummary> {
        match self.ctx.store.active_cart(user).await? {
            Some(cart) => self.ctx.summarize(&cart).await,
            None => Ok(CartSummary::empty()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::DiscountRule;
    use crate::services::fixtures::{assert_totals_consistent, Harness};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_add_item_opens_cart_once() {
        let h = Harness::new();
        let user = UserId::new();
        let widget = h.product(dec!(10), 5).await;
        let gadget = h.product(dec!(2.5), 5).await;

        let first = h.storefront.add_item(user, widget.id()).await.unwrap();
        let second = h.storefront.add_item(user, gadget.id()).await.unwrap();
        assert!(matches!(first, AddItemOutcome::Added(_)));
        assert_eq!(first.cart().cart_id, second.cart().cart_id);
        assert_eq!(second.cart().grand_total, dec!(12.5));
        assert_totals_consistent(second.cart());

        let again = h.storefront.add_item(user, widget.id()).await.unwrap();
        assert!(matches!(again, AddItemOutcome::AlreadyInCart(_)));
        assert_eq!(again.cart().lines.len(), 2);
        assert_eq!(again.cart().item_count, 2);
    }

    #[tokio::test]
    async fn test_add_rejects_unknown_and_sold_out_products() {
        let h = Harness::new();
        let user = UserId::new();
        assert!(matches!(h.storefront.add_item(user, ProductId::new()).await, Err(CheckoutError::NotFound(Entity::Product))));

        let sold_out = h.product(dec!(10), 0).await;
        assert!(matches!(h.storefront.add_item(user, sold_out.id()).await, Err(CheckoutError::OutOfStock { .. })));
        assert!(h.active_cart(user).await.is_none());
    }

    #[tokio::test]
    async fn test_grand_total_tracks_every_mutation() {
        let h = Harness::new();
        let user = UserId::new();
        let widget = h.product(dec!(10), 5).await;
        let gadget = h.product(dec!(2.5), 5).await;

        h.storefront.add_item(user, widget.id()).await.unwrap();
        h.storefront.add_item(user, gadget.id()).await.unwrap();
        let steps = [
            h.storefront.increment_item(user, widget.id()).await.unwrap(),
            h.storefront.increment_item(user, gadget.id()).await.unwrap(),
            h.storefront.decrement_item(user, widget.id()).await.unwrap(),
            h.storefront.remove_item(user, gadget.id()).await.unwrap(),
        ];
        for step in &steps {
            assert_totals_consistent(step);
        }
        assert_eq!(steps[1].grand_total, dec!(25));
        assert_eq!(steps[3].grand_total, dec!(10));
        assert_eq!(h.storefront.view_cart(user).await.unwrap(), steps[3]);
    }

    #[tokio::test]
    async fn test_decrement_to_zero_removes_line() {
        let h = Harness::new();
        let user = UserId::new();
        let widget = h.product(dec!(10), 5).await;
        h.fill(user, &widget, 1).await;

        let summary = h.storefront.decrement_item(user, widget.id()).await.unwrap();
        assert!(summary.lines.is_empty());
        assert_eq!(summary.grand_total, Decimal::ZERO);
        assert!(matches!(h.storefront.decrement_item(user, widget.id()).await, Err(CheckoutError::NotFound(Entity::CartItem))));
    }

    #[tokio::test]
    async fn test_increment_respects_stock() {
        let h = Harness::new();
        let user = UserId::new();
        let widget = h.product(dec!(10), 2).await;
        h.fill(user, &widget, 2).await;
        assert!(matches!(
            h.storefront.increment_item(user, widget.id()).await,
            Err(CheckoutError::OutOfStock { product_id }) if product_id == widget.id()
        ));
        assert_eq!(h.active_cart(user).await.unwrap().line(widget.id()).unwrap().quantity, 2);
    }

    #[tokio::test]
    async fn test_mutations_without_cart_or_line() {
        let h = Harness::new();
        let user = UserId::new();
        let widget = h.product(dec!(10), 5).await;
        assert!(matches!(h.storefront.increment_item(user, widget.id()).await, Err(CheckoutError::NotFound(Entity::Cart))));
        assert!(matches!(h.storefront.remove_item(user, widget.id()).await, Err(CheckoutError::NotFound(Entity::Cart))));

        let gadget = h.product(dec!(1), 5).await;
        h.fill(user, &gadget, 1).await;
        assert!(matches!(h.storefront.increment_item(user, widget.id()).await, Err(CheckoutError::NotFound(Entity::CartItem))));
        assert!(matches!(h.storefront.remove_item(user, widget.id()).await, Err(CheckoutError::NotFound(Entity::CartItem))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_increments_respect_stock() {
        let h = Harness::new();
        let user = UserId::new();
        let widget = h.product(dec!(10), 2).await;
        h.fill(user, &widget, 1).await;

        let tasks: Vec<_> = (0..2)
            .map(|_| {
                let storefront = h.storefront.clone();
                let id = widget.id();
                tokio::spawn(async move { storefront.increment_item(user, id).await })
            })
            .collect();
        let mut ok = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => ok += 1,
                Err(e) => assert!(matches!(e, CheckoutError::OutOfStock { .. })),
            }
        }
        assert_eq!(ok, 1);
        assert_eq!(h.active_cart(user).await.unwrap().line(widget.id()).unwrap().quantity, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_increments_past_single_unit_both_fail() {
        let h = Harness::new();
        let user = UserId::new();
        let widget = h.product(dec!(10), 1).await;
        h.fill(user, &widget, 1).await;

        let (a, b) = tokio::join!(
            h.storefront.increment_item(user, widget.id()),
            h.storefront.increment_item(user, widget.id()),
        );
        assert!(matches!(a, Err(CheckoutError::OutOfStock { .. })));
        assert!(matches!(b, Err(CheckoutError::OutOfStock { .. })));
        assert_eq!(h.active_cart(user).await.unwrap().line(widget.id()).unwrap().quantity, 1);
    }

    #[tokio::test]
    async fn test_coupon_minimum_blocks_decrement() {
        let h = Harness::new();
        let user = UserId::new();
        let widget = h.product(dec!(10), 5).await;
        h.fill(user, &widget, 3).await;
        let code = h.coupon("THIRTY", DiscountRule::FixedAmount(dec!(5)), dec!(25)).await;
        h.storefront.apply_coupon(user, &code).await.unwrap();

        let err = h.storefront.decrement_item(user, widget.id()).await.unwrap_err();
        assert!(matches!(err, CheckoutError::CouponMinAmountViolation { minimum } if minimum == dec!(25)));
        assert!(matches!(h.storefront.remove_item(user, widget.id()).await, Err(CheckoutError::CouponMinAmountViolation { .. })));

        let cart = h.storefront.view_cart(user).await.unwrap();
        assert_eq!(cart.grand_total, dec!(30));
        assert_eq!(cart.total, dec!(25));
    }

    #[tokio::test]
    async fn test_view_without_cart_is_empty() {
        let h = Harness::new();
        assert_eq!(h.storefront.view_cart(UserId::new()).await.unwrap(), CartSummary::empty());
    }
}
