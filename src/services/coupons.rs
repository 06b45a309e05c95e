//! Coupon validator.
//!
//! A coupon is checked against the cart's grand total at the moment it is
//! applied. Attaching it and recording the redemption happen in one store
//! write, as do detaching it and releasing the redemption.

use chrono::Utc;
use tracing::{info, instrument, warn};

use super::{CartSummary, Context};
use crate::domain::aggregates::{Cart, Coupon, DiscountRule, Ineligibility};
use crate::domain::events::{CouponEvent, DomainEvent};
use crate::domain::value_objects::{CouponCode, UserId};
use crate::store::StoreError;
use crate::{CheckoutError, Entity, Result};

impl From<Ineligibility> for CheckoutError {
    fn from(reason: Ineligibility) -> Self {
        match reason {
            Ineligibility::Deactivated => Self::CouponDeactivated,
            Ineligibility::Expired => Self::CouponExpired,
            Ineligibility::AlreadyUsed => Self::CouponAlreadyUsed,
            Ineligibility::MinAmountNotMet { minimum } => Self::CouponMinAmountNotMet { minimum },
        }
    }
}

/// The coupon attached to `cart`, if any.
///
/// A cart can outlive its coupon's record. When that happens the cart is
/// treated as carrying no discount and no minimum.
pub(crate) async fn attached_coupon(ctx: &Context, cart: &Cart) -> Result<Option<Coupon>> {
    let Some(code) = cart.coupon() else { return Ok(None) };
    let coupon = ctx.store.coupon(code).await?;
    if coupon.is_none() {
        warn!(cart_id = %cart.id(), %code, "cart references a coupon that no longer exists");
    }
    Ok(coupon)
}

#[derive(Clone)]
pub struct CouponValidator {
    ctx: Context,
}

impl CouponValidator {
    pub fn new(ctx: Context) -> Self { Self { ctx } }

    /// Attaches `code` to the user's active cart.
    ///
    /// Eligibility is checked in a fixed order: the coupon must exist, be
    /// active, be unexpired, be unused by this user, and the cart must reach
    /// its minimum. A cart can carry only one coupon at a time.
    #[instrument(skip(self), fields(%user, %code))]
    pub async fn apply_coupon(&self, user: UserId, code: &CouponCode) -> Result<CartSummary> {
        let _guard = self.ctx.locks.acquire(user).await;
        let (cart, rule) = self.ctx.retry_on_conflict(|| self.try_apply(user, code)).await?;
        let summary = CartSummary::priced(&cart, rule);

        info!(cart_id = %cart.id(), discount = %summary.discount, "coupon applied");
        self.ctx.events.publish(DomainEvent::Coupon(CouponEvent::Applied {
            code: code.clone(),
            cart_id: cart.id(),
            user_id: user,
            discount: summary.discount,
        })).await;
        Ok(summary)
    }

    async fn try_apply(&self, user: UserId, code: &CouponCode) -> Result<(Cart, DiscountRule)> {
        let mut cart = self.ctx.store.active_cart(user).await?.ok_or(CheckoutError::NotFound(Entity::Cart))?;
        let coupon = self.ctx.store.coupon(code).await?.ok_or(CheckoutError::NotFound(Entity::Coupon))?;
        coupon.eligibility(user, cart.grand_total(), Utc::now())?;

        let expected = cart.version();
        cart.attach_coupon(code.clone())?;
        match self.ctx.store.attach_coupon(&cart, expected, code, user).await {
            Ok(()) => Ok((cart, coupon.rule())),
            Err(StoreError::Duplicate) => Err(CheckoutError::CouponAlreadyUsed),
            Err(e) => Err(e.into()),
        }
    }

    /// Detaches whatever coupon the user's cart carries and frees the
    /// redemption so the coupon can be used again.
    #[instrument(skip(self), fields(%user))]
    pub async fn remove_coupon(&self, user: UserId) -> Result<CartSummary> {
        let _guard = self.ctx.locks.acquire(user).await;
        let (cart, code) = self.ctx.retry_on_conflict(|| self.try_remove(user)).await?;

        info!(cart_id = %cart.id(), %code, "coupon removed");
        self.ctx.events.publish(DomainEvent::Coupon(CouponEvent::Removed { code, cart_id: cart.id(), user_id: user })).await;
        Ok(CartSummary::priced(&cart, DiscountRule::None))
    }

    async fn try_remove(&self, user: UserId) -> Result<(Cart, CouponCode)> {
        let mut cart = self.ctx.store.active_cart(user).await?.ok_or(CheckoutError::NotFound(Entity::Cart))?;
        let expected = cart.version();
        let code = cart.detach_coupon()?;
        self.ctx.store.detach_coupon(&cart, expected, &code, user).await?;
        Ok((cart, code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::fixtures::Harness;
    use crate::store::Store;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_percentage_coupon_round_trip() {
        let h = Harness::new();
        let user = UserId::new();
        let widget = h.product(dec!(10), 5).await;
        h.fill(user, &widget, 2).await;
        let code = h.coupon("TEN", DiscountRule::Percentage(dec!(10)), dec!(15)).await;

        let applied = h.storefront.apply_coupon(user, &code).await.unwrap();
        assert_eq!(applied.grand_total, dec!(20));
        assert_eq!(applied.discount, dec!(2));
        assert_eq!(applied.total, dec!(18));
        assert!(h.store.coupon(&code).await.unwrap().unwrap().is_used_by(user));

        let removed = h.storefront.remove_coupon(user).await.unwrap();
        assert_eq!(removed.total, dec!(20));
        assert_eq!(removed.coupon, None);
        assert!(!h.store.coupon(&code).await.unwrap().unwrap().is_used_by(user));
    }

    #[tokio::test]
    async fn test_ineligible_coupons_leave_cart_alone() {
        let h = Harness::new();
        let user = UserId::new();
        let widget = h.product(dec!(10), 5).await;
        h.fill(user, &widget, 1).await;
        let before = h.active_cart(user).await.unwrap();

        let expired = CouponCode::new("OLD").unwrap();
        h.store.insert_coupon(Coupon::new(expired.clone(), DiscountRule::Percentage(dec!(10)), dec!(0), Utc::now() - Duration::days(1))).await;
        assert!(matches!(h.storefront.apply_coupon(user, &expired).await, Err(CheckoutError::CouponExpired)));

        let retired = CouponCode::new("GONE").unwrap();
        let mut coupon = Coupon::new(retired.clone(), DiscountRule::FixedAmount(dec!(1)), dec!(0), Utc::now() + Duration::days(1));
        coupon.deactivate();
        h.store.insert_coupon(coupon).await;
        assert!(matches!(h.storefront.apply_coupon(user, &retired).await, Err(CheckoutError::CouponDeactivated)));

        let big = h.coupon("BIG", DiscountRule::FixedAmount(dec!(5)), dec!(50)).await;
        assert!(matches!(
            h.storefront.apply_coupon(user, &big).await,
            Err(CheckoutError::CouponMinAmountNotMet { minimum }) if minimum == dec!(50)
        ));

        let unknown = CouponCode::new("NOPE").unwrap();
        assert!(matches!(h.storefront.apply_coupon(user, &unknown).await, Err(CheckoutError::NotFound(Entity::Coupon))));

        assert_eq!(h.active_cart(user).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_coupon_is_single_use_per_user() {
        let h = Harness::new();
        let (alice, bob) = (UserId::new(), UserId::new());
        let widget = h.product(dec!(10), 5).await;
        h.fill(alice, &widget, 1).await;
        h.fill(bob, &widget, 1).await;
        let code = h.coupon("ONCE", DiscountRule::FixedAmount(dec!(3)), dec!(0)).await;

        h.storefront.apply_coupon(alice, &code).await.unwrap();
        assert!(matches!(h.storefront.apply_coupon(alice, &code).await, Err(CheckoutError::CouponAlreadyUsed)));
        assert_eq!(h.storefront.apply_coupon(bob, &code).await.unwrap().total, dec!(7));
    }

    #[tokio::test]
    async fn test_second_coupon_is_rejected() {
        let h = Harness::new();
        let user = UserId::new();
        let widget = h.product(dec!(10), 5).await;
        h.fill(user, &widget, 1).await;
        let first = h.coupon("FIRST", DiscountRule::FixedAmount(dec!(1)), dec!(0)).await;
        let second = h.coupon("SECOND", DiscountRule::FixedAmount(dec!(2)), dec!(0)).await;

        h.storefront.apply_coupon(user, &first).await.unwrap();
        assert!(matches!(h.storefront.apply_coupon(user, &second).await, Err(CheckoutError::InvalidState(_))));
        assert!(!h.store.coupon(&second).await.unwrap().unwrap().is_used_by(user));
    }

    #[tokio::test]
    async fn test_missing_cart_or_coupon() {
        let h = Harness::new();
        let user = UserId::new();
        let code = h.coupon("TEN", DiscountRule::Percentage(dec!(10)), dec!(0)).await;
        assert!(matches!(h.storefront.apply_coupon(user, &code).await, Err(CheckoutError::NotFound(Entity::Cart))));

        let widget = h.product(dec!(10), 5).await;
        h.fill(user, &widget, 1).await;
        assert!(matches!(h.storefront.remove_coupon(user).await, Err(CheckoutError::NotFound(Entity::Coupon))));
    }
}
