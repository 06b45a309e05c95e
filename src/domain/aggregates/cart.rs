//! Cart Aggregate
//!
//! A cart belongs to one user and stays mutable until an order is placed
//! from it, at which point it is retired and never touched again. Every
//! successful mutation bumps `version`, which the stores use for
//! compare-and-swap writes.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use crate::domain::aggregates::Product;
use crate::domain::value_objects::{CartId, CouponCode, ProductId, UserId};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub product_id: ProductId,
    pub quantity: u32,
    /// Unit price captured by the last mutation of this line.
    pub unit_price: Decimal,
    pub subtotal: Decimal,
}

impl LineItem {
    fn priced(product_id: ProductId, quantity: u32, unit_price: Decimal) -> Self {
        Self { product_id, quantity, unit_price, subtotal: unit_price * Decimal::from(quantity) }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cart {
    pub(crate) id: CartId,
    pub(crate) user_id: UserId,
    pub(crate) lines: Vec<LineItem>,
    pub(crate) grand_total: Decimal,
    pub(crate) coupon: Option<CouponCode>,
    pub(crate) expired: bool,
    pub(crate) version: u64,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
}

impl Cart {
    pub fn open(user_id: UserId) -> Self {
        let now = Utc::now();
        Self {
            id: CartId::new(), user_id, lines: vec![], grand_total: Decimal::ZERO,
            coupon: None, expired: false, version: 0, created_at: now, updated_at: now,
        }
    }

    pub fn id(&self) -> CartId { self.id }
    pub fn user_id(&self) -> UserId { self.user_id }
    pub fn lines(&self) -> &[LineItem] { &self.lines }
    pub fn grand_total(&self) -> Decimal { self.grand_total }
    pub fn coupon(&self) -> Option<&CouponCode> { self.coupon.as_ref() }
    pub fn is_expired(&self) -> bool { self.expired }
    pub fn is_empty(&self) -> bool { self.lines.is_empty() }
    pub fn version(&self) -> u64 { self.version }
    pub fn created_at(&self) -> DateTime<Utc> { self.created_at }
    pub fn updated_at(&self) -> DateTime<Utc> { self.updated_at }

    pub fn line(&self, product_id: ProductId) -> Option<&LineItem> {
        self.lines.iter().find(|l| l.product_id == product_id)
    }

    /// Appends a fresh line with quantity one. Quantity changes on an
    /// existing line only go through [`Cart::increment`].
    pub fn add_line(&mut self, product: &Product) -> Result<&LineItem, CartError> {
        self.ensure_open()?;
        if self.line(product.id()).is_some() { return Err(CartError::AlreadyInCart); }
        self.lines.push(LineItem::priced(product.id(), 1, product.price()));
        self.recalculate();
        self.touch();
        Ok(&self.lines[self.lines.len() - 1])
    }

    pub fn increment(&mut self, product: &Product) -> Result<&LineItem, CartError> {
        self.ensure_open()?;
        let index = self.index_of(product.id())?;
        let quantity = self.lines[index].quantity + 1;
        self.lines[index] = LineItem::priced(product.id(), quantity, product.price());
        self.recalculate();
        self.touch();
        Ok(&self.lines[index])
    }

    /// Takes one unit off a line, dropping the line when it reaches zero.
    /// `coupon_minimum` is the minimum qualifying total of the attached
    /// coupon, if any; the cart may not fall below it.
    pub fn decrement(&mut self, product: &Product, coupon_minimum: Option<Decimal>) -> Result<Option<&LineItem>, CartError> {
        self.ensure_open()?;
        let index = self.index_of(product.id())?;
        let current = &self.lines[index];
        let quantity = current.quantity.saturating_sub(1);
        let replacement = LineItem::priced(product.id(), quantity, product.price());
        let projected = self.grand_total - current.subtotal + replacement.subtotal;
        check_coupon_minimum(projected, coupon_minimum)?;

        if quantity == 0 {
            self.lines.remove(index);
            self.recalculate();
            self.touch();
            return Ok(None);
        }
        self.lines[index] = replacement;
        self.recalculate();
        self.touch();
        Ok(Some(&self.lines[index]))
    }

    pub fn remove_line(&mut self, product_id: ProductId, coupon_minimum: Option<Decimal>) -> Result<LineItem, CartError> {
        self.ensure_open()?;
        let index = self.index_of(product_id)?;
        check_coupon_minimum(self.grand_total - self.lines[index].subtotal, coupon_minimum)?;
        let removed = self.lines.remove(index);
        self.recalculate();
        self.touch();
        Ok(removed)
    }

    pub fn attach_coupon(&mut self, code: CouponCode) -> Result<(), CartError> {
        self.ensure_open()?;
        if self.coupon.is_some() { return Err(CartError::CouponAlreadyAttached); }
        self.coupon = Some(code);
        self.touch();
        Ok(())
    }

    pub fn detach_coupon(&mut self) -> Result<CouponCode, CartError> {
        self.ensure_open()?;
        let code = self.coupon.take().ok_or(CartError::NoCouponAttached)?;
        self.touch();
        Ok(code)
    }

    /// Marks the cart as consumed by an order.
    pub fn retire(&mut self) -> Result<(), CartError> {
        self.ensure_open()?;
        self.expired = true;
        self.touch();
        Ok(())
    }

    fn index_of(&self, product_id: ProductId) -> Result<usize, CartError> {
        self.lines.iter().position(|l| l.product_id == product_id).ok_or(CartError::ItemNotFound)
    }

    fn ensure_open(&self) -> Result<(), CartError> {
        if self.expired { Err(CartError::Retired) } else { Ok(()) }
    }

    fn recalculate(&mut self) {
        self.grand_total = self.lines.iter().map(|l| l.subtotal).sum();
    }

    fn touch(&mut self) {
        self.version += 1;
        self.updated_at = Utc::now();
    }
}

fn check_coupon_minimum(projected: Decimal, minimum: Option<Decimal>) -> Result<(), CartError> {
    match minimum {
        Some(min) if projected < min => Err(CartError::CouponMinimum { minimum: min }),
        _ => Ok(()),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CartError {
    #[error("item is not in the cart")]
    ItemNotFound,
    #[error("item is already in the cart")]
    AlreadyInCart,
    #[error("cart total would fall below the attached coupon's minimum of {minimum}")]
    CouponMinimum { minimum: Decimal },
    #[error("a coupon is already attached to the cart")]
    CouponAlreadyAttached,
    #[error("no coupon is attached to the cart")]
    NoCouponAttached,
    #[error("cart has been retired")]
    Retired,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn widget(price: Decimal) -> Product { Product::new(ProductId::from_uuid(uuid::Uuid::nil()), "Widget", price, 10) }

    fn assert_totals_consistent(cart: &Cart) {
        let sum: Decimal = cart.lines().iter().map(|l| l.subtotal).sum();
        assert_eq!(cart.grand_total(), sum);
        for line in cart.lines() {
            assert_eq!(line.subtotal, line.unit_price * Decimal::from(line.quantity));
        }
    }

    #[test]
    fn test_cart_operations() {
        let mut cart = Cart::open(UserId::new());
        let w = widget(dec!(10));
        let g = Product::new(ProductId::new(), "Gadget", dec!(2.50), 3);
        cart.add_line(&w).unwrap();
        cart.add_line(&g).unwrap();
        cart.increment(&w).unwrap();
        assert_eq!(cart.grand_total(), dec!(22.50));
        assert_eq!(cart.add_line(&w), Err(CartError::AlreadyInCart));
        assert_totals_consistent(&cart);

        cart.decrement(&w, None).unwrap();
        assert_eq!(cart.line(w.id()).unwrap().quantity, 1);
        cart.remove_line(g.id(), None).unwrap();
        assert_eq!(cart.grand_total(), dec!(10));
        assert_totals_consistent(&cart);
    }

    #[test]
    fn test_decrement_to_zero_drops_line() {
        let mut cart = Cart::open(UserId::new());
        let w = widget(dec!(4));
        cart.add_line(&w).unwrap();
        assert_eq!(cart.decrement(&w, None).unwrap(), None);
        assert!(cart.is_empty());
        assert_eq!(cart.grand_total(), Decimal::ZERO);
    }

    #[test]
    fn test_price_snapshot_taken_on_mutation() {
        let mut cart = Cart::open(UserId::new());
        cart.add_line(&widget(dec!(10))).unwrap();
        cart.increment(&widget(dec!(12))).unwrap();
        let line = cart.line(widget(dec!(12)).id()).unwrap();
        assert_eq!(line.unit_price, dec!(12));
        assert_eq!(line.subtotal, dec!(24));
        assert_totals_consistent(&cart);
    }

    #[test]
    fn test_coupon_minimum_guards_mutation() {
        let mut cart = Cart::open(UserId::new());
        let w = widget(dec!(10));
        cart.add_line(&w).unwrap();
        cart.increment(&w).unwrap();
        let before = cart.clone();

        let err = cart.decrement(&w, Some(dec!(15))).unwrap_err();
        assert_eq!(err, CartError::CouponMinimum { minimum: dec!(15) });
        assert_eq!(cart.remove_line(w.id(), Some(dec!(1))), Err(CartError::CouponMinimum { minimum: dec!(1) }));
        assert_eq!(cart, before);

        cart.decrement(&w, Some(dec!(10))).unwrap();
        assert_eq!(cart.grand_total(), dec!(10));
    }

    #[test]
    fn test_version_bumps_only_on_success() {
        let mut cart = Cart::open(UserId::new());
        let w = widget(dec!(1));
        cart.add_line(&w).unwrap();
        let v = cart.version();
        assert!(cart.add_line(&w).is_err());
        assert_eq!(cart.version(), v);
        cart.attach_coupon(CouponCode::new("TEN").unwrap()).unwrap();
        assert_eq!(cart.version(), v + 1);
    }

    #[test]
    fn test_retired_cart_is_frozen() {
        let mut cart = Cart::open(UserId::new());
        let w = widget(dec!(1));
        cart.add_line(&w).unwrap();
        cart.retire().unwrap();
        assert!(cart.is_expired());
        assert_eq!(cart.increment(&w), Err(CartError::Retired));
        assert_eq!(cart.retire(), Err(CartError::Retired));
    }
}
