//! Order Aggregate
//!
//! Orders are snapshots: once placed, only the status may change, and only
//! towards `Cancelled`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use crate::domain::aggregates::LineItem;
use crate::domain::value_objects::{AddressId, CartId, CouponCode, OrderId, UserId};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub id: AddressId,
    pub name: String,
    pub line1: String,
    pub line2: Option<String>,
    pub city: String,
    pub state: Option<String>,
    pub postal_code: String,
    pub country: String,
    pub phone: Option<String>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus { #[default] Pending, Success, Cancelled }

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self { Self::Pending => "pending", Self::Success => "success", Self::Cancelled => "cancelled" }
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "success" => Ok(Self::Success),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown order status {other:?}")),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod { Cash, Gateway }

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self { Self::Cash => "cash", Self::Gateway => "gateway" }
    }
}

impl std::str::FromStr for PaymentMethod {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cash" => Ok(Self::Cash),
            "gateway" => Ok(Self::Gateway),
            other => Err(format!("unknown payment method {other:?}")),
        }
    }
}

/// How an order was paid for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Settlement {
    /// Paid on delivery; the order starts out pending.
    Cash,
    /// Confirmed by the payment gateway under `payment_reference`.
    Gateway { payment_reference: String },
}

/// A cart's contents together with the price the customer has to pay.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricedCart {
    pub cart_id: CartId,
    pub user_id: UserId,
    pub lines: Vec<LineItem>,
    pub grand_total: Decimal,
    pub coupon: Option<CouponCode>,
    pub discount: Decimal,
    pub total: Decimal,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub(crate) id: OrderId,
    pub(crate) user_id: UserId,
    pub(crate) cart_id: CartId,
    pub(crate) address: Address,
    pub(crate) payment_method: PaymentMethod,
    pub(crate) payment_reference: Option<String>,
    pub(crate) status: OrderStatus,
    pub(crate) lines: Vec<LineItem>,
    pub(crate) grand_total: Decimal,
    pub(crate) coupon: Option<CouponCode>,
    pub(crate) discount: Decimal,
    pub(crate) final_amount: Decimal,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
}

impl Order {
    pub fn place(priced: PricedCart, address: Address, settlement: Settlement) -> Self {
        let (payment_method, payment_reference, status) = match settlement {
            Settlement::Cash => (PaymentMethod::Cash, None, OrderStatus::Pending),
            Settlement::Gateway { payment_reference } => (PaymentMethod::Gateway, Some(payment_reference), OrderStatus::Success),
        };
        let now = Utc::now();
        Self {
            id: OrderId::new(), user_id: priced.user_id, cart_id: priced.cart_id, address,
            payment_method, payment_reference, status, lines: priced.lines,
            grand_total: priced.grand_total, coupon: priced.coupon, discount: priced.discount,
            final_amount: priced.total, created_at: now, updated_at: now,
        }
    }

    pub fn id(&self) -> OrderId { self.id }
    pub fn user_id(&self) -> UserId { self.user_id }
    pub fn cart_id(&self) -> CartId { self.cart_id }
    pub fn address(&self) -> &Address { &self.address }
    pub fn payment_method(&self) -> PaymentMethod { self.payment_method }
    pub fn payment_reference(&self) -> Option<&str> { self.payment_reference.as_deref() }
    pub fn status(&self) -> OrderStatus { self.status }
    pub fn lines(&self) -> &[LineItem] { &self.lines }
    pub fn grand_total(&self) -> Decimal { self.grand_total }
    pub fn coupon(&self) -> Option<&CouponCode> { self.coupon.as_ref() }
    pub fn discount(&self) -> Decimal { self.discount }
    pub fn final_amount(&self) -> Decimal { self.final_amount }
    pub fn created_at(&self) -> DateTime<Utc> { self.created_at }
    pub fn updated_at(&self) -> DateTime<Utc> { self.updated_at }

    /// Moves the order to `Cancelled`. Returns `false` when it already was.
    pub fn cancel(&mut self) -> bool {
        if self.status == OrderStatus::Cancelled { return false; }
        self.status = OrderStatus::Cancelled;
        self.updated_at = Utc::now();
        true
    }
}
