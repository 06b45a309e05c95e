//! Storefront checkout core
//!
//! Turns a mutable shopping cart into an immutable, correctly priced order.
//!
//! ## Features
//! - One active cart per user, with per-user serialized mutations
//! - Discount coupons with expiry, minimum spend and single use per user
//! - Stock checks on add, increment and again at checkout
//! - Cash checkout and gateway checkout with idempotent payment confirmation
//! - Order cancellation and history

use rust_decimal::Decimal;
use std::fmt;
use thiserror::Error;

pub mod config;
pub mod domain;
pub mod gateway;
pub mod http;
pub mod ports;
pub mod publisher;
pub mod services;
pub mod store;

pub use config::AppConfig;
pub use domain::aggregates::{Address, Cart, Coupon, DiscountRule, LineItem, Order, OrderStatus, PaymentMethod, Product};
pub use domain::value_objects::{AddressId, CartId, CouponCode, OrderId, ProductId, UserId};
pub use services::Storefront;

use domain::aggregates::CartError;
use ports::BackendError;
use store::StoreError;

// =============================================================================
// Error Types
// =============================================================================

/// Entities that can be missing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Entity {
    Cart,
    CartItem,
    Product,
    Coupon,
    Order,
    Address,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Cart => "cart",
            Self::CartItem => "cart item",
            Self::Product => "product",
            Self::Coupon => "coupon",
            Self::Order => "order",
            Self::Address => "address",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum CheckoutError {
    #[error("{0} not found")]
    NotFound(Entity),

    #[error("product {product_id} is out of stock")]
    OutOfStock { product_id: ProductId },

    #[error("coupon has expired")]
    CouponExpired,

    #[error("coupon is no longer active")]
    CouponDeactivated,

    #[error("coupon has already been used")]
    CouponAlreadyUsed,

    #[error("cart total is below the coupon minimum of {minimum}")]
    CouponMinAmountNotMet { minimum: Decimal },

    #[error("cart total would fall below the coupon minimum of {minimum}")]
    CouponMinAmountViolation { minimum: Decimal },

    #[error("payment verification failed")]
    PaymentVerificationFailed,

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("cart was modified concurrently, retry the request")]
    Conflict,

    #[error("internal error: {0}")]
    Internal(String),
}

impl CheckoutError {
    /// Stable machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::OutOfStock { .. } => "out_of_stock",
            Self::CouponExpired => "coupon_expired",
            Self::CouponDeactivated => "coupon_deactivated",
            Self::CouponAlreadyUsed => "coupon_already_used",
            Self::CouponMinAmountNotMet { .. } => "coupon_min_amount_not_met",
            Self::CouponMinAmountViolation { .. } => "coupon_min_amount_violation",
            Self::PaymentVerificationFailed => "payment_verification_failed",
            Self::InvalidState(_) => "invalid_state",
            Self::Conflict => "conflict",
            Self::Internal(_) => "internal",
        }
    }

    pub(crate) fn invalid_state(message: impl Into<String>) -> Self { Self::InvalidState(message.into()) }
}

impl From<CartError> for CheckoutError {
    fn from(err: CartError) -> Self {
        match err {
            CartError::ItemNotFound => Self::NotFound(Entity::CartItem),
            CartError::NoCouponAttached => Self::NotFound(Entity::Coupon),
            CartError::CouponMinimum { minimum } => Self::CouponMinAmountViolation { minimum },
            CartError::AlreadyInCart | CartError::CouponAlreadyAttached | CartError::Retired => Self::InvalidState(err.to_string()),
        }
    }
}

impl From<StoreError> for CheckoutError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict => Self::Conflict,
            other => {
                tracing::error!(error = %other, "persistence failure");
                Self::Internal(other.to_string())
            }
        }
    }
}

impl From<BackendError> for CheckoutError {
    fn from(err: BackendError) -> Self {
        tracing::error!(error = %err, "collaborator failure");
        Self::Internal(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CheckoutError>;
