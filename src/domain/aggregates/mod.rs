//! Aggregates module
pub mod product;
pub mod cart;
pub mod coupon;
pub mod order;

pub use product::Product;
pub use cart::{Cart, CartError, LineItem};
pub use coupon::{Coupon, DiscountRule, Ineligibility};
pub use order::{Address, Order, OrderStatus, PaymentMethod, PricedCart, Settlement};
