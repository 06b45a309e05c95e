//! Domain events
use crate::domain::value_objects::{CartId, CouponCode, OrderId, ProductId, UserId};
use rust_decimal::Decimal;
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "aggregate", content = "event", rename_all = "snake_case")]
pub enum DomainEvent {
    Cart(CartEvent),
    Coupon(CouponEvent),
    Order(OrderEvent),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CartEvent {
    Created { cart_id: CartId, user_id: UserId },
    ItemAdded { cart_id: CartId, product_id: ProductId },
    QuantityChanged { cart_id: CartId, product_id: ProductId, quantity: u32 },
    ItemRemoved { cart_id: CartId, product_id: ProductId },
    Retired { cart_id: CartId },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CouponEvent {
    Applied { code: CouponCode, cart_id: CartId, user_id: UserId, discount: Decimal },
    Removed { code: CouponCode, cart_id: CartId, user_id: UserId },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrderEvent {
    Placed { order_id: OrderId, cart_id: CartId, user_id: UserId, total: Decimal },
    PaymentRejected { intent_id: String },
    Cancelled { order_id: OrderId },
}

impl DomainEvent {
    /// Dotted subject suffix, e.g. `order.placed`.
    pub fn subject(&self) -> &'static str {
        match self {
            Self::Cart(CartEvent::Created { .. }) => "cart.created",
            Self::Cart(CartEvent::ItemAdded { .. }) => "cart.item_added",
            Self::Cart(CartEvent::QuantityChanged { .. }) => "cart.quantity_changed",
            Self::Cart(CartEvent::ItemRemoved { .. }) => "cart.item_removed",
            Self::Cart(CartEvent::Retired { .. }) => "cart.retired",
            Self::Coupon(CouponEvent::Applied { .. }) => "coupon.applied",
            Self::Coupon(CouponEvent::Removed { .. }) => "coupon.removed",
            Self::Order(OrderEvent::Placed { .. }) => "order.placed",
            Self::Order(OrderEvent::PaymentRejected { .. }) => "order.payment_rejected",
            Self::Order(OrderEvent::Cancelled { .. }) => "order.cancelled",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_shape() {
        let order_id = OrderId::new();
        let event = DomainEvent::Order(OrderEvent::Cancelled { order_id });
        assert_eq!(event.subject(), "order.cancelled");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["aggregate"], "order");
        assert_eq!(json["event"]["type"], "cancelled");
        assert_eq!(json["event"]["order_id"], order_id.to_string());
    }
}
