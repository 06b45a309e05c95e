//! Order lifecycle after placement.

use tracing::{info, instrument};

use super::Context;
use crate::domain::aggregates::Order;
use crate::domain::events::{DomainEvent, OrderEvent};
use crate::domain::value_objects::{OrderId, UserId};
use crate::{CheckoutError, Entity, Result};

#[derive(Clone)]
pub struct OrderLifecycle {
    ctx: Context,
}

impl OrderLifecycle {
    pub fn new(ctx: Context) -> Self { Self { ctx } }

    pub async fn order(&self, id: OrderId) -> Result<Order> {
        self.ctx.store.order(id).await?.ok_or(CheckoutError::NotFound(Entity::Order))
    }

    /// Newest first.
    pub async fn orders_for_user(&self, user: UserId) -> Result<Vec<Order>> {
        Ok(self.ctx.store.orders_for_user(user).await?)
    }

    /// Cancels a pending or successful order. Cancelling an order twice is
    /// not an error; the second call returns it unchanged.
    #[instrument(skip(self))]
    pub async fn cancel_order(&self, id: OrderId) -> Result<Order> {
        let mut order = self.order(id).await?;
        if !order.cancel() {
            return Ok(order);
        }
        self.ctx.store.mark_cancelled(id).await?;
        info!(order_id = %id, "order cancelled");
        self.ctx.events.publish(DomainEvent::Order(OrderEvent::Cancelled { order_id: id })).await;
        Ok(order)
    }
}
