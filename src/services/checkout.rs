//! Checkout orchestrator.
//!
//! Cash checkouts place the order straight away. Gateway checkouts stop at a
//! payment intent and a [`PendingPayment`] snapshot of the priced cart; the
//! order is placed from that snapshot once the gateway's callback verifies,
//! provided the cart has not changed since the intent was created.
//! Confirming the same payment twice returns the order placed the first time.

use chrono::Utc;
use serde::Serialize;
use tracing::{info, instrument, warn};

use super::stock::check_lines;
use super::{compute_total, Context};
use crate::domain::aggregates::{Order, PaymentMethod, PricedCart, Settlement};
use crate::domain::events::{CartEvent, DomainEvent, OrderEvent};
use crate::domain::value_objects::{AddressId, UserId};
use crate::ports::{BackendError, GatewayResponse, PaymentIntent, PaymentVerification};
use crate::store::{PendingPayment, StoreError};
use crate::{CheckoutError, Entity, Result};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CheckoutOutcome {
    OrderPlaced { order: Order },
    /// The customer still has to pay; the order appears after
    /// [`CheckoutOrchestrator::confirm_payment`].
    AwaitingPayment { intent: PaymentIntent },
}

#[derive(Clone)]
pub struct CheckoutOrchestrator {
    ctx: Context,
}

impl CheckoutOrchestrator {
    pub fn new(ctx: Context) -> Self { Self { ctx } }

    #[instrument(skip(self), fields(%user, %address, method = method.as_str()))]
    pub async fn initiate_checkout(&self, user: UserId, address: AddressId, method: PaymentMethod) -> Result<CheckoutOutcome> {
        let _guard = self.ctx.locks.acquire(user).await;
        self.ctx.retry_on_conflict(|| self.try_initiate(user, address, method)).await
    }

    async fn try_initiate(&self, user: UserId, address_id: AddressId, method: PaymentMethod) -> Result<CheckoutOutcome> {
        let cart = self.ctx.store.active_cart(user).await?.ok_or(CheckoutError::NotFound(Entity::Cart))?;
        if cart.is_empty() {
            return Err(CheckoutError::invalid_state("cannot check out an empty cart"));
        }
        check_lines(self.ctx.catalog.as_ref(), cart.lines()).await?;

        let quote = compute_total(cart.grand_total(), self.ctx.attached_rule(&cart).await?);
        let address = self.ctx.addresses.address(user, address_id).await?.ok_or(CheckoutError::NotFound(Entity::Address))?;
        let priced = PricedCart {
            cart_id: cart.id(),
            user_id: user,
            lines: cart.lines().to_vec(),
            grand_total: cart.grand_total(),
            coupon: cart.coupon().cloned(),
            discount: quote.discount,
            total: quote.total,
        };

        match method {
            PaymentMethod::Cash => {
                let order = Order::place(priced, address, Settlement::Cash);
                match self.ctx.store.place_order(&order, Some(cart.version())).await {
                    Ok(()) => {}
                    Err(StoreError::Duplicate) => return Err(CheckoutError::invalid_state("cart has already been checked out")),
                    Err(e) => return Err(e.into()),
                }
                self.placed(&order).await;
                Ok(CheckoutOutcome::OrderPlaced { order })
            }
            PaymentMethod::Gateway => {
                let intent = self.create_intent(&priced).await?;
                let pending = PendingPayment { intent: intent.clone(), priced, cart_version: cart.version(), address, created_at: Utc::now() };
                self.ctx.store.save_pending_payment(&pending).await?;
                info!(cart_id = %cart.id(), intent_id = %intent.id, amount = %intent.amount, "awaiting gateway payment");
                Ok(CheckoutOutcome::AwaitingPayment { intent })
            }
        }
    }

    /// Bounded by the verification timeout. Callers hold the user's lock.
    async fn create_intent(&self, priced: &PricedCart) -> Result<PaymentIntent> {
        let cart_ref = priced.cart_id.to_string();
        let call = self.ctx.gateway.create_intent(priced.total, &cart_ref);
        match tokio::time::timeout(self.ctx.settings.verify_timeout, call).await {
            Ok(intent) => Ok(intent?),
            Err(_) => Err(BackendError::Unavailable { service: "payment gateway", reason: "timed out creating payment intent".into() }.into()),
        }
    }

    /// Places the order for a verified gateway payment.
    ///
    /// Nothing is written unless the gateway verifies the response within
    /// the configured timeout. If the cart was edited after the intent was
    /// created the order is refused and the cart is left as it is.
    #[instrument(skip(self, response), fields(intent_id = %response.intent_id))]
    pub async fn confirm_payment(&self, response: &GatewayResponse) -> Result<Order> {
        let payment_reference = match self.verify(response).await {
            Some(verification) => verification.payment_reference,
            None => {
                self.ctx.events.publish(DomainEvent::Order(OrderEvent::PaymentRejected { intent_id: response.intent_id.clone() })).await;
                return Err(CheckoutError::PaymentVerificationFailed);
            }
        };

        let Some(pending) = self.ctx.store.pending_payment(&response.intent_id).await? else {
            return self.already_confirmed(&payment_reference).await?
                .ok_or_else(|| CheckoutError::invalid_state("no checkout is waiting for this payment"));
        };
        let cart_id = pending.priced.cart_id;
        let _guard = self.ctx.locks.acquire(pending.priced.user_id).await;

        if let Some(order) = self.already_confirmed(&payment_reference).await? {
            return Ok(order);
        }

        let order = Order::place(pending.priced, pending.address, Settlement::Gateway { payment_reference: payment_reference.clone() });
        match self.ctx.store.place_order(&order, Some(pending.cart_version)).await {
            Ok(()) => {
                self.placed(&order).await;
                Ok(order)
            }
            Err(StoreError::Duplicate | StoreError::Conflict) => match self.already_confirmed(&payment_reference).await? {
                Some(existing) => Ok(existing),
                None => {
                    warn!(%cart_id, %payment_reference, "cart changed after payment started, payment needs a refund");
                    Err(CheckoutError::invalid_state("cart changed after payment started"))
                }
            },
            Err(e) => Err(e.into()),
        }
    }

    async fn already_confirmed(&self, payment_reference: &str) -> Result<Option<Order>> {
        let order = self.ctx.store.order_for_payment(payment_reference).await?;
        if let Some(order) = &order {
            info!(order_id = %order.id(), "payment already confirmed");
        }
        Ok(order)
    }

    /// `None` when the gateway rejected the response, failed, or took too long.
    async fn verify(&self, response: &GatewayResponse) -> Option<PaymentVerification> {
        match tokio::time::timeout(self.ctx.settings.verify_timeout, self.ctx.gateway.verify(response)).await {
            Ok(Ok(verification)) if verification.verified => Some(verification),
            Ok(Ok(_)) => {
                warn!("gateway signature mismatch");
                None
            }
            Ok(Err(e)) => {
                warn!(error = %e, "gateway verification failed");
                None
            }
            Err(_) => {
                warn!(timeout = ?self.ctx.settings.verify_timeout, "gateway verification timed out");
                None
            }
        }
    }

    async fn placed(&self, order: &Order) {
        info!(order_id = %order.id(), cart_id = %order.cart_id(), total = %order.final_amount(), "order placed");
        self.ctx.events.publish_all([
            DomainEvent::Order(OrderEvent::Placed {
                order_id: order.id(),
                cart_id: order.cart_id(),
                user_id: order.user_id(),
                total: order.final_amount(),
            }),
            DomainEvent::Cart(CartEvent::Retired { cart_id: order.cart_id() }),
        ]).await;
    }
}
