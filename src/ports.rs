//! Collaborators the checkout core consumes but does not own.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use validator::Validate;

use crate::domain::aggregates::{Address, Product};
use crate::domain::value_objects::{AddressId, ProductId, UserId};

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{service} unavailable: {reason}")]
    Unavailable { service: &'static str, reason: String },
}

#[async_trait]
pub trait Catalog: Send + Sync {
    async fn product(&self, id: ProductId) -> Result<Option<Product>, BackendError>;
}

#[async_trait]
pub trait AddressBook: Send + Sync {
    async fn address(&self, user: UserId, id: AddressId) -> Result<Option<Address>, BackendError>;
}

/// An amount the customer has been asked to pay through the gateway.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    pub amount: Decimal,
    /// Our own reference, echoed back by the gateway.
    pub reference: String,
}

/// What the gateway hands back once the customer has paid.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct GatewayResponse {
    #[validate(length(min = 1, max = 128))]
    pub intent_id: String,
    #[validate(length(min = 1, max = 128))]
    pub payment_id: String,
    #[validate(length(min = 1, max = 256))]
    pub signature: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PaymentVerification {
    pub verified: bool,
    /// Canonical form of the gateway's payment id.
    pub payment_reference: String,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_intent(&self, amount: Decimal, reference: &str) -> Result<PaymentIntent, BackendError>;
    async fn verify(&self, response: &GatewayResponse) -> Result<PaymentVerification, BackendError>;
}
