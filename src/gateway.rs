//! Signature-checking payment gateway.
//!
//! The hosted payment page signs `intent_id|payment_id` with the shared
//! secret; a response is genuine when that HMAC-SHA256 matches.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use sha2::Sha256;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::ports::{BackendError, GatewayResponse, PaymentGateway, PaymentIntent, PaymentVerification};

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone)]
pub struct HmacGateway {
    secret: String,
}

impl std::fmt::Debug for HmacGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HmacGateway").finish_non_exhaustive()
    }
}

impl HmacGateway {
    pub fn new(secret: impl Into<String>) -> Self { Self { secret: secret.into() } }

    fn mac(&self, intent_id: &str, payment_id: &str) -> Result<HmacSha256, BackendError> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes()).map_err(|e| BackendError::Unavailable {
            service: "payment gateway",
            reason: e.to_string(),
        })?;
        mac.update(intent_id.as_bytes());
        mac.update(b"|");
        mac.update(payment_id.as_bytes());
        Ok(mac)
    }

    /// Hex signature the gateway attaches to a completed payment.
    pub fn sign(&self, intent_id: &str, payment_id: &str) -> Result<String, BackendError> {
        Ok(hex::encode(self.mac(intent_id, payment_id)?.finalize().into_bytes()))
    }
}

#[async_trait]
impl PaymentGateway for HmacGateway {
    #[instrument(skip(self))]
    async fn create_intent(&self, amount: Decimal, reference: &str) -> Result<PaymentIntent, BackendError> {
        let intent = PaymentIntent {
            id: format!("pi_{}", Uuid::new_v4().simple()),
            amount,
            reference: reference.to_string(),
        };
        debug!(intent_id = %intent.id, "payment intent created");
        Ok(intent)
    }

    #[instrument(skip(self, response), fields(intent_id = %response.intent_id))]
    async fn verify(&self, response: &GatewayResponse) -> Result<PaymentVerification, BackendError> {
        let payment_reference = response.payment_id.trim().to_string();
        let verified = match hex::decode(response.signature.trim()) {
            Ok(signature) => self.mac(&response.intent_id, &payment_reference)?.verify_slice(&signature).is_ok(),
            Err(_) => false,
        };
        Ok(PaymentVerification { verified, payment_reference })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_signed_response_verifies() {
        let gateway = HmacGateway::new("s3cret");
        let intent = gateway.create_intent(dec!(18), "cart-1").await.unwrap();
        assert!(intent.id.starts_with("pi_"));
        assert_eq!(intent.amount, dec!(18));

        let signature = gateway.sign(&intent.id, "pay_42").unwrap();
        let response = GatewayResponse { intent_id: intent.id.clone(), payment_id: " pay_42 ".into(), signature };
        let verification = gateway.verify(&response).await.unwrap();
        assert!(verification.verified);
        assert_eq!(verification.payment_reference, "pay_42");
    }

    #[tokio::test]
    async fn test_tampered_response_is_rejected() {
        let gateway = HmacGateway::new("s3cret");
        let signature = gateway.sign("pi_1", "pay_1").unwrap();
        let forged = GatewayResponse { intent_id: "pi_1".into(), payment_id: "pay_2".into(), signature };
        assert!(!gateway.verify(&forged).await.unwrap().verified);

        let garbage = GatewayResponse { intent_id: "pi_1".into(), payment_id: "pay_1".into(), signature: "zz".into() };
        assert!(!gateway.verify(&garbage).await.unwrap().verified);

        let other_key = HmacGateway::new("other").sign("pi_1", "pay_1").unwrap();
        let wrong_key = GatewayResponse { intent_id: "pi_1".into(), payment_id: "pay_1".into(), signature: other_key };
        assert!(!gateway.verify(&wrong_key).await.unwrap().verified);
    }
}
