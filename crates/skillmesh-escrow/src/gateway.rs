//! Payment gateway collaborator
//!
//! The core never talks to the gateway's order API. It trusts a verified
//! signature callback as proof that funds are available, modelled here as
//! the `PaymentVerifier` seam.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use skillmesh_types::{Amount, MarketError, Result};

/// Proof that an external payment happened
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedPayment {
    /// The gateway's order reference
    pub order_ref: String,
    /// The amount the gateway captured
    pub amount: Amount,
}

/// Verifies a gateway callback before any escrow is created
#[async_trait]
pub trait PaymentVerifier: Send + Sync {
    /// Verify an order/signature pair, returning the captured payment
    async fn verify(&self, order_ref: &str, signature: &str) -> Result<VerifiedPayment>;
}

/// In-memory verifier backed by pre-registered orders
///
/// Stands in for the real gateway in tests and the demo daemon.
#[derive(Clone, Default)]
pub struct StaticVerifier {
    orders: Arc<RwLock<HashMap<String, (Amount, String)>>>,
}

impl StaticVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an order the verifier will accept
    pub async fn register_order(&self, order_ref: &str, amount: Amount, signature: &str) {
        self.orders
            .write()
            .await
            .insert(order_ref.to_string(), (amount, signature.to_string()));
    }
}

#[async_trait]
impl PaymentVerifier for StaticVerifier {
    async fn verify(&self, order_ref: &str, signature: &str) -> Result<VerifiedPayment> {
        let orders = self.orders.read().await;
        match orders.get(order_ref) {
            Some((amount, expected)) if expected == signature => Ok(VerifiedPayment {
                order_ref: order_ref.to_string(),
                amount: *amount,
            }),
            Some(_) => Err(MarketError::unauthorized(
                "gateway signature verification failed",
            )),
            None => Err(MarketError::invalid_input("order_ref", "unknown order")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_verify_known_order() {
        let verifier = StaticVerifier::new();
        verifier
            .register_order("order_1", Amount::usd(5_000), "sig_ok")
            .await;

        let payment = verifier.verify("order_1", "sig_ok").await.unwrap();
        assert_eq!(payment.amount, Amount::usd(5_000));
    }

    #[tokio::test]
    async fn test_bad_signature_rejected() {
        let verifier = StaticVerifier::new();
        verifier
            .register_order("order_1", Amount::usd(5_000), "sig_ok")
            .await;

        let result = verifier.verify("order_1", "sig_bad").await;
        assert!(matches!(result, Err(MarketError::Unauthorized { .. })));
    }

    #[tokio::test]
    async fn test_unknown_order_rejected() {
        let verifier = StaticVerifier::new();
        let result = verifier.verify("order_x", "sig").await;
        assert!(matches!(result, Err(MarketError::InvalidInput { .. })));
    }
}
