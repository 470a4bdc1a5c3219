//! Skillmesh Escrow - Held funds and their one-way settlement
//!
//! One escrow per paid booking. An escrow leaves `held` exactly once:
//! release to the payee, refund to the payer, or dispute (which an operator
//! later resolves into one of the former two). The status check-and-set and
//! the ledger movement happen under the engine's write lock, so a second
//! concurrent settlement call observes the already-changed status and loses
//! cleanly.

mod gateway;

pub use gateway::{PaymentVerifier, StaticVerifier, VerifiedPayment};

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use skillmesh_ledger::Ledger;
use skillmesh_types::{
    Amount, BookingId, Escrow, EscrowId, EscrowStatus, FundingSource, MarketError, Result,
    TransactionCategory, UserId,
};

/// How a disputed escrow gets resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisputeResolution {
    /// Pay the provider
    Release,
    /// Refund the student
    Refund,
}

struct EscrowInner {
    escrows: HashMap<EscrowId, Escrow>,
    by_booking: HashMap<BookingId, EscrowId>,
}

/// The escrow engine
///
/// Owns every escrow record and the fund movements between the payer's
/// frozen pool and the payee's spendable balance, recorded via the ledger.
#[derive(Clone)]
pub struct EscrowEngine {
    inner: Arc<RwLock<EscrowInner>>,
    ledger: Ledger,
}

impl EscrowEngine {
    /// Create an engine over `ledger`
    pub fn new(ledger: Ledger) -> Self {
        Self {
            inner: Arc::new(RwLock::new(EscrowInner {
                escrows: HashMap::new(),
                by_booking: HashMap::new(),
            })),
            ledger,
        }
    }

    /// The ledger this engine settles through
    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Hold funds from the payer's wallet balance
    ///
    /// Debits spendable balance into the frozen pool and creates the escrow
    /// in one unit; an insufficient balance fails before any record exists.
    pub async fn hold(
        &self,
        booking_id: BookingId,
        payer: UserId,
        payee: UserId,
        amount: Amount,
    ) -> Result<Escrow> {
        let mut inner = self.inner.write().await;
        Self::require_no_escrow(&inner, booking_id)?;

        self.ledger.freeze(&payer, amount, booking_id).await?;

        let escrow = Self::insert(
            &mut inner,
            booking_id,
            payer,
            payee,
            amount,
            FundingSource::Wallet,
        );
        info!(booking = %booking_id, escrow = %escrow.id, %amount, "escrow held from wallet");
        Ok(escrow)
    }

    /// Hold backed by a verified gateway payment
    ///
    /// No wallet debit happens; the amount is recorded as held and the
    /// money enters the wallet system at settlement.
    pub async fn hold_verified(
        &self,
        booking_id: BookingId,
        payer: UserId,
        payee: UserId,
        payment: VerifiedPayment,
    ) -> Result<Escrow> {
        let mut inner = self.inner.write().await;
        Self::require_no_escrow(&inner, booking_id)?;

        let escrow = Self::insert(
            &mut inner,
            booking_id,
            payer,
            payee,
            payment.amount,
            FundingSource::Gateway {
                order_ref: payment.order_ref,
            },
        );
        info!(
            booking = %booking_id,
            escrow = %escrow.id,
            amount = %payment.amount,
            "escrow held from verified gateway payment"
        );
        Ok(escrow)
    }

    /// Release held funds to the payee
    ///
    /// Legal only from `held`; a concurrent winner leaves the loser with
    /// `InvalidEscrowState` and an unchanged wallet.
    pub async fn release(&self, booking_id: BookingId) -> Result<Escrow> {
        self.settle(booking_id, EscrowStatus::Held, DisputeResolution::Release, None)
            .await
    }

    /// Refund held funds to the payer, recording `reason`
    pub async fn refund(&self, booking_id: BookingId, reason: &str) -> Result<Escrow> {
        self.settle(
            booking_id,
            EscrowStatus::Held,
            DisputeResolution::Refund,
            Some(reason.to_string()),
        )
        .await
    }

    /// Freeze settlement pending operator resolution
    pub async fn dispute(&self, booking_id: BookingId, reason: &str) -> Result<Escrow> {
        let mut inner = self.inner.write().await;
        let escrow = Self::held_escrow_mut(&mut inner, booking_id)?;
        escrow.status = EscrowStatus::Disputed;
        escrow.dispute_reason = Some(reason.to_string());
        let snapshot = escrow.clone();
        warn!(booking = %booking_id, escrow = %snapshot.id, reason, "escrow disputed");
        Ok(snapshot)
    }

    /// Resolve a disputed escrow by releasing or refunding it
    pub async fn resolve_dispute(
        &self,
        booking_id: BookingId,
        resolution: DisputeResolution,
        reason: &str,
    ) -> Result<Escrow> {
        self.settle(
            booking_id,
            EscrowStatus::Disputed,
            resolution,
            Some(reason.to_string()),
        )
        .await
    }

    /// Get the escrow for a booking
    pub async fn for_booking(&self, booking_id: &BookingId) -> Result<Escrow> {
        let inner = self.inner.read().await;
        inner
            .by_booking
            .get(booking_id)
            .and_then(|id| inner.escrows.get(id))
            .cloned()
            .ok_or_else(|| MarketError::EscrowNotFound {
                booking_id: booking_id.to_string(),
            })
    }

    /// All escrows, audit order not guaranteed
    pub async fn all(&self) -> Vec<Escrow> {
        self.inner.read().await.escrows.values().cloned().collect()
    }

    // One-way transition out of `expected` plus the paired ledger movement.
    // The write lock spans both, which is what makes double settlement
    // impossible; a ledger failure reverts the status before returning.
    async fn settle(
        &self,
        booking_id: BookingId,
        expected: EscrowStatus,
        resolution: DisputeResolution,
        reason: Option<String>,
    ) -> Result<Escrow> {
        let mut inner = self.inner.write().await;
        let escrow_id = *inner.by_booking.get(&booking_id).ok_or_else(|| {
            MarketError::EscrowNotFound {
                booking_id: booking_id.to_string(),
            }
        })?;
        let escrow = inner.escrows.get_mut(&escrow_id).ok_or_else(|| {
            MarketError::EscrowNotFound {
                booking_id: booking_id.to_string(),
            }
        })?;

        if escrow.status != expected {
            return Err(MarketError::InvalidEscrowState {
                escrow_id: escrow.id.to_string(),
                status: escrow.status.to_string(),
            });
        }

        let now = Utc::now();
        match resolution {
            DisputeResolution::Release => {
                escrow.status = EscrowStatus::Released;
                escrow.released_at = Some(now);
            }
            DisputeResolution::Refund => {
                escrow.status = EscrowStatus::Refunded;
                escrow.refunded_at = Some(now);
                escrow.refund_reason = reason.clone();
            }
        }
        let (payer, payee, amount, wallet_funded) = (
            escrow.payer,
            escrow.payee,
            escrow.amount,
            escrow.is_wallet_funded(),
        );

        let movement = match (resolution, wallet_funded) {
            (DisputeResolution::Release, true) => {
                self.ledger
                    .release_frozen(&payer, &payee, amount, booking_id)
                    .await
            }
            (DisputeResolution::Release, false) => {
                self.ledger
                    .credit(
                        &payee,
                        amount,
                        TransactionCategory::Earning,
                        "session payment released",
                        Some(booking_id),
                    )
                    .await
            }
            (DisputeResolution::Refund, true) => {
                let description = reason.as_deref().unwrap_or("escrow refunded");
                self.ledger
                    .refund_frozen(&payer, amount, booking_id, description)
                    .await
            }
            (DisputeResolution::Refund, false) => {
                let description = reason.as_deref().unwrap_or("escrow refunded");
                self.ledger
                    .credit(
                        &payer,
                        amount,
                        TransactionCategory::Refund,
                        description,
                        Some(booking_id),
                    )
                    .await
            }
        };

        if let Err(e) = movement {
            // Fail closed: no status change without its ledger pair.
            let escrow = inner.escrows.get_mut(&escrow_id).expect("escrow exists");
            escrow.status = expected;
            escrow.released_at = None;
            escrow.refunded_at = None;
            escrow.refund_reason = None;
            warn!(booking = %booking_id, error = %e, "escrow settlement rolled back");
            return Err(e);
        }

        let snapshot = inner.escrows[&escrow_id].clone();
        info!(
            booking = %booking_id,
            escrow = %snapshot.id,
            status = %snapshot.status,
            %amount,
            "escrow settled"
        );
        Ok(snapshot)
    }

    fn require_no_escrow(inner: &EscrowInner, booking_id: BookingId) -> Result<()> {
        if inner.by_booking.contains_key(&booking_id) {
            return Err(MarketError::DuplicateEscrow {
                booking_id: booking_id.to_string(),
            });
        }
        Ok(())
    }

    fn held_escrow_mut(inner: &mut EscrowInner, booking_id: BookingId) -> Result<&mut Escrow> {
        let escrow_id = *inner.by_booking.get(&booking_id).ok_or_else(|| {
            MarketError::EscrowNotFound {
                booking_id: booking_id.to_string(),
            }
        })?;
        let escrow = inner
            .escrows
            .get_mut(&escrow_id)
            .expect("index entry has a record");
        if escrow.status != EscrowStatus::Held {
            return Err(MarketError::InvalidEscrowState {
                escrow_id: escrow.id.to_string(),
                status: escrow.status.to_string(),
            });
        }
        Ok(escrow)
    }

    fn insert(
        inner: &mut EscrowInner,
        booking_id: BookingId,
        payer: UserId,
        payee: UserId,
        amount: Amount,
        source: FundingSource,
    ) -> Escrow {
        let escrow = Escrow {
            id: EscrowId::new(),
            booking_id,
            payer,
            payee,
            amount,
            source,
            status: EscrowStatus::Held,
            refund_reason: None,
            dispute_reason: None,
            created_at: Utc::now(),
            released_at: None,
            refunded_at: None,
        };
        inner.by_booking.insert(booking_id, escrow.id);
        inner.escrows.insert(escrow.id, escrow.clone());
        escrow
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skillmesh_types::Currency;

    fn usd(minor: i64) -> Amount {
        Amount::usd(minor)
    }

    async fn funded_engine(payer: &UserId, minor: i64) -> EscrowEngine {
        let ledger = Ledger::new(Currency::Usd);
        ledger.deposit(payer, usd(minor)).await.unwrap();
        EscrowEngine::new(ledger)
    }

    #[tokio::test]
    async fn test_hold_freezes_payer_funds() {
        let payer = UserId::new();
        let payee = UserId::new();
        let engine = funded_engine(&payer, 5_000).await;
        let booking = BookingId::new();

        let escrow = engine.hold(booking, payer, payee, usd(5_000)).await.unwrap();
        assert_eq!(escrow.status, EscrowStatus::Held);
        assert!(escrow.is_wallet_funded());
        assert_eq!(engine.ledger().balance(&payer).await, usd(0));
        assert_eq!(engine.ledger().frozen_balance(&payer).await, usd(5_000));
    }

    #[tokio::test]
    async fn test_duplicate_hold_rejected() {
        let payer = UserId::new();
        let payee = UserId::new();
        let engine = funded_engine(&payer, 10_000).await;
        let booking = BookingId::new();

        engine.hold(booking, payer, payee, usd(5_000)).await.unwrap();
        let second = engine.hold(booking, payer, payee, usd(5_000)).await;
        assert!(matches!(second, Err(MarketError::DuplicateEscrow { .. })));
        // The duplicate attempt froze nothing extra
        assert_eq!(engine.ledger().frozen_balance(&payer).await, usd(5_000));
    }

    #[tokio::test]
    async fn test_insufficient_funds_creates_no_escrow() {
        let payer = UserId::new();
        let payee = UserId::new();
        let engine = funded_engine(&payer, 100).await;
        let booking = BookingId::new();

        let result = engine.hold(booking, payer, payee, usd(5_000)).await;
        assert!(matches!(result, Err(MarketError::InsufficientFunds { .. })));
        assert!(engine.for_booking(&booking).await.is_err());
    }

    #[tokio::test]
    async fn test_release_pays_payee_exactly_once() {
        let payer = UserId::new();
        let payee = UserId::new();
        let engine = funded_engine(&payer, 5_000).await;
        let booking = BookingId::new();
        engine.hold(booking, payer, payee, usd(5_000)).await.unwrap();

        let escrow = engine.release(booking).await.unwrap();
        assert_eq!(escrow.status, EscrowStatus::Released);
        assert!(escrow.released_at.is_some());
        assert_eq!(engine.ledger().balance(&payee).await, usd(5_000));

        let second = engine.release(booking).await;
        assert!(matches!(second, Err(MarketError::InvalidEscrowState { .. })));
        assert_eq!(engine.ledger().balance(&payee).await, usd(5_000));
    }

    #[tokio::test]
    async fn test_refund_returns_funds_with_reason() {
        let payer = UserId::new();
        let payee = UserId::new();
        let engine = funded_engine(&payer, 5_000).await;
        let booking = BookingId::new();
        engine.hold(booking, payer, payee, usd(5_000)).await.unwrap();

        let escrow = engine.refund(booking, "provider no-show").await.unwrap();
        assert_eq!(escrow.status, EscrowStatus::Refunded);
        assert_eq!(escrow.refund_reason.as_deref(), Some("provider no-show"));
        assert_eq!(engine.ledger().balance(&payer).await, usd(5_000));
        assert_eq!(engine.ledger().frozen_balance(&payer).await, usd(0));

        let second = engine.refund(booking, "again").await;
        assert!(matches!(second, Err(MarketError::InvalidEscrowState { .. })));
    }

    #[tokio::test]
    async fn test_release_after_refund_rejected() {
        let payer = UserId::new();
        let payee = UserId::new();
        let engine = funded_engine(&payer, 5_000).await;
        let booking = BookingId::new();
        engine.hold(booking, payer, payee, usd(5_000)).await.unwrap();
        engine.refund(booking, "cancelled").await.unwrap();

        let result = engine.release(booking).await;
        assert!(matches!(result, Err(MarketError::InvalidEscrowState { .. })));
        assert_eq!(engine.ledger().balance(&payee).await, usd(0));
    }

    #[tokio::test]
    async fn test_gateway_hold_never_touches_payer_wallet() {
        let payer = UserId::new();
        let payee = UserId::new();
        let engine = EscrowEngine::new(Ledger::new(Currency::Usd));
        let booking = BookingId::new();

        let escrow = engine
            .hold_verified(
                booking,
                payer,
                payee,
                VerifiedPayment {
                    order_ref: "order_9".to_string(),
                    amount: usd(4_200),
                },
            )
            .await
            .unwrap();
        assert!(!escrow.is_wallet_funded());
        assert_eq!(engine.ledger().balance(&payer).await, usd(0));
        assert_eq!(engine.ledger().frozen_balance(&payer).await, usd(0));

        engine.release(booking).await.unwrap();
        assert_eq!(engine.ledger().balance(&payee).await, usd(4_200));
    }

    #[tokio::test]
    async fn test_gateway_refund_credits_payer() {
        let payer = UserId::new();
        let payee = UserId::new();
        let engine = EscrowEngine::new(Ledger::new(Currency::Usd));
        let booking = BookingId::new();
        engine
            .hold_verified(
                booking,
                payer,
                payee,
                VerifiedPayment {
                    order_ref: "order_10".to_string(),
                    amount: usd(4_200),
                },
            )
            .await
            .unwrap();

        engine.refund(booking, "attendance below threshold").await.unwrap();
        assert_eq!(engine.ledger().balance(&payer).await, usd(4_200));
        assert_eq!(engine.ledger().balance(&payee).await, usd(0));
    }

    #[tokio::test]
    async fn test_dispute_blocks_settlement_until_resolved() {
        let payer = UserId::new();
        let payee = UserId::new();
        let engine = funded_engine(&payer, 5_000).await;
        let booking = BookingId::new();
        engine.hold(booking, payer, payee, usd(5_000)).await.unwrap();

        engine.dispute(booking, "student claims no-show").await.unwrap();
        assert!(matches!(
            engine.release(booking).await,
            Err(MarketError::InvalidEscrowState { .. })
        ));
        assert!(matches!(
            engine.refund(booking, "x").await,
            Err(MarketError::InvalidEscrowState { .. })
        ));

        let escrow = engine
            .resolve_dispute(booking, DisputeResolution::Refund, "operator ruling")
            .await
            .unwrap();
        assert_eq!(escrow.status, EscrowStatus::Refunded);
        assert_eq!(engine.ledger().balance(&payer).await, usd(5_000));
    }

    #[tokio::test]
    async fn test_concurrent_release_single_winner() {
        let payer = UserId::new();
        let payee = UserId::new();
        let engine = funded_engine(&payer, 5_000).await;
        let booking = BookingId::new();
        engine.hold(booking, payer, payee, usd(5_000)).await.unwrap();

        let (a, b) = tokio::join!(engine.release(booking), engine.release(booking));
        let wins = [&a, &b].iter().filter(|r| r.is_ok()).count();
        assert_eq!(wins, 1);
        let loser = if a.is_ok() { b } else { a };
        assert!(matches!(loser, Err(MarketError::InvalidEscrowState { .. })));
        // Credited exactly once
        assert_eq!(engine.ledger().balance(&payee).await, usd(5_000));
    }
}
