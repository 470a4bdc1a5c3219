//! Escrow types for Skillmesh
//!
//! One escrow per paid booking. Escrows are audit records: they are never
//! deleted, and they leave `held` exactly once.

use crate::{Amount, BookingId, EscrowId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of an escrow record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscrowStatus {
    /// Funds are held against the booking
    Held,
    /// Funds went to the payee (terminal)
    Released,
    /// Funds went back to the payer (terminal)
    Refunded,
    /// Settlement frozen pending operator resolution
    Disputed,
}

impl EscrowStatus {
    /// Check if funds have reached a final disposition
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Released | Self::Refunded)
    }
}

impl fmt::Display for EscrowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Held => "held",
            Self::Released => "released",
            Self::Refunded => "refunded",
            Self::Disputed => "disputed",
        };
        write!(f, "{s}")
    }
}

/// Where the held funds came from
///
/// Wallet holds move the payer's spendable balance into the frozen pool.
/// Gateway holds are backed by a verified external payment; the payer's
/// wallet is never touched and the money enters the wallet system only at
/// settlement, credited to whichever party the settlement favours.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FundingSource {
    /// Funded from the payer's wallet balance
    Wallet,
    /// Backed by a verified gateway payment
    Gateway {
        /// The gateway's order reference
        order_ref: String,
    },
}

/// A held-funds record, 1:1 with a paid booking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Escrow {
    /// Unique escrow ID
    pub id: EscrowId,
    /// The booking this escrow backs (unique)
    pub booking_id: BookingId,
    /// The student paying for the session
    pub payer: UserId,
    /// The provider paid on release
    pub payee: UserId,
    /// Amount held
    pub amount: Amount,
    /// Where the held funds came from
    pub source: FundingSource,
    /// Current status
    pub status: EscrowStatus,
    /// Reason recorded on refund
    pub refund_reason: Option<String>,
    /// Reason recorded when the escrow was disputed
    pub dispute_reason: Option<String>,
    /// When the escrow was created
    pub created_at: DateTime<Utc>,
    /// When the escrow was released
    pub released_at: Option<DateTime<Utc>>,
    /// When the escrow was refunded
    pub refunded_at: Option<DateTime<Utc>>,
}

impl Escrow {
    /// Check whether the hold came from the payer's wallet
    pub fn is_wallet_funded(&self) -> bool {
        matches!(self.source, FundingSource::Wallet)
    }
}
