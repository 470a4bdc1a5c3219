//! Transaction types for Skillmesh
//!
//! Transactions are the append-only audit trail of truth for every wallet
//! balance change. They are never mutated or deleted.

use crate::{Amount, BookingId, TransactionId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Direction of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionType {
    /// Balance increase
    Credit,
    /// Balance decrease
    Debit,
}

/// Business category of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionCategory {
    /// Wallet top-up
    Deposit,
    /// Payment into escrow
    Payment,
    /// Escrow returned to the payer
    Refund,
    /// Escrow released to the payee
    Earning,
}

impl fmt::Display for TransactionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Deposit => "DEPOSIT",
            Self::Payment => "PAYMENT",
            Self::Refund => "REFUND",
            Self::Earning => "EARNING",
        };
        write!(f, "{s}")
    }
}

/// An append-only ledger entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Unique transaction ID
    pub id: TransactionId,
    /// The wallet owner affected
    pub user_id: UserId,
    /// Amount moved
    pub amount: Amount,
    /// Direction
    pub tx_type: TransactionType,
    /// Business category
    pub category: TransactionCategory,
    /// Booking this movement settles, if any
    pub booking_id: Option<BookingId>,
    /// Human-readable description
    pub description: String,
    /// Spendable balance after this entry was applied
    pub balance_after: Amount,
    /// When the entry was written
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_display() {
        assert_eq!(TransactionCategory::Earning.to_string(), "EARNING");
        assert_eq!(TransactionCategory::Refund.to_string(), "REFUND");
    }

    #[test]
    fn test_serde_category_casing() {
        let json = serde_json::to_string(&TransactionCategory::Deposit).unwrap();
        assert_eq!(json, "\"DEPOSIT\"");
    }
}
