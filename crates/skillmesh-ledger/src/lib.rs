//! Skillmesh Ledger - Wallets and the append-only transaction log
//!
//! The ledger is:
//! - Account-keyed by UserId, one wallet per user
//! - Append-only (transactions are never mutated or deleted)
//! - Atomic (a balance delta and its transaction land together or not at all)
//!
//! # Invariants
//!
//! 1. No negative balances, spendable or frozen
//! 2. Every balance mutation is paired 1:1 with a Transaction write
//! 3. The frozen pool only changes through hold/settlement movements

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use skillmesh_types::{
    Amount, BookingId, Currency, MarketError, Result, Transaction, TransactionCategory,
    TransactionId, TransactionType, UserId,
};

/// Payout destination recorded on a wallet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutDetails {
    /// Payout rail, e.g. "bank_transfer" or "upi"
    pub method: String,
    /// Opaque account reference at that rail
    pub reference: String,
}

/// One wallet per user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wallet {
    /// The wallet owner
    pub user_id: UserId,
    /// Spendable balance
    pub balance: Amount,
    /// Funds earmarked for outstanding held escrows, not spendable
    pub frozen_balance: Amount,
    /// Where released earnings get paid out
    pub payout_details: Option<PayoutDetails>,
}

impl Wallet {
    fn new(user_id: UserId, currency: Currency) -> Self {
        Self {
            user_id,
            balance: Amount::zero(currency),
            frozen_balance: Amount::zero(currency),
            payout_details: None,
        }
    }
}

struct LedgerInner {
    wallets: HashMap<UserId, Wallet>,
    // Append-only; the audit trail of truth for balance changes.
    transactions: Vec<Transaction>,
}

/// The Skillmesh ledger
///
/// Thread-safe handle over the wallet store and transaction log. All
/// mutations take the single write lock, so a balance delta and its
/// transaction append are one atomic unit.
#[derive(Clone)]
pub struct Ledger {
    inner: Arc<RwLock<LedgerInner>>,
    currency: Currency,
}

impl Ledger {
    /// Create a new in-memory ledger settling in `currency`
    pub fn new(currency: Currency) -> Self {
        Self {
            inner: Arc::new(RwLock::new(LedgerInner {
                wallets: HashMap::new(),
                transactions: Vec::new(),
            })),
            currency,
        }
    }

    /// The settlement currency of this ledger
    pub fn currency(&self) -> Currency {
        self.currency
    }

    /// Get a wallet snapshot
    pub async fn wallet(&self, user_id: &UserId) -> Result<Wallet> {
        let inner = self.inner.read().await;
        inner
            .wallets
            .get(user_id)
            .cloned()
            .ok_or_else(|| MarketError::WalletNotFound {
                user_id: user_id.to_string(),
            })
    }

    /// Spendable balance, zero for unknown users
    pub async fn balance(&self, user_id: &UserId) -> Amount {
        let inner = self.inner.read().await;
        inner
            .wallets
            .get(user_id)
            .map(|w| w.balance)
            .unwrap_or_else(|| Amount::zero(self.currency))
    }

    /// Frozen balance, zero for unknown users
    pub async fn frozen_balance(&self, user_id: &UserId) -> Amount {
        let inner = self.inner.read().await;
        inner
            .wallets
            .get(user_id)
            .map(|w| w.frozen_balance)
            .unwrap_or_else(|| Amount::zero(self.currency))
    }

    /// Record payout details on a wallet, creating it if needed
    pub async fn set_payout_details(&self, user_id: &UserId, details: PayoutDetails) {
        let mut inner = self.inner.write().await;
        let currency = self.currency;
        inner
            .wallets
            .entry(*user_id)
            .or_insert_with(|| Wallet::new(*user_id, currency))
            .payout_details = Some(details);
    }

    /// Top up a wallet's spendable balance
    pub async fn deposit(&self, user_id: &UserId, amount: Amount) -> Result<Transaction> {
        self.credit(
            user_id,
            amount,
            TransactionCategory::Deposit,
            "wallet deposit",
            None,
        )
        .await
    }

    /// Credit a wallet's spendable balance, creating the wallet if needed
    pub async fn credit(
        &self,
        user_id: &UserId,
        amount: Amount,
        category: TransactionCategory,
        description: &str,
        booking_id: Option<BookingId>,
    ) -> Result<Transaction> {
        require_positive(amount)?;
        let mut inner = self.inner.write().await;
        let currency = self.currency;
        let wallet = inner
            .wallets
            .entry(*user_id)
            .or_insert_with(|| Wallet::new(*user_id, currency));

        wallet.balance = wallet.balance.checked_add(amount)?;
        let balance_after = wallet.balance;

        let tx = record(
            &mut inner.transactions,
            *user_id,
            amount,
            TransactionType::Credit,
            category,
            description,
            booking_id,
            balance_after,
        );
        debug!(user = %user_id, %amount, category = %category, "ledger credit");
        Ok(tx)
    }

    /// Debit a wallet's spendable balance
    ///
    /// Fails before any mutation if the wallet is missing or short.
    pub async fn debit(
        &self,
        user_id: &UserId,
        amount: Amount,
        category: TransactionCategory,
        description: &str,
        booking_id: Option<BookingId>,
    ) -> Result<Transaction> {
        require_positive(amount)?;
        let mut inner = self.inner.write().await;
        let wallet = inner
            .wallets
            .get_mut(user_id)
            .ok_or_else(|| MarketError::WalletNotFound {
                user_id: user_id.to_string(),
            })?;

        wallet.balance = checked_spend(wallet.balance, amount, user_id)?;
        let balance_after = wallet.balance;

        let tx = record(
            &mut inner.transactions,
            *user_id,
            amount,
            TransactionType::Debit,
            category,
            description,
            booking_id,
            balance_after,
        );
        debug!(user = %user_id, %amount, category = %category, "ledger debit");
        Ok(tx)
    }

    /// Move spendable funds into the frozen pool for an escrow hold
    ///
    /// Writes the payer's DEBIT/PAYMENT transaction in the same unit.
    pub async fn freeze(
        &self,
        user_id: &UserId,
        amount: Amount,
        booking_id: BookingId,
    ) -> Result<Transaction> {
        require_positive(amount)?;
        let mut inner = self.inner.write().await;
        let wallet = inner
            .wallets
            .get_mut(user_id)
            .ok_or_else(|| MarketError::WalletNotFound {
                user_id: user_id.to_string(),
            })?;

        wallet.balance = checked_spend(wallet.balance, amount, user_id)?;
        wallet.frozen_balance = wallet.frozen_balance.checked_add(amount)?;
        let balance_after = wallet.balance;

        let tx = record(
            &mut inner.transactions,
            *user_id,
            amount,
            TransactionType::Debit,
            TransactionCategory::Payment,
            "escrow hold",
            Some(booking_id),
            balance_after,
        );
        debug!(user = %user_id, %amount, booking = %booking_id, "escrow funds frozen");
        Ok(tx)
    }

    /// Settle a wallet-funded hold in the payee's favour
    ///
    /// Clears the payer's frozen pool and credits the payee's spendable
    /// balance, writing the payee's CREDIT/EARNING transaction. Both sides
    /// move under one lock; an impossible second leg reverts the first.
    pub async fn release_frozen(
        &self,
        payer: &UserId,
        payee: &UserId,
        amount: Amount,
        booking_id: BookingId,
    ) -> Result<Transaction> {
        require_positive(amount)?;
        let mut inner = self.inner.write().await;
        let currency = self.currency;

        {
            let payer_wallet =
                inner
                    .wallets
                    .get_mut(payer)
                    .ok_or_else(|| MarketError::WalletNotFound {
                        user_id: payer.to_string(),
                    })?;
            payer_wallet.frozen_balance = payer_wallet.frozen_balance.checked_sub(amount)?;
        }

        let payee_wallet = inner
            .wallets
            .entry(*payee)
            .or_insert_with(|| Wallet::new(*payee, currency));
        match payee_wallet.balance.checked_add(amount) {
            Ok(new_balance) => payee_wallet.balance = new_balance,
            Err(e) => {
                // Restore the payer's frozen pool before failing closed.
                if let Some(payer_wallet) = inner.wallets.get_mut(payer) {
                    payer_wallet.frozen_balance =
                        payer_wallet.frozen_balance.checked_add(amount)?;
                }
                return Err(e);
            }
        }
        let balance_after = inner.wallets[payee].balance;

        let tx = record(
            &mut inner.transactions,
            *payee,
            amount,
            TransactionType::Credit,
            TransactionCategory::Earning,
            "session payment released",
            Some(booking_id),
            balance_after,
        );
        debug!(payer = %payer, payee = %payee, %amount, booking = %booking_id, "escrow released");
        Ok(tx)
    }

    /// Settle a wallet-funded hold back to the payer
    ///
    /// Clears the frozen pool into spendable balance and writes the payer's
    /// CREDIT/REFUND transaction.
    pub async fn refund_frozen(
        &self,
        payer: &UserId,
        amount: Amount,
        booking_id: BookingId,
        description: &str,
    ) -> Result<Transaction> {
        require_positive(amount)?;
        let mut inner = self.inner.write().await;
        let wallet = inner
            .wallets
            .get_mut(payer)
            .ok_or_else(|| MarketError::WalletNotFound {
                user_id: payer.to_string(),
            })?;

        wallet.frozen_balance = wallet.frozen_balance.checked_sub(amount)?;
        wallet.balance = wallet.balance.checked_add(amount)?;
        let balance_after = wallet.balance;

        let tx = record(
            &mut inner.transactions,
            *payer,
            amount,
            TransactionType::Credit,
            TransactionCategory::Refund,
            description,
            Some(booking_id),
            balance_after,
        );
        debug!(payer = %payer, %amount, booking = %booking_id, "escrow refunded to payer");
        Ok(tx)
    }

    /// Transactions for a user, newest first
    pub async fn history(&self, user_id: &UserId) -> Vec<Transaction> {
        let inner = self.inner.read().await;
        inner
            .transactions
            .iter()
            .rev()
            .filter(|t| t.user_id == *user_id)
            .cloned()
            .collect()
    }

    /// Transactions tied to a booking, in write order
    pub async fn booking_transactions(&self, booking_id: &BookingId) -> Vec<Transaction> {
        let inner = self.inner.read().await;
        inner
            .transactions
            .iter()
            .filter(|t| t.booking_id == Some(*booking_id))
            .cloned()
            .collect()
    }

    /// Total number of transactions written
    pub async fn transaction_count(&self) -> usize {
        self.inner.read().await.transactions.len()
    }
}

fn require_positive(amount: Amount) -> Result<()> {
    if !amount.is_positive() {
        return Err(MarketError::invalid_input(
            "amount",
            "must be greater than zero",
        ));
    }
    Ok(())
}

fn checked_spend(balance: Amount, amount: Amount, user_id: &UserId) -> Result<Amount> {
    balance
        .checked_sub(amount)
        .map_err(|_| MarketError::InsufficientFunds {
            user_id: user_id.to_string(),
            requested: amount.to_string(),
            available: balance.to_string(),
        })
}

#[allow(clippy::too_many_arguments)]
fn record(
    transactions: &mut Vec<Transaction>,
    user_id: UserId,
    amount: Amount,
    tx_type: TransactionType,
    category: TransactionCategory,
    description: &str,
    booking_id: Option<BookingId>,
    balance_after: Amount,
) -> Transaction {
    let tx = Transaction {
        id: TransactionId::new(),
        user_id,
        amount,
        tx_type,
        category,
        booking_id,
        description: description.to_string(),
        balance_after,
        created_at: Utc::now(),
    };
    transactions.push(tx.clone());
    tx
}
