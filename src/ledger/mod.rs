//! Wallet and network-earnings ledger operations.
//!
//! Every mutation goes through the store's atomic delta primitive; nothing
//! here reads a balance and writes it back.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::model::{
    Account, Balance, DeltaOutcome, LedgerDelta, LedgerTxn, MemberId, TxnReason, TxnReference,
};
use crate::storage::{StorageError, Store};

/// Ledger errors.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Insufficient {account} balance for {member}: {available} available, {requested} requested")]
    InsufficientFunds {
        account: Account,
        member: MemberId,
        available: i64,
        requested: i64,
    },

    #[error("Amount must be positive, got {0}")]
    NonPositiveAmount(i64),

    #[error("Storage error: {0}")]
    Storage(StorageError),
}

impl From<StorageError> for LedgerError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::InsufficientFunds {
                account,
                member,
                available,
                requested,
            } => LedgerError::InsufficientFunds {
                account,
                member,
                available,
                requested,
            },
            other => LedgerError::Storage(other),
        }
    }
}

/// Cached balance compared with the sum of its log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reconciliation {
    pub account: Account,
    pub cached_cents: i64,
    pub derived_cents: i64,
}

impl Reconciliation {
    pub fn is_consistent(&self) -> bool {
        self.cached_cents == self.derived_cents
    }

    /// `cached - derived`.
    pub fn drift_cents(&self) -> i64 {
        self.cached_cents - self.derived_cents
    }
}

/// Ledger operations over a store.
#[derive(Clone)]
pub struct LedgerService {
    store: Arc<dyn Store>,
}

impl LedgerService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Apply one delta. Credits never fail on balance grounds; a debit past
    /// zero fails with `InsufficientFunds` and changes nothing.
    pub async fn apply_delta(&self, delta: &LedgerDelta) -> Result<DeltaOutcome, LedgerError> {
        if delta.delta_cents == 0 {
            return Err(LedgerError::NonPositiveAmount(0));
        }
        let outcome = self.store.apply_delta(delta).await?;
        if !outcome.applied {
            debug!(
                member = %delta.member_id,
                account = %delta.account,
                reference = ?delta.reference,
                "Delta already applied"
            );
        }
        Ok(outcome)
    }

    pub async fn balance(&self, member: &MemberId, account: Account) -> Result<Balance, LedgerError> {
        Ok(self.store.balance(member, account).await?)
    }

    pub async fn history(
        &self,
        member: &MemberId,
        account: Account,
    ) -> Result<Vec<LedgerTxn>, LedgerError> {
        Ok(self.store.transactions(member, account).await?)
    }

    /// Pay for a purchase out of the wallet.
    ///
    /// `reference` identifies the order; a repeated reference is a no-op.
    pub async fn spend_wallet(
        &self,
        member: &MemberId,
        amount_cents: i64,
        reference: TxnReference,
    ) -> Result<DeltaOutcome, LedgerError> {
        if amount_cents <= 0 {
            return Err(LedgerError::NonPositiveAmount(amount_cents));
        }
        let delta = LedgerDelta::debit(
            Account::Wallet,
            member.clone(),
            amount_cents,
            TxnReason::WalletPurchase,
        )
        .with_reference(reference);
        self.apply_delta(&delta).await
    }

    /// Compare the cached balance with the sum of the log.
    pub async fn reconcile(
        &self,
        member: &MemberId,
        account: Account,
    ) -> Result<Reconciliation, LedgerError> {
        let cached = self.store.balance(member, account).await?.balance_cents;
        let derived = self.store.derived_balance(member, account).await?;
        let report = Reconciliation {
            account,
            cached_cents: cached,
            derived_cents: derived,
        };
        if !report.is_consistent() {
            warn!(
                member = %member,
                account = %account,
                cached_cents = cached,
                derived_cents = derived,
                "Ledger balance drift"
            );
        }
        Ok(report)
    }
}
