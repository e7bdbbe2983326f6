//! LedgerStore trait definition.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::Result;
use crate::model::{Account, Balance, DeltaOutcome, LedgerDelta, LedgerTxn, MemberId, TxnReference};

/// Result of an earnings-to-wallet transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferOutcome {
    pub earnings_balance_cents: i64,
    pub wallet_balance_cents: i64,
    /// False when the transfer reference had already been applied.
    pub applied: bool,
}

/// Result of forcing a balance to a target value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceAdjustment {
    pub previous_cents: i64,
    pub balance_cents: i64,
    pub delta_cents: i64,
}

/// Wallet and network-earnings balances with their append-only logs.
///
/// A balance and its log entry are always written in the same transaction, so
/// `balance(..).balance_cents == derived_balance(..)` at every commit.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Atomically apply a delta and append a log entry.
    ///
    /// A delta carrying a reference already applied to the same account is a
    /// no-op returning `applied = false`. A delta that would make the balance
    /// negative fails with `InsufficientFunds` and changes nothing.
    async fn apply_delta(&self, delta: &LedgerDelta) -> Result<DeltaOutcome>;

    /// Cached balance (zero for an account never touched).
    async fn balance(&self, member: &MemberId, account: Account) -> Result<Balance>;

    /// Log entries, oldest first.
    async fn transactions(&self, member: &MemberId, account: Account) -> Result<Vec<LedgerTxn>>;

    /// Sum of all logged deltas.
    async fn derived_balance(&self, member: &MemberId, account: Account) -> Result<i64>;

    /// Debit network earnings and credit the wallet, both or neither.
    async fn transfer_earnings_to_wallet(
        &self,
        member: &MemberId,
        amount_cents: i64,
        reference: &TxnReference,
    ) -> Result<TransferOutcome>;

    /// Force a balance to `target_cents` by logging the difference.
    async fn set_balance(
        &self,
        member: &MemberId,
        account: Account,
        target_cents: i64,
        reference: &TxnReference,
    ) -> Result<BalanceAdjustment>;
}
