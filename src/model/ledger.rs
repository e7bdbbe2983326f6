//! Wallet and network-earnings ledger records.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Gateway, MemberId};

string_enum! {
    /// The two balances every member owns.
    pub enum Account: "account" {
        /// Spendable balance.
        Wallet => "wallet",
        /// Commission income pending transfer or payout.
        NetworkEarnings => "network_earnings",
    }
}

string_enum! {
    /// Reason code attached to every ledger entry.
    pub enum TxnReason: "transaction reason" {
        Commission => "commission",
        AffiliateCommission => "affiliate_commission",
        PhaseReward => "phase_reward",
        WalletRecharge => "wallet_recharge",
        WalletPurchase => "wallet_purchase",
        EarningsTransfer => "earnings_transfer",
        Payout => "payout",
        PayoutReversal => "payout_reversal",
        AdminAdjustment => "admin_adjustment",
    }
}

impl TxnReason {
    /// Whether a positive delta with this reason adds to the lifetime total.
    pub fn counts_toward_lifetime(&self) -> bool {
        matches!(self, TxnReason::Commission | TxnReason::AffiliateCommission)
    }
}

/// External reference that makes a ledger entry idempotent.
///
/// The store enforces uniqueness on `(account, source, key)`: a second delta
/// carrying the same reference is a no-op.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TxnReference {
    pub source: String,
    pub key: String,
}

impl TxnReference {
    pub fn new(source: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            key: key.into(),
        }
    }

    /// Reference for a gateway-confirmed payment.
    pub fn gateway(gateway: Gateway, gateway_ref: impl Into<String>) -> Self {
        Self::new(gateway.as_str(), gateway_ref)
    }

    /// Reference whose key is built from several parts.
    ///
    /// Each part is written as `<byte length>:<part>`, so two different part
    /// lists never produce the same key even when parts contain `:`.
    pub fn composite<'a>(
        source: impl Into<String>,
        parts: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        let mut key = String::new();
        for part in parts {
            key.push_str(&part.len().to_string());
            key.push(':');
            key.push_str(part);
        }
        Self::new(source, key)
    }
}

impl fmt::Display for TxnReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source, self.key)
    }
}

/// A requested balance mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerDelta {
    pub account: Account,
    pub member_id: MemberId,
    pub delta_cents: i64,
    pub reason: TxnReason,
    pub reference: Option<TxnReference>,
}

impl LedgerDelta {
    pub fn credit(account: Account, member_id: MemberId, cents: i64, reason: TxnReason) -> Self {
        Self {
            account,
            member_id,
            delta_cents: cents,
            reason,
            reference: None,
        }
    }

    pub fn debit(account: Account, member_id: MemberId, cents: i64, reason: TxnReason) -> Self {
        Self::credit(account, member_id, -cents, reason)
    }

    pub fn with_reference(mut self, reference: TxnReference) -> Self {
        self.reference = Some(reference);
        self
    }
}

/// Immutable ledger log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerTxn {
    pub id: i64,
    pub member_id: MemberId,
    pub account: Account,
    pub delta_cents: i64,
    pub balance_after_cents: i64,
    pub reason: TxnReason,
    pub reference: Option<TxnReference>,
    pub created_at: DateTime<Utc>,
}

/// Cached balance of one account.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub balance_cents: i64,
    /// Total commission income ever credited. Only meaningful for network earnings.
    pub lifetime_cents: i64,
}

/// Result of applying a delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaOutcome {
    pub balance_cents: i64,
    /// False when the reference had already been applied.
    pub applied: bool,
}
