//! Payout accounts, settings and payout records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{MemberId, TxnReference};

string_enum! {
    pub enum PayoutProviderKind: "payout provider" {
        Stripe => "stripe",
        Paypal => "paypal",
        AuthorizeNet => "authorize_net",
        Payoneer => "payoneer",
    }
}

string_enum! {
    pub enum PayoutAccountStatus: "payout account status" {
        Pending => "pending",
        Active => "active",
        Restricted => "restricted",
        Disabled => "disabled",
    }
}

string_enum! {
    pub enum PayoutStatus: "payout status" {
        /// Earnings debited, provider confirmation outstanding.
        Pending => "pending",
        Completed => "completed",
        /// Provider failed; the debit has been reversed.
        Failed => "failed",
    }
}

/// A member's account at one payout provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutAccount {
    pub member_id: MemberId,
    pub provider: PayoutProviderKind,
    pub status: PayoutAccountStatus,
    pub provider_account_id: String,
}

/// Per-member auto-payout preferences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutSettings {
    pub member_id: MemberId,
    pub auto_payout: bool,
    /// Clamped to the platform minimum when used.
    pub threshold_cents: Option<i64>,
    pub preferred_provider: Option<PayoutProviderKind>,
}

/// One transfer of network earnings to an external provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payout {
    pub id: Uuid,
    pub member_id: MemberId,
    pub provider: PayoutProviderKind,
    pub provider_account_id: String,
    pub amount_cents: i64,
    pub status: PayoutStatus,
    pub provider_reference: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payout {
    /// Reference of the earnings debit.
    pub fn debit_reference(&self) -> TxnReference {
        Self::debit_reference_for(self.id)
    }

    /// Reference of the compensating credit.
    pub fn reversal_reference(&self) -> TxnReference {
        TxnReference::new("payout_reversal", self.id.to_string())
    }

    pub fn debit_reference_for(id: Uuid) -> TxnReference {
        TxnReference::new("payout", id.to_string())
    }
}
