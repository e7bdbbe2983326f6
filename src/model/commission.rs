//! Commission events.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{MemberId, TxnReason, TxnReference};

string_enum! {
    pub enum CommissionKind: "commission kind" {
        /// Level-N payout up the buyer's sponsor chain.
        Upline => "upline",
        /// Single-level payout to a storefront affiliate's own sponsor.
        AffiliateSponsor => "affiliate_sponsor",
    }
}

/// One commission credit tied to one originating payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommissionEvent {
    /// Gateway reference of the originating payment.
    pub origin: TxnReference,
    pub payer_id: MemberId,
    pub recipient_id: MemberId,
    pub kind: CommissionKind,
    /// 1 = direct sponsor.
    pub level: u8,
    pub amount_cents: i64,
    pub rate: Decimal,
}

/// Natural uniqueness key of a commission event.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CommissionKey {
    pub origin: TxnReference,
    pub recipient_id: MemberId,
    pub kind: CommissionKind,
    pub level: u8,
}

impl CommissionEvent {
    pub fn key(&self) -> CommissionKey {
        CommissionKey {
            origin: self.origin.clone(),
            recipient_id: self.recipient_id.clone(),
            kind: self.kind,
            level: self.level,
        }
    }

    /// Reference used for the network-earnings credit, derived from the key.
    pub fn ledger_reference(&self) -> TxnReference {
        let level = self.level.to_string();
        TxnReference::composite(
            "commission",
            [
                self.origin.source.as_str(),
                self.origin.key.as_str(),
                self.recipient_id.as_str(),
                self.kind.as_str(),
                level.as_str(),
            ],
        )
    }

    pub fn reason(&self) -> TxnReason {
        match self.kind {
            CommissionKind::Upline => TxnReason::Commission,
            CommissionKind::AffiliateSponsor => TxnReason::AffiliateCommission,
        }
    }
}
