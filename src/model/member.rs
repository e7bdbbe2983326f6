//! Members, sponsorship and subscriptions.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Opaque member identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemberId(String);

impl MemberId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MemberId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for MemberId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A participant account.
///
/// The sponsor is fixed at registration; only the admin interface rewrites it.
/// Members are never deleted while financial history exists, only deactivated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: MemberId,
    pub sponsor_id: Option<MemberId>,
    pub deactivated: bool,
    /// Overrides the phase-level rate for e-commerce commissions.
    pub ecommerce_rate_override: Option<Decimal>,
    pub created_at: DateTime<Utc>,
}

/// A member joined with the state the commission and phase logic reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberSnapshot {
    pub member: Member,
    /// Current phase (0 when no phase record exists yet).
    pub phase: u8,
    /// Not deactivated and holding at least one `active` subscription.
    pub active: bool,
}

string_enum! {
    /// Subscription product line. A member holds at most one active line at a time.
    pub enum SubscriptionKind: "subscription kind" {
        Mlm => "mlm",
        Affiliate => "affiliate",
    }
}

impl SubscriptionKind {
    /// The mutually exclusive counterpart.
    pub fn other(&self) -> SubscriptionKind {
        match self {
            SubscriptionKind::Mlm => SubscriptionKind::Affiliate,
            SubscriptionKind::Affiliate => SubscriptionKind::Mlm,
        }
    }
}

string_enum! {
    pub enum SubscriptionStatus: "subscription status" {
        Active => "active",
        PastDue => "past_due",
        Canceled => "canceled",
        Unpaid => "unpaid",
    }
}

impl SubscriptionStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, SubscriptionStatus::Active)
    }
}

/// Billing record, unique per (member, kind).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub member_id: MemberId,
    pub kind: SubscriptionKind,
    pub status: SubscriptionStatus,
    pub current_period_end: Option<DateTime<Utc>>,
    pub gateway: Option<super::Gateway>,
    pub plan: Option<String>,
    pub cancel_at_period_end: bool,
}

/// Audit row written for every admin override.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminAction {
    pub actor: String,
    pub action: String,
    pub member_id: MemberId,
    pub detail: String,
    pub created_at: DateTime<Utc>,
}
