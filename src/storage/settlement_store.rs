//! SettlementStore trait definition.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use super::Result;
use crate::model::{
    CommissionEvent, Gateway, LedgerDelta, MemberId, ProcessedPayment, SubscriptionKind,
    SubscriptionStatus, TxnReference,
};

/// Subscription extension carried by a subscription payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionRenewal {
    pub kind: SubscriptionKind,
    pub plan: Option<String>,
    pub gateway: Gateway,
    /// Period end reported by the gateway.
    pub period_end: Option<DateTime<Utc>>,
    /// Extension applied when the gateway reports no period end.
    pub default_period_days: i64,
}

impl SubscriptionRenewal {
    /// New period end given the existing one.
    ///
    /// An explicit gateway period end wins. Otherwise the period is extended
    /// from the later of the existing end and `now`.
    pub fn next_period_end(
        &self,
        existing: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> DateTime<Utc> {
        if let Some(end) = self.period_end {
            return end;
        }
        let base = existing.map_or(now, |end| end.max(now));
        base + Duration::days(self.default_period_days)
    }
}

/// Everything one confirmed payment writes, applied in one transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementBatch {
    /// The idempotency claim.
    pub payment: ProcessedPayment,
    pub commissions: Vec<CommissionEvent>,
    pub subscription: Option<SubscriptionRenewal>,
    pub wallet_credit: Option<LedgerDelta>,
}

/// Effect of a renewal on the subscription rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenewalOutcome {
    pub previous_status: Option<SubscriptionStatus>,
    pub period_end: DateTime<Utc>,
    /// The member's other subscription kind was active and has been canceled.
    pub canceled_other: bool,
}

/// What a committed settlement changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedSettlement {
    /// Commission events newly recorded and credited.
    pub credited: Vec<CommissionEvent>,
    /// Events whose key already existed and were skipped.
    pub skipped_duplicates: usize,
    pub renewal: Option<RenewalOutcome>,
    pub wallet_balance_cents: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The payment claim already existed; nothing was written.
    AlreadyProcessed,
    Applied(AppliedSettlement),
}

/// Payment claims and commission events.
#[async_trait]
pub trait SettlementStore: Send + Sync {
    /// Whether a claim exists for this gateway reference.
    async fn is_processed(&self, origin: &TxnReference) -> Result<bool>;

    async fn processed_payment(&self, origin: &TxnReference) -> Result<Option<ProcessedPayment>>;

    /// Apply a settlement atomically.
    ///
    /// Inserts the claim first; a conflicting claim yields `AlreadyProcessed`
    /// with no writes. Any later failure rolls back the claim with everything
    /// else, so the payment can be retried.
    async fn commit_settlement(&self, batch: &SettlementBatch) -> Result<CommitOutcome>;

    /// Events recorded for one originating payment.
    async fn commission_events(&self, origin: &TxnReference) -> Result<Vec<CommissionEvent>>;

    async fn commissions_for_recipient(&self, recipient: &MemberId)
        -> Result<Vec<CommissionEvent>>;

    /// Record and credit only the events whose key is not yet present.
    ///
    /// Returns the events newly applied.
    async fn record_missing_commissions(
        &self,
        events: &[CommissionEvent],
    ) -> Result<Vec<CommissionEvent>>;
}
