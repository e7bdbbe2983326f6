//! In-memory SettlementStore implementation.

use async_trait::async_trait;

use super::MemoryStore;
use crate::model::{
    CommissionEvent, MemberId, ProcessedPayment, Subscription, SubscriptionStatus, TxnReference,
};
use crate::storage::{
    AppliedSettlement, CommitOutcome, RenewalOutcome, Result, SettlementBatch, SettlementStore,
    StorageError,
};

#[async_trait]
impl SettlementStore for MemoryStore {
    async fn is_processed(&self, origin: &TxnReference) -> Result<bool> {
        Ok(self.read(|state| state.processed.contains_key(origin)).await)
    }

    async fn processed_payment(&self, origin: &TxnReference) -> Result<Option<ProcessedPayment>> {
        Ok(self.read(|state| state.processed.get(origin).cloned()).await)
    }

    async fn commit_settlement(&self, batch: &SettlementBatch) -> Result<CommitOutcome> {
        let fail_after_claim = *self.fail_settlement_after_claim.read().await;
        let payment = &batch.payment;
        let at = payment.processed_at;

        self.transact(|state| {
            if state.processed.contains_key(&payment.origin) {
                return Ok(CommitOutcome::AlreadyProcessed);
            }
            state
                .processed
                .insert(payment.origin.clone(), payment.clone());

            let mut credited = Vec::new();
            let mut skipped_duplicates = 0;
            for event in &batch.commissions {
                if state.credit_commission(event, at)? {
                    credited.push(event.clone());
                } else {
                    skipped_duplicates += 1;
                }
            }

            if fail_after_claim {
                return Err(StorageError::Injected("settlement after claim"));
            }

            let renewal = match &batch.subscription {
                Some(renewal) => {
                    let buyer = &payment.buyer_id;
                    if !state.members.contains_key(buyer) {
                        return Err(StorageError::not_found("member", buyer));
                    }
                    let key = (buyer.clone(), renewal.kind);
                    let existing = state.subscriptions.get(&key).cloned();
                    let period_end = renewal
                        .next_period_end(existing.as_ref().and_then(|s| s.current_period_end), at);
                    state.subscriptions.insert(
                        key,
                        Subscription {
                            member_id: buyer.clone(),
                            kind: renewal.kind,
                            status: SubscriptionStatus::Active,
                            current_period_end: Some(period_end),
                            gateway: Some(renewal.gateway),
                            plan: renewal
                                .plan
                                .clone()
                                .or_else(|| existing.as_ref().and_then(|s| s.plan.clone())),
                            cancel_at_period_end: existing
                                .as_ref()
                                .is_some_and(|s| s.cancel_at_period_end),
                        },
                    );

                    let mut canceled_other = false;
                    if let Some(other) = state
                        .subscriptions
                        .get_mut(&(buyer.clone(), renewal.kind.other()))
                    {
                        if other.status.is_active() {
                            other.status = SubscriptionStatus::Canceled;
                            canceled_other = true;
                        }
                    }

                    Some(RenewalOutcome {
                        previous_status: existing.map(|s| s.status),
                        period_end,
                        canceled_other,
                    })
                }
                None => None,
            };

            let wallet_balance_cents = match &batch.wallet_credit {
                Some(delta) => Some(state.apply_delta(delta, at)?.balance_cents),
                None => None,
            };

            Ok(CommitOutcome::Applied(AppliedSettlement {
                credited,
                skipped_duplicates,
                renewal,
                wallet_balance_cents,
            }))
        })
        .await
    }

    async fn commission_events(&self, origin: &TxnReference) -> Result<Vec<CommissionEvent>> {
        Ok(self
            .read(|state| {
                state
                    .commissions
                    .iter()
                    .filter(|e| &e.origin == origin)
                    .cloned()
                    .collect()
            })
            .await)
    }

    async fn commissions_for_recipient(
        &self,
        recipient: &MemberId,
    ) -> Result<Vec<CommissionEvent>> {
        Ok(self
            .read(|state| {
                state
                    .commissions
                    .iter()
                    .filter(|e| &e.recipient_id == recipient)
                    .cloned()
                    .collect()
            })
            .await)
    }

    async fn record_missing_commissions(
        &self,
        events: &[CommissionEvent],
    ) -> Result<Vec<CommissionEvent>> {
        let now = chrono::Utc::now();
        self.transact(|state| {
            let mut applied = Vec::new();
            for event in events {
                if state.credit_commission(event, now)? {
                    applied.push(event.clone());
                }
            }
            Ok(applied)
        })
        .await
    }
}
