//! In-memory PayoutStore implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::MemoryStore;
use crate::model::{
    Account, LedgerDelta, MemberId, Payout, PayoutAccount, PayoutSettings, PayoutStatus,
    TxnReason,
};
use crate::storage::{PayoutStore, Result, StorageError};

fn invalid_transition(payout: &Payout, to: PayoutStatus) -> StorageError {
    StorageError::InvalidTransition {
        entity: "payout",
        id: payout.id.to_string(),
        from: payout.status.to_string(),
        to: to.to_string(),
    }
}

#[async_trait]
impl PayoutStore for MemoryStore {
    async fn payout_settings(&self, member: &MemberId) -> Result<Option<PayoutSettings>> {
        Ok(self
            .read(|state| state.payout_settings.get(member).cloned())
            .await)
    }

    async fn save_payout_settings(&self, settings: &PayoutSettings) -> Result<()> {
        self.transact(|state| {
            state
                .payout_settings
                .insert(settings.member_id.clone(), settings.clone());
            Ok(())
        })
        .await
    }

    async fn upsert_payout_account(&self, account: &PayoutAccount) -> Result<()> {
        self.transact(|state| {
            state.payout_accounts.insert(
                (account.member_id.clone(), account.provider),
                account.clone(),
            );
            Ok(())
        })
        .await
    }

    async fn payout_accounts(&self, member: &MemberId) -> Result<Vec<PayoutAccount>> {
        Ok(self
            .read(|state| {
                let mut accounts: Vec<PayoutAccount> = state
                    .payout_accounts
                    .values()
                    .filter(|a| &a.member_id == member)
                    .cloned()
                    .collect();
                accounts.sort_by_key(|a| a.provider.as_str());
                accounts
            })
            .await)
    }

    async fn begin_payout(&self, payout: &Payout) -> Result<i64> {
        self.transact(|state| {
            let already_pending = state
                .payouts
                .iter()
                .any(|p| p.member_id == payout.member_id && p.status == PayoutStatus::Pending);
            if already_pending {
                return Err(StorageError::AlreadyExists {
                    entity: "pending payout",
                    id: payout.member_id.to_string(),
                });
            }

            let debit = LedgerDelta::debit(
                Account::NetworkEarnings,
                payout.member_id.clone(),
                payout.amount_cents,
                TxnReason::Payout,
            )
            .with_reference(payout.debit_reference());
            let outcome = state.apply_delta(&debit, payout.created_at)?;

            state.payouts.push(Payout {
                status: PayoutStatus::Pending,
                ..payout.clone()
            });
            Ok(outcome.balance_cents)
        })
        .await
    }

    async fn complete_payout(
        &self,
        id: Uuid,
        provider_reference: &str,
        at: DateTime<Utc>,
    ) -> Result<Payout> {
        self.transact(|state| {
            let payout = state.payout_mut(id)?;
            if payout.status != PayoutStatus::Pending {
                return Err(invalid_transition(payout, PayoutStatus::Completed));
            }
            payout.status = PayoutStatus::Completed;
            payout.provider_reference = Some(provider_reference.to_string());
            payout.updated_at = at;
            Ok(payout.clone())
        })
        .await
    }

    async fn fail_payout(&self, id: Uuid, reason: &str, at: DateTime<Utc>) -> Result<Payout> {
        self.transact(|state| {
            let payout = state.payout_mut(id)?;
            if payout.status != PayoutStatus::Pending {
                return Err(invalid_transition(payout, PayoutStatus::Failed));
            }
            payout.status = PayoutStatus::Failed;
            payout.failure_reason = Some(reason.to_string());
            payout.updated_at = at;
            let failed = payout.clone();

            let reversal = LedgerDelta::credit(
                Account::NetworkEarnings,
                failed.member_id.clone(),
                failed.amount_cents,
                TxnReason::PayoutReversal,
            )
            .with_reference(failed.reversal_reference());
            state.apply_delta(&reversal, at)?;
            Ok(failed)
        })
        .await
    }

    async fn get_payout(&self, id: Uuid) -> Result<Option<Payout>> {
        Ok(self
            .read(|state| state.payouts.iter().find(|p| p.id == id).cloned())
            .await)
    }

    async fn payouts_for(&self, member: &MemberId) -> Result<Vec<Payout>> {
        Ok(self
            .read(|state| {
                state
                    .payouts
                    .iter()
                    .filter(|p| &p.member_id == member)
                    .cloned()
                    .collect()
            })
            .await)
    }

    async fn pending_payouts(&self) -> Result<Vec<Payout>> {
        Ok(self
            .read(|state| {
                state
                    .payouts
                    .iter()
                    .filter(|p| p.status == PayoutStatus::Pending)
                    .cloned()
                    .collect()
            })
            .await)
    }

    async fn auto_payout_members(&self) -> Result<Vec<PayoutSettings>> {
        Ok(self
            .read(|state| {
                let mut settings: Vec<PayoutSettings> = state
                    .payout_settings
                    .values()
                    .filter(|s| s.auto_payout)
                    .cloned()
                    .collect();
                settings.sort_by(|a, b| a.member_id.cmp(&b.member_id));
                settings
            })
            .await)
    }
}
