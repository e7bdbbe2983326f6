//! In-memory PhaseStore implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{MemoryState, MemoryStore};
use crate::model::{
    Account, LedgerDelta, MemberId, PhaseRecord, PhaseReward, RewardGrant, TxnReason,
};
use crate::storage::{PhaseStore, Result, StorageError};

/// Record the reward and credit its cash part. False when the period was already granted.
fn record_reward(
    state: &mut MemoryState,
    member: &MemberId,
    grant: &RewardGrant,
    at: DateTime<Utc>,
) -> Result<bool> {
    let duplicate = state
        .rewards
        .iter()
        .any(|r| &r.member_id == member && r.phase == grant.phase && r.period == grant.period);
    if duplicate {
        return Ok(false);
    }
    state
        .rewards
        .push(PhaseReward::from_grant(member.clone(), grant, at));

    if grant.credit_cents > 0 {
        let delta = LedgerDelta::credit(
            Account::Wallet,
            member.clone(),
            grant.credit_cents,
            TxnReason::PhaseReward,
        )
        .with_reference(grant.ledger_reference(member));
        if !state.apply_delta(&delta, at)?.applied {
            return Err(StorageError::ReferenceConflict(grant.ledger_reference(member)));
        }
    }
    Ok(true)
}

#[async_trait]
impl PhaseStore for MemoryStore {
    async fn phase_record(&self, member: &MemberId) -> Result<Option<PhaseRecord>> {
        Ok(self.read(|state| state.phases.get(member).cloned()).await)
    }

    async fn try_transition(
        &self,
        member: &MemberId,
        from: u8,
        to: u8,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        self.transact(|state| {
            if !state.members.contains_key(member) {
                return Err(StorageError::not_found("member", member));
            }
            let record = state
                .phases
                .entry(member.clone())
                .or_insert_with(|| PhaseRecord::new(member.clone()));
            if record.manual_override || record.current_phase != from {
                return Ok(false);
            }
            record.move_to(to, at);
            Ok(true)
        })
        .await
    }

    async fn grant_one_time_reward(
        &self,
        member: &MemberId,
        grant: &RewardGrant,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        if *self.fail_reward_grants.read().await {
            return Err(StorageError::Injected("reward grant"));
        }
        self.transact(|state| {
            let record = state
                .phases
                .get_mut(member)
                .ok_or_else(|| StorageError::not_found("phase record", member))?;
            if record.is_granted(grant.phase) {
                return Ok(false);
            }
            record.mark_granted(grant.phase);
            record_reward(state, member, grant, at)?;
            Ok(true)
        })
        .await
    }

    async fn grant_periodic_reward(
        &self,
        member: &MemberId,
        grant: &RewardGrant,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        if *self.fail_reward_grants.read().await {
            return Err(StorageError::Injected("reward grant"));
        }
        self.transact(|state| record_reward(state, member, grant, at))
            .await
    }

    async fn set_manual_phase(
        &self,
        member: &MemberId,
        phase: u8,
        at: DateTime<Utc>,
    ) -> Result<u8> {
        self.transact(|state| {
            if !state.members.contains_key(member) {
                return Err(StorageError::not_found("member", member));
            }
            let record = state
                .phases
                .entry(member.clone())
                .or_insert_with(|| PhaseRecord::new(member.clone()));
            let previous = record.current_phase;
            record.move_to(phase, at);
            record.manual_override = true;
            Ok(previous)
        })
        .await
    }

    async fn clear_phase_override(&self, member: &MemberId) -> Result<bool> {
        self.transact(|state| match state.phases.get_mut(member) {
            Some(record) => {
                let was_set = record.manual_override;
                record.manual_override = false;
                Ok(was_set)
            }
            None => Ok(false),
        })
        .await
    }

    async fn rewards_for(&self, member: &MemberId) -> Result<Vec<PhaseReward>> {
        Ok(self
            .read(|state| {
                state
                    .rewards
                    .iter()
                    .filter(|r| &r.member_id == member)
                    .cloned()
                    .collect()
            })
            .await)
    }
}
