//! In-process store.
//!
//! All state lives behind one `RwLock`. Mutations run against a staged clone
//! of the state which replaces the live state only when the whole operation
//! succeeds, so a failing operation leaves no partial writes behind.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{Result, StorageError};
use crate::model::{
    Account, AdminAction, Balance, CommissionEvent, CommissionKey, DeltaOutcome, LedgerDelta,
    LedgerTxn, Member, MemberId, MemberSnapshot, Payout, PayoutAccount, PayoutProviderKind,
    PayoutSettings, PhaseRecord, PhaseReward, ProcessedPayment, Subscription, SubscriptionKind,
    TxnReference,
};

mod ledger_store;
mod member_store;
mod payout_store;
mod phase_store;
mod settlement_store;

#[derive(Debug, Clone, Default)]
struct MemoryState {
    members: HashMap<MemberId, Member>,
    subscriptions: HashMap<(MemberId, SubscriptionKind), Subscription>,
    admin_actions: Vec<AdminAction>,
    accounts: HashMap<(MemberId, Account), Balance>,
    txns: Vec<LedgerTxn>,
    txn_refs: HashSet<(Account, TxnReference)>,
    processed: HashMap<TxnReference, ProcessedPayment>,
    commissions: Vec<CommissionEvent>,
    commission_keys: HashSet<CommissionKey>,
    phases: HashMap<MemberId, PhaseRecord>,
    rewards: Vec<PhaseReward>,
    payout_accounts: HashMap<(MemberId, PayoutProviderKind), PayoutAccount>,
    payout_settings: HashMap<MemberId, PayoutSettings>,
    payouts: Vec<Payout>,
}

impl MemoryState {
    fn is_active(&self, member: &Member) -> bool {
        !member.deactivated
            && self
                .subscriptions
                .values()
                .any(|s| s.member_id == member.id && s.status.is_active())
    }

    fn snapshot(&self, id: &MemberId) -> Option<MemberSnapshot> {
        let member = self.members.get(id)?;
        Some(MemberSnapshot {
            member: member.clone(),
            phase: self.phases.get(id).map_or(0, |r| r.current_phase),
            active: self.is_active(member),
        })
    }

    fn member_mut(&mut self, id: &MemberId) -> Result<&mut Member> {
        self.members
            .get_mut(id)
            .ok_or_else(|| StorageError::not_found("member", id))
    }

    fn balance(&self, member: &MemberId, account: Account) -> Balance {
        self.accounts
            .get(&(member.clone(), account))
            .copied()
            .unwrap_or_default()
    }

    fn apply_delta(&mut self, delta: &LedgerDelta, at: DateTime<Utc>) -> Result<DeltaOutcome> {
        let key = (delta.member_id.clone(), delta.account);
        let current = self.accounts.get(&key).copied().unwrap_or_default();

        if let Some(reference) = &delta.reference {
            if self.txn_refs.contains(&(delta.account, reference.clone())) {
                return Ok(DeltaOutcome {
                    balance_cents: current.balance_cents,
                    applied: false,
                });
            }
        }

        let balance_after = current.balance_cents + delta.delta_cents;
        if balance_after < 0 {
            return Err(StorageError::InsufficientFunds {
                account: delta.account,
                member: delta.member_id.clone(),
                available: current.balance_cents,
                requested: -delta.delta_cents,
            });
        }

        let lifetime_gain = if delta.delta_cents > 0 && delta.reason.counts_toward_lifetime() {
            delta.delta_cents
        } else {
            0
        };
        self.accounts.insert(
            key,
            Balance {
                balance_cents: balance_after,
                lifetime_cents: current.lifetime_cents + lifetime_gain,
            },
        );

        if let Some(reference) = &delta.reference {
            self.txn_refs.insert((delta.account, reference.clone()));
        }
        self.txns.push(LedgerTxn {
            id: self.txns.len() as i64 + 1,
            member_id: delta.member_id.clone(),
            account: delta.account,
            delta_cents: delta.delta_cents,
            balance_after_cents: balance_after,
            reason: delta.reason,
            reference: delta.reference.clone(),
            created_at: at,
        });

        Ok(DeltaOutcome {
            balance_cents: balance_after,
            applied: true,
        })
    }

    /// Record a commission event and credit its recipient, unless the key exists.
    fn credit_commission(&mut self, event: &CommissionEvent, at: DateTime<Utc>) -> Result<bool> {
        if !self.commission_keys.insert(event.key()) {
            return Ok(false);
        }
        self.commissions.push(event.clone());
        let delta = LedgerDelta::credit(
            Account::NetworkEarnings,
            event.recipient_id.clone(),
            event.amount_cents,
            event.reason(),
        )
        .with_reference(event.ledger_reference());
        if !self.apply_delta(&delta, at)?.applied {
            return Err(StorageError::ReferenceConflict(event.ledger_reference()));
        }
        Ok(true)
    }

    fn payout_mut(&mut self, id: Uuid) -> Result<&mut Payout> {
        self.payouts
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| StorageError::not_found("payout", id))
    }
}

/// Store keeping everything in process memory.
///
/// Backs unit tests and `storage.type: memory`. Fault injection hooks let
/// tests fail an operation midway and observe that nothing was applied.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
    fail_settlement_after_claim: RwLock<bool>,
    fail_reward_grants: RwLock<bool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn read<T>(&self, f: impl FnOnce(&MemoryState) -> T) -> T {
        let state = self.state.read().await;
        f(&state)
    }

    /// Run `f` against a staged copy and publish it only on success.
    async fn transact<T>(&self, f: impl FnOnce(&mut MemoryState) -> Result<T>) -> Result<T> {
        let mut state = self.state.write().await;
        let mut staged = state.clone();
        let value = f(&mut staged)?;
        *state = staged;
        Ok(value)
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl MemoryStore {
    /// Make `commit_settlement` fail after the claim and commission credits
    /// have been staged.
    pub async fn set_fail_settlement_after_claim(&self, fail: bool) {
        *self.fail_settlement_after_claim.write().await = fail;
    }

    /// Make reward grants fail.
    pub async fn set_fail_reward_grants(&self, fail: bool) {
        *self.fail_reward_grants.write().await = fail;
    }
}
