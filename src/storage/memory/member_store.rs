//! In-memory MemberStore implementation.

use async_trait::async_trait;
use rust_decimal::Decimal;

use super::MemoryStore;
use crate::model::{
    AdminAction, Member, MemberId, MemberSnapshot, Subscription, SubscriptionKind,
    SubscriptionStatus,
};
use crate::storage::{MemberStore, Result, StorageError};

#[async_trait]
impl MemberStore for MemoryStore {
    async fn register_member(&self, member: &Member) -> Result<()> {
        self.transact(|state| {
            if state.members.contains_key(&member.id) {
                return Err(StorageError::AlreadyExists {
                    entity: "member",
                    id: member.id.to_string(),
                });
            }
            state.members.insert(member.id.clone(), member.clone());
            Ok(())
        })
        .await
    }

    async fn member(&self, id: &MemberId) -> Result<Option<Member>> {
        Ok(self.read(|state| state.members.get(id).cloned()).await)
    }

    async fn member_snapshot(&self, id: &MemberId) -> Result<Option<MemberSnapshot>> {
        Ok(self.read(|state| state.snapshot(id)).await)
    }

    async fn member_ids(&self) -> Result<Vec<MemberId>> {
        Ok(self
            .read(|state| {
                let mut ids: Vec<MemberId> = state.members.keys().cloned().collect();
                ids.sort();
                ids
            })
            .await)
    }

    async fn referral_snapshots(&self, sponsor: &MemberId) -> Result<Vec<MemberSnapshot>> {
        Ok(self
            .read(|state| {
                let mut referrals: Vec<MemberSnapshot> = state
                    .members
                    .values()
                    .filter(|m| m.sponsor_id.as_ref() == Some(sponsor))
                    .filter_map(|m| state.snapshot(&m.id))
                    .collect();
                referrals.sort_by(|a, b| a.member.id.cmp(&b.member.id));
                referrals
            })
            .await)
    }

    async fn set_sponsor(&self, id: &MemberId, sponsor: Option<&MemberId>) -> Result<()> {
        self.transact(|state| {
            state.member_mut(id)?.sponsor_id = sponsor.cloned();
            Ok(())
        })
        .await
    }

    async fn set_deactivated(&self, id: &MemberId, deactivated: bool) -> Result<()> {
        self.transact(|state| {
            state.member_mut(id)?.deactivated = deactivated;
            Ok(())
        })
        .await
    }

    async fn set_ecommerce_rate(&self, id: &MemberId, rate: Option<Decimal>) -> Result<()> {
        self.transact(|state| {
            state.member_mut(id)?.ecommerce_rate_override = rate;
            Ok(())
        })
        .await
    }

    async fn subscription(
        &self,
        id: &MemberId,
        kind: SubscriptionKind,
    ) -> Result<Option<Subscription>> {
        Ok(self
            .read(|state| state.subscriptions.get(&(id.clone(), kind)).cloned())
            .await)
    }

    async fn subscriptions(&self, id: &MemberId) -> Result<Vec<Subscription>> {
        Ok(self
            .read(|state| {
                SubscriptionKind::ALL
                    .iter()
                    .filter_map(|kind| state.subscriptions.get(&(id.clone(), *kind)).cloned())
                    .collect()
            })
            .await)
    }

    async fn upsert_subscription(&self, subscription: &Subscription) -> Result<()> {
        self.transact(|state| {
            if !state.members.contains_key(&subscription.member_id) {
                return Err(StorageError::not_found("member", &subscription.member_id));
            }
            state.subscriptions.insert(
                (subscription.member_id.clone(), subscription.kind),
                subscription.clone(),
            );
            Ok(())
        })
        .await
    }

    async fn set_subscription_status(
        &self,
        id: &MemberId,
        kind: SubscriptionKind,
        status: SubscriptionStatus,
    ) -> Result<SubscriptionStatus> {
        self.transact(|state| {
            let subscription = state
                .subscriptions
                .get_mut(&(id.clone(), kind))
                .ok_or_else(|| StorageError::not_found("subscription", format!("{id}/{kind}")))?;
            let previous = subscription.status;
            subscription.status = status;
            Ok(previous)
        })
        .await
    }

    async fn record_admin_action(&self, action: &AdminAction) -> Result<()> {
        self.transact(|state| {
            state.admin_actions.push(action.clone());
            Ok(())
        })
        .await
    }

    async fn admin_actions(&self, id: &MemberId) -> Result<Vec<AdminAction>> {
        Ok(self
            .read(|state| {
                state
                    .admin_actions
                    .iter()
                    .filter(|a| &a.member_id == id)
                    .cloned()
                    .collect()
            })
            .await)
    }
}
