//! MemberStore trait definition.

use async_trait::async_trait;
use rust_decimal::Decimal;

use super::Result;
use crate::model::{
    AdminAction, Member, MemberId, MemberSnapshot, Subscription, SubscriptionKind,
    SubscriptionStatus,
};

/// Members, sponsorship links and subscriptions.
///
/// # Implementations
///
/// - `SqliteStore`: SQLite storage
/// - `MemoryStore`: in-process storage for tests and `storage.type: memory`
#[async_trait]
pub trait MemberStore: Send + Sync {
    /// Create a member. Fails with `AlreadyExists` if the id is taken.
    ///
    /// The sponsor is not validated here; registration rules live in the service.
    async fn register_member(&self, member: &Member) -> Result<()>;

    async fn member(&self, id: &MemberId) -> Result<Option<Member>>;

    /// Member plus current phase and activity.
    async fn member_snapshot(&self, id: &MemberId) -> Result<Option<MemberSnapshot>>;

    /// Every member id, in id order. Used by periodic sweeps.
    async fn member_ids(&self) -> Result<Vec<MemberId>>;

    /// Snapshots of every member whose sponsor is `sponsor`.
    async fn referral_snapshots(&self, sponsor: &MemberId) -> Result<Vec<MemberSnapshot>>;

    /// Rewrite a sponsor link without any validation.
    async fn set_sponsor(&self, id: &MemberId, sponsor: Option<&MemberId>) -> Result<()>;

    async fn set_deactivated(&self, id: &MemberId, deactivated: bool) -> Result<()>;

    async fn set_ecommerce_rate(&self, id: &MemberId, rate: Option<Decimal>) -> Result<()>;

    async fn subscription(
        &self,
        id: &MemberId,
        kind: SubscriptionKind,
    ) -> Result<Option<Subscription>>;

    async fn subscriptions(&self, id: &MemberId) -> Result<Vec<Subscription>>;

    /// Insert or replace the (member, kind) row.
    async fn upsert_subscription(&self, subscription: &Subscription) -> Result<()>;

    /// Change a subscription's status, returning the previous status.
    async fn set_subscription_status(
        &self,
        id: &MemberId,
        kind: SubscriptionKind,
        status: SubscriptionStatus,
    ) -> Result<SubscriptionStatus>;

    async fn record_admin_action(&self, action: &AdminAction) -> Result<()>;

    /// Audit rows for a member, oldest first.
    async fn admin_actions(&self, id: &MemberId) -> Result<Vec<AdminAction>>;
}
