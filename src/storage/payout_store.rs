//! PayoutStore trait definition.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::Result;
use crate::model::{MemberId, Payout, PayoutAccount, PayoutSettings};

/// Payout accounts, settings and the payout state machine.
///
/// A payout moves `pending -> completed` or `pending -> failed`. Each move is a
/// compare-and-set on the status, and the failure move carries its
/// compensating credit in the same transaction.
#[async_trait]
pub trait PayoutStore: Send + Sync {
    async fn payout_settings(&self, member: &MemberId) -> Result<Option<PayoutSettings>>;

    async fn save_payout_settings(&self, settings: &PayoutSettings) -> Result<()>;

    /// Insert or replace the (member, provider) account.
    async fn upsert_payout_account(&self, account: &PayoutAccount) -> Result<()>;

    async fn payout_accounts(&self, member: &MemberId) -> Result<Vec<PayoutAccount>>;

    /// Debit network earnings and insert the `pending` row.
    ///
    /// Fails with `InsufficientFunds` or, when the member already has a pending
    /// payout, `AlreadyExists`. Returns the earnings balance after the debit.
    async fn begin_payout(&self, payout: &Payout) -> Result<i64>;

    /// `pending -> completed`.
    async fn complete_payout(
        &self,
        id: Uuid,
        provider_reference: &str,
        at: DateTime<Utc>,
    ) -> Result<Payout>;

    /// `pending -> failed` plus the compensating earnings credit.
    async fn fail_payout(&self, id: Uuid, reason: &str, at: DateTime<Utc>) -> Result<Payout>;

    async fn get_payout(&self, id: Uuid) -> Result<Option<Payout>>;

    /// A member's payouts, oldest first.
    async fn payouts_for(&self, member: &MemberId) -> Result<Vec<Payout>>;

    async fn pending_payouts(&self) -> Result<Vec<Payout>>;

    /// Settings rows with auto-payout enabled.
    async fn auto_payout_members(&self) -> Result<Vec<PayoutSettings>>;
}
