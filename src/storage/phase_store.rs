//! PhaseStore trait definition.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::Result;
use crate::model::{MemberId, PhaseRecord, PhaseReward, RewardGrant};

/// Per-member phase state and granted rewards.
#[async_trait]
pub trait PhaseStore: Send + Sync {
    /// `None` when the member has never been evaluated.
    async fn phase_record(&self, member: &MemberId) -> Result<Option<PhaseRecord>>;

    /// Compare-and-set `from -> to`.
    ///
    /// Returns false without writing when the current phase is not `from` or
    /// the manual override is set. A missing record counts as phase 0.
    async fn try_transition(
        &self,
        member: &MemberId,
        from: u8,
        to: u8,
        at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Grant a one-time reward: flip `phaseN_granted` false -> true, record the
    /// reward and credit the wallet, all or nothing. Returns false when the
    /// flag was already set.
    async fn grant_one_time_reward(
        &self,
        member: &MemberId,
        grant: &RewardGrant,
        at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Grant a reward once per (member, phase, period). Returns false when
    /// that period was already granted.
    async fn grant_periodic_reward(
        &self,
        member: &MemberId,
        grant: &RewardGrant,
        at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Force the phase and set the manual override. Returns the previous phase.
    async fn set_manual_phase(&self, member: &MemberId, phase: u8, at: DateTime<Utc>)
        -> Result<u8>;

    /// Clear the manual override. Returns whether it was set.
    async fn clear_phase_override(&self, member: &MemberId) -> Result<bool>;

    /// Granted rewards, oldest first.
    async fn rewards_for(&self, member: &MemberId) -> Result<Vec<PhaseReward>>;
}
