//! Per-member phase state and granted rewards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{MemberId, TxnReference};

/// Highest phase a member can occupy.
pub const MAX_PHASE: u8 = 3;

/// Period key used for one-time rewards.
pub const ONE_TIME_PERIOD: &str = "once";

string_enum! {
    /// Whether a reward is paid once per phase or once per calendar month.
    pub enum RewardSchedule: "reward schedule" {
        OneTime => "one_time",
        Monthly => "monthly",
    }
}

/// Calendar-month bucket (`YYYY-MM`) for recurring rewards.
pub fn period_bucket(at: DateTime<Utc>) -> String {
    at.format("%Y-%m").to_string()
}

/// Phase progression state of one member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseRecord {
    pub member_id: MemberId,
    pub current_phase: u8,
    /// Never decreases.
    pub highest_phase: u8,
    /// Set by admin; freezes automatic evaluation.
    pub manual_override: bool,
    pub phase1_granted: bool,
    pub phase2_granted: bool,
    pub phase3_granted: bool,
    pub phase2_achieved_at: Option<DateTime<Utc>>,
}

impl PhaseRecord {
    pub fn new(member_id: MemberId) -> Self {
        Self {
            member_id,
            current_phase: 0,
            highest_phase: 0,
            manual_override: false,
            phase1_granted: false,
            phase2_granted: false,
            phase3_granted: false,
            phase2_achieved_at: None,
        }
    }

    /// Whether the one-time reward of `phase` has been paid. Phase 0 has none.
    pub fn is_granted(&self, phase: u8) -> bool {
        match phase {
            1 => self.phase1_granted,
            2 => self.phase2_granted,
            3 => self.phase3_granted,
            _ => true,
        }
    }

    /// Flags only move false -> true.
    pub(crate) fn mark_granted(&mut self, phase: u8) {
        match phase {
            1 => self.phase1_granted = true,
            2 => self.phase2_granted = true,
            3 => self.phase3_granted = true,
            _ => {}
        }
    }

    /// Applies a transition to `to`, keeping `highest_phase` monotonic.
    pub(crate) fn move_to(&mut self, to: u8, at: DateTime<Utc>) {
        self.current_phase = to;
        self.highest_phase = self.highest_phase.max(to);
        if to >= 2 && self.phase2_achieved_at.is_none() {
            self.phase2_achieved_at = Some(at);
        }
    }
}

/// A reward to grant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewardGrant {
    pub phase: u8,
    pub schedule: RewardSchedule,
    /// `ONE_TIME_PERIOD` or a `YYYY-MM` bucket.
    pub period: String,
    pub credit_cents: i64,
    pub free_product_cents: i64,
}

impl RewardGrant {
    /// Reference of the wallet credit, unique per (member, phase, period).
    pub fn ledger_reference(&self, member: &MemberId) -> TxnReference {
        let phase = self.phase.to_string();
        TxnReference::composite(
            "phase_reward",
            [member.as_str(), phase.as_str(), self.period.as_str()],
        )
    }
}

/// A granted reward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseReward {
    pub member_id: MemberId,
    pub phase: u8,
    pub schedule: RewardSchedule,
    pub period: String,
    pub credit_cents: i64,
    pub free_product_cents: i64,
    pub granted_at: DateTime<Utc>,
}

impl PhaseReward {
    pub fn from_grant(member_id: MemberId, grant: &RewardGrant, at: DateTime<Utc>) -> Self {
        Self {
            member_id,
            phase: grant.phase,
            schedule: grant.schedule,
            period: grant.period.clone(),
            credit_cents: grant.credit_cents,
            free_product_cents: grant.free_product_cents,
            granted_at: at,
        }
    }
}
