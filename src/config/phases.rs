//! Phase-level configuration.
//!
//! A `PhaseConfig` is an immutable, versioned snapshot. Services receive it as
//! `Arc<PhaseConfig>` and never read rates from ambient state, so a settlement
//! run always sees one consistent set of levels.

use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

use crate::model::{RewardSchedule, MAX_PHASE};

/// Phase configuration is structurally invalid.
#[derive(Debug, Error)]
pub enum PhaseConfigError {
    #[error("Phase {0} is configured more than once")]
    DuplicatePhase(u8),

    #[error("Phase {phase} exceeds the maximum phase {max}")]
    PhaseOutOfRange { phase: u8, max: u8 },
}

/// Configuration of one phase.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PhaseLevel {
    pub phase: u8,
    /// Cut of subscription payments earned by a member at this phase.
    pub commission_rate: Decimal,
    /// Cut of e-commerce purchases. Falls back to `commission_rate`.
    pub ecommerce_rate: Option<Decimal>,
    /// Cut earned when one of this member's affiliates sells through a storefront.
    pub affiliate_sponsor_rate: Decimal,
    /// Discount on the member's own subscription price.
    pub subscription_discount_rate: Decimal,
    pub one_time_credit_cents: i64,
    pub credit_schedule: RewardSchedule,
    pub free_product_cents: i64,
    pub free_product_schedule: RewardSchedule,
    /// Active direct referrals needed to hold this phase.
    pub required_direct: u32,
    /// Active referrals within `team_depth` levels needed to hold this phase.
    pub required_team: u32,
}

impl Default for PhaseLevel {
    fn default() -> Self {
        Self {
            phase: 0,
            commission_rate: Decimal::ZERO,
            ecommerce_rate: None,
            affiliate_sponsor_rate: Decimal::ZERO,
            subscription_discount_rate: Decimal::ZERO,
            one_time_credit_cents: 0,
            credit_schedule: RewardSchedule::OneTime,
            free_product_cents: 0,
            free_product_schedule: RewardSchedule::Monthly,
            required_direct: 0,
            required_team: 0,
        }
    }
}

impl PhaseLevel {
    /// Credit and product value paid under `schedule`.
    pub fn reward_amounts(&self, schedule: RewardSchedule) -> (i64, i64) {
        let credit = if self.credit_schedule == schedule {
            self.one_time_credit_cents.max(0)
        } else {
            0
        };
        let product = if self.free_product_schedule == schedule {
            self.free_product_cents.max(0)
        } else {
            0
        };
        (credit, product)
    }
}

/// Phase progression and commission configuration snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PhaseConfig {
    /// Logged with every settlement for traceability.
    pub version: u32,
    /// Upline levels paid per payment.
    pub commission_levels: u8,
    /// Levels counted as the member's team for thresholds.
    pub team_depth: u8,
    /// Allow a member to drop one phase when the team shrinks.
    pub allow_demotion: bool,
    pub levels: Vec<PhaseLevel>,
}

impl Default for PhaseConfig {
    fn default() -> Self {
        Self {
            version: 1,
            commission_levels: 2,
            team_depth: 2,
            allow_demotion: false,
            levels: vec![
                PhaseLevel {
                    phase: 0,
                    commission_rate: Decimal::new(10, 2),
                    affiliate_sponsor_rate: Decimal::new(5, 2),
                    ..Default::default()
                },
                PhaseLevel {
                    phase: 1,
                    commission_rate: Decimal::new(15, 2),
                    affiliate_sponsor_rate: Decimal::new(5, 2),
                    subscription_discount_rate: Decimal::new(10, 2),
                    one_time_credit_cents: 2_500,
                    required_direct: 3,
                    required_team: 3,
                    ..Default::default()
                },
                PhaseLevel {
                    phase: 2,
                    commission_rate: Decimal::new(30, 2),
                    affiliate_sponsor_rate: Decimal::new(10, 2),
                    subscription_discount_rate: Decimal::new(20, 2),
                    one_time_credit_cents: 5_000,
                    free_product_cents: 3_000,
                    required_direct: 3,
                    required_team: 9,
                    ..Default::default()
                },
                PhaseLevel {
                    phase: 3,
                    commission_rate: Decimal::new(40, 2),
                    affiliate_sponsor_rate: Decimal::new(15, 2),
                    subscription_discount_rate: Decimal::new(30, 2),
                    one_time_credit_cents: 10_000,
                    free_product_cents: 5_000,
                    required_direct: 5,
                    required_team: 25,
                    ..Default::default()
                },
            ],
        }
    }
}

impl PhaseConfig {
    /// Reject duplicate or out-of-range phases. Rates are admin-curated and not checked.
    pub fn validate(&self) -> Result<(), PhaseConfigError> {
        let mut seen = [false; MAX_PHASE as usize + 1];
        for level in &self.levels {
            if level.phase > MAX_PHASE {
                return Err(PhaseConfigError::PhaseOutOfRange {
                    phase: level.phase,
                    max: MAX_PHASE,
                });
            }
            if seen[level.phase as usize] {
                return Err(PhaseConfigError::DuplicatePhase(level.phase));
            }
            seen[level.phase as usize] = true;
        }
        Ok(())
    }

    /// Configured level of `phase`, if any.
    pub fn level(&self, phase: u8) -> Option<&PhaseLevel> {
        self.levels.iter().find(|l| l.phase == phase)
    }

    /// Level lookup that logs a configuration defect when the row is missing.
    pub fn level_or_warn(&self, phase: u8) -> Option<&PhaseLevel> {
        let level = self.level(phase);
        if level.is_none() {
            warn!(
                phase,
                config_version = self.version,
                "No phase level configured; treating as zero"
            );
        }
        level
    }

    /// Highest configured phase.
    pub fn max_phase(&self) -> u8 {
        self.levels
            .iter()
            .map(|l| l.phase)
            .max()
            .unwrap_or(0)
            .min(MAX_PHASE)
    }

    /// Subscription price after the phase discount. The discount is floored.
    pub fn discounted_price_cents(&self, phase: u8, base_cents: i64) -> i64 {
        let Some(level) = self.level(phase) else {
            return base_cents;
        };
        let rate = level
            .subscription_discount_rate
            .clamp(Decimal::ZERO, Decimal::ONE);
        let discount = crate::commission::floor_share(base_cents, rate);
        base_cents - discount
    }
}
