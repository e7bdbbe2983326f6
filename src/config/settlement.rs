//! Settlement orchestration configuration.

use serde::Deserialize;

/// Settlement settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SettlementConfig {
    /// Days a subscription period is extended when the gateway sends no period end.
    pub default_period_days: i64,
    /// Re-evaluate the upline's phases when a buyer's activity changes.
    pub reevaluate_phases: bool,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            default_period_days: 30,
            reevaluate_phases: true,
        }
    }
}
