//! Payout configuration.

use std::time::Duration;

use serde::Deserialize;

/// Payout thresholds and provider settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PayoutConfig {
    /// Platform-wide floor. No payout, automatic or manual, goes below this.
    pub platform_minimum_cents: i64,
    /// Auto-payout threshold for members that have not set one.
    pub default_threshold_cents: i64,
    /// Upper bound on one provider call, retries included.
    pub provider_timeout_secs: u64,
    /// HTTP payout gateway (optional; required by the sweep binary).
    pub http: Option<HttpPayoutConfig>,
}

impl Default for PayoutConfig {
    fn default() -> Self {
        Self {
            platform_minimum_cents: 5_000,
            default_threshold_cents: 10_000,
            provider_timeout_secs: 30,
            http: None,
        }
    }
}

impl PayoutConfig {
    /// Threshold actually applied for a member's setting.
    pub fn effective_threshold(&self, member_threshold: Option<i64>) -> i64 {
        member_threshold
            .unwrap_or(self.default_threshold_cents)
            .max(self.platform_minimum_cents)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }
}

/// HTTP payout gateway configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpPayoutConfig {
    /// Endpoint receiving payout instructions.
    pub endpoint: String,
    /// Bearer token.
    pub api_key: Option<String>,
    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for HttpPayoutConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            api_key: None,
            request_timeout_secs: 10,
        }
    }
}
