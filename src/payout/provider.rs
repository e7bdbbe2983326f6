//! External payout providers.
//!
//! The HTTP provider POSTs one JSON instruction per payout to a payout
//! gateway. The payout id travels as the `Idempotency-Key` header, so a
//! retried request cannot pay twice.

use std::time::Duration;

use async_trait::async_trait;
use backon::Retryable;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::config::HttpPayoutConfig;
use crate::model::{MemberId, Payout, PayoutProviderKind};
use crate::utils::retry::payout_backoff;

/// Provider call errors.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The provider refused the instruction.
    #[error("Payout rejected: {0}")]
    Rejected(String),

    /// The request never reached the provider.
    #[error("Payout provider unreachable: {0}")]
    Unreachable(String),

    /// The provider answered with a server error; the outcome is unknown.
    #[error("Payout provider error: {0}")]
    ServerError(String),

    #[error("Payout provider timed out")]
    Timeout,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ProviderError {
    /// Whether the provider certainly did not pay.
    ///
    /// Only these failures are compensated; anything else leaves the payout
    /// pending until it is resolved.
    pub fn is_definitive_failure(&self) -> bool {
        matches!(
            self,
            ProviderError::Rejected(_) | ProviderError::Unreachable(_) | ProviderError::Config(_)
        )
    }

    fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::Unreachable(_) | ProviderError::ServerError(_) | ProviderError::Timeout
        )
    }
}

/// What the provider is asked to pay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PayoutInstruction {
    pub payout_id: Uuid,
    pub member_id: MemberId,
    pub provider: PayoutProviderKind,
    pub provider_account_id: String,
    pub amount_cents: i64,
}

impl From<&Payout> for PayoutInstruction {
    fn from(payout: &Payout) -> Self {
        Self {
            payout_id: payout.id,
            member_id: payout.member_id.clone(),
            provider: payout.provider,
            provider_account_id: payout.provider_account_id.clone(),
            amount_cents: payout.amount_cents,
        }
    }
}

/// Provider confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderReceipt {
    /// Provider-side transfer id.
    pub reference: String,
}

/// Sends money out of the platform.
#[async_trait]
pub trait PayoutProvider: Send + Sync {
    async fn send(&self, instruction: &PayoutInstruction) -> Result<ProviderReceipt, ProviderError>;

    /// Name for logging.
    fn name(&self) -> &str;
}

/// JSON-over-HTTP payout gateway.
pub struct HttpPayoutProvider {
    client: Client,
    config: HttpPayoutConfig,
}

impl HttpPayoutProvider {
    pub fn new(config: HttpPayoutConfig) -> Result<Self, ProviderError> {
        if config.endpoint.is_empty() {
            return Err(ProviderError::Config(
                "payout endpoint not configured".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self { client, config })
    }

    fn classify_send_error(err: reqwest::Error) -> ProviderError {
        if err.is_connect() {
            ProviderError::Unreachable(err.to_string())
        } else if err.is_timeout() {
            ProviderError::Timeout
        } else {
            ProviderError::Http(err)
        }
    }

    fn is_retryable_status(status: StatusCode) -> bool {
        status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
    }

    async fn post(&self, instruction: &PayoutInstruction) -> Result<ProviderReceipt, ProviderError> {
        let mut request = self
            .client
            .post(&self.config.endpoint)
            .header("Idempotency-Key", instruction.payout_id.to_string())
            .json(instruction);
        if let Some(api_key) = &self.config.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await.map_err(Self::classify_send_error)?;
        let status = response.status();

        if status.is_success() {
            let receipt: ProviderReceipt = response.json().await?;
            debug!(
                payout_id = %instruction.payout_id,
                reference = %receipt.reference,
                "Payout accepted by provider"
            );
            return Ok(receipt);
        }

        let body = response.text().await.unwrap_or_default();
        let detail = format!(
            "HTTP {} - {}",
            status,
            body.chars().take(200).collect::<String>()
        );
        if Self::is_retryable_status(status) {
            warn!(
                payout_id = %instruction.payout_id,
                status = %status,
                "Payout provider returned retryable status"
            );
            Err(ProviderError::ServerError(detail))
        } else {
            error!(
                payout_id = %instruction.payout_id,
                status = %status,
                body = %body,
                "Payout rejected by provider"
            );
            Err(ProviderError::Rejected(detail))
        }
    }
}

#[async_trait]
impl PayoutProvider for HttpPayoutProvider {
    async fn send(&self, instruction: &PayoutInstruction) -> Result<ProviderReceipt, ProviderError> {
        (|| async { self.post(instruction).await })
            .retry(payout_backoff())
            .when(ProviderError::is_retryable)
            .await
    }

    fn name(&self) -> &str {
        "http"
    }
}
