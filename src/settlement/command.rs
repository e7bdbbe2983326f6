//! Gateway confirmation payloads and the typed settlement command.
//!
//! The free-form `metadata` object is resolved exactly once, here, into a
//! [`PaymentIntent`]. Nothing past this boundary sees untyped JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{Gateway, MemberId, PaymentIntent, TxnReference};

const INTENTS: [&str; 3] = ["checkout", "subscription", "wallet_recharge"];

/// A gateway payload that cannot become a settlement command.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("Gateway reference is empty")]
    MissingReference,

    #[error("Buyer id is empty")]
    MissingBuyer,

    #[error("Amount must be positive, got {0}")]
    NonPositiveAmount(i64),

    #[error("Payment metadata has no intent")]
    MissingIntent,

    #[error("Unknown payment intent: {0}")]
    UnknownIntent(String),

    #[error("Invalid {intent} metadata: {reason}")]
    InvalidMetadata { intent: String, reason: String },
}

/// Confirmation as delivered by a payment gateway webhook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfirmation {
    pub gateway_ref: String,
    pub amount_cents: i64,
    pub buyer_id: String,
    pub gateway: Gateway,
    #[serde(default)]
    pub period_end: Option<DateTime<Utc>>,
    /// Checkout metadata carrying the `intent` discriminator.
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// A validated, typed confirmed payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementCommand {
    pub origin: TxnReference,
    pub gateway: Gateway,
    pub buyer_id: MemberId,
    pub amount_cents: i64,
    pub intent: PaymentIntent,
    pub period_end: Option<DateTime<Utc>>,
}

impl SettlementCommand {
    pub fn new(
        gateway: Gateway,
        gateway_ref: impl Into<String>,
        buyer_id: MemberId,
        amount_cents: i64,
        intent: PaymentIntent,
    ) -> Self {
        Self {
            origin: TxnReference::gateway(gateway, gateway_ref),
            gateway,
            buyer_id,
            amount_cents,
            intent,
            period_end: None,
        }
    }

    pub fn with_period_end(mut self, period_end: DateTime<Utc>) -> Self {
        self.period_end = Some(period_end);
        self
    }
}

fn parse_intent(metadata: serde_json::Value) -> Result<PaymentIntent, CommandError> {
    let intent = match metadata.get("intent") {
        Some(serde_json::Value::String(intent)) => intent.clone(),
        Some(other) => return Err(CommandError::UnknownIntent(other.to_string())),
        None => return Err(CommandError::MissingIntent),
    };
    if !INTENTS.contains(&intent.as_str()) {
        return Err(CommandError::UnknownIntent(intent));
    }
    serde_json::from_value(metadata).map_err(|e| CommandError::InvalidMetadata {
        intent,
        reason: e.to_string(),
    })
}

impl TryFrom<GatewayConfirmation> for SettlementCommand {
    type Error = CommandError;

    fn try_from(confirmation: GatewayConfirmation) -> Result<Self, Self::Error> {
        if confirmation.gateway_ref.trim().is_empty() {
            return Err(CommandError::MissingReference);
        }
        if confirmation.buyer_id.trim().is_empty() {
            return Err(CommandError::MissingBuyer);
        }
        if confirmation.amount_cents <= 0 {
            return Err(CommandError::NonPositiveAmount(confirmation.amount_cents));
        }
        let intent = parse_intent(confirmation.metadata)?;

        Ok(SettlementCommand {
            origin: TxnReference::gateway(confirmation.gateway, confirmation.gateway_ref),
            gateway: confirmation.gateway,
            buyer_id: MemberId::new(confirmation.buyer_id),
            amount_cents: confirmation.amount_cents,
            intent,
            period_end: confirmation.period_end,
        })
    }
}
