//! Payment gateways and intents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{MemberId, SubscriptionKind, TxnReference};

string_enum! {
    pub enum Gateway: "gateway" {
        Stripe => "stripe",
        Paypal => "paypal",
        AuthorizeNet => "authorize_net",
        Wallet => "wallet",
    }
}

/// What a confirmed payment paid for.
///
/// Resolved once from the gateway metadata's `intent` discriminator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "intent", rename_all = "snake_case")]
pub enum PaymentIntent {
    /// Product purchase, optionally routed through an affiliate's storefront.
    Checkout {
        #[serde(default)]
        affiliate_id: Option<MemberId>,
    },
    /// Subscription start or renewal.
    Subscription {
        subscription_type: SubscriptionKind,
        #[serde(default)]
        plan: Option<String>,
    },
    WalletRecharge,
}

impl PaymentIntent {
    pub fn label(&self) -> &'static str {
        match self {
            PaymentIntent::Checkout { .. } => "checkout",
            PaymentIntent::Subscription { .. } => "subscription",
            PaymentIntent::WalletRecharge => "wallet_recharge",
        }
    }
}

/// The idempotency claim of a settled payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedPayment {
    pub origin: TxnReference,
    pub buyer_id: MemberId,
    pub amount_cents: i64,
    pub intent: PaymentIntent,
    pub processed_at: DateTime<Utc>,
}
