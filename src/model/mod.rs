//! Domain records shared by every component.
//!
//! Amounts are always integer cents (`i64`). Commission and discount rates are
//! exact decimal fractions (`rust_decimal::Decimal`) so that flooring a
//! percentage of a payment never suffers binary rounding drift.

use thiserror::Error;

/// Error returned when a stored or configured string does not name a known variant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown {kind} value: {value}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

/// Declares a fieldless enum with a stable snake_case text form used for
/// persistence, serde and display.
macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident : $label:literal {
            $($(#[$vmeta:meta])* $variant:ident => $text:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ::serde::Serialize, ::serde::Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($(#[$vmeta])* $variant),+
        }

        impl $name {
            /// Every variant, in declaration order.
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// Stable text form.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl ::std::str::FromStr for $name {
            type Err = $crate::model::ParseEnumError;

            fn from_str(s: &str) -> ::std::result::Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err($crate::model::ParseEnumError {
                        kind: $label,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

mod commission;
mod ledger;
mod member;
mod payment;
mod payout;
mod phase;

pub use commission::{CommissionEvent, CommissionKey, CommissionKind};
pub use ledger::{Account, Balance, DeltaOutcome, LedgerDelta, LedgerTxn, TxnReason, TxnReference};
pub use member::{
    AdminAction, Member, MemberId, MemberSnapshot, Subscription, SubscriptionKind,
    SubscriptionStatus,
};
pub use payment::{Gateway, PaymentIntent, ProcessedPayment};
pub use payout::{
    Payout, PayoutAccount, PayoutAccountStatus, PayoutProviderKind, PayoutSettings, PayoutStatus,
};
pub use phase::{
    period_bucket, PhaseRecord, PhaseReward, RewardGrant, RewardSchedule, MAX_PHASE,
    ONE_TIME_PERIOD,
};
