//! Commission calculation.
//!
//! Pure functions over an already-resolved upline and a phase configuration
//! snapshot. Nothing here touches storage: the orchestrator decides what to
//! apply, and tests can pin every input.
//!
//! Amounts are `floor(amount × rate)`; residual cents stay with the platform.
//! Rates are clamped into `[0, 1]`, and each amount is capped by what is left
//! of the payment, so the total of a fan-out never exceeds the amount paid.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::config::PhaseConfig;
use crate::model::{CommissionEvent, CommissionKind, MemberId, MemberSnapshot, TxnReference};


/// Which phase rate applies to a payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateBasis {
    /// Subscription start or renewal: `commission_rate`.
    Subscription,
    /// Product purchase: member override, then `ecommerce_rate`, then `commission_rate`.
    Ecommerce,
}

/// The payment being distributed.
#[derive(Debug, Clone, Copy)]
pub struct PaymentContext<'a> {
    pub origin: &'a TxnReference,
    pub payer: &'a MemberId,
    pub amount_cents: i64,
    pub basis: RateBasis,
}

/// `floor(amount_cents × rate)`, saturating at the `i64` range.
pub fn floor_share(amount_cents: i64, rate: Decimal) -> i64 {
    let saturated = if (amount_cents < 0) != rate.is_sign_negative() {
        i64::MIN
    } else {
        i64::MAX
    };
    Decimal::from(amount_cents)
        .checked_mul(rate)
        .and_then(|share| share.floor().to_i64())
        .unwrap_or(saturated)
}

fn clamp_rate(rate: Decimal) -> Decimal {
    rate.clamp(Decimal::ZERO, Decimal::ONE)
}

/// Rate an ancestor earns on this payment, decided by the ancestor's own phase.
pub fn effective_rate(ancestor: &MemberSnapshot, basis: RateBasis, config: &PhaseConfig) -> Decimal {
    let level = config.level_or_warn(ancestor.phase);
    let rate = match basis {
        RateBasis::Subscription => level.map(|l| l.commission_rate),
        RateBasis::Ecommerce => ancestor.member.ecommerce_rate_override.or_else(|| {
            level.map(|l| l.ecommerce_rate.unwrap_or(l.commission_rate))
        }),
    };
    clamp_rate(rate.unwrap_or(Decimal::ZERO))
}

/// Per-level commissions up the buyer's upline.
///
/// `upline[0]` is the direct sponsor. At most `config.commission_levels`
/// ancestors are paid. An inactive ancestor or a zero rate produces no event
/// for that level; the levels above keep their numbering.
pub fn compute_commissions(
    payment: &PaymentContext<'_>,
    upline: &[MemberSnapshot],
    config: &PhaseConfig,
) -> Vec<CommissionEvent> {
    if payment.amount_cents <= 0 {
        return Vec::new();
    }

    let mut remaining = payment.amount_cents;
    let mut events = Vec::new();

    for (index, ancestor) in upline
        .iter()
        .take(usize::from(config.commission_levels))
        .enumerate()
    {
        if !ancestor.active {
            continue;
        }
        let rate = effective_rate(ancestor, payment.basis, config);
        if rate.is_zero() {
            continue;
        }
        let amount = floor_share(payment.amount_cents, rate).min(remaining);
        if amount <= 0 {
            continue;
        }
        remaining -= amount;

        events.push(CommissionEvent {
            origin: payment.origin.clone(),
            payer_id: payment.payer.clone(),
            recipient_id: ancestor.member.id.clone(),
            kind: CommissionKind::Upline,
            level: (index + 1) as u8,
            amount_cents: amount,
            rate,
        });
    }

    events
}

/// Single-level commission paid to a storefront affiliate's own sponsor.
///
/// Independent of the buyer's upline chain. `remaining_cents` is what the
/// upline fan-out left undistributed.
pub fn compute_affiliate_sponsor_commission(
    payment: &PaymentContext<'_>,
    affiliate_sponsor: &MemberSnapshot,
    config: &PhaseConfig,
    remaining_cents: i64,
) -> Option<CommissionEvent> {
    if !affiliate_sponsor.active {
        return None;
    }
    let rate = clamp_rate(
        config
            .level_or_warn(affiliate_sponsor.phase)
            .map_or(Decimal::ZERO, |l| l.affiliate_sponsor_rate),
    );
    if rate.is_zero() {
        return None;
    }

    let amount = floor_share(payment.amount_cents, rate).min(remaining_cents);
    (amount > 0).then(|| CommissionEvent {
        origin: payment.origin.clone(),
        payer_id: payment.payer.clone(),
        recipient_id: affiliate_sponsor.member.id.clone(),
        kind: CommissionKind::AffiliateSponsor,
        level: 1,
        amount_cents: amount,
        rate,
    })
}

/// Sum of event amounts.
pub fn total_cents(events: &[CommissionEvent]) -> i64 {
    events.iter().map(|e| e.amount_cents).sum()
}
