//! Payment settlement.
//!
//! A confirmed payment is settled as one store transaction: the idempotency
//! claim, every commission credit, the subscription extension and any wallet
//! credit commit together or not at all. A failure after the claim rolls the
//! claim back with everything else, so the gateway's retry settles cleanly.
//!
//! Phase re-evaluation runs after the commit and only when the buyer's
//! activity changed. It never fails a settlement.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::commission::{
    compute_affiliate_sponsor_commission, compute_commissions, total_cents, PaymentContext,
    RateBasis,
};
use crate::config::{PhaseConfig, SettlementConfig};
use crate::model::{
    Account, CommissionEvent, LedgerDelta, MemberId, MemberSnapshot, PaymentIntent,
    ProcessedPayment, SubscriptionKind, SubscriptionStatus, TxnReason, TxnReference,
};
use crate::notify::{dispatch, Notification, Notifier};
use crate::phase::{PhaseEngine, PhaseEvaluation};
use crate::storage::{CommitOutcome, SettlementBatch, StorageError, Store, SubscriptionRenewal};
use crate::upline::{UplineError, UplineReader};

mod command;

pub use command::{CommandError, GatewayConfirmation, SettlementCommand};


/// Settlement errors.
#[derive(Debug, Error)]
pub enum SettlementError {
    #[error("Buyer not found: {0}")]
    UnknownBuyer(MemberId),

    #[error("Payment {0} has not been processed")]
    NotProcessed(TxnReference),

    #[error("Upline resolution failed: {0}")]
    UplineResolution(#[from] UplineError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Outcome of one confirmed payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SettlementReceipt {
    /// True when this gateway reference had already been settled; nothing was written.
    pub already_processed: bool,
    pub origin: TxnReference,
    pub commissions: Vec<CommissionEvent>,
    pub skipped_duplicates: usize,
    pub subscription_period_end: Option<chrono::DateTime<Utc>>,
    pub wallet_balance_cents: Option<i64>,
    pub phase_changes: Vec<PhaseEvaluation>,
}

impl SettlementReceipt {
    fn duplicate(origin: TxnReference) -> Self {
        Self {
            already_processed: true,
            origin,
            commissions: Vec::new(),
            skipped_duplicates: 0,
            subscription_period_end: None,
            wallet_balance_cents: None,
            phase_changes: Vec::new(),
        }
    }

    pub fn commission_total_cents(&self) -> i64 {
        total_cents(&self.commissions)
    }
}

/// Settles confirmed gateway payments.
#[derive(Clone)]
pub struct SettlementService {
    store: Arc<dyn Store>,
    phase_config: Arc<PhaseConfig>,
    settings: SettlementConfig,
    upline: UplineReader,
    phases: PhaseEngine,
    notifier: Option<Arc<dyn Notifier>>,
}

impl SettlementService {
    pub fn new(
        store: Arc<dyn Store>,
        phase_config: Arc<PhaseConfig>,
        settings: SettlementConfig,
    ) -> Self {
        Self {
            upline: UplineReader::new(Arc::clone(&store)),
            phases: PhaseEngine::new(Arc::clone(&store), Arc::clone(&phase_config)),
            store,
            phase_config,
            settings,
            notifier: None,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.phases = self.phases.with_notifier(Arc::clone(&notifier));
        self.notifier = Some(notifier);
        self
    }

    pub fn phases(&self) -> &PhaseEngine {
        &self.phases
    }

    /// Settle one confirmed payment.
    ///
    /// A repeated gateway reference returns `already_processed = true` and
    /// writes nothing, whether it is caught by the fast check or by the
    /// store's claim constraint.
    pub async fn handle_confirmed_payment(
        &self,
        command: SettlementCommand,
    ) -> Result<SettlementReceipt, SettlementError> {
        let origin = command.origin.clone();
        if self.store.is_processed(&origin).await? {
            debug!(origin = %origin, "Payment already processed");
            return Ok(SettlementReceipt::duplicate(origin));
        }

        let buyer = self
            .store
            .member_snapshot(&command.buyer_id)
            .await?
            .ok_or_else(|| SettlementError::UnknownBuyer(command.buyer_id.clone()))?;

        let commissions = self
            .commissions_for(&command.origin, &buyer, command.amount_cents, &command.intent)
            .await?;

        let subscription = match &command.intent {
            PaymentIntent::Subscription {
                subscription_type,
                plan,
            } => Some(SubscriptionRenewal {
                kind: *subscription_type,
                plan: plan.clone(),
                gateway: command.gateway,
                period_end: command.period_end,
                default_period_days: self.settings.default_period_days,
            }),
            _ => None,
        };

        let wallet_credit = match command.intent {
            PaymentIntent::WalletRecharge => Some(
                LedgerDelta::credit(
                    Account::Wallet,
                    command.buyer_id.clone(),
                    command.amount_cents,
                    TxnReason::WalletRecharge,
                )
                .with_reference(origin.clone()),
            ),
            _ => None,
        };

        let batch = SettlementBatch {
            payment: ProcessedPayment {
                origin: origin.clone(),
                buyer_id: command.buyer_id.clone(),
                amount_cents: command.amount_cents,
                intent: command.intent.clone(),
                processed_at: Utc::now(),
            },
            commissions,
            subscription,
            wallet_credit,
        };

        let applied = match self.store.commit_settlement(&batch).await? {
            CommitOutcome::AlreadyProcessed => {
                debug!(origin = %origin, "Payment claimed concurrently");
                return Ok(SettlementReceipt::duplicate(origin));
            }
            CommitOutcome::Applied(applied) => applied,
        };

        info!(
            origin = %origin,
            buyer = %command.buyer_id,
            intent = command.intent.label(),
            amount_cents = command.amount_cents,
            commissions = applied.credited.len(),
            commission_cents = total_cents(&applied.credited),
            skipped_duplicates = applied.skipped_duplicates,
            config_version = self.phase_config.version,
            "Payment settled"
        );
        for event in &applied.credited {
            self.notify(Notification::CommissionCredited {
                recipient: event.recipient_id.clone(),
                amount_cents: event.amount_cents,
                origin: event.origin.clone(),
            });
        }

        let phase_changes = self
            .reevaluate_if_activity_changed(&command.buyer_id, buyer.active)
            .await;

        Ok(SettlementReceipt {
            already_processed: false,
            origin,
            commissions: applied.credited,
            skipped_duplicates: applied.skipped_duplicates,
            subscription_period_end: applied.renewal.map(|r| r.period_end),
            wallet_balance_cents: applied.wallet_balance_cents,
            phase_changes,
        })
    }

    /// Commission events for a payment, computed against the current tree.
    async fn commissions_for(
        &self,
        origin: &TxnReference,
        buyer: &MemberSnapshot,
        amount_cents: i64,
        intent: &PaymentIntent,
    ) -> Result<Vec<CommissionEvent>, SettlementError> {
        let basis = match intent {
            PaymentIntent::WalletRecharge => return Ok(Vec::new()),
            PaymentIntent::Subscription { .. } => RateBasis::Subscription,
            PaymentIntent::Checkout { .. } => RateBasis::Ecommerce,
        };

        let upline = self
            .upline
            .resolve(
                &buyer.member.id,
                usize::from(self.phase_config.commission_levels),
            )
            .await?;

        let payment = PaymentContext {
            origin,
            payer: &buyer.member.id,
            amount_cents,
            basis,
        };
        let mut events = compute_commissions(&payment, &upline, &self.phase_config);

        if let PaymentIntent::Checkout {
            affiliate_id: Some(affiliate),
        } = intent
        {
            let remaining = amount_cents - total_cents(&events);
            if let Some(event) = self
                .affiliate_sponsor_commission(&payment, affiliate, remaining)
                .await?
            {
                events.push(event);
            }
        }

        Ok(events)
    }

    async fn affiliate_sponsor_commission(
        &self,
        payment: &PaymentContext<'_>,
        affiliate: &MemberId,
        remaining_cents: i64,
    ) -> Result<Option<CommissionEvent>, SettlementError> {
        let Some(affiliate_member) = self.store.member(affiliate).await? else {
            warn!(
                origin = %payment.origin,
                affiliate = %affiliate,
                "Storefront affiliate not found; no affiliate commission"
            );
            return Ok(None);
        };
        let Some(sponsor_id) = affiliate_member.sponsor_id else {
            return Ok(None);
        };
        let Some(sponsor) = self.store.member_snapshot(&sponsor_id).await? else {
            warn!(
                affiliate = %affiliate,
                sponsor = %sponsor_id,
                "Affiliate sponsor not found"
            );
            return Ok(None);
        };
        Ok(compute_affiliate_sponsor_commission(
            payment,
            &sponsor,
            &self.phase_config,
            remaining_cents,
        ))
    }

    /// Update a subscription's status from a gateway lifecycle event.
    ///
    /// Returns the ancestor evaluations triggered when the member's activity
    /// flipped.
    pub async fn record_subscription_status(
        &self,
        member: &MemberId,
        kind: SubscriptionKind,
        status: SubscriptionStatus,
    ) -> Result<Vec<PhaseEvaluation>, SettlementError> {
        let before = self
            .store
            .member_snapshot(member)
            .await?
            .ok_or_else(|| SettlementError::UnknownBuyer(member.clone()))?;

        let previous = self
            .store
            .set_subscription_status(member, kind, status)
            .await?;
        info!(
            member = %member,
            kind = %kind,
            from = %previous,
            to = %status,
            "Subscription status changed"
        );

        Ok(self
            .reevaluate_if_activity_changed(member, before.active)
            .await)
    }

    /// Credit commissions missing from an already-settled payment.
    ///
    /// Recomputes from the stored claim against the current tree; events
    /// already recorded are left alone.
    pub async fn repair_commissions(
        &self,
        origin: &TxnReference,
    ) -> Result<Vec<CommissionEvent>, SettlementError> {
        let payment = self
            .store
            .processed_payment(origin)
            .await?
            .ok_or_else(|| SettlementError::NotProcessed(origin.clone()))?;

        let buyer = self
            .store
            .member_snapshot(&payment.buyer_id)
            .await?
            .ok_or_else(|| SettlementError::UnknownBuyer(payment.buyer_id.clone()))?;

        let expected = self
            .commissions_for(&payment.origin, &buyer, payment.amount_cents, &payment.intent)
            .await?;
        let applied = self.store.record_missing_commissions(&expected).await?;

        if applied.is_empty() {
            debug!(origin = %origin, "No missing commissions");
        } else {
            warn!(
                origin = %origin,
                repaired = applied.len(),
                repaired_cents = total_cents(&applied),
                "Missing commissions credited"
            );
        }
        for event in &applied {
            self.notify(Notification::CommissionCredited {
                recipient: event.recipient_id.clone(),
                amount_cents: event.amount_cents,
                origin: event.origin.clone(),
            });
        }
        Ok(applied)
    }

    async fn reevaluate_if_activity_changed(
        &self,
        member: &MemberId,
        was_active: bool,
    ) -> Vec<PhaseEvaluation> {
        if !self.settings.reevaluate_phases {
            return Vec::new();
        }
        let is_active = match self.store.member_snapshot(member).await {
            Ok(Some(snapshot)) => snapshot.active,
            Ok(None) => return Vec::new(),
            Err(e) => {
                warn!(member = %member, error = %e, "Could not read activity after settlement");
                return Vec::new();
            }
        };
        if is_active == was_active {
            return Vec::new();
        }

        debug!(member = %member, active = is_active, "Activity changed; re-evaluating upline");
        match self.phases.evaluate_ancestors(member).await {
            Ok(evaluations) => evaluations.into_iter().filter(|e| e.changed()).collect(),
            Err(e) => {
                warn!(member = %member, error = %e, "Upline phase re-evaluation failed");
                Vec::new()
            }
        }
    }

    fn notify(&self, notification: Notification) {
        if let Some(notifier) = &self.notifier {
            dispatch(notifier, notification);
        }
    }
}
