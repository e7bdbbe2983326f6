//! Earnings transfers and payouts.
//!
//! A payout debits network earnings and records a `pending` payout in one
//! transaction before the provider is called. The debit only becomes final
//! on provider confirmation:
//!
//! - accepted: `completed`
//! - certainly not paid (rejected, unreachable): `failed` plus a compensating
//!   credit, in one transaction
//! - unknown (timeout, server error): left `pending` for
//!   [`PayoutService::resolve_pending_payout`]

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::PayoutConfig;
use crate::model::{
    Account, MemberId, Payout, PayoutAccount, PayoutAccountStatus, PayoutProviderKind,
    PayoutSettings, PayoutStatus, TxnReference,
};
use crate::notify::{dispatch, Notification, Notifier};
use crate::storage::{StorageError, Store, TransferOutcome};

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;
pub mod provider;

pub use provider::{
    HttpPayoutProvider, PayoutInstruction, PayoutProvider, ProviderError, ProviderReceipt,
};


/// Payout errors.
#[derive(Debug, Error)]
pub enum PayoutError {
    #[error("Insufficient earnings for {member}: {available} available, {requested} requested")]
    InsufficientFunds {
        member: MemberId,
        available: i64,
        requested: i64,
    },

    #[error("Amount must be positive, got {0}")]
    NonPositiveAmount(i64),

    #[error("Payout of {amount_cents} is below the platform minimum of {minimum_cents}")]
    BelowMinimum { amount_cents: i64, minimum_cents: i64 },

    #[error("Member {0} already has a pending payout")]
    PayoutPending(MemberId),

    #[error("Member {0} has no active payout account")]
    NoActiveAccount(MemberId),

    #[error("Payout not found: {0}")]
    UnknownPayout(Uuid),

    #[error("Payout {payout_id} failed at the provider and was reversed: {source}")]
    ExternalProvider {
        payout_id: Uuid,
        #[source]
        source: ProviderError,
    },

    #[error("Payout {payout_id} has no provider confirmation; held pending")]
    ProviderTimeout { payout_id: Uuid },

    #[error("Storage error: {0}")]
    Storage(StorageError),
}

impl From<StorageError> for PayoutError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::InsufficientFunds {
                member,
                available,
                requested,
                ..
            } => PayoutError::InsufficientFunds {
                member,
                available,
                requested,
            },
            StorageError::AlreadyExists {
                entity: "pending payout",
                id,
            } => PayoutError::PayoutPending(MemberId::new(id)),
            other => PayoutError::Storage(other),
        }
    }
}

/// Why an auto-payout did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    Disabled,
    NoActiveAccount,
    PayoutPending,
    BelowThreshold {
        available_cents: i64,
        threshold_cents: i64,
    },
}

/// Outcome of one auto-payout check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AutoPayoutResult {
    pub processed: bool,
    pub amount_cents: Option<i64>,
    pub payout: Option<Payout>,
    pub skipped: Option<SkipReason>,
}

impl AutoPayoutResult {
    fn skipped(reason: SkipReason) -> Self {
        Self {
            processed: false,
            amount_cents: None,
            payout: None,
            skipped: Some(reason),
        }
    }
}

/// Totals of one auto-payout sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub examined: usize,
    pub completed: usize,
    pub skipped: usize,
    /// Compensated provider failures.
    pub failed: usize,
    /// Held pending after a timeout or ambiguous provider error.
    pub pending: usize,
    /// Storage or other errors.
    pub errors: usize,
    pub paid_cents: i64,
}

/// Manual resolution of a pending payout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayoutResolution {
    /// The provider paid; carries its reference.
    Confirmed(String),
    /// The provider did not pay; the debit is reversed.
    Failed(String),
}

/// Moves network earnings to the wallet or out to a payout provider.
#[derive(Clone)]
pub struct PayoutService {
    store: Arc<dyn Store>,
    config: PayoutConfig,
    provider: Arc<dyn PayoutProvider>,
    provider_timeout: Duration,
    notifier: Option<Arc<dyn Notifier>>,
}

impl PayoutService {
    pub fn new(
        store: Arc<dyn Store>,
        config: PayoutConfig,
        provider: Arc<dyn PayoutProvider>,
    ) -> Self {
        Self {
            provider_timeout: config.provider_timeout(),
            store,
            config,
            provider,
            notifier: None,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Override the bound on one provider call.
    pub fn with_provider_timeout(mut self, timeout: Duration) -> Self {
        self.provider_timeout = timeout;
        self
    }

    /// Move earnings into the wallet; both balances change or neither does.
    pub async fn transfer_earnings_to_wallet(
        &self,
        member: &MemberId,
        amount_cents: i64,
    ) -> Result<TransferOutcome, PayoutError> {
        if amount_cents <= 0 {
            return Err(PayoutError::NonPositiveAmount(amount_cents));
        }
        let reference = TxnReference::new("earnings_transfer", Uuid::new_v4().to_string());
        let outcome = self
            .store
            .transfer_earnings_to_wallet(member, amount_cents, &reference)
            .await?;
        info!(
            member = %member,
            amount_cents,
            earnings_cents = outcome.earnings_balance_cents,
            wallet_cents = outcome.wallet_balance_cents,
            "Earnings transferred to wallet"
        );
        Ok(outcome)
    }

    pub async fn settings(&self, member: &MemberId) -> Result<Option<PayoutSettings>, PayoutError> {
        Ok(self.store.payout_settings(member).await?)
    }

    /// Save auto-payout preferences. The threshold is stored as given and
    /// clamped to the platform minimum when applied.
    pub async fn configure_auto_payout(
        &self,
        member: &MemberId,
        auto_payout: bool,
        threshold_cents: Option<i64>,
        preferred_provider: Option<PayoutProviderKind>,
    ) -> Result<PayoutSettings, PayoutError> {
        if let Some(threshold) = threshold_cents {
            if threshold <= 0 {
                return Err(PayoutError::NonPositiveAmount(threshold));
            }
        }
        let settings = PayoutSettings {
            member_id: member.clone(),
            auto_payout,
            threshold_cents,
            preferred_provider,
        };
        self.store.save_payout_settings(&settings).await?;
        debug!(member = %member, auto_payout, threshold_cents = ?threshold_cents, "Payout settings saved");
        Ok(settings)
    }

    pub async fn register_account(&self, account: &PayoutAccount) -> Result<(), PayoutError> {
        self.store.upsert_payout_account(account).await?;
        info!(
            member = %account.member_id,
            provider = %account.provider,
            status = %account.status,
            "Payout account saved"
        );
        Ok(())
    }

    pub async fn accounts(&self, member: &MemberId) -> Result<Vec<PayoutAccount>, PayoutError> {
        Ok(self.store.payout_accounts(member).await?)
    }

    pub async fn payouts(&self, member: &MemberId) -> Result<Vec<Payout>, PayoutError> {
        Ok(self.store.payouts_for(member).await?)
    }

    /// Active account for `provider`, else the preferred one, else any.
    async fn active_account(
        &self,
        member: &MemberId,
        provider: Option<PayoutProviderKind>,
    ) -> Result<Option<PayoutAccount>, PayoutError> {
        let active: Vec<PayoutAccount> = self
            .store
            .payout_accounts(member)
            .await?
            .into_iter()
            .filter(|a| a.status == PayoutAccountStatus::Active)
            .collect();

        if let Some(provider) = provider {
            return Ok(active.into_iter().find(|a| a.provider == provider));
        }
        Ok(active.into_iter().next())
    }

    async fn has_pending(&self, member: &MemberId) -> Result<bool, PayoutError> {
        Ok(self
            .store
            .payouts_for(member)
            .await?
            .iter()
            .any(|p| p.status == PayoutStatus::Pending))
    }

    /// Pay out the full earnings balance if it reaches the member's threshold.
    pub async fn process_auto_payout(
        &self,
        member: &MemberId,
    ) -> Result<AutoPayoutResult, PayoutError> {
        let settings = match self.store.payout_settings(member).await? {
            Some(settings) if settings.auto_payout => settings,
            _ => return Ok(AutoPayoutResult::skipped(SkipReason::Disabled)),
        };

        let mut account = self
            .active_account(member, settings.preferred_provider)
            .await?;
        if account.is_none() && settings.preferred_provider.is_some() {
            account = self.active_account(member, None).await?;
        }
        let Some(account) = account else {
            return Ok(AutoPayoutResult::skipped(SkipReason::NoActiveAccount));
        };

        if self.has_pending(member).await? {
            return Ok(AutoPayoutResult::skipped(SkipReason::PayoutPending));
        }

        let available = self
            .store
            .balance(member, Account::NetworkEarnings)
            .await?
            .balance_cents;
        let threshold = self.config.effective_threshold(settings.threshold_cents);
        if available < threshold {
            debug!(
                member = %member,
                available_cents = available,
                threshold_cents = threshold,
                "Below auto-payout threshold"
            );
            return Ok(AutoPayoutResult::skipped(SkipReason::BelowThreshold {
                available_cents: available,
                threshold_cents: threshold,
            }));
        }

        let payout = self.execute(&account, available).await?;
        Ok(AutoPayoutResult {
            processed: true,
            amount_cents: Some(payout.amount_cents),
            payout: Some(payout),
            skipped: None,
        })
    }

    /// Member-initiated withdrawal of `amount_cents`.
    pub async fn request_payout(
        &self,
        member: &MemberId,
        amount_cents: i64,
        provider: Option<PayoutProviderKind>,
    ) -> Result<Payout, PayoutError> {
        if amount_cents <= 0 {
            return Err(PayoutError::NonPositiveAmount(amount_cents));
        }
        if amount_cents < self.config.platform_minimum_cents {
            return Err(PayoutError::BelowMinimum {
                amount_cents,
                minimum_cents: self.config.platform_minimum_cents,
            });
        }

        let provider = match provider {
            Some(provider) => Some(provider),
            None => self
                .store
                .payout_settings(member)
                .await?
                .and_then(|s| s.preferred_provider),
        };
        let account = match self.active_account(member, provider).await? {
            Some(account) => account,
            None => self
                .active_account(member, None)
                .await?
                .ok_or_else(|| PayoutError::NoActiveAccount(member.clone()))?,
        };

        self.execute(&account, amount_cents).await
    }

    /// Debit, call the provider, then settle the payout row.
    async fn execute(&self, account: &PayoutAccount, amount_cents: i64) -> Result<Payout, PayoutError> {
        let now = Utc::now();
        let payout = Payout {
            id: Uuid::new_v4(),
            member_id: account.member_id.clone(),
            provider: account.provider,
            provider_account_id: account.provider_account_id.clone(),
            amount_cents,
            status: PayoutStatus::Pending,
            provider_reference: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        };

        let earnings_after = self.store.begin_payout(&payout).await?;
        info!(
            payout_id = %payout.id,
            member = %payout.member_id,
            provider = %payout.provider,
            amount_cents,
            earnings_cents = earnings_after,
            "Payout started"
        );

        let instruction = PayoutInstruction::from(&payout);
        let result = tokio::time::timeout(self.provider_timeout, self.provider.send(&instruction))
            .await
            .unwrap_or(Err(ProviderError::Timeout));

        match result {
            Ok(receipt) => {
                let completed = self
                    .store
                    .complete_payout(payout.id, &receipt.reference, Utc::now())
                    .await?;
                info!(
                    payout_id = %completed.id,
                    member = %completed.member_id,
                    reference = %receipt.reference,
                    "Payout completed"
                );
                self.notify(Notification::PayoutCompleted {
                    member: completed.member_id.clone(),
                    payout_id: completed.id,
                    amount_cents: completed.amount_cents,
                });
                Ok(completed)
            }
            Err(e) if e.is_definitive_failure() => {
                let reason = e.to_string();
                self.compensate(&payout, &reason).await?;
                Err(PayoutError::ExternalProvider {
                    payout_id: payout.id,
                    source: e,
                })
            }
            Err(e) => {
                error!(
                    payout_id = %payout.id,
                    member = %payout.member_id,
                    provider = %self.provider.name(),
                    amount_cents,
                    error = %e,
                    "Payout outcome unknown; held pending"
                );
                Err(PayoutError::ProviderTimeout {
                    payout_id: payout.id,
                })
            }
        }
    }

    async fn compensate(&self, payout: &Payout, reason: &str) -> Result<Payout, PayoutError> {
        match self.store.fail_payout(payout.id, reason, Utc::now()).await {
            Ok(failed) => {
                warn!(
                    payout_id = %failed.id,
                    member = %failed.member_id,
                    amount_cents = failed.amount_cents,
                    reason,
                    "Payout failed; earnings restored"
                );
                self.notify(Notification::PayoutFailed {
                    member: failed.member_id.clone(),
                    payout_id: failed.id,
                    reason: reason.to_string(),
                });
                Ok(failed)
            }
            Err(e) => {
                error!(
                    payout_id = %payout.id,
                    member = %payout.member_id,
                    error = %e,
                    "Payout compensation failed; payout left pending"
                );
                Err(e.into())
            }
        }
    }

    /// Run auto-payout for every member that enabled it.
    ///
    /// Each member is independent; one failure does not stop the sweep.
    pub async fn sweep_auto_payouts(&self) -> Result<SweepReport, PayoutError> {
        let members = self.store.auto_payout_members().await?;
        let mut report = SweepReport::default();

        for settings in members {
            report.examined += 1;
            match self.process_auto_payout(&settings.member_id).await {
                Ok(result) if result.processed => {
                    report.completed += 1;
                    report.paid_cents += result.amount_cents.unwrap_or(0);
                }
                Ok(_) => report.skipped += 1,
                Err(PayoutError::ExternalProvider { .. }) => report.failed += 1,
                Err(PayoutError::ProviderTimeout { .. }) => report.pending += 1,
                Err(PayoutError::PayoutPending(_)) => report.skipped += 1,
                Err(e) => {
                    warn!(member = %settings.member_id, error = %e, "Auto-payout failed");
                    report.errors += 1;
                }
            }
        }

        info!(
            examined = report.examined,
            completed = report.completed,
            skipped = report.skipped,
            failed = report.failed,
            pending = report.pending,
            errors = report.errors,
            paid_cents = report.paid_cents,
            "Auto-payout sweep finished"
        );
        Ok(report)
    }

    /// Finalize a payout left pending.
    pub async fn resolve_pending_payout(
        &self,
        id: Uuid,
        resolution: PayoutResolution,
    ) -> Result<Payout, PayoutError> {
        let payout = self
            .store
            .get_payout(id)
            .await?
            .ok_or(PayoutError::UnknownPayout(id))?;

        match resolution {
            PayoutResolution::Confirmed(reference) => {
                let completed = self.store.complete_payout(id, &reference, Utc::now()).await?;
                info!(
                    payout_id = %id,
                    member = %completed.member_id,
                    reference = %reference,
                    "Pending payout confirmed"
                );
                self.notify(Notification::PayoutCompleted {
                    member: completed.member_id.clone(),
                    payout_id: id,
                    amount_cents: completed.amount_cents,
                });
                Ok(completed)
            }
            PayoutResolution::Failed(reason) => self.compensate(&payout, &reason).await,
        }
    }

    fn notify(&self, notification: Notification) {
        if let Some(notifier) = &self.notifier {
            dispatch(notifier, notification);
        }
    }
}
