//! Administrative overrides.
//!
//! Every override writes an audit row naming the actor and the before/after
//! values, and logs the same at info level.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::config::PhaseConfig;
use crate::model::{Account, AdminAction, MemberId, TxnReference};
use crate::phase::{PhaseEngine, PhaseError, PhaseEvaluation};
use crate::storage::{BalanceAdjustment, StorageError, Store};
use crate::upline::{UplineError, UplineReader};

/// Admin override errors.
#[derive(Debug, Error)]
pub enum AdminError {
    #[error("Member not found: {0}")]
    UnknownMember(MemberId),

    #[error("Phase {phase} is out of range (max {max})")]
    PhaseOutOfRange { phase: u8, max: u8 },

    #[error("Balance cannot be set below zero: {0}")]
    NegativeBalance(i64),

    #[error("Member {0} cannot sponsor itself")]
    SelfSponsor(MemberId),

    #[error("Sponsoring {member} under {sponsor} would create a cycle")]
    SponsorCycle { member: MemberId, sponsor: MemberId },

    #[error("Rate must be within [0, 1], got {0}")]
    InvalidRate(Decimal),

    #[error("Phase error: {0}")]
    Phase(#[from] PhaseError),

    #[error("Upline error: {0}")]
    Upline(#[from] UplineError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Admin operations over members, phases and balances.
#[derive(Clone)]
pub struct AdminService {
    store: Arc<dyn Store>,
    phases: PhaseEngine,
    upline: UplineReader,
}

impl AdminService {
    pub fn new(store: Arc<dyn Store>, phase_config: Arc<PhaseConfig>) -> Self {
        Self {
            phases: PhaseEngine::new(Arc::clone(&store), phase_config),
            upline: UplineReader::new(Arc::clone(&store)),
            store,
        }
    }

    async fn require_member(&self, member: &MemberId) -> Result<(), AdminError> {
        match self.store.member(member).await? {
            Some(_) => Ok(()),
            None => Err(AdminError::UnknownMember(member.clone())),
        }
    }

    async fn audit(
        &self,
        actor: &str,
        action: &str,
        member: &MemberId,
        detail: String,
    ) -> Result<(), AdminError> {
        info!(actor, action, member = %member, detail = %detail, "Admin override");
        self.store
            .record_admin_action(&AdminAction {
                actor: actor.to_string(),
                action: action.to_string(),
                member_id: member.clone(),
                detail,
                created_at: Utc::now(),
            })
            .await?;
        Ok(())
    }

    /// Force a phase and freeze automatic evaluation. Returns the previous phase.
    pub async fn set_phase(
        &self,
        actor: &str,
        member: &MemberId,
        phase: u8,
    ) -> Result<u8, AdminError> {
        let max = self.phases.config().max_phase();
        if phase > max {
            return Err(AdminError::PhaseOutOfRange { phase, max });
        }
        self.require_member(member).await?;

        let previous = self.store.set_manual_phase(member, phase, Utc::now()).await?;
        self.audit(actor, "set_phase", member, format!("{previous} -> {phase}"))
            .await?;
        Ok(previous)
    }

    /// Clear the manual override and evaluate the member right away.
    pub async fn clear_phase_override(
        &self,
        actor: &str,
        member: &MemberId,
    ) -> Result<PhaseEvaluation, AdminError> {
        self.require_member(member).await?;
        let was_set = self.store.clear_phase_override(member).await?;
        self.audit(
            actor,
            "clear_phase_override",
            member,
            format!("override was {}", if was_set { "set" } else { "clear" }),
        )
        .await?;
        Ok(self.phases.evaluate(member).await?)
    }

    /// Set a wallet or earnings balance, logging the difference as an
    /// `admin_adjustment` entry.
    pub async fn adjust_balance(
        &self,
        actor: &str,
        member: &MemberId,
        account: Account,
        target_cents: i64,
    ) -> Result<BalanceAdjustment, AdminError> {
        if target_cents < 0 {
            return Err(AdminError::NegativeBalance(target_cents));
        }
        self.require_member(member).await?;

        let reference = TxnReference::new("admin", Uuid::new_v4().to_string());
        let adjustment = self
            .store
            .set_balance(member, account, target_cents, &reference)
            .await?;
        self.audit(
            actor,
            "adjust_balance",
            member,
            format!(
                "{account}: {} -> {}",
                adjustment.previous_cents, adjustment.balance_cents
            ),
        )
        .await?;
        Ok(adjustment)
    }

    pub async fn adjust_wallet(
        &self,
        actor: &str,
        member: &MemberId,
        target_cents: i64,
    ) -> Result<BalanceAdjustment, AdminError> {
        self.adjust_balance(actor, member, Account::Wallet, target_cents)
            .await
    }

    pub async fn adjust_network_earnings(
        &self,
        actor: &str,
        member: &MemberId,
        target_cents: i64,
    ) -> Result<BalanceAdjustment, AdminError> {
        self.adjust_balance(actor, member, Account::NetworkEarnings, target_cents)
            .await
    }

    /// Move a member under a new sponsor (or make it a root).
    ///
    /// Both the old and the new upline are re-evaluated, since each team
    /// changed.
    pub async fn reassign_sponsor(
        &self,
        actor: &str,
        member: &MemberId,
        sponsor: Option<&MemberId>,
    ) -> Result<Vec<PhaseEvaluation>, AdminError> {
        let current = self
            .store
            .member(member)
            .await?
            .ok_or_else(|| AdminError::UnknownMember(member.clone()))?;

        if let Some(sponsor) = sponsor {
            if sponsor == member {
                return Err(AdminError::SelfSponsor(member.clone()));
            }
            self.require_member(sponsor).await?;
            if self.upline.would_create_cycle(member, sponsor).await? {
                return Err(AdminError::SponsorCycle {
                    member: member.clone(),
                    sponsor: sponsor.clone(),
                });
            }
        }

        let depth = usize::from(self.phases.config().team_depth);
        let old_upline = self.upline.walk(member, depth).await?;

        self.store.set_sponsor(member, sponsor).await?;
        self.audit(
            actor,
            "reassign_sponsor",
            member,
            format!(
                "{} -> {}",
                current.sponsor_id.as_ref().map_or("none", MemberId::as_str),
                sponsor.map_or("none", MemberId::as_str)
            ),
        )
        .await?;

        let mut evaluations = Vec::new();
        for ancestor in &old_upline.ancestors {
            evaluations.push(self.phases.evaluate(&ancestor.member.id).await?);
        }
        evaluations.extend(self.phases.evaluate_ancestors(member).await?);
        Ok(evaluations)
    }

    /// Soft-delete or restore a member. The upline is re-evaluated because
    /// the member's activity changes.
    pub async fn set_deactivated(
        &self,
        actor: &str,
        member: &MemberId,
        deactivated: bool,
    ) -> Result<Vec<PhaseEvaluation>, AdminError> {
        self.require_member(member).await?;
        self.store.set_deactivated(member, deactivated).await?;
        self.audit(
            actor,
            "set_deactivated",
            member,
            format!("deactivated = {deactivated}"),
        )
        .await?;
        Ok(self.phases.evaluate_ancestors(member).await?)
    }

    /// Set or clear a member's e-commerce commission rate override.
    pub async fn set_ecommerce_rate(
        &self,
        actor: &str,
        member: &MemberId,
        rate: Option<Decimal>,
    ) -> Result<(), AdminError> {
        if let Some(rate) = rate {
            if rate < Decimal::ZERO || rate > Decimal::ONE {
                return Err(AdminError::InvalidRate(rate));
            }
        }
        let current = self
            .store
            .member(member)
            .await?
            .ok_or_else(|| AdminError::UnknownMember(member.clone()))?;

        self.store.set_ecommerce_rate(member, rate).await?;
        self.audit(
            actor,
            "set_ecommerce_rate",
            member,
            format!("{:?} -> {:?}", current.ecommerce_rate_override, rate),
        )
        .await?;
        Ok(())
    }

    /// Audit rows for a member, oldest first.
    pub async fn audit_log(&self, member: &MemberId) -> Result<Vec<AdminAction>, AdminError> {
        Ok(self.store.admin_actions(member).await?)
    }
}
