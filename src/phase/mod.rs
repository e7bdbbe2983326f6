//! Phase progression.
//!
//! A member moves at most one phase per evaluation, so every phase's one-time
//! reward is granted in order. Transitions are compare-and-set in the store:
//! two evaluations racing on the same member cannot both advance it.
//!
//! Reward grants are idempotent in the store (a `phaseN_granted` flag for
//! one-time rewards, a unique `(member, phase, period)` row for monthly ones).
//! A failed grant is logged and picked up by the next evaluation.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::PhaseConfig;
use crate::model::{
    period_bucket, MemberId, PhaseRecord, RewardGrant, RewardSchedule, ONE_TIME_PERIOD,
};
use crate::notify::{dispatch, Notification, Notifier};
use crate::storage::{StorageError, Store};
use crate::upline::{UplineError, UplineReader};


/// Phase engine errors.
#[derive(Debug, Error)]
pub enum PhaseError {
    #[error("Member not found: {0}")]
    UnknownMember(MemberId),

    #[error("Upline error: {0}")]
    Upline(#[from] UplineError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Active referral counts used against phase thresholds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TeamMetrics {
    /// Active level-1 referrals.
    pub direct_active: u32,
    /// Active referrals within `team_depth` levels.
    pub team_active: u32,
}

/// What an evaluation did to the phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseTransition {
    Unchanged,
    Promoted,
    Demoted,
    /// Manual override set; nothing evaluated.
    Frozen,
    /// Another evaluation moved the phase first.
    Contended,
}

/// Outcome of evaluating one member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseEvaluation {
    pub member: MemberId,
    pub previous_phase: u8,
    pub phase: u8,
    pub highest_phase: u8,
    pub transition: PhaseTransition,
    pub metrics: TeamMetrics,
    /// Rewards granted by this evaluation.
    #[serde(skip)]
    pub rewards: Vec<RewardGrant>,
    /// Grants that failed and will be retried on the next evaluation.
    pub deferred_rewards: usize,
}

impl PhaseEvaluation {
    pub fn changed(&self) -> bool {
        matches!(
            self.transition,
            PhaseTransition::Promoted | PhaseTransition::Demoted
        )
    }
}

/// Totals of one scheduled evaluation pass over every member.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PhaseSweepReport {
    pub examined: usize,
    pub promoted: usize,
    pub demoted: usize,
    pub frozen: usize,
    pub rewards_granted: usize,
    pub deferred_rewards: usize,
    pub errors: usize,
}

/// Evaluates team metrics against the phase configuration and grants rewards.
#[derive(Clone)]
pub struct PhaseEngine {
    store: Arc<dyn Store>,
    config: Arc<PhaseConfig>,
    upline: UplineReader,
    notifier: Option<Arc<dyn Notifier>>,
}

impl PhaseEngine {
    pub fn new(store: Arc<dyn Store>, config: Arc<PhaseConfig>) -> Self {
        Self {
            upline: UplineReader::new(Arc::clone(&store)),
            store,
            config,
            notifier: None,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn config(&self) -> &PhaseConfig {
        &self.config
    }

    /// Breadth-first count of active referrals.
    ///
    /// Each member is visited once, so a corrupted tree cannot loop.
    pub async fn team_metrics(&self, member: &MemberId) -> Result<TeamMetrics, PhaseError> {
        let depth = self.config.team_depth.max(1);
        let mut metrics = TeamMetrics::default();
        let mut visited = HashSet::from([member.clone()]);
        let mut queue = VecDeque::from([(member.clone(), 0u8)]);

        while let Some((current, level)) = queue.pop_front() {
            if level >= depth {
                continue;
            }
            for referral in self.store.referral_snapshots(&current).await? {
                if !visited.insert(referral.member.id.clone()) {
                    continue;
                }
                if referral.active {
                    metrics.team_active += 1;
                    if level == 0 {
                        metrics.direct_active += 1;
                    }
                }
                queue.push_back((referral.member.id.clone(), level + 1));
            }
        }

        Ok(metrics)
    }

    /// Whether `metrics` meet every threshold of `phase`. Phase 0 always holds.
    pub fn qualifies(&self, phase: u8, metrics: &TeamMetrics) -> bool {
        if phase == 0 {
            return true;
        }
        match self.config.level_or_warn(phase) {
            Some(level) => {
                metrics.direct_active >= level.required_direct
                    && metrics.team_active >= level.required_team
            }
            None => false,
        }
    }

    /// One-step target phase for the current metrics.
    fn target_phase(&self, current: u8, metrics: &TeamMetrics) -> u8 {
        if current < self.config.max_phase() && self.qualifies(current + 1, metrics) {
            current + 1
        } else if self.config.allow_demotion && current > 0 && !self.qualifies(current, metrics) {
            current - 1
        } else {
            current
        }
    }

    pub async fn evaluate(&self, member: &MemberId) -> Result<PhaseEvaluation, PhaseError> {
        self.evaluate_at(member, Utc::now()).await
    }

    /// Evaluate `member` as of `at`. `at` also selects the monthly reward bucket.
    pub async fn evaluate_at(
        &self,
        member: &MemberId,
        at: DateTime<Utc>,
    ) -> Result<PhaseEvaluation, PhaseError> {
        if self.store.member(member).await?.is_none() {
            return Err(PhaseError::UnknownMember(member.clone()));
        }

        let record = self
            .store
            .phase_record(member)
            .await?
            .unwrap_or_else(|| PhaseRecord::new(member.clone()));

        if record.manual_override {
            debug!(
                member = %member,
                phase = record.current_phase,
                "Manual override set; skipping evaluation"
            );
            return Ok(PhaseEvaluation {
                member: member.clone(),
                previous_phase: record.current_phase,
                phase: record.current_phase,
                highest_phase: record.highest_phase,
                transition: PhaseTransition::Frozen,
                metrics: TeamMetrics::default(),
                rewards: Vec::new(),
                deferred_rewards: 0,
            });
        }

        let metrics = self.team_metrics(member).await?;
        let previous = record.current_phase;
        let target = self.target_phase(previous, &metrics);

        let mut transition = PhaseTransition::Unchanged;
        if target != previous {
            if self.store.try_transition(member, previous, target, at).await? {
                transition = if target > previous {
                    PhaseTransition::Promoted
                } else {
                    PhaseTransition::Demoted
                };
                info!(
                    member = %member,
                    from = previous,
                    to = target,
                    direct_active = metrics.direct_active,
                    team_active = metrics.team_active,
                    config_version = self.config.version,
                    "Phase changed"
                );
                self.notify(Notification::PhaseChanged {
                    member: member.clone(),
                    from: previous,
                    to: target,
                });
            } else {
                debug!(
                    member = %member,
                    from = previous,
                    to = target,
                    "Phase transition lost a race"
                );
                transition = PhaseTransition::Contended;
            }
        }

        // Re-read: the transition or a concurrent writer may have moved it.
        let record = self
            .store
            .phase_record(member)
            .await?
            .unwrap_or_else(|| PhaseRecord::new(member.clone()));

        let mut evaluation = PhaseEvaluation {
            member: member.clone(),
            previous_phase: previous,
            phase: record.current_phase,
            highest_phase: record.highest_phase,
            transition,
            metrics,
            rewards: Vec::new(),
            deferred_rewards: 0,
        };
        if !record.manual_override {
            self.grant_rewards(&record, at, &mut evaluation).await;
        }
        Ok(evaluation)
    }

    /// Grant outstanding one-time rewards for phases `1..=current` and the
    /// current phase's monthly reward for the bucket of `at`.
    async fn grant_rewards(
        &self,
        record: &PhaseRecord,
        at: DateTime<Utc>,
        evaluation: &mut PhaseEvaluation,
    ) {
        let member = &record.member_id;

        for phase in 1..=record.current_phase {
            if record.is_granted(phase) {
                continue;
            }
            let Some(level) = self.config.level_or_warn(phase) else {
                continue;
            };
            let (credit_cents, free_product_cents) = level.reward_amounts(RewardSchedule::OneTime);
            let grant = RewardGrant {
                phase,
                schedule: RewardSchedule::OneTime,
                period: ONE_TIME_PERIOD.to_string(),
                credit_cents,
                free_product_cents,
            };
            match self.store.grant_one_time_reward(member, &grant, at).await {
                Ok(true) => self.record_grant(member, grant, evaluation),
                Ok(false) => {}
                Err(e) => {
                    warn!(
                        member = %member,
                        phase,
                        error = %e,
                        "One-time reward grant failed; will retry"
                    );
                    evaluation.deferred_rewards += 1;
                }
            }
        }

        if record.current_phase == 0 {
            return;
        }
        let Some(level) = self.config.level(record.current_phase) else {
            return;
        };
        let (credit_cents, free_product_cents) = level.reward_amounts(RewardSchedule::Monthly);
        if credit_cents == 0 && free_product_cents == 0 {
            return;
        }
        let grant = RewardGrant {
            phase: record.current_phase,
            schedule: RewardSchedule::Monthly,
            period: period_bucket(at),
            credit_cents,
            free_product_cents,
        };
        match self.store.grant_periodic_reward(member, &grant, at).await {
            Ok(true) => self.record_grant(member, grant, evaluation),
            Ok(false) => {}
            Err(e) => {
                warn!(
                    member = %member,
                    phase = grant.phase,
                    period = %grant.period,
                    error = %e,
                    "Monthly reward grant failed; will retry"
                );
                evaluation.deferred_rewards += 1;
            }
        }
    }

    fn record_grant(
        &self,
        member: &MemberId,
        grant: RewardGrant,
        evaluation: &mut PhaseEvaluation,
    ) {
        info!(
            member = %member,
            phase = grant.phase,
            schedule = %grant.schedule,
            period = %grant.period,
            credit_cents = grant.credit_cents,
            free_product_cents = grant.free_product_cents,
            "Phase reward granted"
        );
        self.notify(Notification::RewardGranted {
            member: member.clone(),
            phase: grant.phase,
            period: grant.period.clone(),
            credit_cents: grant.credit_cents,
            free_product_cents: grant.free_product_cents,
        });
        evaluation.rewards.push(grant);
    }

    /// Evaluate every ancestor within `team_depth` levels of `member`.
    ///
    /// Per-ancestor failures are logged and skipped; the result lists the
    /// evaluations that completed.
    pub async fn evaluate_ancestors(
        &self,
        member: &MemberId,
    ) -> Result<Vec<PhaseEvaluation>, PhaseError> {
        self.evaluate_ancestors_at(member, Utc::now()).await
    }

    pub async fn evaluate_ancestors_at(
        &self,
        member: &MemberId,
        at: DateTime<Utc>,
    ) -> Result<Vec<PhaseEvaluation>, PhaseError> {
        let upline = self
            .upline
            .walk(member, usize::from(self.config.team_depth))
            .await?;

        let mut evaluations = Vec::with_capacity(upline.ancestors.len());
        for ancestor in &upline.ancestors {
            match self.evaluate_at(&ancestor.member.id, at).await {
                Ok(evaluation) => evaluations.push(evaluation),
                Err(e) => warn!(
                    member = %member,
                    ancestor = %ancestor.member.id,
                    error = %e,
                    "Ancestor phase evaluation failed"
                ),
            }
        }
        Ok(evaluations)
    }

    /// Evaluate every member, granting the monthly rewards of the current
    /// period to members whose teams did not change.
    pub async fn evaluate_all(&self) -> Result<PhaseSweepReport, PhaseError> {
        self.evaluate_all_at(Utc::now()).await
    }

    /// Each member is independent; one failure does not stop the sweep.
    pub async fn evaluate_all_at(&self, at: DateTime<Utc>) -> Result<PhaseSweepReport, PhaseError> {
        let members = self.store.member_ids().await?;
        let mut report = PhaseSweepReport::default();

        for member in members {
            report.examined += 1;
            match self.evaluate_at(&member, at).await {
                Ok(evaluation) => {
                    match evaluation.transition {
                        PhaseTransition::Promoted => report.promoted += 1,
                        PhaseTransition::Demoted => report.demoted += 1,
                        PhaseTransition::Frozen => report.frozen += 1,
                        PhaseTransition::Unchanged | PhaseTransition::Contended => {}
                    }
                    report.rewards_granted += evaluation.rewards.len();
                    report.deferred_rewards += evaluation.deferred_rewards;
                }
                Err(e) => {
                    warn!(member = %member, error = %e, "Scheduled phase evaluation failed");
                    report.errors += 1;
                }
            }
        }

        info!(
            examined = report.examined,
            promoted = report.promoted,
            demoted = report.demoted,
            frozen = report.frozen,
            rewards_granted = report.rewards_granted,
            deferred_rewards = report.deferred_rewards,
            errors = report.errors,
            period = %period_bucket(at),
            "Phase sweep finished"
        );
        Ok(report)
    }

    fn notify(&self, notification: Notification) {
        if let Some(notifier) = &self.notifier {
            dispatch(notifier, notification);
        }
    }
}
