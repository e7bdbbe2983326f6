//! Phase progression step definitions.

use std::sync::Arc;

use cucumber::{given, then, when, World};

use mlm_settlement::config::PhaseConfig;
use mlm_settlement::model::{
    Account, Gateway, MemberId, Subscription, SubscriptionKind, SubscriptionStatus,
};
use mlm_settlement::phase::{PhaseEngine, PhaseEvaluation, PhaseTransition};
use mlm_settlement::upline::register_member;

use crate::backend::{StorageBackend, StorageContext};

/// Test context for phase scenarios.
#[derive(World)]
#[world(init = Self::new)]
pub struct PhaseWorld {
    backend: StorageBackend,
    context: Option<StorageContext>,
    engine: Option<PhaseEngine>,
    last_evaluation: Option<PhaseEvaluation>,
}

impl std::fmt::Debug for PhaseWorld {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhaseWorld")
            .field("backend", &self.backend)
            .field("context", &self.context)
            .field("last_evaluation", &self.last_evaluation)
            .finish_non_exhaustive()
    }
}

impl PhaseWorld {
    fn new() -> Self {
        Self {
            backend: StorageBackend::from_env(),
            context: None,
            engine: None,
            last_evaluation: None,
        }
    }

    fn context(&self) -> &StorageContext {
        self.context
            .as_ref()
            .expect("Storage context not initialized")
    }

    fn engine(&self) -> &PhaseEngine {
        self.engine.as_ref().expect("Engine not initialized")
    }

    async fn activate(&self, id: &str) {
        self.context()
            .store
            .upsert_subscription(&Subscription {
                member_id: MemberId::from(id),
                kind: SubscriptionKind::Mlm,
                status: SubscriptionStatus::Active,
                current_period_end: None,
                gateway: Some(Gateway::Stripe),
                plan: None,
                cancel_at_period_end: false,
            })
            .await
            .expect("Failed to save subscription");
    }

    async fn evaluate(&mut self, id: &str) {
        let evaluation = self
            .engine()
            .evaluate(&MemberId::from(id))
            .await
            .expect("Evaluation failed");
        self.last_evaluation = Some(evaluation);
    }
}

// --- Background ---

#[given("a phase backend")]
async fn given_phase_backend(world: &mut PhaseWorld) {
    println!("Using backend: {}", world.backend.name());
    let ctx = StorageContext::new(world.backend).await;
    world.engine = Some(PhaseEngine::new(
        Arc::clone(&ctx.store),
        Arc::new(PhaseConfig::default()),
    ));
    world.context = Some(ctx);
}

// --- Given steps ---

#[given(expr = "a sponsor {string} with {int} active direct referrals")]
async fn given_sponsor_with_referrals(world: &mut PhaseWorld, id: String, count: usize) {
    let store = world.context().store.clone();
    register_member(store.as_ref(), MemberId::from(id.as_str()), None)
        .await
        .expect("Failed to register sponsor");
    for n in 1..=count {
        let referral = format!("{id}_ref{n}");
        register_member(
            store.as_ref(),
            MemberId::from(referral.as_str()),
            Some(MemberId::from(id.as_str())),
        )
        .await
        .expect("Failed to register referral");
        world.activate(&referral).await;
    }
}

#[given(expr = "{string} is manually pinned to phase {int}")]
async fn given_pinned(world: &mut PhaseWorld, id: String, phase: u8) {
    world
        .context()
        .store
        .set_manual_phase(&MemberId::from(id.as_str()), phase, chrono::Utc::now())
        .await
        .expect("Failed to pin phase");
}

// --- When steps ---

#[when(expr = "{string} is evaluated")]
async fn when_evaluated(world: &mut PhaseWorld, id: String) {
    world.evaluate(&id).await;
}

#[when(expr = "{string} is evaluated {int} times at once")]
async fn when_evaluated_concurrently(world: &mut PhaseWorld, id: String, times: usize) {
    let member = MemberId::from(id.as_str());
    let engine = world.engine().clone();
    let results = futures::future::join_all((0..times).map(|_| engine.evaluate(&member))).await;
    for result in results {
        world.last_evaluation = Some(result.expect("Evaluation failed"));
    }
}

// --- Then steps ---

#[then(expr = "{string} is at phase {int}")]
async fn then_at_phase(world: &mut PhaseWorld, id: String, phase: u8) {
    let record = world
        .context()
        .store
        .phase_record(&MemberId::from(id.as_str()))
        .await
        .expect("Failed to read phase")
        .expect("No phase record");
    assert_eq!(record.current_phase, phase);
}

#[then(expr = "the evaluation was {word}")]
async fn then_transition(world: &mut PhaseWorld, transition: String) {
    let evaluation = world.last_evaluation.as_ref().expect("No evaluation");
    let expected = match transition.as_str() {
        "promoted" => PhaseTransition::Promoted,
        "demoted" => PhaseTransition::Demoted,
        "unchanged" => PhaseTransition::Unchanged,
        "frozen" => PhaseTransition::Frozen,
        other => panic!("Unknown transition: {other}"),
    };
    assert_eq!(evaluation.transition, expected);
}

#[then(expr = "{string} has {int} cents in the wallet")]
async fn then_wallet(world: &mut PhaseWorld, id: String, cents: i64) {
    let balance = world
        .context()
        .store
        .balance(&MemberId::from(id.as_str()), Account::Wallet)
        .await
        .expect("Failed to read balance");
    assert_eq!(balance.balance_cents, cents);
}

#[then(expr = "{string} was granted {int} reward(s)")]
async fn then_rewards(world: &mut PhaseWorld, id: String, count: usize) {
    let rewards = world
        .context()
        .store
        .rewards_for(&MemberId::from(id.as_str()))
        .await
        .expect("Failed to read rewards");
    assert_eq!(rewards.len(), count);
}
