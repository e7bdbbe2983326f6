//! Payment settlement step definitions.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use cucumber::{given, then, when, World};
use futures::future::join_all;

use mlm_settlement::config::{PhaseConfig, SettlementConfig};
use mlm_settlement::model::{
    Account, Gateway, MemberId, PaymentIntent, Subscription, SubscriptionKind,
    SubscriptionStatus, TxnReference,
};
use mlm_settlement::settlement::{
    SettlementCommand, SettlementError, SettlementReceipt, SettlementService,
};
use mlm_settlement::upline::register_member;

use crate::backend::{StorageBackend, StorageContext};

/// Test context for settlement scenarios.
#[derive(World)]
#[world(init = Self::new)]
pub struct SettlementWorld {
    backend: StorageBackend,
    context: Option<StorageContext>,
    service: Option<SettlementService>,
    commands: HashMap<String, SettlementCommand>,
    last_command: Option<SettlementCommand>,
    receipts: Vec<SettlementReceipt>,
    last_error: Option<SettlementError>,
}

impl std::fmt::Debug for SettlementWorld {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettlementWorld")
            .field("backend", &self.backend)
            .field("context", &self.context)
            .field("receipts", &self.receipts.len())
            .field("last_error", &self.last_error)
            .finish_non_exhaustive()
    }
}

impl SettlementWorld {
    fn new() -> Self {
        Self {
            backend: StorageBackend::from_env(),
            context: None,
            service: None,
            commands: HashMap::new(),
            last_command: None,
            receipts: Vec::new(),
            last_error: None,
        }
    }

    fn context(&self) -> &StorageContext {
        self.context
            .as_ref()
            .expect("Storage context not initialized")
    }

    fn service(&self) -> &SettlementService {
        self.service.as_ref().expect("Service not initialized")
    }

    async fn join(&self, id: &str, sponsor: Option<&str>) {
        register_member(
            self.context().store.as_ref(),
            MemberId::from(id),
            sponsor.map(MemberId::from),
        )
        .await
        .expect("Failed to register member");
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
            .expect("Failed to activate member");
    }

    async fn settle(&mut self, command: SettlementCommand) {
        self.last_command = Some(command.clone());
        let result = self.service().handle_confirmed_payment(command).await;
        match result {
            Ok(receipt) => {
                self.receipts.push(receipt);
                self.last_error = None;
            }
            Err(e) => self.last_error = Some(e),
        }
    }

    async fn balance(&self, member: &str, account: Account) -> i64 {
        self.context()
            .store
            .balance(&MemberId::from(member), account)
            .await
            .expect("Failed to read balance")
            .balance_cents
    }

    fn origin(&self, gateway_ref: &str) -> TxnReference {
        self.commands
            .get(gateway_ref)
            .map(|c| c.origin.clone())
            .unwrap_or_else(|| TxnReference::gateway(Gateway::Stripe, gateway_ref))
    }
}

fn intent_for(kind: &str) -> PaymentIntent {
    match kind {
        "subscription" => PaymentIntent::Subscription {
            subscription_type: SubscriptionKind::Mlm,
            plan: None,
        },
        "recharge" => PaymentIntent::WalletRecharge,
        "checkout" => PaymentIntent::Checkout { affiliate_id: None },
        other => panic!("Unknown payment kind: {other}"),
    }
}

// --- Background ---

#[given("a settlement backend")]
async fn given_settlement_backend(world: &mut SettlementWorld) {
    println!("Using backend: {}", world.backend.name());
    let ctx = StorageContext::new(world.backend).await;
    world.service = Some(SettlementService::new(
        Arc::clone(&ctx.store),
        Arc::new(PhaseConfig::default()),
        SettlementConfig::default(),
    ));
    world.context = Some(ctx);
}

// --- Given steps ---

#[given(expr = "a root member {string}")]
async fn given_root_member(world: &mut SettlementWorld, id: String) {
    world.join(&id, None).await;
}

#[given(expr = "a member {string} sponsored by {string}")]
async fn given_member(world: &mut SettlementWorld, id: String, sponsor: String) {
    world.join(&id, Some(&sponsor)).await;
}

#[given(expr = "an active member {string} sponsored by {string} at phase {int}")]
async fn given_active_member_at_phase(
    world: &mut SettlementWorld,
    id: String,
    sponsor: String,
    phase: u8,
) {
    world.join(&id, Some(&sponsor)).await;
    world.activate(&id).await;
    world
        .context()
        .store
        .set_manual_phase(&MemberId::from(id.as_str()), phase, Utc::now())
        .await
        .expect("Failed to set phase");
}

#[given("the store fails right after claiming a payment")]
async fn given_store_fails(world: &mut SettlementWorld) {
    world.context().fail_settlement_after_claim(true).await;
}

#[given(expr = "a {int} cent {word} payment {string} for {string}")]
async fn given_payment(
    world: &mut SettlementWorld,
    amount_cents: i64,
    kind: String,
    gateway_ref: String,
    buyer: String,
) {
    let command = SettlementCommand::new(
        Gateway::Stripe,
        gateway_ref.as_str(),
        MemberId::from(buyer.as_str()),
        amount_cents,
        intent_for(&kind),
    );
    world.commands.insert(gateway_ref, command);
}

// --- When steps ---

#[when(expr = "a {int} cent {word} payment {string} is confirmed for {string}")]
async fn when_payment_confirmed(
    world: &mut SettlementWorld,
    amount_cents: i64,
    kind: String,
    gateway_ref: String,
    buyer: String,
) {
    let command = SettlementCommand::new(
        Gateway::Stripe,
        gateway_ref.as_str(),
        MemberId::from(buyer.as_str()),
        amount_cents,
        intent_for(&kind),
    );
    world.commands.insert(gateway_ref, command.clone());
    world.settle(command).await;
}

#[when("the same payment is delivered again")]
async fn when_payment_redelivered(world: &mut SettlementWorld) {
    let command = world
        .last_command
        .clone()
        .expect("No payment delivered yet");
    world.settle(command).await;
}

#[when(expr = "payment {string} is delivered {int} times at once")]
async fn when_payment_delivered_concurrently(
    world: &mut SettlementWorld,
    gateway_ref: String,
    times: usize,
) {
    let command = world
        .commands
        .get(&gateway_ref)
        .cloned()
        .expect("Unknown payment");
    let service = world.service().clone();
    let results = join_all(
        (0..times).map(|_| service.handle_confirmed_payment(command.clone())),
    )
    .await;
    for result in results {
        world
            .receipts
            .push(result.expect("Concurrent delivery failed"));
    }
}

#[when("the store recovers")]
async fn when_store_recovers(world: &mut SettlementWorld) {
    world.context().fail_settlement_after_claim(false).await;
}

// --- Then steps ---

#[then(expr = "{string} has {int} cents of network earnings")]
async fn then_earnings(world: &mut SettlementWorld, member: String, cents: i64) {
    assert_eq!(world.balance(&member, Account::NetworkEarnings).await, cents);
}

#[then(expr = "{string} has {int} cents in the wallet")]
async fn then_wallet(world: &mut SettlementWorld, member: String, cents: i64) {
    assert_eq!(world.balance(&member, Account::Wallet).await, cents);
}

#[then("the payment was already processed")]
async fn then_already_processed(world: &mut SettlementWorld) {
    let receipt = world.receipts.last().expect("No receipt");
    assert!(receipt.already_processed);
    assert!(receipt.commissions.is_empty());
}

#[then(expr = "exactly {int} delivery settled the payment")]
async fn then_deliveries_settled(world: &mut SettlementWorld, count: usize) {
    let settled = world
        .receipts
        .iter()
        .filter(|r| !r.already_processed)
        .count();
    assert_eq!(settled, count);
}

#[then("the settlement failed")]
async fn then_settlement_failed(world: &mut SettlementWorld) {
    assert!(
        matches!(world.last_error, Some(SettlementError::Storage(_))),
        "expected a storage failure, got {:?}",
        world.last_error
    );
}

#[then(expr = "payment {string} is not marked processed")]
async fn then_not_processed(world: &mut SettlementWorld, gateway_ref: String) {
    let origin = world.origin(&gateway_ref);
    assert!(!world
        .context()
        .store
        .is_processed(&origin)
        .await
        .expect("Failed to read claim"));
}

#[then(expr = "payment {string} has {int} commission events")]
async fn then_commission_events(world: &mut SettlementWorld, gateway_ref: String, count: usize) {
    let origin = world.origin(&gateway_ref);
    let events = world
        .context()
        .store
        .commission_events(&origin)
        .await
        .expect("Failed to read commission events");
    assert_eq!(events.len(), count);
}
