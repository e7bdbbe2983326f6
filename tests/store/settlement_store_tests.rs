//! SettlementStore interface tests.
//!
//! These tests verify the contract of the SettlementStore trait.
//! Each storage implementation should run these tests.

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use mlm_settlement::model::{
    Account, CommissionEvent, CommissionKind, Gateway, LedgerDelta, MemberId, PaymentIntent,
    ProcessedPayment, Subscription, SubscriptionKind, SubscriptionStatus, TxnReason,
    TxnReference,
};
use mlm_settlement::storage::{
    CommitOutcome, LedgerStore, MemberStore, SettlementBatch, SettlementStore, StorageError,
    SubscriptionRenewal,
};

use super::fresh_member;

/// A unique Stripe payment reference.
pub fn make_origin() -> TxnReference {
    TxnReference::gateway(Gateway::Stripe, format!("pi_{}", Uuid::new_v4().simple()))
}

pub fn make_commission(
    origin: &TxnReference,
    payer: &MemberId,
    recipient: &MemberId,
    level: u8,
    amount_cents: i64,
) -> CommissionEvent {
    CommissionEvent {
        origin: origin.clone(),
        payer_id: payer.clone(),
        recipient_id: recipient.clone(),
        kind: CommissionKind::Upline,
        level,
        amount_cents,
        rate: Decimal::new(15, 2),
    }
}

pub fn make_batch(origin: &TxnReference, buyer: &MemberId, intent: PaymentIntent) -> SettlementBatch {
    SettlementBatch {
        payment: ProcessedPayment {
            origin: origin.clone(),
            buyer_id: buyer.clone(),
            amount_cents: 10_000,
            intent,
            processed_at: Utc::now(),
        },
        commissions: Vec::new(),
        subscription: None,
        wallet_credit: None,
    }
}

fn checkout() -> PaymentIntent {
    PaymentIntent::Checkout { affiliate_id: None }
}

async fn earnings<S: LedgerStore + ?Sized>(store: &S, member: &MemberId) -> i64 {
    store
        .balance(member, Account::NetworkEarnings)
        .await
        .expect("balance should succeed")
        .balance_cents
}

// =============================================================================
// SettlementStore::commit_settlement tests
// =============================================================================

pub async fn test_commit_records_claim_and_credits<
    S: SettlementStore + LedgerStore + MemberStore + ?Sized,
>(
    store: &S,
) {
    let sponsor = fresh_member(store, "settle_sponsor", None).await;
    let buyer = fresh_member(store, "settle_buyer", Some(&sponsor)).await;
    let origin = make_origin();

    let mut batch = make_batch(&origin, &buyer, checkout());
    batch.commissions = vec![make_commission(&origin, &buyer, &sponsor, 1, 1_500)];

    assert!(!store.is_processed(&origin).await.unwrap());
    let outcome = store
        .commit_settlement(&batch)
        .await
        .expect("commit should succeed");

    let CommitOutcome::Applied(applied) = outcome else {
        panic!("expected Applied");
    };
    assert_eq!(applied.credited.len(), 1);
    assert_eq!(applied.skipped_duplicates, 0);
    assert!(applied.renewal.is_none());
    assert!(store.is_processed(&origin).await.unwrap());
    assert_eq!(earnings(store, &sponsor).await, 1_500);

    let claim = store
        .processed_payment(&origin)
        .await
        .unwrap()
        .expect("claim should exist");
    assert_eq!(claim.buyer_id, buyer);
    assert_eq!(claim.amount_cents, 10_000);
    assert_eq!(claim.intent, checkout());

    let events = store.commission_events(&origin).await.unwrap();
    assert_eq!(events, batch.commissions);
}

pub async fn test_second_commit_is_already_processed<
    S: SettlementStore + LedgerStore + MemberStore + ?Sized,
>(
    store: &S,
) {
    let sponsor = fresh_member(store, "settle_dup_sponsor", None).await;
    let buyer = fresh_member(store, "settle_dup_buyer", Some(&sponsor)).await;
    let origin = make_origin();

    let mut batch = make_batch(&origin, &buyer, checkout());
    batch.commissions = vec![make_commission(&origin, &buyer, &sponsor, 1, 1_500)];

    store.commit_settlement(&batch).await.unwrap();
    let replay = store.commit_settlement(&batch).await.unwrap();

    assert_eq!(replay, CommitOutcome::AlreadyProcessed);
    assert_eq!(earnings(store, &sponsor).await, 1_500);
    assert_eq!(store.commission_events(&origin).await.unwrap().len(), 1);
}

pub async fn test_failed_commit_rolls_back_claim<
    S: SettlementStore + LedgerStore + MemberStore + ?Sized,
>(
    store: &S,
) {
    let sponsor = fresh_member(store, "settle_rb_sponsor", None).await;
    let buyer = fresh_member(store, "settle_rb_buyer", Some(&sponsor)).await;
    let origin = make_origin();

    // The wallet debit overdraws, so the whole batch must fail.
    let mut batch = make_batch(&origin, &buyer, checkout());
    batch.commissions = vec![make_commission(&origin, &buyer, &sponsor, 1, 1_500)];
    batch.wallet_credit = Some(
        LedgerDelta::debit(Account::Wallet, buyer.clone(), 10_000, TxnReason::WalletPurchase)
            .with_reference(origin.clone()),
    );

    let result = store.commit_settlement(&batch).await;
    assert!(matches!(result, Err(StorageError::InsufficientFunds { .. })));
    assert!(!store.is_processed(&origin).await.unwrap());
    assert!(store.commission_events(&origin).await.unwrap().is_empty());
    assert_eq!(earnings(store, &sponsor).await, 0);

    // A corrected batch for the same payment goes through.
    batch.wallet_credit = None;
    let retry = store.commit_settlement(&batch).await.unwrap();
    assert!(matches!(retry, CommitOutcome::Applied(_)));
    assert_eq!(earnings(store, &sponsor).await, 1_500);
}

pub async fn test_wallet_credit_applied_with_claim<
    S: SettlementStore + LedgerStore + MemberStore + ?Sized,
>(
    store: &S,
) {
    let buyer = fresh_member(store, "settle_wallet", None).await;
    let origin = make_origin();

    let mut batch = make_batch(&origin, &buyer, PaymentIntent::WalletRecharge);
    batch.wallet_credit = Some(
        LedgerDelta::credit(Account::Wallet, buyer.clone(), 10_000, TxnReason::WalletRecharge)
            .with_reference(origin.clone()),
    );

    let CommitOutcome::Applied(applied) = store.commit_settlement(&batch).await.unwrap() else {
        panic!("expected Applied");
    };
    assert_eq!(applied.wallet_balance_cents, Some(10_000));
    assert_eq!(
        store.balance(&buyer, Account::Wallet).await.unwrap().balance_cents,
        10_000
    );
}

pub async fn test_renewal_activates_and_cancels_other_kind<
    S: SettlementStore + LedgerStore + MemberStore + ?Sized,
>(
    store: &S,
) {
    let buyer = fresh_member(store, "settle_renew", None).await;
    store
        .upsert_subscription(&Subscription {
            member_id: buyer.clone(),
            kind: SubscriptionKind::Affiliate,
            status: SubscriptionStatus::Active,
            current_period_end: Some(Utc::now() + Duration::days(5)),
            gateway: Some(Gateway::Stripe),
            plan: None,
            cancel_at_period_end: false,
        })
        .await
        .unwrap();

    let origin = make_origin();
    let mut batch = make_batch(
        &origin,
        &buyer,
        PaymentIntent::Subscription {
            subscription_type: SubscriptionKind::Mlm,
            plan: Some("monthly".to_string()),
        },
    );
    batch.subscription = Some(SubscriptionRenewal {
        kind: SubscriptionKind::Mlm,
        plan: Some("monthly".to_string()),
        gateway: Gateway::Stripe,
        period_end: None,
        default_period_days: 30,
    });

    let CommitOutcome::Applied(applied) = store.commit_settlement(&batch).await.unwrap() else {
        panic!("expected Applied");
    };
    let renewal = applied.renewal.expect("renewal outcome");
    assert_eq!(renewal.previous_status, None);
    assert!(renewal.canceled_other);
    assert!(renewal.period_end > Utc::now() + Duration::days(29));

    let mlm = store
        .subscription(&buyer, SubscriptionKind::Mlm)
        .await
        .unwrap()
        .expect("mlm subscription");
    assert_eq!(mlm.status, SubscriptionStatus::Active);
    assert_eq!(mlm.plan.as_deref(), Some("monthly"));

    let affiliate = store
        .subscription(&buyer, SubscriptionKind::Affiliate)
        .await
        .unwrap()
        .expect("affiliate subscription");
    assert_eq!(affiliate.status, SubscriptionStatus::Canceled);

    let snapshot = store.member_snapshot(&buyer).await.unwrap().unwrap();
    assert!(snapshot.active);
}

// =============================================================================
// SettlementStore::record_missing_commissions tests
// =============================================================================

pub async fn test_record_missing_skips_existing_keys<
    S: SettlementStore + LedgerStore + MemberStore + ?Sized,
>(
    store: &S,
) {
    let upper = fresh_member(store, "settle_repair_upper", None).await;
    let sponsor = fresh_member(store, "settle_repair_sponsor", Some(&upper)).await;
    let buyer = fresh_member(store, "settle_repair_buyer", Some(&sponsor)).await;
    let origin = make_origin();

    let level1 = make_commission(&origin, &buyer, &sponsor, 1, 1_500);
    let level2 = make_commission(&origin, &buyer, &upper, 2, 3_000);

    let mut batch = make_batch(&origin, &buyer, checkout());
    batch.commissions = vec![level1.clone()];
    store.commit_settlement(&batch).await.unwrap();

    let applied = store
        .record_missing_commissions(&[level1.clone(), level2.clone()])
        .await
        .expect("repair should succeed");
    assert_eq!(applied, vec![level2.clone()]);

    let again = store
        .record_missing_commissions(&[level1, level2])
        .await
        .unwrap();
    assert!(again.is_empty());

    assert_eq!(earnings(store, &sponsor).await, 1_500);
    assert_eq!(earnings(store, &upper).await, 3_000);
    assert_eq!(store.commission_events(&origin).await.unwrap().len(), 2);
    assert_eq!(
        store.commissions_for_recipient(&upper).await.unwrap().len(),
        1
    );
}

pub async fn test_duplicate_keys_in_batch_are_skipped<
    S: SettlementStore + LedgerStore + MemberStore + ?Sized,
>(
    store: &S,
) {
    let sponsor = fresh_member(store, "settle_batchdup_sponsor", None).await;
    let buyer = fresh_member(store, "settle_batchdup_buyer", Some(&sponsor)).await;
    let origin = make_origin();
    let event = make_commission(&origin, &buyer, &sponsor, 1, 1_500);

    let mut batch = make_batch(&origin, &buyer, checkout());
    batch.commissions = vec![event.clone(), event];

    let CommitOutcome::Applied(applied) = store.commit_settlement(&batch).await.unwrap() else {
        panic!("expected Applied");
    };
    assert_eq!(applied.credited.len(), 1);
    assert_eq!(applied.skipped_duplicates, 1);
    assert_eq!(earnings(store, &sponsor).await, 1_500);
}

pub async fn test_taken_credit_reference_fails_commit<
    S: SettlementStore + LedgerStore + MemberStore + ?Sized,
>(
    store: &S,
) {
    let sponsor = fresh_member(store, "settle_ref_sponsor", None).await;
    let buyer = fresh_member(store, "settle_ref_buyer", Some(&sponsor)).await;
    let origin = make_origin();
    let event = make_commission(&origin, &buyer, &sponsor, 1, 1_500);

    // Occupy the credit's reference so the fresh event cannot be paid.
    store
        .apply_delta(
            &LedgerDelta::credit(
                Account::NetworkEarnings,
                sponsor.clone(),
                100,
                TxnReason::AdminAdjustment,
            )
            .with_reference(event.ledger_reference()),
        )
        .await
        .unwrap();

    let mut batch = make_batch(&origin, &buyer, checkout());
    batch.commissions = vec![event];
    let result = store.commit_settlement(&batch).await;

    assert!(
        matches!(result, Err(StorageError::ReferenceConflict(_))),
        "expected ReferenceConflict, got {result:?}"
    );
    assert!(!store.is_processed(&origin).await.unwrap());
    assert!(store.commission_events(&origin).await.unwrap().is_empty());
    assert_eq!(earnings(store, &sponsor).await, 100);
}

// =============================================================================
// Test runner macro
// =============================================================================

/// Run all SettlementStore interface tests against a store implementation.
#[macro_export]
macro_rules! run_settlement_store_tests {
    ($store:expr) => {
        use $crate::store::settlement_store_tests::*;

        // commit_settlement tests
        test_commit_records_claim_and_credits($store).await;
        println!("  test_commit_records_claim_and_credits: PASSED");

        test_second_commit_is_already_processed($store).await;
        println!("  test_second_commit_is_already_processed: PASSED");

        test_failed_commit_rolls_back_claim($store).await;
        println!("  test_failed_commit_rolls_back_claim: PASSED");

        test_wallet_credit_applied_with_claim($store).await;
        println!("  test_wallet_credit_applied_with_claim: PASSED");

        test_renewal_activates_and_cancels_other_kind($store).await;
        println!("  test_renewal_activates_and_cancels_other_kind: PASSED");

        test_taken_credit_reference_fails_commit($store).await;
        println!("  test_taken_credit_reference_fails_commit: PASSED");

        // record_missing_commissions tests
        test_record_missing_skips_existing_keys($store).await;
        println!("  test_record_missing_skips_existing_keys: PASSED");

        test_duplicate_keys_in_batch_are_skipped($store).await;
        println!("  test_duplicate_keys_in_batch_are_skipped: PASSED");
    };
}
