//! PayoutStore interface tests.
//!
//! These tests verify the contract of the PayoutStore trait.
//! Each storage implementation should run these tests.

use chrono::Utc;
use uuid::Uuid;

use mlm_settlement::model::{
    Account, LedgerDelta, MemberId, Payout, PayoutAccount, PayoutAccountStatus,
    PayoutProviderKind, PayoutSettings, PayoutStatus, TxnReason, TxnReference,
};
use mlm_settlement::storage::{LedgerStore, MemberStore, PayoutStore, StorageError};

use super::fresh_member;

pub fn make_payout(member: &MemberId, amount_cents: i64) -> Payout {
    let now = Utc::now();
    Payout {
        id: Uuid::new_v4(),
        member_id: member.clone(),
        provider: PayoutProviderKind::Stripe,
        provider_account_id: format!("acct_{member}"),
        amount_cents,
        status: PayoutStatus::Pending,
        provider_reference: None,
        failure_reason: None,
        created_at: now,
        updated_at: now,
    }
}

async fn fund<S: LedgerStore + ?Sized>(store: &S, member: &MemberId, cents: i64) {
    store
        .apply_delta(
            &LedgerDelta::credit(
                Account::NetworkEarnings,
                member.clone(),
                cents,
                TxnReason::Commission,
            )
            .with_reference(TxnReference::new("test", Uuid::new_v4().to_string())),
        )
        .await
        .expect("funding should succeed");
}

async fn earnings<S: LedgerStore + ?Sized>(store: &S, member: &MemberId) -> i64 {
    store
        .balance(member, Account::NetworkEarnings)
        .await
        .expect("balance should succeed")
        .balance_cents
}

// =============================================================================
// Settings and account tests
// =============================================================================

pub async fn test_settings_round_trip<S: PayoutStore + MemberStore + ?Sized>(store: &S) {
    let member = fresh_member(store, "payout_settings", None).await;
    assert!(store.payout_settings(&member).await.unwrap().is_none());

    let settings = PayoutSettings {
        member_id: member.clone(),
        auto_payout: true,
        threshold_cents: Some(7_500),
        preferred_provider: Some(PayoutProviderKind::Paypal),
    };
    store.save_payout_settings(&settings).await.unwrap();
    assert_eq!(
        store.payout_settings(&member).await.unwrap(),
        Some(settings.clone())
    );
    assert!(store
        .auto_payout_members()
        .await
        .unwrap()
        .iter()
        .any(|s| s.member_id == member));

    let disabled = PayoutSettings {
        auto_payout: false,
        ..settings
    };
    store.save_payout_settings(&disabled).await.unwrap();
    assert!(!store
        .auto_payout_members()
        .await
        .unwrap()
        .iter()
        .any(|s| s.member_id == member));
}

pub async fn test_account_upsert_replaces<S: PayoutStore + MemberStore + ?Sized>(store: &S) {
    let member = fresh_member(store, "payout_account", None).await;
    let mut account = PayoutAccount {
        member_id: member.clone(),
        provider: PayoutProviderKind::Stripe,
        status: PayoutAccountStatus::Pending,
        provider_account_id: "acct_1".to_string(),
    };
    store.upsert_payout_account(&account).await.unwrap();

    account.status = PayoutAccountStatus::Active;
    store.upsert_payout_account(&account).await.unwrap();

    let accounts = store.payout_accounts(&member).await.unwrap();
    assert_eq!(accounts, vec![account]);
}

// =============================================================================
// Payout state machine tests
// =============================================================================

pub async fn test_begin_debits_earnings<
    S: PayoutStore + LedgerStore + MemberStore + ?Sized,
>(
    store: &S,
) {
    let member = fresh_member(store, "payout_begin", None).await;
    fund(store, &member, 8_000).await;

    let payout = make_payout(&member, 6_000);
    let remaining = store.begin_payout(&payout).await.expect("begin should succeed");

    assert_eq!(remaining, 2_000);
    assert_eq!(earnings(store, &member).await, 2_000);
    let stored = store.get_payout(payout.id).await.unwrap().expect("payout row");
    assert_eq!(stored.status, PayoutStatus::Pending);
    assert_eq!(stored.amount_cents, 6_000);
    assert!(store
        .pending_payouts()
        .await
        .unwrap()
        .iter()
        .any(|p| p.id == payout.id));
}

pub async fn test_begin_insufficient_funds_writes_nothing<
    S: PayoutStore + LedgerStore + MemberStore + ?Sized,
>(
    store: &S,
) {
    let member = fresh_member(store, "payout_poor", None).await;
    fund(store, &member, 1_000).await;

    let payout = make_payout(&member, 6_000);
    let result = store.begin_payout(&payout).await;

    assert!(matches!(result, Err(StorageError::InsufficientFunds { .. })));
    assert!(store.get_payout(payout.id).await.unwrap().is_none());
    assert_eq!(earnings(store, &member).await, 1_000);
}

pub async fn test_one_pending_payout_per_member<
    S: PayoutStore + LedgerStore + MemberStore + ?Sized,
>(
    store: &S,
) {
    let member = fresh_member(store, "payout_pending", None).await;
    fund(store, &member, 20_000).await;

    store.begin_payout(&make_payout(&member, 6_000)).await.unwrap();
    let second = store.begin_payout(&make_payout(&member, 6_000)).await;

    assert!(matches!(second, Err(StorageError::AlreadyExists { .. })));
    assert_eq!(earnings(store, &member).await, 14_000);
    assert_eq!(store.payouts_for(&member).await.unwrap().len(), 1);
}

pub async fn test_complete_is_terminal<S: PayoutStore + LedgerStore + MemberStore + ?Sized>(
    store: &S,
) {
    let member = fresh_member(store, "payout_complete", None).await;
    fund(store, &member, 6_000).await;
    let payout = make_payout(&member, 6_000);
    store.begin_payout(&payout).await.unwrap();

    let completed = store
        .complete_payout(payout.id, "tr_123", Utc::now())
        .await
        .expect("complete should succeed");
    assert_eq!(completed.status, PayoutStatus::Completed);
    assert_eq!(completed.provider_reference.as_deref(), Some("tr_123"));

    let fail = store.fail_payout(payout.id, "late", Utc::now()).await;
    assert!(matches!(fail, Err(StorageError::InvalidTransition { .. })));
    assert_eq!(earnings(store, &member).await, 0);

    // A completed payout no longer blocks the next one.
    fund(store, &member, 5_000).await;
    store.begin_payout(&make_payout(&member, 5_000)).await.unwrap();
}

pub async fn test_fail_reverses_debit_once<S: PayoutStore + LedgerStore + MemberStore + ?Sized>(
    store: &S,
) {
    let member = fresh_member(store, "payout_fail", None).await;
    fund(store, &member, 9_000).await;
    let payout = make_payout(&member, 9_000);
    store.begin_payout(&payout).await.unwrap();
    assert_eq!(earnings(store, &member).await, 0);

    let failed = store
        .fail_payout(payout.id, "account closed", Utc::now())
        .await
        .expect("fail should succeed");
    assert_eq!(failed.status, PayoutStatus::Failed);
    assert_eq!(failed.failure_reason.as_deref(), Some("account closed"));
    assert_eq!(earnings(store, &member).await, 9_000);

    let again = store.fail_payout(payout.id, "account closed", Utc::now()).await;
    assert!(matches!(again, Err(StorageError::InvalidTransition { .. })));
    assert_eq!(earnings(store, &member).await, 9_000);

    let txns = store
        .transactions(&member, Account::NetworkEarnings)
        .await
        .unwrap();
    let reasons: Vec<TxnReason> = txns.iter().map(|t| t.reason).collect();
    assert_eq!(
        reasons,
        vec![TxnReason::Commission, TxnReason::Payout, TxnReason::PayoutReversal]
    );
    assert_eq!(
        store
            .derived_balance(&member, Account::NetworkEarnings)
            .await
            .unwrap(),
        9_000
    );
}

pub async fn test_unknown_payout_not_found<S: PayoutStore + ?Sized>(store: &S) {
    let result = store.complete_payout(Uuid::new_v4(), "tr", Utc::now()).await;
    assert!(matches!(result, Err(StorageError::NotFound { .. })));
}

// =============================================================================
// Test runner macro
// =============================================================================

/// Run all PayoutStore interface tests against a store implementation.
#[macro_export]
macro_rules! run_payout_store_tests {
    ($store:expr) => {
        use $crate::store::payout_store_tests::*;

        // settings and accounts
        test_settings_round_trip($store).await;
        println!("  test_settings_round_trip: PASSED");

        test_account_upsert_replaces($store).await;
        println!("  test_account_upsert_replaces: PASSED");

        // state machine
        test_begin_debits_earnings($store).await;
        println!("  test_begin_debits_earnings: PASSED");

        test_begin_insufficient_funds_writes_nothing($store).await;
        println!("  test_begin_insufficient_funds_writes_nothing: PASSED");

        test_one_pending_payout_per_member($store).await;
        println!("  test_one_pending_payout_per_member: PASSED");

        test_complete_is_terminal($store).await;
        println!("  test_complete_is_terminal: PASSED");

        test_fail_reverses_debit_once($store).await;
        println!("  test_fail_reverses_debit_once: PASSED");

        test_unknown_payout_not_found($store).await;
        println!("  test_unknown_payout_not_found: PASSED");
    };
}
