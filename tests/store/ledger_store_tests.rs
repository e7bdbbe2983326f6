//! LedgerStore interface tests.
//!
//! These tests verify the contract of the LedgerStore trait.
//! Each storage implementation should run these tests.

use uuid::Uuid;

use mlm_settlement::model::{Account, LedgerDelta, MemberId, TxnReason, TxnReference};
use mlm_settlement::storage::{LedgerStore, MemberStore, StorageError};

use super::fresh_member;

fn reference(source: &str) -> TxnReference {
    TxnReference::new(source, Uuid::new_v4().to_string())
}

fn credit(member: &MemberId, account: Account, cents: i64, reason: TxnReason) -> LedgerDelta {
    LedgerDelta::credit(account, member.clone(), cents, reason).with_reference(reference("test"))
}

// =============================================================================
// LedgerStore::apply_delta tests
// =============================================================================

pub async fn test_untouched_balance_is_zero<S: LedgerStore + MemberStore + ?Sized>(store: &S) {
    let member = fresh_member(store, "ledger_zero", None).await;

    let balance = store
        .balance(&member, Account::Wallet)
        .await
        .expect("balance should succeed");
    assert_eq!(balance.balance_cents, 0);
    assert_eq!(balance.lifetime_cents, 0);
}

pub async fn test_apply_delta_updates_balance_and_log<S: LedgerStore + MemberStore + ?Sized>(
    store: &S,
) {
    let member = fresh_member(store, "ledger_apply", None).await;

    let outcome = store
        .apply_delta(&credit(&member, Account::Wallet, 2_500, TxnReason::WalletRecharge))
        .await
        .expect("credit should succeed");
    assert!(outcome.applied);
    assert_eq!(outcome.balance_cents, 2_500);

    store
        .apply_delta(&LedgerDelta::debit(
            Account::Wallet,
            member.clone(),
            1_000,
            TxnReason::WalletPurchase,
        ))
        .await
        .expect("debit should succeed");

    let txns = store
        .transactions(&member, Account::Wallet)
        .await
        .expect("transactions should succeed");
    assert_eq!(txns.len(), 2);
    assert_eq!(txns[0].balance_after_cents, 2_500);
    assert_eq!(txns[1].delta_cents, -1_000);
    assert_eq!(txns[1].balance_after_cents, 1_500);

    let balance = store.balance(&member, Account::Wallet).await.unwrap();
    let derived = store.derived_balance(&member, Account::Wallet).await.unwrap();
    assert_eq!(balance.balance_cents, 1_500);
    assert_eq!(derived, 1_500);
}

pub async fn test_duplicate_reference_is_noop<S: LedgerStore + MemberStore + ?Sized>(store: &S) {
    let member = fresh_member(store, "ledger_dup", None).await;
    let delta = credit(&member, Account::NetworkEarnings, 700, TxnReason::Commission);

    let first = store.apply_delta(&delta).await.expect("first apply");
    let second = store.apply_delta(&delta).await.expect("second apply");

    assert!(first.applied);
    assert!(!second.applied);
    assert_eq!(second.balance_cents, 700);
    let txns = store
        .transactions(&member, Account::NetworkEarnings)
        .await
        .unwrap();
    assert_eq!(txns.len(), 1);
}

pub async fn test_same_reference_on_other_account_applies<
    S: LedgerStore + MemberStore + ?Sized,
>(
    store: &S,
) {
    let member = fresh_member(store, "ledger_acct", None).await;
    let shared = reference("shared");

    let wallet = LedgerDelta::credit(Account::Wallet, member.clone(), 100, TxnReason::WalletRecharge)
        .with_reference(shared.clone());
    let earnings = LedgerDelta::credit(
        Account::NetworkEarnings,
        member.clone(),
        100,
        TxnReason::Commission,
    )
    .with_reference(shared);

    assert!(store.apply_delta(&wallet).await.unwrap().applied);
    assert!(store.apply_delta(&earnings).await.unwrap().applied);
}

pub async fn test_overdraft_rejected_without_writes<S: LedgerStore + MemberStore + ?Sized>(
    store: &S,
) {
    let member = fresh_member(store, "ledger_overdraft", None).await;
    store
        .apply_delta(&credit(&member, Account::Wallet, 300, TxnReason::WalletRecharge))
        .await
        .unwrap();

    let result = store
        .apply_delta(&LedgerDelta::debit(
            Account::Wallet,
            member.clone(),
            301,
            TxnReason::WalletPurchase,
        ))
        .await;

    match result {
        Err(StorageError::InsufficientFunds {
            available,
            requested,
            ..
        }) => {
            assert_eq!(available, 300);
            assert_eq!(requested, 301);
        }
        other => panic!("expected InsufficientFunds, got {other:?}"),
    }
    assert_eq!(
        store.balance(&member, Account::Wallet).await.unwrap().balance_cents,
        300
    );
    assert_eq!(
        store.transactions(&member, Account::Wallet).await.unwrap().len(),
        1
    );
}

pub async fn test_lifetime_counts_only_commissions<S: LedgerStore + MemberStore + ?Sized>(
    store: &S,
) {
    let member = fresh_member(store, "ledger_lifetime", None).await;

    store
        .apply_delta(&credit(&member, Account::NetworkEarnings, 1_000, TxnReason::Commission))
        .await
        .unwrap();
    store
        .apply_delta(&credit(
            &member,
            Account::NetworkEarnings,
            400,
            TxnReason::AffiliateCommission,
        ))
        .await
        .unwrap();
    store
        .apply_delta(&credit(
            &member,
            Account::NetworkEarnings,
            5_000,
            TxnReason::AdminAdjustment,
        ))
        .await
        .unwrap();

    let balance = store
        .balance(&member, Account::NetworkEarnings)
        .await
        .unwrap();
    assert_eq!(balance.balance_cents, 6_400);
    assert_eq!(balance.lifetime_cents, 1_400);
}

// =============================================================================
// LedgerStore::transfer_earnings_to_wallet tests
// =============================================================================

pub async fn test_transfer_moves_both_balances<S: LedgerStore + MemberStore + ?Sized>(store: &S) {
    let member = fresh_member(store, "ledger_transfer", None).await;
    store
        .apply_delta(&credit(&member, Account::NetworkEarnings, 4_000, TxnReason::Commission))
        .await
        .unwrap();

    let transfer_ref = reference("earnings_transfer");
    let outcome = store
        .transfer_earnings_to_wallet(&member, 1_500, &transfer_ref)
        .await
        .expect("transfer should succeed");
    assert!(outcome.applied);
    assert_eq!(outcome.earnings_balance_cents, 2_500);
    assert_eq!(outcome.wallet_balance_cents, 1_500);

    let replay = store
        .transfer_earnings_to_wallet(&member, 1_500, &transfer_ref)
        .await
        .expect("replay should succeed");
    assert!(!replay.applied);
    assert_eq!(replay.earnings_balance_cents, 2_500);
    assert_eq!(replay.wallet_balance_cents, 1_500);
}

pub async fn test_transfer_overdraft_changes_nothing<S: LedgerStore + MemberStore + ?Sized>(
    store: &S,
) {
    let member = fresh_member(store, "ledger_transfer_over", None).await;
    store
        .apply_delta(&credit(&member, Account::NetworkEarnings, 1_000, TxnReason::Commission))
        .await
        .unwrap();

    let result = store
        .transfer_earnings_to_wallet(&member, 1_001, &reference("earnings_transfer"))
        .await;

    assert!(matches!(result, Err(StorageError::InsufficientFunds { .. })));
    assert_eq!(
        store
            .balance(&member, Account::NetworkEarnings)
            .await
            .unwrap()
            .balance_cents,
        1_000
    );
    assert_eq!(
        store.balance(&member, Account::Wallet).await.unwrap().balance_cents,
        0
    );
    assert!(store
        .transactions(&member, Account::Wallet)
        .await
        .unwrap()
        .is_empty());
}

// =============================================================================
// LedgerStore::set_balance tests
// =============================================================================

pub async fn test_set_balance_logs_difference<S: LedgerStore + MemberStore + ?Sized>(store: &S) {
    let member = fresh_member(store, "ledger_set", None).await;
    store
        .apply_delta(&credit(&member, Account::Wallet, 900, TxnReason::WalletRecharge))
        .await
        .unwrap();

    let adjustment = store
        .set_balance(&member, Account::Wallet, 250, &reference("admin"))
        .await
        .expect("set_balance should succeed");

    assert_eq!(adjustment.previous_cents, 900);
    assert_eq!(adjustment.balance_cents, 250);
    assert_eq!(adjustment.delta_cents, -650);
    let txns = store.transactions(&member, Account::Wallet).await.unwrap();
    let last = txns.last().expect("adjustment logged");
    assert_eq!(last.reason, TxnReason::AdminAdjustment);
    assert_eq!(last.delta_cents, -650);
    assert_eq!(
        store.derived_balance(&member, Account::Wallet).await.unwrap(),
        250
    );
}

// =============================================================================
// Test runner macro
// =============================================================================

/// Run all LedgerStore interface tests against a store implementation.
#[macro_export]
macro_rules! run_ledger_store_tests {
    ($store:expr) => {
        use $crate::store::ledger_store_tests::*;

        // apply_delta tests
        test_untouched_balance_is_zero($store).await;
        println!("  test_untouched_balance_is_zero: PASSED");

        test_apply_delta_updates_balance_and_log($store).await;
        println!("  test_apply_delta_updates_balance_and_log: PASSED");

        test_duplicate_reference_is_noop($store).await;
        println!("  test_duplicate_reference_is_noop: PASSED");

        test_same_reference_on_other_account_applies($store).await;
        println!("  test_same_reference_on_other_account_applies: PASSED");

        test_overdraft_rejected_without_writes($store).await;
        println!("  test_overdraft_rejected_without_writes: PASSED");

        test_lifetime_counts_only_commissions($store).await;
        println!("  test_lifetime_counts_only_commissions: PASSED");

        // transfer tests
        test_transfer_moves_both_balances($store).await;
        println!("  test_transfer_moves_both_balances: PASSED");

        test_transfer_overdraft_changes_nothing($store).await;
        println!("  test_transfer_overdraft_changes_nothing: PASSED");

        // set_balance tests
        test_set_balance_logs_difference($store).await;
        println!("  test_set_balance_logs_difference: PASSED");
    };
}
