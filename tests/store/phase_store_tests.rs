//! PhaseStore interface tests.
//!
//! These tests verify the contract of the PhaseStore trait.
//! Each storage implementation should run these tests.

use chrono::{TimeZone, Utc};

use mlm_settlement::model::{
    period_bucket, Account, RewardGrant, RewardSchedule, TxnReason, ONE_TIME_PERIOD,
};
use mlm_settlement::storage::{LedgerStore, MemberStore, PhaseStore};

use super::fresh_member;

pub fn one_time_grant(phase: u8, credit_cents: i64) -> RewardGrant {
    RewardGrant {
        phase,
        schedule: RewardSchedule::OneTime,
        period: ONE_TIME_PERIOD.to_string(),
        credit_cents,
        free_product_cents: 0,
    }
}

pub fn monthly_grant(period: &str) -> RewardGrant {
    RewardGrant {
        phase: 2,
        schedule: RewardSchedule::Monthly,
        period: period.to_string(),
        credit_cents: 0,
        free_product_cents: 3_000,
    }
}

// =============================================================================
// PhaseStore::try_transition tests
// =============================================================================

pub async fn test_unevaluated_member_has_no_record<S: PhaseStore + MemberStore + ?Sized>(
    store: &S,
) {
    let member = fresh_member(store, "phase_none", None).await;

    let record = store.phase_record(&member).await.expect("read should succeed");
    assert!(record.is_none());
}

pub async fn test_transition_is_compare_and_set<S: PhaseStore + MemberStore + ?Sized>(store: &S) {
    let member = fresh_member(store, "phase_cas", None).await;
    let now = Utc::now();

    assert!(store.try_transition(&member, 0, 1, now).await.unwrap());
    // A racing evaluator that also saw phase 0 loses.
    assert!(!store.try_transition(&member, 0, 1, now).await.unwrap());
    assert!(store.try_transition(&member, 1, 2, now).await.unwrap());

    let record = store.phase_record(&member).await.unwrap().expect("record");
    assert_eq!(record.current_phase, 2);
    assert_eq!(record.highest_phase, 2);
    assert!(record.phase2_achieved_at.is_some());
}

pub async fn test_demotion_keeps_highest_phase<S: PhaseStore + MemberStore + ?Sized>(store: &S) {
    let member = fresh_member(store, "phase_demote", None).await;
    let now = Utc::now();

    store.try_transition(&member, 0, 2, now).await.unwrap();
    assert!(store.try_transition(&member, 2, 1, now).await.unwrap());

    let record = store.phase_record(&member).await.unwrap().unwrap();
    assert_eq!(record.current_phase, 1);
    assert_eq!(record.highest_phase, 2);
}

pub async fn test_manual_override_blocks_transitions<S: PhaseStore + MemberStore + ?Sized>(
    store: &S,
) {
    let member = fresh_member(store, "phase_manual", None).await;
    let now = Utc::now();

    let previous = store.set_manual_phase(&member, 3, now).await.unwrap();
    assert_eq!(previous, 0);
    assert!(!store.try_transition(&member, 3, 2, now).await.unwrap());

    let record = store.phase_record(&member).await.unwrap().unwrap();
    assert_eq!(record.current_phase, 3);
    assert!(record.manual_override);

    assert!(store.clear_phase_override(&member).await.unwrap());
    assert!(!store.clear_phase_override(&member).await.unwrap());
    assert!(store.try_transition(&member, 3, 2, now).await.unwrap());
}

// =============================================================================
// Reward grant tests
// =============================================================================

pub async fn test_one_time_reward_granted_once<
    S: PhaseStore + LedgerStore + MemberStore + ?Sized,
>(
    store: &S,
) {
    let member = fresh_member(store, "phase_once", None).await;
    let now = Utc::now();
    store.try_transition(&member, 0, 1, now).await.unwrap();

    let grant = one_time_grant(1, 2_500);
    assert!(store.grant_one_time_reward(&member, &grant, now).await.unwrap());
    assert!(!store.grant_one_time_reward(&member, &grant, now).await.unwrap());

    let record = store.phase_record(&member).await.unwrap().unwrap();
    assert!(record.phase1_granted);
    assert!(!record.phase2_granted);

    let wallet = store.balance(&member, Account::Wallet).await.unwrap();
    assert_eq!(wallet.balance_cents, 2_500);
    assert_eq!(wallet.lifetime_cents, 0);
    let txns = store.transactions(&member, Account::Wallet).await.unwrap();
    assert_eq!(txns.len(), 1);
    assert_eq!(txns[0].reason, TxnReason::PhaseReward);

    let rewards = store.rewards_for(&member).await.unwrap();
    assert_eq!(rewards.len(), 1);
    assert_eq!(rewards[0].period, ONE_TIME_PERIOD);
}

pub async fn test_monthly_reward_once_per_period<
    S: PhaseStore + LedgerStore + MemberStore + ?Sized,
>(
    store: &S,
) {
    let member = fresh_member(store, "phase_monthly", None).await;
    let march = Utc.with_ymd_and_hms(2026, 3, 15, 12, 0, 0).unwrap();
    let april = Utc.with_ymd_and_hms(2026, 4, 2, 12, 0, 0).unwrap();
    store.try_transition(&member, 0, 2, march).await.unwrap();

    let march_grant = monthly_grant(&period_bucket(march));
    assert!(store
        .grant_periodic_reward(&member, &march_grant, march)
        .await
        .unwrap());
    assert!(!store
        .grant_periodic_reward(&member, &march_grant, march)
        .await
        .unwrap());
    assert!(store
        .grant_periodic_reward(&member, &monthly_grant(&period_bucket(april)), april)
        .await
        .unwrap());

    let rewards = store.rewards_for(&member).await.unwrap();
    let periods: Vec<&str> = rewards.iter().map(|r| r.period.as_str()).collect();
    assert_eq!(periods, vec!["2026-03", "2026-04"]);
    assert!(rewards.iter().all(|r| r.free_product_cents == 3_000));

    // Free product is recorded, not credited.
    assert_eq!(
        store.balance(&member, Account::Wallet).await.unwrap().balance_cents,
        0
    );
}

// =============================================================================
// Test runner macro
// =============================================================================

/// Run all PhaseStore interface tests against a store implementation.
#[macro_export]
macro_rules! run_phase_store_tests {
    ($store:expr) => {
        use $crate::store::phase_store_tests::*;

        // try_transition tests
        test_unevaluated_member_has_no_record($store).await;
        println!("  test_unevaluated_member_has_no_record: PASSED");

        test_transition_is_compare_and_set($store).await;
        println!("  test_transition_is_compare_and_set: PASSED");

        test_demotion_keeps_highest_phase($store).await;
        println!("  test_demotion_keeps_highest_phase: PASSED");

        test_manual_override_blocks_transitions($store).await;
        println!("  test_manual_override_blocks_transitions: PASSED");

        // reward tests
        test_one_time_reward_granted_once($store).await;
        println!("  test_one_time_reward_granted_once: PASSED");

        test_monthly_reward_once_per_period($store).await;
        println!("  test_monthly_reward_once_per_period: PASSED");
    };
}
