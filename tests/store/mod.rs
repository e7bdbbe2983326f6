//! Shared store integration tests.
//!
//! Tests the store traits against all backends.
//! Each backend module imports these test functions and runs them.

pub mod ledger_store_tests;
pub mod payout_store_tests;
pub mod phase_store_tests;
pub mod settlement_store_tests;

use chrono::Utc;
use uuid::Uuid;

use mlm_settlement::model::{Member, MemberId};
use mlm_settlement::storage::MemberStore;

/// Register a member with a unique id so tests can share one store.
pub async fn fresh_member<S: MemberStore + ?Sized>(
    store: &S,
    prefix: &str,
    sponsor: Option<&MemberId>,
) -> MemberId {
    let id = MemberId::new(format!("{prefix}_{}", Uuid::new_v4().simple()));
    store
        .register_member(&Member {
            id: id.clone(),
            sponsor_id: sponsor.cloned(),
            deactivated: false,
            ecommerce_rate_override: None,
            created_at: Utc::now(),
        })
        .await
        .expect("register should succeed");
    id
}
