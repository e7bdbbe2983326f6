//! MLM settlement engine.
//!
//! Turns gateway-confirmed payments into commission credits up a referral
//! tree, drives per-member phase progression and its rewards, and moves
//! network earnings to wallets or out through payout providers. Every
//! financial mutation is atomic and idempotent in the store, so duplicate
//! webhook deliveries and retries never double-credit.

pub mod admin;
pub mod commission;
pub mod config;
pub mod ledger;
pub mod model;
pub mod notify;
pub mod payout;
pub mod phase;
pub mod settlement;
pub mod storage;
pub mod upline;
pub mod utils;
