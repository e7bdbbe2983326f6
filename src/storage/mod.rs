//! Ledger store abstraction and backends.
//!
//! Every invariant that must hold under concurrent webhook delivery is
//! enforced here, by the store, rather than by check-then-write logic in the
//! services: the payment claim, commission and ledger reference uniqueness,
//! reward period uniqueness and compare-and-set phase transitions.

use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::config::{StorageConfig, StorageType};
use crate::model::{Account, MemberId, ParseEnumError, TxnReference};

mod ledger_store;
mod member_store;
pub mod memory;
mod payout_store;
mod phase_store;
mod settlement_store;

#[cfg(feature = "sqlite")]
pub mod schema;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use ledger_store::{BalanceAdjustment, LedgerStore, TransferOutcome};
pub use member_store::MemberStore;
pub use memory::MemoryStore;
pub use payout_store::PayoutStore;
pub use phase_store::PhaseStore;
pub use settlement_store::{
    AppliedSettlement, CommitOutcome, RenewalOutcome, SettlementBatch, SettlementStore,
    SubscriptionRenewal,
};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

/// Errors raised by store backends.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("{entity} already exists: {id}")]
    AlreadyExists { entity: &'static str, id: String },

    #[error("Insufficient funds in {account} of {member}: available {available}, requested {requested}")]
    InsufficientFunds {
        account: Account,
        member: MemberId,
        available: i64,
        requested: i64,
    },

    #[error("Invalid {entity} transition for {id}: {from} -> {to}")]
    InvalidTransition {
        entity: &'static str,
        id: String,
        from: String,
        to: String,
    },

    #[error("Corrupt stored value: {0}")]
    Corrupt(String),

    #[error("Invalid stored enum: {0}")]
    InvalidEnum(#[from] ParseEnumError),

    #[error("Invalid UUID: {0}")]
    InvalidUuid(#[from] uuid::Error),

    #[cfg(feature = "sqlite")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Storage backend not available: {0}")]
    Unsupported(&'static str),

    /// A fresh record's ledger credit collided with an existing entry.
    #[error("Ledger reference already used: {0}")]
    ReferenceConflict(TxnReference),

    #[error("Injected failure: {0}")]
    Injected(&'static str),
}

impl StorageError {
    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        StorageError::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Everything the services need from one backend.
pub trait Store: MemberStore + LedgerStore + SettlementStore + PhaseStore + PayoutStore {}

impl<T> Store for T where
    T: MemberStore + LedgerStore + SettlementStore + PhaseStore + PayoutStore + ?Sized
{
}

/// Initialize storage based on configuration.
pub async fn init_storage(config: &StorageConfig) -> Result<Arc<dyn Store>> {
    match config.storage_type {
        StorageType::Memory => {
            info!("Storage: memory");
            Ok(Arc::new(MemoryStore::new()))
        }
        StorageType::Sqlite => init_sqlite(config).await,
    }
}

#[cfg(feature = "sqlite")]
async fn init_sqlite(config: &StorageConfig) -> Result<Arc<dyn Store>> {
    info!("Storage: sqlite at {}", config.sqlite.path);
    let store = SqliteStore::connect(&config.sqlite).await?;
    store.init().await?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "sqlite"))]
async fn init_sqlite(_config: &StorageConfig) -> Result<Arc<dyn Store>> {
    tracing::error!("SQLite storage requested but 'sqlite' feature is not enabled");
    Err(StorageError::Unsupported("sqlite"))
}
