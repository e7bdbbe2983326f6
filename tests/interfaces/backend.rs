//! Backend factory for interface tests.
//!
//! Provides a unified interface to create store backends based on environment configuration.

use std::env;
use std::sync::Arc;

use mlm_settlement::storage::{MemoryStore, Store};

#[cfg(feature = "sqlite")]
use mlm_settlement::{config::SqliteConfig, storage::SqliteStore};

/// Store backend type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Memory,
    Sqlite,
}

impl StorageBackend {
    pub fn from_env() -> Self {
        match env::var("STORAGE_BACKEND")
            .unwrap_or_else(|_| "memory".to_string())
            .to_lowercase()
            .as_str()
        {
            "sqlite" => StorageBackend::Sqlite,
            _ => StorageBackend::Memory,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            StorageBackend::Memory => "memory",
            StorageBackend::Sqlite => "sqlite",
        }
    }
}

/// Concrete handle kept for fault injection.
enum Backend {
    Memory(Arc<MemoryStore>),
    #[cfg(feature = "sqlite")]
    Sqlite(Arc<SqliteStore>),
}

/// Holds the store for one scenario.
pub struct StorageContext {
    pub store: Arc<dyn Store>,
    backend: Backend,
}

impl std::fmt::Debug for StorageContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match &self.backend {
            Backend::Memory(_) => "memory",
            #[cfg(feature = "sqlite")]
            Backend::Sqlite(_) => "sqlite",
        };
        f.debug_struct("StorageContext")
            .field("store", &"<dyn Store>")
            .field("backend", &name)
            .finish()
    }
}

impl StorageContext {
    /// Create a fresh, empty store for the configured backend.
    pub async fn new(backend: StorageBackend) -> Self {
        match backend {
            StorageBackend::Memory => Self::create_memory(),
            StorageBackend::Sqlite => Self::create_sqlite().await,
        }
    }

    fn create_memory() -> Self {
        let store = Arc::new(MemoryStore::new());
        StorageContext {
            store: store.clone(),
            backend: Backend::Memory(store),
        }
    }

    #[cfg(feature = "sqlite")]
    async fn create_sqlite() -> Self {
        let config = SqliteConfig {
            path: ":memory:".to_string(),
            ..Default::default()
        };
        let store = SqliteStore::connect(&config)
            .await
            .expect("Failed to open SQLite");
        store.init().await.expect("Failed to create schema");
        let store = Arc::new(store);

        StorageContext {
            store: store.clone(),
            backend: Backend::Sqlite(store),
        }
    }

    #[cfg(not(feature = "sqlite"))]
    async fn create_sqlite() -> Self {
        panic!("SQLite feature not enabled. Build with --features sqlite");
    }

    /// Make every settlement fail right after its payment claim is inserted.
    ///
    /// SQLite gets a trigger aborting commission inserts, which run after the
    /// claim inside the same transaction.
    pub async fn fail_settlement_after_claim(&self, fail: bool) {
        match &self.backend {
            Backend::Memory(store) => store.set_fail_settlement_after_claim(fail).await,
            #[cfg(feature = "sqlite")]
            Backend::Sqlite(store) => {
                let ddl = if fail {
                    "CREATE TRIGGER IF NOT EXISTS fail_commission_insert \
                     BEFORE INSERT ON commission_events \
                     BEGIN SELECT RAISE(ABORT, 'injected failure'); END"
                } else {
                    "DROP TRIGGER IF EXISTS fail_commission_insert"
                };
                sqlx::query(ddl)
                    .execute(store.pool())
                    .await
                    .expect("Failed to toggle fault trigger");
            }
        }
    }
}
