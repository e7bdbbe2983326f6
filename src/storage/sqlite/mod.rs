//! SQLite implementation of the store traits.
//!
//! Multi-statement writes run inside `BEGIN IMMEDIATE` on one pooled
//! connection. Taking the write lock up front serializes writers, so a
//! read-check-write sequence inside one of these transactions cannot race
//! another writer, and every operation commits or rolls back as a unit.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool};
use tracing::debug;

use super::schema::ALL_TABLES;
use super::{Result, StorageError};
use crate::config::SqliteConfig;

mod ledger_store;
mod member_store;
mod payout_store;
mod phase_store;
mod settlement_store;

/// SQLite-backed store.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a store over an existing pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open a pool from configuration.
    ///
    /// An in-memory database exists per connection, so it gets exactly one
    /// connection that is never recycled.
    pub async fn connect(config: &SqliteConfig) -> Result<Self> {
        if !config.is_memory() {
            if let Some(parent) = std::path::Path::new(&config.path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)
                        .map_err(|e| StorageError::Corrupt(format!("create {parent:?}: {e}")))?;
                }
            }
        }

        let options = SqliteConnectOptions::from_str(&config.url())?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = if config.is_memory() {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(config.max_connections.max(1))
                .connect_with(options)
                .await?
        };

        Ok(Self::new(pool))
    }

    /// Create tables and indexes.
    pub async fn init(&self) -> Result<()> {
        for ddl in ALL_TABLES {
            sqlx::query(ddl).execute(&self.pool).await?;
        }
        debug!("SQLite schema initialized");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Acquire a connection and take the write lock.
    async fn begin(&self) -> Result<PoolConnection<Sqlite>> {
        let mut conn = self.pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;
        Ok(conn)
    }

    /// Commit on success, roll back on failure.
    async fn finish<T>(mut conn: PoolConnection<Sqlite>, result: Result<T>) -> Result<T> {
        match result {
            Ok(value) => {
                sqlx::query("COMMIT").execute(&mut *conn).await?;
                Ok(value)
            }
            Err(e) => {
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                Err(e)
            }
        }
    }
}

fn fmt_ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_ts(text: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::Corrupt(format!("timestamp {text:?}: {e}")))
}

fn parse_opt_ts(text: Option<String>) -> Result<Option<DateTime<Utc>>> {
    text.as_deref().map(parse_ts).transpose()
}

fn parse_decimal(text: &str) -> Result<Decimal> {
    Decimal::from_str(text).map_err(|e| StorageError::Corrupt(format!("decimal {text:?}: {e}")))
}

fn to_u8(value: i64, column: &str) -> Result<u8> {
    u8::try_from(value).map_err(|_| StorageError::Corrupt(format!("{column} out of range: {value}")))
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    matches!(error, sqlx::Error::Database(db) if db.is_unique_violation())
}
