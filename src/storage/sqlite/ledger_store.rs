//! SQLite LedgerStore implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_query::{Expr, OnConflict, Order, Query, SqliteQueryBuilder};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use super::{fmt_ts, parse_ts, SqliteStore};
use crate::model::{
    Account, Balance, DeltaOutcome, LedgerDelta, LedgerTxn, MemberId, TxnReason, TxnReference,
};
use crate::storage::schema::{Accounts, LedgerTxns};
use crate::storage::{BalanceAdjustment, LedgerStore, Result, StorageError, TransferOutcome};

pub(super) async fn balance_tx(
    conn: &mut SqliteConnection,
    member: &MemberId,
    account: Account,
) -> Result<Balance> {
    let query = Query::select()
        .columns([Accounts::BalanceCents, Accounts::LifetimeCents])
        .from(Accounts::Table)
        .and_where(Expr::col(Accounts::MemberId).eq(member.as_str()))
        .and_where(Expr::col(Accounts::Account).eq(account.as_str()))
        .to_string(SqliteQueryBuilder);

    let row = sqlx::query(&query).fetch_optional(&mut *conn).await?;
    match row {
        Some(row) => Ok(Balance {
            balance_cents: row.try_get("balance_cents")?,
            lifetime_cents: row.try_get("lifetime_cents")?,
        }),
        None => Ok(Balance::default()),
    }
}

async fn reference_applied(
    conn: &mut SqliteConnection,
    account: Account,
    reference: &TxnReference,
) -> Result<bool> {
    let query = Query::select()
        .column(LedgerTxns::Id)
        .from(LedgerTxns::Table)
        .and_where(Expr::col(LedgerTxns::Account).eq(account.as_str()))
        .and_where(Expr::col(LedgerTxns::RefSource).eq(reference.source.as_str()))
        .and_where(Expr::col(LedgerTxns::RefKey).eq(reference.key.as_str()))
        .to_string(SqliteQueryBuilder);

    Ok(sqlx::query(&query)
        .fetch_optional(&mut *conn)
        .await?
        .is_some())
}

/// Apply a delta within an already-started transaction.
///
/// The balance moves through a single conditional `UPDATE ... RETURNING`, so
/// the non-negative check and the write are one statement.
pub(super) async fn apply_delta_tx(
    conn: &mut SqliteConnection,
    delta: &LedgerDelta,
    at: DateTime<Utc>,
) -> Result<DeltaOutcome> {
    if let Some(reference) = &delta.reference {
        if reference_applied(conn, delta.account, reference).await? {
            let balance = balance_tx(conn, &delta.member_id, delta.account).await?;
            return Ok(DeltaOutcome {
                balance_cents: balance.balance_cents,
                applied: false,
            });
        }
    }

    let ensure = Query::insert()
        .into_table(Accounts::Table)
        .columns([
            Accounts::MemberId,
            Accounts::Account,
            Accounts::BalanceCents,
            Accounts::LifetimeCents,
        ])
        .values_panic([
            delta.member_id.as_str().into(),
            delta.account.as_str().into(),
            0i64.into(),
            0i64.into(),
        ])
        .on_conflict(
            OnConflict::columns([Accounts::MemberId, Accounts::Account])
                .do_nothing()
                .to_owned(),
        )
        .to_string(SqliteQueryBuilder);
    sqlx::query(&ensure).execute(&mut *conn).await?;

    let lifetime_gain = if delta.delta_cents > 0 && delta.reason.counts_toward_lifetime() {
        delta.delta_cents
    } else {
        0
    };

    let update = Query::update()
        .table(Accounts::Table)
        .value(
            Accounts::BalanceCents,
            Expr::col(Accounts::BalanceCents).add(delta.delta_cents),
        )
        .value(
            Accounts::LifetimeCents,
            Expr::col(Accounts::LifetimeCents).add(lifetime_gain),
        )
        .and_where(Expr::col(Accounts::MemberId).eq(delta.member_id.as_str()))
        .and_where(Expr::col(Accounts::Account).eq(delta.account.as_str()))
        .and_where(Expr::expr(Expr::col(Accounts::BalanceCents).add(delta.delta_cents)).gte(0))
        .returning_col(Accounts::BalanceCents)
        .to_string(SqliteQueryBuilder);

    let Some(row) = sqlx::query(&update).fetch_optional(&mut *conn).await? else {
        let balance = balance_tx(conn, &delta.member_id, delta.account).await?;
        return Err(StorageError::InsufficientFunds {
            account: delta.account,
            member: delta.member_id.clone(),
            available: balance.balance_cents,
            requested: -delta.delta_cents,
        });
    };
    let balance_after: i64 = row.try_get(0)?;

    let (ref_source, ref_key) = match &delta.reference {
        Some(r) => (Some(r.source.clone()), Some(r.key.clone())),
        None => (None, None),
    };
    let insert = Query::insert()
        .into_table(LedgerTxns::Table)
        .columns([
            LedgerTxns::MemberId,
            LedgerTxns::Account,
            LedgerTxns::DeltaCents,
            LedgerTxns::BalanceAfterCents,
            LedgerTxns::Reason,
            LedgerTxns::RefSource,
            LedgerTxns::RefKey,
            LedgerTxns::CreatedAt,
        ])
        .values_panic([
            delta.member_id.as_str().into(),
            delta.account.as_str().into(),
            delta.delta_cents.into(),
            balance_after.into(),
            delta.reason.as_str().into(),
            ref_source.into(),
            ref_key.into(),
            fmt_ts(at).into(),
        ])
        .to_string(SqliteQueryBuilder);
    sqlx::query(&insert).execute(&mut *conn).await?;

    Ok(DeltaOutcome {
        balance_cents: balance_after,
        applied: true,
    })
}

fn txn_from_row(row: &SqliteRow) -> Result<LedgerTxn> {
    let account: String = row.try_get("account")?;
    let reason: String = row.try_get("reason")?;
    let ref_source: Option<String> = row.try_get("ref_source")?;
    let ref_key: Option<String> = row.try_get("ref_key")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(LedgerTxn {
        id: row.try_get("id")?,
        member_id: MemberId::new(row.try_get::<String, _>("member_id")?),
        account: account.parse()?,
        delta_cents: row.try_get("delta_cents")?,
        balance_after_cents: row.try_get("balance_after_cents")?,
        reason: reason.parse()?,
        reference: match (ref_source, ref_key) {
            (Some(source), Some(key)) => Some(TxnReference::new(source, key)),
            _ => None,
        },
        created_at: parse_ts(&created_at)?,
    })
}

#[async_trait]
impl LedgerStore for SqliteStore {
    async fn apply_delta(&self, delta: &LedgerDelta) -> Result<DeltaOutcome> {
        let mut conn = self.begin().await?;
        let result = apply_delta_tx(&mut conn, delta, Utc::now()).await;
        Self::finish(conn, result).await
    }

    async fn balance(&self, member: &MemberId, account: Account) -> Result<Balance> {
        let mut conn = self.pool.acquire().await?;
        balance_tx(&mut conn, member, account).await
    }

    async fn transactions(&self, member: &MemberId, account: Account) -> Result<Vec<LedgerTxn>> {
        let query = Query::select()
            .columns([
                LedgerTxns::Id,
                LedgerTxns::MemberId,
                LedgerTxns::Account,
                LedgerTxns::DeltaCents,
                LedgerTxns::BalanceAfterCents,
                LedgerTxns::Reason,
                LedgerTxns::RefSource,
                LedgerTxns::RefKey,
                LedgerTxns::CreatedAt,
            ])
            .from(LedgerTxns::Table)
            .and_where(Expr::col(LedgerTxns::MemberId).eq(member.as_str()))
            .and_where(Expr::col(LedgerTxns::Account).eq(account.as_str()))
            .order_by(LedgerTxns::Id, Order::Asc)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(txn_from_row).collect()
    }

    async fn derived_balance(&self, member: &MemberId, account: Account) -> Result<i64> {
        let query = Query::select()
            .expr(Expr::col(LedgerTxns::DeltaCents).sum())
            .from(LedgerTxns::Table)
            .and_where(Expr::col(LedgerTxns::MemberId).eq(member.as_str()))
            .and_where(Expr::col(LedgerTxns::Account).eq(account.as_str()))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_one(&self.pool).await?;
        let sum: Option<i64> = row.try_get(0)?;
        Ok(sum.unwrap_or(0))
    }

    async fn transfer_earnings_to_wallet(
        &self,
        member: &MemberId,
        amount_cents: i64,
        reference: &TxnReference,
    ) -> Result<TransferOutcome> {
        let debit = LedgerDelta::debit(
            Account::NetworkEarnings,
            member.clone(),
            amount_cents,
            TxnReason::EarningsTransfer,
        )
        .with_reference(reference.clone());
        let credit = LedgerDelta::credit(
            Account::Wallet,
            member.clone(),
            amount_cents,
            TxnReason::EarningsTransfer,
        )
        .with_reference(reference.clone());

        let now = Utc::now();
        let mut conn = self.begin().await?;
        let result = async {
            let earnings = apply_delta_tx(&mut conn, &debit, now).await?;
            let wallet = apply_delta_tx(&mut conn, &credit, now).await?;
            Ok::<_, StorageError>(TransferOutcome {
                earnings_balance_cents: earnings.balance_cents,
                wallet_balance_cents: wallet.balance_cents,
                applied: earnings.applied,
            })
        }
        .await;
        Self::finish(conn, result).await
    }

    async fn set_balance(
        &self,
        member: &MemberId,
        account: Account,
        target_cents: i64,
        reference: &TxnReference,
    ) -> Result<BalanceAdjustment> {
        let now = Utc::now();
        let mut conn = self.begin().await?;
        let result = async {
            let previous = balance_tx(&mut conn, member, account).await?.balance_cents;
            let delta = LedgerDelta::credit(
                account,
                member.clone(),
                target_cents - previous,
                TxnReason::AdminAdjustment,
            )
            .with_reference(reference.clone());
            let outcome = apply_delta_tx(&mut conn, &delta, now).await?;
            Ok::<_, StorageError>(BalanceAdjustment {
                previous_cents: previous,
                balance_cents: outcome.balance_cents,
                delta_cents: outcome.balance_cents - previous,
            })
        }
        .await;
        Self::finish(conn, result).await
    }
}
