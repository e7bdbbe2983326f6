//! SQLite PayoutStore implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_query::{Expr, OnConflict, Order, Query, SelectStatement, SqliteQueryBuilder};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use uuid::Uuid;

use super::ledger_store::apply_delta_tx;
use super::{fmt_ts, is_unique_violation, parse_ts, SqliteStore};
use crate::model::{
    Account, LedgerDelta, MemberId, Payout, PayoutAccount, PayoutSettings, PayoutStatus,
    TxnReason,
};
use crate::storage::schema::{PayoutAccounts, PayoutSettingsTable, Payouts};
use crate::storage::{PayoutStore, Result, StorageError};

fn payout_select() -> SelectStatement {
    Query::select()
        .columns([
            Payouts::Id,
            Payouts::MemberId,
            Payouts::Provider,
            Payouts::ProviderAccountId,
            Payouts::AmountCents,
            Payouts::Status,
            Payouts::ProviderReference,
            Payouts::FailureReason,
            Payouts::CreatedAt,
            Payouts::UpdatedAt,
        ])
        .from(Payouts::Table)
        .to_owned()
}

fn payout_from_row(row: &SqliteRow) -> Result<Payout> {
    let id: String = row.try_get("id")?;
    let provider: String = row.try_get("provider")?;
    let status: String = row.try_get("status")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(Payout {
        id: Uuid::parse_str(&id)?,
        member_id: MemberId::new(row.try_get::<String, _>("member_id")?),
        provider: provider.parse()?,
        provider_account_id: row.try_get("provider_account_id")?,
        amount_cents: row.try_get("amount_cents")?,
        status: status.parse()?,
        provider_reference: row.try_get("provider_reference")?,
        failure_reason: row.try_get("failure_reason")?,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
    })
}

fn settings_from_row(row: &SqliteRow) -> Result<PayoutSettings> {
    let preferred: Option<String> = row.try_get("preferred_provider")?;
    Ok(PayoutSettings {
        member_id: MemberId::new(row.try_get::<String, _>("member_id")?),
        auto_payout: row.try_get("auto_payout")?,
        threshold_cents: row.try_get("threshold_cents")?,
        preferred_provider: preferred.map(|p| p.parse()).transpose()?,
    })
}

fn settings_select() -> SelectStatement {
    Query::select()
        .columns([
            PayoutSettingsTable::MemberId,
            PayoutSettingsTable::AutoPayout,
            PayoutSettingsTable::ThresholdCents,
            PayoutSettingsTable::PreferredProvider,
        ])
        .from(PayoutSettingsTable::Table)
        .to_owned()
}

async fn payout_tx(conn: &mut SqliteConnection, id: Uuid) -> Result<Payout> {
    let query = payout_select()
        .and_where(Expr::col(Payouts::Id).eq(id.to_string()))
        .to_string(SqliteQueryBuilder);

    let row = sqlx::query(&query)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| StorageError::not_found("payout", id))?;
    payout_from_row(&row)
}

async fn has_pending_tx(conn: &mut SqliteConnection, member: &MemberId) -> Result<bool> {
    let query = Query::select()
        .column(Payouts::Id)
        .from(Payouts::Table)
        .and_where(Expr::col(Payouts::MemberId).eq(member.as_str()))
        .and_where(Expr::col(Payouts::Status).eq(PayoutStatus::Pending.as_str()))
        .to_string(SqliteQueryBuilder);

    Ok(sqlx::query(&query)
        .fetch_optional(&mut *conn)
        .await?
        .is_some())
}

/// Move a pending payout to `to`. Fails with `InvalidTransition` from any other status.
async fn settle_tx(
    conn: &mut SqliteConnection,
    id: Uuid,
    to: PayoutStatus,
    provider_reference: Option<&str>,
    failure_reason: Option<&str>,
    at: DateTime<Utc>,
) -> Result<Payout> {
    let current = payout_tx(conn, id).await?;
    if current.status != PayoutStatus::Pending {
        return Err(StorageError::InvalidTransition {
            entity: "payout",
            id: id.to_string(),
            from: current.status.to_string(),
            to: to.to_string(),
        });
    }

    // The statement is not Send; render it before awaiting.
    let query = {
        let mut update = Query::update();
        update
            .table(Payouts::Table)
            .value(Payouts::Status, to.as_str())
            .value(Payouts::UpdatedAt, fmt_ts(at))
            .and_where(Expr::col(Payouts::Id).eq(id.to_string()))
            .and_where(Expr::col(Payouts::Status).eq(PayoutStatus::Pending.as_str()));
        if let Some(reference) = provider_reference {
            update.value(Payouts::ProviderReference, reference);
        }
        if let Some(reason) = failure_reason {
            update.value(Payouts::FailureReason, reason);
        }
        update.to_string(SqliteQueryBuilder)
    };
    sqlx::query(&query).execute(&mut *conn).await?;

    Ok(Payout {
        status: to,
        provider_reference: provider_reference
            .map(str::to_string)
            .or(current.provider_reference),
        failure_reason: failure_reason.map(str::to_string).or(current.failure_reason),
        updated_at: at,
        ..current
    })
}

#[async_trait]
impl PayoutStore for SqliteStore {
    async fn payout_settings(&self, member: &MemberId) -> Result<Option<PayoutSettings>> {
        let query = settings_select()
            .and_where(Expr::col(PayoutSettingsTable::MemberId).eq(member.as_str()))
            .to_string(SqliteQueryBuilder);

        sqlx::query(&query)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(settings_from_row)
            .transpose()
    }

    async fn save_payout_settings(&self, settings: &PayoutSettings) -> Result<()> {
        let query = Query::insert()
            .into_table(PayoutSettingsTable::Table)
            .columns([
                PayoutSettingsTable::MemberId,
                PayoutSettingsTable::AutoPayout,
                PayoutSettingsTable::ThresholdCents,
                PayoutSettingsTable::PreferredProvider,
            ])
            .values_panic([
                settings.member_id.as_str().into(),
                settings.auto_payout.into(),
                settings.threshold_cents.into(),
                settings.preferred_provider.map(|p| p.as_str()).into(),
            ])
            .on_conflict(
                OnConflict::column(PayoutSettingsTable::MemberId)
                    .update_columns([
                        PayoutSettingsTable::AutoPayout,
                        PayoutSettingsTable::ThresholdCents,
                        PayoutSettingsTable::PreferredProvider,
                    ])
                    .to_owned(),
            )
            .to_string(SqliteQueryBuilder);

        sqlx::query(&query).execute(&self.pool).await?;
        Ok(())
    }

    async fn upsert_payout_account(&self, account: &PayoutAccount) -> Result<()> {
        let query = Query::insert()
            .into_table(PayoutAccounts::Table)
            .columns([
                PayoutAccounts::MemberId,
                PayoutAccounts::Provider,
                PayoutAccounts::Status,
                PayoutAccounts::ProviderAccountId,
            ])
            .values_panic([
                account.member_id.as_str().into(),
                account.provider.as_str().into(),
                account.status.as_str().into(),
                account.provider_account_id.as_str().into(),
            ])
            .on_conflict(
                OnConflict::columns([PayoutAccounts::MemberId, PayoutAccounts::Provider])
                    .update_columns([PayoutAccounts::Status, PayoutAccounts::ProviderAccountId])
                    .to_owned(),
            )
            .to_string(SqliteQueryBuilder);

        sqlx::query(&query).execute(&self.pool).await?;
        Ok(())
    }

    async fn payout_accounts(&self, member: &MemberId) -> Result<Vec<PayoutAccount>> {
        let query = Query::select()
            .columns([
                PayoutAccounts::MemberId,
                PayoutAccounts::Provider,
                PayoutAccounts::Status,
                PayoutAccounts::ProviderAccountId,
            ])
            .from(PayoutAccounts::Table)
            .and_where(Expr::col(PayoutAccounts::MemberId).eq(member.as_str()))
            .order_by(PayoutAccounts::Provider, Order::Asc)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| {
                let provider: String = row.try_get("provider")?;
                let status: String = row.try_get("status")?;
                Ok(PayoutAccount {
                    member_id: MemberId::new(row.try_get::<String, _>("member_id")?),
                    provider: provider.parse()?,
                    status: status.parse()?,
                    provider_account_id: row.try_get("provider_account_id")?,
                })
            })
            .collect()
    }

    async fn begin_payout(&self, payout: &Payout) -> Result<i64> {
        let already_pending = || StorageError::AlreadyExists {
            entity: "pending payout",
            id: payout.member_id.to_string(),
        };

        let mut conn = self.begin().await?;
        let result = async {
            if has_pending_tx(&mut conn, &payout.member_id).await? {
                return Err(already_pending());
            }

            let debit = LedgerDelta::debit(
                Account::NetworkEarnings,
                payout.member_id.clone(),
                payout.amount_cents,
                TxnReason::Payout,
            )
            .with_reference(payout.debit_reference());
            let outcome = apply_delta_tx(&mut conn, &debit, payout.created_at).await?;

            let insert = Query::insert()
                .into_table(Payouts::Table)
                .columns([
                    Payouts::Id,
                    Payouts::MemberId,
                    Payouts::Provider,
                    Payouts::ProviderAccountId,
                    Payouts::AmountCents,
                    Payouts::Status,
                    Payouts::ProviderReference,
                    Payouts::FailureReason,
                    Payouts::CreatedAt,
                    Payouts::UpdatedAt,
                ])
                .values_panic([
                    payout.id.to_string().into(),
                    payout.member_id.as_str().into(),
                    payout.provider.as_str().into(),
                    payout.provider_account_id.as_str().into(),
                    payout.amount_cents.into(),
                    PayoutStatus::Pending.as_str().into(),
                    payout.provider_reference.clone().into(),
                    payout.failure_reason.clone().into(),
                    fmt_ts(payout.created_at).into(),
                    fmt_ts(payout.updated_at).into(),
                ])
                .to_string(SqliteQueryBuilder);

            match sqlx::query(&insert).execute(&mut *conn).await {
                Ok(_) => Ok(outcome.balance_cents),
                Err(e) if is_unique_violation(&e) => Err(already_pending()),
                Err(e) => Err(e.into()),
            }
        }
        .await;
        Self::finish(conn, result).await
    }

    async fn complete_payout(
        &self,
        id: Uuid,
        provider_reference: &str,
        at: DateTime<Utc>,
    ) -> Result<Payout> {
        let mut conn = self.begin().await?;
        let result = settle_tx(
            &mut conn,
            id,
            PayoutStatus::Completed,
            Some(provider_reference),
            None,
            at,
        )
        .await;
        Self::finish(conn, result).await
    }

    async fn fail_payout(&self, id: Uuid, reason: &str, at: DateTime<Utc>) -> Result<Payout> {
        let mut conn = self.begin().await?;
        let result = async {
            let failed =
                settle_tx(&mut conn, id, PayoutStatus::Failed, None, Some(reason), at).await?;
            let reversal = LedgerDelta::credit(
                Account::NetworkEarnings,
                failed.member_id.clone(),
                failed.amount_cents,
                TxnReason::PayoutReversal,
            )
            .with_reference(failed.reversal_reference());
            apply_delta_tx(&mut conn, &reversal, at).await?;
            Ok::<_, StorageError>(failed)
        }
        .await;
        Self::finish(conn, result).await
    }

    async fn get_payout(&self, id: Uuid) -> Result<Option<Payout>> {
        let query = payout_select()
            .and_where(Expr::col(Payouts::Id).eq(id.to_string()))
            .to_string(SqliteQueryBuilder);

        sqlx::query(&query)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(payout_from_row)
            .transpose()
    }

    async fn payouts_for(&self, member: &MemberId) -> Result<Vec<Payout>> {
        let query = payout_select()
            .and_where(Expr::col(Payouts::MemberId).eq(member.as_str()))
            .order_by(Payouts::CreatedAt, Order::Asc)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(payout_from_row).collect()
    }

    async fn pending_payouts(&self) -> Result<Vec<Payout>> {
        let query = payout_select()
            .and_where(Expr::col(Payouts::Status).eq(PayoutStatus::Pending.as_str()))
            .order_by(Payouts::CreatedAt, Order::Asc)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(payout_from_row).collect()
    }

    async fn auto_payout_members(&self) -> Result<Vec<PayoutSettings>> {
        let query = settings_select()
            .and_where(Expr::col(PayoutSettingsTable::AutoPayout).eq(true))
            .order_by(PayoutSettingsTable::MemberId, Order::Asc)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(settings_from_row).collect()
    }
}
