//! SQLite PhaseStore implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_query::{Expr, OnConflict, Order, Query, SqliteQueryBuilder};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use super::ledger_store::apply_delta_tx;
use super::member_store::member_exists;
use super::{fmt_ts, parse_opt_ts, parse_ts, to_u8, SqliteStore};
use crate::model::{
    Account, LedgerDelta, MemberId, PhaseRecord, PhaseReward, RewardGrant, TxnReason,
};
use crate::storage::schema::{PhaseRecords, PhaseRewards};
use crate::storage::{PhaseStore, Result, StorageError};

const RECORD_COLUMNS: [PhaseRecords; 8] = [
    PhaseRecords::MemberId,
    PhaseRecords::CurrentPhase,
    PhaseRecords::HighestPhase,
    PhaseRecords::ManualOverride,
    PhaseRecords::Phase1Granted,
    PhaseRecords::Phase2Granted,
    PhaseRecords::Phase3Granted,
    PhaseRecords::Phase2AchievedAt,
];

fn record_from_row(row: &SqliteRow) -> Result<PhaseRecord> {
    Ok(PhaseRecord {
        member_id: MemberId::new(row.try_get::<String, _>("member_id")?),
        current_phase: to_u8(row.try_get("current_phase")?, "current_phase")?,
        highest_phase: to_u8(row.try_get("highest_phase")?, "highest_phase")?,
        manual_override: row.try_get("manual_override")?,
        phase1_granted: row.try_get("phase1_granted")?,
        phase2_granted: row.try_get("phase2_granted")?,
        phase3_granted: row.try_get("phase3_granted")?,
        phase2_achieved_at: parse_opt_ts(row.try_get("phase2_achieved_at")?)?,
    })
}

fn reward_from_row(row: &SqliteRow) -> Result<PhaseReward> {
    let schedule: String = row.try_get("schedule")?;
    let granted_at: String = row.try_get("granted_at")?;
    Ok(PhaseReward {
        member_id: MemberId::new(row.try_get::<String, _>("member_id")?),
        phase: to_u8(row.try_get("phase")?, "phase")?,
        schedule: schedule.parse()?,
        period: row.try_get("period")?,
        credit_cents: row.try_get("credit_cents")?,
        free_product_cents: row.try_get("free_product_cents")?,
        granted_at: parse_ts(&granted_at)?,
    })
}

async fn record_tx(conn: &mut SqliteConnection, member: &MemberId) -> Result<Option<PhaseRecord>> {
    let query = Query::select()
        .columns(RECORD_COLUMNS)
        .from(PhaseRecords::Table)
        .and_where(Expr::col(PhaseRecords::MemberId).eq(member.as_str()))
        .to_string(SqliteQueryBuilder);

    sqlx::query(&query)
        .fetch_optional(&mut *conn)
        .await?
        .as_ref()
        .map(record_from_row)
        .transpose()
}

async fn save_record_tx(conn: &mut SqliteConnection, record: &PhaseRecord) -> Result<()> {
    let query = Query::insert()
        .into_table(PhaseRecords::Table)
        .columns(RECORD_COLUMNS)
        .values_panic([
            record.member_id.as_str().into(),
            i64::from(record.current_phase).into(),
            i64::from(record.highest_phase).into(),
            record.manual_override.into(),
            record.phase1_granted.into(),
            record.phase2_granted.into(),
            record.phase3_granted.into(),
            record.phase2_achieved_at.map(fmt_ts).into(),
        ])
        .on_conflict(
            OnConflict::column(PhaseRecords::MemberId)
                .update_columns([
                    PhaseRecords::CurrentPhase,
                    PhaseRecords::HighestPhase,
                    PhaseRecords::ManualOverride,
                    PhaseRecords::Phase1Granted,
                    PhaseRecords::Phase2Granted,
                    PhaseRecords::Phase3Granted,
                    PhaseRecords::Phase2AchievedAt,
                ])
                .to_owned(),
        )
        .to_string(SqliteQueryBuilder);

    sqlx::query(&query).execute(&mut *conn).await?;
    Ok(())
}

/// Load the record of an existing member, or a fresh phase 0 record.
async fn record_or_default_tx(
    conn: &mut SqliteConnection,
    member: &MemberId,
) -> Result<PhaseRecord> {
    if !member_exists(conn, member).await? {
        return Err(StorageError::not_found("member", member));
    }
    Ok(record_tx(conn, member)
        .await?
        .unwrap_or_else(|| PhaseRecord::new(member.clone())))
}

/// Insert the reward row and credit its cash part. False when the period exists.
async fn record_reward_tx(
    conn: &mut SqliteConnection,
    member: &MemberId,
    grant: &RewardGrant,
    at: DateTime<Utc>,
) -> Result<bool> {
    let query = Query::insert()
        .into_table(PhaseRewards::Table)
        .columns([
            PhaseRewards::MemberId,
            PhaseRewards::Phase,
            PhaseRewards::Period,
            PhaseRewards::Schedule,
            PhaseRewards::CreditCents,
            PhaseRewards::FreeProductCents,
            PhaseRewards::GrantedAt,
        ])
        .values_panic([
            member.as_str().into(),
            i64::from(grant.phase).into(),
            grant.period.as_str().into(),
            grant.schedule.as_str().into(),
            grant.credit_cents.into(),
            grant.free_product_cents.into(),
            fmt_ts(at).into(),
        ])
        .on_conflict(
            OnConflict::columns([
                PhaseRewards::MemberId,
                PhaseRewards::Phase,
                PhaseRewards::Period,
            ])
            .do_nothing()
            .to_owned(),
        )
        .to_string(SqliteQueryBuilder);

    if sqlx::query(&query).execute(&mut *conn).await?.rows_affected() == 0 {
        return Ok(false);
    }

    if grant.credit_cents > 0 {
        let delta = LedgerDelta::credit(
            Account::Wallet,
            member.clone(),
            grant.credit_cents,
            TxnReason::PhaseReward,
        )
        .with_reference(grant.ledger_reference(member));
        if !apply_delta_tx(conn, &delta, at).await?.applied {
            return Err(StorageError::ReferenceConflict(grant.ledger_reference(member)));
        }
    }
    Ok(true)
}

#[async_trait]
impl PhaseStore for SqliteStore {
    async fn phase_record(&self, member: &MemberId) -> Result<Option<PhaseRecord>> {
        let mut conn = self.pool.acquire().await?;
        record_tx(&mut conn, member).await
    }

    async fn try_transition(
        &self,
        member: &MemberId,
        from: u8,
        to: u8,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut conn = self.begin().await?;
        let result = async {
            let mut record = record_or_default_tx(&mut conn, member).await?;
            if record.manual_override || record.current_phase != from {
                return Ok(false);
            }
            record.move_to(to, at);
            save_record_tx(&mut conn, &record).await?;
            Ok::<_, StorageError>(true)
        }
        .await;
        Self::finish(conn, result).await
    }

    async fn grant_one_time_reward(
        &self,
        member: &MemberId,
        grant: &RewardGrant,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut conn = self.begin().await?;
        let result = async {
            let mut record = record_tx(&mut conn, member)
                .await?
                .ok_or_else(|| StorageError::not_found("phase record", member))?;
            if record.is_granted(grant.phase) {
                return Ok(false);
            }
            record.mark_granted(grant.phase);
            save_record_tx(&mut conn, &record).await?;
            record_reward_tx(&mut conn, member, grant, at).await?;
            Ok::<_, StorageError>(true)
        }
        .await;
        Self::finish(conn, result).await
    }

    async fn grant_periodic_reward(
        &self,
        member: &MemberId,
        grant: &RewardGrant,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut conn = self.begin().await?;
        let result = record_reward_tx(&mut conn, member, grant, at).await;
        Self::finish(conn, result).await
    }

    async fn set_manual_phase(
        &self,
        member: &MemberId,
        phase: u8,
        at: DateTime<Utc>,
    ) -> Result<u8> {
        let mut conn = self.begin().await?;
        let result = async {
            let mut record = record_or_default_tx(&mut conn, member).await?;
            let previous = record.current_phase;
            record.move_to(phase, at);
            record.manual_override = true;
            save_record_tx(&mut conn, &record).await?;
            Ok::<_, StorageError>(previous)
        }
        .await;
        Self::finish(conn, result).await
    }

    async fn clear_phase_override(&self, member: &MemberId) -> Result<bool> {
        let query = Query::update()
            .table(PhaseRecords::Table)
            .value(PhaseRecords::ManualOverride, false)
            .and_where(Expr::col(PhaseRecords::MemberId).eq(member.as_str()))
            .and_where(Expr::col(PhaseRecords::ManualOverride).eq(true))
            .to_string(SqliteQueryBuilder);

        Ok(sqlx::query(&query).execute(&self.pool).await?.rows_affected() > 0)
    }

    async fn rewards_for(&self, member: &MemberId) -> Result<Vec<PhaseReward>> {
        let query = Query::select()
            .columns([
                PhaseRewards::MemberId,
                PhaseRewards::Phase,
                PhaseRewards::Period,
                PhaseRewards::Schedule,
                PhaseRewards::CreditCents,
                PhaseRewards::FreeProductCents,
                PhaseRewards::GrantedAt,
            ])
            .from(PhaseRewards::Table)
            .and_where(Expr::col(PhaseRewards::MemberId).eq(member.as_str()))
            .order_by(PhaseRewards::GrantedAt, Order::Asc)
            .order_by(PhaseRewards::Phase, Order::Asc)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(reward_from_row).collect()
    }
}
