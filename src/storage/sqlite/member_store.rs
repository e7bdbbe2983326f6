//! SQLite MemberStore implementation.

use async_trait::async_trait;
use rust_decimal::Decimal;
use sea_query::{Alias, Expr, Func, OnConflict, Order, Query, SelectStatement, SqliteQueryBuilder};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use super::{fmt_ts, is_unique_violation, parse_decimal, parse_opt_ts, parse_ts, to_u8, SqliteStore};
use crate::model::{
    AdminAction, Member, MemberId, MemberSnapshot, Subscription, SubscriptionKind,
    SubscriptionStatus,
};
use crate::storage::schema::{AdminActions, Members, PhaseRecords, Subscriptions};
use crate::storage::{MemberStore, Result, StorageError};

/// Members joined with their phase and whether any subscription is active.
fn snapshot_query() -> SelectStatement {
    let active = Query::select()
        .expr(Expr::val(1))
        .from(Subscriptions::Table)
        .and_where(
            Expr::col((Subscriptions::Table, Subscriptions::MemberId))
                .equals((Members::Table, Members::Id)),
        )
        .and_where(
            Expr::col((Subscriptions::Table, Subscriptions::Status))
                .eq(SubscriptionStatus::Active.as_str()),
        )
        .to_owned();

    Query::select()
        .columns([
            (Members::Table, Members::Id),
            (Members::Table, Members::SponsorId),
            (Members::Table, Members::Deactivated),
            (Members::Table, Members::EcommerceRate),
            (Members::Table, Members::CreatedAt),
        ])
        .expr_as(
            Func::if_null(
                Expr::col((PhaseRecords::Table, PhaseRecords::CurrentPhase)),
                0,
            ),
            Alias::new("phase"),
        )
        .expr_as(Expr::exists(active), Alias::new("has_active"))
        .from(Members::Table)
        .left_join(
            PhaseRecords::Table,
            Expr::col((PhaseRecords::Table, PhaseRecords::MemberId))
                .equals((Members::Table, Members::Id)),
        )
        .to_owned()
}

fn member_from_row(row: &SqliteRow) -> Result<Member> {
    let sponsor: Option<String> = row.try_get("sponsor_id")?;
    let rate: Option<String> = row.try_get("ecommerce_rate")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(Member {
        id: MemberId::new(row.try_get::<String, _>("id")?),
        sponsor_id: sponsor.map(MemberId::new),
        deactivated: row.try_get("deactivated")?,
        ecommerce_rate_override: rate.as_deref().map(parse_decimal).transpose()?,
        created_at: parse_ts(&created_at)?,
    })
}

fn snapshot_from_row(row: &SqliteRow) -> Result<MemberSnapshot> {
    let member = member_from_row(row)?;
    let has_active: bool = row.try_get("has_active")?;
    Ok(MemberSnapshot {
        active: has_active && !member.deactivated,
        phase: to_u8(row.try_get("phase")?, "phase")?,
        member,
    })
}

fn subscription_from_row(row: &SqliteRow) -> Result<Subscription> {
    let kind: String = row.try_get("kind")?;
    let status: String = row.try_get("status")?;
    let gateway: Option<String> = row.try_get("gateway")?;
    let period_end: Option<String> = row.try_get("current_period_end")?;

    Ok(Subscription {
        member_id: MemberId::new(row.try_get::<String, _>("member_id")?),
        kind: kind.parse()?,
        status: status.parse()?,
        current_period_end: parse_opt_ts(period_end)?,
        gateway: gateway.map(|g| g.parse()).transpose()?,
        plan: row.try_get("plan")?,
        cancel_at_period_end: row.try_get("cancel_at_period_end")?,
    })
}

fn subscription_columns() -> [Subscriptions; 7] {
    [
        Subscriptions::MemberId,
        Subscriptions::Kind,
        Subscriptions::Status,
        Subscriptions::CurrentPeriodEnd,
        Subscriptions::Gateway,
        Subscriptions::Plan,
        Subscriptions::CancelAtPeriodEnd,
    ]
}

pub(super) async fn member_exists(conn: &mut SqliteConnection, id: &MemberId) -> Result<bool> {
    let query = Query::select()
        .column(Members::Id)
        .from(Members::Table)
        .and_where(Expr::col(Members::Id).eq(id.as_str()))
        .to_string(SqliteQueryBuilder);
    Ok(sqlx::query(&query).fetch_optional(&mut *conn).await?.is_some())
}

pub(super) async fn subscription_tx(
    conn: &mut SqliteConnection,
    id: &MemberId,
    kind: SubscriptionKind,
) -> Result<Option<Subscription>> {
    let query = Query::select()
        .columns(subscription_columns())
        .from(Subscriptions::Table)
        .and_where(Expr::col(Subscriptions::MemberId).eq(id.as_str()))
        .and_where(Expr::col(Subscriptions::Kind).eq(kind.as_str()))
        .to_string(SqliteQueryBuilder);

    let row = sqlx::query(&query).fetch_optional(&mut *conn).await?;
    row.as_ref().map(subscription_from_row).transpose()
}

/// Insert or replace the (member, kind) row.
pub(super) async fn upsert_subscription_tx(
    conn: &mut SqliteConnection,
    subscription: &Subscription,
) -> Result<()> {
    let query = Query::insert()
        .into_table(Subscriptions::Table)
        .columns(subscription_columns())
        .values_panic([
            subscription.member_id.as_str().into(),
            subscription.kind.as_str().into(),
            subscription.status.as_str().into(),
            subscription.current_period_end.map(fmt_ts).into(),
            subscription.gateway.map(|g| g.as_str().to_string()).into(),
            subscription.plan.clone().into(),
            subscription.cancel_at_period_end.into(),
        ])
        .on_conflict(
            OnConflict::columns([Subscriptions::MemberId, Subscriptions::Kind])
                .update_columns([
                    Subscriptions::Status,
                    Subscriptions::CurrentPeriodEnd,
                    Subscriptions::Gateway,
                    Subscriptions::Plan,
                    Subscriptions::CancelAtPeriodEnd,
                ])
                .to_owned(),
        )
        .to_string(SqliteQueryBuilder);

    sqlx::query(&query).execute(&mut *conn).await?;
    Ok(())
}

impl SqliteStore {
    /// Update one member column, failing when the member does not exist.
    async fn update_member(&self, id: &MemberId, column: Members, value: sea_query::Value) -> Result<()> {
        let query = Query::update()
            .table(Members::Table)
            .value(column, value)
            .and_where(Expr::col(Members::Id).eq(id.as_str()))
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&query).execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::not_found("member", id));
        }
        Ok(())
    }
}

#[async_trait]
impl MemberStore for SqliteStore {
    async fn register_member(&self, member: &Member) -> Result<()> {
        let query = Query::insert()
            .into_table(Members::Table)
            .columns([
                Members::Id,
                Members::SponsorId,
                Members::Deactivated,
                Members::EcommerceRate,
                Members::CreatedAt,
            ])
            .values_panic([
                member.id.as_str().into(),
                member.sponsor_id.as_ref().map(|s| s.to_string()).into(),
                member.deactivated.into(),
                member.ecommerce_rate_override.map(|r| r.to_string()).into(),
                fmt_ts(member.created_at).into(),
            ])
            .to_string(SqliteQueryBuilder);

        match sqlx::query(&query).execute(&self.pool).await {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(StorageError::AlreadyExists {
                entity: "member",
                id: member.id.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn member(&self, id: &MemberId) -> Result<Option<Member>> {
        let query = Query::select()
            .columns([
                Members::Id,
                Members::SponsorId,
                Members::Deactivated,
                Members::EcommerceRate,
                Members::CreatedAt,
            ])
            .from(Members::Table)
            .and_where(Expr::col(Members::Id).eq(id.as_str()))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&self.pool).await?;
        row.as_ref().map(member_from_row).transpose()
    }

    async fn member_snapshot(&self, id: &MemberId) -> Result<Option<MemberSnapshot>> {
        let query = snapshot_query()
            .and_where(Expr::col((Members::Table, Members::Id)).eq(id.as_str()))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&self.pool).await?;
        row.as_ref().map(snapshot_from_row).transpose()
    }

    async fn member_ids(&self) -> Result<Vec<MemberId>> {
        let query = Query::select()
            .column(Members::Id)
            .from(Members::Table)
            .order_by(Members::Id, Order::Asc)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| Ok(MemberId::new(row.try_get::<String, _>("id")?)))
            .collect()
    }

    async fn referral_snapshots(&self, sponsor: &MemberId) -> Result<Vec<MemberSnapshot>> {
        let query = snapshot_query()
            .and_where(Expr::col((Members::Table, Members::SponsorId)).eq(sponsor.as_str()))
            .order_by((Members::Table, Members::Id), Order::Asc)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(snapshot_from_row).collect()
    }

    async fn set_sponsor(&self, id: &MemberId, sponsor: Option<&MemberId>) -> Result<()> {
        self.update_member(id, Members::SponsorId, sponsor.map(|s| s.to_string()).into())
            .await
    }

    async fn set_deactivated(&self, id: &MemberId, deactivated: bool) -> Result<()> {
        self.update_member(id, Members::Deactivated, deactivated.into())
            .await
    }

    async fn set_ecommerce_rate(&self, id: &MemberId, rate: Option<Decimal>) -> Result<()> {
        self.update_member(id, Members::EcommerceRate, rate.map(|r| r.to_string()).into())
            .await
    }

    async fn subscription(
        &self,
        id: &MemberId,
        kind: SubscriptionKind,
    ) -> Result<Option<Subscription>> {
        let mut conn = self.pool.acquire().await?;
        subscription_tx(&mut conn, id, kind).await
    }

    async fn subscriptions(&self, id: &MemberId) -> Result<Vec<Subscription>> {
        let query = Query::select()
            .columns(subscription_columns())
            .from(Subscriptions::Table)
            .and_where(Expr::col(Subscriptions::MemberId).eq(id.as_str()))
            .order_by(Subscriptions::Kind, Order::Desc)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(subscription_from_row).collect()
    }

    async fn upsert_subscription(&self, subscription: &Subscription) -> Result<()> {
        let mut conn = self.begin().await?;
        let result = async {
            if !member_exists(&mut conn, &subscription.member_id).await? {
                return Err(StorageError::not_found("member", &subscription.member_id));
            }
            upsert_subscription_tx(&mut conn, subscription).await
        }
        .await;
        Self::finish(conn, result).await
    }

    async fn set_subscription_status(
        &self,
        id: &MemberId,
        kind: SubscriptionKind,
        status: SubscriptionStatus,
    ) -> Result<SubscriptionStatus> {
        let mut conn = self.begin().await?;
        let result = async {
            let existing = subscription_tx(&mut conn, id, kind)
                .await?
                .ok_or_else(|| StorageError::not_found("subscription", format!("{id}/{kind}")))?;

            let query = Query::update()
                .table(Subscriptions::Table)
                .value(Subscriptions::Status, status.as_str())
                .and_where(Expr::col(Subscriptions::MemberId).eq(id.as_str()))
                .and_where(Expr::col(Subscriptions::Kind).eq(kind.as_str()))
                .to_string(SqliteQueryBuilder);
            sqlx::query(&query).execute(&mut *conn).await?;

            Ok::<_, StorageError>(existing.status)
        }
        .await;
        Self::finish(conn, result).await
    }

    async fn record_admin_action(&self, action: &AdminAction) -> Result<()> {
        let query = Query::insert()
            .into_table(AdminActions::Table)
            .columns([
                AdminActions::Actor,
                AdminActions::Action,
                AdminActions::MemberId,
                AdminActions::Detail,
                AdminActions::CreatedAt,
            ])
            .values_panic([
                action.actor.as_str().into(),
                action.action.as_str().into(),
                action.member_id.as_str().into(),
                action.detail.as_str().into(),
                fmt_ts(action.created_at).into(),
            ])
            .to_string(SqliteQueryBuilder);

        sqlx::query(&query).execute(&self.pool).await?;
        Ok(())
    }

    async fn admin_actions(&self, id: &MemberId) -> Result<Vec<AdminAction>> {
        let query = Query::select()
            .columns([
                AdminActions::Actor,
                AdminActions::Action,
                AdminActions::MemberId,
                AdminActions::Detail,
                AdminActions::CreatedAt,
            ])
            .from(AdminActions::Table)
            .and_where(Expr::col(AdminActions::MemberId).eq(id.as_str()))
            .order_by(AdminActions::Id, Order::Asc)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| {
                let created_at: String = row.try_get("created_at")?;
                Ok(AdminAction {
                    actor: row.try_get("actor")?,
                    action: row.try_get("action")?,
                    member_id: MemberId::new(row.try_get::<String, _>("member_id")?),
                    detail: row.try_get("detail")?,
                    created_at: parse_ts(&created_at)?,
                })
            })
            .collect()
    }
}
