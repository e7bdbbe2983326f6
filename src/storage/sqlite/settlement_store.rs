//! SQLite SettlementStore implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_query::{Expr, OnConflict, Order, Query, SqliteQueryBuilder};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use super::ledger_store::apply_delta_tx;
use super::member_store::{member_exists, subscription_tx, upsert_subscription_tx};
use super::{fmt_ts, parse_decimal, parse_ts, to_u8, SqliteStore};
use crate::model::{
    Account, CommissionEvent, LedgerDelta, MemberId, PaymentIntent, ProcessedPayment,
    Subscription, SubscriptionStatus, TxnReference,
};
use crate::storage::schema::{CommissionEvents, ProcessedPayments, Subscriptions};
use crate::storage::{
    AppliedSettlement, CommitOutcome, RenewalOutcome, Result, SettlementBatch, SettlementStore,
    StorageError, SubscriptionRenewal,
};

const COMMISSION_COLUMNS: [CommissionEvents; 8] = [
    CommissionEvents::OriginSource,
    CommissionEvents::OriginKey,
    CommissionEvents::RecipientId,
    CommissionEvents::Kind,
    CommissionEvents::Level,
    CommissionEvents::PayerId,
    CommissionEvents::AmountCents,
    CommissionEvents::Rate,
];

fn commission_from_row(row: &SqliteRow) -> Result<CommissionEvent> {
    let kind: String = row.try_get("kind")?;
    let rate: String = row.try_get("rate")?;
    Ok(CommissionEvent {
        origin: TxnReference::new(
            row.try_get::<String, _>("origin_source")?,
            row.try_get::<String, _>("origin_key")?,
        ),
        payer_id: MemberId::new(row.try_get::<String, _>("payer_id")?),
        recipient_id: MemberId::new(row.try_get::<String, _>("recipient_id")?),
        kind: kind.parse()?,
        level: to_u8(row.try_get("level")?, "level")?,
        amount_cents: row.try_get("amount_cents")?,
        rate: parse_decimal(&rate)?,
    })
}

/// Insert the event and credit its recipient, unless the key already exists.
async fn credit_commission_tx(
    conn: &mut SqliteConnection,
    event: &CommissionEvent,
    at: DateTime<Utc>,
) -> Result<bool> {
    let query = Query::insert()
        .into_table(CommissionEvents::Table)
        .columns([
            CommissionEvents::OriginSource,
            CommissionEvents::OriginKey,
            CommissionEvents::RecipientId,
            CommissionEvents::Kind,
            CommissionEvents::Level,
            CommissionEvents::PayerId,
            CommissionEvents::AmountCents,
            CommissionEvents::Rate,
            CommissionEvents::CreatedAt,
        ])
        .values_panic([
            event.origin.source.as_str().into(),
            event.origin.key.as_str().into(),
            event.recipient_id.as_str().into(),
            event.kind.as_str().into(),
            i64::from(event.level).into(),
            event.payer_id.as_str().into(),
            event.amount_cents.into(),
            event.rate.to_string().into(),
            fmt_ts(at).into(),
        ])
        .on_conflict(
            OnConflict::columns([
                CommissionEvents::OriginSource,
                CommissionEvents::OriginKey,
                CommissionEvents::RecipientId,
                CommissionEvents::Kind,
                CommissionEvents::Level,
            ])
            .do_nothing()
            .to_owned(),
        )
        .to_string(SqliteQueryBuilder);

    let inserted = sqlx::query(&query).execute(&mut *conn).await?.rows_affected() == 1;
    if !inserted {
        return Ok(false);
    }

    let delta = LedgerDelta::credit(
        Account::NetworkEarnings,
        event.recipient_id.clone(),
        event.amount_cents,
        event.reason(),
    )
    .with_reference(event.ledger_reference());
    if !apply_delta_tx(conn, &delta, at).await?.applied {
        return Err(StorageError::ReferenceConflict(event.ledger_reference()));
    }
    Ok(true)
}

async fn renew_subscription_tx(
    conn: &mut SqliteConnection,
    buyer: &MemberId,
    renewal: &SubscriptionRenewal,
    at: DateTime<Utc>,
) -> Result<RenewalOutcome> {
    if !member_exists(conn, buyer).await? {
        return Err(StorageError::not_found("member", buyer));
    }

    let existing = subscription_tx(conn, buyer, renewal.kind).await?;
    let period_end =
        renewal.next_period_end(existing.as_ref().and_then(|s| s.current_period_end), at);

    upsert_subscription_tx(
        conn,
        &Subscription {
            member_id: buyer.clone(),
            kind: renewal.kind,
            status: SubscriptionStatus::Active,
            current_period_end: Some(period_end),
            gateway: Some(renewal.gateway),
            plan: renewal
                .plan
                .clone()
                .or_else(|| existing.as_ref().and_then(|s| s.plan.clone())),
            cancel_at_period_end: existing.as_ref().is_some_and(|s| s.cancel_at_period_end),
        },
    )
    .await?;

    let cancel_other = Query::update()
        .table(Subscriptions::Table)
        .value(Subscriptions::Status, SubscriptionStatus::Canceled.as_str())
        .and_where(Expr::col(Subscriptions::MemberId).eq(buyer.as_str()))
        .and_where(Expr::col(Subscriptions::Kind).eq(renewal.kind.other().as_str()))
        .and_where(Expr::col(Subscriptions::Status).eq(SubscriptionStatus::Active.as_str()))
        .to_string(SqliteQueryBuilder);
    let canceled_other = sqlx::query(&cancel_other)
        .execute(&mut *conn)
        .await?
        .rows_affected()
        > 0;

    Ok(RenewalOutcome {
        previous_status: existing.map(|s| s.status),
        period_end,
        canceled_other,
    })
}

async fn commit_settlement_tx(
    conn: &mut SqliteConnection,
    batch: &SettlementBatch,
) -> Result<CommitOutcome> {
    let payment = &batch.payment;
    let at = payment.processed_at;
    let intent = serde_json::to_string(&payment.intent)
        .map_err(|e| StorageError::Corrupt(format!("payment intent: {e}")))?;

    let claim = Query::insert()
        .into_table(ProcessedPayments::Table)
        .columns([
            ProcessedPayments::Gateway,
            ProcessedPayments::GatewayRef,
            ProcessedPayments::BuyerId,
            ProcessedPayments::AmountCents,
            ProcessedPayments::Intent,
            ProcessedPayments::ProcessedAt,
        ])
        .values_panic([
            payment.origin.source.as_str().into(),
            payment.origin.key.as_str().into(),
            payment.buyer_id.as_str().into(),
            payment.amount_cents.into(),
            intent.into(),
            fmt_ts(at).into(),
        ])
        .on_conflict(
            OnConflict::columns([ProcessedPayments::Gateway, ProcessedPayments::GatewayRef])
                .do_nothing()
                .to_owned(),
        )
        .to_string(SqliteQueryBuilder);

    if sqlx::query(&claim).execute(&mut *conn).await?.rows_affected() == 0 {
        return Ok(CommitOutcome::AlreadyProcessed);
    }

    let mut credited = Vec::new();
    let mut skipped_duplicates = 0;
    for event in &batch.commissions {
        if credit_commission_tx(conn, event, at).await? {
            credited.push(event.clone());
        } else {
            skipped_duplicates += 1;
        }
    }

    let renewal = match &batch.subscription {
        Some(renewal) => Some(renew_subscription_tx(conn, &payment.buyer_id, renewal, at).await?),
        None => None,
    };

    let wallet_balance_cents = match &batch.wallet_credit {
        Some(delta) => Some(apply_delta_tx(conn, delta, at).await?.balance_cents),
        None => None,
    };

    Ok(CommitOutcome::Applied(AppliedSettlement {
        credited,
        skipped_duplicates,
        renewal,
        wallet_balance_cents,
    }))
}

#[async_trait]
impl SettlementStore for SqliteStore {
    async fn is_processed(&self, origin: &TxnReference) -> Result<bool> {
        let query = Query::select()
            .column(ProcessedPayments::GatewayRef)
            .from(ProcessedPayments::Table)
            .and_where(Expr::col(ProcessedPayments::Gateway).eq(origin.source.as_str()))
            .and_where(Expr::col(ProcessedPayments::GatewayRef).eq(origin.key.as_str()))
            .to_string(SqliteQueryBuilder);

        Ok(sqlx::query(&query)
            .fetch_optional(&self.pool)
            .await?
            .is_some())
    }

    async fn processed_payment(&self, origin: &TxnReference) -> Result<Option<ProcessedPayment>> {
        let query = Query::select()
            .columns([
                ProcessedPayments::BuyerId,
                ProcessedPayments::AmountCents,
                ProcessedPayments::Intent,
                ProcessedPayments::ProcessedAt,
            ])
            .from(ProcessedPayments::Table)
            .and_where(Expr::col(ProcessedPayments::Gateway).eq(origin.source.as_str()))
            .and_where(Expr::col(ProcessedPayments::GatewayRef).eq(origin.key.as_str()))
            .to_string(SqliteQueryBuilder);

        let Some(row) = sqlx::query(&query).fetch_optional(&self.pool).await? else {
            return Ok(None);
        };
        let intent: String = row.try_get("intent")?;
        let processed_at: String = row.try_get("processed_at")?;
        let intent: PaymentIntent = serde_json::from_str(&intent)
            .map_err(|e| StorageError::Corrupt(format!("payment intent {intent:?}: {e}")))?;

        Ok(Some(ProcessedPayment {
            origin: origin.clone(),
            buyer_id: MemberId::new(row.try_get::<String, _>("buyer_id")?),
            amount_cents: row.try_get("amount_cents")?,
            intent,
            processed_at: parse_ts(&processed_at)?,
        }))
    }

    async fn commit_settlement(&self, batch: &SettlementBatch) -> Result<CommitOutcome> {
        let mut conn = self.begin().await?;
        let result = commit_settlement_tx(&mut conn, batch).await;
        Self::finish(conn, result).await
    }

    async fn commission_events(&self, origin: &TxnReference) -> Result<Vec<CommissionEvent>> {
        let query = Query::select()
            .columns(COMMISSION_COLUMNS)
            .from(CommissionEvents::Table)
            .and_where(Expr::col(CommissionEvents::OriginSource).eq(origin.source.as_str()))
            .and_where(Expr::col(CommissionEvents::OriginKey).eq(origin.key.as_str()))
            .order_by(CommissionEvents::Kind, Order::Desc)
            .order_by(CommissionEvents::Level, Order::Asc)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(commission_from_row).collect()
    }

    async fn commissions_for_recipient(
        &self,
        recipient: &MemberId,
    ) -> Result<Vec<CommissionEvent>> {
        let query = Query::select()
            .columns(COMMISSION_COLUMNS)
            .from(CommissionEvents::Table)
            .and_where(Expr::col(CommissionEvents::RecipientId).eq(recipient.as_str()))
            .order_by(CommissionEvents::CreatedAt, Order::Asc)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(commission_from_row).collect()
    }

    async fn record_missing_commissions(
        &self,
        events: &[CommissionEvent],
    ) -> Result<Vec<CommissionEvent>> {
        let now = Utc::now();
        let mut conn = self.begin().await?;
        let result = async {
            let mut applied = Vec::new();
            for event in events {
                if credit_commission_tx(&mut conn, event, now).await? {
                    applied.push(event.clone());
                }
            }
            Ok::<_, StorageError>(applied)
        }
        .await;
        Self::finish(conn, result).await
    }
}
