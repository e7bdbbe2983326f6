//! Database schema definitions using sea-query.
//!
//! These define the table and column identifiers for type-safe query building.
//! Timestamps are RFC 3339 text with nanosecond precision; rates are decimal text.

use sea_query::Iden;

#[derive(Iden)]
pub enum Members {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "sponsor_id"]
    SponsorId,
    #[iden = "deactivated"]
    Deactivated,
    #[iden = "ecommerce_rate"]
    EcommerceRate,
    #[iden = "created_at"]
    CreatedAt,
}

#[derive(Iden)]
pub enum Subscriptions {
    Table,
    #[iden = "member_id"]
    MemberId,
    #[iden = "kind"]
    Kind,
    #[iden = "status"]
    Status,
    #[iden = "current_period_end"]
    CurrentPeriodEnd,
    #[iden = "gateway"]
    Gateway,
    #[iden = "plan"]
    Plan,
    #[iden = "cancel_at_period_end"]
    CancelAtPeriodEnd,
}

#[derive(Iden)]
pub enum AdminActions {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "actor"]
    Actor,
    #[iden = "action"]
    Action,
    #[iden = "member_id"]
    MemberId,
    #[iden = "detail"]
    Detail,
    #[iden = "created_at"]
    CreatedAt,
}

#[derive(Iden)]
pub enum Accounts {
    Table,
    #[iden = "member_id"]
    MemberId,
    #[iden = "account"]
    Account,
    #[iden = "balance_cents"]
    BalanceCents,
    #[iden = "lifetime_cents"]
    LifetimeCents,
}

#[derive(Iden)]
pub enum LedgerTxns {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "member_id"]
    MemberId,
    #[iden = "account"]
    Account,
    #[iden = "delta_cents"]
    DeltaCents,
    #[iden = "balance_after_cents"]
    BalanceAfterCents,
    #[iden = "reason"]
    Reason,
    #[iden = "ref_source"]
    RefSource,
    #[iden = "ref_key"]
    RefKey,
    #[iden = "created_at"]
    CreatedAt,
}

#[derive(Iden)]
pub enum ProcessedPayments {
    Table,
    #[iden = "gateway"]
    Gateway,
    #[iden = "gateway_ref"]
    GatewayRef,
    #[iden = "buyer_id"]
    BuyerId,
    #[iden = "amount_cents"]
    AmountCents,
    #[iden = "intent"]
    Intent,
    #[iden = "processed_at"]
    ProcessedAt,
}

#[derive(Iden)]
pub enum CommissionEvents {
    Table,
    #[iden = "origin_source"]
    OriginSource,
    #[iden = "origin_key"]
    OriginKey,
    #[iden = "recipient_id"]
    RecipientId,
    #[iden = "kind"]
    Kind,
    #[iden = "level"]
    Level,
    #[iden = "payer_id"]
    PayerId,
    #[iden = "amount_cents"]
    AmountCents,
    #[iden = "rate"]
    Rate,
    #[iden = "created_at"]
    CreatedAt,
}

#[derive(Iden)]
pub enum PhaseRecords {
    Table,
    #[iden = "member_id"]
    MemberId,
    #[iden = "current_phase"]
    CurrentPhase,
    #[iden = "highest_phase"]
    HighestPhase,
    #[iden = "manual_override"]
    ManualOverride,
    #[iden = "phase1_granted"]
    Phase1Granted,
    #[iden = "phase2_granted"]
    Phase2Granted,
    #[iden = "phase3_granted"]
    Phase3Granted,
    #[iden = "phase2_achieved_at"]
    Phase2AchievedAt,
}

#[derive(Iden)]
pub enum PhaseRewards {
    Table,
    #[iden = "member_id"]
    MemberId,
    #[iden = "phase"]
    Phase,
    #[iden = "period"]
    Period,
    #[iden = "schedule"]
    Schedule,
    #[iden = "credit_cents"]
    CreditCents,
    #[iden = "free_product_cents"]
    FreeProductCents,
    #[iden = "granted_at"]
    GrantedAt,
}

#[derive(Iden)]
pub enum PayoutAccounts {
    Table,
    #[iden = "member_id"]
    MemberId,
    #[iden = "provider"]
    Provider,
    #[iden = "status"]
    Status,
    #[iden = "provider_account_id"]
    ProviderAccountId,
}

#[derive(Iden)]
#[iden = "payout_settings"]
pub enum PayoutSettingsTable {
    Table,
    #[iden = "member_id"]
    MemberId,
    #[iden = "auto_payout"]
    AutoPayout,
    #[iden = "threshold_cents"]
    ThresholdCents,
    #[iden = "preferred_provider"]
    PreferredProvider,
}

#[derive(Iden)]
pub enum Payouts {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "member_id"]
    MemberId,
    #[iden = "provider"]
    Provider,
    #[iden = "provider_account_id"]
    ProviderAccountId,
    #[iden = "amount_cents"]
    AmountCents,
    #[iden = "status"]
    Status,
    #[iden = "provider_reference"]
    ProviderReference,
    #[iden = "failure_reason"]
    FailureReason,
    #[iden = "created_at"]
    CreatedAt,
    #[iden = "updated_at"]
    UpdatedAt,
}

/// SQL for creating the member tables.
pub const CREATE_MEMBER_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS members (
    id TEXT PRIMARY KEY,
    sponsor_id TEXT,
    deactivated INTEGER NOT NULL DEFAULT 0,
    ecommerce_rate TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_members_sponsor ON members(sponsor_id);

CREATE TABLE IF NOT EXISTS subscriptions (
    member_id TEXT NOT NULL,
    kind TEXT NOT NULL,
    status TEXT NOT NULL,
    current_period_end TEXT,
    gateway TEXT,
    plan TEXT,
    cancel_at_period_end INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (member_id, kind)
);

CREATE TABLE IF NOT EXISTS admin_actions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    actor TEXT NOT NULL,
    action TEXT NOT NULL,
    member_id TEXT NOT NULL,
    detail TEXT NOT NULL,
    created_at TEXT NOT NULL
);
"#;

/// SQL for creating the ledger tables.
pub const CREATE_LEDGER_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS accounts (
    member_id TEXT NOT NULL,
    account TEXT NOT NULL,
    balance_cents INTEGER NOT NULL DEFAULT 0 CHECK (balance_cents >= 0),
    lifetime_cents INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (member_id, account)
);

CREATE TABLE IF NOT EXISTS ledger_txns (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    member_id TEXT NOT NULL,
    account TEXT NOT NULL,
    delta_cents INTEGER NOT NULL,
    balance_after_cents INTEGER NOT NULL,
    reason TEXT NOT NULL,
    ref_source TEXT,
    ref_key TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_ledger_txns_member ON ledger_txns(member_id, account);
CREATE UNIQUE INDEX IF NOT EXISTS idx_ledger_txns_reference
    ON ledger_txns(account, ref_source, ref_key) WHERE ref_source IS NOT NULL;
"#;

/// SQL for creating the settlement tables.
pub const CREATE_SETTLEMENT_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS processed_payments (
    gateway TEXT NOT NULL,
    gateway_ref TEXT NOT NULL,
    buyer_id TEXT NOT NULL,
    amount_cents INTEGER NOT NULL,
    intent TEXT NOT NULL,
    processed_at TEXT NOT NULL,
    PRIMARY KEY (gateway, gateway_ref)
);

CREATE TABLE IF NOT EXISTS commission_events (
    origin_source TEXT NOT NULL,
    origin_key TEXT NOT NULL,
    recipient_id TEXT NOT NULL,
    kind TEXT NOT NULL,
    level INTEGER NOT NULL,
    payer_id TEXT NOT NULL,
    amount_cents INTEGER NOT NULL,
    rate TEXT NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (origin_source, origin_key, recipient_id, kind, level)
);

CREATE INDEX IF NOT EXISTS idx_commission_events_recipient ON commission_events(recipient_id);
"#;

/// SQL for creating the phase tables.
pub const CREATE_PHASE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS phase_records (
    member_id TEXT PRIMARY KEY,
    current_phase INTEGER NOT NULL DEFAULT 0,
    highest_phase INTEGER NOT NULL DEFAULT 0,
    manual_override INTEGER NOT NULL DEFAULT 0,
    phase1_granted INTEGER NOT NULL DEFAULT 0,
    phase2_granted INTEGER NOT NULL DEFAULT 0,
    phase3_granted INTEGER NOT NULL DEFAULT 0,
    phase2_achieved_at TEXT
);

CREATE TABLE IF NOT EXISTS phase_rewards (
    member_id TEXT NOT NULL,
    phase INTEGER NOT NULL,
    period TEXT NOT NULL,
    schedule TEXT NOT NULL,
    credit_cents INTEGER NOT NULL,
    free_product_cents INTEGER NOT NULL,
    granted_at TEXT NOT NULL,
    PRIMARY KEY (member_id, phase, period)
);
"#;

/// SQL for creating the payout tables.
pub const CREATE_PAYOUT_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS payout_accounts (
    member_id TEXT NOT NULL,
    provider TEXT NOT NULL,
    status TEXT NOT NULL,
    provider_account_id TEXT NOT NULL,
    PRIMARY KEY (member_id, provider)
);

CREATE TABLE IF NOT EXISTS payout_settings (
    member_id TEXT PRIMARY KEY,
    auto_payout INTEGER NOT NULL DEFAULT 0,
    threshold_cents INTEGER,
    preferred_provider TEXT
);

CREATE TABLE IF NOT EXISTS payouts (
    id TEXT PRIMARY KEY,
    member_id TEXT NOT NULL,
    provider TEXT NOT NULL,
    provider_account_id TEXT NOT NULL,
    amount_cents INTEGER NOT NULL,
    status TEXT NOT NULL,
    provider_reference TEXT,
    failure_reason TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_payouts_member ON payouts(member_id);
CREATE UNIQUE INDEX IF NOT EXISTS idx_payouts_one_pending
    ON payouts(member_id) WHERE status = 'pending';
"#;

/// All DDL, in creation order.
pub const ALL_TABLES: &[&str] = &[
    CREATE_MEMBER_TABLES,
    CREATE_LEDGER_TABLES,
    CREATE_SETTLEMENT_TABLES,
    CREATE_PHASE_TABLES,
    CREATE_PAYOUT_TABLES,
];
