//! mlm-settle: settlement runner
//!
//! Reads newline-delimited gateway confirmations (JSON) from stdin, settles
//! each one and writes one JSON receipt per line to stdout.
//!
//! ## Usage
//! ```text
//! mlm-settle [--config <path>]                  settle confirmations from stdin
//! mlm-settle [--config <path>] --sweep-payouts  run one auto-payout sweep
//! mlm-settle [--config <path>] --evaluate-phases  evaluate every member's phase
//! ```
//!
//! ## Configuration
//! - SETTLEMENT_CONFIG: optional YAML config file
//! - SETTLEMENT__<SECTION>__<KEY>: overrides (e.g. SETTLEMENT__STORAGE__TYPE=memory)
//! - SETTLEMENT_LOG: tracing filter (default "info"), logs go to stderr

use std::sync::Arc;

use backon::Retryable;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{error, info, warn};

use mlm_settlement::config::Config;
use mlm_settlement::notify::{Notifier, TracingNotifier};
use mlm_settlement::payout::{HttpPayoutProvider, PayoutService};
use mlm_settlement::phase::PhaseEngine;
use mlm_settlement::settlement::{GatewayConfirmation, SettlementCommand, SettlementService};
use mlm_settlement::storage::{init_storage, Store};
use mlm_settlement::utils::bootstrap::{has_flag, init_tracing, parse_config_path};
use mlm_settlement::utils::retry::storage_backoff;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let args: Vec<String> = std::env::args().collect();
    let config_path = parse_config_path(&args);
    let config = Config::load(config_path.as_deref()).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        phase_config_version = config.phases.version,
        commission_levels = config.phases.commission_levels,
        "Starting mlm-settle"
    );

    let store = (|| async { init_storage(&config.storage).await })
        .retry(storage_backoff())
        .notify(|e, delay| warn!(error = %e, ?delay, "Storage not ready; retrying"))
        .await?;
    info!("Storage initialized");

    let notifier: Arc<dyn Notifier> = Arc::new(TracingNotifier);

    if has_flag(&args, "--sweep-payouts") {
        return sweep_payouts(&config, store, notifier).await;
    }
    if has_flag(&args, "--evaluate-phases") {
        return evaluate_phases(&config, store, notifier).await;
    }

    let settlement = SettlementService::new(
        store,
        Arc::new(config.phases.clone()),
        config.settlement.clone(),
    )
    .with_notifier(notifier);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let output = settle_line(&settlement, line).await;
        stdout.write_all(output.to_string().as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
    }

    info!("Input closed; exiting");
    Ok(())
}

async fn settle_line(settlement: &SettlementService, line: &str) -> serde_json::Value {
    let confirmation: GatewayConfirmation = match serde_json::from_str(line) {
        Ok(confirmation) => confirmation,
        Err(e) => {
            warn!(error = %e, "Malformed confirmation");
            return json!({ "error": format!("malformed confirmation: {e}") });
        }
    };
    let gateway_ref = confirmation.gateway_ref.clone();

    let command = match SettlementCommand::try_from(confirmation) {
        Ok(command) => command,
        Err(e) => {
            warn!(gateway_ref = %gateway_ref, error = %e, "Rejected confirmation");
            return json!({ "gatewayRef": gateway_ref, "error": e.to_string() });
        }
    };

    match settlement.handle_confirmed_payment(command).await {
        Ok(receipt) => serde_json::to_value(&receipt)
            .unwrap_or_else(|e| json!({ "gatewayRef": gateway_ref, "error": e.to_string() })),
        Err(e) => {
            error!(gateway_ref = %gateway_ref, error = %e, "Settlement failed");
            json!({ "gatewayRef": gateway_ref, "error": e.to_string() })
        }
    }
}

async fn sweep_payouts(
    config: &Config,
    store: Arc<dyn Store>,
    notifier: Arc<dyn Notifier>,
) -> Result<(), Box<dyn std::error::Error>> {
    let http = config
        .payout
        .http
        .clone()
        .ok_or("Payout sweep requires 'payout.http' configuration")?;
    let provider = Arc::new(HttpPayoutProvider::new(http)?);

    let payouts =
        PayoutService::new(store, config.payout.clone(), provider).with_notifier(notifier);
    let report = payouts.sweep_auto_payouts().await?;

    println!("{}", serde_json::to_string(&report)?);
    Ok(())
}

/// Scheduled entry point for monthly reward periods.
async fn evaluate_phases(
    config: &Config,
    store: Arc<dyn Store>,
    notifier: Arc<dyn Notifier>,
) -> Result<(), Box<dyn std::error::Error>> {
    let engine =
        PhaseEngine::new(store, Arc::new(config.phases.clone())).with_notifier(notifier);
    let report = engine.evaluate_all().await?;

    println!("{}", serde_json::to_string(&report)?);
    Ok(())
}
