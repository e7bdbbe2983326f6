//! Best-effort notifications.
//!
//! Settlement never waits on a notifier and never fails because of one:
//! [`dispatch`] spawns the send and swallows its error.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::model::{MemberId, TxnReference};

/// Notification errors.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Notification channel closed")]
    ChannelClosed,
}

/// Something a member should hear about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    CommissionCredited {
        recipient: MemberId,
        amount_cents: i64,
        origin: TxnReference,
    },
    PhaseChanged {
        member: MemberId,
        from: u8,
        to: u8,
    },
    RewardGranted {
        member: MemberId,
        phase: u8,
        period: String,
        credit_cents: i64,
        free_product_cents: i64,
    },
    PayoutCompleted {
        member: MemberId,
        payout_id: Uuid,
        amount_cents: i64,
    },
    PayoutFailed {
        member: MemberId,
        payout_id: Uuid,
        reason: String,
    },
}

impl Notification {
    pub fn member(&self) -> &MemberId {
        match self {
            Notification::CommissionCredited { recipient, .. } => recipient,
            Notification::PhaseChanged { member, .. }
            | Notification::RewardGranted { member, .. }
            | Notification::PayoutCompleted { member, .. }
            | Notification::PayoutFailed { member, .. } => member,
        }
    }
}

/// Notification sender.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError>;

    /// Name for logging.
    fn name(&self) -> &str;
}

/// Send without waiting. Failures are logged at debug level and dropped.
pub fn dispatch(notifier: &Arc<dyn Notifier>, notification: Notification) {
    let notifier = Arc::clone(notifier);
    tokio::spawn(async move {
        if let Err(e) = notifier.notify(&notification).await {
            debug!(
                notifier = %notifier.name(),
                member = %notification.member(),
                error = %e,
                "Notification dropped"
            );
        }
    });
}

/// Writes notifications to the log.
#[derive(Debug, Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        info!(member = %notification.member(), notification = ?notification, "Notification");
        Ok(())
    }

    fn name(&self) -> &str {
        "tracing"
    }
}

/// Forwards notifications into an unbounded channel.
pub struct ChannelNotifier {
    sender: mpsc::UnboundedSender<Notification>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl Notifier for ChannelNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        self.sender
            .send(notification.clone())
            .map_err(|_| NotifyError::ChannelClosed)
    }

    fn name(&self) -> &str {
        "channel"
    }
}
