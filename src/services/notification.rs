//! Refund notices for operators. Best effort: a notifier failure is logged
//! and dropped, never surfaced to the refund caller.

use crate::payments::types::ProviderKind;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    RefundSucceeded,
    RefundManualActionRequired,
    ManualRefundConfirmed,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::RefundSucceeded => "refund_succeeded",
            NotificationType::RefundManualActionRequired => "refund_manual_action_required",
            NotificationType::ManualRefundConfirmed => "manual_refund_confirmed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub notification_type: NotificationType,
    pub payment_id: Uuid,
    pub provider: ProviderKind,
    pub amount: String,
    pub currency: String,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum NotifierError {
    #[error("notification transport failed: {0}")]
    Transport(String),
    #[error("notification rejected with HTTP {0}")]
    Rejected(u16),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: &NotificationEvent) -> Result<(), NotifierError>;
}

/// Writes notices to the structured log.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, event: &NotificationEvent) -> Result<(), NotifierError> {
        info!(
            notification = event.notification_type.as_str(),
            payment_id = %event.payment_id,
            provider = %event.provider,
            amount = %event.amount,
            currency = %event.currency,
            "NOTIFICATION: {}", event.message
        );
        Ok(())
    }
}

/// Posts notices to a Discord channel webhook.
pub struct DiscordNotifier {
    client: reqwest::Client,
    webhook_url: String,
}

impl DiscordNotifier {
    pub fn new(webhook_url: String, timeout: Duration) -> Result<Self, NotifierError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotifierError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            webhook_url,
        })
    }
}

pub fn discord_message(event: &NotificationEvent) -> String {
    let title = match event.notification_type {
        NotificationType::RefundSucceeded => "Refund completed",
        NotificationType::RefundManualActionRequired => "Refund needs manual action",
        NotificationType::ManualRefundConfirmed => "Manual refund confirmed",
    };
    format!(
        "**{}**\nPayment: `{}`\nProvider: {}\nAmount: {} {}\n{}",
        title, event.payment_id, event.provider, event.amount, event.currency, event.message
    )
}

#[async_trait]
impl Notifier for DiscordNotifier {
    async fn notify(&self, event: &NotificationEvent) -> Result<(), NotifierError> {
        let response = self
            .client
            .post(&self.webhook_url)
            .json(&serde_json::json!({ "content": discord_message(event) }))
            .send()
            .await
            .map_err(|e| NotifierError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(NotifierError::Rejected(response.status().as_u16()));
        }
        Ok(())
    }
}

/// Sends `event`, bounded by `timeout`. Errors and timeouts are logged only.
pub async fn notify_best_effort(
    notifier: &Arc<dyn Notifier>,
    event: NotificationEvent,
    timeout: Duration,
) {
    match tokio::time::timeout(timeout, notifier.notify(&event)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(
            payment_id = %event.payment_id,
            error = %e,
            "notification failed"
        ),
        Err(_) => warn!(
            payment_id = %event.payment_id,
            timeout_ms = timeout.as_millis() as u64,
            "notification timed out"
        ),
    }
}
