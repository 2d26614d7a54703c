//! Refund dispatch across payment rails.
//!
//! Each adapter declares a [`RefundPolicy`]; the orchestrator applies it,
//! folds the result into the payment record and notifies operators. Except
//! for the ledger-atomic balance rail, a refund first takes a claim on the
//! payment so concurrent requests cannot both reach the provider.

use crate::config::{ManualRefundPolicy, RefundConfig};
use crate::database::error::DatabaseError;
use crate::database::models::{OrderStatus, Payment, PaymentStatus, PaymentUpdate};
use crate::database::LedgerStore;
use crate::error::{AppError, AppErrorKind, DomainError};
use crate::payments::error::PaymentError;
use crate::payments::provider::ProviderAdapter;
use crate::payments::types::{RefundOutcome, RefundPolicy};
use crate::payments::ProviderRegistry;
use crate::services::notification::{
    notify_best_effort, NotificationEvent, NotificationType, Notifier,
};
use crate::services::retry::{retry_with_backoff, RefundAttempt};
use chrono::Utc;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

const MANUAL_FALLBACK_REASON: &str = "refund flagged; process manually via provider dashboard";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundResultOutcome {
    Succeeded,
    ManualActionRequired,
    AlreadyRefunded,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundResult {
    pub payment_id: Uuid,
    pub success: bool,
    pub outcome: RefundResultOutcome,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_response: Option<JsonValue>,
    pub status: PaymentStatus,
    pub attempts: u32,
}

#[derive(Debug, Error)]
pub enum RefundError {
    #[error("payment {0} not found")]
    NotFound(Uuid),
    #[error("payment {payment_id} is {status}; cannot {operation}")]
    InvalidState {
        payment_id: Uuid,
        status: PaymentStatus,
        operation: &'static str,
    },
    #[error("refund already in progress for payment {0}")]
    InProgress(Uuid),
    #[error("provider not available: {0}")]
    Provider(#[from] PaymentError),
    #[error("ledger error: {0}")]
    Ledger(#[from] DatabaseError),
}

impl From<RefundError> for AppError {
    fn from(err: RefundError) -> Self {
        match err {
            RefundError::NotFound(id) => AppError::new(AppErrorKind::Domain(DomainError::NotFound {
                entity: "Payment".to_string(),
                id: id.to_string(),
            })),
            RefundError::InvalidState {
                payment_id,
                status,
                operation,
            } => AppError::new(AppErrorKind::Domain(DomainError::InvalidState {
                payment_id: payment_id.to_string(),
                status: status.to_string(),
                operation: operation.to_string(),
            })),
            RefundError::InProgress(id) => {
                AppError::new(AppErrorKind::Domain(DomainError::RefundInProgress {
                    payment_id: id.to_string(),
                }))
            }
            RefundError::Provider(e) => e.into(),
            RefundError::Ledger(e) => e.into(),
        }
    }
}

/// What the dispatch phase produced, before any status is written.
struct Dispatched {
    outcome: RefundOutcome,
    attempts: Vec<RefundAttempt>,
}

pub struct RefundOrchestrator {
    ledger: Arc<dyn LedgerStore>,
    registry: Arc<ProviderRegistry>,
    notifier: Arc<dyn Notifier>,
    config: RefundConfig,
}

impl RefundOrchestrator {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        registry: Arc<ProviderRegistry>,
        notifier: Arc<dyn Notifier>,
        config: RefundConfig,
    ) -> Self {
        Self {
            ledger,
            registry,
            notifier,
            config,
        }
    }

    pub async fn refund(&self, payment_id: Uuid, reason: &str) -> Result<RefundResult, RefundError> {
        let payment = self
            .ledger
            .get_payment(payment_id)
            .await?
            .ok_or(RefundError::NotFound(payment_id))?;

        if payment.status != PaymentStatus::Completed {
            return Err(RefundError::InvalidState {
                payment_id,
                status: payment.status,
                operation: "refund",
            });
        }

        let adapter = self.registry.get(payment.provider)?;
        info!(
            payment_id = %payment.id,
            provider = %payment.provider,
            reason = %reason,
            "refund requested"
        );

        match adapter.refund_policy() {
            RefundPolicy::LedgerAtomic => self.refund_ledger_atomic(adapter, &payment, reason).await,
            _ => self.refund_with_claim(adapter, &payment, reason).await,
        }
    }

    /// Balance rail: the ledger procedure is the claim, the refund and the
    /// status write in one.
    async fn refund_ledger_atomic(
        &self,
        adapter: Arc<dyn ProviderAdapter>,
        payment: &Payment,
        reason: &str,
    ) -> Result<RefundResult, RefundError> {
        let outcome =
            match tokio::time::timeout(self.config.refund_deadline, adapter.refund(payment, reason))
                .await
            {
                Ok(outcome) => outcome,
                Err(_) => return Ok(self.deadline_result(payment)),
            };
        let attempts = 1;

        match outcome {
            RefundOutcome::Succeeded {
                evidence,
                already_refunded,
            } => {
                if already_refunded {
                    info!(payment_id = %payment.id, "balance payment was already refunded");
                    return Ok(RefundResult {
                        payment_id: payment.id,
                        success: true,
                        outcome: RefundResultOutcome::AlreadyRefunded,
                        message: "Payment was already refunded".to_string(),
                        provider_response: Some(evidence),
                        status: PaymentStatus::Refunded,
                        attempts,
                    });
                }

                self.mark_order_refunded(payment).await;
                self.notify(payment, NotificationType::RefundSucceeded, "Refunded to wallet balance")
                    .await;
                Ok(RefundResult {
                    payment_id: payment.id,
                    success: true,
                    outcome: RefundResultOutcome::Succeeded,
                    message: "Refund credited to wallet balance".to_string(),
                    provider_response: Some(evidence),
                    status: PaymentStatus::Refunded,
                    attempts,
                })
            }
            RefundOutcome::RequiresManualAction { reason, evidence } => {
                // The ledger never asks for manual action; treat it as a failure.
                warn!(payment_id = %payment.id, reason = %reason, "unexpected manual outcome from ledger");
                Ok(self.failed_result(payment, reason, Some(evidence), attempts))
            }
            RefundOutcome::Retryable { error, evidence } | RefundOutcome::Rejected { error, evidence } => {
                error!(payment_id = %payment.id, error = %error, "balance refund failed");
                Ok(self.failed_result(payment, error.user_message(), evidence, attempts))
            }
        }
    }

    async fn refund_with_claim(
        &self,
        adapter: Arc<dyn ProviderAdapter>,
        payment: &Payment,
        reason: &str,
    ) -> Result<RefundResult, RefundError> {
        let claim = Uuid::new_v4();
        if !self.ledger.claim_refund(payment.id, claim).await? {
            let current = self.ledger.get_payment(payment.id).await?;
            return Err(match current {
                Some(p) if p.status != PaymentStatus::Completed => RefundError::InvalidState {
                    payment_id: payment.id,
                    status: p.status,
                    operation: "refund",
                },
                Some(_) => RefundError::InProgress(payment.id),
                None => RefundError::NotFound(payment.id),
            });
        }

        let dispatched = match tokio::time::timeout(
            self.config.refund_deadline,
            self.dispatch(adapter.as_ref(), payment, reason),
        )
        .await
        {
            Ok(dispatched) => dispatched,
            Err(_) => {
                self.release(payment.id, claim).await;
                return Ok(self.deadline_result(payment));
            }
        };
        let attempts = dispatched.attempts.len() as u32;

        match dispatched.outcome {
            RefundOutcome::Succeeded { evidence, .. } => {
                let evidence = refund_evidence(reason, "succeeded", evidence, &dispatched.attempts);
                let status = self
                    .finalize(
                        payment,
                        claim,
                        PaymentStatus::Refunded,
                        evidence.clone(),
                        attempts,
                        NotificationType::RefundSucceeded,
                    )
                    .await?;
                Ok(RefundResult {
                    payment_id: payment.id,
                    success: true,
                    outcome: RefundResultOutcome::Succeeded,
                    message: "Refund completed".to_string(),
                    provider_response: Some(evidence),
                    status,
                    attempts,
                })
            }
            RefundOutcome::RequiresManualAction {
                reason: manual_reason,
                evidence,
            } => {
                let target = match self.config.manual_policy {
                    ManualRefundPolicy::MarkRefunded => PaymentStatus::Refunded,
                    ManualRefundPolicy::HoldPendingManual => PaymentStatus::RefundPendingManual,
                };
                let mut evidence =
                    refund_evidence(reason, "manual_action_required", evidence, &dispatched.attempts);
                evidence["manual_reason"] = JsonValue::String(manual_reason.clone());

                let status = self
                    .finalize(
                        payment,
                        claim,
                        target,
                        evidence.clone(),
                        attempts,
                        NotificationType::RefundManualActionRequired,
                    )
                    .await?;
                warn!(
                    payment_id = %payment.id,
                    provider = %payment.provider,
                    reason = %manual_reason,
                    "refund requires manual action"
                );
                Ok(RefundResult {
                    payment_id: payment.id,
                    success: true,
                    outcome: RefundResultOutcome::ManualActionRequired,
                    message: format!("Refund recorded; {}", manual_reason),
                    provider_response: Some(evidence),
                    status,
                    attempts,
                })
            }
            RefundOutcome::Retryable { error, evidence } | RefundOutcome::Rejected { error, evidence } => {
                self.release(payment.id, claim).await;
                let logged_response = evidence
                    .as_ref()
                    .map(|e| crate::logging::redact_sensitive_data(&e.to_string()))
                    .unwrap_or_default();
                error!(
                    payment_id = %payment.id,
                    provider = %payment.provider,
                    error = %error,
                    provider_response = %logged_response,
                    "refund failed"
                );
                Ok(self.failed_result(payment, error.user_message(), evidence, attempts))
            }
        }
    }

    /// Runs the adapter under its policy. Backoff exhaustion degrades to manual action.
    async fn dispatch(
        &self,
        adapter: &dyn ProviderAdapter,
        payment: &Payment,
        reason: &str,
    ) -> Dispatched {
        match adapter.refund_policy() {
            RefundPolicy::Backoff {
                max_attempts,
                base_delay,
            } => {
                let report =
                    retry_with_backoff(max_attempts, base_delay, |_| adapter.refund(payment, reason))
                        .await;
                let outcome = if report.exhausted {
                    let last = match &report.outcome {
                        RefundOutcome::Retryable { evidence, error } => serde_json::json!({
                            "last_error": error.to_string(),
                            "last_response": evidence,
                        }),
                        _ => JsonValue::Null,
                    };
                    RefundOutcome::RequiresManualAction {
                        reason: MANUAL_FALLBACK_REASON.to_string(),
                        evidence: last,
                    }
                } else {
                    report.outcome
                };
                Dispatched {
                    outcome,
                    attempts: report.attempts,
                }
            }
            RefundPolicy::SingleAttempt | RefundPolicy::LedgerAtomic => {
                let outcome = adapter.refund(payment, reason).await;
                let attempts = vec![RefundAttempt {
                    attempt_number: 1,
                    outcome: outcome.label(),
                    last_error: match &outcome {
                        RefundOutcome::Retryable { error, .. }
                        | RefundOutcome::Rejected { error, .. } => Some(error.to_string()),
                        _ => None,
                    },
                    next_backoff_ms: None,
                }];
                Dispatched { outcome, attempts }
            }
        }
    }

    /// Writes the refund status while holding the claim, then handles the order
    /// and notification. Returns the status written.
    async fn finalize(
        &self,
        payment: &Payment,
        claim: Uuid,
        target: PaymentStatus,
        evidence: JsonValue,
        attempts: u32,
        notification: NotificationType,
    ) -> Result<PaymentStatus, RefundError> {
        let written = match self
            .ledger
            .conditional_update_status(
                payment.id,
                PaymentStatus::Completed,
                target,
                PaymentUpdate {
                    provider_tx_reference: None,
                    provider_refund_evidence: Some(evidence),
                },
            )
            .await
        {
            Ok(written) => written,
            Err(e) => {
                error!(
                    payment_id = %payment.id,
                    error = %e,
                    "provider refunded but status write failed; needs reconciliation"
                );
                self.release(payment.id, claim).await;
                return Err(e.into());
            }
        };

        if !written {
            self.release(payment.id, claim).await;
            let status = self
                .ledger
                .get_payment(payment.id)
                .await?
                .map(|p| p.status)
                .unwrap_or(payment.status);
            error!(
                payment_id = %payment.id,
                status = %status,
                "payment changed under a held refund claim"
            );
            return Err(RefundError::InvalidState {
                payment_id: payment.id,
                status,
                operation: "finalize refund",
            });
        }

        crate::log_payment_event!(
            "refund",
            payment_id = payment.id,
            provider = payment.provider,
            status = target,
            attempts = attempts,
        );

        if target == PaymentStatus::Refunded {
            self.mark_order_refunded(payment).await;
        }
        let message = match (notification, target) {
            (NotificationType::RefundSucceeded, _) => "Refund completed by the provider",
            (_, PaymentStatus::RefundPendingManual) => {
                "Refund is held until an operator confirms the payout"
            }
            _ => "Refund recorded; pay it out manually via the provider dashboard",
        };
        self.notify(payment, notification, message).await;

        Ok(target)
    }

    /// Operator confirmation that a held manual refund has been paid out.
    pub async fn confirm_manual_refund(
        &self,
        payment_id: Uuid,
        operator_note: &str,
    ) -> Result<RefundResult, RefundError> {
        let payment = self
            .ledger
            .get_payment(payment_id)
            .await?
            .ok_or(RefundError::NotFound(payment_id))?;

        if payment.status != PaymentStatus::RefundPendingManual {
            return Err(RefundError::InvalidState {
                payment_id,
                status: payment.status,
                operation: "confirm manual refund",
            });
        }

        let mut evidence = payment
            .provider_refund_evidence
            .clone()
            .filter(JsonValue::is_object)
            .unwrap_or_else(|| serde_json::json!({}));
        evidence["manual_confirmation"] = serde_json::json!({
            "note": operator_note,
            "confirmed_at": Utc::now().to_rfc3339(),
        });

        let written = self
            .ledger
            .conditional_update_status(
                payment_id,
                PaymentStatus::RefundPendingManual,
                PaymentStatus::Refunded,
                PaymentUpdate {
                    provider_tx_reference: None,
                    provider_refund_evidence: Some(evidence.clone()),
                },
            )
            .await?;
        if !written {
            let status = self
                .ledger
                .get_payment(payment_id)
                .await?
                .map(|p| p.status)
                .unwrap_or(payment.status);
            return Err(RefundError::InvalidState {
                payment_id,
                status,
                operation: "confirm manual refund",
            });
        }

        info!(payment_id = %payment_id, "manual refund confirmed");
        self.mark_order_refunded(&payment).await;
        self.notify(&payment, NotificationType::ManualRefundConfirmed, operator_note)
            .await;

        Ok(RefundResult {
            payment_id,
            success: true,
            outcome: RefundResultOutcome::Succeeded,
            message: "Manual refund confirmed".to_string(),
            provider_response: Some(evidence),
            status: PaymentStatus::Refunded,
            attempts: 0,
        })
    }

    async fn release(&self, payment_id: Uuid, claim: Uuid) {
        if let Err(e) = self.ledger.release_refund_claim(payment_id, claim).await {
            error!(payment_id = %payment_id, error = %e, "failed to release refund claim");
        }
    }

    async fn mark_order_refunded(&self, payment: &Payment) {
        let Some(order_id) = payment.order_id else {
            return;
        };
        if let Err(e) = self
            .ledger
            .update_order_status(order_id, OrderStatus::Refunded)
            .await
        {
            error!(
                payment_id = %payment.id,
                order_id = %order_id,
                error = %e,
                "failed to mark order refunded"
            );
        }
    }

    async fn notify(&self, payment: &Payment, notification_type: NotificationType, message: &str) {
        let event = NotificationEvent {
            notification_type,
            payment_id: payment.id,
            provider: payment.provider,
            amount: payment.amount_original.to_string(),
            currency: payment.currency_original.clone(),
            message: message.to_string(),
        };
        notify_best_effort(&self.notifier, event, self.config.notify_timeout).await;
    }

    fn failed_result(
        &self,
        payment: &Payment,
        message: String,
        provider_response: Option<JsonValue>,
        attempts: u32,
    ) -> RefundResult {
        RefundResult {
            payment_id: payment.id,
            success: false,
            outcome: RefundResultOutcome::Failed,
            message,
            provider_response,
            status: payment.status,
            attempts,
        }
    }

    fn deadline_result(&self, payment: &Payment) -> RefundResult {
        warn!(
            payment_id = %payment.id,
            deadline_ms = self.config.refund_deadline.as_millis() as u64,
            "refund deadline exceeded"
        );
        RefundResult {
            payment_id: payment.id,
            success: false,
            outcome: RefundResultOutcome::Failed,
            message: "Refund timed out; please retry later".to_string(),
            provider_response: None,
            status: payment.status,
            attempts: 0,
        }
    }
}

fn refund_evidence(
    reason: &str,
    outcome: &str,
    provider_response: JsonValue,
    attempts: &[RefundAttempt],
) -> JsonValue {
    serde_json::json!({
        "reason": reason,
        "outcome": outcome,
        "provider_response": provider_response,
        "attempts": attempts,
        "recorded_at": Utc::now().to_rfc3339(),
    })
}
