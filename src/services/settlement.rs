//! Settlement of inbound provider callbacks.
//!
//! A callback moves a pending payment to completed or failed exactly once.
//! Duplicate and late deliveries are answered as already processed; the
//! conditional `pending -> *` write in the ledger store decides races.

use crate::database::error::DatabaseError;
use crate::database::models::{Payment, PaymentKind, OrderStatus, PaymentStatus, PaymentUpdate};
use crate::database::LedgerStore;
use crate::error::{AppError, AppErrorKind, DomainError, ExternalError, ValidationError};
use crate::payments::error::PaymentError;
use crate::payments::provider::CallbackParseError;
use crate::payments::types::{CallbackOutcome, ProviderKind};
use crate::payments::ProviderRegistry;
use http::HeaderMap;
use serde::Serialize;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum SettlementOutcome {
    /// This delivery performed the transition.
    Processed { payment_id: Uuid, status: PaymentStatus },
    /// The payment had already left `pending`; nothing was written.
    AlreadyProcessed { payment_id: Uuid, status: PaymentStatus },
    /// Intermediate provider status; nothing to do yet.
    Acknowledged,
}

impl SettlementOutcome {
    pub fn message(&self) -> &'static str {
        match self {
            SettlementOutcome::Processed { .. } => "processed",
            SettlementOutcome::AlreadyProcessed { .. } => "already processed",
            SettlementOutcome::Acknowledged => "acknowledged",
        }
    }
}

#[derive(Debug, Error)]
pub enum SettlementError {
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
    #[error("invalid webhook signature: {0}")]
    InvalidSignature(String),
    #[error(transparent)]
    Parse(#[from] CallbackParseError),
    #[error("no payment for reference {reference}")]
    NotFound { reference: String },
    #[error("signature verification failed: {0}")]
    Verification(PaymentError),
    #[error("ledger error: {0}")]
    Ledger(#[from] DatabaseError),
    #[error("settlement exceeded its {0:?} deadline")]
    DeadlineExceeded(Duration),
}

impl SettlementError {
    pub fn http_status(&self) -> u16 {
        match self {
            SettlementError::UnknownProvider(_) => 404,
            SettlementError::InvalidSignature(_) => 401,
            SettlementError::Parse(_) => 400,
            SettlementError::NotFound { .. } => 404,
            SettlementError::Verification(_)
            | SettlementError::Ledger(_)
            | SettlementError::DeadlineExceeded(_) => 500,
        }
    }
}

impl From<SettlementError> for AppError {
    fn from(err: SettlementError) -> Self {
        match err {
            SettlementError::UnknownProvider(provider) => {
                AppError::new(AppErrorKind::Domain(DomainError::NotFound {
                    entity: "Provider".to_string(),
                    id: provider,
                }))
            }
            SettlementError::InvalidSignature(reason) => PaymentError::WebhookVerificationError {
                message: reason,
            }
            .into(),
            SettlementError::Parse(e) => {
                AppError::new(AppErrorKind::Validation(ValidationError::InvalidField {
                    field: "body".to_string(),
                    reason: e.to_string(),
                }))
            }
            SettlementError::NotFound { reference } => {
                AppError::new(AppErrorKind::Domain(DomainError::NotFound {
                    entity: "Payment".to_string(),
                    id: reference,
                }))
            }
            SettlementError::Verification(e) => {
                AppError::new(AppErrorKind::External(ExternalError::PaymentProvider {
                    provider: "webhook".to_string(),
                    message: e.to_string(),
                    is_retryable: true,
                }))
            }
            SettlementError::Ledger(e) => e.into(),
            SettlementError::DeadlineExceeded(d) => {
                AppError::new(AppErrorKind::External(ExternalError::Timeout {
                    service: "settlement".to_string(),
                    timeout_secs: d.as_secs(),
                }))
            }
        }
    }
}

pub struct SettlementProcessor {
    ledger: Arc<dyn LedgerStore>,
    registry: Arc<ProviderRegistry>,
    deadline: Duration,
}

impl SettlementProcessor {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        registry: Arc<ProviderRegistry>,
        deadline: Duration,
    ) -> Self {
        Self {
            ledger,
            registry,
            deadline,
        }
    }

    /// Handles one webhook delivery for `provider`.
    pub async fn process_callback(
        &self,
        provider: &str,
        headers: &HeaderMap,
        raw_body: &[u8],
    ) -> Result<SettlementOutcome, SettlementError> {
        let kind = ProviderKind::from_str(provider)
            .ok()
            .filter(|k| *k != ProviderKind::Balance && self.registry.is_registered(*k))
            .ok_or_else(|| SettlementError::UnknownProvider(provider.to_string()))?;

        tokio::time::timeout(self.deadline, self.process_verified(kind, headers, raw_body))
            .await
            .map_err(|_| {
                error!(provider = %kind, "settlement deadline exceeded");
                SettlementError::DeadlineExceeded(self.deadline)
            })?
    }

    async fn process_verified(
        &self,
        kind: ProviderKind,
        headers: &HeaderMap,
        raw_body: &[u8],
    ) -> Result<SettlementOutcome, SettlementError> {
        let adapter = self
            .registry
            .get(kind)
            .map_err(|_| SettlementError::UnknownProvider(kind.to_string()))?;

        // Parse before verifying: a malformed body is a 400, not a 401.
        let event = adapter.parse_callback(raw_body).map_err(|e| {
            warn!(provider = %kind, error = %e, "unparseable webhook payload");
            e
        })?;

        let verification = adapter
            .verify_webhook(headers, raw_body)
            .await
            .map_err(SettlementError::Verification)?;
        if !verification.valid {
            let reason = verification.reason.unwrap_or_else(|| "invalid".to_string());
            warn!(provider = %kind, reason = %reason, "webhook signature rejected");
            return Err(SettlementError::InvalidSignature(reason));
        }

        if event.outcome == CallbackOutcome::Pending {
            info!(
                provider = %kind,
                external_order_id = %event.external_order_id,
                "intermediate webhook acknowledged"
            );
            return Ok(SettlementOutcome::Acknowledged);
        }

        let payment = self
            .ledger
            .find_payment_by_reference(kind, &event.external_order_id)
            .await?
            .ok_or_else(|| {
                warn!(
                    provider = %kind,
                    external_order_id = %event.external_order_id,
                    "webhook for unknown payment"
                );
                SettlementError::NotFound {
                    reference: event.external_order_id.clone(),
                }
            })?;

        self.settle(&payment, event.outcome, event.tx_reference).await
    }

    /// Applies a final provider outcome to `payment`. Shared by the webhook
    /// path and by rails that settle synchronously at checkout.
    pub async fn settle(
        &self,
        payment: &Payment,
        outcome: CallbackOutcome,
        tx_reference: Option<String>,
    ) -> Result<SettlementOutcome, SettlementError> {
        let target = match outcome {
            CallbackOutcome::Completed => PaymentStatus::Completed,
            CallbackOutcome::Failed => PaymentStatus::Failed,
            CallbackOutcome::Pending => return Ok(SettlementOutcome::Acknowledged),
        };

        if payment.status.is_settled() {
            info!(
                payment_id = %payment.id,
                status = %payment.status,
                "payment already settled"
            );
            return Ok(SettlementOutcome::AlreadyProcessed {
                payment_id: payment.id,
                status: payment.status,
            });
        }

        let won = self
            .ledger
            .conditional_update_status(
                payment.id,
                PaymentStatus::Pending,
                target,
                PaymentUpdate {
                    provider_tx_reference: tx_reference,
                    provider_refund_evidence: None,
                },
            )
            .await?;

        if !won {
            let status = self
                .ledger
                .get_payment(payment.id)
                .await?
                .map(|p| p.status)
                .unwrap_or(target);
            info!(payment_id = %payment.id, status = %status, "lost settlement race");
            return Ok(SettlementOutcome::AlreadyProcessed {
                payment_id: payment.id,
                status,
            });
        }

        crate::log_payment_event!(
            "settlement",
            payment_id = payment.id,
            provider = payment.provider,
            status = target,
        );

        if target == PaymentStatus::Completed {
            self.post_process(payment).await;
        }

        Ok(SettlementOutcome::Processed {
            payment_id: payment.id,
            status: target,
        })
    }

    /// Side effects of a completed payment. Failures are logged and left for
    /// reconciliation; the payment stays completed.
    async fn post_process(&self, payment: &Payment) {
        match payment.kind {
            PaymentKind::Deposit => {
                let note = format!("deposit via {} ({})", payment.provider, payment.id);
                match self
                    .ledger
                    .atomic_credit_balance(
                        payment.user_id,
                        &payment.amount_normalized,
                        &note,
                        Some(payment.id),
                    )
                    .await
                {
                    Ok(entry) => info!(
                        payment_id = %payment.id,
                        user_id = %payment.user_id,
                        balance_after = %entry.balance_after,
                        "deposit credited"
                    ),
                    Err(e) => error!(
                        payment_id = %payment.id,
                        user_id = %payment.user_id,
                        amount = %payment.amount_normalized,
                        error = %e,
                        "deposit credit failed; needs reconciliation"
                    ),
                }
            }
            PaymentKind::Order => {
                let Some(order_id) = payment.order_id else {
                    warn!(payment_id = %payment.id, "order payment has no order");
                    return;
                };
                if let Err(e) = self
                    .ledger
                    .update_order_status(order_id, OrderStatus::Paid)
                    .await
                {
                    error!(
                        payment_id = %payment.id,
                        order_id = %order_id,
                        error = %e,
                        "failed to mark order paid; needs reconciliation"
                    );
                }
            }
        }
    }
}
