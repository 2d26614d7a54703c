//! Payments drawn from the buyer's internal wallet.
//!
//! Checkout debits the ledger directly, so the payment is settled the moment
//! the debit commits. Refunds go through the ledger's atomic refund procedure,
//! which also marks the payment refunded.

use crate::database::error::DatabaseErrorKind;
use crate::database::models::Payment;
use crate::database::LedgerStore;
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::{CallbackParseError, ProviderAdapter};
use crate::payments::types::{
    CreatePaymentRequest, CreatePaymentResponse, NormalizedEvent, PaymentTarget, ProviderKind,
    RefundOutcome, RefundPolicy, WebhookVerificationResult,
};
use async_trait::async_trait;
use http::HeaderMap;
use std::sync::Arc;
use tracing::{info, warn};

pub struct BalanceAdapter {
    ledger: Arc<dyn LedgerStore>,
}

impl BalanceAdapter {
    pub fn new(ledger: Arc<dyn LedgerStore>) -> Self {
        Self { ledger }
    }
}

#[async_trait]
impl ProviderAdapter for BalanceAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Balance
    }

    async fn create_payment(
        &self,
        request: CreatePaymentRequest,
    ) -> PaymentResult<CreatePaymentResponse> {
        request.amount.validate_positive("amount")?;

        let note = format!("payment {}", request.payment_id);
        let entry = self
            .ledger
            .atomic_debit_balance(
                request.user_id,
                &request.amount.amount,
                &note,
                Some(request.payment_id),
            )
            .await
            .map_err(|e| match e.kind {
                DatabaseErrorKind::InsufficientBalance { .. } => PaymentError::rejected(
                    "balance",
                    "insufficient balance",
                    Some("INSUFFICIENT_BALANCE".to_string()),
                ),
                _ => PaymentError::LedgerError {
                    message: e.message(),
                },
            })?;

        info!(
            payment_id = %request.payment_id,
            user_id = %request.user_id,
            balance_after = %entry.balance_after,
            "balance debited"
        );

        Ok(CreatePaymentResponse {
            provider_payment_id: request.payment_id.to_string(),
            target: PaymentTarget::Settled,
            expires_at: None,
            provider_data: Some(serde_json::json!({
                "ledger_entry_id": entry.id,
                "balance_after": entry.balance_after.to_string(),
            })),
        })
    }

    async fn verify_webhook(
        &self,
        _headers: &HeaderMap,
        _raw_body: &[u8],
    ) -> PaymentResult<WebhookVerificationResult> {
        Ok(WebhookVerificationResult::invalid(
            "balance payments have no callbacks",
        ))
    }

    fn parse_callback(&self, _raw_body: &[u8]) -> Result<NormalizedEvent, CallbackParseError> {
        Err(CallbackParseError::new(
            self.kind(),
            "balance payments have no callbacks",
        ))
    }

    async fn refund(&self, payment: &Payment, reason: &str) -> RefundOutcome {
        match self
            .ledger
            .atomic_refund_balance_payment(payment.id, reason)
            .await
        {
            Ok(result) if result.success => RefundOutcome::Succeeded {
                evidence: serde_json::json!({
                    "amount": result.amount.to_string(),
                    "new_balance": result.new_balance.to_string(),
                    "already_refunded": result.already_refunded,
                    "reason": reason,
                }),
                already_refunded: result.already_refunded,
            },
            Ok(_) => RefundOutcome::Rejected {
                error: PaymentError::LedgerError {
                    message: "ledger refund procedure reported failure".to_string(),
                },
                evidence: None,
            },
            Err(e) => {
                warn!(payment_id = %payment.id, error = %e, "balance refund procedure failed");
                RefundOutcome::Rejected {
                    error: PaymentError::LedgerError {
                        message: e.message(),
                    },
                    evidence: None,
                }
            }
        }
    }

    fn refund_policy(&self) -> RefundPolicy {
        RefundPolicy::LedgerAtomic
    }
}
