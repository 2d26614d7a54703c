use crate::database::models::Payment;
use crate::payments::error::PaymentResult;
use crate::payments::types::{
    CreatePaymentRequest, CreatePaymentResponse, NormalizedEvent, ProviderKind, RefundOutcome,
    RefundPolicy, WebhookVerificationResult,
};
use async_trait::async_trait;
use http::HeaderMap;
use thiserror::Error;

/// A callback body the adapter could not make sense of.
#[derive(Debug, Clone, Error)]
#[error("unparseable {provider} callback: {reason}")]
pub struct CallbackParseError {
    pub provider: ProviderKind,
    pub reason: String,
}

impl CallbackParseError {
    pub fn new(provider: ProviderKind, reason: impl Into<String>) -> Self {
        Self {
            provider,
            reason: reason.into(),
        }
    }
}

/// One payment rail. Adapters hold their own credentials and HTTP client and
/// never touch payment status; that is the settlement and refund services' job.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn kind(&self) -> ProviderKind;

    async fn create_payment(
        &self,
        request: CreatePaymentRequest,
    ) -> PaymentResult<CreatePaymentResponse>;

    async fn verify_webhook(
        &self,
        headers: &HeaderMap,
        raw_body: &[u8],
    ) -> PaymentResult<WebhookVerificationResult>;

    /// Pure: no I/O, never panics on malformed input.
    fn parse_callback(&self, raw_body: &[u8]) -> Result<NormalizedEvent, CallbackParseError>;

    /// A single refund attempt. Retrying is the orchestrator's decision,
    /// driven by [`ProviderAdapter::refund_policy`].
    async fn refund(&self, payment: &Payment, reason: &str) -> RefundOutcome;

    fn refund_policy(&self) -> RefundPolicy;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::types::{CallbackOutcome, Money, PaymentTarget};
    use bigdecimal::BigDecimal;
    use uuid::Uuid;

    struct MockAdapter;

    #[async_trait]
    impl ProviderAdapter for MockAdapter {
        fn kind(&self) -> ProviderKind {
            ProviderKind::Payos
        }

        async fn create_payment(
            &self,
            request: CreatePaymentRequest,
        ) -> PaymentResult<CreatePaymentResponse> {
            Ok(CreatePaymentResponse {
                provider_payment_id: format!("mock_{}", request.payment_id),
                target: PaymentTarget::RedirectUrl {
                    url: "https://example.com/pay".to_string(),
                },
                expires_at: None,
                provider_data: None,
            })
        }

        async fn verify_webhook(
            &self,
            _headers: &HeaderMap,
            _raw_body: &[u8],
        ) -> PaymentResult<WebhookVerificationResult> {
            Ok(WebhookVerificationResult::valid())
        }

        fn parse_callback(&self, raw_body: &[u8]) -> Result<NormalizedEvent, CallbackParseError> {
            let payload: serde_json::Value = serde_json::from_slice(raw_body)
                .map_err(|e| CallbackParseError::new(self.kind(), e.to_string()))?;
            Ok(NormalizedEvent {
                provider: self.kind(),
                external_order_id: payload["id"].as_str().unwrap_or_default().to_string(),
                outcome: CallbackOutcome::Completed,
                tx_reference: None,
                payload,
                received_at: chrono::Utc::now(),
            })
        }

        async fn refund(&self, _payment: &Payment, _reason: &str) -> RefundOutcome {
            RefundOutcome::succeeded(serde_json::json!({"mock": true}))
        }

        fn refund_policy(&self) -> RefundPolicy {
            RefundPolicy::SingleAttempt
        }
    }

    #[tokio::test]
    async fn trait_can_be_implemented_by_mock_adapter() {
        let adapter: Box<dyn ProviderAdapter> = Box::new(MockAdapter);
        let payment_id = Uuid::new_v4();
        let response = adapter
            .create_payment(CreatePaymentRequest {
                payment_id,
                user_id: Uuid::new_v4(),
                amount: Money::new(BigDecimal::from(100_000), "VND"),
                description: None,
                callback_url: None,
                return_url: None,
                cancel_url: None,
                metadata: None,
            })
            .await
            .unwrap();
        assert_eq!(response.provider_payment_id, format!("mock_{}", payment_id));

        let parse_error = adapter.parse_callback(b"not json").unwrap_err();
        assert_eq!(parse_error.provider, ProviderKind::Payos);
        assert!(adapter.parse_callback(br#"{"id":"p1"}"#).is_ok());
    }
}
