use crate::config::PaypalConfig;
use crate::database::models::Payment;
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::{CallbackParseError, ProviderAdapter};
use crate::payments::types::{
    CallbackOutcome, CreatePaymentRequest, CreatePaymentResponse, NormalizedEvent, PaymentTarget,
    ProviderKind, RefundOutcome, RefundPolicy, WebhookVerificationResult,
};
use crate::payments::utils::{
    classify_error_status, header_str, HttpAuth, PaymentHttpClient, ProviderResponse,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use http::HeaderMap;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Debug, Deserialize)]
struct OrderLink {
    href: String,
    rel: String,
}

#[derive(Debug, Deserialize)]
struct CreatedOrder {
    id: String,
    #[serde(default)]
    links: Vec<OrderLink>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

pub struct PaypalAdapter {
    config: PaypalConfig,
    http: PaymentHttpClient,
    token: Mutex<Option<CachedToken>>,
}

impl PaypalAdapter {
    pub fn new(config: PaypalConfig, timeout: Duration) -> PaymentResult<Self> {
        let http = PaymentHttpClient::new("paypal", timeout, 2)?;
        Ok(Self {
            config,
            http,
            token: Mutex::new(None),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base().trim_end_matches('/'), path)
    }

    /// Client-credentials bearer token, cached until shortly before expiry.
    async fn access_token(&self) -> PaymentResult<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Utc::now() {
                return Ok(token.value.clone());
            }
        }

        let resp = self
            .http
            .post_form(
                &self.endpoint("/v1/oauth2/token"),
                HttpAuth::Basic {
                    username: &self.config.client_id,
                    password: &self.config.client_secret,
                },
                &[("grant_type", "client_credentials")],
            )
            .await?;
        if !resp.is_success() {
            return Err(classify_error_status("paypal", &resp));
        }

        let token: TokenResponse = serde_json::from_value(resp.body).map_err(|e| {
            PaymentError::AuthenticationError {
                provider: "paypal".to_string(),
                message: format!("invalid token response: {}", e),
            }
        })?;
        let value = token.access_token.clone();
        *cached = Some(CachedToken {
            value: token.access_token,
            expires_at: Utc::now() + ChronoDuration::seconds((token.expires_in - 60).max(0)),
        });
        Ok(value)
    }
}

/// Webhook event type to settlement outcome.
pub fn map_event_type(event_type: &str) -> CallbackOutcome {
    match event_type {
        "PAYMENT.CAPTURE.COMPLETED" => CallbackOutcome::Completed,
        "PAYMENT.CAPTURE.DENIED" | "PAYMENT.CAPTURE.DECLINED" => CallbackOutcome::Failed,
        _ => CallbackOutcome::Pending,
    }
}

/// One capture-refund response. Anything but `COMPLETED` is a definitive no.
pub fn classify_refund_response(resp: ProviderResponse) -> RefundOutcome {
    let status = resp
        .body
        .get("status")
        .and_then(JsonValue::as_str)
        .unwrap_or_default()
        .to_string();

    if resp.is_success() && status == "COMPLETED" {
        return RefundOutcome::succeeded(resp.body);
    }

    let message = if resp.is_success() {
        format!("refund status {}", if status.is_empty() { "missing" } else { status.as_str() })
    } else {
        format!("HTTP {}", resp.status)
    };
    RefundOutcome::Rejected {
        error: PaymentError::rejected("paypal", message, Some(resp.status.to_string())),
        evidence: Some(resp.body),
    }
}

#[async_trait]
impl ProviderAdapter for PaypalAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Paypal
    }

    async fn create_payment(
        &self,
        request: CreatePaymentRequest,
    ) -> PaymentResult<CreatePaymentResponse> {
        request.amount.validate_positive("amount")?;
        let token = self.access_token().await?;

        let payload = serde_json::json!({
            "intent": "CAPTURE",
            "purchase_units": [{
                "reference_id": request.payment_id.to_string(),
                "custom_id": request.payment_id.to_string(),
                "description": request.description,
                "amount": {
                    "currency_code": request.amount.currency.to_uppercase(),
                    "value": request.amount.amount.with_scale(2).to_string(),
                },
            }],
            "application_context": {
                "return_url": request.return_url,
                "cancel_url": request.cancel_url,
                "user_action": "PAY_NOW",
            },
        });

        let order: CreatedOrder = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/v2/checkout/orders"),
                HttpAuth::Bearer(&token),
                Some(&payload),
                &[],
            )
            .await?;

        let approve_url = order
            .links
            .iter()
            .find(|l| l.rel == "approve" || l.rel == "payer-action")
            .map(|l| l.href.clone())
            .ok_or_else(|| PaymentError::unavailable("paypal", "order has no approve link"))?;

        info!(payment_id = %request.payment_id, paypal_order_id = %order.id, "paypal order created");

        Ok(CreatePaymentResponse {
            provider_payment_id: order.id,
            target: PaymentTarget::RedirectUrl { url: approve_url },
            expires_at: None,
            provider_data: None,
        })
    }

    async fn verify_webhook(
        &self,
        headers: &HeaderMap,
        raw_body: &[u8],
    ) -> PaymentResult<WebhookVerificationResult> {
        let Some(webhook_id) = self.config.webhook_id.as_deref() else {
            return Ok(WebhookVerificationResult::invalid(
                "paypal webhook id is not configured",
            ));
        };

        let header = |name: &str| header_str(headers, name);
        let (
            Some(auth_algo),
            Some(cert_url),
            Some(transmission_id),
            Some(transmission_sig),
            Some(transmission_time),
        ) = (
            header("paypal-auth-algo"),
            header("paypal-cert-url"),
            header("paypal-transmission-id"),
            header("paypal-transmission-sig"),
            header("paypal-transmission-time"),
        )
        else {
            return Ok(WebhookVerificationResult::invalid(
                "missing paypal transmission headers",
            ));
        };

        let Ok(event) = serde_json::from_slice::<JsonValue>(raw_body) else {
            return Ok(WebhookVerificationResult::invalid("body is not JSON"));
        };

        let token = self.access_token().await?;
        let payload = serde_json::json!({
            "auth_algo": auth_algo,
            "cert_url": cert_url,
            "transmission_id": transmission_id,
            "transmission_sig": transmission_sig,
            "transmission_time": transmission_time,
            "webhook_id": webhook_id,
            "webhook_event": event,
        });

        let resp = self
            .http
            .send_once(
                reqwest::Method::POST,
                &self.endpoint("/v1/notifications/verify-webhook-signature"),
                HttpAuth::Bearer(&token),
                Some(&payload),
                &[],
            )
            .await?;
        if !resp.is_success() {
            return Err(classify_error_status("paypal", &resp));
        }

        match resp.body.get("verification_status").and_then(JsonValue::as_str) {
            Some("SUCCESS") => Ok(WebhookVerificationResult::valid()),
            other => Ok(WebhookVerificationResult::invalid(format!(
                "verification_status {}",
                other.unwrap_or("missing")
            ))),
        }
    }

    fn parse_callback(&self, raw_body: &[u8]) -> Result<NormalizedEvent, CallbackParseError> {
        let payload: JsonValue = serde_json::from_slice(raw_body)
            .map_err(|e| CallbackParseError::new(self.kind(), format!("invalid JSON: {}", e)))?;

        let event_type = payload
            .get("event_type")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| CallbackParseError::new(self.kind(), "missing event_type"))?;
        let resource = payload
            .get("resource")
            .filter(|r| r.is_object())
            .ok_or_else(|| CallbackParseError::new(self.kind(), "missing resource"))?;

        // Captures carry our payment id as custom_id; fall back to the
        // PayPal order id recorded at checkout.
        let external_order_id = resource
            .get("custom_id")
            .and_then(JsonValue::as_str)
            .or_else(|| {
                resource
                    .pointer("/supplementary_data/related_ids/order_id")
                    .and_then(JsonValue::as_str)
            })
            .filter(|id| !id.trim().is_empty())
            .map(str::to_string)
            .ok_or_else(|| CallbackParseError::new(self.kind(), "missing custom_id"))?;

        let outcome = map_event_type(event_type);
        let tx_reference = resource
            .get("id")
            .and_then(JsonValue::as_str)
            .map(str::to_string);

        Ok(NormalizedEvent {
            provider: self.kind(),
            external_order_id,
            outcome,
            tx_reference,
            payload,
            received_at: Utc::now(),
        })
    }

    async fn refund(&self, payment: &Payment, reason: &str) -> RefundOutcome {
        let Some(capture_id) = payment.provider_tx_reference.as_deref() else {
            return RefundOutcome::Rejected {
                error: PaymentError::ValidationError {
                    message: "no paypal capture id recorded for this payment".to_string(),
                    field: Some("provider_tx_reference".to_string()),
                },
                evidence: None,
            };
        };

        let token = match self.access_token().await {
            Ok(token) => token,
            Err(error) if error.is_retryable() => {
                return RefundOutcome::Retryable {
                    error,
                    evidence: None,
                }
            }
            Err(error) => {
                return RefundOutcome::Rejected {
                    error,
                    evidence: None,
                }
            }
        };

        let payload = serde_json::json!({ "note_to_payer": reason });
        let path = format!("/v2/payments/captures/{}/refund", capture_id);
        match self
            .http
            .send_once(
                reqwest::Method::POST,
                &self.endpoint(&path),
                HttpAuth::Bearer(&token),
                Some(&payload),
                &[],
            )
            .await
        {
            Ok(resp) => classify_refund_response(resp),
            Err(error) => {
                warn!(payment_id = %payment.id, error = %error, "paypal refund got no response");
                RefundOutcome::Retryable {
                    error,
                    evidence: None,
                }
            }
        }
    }

    fn refund_policy(&self) -> RefundPolicy {
        RefundPolicy::SingleAttempt
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PaypalMode;

    fn adapter() -> PaypalAdapter {
        PaypalAdapter::new(
            PaypalConfig {
                client_id: "id".to_string(),
                client_secret: "secret".to_string(),
                mode: PaypalMode::Sandbox,
                base_url: Some("http://127.0.0.1:1".to_string()),
                webhook_id: None,
            },
            Duration::from_secs(1),
        )
        .unwrap()
    }

    #[test]
    fn completed_refund_succeeds() {
        let outcome = classify_refund_response(ProviderResponse {
            status: 201,
            body: serde_json::json!({"id": "R1", "status": "COMPLETED"}),
        });
        assert!(matches!(outcome, RefundOutcome::Succeeded { .. }));
    }

    #[test]
    fn denied_or_error_refund_is_rejected_with_raw_body() {
        let outcome = classify_refund_response(ProviderResponse {
            status: 201,
            body: serde_json::json!({"status": "DENIED"}),
        });
        match outcome {
            RefundOutcome::Rejected { evidence, .. } => {
                assert_eq!(evidence.unwrap()["status"], "DENIED")
            }
            other => panic!("unexpected outcome {:?}", other),
        }

        let outcome = classify_refund_response(ProviderResponse {
            status: 422,
            body: serde_json::json!({"name": "UNPROCESSABLE_ENTITY"}),
        });
        assert!(matches!(outcome, RefundOutcome::Rejected { .. }));
    }

    #[test]
    fn parses_capture_completed_event() {
        let body = br#"{
            "event_type": "PAYMENT.CAPTURE.COMPLETED",
            "resource": {"id": "CAP-1", "custom_id": "pay-1", "status": "COMPLETED"}
        }"#;
        let event = adapter().parse_callback(body).unwrap();
        assert_eq!(event.external_order_id, "pay-1");
        assert_eq!(event.outcome, CallbackOutcome::Completed);
        assert_eq!(event.tx_reference.as_deref(), Some("CAP-1"));
    }

    #[test]
    fn unrelated_events_are_pending_and_garbage_is_rejected() {
        let body = br#"{"event_type": "CHECKOUT.ORDER.APPROVED", "resource": {"id": "O-1", "custom_id": "pay-1"}}"#;
        assert_eq!(
            adapter().parse_callback(body).unwrap().outcome,
            CallbackOutcome::Pending
        );
        assert_eq!(map_event_type("PAYMENT.CAPTURE.DENIED"), CallbackOutcome::Failed);
        assert!(adapter().parse_callback(br#"{"event_type": "X"}"#).is_err());
        assert!(adapter().parse_callback(b"").is_err());
    }

    #[tokio::test]
    async fn webhooks_are_rejected_without_webhook_id() {
        let result = adapter()
            .verify_webhook(&HeaderMap::new(), b"{}")
            .await
            .unwrap();
        assert!(!result.valid);
    }
}
