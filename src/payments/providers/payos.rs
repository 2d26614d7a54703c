//! PayOS (VietQR) payment links.
//!
//! PayOS identifies payments by a numeric `orderCode`. We derive it from the
//! payment id so callbacks and cancels can always be mapped back, and record
//! it as the provider payment id at checkout. Refunds cancel the payment link.

use crate::config::PayosConfig;
use crate::database::models::Payment;
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::{CallbackParseError, ProviderAdapter};
use crate::payments::types::{
    CallbackOutcome, CreatePaymentRequest, CreatePaymentResponse, NormalizedEvent, PaymentTarget,
    ProviderKind, RefundOutcome, RefundPolicy, WebhookVerificationResult,
};
use crate::payments::utils::{
    hmac_sha256_hex, sorted_json, verify_hmac_sha256_hex, HttpAuth, PaymentHttpClient,
    ProviderResponse,
};
use async_trait::async_trait;
use bigdecimal::ToPrimitive;
use chrono::{TimeZone, Utc};
use http::HeaderMap;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

const SUCCESS_CODE: &str = "00";
const MAX_DESCRIPTION_LEN: usize = 25;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PaymentLinkData {
    checkout_url: String,
    payment_link_id: Option<String>,
    expired_at: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct PayosEnvelope {
    code: String,
    #[serde(default)]
    desc: String,
    data: Option<JsonValue>,
}

pub struct PayosAdapter {
    config: PayosConfig,
    return_url: String,
    cancel_url: String,
    http: PaymentHttpClient,
    policy: RefundPolicy,
}

impl PayosAdapter {
    pub fn new(
        config: PayosConfig,
        return_url: String,
        cancel_url: String,
        timeout: Duration,
        policy: RefundPolicy,
    ) -> PaymentResult<Self> {
        let http = PaymentHttpClient::new("payos", timeout, 2)?;
        Ok(Self {
            config,
            return_url,
            cancel_url,
            http,
            policy,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn auth_headers(&self) -> [(&str, &str); 2] {
        [
            ("x-client-id", self.config.client_id.as_str()),
            ("x-api-key", self.config.api_key.as_str()),
        ]
    }
}

/// Stable positive order code below 2^48, well inside PayOS's integer range.
pub fn order_code_for(payment_id: Uuid) -> u64 {
    let bytes = payment_id.as_bytes();
    bytes[..6]
        .iter()
        .fold(0u64, |acc, b| (acc << 8) | u64::from(*b))
        .max(1)
}

/// Checkout request signature over the five fields PayOS signs, in
/// alphabetical order.
pub fn checkout_signature(
    checksum_key: &str,
    amount: i64,
    cancel_url: &str,
    description: &str,
    order_code: u64,
    return_url: &str,
) -> String {
    let data = format!(
        "amount={}&cancelUrl={}&description={}&orderCode={}&returnUrl={}",
        amount, cancel_url, description, order_code, return_url
    );
    hmac_sha256_hex(checksum_key, data.as_bytes())
}

/// `key=value&...` over the sorted keys of a webhook `data` object.
pub fn data_signature_payload(data: &serde_json::Map<String, JsonValue>) -> String {
    let mut keys: Vec<&String> = data.keys().collect();
    keys.sort();
    keys.into_iter()
        .map(|key| {
            let value = match &data[key] {
                JsonValue::Null => String::new(),
                JsonValue::String(s) if s == "null" || s == "undefined" => String::new(),
                JsonValue::String(s) => s.clone(),
                other @ (JsonValue::Array(_) | JsonValue::Object(_)) => sorted_json(other),
                other => other.to_string(),
            };
            format!("{}={}", key, value)
        })
        .collect::<Vec<_>>()
        .join("&")
}

/// One cancel-link response (or the lack of one).
pub fn classify_cancel_response(result: PaymentResult<ProviderResponse>) -> RefundOutcome {
    let resp = match result {
        Ok(resp) => resp,
        Err(error) => {
            return RefundOutcome::Retryable {
                error,
                evidence: None,
            }
        }
    };

    if resp.is_success() {
        let code = resp
            .body
            .get("code")
            .and_then(JsonValue::as_str)
            .unwrap_or_default();
        if code == SUCCESS_CODE {
            return RefundOutcome::succeeded(resp.body);
        }
        let desc = resp
            .body
            .get("desc")
            .and_then(JsonValue::as_str)
            .unwrap_or_default();
        return RefundOutcome::RequiresManualAction {
            reason: format!("payos cancel returned code {} ({})", code, desc),
            evidence: resp.body,
        };
    }

    if resp.is_server_error() {
        return RefundOutcome::Retryable {
            error: PaymentError::unavailable("payos", format!("HTTP {}", resp.status)),
            evidence: Some(resp.body),
        };
    }

    RefundOutcome::Rejected {
        error: PaymentError::rejected(
            "payos",
            format!("HTTP {}", resp.status),
            Some(resp.status.to_string()),
        ),
        evidence: Some(resp.body),
    }
}

fn json_to_string(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[async_trait]
impl ProviderAdapter for PayosAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Payos
    }

    async fn create_payment(
        &self,
        request: CreatePaymentRequest,
    ) -> PaymentResult<CreatePaymentResponse> {
        request.amount.validate_positive("amount")?;
        if !request.amount.currency.eq_ignore_ascii_case("VND") {
            return Err(PaymentError::ValidationError {
                message: "payos only accepts VND".to_string(),
                field: Some("currency".to_string()),
            });
        }
        let amount = request
            .amount
            .amount
            .with_scale(0)
            .to_i64()
            .ok_or_else(|| PaymentError::ValidationError {
                message: "amount out of range".to_string(),
                field: Some("amount".to_string()),
            })?;

        let order_code = order_code_for(request.payment_id);
        let description: String = request
            .description
            .clone()
            .unwrap_or_else(|| format!("DH {}", order_code))
            .chars()
            .take(MAX_DESCRIPTION_LEN)
            .collect();
        let return_url = request.return_url.clone().unwrap_or_else(|| self.return_url.clone());
        let cancel_url = request.cancel_url.clone().unwrap_or_else(|| self.cancel_url.clone());

        let signature = checkout_signature(
            &self.config.checksum_key,
            amount,
            &cancel_url,
            &description,
            order_code,
            &return_url,
        );
        let payload = serde_json::json!({
            "orderCode": order_code,
            "amount": amount,
            "description": description,
            "returnUrl": return_url,
            "cancelUrl": cancel_url,
            "signature": signature,
        });

        let envelope: PayosEnvelope = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/v2/payment-requests"),
                HttpAuth::None,
                Some(&payload),
                &self.auth_headers(),
            )
            .await?;

        if envelope.code != SUCCESS_CODE {
            return Err(PaymentError::rejected(
                "payos",
                envelope.desc,
                Some(envelope.code),
            ));
        }
        let data: PaymentLinkData = envelope
            .data
            .ok_or_else(|| PaymentError::unavailable("payos", "response missing data"))
            .and_then(|d| {
                serde_json::from_value(d).map_err(|e| {
                    PaymentError::unavailable("payos", format!("invalid payment link: {}", e))
                })
            })?;

        info!(
            payment_id = %request.payment_id,
            order_code = order_code,
            payment_link_id = ?data.payment_link_id,
            "payos payment link created"
        );

        Ok(CreatePaymentResponse {
            provider_payment_id: order_code.to_string(),
            target: PaymentTarget::RedirectUrl {
                url: data.checkout_url,
            },
            expires_at: data
                .expired_at
                .and_then(|ts| Utc.timestamp_opt(ts, 0).single()),
            provider_data: data
                .payment_link_id
                .map(|id| serde_json::json!({ "paymentLinkId": id })),
        })
    }

    async fn verify_webhook(
        &self,
        _headers: &HeaderMap,
        raw_body: &[u8],
    ) -> PaymentResult<WebhookVerificationResult> {
        let Ok(body) = serde_json::from_slice::<JsonValue>(raw_body) else {
            return Ok(WebhookVerificationResult::invalid("body is not JSON"));
        };
        let Some(signature) = body.get("signature").and_then(JsonValue::as_str) else {
            return Ok(WebhookVerificationResult::invalid("missing signature"));
        };
        let Some(data) = body.get("data").and_then(JsonValue::as_object) else {
            return Ok(WebhookVerificationResult::invalid("missing data"));
        };

        let payload = data_signature_payload(data);
        if verify_hmac_sha256_hex(payload.as_bytes(), &self.config.checksum_key, signature) {
            Ok(WebhookVerificationResult::valid())
        } else {
            Ok(WebhookVerificationResult::invalid("signature mismatch"))
        }
    }

    fn parse_callback(&self, raw_body: &[u8]) -> Result<NormalizedEvent, CallbackParseError> {
        let payload: JsonValue = serde_json::from_slice(raw_body)
            .map_err(|e| CallbackParseError::new(self.kind(), format!("invalid JSON: {}", e)))?;
        let data = payload
            .get("data")
            .filter(|d| d.is_object())
            .ok_or_else(|| CallbackParseError::new(self.kind(), "missing data"))?;

        let external_order_id = data
            .get("orderCode")
            .and_then(json_to_string)
            .ok_or_else(|| CallbackParseError::new(self.kind(), "missing data.orderCode"))?;
        let code = data
            .get("code")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| CallbackParseError::new(self.kind(), "missing data.code"))?;

        let outcome = if code == SUCCESS_CODE {
            CallbackOutcome::Completed
        } else {
            CallbackOutcome::Failed
        };
        let tx_reference = data.get("reference").and_then(json_to_string);

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
        let order_code = payment
            .provider_payment_id
            .clone()
            .unwrap_or_else(|| order_code_for(payment.id).to_string());

        let path = format!("/v2/payment-requests/{}/cancel", order_code);
        let payload = serde_json::json!({ "cancellationReason": reason });
        let result = self
            .http
            .send_once(
                reqwest::Method::POST,
                &self.endpoint(&path),
                HttpAuth::None,
                Some(&payload),
                &self.auth_headers(),
            )
            .await;

        let outcome = classify_cancel_response(result);
        if let RefundOutcome::Retryable { error, .. } = &outcome {
            warn!(payment_id = %payment.id, order_code = %order_code, error = %error, "payos cancel failed");
        }
        outcome
    }

    fn refund_policy(&self) -> RefundPolicy {
        self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> PayosAdapter {
        PayosAdapter::new(
            PayosConfig {
                client_id: "client".to_string(),
                api_key: "api".to_string(),
                checksum_key: "checksum".to_string(),
                base_url: "http://127.0.0.1:1".to_string(),
            },
            "https://shop.example.com/return".to_string(),
            "https://shop.example.com/cancel".to_string(),
            Duration::from_secs(1),
            RefundPolicy::Backoff {
                max_attempts: 3,
                base_delay: Duration::from_millis(500),
            },
        )
        .unwrap()
    }

    fn response(status: u16, body: JsonValue) -> PaymentResult<ProviderResponse> {
        Ok(ProviderResponse { status, body })
    }

    #[test]
    fn order_code_is_stable_and_positive() {
        let id = Uuid::new_v4();
        assert_eq!(order_code_for(id), order_code_for(id));
        assert!(order_code_for(id) > 0);
        assert!(order_code_for(id) < (1u64 << 48));
    }

    #[test]
    fn cancel_classification() {
        assert!(matches!(
            classify_cancel_response(response(200, serde_json::json!({"code": "00"}))),
            RefundOutcome::Succeeded { .. }
        ));
        assert!(matches!(
            classify_cancel_response(response(200, serde_json::json!({"code": "101", "desc": "already paid"}))),
            RefundOutcome::RequiresManualAction { .. }
        ));
        assert!(matches!(
            classify_cancel_response(response(502, JsonValue::String("bad gateway".into()))),
            RefundOutcome::Retryable { .. }
        ));
        assert!(matches!(
            classify_cancel_response(response(404, serde_json::json!({"code": "231"}))),
            RefundOutcome::Rejected { .. }
        ));
        assert!(matches!(
            classify_cancel_response(Err(PaymentError::unavailable("payos", "timeout"))),
            RefundOutcome::Retryable { .. }
        ));
    }

    #[test]
    fn data_signature_payload_sorts_and_blanks_nulls() {
        let data = serde_json::json!({
            "orderCode": 123,
            "amount": 3000,
            "description": "VQRIO123",
            "counterAccountName": null,
            "code": "00"
        });
        assert_eq!(
            data_signature_payload(data.as_object().unwrap()),
            "amount=3000&code=00&counterAccountName=&description=VQRIO123&orderCode=123"
        );
    }

    #[tokio::test]
    async fn webhook_signature_round_trip() {
        let data = serde_json::json!({"orderCode": 42, "amount": 100000, "code": "00", "reference": "FT1"});
        let signature = hmac_sha256_hex(
            "checksum",
            data_signature_payload(data.as_object().unwrap()).as_bytes(),
        );
        let body = serde_json::json!({"code": "00", "desc": "success", "success": true, "data": data, "signature": signature});
        let raw = serde_json::to_vec(&body).unwrap();

        let adapter = adapter();
        assert!(adapter.verify_webhook(&HeaderMap::new(), &raw).await.unwrap().valid);

        let event = adapter.parse_callback(&raw).unwrap();
        assert_eq!(event.external_order_id, "42");
        assert_eq!(event.outcome, CallbackOutcome::Completed);
        assert_eq!(event.tx_reference.as_deref(), Some("FT1"));

        let mut tampered = body.clone();
        tampered["data"]["amount"] = serde_json::json!(1);
        let raw = serde_json::to_vec(&tampered).unwrap();
        assert!(!adapter.verify_webhook(&HeaderMap::new(), &raw).await.unwrap().valid);
    }

    #[test]
    fn non_success_data_code_fails_the_payment() {
        let body = br#"{"code":"00","data":{"orderCode":7,"code":"01"}}"#;
        assert_eq!(
            adapter().parse_callback(body).unwrap().outcome,
            CallbackOutcome::Failed
        );
        assert!(adapter().parse_callback(br#"{"data":{}}"#).is_err());
    }
}
