//! USDT payments through an IPN-style crypto gateway (NOWPayments API shape).
//!
//! The gateway has no refund endpoint: returning coins means an operator
//! sending them back from the merchant wallet, so every refund resolves to
//! manual action.

use crate::config::CryptoGatewayConfig;
use crate::database::models::Payment;
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::{CallbackParseError, ProviderAdapter};
use crate::payments::types::{
    CallbackOutcome, CreatePaymentRequest, CreatePaymentResponse, NormalizedEvent, PaymentTarget,
    ProviderKind, RefundOutcome, RefundPolicy, WebhookVerificationResult,
};
use crate::payments::utils::{
    header_str, sorted_json, verify_hmac_sha512_hex, HttpAuth, PaymentHttpClient,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use http::HeaderMap;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::info;

pub const SIGNATURE_HEADER: &str = "x-nowpayments-sig";

#[derive(Debug, Deserialize)]
struct GatewayPayment {
    payment_id: JsonValue,
    pay_address: String,
    pay_amount: Option<JsonValue>,
    pay_currency: Option<String>,
    expiration_estimate_date: Option<String>,
}

pub struct CryptoUsdtAdapter {
    config: CryptoGatewayConfig,
    ipn_callback_url: String,
    http: PaymentHttpClient,
}

impl CryptoUsdtAdapter {
    pub fn new(
        config: CryptoGatewayConfig,
        ipn_callback_url: String,
        timeout: Duration,
    ) -> PaymentResult<Self> {
        let http = PaymentHttpClient::new("crypto_usdt", timeout, 2)?;
        Ok(Self {
            config,
            ipn_callback_url,
            http,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }
}

/// Gateway `payment_status` to settlement outcome.
pub fn map_payment_status(status: &str) -> CallbackOutcome {
    match status.to_lowercase().as_str() {
        "finished" | "confirmed" => CallbackOutcome::Completed,
        "failed" | "expired" | "refunded" => CallbackOutcome::Failed,
        _ => CallbackOutcome::Pending,
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
impl ProviderAdapter for CryptoUsdtAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::CryptoUsdt
    }

    async fn create_payment(
        &self,
        request: CreatePaymentRequest,
    ) -> PaymentResult<CreatePaymentResponse> {
        request.amount.validate_positive("amount")?;

        let payload = serde_json::json!({
            "price_amount": request.amount.amount.to_string(),
            "price_currency": request.amount.currency.to_lowercase(),
            "pay_currency": self.config.pay_currency,
            "order_id": request.payment_id.to_string(),
            "order_description": request.description,
            "ipn_callback_url": request.callback_url.clone().unwrap_or_else(|| self.ipn_callback_url.clone()),
        });

        let created: GatewayPayment = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/v1/payment"),
                HttpAuth::None,
                Some(&payload),
                &[("x-api-key", self.config.api_key.as_str())],
            )
            .await?;

        let provider_payment_id = json_to_string(&created.payment_id).ok_or_else(|| {
            PaymentError::unavailable("crypto_usdt", "gateway response missing payment_id")
        })?;

        info!(
            payment_id = %request.payment_id,
            provider_payment_id = %provider_payment_id,
            "crypto payment created"
        );

        Ok(CreatePaymentResponse {
            provider_payment_id,
            target: PaymentTarget::PayAddress {
                address: created.pay_address,
                pay_amount: created.pay_amount.as_ref().and_then(json_to_string),
                pay_currency: created
                    .pay_currency
                    .unwrap_or_else(|| self.config.pay_currency.clone()),
            },
            expires_at: created
                .expiration_estimate_date
                .as_deref()
                .and_then(|d| DateTime::parse_from_rfc3339(d).ok())
                .map(|d| d.with_timezone(&Utc)),
            provider_data: None,
        })
    }

    async fn verify_webhook(
        &self,
        headers: &HeaderMap,
        raw_body: &[u8],
    ) -> PaymentResult<WebhookVerificationResult> {
        let Some(signature) = header_str(headers, SIGNATURE_HEADER) else {
            return Ok(WebhookVerificationResult::invalid("missing signature header"));
        };
        let Ok(body) = serde_json::from_slice::<JsonValue>(raw_body) else {
            return Ok(WebhookVerificationResult::invalid("body is not JSON"));
        };

        let canonical = sorted_json(&body);
        if verify_hmac_sha512_hex(canonical.as_bytes(), &self.config.ipn_secret, signature) {
            Ok(WebhookVerificationResult::valid())
        } else {
            Ok(WebhookVerificationResult::invalid("signature mismatch"))
        }
    }

    fn parse_callback(&self, raw_body: &[u8]) -> Result<NormalizedEvent, CallbackParseError> {
        let payload: JsonValue = serde_json::from_slice(raw_body)
            .map_err(|e| CallbackParseError::new(self.kind(), format!("invalid JSON: {}", e)))?;

        let external_order_id = payload
            .get("order_id")
            .and_then(json_to_string)
            .ok_or_else(|| CallbackParseError::new(self.kind(), "missing order_id"))?;
        let status = payload
            .get("payment_status")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| CallbackParseError::new(self.kind(), "missing payment_status"))?;

        Ok(NormalizedEvent {
            provider: self.kind(),
            external_order_id,
            outcome: map_payment_status(status),
            tx_reference: payload.get("payment_id").and_then(json_to_string),
            payload,
            received_at: Utc::now(),
        })
    }

    async fn refund(&self, payment: &Payment, reason: &str) -> RefundOutcome {
        RefundOutcome::RequiresManualAction {
            reason: "crypto gateway has no refund API; return funds from the merchant wallet"
                .to_string(),
            evidence: serde_json::json!({
                "provider_payment_id": payment.provider_payment_id,
                "amount": payment.amount_original.to_string(),
                "currency": payment.currency_original,
                "pay_currency": self.config.pay_currency,
                "reason": reason,
            }),
        }
    }

    fn refund_policy(&self) -> RefundPolicy {
        RefundPolicy::SingleAttempt
    }
}
