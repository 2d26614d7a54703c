use crate::payments::error::PaymentError;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    CryptoUsdt,
    Paypal,
    Payos,
    Balance,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 4] = [
        ProviderKind::CryptoUsdt,
        ProviderKind::Paypal,
        ProviderKind::Payos,
        ProviderKind::Balance,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::CryptoUsdt => "crypto_usdt",
            ProviderKind::Paypal => "paypal",
            ProviderKind::Payos => "payos",
            ProviderKind::Balance => "balance",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = PaymentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "crypto_usdt" | "crypto" | "usdt" => Ok(ProviderKind::CryptoUsdt),
            "paypal" => Ok(ProviderKind::Paypal),
            "payos" => Ok(ProviderKind::Payos),
            "balance" => Ok(ProviderKind::Balance),
            _ => Err(PaymentError::ValidationError {
                message: format!("unsupported provider: {}", value),
                field: Some("provider".to_string()),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Money {
    pub amount: BigDecimal,
    pub currency: String,
}

impl Money {
    pub fn new(amount: BigDecimal, currency: impl Into<String>) -> Self {
        Self {
            amount,
            currency: currency.into(),
        }
    }

    pub fn validate_positive(&self, field: &str) -> Result<(), PaymentError> {
        if self.amount <= BigDecimal::from(0) {
            return Err(PaymentError::ValidationError {
                message: "amount must be greater than zero".to_string(),
                field: Some(field.to_string()),
            });
        }
        if self.currency.trim().is_empty() {
            return Err(PaymentError::ValidationError {
                message: "currency is required".to_string(),
                field: Some("currency".to_string()),
            });
        }
        Ok(())
    }
}

/// Input to an adapter's checkout call. `payment_id` is the platform id the
/// provider echoes back as its external order reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePaymentRequest {
    pub payment_id: Uuid,
    pub user_id: Uuid,
    pub amount: Money,
    pub description: Option<String>,
    pub callback_url: Option<String>,
    pub return_url: Option<String>,
    pub cancel_url: Option<String>,
    pub metadata: Option<JsonValue>,
}

/// Where the buyer goes (or what they pay to) to finish the payment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PaymentTarget {
    RedirectUrl {
        url: String,
    },
    PayAddress {
        address: String,
        pay_amount: Option<String>,
        pay_currency: String,
    },
    /// Settled synchronously, nothing left for the buyer to do.
    Settled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePaymentResponse {
    pub provider_payment_id: String,
    pub target: PaymentTarget,
    pub expires_at: Option<DateTime<Utc>>,
    pub provider_data: Option<JsonValue>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CallbackOutcome {
    Completed,
    Failed,
    Pending,
}

/// Provider callback reduced to what settlement needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedEvent {
    pub provider: ProviderKind,
    pub external_order_id: String,
    pub outcome: CallbackOutcome,
    pub tx_reference: Option<String>,
    pub payload: JsonValue,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookVerificationResult {
    pub valid: bool,
    pub reason: Option<String>,
}

impl WebhookVerificationResult {
    pub fn valid() -> Self {
        Self {
            valid: true,
            reason: None,
        }
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            reason: Some(reason.into()),
        }
    }
}

/// Result of a single refund call against a provider.
#[derive(Debug, Clone)]
pub enum RefundOutcome {
    Succeeded {
        evidence: JsonValue,
        already_refunded: bool,
    },
    RequiresManualAction {
        reason: String,
        evidence: JsonValue,
    },
    Retryable {
        error: PaymentError,
        evidence: Option<JsonValue>,
    },
    Rejected {
        error: PaymentError,
        evidence: Option<JsonValue>,
    },
}

impl RefundOutcome {
    pub fn succeeded(evidence: JsonValue) -> Self {
        RefundOutcome::Succeeded {
            evidence,
            already_refunded: false,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            RefundOutcome::Succeeded { .. } => "succeeded",
            RefundOutcome::RequiresManualAction { .. } => "requires_manual_action",
            RefundOutcome::Retryable { .. } => "retryable",
            RefundOutcome::Rejected { .. } => "rejected",
        }
    }
}

/// How the orchestrator drives an adapter's refund call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefundPolicy {
    /// The ledger procedure claims, refunds and marks the payment in one step.
    LedgerAtomic,
    /// One call; a retryable outcome is reported as a failure.
    SingleAttempt,
    /// Retry retryable outcomes with exponential backoff, then fall back to
    /// manual action.
    Backoff { max_attempts: u32, base_delay: Duration },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_kind_round_trips_through_str() {
        for kind in ProviderKind::ALL {
            assert_eq!(ProviderKind::from_str(kind.as_str()).unwrap(), kind);
        }
        assert!(ProviderKind::from_str("stripe").is_err());
        assert_eq!(
            ProviderKind::from_str(" PayPal ").unwrap(),
            ProviderKind::Paypal
        );
    }

    #[test]
    fn money_rejects_zero_and_missing_currency() {
        assert!(Money::new(BigDecimal::from(0), "VND")
            .validate_positive("amount")
            .is_err());
        assert!(Money::new(BigDecimal::from(10), " ")
            .validate_positive("amount")
            .is_err());
        assert!(Money::new(BigDecimal::from(10), "USD")
            .validate_positive("amount")
            .is_ok());
    }

    #[test]
    fn payment_target_serializes_with_type_tag() {
        let json = serde_json::to_value(PaymentTarget::RedirectUrl {
            url: "https://pay.example/abc".to_string(),
        })
        .unwrap();
        assert_eq!(json["type"], "redirect_url");
        assert_eq!(json["url"], "https://pay.example/abc");
    }
}
