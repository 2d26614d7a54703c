//! Records the settlement core reads and writes through the ledger store.

use crate::payments::types::ProviderKind;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    /// Refund recorded, money movement waits on an operator.
    RefundPendingManual,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
            PaymentStatus::RefundPendingManual => "refund_pending_manual",
            PaymentStatus::Refunded => "refunded",
        }
    }

    pub fn from_db_status(status: &str) -> Option<Self> {
        match status.to_lowercase().as_str() {
            "pending" => Some(PaymentStatus::Pending),
            "completed" => Some(PaymentStatus::Completed),
            "failed" => Some(PaymentStatus::Failed),
            "refund_pending_manual" => Some(PaymentStatus::RefundPendingManual),
            "refunded" => Some(PaymentStatus::Refunded),
            _ => None,
        }
    }

    /// Statuses only ever move forward along
    /// pending → completed → (refund_pending_manual →) refunded, or pending → failed.
    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        matches!(
            (self, next),
            (PaymentStatus::Pending, PaymentStatus::Completed)
                | (PaymentStatus::Pending, PaymentStatus::Failed)
                | (PaymentStatus::Completed, PaymentStatus::Refunded)
                | (PaymentStatus::Completed, PaymentStatus::RefundPendingManual)
                | (PaymentStatus::RefundPendingManual, PaymentStatus::Refunded)
        )
    }

    /// Whether a settlement callback can still change this payment.
    pub fn is_settled(&self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentKind {
    /// Tops up the buyer's internal balance on completion.
    Deposit,
    /// Pays for a marketplace order.
    Order,
}

impl PaymentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentKind::Deposit => "deposit",
            PaymentKind::Order => "order",
        }
    }

    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "deposit" => Some(PaymentKind::Deposit),
            "order" => Some(PaymentKind::Order),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub user_id: Uuid,
    pub provider: ProviderKind,
    pub kind: PaymentKind,
    pub amount_original: BigDecimal,
    pub currency_original: String,
    pub amount_normalized: BigDecimal,
    pub currency_normalized: String,
    pub status: PaymentStatus,
    pub provider_payment_id: Option<String>,
    pub provider_tx_reference: Option<String>,
    pub provider_refund_evidence: Option<JsonValue>,
    pub order_id: Option<Uuid>,
    pub refund_claim: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewPayment {
    pub id: Uuid,
    pub user_id: Uuid,
    pub provider: ProviderKind,
    pub kind: PaymentKind,
    pub amount_original: BigDecimal,
    pub currency_original: String,
    pub amount_normalized: BigDecimal,
    pub currency_normalized: String,
    pub order_id: Option<Uuid>,
}

/// Extra columns written together with a conditional status change.
#[derive(Debug, Clone, Default)]
pub struct PaymentUpdate {
    pub provider_tx_reference: Option<String>,
    pub provider_refund_evidence: Option<JsonValue>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Paid,
    Delivered,
    Refunded,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Paid => "PAID",
            OrderStatus::Delivered => "DELIVERED",
            OrderStatus::Refunded => "REFUNDED",
            OrderStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn from_db(value: &str) -> Option<Self> {
        match value.to_uppercase().as_str() {
            "PENDING" => Some(OrderStatus::Pending),
            "PAID" => Some(OrderStatus::Paid),
            "DELIVERED" => Some(OrderStatus::Delivered),
            "REFUNDED" => Some(OrderStatus::Refunded),
            "CANCELLED" => Some(OrderStatus::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub status: OrderStatus,
    pub total_amount: BigDecimal,
}

/// Append-only balance movement written by the atomic ledger procedures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceLedgerEntry {
    pub id: Uuid,
    pub user_id: Uuid,
    pub amount: BigDecimal,
    pub balance_after: BigDecimal,
    pub note: String,
    pub payment_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceRefundResult {
    pub success: bool,
    pub already_refunded: bool,
    pub amount: BigDecimal,
    pub new_balance: BigDecimal,
}
