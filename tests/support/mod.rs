#![allow(dead_code)]

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use http::HeaderMap;
use serde_json::Value as JsonValue;
use settlement_backend::config::{ManualRefundPolicy, RefundConfig};
use settlement_backend::database::models::{
    NewPayment, Order, OrderStatus, Payment, PaymentKind, PaymentStatus, PaymentUpdate,
};
use settlement_backend::database::{InMemoryLedgerStore, LedgerStore};
use settlement_backend::payments::error::{PaymentError, PaymentResult};
use settlement_backend::payments::types::{
    CallbackOutcome, CreatePaymentRequest, CreatePaymentResponse, NormalizedEvent, PaymentTarget,
    ProviderKind, RefundOutcome, RefundPolicy, WebhookVerificationResult,
};
use settlement_backend::payments::{CallbackParseError, ProviderAdapter, ProviderRegistry};
use settlement_backend::services::notification::{NotificationEvent, Notifier, NotifierError};
use settlement_backend::services::{RefundOrchestrator, SettlementProcessor};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

pub const TEST_SIGNATURE: &str = "valid-signature";

/// Adapter whose refund outcomes are scripted up front. Webhooks carry
/// `{"order_id": .., "status": ..}` and are valid when `x-test-signature`
/// matches [`TEST_SIGNATURE`].
pub struct ScriptedAdapter {
    kind: ProviderKind,
    policy: RefundPolicy,
    script: Mutex<VecDeque<RefundOutcome>>,
    calls: AtomicU32,
    delay: Option<Duration>,
}

impl ScriptedAdapter {
    pub fn new(kind: ProviderKind, policy: RefundPolicy, script: Vec<RefundOutcome>) -> Self {
        Self {
            kind,
            policy,
            script: Mutex::new(script.into()),
            calls: AtomicU32::new(0),
            delay: None,
        }
    }

    /// Every refund call sleeps for `delay` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderAdapter for ScriptedAdapter {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn create_payment(
        &self,
        request: CreatePaymentRequest,
    ) -> PaymentResult<CreatePaymentResponse> {
        Ok(CreatePaymentResponse {
            provider_payment_id: format!("ext-{}", request.payment_id),
            target: PaymentTarget::RedirectUrl {
                url: format!("https://pay.test/{}", request.payment_id),
            },
            expires_at: None,
            provider_data: None,
        })
    }

    async fn verify_webhook(
        &self,
        headers: &HeaderMap,
        _raw_body: &[u8],
    ) -> PaymentResult<WebhookVerificationResult> {
        match headers.get("x-test-signature").and_then(|v| v.to_str().ok()) {
            Some(TEST_SIGNATURE) => Ok(WebhookVerificationResult::valid()),
            Some(_) => Ok(WebhookVerificationResult::invalid("signature mismatch")),
            None => Ok(WebhookVerificationResult::invalid("missing signature")),
        }
    }

    fn parse_callback(&self, raw_body: &[u8]) -> Result<NormalizedEvent, CallbackParseError> {
        let payload: JsonValue = serde_json::from_slice(raw_body)
            .map_err(|e| CallbackParseError::new(self.kind, e.to_string()))?;
        let external_order_id = payload
            .get("order_id")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| CallbackParseError::new(self.kind, "missing order_id"))?
            .to_string();
        let outcome = match payload.get("status").and_then(JsonValue::as_str) {
            Some("completed") => CallbackOutcome::Completed,
            Some("failed") => CallbackOutcome::Failed,
            Some(_) => CallbackOutcome::Pending,
            None => return Err(CallbackParseError::new(self.kind, "missing status")),
        };
        Ok(NormalizedEvent {
            provider: self.kind,
            external_order_id,
            outcome,
            tx_reference: payload
                .get("tx")
                .and_then(JsonValue::as_str)
                .map(str::to_string),
            payload,
            received_at: chrono::Utc::now(),
        })
    }

    async fn refund(&self, _payment: &Payment, _reason: &str) -> RefundOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.script.lock().ok().and_then(|mut s| s.pop_front());
        next.unwrap_or_else(|| RefundOutcome::Rejected {
            error: PaymentError::rejected(self.kind.as_str(), "script exhausted", None),
            evidence: None,
        })
    }

    fn refund_policy(&self) -> RefundPolicy {
        self.policy
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub events: Mutex<Vec<NotificationEvent>>,
}

impl RecordingNotifier {
    pub fn events(&self) -> Vec<NotificationEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, event: &NotificationEvent) -> Result<(), NotifierError> {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
        Ok(())
    }
}

pub struct FailingNotifier;

#[async_trait]
impl Notifier for FailingNotifier {
    async fn notify(&self, _event: &NotificationEvent) -> Result<(), NotifierError> {
        Err(NotifierError::Rejected(500))
    }
}

pub fn refund_config() -> RefundConfig {
    RefundConfig::default()
}

pub fn hold_config() -> RefundConfig {
    RefundConfig {
        manual_policy: ManualRefundPolicy::HoldPendingManual,
        ..RefundConfig::default()
    }
}

pub fn backoff_policy() -> RefundPolicy {
    RefundPolicy::Backoff {
        max_attempts: 3,
        base_delay: Duration::from_millis(500),
    }
}

pub fn transient(status: u16) -> RefundOutcome {
    RefundOutcome::Retryable {
        error: PaymentError::unavailable("payos", format!("HTTP {}", status)),
        evidence: Some(serde_json::json!({ "status": status })),
    }
}

pub fn rejected(status: u16) -> RefundOutcome {
    RefundOutcome::Rejected {
        error: PaymentError::rejected("payos", format!("HTTP {}", status), Some(status.to_string())),
        evidence: Some(serde_json::json!({ "status": status })),
    }
}

pub struct Harness {
    pub store: Arc<InMemoryLedgerStore>,
    pub ledger: Arc<dyn LedgerStore>,
    pub registry: Arc<ProviderRegistry>,
    pub settlement: Arc<SettlementProcessor>,
    pub refunds: Arc<RefundOrchestrator>,
}

impl Harness {
    pub fn new(adapters: Vec<Arc<dyn ProviderAdapter>>, notifier: Arc<dyn Notifier>) -> Self {
        Self::with_config(adapters, notifier, refund_config())
    }

    pub fn with_config(
        adapters: Vec<Arc<dyn ProviderAdapter>>,
        notifier: Arc<dyn Notifier>,
        config: RefundConfig,
    ) -> Self {
        let store = Arc::new(InMemoryLedgerStore::new());
        let ledger: Arc<dyn LedgerStore> = store.clone();
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(
            settlement_backend::payments::providers::BalanceAdapter::new(ledger.clone()),
        ));
        for adapter in adapters {
            registry.register(adapter);
        }
        let registry = Arc::new(registry);
        let settlement = Arc::new(SettlementProcessor::new(
            ledger.clone(),
            registry.clone(),
            config.settlement_deadline,
        ));
        let refunds = Arc::new(RefundOrchestrator::new(
            ledger.clone(),
            registry.clone(),
            notifier,
            config,
        ));
        Self {
            store,
            ledger,
            registry,
            settlement,
            refunds,
        }
    }

    pub async fn pending_order(&self, total: i64) -> Uuid {
        let id = Uuid::new_v4();
        self.store
            .insert_order(Order {
                id,
                status: OrderStatus::Pending,
                total_amount: BigDecimal::from(total),
            })
            .await;
        id
    }

    pub async fn insert_payment(
        &self,
        provider: ProviderKind,
        kind: PaymentKind,
        amount: i64,
        currency: &str,
        order_id: Option<Uuid>,
    ) -> Payment {
        self.ledger
            .insert_payment(NewPayment {
                id: Uuid::new_v4(),
                user_id: Uuid::new_v4(),
                provider,
                kind,
                amount_original: BigDecimal::from(amount),
                currency_original: currency.to_string(),
                amount_normalized: BigDecimal::from(amount),
                currency_normalized: currency.to_string(),
                order_id,
            })
            .await
            .expect("insert payment")
    }

    /// A paid order payment, as left behind by a settled webhook.
    pub async fn completed_order_payment(
        &self,
        provider: ProviderKind,
        amount: i64,
        currency: &str,
    ) -> Payment {
        let order_id = self.pending_order(amount).await;
        let payment = self
            .insert_payment(provider, PaymentKind::Order, amount, currency, Some(order_id))
            .await;
        self.ledger
            .conditional_update_status(
                payment.id,
                PaymentStatus::Pending,
                PaymentStatus::Completed,
                PaymentUpdate {
                    provider_tx_reference: Some(format!("tx-{}", payment.id)),
                    provider_refund_evidence: None,
                },
            )
            .await
            .expect("complete payment");
        self.store
            .update_order_status(order_id, OrderStatus::Paid)
            .await
            .expect("mark order paid");
        self.payment(payment.id).await
    }

    pub async fn payment(&self, id: Uuid) -> Payment {
        self.ledger
            .get_payment(id)
            .await
            .expect("get payment")
            .expect("payment exists")
    }

    pub async fn order_status(&self, id: Uuid) -> OrderStatus {
        self.ledger
            .get_order(id)
            .await
            .expect("get order")
            .expect("order exists")
            .status
    }
}

pub fn webhook_headers(signature: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        "x-test-signature",
        signature.parse().expect("header value"),
    );
    headers
}

pub fn webhook_body(order_id: &str, status: &str) -> Vec<u8> {
    serde_json::json!({ "order_id": order_id, "status": status, "tx": "tx-42" })
        .to_string()
        .into_bytes()
}
