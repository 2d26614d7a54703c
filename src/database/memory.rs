//! In-process ledger store used by tests and by local runs without a database.
//!
//! A single mutex guards all state, so each trait call is atomic the same way
//! the PostgreSQL procedures are.

use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::database::ledger_store::{LedgerResult, LedgerStore};
use crate::database::models::{
    BalanceLedgerEntry, BalanceRefundResult, NewPayment, Order, OrderStatus, Payment,
    PaymentStatus, PaymentUpdate,
};
use crate::payments::types::ProviderKind;
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
struct LedgerState {
    payments: HashMap<Uuid, Payment>,
    status_history: HashMap<Uuid, Vec<PaymentStatus>>,
    orders: HashMap<Uuid, Order>,
    balances: HashMap<Uuid, BigDecimal>,
    entries: Vec<BalanceLedgerEntry>,
    fail_credits: bool,
    fail_status_writes: bool,
}

impl LedgerState {
    fn post_entry(
        &mut self,
        user_id: Uuid,
        amount: BigDecimal,
        note: &str,
        payment_id: Option<Uuid>,
    ) -> BalanceLedgerEntry {
        let balance = self
            .balances
            .entry(user_id)
            .or_insert_with(|| BigDecimal::from(0));
        *balance += &amount;
        let entry = BalanceLedgerEntry {
            id: Uuid::new_v4(),
            user_id,
            amount,
            balance_after: balance.clone(),
            note: note.to_string(),
            payment_id,
            created_at: Utc::now(),
        };
        self.entries.push(entry.clone());
        entry
    }

    fn balance_of(&self, user_id: Uuid) -> BigDecimal {
        self.balances
            .get(&user_id)
            .cloned()
            .unwrap_or_else(|| BigDecimal::from(0))
    }
}

#[derive(Default)]
pub struct InMemoryLedgerStore {
    state: Mutex<LedgerState>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_order(&self, order: Order) {
        self.state.lock().await.orders.insert(order.id, order);
    }

    pub async fn set_balance(&self, user_id: Uuid, amount: BigDecimal) {
        self.state.lock().await.balances.insert(user_id, amount);
    }

    /// Every status the payment has held, oldest first.
    pub async fn status_history(&self, id: Uuid) -> Vec<PaymentStatus> {
        self.state
            .lock()
            .await
            .status_history
            .get(&id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn ledger_entries(&self, user_id: Uuid) -> Vec<BalanceLedgerEntry> {
        self.state
            .lock()
            .await
            .entries
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect()
    }

    /// Makes every subsequent credit fail, to exercise post-processing errors.
    pub async fn set_fail_credits(&self, fail: bool) {
        self.state.lock().await.fail_credits = fail;
    }

    /// Makes every subsequent conditional status write fail.
    pub async fn set_fail_status_writes(&self, fail: bool) {
        self.state.lock().await.fail_status_writes = fail;
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn insert_payment(&self, payment: NewPayment) -> LedgerResult<Payment> {
        let mut state = self.state.lock().await;
        if state.payments.contains_key(&payment.id) {
            return Err(DatabaseError::new(DatabaseErrorKind::QueryError {
                message: format!("duplicate payment id {}", payment.id),
            }));
        }
        if let Some(order_id) = payment.order_id {
            let active = state
                .payments
                .values()
                .any(|p| p.order_id == Some(order_id) && p.status != PaymentStatus::Failed);
            if active {
                return Err(DatabaseError::new(DatabaseErrorKind::QueryError {
                    message: format!("order {} already has an active payment", order_id),
                }));
            }
        }
        let now = Utc::now();
        let record = Payment {
            id: payment.id,
            user_id: payment.user_id,
            provider: payment.provider,
            kind: payment.kind,
            amount_original: payment.amount_original,
            currency_original: payment.currency_original,
            amount_normalized: payment.amount_normalized,
            currency_normalized: payment.currency_normalized,
            status: PaymentStatus::Pending,
            provider_payment_id: None,
            provider_tx_reference: None,
            provider_refund_evidence: None,
            order_id: payment.order_id,
            refund_claim: None,
            created_at: now,
            updated_at: now,
        };
        state
            .status_history
            .insert(record.id, vec![PaymentStatus::Pending]);
        state.payments.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get_payment(&self, id: Uuid) -> LedgerResult<Option<Payment>> {
        Ok(self.state.lock().await.payments.get(&id).cloned())
    }

    async fn find_payment_by_reference(
        &self,
        provider: ProviderKind,
        reference: &str,
    ) -> LedgerResult<Option<Payment>> {
        let state = self.state.lock().await;
        if let Ok(id) = Uuid::parse_str(reference) {
            if let Some(payment) = state.payments.get(&id) {
                return Ok(Some(payment.clone()).filter(|p| p.provider == provider));
            }
        }
        Ok(state
            .payments
            .values()
            .find(|p| p.provider == provider && p.provider_payment_id.as_deref() == Some(reference))
            .cloned())
    }

    async fn set_provider_payment_id(
        &self,
        id: Uuid,
        provider_payment_id: &str,
    ) -> LedgerResult<()> {
        let mut state = self.state.lock().await;
        let payment = state
            .payments
            .get_mut(&id)
            .ok_or_else(|| DatabaseError::not_found("Payment", id))?;
        payment.provider_payment_id = Some(provider_payment_id.to_string());
        payment.updated_at = Utc::now();
        Ok(())
    }

    async fn conditional_update_status(
        &self,
        id: Uuid,
        expected: PaymentStatus,
        new: PaymentStatus,
        update: PaymentUpdate,
    ) -> LedgerResult<bool> {
        if !expected.can_transition_to(new) {
            return Err(DatabaseError::invalid_transition(id, expected, new));
        }
        let mut state = self.state.lock().await;
        if state.fail_status_writes {
            return Err(DatabaseError::new(DatabaseErrorKind::ConnectionError {
                message: "status write unavailable".to_string(),
            }));
        }
        let payment = state
            .payments
            .get_mut(&id)
            .ok_or_else(|| DatabaseError::not_found("Payment", id))?;
        if payment.status != expected {
            return Ok(false);
        }
        payment.status = new;
        if let Some(reference) = update.provider_tx_reference {
            payment.provider_tx_reference = Some(reference);
        }
        if let Some(evidence) = update.provider_refund_evidence {
            payment.provider_refund_evidence = Some(evidence);
        }
        if matches!(
            new,
            PaymentStatus::Refunded | PaymentStatus::RefundPendingManual
        ) {
            payment.refund_claim = None;
        }
        payment.updated_at = Utc::now();
        state.status_history.entry(id).or_default().push(new);
        Ok(true)
    }

    async fn claim_refund(&self, id: Uuid, claim: Uuid) -> LedgerResult<bool> {
        let mut state = self.state.lock().await;
        let payment = state
            .payments
            .get_mut(&id)
            .ok_or_else(|| DatabaseError::not_found("Payment", id))?;
        if payment.status != PaymentStatus::Completed || payment.refund_claim.is_some() {
            return Ok(false);
        }
        payment.refund_claim = Some(claim);
        Ok(true)
    }

    async fn release_refund_claim(&self, id: Uuid, claim: Uuid) -> LedgerResult<()> {
        let mut state = self.state.lock().await;
        if let Some(payment) = state.payments.get_mut(&id) {
            if payment.refund_claim == Some(claim) {
                payment.refund_claim = None;
            }
        }
        Ok(())
    }

    async fn get_order(&self, id: Uuid) -> LedgerResult<Option<Order>> {
        Ok(self.state.lock().await.orders.get(&id).cloned())
    }

    async fn update_order_status(&self, id: Uuid, status: OrderStatus) -> LedgerResult<()> {
        let mut state = self.state.lock().await;
        let order = state
            .orders
            .get_mut(&id)
            .ok_or_else(|| DatabaseError::not_found("Order", id))?;
        order.status = status;
        Ok(())
    }

    async fn atomic_credit_balance(
        &self,
        user_id: Uuid,
        amount: &BigDecimal,
        note: &str,
        payment_id: Option<Uuid>,
    ) -> LedgerResult<BalanceLedgerEntry> {
        let mut state = self.state.lock().await;
        if state.fail_credits {
            return Err(DatabaseError::new(DatabaseErrorKind::ConnectionError {
                message: "credit procedure unavailable".to_string(),
            }));
        }
        Ok(state.post_entry(user_id, amount.clone(), note, payment_id))
    }

    async fn atomic_debit_balance(
        &self,
        user_id: Uuid,
        amount: &BigDecimal,
        note: &str,
        payment_id: Option<Uuid>,
    ) -> LedgerResult<BalanceLedgerEntry> {
        let mut state = self.state.lock().await;
        if state.balance_of(user_id) < *amount {
            return Err(DatabaseError::new(DatabaseErrorKind::InsufficientBalance {
                user_id: user_id.to_string(),
                required: amount.to_string(),
            }));
        }
        Ok(state.post_entry(user_id, -amount.clone(), note, payment_id))
    }

    async fn atomic_refund_balance_payment(
        &self,
        payment_id: Uuid,
        reason: &str,
    ) -> LedgerResult<BalanceRefundResult> {
        let mut state = self.state.lock().await;
        let payment = state
            .payments
            .get(&payment_id)
            .cloned()
            .ok_or_else(|| DatabaseError::not_found("Payment", payment_id))?;

        if payment.status == PaymentStatus::Refunded {
            return Ok(BalanceRefundResult {
                success: true,
                already_refunded: true,
                amount: payment.amount_normalized.clone(),
                new_balance: state.balance_of(payment.user_id),
            });
        }
        if payment.status != PaymentStatus::Completed {
            return Err(DatabaseError::new(DatabaseErrorKind::QueryError {
                message: format!(
                    "payment {} is {} and cannot be refunded",
                    payment_id, payment.status
                ),
            }));
        }

        let entry = state.post_entry(
            payment.user_id,
            payment.amount_normalized.clone(),
            &format!("refund: {}", reason),
            Some(payment_id),
        );
        if let Some(record) = state.payments.get_mut(&payment_id) {
            record.status = PaymentStatus::Refunded;
            record.refund_claim = None;
            record.provider_refund_evidence = Some(serde_json::json!({
                "ledger_entry_id": entry.id,
                "reason": reason,
            }));
            record.updated_at = Utc::now();
        }
        state
            .status_history
            .entry(payment_id)
            .or_default()
            .push(PaymentStatus::Refunded);

        Ok(BalanceRefundResult {
            success: true,
            already_refunded: false,
            amount: payment.amount_normalized,
            new_balance: entry.balance_after,
        })
    }

    async fn get_balance(&self, user_id: Uuid) -> LedgerResult<BigDecimal> {
        Ok(self.state.lock().await.balance_of(user_id))
    }
}
