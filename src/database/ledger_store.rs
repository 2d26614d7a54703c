//! The operation contract the settlement core consumes from persistent storage.
//!
//! Every cross-request consistency guarantee lives behind this trait: status
//! changes are conditional writes keyed on the previous status, and balance
//! movements are single atomic procedures. Callers never hold in-process locks.

use crate::database::error::DatabaseError;
use crate::database::models::{
    BalanceLedgerEntry, BalanceRefundResult, NewPayment, Order, OrderStatus, Payment,
    PaymentStatus, PaymentUpdate,
};
use crate::payments::types::ProviderKind;
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use uuid::Uuid;

pub type LedgerResult<T> = Result<T, DatabaseError>;

#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn insert_payment(&self, payment: NewPayment) -> LedgerResult<Payment>;

    async fn get_payment(&self, id: Uuid) -> LedgerResult<Option<Payment>>;

    /// Resolves a provider's external order reference: either our payment id
    /// or the provider-side id recorded at checkout.
    async fn find_payment_by_reference(
        &self,
        provider: ProviderKind,
        reference: &str,
    ) -> LedgerResult<Option<Payment>>;

    async fn set_provider_payment_id(
        &self,
        id: Uuid,
        provider_payment_id: &str,
    ) -> LedgerResult<()>;

    /// Moves `id` from `expected` to `new` and writes `update` in the same
    /// statement. Returns `false` without touching the row when the current
    /// status is not `expected`. Reaching a refund status clears the refund claim.
    async fn conditional_update_status(
        &self,
        id: Uuid,
        expected: PaymentStatus,
        new: PaymentStatus,
        update: PaymentUpdate,
    ) -> LedgerResult<bool>;

    /// Marks a completed payment as refund-in-flight. Returns `false` when the
    /// payment is not completed or another claim is already held.
    async fn claim_refund(&self, id: Uuid, claim: Uuid) -> LedgerResult<bool>;

    /// Drops a claim taken by [`LedgerStore::claim_refund`]; a no-op when the
    /// claim is no longer held.
    async fn release_refund_claim(&self, id: Uuid, claim: Uuid) -> LedgerResult<()>;

    async fn get_order(&self, id: Uuid) -> LedgerResult<Option<Order>>;

    async fn update_order_status(&self, id: Uuid, status: OrderStatus) -> LedgerResult<()>;

    async fn atomic_credit_balance(
        &self,
        user_id: Uuid,
        amount: &BigDecimal,
        note: &str,
        payment_id: Option<Uuid>,
    ) -> LedgerResult<BalanceLedgerEntry>;

    /// Fails with `InsufficientBalance` rather than going negative.
    async fn atomic_debit_balance(
        &self,
        user_id: Uuid,
        amount: &BigDecimal,
        note: &str,
        payment_id: Option<Uuid>,
    ) -> LedgerResult<BalanceLedgerEntry>;

    /// Credits the payment amount back to the buyer and marks the payment
    /// refunded in one transaction. Safe to call twice: the second call reports
    /// `already_refunded` and moves no money.
    async fn atomic_refund_balance_payment(
        &self,
        payment_id: Uuid,
        reason: &str,
    ) -> LedgerResult<BalanceRefundResult>;

    async fn get_balance(&self, user_id: Uuid) -> LedgerResult<BigDecimal>;

    async fn health_check(&self) -> LedgerResult<()> {
        Ok(())
    }
}
