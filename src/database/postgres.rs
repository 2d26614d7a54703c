//! PostgreSQL-backed ledger store. Balance movements go through the stored
//! procedures in `migrations/`, status changes are `UPDATE ... WHERE status = $expected`.

use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::database::ledger_store::{LedgerResult, LedgerStore};
use crate::database::models::{
    BalanceLedgerEntry, BalanceRefundResult, NewPayment, Order, OrderStatus, Payment, PaymentKind,
    PaymentStatus, PaymentUpdate,
};
use crate::payments::types::ProviderKind;
use async_trait::async_trait;
use sqlx::{types::BigDecimal, FromRow, PgPool};
use std::str::FromStr;
use uuid::Uuid;

const PAYMENT_COLUMNS: &str = "id, user_id, provider, kind, amount_original, currency_original, \
     amount_normalized, currency_normalized, status, provider_payment_id, provider_tx_reference, \
     provider_refund_evidence, order_id, refund_claim, created_at, updated_at";

#[derive(Debug, FromRow)]
struct PaymentRow {
    id: Uuid,
    user_id: Uuid,
    provider: String,
    kind: String,
    amount_original: BigDecimal,
    currency_original: String,
    amount_normalized: BigDecimal,
    currency_normalized: String,
    status: String,
    provider_payment_id: Option<String>,
    provider_tx_reference: Option<String>,
    provider_refund_evidence: Option<serde_json::Value>,
    order_id: Option<Uuid>,
    refund_claim: Option<Uuid>,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = DatabaseError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        let corrupt = |field: &str, value: &str| {
            DatabaseError::new(DatabaseErrorKind::Unknown {
                message: format!("payment {} has invalid {}: {}", row.id, field, value),
            })
        };
        Ok(Payment {
            id: row.id,
            user_id: row.user_id,
            provider: ProviderKind::from_str(&row.provider)
                .map_err(|_| corrupt("provider", &row.provider))?,
            kind: PaymentKind::from_db(&row.kind).ok_or_else(|| corrupt("kind", &row.kind))?,
            amount_original: row.amount_original,
            currency_original: row.currency_original,
            amount_normalized: row.amount_normalized,
            currency_normalized: row.currency_normalized,
            status: PaymentStatus::from_db_status(&row.status)
                .ok_or_else(|| corrupt("status", &row.status))?,
            provider_payment_id: row.provider_payment_id,
            provider_tx_reference: row.provider_tx_reference,
            provider_refund_evidence: row.provider_refund_evidence,
            order_id: row.order_id,
            refund_claim: row.refund_claim,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct OrderRow {
    id: Uuid,
    status: String,
    total_amount: BigDecimal,
}

#[derive(Debug, FromRow)]
struct LedgerEntryRow {
    id: Uuid,
    user_id: Uuid,
    amount: BigDecimal,
    balance_after: BigDecimal,
    note: String,
    payment_id: Option<Uuid>,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl From<LedgerEntryRow> for BalanceLedgerEntry {
    fn from(row: LedgerEntryRow) -> Self {
        BalanceLedgerEntry {
            id: row.id,
            user_id: row.user_id,
            amount: row.amount,
            balance_after: row.balance_after,
            note: row.note,
            payment_id: row.payment_id,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct RefundRow {
    success: bool,
    already_refunded: bool,
    amount: BigDecimal,
    new_balance: BigDecimal,
}

/// Ledger store over the shared connection pool
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_payment_where(
        &self,
        clause: &str,
        bind_a: &str,
        bind_b: &str,
    ) -> LedgerResult<Option<Payment>> {
        let sql = format!("SELECT {} FROM payments WHERE {}", PAYMENT_COLUMNS, clause);
        sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(bind_a)
            .bind(bind_b)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .map(Payment::try_from)
            .transpose()
    }

    async fn ensure_payment_exists(&self, id: Uuid) -> LedgerResult<()> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM payments WHERE id = $1)")
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        if exists {
            Ok(())
        } else {
            Err(DatabaseError::not_found("Payment", id))
        }
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn insert_payment(&self, payment: NewPayment) -> LedgerResult<Payment> {
        let sql = format!(
            "INSERT INTO payments
             (id, user_id, provider, kind, amount_original, currency_original,
              amount_normalized, currency_normalized, status, order_id)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'pending', $9)
             RETURNING {}",
            PAYMENT_COLUMNS
        );
        let row = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(payment.id)
            .bind(payment.user_id)
            .bind(payment.provider.as_str())
            .bind(payment.kind.as_str())
            .bind(payment.amount_original)
            .bind(payment.currency_original)
            .bind(payment.amount_normalized)
            .bind(payment.currency_normalized)
            .bind(payment.order_id)
            .fetch_one(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        Payment::try_from(row)
    }

    async fn get_payment(&self, id: Uuid) -> LedgerResult<Option<Payment>> {
        let sql = format!("SELECT {} FROM payments WHERE id = $1", PAYMENT_COLUMNS);
        sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .map(Payment::try_from)
            .transpose()
    }

    async fn find_payment_by_reference(
        &self,
        provider: ProviderKind,
        reference: &str,
    ) -> LedgerResult<Option<Payment>> {
        if let Ok(id) = Uuid::parse_str(reference) {
            if let Some(payment) = self.get_payment(id).await? {
                return Ok(Some(payment).filter(|p| p.provider == provider));
            }
        }
        self.fetch_payment_where(
            "provider = $1 AND provider_payment_id = $2",
            provider.as_str(),
            reference,
        )
        .await
    }

    async fn set_provider_payment_id(
        &self,
        id: Uuid,
        provider_payment_id: &str,
    ) -> LedgerResult<()> {
        let result = sqlx::query(
            "UPDATE payments SET provider_payment_id = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(provider_payment_id)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        if result.rows_affected() == 0 {
            return Err(DatabaseError::not_found("Payment", id));
        }
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
        let result = sqlx::query(
            "UPDATE payments
             SET status = $3,
                 provider_tx_reference = COALESCE($4, provider_tx_reference),
                 provider_refund_evidence = COALESCE($5, provider_refund_evidence),
                 refund_claim = CASE WHEN $3 IN ('refunded', 'refund_pending_manual')
                                     THEN NULL ELSE refund_claim END,
                 updated_at = NOW()
             WHERE id = $1 AND status = $2",
        )
        .bind(id)
        .bind(expected.as_str())
        .bind(new.as_str())
        .bind(update.provider_tx_reference)
        .bind(update.provider_refund_evidence)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }
        self.ensure_payment_exists(id).await?;
        Ok(false)
    }

    async fn claim_refund(&self, id: Uuid, claim: Uuid) -> LedgerResult<bool> {
        let result = sqlx::query(
            "UPDATE payments SET refund_claim = $2, updated_at = NOW()
             WHERE id = $1 AND status = 'completed' AND refund_claim IS NULL",
        )
        .bind(id)
        .bind(claim)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        if result.rows_affected() == 1 {
            return Ok(true);
        }
        self.ensure_payment_exists(id).await?;
        Ok(false)
    }

    async fn release_refund_claim(&self, id: Uuid, claim: Uuid) -> LedgerResult<()> {
        sqlx::query("UPDATE payments SET refund_claim = NULL WHERE id = $1 AND refund_claim = $2")
            .bind(id)
            .bind(claim)
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }

    async fn get_order(&self, id: Uuid) -> LedgerResult<Option<Order>> {
        let row = sqlx::query_as::<_, OrderRow>(
            "SELECT id, status, total_amount FROM orders WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        row.map(|row| {
            let status = OrderStatus::from_db(&row.status).ok_or_else(|| {
                DatabaseError::new(DatabaseErrorKind::Unknown {
                    message: format!("order {} has invalid status {}", row.id, row.status),
                })
            })?;
            Ok(Order {
                id: row.id,
                status,
                total_amount: row.total_amount,
            })
        })
        .transpose()
    }

    async fn update_order_status(&self, id: Uuid, status: OrderStatus) -> LedgerResult<()> {
        let result =
            sqlx::query("UPDATE orders SET status = $2, updated_at = NOW() WHERE id = $1")
                .bind(id)
                .bind(status.as_str())
                .execute(&self.pool)
                .await
                .map_err(DatabaseError::from_sqlx)?;
        if result.rows_affected() == 0 {
            return Err(DatabaseError::not_found("Order", id));
        }
        Ok(())
    }

    async fn atomic_credit_balance(
        &self,
        user_id: Uuid,
        amount: &BigDecimal,
        note: &str,
        payment_id: Option<Uuid>,
    ) -> LedgerResult<BalanceLedgerEntry> {
        sqlx::query_as::<_, LedgerEntryRow>("SELECT * FROM credit_balance($1, $2, $3, $4)")
            .bind(user_id)
            .bind(amount)
            .bind(note)
            .bind(payment_id)
            .fetch_one(&self.pool)
            .await
            .map(BalanceLedgerEntry::from)
            .map_err(DatabaseError::from_sqlx)
    }

    async fn atomic_debit_balance(
        &self,
        user_id: Uuid,
        amount: &BigDecimal,
        note: &str,
        payment_id: Option<Uuid>,
    ) -> LedgerResult<BalanceLedgerEntry> {
        sqlx::query_as::<_, LedgerEntryRow>("SELECT * FROM debit_balance($1, $2, $3, $4)")
            .bind(user_id)
            .bind(amount)
            .bind(note)
            .bind(payment_id)
            .fetch_one(&self.pool)
            .await
            .map(BalanceLedgerEntry::from)
            .map_err(DatabaseError::from_sqlx)
    }

    async fn atomic_refund_balance_payment(
        &self,
        payment_id: Uuid,
        reason: &str,
    ) -> LedgerResult<BalanceRefundResult> {
        let row = sqlx::query_as::<_, RefundRow>(
            "SELECT success, already_refunded, amount, new_balance
             FROM refund_balance_payment($1, $2)",
        )
        .bind(payment_id)
        .bind(reason)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(BalanceRefundResult {
            success: row.success,
            already_refunded: row.already_refunded,
            amount: row.amount,
            new_balance: row.new_balance,
        })
    }

    async fn get_balance(&self, user_id: Uuid) -> LedgerResult<BigDecimal> {
        let balance: Option<BigDecimal> =
            sqlx::query_scalar("SELECT balance FROM user_balances WHERE user_id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(DatabaseError::from_sqlx)?;
        Ok(balance.unwrap_or_else(|| BigDecimal::from(0)))
    }

    async fn health_check(&self) -> LedgerResult<()> {
        crate::database::health_check(&self.pool).await
    }
}
