//! Checkout: records a pending payment and hands it to the provider.

use crate::database::error::DatabaseError;
use crate::database::models::{NewPayment, OrderStatus, PaymentKind, PaymentStatus, PaymentUpdate};
use crate::database::LedgerStore;
use crate::error::{AppError, AppErrorKind, DomainError, ValidationError};
use crate::payments::error::PaymentError;
use crate::payments::types::{
    CallbackOutcome, CreatePaymentRequest, Money, PaymentTarget, ProviderKind,
};
use crate::payments::ProviderRegistry;
use crate::services::settlement::{SettlementError, SettlementOutcome, SettlementProcessor};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    pub provider: ProviderKind,
    pub amount: BigDecimal,
    pub currency: String,
    pub kind: PaymentKind,
    pub user_id: Uuid,
    pub order_id: Option<Uuid>,
    /// Amount in the settlement currency; defaults to `amount`.
    pub amount_normalized: Option<BigDecimal>,
    pub currency_normalized: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutResponse {
    pub payment_id: Uuid,
    pub provider: ProviderKind,
    pub provider_payment_id: String,
    pub status: PaymentStatus,
    pub target: PaymentTarget,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error("invalid checkout request: {0}")]
    Invalid(String),
    #[error("order {0} not found")]
    OrderNotFound(Uuid),
    #[error("order {order_id} is {status}; only pending orders can be paid")]
    OrderNotPayable { order_id: Uuid, status: &'static str },
    #[error(transparent)]
    Provider(#[from] PaymentError),
    #[error(transparent)]
    Ledger(#[from] DatabaseError),
    #[error(transparent)]
    Settlement(#[from] SettlementError),
}

impl From<CheckoutError> for AppError {
    fn from(err: CheckoutError) -> Self {
        match err {
            CheckoutError::Invalid(reason) => {
                AppError::new(AppErrorKind::Validation(ValidationError::InvalidField {
                    field: "request".to_string(),
                    reason,
                }))
            }
            CheckoutError::OrderNotFound(id) => {
                AppError::new(AppErrorKind::Domain(DomainError::NotFound {
                    entity: "Order".to_string(),
                    id: id.to_string(),
                }))
            }
            CheckoutError::OrderNotPayable { order_id, status } => {
                AppError::new(AppErrorKind::Domain(DomainError::InvalidState {
                    payment_id: order_id.to_string(),
                    status: status.to_string(),
                    operation: "checkout".to_string(),
                }))
            }
            CheckoutError::Provider(e) => e.into(),
            CheckoutError::Ledger(e) => e.into(),
            CheckoutError::Settlement(e) => e.into(),
        }
    }
}

pub struct CheckoutService {
    ledger: Arc<dyn LedgerStore>,
    registry: Arc<ProviderRegistry>,
    settlement: Arc<SettlementProcessor>,
}

impl CheckoutService {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        registry: Arc<ProviderRegistry>,
        settlement: Arc<SettlementProcessor>,
    ) -> Self {
        Self {
            ledger,
            registry,
            settlement,
        }
    }

    pub async fn create_payment(
        &self,
        request: CheckoutRequest,
    ) -> Result<CheckoutResponse, CheckoutError> {
        let money = Money::new(request.amount.clone(), request.currency.trim().to_uppercase());
        money.validate_positive("amount")?;
        self.validate_target(&request).await?;

        let adapter = self.registry.get(request.provider)?;
        let payment = self
            .ledger
            .insert_payment(NewPayment {
                id: Uuid::new_v4(),
                user_id: request.user_id,
                provider: request.provider,
                kind: request.kind,
                amount_normalized: request
                    .amount_normalized
                    .clone()
                    .unwrap_or_else(|| money.amount.clone()),
                currency_normalized: request
                    .currency_normalized
                    .clone()
                    .unwrap_or_else(|| money.currency.clone()),
                amount_original: money.amount.clone(),
                currency_original: money.currency.clone(),
                order_id: request.order_id,
            })
            .await?;

        info!(
            payment_id = %payment.id,
            provider = %payment.provider,
            kind = payment.kind.as_str(),
            amount = %payment.amount_original,
            currency = %payment.currency_original,
            "checkout started"
        );

        let created = match adapter
            .create_payment(CreatePaymentRequest {
                payment_id: payment.id,
                user_id: payment.user_id,
                amount: money,
                description: request.description.clone(),
                callback_url: None,
                return_url: None,
                cancel_url: None,
                metadata: request
                    .order_id
                    .map(|id| serde_json::json!({ "order_id": id })),
            })
            .await
        {
            Ok(created) => created,
            Err(e) => {
                warn!(payment_id = %payment.id, provider = %payment.provider, error = %e, "provider checkout failed");
                if let Err(write_err) = self
                    .ledger
                    .conditional_update_status(
                        payment.id,
                        PaymentStatus::Pending,
                        PaymentStatus::Failed,
                        PaymentUpdate::default(),
                    )
                    .await
                {
                    error!(payment_id = %payment.id, error = %write_err, "failed to mark checkout failed");
                }
                return Err(e.into());
            }
        };

        self.ledger
            .set_provider_payment_id(payment.id, &created.provider_payment_id)
            .await?;

        let mut status = PaymentStatus::Pending;
        if created.target == PaymentTarget::Settled {
            let settled = self
                .settlement
                .settle(&payment, CallbackOutcome::Completed, None)
                .await
                .map_err(|e| {
                    // The provider already moved the money; the payment row is behind.
                    error!(
                        payment_id = %payment.id,
                        user_id = %payment.user_id,
                        provider = %payment.provider,
                        amount = %payment.amount_normalized,
                        currency = %payment.currency_normalized,
                        provider_payment_id = %created.provider_payment_id,
                        error = %e,
                        "synchronous settlement failed after funds moved; needs reconciliation"
                    );
                    e
                })?;
            match settled {
                SettlementOutcome::Processed { status: s, .. }
                | SettlementOutcome::AlreadyProcessed { status: s, .. } => status = s,
                SettlementOutcome::Acknowledged => {}
            }
        }

        Ok(CheckoutResponse {
            payment_id: payment.id,
            provider: payment.provider,
            provider_payment_id: created.provider_payment_id,
            status,
            target: created.target,
            expires_at: created.expires_at,
        })
    }

    async fn validate_target(&self, request: &CheckoutRequest) -> Result<(), CheckoutError> {
        if request.provider == ProviderKind::Balance {
            ensure_single_currency(request)?;
        }
        match request.kind {
            PaymentKind::Deposit => {
                if request.provider == ProviderKind::Balance {
                    return Err(CheckoutError::Invalid(
                        "deposits cannot be paid from the balance".to_string(),
                    ));
                }
                if request.order_id.is_some() {
                    return Err(CheckoutError::Invalid(
                        "deposits do not reference an order".to_string(),
                    ));
                }
                Ok(())
            }
            PaymentKind::Order => {
                let order_id = request
                    .order_id
                    .ok_or_else(|| CheckoutError::Invalid("orderId is required".to_string()))?;
                let order = self
                    .ledger
                    .get_order(order_id)
                    .await?
                    .ok_or(CheckoutError::OrderNotFound(order_id))?;
                if order.status != OrderStatus::Pending {
                    return Err(CheckoutError::OrderNotPayable {
                        order_id,
                        status: order.status.as_str(),
                    });
                }
                Ok(())
            }
        }
    }
}

/// The wallet debits and refunds `amount_normalized`, so a balance payment
/// must not carry a conversion.
fn ensure_single_currency(request: &CheckoutRequest) -> Result<(), CheckoutError> {
    if let Some(normalized) = &request.amount_normalized {
        if *normalized != request.amount {
            return Err(CheckoutError::Invalid(
                "balance payments cannot set a different amountNormalized".to_string(),
            ));
        }
    }
    if let Some(currency) = &request.currency_normalized {
        if !currency.trim().eq_ignore_ascii_case(request.currency.trim()) {
            return Err(CheckoutError::Invalid(
                "balance payments cannot set a different currencyNormalized".to_string(),
            ));
        }
    }
    Ok(())
}
