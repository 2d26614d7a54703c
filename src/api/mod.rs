//! HTTP surface: provider webhooks, refunds, checkout and health.

pub mod health;
pub mod payments;
pub mod refunds;
pub mod webhooks;

use crate::database::LedgerStore;
use crate::health::HealthChecker;
use crate::services::checkout::CheckoutService;
use crate::services::refund_orchestrator::RefundOrchestrator;
use crate::services::settlement::SettlementProcessor;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<dyn LedgerStore>,
    pub settlement: Arc<SettlementProcessor>,
    pub refunds: Arc<RefundOrchestrator>,
    pub checkout: Arc<CheckoutService>,
    pub health: HealthChecker,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/webhooks/{provider}", post(webhooks::handle_webhook))
        .route("/refunds", post(refunds::create_refund))
        .route(
            "/refunds/{payment_id}/confirm-manual",
            post(refunds::confirm_manual_refund),
        )
        .route("/payments", post(payments::create_payment))
        .route("/payments/{id}", get(payments::get_payment))
        .with_state(state)
}
