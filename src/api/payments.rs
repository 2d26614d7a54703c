use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use super::AppState;
use crate::database::error::DatabaseError;
use crate::database::models::Payment;
use crate::error::AppError;
use crate::services::checkout::{CheckoutRequest, CheckoutResponse};

/// POST /payments
pub async fn create_payment(
    State(state): State<AppState>,
    Json(request): Json<CheckoutRequest>,
) -> Result<(StatusCode, Json<CheckoutResponse>), AppError> {
    let response = state.checkout.create_payment(request).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// GET /payments/{id}
pub async fn get_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Payment>, AppError> {
    let payment = state
        .ledger
        .get_payment(id)
        .await?
        .ok_or_else(|| DatabaseError::not_found("Payment", id))?;
    Ok(Json(payment))
}
