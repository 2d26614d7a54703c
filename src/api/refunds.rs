use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use super::AppState;
use crate::error::{AppError, AppErrorKind, ValidationError};
use crate::middleware::error::get_request_id_from_headers;
use crate::services::refund_orchestrator::{RefundResult, RefundResultOutcome};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundRequest {
    pub payment_id: Uuid,
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmManualRequest {
    pub note: String,
}

fn tag(error: AppError, headers: &HeaderMap) -> AppError {
    match get_request_id_from_headers(headers) {
        Some(request_id) => error.with_request_id(request_id),
        None => error,
    }
}

/// A refund the provider or ledger refused is still a well-formed answer;
/// it is reported as 502 with the same body shape.
fn refund_response(result: RefundResult) -> Response {
    let status = match result.outcome {
        RefundResultOutcome::Failed => StatusCode::BAD_GATEWAY,
        _ => StatusCode::OK,
    };
    (status, Json(result)).into_response()
}

/// POST /refunds
pub async fn create_refund(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<RefundRequest>,
) -> Result<Response, AppError> {
    let reason = request.reason.trim();
    if reason.is_empty() {
        return Err(tag(
            AppError::new(AppErrorKind::Validation(ValidationError::MissingField {
                field: "reason".to_string(),
            })),
            &headers,
        ));
    }

    info!(payment_id = %request.payment_id, "Refund requested");
    let result = state
        .refunds
        .refund(request.payment_id, reason)
        .await
        .map_err(|e| tag(e.into(), &headers))?;
    Ok(refund_response(result))
}

/// POST /refunds/{payment_id}/confirm-manual
pub async fn confirm_manual_refund(
    State(state): State<AppState>,
    Path(payment_id): Path<Uuid>,
    headers: HeaderMap,
    Json(request): Json<ConfirmManualRequest>,
) -> Result<Response, AppError> {
    let result = state
        .refunds
        .confirm_manual_refund(payment_id, request.note.trim())
        .await
        .map_err(|e| tag(e.into(), &headers))?;
    Ok(refund_response(result))
}
