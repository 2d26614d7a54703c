use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use tracing::{error, info, warn};

use super::AppState;
use crate::error::AppError;
use crate::middleware::error::{get_request_id_from_headers, ErrorResponse};

/// POST /webhooks/{provider}
///
/// The body is handed to the adapter untouched; signatures are computed over
/// the raw bytes.
pub async fn handle_webhook(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    info!(provider = %provider, bytes = body.len(), "Received webhook");

    match state
        .settlement
        .process_callback(&provider, &headers, &body)
        .await
    {
        Ok(outcome) => {
            info!(provider = %provider, outcome = outcome.message(), "Webhook handled");
            (
                StatusCode::OK,
                Json(serde_json::json!({ "status": outcome.message() })),
            )
                .into_response()
        }
        Err(e) => {
            let status =
                StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            if status.is_server_error() {
                error!(provider = %provider, error = %e, "Webhook processing failed");
            } else {
                warn!(provider = %provider, error = %e, status = status.as_u16(), "Webhook rejected");
            }
            let mut app_error = AppError::from(e);
            if let Some(request_id) = get_request_id_from_headers(&headers) {
                app_error = app_error.with_request_id(request_id);
            }
            (status, Json(ErrorResponse::from_app_error(&app_error))).into_response()
        }
    }
}
