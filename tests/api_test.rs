mod support;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use bigdecimal::BigDecimal;
use serde_json::{json, Value};
use settlement_backend::api::{self, AppState};
use settlement_backend::database::models::{OrderStatus, PaymentKind, PaymentStatus};
use settlement_backend::database::LedgerStore;
use settlement_backend::health::HealthChecker;
use settlement_backend::payments::types::{ProviderKind, RefundOutcome, RefundPolicy};
use settlement_backend::payments::ProviderAdapter;
use settlement_backend::services::CheckoutService;
use std::sync::Arc;
use support::*;
use tower::ServiceExt;
use uuid::Uuid;

fn app(h: &Harness) -> Router {
    let checkout = Arc::new(CheckoutService::new(
        h.ledger.clone(),
        h.registry.clone(),
        h.settlement.clone(),
    ));
    api::router(AppState {
        ledger: h.ledger.clone(),
        settlement: h.settlement.clone(),
        refunds: h.refunds.clone(),
        checkout,
        health: HealthChecker::new(h.ledger.clone(), h.registry.clone()),
    })
}

fn harness() -> Harness {
    let adapter: Arc<dyn ProviderAdapter> = Arc::new(ScriptedAdapter::new(
        ProviderKind::Payos,
        RefundPolicy::SingleAttempt,
        vec![RefundOutcome::succeeded(json!({ "code": "00" }))],
    ));
    Harness::new(vec![adapter], Arc::new(RecordingNotifier::default()))
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn webhook(provider: &str, signature: &str, body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(format!("/webhooks/{}", provider))
        .header("x-test-signature", signature)
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn webhook_status_codes() {
    let h = harness();
    let payment = h
        .insert_payment(ProviderKind::Payos, PaymentKind::Deposit, 10, "VND", None)
        .await;
    let body = webhook_body(&payment.id.to_string(), "completed");

    let (status, _) = send(app(&h), webhook("stripe", TEST_SIGNATURE, body.clone())).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(app(&h), webhook("payos", "forged", body.clone())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(app(&h), webhook("payos", TEST_SIGNATURE, b"{oops".to_vec())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        app(&h),
        webhook(
            "payos",
            TEST_SIGNATURE,
            webhook_body(&Uuid::new_v4().to_string(), "completed"),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, json) = send(app(&h), webhook("payos", TEST_SIGNATURE, body.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "processed");

    let (status, json) = send(app(&h), webhook("payos", TEST_SIGNATURE, body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "already processed");
}

#[tokio::test]
async fn refund_endpoint_reports_outcome_and_state_errors() {
    let h = harness();
    let completed = h.completed_order_payment(ProviderKind::Payos, 100_000, "VND").await;
    let pending = h
        .insert_payment(ProviderKind::Payos, PaymentKind::Deposit, 10, "VND", None)
        .await;

    let (status, json) = send(
        app(&h),
        post_json("/refunds", json!({ "paymentId": pending.id, "reason": "changed mind" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["error"], "INVALID_STATE");

    let (status, _) = send(
        app(&h),
        post_json("/refunds", json!({ "paymentId": Uuid::new_v4(), "reason": "changed mind" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        app(&h),
        post_json("/refunds", json!({ "paymentId": completed.id, "reason": "  " })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, json) = send(
        app(&h),
        post_json("/refunds", json!({ "paymentId": completed.id, "reason": "changed mind" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    assert_eq!(json["outcome"], "succeeded");
    assert_eq!(json["status"], "refunded");
    assert_eq!(
        h.order_status(completed.order_id.unwrap()).await,
        OrderStatus::Refunded
    );
}

#[tokio::test]
async fn balance_checkout_settles_immediately() {
    let h = harness();
    let user_id = Uuid::new_v4();
    h.store.set_balance(user_id, BigDecimal::from(500)).await;
    let order_id = h.pending_order(120).await;

    let (status, json) = send(
        app(&h),
        post_json(
            "/payments",
            json!({
                "provider": "balance",
                "amount": "120",
                "currency": "vnd",
                "kind": "order",
                "userId": user_id,
                "orderId": order_id,
            }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["status"], "completed");
    assert_eq!(json["target"]["type"], "settled");
    assert_eq!(h.order_status(order_id).await, OrderStatus::Paid);
    assert_eq!(
        h.ledger.get_balance(user_id).await.unwrap(),
        BigDecimal::from(380)
    );

    let payment_id = json["paymentId"].as_str().unwrap().to_string();
    let (status, json) = send(
        app(&h),
        Request::builder()
            .uri(format!("/payments/{}", payment_id))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "completed");
    assert_eq!(json["currency_original"], "VND");

    // The order is paid now.
    let (status, _) = send(
        app(&h),
        post_json(
            "/payments",
            json!({
                "provider": "payos",
                "amount": "120",
                "currency": "VND",
                "kind": "order",
                "userId": user_id,
                "orderId": order_id,
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn checkout_redirects_or_rejects_short_balance() {
    let h = harness();
    let user_id = Uuid::new_v4();
    h.store.set_balance(user_id, BigDecimal::from(10)).await;

    let (status, _) = send(
        app(&h),
        post_json(
            "/payments",
            json!({
                "provider": "payos",
                "amount": "50000",
                "currency": "VND",
                "kind": "deposit",
                "userId": user_id,
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let order_id = h.pending_order(120).await;
    let (status, _) = send(
        app(&h),
        post_json(
            "/payments",
            json!({
                "provider": "balance",
                "amount": "120",
                "currency": "VND",
                "kind": "order",
                "userId": user_id,
                "orderId": order_id,
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(h.order_status(order_id).await, OrderStatus::Pending);
}

#[tokio::test]
async fn balance_refund_returns_exactly_what_checkout_debited() {
    let h = harness();
    let user_id = Uuid::new_v4();
    h.store.set_balance(user_id, BigDecimal::from(1000)).await;
    let order_id = h.pending_order(100).await;

    let (status, json) = send(
        app(&h),
        post_json(
            "/payments",
            json!({
                "provider": "balance",
                "amount": "100",
                "currency": "VND",
                "amountNormalized": "250",
                "kind": "order",
                "userId": user_id,
                "orderId": order_id,
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "VALIDATION_ERROR");
    assert_eq!(
        h.ledger.get_balance(user_id).await.unwrap(),
        BigDecimal::from(1000)
    );
    assert_eq!(h.order_status(order_id).await, OrderStatus::Pending);

    let (status, _) = send(
        app(&h),
        post_json(
            "/payments",
            json!({
                "provider": "balance",
                "amount": "100",
                "currency": "VND",
                "currencyNormalized": "USDT",
                "kind": "order",
                "userId": user_id,
                "orderId": order_id,
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, json) = send(
        app(&h),
        post_json(
            "/payments",
            json!({
                "provider": "balance",
                "amount": "100",
                "currency": "vnd",
                "amountNormalized": "100.00",
                "currencyNormalized": "VND",
                "kind": "order",
                "userId": user_id,
                "orderId": order_id,
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(
        h.ledger.get_balance(user_id).await.unwrap(),
        BigDecimal::from(900)
    );

    let payment_id = json["paymentId"].as_str().unwrap().to_string();
    let (status, json) = send(
        app(&h),
        post_json(
            "/refunds",
            json!({ "paymentId": payment_id, "reason": "buyer cancelled" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["outcome"], "succeeded");
    assert_eq!(
        h.ledger.get_balance(user_id).await.unwrap(),
        BigDecimal::from(1000)
    );
}

#[tokio::test]
async fn balance_checkout_surfaces_a_failed_status_write() {
    let h = harness();
    let user_id = Uuid::new_v4();
    h.store.set_balance(user_id, BigDecimal::from(500)).await;
    let order_id = h.pending_order(120).await;
    h.store.set_fail_status_writes(true).await;

    let (status, json) = send(
        app(&h),
        post_json(
            "/payments",
            json!({
                "provider": "balance",
                "amount": "120",
                "currency": "VND",
                "kind": "order",
                "userId": user_id,
                "orderId": order_id,
            }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["error"], "DATABASE_ERROR");
    // The debit committed; the row is left pending for reconciliation.
    assert_eq!(
        h.ledger.get_balance(user_id).await.unwrap(),
        BigDecimal::from(380)
    );
    let entries = h.store.ledger_entries(user_id).await;
    assert_eq!(entries.len(), 1);
    let payment_id = entries[0].payment_id.unwrap();
    assert_eq!(h.payment(payment_id).await.status, PaymentStatus::Pending);
    assert_eq!(h.order_status(order_id).await, OrderStatus::Pending);
}

#[tokio::test]
async fn health_lists_registered_providers() {
    let h = harness();
    let (status, json) = send(
        app(&h),
        Request::builder().uri("/health").body(Body::empty()).unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["providers"], json!(["payos", "balance"]));
}
