mod support;

use http::HeaderMap;
use serde_json::json;
use settlement_backend::config::PayosConfig;
use settlement_backend::database::models::{PaymentKind, PaymentStatus};
use settlement_backend::database::LedgerStore;
use settlement_backend::payments::providers::payos::{data_signature_payload, order_code_for};
use settlement_backend::payments::providers::PayosAdapter;
use settlement_backend::payments::types::ProviderKind;
use settlement_backend::payments::utils::hmac_sha256_hex;
use settlement_backend::payments::ProviderAdapter;
use settlement_backend::services::{SettlementError, SettlementOutcome};
use std::sync::Arc;
use std::time::Duration;
use support::*;

const CHECKSUM_KEY: &str = "test-checksum-key";

fn payos_adapter() -> Arc<dyn ProviderAdapter> {
    Arc::new(
        PayosAdapter::new(
            PayosConfig {
                client_id: "client".to_string(),
                api_key: "api-key".to_string(),
                checksum_key: CHECKSUM_KEY.to_string(),
                base_url: "https://payos.invalid".to_string(),
            },
            "https://shop.test/payments/return".to_string(),
            "https://shop.test/payments/cancel".to_string(),
            Duration::from_secs(5),
            backoff_policy(),
        )
        .unwrap(),
    )
}

fn signed_body(order_code: u64, code: &str, key: &str) -> Vec<u8> {
    let data = json!({
        "orderCode": order_code,
        "amount": 100000,
        "description": "DH test",
        "reference": "FT2601010001",
        "code": code,
        "desc": "success",
    });
    let payload = data_signature_payload(data.as_object().unwrap());
    json!({
        "code": "00",
        "desc": "success",
        "success": true,
        "data": data,
        "signature": hmac_sha256_hex(key, payload.as_bytes()),
    })
    .to_string()
    .into_bytes()
}

#[tokio::test]
async fn signed_payos_callback_settles_by_order_code() {
    let h = Harness::new(vec![payos_adapter()], Arc::new(RecordingNotifier::default()));
    let payment = h
        .insert_payment(ProviderKind::Payos, PaymentKind::Deposit, 100_000, "VND", None)
        .await;
    let order_code = order_code_for(payment.id);
    h.ledger
        .set_provider_payment_id(payment.id, &order_code.to_string())
        .await
        .unwrap();

    let outcome = h
        .settlement
        .process_callback(
            "payos",
            &HeaderMap::new(),
            &signed_body(order_code, "00", CHECKSUM_KEY),
        )
        .await
        .unwrap();

    assert_eq!(
        outcome,
        SettlementOutcome::Processed {
            payment_id: payment.id,
            status: PaymentStatus::Completed
        }
    );
    let stored = h.payment(payment.id).await;
    assert_eq!(stored.provider_tx_reference.as_deref(), Some("FT2601010001"));
    assert_eq!(h.store.ledger_entries(payment.user_id).await.len(), 1);
}

#[tokio::test]
async fn payos_callback_signed_with_wrong_key_is_rejected() {
    let h = Harness::new(vec![payos_adapter()], Arc::new(RecordingNotifier::default()));
    let payment = h
        .insert_payment(ProviderKind::Payos, PaymentKind::Deposit, 100_000, "VND", None)
        .await;
    let order_code = order_code_for(payment.id);
    h.ledger
        .set_provider_payment_id(payment.id, &order_code.to_string())
        .await
        .unwrap();

    let err = h
        .settlement
        .process_callback(
            "payos",
            &HeaderMap::new(),
            &signed_body(order_code, "00", "someone-else"),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, SettlementError::InvalidSignature(_)));
    assert_eq!(h.payment(payment.id).await.status, PaymentStatus::Pending);
}

#[tokio::test]
async fn malformed_payos_callback_is_a_parse_error() {
    let h = Harness::new(vec![payos_adapter()], Arc::new(RecordingNotifier::default()));
    let payment = h
        .insert_payment(ProviderKind::Payos, PaymentKind::Deposit, 100_000, "VND", None)
        .await;

    let err = h
        .settlement
        .process_callback("payos", &HeaderMap::new(), b"{oops")
        .await
        .unwrap_err();
    assert!(matches!(err, SettlementError::Parse(_)));
    assert_eq!(err.http_status(), 400);

    let err = h
        .settlement
        .process_callback("payos", &HeaderMap::new(), br#"{"code":"00","signature":"abc"}"#)
        .await
        .unwrap_err();
    assert!(matches!(err, SettlementError::Parse(_)));
    assert_eq!(err.http_status(), 400);

    assert_eq!(h.payment(payment.id).await.status, PaymentStatus::Pending);
}
