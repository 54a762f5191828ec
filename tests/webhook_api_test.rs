//! HTTP surface tests: webhook signatures, payment routes and health.

use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha512;
use tower::ServiceExt;

use library_backend::api::{self, webhooks::SIGNATURE_HEADER, AppState};
use library_backend::config::PaymentsConfig;
use library_backend::database::Repositories;
use library_backend::health::HealthChecker;
use library_backend::payments::error::GatewayError;
use library_backend::payments::providers::mock::{GatewayOp, MockGateway};
use library_backend::services::PaymentServices;

const SECRET: &str = "webhook-test-secret";

fn create_test_app(gateway: Arc<MockGateway>, webhook_secret: Option<&str>) -> Router {
    let repos = Repositories::in_memory();
    let services = PaymentServices::new(&repos, gateway.clone(), &PaymentsConfig::default());
    api::router(AppState {
        services,
        health: HealthChecker::new(gateway),
        webhook_secret: webhook_secret.map(str::to_string),
    })
}

fn sign(body: &[u8]) -> String {
    let mut mac = Hmac::<Sha512>::new_from_slice(SECRET.as_bytes()).unwrap();
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

async fn read_json(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap()
}

async fn initiate(app: &Router) -> Value {
    let response = app
        .clone()
        .oneshot(post_json(
            "/api/payments",
            &json!({
                "member_id": "member-1",
                "amount": 12_500,
                "currency": "kzt",
                "payment_type": "fine",
                "related_entity_id": "fine-3"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    read_json(response).await
}

#[tokio::test]
async fn initiate_returns_checkout_reference() {
    let app = create_test_app(Arc::new(MockGateway::new()), None);
    let json = initiate(&app).await;

    assert_eq!(json["currency"], "KZT");
    assert_eq!(json["amount"], 12_500);
    let invoice_id = json["invoice_id"].as_str().unwrap();
    assert!(json["checkout"]["checkout_url"]
        .as_str()
        .unwrap()
        .ends_with(invoice_id));
}

#[tokio::test]
async fn initiate_rejects_unsupported_currency() {
    let app = create_test_app(Arc::new(MockGateway::new()), None);
    let response = app
        .oneshot(post_json(
            "/api/payments",
            &json!({
                "member_id": "member-1",
                "amount": 100,
                "currency": "GBP",
                "payment_type": "fine"
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = read_json(response).await;
    assert_eq!(json["error"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn signed_webhook_completes_payment() {
    let gateway = Arc::new(MockGateway::new());
    let app = create_test_app(gateway.clone(), Some(SECRET));
    let created = initiate(&app).await;
    let invoice_id = created["invoice_id"].as_str().unwrap();
    gateway.set_success(invoice_id, 12_500, "KZT").await;

    let body = serde_json::to_vec(&json!({
        "invoice_id": invoice_id,
        "transaction_id": "tx-981",
        "amount": 12_500,
        "currency": "KZT",
        "status": "success"
    }))
    .unwrap();

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/webhooks/payment")
                .header(header::CONTENT_TYPE, "application/json")
                .header(SIGNATURE_HEADER, sign(&body))
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = read_json(response).await;
    assert_eq!(json["status"], "completed");
    assert_eq!(json["processed"], true);
}

#[tokio::test]
async fn webhook_with_bad_signature_is_rejected() {
    let app = create_test_app(Arc::new(MockGateway::new()), Some(SECRET));
    let body = br#"{"invoice_id":"fine-1","transaction_id":"tx","amount":1,"currency":"KZT","status":"success"}"#;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/webhooks/payment")
                .header(SIGNATURE_HEADER, "deadbeef")
                .body(Body::from(&body[..]))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(read_json(response).await["error"], "INVALID_SIGNATURE");

    let unsigned = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/webhooks/payment")
                .body(Body::from(&body[..]))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(unsigned.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn malformed_webhook_is_bad_request() {
    let app = create_test_app(Arc::new(MockGateway::new()), None);
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/webhooks/payment")
                .body(Body::from("not json"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn errors_carry_request_id() {
    let app = create_test_app(Arc::new(MockGateway::new()), None);
    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/receipts/RCP-MISSING")
                .header("x-request-id", "req-123")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(response.headers()["x-request-id"], "req-123");
    let json = read_json(response).await;
    assert_eq!(json["error"], "RECEIPT_NOT_FOUND");
    assert_eq!(json["request_id"], "req-123");
}

#[tokio::test]
async fn unknown_route_is_not_found() {
    let app = create_test_app(Arc::new(MockGateway::new()), None);
    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/does-not-exist")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn health_reports_degraded_gateway_as_ok() {
    let gateway = Arc::new(MockGateway::new());
    let app = create_test_app(gateway.clone(), None);

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_json(response).await["status"], "Healthy");

    gateway
        .fail_on(
            GatewayOp::AuthToken,
            GatewayError::Network {
                message: "unreachable".to_string(),
            },
        )
        .await;
    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_json(response).await["status"], "Degraded");
}
