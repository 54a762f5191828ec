//! Thin HTTP surface over the payment use cases

pub mod payments;
pub mod webhooks;

use axum::{
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::health::HealthChecker;
use crate::services::PaymentServices;

#[derive(Clone)]
pub struct AppState {
    pub services: PaymentServices,
    pub health: HealthChecker,
    /// HMAC secret for inbound gateway webhooks; unsigned webhooks are
    /// accepted when absent
    pub webhook_secret: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(payments::health))
        .route("/api/payments", post(payments::initiate_payment))
        .route("/api/payments/saved-card", post(payments::pay_with_saved_card))
        .route("/api/payments/{id}/refund", post(payments::refund_payment))
        .route("/api/payments/{id}/cancel", post(payments::cancel_payment))
        .route("/api/payments/{id}/receipt", post(payments::generate_receipt))
        .route("/api/receipts/{number}", get(payments::get_receipt))
        .route("/api/cards", post(payments::save_card))
        .route("/api/members/{member_id}/cards", get(payments::list_cards))
        .route(
            "/api/members/{member_id}/cards/{card_id}",
            axum::routing::delete(payments::deactivate_card),
        )
        .route(
            "/api/members/{member_id}/cards/{card_id}/default",
            post(payments::set_default_card),
        )
        .route(
            "/api/members/{member_id}/receipts",
            get(payments::list_member_receipts),
        )
        .route("/api/webhooks/payment", post(webhooks::handle_payment_webhook))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
}
