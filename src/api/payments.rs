use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::api::AppState;
use crate::domain::{Receipt, SavedCard};
use crate::error::{AppError, AppResult};
use crate::health::{HealthState, HealthStatus};
use crate::middleware::error::get_request_id_from_headers;
use crate::services::{
    CancelPaymentRequest, CancelPaymentResponse, InitiatePaymentRequest, InitiatePaymentResponse,
    PayWithSavedCardRequest, PayWithSavedCardResponse, RefundPaymentRequest, RefundPaymentResponse,
    SaveCardRequest,
};

fn tagged(headers: &HeaderMap) -> impl Fn(AppError) -> AppError + '_ {
    move |e| match get_request_id_from_headers(headers) {
        Some(id) => e.with_request_id(id),
        None => e,
    }
}

#[derive(Debug, Deserialize)]
pub struct RefundBody {
    pub member_id: String,
    pub reason: String,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default)]
    pub refund_amount: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct CancelBody {
    pub member_id: String,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Pagination {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    20
}

/// POST /api/payments
pub async fn initiate_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<InitiatePaymentRequest>,
) -> AppResult<(StatusCode, Json<InitiatePaymentResponse>)> {
    let response = state
        .services
        .initiate
        .execute(request)
        .await
        .map_err(tagged(&headers))?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// POST /api/payments/{id}/refund
pub async fn refund_payment(
    State(state): State<AppState>,
    Path(payment_id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<RefundBody>,
) -> AppResult<Json<RefundPaymentResponse>> {
    let request = RefundPaymentRequest {
        payment_id,
        member_id: body.member_id,
        reason: body.reason,
        is_admin: body.is_admin,
        refund_amount: body.refund_amount,
    };
    let response = state
        .services
        .refunds
        .execute(request)
        .await
        .map_err(tagged(&headers))?;
    Ok(Json(response))
}

/// POST /api/payments/{id}/cancel
pub async fn cancel_payment(
    State(state): State<AppState>,
    Path(payment_id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<CancelBody>,
) -> AppResult<Json<CancelPaymentResponse>> {
    let request = CancelPaymentRequest {
        payment_id,
        member_id: body.member_id,
        is_admin: body.is_admin,
        reason: body.reason,
    };
    let response = state
        .services
        .cancellations
        .execute(request)
        .await
        .map_err(tagged(&headers))?;
    Ok(Json(response))
}

/// POST /api/payments/{id}/receipt
pub async fn generate_receipt(
    State(state): State<AppState>,
    Path(payment_id): Path<Uuid>,
    headers: HeaderMap,
) -> AppResult<Json<Receipt>> {
    let receipt = state
        .services
        .receipts
        .generate(payment_id)
        .await
        .map_err(tagged(&headers))?;
    Ok(Json(receipt))
}

/// GET /api/receipts/{number}
pub async fn get_receipt(
    State(state): State<AppState>,
    Path(number): Path<String>,
    headers: HeaderMap,
) -> AppResult<Json<Receipt>> {
    let receipt = state
        .services
        .receipts
        .get_by_number(&number)
        .await
        .map_err(tagged(&headers))?;
    Ok(Json(receipt))
}

/// GET /api/members/{member_id}/receipts
pub async fn list_member_receipts(
    State(state): State<AppState>,
    Path(member_id): Path<String>,
    Query(page): Query<Pagination>,
    headers: HeaderMap,
) -> AppResult<Json<Vec<Receipt>>> {
    let receipts = state
        .services
        .receipts
        .list_for_member(&member_id, page.limit, page.offset)
        .await
        .map_err(tagged(&headers))?;
    Ok(Json(receipts))
}

/// POST /api/payments/saved-card
pub async fn pay_with_saved_card(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<PayWithSavedCardRequest>,
) -> AppResult<(StatusCode, Json<PayWithSavedCardResponse>)> {
    let response = state
        .services
        .saved_cards
        .pay_with_saved_card(request)
        .await
        .map_err(tagged(&headers))?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// POST /api/cards
pub async fn save_card(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<SaveCardRequest>,
) -> AppResult<(StatusCode, Json<SavedCard>)> {
    let card = state
        .services
        .saved_cards
        .save_card(request)
        .await
        .map_err(tagged(&headers))?;
    Ok((StatusCode::CREATED, Json(card)))
}

/// GET /api/members/{member_id}/cards
pub async fn list_cards(
    State(state): State<AppState>,
    Path(member_id): Path<String>,
    headers: HeaderMap,
) -> AppResult<Json<Vec<SavedCard>>> {
    let cards = state
        .services
        .saved_cards
        .list_usable(&member_id)
        .await
        .map_err(tagged(&headers))?;
    Ok(Json(cards))
}

/// POST /api/members/{member_id}/cards/{card_id}/default
pub async fn set_default_card(
    State(state): State<AppState>,
    Path((member_id, card_id)): Path<(String, Uuid)>,
    headers: HeaderMap,
) -> AppResult<Json<SavedCard>> {
    let card = state
        .services
        .saved_cards
        .set_default(&member_id, card_id)
        .await
        .map_err(tagged(&headers))?;
    Ok(Json(card))
}

/// DELETE /api/members/{member_id}/cards/{card_id}
pub async fn deactivate_card(
    State(state): State<AppState>,
    Path((member_id, card_id)): Path<(String, Uuid)>,
    headers: HeaderMap,
) -> AppResult<StatusCode> {
    state
        .services
        .saved_cards
        .deactivate(&member_id, card_id)
        .await
        .map_err(tagged(&headers))?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthStatus>) {
    let status = state.health.check_health().await;
    let code = match status.status {
        HealthState::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        HealthState::Healthy | HealthState::Degraded => StatusCode::OK,
    };
    (code, Json(status))
}
