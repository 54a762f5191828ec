use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use tracing::{info, warn};

use crate::api::AppState;
use crate::middleware::error::get_request_id_from_headers;
use crate::payments::utils::verify_hmac_sha512_hex;

pub const SIGNATURE_HEADER: &str = "x-signature";

/// POST /api/webhooks/payment
///
/// The raw body is verified and stored as received; it is only parsed by the
/// callback service.
pub async fn handle_payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request_id = get_request_id_from_headers(&headers);

    if let Some(secret) = state.webhook_secret.as_deref() {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok());
        let valid = signature
            .map(|sig| verify_hmac_sha512_hex(&body, secret, sig))
            .unwrap_or(false);
        if !valid {
            warn!(
                request_id = ?request_id,
                has_signature = signature.is_some(),
                "payment webhook rejected: bad signature"
            );
            return (
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({ "error": "INVALID_SIGNATURE" })),
            )
                .into_response();
        }
    }

    match state.services.callbacks.handle_payload(&body).await {
        Ok(response) => {
            info!(
                request_id = ?request_id,
                payment_id = %response.payment_id,
                status = %response.status,
                processed = response.processed,
                retry_scheduled = response.retry_scheduled,
                "payment webhook handled"
            );
            (StatusCode::OK, Json(response)).into_response()
        }
        Err(e) => match request_id {
            Some(id) => e.with_request_id(id).into_response(),
            None => e.into_response(),
        },
    }
}
