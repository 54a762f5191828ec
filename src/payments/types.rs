use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Bearer token issued by the gateway's OAuth2 endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthToken {
    pub access_token: String,
    pub token_type: String,
    pub expires_at: DateTime<Utc>,
}

impl AuthToken {
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Gateway view of a transaction. `status` is the gateway's own vocabulary;
/// mapping it to a `PaymentStatus` is the caller's job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayStatusResponse {
    pub invoice_id: String,
    pub status: String,
    pub transaction_id: Option<String>,
    /// Minor currency units
    pub amount: Option<i64>,
    pub currency: Option<String>,
    pub card_mask: Option<String>,
    pub approval_code: Option<String>,
    pub reason: Option<String>,
    pub raw: Option<JsonValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CardChargeRequest {
    pub invoice_id: String,
    pub member_id: String,
    pub card_token: String,
    /// Minor currency units
    pub amount: i64,
    pub currency: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardChargeResponse {
    pub transaction_id: String,
    pub status: String,
    pub card_mask: Option<String>,
    pub approval_code: Option<String>,
    pub reason: Option<String>,
    pub raw: Option<JsonValue>,
}

/// Where to send the member to pay
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckoutReference {
    pub checkout_url: String,
    pub auth_token: String,
    pub token_expires_at: DateTime<Utc>,
}
