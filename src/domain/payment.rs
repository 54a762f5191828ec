use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::AppError;

/// Lifecycle status of a payment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
    Refunded,
}

impl PaymentStatus {
    pub const ALL: [PaymentStatus; 6] = [
        PaymentStatus::Pending,
        PaymentStatus::Processing,
        PaymentStatus::Completed,
        PaymentStatus::Failed,
        PaymentStatus::Cancelled,
        PaymentStatus::Refunded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Processing => "processing",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Cancelled => "cancelled",
            PaymentStatus::Refunded => "refunded",
        }
    }

    /// Outgoing edges of the status machine.
    pub fn allowed_transitions(&self) -> &'static [PaymentStatus] {
        match self {
            PaymentStatus::Pending => &[
                PaymentStatus::Processing,
                PaymentStatus::Cancelled,
                PaymentStatus::Failed,
            ],
            PaymentStatus::Processing => &[
                PaymentStatus::Completed,
                PaymentStatus::Failed,
                PaymentStatus::Cancelled,
            ],
            PaymentStatus::Completed => &[PaymentStatus::Refunded],
            PaymentStatus::Failed => &[PaymentStatus::Pending],
            PaymentStatus::Cancelled | PaymentStatus::Refunded => &[],
        }
    }

    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        self.allowed_transitions().contains(&next)
    }

    /// Final as far as gateway callbacks are concerned. Completed can still be
    /// refunded and Failed can be retried manually, but never by a callback.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Completed
                | PaymentStatus::Failed
                | PaymentStatus::Cancelled
                | PaymentStatus::Refunded
        )
    }

    /// Statuses that carry a completion timestamp.
    pub fn requires_completed_at(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Completed | PaymentStatus::Cancelled | PaymentStatus::Refunded
        )
    }

    pub fn is_open(&self) -> bool {
        matches!(self, PaymentStatus::Pending | PaymentStatus::Processing)
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(PaymentStatus::Pending),
            "processing" => Ok(PaymentStatus::Processing),
            "completed" => Ok(PaymentStatus::Completed),
            "failed" => Ok(PaymentStatus::Failed),
            "cancelled" => Ok(PaymentStatus::Cancelled),
            "refunded" => Ok(PaymentStatus::Refunded),
            other => Err(AppError::invalid_field(
                "status",
                format!("unknown payment status '{}'", other),
            )),
        }
    }
}

/// What the payment is for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentType {
    Fine,
    Subscription,
    Deposit,
}

impl PaymentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentType::Fine => "fine",
            PaymentType::Subscription => "subscription",
            PaymentType::Deposit => "deposit",
        }
    }
}

impl fmt::Display for PaymentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentType {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "fine" => Ok(PaymentType::Fine),
            "subscription" => Ok(PaymentType::Subscription),
            "deposit" => Ok(PaymentType::Deposit),
            other => Err(AppError::invalid_field(
                "payment_type",
                format!("unknown payment type '{}'", other),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Hosted checkout, the member is redirected to the gateway
    Card,
    /// Tokenised card charged without redirect
    SavedCard,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Card => "card",
            PaymentMethod::SavedCard => "saved_card",
        }
    }
}

impl FromStr for PaymentMethod {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "card" => Ok(PaymentMethod::Card),
            "saved_card" => Ok(PaymentMethod::SavedCard),
            other => Err(AppError::invalid_field(
                "payment_method",
                format!("unknown payment method '{}'", other),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub invoice_id: String,
    pub member_id: String,
    /// Minor currency units
    pub amount: i64,
    pub currency: String,
    pub status: PaymentStatus,
    pub payment_method: PaymentMethod,
    pub payment_type: PaymentType,
    pub related_entity_id: Option<String>,
    pub gateway_transaction_id: Option<String>,
    pub gateway_response: Option<JsonValue>,
    pub card_mask: Option<String>,
    pub approval_code: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub refund_amount: Option<i64>,
    pub refund_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
}

impl Payment {
    /// A fresh pending payment. Validation is left to `rules::validate`.
    #[allow(clippy::too_many_arguments)]
    pub fn new_pending(
        invoice_id: String,
        member_id: String,
        amount: i64,
        currency: String,
        payment_method: PaymentMethod,
        payment_type: PaymentType,
        related_entity_id: Option<String>,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            invoice_id,
            member_id,
            amount,
            currency,
            status: PaymentStatus::Pending,
            payment_method,
            payment_type,
            related_entity_id,
            gateway_transaction_id: None,
            gateway_response: None,
            card_mask: None,
            approval_code: None,
            error_code: None,
            error_message: None,
            refund_amount: None,
            refund_reason: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
            expires_at,
        }
    }

    /// Apply a status change in memory. Fields left as `None` keep their value.
    pub fn apply(&mut self, update: &PaymentUpdate) {
        self.status = update.status;
        if let Some(v) = &update.gateway_transaction_id {
            self.gateway_transaction_id = Some(v.clone());
        }
        if let Some(v) = &update.gateway_response {
            self.gateway_response = Some(v.clone());
        }
        if let Some(v) = &update.card_mask {
            self.card_mask = Some(v.clone());
        }
        if let Some(v) = &update.approval_code {
            self.approval_code = Some(v.clone());
        }
        if let Some(v) = &update.error_code {
            self.error_code = Some(v.clone());
        }
        if let Some(v) = &update.error_message {
            self.error_message = Some(v.clone());
        }
        if let Some(v) = update.refund_amount {
            self.refund_amount = Some(v);
        }
        if let Some(v) = &update.refund_reason {
            self.refund_reason = Some(v.clone());
        }
        if let Some(v) = update.completed_at {
            self.completed_at = Some(v);
        }
        self.updated_at = update.updated_at;
    }
}

/// A status change plus the fields recorded with it. Persisted with a
/// conditional update guarded by the expected current status.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentUpdate {
    pub status: PaymentStatus,
    pub gateway_transaction_id: Option<String>,
    pub gateway_response: Option<JsonValue>,
    pub card_mask: Option<String>,
    pub approval_code: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub refund_amount: Option<i64>,
    pub refund_reason: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentUpdate {
    /// Completed and Cancelled stamp `completed_at`; Refunded keeps the
    /// original completion time.
    pub fn new(status: PaymentStatus, now: DateTime<Utc>) -> Self {
        let completed_at = match status {
            PaymentStatus::Completed | PaymentStatus::Cancelled => Some(now),
            _ => None,
        };
        Self {
            status,
            gateway_transaction_id: None,
            gateway_response: None,
            card_mask: None,
            approval_code: None,
            error_code: None,
            error_message: None,
            refund_amount: None,
            refund_reason: None,
            completed_at,
            updated_at: now,
        }
    }

    pub fn with_error(mut self, code: impl Into<String>, message: impl Into<String>) -> Self {
        self.error_code = Some(code.into());
        self.error_message = Some(message.into());
        self
    }

    pub fn with_gateway_details(
        mut self,
        transaction_id: Option<String>,
        card_mask: Option<String>,
        approval_code: Option<String>,
        response: Option<JsonValue>,
    ) -> Self {
        self.gateway_transaction_id = transaction_id;
        self.card_mask = card_mask;
        self.approval_code = approval_code;
        self.gateway_response = response;
        self
    }

    pub fn with_refund(mut self, amount: i64, reason: impl Into<String>) -> Self {
        self.refund_amount = Some(amount);
        self.refund_reason = Some(reason.into());
        self
    }
}
