//! Error handling for the library backend
//!
//! A single `AppError` carries a categorised kind plus optional request id and
//! context. Each kind knows its HTTP status, machine-readable code, user-facing
//! message and whether the failed operation may be retried.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::payments::error::GatewayError;

/// Error codes for programmatic handling by clients
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    // Domain errors (4xx)
    #[serde(rename = "PAYMENT_NOT_FOUND")]
    PaymentNotFound,
    #[serde(rename = "RECEIPT_NOT_FOUND")]
    ReceiptNotFound,
    #[serde(rename = "CARD_NOT_FOUND")]
    CardNotFound,
    #[serde(rename = "INVALID_STATUS_TRANSITION")]
    InvalidStatusTransition,
    #[serde(rename = "AMOUNT_MISMATCH")]
    AmountMismatch,
    #[serde(rename = "CURRENCY_MISMATCH")]
    CurrencyMismatch,
    #[serde(rename = "REFUND_WINDOW_EXPIRED")]
    RefundWindowExpired,
    #[serde(rename = "REFUND_NOT_ALLOWED")]
    RefundNotAllowed,
    #[serde(rename = "REFUND_AMOUNT_EXCEEDED")]
    RefundAmountExceeded,
    #[serde(rename = "CARD_NOT_USABLE")]
    CardNotUsable,
    #[serde(rename = "DUPLICATE_PAYMENT")]
    DuplicatePayment,
    #[serde(rename = "FORBIDDEN")]
    Forbidden,

    // Infrastructure errors (5xx)
    #[serde(rename = "DATABASE_ERROR")]
    DatabaseError,
    #[serde(rename = "CONFIGURATION_ERROR")]
    ConfigurationError,

    // External errors (502, 504)
    #[serde(rename = "GATEWAY_ERROR")]
    GatewayError,
    #[serde(rename = "EXTERNAL_SERVICE_TIMEOUT")]
    ExternalServiceTimeout,

    // Generic
    #[serde(rename = "INTERNAL_ERROR")]
    InternalError,
    #[serde(rename = "VALIDATION_ERROR")]
    ValidationError,
}

/// Business rule violations raised by the payment use cases
#[derive(Debug, Clone)]
pub enum DomainError {
    /// No payment with the given id or invoice id
    PaymentNotFound { reference: String },
    /// No receipt with the given id or number
    ReceiptNotFound { reference: String },
    /// Saved card missing or owned by another member
    CardNotFound { card_id: String },
    /// The requested status change is not an edge of the transition table
    InvalidTransition { from: String, to: String },
    /// Callback amount differs from the stored payment
    AmountMismatch { expected: i64, received: i64 },
    /// Callback currency differs from the stored payment
    CurrencyMismatch { expected: String, received: String },
    /// Completed too long ago to refund
    RefundWindowExpired { completed_at: String, window_days: i64 },
    /// Refund preconditions not met (status, missing completion time, ...)
    RefundNotAllowed { reason: String },
    /// Partial refund larger than the captured amount
    RefundAmountExceeded { requested: i64, available: i64 },
    /// Saved card inactive or expired
    CardNotUsable { card_id: String, reason: String },
    /// Invoice id already taken
    DuplicatePayment { invoice_id: String },
    /// Caller does not own the resource
    Forbidden { reason: String },
}

/// Infrastructure-level errors
#[derive(Debug, Clone)]
pub enum InfrastructureError {
    /// Repository I/O failure
    Database { message: String, is_retryable: bool },
    /// Missing or invalid configuration
    Configuration { message: String },
    /// Unexpected internal failure
    Internal { message: String },
}

/// Failures talking to the payment gateway
#[derive(Debug, Clone)]
pub enum ExternalError {
    Gateway {
        provider: String,
        message: String,
        is_retryable: bool,
    },
    Timeout { service: String, timeout_secs: u64 },
}

/// Input validation errors
#[derive(Debug, Clone)]
pub enum ValidationError {
    InvalidAmount { amount: i64, reason: String },
    InvalidCurrency { currency: String, reason: String },
    MissingField { field: String },
    InvalidField { field: String, reason: String },
}

/// Unified application error type
#[derive(Debug, Clone)]
pub struct AppError {
    pub kind: AppErrorKind,
    pub request_id: Option<String>,
    pub context: Option<String>,
}

#[derive(Debug, Clone)]
pub enum AppErrorKind {
    Domain(DomainError),
    Infrastructure(InfrastructureError),
    External(ExternalError),
    Validation(ValidationError),
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            request_id: None,
            context: None,
        }
    }

    pub fn domain(err: DomainError) -> Self {
        Self::new(AppErrorKind::Domain(err))
    }

    pub fn validation(err: ValidationError) -> Self {
        Self::new(AppErrorKind::Validation(err))
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Infrastructure(InfrastructureError::Internal {
            message: message.into(),
        }))
    }

    pub fn payment_not_found(reference: impl Into<String>) -> Self {
        Self::domain(DomainError::PaymentNotFound {
            reference: reference.into(),
        })
    }

    pub fn invalid_field(field: &str, reason: impl Into<String>) -> Self {
        Self::validation(ValidationError::InvalidField {
            field: field.to_string(),
            reason: reason.into(),
        })
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Map error to HTTP status code
    pub fn status_code(&self) -> u16 {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::PaymentNotFound { .. } => 404,
                DomainError::ReceiptNotFound { .. } => 404,
                DomainError::CardNotFound { .. } => 404,
                DomainError::InvalidTransition { .. } => 409,
                DomainError::AmountMismatch { .. } => 400,
                DomainError::CurrencyMismatch { .. } => 400,
                DomainError::RefundWindowExpired { .. } => 422,
                DomainError::RefundNotAllowed { .. } => 422,
                DomainError::RefundAmountExceeded { .. } => 422,
                DomainError::CardNotUsable { .. } => 422,
                DomainError::DuplicatePayment { .. } => 409,
                DomainError::Forbidden { .. } => 403,
            },
            AppErrorKind::Infrastructure(_) => 500,
            AppErrorKind::External(err) => match err {
                ExternalError::Gateway { .. } => 502,
                ExternalError::Timeout { .. } => 504,
            },
            AppErrorKind::Validation(_) => 400,
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> ErrorCode {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::PaymentNotFound { .. } => ErrorCode::PaymentNotFound,
                DomainError::ReceiptNotFound { .. } => ErrorCode::ReceiptNotFound,
                DomainError::CardNotFound { .. } => ErrorCode::CardNotFound,
                DomainError::InvalidTransition { .. } => ErrorCode::InvalidStatusTransition,
                DomainError::AmountMismatch { .. } => ErrorCode::AmountMismatch,
                DomainError::CurrencyMismatch { .. } => ErrorCode::CurrencyMismatch,
                DomainError::RefundWindowExpired { .. } => ErrorCode::RefundWindowExpired,
                DomainError::RefundNotAllowed { .. } => ErrorCode::RefundNotAllowed,
                DomainError::RefundAmountExceeded { .. } => ErrorCode::RefundAmountExceeded,
                DomainError::CardNotUsable { .. } => ErrorCode::CardNotUsable,
                DomainError::DuplicatePayment { .. } => ErrorCode::DuplicatePayment,
                DomainError::Forbidden { .. } => ErrorCode::Forbidden,
            },
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { .. } => ErrorCode::DatabaseError,
                InfrastructureError::Configuration { .. } => ErrorCode::ConfigurationError,
                InfrastructureError::Internal { .. } => ErrorCode::InternalError,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::Gateway { .. } => ErrorCode::GatewayError,
                ExternalError::Timeout { .. } => ErrorCode::ExternalServiceTimeout,
            },
            AppErrorKind::Validation(_) => ErrorCode::ValidationError,
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::PaymentNotFound { reference } => {
                    format!("Payment '{}' not found", reference)
                }
                DomainError::ReceiptNotFound { reference } => {
                    format!("Receipt '{}' not found", reference)
                }
                DomainError::CardNotFound { card_id } => {
                    format!("Saved card '{}' not found", card_id)
                }
                DomainError::InvalidTransition { from, to } => {
                    format!("Payment cannot move from '{}' to '{}'", from, to)
                }
                DomainError::AmountMismatch { expected, received } => {
                    format!(
                        "Callback amount {} does not match payment amount {}",
                        received, expected
                    )
                }
                DomainError::CurrencyMismatch { expected, received } => {
                    format!(
                        "Callback currency '{}' does not match payment currency '{}'",
                        received, expected
                    )
                }
                DomainError::RefundWindowExpired {
                    completed_at,
                    window_days,
                } => {
                    format!(
                        "Refund window of {} days has passed (completed at {})",
                        window_days, completed_at
                    )
                }
                DomainError::RefundNotAllowed { reason } => {
                    format!("Refund not allowed: {}", reason)
                }
                DomainError::RefundAmountExceeded {
                    requested,
                    available,
                } => {
                    format!(
                        "Refund amount {} exceeds payment amount {}",
                        requested, available
                    )
                }
                DomainError::CardNotUsable { card_id, reason } => {
                    format!("Saved card '{}' cannot be used: {}", card_id, reason)
                }
                DomainError::DuplicatePayment { invoice_id } => {
                    format!("Payment with invoice '{}' already exists", invoice_id)
                }
                DomainError::Forbidden { reason } => format!("Forbidden: {}", reason),
            },
            AppErrorKind::Infrastructure(_) => {
                "Service temporarily unavailable. Please try again later".to_string()
            }
            AppErrorKind::External(err) => match err {
                ExternalError::Gateway {
                    provider,
                    is_retryable,
                    ..
                } => {
                    if *is_retryable {
                        format!(
                            "Payment gateway ({}) is temporarily unavailable. Please try again",
                            provider
                        )
                    } else {
                        "Payment processing failed. Please contact support".to_string()
                    }
                }
                ExternalError::Timeout {
                    service,
                    timeout_secs,
                } => {
                    format!(
                        "{} request timed out after {} seconds. Please try again",
                        service, timeout_secs
                    )
                }
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::InvalidAmount { amount, reason } => {
                    format!("Invalid amount '{}': {}", amount, reason)
                }
                ValidationError::InvalidCurrency { currency, reason } => {
                    format!("Invalid currency '{}': {}", currency, reason)
                }
                ValidationError::MissingField { field } => {
                    format!("Required field '{}' is missing", field)
                }
                ValidationError::InvalidField { field, reason } => {
                    format!("Invalid value for '{}': {}", field, reason)
                }
            },
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            AppErrorKind::Domain(_) => false,
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { is_retryable, .. } => *is_retryable,
                InfrastructureError::Configuration { .. } => false,
                InfrastructureError::Internal { .. } => false,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::Gateway { is_retryable, .. } => *is_retryable,
                ExternalError::Timeout { .. } => true,
            },
            AppErrorKind::Validation(_) => false,
        }
    }

    /// Amount or currency of a callback disagreed with the stored payment
    pub fn is_security_mismatch(&self) -> bool {
        matches!(
            self.kind,
            AppErrorKind::Domain(DomainError::AmountMismatch { .. })
                | AppErrorKind::Domain(DomainError::CurrencyMismatch { .. })
        )
    }

    pub fn is_invalid_transition(&self) -> bool {
        matches!(
            self.kind,
            AppErrorKind::Domain(DomainError::InvalidTransition { .. })
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self.kind,
            AppErrorKind::Domain(DomainError::PaymentNotFound { .. })
                | AppErrorKind::Domain(DomainError::ReceiptNotFound { .. })
                | AppErrorKind::Domain(DomainError::CardNotFound { .. })
        )
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.context {
            Some(context) => write!(f, "{}: {}", context, self.user_message()),
            None => write!(f, "{}", self.user_message()),
        }
    }
}

impl std::error::Error for AppError {}

impl From<DatabaseError> for AppError {
    fn from(err: DatabaseError) -> Self {
        let is_retryable = err.is_retryable();
        let kind = match err.kind {
            DatabaseErrorKind::Configuration { message } => {
                AppErrorKind::Infrastructure(InfrastructureError::Configuration { message })
            }
            _ => AppErrorKind::Infrastructure(InfrastructureError::Database {
                message: err.to_string(),
                is_retryable,
            }),
        };
        AppError::new(kind)
    }
}

impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        // Any gateway failure may succeed on a later attempt; business rules
        // are checked by the use cases before the gateway is called.
        AppError::new(AppErrorKind::External(ExternalError::Gateway {
            provider: err.provider().to_string(),
            message: err.to_string(),
            is_retryable: true,
        }))
    }
}

/// Result type for operations that can fail with AppError
pub type AppResult<T> = Result<T, AppError>;
