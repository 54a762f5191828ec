use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::database::repository::PaymentRepository;
use crate::domain::rules::validate_status_transition;
use crate::domain::{PaymentStatus, PaymentUpdate};
use crate::error::{AppError, AppResult, DomainError};
use crate::payments::provider::PaymentGateway;

#[derive(Debug, Clone, Deserialize)]
pub struct CancelPaymentRequest {
    pub payment_id: Uuid,
    pub member_id: String,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CancelPaymentResponse {
    pub payment_id: Uuid,
    pub status: PaymentStatus,
}

pub struct CancelPaymentService {
    payments: Arc<dyn PaymentRepository>,
    gateway: Arc<dyn PaymentGateway>,
}

impl CancelPaymentService {
    pub fn new(payments: Arc<dyn PaymentRepository>, gateway: Arc<dyn PaymentGateway>) -> Self {
        Self { payments, gateway }
    }

    pub async fn execute(&self, request: CancelPaymentRequest) -> AppResult<CancelPaymentResponse> {
        let payment = self
            .payments
            .find_by_id(request.payment_id)
            .await
            .map_err(|e| AppError::from(e).with_context("load payment for cancel"))?
            .ok_or_else(|| AppError::payment_not_found(request.payment_id.to_string()))?;

        if !request.is_admin && payment.member_id != request.member_id {
            return Err(AppError::domain(DomainError::Forbidden {
                reason: "payment belongs to another member".to_string(),
            }));
        }
        validate_status_transition(payment.status, PaymentStatus::Cancelled)?;

        if let Some(transaction_id) = payment.gateway_transaction_id.as_deref() {
            self.gateway
                .cancel_payment(transaction_id)
                .await
                .map_err(|e| AppError::from(e).with_context("gateway cancel"))?;
        }

        let code = if request.is_admin {
            "CANCELLED_BY_ADMIN"
        } else {
            "CANCELLED_BY_MEMBER"
        };
        let reason = request
            .reason
            .unwrap_or_else(|| "cancelled on request".to_string());
        let update = PaymentUpdate::new(PaymentStatus::Cancelled, Utc::now()).with_error(code, reason);

        let cancelled = self
            .payments
            .transition(payment.id, payment.status, &update)
            .await
            .map_err(|e| AppError::from(e).with_context("persist cancel"))?;

        match cancelled {
            Some(cancelled) => {
                info!(payment_id = %cancelled.id, invoice_id = %cancelled.invoice_id, "payment cancelled");
                Ok(CancelPaymentResponse {
                    payment_id: cancelled.id,
                    status: cancelled.status,
                })
            }
            None => {
                let current = self
                    .payments
                    .find_by_id(payment.id)
                    .await
                    .map_err(AppError::from)?
                    .map(|p| p.status)
                    .unwrap_or(payment.status);
                Err(AppError::domain(DomainError::InvalidTransition {
                    from: current.to_string(),
                    to: PaymentStatus::Cancelled.to_string(),
                }))
            }
        }
    }
}
