use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use crate::database::repository::PaymentRepository;
use crate::domain::rules::{can_refund, validate_status_transition};
use crate::domain::{PaymentStatus, PaymentUpdate};
use crate::error::{AppError, AppResult, DomainError};
use crate::payments::provider::PaymentGateway;

#[derive(Debug, Clone, Deserialize)]
pub struct RefundPaymentRequest {
    pub payment_id: Uuid,
    /// Caller identity, checked against the payment owner
    pub member_id: String,
    pub reason: String,
    #[serde(default)]
    pub is_admin: bool,
    /// Partial refund in minor units; the full amount when absent
    #[serde(default)]
    pub refund_amount: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefundPaymentResponse {
    pub payment_id: Uuid,
    pub refunded_amount: i64,
    pub currency: String,
    pub status: PaymentStatus,
}

pub struct RefundPaymentService {
    payments: Arc<dyn PaymentRepository>,
    gateway: Arc<dyn PaymentGateway>,
    refund_window: Duration,
}

impl RefundPaymentService {
    pub fn new(
        payments: Arc<dyn PaymentRepository>,
        gateway: Arc<dyn PaymentGateway>,
        refund_window: Duration,
    ) -> Self {
        Self {
            payments,
            gateway,
            refund_window,
        }
    }

    pub async fn execute(&self, request: RefundPaymentRequest) -> AppResult<RefundPaymentResponse> {
        let now = Utc::now();
        let payment = self
            .payments
            .find_by_id(request.payment_id)
            .await
            .map_err(|e| AppError::from(e).with_context("load payment for refund"))?
            .ok_or_else(|| AppError::payment_not_found(request.payment_id.to_string()))?;

        if !request.is_admin && payment.member_id != request.member_id {
            return Err(AppError::domain(DomainError::Forbidden {
                reason: "payment belongs to another member".to_string(),
            }));
        }

        can_refund(&payment, self.refund_window, now)?;
        validate_status_transition(payment.status, PaymentStatus::Refunded)?;

        let amount = match request.refund_amount {
            Some(amount) if amount <= 0 => {
                return Err(AppError::invalid_field("refund_amount", "must be positive"));
            }
            Some(amount) if amount > payment.amount => {
                return Err(AppError::domain(DomainError::RefundAmountExceeded {
                    requested: amount,
                    available: payment.amount,
                }));
            }
            Some(amount) => amount,
            None => payment.amount,
        };

        let transaction_id = payment.gateway_transaction_id.as_deref().ok_or_else(|| {
            AppError::domain(DomainError::RefundNotAllowed {
                reason: "payment has no gateway transaction".to_string(),
            })
        })?;

        // The invoice id doubles as the gateway's idempotency key.
        self.gateway
            .refund_payment(transaction_id, request.refund_amount, &payment.invoice_id)
            .await
            .map_err(|e| AppError::from(e).with_context("gateway refund"))?;

        let update = PaymentUpdate::new(PaymentStatus::Refunded, now).with_refund(amount, request.reason.clone());
        let refunded = self
            .payments
            .transition(payment.id, PaymentStatus::Completed, &update)
            .await
            .map_err(|e| AppError::from(e).with_context("persist refund"))?;

        let refunded = match refunded {
            Some(p) => p,
            None => {
                error!(
                    alert = "refund_state_conflict",
                    payment_id = %payment.id,
                    invoice_id = %payment.invoice_id,
                    "gateway accepted refund but payment changed concurrently"
                );
                return Err(AppError::domain(DomainError::RefundNotAllowed {
                    reason: "payment changed while the refund was in flight".to_string(),
                }));
            }
        };

        info!(
            payment_id = %refunded.id,
            invoice_id = %refunded.invoice_id,
            amount = amount,
            partial = amount < refunded.amount,
            admin = request.is_admin,
            "payment refunded"
        );

        Ok(RefundPaymentResponse {
            payment_id: refunded.id,
            refunded_amount: amount,
            currency: refunded.currency,
            status: refunded.status,
        })
    }
}
