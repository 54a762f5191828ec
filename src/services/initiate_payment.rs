use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::database::repository::PaymentRepository;
use crate::domain::rules::{self, generate_invoice_id};
use crate::domain::{Payment, PaymentMethod, PaymentStatus, PaymentType, PaymentUpdate};
use crate::error::{AppError, AppResult, DomainError};
use crate::payments::provider::PaymentGateway;
use crate::payments::types::CheckoutReference;

#[derive(Debug, Clone, Deserialize)]
pub struct InitiatePaymentRequest {
    pub member_id: String,
    /// Minor currency units
    pub amount: i64,
    pub currency: String,
    pub payment_type: PaymentType,
    #[serde(default)]
    pub related_entity_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InitiatePaymentResponse {
    pub payment_id: Uuid,
    pub invoice_id: String,
    pub amount: i64,
    pub currency: String,
    pub formatted_amount: String,
    pub expires_at: DateTime<Utc>,
    pub checkout: CheckoutReference,
}

pub struct InitiatePaymentService {
    payments: Arc<dyn PaymentRepository>,
    gateway: Arc<dyn PaymentGateway>,
    payment_ttl: Duration,
    checkout_base_url: String,
}

impl InitiatePaymentService {
    pub fn new(
        payments: Arc<dyn PaymentRepository>,
        gateway: Arc<dyn PaymentGateway>,
        payment_ttl: Duration,
        checkout_base_url: impl Into<String>,
    ) -> Self {
        Self {
            payments,
            gateway,
            payment_ttl,
            checkout_base_url: checkout_base_url.into(),
        }
    }

    pub async fn execute(&self, request: InitiatePaymentRequest) -> AppResult<InitiatePaymentResponse> {
        let now = Utc::now();
        let payment = Payment::new_pending(
            generate_invoice_id(request.payment_type, now),
            request.member_id,
            request.amount,
            request.currency.trim().to_ascii_uppercase(),
            PaymentMethod::Card,
            request.payment_type,
            request.related_entity_id,
            now,
            now + self.payment_ttl,
        );
        rules::validate(&payment)?;

        let payment = self.payments.insert(&payment).await.map_err(|e| {
            if e.is_unique_violation() {
                AppError::domain(DomainError::DuplicatePayment {
                    invoice_id: payment.invoice_id.clone(),
                })
            } else {
                AppError::from(e).with_context("create payment")
            }
        })?;

        info!(
            payment_id = %payment.id,
            invoice_id = %payment.invoice_id,
            member_id = %payment.member_id,
            amount = payment.amount,
            currency = %payment.currency,
            payment_type = %payment.payment_type,
            "payment created"
        );

        let token = match self.gateway.get_auth_token().await {
            Ok(token) => token,
            Err(err) => {
                warn!(
                    payment_id = %payment.id,
                    provider = self.gateway.name(),
                    error = %err,
                    "gateway token request failed, marking payment failed"
                );
                self.mark_unavailable(&payment, &err.to_string()).await;
                return Err(AppError::from(err).with_context("initiate payment"));
            }
        };

        Ok(InitiatePaymentResponse {
            payment_id: payment.id,
            formatted_amount: rules::format_amount(payment.amount, &payment.currency),
            checkout: CheckoutReference {
                checkout_url: format!(
                    "{}?invoice_id={}",
                    self.checkout_base_url.trim_end_matches('/'),
                    payment.invoice_id
                ),
                auth_token: token.access_token,
                token_expires_at: token.expires_at,
            },
            invoice_id: payment.invoice_id,
            amount: payment.amount,
            currency: payment.currency,
            expires_at: payment.expires_at,
        })
    }

    async fn mark_unavailable(&self, payment: &Payment, reason: &str) {
        let update = PaymentUpdate::new(PaymentStatus::Failed, Utc::now())
            .with_error("GATEWAY_UNAVAILABLE", reason);
        match self
            .payments
            .transition(payment.id, PaymentStatus::Pending, &update)
            .await
        {
            Ok(Some(_)) => {}
            Ok(None) => warn!(payment_id = %payment.id, "payment changed before it could be failed"),
            Err(e) => error!(payment_id = %payment.id, error = %e, "failed to mark payment failed"),
        }
    }
}
