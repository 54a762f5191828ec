use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::database::repository::PaymentRepository;
use crate::domain::rules::{is_expired, validate_status_transition};
use crate::domain::{PaymentStatus, PaymentUpdate};
use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExpirePaymentsResponse {
    pub expired_count: usize,
    pub failed_count: usize,
    pub errors: Vec<String>,
}

/// Fails payments that stayed open past `expires_at`.
pub struct ExpirePaymentsService {
    payments: Arc<dyn PaymentRepository>,
}

impl ExpirePaymentsService {
    pub fn new(payments: Arc<dyn PaymentRepository>) -> Self {
        Self { payments }
    }

    pub async fn execute(&self, batch_size: i64) -> AppResult<ExpirePaymentsResponse> {
        let now = Utc::now();
        let candidates = self
            .payments
            .find_expired(now, batch_size)
            .await
            .map_err(|e| AppError::from(e).with_context("find expired payments"))?;

        let mut response = ExpirePaymentsResponse::default();

        for payment in candidates {
            if !is_expired(&payment, now) {
                continue;
            }
            if let Err(e) = validate_status_transition(payment.status, PaymentStatus::Failed) {
                response.failed_count += 1;
                response.errors.push(format!("{}: {}", payment.invoice_id, e));
                continue;
            }

            let update = PaymentUpdate::new(PaymentStatus::Failed, now)
                .with_error("EXPIRED", "payment expired before completion");

            match self.payments.transition(payment.id, payment.status, &update).await {
                Ok(Some(_)) => {
                    response.expired_count += 1;
                    debug!(payment_id = %payment.id, invoice_id = %payment.invoice_id, "payment expired");
                }
                Ok(None) => {
                    debug!(payment_id = %payment.id, "payment changed concurrently, not expired");
                }
                Err(e) => {
                    warn!(payment_id = %payment.id, error = %e, "failed to expire payment");
                    response.failed_count += 1;
                    response.errors.push(format!("{}: {}", payment.invoice_id, e));
                }
            }
        }

        if response.expired_count > 0 || response.failed_count > 0 {
            info!(
                expired = response.expired_count,
                failed = response.failed_count,
                "payment expiry sweep finished"
            );
        }

        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::InMemoryPaymentRepository;
    use crate::database::repository::Repository;
    use crate::domain::{Payment, PaymentMethod, PaymentType};
    use chrono::Duration;

    async fn seed(repo: &InMemoryPaymentRepository, invoice: &str, expires_in: Duration, status: PaymentStatus) -> Payment {
        let now = Utc::now();
        let mut payment = Payment::new_pending(
            invoice.to_string(),
            "member-1".to_string(),
            1500,
            "KZT".to_string(),
            PaymentMethod::Card,
            PaymentType::Fine,
            None,
            now - Duration::hours(1),
            now + expires_in,
        );
        payment.status = status;
        repo.insert(&payment).await.unwrap()
    }

    #[tokio::test]
    async fn expires_only_overdue_open_payments() {
        let repo = Arc::new(InMemoryPaymentRepository::new());
        let overdue = seed(&repo, "fine-1-a", Duration::minutes(-5), PaymentStatus::Pending).await;
        let processing = seed(&repo, "fine-1-b", Duration::minutes(-1), PaymentStatus::Processing).await;
        let fresh = seed(&repo, "fine-1-c", Duration::minutes(10), PaymentStatus::Pending).await;

        let response = ExpirePaymentsService::new(repo.clone()).execute(100).await.unwrap();
        assert_eq!(response.expired_count, 2);
        assert_eq!(response.failed_count, 0);

        for id in [overdue.id, processing.id] {
            let p = repo.find_by_id(id).await.unwrap().unwrap();
            assert_eq!(p.status, PaymentStatus::Failed);
            assert_eq!(p.error_code.as_deref(), Some("EXPIRED"));
        }
        let p = repo.find_by_id(fresh.id).await.unwrap().unwrap();
        assert_eq!(p.status, PaymentStatus::Pending);

        let again = ExpirePaymentsService::new(repo).execute(100).await.unwrap();
        assert_eq!(again.expired_count, 0);
    }
}
