use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::database::repository::{MemberRepository, PaymentRepository, ReceiptRepository};
use crate::domain::{PaymentStatus, Receipt, ReceiptDetailsUpdate};
use crate::error::{AppError, AppResult, DomainError};

/// Receipts for settled payments. Generation is idempotent per payment.
pub struct ReceiptService {
    receipts: Arc<dyn ReceiptRepository>,
    payments: Arc<dyn PaymentRepository>,
    members: Arc<dyn MemberRepository>,
}

impl ReceiptService {
    pub fn new(
        receipts: Arc<dyn ReceiptRepository>,
        payments: Arc<dyn PaymentRepository>,
        members: Arc<dyn MemberRepository>,
    ) -> Self {
        Self {
            receipts,
            payments,
            members,
        }
    }

    pub async fn generate(&self, payment_id: Uuid) -> AppResult<Receipt> {
        if let Some(existing) = self.find_for_payment(payment_id).await? {
            return Ok(existing);
        }

        let payment = self
            .payments
            .find_by_id(payment_id)
            .await
            .map_err(|e| AppError::from(e).with_context("load payment for receipt"))?
            .ok_or_else(|| AppError::payment_not_found(payment_id.to_string()))?;

        if !matches!(payment.status, PaymentStatus::Completed | PaymentStatus::Refunded) {
            return Err(AppError::invalid_field(
                "payment_id",
                format!("payment is {}, receipts are issued for completed payments", payment.status),
            ));
        }

        // Member details are cosmetic; a lookup failure must not block the receipt.
        let member = match self.members.find_by_id(&payment.member_id).await {
            Ok(member) => member,
            Err(e) => {
                warn!(member_id = %payment.member_id, error = %e, "member lookup failed for receipt");
                None
            }
        };
        let (name, email) = member
            .map(|m| (Some(m.full_name), m.email))
            .unwrap_or((None, None));

        let receipt = Receipt::for_payment(&payment, name, email, Utc::now());
        match self.receipts.insert(&receipt).await {
            Ok(receipt) => {
                info!(
                    receipt_number = %receipt.receipt_number,
                    payment_id = %payment.id,
                    "receipt issued"
                );
                Ok(receipt)
            }
            Err(e) if e.is_unique_violation() => self
                .find_for_payment(payment_id)
                .await?
                .ok_or_else(|| AppError::from(e).with_context("issue receipt")),
            Err(e) => Err(AppError::from(e).with_context("issue receipt")),
        }
    }

    pub async fn get_by_number(&self, receipt_number: &str) -> AppResult<Receipt> {
        self.receipts
            .find_by_number(receipt_number)
            .await
            .map_err(|e| AppError::from(e).with_context("load receipt"))?
            .ok_or_else(|| {
                AppError::domain(DomainError::ReceiptNotFound {
                    reference: receipt_number.to_string(),
                })
            })
    }

    pub async fn list_for_member(&self, member_id: &str, limit: i64, offset: i64) -> AppResult<Vec<Receipt>> {
        self.receipts
            .list_for_member(member_id, limit.clamp(1, 100), offset.max(0))
            .await
            .map_err(|e| AppError::from(e).with_context("list receipts"))
    }

    pub async fn update_details(&self, receipt_id: Uuid, update: &ReceiptDetailsUpdate) -> AppResult<Receipt> {
        self.receipts
            .update_details(receipt_id, update, Utc::now())
            .await
            .map_err(|e| AppError::from(e).with_context("update receipt"))?
            .ok_or_else(|| {
                AppError::domain(DomainError::ReceiptNotFound {
                    reference: receipt_id.to_string(),
                })
            })
    }

    async fn find_for_payment(&self, payment_id: Uuid) -> AppResult<Option<Receipt>> {
        self.receipts
            .find_by_payment_id(payment_id)
            .await
            .map_err(|e| AppError::from(e).with_context("load receipt"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::{InMemoryMemberRepository, InMemoryPaymentRepository, InMemoryReceiptRepository};
    use crate::database::repository::{MemberSummary, Repository};
    use crate::domain::{Payment, PaymentMethod, PaymentType, ReceiptStatus};
    use chrono::Duration;

    async fn setup(status: PaymentStatus) -> (ReceiptService, Payment) {
        let payments = Arc::new(InMemoryPaymentRepository::new());
        let members = Arc::new(InMemoryMemberRepository::new());
        members
            .upsert(MemberSummary {
                id: "member-1".to_string(),
                full_name: "Ada Lovelace".to_string(),
                email: Some("ada@example.com".to_string()),
            })
            .await;

        let now = Utc::now();
        let mut payment = Payment::new_pending(
            "subscription-1-r".to_string(),
            "member-1".to_string(),
            120_000,
            "KZT".to_string(),
            PaymentMethod::Card,
            PaymentType::Subscription,
            None,
            now,
            now + Duration::minutes(30),
        );
        payment.status = status;
        if status == PaymentStatus::Completed {
            payment.completed_at = Some(now);
        }
        let payment = payments.insert(&payment).await.unwrap();

        let service = ReceiptService::new(Arc::new(InMemoryReceiptRepository::new()), payments, members);
        (service, payment)
    }

    #[tokio::test]
    async fn generation_is_idempotent() {
        let (service, payment) = setup(PaymentStatus::Completed).await;
        let first = service.generate(payment.id).await.unwrap();
        let second = service.generate(payment.id).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.receipt_number, Receipt::number_for(&payment));
        assert_eq!(first.member_name.as_deref(), Some("Ada Lovelace"));
        assert_eq!(first.formatted_amount, "1200.00 KZT");
        assert_eq!(first.status, ReceiptStatus::Issued);

        let found = service.get_by_number(&first.receipt_number).await.unwrap();
        assert_eq!(found.id, first.id);
        assert_eq!(service.list_for_member("member-1", 10, 0).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn pending_payment_has_no_receipt() {
        let (service, payment) = setup(PaymentStatus::Pending).await;
        let err = service.generate(payment.id).await.unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[tokio::test]
    async fn details_update_and_missing_receipt() {
        let (service, payment) = setup(PaymentStatus::Completed).await;
        let receipt = service.generate(payment.id).await.unwrap();

        let updated = service
            .update_details(
                receipt.id,
                &ReceiptDetailsUpdate {
                    notes: Some("paid at front desk".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.notes.as_deref(), Some("paid at front desk"));
        assert_eq!(updated.description, receipt.description);

        let err = service.get_by_number("RCP-19700101-00000000").await.unwrap_err();
        assert!(err.is_not_found());
    }
}
