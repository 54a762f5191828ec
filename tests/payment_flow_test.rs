//! End-to-end payment flows against the in-memory repositories and the mock
//! gateway.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, Utc};
use uuid::Uuid;

use library_backend::config::PaymentsConfig;
use library_backend::database::error::{DatabaseError, DatabaseErrorKind};
use library_backend::database::memory::InMemoryPaymentRepository;
use library_backend::database::repository::{
    CallbackRetryRepository, DbResult, PaymentRepository, Repository,
};
use library_backend::database::Repositories;
use library_backend::domain::{Payment, PaymentStatus, PaymentType, PaymentUpdate};
use library_backend::error::ErrorCode;
use library_backend::payments::error::GatewayError;
use library_backend::payments::providers::mock::{GatewayOp, MockGateway};
use library_backend::payments::types::GatewayStatusResponse;
use library_backend::services::{
    InitiatePaymentRequest, InitiatePaymentResponse, PayWithSavedCardRequest,
    PaymentCallbackRequest, PaymentServices, RefundPaymentRequest, SaveCardRequest,
};

struct Harness {
    repos: Repositories,
    gateway: Arc<MockGateway>,
    services: PaymentServices,
}

fn harness_with(config: PaymentsConfig) -> Harness {
    let repos = Repositories::in_memory();
    let gateway = Arc::new(MockGateway::new());
    let services = PaymentServices::new(&repos, gateway.clone(), &config);
    Harness {
        repos,
        gateway,
        services,
    }
}

fn harness() -> Harness {
    harness_with(PaymentsConfig::default())
}

/// Payment store whose conditional updates fail like a dropped connection
/// while `offline` is set.
#[derive(Default)]
struct FlakyPayments {
    inner: InMemoryPaymentRepository,
    offline: AtomicBool,
}

impl FlakyPayments {
    fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }
}

#[async_trait]
impl Repository for FlakyPayments {
    type Entity = Payment;

    async fn find_by_id(&self, id: Uuid) -> DbResult<Option<Payment>> {
        self.inner.find_by_id(id).await
    }

    async fn list(&self, limit: i64, offset: i64) -> DbResult<Vec<Payment>> {
        self.inner.list(limit, offset).await
    }

    async fn insert(&self, entity: &Payment) -> DbResult<Payment> {
        self.inner.insert(entity).await
    }

    async fn update(&self, entity: &Payment) -> DbResult<Payment> {
        self.inner.update(entity).await
    }

    async fn delete(&self, id: Uuid) -> DbResult<bool> {
        self.inner.delete(id).await
    }
}

#[async_trait]
impl PaymentRepository for FlakyPayments {
    async fn find_by_invoice_id(&self, invoice_id: &str) -> DbResult<Option<Payment>> {
        self.inner.find_by_invoice_id(invoice_id).await
    }

    async fn find_expired(&self, now: DateTime<Utc>, limit: i64) -> DbResult<Vec<Payment>> {
        self.inner.find_expired(now, limit).await
    }

    async fn transition(
        &self,
        id: Uuid,
        expected: PaymentStatus,
        update: &PaymentUpdate,
    ) -> DbResult<Option<Payment>> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(DatabaseError::new(DatabaseErrorKind::ConnectionFailed {
                message: "connection reset by peer".to_string(),
            }));
        }
        self.inner.transition(id, expected, update).await
    }
}

fn flaky_harness() -> (Harness, Arc<FlakyPayments>) {
    let payments = Arc::new(FlakyPayments::default());
    let mut repos = Repositories::in_memory();
    repos.payments = payments.clone();
    let gateway = Arc::new(MockGateway::new());
    let config = PaymentsConfig {
        callback_retry_base_secs: 0,
        ..PaymentsConfig::default()
    };
    let services = PaymentServices::new(&repos, gateway.clone(), &config);
    (
        Harness {
            repos,
            gateway,
            services,
        },
        payments,
    )
}

async fn parked_payload(h: &Harness, payment_id: Uuid) -> Vec<u8> {
    h.repos
        .callback_retries
        .find_pending_for_payment(payment_id)
        .await
        .unwrap()
        .expect("retry row")
        .callback_data
}

async fn initiate(h: &Harness, amount: i64) -> InitiatePaymentResponse {
    h.services
        .initiate
        .execute(InitiatePaymentRequest {
            member_id: "member-42".to_string(),
            amount,
            currency: "KZT".to_string(),
            payment_type: PaymentType::Fine,
            related_entity_id: Some("fine-7".to_string()),
        })
        .await
        .expect("initiate payment")
}

fn callback(invoice_id: &str, amount: i64, status: &str) -> PaymentCallbackRequest {
    PaymentCallbackRequest {
        invoice_id: invoice_id.to_string(),
        transaction_id: format!("tx-{}", invoice_id),
        amount,
        currency: "KZT".to_string(),
        status: status.to_string(),
        card_mask: Some("440043******1234".to_string()),
        approval_code: Some("000001".to_string()),
        reason: None,
    }
}

fn raw(request: &PaymentCallbackRequest) -> Vec<u8> {
    serde_json::to_vec(request).expect("serialize callback")
}

async fn complete(h: &Harness, created: &InitiatePaymentResponse) {
    h.gateway
        .set_success(&created.invoice_id, created.amount, &created.currency)
        .await;
    let request = callback(&created.invoice_id, created.amount, "success");
    let response = h
        .services
        .callbacks
        .handle(&request, &raw(&request))
        .await
        .expect("success callback");
    assert_eq!(response.status, PaymentStatus::Completed);
}

#[tokio::test]
async fn success_callback_completes_payment() {
    let h = harness();
    let created = initiate(&h, 150_000).await;
    assert!(created.checkout.checkout_url.contains(&created.invoice_id));

    h.gateway.set_success(&created.invoice_id, 150_000, "KZT").await;
    let request = callback(&created.invoice_id, 150_000, "SUCCESS");
    let response = h
        .services
        .callbacks
        .handle_payload(&raw(&request))
        .await
        .unwrap();

    assert!(response.processed);
    assert!(!response.retry_scheduled);
    assert_eq!(response.status, PaymentStatus::Completed);

    let stored = h.repos.payments.find_by_id(created.payment_id).await.unwrap().unwrap();
    assert_eq!(stored.status, PaymentStatus::Completed);
    assert!(stored.completed_at.is_some());
    assert_eq!(stored.gateway_transaction_id.as_deref(), Some(request.transaction_id.as_str()));
    assert_eq!(stored.card_mask.as_deref(), Some("440043******1234"));
}

#[tokio::test]
async fn duplicate_callback_is_not_reprocessed() {
    let h = harness();
    let created = initiate(&h, 5_000).await;
    complete(&h, &created).await;

    let before = h.repos.payments.find_by_id(created.payment_id).await.unwrap().unwrap();
    let request = callback(&created.invoice_id, 5_000, "success");
    let response = h.services.callbacks.handle(&request, &raw(&request)).await.unwrap();

    assert!(!response.processed);
    assert_eq!(response.status, PaymentStatus::Completed);
    let after = h.repos.payments.find_by_id(created.payment_id).await.unwrap().unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn amount_mismatch_is_rejected_without_retry() {
    let h = harness();
    let created = initiate(&h, 5_000).await;

    let request = callback(&created.invoice_id, 1, "success");
    let err = h
        .services
        .callbacks
        .handle(&request, &raw(&request))
        .await
        .unwrap_err();

    assert_eq!(err.error_code(), ErrorCode::AmountMismatch);
    assert!(h
        .repos
        .callback_retries
        .find_pending_for_payment(created.payment_id)
        .await
        .unwrap()
        .is_none());
    let stored = h.repos.payments.find_by_id(created.payment_id).await.unwrap().unwrap();
    assert_eq!(stored.status, PaymentStatus::Pending);
}

#[tokio::test]
async fn unknown_invoice_is_not_found() {
    let h = harness();
    let request = callback("fine-unknown", 100, "success");
    let err = h.services.callbacks.handle(&request, &raw(&request)).await.unwrap_err();
    assert_eq!(err.status_code(), 404);
}

#[tokio::test]
async fn conflicting_callbacks_mutate_once() {
    let h = harness();
    let created = initiate(&h, 9_900).await;
    h.gateway.set_success(&created.invoice_id, 9_900, "KZT").await;

    let success = callback(&created.invoice_id, 9_900, "success");
    let failure = callback(&created.invoice_id, 9_900, "failed");
    let success_raw = raw(&success);
    let failure_raw = raw(&failure);
    let (a, b) = tokio::join!(
        h.services.callbacks.handle(&success, &success_raw),
        h.services.callbacks.handle(&failure, &failure_raw),
    );
    let a = a.unwrap();
    let b = b.unwrap();

    assert_eq!([a.processed, b.processed].iter().filter(|p| **p).count(), 1);
    let stored = h.repos.payments.find_by_id(created.payment_id).await.unwrap().unwrap();
    assert!(stored.status.is_terminal());
}

#[tokio::test]
async fn gateway_outage_defers_callback_to_retry_queue() {
    let config = PaymentsConfig {
        callback_retry_base_secs: 0,
        ..PaymentsConfig::default()
    };
    let h = harness_with(config);
    let created = initiate(&h, 20_000).await;

    h.gateway
        .fail_on(
            GatewayOp::CheckStatus,
            GatewayError::Network {
                message: "connection reset".to_string(),
            },
        )
        .await;
    let request = callback(&created.invoice_id, 20_000, "success");
    let response = h.services.callbacks.handle(&request, &raw(&request)).await.unwrap();

    assert!(response.retry_scheduled);
    assert!(!response.processed);
    assert_eq!(response.status, PaymentStatus::Pending);

    // A second delivery with different bytes refreshes the parked row
    // instead of adding another.
    let mut redelivery = request.clone();
    redelivery.transaction_id = "tx-redelivered".to_string();
    h.services
        .callbacks
        .handle(&redelivery, &raw(&redelivery))
        .await
        .unwrap();
    assert_eq!(parked_payload(&h, created.payment_id).await, raw(&redelivery));
    assert_eq!(h.repos.callback_retries.list(10, 0).await.unwrap().len(), 1);

    h.gateway.clear_failure(GatewayOp::CheckStatus).await;
    h.gateway.set_success(&created.invoice_id, 20_000, "KZT").await;

    let outcome = h.services.callback_retries.process_due(10).await.unwrap();
    assert_eq!(outcome.processed_count, 1);
    assert_eq!(outcome.success_count, 1);
    assert!(outcome.permanently_failed.is_empty());

    let stored = h.repos.payments.find_by_id(created.payment_id).await.unwrap().unwrap();
    assert_eq!(stored.status, PaymentStatus::Completed);
    assert_eq!(stored.gateway_transaction_id.as_deref(), Some("tx-redelivered"));
    assert!(h
        .repos
        .callback_retries
        .find_pending_for_payment(created.payment_id)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn parked_success_survives_later_processing_callback() {
    let (h, payments) = flaky_harness();
    let created = initiate(&h, 20_000).await;
    h.gateway.set_success(&created.invoice_id, 20_000, "KZT").await;
    payments.set_offline(true);

    let success = callback(&created.invoice_id, 20_000, "success");
    let response = h.services.callbacks.handle(&success, &raw(&success)).await.unwrap();
    assert!(response.retry_scheduled);

    let processing = callback(&created.invoice_id, 20_000, "processing");
    let response = h
        .services
        .callbacks
        .handle(&processing, &raw(&processing))
        .await
        .unwrap();
    assert!(response.retry_scheduled);

    assert_eq!(parked_payload(&h, created.payment_id).await, raw(&success));
    let parked = h
        .repos
        .callback_retries
        .find_pending_for_payment(created.payment_id)
        .await
        .unwrap()
        .expect("retry row");
    assert!(parked.last_error.is_some());
    assert_eq!(h.repos.callback_retries.list(10, 0).await.unwrap().len(), 1);

    payments.set_offline(false);
    let outcome = h.services.callback_retries.process_due(10).await.unwrap();
    assert_eq!(outcome.success_count, 1);

    let stored = h.repos.payments.find_by_id(created.payment_id).await.unwrap().unwrap();
    assert_eq!(stored.status, PaymentStatus::Completed);
}

#[tokio::test]
async fn parked_processing_is_replaced_by_later_success() {
    let (h, payments) = flaky_harness();
    let created = initiate(&h, 8_000).await;
    h.gateway.set_success(&created.invoice_id, 8_000, "KZT").await;
    payments.set_offline(true);

    let processing = callback(&created.invoice_id, 8_000, "processing");
    h.services
        .callbacks
        .handle(&processing, &raw(&processing))
        .await
        .unwrap();
    assert_eq!(parked_payload(&h, created.payment_id).await, raw(&processing));

    let success = callback(&created.invoice_id, 8_000, "success");
    h.services.callbacks.handle(&success, &raw(&success)).await.unwrap();
    assert_eq!(parked_payload(&h, created.payment_id).await, raw(&success));

    payments.set_offline(false);
    h.services.callback_retries.process_due(10).await.unwrap();

    let stored = h.repos.payments.find_by_id(created.payment_id).await.unwrap().unwrap();
    assert_eq!(stored.status, PaymentStatus::Completed);
}

#[tokio::test]
async fn late_success_after_expiry_changes_nothing() {
    let h = harness();
    let created = initiate(&h, 6_000).await;
    h.gateway.set_success(&created.invoice_id, 6_000, "KZT").await;

    let mut payment = h.repos.payments.find_by_id(created.payment_id).await.unwrap().unwrap();
    payment.expires_at = Utc::now() - Duration::minutes(1);
    h.repos.payments.update(&payment).await.unwrap();

    let outcome = h.services.expiry.execute(10).await.unwrap();
    assert_eq!(outcome.expired_count, 1);
    let expired = h.repos.payments.find_by_id(created.payment_id).await.unwrap().unwrap();

    let success = callback(&created.invoice_id, 6_000, "success");
    let response = h.services.callbacks.handle(&success, &raw(&success)).await.unwrap();
    assert!(!response.processed);
    assert!(!response.retry_scheduled);
    assert_eq!(response.status, PaymentStatus::Failed);

    let stored = h.repos.payments.find_by_id(created.payment_id).await.unwrap().unwrap();
    assert_eq!(stored, expired);
    assert_eq!(stored.error_code.as_deref(), Some("EXPIRED"));
}

#[tokio::test]
async fn expiry_racing_success_callback_applies_one_transition() {
    let h = harness();
    let created = initiate(&h, 6_500).await;
    h.gateway.set_success(&created.invoice_id, 6_500, "KZT").await;

    let mut payment = h.repos.payments.find_by_id(created.payment_id).await.unwrap().unwrap();
    payment.expires_at = Utc::now() - Duration::minutes(1);
    h.repos.payments.update(&payment).await.unwrap();

    let success = callback(&created.invoice_id, 6_500, "success");
    let body = raw(&success);
    let (expiry, delivered) = tokio::join!(
        h.services.expiry.execute(10),
        h.services.callbacks.handle(&success, &body),
    );
    let expiry = expiry.unwrap();
    let delivered = delivered.unwrap();

    assert_eq!(expiry.expired_count + usize::from(delivered.processed), 1);
    let stored = h.repos.payments.find_by_id(created.payment_id).await.unwrap().unwrap();
    if delivered.processed {
        assert_eq!(stored.status, PaymentStatus::Completed);
    } else {
        assert_eq!(stored.status, PaymentStatus::Failed);
        assert_eq!(stored.error_code.as_deref(), Some("EXPIRED"));
    }
}

#[tokio::test]
async fn refund_reported_during_confirmation_is_not_applied() {
    let h = harness();
    let created = initiate(&h, 4_200).await;
    h.gateway
        .set_status(GatewayStatusResponse {
            invoice_id: created.invoice_id.clone(),
            status: "refunded".to_string(),
            transaction_id: None,
            amount: Some(4_200),
            currency: Some("KZT".to_string()),
            card_mask: None,
            approval_code: None,
            reason: None,
            raw: None,
        })
        .await;

    let success = callback(&created.invoice_id, 4_200, "success");
    let err = h
        .services
        .callbacks
        .handle(&success, &raw(&success))
        .await
        .unwrap_err();
    assert!(!err.is_retryable());
    assert!(h
        .repos
        .callback_retries
        .find_pending_for_payment(created.payment_id)
        .await
        .unwrap()
        .is_none());
    let stored = h.repos.payments.find_by_id(created.payment_id).await.unwrap().unwrap();
    assert_eq!(stored.status, PaymentStatus::Pending);
}

#[tokio::test]
async fn stale_open_payments_expire() {
    let h = harness();
    let stale = initiate(&h, 1_000).await;
    let fresh = initiate(&h, 2_000).await;

    let mut payment = h.repos.payments.find_by_id(stale.payment_id).await.unwrap().unwrap();
    payment.expires_at = Utc::now() - Duration::minutes(1);
    h.repos.payments.update(&payment).await.unwrap();

    let outcome = h.services.expiry.execute(100).await.unwrap();
    assert_eq!(outcome.expired_count, 1);
    assert_eq!(outcome.failed_count, 0);

    let expired = h.repos.payments.find_by_id(stale.payment_id).await.unwrap().unwrap();
    assert_eq!(expired.status, PaymentStatus::Failed);
    assert_eq!(expired.error_code.as_deref(), Some("EXPIRED"));
    let untouched = h.repos.payments.find_by_id(fresh.payment_id).await.unwrap().unwrap();
    assert_eq!(untouched.status, PaymentStatus::Pending);
}

#[tokio::test]
async fn refund_respects_window() {
    let h = harness();
    let old = initiate(&h, 3_000).await;
    let recent = initiate(&h, 4_000).await;
    complete(&h, &old).await;
    complete(&h, &recent).await;

    let mut payment = h.repos.payments.find_by_id(old.payment_id).await.unwrap().unwrap();
    payment.completed_at = Some(Utc::now() - Duration::days(31));
    h.repos.payments.update(&payment).await.unwrap();

    let mut payment = h.repos.payments.find_by_id(recent.payment_id).await.unwrap().unwrap();
    payment.completed_at = Some(Utc::now() - Duration::hours(1));
    h.repos.payments.update(&payment).await.unwrap();

    let request = |payment_id| RefundPaymentRequest {
        payment_id,
        member_id: "member-42".to_string(),
        reason: "charged twice".to_string(),
        is_admin: false,
        refund_amount: None,
    };

    let err = h.services.refunds.execute(request(old.payment_id)).await.unwrap_err();
    assert_eq!(err.error_code(), ErrorCode::RefundWindowExpired);

    let refunded = h.services.refunds.execute(request(recent.payment_id)).await.unwrap();
    assert_eq!(refunded.status, PaymentStatus::Refunded);
    assert_eq!(refunded.refunded_amount, 4_000);
    assert_eq!(h.gateway.calls_for(GatewayOp::Refund).await.len(), 1);
}

#[tokio::test]
async fn receipt_generation_is_idempotent() {
    let h = harness();
    let created = initiate(&h, 7_500).await;

    let err = h.services.receipts.generate(created.payment_id).await.unwrap_err();
    assert_eq!(err.status_code(), 400);

    complete(&h, &created).await;
    let first = h.services.receipts.generate(created.payment_id).await.unwrap();
    let second = h.services.receipts.generate(created.payment_id).await.unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(first.receipt_number, second.receipt_number);
    let fetched = h.services.receipts.get_by_number(&first.receipt_number).await.unwrap();
    assert_eq!(fetched.payment_id, created.payment_id);
    let listed = h.services.receipts.list_for_member("member-42", 10, 0).await.unwrap();
    assert_eq!(listed.len(), 1);
}

#[tokio::test]
async fn saved_card_charge_completes_immediately() {
    let h = harness();
    let card = h
        .services
        .saved_cards
        .save_card(SaveCardRequest {
            member_id: "member-42".to_string(),
            card_token: "tok_abc123".to_string(),
            card_mask: "440043******1234".to_string(),
            card_type: "VISA".to_string(),
            expiry_month: 12,
            expiry_year: Utc::now().year() + 2,
            make_default: false,
        })
        .await
        .unwrap();
    assert!(card.is_default);

    let paid = h
        .services
        .saved_cards
        .pay_with_saved_card(PayWithSavedCardRequest {
            member_id: "member-42".to_string(),
            card_id: card.id,
            amount: 2_500,
            currency: "KZT".to_string(),
            payment_type: PaymentType::Subscription,
            related_entity_id: None,
        })
        .await
        .unwrap();

    assert_eq!(paid.status, PaymentStatus::Completed);
    assert!(paid.completed_at.is_some());
    assert_eq!(paid.card_mask, "440043******1234");

    let charges = h.gateway.calls_for(GatewayOp::ChargeCard).await;
    assert_eq!(charges.len(), 1);
    assert_eq!(charges[0].amount, Some(2_500));

    let stranger = h
        .services
        .saved_cards
        .pay_with_saved_card(PayWithSavedCardRequest {
            member_id: "member-99".to_string(),
            card_id: card.id,
            amount: 2_500,
            currency: "KZT".to_string(),
            payment_type: PaymentType::Subscription,
            related_entity_id: None,
        })
        .await
        .unwrap_err();
    assert_eq!(stranger.status_code(), 404);
}
