//! In-memory gateway used by the test suite and by `SKIP_EXTERNALS` runs.

use crate::payments::error::{GatewayError, GatewayResult};
use crate::payments::provider::PaymentGateway;
use crate::payments::types::{AuthToken, CardChargeRequest, CardChargeResponse, GatewayStatusResponse};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Gateway operation names used for call recording and failure injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GatewayOp {
    AuthToken,
    CheckStatus,
    Refund,
    Cancel,
    ChargeCard,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub op: GatewayOp,
    pub reference: String,
    pub amount: Option<i64>,
}

#[derive(Default)]
struct MockState {
    statuses: HashMap<String, GatewayStatusResponse>,
    failures: HashMap<GatewayOp, GatewayError>,
    charge_status: Option<String>,
    calls: Vec<RecordedCall>,
}

#[derive(Default)]
pub struct MockGateway {
    state: Mutex<MockState>,
    token_requests: AtomicU64,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// What `check_payment_status` reports for this invoice.
    pub async fn set_status(&self, response: GatewayStatusResponse) {
        let mut state = self.state.lock().await;
        state.statuses.insert(response.invoice_id.clone(), response);
    }

    /// Convenience for a settled transaction with the given amount.
    pub async fn set_success(&self, invoice_id: &str, amount: i64, currency: &str) {
        self.set_status(GatewayStatusResponse {
            invoice_id: invoice_id.to_string(),
            status: "success".to_string(),
            transaction_id: Some(format!("tx-{}", invoice_id)),
            amount: Some(amount),
            currency: Some(currency.to_string()),
            card_mask: Some("440043******1234".to_string()),
            approval_code: Some("000001".to_string()),
            reason: None,
            raw: None,
        })
        .await;
    }

    /// Every call to `op` fails with `error` until cleared.
    pub async fn fail_on(&self, op: GatewayOp, error: GatewayError) {
        self.state.lock().await.failures.insert(op, error);
    }

    pub async fn clear_failure(&self, op: GatewayOp) {
        self.state.lock().await.failures.remove(&op);
    }

    /// Status returned by `charge_card`, `success` unless overridden.
    pub async fn set_charge_status(&self, status: &str) {
        self.state.lock().await.charge_status = Some(status.to_string());
    }

    pub async fn calls(&self) -> Vec<RecordedCall> {
        self.state.lock().await.calls.clone()
    }

    pub async fn calls_for(&self, op: GatewayOp) -> Vec<RecordedCall> {
        self.calls()
            .await
            .into_iter()
            .filter(|call| call.op == op)
            .collect()
    }

    pub fn token_requests(&self) -> u64 {
        self.token_requests.load(Ordering::SeqCst)
    }

    async fn record(&self, op: GatewayOp, reference: &str, amount: Option<i64>) -> GatewayResult<()> {
        let mut state = self.state.lock().await;
        state.calls.push(RecordedCall {
            op,
            reference: reference.to_string(),
            amount,
        });
        match state.failures.get(&op) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn get_auth_token(&self) -> GatewayResult<AuthToken> {
        self.token_requests.fetch_add(1, Ordering::SeqCst);
        self.record(GatewayOp::AuthToken, "", None).await?;
        Ok(AuthToken {
            access_token: format!("mock-{}", Uuid::new_v4().simple()),
            token_type: "Bearer".to_string(),
            expires_at: Utc::now() + Duration::minutes(20),
        })
    }

    async fn check_payment_status(&self, invoice_id: &str) -> GatewayResult<GatewayStatusResponse> {
        self.record(GatewayOp::CheckStatus, invoice_id, None).await?;
        let state = self.state.lock().await;
        Ok(state
            .statuses
            .get(invoice_id)
            .cloned()
            .unwrap_or_else(|| GatewayStatusResponse {
                invoice_id: invoice_id.to_string(),
                status: "processing".to_string(),
                transaction_id: None,
                amount: None,
                currency: None,
                card_mask: None,
                approval_code: None,
                reason: None,
                raw: None,
            }))
    }

    async fn refund_payment(
        &self,
        transaction_id: &str,
        amount: Option<i64>,
        _external_id: &str,
    ) -> GatewayResult<()> {
        self.record(GatewayOp::Refund, transaction_id, amount).await
    }

    async fn cancel_payment(&self, transaction_id: &str) -> GatewayResult<()> {
        self.record(GatewayOp::Cancel, transaction_id, None).await
    }

    async fn charge_card(&self, request: CardChargeRequest) -> GatewayResult<CardChargeResponse> {
        self.record(GatewayOp::ChargeCard, &request.invoice_id, Some(request.amount))
            .await?;
        let status = self
            .state
            .lock()
            .await
            .charge_status
            .clone()
            .unwrap_or_else(|| "success".to_string());
        Ok(CardChargeResponse {
            transaction_id: format!("tx-{}", request.invoice_id),
            status,
            card_mask: Some("440043******1234".to_string()),
            approval_code: Some("000002".to_string()),
            reason: None,
            raw: None,
        })
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_invoice_reports_processing() {
        let gateway = MockGateway::new();
        let status = gateway.check_payment_status("fine-1-x").await.unwrap();
        assert_eq!(status.status, "processing");
    }

    #[tokio::test]
    async fn injected_failures_apply_until_cleared() {
        let gateway = MockGateway::new();
        gateway
            .fail_on(
                GatewayOp::Refund,
                GatewayError::Network {
                    message: "down".to_string(),
                },
            )
            .await;

        assert!(gateway.refund_payment("tx-1", Some(100), "inv").await.is_err());
        gateway.clear_failure(GatewayOp::Refund).await;
        assert!(gateway.refund_payment("tx-1", None, "inv").await.is_ok());

        let calls = gateway.calls_for(GatewayOp::Refund).await;
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].amount, Some(100));
    }
}
