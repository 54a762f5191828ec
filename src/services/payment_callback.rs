//! Gateway callback reconciliation.
//!
//! A callback is untrusted and may arrive twice, late or out of order. It is
//! reconciled against the stored payment with a conditional update, so two
//! writers racing on the same row can never both apply a transition. Transient
//! failures are parked in a `CallbackRetry` row with the raw payload instead of
//! failing the webhook.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::PaymentsConfig;
use crate::database::repository::{CallbackRetryRepository, PaymentRepository};
use crate::domain::rules::{transition_path, validate_status_transition};
use crate::domain::{CallbackRetry, Payment, PaymentStatus, PaymentUpdate, RetryPolicy};
use crate::error::{AppError, AppErrorKind, AppResult, DomainError, ExternalError, InfrastructureError};
use crate::payments::provider::PaymentGateway;

/// Attempts at the conditional update before giving the callback to the retry queue
const MAX_CONFLICT_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentCallbackRequest {
    pub invoice_id: String,
    pub transaction_id: String,
    /// Minor currency units
    pub amount: i64,
    pub currency: String,
    pub status: String,
    #[serde(default)]
    pub card_mask: Option<String>,
    #[serde(default)]
    pub approval_code: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentCallbackResponse {
    pub payment_id: Uuid,
    pub status: PaymentStatus,
    /// False when the callback changed nothing (duplicate or already final)
    pub processed: bool,
    pub retry_scheduled: bool,
}

/// Gateway status vocabulary to domain status.
pub fn map_gateway_status(status: &str) -> AppResult<PaymentStatus> {
    match status.trim().to_ascii_lowercase().as_str() {
        "success" => Ok(PaymentStatus::Completed),
        "processing" => Ok(PaymentStatus::Processing),
        "failed" | "declined" => Ok(PaymentStatus::Failed),
        "cancelled" => Ok(PaymentStatus::Cancelled),
        other => Err(AppError::invalid_field(
            "status",
            format!("unknown gateway status '{}'", other),
        )),
    }
}

#[derive(Debug, Clone)]
pub struct CallbackSettings {
    pub verify_with_gateway: bool,
    pub gateway_timeout: Duration,
    pub retry_policy: RetryPolicy,
}

impl From<&PaymentsConfig> for CallbackSettings {
    fn from(config: &PaymentsConfig) -> Self {
        Self {
            verify_with_gateway: config.callback_verify_with_gateway,
            gateway_timeout: config.gateway_timeout(),
            retry_policy: config.retry_policy(),
        }
    }
}

/// Result of reconciling one callback against the stored payment
#[derive(Debug, Clone)]
pub struct Reconciled {
    pub payment: Payment,
    pub processed: bool,
}

pub struct PaymentCallbackService {
    payments: Arc<dyn PaymentRepository>,
    retries: Arc<dyn CallbackRetryRepository>,
    gateway: Arc<dyn PaymentGateway>,
    settings: CallbackSettings,
}

impl PaymentCallbackService {
    pub fn new(
        payments: Arc<dyn PaymentRepository>,
        retries: Arc<dyn CallbackRetryRepository>,
        gateway: Arc<dyn PaymentGateway>,
        settings: CallbackSettings,
    ) -> Self {
        Self {
            payments,
            retries,
            gateway,
            settings,
        }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.settings.retry_policy
    }

    /// Parse a raw webhook body and handle it. The bytes are kept verbatim for
    /// replay if reconciliation has to be deferred.
    pub async fn handle_payload(&self, raw: &[u8]) -> AppResult<PaymentCallbackResponse> {
        let request = parse_payload(raw)?;
        self.handle(&request, raw).await
    }

    pub async fn handle(
        &self,
        request: &PaymentCallbackRequest,
        raw: &[u8],
    ) -> AppResult<PaymentCallbackResponse> {
        let payment = self.load_by_invoice(&request.invoice_id).await?;
        let payment_id = payment.id;
        let current_status = payment.status;

        match self.reconcile_payment(payment, request).await {
            Ok(reconciled) => Ok(PaymentCallbackResponse {
                payment_id,
                status: reconciled.payment.status,
                processed: reconciled.processed,
                retry_scheduled: false,
            }),
            Err(err) if err.is_retryable() => {
                warn!(
                    payment_id = %payment_id,
                    invoice_id = %request.invoice_id,
                    error = %err,
                    "callback reconciliation deferred to retry queue"
                );
                self.schedule_retry(payment_id, raw, request, &err).await?;
                Ok(PaymentCallbackResponse {
                    payment_id,
                    status: current_status,
                    processed: false,
                    retry_scheduled: true,
                })
            }
            Err(err) => {
                log_rejection(payment_id, &request.invoice_id, &err);
                Err(err)
            }
        }
    }

    /// Replay a stored callback. Used by the retry processor; never schedules
    /// another retry itself.
    pub async fn replay(&self, retry: &CallbackRetry) -> AppResult<Reconciled> {
        let request = parse_payload(&retry.callback_data)?;
        let payment = self.load_by_invoice(&request.invoice_id).await?;
        if payment.id != retry.payment_id {
            return Err(AppError::invalid_field(
                "invoice_id",
                format!(
                    "stored callback references invoice {} which belongs to another payment",
                    request.invoice_id
                ),
            ));
        }
        let result = self.reconcile_payment(payment, &request).await;
        if let Err(err) = &result {
            if !err.is_retryable() {
                log_rejection(retry.payment_id, &request.invoice_id, err);
            }
        }
        result
    }

    async fn load_by_invoice(&self, invoice_id: &str) -> AppResult<Payment> {
        self.payments
            .find_by_invoice_id(invoice_id)
            .await
            .map_err(|e| AppError::from(e).with_context("load payment for callback"))?
            .ok_or_else(|| AppError::payment_not_found(invoice_id))
    }

    async fn reconcile_payment(
        &self,
        mut payment: Payment,
        request: &PaymentCallbackRequest,
    ) -> AppResult<Reconciled> {
        let mut confirmed = false;

        for _ in 0..MAX_CONFLICT_ATTEMPTS {
            if payment.status.is_terminal() {
                info!(
                    payment_id = %payment.id,
                    status = %payment.status,
                    "payment already final, callback not reprocessed"
                );
                return Ok(Reconciled {
                    payment,
                    processed: false,
                });
            }

            check_matches(&payment, request.amount, &request.currency)?;

            let target = map_gateway_status(&request.status)?;
            if target == payment.status {
                debug!(payment_id = %payment.id, status = %target, "callback repeats current status");
                return Ok(Reconciled {
                    payment,
                    processed: false,
                });
            }

            let path = transition_path(payment.status, target)?;
            let mut from = payment.status;
            for step in &path {
                validate_status_transition(from, *step)?;
                from = *step;
            }

            if target == PaymentStatus::Completed && self.settings.verify_with_gateway && !confirmed {
                self.confirm_with_gateway(&payment).await?;
                confirmed = true;
            }

            let update = build_update(target, request);
            let expected = payment.status;
            match self
                .payments
                .transition(payment.id, expected, &update)
                .await
                .map_err(|e| AppError::from(e).with_context("persist callback status"))?
            {
                Some(updated) => {
                    info!(
                        payment_id = %updated.id,
                        invoice_id = %updated.invoice_id,
                        from = %expected,
                        to = %updated.status,
                        "payment status updated from callback"
                    );
                    return Ok(Reconciled {
                        payment: updated,
                        processed: true,
                    });
                }
                None => {
                    debug!(payment_id = %payment.id, "payment changed concurrently, reloading");
                    payment = self
                        .payments
                        .find_by_id(payment.id)
                        .await
                        .map_err(|e| AppError::from(e).with_context("reload payment"))?
                        .ok_or_else(|| AppError::payment_not_found(payment.id.to_string()))?;
                }
            }
        }

        Err(AppError::new(AppErrorKind::Infrastructure(
            InfrastructureError::Database {
                message: format!(
                    "payment {} kept changing during callback reconciliation",
                    payment.id
                ),
                is_retryable: true,
            },
        )))
    }

    async fn confirm_with_gateway(&self, payment: &Payment) -> AppResult<()> {
        let timeout = self.settings.gateway_timeout;
        let status = tokio::time::timeout(timeout, self.gateway.check_payment_status(&payment.invoice_id))
            .await
            .map_err(|_| {
                AppError::new(AppErrorKind::External(ExternalError::Timeout {
                    service: "Payment gateway".to_string(),
                    timeout_secs: timeout.as_secs(),
                }))
            })??;

        let reported = status.status.trim().to_ascii_lowercase();
        match map_gateway_status(&reported) {
            Ok(PaymentStatus::Completed) => {}
            // Refunded at the gateway without passing through this service
            Err(_) if reported == "refunded" => {
                error!(
                    alert = "callback_refunded_at_gateway",
                    payment_id = %payment.id,
                    invoice_id = %payment.invoice_id,
                    "gateway reports a refund for an unsettled payment"
                );
                return Err(self.unconfirmed(payment, &status.status, false));
            }
            _ => return Err(self.unconfirmed(payment, &status.status, true)),
        }
        if let Some(amount) = status.amount {
            check_matches(
                payment,
                amount,
                status.currency.as_deref().unwrap_or(&payment.currency),
            )?;
        }
        Ok(())
    }

    fn unconfirmed(&self, payment: &Payment, reported: &str, is_retryable: bool) -> AppError {
        AppError::new(AppErrorKind::External(ExternalError::Gateway {
            provider: self.gateway.name().to_string(),
            message: format!(
                "gateway reports '{}' for invoice {}",
                reported, payment.invoice_id
            ),
            is_retryable,
        }))
    }

    async fn schedule_retry(
        &self,
        payment_id: Uuid,
        raw: &[u8],
        request: &PaymentCallbackRequest,
        err: &AppError,
    ) -> AppResult<()> {
        let data = if raw.is_empty() {
            serde_json::to_vec(request).map_err(|e| AppError::internal(e.to_string()))?
        } else {
            raw.to_vec()
        };

        let existing = self
            .retries
            .find_pending_for_payment(payment_id)
            .await
            .map_err(|e| AppError::from(e).with_context("look up pending callback retry"))?;

        let retry = match existing {
            Some(retry) => retry,
            None => {
                let retry = CallbackRetry::schedule(
                    payment_id,
                    data.clone(),
                    err.to_string(),
                    &self.settings.retry_policy,
                    Utc::now(),
                );
                match self.retries.insert(&retry).await {
                    Ok(_) => {
                        info!(
                            retry_id = %retry.id,
                            payment_id = %payment_id,
                            next_retry_at = %retry.next_retry_at,
                            "callback retry scheduled"
                        );
                        return Ok(());
                    }
                    // Another delivery parked its callback first
                    Err(e) if e.is_unique_violation() => self
                        .retries
                        .find_pending_for_payment(payment_id)
                        .await
                        .map_err(|e| AppError::from(e).with_context("look up pending callback retry"))?
                        .ok_or_else(|| {
                            AppError::from(e).with_context("create callback retry")
                        })?,
                    Err(e) => {
                        return Err(AppError::from(e).with_context("create callback retry"));
                    }
                }
            }
        };

        self.refresh_parked(retry, data, request, err).await
    }

    /// Fold a new transient failure into the pending retry. The parked payload
    /// is only replaced when `supersedes_parked` allows it.
    async fn refresh_parked(
        &self,
        mut retry: CallbackRetry,
        data: Vec<u8>,
        request: &PaymentCallbackRequest,
        err: &AppError,
    ) -> AppResult<()> {
        let replace = supersedes_parked(&retry.callback_data, request);
        if replace {
            retry.callback_data = data;
        } else {
            warn!(
                retry_id = %retry.id,
                payment_id = %retry.payment_id,
                incoming_status = %request.status,
                "pending callback retry holds a further-settled payload, keeping it"
            );
        }
        retry.last_error = Some(err.to_string());
        retry.updated_at = Utc::now();
        self.retries
            .update(&retry)
            .await
            .map_err(|e| AppError::from(e).with_context("update callback retry"))?;
        info!(
            retry_id = %retry.id,
            payment_id = %retry.payment_id,
            payload_replaced = replace,
            "pending callback retry refreshed"
        );
        Ok(())
    }
}

/// How far a gateway status moves a payment along the table.
fn settlement_rank(status: &str) -> u8 {
    match map_gateway_status(status) {
        Ok(PaymentStatus::Pending) | Err(_) => 0,
        Ok(PaymentStatus::Processing) => 1,
        Ok(_) => 2,
    }
}

/// True when `incoming` should replace the parked payload. A final status is
/// never displaced by a progress update or by a different final status. The
/// first final status parked wins, as it would have on the row itself.
fn supersedes_parked(parked: &[u8], incoming: &PaymentCallbackRequest) -> bool {
    let parked = match parse_payload(parked) {
        Ok(parked) => parked,
        Err(_) => return true,
    };
    let (parked_rank, incoming_rank) = (
        settlement_rank(&parked.status),
        settlement_rank(&incoming.status),
    );
    if incoming_rank != parked_rank {
        return incoming_rank > parked_rank;
    }
    incoming_rank < 2
        || map_gateway_status(&parked.status).ok() == map_gateway_status(&incoming.status).ok()
}

fn parse_payload(raw: &[u8]) -> AppResult<PaymentCallbackRequest> {
    serde_json::from_slice(raw)
        .map_err(|e| AppError::invalid_field("body", format!("malformed callback payload: {}", e)))
}

fn check_matches(payment: &Payment, amount: i64, currency: &str) -> AppResult<()> {
    if amount != payment.amount {
        return Err(AppError::domain(DomainError::AmountMismatch {
            expected: payment.amount,
            received: amount,
        }));
    }
    if !currency.eq_ignore_ascii_case(&payment.currency) {
        return Err(AppError::domain(DomainError::CurrencyMismatch {
            expected: payment.currency.clone(),
            received: currency.to_string(),
        }));
    }
    Ok(())
}

fn build_update(target: PaymentStatus, request: &PaymentCallbackRequest) -> PaymentUpdate {
    let transaction_id = Some(request.transaction_id.trim().to_string()).filter(|v| !v.is_empty());
    let update = PaymentUpdate::new(target, Utc::now()).with_gateway_details(
        transaction_id,
        request.card_mask.clone(),
        request.approval_code.clone(),
        serde_json::to_value(request).ok(),
    );
    if target == PaymentStatus::Failed {
        let code = if request.status.eq_ignore_ascii_case("declined") {
            "DECLINED"
        } else {
            "GATEWAY_FAILED"
        };
        let message = request
            .reason
            .clone()
            .unwrap_or_else(|| format!("gateway reported '{}'", request.status));
        return update.with_error(code, message);
    }
    update
}

fn log_rejection(payment_id: Uuid, invoice_id: &str, err: &AppError) {
    if err.is_security_mismatch() {
        error!(
            alert = "callback_security_mismatch",
            payment_id = %payment_id,
            invoice_id = %invoice_id,
            error = %err,
            "callback rejected: amount or currency does not match payment"
        );
    } else if err.is_invalid_transition() {
        error!(
            alert = "callback_invalid_transition",
            payment_id = %payment_id,
            invoice_id = %invoice_id,
            error = %err,
            "callback rejected: status change not allowed"
        );
    } else {
        warn!(payment_id = %payment_id, invoice_id = %invoice_id, error = %err, "callback rejected");
    }
}
