use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::database::repository::CallbackRetryRepository;
use crate::domain::CallbackRetry;
use crate::error::{AppError, AppResult};
use crate::services::payment_callback::PaymentCallbackService;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProcessCallbackRetriesResponse {
    pub processed_count: usize,
    pub success_count: usize,
    pub failed_count: usize,
    pub permanently_failed: Vec<Uuid>,
    pub errors: Vec<String>,
}

/// Replays parked callbacks with exponential backoff.
pub struct CallbackRetryService {
    retries: Arc<dyn CallbackRetryRepository>,
    callbacks: Arc<PaymentCallbackService>,
}

impl CallbackRetryService {
    pub fn new(retries: Arc<dyn CallbackRetryRepository>, callbacks: Arc<PaymentCallbackService>) -> Self {
        Self { retries, callbacks }
    }

    pub async fn process_due(&self, batch_size: i64) -> AppResult<ProcessCallbackRetriesResponse> {
        let now = Utc::now();
        let due = self
            .retries
            .find_due(now, batch_size)
            .await
            .map_err(|e| AppError::from(e).with_context("find due callback retries"))?;

        let mut response = ProcessCallbackRetriesResponse::default();

        for mut retry in due {
            response.processed_count += 1;

            match self.callbacks.replay(&retry).await {
                Ok(reconciled) => {
                    retry.mark_completed(Utc::now());
                    response.success_count += 1;
                    info!(
                        retry_id = %retry.id,
                        payment_id = %retry.payment_id,
                        status = %reconciled.payment.status,
                        processed = reconciled.processed,
                        "callback retry succeeded"
                    );
                }
                Err(err) => {
                    response.failed_count += 1;
                    response.errors.push(format!("retry {}: {}", retry.id, err));
                    if self.record_failure(&mut retry, &err) {
                        response.permanently_failed.push(retry.id);
                    }
                }
            }

            if let Err(e) = self.retries.update(&retry).await {
                warn!(retry_id = %retry.id, error = %e, "failed to persist callback retry state");
                response.errors.push(format!("retry {}: {}", retry.id, e));
            }
        }

        Ok(response)
    }

    pub async fn list_failed(&self, limit: i64) -> AppResult<Vec<CallbackRetry>> {
        self.retries
            .list_failed(limit)
            .await
            .map_err(|e| AppError::from(e).with_context("list failed callback retries"))
    }

    /// Returns true when the retry is given up for good.
    fn record_failure(&self, retry: &mut CallbackRetry, err: &AppError) -> bool {
        let now = Utc::now();
        let gave_up = if err.is_retryable() {
            retry.record_failure(err.to_string(), self.callbacks.retry_policy(), now)
        } else {
            retry.mark_failed(err.to_string(), now);
            true
        };

        if gave_up {
            error!(
                alert = "callback_retry_exhausted",
                retry_id = %retry.id,
                payment_id = %retry.payment_id,
                retry_count = retry.retry_count,
                error = %err,
                "callback retry permanently failed, manual reconciliation required"
            );
        } else {
            warn!(
                retry_id = %retry.id,
                payment_id = %retry.payment_id,
                retry_count = retry.retry_count,
                next_retry_at = %retry.next_retry_at,
                error = %err,
                "callback retry failed, rescheduled"
            );
        }
        gave_up
    }
}
