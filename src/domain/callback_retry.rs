use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallbackRetryStatus {
    Pending,
    Completed,
    Failed,
}

impl CallbackRetryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallbackRetryStatus::Pending => "pending",
            CallbackRetryStatus::Completed => "completed",
            CallbackRetryStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for CallbackRetryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CallbackRetryStatus {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(CallbackRetryStatus::Pending),
            "completed" => Ok(CallbackRetryStatus::Completed),
            "failed" => Ok(CallbackRetryStatus::Failed),
            other => Err(AppError::invalid_field(
                "callback_retry.status",
                format!("unknown retry status '{}'", other),
            )),
        }
    }
}

/// Backoff and give-up limits for replaying callbacks
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: i32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Give up once this much time has passed since the first failure
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::seconds(60),
            max_delay: Duration::seconds(3600),
            timeout: Duration::hours(24),
        }
    }
}

impl RetryPolicy {
    /// `min(base * 2^retry_count, max_delay)`
    pub fn delay_for(&self, retry_count: i32) -> Duration {
        let exponent = retry_count.clamp(0, 30) as u32;
        let factor = 1_i64 << exponent;
        let base_secs = self.base_delay.num_seconds().max(0);
        let delay_secs = base_secs.saturating_mul(factor);
        Duration::seconds(delay_secs.min(self.max_delay.num_seconds()))
    }
}

/// A callback that could not be reconciled synchronously, kept for replay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackRetry {
    pub id: Uuid,
    pub payment_id: Uuid,
    /// Raw callback body exactly as received
    pub callback_data: Vec<u8>,
    pub retry_count: i32,
    pub max_retries: i32,
    pub last_error: Option<String>,
    pub next_retry_at: DateTime<Utc>,
    pub status: CallbackRetryStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CallbackRetry {
    pub fn schedule(
        payment_id: Uuid,
        callback_data: Vec<u8>,
        error: impl Into<String>,
        policy: &RetryPolicy,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            payment_id,
            callback_data,
            retry_count: 0,
            max_retries: policy.max_retries,
            last_error: Some(error.into()),
            next_retry_at: now + policy.delay_for(0),
            status: CallbackRetryStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == CallbackRetryStatus::Pending
            && self.next_retry_at <= now
            && self.retry_count < self.max_retries
    }

    pub fn mark_completed(&mut self, now: DateTime<Utc>) {
        self.status = CallbackRetryStatus::Completed;
        self.last_error = None;
        self.updated_at = now;
    }

    pub fn mark_failed(&mut self, error: impl Into<String>, now: DateTime<Utc>) {
        self.status = CallbackRetryStatus::Failed;
        self.last_error = Some(error.into());
        self.updated_at = now;
    }

    /// Count a failed attempt. Returns true when the retry has been given up.
    pub fn record_failure(
        &mut self,
        error: impl Into<String>,
        policy: &RetryPolicy,
        now: DateTime<Utc>,
    ) -> bool {
        self.retry_count += 1;
        self.last_error = Some(error.into());
        self.updated_at = now;

        if self.retry_count >= self.max_retries || now - self.created_at > policy.timeout {
            self.status = CallbackRetryStatus::Failed;
            return true;
        }

        self.next_retry_at = now + policy.delay_for(self.retry_count);
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::seconds(60));
        assert_eq!(policy.delay_for(1), Duration::seconds(120));
        assert_eq!(policy.delay_for(3), Duration::seconds(480));
        assert_eq!(policy.delay_for(6), Duration::seconds(3600));
        assert_eq!(policy.delay_for(i32::MAX), Duration::seconds(3600));
    }

    #[test]
    fn first_attempt_is_one_base_delay_away() {
        let now = Utc::now();
        let retry = CallbackRetry::schedule(Uuid::new_v4(), b"{}".to_vec(), "db down", &RetryPolicy::default(), now);
        assert_eq!(retry.next_retry_at, now + Duration::seconds(60));
        assert!(!retry.is_due(now));
        assert!(retry.is_due(now + Duration::seconds(60)));
    }

    #[test]
    fn gives_up_after_max_retries() {
        let policy = RetryPolicy::default();
        let now = Utc::now();
        let mut retry = CallbackRetry::schedule(Uuid::new_v4(), vec![], "x", &policy, now);

        for attempt in 1..policy.max_retries {
            assert!(!retry.record_failure("still failing", &policy, now));
            assert_eq!(retry.retry_count, attempt);
            assert_eq!(retry.next_retry_at, now + policy.delay_for(attempt));
        }
        assert!(retry.record_failure("still failing", &policy, now));
        assert_eq!(retry.status, CallbackRetryStatus::Failed);
        assert!(!retry.is_due(now + Duration::days(1)));
    }

    #[test]
    fn gives_up_after_timeout_ceiling() {
        let policy = RetryPolicy::default();
        let created = Utc::now() - Duration::hours(25);
        let mut retry = CallbackRetry::schedule(Uuid::new_v4(), vec![], "x", &policy, created);

        assert!(retry.record_failure("late", &policy, Utc::now()));
        assert_eq!(retry.retry_count, 1);
        assert_eq!(retry.status, CallbackRetryStatus::Failed);
    }
}
