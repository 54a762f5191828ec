use crate::database::error::DatabaseError;
use crate::database::repository::{CallbackRetryRepository, DbResult, Repository};
use crate::domain::CallbackRetry;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

const COLUMNS: &str = "id, payment_id, callback_data, retry_count, max_retries, last_error, \
     next_retry_at, status, created_at, updated_at";

#[derive(Debug, Clone, FromRow)]
pub struct CallbackRetryRow {
    pub id: Uuid,
    pub payment_id: Uuid,
    pub callback_data: Vec<u8>,
    pub retry_count: i32,
    pub max_retries: i32,
    pub last_error: Option<String>,
    pub next_retry_at: DateTime<Utc>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<CallbackRetryRow> for CallbackRetry {
    type Error = DatabaseError;

    fn try_from(row: CallbackRetryRow) -> Result<Self, Self::Error> {
        Ok(CallbackRetry {
            status: row.status.parse().map_err(|e: crate::error::AppError| {
                DatabaseError::decode(format!("callback_retries.status: {}", e))
            })?,
            id: row.id,
            payment_id: row.payment_id,
            callback_data: row.callback_data,
            retry_count: row.retry_count,
            max_retries: row.max_retries,
            last_error: row.last_error,
            next_retry_at: row.next_retry_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn to_domain(rows: Vec<CallbackRetryRow>) -> DbResult<Vec<CallbackRetry>> {
    rows.into_iter().map(CallbackRetry::try_from).collect()
}

pub struct PgCallbackRetryRepository {
    pool: PgPool,
}

impl PgCallbackRetryRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Repository for PgCallbackRetryRepository {
    type Entity = CallbackRetry;

    async fn find_by_id(&self, id: Uuid) -> DbResult<Option<CallbackRetry>> {
        sqlx::query_as::<_, CallbackRetryRow>(&format!(
            "SELECT {} FROM callback_retries WHERE id = $1",
            COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .map(CallbackRetry::try_from)
        .transpose()
    }

    async fn list(&self, limit: i64, offset: i64) -> DbResult<Vec<CallbackRetry>> {
        let rows = sqlx::query_as::<_, CallbackRetryRow>(&format!(
            "SELECT {} FROM callback_retries ORDER BY created_at ASC LIMIT $1 OFFSET $2",
            COLUMNS
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        to_domain(rows)
    }

    async fn insert(&self, entity: &CallbackRetry) -> DbResult<CallbackRetry> {
        sqlx::query_as::<_, CallbackRetryRow>(&format!(
            "INSERT INTO callback_retries ({cols})
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
             RETURNING {cols}",
            cols = COLUMNS
        ))
        .bind(entity.id)
        .bind(entity.payment_id)
        .bind(&entity.callback_data)
        .bind(entity.retry_count)
        .bind(entity.max_retries)
        .bind(&entity.last_error)
        .bind(entity.next_retry_at)
        .bind(entity.status.as_str())
        .bind(entity.created_at)
        .bind(entity.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .try_into()
    }

    async fn update(&self, entity: &CallbackRetry) -> DbResult<CallbackRetry> {
        sqlx::query_as::<_, CallbackRetryRow>(&format!(
            "UPDATE callback_retries
             SET callback_data = $2, retry_count = $3, last_error = $4, next_retry_at = $5,
                 status = $6, updated_at = $7
             WHERE id = $1
             RETURNING {}",
            COLUMNS
        ))
        .bind(entity.id)
        .bind(&entity.callback_data)
        .bind(entity.retry_count)
        .bind(&entity.last_error)
        .bind(entity.next_retry_at)
        .bind(entity.status.as_str())
        .bind(entity.updated_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .ok_or_else(|| DatabaseError::not_found("CallbackRetry", entity.id))?
        .try_into()
    }

    async fn delete(&self, id: Uuid) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM callback_retries WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl CallbackRetryRepository for PgCallbackRetryRepository {
    async fn find_due(&self, now: DateTime<Utc>, limit: i64) -> DbResult<Vec<CallbackRetry>> {
        let rows = sqlx::query_as::<_, CallbackRetryRow>(&format!(
            "SELECT {} FROM callback_retries
             WHERE status = 'pending' AND next_retry_at <= $1 AND retry_count < max_retries
             ORDER BY created_at ASC
             LIMIT $2",
            COLUMNS
        ))
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        to_domain(rows)
    }

    async fn list_failed(&self, limit: i64) -> DbResult<Vec<CallbackRetry>> {
        let rows = sqlx::query_as::<_, CallbackRetryRow>(&format!(
            "SELECT {} FROM callback_retries
             WHERE status = 'failed'
             ORDER BY updated_at DESC
             LIMIT $1",
            COLUMNS
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        to_domain(rows)
    }

    async fn find_pending_for_payment(&self, payment_id: Uuid) -> DbResult<Option<CallbackRetry>> {
        sqlx::query_as::<_, CallbackRetryRow>(&format!(
            "SELECT {} FROM callback_retries
             WHERE payment_id = $1 AND status = 'pending'
             ORDER BY created_at ASC
             LIMIT 1",
            COLUMNS
        ))
        .bind(payment_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .map(CallbackRetry::try_from)
        .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::payment_repository::PgPaymentRepository;
    use crate::domain::{Payment, PaymentMethod, PaymentType, RetryPolicy};

    #[tokio::test]
    #[ignore] // Requires database running
    async fn test_update_persists_callback_payload() {
        let url = std::env::var("DATABASE_URL").unwrap();
        let pool = crate::database::init_pool(&url, None).await.unwrap();
        let payments = PgPaymentRepository::new(pool.clone());
        let retries = PgCallbackRetryRepository::new(pool);
        let now = Utc::now();

        let payment = Payment::new_pending(
            crate::domain::rules::generate_invoice_id(PaymentType::Fine, now),
            "m1".to_string(),
            5000,
            "KZT".to_string(),
            PaymentMethod::Card,
            PaymentType::Fine,
            None,
            now,
            now + chrono::Duration::minutes(30),
        );
        let payment = payments.insert(&payment).await.unwrap();

        let mut retry = CallbackRetry::schedule(
            payment.id,
            br#"{"status":"processing"}"#.to_vec(),
            "timeout",
            &RetryPolicy::default(),
            now,
        );
        retries.insert(&retry).await.unwrap();

        retry.callback_data = br#"{"status":"success"}"#.to_vec();
        retries.update(&retry).await.unwrap();

        let stored = retries.find_by_id(retry.id).await.unwrap().unwrap();
        assert_eq!(stored.callback_data, retry.callback_data);
    }
}
