use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::database::repository::{DbResult, PaymentRepository, Repository};
use crate::domain::{Payment, PaymentStatus, PaymentUpdate};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

const COLUMNS: &str = "id, invoice_id, member_id, amount, currency, status, payment_method, \
     payment_type, related_entity_id, gateway_transaction_id, gateway_response, card_mask, \
     approval_code, error_code, error_message, refund_amount, refund_reason, created_at, \
     updated_at, completed_at, expires_at";

/// Raw `payments` row; nullable columns stay `Option` only here
#[derive(Debug, Clone, FromRow)]
pub struct PaymentRow {
    pub id: Uuid,
    pub invoice_id: String,
    pub member_id: String,
    pub amount: i64,
    pub currency: String,
    pub status: String,
    pub payment_method: String,
    pub payment_type: String,
    pub related_entity_id: Option<String>,
    pub gateway_transaction_id: Option<String>,
    pub gateway_response: Option<JsonValue>,
    pub card_mask: Option<String>,
    pub approval_code: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub refund_amount: Option<i64>,
    pub refund_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = DatabaseError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        Ok(Payment {
            id: row.id,
            status: row.status.parse().map_err(|e: crate::error::AppError| {
                DatabaseError::decode(format!("payments.status: {}", e))
            })?,
            payment_method: row.payment_method.parse().map_err(|e: crate::error::AppError| {
                DatabaseError::decode(format!("payments.payment_method: {}", e))
            })?,
            payment_type: row.payment_type.parse().map_err(|e: crate::error::AppError| {
                DatabaseError::decode(format!("payments.payment_type: {}", e))
            })?,
            invoice_id: row.invoice_id,
            member_id: row.member_id,
            amount: row.amount,
            currency: row.currency,
            related_entity_id: row.related_entity_id,
            gateway_transaction_id: row.gateway_transaction_id,
            gateway_response: row.gateway_response,
            card_mask: row.card_mask,
            approval_code: row.approval_code,
            error_code: row.error_code,
            error_message: row.error_message,
            refund_amount: row.refund_amount,
            refund_reason: row.refund_reason,
            created_at: row.created_at,
            updated_at: row.updated_at,
            completed_at: row.completed_at,
            expires_at: row.expires_at,
        })
    }
}

fn to_domain(rows: Vec<PaymentRow>) -> DbResult<Vec<Payment>> {
    rows.into_iter().map(Payment::try_from).collect()
}

/// Postgres-backed payment storage
pub struct PgPaymentRepository {
    pool: PgPool,
}

impl PgPaymentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Repository for PgPaymentRepository {
    type Entity = Payment;

    async fn find_by_id(&self, id: Uuid) -> DbResult<Option<Payment>> {
        sqlx::query_as::<_, PaymentRow>(&format!("SELECT {} FROM payments WHERE id = $1", COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .map(Payment::try_from)
            .transpose()
    }

    async fn list(&self, limit: i64, offset: i64) -> DbResult<Vec<Payment>> {
        let rows = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {} FROM payments ORDER BY created_at DESC LIMIT $1 OFFSET $2",
            COLUMNS
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        to_domain(rows)
    }

    async fn insert(&self, entity: &Payment) -> DbResult<Payment> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "INSERT INTO payments ({cols})
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, $21)
             RETURNING {cols}",
            cols = COLUMNS
        ))
        .bind(entity.id)
        .bind(&entity.invoice_id)
        .bind(&entity.member_id)
        .bind(entity.amount)
        .bind(&entity.currency)
        .bind(entity.status.as_str())
        .bind(entity.payment_method.as_str())
        .bind(entity.payment_type.as_str())
        .bind(&entity.related_entity_id)
        .bind(&entity.gateway_transaction_id)
        .bind(&entity.gateway_response)
        .bind(&entity.card_mask)
        .bind(&entity.approval_code)
        .bind(&entity.error_code)
        .bind(&entity.error_message)
        .bind(entity.refund_amount)
        .bind(&entity.refund_reason)
        .bind(entity.created_at)
        .bind(entity.updated_at)
        .bind(entity.completed_at)
        .bind(entity.expires_at)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        row.try_into()
    }

    async fn update(&self, entity: &Payment) -> DbResult<Payment> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "UPDATE payments
             SET status = $2, gateway_transaction_id = $3, gateway_response = $4, card_mask = $5,
                 approval_code = $6, error_code = $7, error_message = $8, refund_amount = $9,
                 refund_reason = $10, completed_at = $11, updated_at = $12
             WHERE id = $1
             RETURNING {}",
            COLUMNS
        ))
        .bind(entity.id)
        .bind(entity.status.as_str())
        .bind(&entity.gateway_transaction_id)
        .bind(&entity.gateway_response)
        .bind(&entity.card_mask)
        .bind(&entity.approval_code)
        .bind(&entity.error_code)
        .bind(&entity.error_message)
        .bind(entity.refund_amount)
        .bind(&entity.refund_reason)
        .bind(entity.completed_at)
        .bind(entity.updated_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .ok_or_else(|| DatabaseError::not_found("Payment", entity.id))?;
        row.try_into()
    }

    async fn delete(&self, _id: Uuid) -> DbResult<bool> {
        Err(DatabaseError::new(DatabaseErrorKind::ConstraintViolation {
            message: "payments are retained for audit and cannot be deleted".to_string(),
        }))
    }
}

#[async_trait]
impl PaymentRepository for PgPaymentRepository {
    async fn find_by_invoice_id(&self, invoice_id: &str) -> DbResult<Option<Payment>> {
        sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {} FROM payments WHERE invoice_id = $1",
            COLUMNS
        ))
        .bind(invoice_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .map(Payment::try_from)
        .transpose()
    }

    async fn find_expired(&self, now: DateTime<Utc>, limit: i64) -> DbResult<Vec<Payment>> {
        let rows = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {} FROM payments
             WHERE status IN ('pending', 'processing') AND expires_at < $1
             ORDER BY expires_at ASC
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

    async fn transition(
        &self,
        id: Uuid,
        expected: PaymentStatus,
        update: &PaymentUpdate,
    ) -> DbResult<Option<Payment>> {
        sqlx::query_as::<_, PaymentRow>(&format!(
            "UPDATE payments
             SET status = $3,
                 gateway_transaction_id = COALESCE($4, gateway_transaction_id),
                 gateway_response = COALESCE($5, gateway_response),
                 card_mask = COALESCE($6, card_mask),
                 approval_code = COALESCE($7, approval_code),
                 error_code = COALESCE($8, error_code),
                 error_message = COALESCE($9, error_message),
                 refund_amount = COALESCE($10, refund_amount),
                 refund_reason = COALESCE($11, refund_reason),
                 completed_at = COALESCE($12, completed_at),
                 updated_at = $13
             WHERE id = $1 AND status = $2
             RETURNING {}",
            COLUMNS
        ))
        .bind(id)
        .bind(expected.as_str())
        .bind(update.status.as_str())
        .bind(&update.gateway_transaction_id)
        .bind(&update.gateway_response)
        .bind(&update.card_mask)
        .bind(&update.approval_code)
        .bind(&update.error_code)
        .bind(&update.error_message)
        .bind(update.refund_amount)
        .bind(&update.refund_reason)
        .bind(update.completed_at)
        .bind(update.updated_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .map(Payment::try_from)
        .transpose()
    }
}
