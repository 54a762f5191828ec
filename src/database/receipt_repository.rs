use crate::database::error::DatabaseError;
use crate::database::repository::{DbResult, ReceiptRepository, Repository};
use crate::domain::{Receipt, ReceiptDetailsUpdate};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

const COLUMNS: &str = "id, payment_id, receipt_number, member_id, member_name, member_email, \
     amount, currency, formatted_amount, payment_type, card_mask, status, description, notes, \
     issued_at, created_at, updated_at";

#[derive(Debug, Clone, FromRow)]
pub struct ReceiptRow {
    pub id: Uuid,
    pub payment_id: Uuid,
    pub receipt_number: String,
    pub member_id: String,
    pub member_name: Option<String>,
    pub member_email: Option<String>,
    pub amount: i64,
    pub currency: String,
    pub formatted_amount: String,
    pub payment_type: String,
    pub card_mask: Option<String>,
    pub status: String,
    pub description: Option<String>,
    pub notes: Option<String>,
    pub issued_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<ReceiptRow> for Receipt {
    type Error = DatabaseError;

    fn try_from(row: ReceiptRow) -> Result<Self, Self::Error> {
        Ok(Receipt {
            payment_type: row.payment_type.parse().map_err(|e: crate::error::AppError| {
                DatabaseError::decode(format!("receipts.payment_type: {}", e))
            })?,
            status: row.status.parse().map_err(|e: crate::error::AppError| {
                DatabaseError::decode(format!("receipts.status: {}", e))
            })?,
            id: row.id,
            payment_id: row.payment_id,
            receipt_number: row.receipt_number,
            member_id: row.member_id,
            member_name: row.member_name,
            member_email: row.member_email,
            amount: row.amount,
            currency: row.currency,
            formatted_amount: row.formatted_amount,
            card_mask: row.card_mask,
            description: row.description,
            notes: row.notes,
            issued_at: row.issued_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

pub struct PgReceiptRepository {
    pool: PgPool,
}

impl PgReceiptRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_one_by(&self, column: &str, value: &str) -> DbResult<Option<Receipt>> {
        sqlx::query_as::<_, ReceiptRow>(&format!(
            "SELECT {} FROM receipts WHERE {} = $1",
            COLUMNS, column
        ))
        .bind(value)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .map(Receipt::try_from)
        .transpose()
    }
}

#[async_trait]
impl Repository for PgReceiptRepository {
    type Entity = Receipt;

    async fn find_by_id(&self, id: Uuid) -> DbResult<Option<Receipt>> {
        sqlx::query_as::<_, ReceiptRow>(&format!("SELECT {} FROM receipts WHERE id = $1", COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .map(Receipt::try_from)
            .transpose()
    }

    async fn list(&self, limit: i64, offset: i64) -> DbResult<Vec<Receipt>> {
        sqlx::query_as::<_, ReceiptRow>(&format!(
            "SELECT {} FROM receipts ORDER BY issued_at DESC LIMIT $1 OFFSET $2",
            COLUMNS
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .into_iter()
        .map(Receipt::try_from)
        .collect()
    }

    async fn insert(&self, entity: &Receipt) -> DbResult<Receipt> {
        sqlx::query_as::<_, ReceiptRow>(&format!(
            "INSERT INTO receipts ({cols})
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
             RETURNING {cols}",
            cols = COLUMNS
        ))
        .bind(entity.id)
        .bind(entity.payment_id)
        .bind(&entity.receipt_number)
        .bind(&entity.member_id)
        .bind(&entity.member_name)
        .bind(&entity.member_email)
        .bind(entity.amount)
        .bind(&entity.currency)
        .bind(&entity.formatted_amount)
        .bind(entity.payment_type.as_str())
        .bind(&entity.card_mask)
        .bind(entity.status.as_str())
        .bind(&entity.description)
        .bind(&entity.notes)
        .bind(entity.issued_at)
        .bind(entity.created_at)
        .bind(entity.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .try_into()
    }

    /// Receipts are immutable apart from status, description and notes.
    async fn update(&self, entity: &Receipt) -> DbResult<Receipt> {
        let update = ReceiptDetailsUpdate {
            status: Some(entity.status),
            description: entity.description.clone(),
            notes: entity.notes.clone(),
        };
        self.update_details(entity.id, &update, entity.updated_at)
            .await?
            .ok_or_else(|| DatabaseError::not_found("Receipt", entity.id))
    }

    async fn delete(&self, id: Uuid) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM receipts WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl ReceiptRepository for PgReceiptRepository {
    async fn find_by_payment_id(&self, payment_id: Uuid) -> DbResult<Option<Receipt>> {
        sqlx::query_as::<_, ReceiptRow>(&format!(
            "SELECT {} FROM receipts WHERE payment_id = $1",
            COLUMNS
        ))
        .bind(payment_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .map(Receipt::try_from)
        .transpose()
    }

    async fn find_by_number(&self, receipt_number: &str) -> DbResult<Option<Receipt>> {
        self.fetch_one_by("receipt_number", receipt_number).await
    }

    async fn list_for_member(&self, member_id: &str, limit: i64, offset: i64) -> DbResult<Vec<Receipt>> {
        sqlx::query_as::<_, ReceiptRow>(&format!(
            "SELECT {} FROM receipts WHERE member_id = $1
             ORDER BY issued_at DESC LIMIT $2 OFFSET $3",
            COLUMNS
        ))
        .bind(member_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .into_iter()
        .map(Receipt::try_from)
        .collect()
    }

    async fn update_details(
        &self,
        id: Uuid,
        update: &ReceiptDetailsUpdate,
        now: DateTime<Utc>,
    ) -> DbResult<Option<Receipt>> {
        sqlx::query_as::<_, ReceiptRow>(&format!(
            "UPDATE receipts
             SET status = COALESCE($2, status),
                 description = COALESCE($3, description),
                 notes = COALESCE($4, notes),
                 updated_at = $5
             WHERE id = $1
             RETURNING {}",
            COLUMNS
        ))
        .bind(id)
        .bind(update.status.map(|s| s.as_str()))
        .bind(&update.description)
        .bind(&update.notes)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .map(Receipt::try_from)
        .transpose()
    }
}
