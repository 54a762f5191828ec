use crate::database::error::DatabaseError;
use crate::database::repository::{DbResult, Repository, SavedCardRepository};
use crate::domain::SavedCard;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

const COLUMNS: &str = "id, member_id, card_token, card_mask, card_type, expiry_month, \
     expiry_year, is_default, is_active, created_at, updated_at, last_used_at";

#[derive(Debug, Clone, FromRow)]
pub struct SavedCardRow {
    pub id: Uuid,
    pub member_id: String,
    pub card_token: String,
    pub card_mask: String,
    pub card_type: String,
    pub expiry_month: i32,
    pub expiry_year: i32,
    pub is_default: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl TryFrom<SavedCardRow> for SavedCard {
    type Error = DatabaseError;

    fn try_from(row: SavedCardRow) -> Result<Self, Self::Error> {
        let expiry_month = u32::try_from(row.expiry_month)
            .ok()
            .filter(|m| (1..=12).contains(m))
            .ok_or_else(|| {
                DatabaseError::decode(format!("saved_cards.expiry_month: {}", row.expiry_month))
            })?;
        Ok(SavedCard {
            id: row.id,
            member_id: row.member_id,
            card_token: row.card_token,
            card_mask: row.card_mask,
            card_type: row.card_type,
            expiry_month,
            expiry_year: row.expiry_year,
            is_default: row.is_default,
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
            last_used_at: row.last_used_at,
        })
    }
}

fn to_domain(rows: Vec<SavedCardRow>) -> DbResult<Vec<SavedCard>> {
    rows.into_iter().map(SavedCard::try_from).collect()
}

pub struct PgSavedCardRepository {
    pool: PgPool,
}

impl PgSavedCardRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Repository for PgSavedCardRepository {
    type Entity = SavedCard;

    async fn find_by_id(&self, id: Uuid) -> DbResult<Option<SavedCard>> {
        sqlx::query_as::<_, SavedCardRow>(&format!(
            "SELECT {} FROM saved_cards WHERE id = $1",
            COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .map(SavedCard::try_from)
        .transpose()
    }

    async fn list(&self, limit: i64, offset: i64) -> DbResult<Vec<SavedCard>> {
        let rows = sqlx::query_as::<_, SavedCardRow>(&format!(
            "SELECT {} FROM saved_cards WHERE is_active = true
             ORDER BY created_at DESC LIMIT $1 OFFSET $2",
            COLUMNS
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        to_domain(rows)
    }

    async fn insert(&self, entity: &SavedCard) -> DbResult<SavedCard> {
        sqlx::query_as::<_, SavedCardRow>(&format!(
            "INSERT INTO saved_cards ({cols})
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
             RETURNING {cols}",
            cols = COLUMNS
        ))
        .bind(entity.id)
        .bind(&entity.member_id)
        .bind(&entity.card_token)
        .bind(&entity.card_mask)
        .bind(&entity.card_type)
        .bind(entity.expiry_month as i32)
        .bind(entity.expiry_year)
        .bind(entity.is_default)
        .bind(entity.is_active)
        .bind(entity.created_at)
        .bind(entity.updated_at)
        .bind(entity.last_used_at)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .try_into()
    }

    async fn update(&self, entity: &SavedCard) -> DbResult<SavedCard> {
        sqlx::query_as::<_, SavedCardRow>(&format!(
            "UPDATE saved_cards
             SET card_mask = $2, card_type = $3, expiry_month = $4, expiry_year = $5,
                 is_default = $6, is_active = $7, updated_at = $8, last_used_at = $9
             WHERE id = $1
             RETURNING {}",
            COLUMNS
        ))
        .bind(entity.id)
        .bind(&entity.card_mask)
        .bind(&entity.card_type)
        .bind(entity.expiry_month as i32)
        .bind(entity.expiry_year)
        .bind(entity.is_default)
        .bind(entity.is_active)
        .bind(entity.updated_at)
        .bind(entity.last_used_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .ok_or_else(|| DatabaseError::not_found("SavedCard", entity.id))?
        .try_into()
    }

    async fn delete(&self, id: Uuid) -> DbResult<bool> {
        // Soft delete
        let result = sqlx::query(
            "UPDATE saved_cards SET is_active = false, is_default = false, updated_at = NOW()
             WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl SavedCardRepository for PgSavedCardRepository {
    async fn list_for_member(&self, member_id: &str) -> DbResult<Vec<SavedCard>> {
        let rows = sqlx::query_as::<_, SavedCardRow>(&format!(
            "SELECT {} FROM saved_cards
             WHERE member_id = $1 AND is_active = true
             ORDER BY is_default DESC, created_at DESC",
            COLUMNS
        ))
        .bind(member_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        to_domain(rows)
    }

    async fn set_default(
        &self,
        member_id: &str,
        card_id: Uuid,
        now: DateTime<Utc>,
    ) -> DbResult<Option<SavedCard>> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;

        sqlx::query(
            "UPDATE saved_cards SET is_default = false, updated_at = $3
             WHERE member_id = $1 AND id <> $2 AND is_default = true",
        )
        .bind(member_id)
        .bind(card_id)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        let row = sqlx::query_as::<_, SavedCardRow>(&format!(
            "UPDATE saved_cards SET is_default = true, updated_at = $3
             WHERE id = $1 AND member_id = $2 AND is_active = true
             RETURNING {}",
            COLUMNS
        ))
        .bind(card_id)
        .bind(member_id)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        match row {
            Some(row) => {
                tx.commit().await.map_err(DatabaseError::from_sqlx)?;
                row.try_into().map(Some)
            }
            None => {
                tx.rollback().await.map_err(DatabaseError::from_sqlx)?;
                Ok(None)
            }
        }
    }

    async fn mark_used(&self, card_id: Uuid, now: DateTime<Utc>) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE saved_cards SET last_used_at = $2, updated_at = $2 WHERE id = $1",
        )
        .bind(card_id)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::not_found("SavedCard", card_id));
        }
        Ok(())
    }
}
