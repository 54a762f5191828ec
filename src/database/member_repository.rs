use crate::database::error::DatabaseError;
use crate::database::repository::{DbResult, MemberRepository, MemberSummary};
use async_trait::async_trait;
use sqlx::{FromRow, PgPool};

#[derive(Debug, Clone, FromRow)]
struct MemberRow {
    id: String,
    full_name: String,
    email: Option<String>,
}

/// Read-only view over the `members` table owned by the membership module
pub struct PgMemberRepository {
    pool: PgPool,
}

impl PgMemberRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MemberRepository for PgMemberRepository {
    async fn find_by_id(&self, member_id: &str) -> DbResult<Option<MemberSummary>> {
        let row = sqlx::query_as::<_, MemberRow>(
            "SELECT id::text AS id, CONCAT_WS(' ', first_name, last_name) AS full_name, email
             FROM members
             WHERE id::text = $1",
        )
        .bind(member_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(row.map(|r| MemberSummary {
            id: r.id,
            full_name: r.full_name,
            email: r.email,
        }))
    }
}
