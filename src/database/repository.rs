//! Persistence ports. Use cases depend on these traits only; the Postgres and
//! in-memory adapters implement them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::database::error::DatabaseError;
use crate::domain::{
    CallbackRetry, Payment, PaymentStatus, PaymentUpdate, Receipt, ReceiptDetailsUpdate, SavedCard,
};

pub type DbResult<T> = Result<T, DatabaseError>;

/// Generic CRUD shared by every adapter
#[async_trait]
pub trait Repository: Send + Sync {
    type Entity: Send + Sync;

    async fn find_by_id(&self, id: Uuid) -> DbResult<Option<Self::Entity>>;

    async fn list(&self, limit: i64, offset: i64) -> DbResult<Vec<Self::Entity>>;

    async fn insert(&self, entity: &Self::Entity) -> DbResult<Self::Entity>;

    async fn update(&self, entity: &Self::Entity) -> DbResult<Self::Entity>;

    async fn delete(&self, id: Uuid) -> DbResult<bool>;
}

#[async_trait]
pub trait PaymentRepository: Repository<Entity = Payment> {
    async fn find_by_invoice_id(&self, invoice_id: &str) -> DbResult<Option<Payment>>;

    /// Pending or Processing payments whose `expires_at` is before `now`,
    /// oldest expiry first.
    async fn find_expired(&self, now: DateTime<Utc>, limit: i64) -> DbResult<Vec<Payment>>;

    /// Apply `update` only if the stored status still equals `expected`.
    /// `None` means another writer changed the row first.
    async fn transition(
        &self,
        id: Uuid,
        expected: PaymentStatus,
        update: &PaymentUpdate,
    ) -> DbResult<Option<Payment>>;
}

#[async_trait]
pub trait CallbackRetryRepository: Repository<Entity = CallbackRetry> {
    /// Pending retries with `next_retry_at <= now` and attempts left, oldest first.
    async fn find_due(&self, now: DateTime<Utc>, limit: i64) -> DbResult<Vec<CallbackRetry>>;

    /// Permanently failed retries, newest first, for operators.
    async fn list_failed(&self, limit: i64) -> DbResult<Vec<CallbackRetry>>;

    async fn find_pending_for_payment(&self, payment_id: Uuid) -> DbResult<Option<CallbackRetry>>;
}

#[async_trait]
pub trait SavedCardRepository: Repository<Entity = SavedCard> {
    async fn list_for_member(&self, member_id: &str) -> DbResult<Vec<SavedCard>>;

    /// Make `card_id` the member's only default card.
    async fn set_default(
        &self,
        member_id: &str,
        card_id: Uuid,
        now: DateTime<Utc>,
    ) -> DbResult<Option<SavedCard>>;

    async fn mark_used(&self, card_id: Uuid, now: DateTime<Utc>) -> DbResult<()>;
}

#[async_trait]
pub trait ReceiptRepository: Repository<Entity = Receipt> {
    async fn find_by_payment_id(&self, payment_id: Uuid) -> DbResult<Option<Receipt>>;

    async fn find_by_number(&self, receipt_number: &str) -> DbResult<Option<Receipt>>;

    async fn list_for_member(&self, member_id: &str, limit: i64, offset: i64) -> DbResult<Vec<Receipt>>;

    async fn update_details(
        &self,
        id: Uuid,
        update: &ReceiptDetailsUpdate,
        now: DateTime<Utc>,
    ) -> DbResult<Option<Receipt>>;
}

/// Display data for a library member; member CRUD lives outside this crate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberSummary {
    pub id: String,
    pub full_name: String,
    pub email: Option<String>,
}

#[async_trait]
pub trait MemberRepository: Send + Sync {
    async fn find_by_id(&self, member_id: &str) -> DbResult<Option<MemberSummary>>;
}
