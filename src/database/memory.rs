//! In-memory adapters for local runs without Postgres and for tests. They
//! enforce the same uniqueness and conditional-update rules as the SQL schema.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::database::repository::{
    CallbackRetryRepository, DbResult, MemberRepository, MemberSummary, PaymentRepository,
    ReceiptRepository, Repository, SavedCardRepository,
};
use crate::domain::rules::is_expired;
use crate::domain::{
    CallbackRetry, CallbackRetryStatus, Payment, PaymentStatus, PaymentUpdate, Receipt,
    ReceiptDetailsUpdate, SavedCard,
};

fn page<T: Clone>(mut items: Vec<T>, limit: i64, offset: i64) -> Vec<T> {
    let offset = offset.max(0) as usize;
    let limit = limit.max(0) as usize;
    if offset >= items.len() {
        return Vec::new();
    }
    items.drain(..offset);
    items.truncate(limit);
    items
}

#[derive(Default)]
pub struct InMemoryPaymentRepository {
    rows: RwLock<HashMap<Uuid, Payment>>,
}

impl InMemoryPaymentRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Repository for InMemoryPaymentRepository {
    type Entity = Payment;

    async fn find_by_id(&self, id: Uuid) -> DbResult<Option<Payment>> {
        Ok(self.rows.read().await.get(&id).cloned())
    }

    async fn list(&self, limit: i64, offset: i64) -> DbResult<Vec<Payment>> {
        let mut items: Vec<Payment> = self.rows.read().await.values().cloned().collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(page(items, limit, offset))
    }

    async fn insert(&self, entity: &Payment) -> DbResult<Payment> {
        let mut rows = self.rows.write().await;
        if rows.values().any(|p| p.invoice_id == entity.invoice_id) {
            return Err(DatabaseError::unique_violation("payments_invoice_id_key"));
        }
        if rows.contains_key(&entity.id) {
            return Err(DatabaseError::unique_violation("payments_pkey"));
        }
        rows.insert(entity.id, entity.clone());
        Ok(entity.clone())
    }

    async fn update(&self, entity: &Payment) -> DbResult<Payment> {
        let mut rows = self.rows.write().await;
        match rows.get_mut(&entity.id) {
            Some(row) => {
                *row = entity.clone();
                Ok(entity.clone())
            }
            None => Err(DatabaseError::not_found("Payment", entity.id)),
        }
    }

    async fn delete(&self, _id: Uuid) -> DbResult<bool> {
        Err(DatabaseError::new(DatabaseErrorKind::ConstraintViolation {
            message: "payments are retained for audit and cannot be deleted".to_string(),
        }))
    }
}

#[async_trait]
impl PaymentRepository for InMemoryPaymentRepository {
    async fn find_by_invoice_id(&self, invoice_id: &str) -> DbResult<Option<Payment>> {
        Ok(self
            .rows
            .read()
            .await
            .values()
            .find(|p| p.invoice_id == invoice_id)
            .cloned())
    }

    async fn find_expired(&self, now: DateTime<Utc>, limit: i64) -> DbResult<Vec<Payment>> {
        let mut items: Vec<Payment> = self
            .rows
            .read()
            .await
            .values()
            .filter(|p| is_expired(p, now))
            .cloned()
            .collect();
        items.sort_by(|a, b| a.expires_at.cmp(&b.expires_at));
        Ok(page(items, limit, 0))
    }

    async fn transition(
        &self,
        id: Uuid,
        expected: PaymentStatus,
        update: &PaymentUpdate,
    ) -> DbResult<Option<Payment>> {
        let mut rows = self.rows.write().await;
        let row = rows
            .get_mut(&id)
            .ok_or_else(|| DatabaseError::not_found("Payment", id))?;
        if row.status != expected {
            return Ok(None);
        }
        row.apply(update);
        Ok(Some(row.clone()))
    }
}

#[derive(Default)]
pub struct InMemoryCallbackRetryRepository {
    rows: RwLock<HashMap<Uuid, CallbackRetry>>,
}

impl InMemoryCallbackRetryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Repository for InMemoryCallbackRetryRepository {
    type Entity = CallbackRetry;

    async fn find_by_id(&self, id: Uuid) -> DbResult<Option<CallbackRetry>> {
        Ok(self.rows.read().await.get(&id).cloned())
    }

    async fn list(&self, limit: i64, offset: i64) -> DbResult<Vec<CallbackRetry>> {
        let mut items: Vec<CallbackRetry> = self.rows.read().await.values().cloned().collect();
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(page(items, limit, offset))
    }

    async fn insert(&self, entity: &CallbackRetry) -> DbResult<CallbackRetry> {
        let mut rows = self.rows.write().await;
        if rows.contains_key(&entity.id) {
            return Err(DatabaseError::unique_violation("callback_retries_pkey"));
        }
        if entity.status == CallbackRetryStatus::Pending
            && rows.values().any(|r| {
                r.payment_id == entity.payment_id && r.status == CallbackRetryStatus::Pending
            })
        {
            return Err(DatabaseError::unique_violation("idx_callback_retries_one_pending"));
        }
        rows.insert(entity.id, entity.clone());
        Ok(entity.clone())
    }

    async fn update(&self, entity: &CallbackRetry) -> DbResult<CallbackRetry> {
        let mut rows = self.rows.write().await;
        match rows.get_mut(&entity.id) {
            Some(row) => {
                *row = entity.clone();
                Ok(entity.clone())
            }
            None => Err(DatabaseError::not_found("CallbackRetry", entity.id)),
        }
    }

    async fn delete(&self, id: Uuid) -> DbResult<bool> {
        Ok(self.rows.write().await.remove(&id).is_some())
    }
}

#[async_trait]
impl CallbackRetryRepository for InMemoryCallbackRetryRepository {
    async fn find_due(&self, now: DateTime<Utc>, limit: i64) -> DbResult<Vec<CallbackRetry>> {
        let mut items: Vec<CallbackRetry> = self
            .rows
            .read()
            .await
            .values()
            .filter(|r| r.is_due(now))
            .cloned()
            .collect();
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(page(items, limit, 0))
    }

    async fn list_failed(&self, limit: i64) -> DbResult<Vec<CallbackRetry>> {
        let mut items: Vec<CallbackRetry> = self
            .rows
            .read()
            .await
            .values()
            .filter(|r| r.status == CallbackRetryStatus::Failed)
            .cloned()
            .collect();
        items.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(page(items, limit, 0))
    }

    async fn find_pending_for_payment(&self, payment_id: Uuid) -> DbResult<Option<CallbackRetry>> {
        Ok(self
            .rows
            .read()
            .await
            .values()
            .find(|r| r.payment_id == payment_id && r.status == CallbackRetryStatus::Pending)
            .cloned())
    }
}

#[derive(Default)]
pub struct InMemorySavedCardRepository {
    rows: RwLock<HashMap<Uuid, SavedCard>>,
}

impl InMemorySavedCardRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Repository for InMemorySavedCardRepository {
    type Entity = SavedCard;

    async fn find_by_id(&self, id: Uuid) -> DbResult<Option<SavedCard>> {
        Ok(self.rows.read().await.get(&id).cloned())
    }

    async fn list(&self, limit: i64, offset: i64) -> DbResult<Vec<SavedCard>> {
        let mut items: Vec<SavedCard> = self.rows.read().await.values().cloned().collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(page(items, limit, offset))
    }

    async fn insert(&self, entity: &SavedCard) -> DbResult<SavedCard> {
        let mut rows = self.rows.write().await;
        if rows
            .values()
            .any(|c| c.member_id == entity.member_id && c.card_token == entity.card_token && c.is_active)
        {
            return Err(DatabaseError::unique_violation("saved_cards_member_token_key"));
        }
        rows.insert(entity.id, entity.clone());
        Ok(entity.clone())
    }

    async fn update(&self, entity: &SavedCard) -> DbResult<SavedCard> {
        let mut rows = self.rows.write().await;
        match rows.get_mut(&entity.id) {
            Some(row) => {
                *row = entity.clone();
                Ok(entity.clone())
            }
            None => Err(DatabaseError::not_found("SavedCard", entity.id)),
        }
    }

    async fn delete(&self, id: Uuid) -> DbResult<bool> {
        // Soft delete
        let mut rows = self.rows.write().await;
        match rows.get_mut(&id) {
            Some(card) => {
                card.is_active = false;
                card.is_default = false;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl SavedCardRepository for InMemorySavedCardRepository {
    async fn list_for_member(&self, member_id: &str) -> DbResult<Vec<SavedCard>> {
        let mut items: Vec<SavedCard> = self
            .rows
            .read()
            .await
            .values()
            .filter(|c| c.member_id == member_id && c.is_active)
            .cloned()
            .collect();
        items.sort_by(|a, b| b.is_default.cmp(&a.is_default).then(b.created_at.cmp(&a.created_at)));
        Ok(items)
    }

    async fn set_default(
        &self,
        member_id: &str,
        card_id: Uuid,
        now: DateTime<Utc>,
    ) -> DbResult<Option<SavedCard>> {
        let mut rows = self.rows.write().await;
        let owned = rows
            .get(&card_id)
            .map(|c| c.member_id == member_id && c.is_active)
            .unwrap_or(false);
        if !owned {
            return Ok(None);
        }
        for card in rows.values_mut().filter(|c| c.member_id == member_id) {
            let is_target = card.id == card_id;
            if card.is_default != is_target {
                card.is_default = is_target;
                card.updated_at = now;
            }
        }
        Ok(rows.get(&card_id).cloned())
    }

    async fn mark_used(&self, card_id: Uuid, now: DateTime<Utc>) -> DbResult<()> {
        let mut rows = self.rows.write().await;
        let card = rows
            .get_mut(&card_id)
            .ok_or_else(|| DatabaseError::not_found("SavedCard", card_id))?;
        card.last_used_at = Some(now);
        card.updated_at = now;
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryReceiptRepository {
    rows: RwLock<HashMap<Uuid, Receipt>>,
}

impl InMemoryReceiptRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Repository for InMemoryReceiptRepository {
    type Entity = Receipt;

    async fn find_by_id(&self, id: Uuid) -> DbResult<Option<Receipt>> {
        Ok(self.rows.read().await.get(&id).cloned())
    }

    async fn list(&self, limit: i64, offset: i64) -> DbResult<Vec<Receipt>> {
        let mut items: Vec<Receipt> = self.rows.read().await.values().cloned().collect();
        items.sort_by(|a, b| b.issued_at.cmp(&a.issued_at));
        Ok(page(items, limit, offset))
    }

    async fn insert(&self, entity: &Receipt) -> DbResult<Receipt> {
        let mut rows = self.rows.write().await;
        if rows.values().any(|r| r.payment_id == entity.payment_id) {
            return Err(DatabaseError::unique_violation("receipts_payment_id_key"));
        }
        if rows.values().any(|r| r.receipt_number == entity.receipt_number) {
            return Err(DatabaseError::unique_violation("receipts_receipt_number_key"));
        }
        rows.insert(entity.id, entity.clone());
        Ok(entity.clone())
    }

    async fn update(&self, entity: &Receipt) -> DbResult<Receipt> {
        let mut rows = self.rows.write().await;
        match rows.get_mut(&entity.id) {
            Some(row) => {
                row.apply(
                    &ReceiptDetailsUpdate {
                        status: Some(entity.status),
                        description: entity.description.clone(),
                        notes: entity.notes.clone(),
                    },
                    entity.updated_at,
                );
                Ok(row.clone())
            }
            None => Err(DatabaseError::not_found("Receipt", entity.id)),
        }
    }

    async fn delete(&self, id: Uuid) -> DbResult<bool> {
        Ok(self.rows.write().await.remove(&id).is_some())
    }
}

#[async_trait]
impl ReceiptRepository for InMemoryReceiptRepository {
    async fn find_by_payment_id(&self, payment_id: Uuid) -> DbResult<Option<Receipt>> {
        Ok(self
            .rows
            .read()
            .await
            .values()
            .find(|r| r.payment_id == payment_id)
            .cloned())
    }

    async fn find_by_number(&self, receipt_number: &str) -> DbResult<Option<Receipt>> {
        Ok(self
            .rows
            .read()
            .await
            .values()
            .find(|r| r.receipt_number == receipt_number)
            .cloned())
    }

    async fn list_for_member(&self, member_id: &str, limit: i64, offset: i64) -> DbResult<Vec<Receipt>> {
        let mut items: Vec<Receipt> = self
            .rows
            .read()
            .await
            .values()
            .filter(|r| r.member_id == member_id)
            .cloned()
            .collect();
        items.sort_by(|a, b| b.issued_at.cmp(&a.issued_at));
        Ok(page(items, limit, offset))
    }

    async fn update_details(
        &self,
        id: Uuid,
        update: &ReceiptDetailsUpdate,
        now: DateTime<Utc>,
    ) -> DbResult<Option<Receipt>> {
        let mut rows = self.rows.write().await;
        Ok(rows.get_mut(&id).map(|row| {
            row.apply(update, now);
            row.clone()
        }))
    }
}

#[derive(Default)]
pub struct InMemoryMemberRepository {
    rows: RwLock<HashMap<String, MemberSummary>>,
}

impl InMemoryMemberRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn upsert(&self, member: MemberSummary) {
        self.rows.write().await.insert(member.id.clone(), member);
    }
}

#[async_trait]
impl MemberRepository for InMemoryMemberRepository {
    async fn find_by_id(&self, member_id: &str) -> DbResult<Option<MemberSummary>> {
        Ok(self.rows.read().await.get(member_id).cloned())
    }
}
