use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::database::repository::{PaymentRepository, SavedCardRepository};
use crate::domain::rules::{self, generate_invoice_id, transition_path};
use crate::domain::saved_card::is_masked_pan;
use crate::domain::{Payment, PaymentMethod, PaymentStatus, PaymentType, PaymentUpdate, SavedCard};
use crate::error::{AppError, AppResult, DomainError};
use crate::payments::provider::PaymentGateway;
use crate::payments::types::CardChargeRequest;
use crate::services::payment_callback::map_gateway_status;

#[derive(Debug, Clone, Deserialize)]
pub struct SaveCardRequest {
    pub member_id: String,
    pub card_token: String,
    pub card_mask: String,
    pub card_type: String,
    pub expiry_month: u32,
    pub expiry_year: i32,
    #[serde(default)]
    pub make_default: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PayWithSavedCardRequest {
    pub member_id: String,
    pub card_id: Uuid,
    /// Minor currency units
    pub amount: i64,
    pub currency: String,
    pub payment_type: PaymentType,
    #[serde(default)]
    pub related_entity_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PayWithSavedCardResponse {
    pub payment_id: Uuid,
    pub invoice_id: String,
    pub status: PaymentStatus,
    pub card_mask: String,
    pub completed_at: Option<DateTime<Utc>>,
}

pub struct SavedCardService {
    cards: Arc<dyn SavedCardRepository>,
    payments: Arc<dyn PaymentRepository>,
    gateway: Arc<dyn PaymentGateway>,
    payment_ttl: Duration,
}

impl SavedCardService {
    pub fn new(
        cards: Arc<dyn SavedCardRepository>,
        payments: Arc<dyn PaymentRepository>,
        gateway: Arc<dyn PaymentGateway>,
        payment_ttl: Duration,
    ) -> Self {
        Self {
            cards,
            payments,
            gateway,
            payment_ttl,
        }
    }

    pub async fn save_card(&self, request: SaveCardRequest) -> AppResult<SavedCard> {
        let now = Utc::now();
        if request.card_token.trim().is_empty() {
            return Err(AppError::invalid_field("card_token", "must not be empty"));
        }
        if !is_masked_pan(&request.card_mask) {
            return Err(AppError::invalid_field("card_mask", "must be a masked card number"));
        }
        if !(1..=12).contains(&request.expiry_month) {
            return Err(AppError::invalid_field("expiry_month", "must be between 1 and 12"));
        }

        let existing = self
            .cards
            .list_for_member(&request.member_id)
            .await
            .map_err(|e| AppError::from(e).with_context("list saved cards"))?;

        let card = SavedCard {
            id: Uuid::new_v4(),
            member_id: request.member_id,
            card_token: request.card_token,
            card_mask: request.card_mask,
            card_type: request.card_type,
            expiry_month: request.expiry_month,
            expiry_year: request.expiry_year,
            is_default: false,
            is_active: true,
            created_at: now,
            updated_at: now,
            last_used_at: None,
        };
        if card.is_expired(now) {
            return Err(AppError::invalid_field("expiry_year", "card has already expired"));
        }

        let card = self
            .cards
            .insert(&card)
            .await
            .map_err(|e| AppError::from(e).with_context("save card"))?;

        info!(card_id = %card.id, member_id = %card.member_id, card_mask = %card.card_mask, "card saved");

        if request.make_default || existing.is_empty() {
            return self.set_default(&card.member_id, card.id).await;
        }
        Ok(card)
    }

    /// Active, unexpired cards, default first.
    pub async fn list_usable(&self, member_id: &str) -> AppResult<Vec<SavedCard>> {
        let now = Utc::now();
        let cards = self
            .cards
            .list_for_member(member_id)
            .await
            .map_err(|e| AppError::from(e).with_context("list saved cards"))?;
        Ok(cards.into_iter().filter(|c| c.can_be_used(now)).collect())
    }

    pub async fn set_default(&self, member_id: &str, card_id: Uuid) -> AppResult<SavedCard> {
        self.cards
            .set_default(member_id, card_id, Utc::now())
            .await
            .map_err(|e| AppError::from(e).with_context("set default card"))?
            .ok_or_else(|| card_not_found(card_id))
    }

    pub async fn deactivate(&self, member_id: &str, card_id: Uuid) -> AppResult<()> {
        self.owned_card(member_id, card_id).await?;
        self.cards
            .delete(card_id)
            .await
            .map_err(|e| AppError::from(e).with_context("deactivate card"))?;
        info!(card_id = %card_id, member_id = %member_id, "card deactivated");
        Ok(())
    }

    /// Charge a saved card directly. A gateway failure leaves the payment
    /// Pending so the expiry sweep or a late callback can settle it.
    pub async fn pay_with_saved_card(&self, request: PayWithSavedCardRequest) -> AppResult<PayWithSavedCardResponse> {
        let now = Utc::now();
        let card = self.owned_card(&request.member_id, request.card_id).await?;
        if !card.can_be_used(now) {
            let reason = if card.is_active { "card expired" } else { "card deactivated" };
            return Err(AppError::domain(DomainError::CardNotUsable {
                card_id: card.id.to_string(),
                reason: reason.to_string(),
            }));
        }

        let payment = Payment::new_pending(
            generate_invoice_id(request.payment_type, now),
            request.member_id,
            request.amount,
            request.currency.trim().to_ascii_uppercase(),
            PaymentMethod::SavedCard,
            request.payment_type,
            request.related_entity_id,
            now,
            now + self.payment_ttl,
        );
        rules::validate(&payment)?;
        let payment = self
            .payments
            .insert(&payment)
            .await
            .map_err(|e| AppError::from(e).with_context("create payment"))?;

        let charge = self
            .gateway
            .charge_card(CardChargeRequest {
                invoice_id: payment.invoice_id.clone(),
                member_id: payment.member_id.clone(),
                card_token: card.card_token.clone(),
                amount: payment.amount,
                currency: payment.currency.clone(),
                description: Some(format!("Library {} payment", payment.payment_type)),
            })
            .await
            .map_err(|e| {
                warn!(payment_id = %payment.id, error = %e, "saved card charge failed");
                AppError::from(e).with_context("charge saved card")
            })?;

        let target = map_gateway_status(&charge.status)?;
        let mut settled = payment.clone();
        if target != payment.status {
            transition_path(payment.status, target)?;
            let mut update = PaymentUpdate::new(target, Utc::now()).with_gateway_details(
                Some(charge.transaction_id.clone()),
                charge.card_mask.clone().or_else(|| Some(card.card_mask.clone())),
                charge.approval_code.clone(),
                charge.raw.clone(),
            );
            if target == PaymentStatus::Failed {
                update = update.with_error(
                    "DECLINED",
                    charge.reason.clone().unwrap_or_else(|| "card charge declined".to_string()),
                );
            }

            settled = match self
                .payments
                .transition(payment.id, payment.status, &update)
                .await
                .map_err(|e| AppError::from(e).with_context("persist charge result"))?
            {
                Some(updated) => updated,
                // A callback got there first
                None => self
                    .payments
                    .find_by_id(payment.id)
                    .await
                    .map_err(AppError::from)?
                    .ok_or_else(|| AppError::payment_not_found(payment.id.to_string()))?,
            };
        }

        if let Err(e) = self.cards.mark_used(card.id, Utc::now()).await {
            warn!(card_id = %card.id, error = %e, "failed to record card usage");
        }

        info!(
            payment_id = %settled.id,
            invoice_id = %settled.invoice_id,
            card_id = %card.id,
            status = %settled.status,
            "saved card charged"
        );

        Ok(PayWithSavedCardResponse {
            payment_id: settled.id,
            invoice_id: settled.invoice_id,
            status: settled.status,
            card_mask: card.card_mask,
            completed_at: settled.completed_at,
        })
    }

    async fn owned_card(&self, member_id: &str, card_id: Uuid) -> AppResult<SavedCard> {
        self.cards
            .find_by_id(card_id)
            .await
            .map_err(|e| AppError::from(e).with_context("load saved card"))?
            .filter(|c| c.member_id == member_id)
            .ok_or_else(|| card_not_found(card_id))
    }
}

fn card_not_found(card_id: Uuid) -> AppError {
    AppError::domain(DomainError::CardNotFound {
        card_id: card_id.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::{InMemoryPaymentRepository, InMemorySavedCardRepository};
    use crate::database::repository::Repository;
    use crate::payments::error::GatewayError;
    use crate::payments::providers::mock::{GatewayOp, MockGateway};
    use chrono::Datelike;

    struct Fixture {
        payments: Arc<InMemoryPaymentRepository>,
        gateway: Arc<MockGateway>,
        service: SavedCardService,
    }

    fn fixture() -> Fixture {
        let payments = Arc::new(InMemoryPaymentRepository::new());
        let gateway = Arc::new(MockGateway::new());
        let service = SavedCardService::new(
            Arc::new(InMemorySavedCardRepository::new()),
            payments.clone(),
            gateway.clone(),
            Duration::minutes(30),
        );
        Fixture {
            payments,
            gateway,
            service,
        }
    }

    fn card_request(token: &str, make_default: bool) -> SaveCardRequest {
        SaveCardRequest {
            member_id: "member-1".to_string(),
            card_token: token.to_string(),
            card_mask: "440043******1234".to_string(),
            card_type: "VISA".to_string(),
            expiry_month: 12,
            expiry_year: Utc::now().year() + 2,
            make_default,
        }
    }

    fn charge(card_id: Uuid) -> PayWithSavedCardRequest {
        PayWithSavedCardRequest {
            member_id: "member-1".to_string(),
            card_id,
            amount: 3000,
            currency: "KZT".to_string(),
            payment_type: PaymentType::Fine,
            related_entity_id: None,
        }
    }

    #[tokio::test]
    async fn first_card_becomes_default_and_switches() {
        let f = fixture();
        let first = f.service.save_card(card_request("tok_a", false)).await.unwrap();
        assert!(first.is_default);

        let second = f.service.save_card(card_request("tok_b", true)).await.unwrap();
        assert!(second.is_default);

        let cards = f.service.list_usable("member-1").await.unwrap();
        assert_eq!(cards.len(), 2);
        assert_eq!(cards.iter().filter(|c| c.is_default).count(), 1);
        assert_eq!(cards[0].id, second.id);
    }

    #[tokio::test]
    async fn expired_card_rejected() {
        let f = fixture();
        let mut request = card_request("tok_old", false);
        request.expiry_year = Utc::now().year() - 1;
        assert!(f.service.save_card(request).await.is_err());
    }

    #[tokio::test]
    async fn successful_charge_completes_payment() {
        let f = fixture();
        let card = f.service.save_card(card_request("tok_a", false)).await.unwrap();

        let response = f.service.pay_with_saved_card(charge(card.id)).await.unwrap();
        assert_eq!(response.status, PaymentStatus::Completed);
        assert!(response.completed_at.is_some());

        let stored = f.payments.find_by_id(response.payment_id).await.unwrap().unwrap();
        assert_eq!(stored.payment_method, PaymentMethod::SavedCard);
        assert!(stored.gateway_transaction_id.is_some());
    }

    #[tokio::test]
    async fn declined_charge_fails_payment() {
        let f = fixture();
        let card = f.service.save_card(card_request("tok_a", false)).await.unwrap();
        f.gateway.set_charge_status("declined").await;

        let response = f.service.pay_with_saved_card(charge(card.id)).await.unwrap();
        assert_eq!(response.status, PaymentStatus::Failed);
        let stored = f.payments.find_by_id(response.payment_id).await.unwrap().unwrap();
        assert_eq!(stored.error_code.as_deref(), Some("DECLINED"));
    }

    #[tokio::test]
    async fn gateway_error_leaves_payment_pending() {
        let f = fixture();
        let card = f.service.save_card(card_request("tok_a", false)).await.unwrap();
        f.gateway
            .fail_on(
                GatewayOp::ChargeCard,
                GatewayError::Timeout {
                    operation: "charge".to_string(),
                    seconds: 30,
                },
            )
            .await;

        assert!(f.service.pay_with_saved_card(charge(card.id)).await.is_err());
        let payments = f.payments.list(10, 0).await.unwrap();
        assert_eq!(payments.len(), 1);
        assert_eq!(payments[0].status, PaymentStatus::Pending);
    }

    #[tokio::test]
    async fn foreign_or_deactivated_card_unusable() {
        let f = fixture();
        let card = f.service.save_card(card_request("tok_a", false)).await.unwrap();

        let mut foreign = charge(card.id);
        foreign.member_id = "member-2".to_string();
        assert!(f.service.pay_with_saved_card(foreign).await.unwrap_err().is_not_found());

        f.service.deactivate("member-1", card.id).await.unwrap();
        let err = f.service.pay_with_saved_card(charge(card.id)).await.unwrap_err();
        assert_eq!(err.status_code(), 422);
        assert!(f.service.list_usable("member-1").await.unwrap().is_empty());
    }
}
