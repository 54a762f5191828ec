use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::payment::{Payment, PaymentStatus, PaymentType};
use super::rules::format_amount;
use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReceiptStatus {
    Issued,
    Refunded,
    Voided,
}

impl ReceiptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReceiptStatus::Issued => "issued",
            ReceiptStatus::Refunded => "refunded",
            ReceiptStatus::Voided => "voided",
        }
    }
}

impl fmt::Display for ReceiptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReceiptStatus {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "issued" => Ok(ReceiptStatus::Issued),
            "refunded" => Ok(ReceiptStatus::Refunded),
            "voided" => Ok(ReceiptStatus::Voided),
            other => Err(AppError::invalid_field(
                "receipt.status",
                format!("unknown receipt status '{}'", other),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    pub id: Uuid,
    pub payment_id: Uuid,
    pub receipt_number: String,
    pub member_id: String,
    pub member_name: Option<String>,
    pub member_email: Option<String>,
    pub amount: i64,
    pub currency: String,
    pub formatted_amount: String,
    pub payment_type: PaymentType,
    pub card_mask: Option<String>,
    pub status: ReceiptStatus,
    pub description: Option<String>,
    pub notes: Option<String>,
    pub issued_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Only these receipt fields may change after issue
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ReceiptDetailsUpdate {
    pub status: Option<ReceiptStatus>,
    pub description: Option<String>,
    pub notes: Option<String>,
}

impl Receipt {
    /// `RCP-{YYYYMMDD}-{payment id as 32 hex}`. Derived from the payment, so
    /// regenerating a receipt for the same payment yields the same number and
    /// two payments never share one.
    pub fn number_for(payment: &Payment) -> String {
        let date = payment.completed_at.unwrap_or(payment.created_at);
        format!(
            "RCP-{}-{}",
            date.format("%Y%m%d"),
            payment.id.simple().to_string().to_ascii_uppercase()
        )
    }

    pub fn for_payment(
        payment: &Payment,
        member_name: Option<String>,
        member_email: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let status = if payment.status == PaymentStatus::Refunded {
            ReceiptStatus::Refunded
        } else {
            ReceiptStatus::Issued
        };
        Self {
            id: Uuid::new_v4(),
            payment_id: payment.id,
            receipt_number: Self::number_for(payment),
            member_id: payment.member_id.clone(),
            member_name,
            member_email,
            amount: payment.amount,
            currency: payment.currency.clone(),
            formatted_amount: format_amount(payment.amount, &payment.currency),
            payment_type: payment.payment_type,
            card_mask: payment.card_mask.clone(),
            status,
            description: Some(format!("Library {} payment {}", payment.payment_type, payment.invoice_id)),
            notes: None,
            issued_at: now,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn apply(&mut self, update: &ReceiptDetailsUpdate, now: DateTime<Utc>) {
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(description) = &update.description {
            self.description = Some(description.clone());
        }
        if let Some(notes) = &update.notes {
            self.notes = Some(notes.clone());
        }
        self.updated_at = now;
    }
}
