use chrono::{DateTime, Datelike, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use uuid::Uuid;

/// BIN prefix, masked middle, last four digits: `440043******1234`
const CARD_MASK_PATTERN: &str = r"^\d{4,6}[*Xx]{2,9}\d{4}$";

/// True when `mask` looks like a masked PAN rather than a full card number.
pub fn is_masked_pan(mask: &str) -> bool {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(CARD_MASK_PATTERN).ok())
        .as_ref()
        .map(|re| re.is_match(mask.trim()))
        .unwrap_or(false)
}

/// Tokenised card kept for one-click payments. Never holds a raw PAN.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedCard {
    pub id: Uuid,
    pub member_id: String,
    #[serde(skip_serializing)]
    pub card_token: String,
    pub card_mask: String,
    pub card_type: String,
    pub expiry_month: u32,
    pub expiry_year: i32,
    pub is_default: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl SavedCard {
    /// Cards are valid through the last day of their expiry month.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let (year, month) = (now.year(), now.month());
        year > self.expiry_year || (year == self.expiry_year && month > self.expiry_month)
    }

    pub fn can_be_used(&self, now: DateTime<Utc>) -> bool {
        self.is_active && !self.is_expired(now)
    }
}
