//! Payment domain model: entities, the status machine and pure business rules.
//! Nothing in here performs I/O.

pub mod callback_retry;
pub mod payment;
pub mod receipt;
pub mod rules;
pub mod saved_card;

pub use callback_retry::{CallbackRetry, CallbackRetryStatus, RetryPolicy};
pub use payment::{Payment, PaymentMethod, PaymentStatus, PaymentType, PaymentUpdate};
pub use receipt::{Receipt, ReceiptDetailsUpdate, ReceiptStatus};
pub use saved_card::SavedCard;
