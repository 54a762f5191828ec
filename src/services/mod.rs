//! Payment use cases. Each service depends on repository and gateway ports
//! only, so the same code runs against Postgres or the in-memory adapters.

pub mod callback_retries;
pub mod cancel_payment;
pub mod expire_payments;
pub mod initiate_payment;
pub mod payment_callback;
pub mod receipt;
pub mod refund_payment;
pub mod saved_cards;

use std::sync::Arc;

use crate::config::PaymentsConfig;
use crate::database::Repositories;
use crate::payments::provider::PaymentGateway;

pub use callback_retries::{CallbackRetryService, ProcessCallbackRetriesResponse};
pub use cancel_payment::{CancelPaymentRequest, CancelPaymentResponse, CancelPaymentService};
pub use expire_payments::{ExpirePaymentsResponse, ExpirePaymentsService};
pub use initiate_payment::{InitiatePaymentRequest, InitiatePaymentResponse, InitiatePaymentService};
pub use payment_callback::{
    map_gateway_status, CallbackSettings, PaymentCallbackRequest, PaymentCallbackResponse,
    PaymentCallbackService,
};
pub use receipt::ReceiptService;
pub use refund_payment::{RefundPaymentRequest, RefundPaymentResponse, RefundPaymentService};
pub use saved_cards::{PayWithSavedCardRequest, PayWithSavedCardResponse, SaveCardRequest, SavedCardService};

/// All use cases wired to one set of repositories and one gateway
#[derive(Clone)]
pub struct PaymentServices {
    pub initiate: Arc<InitiatePaymentService>,
    pub callbacks: Arc<PaymentCallbackService>,
    pub callback_retries: Arc<CallbackRetryService>,
    pub refunds: Arc<RefundPaymentService>,
    pub cancellations: Arc<CancelPaymentService>,
    pub expiry: Arc<ExpirePaymentsService>,
    pub receipts: Arc<ReceiptService>,
    pub saved_cards: Arc<SavedCardService>,
}

impl PaymentServices {
    pub fn new(repos: &Repositories, gateway: Arc<dyn PaymentGateway>, config: &PaymentsConfig) -> Self {
        let callbacks = Arc::new(PaymentCallbackService::new(
            repos.payments.clone(),
            repos.callback_retries.clone(),
            gateway.clone(),
            CallbackSettings::from(config),
        ));

        Self {
            initiate: Arc::new(InitiatePaymentService::new(
                repos.payments.clone(),
                gateway.clone(),
                config.payment_ttl(),
                config.checkout_base_url.clone(),
            )),
            callback_retries: Arc::new(CallbackRetryService::new(
                repos.callback_retries.clone(),
                callbacks.clone(),
            )),
            callbacks,
            refunds: Arc::new(RefundPaymentService::new(
                repos.payments.clone(),
                gateway.clone(),
                config.refund_window(),
            )),
            cancellations: Arc::new(CancelPaymentService::new(repos.payments.clone(), gateway.clone())),
            expiry: Arc::new(ExpirePaymentsService::new(repos.payments.clone())),
            receipts: Arc::new(ReceiptService::new(
                repos.receipts.clone(),
                repos.payments.clone(),
                repos.members.clone(),
            )),
            saved_cards: Arc::new(SavedCardService::new(
                repos.saved_cards.clone(),
                repos.payments.clone(),
                gateway,
                config.payment_ttl(),
            )),
        }
    }
}
