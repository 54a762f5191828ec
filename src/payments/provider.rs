use crate::payments::error::GatewayResult;
use crate::payments::types::{AuthToken, CardChargeRequest, CardChargeResponse, GatewayStatusResponse};
use async_trait::async_trait;

/// Port between the payment use cases and a concrete gateway.
///
/// Implementations own their authentication state; callers never manage
/// token lifetime. Amounts are minor currency units.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn get_auth_token(&self) -> GatewayResult<AuthToken>;

    /// Gateway-native status for an invoice. Mapping to `PaymentStatus` is
    /// left to the caller.
    async fn check_payment_status(&self, invoice_id: &str) -> GatewayResult<GatewayStatusResponse>;

    /// `amount = None` refunds the full captured amount.
    async fn refund_payment(
        &self,
        transaction_id: &str,
        amount: Option<i64>,
        external_id: &str,
    ) -> GatewayResult<()>;

    async fn cancel_payment(&self, transaction_id: &str) -> GatewayResult<()>;

    /// Charge a saved card token without redirecting the member.
    async fn charge_card(&self, request: CardChargeRequest) -> GatewayResult<CardChargeResponse>;

    fn name(&self) -> &'static str;
}
