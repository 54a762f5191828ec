use crate::config::ConfigError;
use crate::payments::error::{GatewayError, GatewayResult};
use crate::payments::provider::PaymentGateway;
use crate::payments::token_cache::TokenCache;
use crate::payments::types::{AuthToken, CardChargeRequest, CardChargeResponse, GatewayStatusResponse};
use crate::payments::utils::{amount_from_json, format_major_units, PaymentHttpClient, RequestBody};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use reqwest::{Method, Url};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

const PROVIDER: &str = "epay";
const RESULT_OK: &str = "100";
const DEFAULT_TOKEN_TTL_SECS: i64 = 1200;

#[derive(Debug, Clone)]
pub struct EpayConfig {
    pub base_url: String,
    pub oauth_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub terminal_id: String,
    pub scope: String,
    pub webhook_secret: Option<String>,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for EpayConfig {
    fn default() -> Self {
        Self {
            base_url: "https://testepay.homebank.kz/api".to_string(),
            oauth_url: "https://testoauth.homebank.kz/epay2/oauth2/token".to_string(),
            client_id: String::new(),
            client_secret: String::new(),
            terminal_id: String::new(),
            scope: "webapi usermanagement email_send verification statement statistics payment"
                .to_string(),
            webhook_secret: None,
            timeout_secs: 30,
            max_retries: 3,
        }
    }
}

impl EpayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let required = |name: &str| {
            std::env::var(name).map_err(|_| ConfigError::MissingVariable(name.to_string()))
        };
        let defaults = Self::default();

        let config = Self {
            base_url: std::env::var("EPAY_BASE_URL").unwrap_or(defaults.base_url),
            oauth_url: std::env::var("EPAY_OAUTH_URL").unwrap_or(defaults.oauth_url),
            client_id: required("EPAY_CLIENT_ID")?,
            client_secret: required("EPAY_CLIENT_SECRET")?,
            terminal_id: required("EPAY_TERMINAL_ID")?,
            scope: std::env::var("EPAY_SCOPE").unwrap_or(defaults.scope),
            webhook_secret: std::env::var("EPAY_WEBHOOK_SECRET")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            timeout_secs: std::env::var("EPAY_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(defaults.timeout_secs),
            max_retries: std::env::var("EPAY_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(defaults.max_retries),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, url) in [("EPAY_BASE_URL", &self.base_url), ("EPAY_OAUTH_URL", &self.oauth_url)] {
            if Url::parse(url).is_err() {
                return Err(ConfigError::InvalidValue(name.to_string()));
            }
        }
        if self.client_id.trim().is_empty() || self.client_secret.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "EPAY_CLIENT_ID and EPAY_CLIENT_SECRET must be set".to_string(),
            ));
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue("EPAY_TIMEOUT_SECS".to_string()));
        }
        Ok(())
    }
}

/// ePay adapter: OAuth2 client-credentials plus the payment operation API.
pub struct EpayGateway {
    config: EpayConfig,
    http: PaymentHttpClient,
    tokens: TokenCache,
}

impl EpayGateway {
    pub fn new(config: EpayConfig) -> GatewayResult<Self> {
        let http = PaymentHttpClient::new(
            PROVIDER,
            Duration::from_secs(config.timeout_secs),
            config.max_retries,
        )?;
        Ok(Self {
            config,
            http,
            tokens: TokenCache::new(),
        })
    }

    pub fn config(&self) -> &EpayConfig {
        &self.config
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn fetch_token(&self) -> GatewayResult<AuthToken> {
        let form = [
            ("grant_type", "client_credentials"),
            ("scope", self.config.scope.as_str()),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("terminal", self.config.terminal_id.as_str()),
        ];
        let raw: EpayTokenResponse = self
            .http
            .request_json(Method::POST, &self.config.oauth_url, None, RequestBody::Form(&form))
            .await?;

        if raw.access_token.trim().is_empty() {
            return Err(GatewayError::Protocol {
                message: "token response without access_token".to_string(),
            });
        }
        let ttl = raw
            .expires_in
            .as_ref()
            .and_then(|v| match v {
                JsonValue::Number(n) => n.as_i64(),
                JsonValue::String(s) => s.parse().ok(),
                _ => None,
            })
            .unwrap_or(DEFAULT_TOKEN_TTL_SECS);

        Ok(AuthToken {
            access_token: raw.access_token,
            token_type: raw.token_type.unwrap_or_else(|| "Bearer".to_string()),
            expires_at: Utc::now() + ChronoDuration::seconds(ttl),
        })
    }

    /// Runs `call` with a bearer token, refreshing it once if the gateway
    /// rejects it as unauthorized.
    async fn authorized<T, F, Fut>(&self, call: F) -> GatewayResult<T>
    where
        F: Fn(String) -> Fut + Send + Sync,
        Fut: Future<Output = GatewayResult<T>> + Send,
    {
        let token = self.get_auth_token().await?;
        match call(token.access_token).await {
            Err(GatewayError::Authentication { message }) => {
                warn!(provider = PROVIDER, error = %message, "token rejected, refreshing");
                self.tokens.invalidate().await;
                let token = self.get_auth_token().await?;
                call(token.access_token).await
            }
            other => other,
        }
    }
}

/// ePay transaction states folded into the gateway vocabulary used by
/// callbacks.
pub fn normalize_status(status_name: &str) -> &'static str {
    match status_name.trim().to_ascii_uppercase().as_str() {
        "CHARGE" | "AUTH" => "success",
        "NEW" | "3D" | "PENDING" => "processing",
        "REJECT" | "DECLINED" => "declined",
        "CANCEL" | "CANCEL_OLD" => "cancelled",
        "REFUND" => "refunded",
        _ => "failed",
    }
}

#[async_trait]
impl PaymentGateway for EpayGateway {
    async fn get_auth_token(&self) -> GatewayResult<AuthToken> {
        if let Some(token) = self.tokens.get(Utc::now()).await {
            return Ok(token);
        }
        let token = self.fetch_token().await?;
        debug!(provider = PROVIDER, expires_at = %token.expires_at, "obtained gateway token");
        self.tokens.store(token.clone()).await;
        Ok(token)
    }

    async fn check_payment_status(&self, invoice_id: &str) -> GatewayResult<GatewayStatusResponse> {
        let url = self.endpoint(&format!("/check-status/payment/transaction/{}", invoice_id));
        let raw: JsonValue = self
            .authorized(|token| {
                let url = &url;
                async move {
                    self.http
                        .request_json::<JsonValue>(Method::GET, url, Some(&token), RequestBody::Empty)
                        .await
                }
            })
            .await?;

        let envelope: EpayStatusEnvelope =
            serde_json::from_value(raw.clone()).map_err(|e| GatewayError::Protocol {
                message: format!("invalid status response: {}", e),
            })?;
        if envelope.result_code != RESULT_OK {
            return Err(GatewayError::Provider {
                provider: PROVIDER.to_string(),
                message: envelope
                    .result_message
                    .unwrap_or_else(|| "status check failed".to_string()),
                provider_code: Some(envelope.result_code),
                retryable: false,
            });
        }
        let tx = envelope.transaction.ok_or_else(|| GatewayError::Protocol {
            message: "status response without transaction".to_string(),
        })?;

        Ok(GatewayStatusResponse {
            invoice_id: tx.invoice_id.unwrap_or_else(|| invoice_id.to_string()),
            status: normalize_status(&tx.status_name).to_string(),
            transaction_id: tx.id,
            amount: tx.amount.as_ref().and_then(amount_from_json),
            currency: tx.currency,
            card_mask: tx.card_mask,
            approval_code: tx.approval_code,
            reason: tx.reason,
            raw: Some(raw),
        })
    }

    async fn refund_payment(
        &self,
        transaction_id: &str,
        amount: Option<i64>,
        external_id: &str,
    ) -> GatewayResult<()> {
        let mut params = vec![("externalID", external_id.to_string())];
        if let Some(amount) = amount {
            params.push(("amount", format_major_units(amount)));
        }
        let url = Url::parse_with_params(
            &self.endpoint(&format!("/operation/{}/refund", transaction_id)),
            &params,
        )
        .map_err(|e| GatewayError::Protocol {
            message: format!("invalid refund url: {}", e),
        })?;
        let url = url.to_string();

        self.authorized(|token| {
            let url = &url;
            async move {
                self.http
                    .request_ok(Method::POST, url, Some(&token), RequestBody::Empty)
                    .await
            }
        })
        .await?;
        info!(provider = PROVIDER, transaction_id, ?amount, "refund accepted by gateway");
        Ok(())
    }

    async fn cancel_payment(&self, transaction_id: &str) -> GatewayResult<()> {
        let url = self.endpoint(&format!("/operation/{}/cancel", transaction_id));
        self.authorized(|token| {
            let url = &url;
            async move {
                self.http
                    .request_ok(Method::POST, url, Some(&token), RequestBody::Empty)
                    .await
            }
        })
        .await?;
        info!(provider = PROVIDER, transaction_id, "cancel accepted by gateway");
        Ok(())
    }

    async fn charge_card(&self, request: CardChargeRequest) -> GatewayResult<CardChargeResponse> {
        let url = self.endpoint("/payments/cards/auth");
        let payload = serde_json::json!({
            "amount": format_major_units(request.amount),
            "currency": request.currency,
            "name": request.member_id,
            "terminalId": self.config.terminal_id,
            "invoiceId": request.invoice_id,
            "description": request.description,
            "paymentType": "cardId",
            "cardId": { "id": request.card_token },
        });

        let raw: JsonValue = self
            .authorized(|token| {
                let (url, payload) = (&url, &payload);
                async move {
                    self.http
                        .request_json::<JsonValue>(
                            Method::POST,
                            url,
                            Some(&token),
                            RequestBody::Json(payload),
                        )
                        .await
                }
            })
            .await?;

        let charge: EpayChargeResponse =
            serde_json::from_value(raw.clone()).map_err(|e| GatewayError::Protocol {
                message: format!("invalid charge response: {}", e),
            })?;

        if let Some(code) = charge.code.as_ref().filter(|c| !c.is_null()) {
            let code = code.to_string().trim_matches('"').to_string();
            if code != "0" && code != RESULT_OK {
                return Err(GatewayError::Declined {
                    message: charge
                        .message
                        .clone()
                        .unwrap_or_else(|| "card charge declined".to_string()),
                    provider_code: Some(code),
                });
            }
        }

        let status = charge
            .status_name
            .as_deref()
            .or(charge.status.as_deref())
            .map(normalize_status)
            .unwrap_or("success");

        Ok(CardChargeResponse {
            transaction_id: charge.id,
            status: status.to_string(),
            card_mask: charge.card_mask,
            approval_code: charge.approval_code,
            reason: charge.message,
            raw: Some(raw),
        })
    }

    fn name(&self) -> &'static str {
        PROVIDER
    }
}

#[derive(Debug, Deserialize)]
struct EpayTokenResponse {
    access_token: String,
    token_type: Option<String>,
    expires_in: Option<JsonValue>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EpayStatusEnvelope {
    result_code: String,
    result_message: Option<String>,
    transaction: Option<EpayTransaction>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EpayTransaction {
    id: Option<String>,
    #[serde(rename = "invoiceID")]
    invoice_id: Option<String>,
    amount: Option<JsonValue>,
    currency: Option<String>,
    status_name: String,
    card_mask: Option<String>,
    approval_code: Option<String>,
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EpayChargeResponse {
    id: String,
    status: Option<String>,
    status_name: Option<String>,
    code: Option<JsonValue>,
    message: Option<String>,
    card_mask: Option<String>,
    approval_code: Option<String>,
}
