use crate::payments::error::{GatewayError, GatewayResult};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::warn;

/// Request body variants the gateway endpoints accept
#[derive(Debug, Clone, Copy)]
pub enum RequestBody<'a> {
    Empty,
    Json(&'a JsonValue),
    Form(&'a [(&'a str, &'a str)]),
}

#[derive(Clone)]
pub struct PaymentHttpClient {
    client: Client,
    provider: &'static str,
    timeout: Duration,
    max_retries: u32,
}

impl PaymentHttpClient {
    pub fn new(provider: &'static str, timeout: Duration, max_retries: u32) -> GatewayResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Network {
                message: format!("failed to initialize HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            provider,
            timeout,
            max_retries,
        })
    }

    pub async fn request_json<T: DeserializeOwned>(
        &self,
        method: Method,
        url: &str,
        bearer_token: Option<&str>,
        body: RequestBody<'_>,
    ) -> GatewayResult<T> {
        let text = self.send(method, url, bearer_token, body).await?;
        serde_json::from_str::<T>(&text).map_err(|e| GatewayError::Protocol {
            message: format!("invalid {} JSON response: {}", self.provider, e),
        })
    }

    /// For endpoints whose success body carries nothing we need.
    pub async fn request_ok(
        &self,
        method: Method,
        url: &str,
        bearer_token: Option<&str>,
        body: RequestBody<'_>,
    ) -> GatewayResult<()> {
        self.send(method, url, bearer_token, body).await.map(|_| ())
    }

    /// Sends with retries on 429, 5xx and transport errors; returns the body
    /// of the first successful response.
    async fn send(
        &self,
        method: Method,
        url: &str,
        bearer_token: Option<&str>,
        body: RequestBody<'_>,
    ) -> GatewayResult<String> {
        let mut last_error = None;
        for attempt in 0..=self.max_retries {
            let mut request = self.client.request(method.clone(), url).timeout(self.timeout);

            if let Some(token) = bearer_token {
                request = request.bearer_auth(token);
            }
            request = match body {
                RequestBody::Empty => request,
                RequestBody::Json(payload) => request.json(payload),
                RequestBody::Form(fields) => request.form(fields),
            };

            let response = match request.send().await {
                Ok(resp) => resp,
                Err(e) => {
                    let err = if e.is_timeout() {
                        GatewayError::Timeout {
                            operation: format!("{} {}", method, url),
                            seconds: self.timeout.as_secs(),
                        }
                    } else {
                        GatewayError::Network {
                            message: format!("{} request failed: {}", self.provider, e),
                        }
                    };
                    last_error = Some(err);
                    if attempt < self.max_retries {
                        tokio::time::sleep(backoff(attempt)).await;
                        continue;
                    }
                    break;
                }
            };

            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            if status.is_success() {
                return Ok(text);
            }

            if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                return Err(GatewayError::Authentication {
                    message: format!("HTTP {}: {}", status, text),
                });
            }

            if status == StatusCode::TOO_MANY_REQUESTS {
                if attempt < self.max_retries {
                    tokio::time::sleep(backoff(attempt)).await;
                    continue;
                }
                return Err(GatewayError::RateLimit {
                    message: format!("{} rate limit exceeded", self.provider),
                    retry_after_seconds: None,
                });
            }

            if status.is_server_error() && attempt < self.max_retries {
                warn!(
                    provider = self.provider,
                    status = %status,
                    attempt = attempt + 1,
                    "gateway server error, retrying"
                );
                tokio::time::sleep(backoff(attempt)).await;
                continue;
            }

            return Err(GatewayError::Provider {
                provider: self.provider.to_string(),
                message: format!("HTTP {}: {}", status, text),
                provider_code: Some(status.as_u16().to_string()),
                retryable: status.is_server_error(),
            });
        }

        Err(last_error.unwrap_or(GatewayError::Network {
            message: format!("{} request failed", self.provider),
        }))
    }
}

fn backoff(attempt: u32) -> Duration {
    Duration::from_secs(1 << attempt.min(5))
}

/// Parse a decimal major-unit string (`"100.5"`) into minor units (`10050`)
/// without going through floating point.
pub fn parse_major_units(value: &str) -> Option<i64> {
    let value = value.trim();
    let (negative, digits) = match value.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, value),
    };
    let (whole, fraction) = match digits.split_once('.') {
        Some((w, f)) => (w, f),
        None => (digits, ""),
    };
    if whole.is_empty() && fraction.is_empty() {
        return None;
    }
    if !whole.chars().all(|c| c.is_ascii_digit()) || !fraction.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    // more than two decimals would lose money
    if fraction.len() > 2 && fraction[2..].chars().any(|c| c != '0') {
        return None;
    }

    let whole: i64 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let cents: i64 = match fraction.len() {
        0 => 0,
        1 => fraction.parse::<i64>().ok()? * 10,
        _ => fraction[..2].parse().ok()?,
    };
    let minor = whole.checked_mul(100)?.checked_add(cents)?;
    Some(if negative { -minor } else { minor })
}

/// Inverse of `parse_major_units`: `10050` becomes `"100.50"`.
pub fn format_major_units(minor: i64) -> String {
    let sign = if minor < 0 { "-" } else { "" };
    let abs = minor.unsigned_abs();
    format!("{}{}.{:02}", sign, abs / 100, abs % 100)
}

/// Gateways send amounts either as JSON numbers in major units or as decimal
/// strings. Integers are taken as major units too.
pub fn amount_from_json(value: &JsonValue) -> Option<i64> {
    match value {
        JsonValue::String(s) => parse_major_units(s),
        JsonValue::Number(n) => parse_major_units(&n.to_string()),
        _ => None,
    }
}

pub fn verify_hmac_sha512_hex(payload: &[u8], secret: &str, signature: &str) -> bool {
    use hmac::{Hmac, Mac};
    use sha2::Sha512;

    type HmacSha512 = Hmac<Sha512>;
    let mut mac = match HmacSha512::new_from_slice(secret.as_bytes()) {
        Ok(v) => v,
        Err(_) => return false,
    };
    mac.update(payload);
    let computed = hex::encode(mac.finalize().into_bytes());
    secure_eq(computed.as_bytes(), signature.trim().to_ascii_lowercase().as_bytes())
}

pub fn secure_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .fold(0_u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}
