use thiserror::Error;

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Failures reported by a payment gateway adapter.
///
/// Callers treat every variant as retryable unless their own business checks
/// already rejected the operation; the variants exist for logging and for the
/// adapter's internal retry loop.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("Network error: {message}")]
    Network { message: String },

    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    #[error("Payment declined: {message}")]
    Declined {
        message: String,
        provider_code: Option<String>,
    },

    #[error("Rate limit exceeded: {message}")]
    RateLimit {
        message: String,
        retry_after_seconds: Option<u64>,
    },

    #[error("Malformed gateway response: {message}")]
    Protocol { message: String },

    #[error("Timed out after {seconds}s waiting for {operation}")]
    Timeout { operation: String, seconds: u64 },

    #[error("Provider error: provider={provider}, message={message}")]
    Provider {
        provider: String,
        message: String,
        provider_code: Option<String>,
        retryable: bool,
    },
}

impl GatewayError {
    /// Whether the adapter itself should repeat the HTTP call.
    pub fn is_transport_retryable(&self) -> bool {
        match self {
            GatewayError::Network { .. } => true,
            GatewayError::RateLimit { .. } => true,
            GatewayError::Timeout { .. } => true,
            GatewayError::Provider { retryable, .. } => *retryable,
            GatewayError::Authentication { .. }
            | GatewayError::Declined { .. }
            | GatewayError::Protocol { .. } => false,
        }
    }

    pub fn provider(&self) -> &str {
        match self {
            GatewayError::Provider { provider, .. } => provider,
            _ => "epay",
        }
    }

    pub fn provider_code(&self) -> Option<&str> {
        match self {
            GatewayError::Declined { provider_code, .. }
            | GatewayError::Provider { provider_code, .. } => provider_code.as_deref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_retry_flags() {
        assert!(GatewayError::Network {
            message: "reset".to_string()
        }
        .is_transport_retryable());
        assert!(!GatewayError::Declined {
            message: "insufficient funds".to_string(),
            provider_code: Some("05".to_string())
        }
        .is_transport_retryable());
        assert!(!GatewayError::Protocol {
            message: "bad json".to_string()
        }
        .is_transport_retryable());
    }

    #[test]
    fn declined_exposes_provider_code() {
        let err = GatewayError::Declined {
            message: "do not honor".to_string(),
            provider_code: Some("05".to_string()),
        };
        assert_eq!(err.provider_code(), Some("05"));
        assert_eq!(err.provider(), "epay");
    }
}
