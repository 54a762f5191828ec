use crate::config::ConfigError;
use crate::payments::provider::PaymentGateway;
use crate::payments::providers::{EpayConfig, EpayGateway, MockGateway};
use std::str::FromStr;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayKind {
    Epay,
    Mock,
}

impl FromStr for GatewayKind {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "epay" => Ok(GatewayKind::Epay),
            "mock" => Ok(GatewayKind::Mock),
            _ => Err(ConfigError::InvalidValue(format!(
                "PAYMENT_GATEWAY must be 'epay' or 'mock', got '{}'",
                value
            ))),
        }
    }
}

/// A constructed gateway plus the webhook secret its callbacks are signed with
pub struct GatewaySetup {
    pub gateway: Arc<dyn PaymentGateway>,
    pub webhook_secret: Option<String>,
}

impl GatewaySetup {
    /// `PAYMENT_GATEWAY` picks the adapter; `SKIP_EXTERNALS` forces the mock.
    pub fn from_env(skip_externals: bool) -> Result<Self, ConfigError> {
        let kind = if skip_externals {
            GatewayKind::Mock
        } else {
            std::env::var("PAYMENT_GATEWAY")
                .unwrap_or_else(|_| "epay".to_string())
                .parse()?
        };
        Self::build(kind)
    }

    pub fn build(kind: GatewayKind) -> Result<Self, ConfigError> {
        match kind {
            GatewayKind::Mock => Ok(Self {
                gateway: Arc::new(MockGateway::new()),
                webhook_secret: std::env::var("EPAY_WEBHOOK_SECRET")
                    .ok()
                    .filter(|v| !v.trim().is_empty()),
            }),
            GatewayKind::Epay => {
                let config = EpayConfig::from_env()?;
                let webhook_secret = config.webhook_secret.clone();
                let gateway = EpayGateway::new(config)
                    .map_err(|e| ConfigError::ValidationFailed(e.to_string()))?;
                Ok(Self {
                    gateway: Arc::new(gateway),
                    webhook_secret,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_kind_parses() {
        assert_eq!("epay".parse::<GatewayKind>().unwrap(), GatewayKind::Epay);
        assert_eq!(" MOCK ".parse::<GatewayKind>().unwrap(), GatewayKind::Mock);
        assert!("stripe".parse::<GatewayKind>().is_err());
    }

    #[test]
    fn mock_setup_builds_without_credentials() {
        let setup = GatewaySetup::build(GatewayKind::Mock).unwrap();
        assert_eq!(setup.gateway.name(), "mock");
    }
}
