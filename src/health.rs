//! Health check module
//! Reports the state of the database (when one is configured) and the payment gateway

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{error, warn};

use crate::payments::provider::PaymentGateway;

const CHECK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Serialize, Clone)]
pub struct HealthStatus {
    pub status: HealthState,
    pub checks: HashMap<String, ComponentHealth>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Serialize, Clone)]
pub struct ComponentHealth {
    pub status: ComponentState,
    pub response_time_ms: Option<u128>,
    pub details: Option<String>,
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
pub enum ComponentState {
    Up,
    Down,
}

impl HealthStatus {
    fn new() -> Self {
        Self {
            status: HealthState::Healthy,
            checks: HashMap::new(),
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthState::Healthy
    }
}

impl ComponentHealth {
    fn up(response_time_ms: u128) -> Self {
        Self {
            status: ComponentState::Up,
            response_time_ms: Some(response_time_ms),
            details: None,
        }
    }

    fn down(details: String) -> Self {
        Self {
            status: ComponentState::Down,
            response_time_ms: None,
            details: Some(details),
        }
    }
}

#[derive(Clone)]
pub struct HealthChecker {
    #[cfg(feature = "database")]
    db_pool: Option<sqlx::PgPool>,
    gateway: Arc<dyn PaymentGateway>,
}

impl HealthChecker {
    pub fn new(gateway: Arc<dyn PaymentGateway>) -> Self {
        Self {
            #[cfg(feature = "database")]
            db_pool: None,
            gateway,
        }
    }

    #[cfg(feature = "database")]
    pub fn with_database(mut self, pool: sqlx::PgPool) -> Self {
        self.db_pool = Some(pool);
        self
    }

    /// A down database makes the service unhealthy; a down gateway only
    /// degrades it, since callbacks and receipts still work.
    pub async fn check_health(&self) -> HealthStatus {
        let mut health = HealthStatus::new();

        #[cfg(feature = "database")]
        if let Some(pool) = &self.db_pool {
            let component = probe("database", crate::database::health_check(pool)).await;
            if component.status == ComponentState::Down {
                health.status = HealthState::Unhealthy;
            }
            health.checks.insert("database".to_string(), component);
        }

        let gateway = probe("gateway", self.gateway.get_auth_token()).await;
        if gateway.status == ComponentState::Down && health.status == HealthState::Healthy {
            health.status = HealthState::Degraded;
        }
        health.checks.insert(format!("gateway:{}", self.gateway.name()), gateway);

        health
    }
}

async fn probe<T, E, F>(component: &str, check: F) -> ComponentHealth
where
    E: std::fmt::Display,
    F: std::future::Future<Output = Result<T, E>>,
{
    let started = Instant::now();
    match timeout(CHECK_TIMEOUT, check).await {
        Ok(Ok(_)) => ComponentHealth::up(started.elapsed().as_millis()),
        Ok(Err(e)) => {
            error!(component, error = %e, "health check failed");
            ComponentHealth::down(e.to_string())
        }
        Err(_) => {
            warn!(component, "health check timed out");
            ComponentHealth::down("Timeout".to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::error::GatewayError;
    use crate::payments::providers::mock::{GatewayOp, MockGateway};

    #[tokio::test]
    async fn healthy_with_working_gateway() {
        let checker = HealthChecker::new(Arc::new(MockGateway::new()));
        let health = checker.check_health().await;
        assert!(health.is_healthy());
        assert_eq!(health.checks["gateway:mock"].status, ComponentState::Up);
    }

    #[tokio::test]
    async fn gateway_outage_degrades() {
        let gateway = Arc::new(MockGateway::new());
        gateway
            .fail_on(
                GatewayOp::AuthToken,
                GatewayError::Authentication {
                    message: "bad credentials".to_string(),
                },
            )
            .await;

        let health = HealthChecker::new(gateway).check_health().await;
        assert_eq!(health.status, HealthState::Degraded);
        assert_eq!(health.checks["gateway:mock"].status, ComponentState::Down);
    }
}
