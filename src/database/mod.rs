pub mod error;
pub mod memory;
pub mod repository;

#[cfg(feature = "database")]
pub mod callback_retry_repository;
#[cfg(feature = "database")]
pub mod member_repository;
#[cfg(feature = "database")]
pub mod payment_repository;
#[cfg(feature = "database")]
pub mod receipt_repository;
#[cfg(feature = "database")]
pub mod saved_card_repository;

use std::sync::Arc;

use self::memory::{
    InMemoryCallbackRetryRepository, InMemoryMemberRepository, InMemoryPaymentRepository,
    InMemoryReceiptRepository, InMemorySavedCardRepository,
};
use self::repository::{
    CallbackRetryRepository, MemberRepository, PaymentRepository, ReceiptRepository,
    SavedCardRepository,
};

/// Every persistence port the use cases need, behind trait objects
#[derive(Clone)]
pub struct Repositories {
    pub payments: Arc<dyn PaymentRepository>,
    pub callback_retries: Arc<dyn CallbackRetryRepository>,
    pub saved_cards: Arc<dyn SavedCardRepository>,
    pub receipts: Arc<dyn ReceiptRepository>,
    pub members: Arc<dyn MemberRepository>,
}

impl Repositories {
    pub fn in_memory() -> Self {
        Self {
            payments: Arc::new(InMemoryPaymentRepository::new()),
            callback_retries: Arc::new(InMemoryCallbackRetryRepository::new()),
            saved_cards: Arc::new(InMemorySavedCardRepository::new()),
            receipts: Arc::new(InMemoryReceiptRepository::new()),
            members: Arc::new(InMemoryMemberRepository::new()),
        }
    }

    #[cfg(feature = "database")]
    pub fn postgres(pool: sqlx::PgPool) -> Self {
        Self {
            payments: Arc::new(payment_repository::PgPaymentRepository::new(pool.clone())),
            callback_retries: Arc::new(callback_retry_repository::PgCallbackRetryRepository::new(
                pool.clone(),
            )),
            saved_cards: Arc::new(saved_card_repository::PgSavedCardRepository::new(pool.clone())),
            receipts: Arc::new(receipt_repository::PgReceiptRepository::new(pool.clone())),
            members: Arc::new(member_repository::PgMemberRepository::new(pool)),
        }
    }
}

#[cfg(feature = "database")]
pub use self::pool::{health_check, init_pool, init_pool_from_config, PoolConfig};

#[cfg(feature = "database")]
mod pool {
    use sqlx::postgres::PgPoolOptions;
    use sqlx::PgPool;
    use std::time::Duration;
    use tracing::{error as log_error, info, warn};

    use super::error::DatabaseError;
    use crate::config::DatabaseConfig;

    /// Database pool configuration
    #[derive(Debug, Clone)]
    pub struct PoolConfig {
        pub max_connections: u32,
        pub min_connections: u32,
        pub connection_timeout: Duration,
        pub idle_timeout: Duration,
        pub max_lifetime: Duration,
    }

    impl Default for PoolConfig {
        fn default() -> Self {
            Self {
                max_connections: 20,
                min_connections: 5,
                connection_timeout: Duration::from_secs(30),
                idle_timeout: Duration::from_secs(600),
                max_lifetime: Duration::from_secs(1800),
            }
        }
    }

    /// Initialize the database connection pool
    pub async fn init_pool(
        database_url: &str,
        config: Option<PoolConfig>,
    ) -> Result<PgPool, DatabaseError> {
        let config = config.unwrap_or_default();

        info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            connection_timeout = ?config.connection_timeout,
            "Initializing database pool"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connection_timeout)
            .idle_timeout(config.idle_timeout)
            .max_lifetime(config.max_lifetime)
            .connect(database_url)
            .await
            .map_err(|e| {
                log_error!(error = %e, "Failed to initialize database pool");
                DatabaseError::from_sqlx(e)
            })?;

        pool.acquire().await.map_err(|e| {
            log_error!(error = %e, "Failed to acquire test connection");
            DatabaseError::from_sqlx(e)
        })?;

        info!("Database pool initialized");
        Ok(pool)
    }

    /// Connection pool health check
    pub async fn health_check(pool: &PgPool) -> Result<(), DatabaseError> {
        sqlx::query("SELECT 1").fetch_one(pool).await.map_err(|e| {
            warn!(error = %e, "Database health check failed");
            DatabaseError::from_sqlx(e)
        })?;

        Ok(())
    }

    /// Initialize the database pool from application configuration
    pub async fn init_pool_from_config(config: &DatabaseConfig) -> Result<PgPool, DatabaseError> {
        let pool_config = PoolConfig {
            max_connections: config.max_connections,
            min_connections: config.min_connections,
            connection_timeout: Duration::from_secs(config.connection_timeout),
            idle_timeout: Duration::from_secs(config.idle_timeout.unwrap_or(600)),
            ..PoolConfig::default()
        };

        init_pool(&config.url, Some(pool_config)).await
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_default_pool_config() {
            let config = PoolConfig::default();
            assert_eq!(config.max_connections, 20);
            assert_eq!(config.min_connections, 5);
            assert_eq!(config.connection_timeout, Duration::from_secs(30));
        }
    }
}
