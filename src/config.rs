//! Application configuration module
//! Loads settings from environment variables and validates them at startup

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::domain::callback_retry::RetryPolicy;

/// Main application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    /// Absent when running with in-memory storage
    pub database: Option<DatabaseConfig>,
    pub logging: LoggingConfig,
    pub payments: PaymentsConfig,
    pub worker: WorkerConfig,
    pub skip_externals: bool,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout: u64,   // seconds
    pub idle_timeout: Option<u64>, // seconds
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log format options
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Plain,
}

/// Payment lifecycle settings
#[derive(Debug, Clone)]
pub struct PaymentsConfig {
    pub payment_expiry_minutes: i64,
    pub refund_window_days: i64,
    pub callback_max_retries: i32,
    pub callback_retry_base_secs: i64,
    pub callback_retry_max_delay_secs: i64,
    pub callback_retry_timeout_hours: i64,
    /// Bound on the status check made while handling a callback
    pub callback_gateway_timeout_secs: u64,
    pub callback_verify_with_gateway: bool,
    pub checkout_base_url: String,
}

/// Background job settings
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub expiry_interval_secs: u64,
    pub callback_retry_interval_secs: u64,
    pub expiry_batch_size: i64,
    pub callback_retry_batch_size: i64,
    pub job_timeout_secs: u64,
    pub shutdown_grace_secs: u64,
}

fn env_flag(name: &str, default: bool) -> bool {
    env::var(name)
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(default)
}

fn env_or<T: FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(name.to_string())),
        Err(_) => Ok(default),
    }
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenv::dotenv().ok();

        let skip_externals = env_flag("SKIP_EXTERNALS", false);
        let database = if skip_externals {
            None
        } else {
            Some(DatabaseConfig::from_env()?)
        };

        Ok(AppConfig {
            server: ServerConfig::from_env()?,
            database,
            logging: LoggingConfig::from_env()?,
            payments: PaymentsConfig::from_env()?,
            worker: WorkerConfig::from_env()?,
            skip_externals,
        })
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        if let Some(database) = &self.database {
            database.validate()?;
        }
        self.logging.validate()?;
        self.payments.validate()?;
        self.worker.validate()?;

        Ok(())
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(ServerConfig {
            host: env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env_or("SERVER_PORT", 8000)?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidValue(
                "SERVER_PORT cannot be 0".to_string(),
            ));
        }

        if self.host.is_empty() {
            return Err(ConfigError::InvalidValue(
                "SERVER_HOST cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(DatabaseConfig {
            url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::MissingVariable("DATABASE_URL".to_string()))?,
            max_connections: env_or("DB_MAX_CONNECTIONS", 20)?,
            min_connections: env_or("DB_MIN_CONNECTIONS", 5)?,
            connection_timeout: env_or("DB_CONNECTION_TIMEOUT", 30)?,
            idle_timeout: env::var("DB_IDLE_TIMEOUT")
                .ok()
                .and_then(|val| val.parse().ok()),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::InvalidValue("DATABASE_URL".to_string()));
        }

        if self.max_connections == 0 {
            return Err(ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()));
        }

        if self.min_connections > self.max_connections {
            return Err(ConfigError::InvalidValue(
                "DB_MIN_CONNECTIONS must be <= DB_MAX_CONNECTIONS".to_string(),
            ));
        }

        Ok(())
    }
}

impl LoggingConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "plain".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Plain,
            },
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["TRACE", "DEBUG", "INFO", "WARN", "ERROR"];
        if !valid_levels.contains(&self.level.to_uppercase().as_str()) {
            return Err(ConfigError::InvalidValue("LOG_LEVEL".to_string()));
        }

        Ok(())
    }
}

impl Default for PaymentsConfig {
    fn default() -> Self {
        Self {
            payment_expiry_minutes: 30,
            refund_window_days: 30,
            callback_max_retries: 5,
            callback_retry_base_secs: 60,
            callback_retry_max_delay_secs: 3600,
            callback_retry_timeout_hours: 24,
            callback_gateway_timeout_secs: 10,
            callback_verify_with_gateway: true,
            checkout_base_url: "https://checkout.example.com/pay".to_string(),
        }
    }
}

impl PaymentsConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(PaymentsConfig {
            payment_expiry_minutes: env_or("PAYMENT_EXPIRY_MINUTES", defaults.payment_expiry_minutes)?,
            refund_window_days: env_or("REFUND_WINDOW_DAYS", defaults.refund_window_days)?,
            callback_max_retries: env_or("CALLBACK_MAX_RETRIES", defaults.callback_max_retries)?,
            callback_retry_base_secs: env_or(
                "CALLBACK_RETRY_BASE_SECS",
                defaults.callback_retry_base_secs,
            )?,
            callback_retry_max_delay_secs: env_or(
                "CALLBACK_RETRY_MAX_DELAY_SECS",
                defaults.callback_retry_max_delay_secs,
            )?,
            callback_retry_timeout_hours: env_or(
                "CALLBACK_RETRY_TIMEOUT_HOURS",
                defaults.callback_retry_timeout_hours,
            )?,
            callback_gateway_timeout_secs: env_or(
                "CALLBACK_GATEWAY_TIMEOUT_SECS",
                defaults.callback_gateway_timeout_secs,
            )?,
            callback_verify_with_gateway: env_flag(
                "CALLBACK_VERIFY_WITH_GATEWAY",
                defaults.callback_verify_with_gateway,
            ),
            checkout_base_url: env::var("CHECKOUT_BASE_URL").unwrap_or(defaults.checkout_base_url),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.payment_expiry_minutes <= 0 {
            return Err(ConfigError::InvalidValue("PAYMENT_EXPIRY_MINUTES".to_string()));
        }
        if self.refund_window_days < 0 {
            return Err(ConfigError::InvalidValue("REFUND_WINDOW_DAYS".to_string()));
        }
        if self.callback_max_retries <= 0 {
            return Err(ConfigError::InvalidValue("CALLBACK_MAX_RETRIES".to_string()));
        }
        if self.callback_retry_base_secs <= 0
            || self.callback_retry_max_delay_secs < self.callback_retry_base_secs
        {
            return Err(ConfigError::ValidationFailed(
                "CALLBACK_RETRY_MAX_DELAY_SECS must be >= CALLBACK_RETRY_BASE_SECS > 0".to_string(),
            ));
        }
        if self.callback_gateway_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "CALLBACK_GATEWAY_TIMEOUT_SECS".to_string(),
            ));
        }
        if !self.checkout_base_url.starts_with("http://")
            && !self.checkout_base_url.starts_with("https://")
        {
            return Err(ConfigError::InvalidValue(
                "CHECKOUT_BASE_URL must be a valid URL".to_string(),
            ));
        }

        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.callback_max_retries,
            base_delay: chrono::Duration::seconds(self.callback_retry_base_secs),
            max_delay: chrono::Duration::seconds(self.callback_retry_max_delay_secs),
            timeout: chrono::Duration::hours(self.callback_retry_timeout_hours),
        }
    }

    pub fn payment_ttl(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.payment_expiry_minutes)
    }

    pub fn refund_window(&self) -> chrono::Duration {
        chrono::Duration::days(self.refund_window_days)
    }

    pub fn gateway_timeout(&self) -> Duration {
        Duration::from_secs(self.callback_gateway_timeout_secs)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            expiry_interval_secs: 300,
            callback_retry_interval_secs: 120,
            expiry_batch_size: 100,
            callback_retry_batch_size: 50,
            job_timeout_secs: 60,
            shutdown_grace_secs: 5,
        }
    }
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(WorkerConfig {
            expiry_interval_secs: env_or("EXPIRY_INTERVAL_SECS", defaults.expiry_interval_secs)?,
            callback_retry_interval_secs: env_or(
                "CALLBACK_RETRY_INTERVAL_SECS",
                defaults.callback_retry_interval_secs,
            )?,
            expiry_batch_size: env_or("EXPIRY_BATCH_SIZE", defaults.expiry_batch_size)?,
            callback_retry_batch_size: env_or(
                "CALLBACK_RETRY_BATCH_SIZE",
                defaults.callback_retry_batch_size,
            )?,
            job_timeout_secs: env_or("WORKER_JOB_TIMEOUT_SECS", defaults.job_timeout_secs)?,
            shutdown_grace_secs: env_or("SHUTDOWN_GRACE_SECS", defaults.shutdown_grace_secs)?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.expiry_interval_secs == 0 || self.callback_retry_interval_secs == 0 {
            return Err(ConfigError::ValidationFailed(
                "worker intervals must be greater than zero".to_string(),
            ));
        }
        if self.expiry_batch_size <= 0 || self.callback_retry_batch_size <= 0 {
            return Err(ConfigError::ValidationFailed(
                "worker batch sizes must be greater than zero".to_string(),
            ));
        }
        if self.job_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue("WORKER_JOB_TIMEOUT_SECS".to_string()));
        }

        Ok(())
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),

    #[error("Invalid value for configuration: {0}")]
    InvalidValue(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}
