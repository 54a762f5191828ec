//! Background jobs. One process runs every worker on its own ticker; each
//! job run is bounded by a timeout and every job is safe to resume from a
//! cold start.

pub mod callback_retry;
pub mod payment_expiry;

use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::WorkerConfig;
use crate::services::PaymentServices;

pub use callback_retry::{CallbackRetryConfig, CallbackRetryWorker};
pub use payment_expiry::{PaymentExpiryConfig, PaymentExpiryWorker};

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("scheduler already started")]
    AlreadyStarted,

    #[error("workers did not stop within {grace_secs}s")]
    ShutdownTimeout { grace_secs: u64 },

    #[error("worker task failed: {0}")]
    Join(String),
}

/// Owns the worker tasks and their shutdown channel.
pub struct Scheduler {
    services: PaymentServices,
    config: WorkerConfig,
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(services: PaymentServices, config: WorkerConfig) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            services,
            config,
            shutdown_tx,
            handles: Vec::new(),
        }
    }

    pub fn start(&mut self) -> Result<(), SchedulerError> {
        if !self.handles.is_empty() {
            return Err(SchedulerError::AlreadyStarted);
        }
        let job_timeout = Duration::from_secs(self.config.job_timeout_secs);

        let expiry = PaymentExpiryWorker::new(
            self.services.expiry.clone(),
            PaymentExpiryConfig {
                interval: Duration::from_secs(self.config.expiry_interval_secs),
                batch_size: self.config.expiry_batch_size,
                job_timeout,
            },
        );
        self.handles
            .push(tokio::spawn(expiry.run(self.shutdown_tx.subscribe())));

        let retries = CallbackRetryWorker::new(
            self.services.callback_retries.clone(),
            CallbackRetryConfig {
                interval: Duration::from_secs(self.config.callback_retry_interval_secs),
                batch_size: self.config.callback_retry_batch_size,
                job_timeout,
            },
        );
        self.handles
            .push(tokio::spawn(retries.run(self.shutdown_tx.subscribe())));

        info!(workers = self.handles.len(), "scheduler started");
        Ok(())
    }

    /// Signal every worker and wait up to the grace period for in-flight runs.
    pub async fn shutdown(mut self) -> Result<(), SchedulerError> {
        let grace_secs = self.config.shutdown_grace_secs;
        // Ignored: no receivers left means every worker already exited.
        let _ = self.shutdown_tx.send(true);

        let handles = std::mem::take(&mut self.handles);
        let joined = tokio::time::timeout(
            Duration::from_secs(grace_secs),
            futures::future::join_all(handles),
        )
        .await
        .map_err(|_| {
            warn!(grace_secs, "workers still running after grace period");
            SchedulerError::ShutdownTimeout { grace_secs }
        })?;

        for result in joined {
            result.map_err(|e| SchedulerError::Join(e.to_string()))?;
        }
        info!("scheduler stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PaymentsConfig;
    use crate::database::Repositories;
    use crate::payments::providers::MockGateway;
    use std::sync::Arc;

    fn scheduler() -> Scheduler {
        let services = PaymentServices::new(
            &Repositories::in_memory(),
            Arc::new(MockGateway::new()),
            &PaymentsConfig::default(),
        );
        Scheduler::new(services, WorkerConfig::default())
    }

    #[tokio::test]
    async fn starts_once_and_stops_within_grace() {
        let mut scheduler = scheduler();
        scheduler.start().unwrap();
        assert!(matches!(scheduler.start(), Err(SchedulerError::AlreadyStarted)));

        tokio::time::sleep(Duration::from_millis(50)).await;
        scheduler.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_without_start_is_ok() {
        scheduler().shutdown().await.unwrap();
    }
}
