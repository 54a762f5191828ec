use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::services::ExpirePaymentsService;

#[derive(Debug, Clone)]
pub struct PaymentExpiryConfig {
    pub interval: Duration,
    pub batch_size: i64,
    pub job_timeout: Duration,
}

/// Periodically fails payments left open past their deadline.
pub struct PaymentExpiryWorker {
    service: Arc<ExpirePaymentsService>,
    config: PaymentExpiryConfig,
}

impl PaymentExpiryWorker {
    pub fn new(service: Arc<ExpirePaymentsService>, config: PaymentExpiryConfig) -> Self {
        Self { service, config }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            batch_size = self.config.batch_size,
            "payment expiry worker started"
        );

        let mut ticker = tokio::time::interval(self.config.interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.run_cycle().await,
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("payment expiry worker received shutdown signal");
                        break;
                    }
                }
            }
        }

        info!("payment expiry worker stopped");
    }

    async fn run_cycle(&self) {
        match tokio::time::timeout(self.config.job_timeout, self.service.execute(self.config.batch_size)).await {
            Ok(Ok(result)) => {
                for err in &result.errors {
                    warn!(error = %err, "payment expiry item failed");
                }
            }
            Ok(Err(e)) => error!(error = %e, "payment expiry cycle failed"),
            Err(_) => warn!(
                timeout_secs = self.config.job_timeout.as_secs(),
                "payment expiry cycle timed out"
            ),
        }
    }
}
