use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::services::CallbackRetryService;

#[derive(Debug, Clone)]
pub struct CallbackRetryConfig {
    pub interval: Duration,
    pub batch_size: i64,
    pub job_timeout: Duration,
}

pub struct CallbackRetryWorker {
    service: Arc<CallbackRetryService>,
    config: CallbackRetryConfig,
}

impl CallbackRetryWorker {
    pub fn new(service: Arc<CallbackRetryService>, config: CallbackRetryConfig) -> Self {
        Self { service, config }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            batch_size = self.config.batch_size,
            "callback retry worker started"
        );

        let mut ticker = tokio::time::interval(self.config.interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.run_cycle().await,
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("callback retry worker received shutdown signal");
                        break;
                    }
                }
            }
        }

        info!("callback retry worker stopped");
    }

    async fn run_cycle(&self) {
        match tokio::time::timeout(self.config.job_timeout, self.service.process_due(self.config.batch_size)).await {
            Ok(Ok(result)) => {
                if result.processed_count > 0 {
                    info!(
                        processed = result.processed_count,
                        succeeded = result.success_count,
                        failed = result.failed_count,
                        permanently_failed = result.permanently_failed.len(),
                        "callback retries processed"
                    );
                }
            }
            Ok(Err(e)) => error!(error = %e, "callback retry cycle failed"),
            Err(_) => warn!(
                timeout_secs = self.config.job_timeout.as_secs(),
                "callback retry cycle timed out"
            ),
        }
    }
}
