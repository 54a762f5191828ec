use anyhow::Context;
use library_backend::api::{self, AppState};
use library_backend::config::AppConfig;
use library_backend::database::Repositories;
use library_backend::health::HealthChecker;
use library_backend::logging::init_tracing;
use library_backend::payments::factory::GatewaySetup;
use library_backend::services::PaymentServices;
use library_backend::workers::Scheduler;
use std::net::SocketAddr;
use tokio::signal;
use tracing::{error, info, warn};

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("failed to load configuration")?;
    config.validate().context("invalid configuration")?;
    init_tracing(&config.logging);

    info!(
        skip_externals = config.skip_externals,
        host = %config.server.host,
        port = config.server.port,
        "starting library backend"
    );

    let gateway_setup = GatewaySetup::from_env(config.skip_externals)
        .context("failed to configure payment gateway")?;
    let mut health = HealthChecker::new(gateway_setup.gateway.clone());

    let repositories = match &config.database {
        #[cfg(feature = "database")]
        Some(db_config) => {
            let pool = library_backend::database::init_pool_from_config(db_config)
                .await
                .context("failed to connect to database")?;
            health = health.with_database(pool.clone());
            Repositories::postgres(pool)
        }
        #[cfg(not(feature = "database"))]
        Some(_) => {
            warn!("built without the database feature, using in-memory storage");
            Repositories::in_memory()
        }
        None => {
            warn!("SKIP_EXTERNALS set, using in-memory storage");
            Repositories::in_memory()
        }
    };

    let services = PaymentServices::new(&repositories, gateway_setup.gateway.clone(), &config.payments);

    let mut scheduler = Scheduler::new(services.clone(), config.worker.clone());
    scheduler.start().context("failed to start background workers")?;

    let app = api::router(AppState {
        services,
        health,
        webhook_secret: gateway_setup.webhook_secret,
    });

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("invalid server address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    info!(address = %addr, "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    if let Err(e) = scheduler.shutdown().await {
        warn!(error = %e, "background workers did not stop cleanly");
    }

    info!("server shutdown complete");
    Ok(())
}
