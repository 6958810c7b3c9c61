//! oasis conductor
//!
//! Serves the function and node pool API and runs one reconciliation loop per
//! in-flight stack operation.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use oasis_conductor::{
    api,
    conductor::{Conductor, ConductorSettings},
    config::{Config, StoreBackend},
    identity::KeystoneClient,
    orchestrator::HeatClient,
    state::AppState,
    store::{MemoryStore, PgResourceStore, ResourceStore},
    template::ExtraParameters,
};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

async fn open_store(config: &Config) -> Result<Arc<dyn ResourceStore>> {
    match config.store {
        StoreBackend::Memory => {
            warn!("Using in-memory resource store; state is lost on restart");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreBackend::Postgres => {
            let store = match PgResourceStore::connect(&config.database).await {
                Ok(store) => {
                    info!("Database connection established");
                    store
                }
                Err(e) => {
                    error!(error = %e, "Failed to connect to database");
                    return Err(e.into());
                }
            };
            if config.dev_mode {
                info!("Running database migrations (dev mode)");
                store.run_migrations().await?;
            }
            Ok(Arc::new(store))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    // Prefer RUST_LOG, fall back to OASIS_LOG_LEVEL.
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting oasis conductor");
    info!(
        listen_addr = %config.listen_addr,
        heat_url = %config.heat.url,
        wait_interval_secs = config.heat.poll.wait_interval.as_secs(),
        max_attempts = config.heat.poll.max_attempts,
        "Configuration loaded"
    );

    let store = open_store(&config).await?;
    let orchestrator = HeatClient::new(
        config.heat.url.clone(),
        Some(config.trust.keystone_token.clone()).filter(|t| !t.is_empty()),
    )
    .context("failed to build orchestrator client")?;
    let identity = KeystoneClient::new(
        config.trust.keystone_url.clone(),
        config.trust.keystone_token.clone(),
        config.trust.roles.clone(),
    )
    .context("failed to build identity client")?;

    let conductor = Arc::new(Conductor::new(
        Arc::new(orchestrator),
        Arc::new(identity),
        store,
        ConductorSettings {
            poll: config.heat.poll,
            create_timeout: config.heat.create_timeout,
            extra: ExtraParameters {
                trustee_domain_id: config.trust.trustee_domain_id.clone(),
                auth_url: config.trust.auth_url(),
            },
        },
    ));

    match conductor.resume_in_progress().await {
        Ok(0) => {}
        Ok(resumed) => info!(loops = resumed, "Resumed in-progress operations"),
        Err(e) => warn!(error = %e, "Failed to resume in-progress operations"),
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let app = api::create_router(AppState::new(conductor.clone()));
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(addr = %config.listen_addr, "Listening for connections");

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let mut shutdown_rx = shutdown_rx;
                let _ = shutdown_rx.wait_for(|stop| *stop).await;
                info!("HTTP server shutting down");
            })
            .await
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = server_handle => {
            match result {
                Ok(Ok(())) => info!("Server exited normally"),
                Ok(Err(e)) => error!(error = %e, "Server error"),
                Err(e) => error!(error = %e, "Server task panicked"),
            }
        }
    }

    let _ = shutdown_tx.send(true);

    info!("Waiting for reconciliation loops to stop...");
    conductor.shutdown(SHUTDOWN_TIMEOUT).await;

    info!("Conductor shutdown complete");
    Ok(())
}
