use anyhow::{Context, Result};
use qrdocs_service::config::Config;
use qrdocs_service::{
    blob_store, start_api_server, AppState, DocumentLifecycle, DocumentStore,
    ReloadableBaseAddress, TokenAuthorizer,
};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        base_address = %config.site.base_address,
        "Starting QR Docs service"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    // Initialize components
    let document_store = Arc::new(
        DocumentStore::new(&config.database)
            .await
            .context("Failed to initialize document store")?,
    );

    // Run migrations if enabled
    if config.database.run_migrations {
        document_store
            .run_migrations()
            .await
            .context("Failed to run database migrations")?;
    }

    let blobs = blob_store::connect(&config.storage).await?;
    let base_address = Arc::new(ReloadableBaseAddress::from_config(&config.site));

    let lifecycle = Arc::new(DocumentLifecycle::from_config(
        &config,
        document_store.clone(),
        blobs,
        base_address.clone(),
    ));

    if config.api.admins.is_empty() {
        warn!("No administrators configured; admin API will refuse every request");
    }

    let api_state = AppState {
        lifecycle,
        authorizer: Arc::new(TokenAuthorizer::new(config.api.admins.clone())),
    };

    // Spawn base address reload task
    let reload_handle = tokio::spawn(reload_on_hangup(base_address));

    // Run API server until shutdown
    if let Err(e) = start_api_server(api_state, &config.api, shutdown_signal()).await {
        error!(error = %e, "API server error");
    }

    reload_handle.abort();

    info!("QR Docs service stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();

    builder
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Re-read the configuration on SIGHUP and swap in the new base address.
///
/// Existing QR codes keep pointing at the old address until regenerated.
#[cfg(unix)]
async fn reload_on_hangup(base_address: Arc<ReloadableBaseAddress>) {
    let mut hangup = match signal::unix::signal(signal::unix::SignalKind::hangup()) {
        Ok(hangup) => hangup,
        Err(e) => {
            warn!(error = %e, "Failed to install SIGHUP handler; base address reload disabled");
            return;
        }
    };

    while hangup.recv().await.is_some() {
        info!("Received SIGHUP, reloading configuration");
        match Config::load() {
            Ok(config) => base_address.set(config.site.base_address),
            Err(e) => error!(error = %e, "Configuration reload failed; keeping current base address"),
        }
    }
}

#[cfg(not(unix))]
async fn reload_on_hangup(_base_address: Arc<ReloadableBaseAddress>) {}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
