//! Regenerate QR codes against the currently configured base address.
//!
//! Run after moving the deployment to a new domain:
//!
//! ```text
//! regenerate-codes                 # every document
//! regenerate-codes --missing-only  # only documents without a QR code
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use qrdocs_service::config::Config;
use qrdocs_service::{blob_store, DocumentLifecycle, DocumentStore, StaticBaseAddress};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "regenerate-codes")]
#[command(about = "Regenerate QR codes against the configured base address", long_about = None)]
struct Args {
    /// Only documents that have no QR code yet
    #[arg(long)]
    missing_only: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();
    let config = Config::load().context("Failed to load configuration")?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(fmt::layer())
        .init();

    let store = Arc::new(
        DocumentStore::new(&config.database)
            .await
            .context("Failed to initialize document store")?,
    );
    let blobs = blob_store::connect(&config.storage).await?;
    let base_address = Arc::new(StaticBaseAddress::new(config.site.base_address.clone()));

    let lifecycle = DocumentLifecycle::from_config(&config, store, blobs, base_address);

    info!(missing_only = args.missing_only, "Starting QR regeneration");

    let report = if args.missing_only {
        lifecycle.regenerate_missing().await?
    } else {
        lifecycle.regenerate_all().await?
    };

    for failure in &report.failures {
        eprintln!("failed: {} ({}): {}", failure.code, failure.title, failure.error);
    }
    println!(
        "Regenerated {}/{} QR codes for {}",
        report.succeeded, report.total, report.base_address
    );

    Ok(if report.is_complete() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
