//! Deployment Watcher
//!
//! Mirrors one Kubernetes resource collection (Deployments by default) and
//! logs each create, update and delete observed after the initial listing
//! has been applied. Changes that are part of the initial listing are not
//! reported.

mod config;
mod controller;
mod error;
mod handler;

use crate::config::WatcherConfig;
use crate::error::ControllerError;
use controller::Controller;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // kube's rustls-tls needs a process-wide crypto provider
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        debug!("rustls crypto provider already installed");
    }

    info!("Starting Deployment Watcher");

    // Load configuration from environment variables
    let config = WatcherConfig::from_env()?;

    info!("Configuration:");
    info!("  Resource: {} {}", config.api_version(), config.kind);
    info!("  Namespace: {}", config.namespace.as_deref().unwrap_or("all namespaces"));
    info!("  Label selector: {}", config.label_selector.as_deref().unwrap_or("none"));
    match config.resync_period {
        Some(period) => info!("  Resync period: {}s", period.as_secs()),
        None => info!("  Resync period: disabled"),
    }
    info!("  Event buffer: {}", config.event_buffer);
    info!("  Pre-sync policy: {}", config.pre_sync);

    // Initialize and run controller
    let controller = Controller::new(&config).await?;
    match controller.run().await {
        Err(ControllerError::Informer(e)) if e.is_cancelled() => {
            info!("Shut down before initial sync completed");
            Ok(())
        }
        Err(e) => {
            error!("Deployment watcher failed: {}", e);
            Err(e)
        }
        Ok(()) => {
            info!("Deployment watcher stopped");
            Ok(())
        }
    }
}
