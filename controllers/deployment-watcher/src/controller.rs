//! Main controller implementation.
//!
//! Builds the Kubernetes client and the dynamic API for the configured
//! kind, wires it into an informer with the logging handler, and runs it
//! until a shutdown signal arrives.

use crate::config::WatcherConfig;
use crate::error::ControllerError;
use crate::handler::LoggingHandler;
use informer::{KubeListWatch, RunContext};
use kube::core::{ApiResource, DynamicObject};
use kube::{Api, Client};
use std::sync::Arc;
use tracing::info;

/// Watches one resource kind and logs its changes.
#[derive(Debug)]
pub struct Controller {
    informer: informer::Controller<DynamicObject>,
}

impl Controller {
    /// Creates a new controller instance.
    pub async fn new(config: &WatcherConfig) -> Result<Self, ControllerError> {
        info!("Initializing deployment watcher");

        // Create Kubernetes client
        let client = Client::try_default().await?;

        let resource = ApiResource::from_gvk(&config.gvk());
        let api: Api<DynamicObject> = match &config.namespace {
            Some(ns) => Api::namespaced_with(client, ns, &resource),
            None => Api::all_with(client, &resource),
        };

        let transport = Arc::new(KubeListWatch::new(api, config.watcher_config()));
        let handler = Arc::new(LoggingHandler::new(&config.kind));
        let informer = informer::Controller::new_with(transport, handler, config.informer_config(), resource);

        Ok(Self { informer })
    }

    /// Runs the controller until Ctrl-C or SIGTERM.
    pub async fn run(self) -> Result<(), ControllerError> {
        info!("Deployment watcher running");
        self.informer.run(RunContext::with_shutdown_signal()).await?;
        Ok(())
    }
}
