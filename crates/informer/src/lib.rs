//! Sync-gated Kubernetes informer
//!
//! Keeps an in-memory mirror of a watched resource collection and routes
//! add/update/delete notifications to application handlers, but only once
//! the initial listing has been fully applied to the mirror.
//!
//! # Example
//!
//! ```no_run
//! use informer::{Controller, ControllerConfig, EventHandler, KubeListWatch, RunContext};
//! use k8s_openapi::api::apps::v1::Deployment;
//! use kube::{Api, Client, ResourceExt};
//! use kube_runtime::watcher;
//! use std::sync::Arc;
//!
//! struct PrintHandler;
//!
//! #[async_trait::async_trait]
//! impl EventHandler<Deployment> for PrintHandler {
//!     async fn on_added(&self, obj: Arc<Deployment>) -> anyhow::Result<()> {
//!         println!("created: {}", obj.name_any());
//!         Ok(())
//!     }
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Client::try_default().await?;
//! let api: Api<Deployment> = Api::all(client);
//! let transport = Arc::new(KubeListWatch::new(api, watcher::Config::default()));
//!
//! let controller = Controller::new(transport, Arc::new(PrintHandler), ControllerConfig::default());
//! controller.run(RunContext::with_shutdown_signal()).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Components
//!
//! - **Resource Cache** ([`ResourceCache`]): list-then-watch mirror
//! - **Sync Gate** ([`SyncGate`]): monotone "safe to act" flag
//! - **Event Dispatcher** ([`EventDispatcher`]): gate-checked handler routing
//! - **Lifecycle Controller** ([`Controller`]): start, sync, run, shut down

pub mod cache;
pub mod context;
pub mod controller;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod gate;
pub mod handler;
pub mod transport;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use cache::{CacheConfig, ObjectRef, ResourceCache, Store, SyncState};
pub use context::RunContext;
pub use controller::{Controller, ControllerConfig, Phase};
pub use dispatcher::{Dispatch, EventDispatcher, PreSyncPolicy};
pub use error::InformerError;
pub use event::{ChangeEvent, Notification, display_name};
pub use gate::SyncGate;
pub use handler::EventHandler;
pub use transport::{EventStream, KubeListWatch, ListWatch, TransportError};
#[cfg(any(test, feature = "test-util"))]
pub use mock::{MockEvents, MockListWatch, RecordingHandler};
