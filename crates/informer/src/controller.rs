//! Lifecycle controller
//!
//! Owns one informer run: starts the resource cache and the event
//! dispatcher, blocks until the initial listing is applied, opens the sync
//! gate, then keeps running until the run context is cancelled and unwinds
//! the dispatcher and cache in that order.
//!
//! ```text
//! Created -> Starting -> Syncing -> Running -> ShuttingDown -> Stopped
//!                           |                                    ^
//!                           +------ sync failed / cancelled -----+
//! ```

use crate::cache::{CacheConfig, ResourceCache, Store, SyncState};
use crate::context::RunContext;
use crate::dispatcher::{EventDispatcher, PreSyncPolicy};
use crate::error::InformerError;
use crate::gate::SyncGate;
use crate::handler::EventHandler;
use crate::transport::ListWatch;
use kube::Resource;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Default capacity of the cache-to-dispatcher channel.
pub const DEFAULT_EVENT_BUFFER: usize = 1024;

/// Lifecycle phase of a [`Controller`] run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Constructed, not yet running
    Created,
    /// Starting the cache and dispatcher
    Starting,
    /// Waiting for the initial listing
    Syncing,
    /// Gate open, delivering events
    Running,
    /// Stopping background tasks
    ShuttingDown,
    /// Run finished
    Stopped,
}

/// Controller settings
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Resource cache settings
    pub cache: CacheConfig,
    /// Handling of events seen before the gate opens
    pub pre_sync: PreSyncPolicy,
    /// Capacity of the cache-to-dispatcher channel
    pub event_buffer: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            pre_sync: PreSyncPolicy::default(),
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

/// Runs a resource cache, sync gate and event dispatcher as one unit.
pub struct Controller<K>
where
    K: Resource + Clone + 'static,
    K::DynamicType: Eq + Hash + Clone,
{
    cache: ResourceCache<K>,
    dispatcher: EventDispatcher<K>,
    gate: SyncGate,
    event_buffer: usize,
    phase: watch::Sender<Phase>,
}

impl<K> fmt::Debug for Controller<K>
where
    K: Resource + Clone + 'static,
    K::DynamicType: Eq + Hash + Clone,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("cache", &self.cache)
            .field("dispatcher", &self.dispatcher)
            .field("phase", &*self.phase.borrow())
            .finish_non_exhaustive()
    }
}

impl<K> Controller<K>
where
    K: Resource + Clone + Send + Sync + 'static,
    K::DynamicType: Eq + Hash + Clone + Default + Send + Sync,
{
    /// Creates a controller for the collection behind `transport`.
    pub fn new(
        transport: Arc<dyn ListWatch<K>>,
        handler: Arc<dyn EventHandler<K>>,
        config: ControllerConfig,
    ) -> Self {
        Self::new_with(transport, handler, config, K::DynamicType::default())
    }
}

impl<K> Controller<K>
where
    K: Resource + Clone + Send + Sync + 'static,
    K::DynamicType: Eq + Hash + Clone + Send + Sync,
{
    /// Creates a controller for a resource whose type information is only
    /// known at runtime, such as `DynamicObject` with its `ApiResource`.
    pub fn new_with(
        transport: Arc<dyn ListWatch<K>>,
        handler: Arc<dyn EventHandler<K>>,
        config: ControllerConfig,
        dyntype: K::DynamicType,
    ) -> Self {
        let gate = SyncGate::new();
        let (phase, _) = watch::channel(Phase::Created);
        Self {
            cache: ResourceCache::new_with(transport, config.cache, dyntype),
            dispatcher: EventDispatcher::new(handler, gate.clone(), config.pre_sync),
            gate,
            event_buffer: config.event_buffer.max(1),
            phase,
        }
    }

    /// Read-only view of the cache mirror.
    pub fn store(&self) -> Store<K> {
        self.cache.store()
    }

    /// The gate handlers are checked against.
    pub fn gate(&self) -> SyncGate {
        self.gate.clone()
    }

    /// Observes phase transitions. Keeps the final phase after the run ends.
    pub fn phase(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    /// Runs until `ctx` is cancelled.
    ///
    /// Returns [`InformerError::SyncCancelled`] if `ctx` is cancelled before
    /// the initial sync and [`InformerError::SyncFailed`] if the listing
    /// cannot be established. The gate is never opened in either case.
    pub async fn run(self, ctx: RunContext) -> Result<(), InformerError> {
        let Self {
            mut cache,
            dispatcher,
            gate,
            event_buffer,
            phase,
        } = self;

        phase.send_replace(Phase::Starting);
        let (tx, rx) = mpsc::channel(event_buffer);
        let mut drained = dispatcher.listing_drained();
        // The cache outlives the dispatcher: only `Tasks::shutdown` stops it.
        let cache_token = CancellationToken::new();
        let dispatcher_token = ctx.token().child_token();
        let tasks = Tasks {
            cache: cache.start(cache_token.clone(), tx),
            cache_token,
            dispatcher: tokio::spawn(dispatcher.run(rx, dispatcher_token.clone())),
            dispatcher_token,
        };

        phase.send_replace(Phase::Syncing);
        info!("Waiting for cache sync");
        let synced = cache.wait_for_initial_sync(ctx.token()).await
            && wait_drained(&mut drained, ctx.token()).await;

        if !synced {
            let cause = sync_failure(&ctx, &cache);
            match &cause {
                InformerError::SyncCancelled => info!("Shutdown requested before cache sync"),
                other => error!("Failed to sync: {}", other),
            }
            if let Err(e) = tasks.shutdown().await {
                error!("{}", e);
            }
            phase.send_replace(Phase::Stopped);
            return Err(cause);
        }

        gate.set_synced().await;
        info!("Cache synced ({} objects)", cache.store().len());
        phase.send_replace(Phase::Running);

        ctx.done().await;

        info!("Shutting down");
        phase.send_replace(Phase::ShuttingDown);
        let result = tasks.shutdown().await;
        phase.send_replace(Phase::Stopped);
        info!("Stopped");
        result
    }
}

fn sync_failure<K>(ctx: &RunContext, cache: &ResourceCache<K>) -> InformerError
where
    K: Resource + Clone + Send + Sync + 'static,
    K::DynamicType: Eq + Hash + Clone + Send + Sync,
{
    if ctx.is_cancelled() {
        return InformerError::SyncCancelled;
    }
    match cache.sync_state() {
        SyncState::Cancelled => InformerError::SyncCancelled,
        SyncState::Failed(reason) => InformerError::SyncFailed(reason),
        SyncState::Synced => InformerError::SyncFailed(
            "event dispatcher stopped before the initial listing was drained".to_string(),
        ),
        SyncState::Pending => InformerError::SyncFailed("resource cache stopped before sync".to_string()),
    }
}

async fn wait_drained(drained: &mut watch::Receiver<bool>, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        done = drained.wait_for(|d| *d) => done.is_ok(),
        () = cancel.cancelled() => false,
    }
}

struct Tasks {
    cache: JoinHandle<()>,
    cache_token: CancellationToken,
    dispatcher: JoinHandle<()>,
    dispatcher_token: CancellationToken,
}

impl Tasks {
    /// Stops the dispatcher, then the cache that feeds it. The cache keeps
    /// mirroring until the dispatcher has joined.
    async fn shutdown(self) -> Result<(), InformerError> {
        self.dispatcher_token.cancel();
        let dispatcher = self.dispatcher.await;
        debug!("Event dispatcher joined");

        self.cache_token.cancel();
        let cache = self.cache.await;
        debug!("Resource cache joined");

        dispatcher.map_err(|e| InformerError::Task(format!("event dispatcher: {}", e)))?;
        cache.map_err(|e| InformerError::Task(format!("resource cache: {}", e)))?;
        Ok(())
    }
}
