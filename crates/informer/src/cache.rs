//! Resource cache
//!
//! Maintains an in-memory mirror of the watched collection in a
//! `kube_runtime` reflector store. The mirror is populated by the
//! transport's initial listing and then kept current by its change stream.
//! Every change is emitted as a [`ChangeEvent`] on the sink channel,
//! including those seen while the initial listing is still in progress;
//! gating is the dispatcher's job.
//!
//! After each listing (the first one and any relist the transport performs
//! after a disruption), mirrored objects the listing did not return are
//! removed and reported as deleted.

use crate::event::{ChangeEvent, Notification, display_name};
use crate::transport::{EventStream, ListWatch, TransportError};
use futures::StreamExt;
use kube::{Resource, ResourceExt};
use kube_runtime::reflector::store::Writer;
use kube_runtime::watcher;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

pub use kube_runtime::reflector::{ObjectRef, Store};

/// Resource cache settings
#[derive(Debug, Clone, Default)]
pub struct CacheConfig {
    /// Re-announce every mirrored object as updated at this interval once synced
    pub resync_period: Option<Duration>,
}

impl CacheConfig {
    /// Enables periodic resync.
    #[must_use]
    pub fn with_resync_period(mut self, period: Duration) -> Self {
        self.resync_period = Some(period);
        self
    }
}

/// Progress of the initial listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncState {
    /// The initial listing has not completed yet
    Pending,
    /// The initial listing has been fully applied to the mirror
    Synced,
    /// The transport could not produce an initial listing
    Failed(String),
    /// The run was cancelled before the initial listing completed
    Cancelled,
}

/// Local mirror of a watched collection fed by a [`ListWatch`] transport.
///
/// The mirror is a `kube_runtime` reflector [`Store`]; the cache holds its
/// only [`Writer`] until [`start`](Self::start) hands it to the run loop.
pub struct ResourceCache<K>
where
    K: Resource + Clone + 'static,
    K::DynamicType: Eq + Hash + Clone,
{
    transport: Arc<dyn ListWatch<K>>,
    writer: Option<Writer<K>>,
    store: Store<K>,
    dyntype: K::DynamicType,
    state: Arc<watch::Sender<SyncState>>,
    config: CacheConfig,
}

impl<K> fmt::Debug for ResourceCache<K>
where
    K: Resource + Clone + 'static,
    K::DynamicType: Eq + Hash + Clone,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceCache")
            .field("objects", &self.store.len())
            .field("state", &*self.state.borrow())
            .field("started", &self.writer.is_none())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<K> ResourceCache<K>
where
    K: Resource + Clone + Send + Sync + 'static,
    K::DynamicType: Eq + Hash + Clone + Default + Send + Sync,
{
    /// Creates an empty cache over `transport` for a statically typed resource.
    pub fn new(transport: Arc<dyn ListWatch<K>>, config: CacheConfig) -> Self {
        Self::new_with(transport, config, K::DynamicType::default())
    }
}

impl<K> ResourceCache<K>
where
    K: Resource + Clone + Send + Sync + 'static,
    K::DynamicType: Eq + Hash + Clone + Send + Sync,
{
    /// Creates an empty cache over `transport`, keyed with `dyntype`
    /// (the `ApiResource` for `DynamicObject`).
    pub fn new_with(transport: Arc<dyn ListWatch<K>>, config: CacheConfig, dyntype: K::DynamicType) -> Self {
        let (state, _) = watch::channel(SyncState::Pending);
        let writer = Writer::new(dyntype.clone());
        Self {
            transport,
            store: writer.as_reader(),
            writer: Some(writer),
            dyntype,
            state: Arc::new(state),
            config,
        }
    }

    /// Read-only view of the mirror.
    pub fn store(&self) -> Store<K> {
        self.store.clone()
    }

    /// Current progress of the initial listing.
    pub fn sync_state(&self) -> SyncState {
        self.state.borrow().clone()
    }

    /// Whether the initial listing has been applied.
    pub fn has_synced(&self) -> bool {
        *self.state.borrow() == SyncState::Synced
    }

    /// Starts the list/watch loop on its own task and returns immediately.
    ///
    /// The loop runs until `cancel` fires or the transport stream ends.
    /// Events are pushed to `sink`; a closed sink does not stop mirroring.
    /// The cache starts once: later calls return an already finished task.
    pub fn start(
        &mut self,
        cancel: CancellationToken,
        sink: mpsc::Sender<Notification<K>>,
    ) -> JoinHandle<()> {
        let Some(writer) = self.writer.take() else {
            warn!("Resource cache already started");
            return tokio::spawn(async {});
        };
        let reflector = Reflector {
            stream: self.transport.list_watch(),
            writer,
            store: self.store.clone(),
            dyntype: self.dyntype.clone(),
            state: Arc::clone(&self.state),
            sink,
            sink_open: true,
            resync_period: self.config.resync_period,
        };
        tokio::spawn(reflector.run(cancel))
    }

    /// Blocks until the initial listing has been applied to the mirror.
    ///
    /// Returns `false` if `cancel` fires first, the transport reports a fatal
    /// error, or the stream ends before the listing completes.
    pub async fn wait_for_initial_sync(&self, cancel: &CancellationToken) -> bool {
        let mut state = self.state.subscribe();
        tokio::select! {
            biased;
            settled = state.wait_for(|s| *s != SyncState::Pending) => {
                matches!(settled.as_deref(), Ok(SyncState::Synced))
            }
            () = cancel.cancelled() => false,
        }
    }
}

/// The cache's run loop state. Owns the transport stream and the mirror's writer.
///
/// Each watcher event is diffed against the store before the writer applies
/// it. Listed objects go to the writer's buffer and replace the store as a
/// whole on `InitDone`.
struct Reflector<K>
where
    K: Resource + Clone + 'static,
    K::DynamicType: Eq + Hash + Clone,
{
    stream: EventStream<K>,
    writer: Writer<K>,
    store: Store<K>,
    dyntype: K::DynamicType,
    state: Arc<watch::Sender<SyncState>>,
    sink: mpsc::Sender<Notification<K>>,
    sink_open: bool,
    resync_period: Option<Duration>,
}

impl<K> Reflector<K>
where
    K: Resource + Clone + Send + Sync + 'static,
    K::DynamicType: Eq + Hash + Clone + Send + Sync,
{
    async fn run(mut self, cancel: CancellationToken) {
        info!("Starting resource cache");

        let mut resync = self.resync_period.filter(|p| !p.is_zero()).map(|period| {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    if self.is_pending() {
                        info!("Resource cache cancelled before initial sync");
                        self.state.send_replace(SyncState::Cancelled);
                    } else {
                        debug!("Resource cache stopping");
                    }
                    break;
                }
                item = self.stream.next() => match item {
                    Some(Ok(event)) => self.apply(event).await,
                    Some(Err(err)) => {
                        if !self.on_error(&err) {
                            break;
                        }
                    }
                    None => {
                        self.on_stream_end();
                        break;
                    }
                },
                () = next_resync(&mut resync) => self.resync().await,
            }
        }

        debug!("Resource cache stopped with {} objects mirrored", self.store.len());
    }

    fn is_pending(&self) -> bool {
        *self.state.borrow() == SyncState::Pending
    }

    fn object_ref(&self, obj: &K) -> ObjectRef<K> {
        ObjectRef::from_obj_with(obj, self.dyntype.clone())
    }

    async fn apply(&mut self, event: watcher::Event<K>) {
        match &event {
            watcher::Event::Init => {
                debug!("Listing started");
                self.writer.apply_watcher_event(&event);
            }
            watcher::Event::InitApply(obj) | watcher::Event::Apply(obj) => {
                let change = self.diff(obj);
                self.writer.apply_watcher_event(&event);
                if let Some(change) = change {
                    self.emit(change).await;
                }
            }
            watcher::Event::Delete(obj) => {
                let cached = self.store.get(&self.object_ref(obj)).is_some();
                self.writer.apply_watcher_event(&event);
                if cached {
                    trace!("Cache delete: {}", display_name(obj));
                    self.emit(ChangeEvent::Deleted(Arc::new(obj.clone()))).await;
                } else {
                    trace!("Ignoring delete for uncached {}", display_name(obj));
                }
            }
            watcher::Event::InitDone => {
                let before = self.store.state();
                self.writer.apply_watcher_event(&event);
                self.finish_listing(before).await;
            }
        }
    }

    /// The change `obj` makes to the mirror, if any.
    fn diff(&self, obj: &K) -> Option<ChangeEvent<K>> {
        let new = Arc::new(obj.clone());
        match self.store.get(&self.object_ref(obj)) {
            None => {
                trace!("Cache add: {}", display_name(obj));
                Some(ChangeEvent::Added(new))
            }
            Some(old) if same_version(old.as_ref(), new.as_ref()) => {
                trace!("Cache unchanged: {}", display_name(obj));
                None
            }
            Some(old) => {
                trace!("Cache update: {}", display_name(obj));
                Some(ChangeEvent::Updated { old, new })
            }
        }
    }

    /// `before` is the mirror as it stood before the listing replaced it.
    async fn finish_listing(&mut self, before: Vec<Arc<K>>) {
        for old in before {
            if self.store.get(&self.object_ref(&old)).is_none() {
                trace!("Cache delete (absent from listing): {}", display_name(old.as_ref()));
                self.emit(ChangeEvent::Deleted(old)).await;
            }
        }

        if self.is_pending() {
            // Marker goes out before the state flips so every listing event
            // is queued ahead of it.
            self.send(Notification::InitialSyncApplied).await;
            self.state.send_replace(SyncState::Synced);
            info!("Initial listing applied: {} objects", self.store.len());
        } else {
            info!("Relist applied: {} objects", self.store.len());
        }
    }

    /// Returns whether the loop should keep consuming the stream.
    fn on_error(&mut self, err: &TransportError) -> bool {
        if self.is_pending() && err.is_fatal() {
            error!("Initial listing failed: {}", err);
            self.state.send_replace(SyncState::Failed(err.to_string()));
            return false;
        }
        warn!("List/watch error, transport will retry: {}", err);
        true
    }

    fn on_stream_end(&mut self) {
        if self.is_pending() {
            warn!("List/watch stream ended before initial sync");
            self.state.send_replace(SyncState::Failed(
                "list/watch stream ended before initial sync".to_string(),
            ));
        } else {
            warn!("List/watch stream ended");
        }
    }

    async fn resync(&mut self) {
        if self.is_pending() {
            return;
        }
        let objects = self.store.state();
        debug!("Resyncing {} cached objects", objects.len());
        for obj in objects {
            self.emit(ChangeEvent::Updated {
                old: Arc::clone(&obj),
                new: obj,
            })
            .await;
        }
    }

    async fn emit(&mut self, event: ChangeEvent<K>) {
        self.send(Notification::Change(event)).await;
    }

    async fn send(&mut self, notification: Notification<K>) {
        if self.sink_open && self.sink.send(notification).await.is_err() {
            debug!("Event sink closed, continuing to mirror without emitting");
            self.sink_open = false;
        }
    }
}

fn same_version<K: Resource>(old: &K, new: &K) -> bool {
    match (old.resource_version(), new.resource_version()) {
        (Some(old), Some(new)) => old == new,
        _ => false,
    }
}

async fn next_resync(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
