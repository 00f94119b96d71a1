//! Test doubles for the informer
//!
//! `MockListWatch` stands in for the cluster: tests push watcher events
//! through its paired [`MockEvents`] handle. `RecordingHandler` records
//! every handler invocation so tests can assert exactly what ran.

use crate::event::display_name;
use crate::handler::EventHandler;
use crate::transport::{EventStream, ListWatch, TransportError};
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::Resource;
use kube_runtime::watcher;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{mpsc, watch};

type Item<K> = Result<watcher::Event<K>, TransportError>;

/// In-memory transport fed by a [`MockEvents`] handle.
///
/// The event stream can be opened once; later calls get an empty stream.
pub struct MockListWatch<K> {
    events: Mutex<Option<mpsc::UnboundedReceiver<Item<K>>>>,
}

impl<K: Send + 'static> MockListWatch<K> {
    /// Creates a transport and the handle that feeds it.
    pub fn new() -> (Self, MockEvents<K>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                events: Mutex::new(Some(rx)),
            },
            MockEvents { tx },
        )
    }
}

impl<K: Send + 'static> ListWatch<K> for MockListWatch<K> {
    fn list_watch(&self) -> EventStream<K> {
        let events = self.events.lock().unwrap_or_else(PoisonError::into_inner).take();
        match events {
            Some(rx) => futures::stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|item| (item, rx))
            })
            .boxed(),
            None => futures::stream::empty().boxed(),
        }
    }
}

/// Feeds events into a [`MockListWatch`]. Dropping every handle ends the stream.
pub struct MockEvents<K> {
    tx: mpsc::UnboundedSender<Item<K>>,
}

impl<K> Clone for MockEvents<K> {
    fn clone(&self) -> Self {
        Self { tx: self.tx.clone() }
    }
}

impl<K> MockEvents<K> {
    fn push(&self, item: Item<K>) {
        // The cache may already have stopped; tests check that separately.
        let _ = self.tx.send(item);
    }

    /// Starts a listing.
    pub fn init(&self) {
        self.push(Ok(watcher::Event::Init));
    }

    /// Adds one object to the listing in progress.
    pub fn init_apply(&self, obj: K) {
        self.push(Ok(watcher::Event::InitApply(obj)));
    }

    /// Completes the listing in progress.
    pub fn init_done(&self) {
        self.push(Ok(watcher::Event::InitDone));
    }

    /// Sends a complete listing: `Init`, one `InitApply` per object, `InitDone`.
    pub fn list(&self, objs: impl IntoIterator<Item = K>) {
        self.init();
        for obj in objs {
            self.init_apply(obj);
        }
        self.init_done();
    }

    /// Live create or update.
    pub fn apply(&self, obj: K) {
        self.push(Ok(watcher::Event::Apply(obj)));
    }

    /// Live delete.
    pub fn delete(&self, obj: K) {
        self.push(Ok(watcher::Event::Delete(obj)));
    }

    /// Reports a transport error.
    pub fn fail(&self, err: TransportError) {
        self.push(Err(err));
    }

    /// Whether the consumer dropped the stream.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// A handler invocation as seen by [`RecordingHandler`], keyed by `namespace/name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    /// `on_added`
    Added(String),
    /// `on_updated`, keyed by the new object
    Updated(String),
    /// `on_deleted`
    Deleted(String),
}

/// Handler that records every invocation. Clones share the record.
#[derive(Clone)]
pub struct RecordingHandler {
    calls: Arc<Mutex<Vec<Call>>>,
    count: Arc<watch::Sender<usize>>,
    fail: bool,
}

impl Default for RecordingHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingHandler {
    /// Records calls and succeeds.
    pub fn new() -> Self {
        let (count, _) = watch::channel(0);
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            count: Arc::new(count),
            fail: false,
        }
    }

    /// Records calls and returns an error from each one.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    /// Invocations so far, in order.
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Waits until at least `n` invocations have been recorded.
    ///
    /// # Panics
    ///
    /// After five seconds without reaching `n`.
    pub async fn wait_for_calls(&self, n: usize) {
        let mut count = self.count.subscribe();
        let reached = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            count.wait_for(|c| *c >= n),
        )
        .await;
        assert!(
            matches!(reached, Ok(Ok(_))),
            "expected {} handler calls, got {:?}",
            n,
            self.calls()
        );
    }

    fn record(&self, call: Call) -> anyhow::Result<()> {
        let len = {
            let mut calls = self.calls.lock().unwrap_or_else(PoisonError::into_inner);
            calls.push(call.clone());
            calls.len()
        };
        self.count.send_replace(len);
        if self.fail {
            anyhow::bail!("recording handler configured to fail on {:?}", call);
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl<K> EventHandler<K> for RecordingHandler
where
    K: Resource + Send + Sync + 'static,
{
    async fn on_added(&self, obj: Arc<K>) -> anyhow::Result<()> {
        self.record(Call::Added(display_name(obj.as_ref())))
    }

    async fn on_updated(&self, _old: Arc<K>, new: Arc<K>) -> anyhow::Result<()> {
        self.record(Call::Updated(display_name(new.as_ref())))
    }

    async fn on_deleted(&self, obj: Arc<K>) -> anyhow::Result<()> {
        self.record(Call::Deleted(display_name(obj.as_ref())))
    }
}

/// Builds a minimal `Deployment` with the given identity and resource version.
pub fn test_deployment(namespace: &str, name: &str, resource_version: &str) -> Deployment {
    Deployment {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            resource_version: Some(resource_version.to_string()),
            ..Default::default()
        },
        ..Default::default()
    }
}
