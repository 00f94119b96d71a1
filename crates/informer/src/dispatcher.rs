//! Event dispatcher
//!
//! Routes change events from the resource cache to the registered
//! [`EventHandler`], but only once the [`SyncGate`] is open. Each handler
//! call runs under the gate's shared lock. A failing or panicking handler is
//! logged and the dispatcher moves on to the next event.
//!
//! Events seen while the gate is closed are handled per [`PreSyncPolicy`]:
//! dropped (the listing already left the mirror in the equivalent final
//! state), or deferred and replayed in arrival order once the gate opens.

use crate::event::{ChangeEvent, Notification};
use crate::gate::SyncGate;
use crate::handler::EventHandler;
use futures::FutureExt;
use kube::Resource;
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// What to do with events that arrive before the gate opens.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PreSyncPolicy {
    /// Drop them
    #[default]
    Discard,
    /// Queue them and deliver them once the gate opens
    Replay,
}

impl FromStr for PreSyncPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "discard" => Ok(Self::Discard),
            "replay" => Ok(Self::Replay),
            other => Err(format!("unknown pre-sync policy '{}' (expected 'discard' or 'replay')", other)),
        }
    }
}

impl fmt::Display for PreSyncPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Discard => f.write_str("discard"),
            Self::Replay => f.write_str("replay"),
        }
    }
}

/// Outcome of dispatching one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// The handler ran and succeeded
    Delivered,
    /// The handler ran and returned an error or panicked
    Failed,
    /// The gate was closed and the event was dropped
    Discarded,
    /// The gate was closed and the event was queued for replay
    Deferred,
}

/// Gate-checked router from change events to an [`EventHandler`].
pub struct EventDispatcher<K> {
    handler: Arc<dyn EventHandler<K>>,
    gate: SyncGate,
    policy: PreSyncPolicy,
    deferred: Vec<ChangeEvent<K>>,
    drained: watch::Sender<bool>,
}

impl<K> fmt::Debug for EventDispatcher<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("gate", &self.gate)
            .field("policy", &self.policy)
            .field("deferred", &self.deferred.len())
            .finish_non_exhaustive()
    }
}

impl<K> EventDispatcher<K>
where
    K: Resource + Send + Sync + 'static,
{
    /// Creates a dispatcher routing to `handler` behind `gate`.
    pub fn new(handler: Arc<dyn EventHandler<K>>, gate: SyncGate, policy: PreSyncPolicy) -> Self {
        let (drained, _) = watch::channel(false);
        Self {
            handler,
            gate,
            policy,
            deferred: Vec::new(),
            drained,
        }
    }

    /// Flips to `true` once every event of the initial listing has been
    /// consumed by [`run`](Self::run).
    pub fn listing_drained(&self) -> watch::Receiver<bool> {
        self.drained.subscribe()
    }

    /// Number of events waiting for replay.
    pub fn deferred_len(&self) -> usize {
        self.deferred.len()
    }

    /// Gates and routes a single event.
    pub async fn dispatch(&mut self, event: ChangeEvent<K>) -> Dispatch {
        let synced = self.gate.read_guard().await;
        if !*synced {
            return match self.policy {
                PreSyncPolicy::Discard => {
                    trace!("Discarding pre-sync {} event for {}", event.kind(), event.name());
                    Dispatch::Discarded
                }
                PreSyncPolicy::Replay => {
                    trace!("Deferring pre-sync {} event for {}", event.kind(), event.name());
                    self.deferred.push(event);
                    Dispatch::Deferred
                }
            };
        }

        // Deferred events predate this one
        if !self.deferred.is_empty() {
            let deferred = std::mem::take(&mut self.deferred);
            replay(self.handler.as_ref(), deferred).await;
        }
        invoke(self.handler.as_ref(), &event).await
    }

    /// Delivers deferred events if the gate is open. Returns how many were
    /// delivered (successfully or not).
    pub async fn flush_deferred(&mut self) -> usize {
        let synced = self.gate.read_guard().await;
        if !*synced || self.deferred.is_empty() {
            return 0;
        }
        let deferred = std::mem::take(&mut self.deferred);
        let count = deferred.len();
        info!("Replaying {} events received before sync", count);
        replay(self.handler.as_ref(), deferred).await;
        count
    }

    /// Consumes notifications until `cancel` fires or the channel closes.
    ///
    /// On the initial-listing marker, reports the listing drained and holds
    /// further events until the gate opens, so nothing emitted after the
    /// listing is judged against a gate that is about to open.
    pub async fn run(
        mut self,
        mut notifications: mpsc::Receiver<Notification<K>>,
        cancel: CancellationToken,
    ) {
        debug!("Event dispatcher started (pre-sync policy: {})", self.policy);
        let gate = self.gate.clone();

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                notification = notifications.recv() => match notification {
                    Some(Notification::Change(event)) => {
                        self.dispatch(event).await;
                    }
                    Some(Notification::InitialSyncApplied) => {
                        self.drained.send_replace(true);
                        debug!("Initial listing drained, holding events until sync gate opens");
                        tokio::select! {
                            biased;
                            () = cancel.cancelled() => break,
                            () = gate.wait_synced() => {
                                self.flush_deferred().await;
                            }
                        }
                    }
                    None => {
                        debug!("Event stream closed");
                        break;
                    }
                },
            }
        }

        if !self.deferred.is_empty() {
            debug!("Dropping {} deferred events on shutdown", self.deferred.len());
        }
        debug!("Event dispatcher stopped");
    }
}

async fn replay<K>(handler: &dyn EventHandler<K>, events: Vec<ChangeEvent<K>>)
where
    K: Resource + Send + Sync + 'static,
{
    for event in &events {
        invoke(handler, event).await;
    }
}

async fn invoke<K>(handler: &dyn EventHandler<K>, event: &ChangeEvent<K>) -> Dispatch
where
    K: Resource + Send + Sync + 'static,
{
    let call = match event {
        ChangeEvent::Added(obj) => handler.on_added(Arc::clone(obj)),
        ChangeEvent::Updated { old, new } => handler.on_updated(Arc::clone(old), Arc::clone(new)),
        ChangeEvent::Deleted(obj) => handler.on_deleted(Arc::clone(obj)),
    };

    match AssertUnwindSafe(call).catch_unwind().await {
        Ok(Ok(())) => {
            trace!("Delivered {} event for {}", event.kind(), event.name());
            Dispatch::Delivered
        }
        Ok(Err(e)) => {
            warn!("Handler failed on {} event for {}: {:#}", event.kind(), event.name(), e);
            Dispatch::Failed
        }
        Err(panic) => {
            error!(
                "Handler panicked on {} event for {}: {}",
                event.kind(),
                event.name(),
                panic_message(panic.as_ref())
            );
            Dispatch::Failed
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg
    } else {
        "<non-string panic payload>"
    }
}
