//! List/watch transport
//!
//! The cache never talks to the API server directly. It consumes a
//! [`ListWatch`] stream of `kube_runtime` watcher events: the
//! `Init`/`InitApply`/`InitDone` phase is the initial listing, and
//! `Apply`/`Delete` are the live change stream. Reconnection and backoff
//! are the transport's job.

use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use kube::{Api, Resource};
use kube_runtime::{WatchStreamExt, watcher};
use std::fmt::Debug;
use thiserror::Error;
use tracing::debug;

/// Stream of watcher events produced by a transport.
pub type EventStream<K> = BoxStream<'static, Result<watcher::Event<K>, TransportError>>;

/// Errors reported by a transport stream
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The transport cannot produce a listing (auth failure, unknown resource type)
    #[error("Fatal list/watch error: {0}")]
    Fatal(String),

    /// The transport will retry on its own
    #[error("Transient list/watch error: {0}")]
    Transient(String),
}

impl TransportError {
    /// Whether the transport gave up.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}

/// A source of list-then-watch events bound to one resource collection.
pub trait ListWatch<K>: Send + Sync {
    /// Opens the stream. Called once per cache run.
    fn list_watch(&self) -> EventStream<K>;
}

/// Transport backed by `kube_runtime::watcher` with its default backoff.
#[derive(Clone)]
pub struct KubeListWatch<K: Resource> {
    api: Api<K>,
    config: watcher::Config,
}

impl<K: Resource> KubeListWatch<K> {
    /// Creates a transport over `api` using the given watcher configuration.
    pub fn new(api: Api<K>, config: watcher::Config) -> Self {
        Self { api, config }
    }
}

impl<K> ListWatch<K> for KubeListWatch<K>
where
    K: Resource + Clone + Debug + serde::de::DeserializeOwned + Send + Sync + 'static,
{
    fn list_watch(&self) -> EventStream<K> {
        watcher(self.api.clone(), self.config.clone())
            .default_backoff()
            .map_err(classify)
            .boxed()
    }
}

/// Splits watcher errors into ones a retry can fix and ones it cannot.
///
/// A rejected or unknown initial list (401, 403, 404) will not heal by
/// backing off; everything else is left to the watcher's backoff.
fn classify(err: watcher::Error) -> TransportError {
    let fatal = match &err {
        watcher::Error::InitialListFailed(kube::Error::Api(resp)) => {
            matches!(resp.code, 401 | 403 | 404)
        }
        _ => false,
    };
    debug!("Watcher error (fatal: {}): {}", fatal, err);
    if fatal {
        TransportError::Fatal(err.to_string())
    } else {
        TransportError::Transient(err.to_string())
    }
}
