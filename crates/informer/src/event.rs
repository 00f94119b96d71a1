//! Change events emitted by the resource cache.

use kube::{Resource, ResourceExt};
use std::sync::Arc;

/// `namespace/name` of `obj`, or just the name for cluster-scoped resources.
pub fn display_name<K: Resource>(obj: &K) -> String {
    match obj.namespace() {
        Some(ns) => format!("{}/{}", ns, obj.name_any()),
        None => obj.name_any(),
    }
}

/// A mutation applied to the cache mirror.
///
/// Payloads are shared with the mirror and never mutated after emission.
#[derive(Debug)]
pub enum ChangeEvent<K> {
    /// A resource entered the mirror
    Added(Arc<K>),
    /// A mirrored resource was replaced (or re-announced by a resync)
    Updated {
        /// Previously mirrored version
        old: Arc<K>,
        /// Version now in the mirror
        new: Arc<K>,
    },
    /// A resource left the mirror; carries its last known state
    Deleted(Arc<K>),
}

// Derived Clone would require `K: Clone`; only the Arcs are cloned.
impl<K> Clone for ChangeEvent<K> {
    fn clone(&self) -> Self {
        match self {
            Self::Added(obj) => Self::Added(Arc::clone(obj)),
            Self::Updated { old, new } => Self::Updated {
                old: Arc::clone(old),
                new: Arc::clone(new),
            },
            Self::Deleted(obj) => Self::Deleted(Arc::clone(obj)),
        }
    }
}

impl<K: Resource> ChangeEvent<K> {
    /// Short name of the event kind, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Added(_) => "added",
            Self::Updated { .. } => "updated",
            Self::Deleted(_) => "deleted",
        }
    }

    /// The current object: the new version for updates.
    pub fn object(&self) -> &Arc<K> {
        match self {
            Self::Added(obj) | Self::Deleted(obj) => obj,
            Self::Updated { new, .. } => new,
        }
    }

    /// `namespace/name` of the resource this event concerns.
    pub fn name(&self) -> String {
        display_name(self.object().as_ref())
    }
}

/// Item carried on the cache-to-dispatcher channel.
#[derive(Debug)]
pub enum Notification<K> {
    /// A mirror mutation
    Change(ChangeEvent<K>),
    /// Every event of the first initial listing precedes this marker
    InitialSyncApplied,
}

impl<K> From<ChangeEvent<K>> for Notification<K> {
    fn from(event: ChangeEvent<K>) -> Self {
        Self::Change(event)
    }
}
