//! Handler contract
//!
//! Application logic plugs in by implementing [`EventHandler`]. Each method
//! is invoked at most once per observed event and only after the initial
//! sync. Errors are logged by the dispatcher and never retried.

use std::sync::Arc;

/// Reacts to changes in the watched collection.
///
/// All methods default to doing nothing, so implementations only override
/// the kinds they care about. Handlers run while the sync gate's shared lock
/// is held and must not block indefinitely.
#[async_trait::async_trait]
pub trait EventHandler<K>: Send + Sync
where
    K: Send + Sync + 'static,
{
    /// A resource was created.
    async fn on_added(&self, _obj: Arc<K>) -> anyhow::Result<()> {
        Ok(())
    }

    /// A resource changed, or was re-announced by a resync (`old` and `new`
    /// are then the same object).
    async fn on_updated(&self, _old: Arc<K>, _new: Arc<K>) -> anyhow::Result<()> {
        Ok(())
    }

    /// A resource was deleted; `obj` is its last known state.
    async fn on_deleted(&self, _obj: Arc<K>) -> anyhow::Result<()> {
        Ok(())
    }
}
