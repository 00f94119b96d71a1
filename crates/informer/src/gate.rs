//! Sync gate
//!
//! Single point of truth for "is it safe to act on events". The flag sits
//! behind a reader/writer lock: handlers run while holding a shared read
//! guard, and the one transition to `true` takes the exclusive lock, so the
//! write happens-before every later read.

use std::sync::Arc;
use tokio::sync::{RwLock, RwLockReadGuard, watch};
use tracing::{debug, warn};

/// Monotone flag marking the end of the initial sync.
///
/// Clones share the same flag.
#[derive(Debug, Clone)]
pub struct SyncGate {
    synced: Arc<RwLock<bool>>,
    opened: Arc<watch::Sender<bool>>,
}

impl Default for SyncGate {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncGate {
    /// Creates a closed gate.
    pub fn new() -> Self {
        let (opened, _) = watch::channel(false);
        Self {
            synced: Arc::new(RwLock::new(false)),
            opened: Arc::new(opened),
        }
    }

    /// Current value under a shared lock.
    pub async fn read(&self) -> bool {
        *self.synced.read().await
    }

    /// Shared guard over the flag.
    ///
    /// While any guard is held `set_synced` waits. Never call `set_synced`
    /// from the task holding a guard.
    pub async fn read_guard(&self) -> RwLockReadGuard<'_, bool> {
        self.synced.read().await
    }

    /// Opens the gate. Returns `false` if it was already open.
    pub async fn set_synced(&self) -> bool {
        let mut synced = self.synced.write().await;
        if *synced {
            warn!("Sync gate already open");
            return false;
        }
        *synced = true;
        self.opened.send_replace(true);
        debug!("Sync gate opened");
        true
    }

    /// Resolves once the gate is open.
    pub async fn wait_synced(&self) {
        let mut opened = self.opened.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = opened.wait_for(|open| *open).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_gate_starts_closed() {
        let gate = SyncGate::new();
        assert!(!gate.read().await);
    }

    #[tokio::test]
    async fn test_gate_is_monotone() {
        let gate = SyncGate::new();

        assert!(gate.set_synced().await);
        assert!(gate.read().await);

        // Second transition is a no-op
        assert!(!gate.set_synced().await);
        for _ in 0..10 {
            assert!(gate.read().await);
        }
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let gate = SyncGate::new();
        let reader = gate.clone();

        gate.set_synced().await;
        assert!(reader.read().await);
    }

    #[tokio::test]
    async fn test_wait_synced_resolves_after_open() {
        let gate = SyncGate::new();
        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.wait_synced().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        gate.set_synced().await;
        tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .expect("waiter did not resolve")
            .expect("waiter panicked");
    }

    #[tokio::test]
    async fn test_wait_synced_on_open_gate_returns_immediately() {
        let gate = SyncGate::new();
        gate.set_synced().await;
        tokio::time::timeout(Duration::from_secs(1), gate.wait_synced())
            .await
            .expect("open gate should not block");
    }

    #[tokio::test]
    async fn test_read_guard_blocks_writer() {
        let gate = SyncGate::new();
        let guard = gate.read_guard().await;

        let writer = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.set_synced().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!writer.is_finished(), "writer must wait for readers");
        assert!(!*guard);

        drop(guard);
        let opened = writer.await.expect("writer panicked");
        assert!(opened);
        assert!(gate.read().await);
    }

    #[tokio::test]
    async fn test_concurrent_readers_see_write() {
        let gate = SyncGate::new();
        gate.set_synced().await;

        let readers: Vec<_> = (0..8)
            .map(|_| {
                let gate = gate.clone();
                tokio::spawn(async move { gate.read().await })
            })
            .collect();
        for reader in readers {
            assert!(reader.await.expect("reader panicked"));
        }
    }
}
