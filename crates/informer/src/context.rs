//! Run context
//!
//! The cancellation and lifetime handle for one informer run. Every blocking
//! call in the crate takes the token explicitly.

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Cancellation handle for one run. Clones share the same token.
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    token: CancellationToken,
}

impl RunContext {
    /// Creates a context that is only cancelled explicitly.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps an existing token.
    pub fn from_token(token: CancellationToken) -> Self {
        Self { token }
    }

    /// Creates a context cancelled by Ctrl-C or, on Unix, SIGTERM.
    ///
    /// Must be called from within a tokio runtime.
    pub fn with_shutdown_signal() -> Self {
        let ctx = Self::new();
        let token = ctx.token.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                () = shutdown_signal() => token.cancel(),
            }
        });
        ctx
    }

    /// The underlying token.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// A context cancelled with this one, but cancellable on its own.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
        }
    }

    /// Signals shutdown.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether shutdown has been signalled.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once shutdown has been signalled.
    pub async fn done(&self) {
        self.token.cancelled().await;
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Ctrl+C detected."),
            Err(e) => {
                error!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                info!("SIGTERM detected.");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_done_resolves_after_cancel() {
        let ctx = RunContext::new();
        assert!(!ctx.is_cancelled());

        let waiter = {
            let ctx = ctx.clone();
            tokio::spawn(async move { ctx.done().await })
        };
        ctx.cancel();

        tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .expect("done() did not resolve")
            .expect("waiter panicked");
        assert!(ctx.is_cancelled());
    }

    #[test]
    fn test_from_token_shares_cancellation() {
        let token = CancellationToken::new();
        let ctx = RunContext::from_token(token.clone());
        assert!(!ctx.is_cancelled());

        token.cancel();
        assert!(ctx.is_cancelled());
    }

    #[tokio::test]
    async fn test_child_follows_parent() {
        let parent = RunContext::new();
        let child = parent.child();

        parent.cancel();
        assert!(child.is_cancelled());
    }

    #[tokio::test]
    async fn test_child_cancel_leaves_parent_running() {
        let parent = RunContext::new();
        let child = parent.child();

        child.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[tokio::test]
    async fn test_shutdown_signal_context_starts_live() {
        let ctx = RunContext::with_shutdown_signal();
        assert!(!ctx.is_cancelled());
        ctx.cancel();
        assert!(ctx.token().is_cancelled());
    }
}
