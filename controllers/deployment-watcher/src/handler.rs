//! Logging event handler
//!
//! Reports every delivered change as a single `info!` line.

use async_trait::async_trait;
use informer::{EventHandler, display_name};
use kube::ResourceExt;
use kube::core::DynamicObject;
use std::sync::Arc;
use tracing::info;

/// Logs `created`, `updated` and `deleted` for each resource.
#[derive(Debug, Clone)]
pub struct LoggingHandler {
    kind: String,
}

impl LoggingHandler {
    /// Creates a handler that tags log lines with `kind`.
    pub fn new(kind: impl Into<String>) -> Self {
        Self { kind: kind.into() }
    }
}

#[async_trait]
impl EventHandler<DynamicObject> for LoggingHandler {
    async fn on_added(&self, obj: Arc<DynamicObject>) -> anyhow::Result<()> {
        info!(kind = %self.kind, "created: {}", display_name(obj.as_ref()));
        Ok(())
    }

    async fn on_updated(&self, old: Arc<DynamicObject>, new: Arc<DynamicObject>) -> anyhow::Result<()> {
        info!(
            kind = %self.kind,
            from = %old.resource_version().unwrap_or_default(),
            to = %new.resource_version().unwrap_or_default(),
            "updated: {}",
            display_name(new.as_ref())
        );
        Ok(())
    }

    async fn on_deleted(&self, obj: Arc<DynamicObject>) -> anyhow::Result<()> {
        info!(kind = %self.kind, "deleted: {}", display_name(obj.as_ref()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::{ApiResource, GroupVersionKind};

    fn create_test_object(namespace: &str, name: &str, resource_version: &str) -> Arc<DynamicObject> {
        let resource = ApiResource::from_gvk(&GroupVersionKind::gvk("apps", "v1", "Deployment"));
        let mut obj = DynamicObject::new(name, &resource).within(namespace);
        obj.metadata.resource_version = Some(resource_version.to_string());
        Arc::new(obj)
    }

    #[tokio::test]
    async fn test_logging_handler_accepts_every_change() {
        let handler = LoggingHandler::new("Deployment");
        let old = create_test_object("default", "web", "1");
        let new = create_test_object("default", "web", "2");

        assert!(handler.on_added(Arc::clone(&old)).await.is_ok());
        assert!(handler.on_updated(old, Arc::clone(&new)).await.is_ok());
        assert!(handler.on_deleted(new).await.is_ok());
    }

    #[test]
    fn test_dynamic_object_display_name() {
        let obj = create_test_object("prod", "api", "7");
        assert_eq!(display_name(obj.as_ref()), "prod/api");
    }
}
