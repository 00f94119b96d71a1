//! Environment configuration
//!
//! Every setting has a default, so an empty environment watches
//! `apps/v1 Deployment` in all namespaces.

use crate::error::ControllerError;
use informer::{CacheConfig, ControllerConfig, PreSyncPolicy};
use kube::core::GroupVersionKind;
use kube_runtime::watcher;
use std::env;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_GROUP: &str = "apps";
const DEFAULT_VERSION: &str = "v1";
const DEFAULT_KIND: &str = "Deployment";
const DEFAULT_RESYNC_PERIOD_SECS: u64 = 60;

/// Settings for one watcher process.
#[derive(Debug, Clone, PartialEq)]
pub struct WatcherConfig {
    /// API group, empty for the core group
    pub group: String,
    /// API version
    pub version: String,
    /// Resource kind
    pub kind: String,
    /// Namespace scope; `None` watches all namespaces
    pub namespace: Option<String>,
    /// Label selector applied to the list/watch
    pub label_selector: Option<String>,
    /// Resync period; `None` disables resync
    pub resync_period: Option<Duration>,
    /// Cache-to-dispatcher channel capacity
    pub event_buffer: usize,
    /// Handling of events seen before the initial sync
    pub pre_sync: PreSyncPolicy,
}

impl WatcherConfig {
    /// Loads configuration from the process environment.
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Loads configuration through `lookup`, which returns a variable's value if set.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Unset and empty are the same for optional values
        let optional = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let version = optional("WATCH_VERSION").unwrap_or_else(|| DEFAULT_VERSION.to_string());
        let kind = optional("WATCH_KIND").unwrap_or_else(|| DEFAULT_KIND.to_string());
        // WATCH_GROUP="" selects the core group, so only an unset variable takes the default
        let group = lookup("WATCH_GROUP")
            .map(|v| v.trim().to_string())
            .unwrap_or_else(|| DEFAULT_GROUP.to_string());

        let resync_secs: u64 = parse(&optional, "RESYNC_PERIOD_SECS")?.unwrap_or(DEFAULT_RESYNC_PERIOD_SECS);
        let event_buffer: usize = parse(&optional, "EVENT_BUFFER")?.unwrap_or(informer::controller::DEFAULT_EVENT_BUFFER);
        if event_buffer == 0 {
            return Err(ControllerError::InvalidConfig(
                "EVENT_BUFFER must be greater than zero".to_string(),
            ));
        }
        let pre_sync = match optional("PRESYNC_POLICY") {
            Some(raw) => raw
                .parse::<PreSyncPolicy>()
                .map_err(|e| ControllerError::InvalidConfig(format!("PRESYNC_POLICY: {}", e)))?,
            None => PreSyncPolicy::default(),
        };

        Ok(Self {
            group,
            version,
            kind,
            namespace: optional("WATCH_NAMESPACE"),
            label_selector: optional("WATCH_LABEL_SELECTOR"),
            resync_period: (resync_secs > 0).then(|| Duration::from_secs(resync_secs)),
            event_buffer,
            pre_sync,
        })
    }

    /// Group/version/kind of the watched collection.
    pub fn gvk(&self) -> GroupVersionKind {
        GroupVersionKind::gvk(&self.group, &self.version, &self.kind)
    }

    /// `group/version` as written in manifests (`v1` for the core group).
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    /// List/watch parameters.
    pub fn watcher_config(&self) -> watcher::Config {
        let config = watcher::Config::default();
        match &self.label_selector {
            Some(selector) => config.labels(selector),
            None => config,
        }
    }

    /// Settings for the informer controller.
    pub fn informer_config(&self) -> ControllerConfig {
        ControllerConfig {
            cache: CacheConfig {
                resync_period: self.resync_period,
            },
            pre_sync: self.pre_sync,
            event_buffer: self.event_buffer,
        }
    }
}

fn parse<T, F>(optional: &F, key: &str) -> Result<Option<T>, ControllerError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    optional(key)
        .map(|raw| {
            raw.parse::<T>()
                .map_err(|e| ControllerError::InvalidConfig(format!("{}={:?}: {}", key, raw, e)))
        })
        .transpose()
}
