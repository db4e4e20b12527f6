//! Storage trait definitions
//!
//! This module defines the traits the monitor uses to reach its storage
//! collaborators. Every backend implements both.

use async_trait::async_trait;

use super::error::StorageResult;
use super::schema::{AlertRecord, Device, NewAlert};

/// Default number of alerts returned by a listing
pub const DEFAULT_ALERT_LIMIT: usize = 100;

/// Filter for listing alerts
#[derive(Debug, Clone)]
pub struct AlertQuery {
    /// Only alerts for this host
    pub host: Option<String>,

    /// Skip alerts that were already marked as seen
    pub only_unseen: bool,

    /// Maximum number of results (newest first)
    pub limit: usize,
}

impl Default for AlertQuery {
    fn default() -> Self {
        Self {
            host: None,
            only_unseen: false,
            limit: DEFAULT_ALERT_LIMIT,
        }
    }
}

impl AlertQuery {
    pub fn unseen() -> Self {
        Self {
            only_unseen: true,
            ..Self::default()
        }
    }

    pub fn for_host(host: impl Into<String>) -> Self {
        Self {
            host: Some(host.into()),
            ..Self::default()
        }
    }

    pub(crate) fn matches(&self, alert: &AlertRecord) -> bool {
        if self.only_unseen && alert.seen {
            return false;
        }
        match &self.host {
            Some(host) => &alert.host == host,
            None => true,
        }
    }
}

/// The fleet of managed hosts.
///
/// The monitor reads the full listing on every poll cycle and never caches
/// it, so additions and removals take effect within one interval.
#[async_trait]
pub trait DeviceRegistry: Send + Sync {
    /// All registered devices
    async fn list_devices(&self) -> StorageResult<Vec<Device>>;

    /// Register a new device; fails if the host is already known
    async fn add_device(&self, device: Device) -> StorageResult<()>;

    /// Remove a device, returning whether it existed
    async fn remove_device(&self, host: &str) -> StorageResult<bool>;
}

/// The alert log.
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync` as they are shared by every
/// device check of a poll cycle.
#[async_trait]
pub trait AlertStore: Send + Sync {
    /// Persist an alert (initially unseen) and return its id
    async fn create_alert(&self, alert: NewAlert) -> StorageResult<i64>;

    /// Alerts matching the query, newest first
    async fn list_alerts(&self, query: AlertQuery) -> StorageResult<Vec<AlertRecord>>;

    /// Mark alerts as seen, returning how many were updated
    async fn mark_seen(&self, ids: &[i64]) -> StorageResult<usize>;

    /// Delete (resolve) alerts, returning how many were removed
    async fn delete_alerts(&self, ids: &[i64]) -> StorageResult<usize>;
}
