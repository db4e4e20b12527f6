//! In-memory storage backend (no persistence)
//!
//! Useful for:
//! - Testing without database dependencies
//! - Running the hub without a database file
//!
//! All data is lost on restart.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use super::backend::{AlertQuery, AlertStore, DeviceRegistry};
use super::error::{StorageError, StorageResult};
use super::schema::{AlertRecord, Device, NewAlert};

#[derive(Default)]
struct AlertLog {
    next_id: i64,
    alerts: BTreeMap<i64, AlertRecord>,
}

/// In-memory storage backend
#[derive(Default)]
pub struct MemoryBackend {
    devices: RwLock<Vec<Device>>,
    alerts: RwLock<AlertLog>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a backend with an initial set of devices
    pub fn with_devices(devices: Vec<Device>) -> Self {
        Self {
            devices: RwLock::new(devices),
            alerts: RwLock::default(),
        }
    }
}

#[async_trait]
impl DeviceRegistry for MemoryBackend {
    async fn list_devices(&self) -> StorageResult<Vec<Device>> {
        Ok(self.devices.read().await.clone())
    }

    async fn add_device(&self, device: Device) -> StorageResult<()> {
        let mut devices = self.devices.write().await;
        if devices.iter().any(|d| d.host == device.host) {
            return Err(StorageError::DuplicateDevice(device.host));
        }
        debug!("registering device {}", device.host);
        devices.push(device);
        Ok(())
    }

    async fn remove_device(&self, host: &str) -> StorageResult<bool> {
        let mut devices = self.devices.write().await;
        let before = devices.len();
        devices.retain(|d| d.host != host);
        Ok(devices.len() != before)
    }
}

#[async_trait]
impl AlertStore for MemoryBackend {
    async fn create_alert(&self, alert: NewAlert) -> StorageResult<i64> {
        let mut log = self.alerts.write().await;
        log.next_id += 1;
        let id = log.next_id;

        log.alerts.insert(
            id,
            AlertRecord {
                id,
                host: alert.host,
                severity: alert.severity,
                content: alert.content,
                seen: false,
                created_at: alert.created_at,
            },
        );

        Ok(id)
    }

    async fn list_alerts(&self, query: AlertQuery) -> StorageResult<Vec<AlertRecord>> {
        let log = self.alerts.read().await;

        let mut alerts: Vec<AlertRecord> = log
            .alerts
            .values()
            .filter(|alert| query.matches(alert))
            .cloned()
            .collect();

        // newest first, ids break ties between alerts created in the same instant
        alerts.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        alerts.truncate(query.limit);

        Ok(alerts)
    }

    async fn mark_seen(&self, ids: &[i64]) -> StorageResult<usize> {
        let mut log = self.alerts.write().await;
        let mut updated = 0;
        for id in ids {
            if let Some(alert) = log.alerts.get_mut(id) {
                alert.seen = true;
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn delete_alerts(&self, ids: &[i64]) -> StorageResult<usize> {
        let mut log = self.alerts.write().await;
        Ok(ids
            .iter()
            .filter(|id| log.alerts.remove(*id).is_some())
            .count())
    }
}
