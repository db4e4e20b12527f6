//! Failure handling: bad agents, broken collaborators
//!
//! None of these may stop the monitor or leak into other devices' checks.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fleetwarden::{
    alerts::{AlertType, Severity},
    monitors::HealthMonitor,
    notify::Notifier,
    storage::{
        AlertQuery, AlertRecord, AlertStore, Device, DeviceRegistry, NewAlert, StorageError,
        StorageResult, memory::MemoryBackend,
    },
};
use pretty_assertions::assert_eq;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::*;

struct UnavailableStore;

#[async_trait]
impl AlertStore for UnavailableStore {
    async fn create_alert(&self, _alert: NewAlert) -> StorageResult<i64> {
        Err(StorageError::ConnectionFailed("database unavailable".to_string()))
    }

    async fn list_alerts(&self, _query: AlertQuery) -> StorageResult<Vec<AlertRecord>> {
        Err(StorageError::ConnectionFailed("database unavailable".to_string()))
    }

    async fn mark_seen(&self, _ids: &[i64]) -> StorageResult<usize> {
        Ok(0)
    }

    async fn delete_alerts(&self, _ids: &[i64]) -> StorageResult<usize> {
        Ok(0)
    }
}

struct UnavailableRegistry;

#[async_trait]
impl DeviceRegistry for UnavailableRegistry {
    async fn list_devices(&self) -> StorageResult<Vec<Device>> {
        Err(StorageError::QueryFailed("no such table: devices".to_string()))
    }

    async fn add_device(&self, _device: Device) -> StorageResult<()> {
        Ok(())
    }

    async fn remove_device(&self, _host: &str) -> StorageResult<bool> {
        Ok(false)
    }
}

struct RejectingNotifier;

#[async_trait]
impl Notifier for RejectingNotifier {
    async fn send_alert_email(&self, _: &str, _: Severity, _: &str) -> anyhow::Result<()> {
        anyhow::bail!("535 authentication failed")
    }
}

async fn agent_with_status(status: u16, body: &str) -> MockServer {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/client/health"))
        .respond_with(ResponseTemplate::new(status).set_body_string(body))
        .mount(&mock_server)
        .await;
    mock_server
}

#[tokio::test]
async fn test_rejected_token_raises_connectivity_alert() {
    let agent = agent_with_status(401, "unauthorized").await;
    let device = Device::new(mock_host(&agent), "expired-token");
    let harness = Harness::new(vec![device.clone()]);

    harness.check(&device).await;

    let alerts = harness.backend.list_alerts(AlertQuery::default()).await.unwrap();
    assert_eq!(alerts.len(), 1);
    assert!(alerts[0].content.starts_with("Device unreachable (attempt 1): "));
    assert!(alerts[0].content.contains("401"));
}

#[tokio::test]
async fn test_malformed_payload_raises_connectivity_alert() {
    let agent = agent_with_status(200, r#"{"cpu": "broken"}"#).await;
    let device = Device::new(mock_host(&agent), "token");
    let harness = Harness::new(vec![device.clone()]);

    harness.check(&device).await;

    assert_eq!(harness.suppression.count(&device.host, AlertType::Connectivity), 1);
    assert!(harness.notifier.sent()[0].content.contains("failed to parse health payload"));
}

#[tokio::test]
async fn test_storage_outage_still_notifies() {
    let device = Device::new("127.0.0.1:1", "token");
    let notifier = Arc::new(RecordingNotifier::default());
    let monitor = HealthMonitor::new(
        &test_config(),
        Arc::new(FixedRegistry(vec![device.clone()])),
        Arc::new(UnavailableStore),
        notifier.clone(),
    )
    .unwrap();

    await_all(monitor.check_device(&device).await).await;

    assert_eq!(notifier.sent().len(), 1);
    assert!(monitor.suppression().should_suppress(&device.host, AlertType::Connectivity));
}

#[tokio::test]
async fn test_notifier_failure_keeps_alert() {
    let device = Device::new("127.0.0.1:1", "token");
    let backend = Arc::new(MemoryBackend::with_devices(vec![device.clone()]));
    let monitor = HealthMonitor::new(
        &test_config(),
        backend.clone(),
        backend.clone(),
        Arc::new(RejectingNotifier),
    )
    .unwrap();

    await_all(monitor.check_device(&device).await).await;

    let alerts = backend.list_alerts(AlertQuery::unseen()).await.unwrap();
    assert_eq!(alerts.len(), 1);
}

#[tokio::test]
async fn test_registry_failure_skips_cycle() {
    let backend = Arc::new(MemoryBackend::new());
    let monitor = HealthMonitor::new(
        &test_config(),
        Arc::new(UnavailableRegistry),
        backend.clone(),
        Arc::new(RecordingNotifier::default()),
    )
    .unwrap();

    assert!(monitor.check_all_devices().await.is_empty());
    monitor.poll_once().await;
    assert!(backend.list_alerts(AlertQuery::default()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_failing_device_does_not_affect_others() {
    let healthy = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/client/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(health_json(12.0, 34.0, 56.0)))
        .expect(1)
        .mount(&healthy)
        .await;
    let broken = agent_with_status(500, "internal error").await;

    let harness = Harness::new(vec![
        Device::new(mock_host(&broken), "token"),
        Device::new(mock_host(&healthy), "token"),
    ]);

    harness.monitor.poll_once().await;

    let alerts = harness.backend.list_alerts(AlertQuery::default()).await.unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].host, mock_host(&broken));
    assert!(harness.suppression.entry(&mock_host(&healthy), AlertType::Connectivity).is_none());
}

#[tokio::test]
async fn test_recovered_host_starts_new_burst() {
    let agent = agent_with_status(503, "starting").await;
    let device = Device::new(mock_host(&agent), "token");
    let harness = Harness::new(vec![device.clone()]);

    harness.check(&device).await;
    harness.clock.advance(Duration::from_secs(6 * 60));
    harness.check(&device).await;
    assert_eq!(harness.suppression.count(&device.host, AlertType::Connectivity), 2);

    agent.reset().await;
    Mock::given(method("GET"))
        .and(path("/client/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(health_json(10.0, 10.0, 10.0)))
        .mount(&agent)
        .await;

    harness.check(&device).await;
    assert_eq!(harness.suppression.count(&device.host, AlertType::Connectivity), 0);
}
