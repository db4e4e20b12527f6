//! Monitoring against the SQLite backend

use std::sync::Arc;

use fleetwarden::{
    alerts::Severity,
    monitors::HealthMonitor,
    storage::{AlertQuery, AlertStore, Device, DeviceRegistry, sqlite::SqliteBackend},
};
use pretty_assertions::assert_eq;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::*;

#[tokio::test]
async fn test_alerts_survive_restart() {
    let temp_dir = tempfile::tempdir().unwrap();
    let db_path = temp_dir.path().join("fleet.db");

    let agent = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/client/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(health_json(10.0, 10.0, 96.5)))
        .mount(&agent)
        .await;

    {
        let backend = Arc::new(SqliteBackend::new(&db_path).await.unwrap());
        backend
            .add_device(Device::new(mock_host(&agent), "token"))
            .await
            .unwrap();
        backend
            .add_device(Device::new("127.0.0.1:1", "token"))
            .await
            .unwrap();

        let monitor = HealthMonitor::new(
            &test_config(),
            backend.clone(),
            backend.clone(),
            Arc::new(RecordingNotifier::default()),
        )
        .unwrap();
        monitor.poll_once().await;
    }

    let backend = SqliteBackend::new(&db_path).await.unwrap();
    assert_eq!(backend.list_devices().await.unwrap().len(), 2);

    let disk = backend
        .list_alerts(AlertQuery::for_host(mock_host(&agent)))
        .await
        .unwrap();
    assert_eq!(disk.len(), 1);
    assert_eq!(disk[0].severity, Severity::Critical);
    assert_eq!(disk[0].content, "High Disk usage: 96.50% (threshold: 90.00%)");
    assert!(!disk[0].seen);

    let unreachable = backend
        .list_alerts(AlertQuery::for_host("127.0.0.1:1"))
        .await
        .unwrap();
    assert_eq!(unreachable.len(), 1);
    assert_eq!(unreachable[0].severity, Severity::Warning);
}

#[tokio::test]
async fn test_acknowledge_and_resolve() {
    let temp_dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(SqliteBackend::new(temp_dir.path().join("fleet.db")).await.unwrap());
    let device = Device::new("127.0.0.1:1", "token");

    let monitor = HealthMonitor::new(
        &test_config(),
        Arc::new(FixedRegistry(vec![device.clone()])),
        backend.clone(),
        Arc::new(RecordingNotifier::default()),
    )
    .unwrap();
    await_all(monitor.check_device(&device).await).await;

    let unseen = backend.list_alerts(AlertQuery::unseen()).await.unwrap();
    assert_eq!(unseen.len(), 1);
    let id = unseen[0].id;

    assert_eq!(backend.mark_seen(&[id]).await.unwrap(), 1);
    assert!(backend.list_alerts(AlertQuery::unseen()).await.unwrap().is_empty());

    assert_eq!(backend.delete_alerts(&[id]).await.unwrap(), 1);
    assert!(backend.list_alerts(AlertQuery::default()).await.unwrap().is_empty());
}
