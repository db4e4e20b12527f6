//! Concurrency tests
//!
//! - Fan-out: slow or dead hosts do not hold back the rest of a cycle
//! - The optional cap on concurrent checks
//! - Starting and stopping both loops

use std::sync::Arc;
use std::time::{Duration, Instant};

use fleetwarden::{
    alerts::AlertType,
    monitors::{HealthMonitor, SchedulerSettings},
    storage::{AlertQuery, AlertStore, Device, DeviceRegistry, memory::MemoryBackend},
};
use pretty_assertions::assert_eq;
use tokio::net::TcpListener;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::*;

fn settings(interval: Duration, max_concurrent_checks: Option<usize>) -> SchedulerSettings {
    SchedulerSettings {
        interval,
        cleanup_interval: Duration::from_secs(3600),
        retention: Duration::from_secs(24 * 60 * 60),
        max_concurrent_checks,
    }
}

async fn healthy_agent(delay: Duration) -> MockServer {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/client/health"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(health_json(20.0, 20.0, 20.0))
                .set_delay(delay),
        )
        .mount(&mock_server)
        .await;
    mock_server
}

#[tokio::test]
async fn test_unresponsive_hosts_do_not_block_healthy_ones() {
    let agent = healthy_agent(Duration::ZERO).await;

    // accept connections, never answer: these checks hang until the 1s timeout
    let mut silent = vec![];
    for _ in 0..10 {
        silent.push(TcpListener::bind("127.0.0.1:0").await.unwrap());
    }

    let mut devices: Vec<_> = (0..40)
        .map(|_| Device::new(mock_host(&agent), "token"))
        .collect();
    devices.extend(
        silent
            .iter()
            .map(|listener| Device::new(listener.local_addr().unwrap().to_string(), "token")),
    );

    let backend = Arc::new(MemoryBackend::new());
    let monitor = HealthMonitor::new(
        &test_config(),
        Arc::new(FixedRegistry(devices)),
        backend.clone(),
        Arc::new(RecordingNotifier::default()),
    )
    .unwrap();

    let started = Instant::now();
    let cycle = tokio::spawn({
        let monitor = monitor.clone();
        async move { monitor.poll_once().await }
    });

    // all healthy hosts answered while the silent ones are still pending
    let mut answered = 0;
    while started.elapsed() < Duration::from_millis(900) {
        answered = agent.received_requests().await.unwrap_or_default().len();
        if answered == 40 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(answered, 40);
    assert!(!cycle.is_finished());

    cycle.await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));

    let alerts = backend.list_alerts(AlertQuery::default()).await.unwrap();
    assert_eq!(alerts.len(), 10);
    for listener in &silent {
        let host = listener.local_addr().unwrap().to_string();
        assert_eq!(monitor.suppression().count(&host, AlertType::Connectivity), 1);
    }
}

#[tokio::test]
async fn test_concurrency_cap_serializes_checks() {
    let agent = healthy_agent(Duration::from_millis(200)).await;
    let devices: Vec<_> = (0..4)
        .map(|_| Device::new(mock_host(&agent), "token"))
        .collect();

    let backend = Arc::new(MemoryBackend::new());
    let monitor = HealthMonitor::new(
        &test_config(),
        Arc::new(FixedRegistry(devices)),
        backend.clone(),
        Arc::new(RecordingNotifier::default()),
    )
    .unwrap()
    .with_settings(settings(Duration::from_secs(30), Some(1)));

    let started = Instant::now();
    monitor.poll_once().await;

    assert!(started.elapsed() >= Duration::from_millis(750));
    assert_eq!(agent.received_requests().await.unwrap().len(), 4);
}

#[tokio::test]
async fn test_monitor_polls_until_stopped() {
    let agent = healthy_agent(Duration::ZERO).await;
    let backend = Arc::new(MemoryBackend::with_devices(vec![Device::new(
        mock_host(&agent),
        "token",
    )]));

    let monitor = HealthMonitor::new(
        &test_config(),
        backend.clone(),
        backend.clone(),
        Arc::new(RecordingNotifier::default()),
    )
    .unwrap()
    .with_settings(settings(Duration::from_millis(50), None));

    let handle = monitor.spawn();
    tokio::time::sleep(Duration::from_millis(300)).await;

    tokio::time::timeout(Duration::from_secs(2), handle.stop())
        .await
        .expect("monitor did not stop");

    // let checks that were in flight at stop time finish
    tokio::time::sleep(Duration::from_millis(100)).await;
    let polled = agent.received_requests().await.unwrap().len();
    assert!(polled >= 2, "only {polled} polls");

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(agent.received_requests().await.unwrap().len(), polled);
}

#[tokio::test]
async fn test_registry_changes_apply_next_cycle() {
    let agent = healthy_agent(Duration::ZERO).await;
    let backend = Arc::new(MemoryBackend::new());

    let monitor = HealthMonitor::new(
        &test_config(),
        backend.clone(),
        backend.clone(),
        Arc::new(RecordingNotifier::default()),
    )
    .unwrap()
    .with_settings(settings(Duration::from_millis(50), None));

    let handle = monitor.spawn();
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert!(agent.received_requests().await.unwrap().is_empty());

    backend
        .add_device(Device::new(mock_host(&agent), "token"))
        .await
        .unwrap();

    let mut polled = false;
    for _ in 0..50 {
        if !agent.received_requests().await.unwrap().is_empty() {
            polled = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    handle.stop().await;
    assert!(polled, "new device was never polled");
}
