//! End-to-end device checks: fetch → evaluate → suppress → persist → notify

use std::time::Duration;

use assert_matches::assert_matches;
use fleetwarden::{
    alerts::{AlertType, Severity},
    storage::{AlertQuery, AlertStore, Device},
};
use pretty_assertions::assert_eq;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::*;

async fn agent_returning(body: serde_json::Value) -> MockServer {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/client/health"))
        .and(header("Authorization", "Bearer token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(&mock_server)
        .await;
    mock_server
}

#[tokio::test]
async fn test_unreachable_host_escalates_to_critical() {
    // nothing listens on port 1
    let device = Device::new("127.0.0.1:1", "token");
    let harness = Harness::new(vec![device.clone()]);

    for _ in 0..3 {
        harness.check(&device).await;
        // past the connectivity window
        harness.clock.advance(Duration::from_secs(6 * 60));
    }

    let severities: Vec<_> = harness
        .notifier
        .sent()
        .into_iter()
        .map(|alert| alert.severity)
        .collect();
    assert_eq!(
        severities,
        vec![Severity::Warning, Severity::Warning, Severity::Critical]
    );

    let alerts = harness.backend.list_alerts(AlertQuery::default()).await.unwrap();
    assert_eq!(alerts.len(), 3);
    assert!(alerts[0].content.starts_with("Device unreachable (attempt 3): "));
    assert_eq!(alerts[0].severity, Severity::Critical);
}

#[tokio::test]
async fn test_unreachable_host_within_window_alerts_once() {
    let device = Device::new("127.0.0.1:1", "token");
    let harness = Harness::new(vec![device.clone()]);

    for _ in 0..3 {
        harness.check(&device).await;
        harness.clock.advance(Duration::from_secs(30));
    }

    assert_eq!(harness.notifier.sent().len(), 1);
    assert_eq!(
        harness.suppression.count("127.0.0.1:1", AlertType::Connectivity),
        3
    );
}

#[tokio::test]
async fn test_cpu_spike_then_recovery() {
    let hot = agent_returning(health_json(92.0, 30.0, 30.0)).await;
    let device = Device::new(mock_host(&hot), "token");
    let harness = Harness::new(vec![device.clone()]);

    harness.check(&device).await;

    let sent = harness.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].severity, Severity::Warning);
    assert_eq!(sent[0].content, "High CPU usage: 92.00% (threshold: 80.00%)");
    assert_eq!(harness.suppression.count(&device.host, AlertType::CpuHigh), 1);

    // same host, cooled down
    hot.reset().await;
    Mock::given(method("GET"))
        .and(path("/client/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(health_json(60.0, 30.0, 30.0)))
        .mount(&hot)
        .await;

    harness.clock.advance(Duration::from_secs(30));
    harness.check(&device).await;

    assert_eq!(harness.notifier.sent().len(), 1);
    assert_eq!(harness.suppression.count(&device.host, AlertType::CpuHigh), 0);
    assert_matches!(
        harness.suppression.entry(&device.host, AlertType::CpuHigh),
        Some(entry) if entry.last_sent_at.is_some()
    );
}

#[tokio::test]
async fn test_simultaneous_breaches_alert_independently() {
    let agent = agent_returning(health_json(95.0, 90.0, 99.0)).await;
    let device = Device::new(mock_host(&agent), "token");
    let harness = Harness::new(vec![device.clone()]);

    harness.check(&device).await;

    let alerts = harness.backend.list_alerts(AlertQuery::default()).await.unwrap();
    assert_eq!(alerts.len(), 3);

    let mut by_severity: Vec<_> = alerts
        .iter()
        .map(|a| (a.severity, a.content.split(':').next().unwrap().to_string()))
        .collect();
    by_severity.sort();
    assert_eq!(
        by_severity,
        vec![
            (Severity::Warning, "High CPU usage".to_string()),
            (Severity::Warning, "High RAM usage".to_string()),
            (Severity::Critical, "High Disk usage".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_suspicious_port_reported_once_per_day() {
    let agent = agent_returning(health_json_with_ports(&[
        (3389, "tcp", "TermService"),
        (443, "tcp", "nginx"),
    ]))
    .await;
    let device = Device::new(mock_host(&agent), "token");
    let harness = Harness::new(vec![device.clone()]);

    harness.check(&device).await;
    harness.clock.advance(Duration::from_secs(60 * 60));
    harness.check(&device).await;

    let sent = harness.notifier.sent();
    assert_eq!(
        sent,
        vec![SentAlert {
            host: device.host.clone(),
            severity: Severity::Info,
            content: "Suspicious port open: 3389 (tcp) - Process: TermService".to_string(),
        }]
    );

    harness.clock.advance(Duration::from_secs(24 * 60 * 60));
    harness.check(&device).await;
    assert_eq!(harness.notifier.sent().len(), 2);
}

#[tokio::test]
async fn test_sustained_breach_escalates_when_window_reopens() {
    let agent = agent_returning(health_json(30.0, 97.0, 30.0)).await;
    let device = Device::new(mock_host(&agent), "token");
    let harness = Harness::new(vec![device.clone()]);

    // one alert, then muted hits every 30s for five minutes
    for _ in 0..10 {
        harness.check(&device).await;
        harness.clock.advance(Duration::from_secs(30));
    }
    assert_eq!(harness.notifier.sent().len(), 1);

    harness.clock.advance(Duration::from_secs(10 * 60));
    harness.check(&device).await;

    let sent = harness.notifier.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].severity, Severity::Warning);
    assert_eq!(sent[1].severity, Severity::Critical);
}

#[tokio::test]
async fn test_poll_once_checks_every_registered_device() {
    let healthy = agent_returning(health_json(10.0, 10.0, 10.0)).await;
    let hot = agent_returning(health_json(10.0, 10.0, 95.0)).await;
    let harness = Harness::new(vec![
        Device::new(mock_host(&healthy), "token"),
        Device::new(mock_host(&hot), "token"),
        Device::new("127.0.0.1:1", "token"),
    ]);

    harness.monitor.poll_once().await;

    let mut hosts: Vec<_> = harness
        .backend
        .list_alerts(AlertQuery::default())
        .await
        .unwrap()
        .into_iter()
        .map(|a| a.host)
        .collect();
    hosts.sort();
    let mut expected = vec![mock_host(&hot), "127.0.0.1:1".to_string()];
    expected.sort();
    assert_eq!(hosts, expected);

    assert!(wait_for(Duration::from_secs(2), || harness.notifier.sent().len() == 2).await);
}
