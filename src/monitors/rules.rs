use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, instrument, trace};

use crate::{
    HealthSnapshot,
    alerts::{AlertCandidate, AlertType, Finding, Severity},
    config::Thresholds,
};

use super::client::HostUnreachable;
use super::suppression::SuppressionStore;

/// Turns one device's fetch outcome into findings.
///
/// The evaluator only reads suppression state and resets counts of healthy
/// conditions; recording fired and suppressed hits is left to the dispatcher.
#[derive(Clone)]
pub struct RuleEvaluator {
    thresholds: Thresholds,
    suppression: Arc<SuppressionStore>,
}

struct Metric {
    alert_type: AlertType,
    label: &'static str,
    value: f64,
    threshold: f64,
    baseline: Severity,
}

impl RuleEvaluator {
    pub fn new(thresholds: Thresholds, suppression: Arc<SuppressionStore>) -> Self {
        Self {
            thresholds,
            suppression,
        }
    }

    #[instrument(skip(self, outcome))]
    pub fn evaluate(
        &self,
        host: &str,
        outcome: &Result<HealthSnapshot, HostUnreachable>,
    ) -> Vec<Finding> {
        match outcome {
            Err(unreachable) => vec![self.evaluate_unreachable(host, unreachable)],
            Ok(snapshot) => {
                // the agent answered, so any running connectivity burst is over
                self.suppression.reset(host, AlertType::Connectivity);

                let mut findings = self.evaluate_metrics(host, snapshot);
                findings.extend(self.evaluate_ports(host, snapshot));
                findings
            }
        }
    }

    fn evaluate_unreachable(&self, host: &str, unreachable: &HostUnreachable) -> Finding {
        let alert_type = AlertType::Connectivity;

        if self.suppression.should_suppress(host, alert_type) {
            trace!("{host}: connectivity alert suppressed");
            return Finding::Suppressed {
                host: host.to_string(),
                alert_type,
            };
        }

        // the count only restarts once the agent answers again
        let attempt = self.suppression.count(host, alert_type).saturating_add(1);
        let severity = if attempt >= self.suppression.config().connectivity_max_burst {
            Severity::Critical
        } else {
            Severity::Warning
        };

        debug!("{host}: unreachable (attempt {attempt}, {severity})");

        Finding::Raised(AlertCandidate {
            host: host.to_string(),
            alert_type,
            severity,
            content: format!("Device unreachable (attempt {attempt}): {unreachable}"),
        })
    }

    fn evaluate_metrics(&self, host: &str, snapshot: &HealthSnapshot) -> Vec<Finding> {
        let metrics = [
            Metric {
                alert_type: AlertType::CpuHigh,
                label: "CPU",
                value: snapshot.cpu.usage_percent,
                threshold: self.thresholds.cpu,
                baseline: Severity::Warning,
            },
            Metric {
                alert_type: AlertType::RamHigh,
                label: "RAM",
                value: snapshot.ram.usage_percent,
                threshold: self.thresholds.ram,
                baseline: Severity::Warning,
            },
            Metric {
                alert_type: AlertType::DiskHigh,
                label: "Disk",
                value: snapshot.disk.usage_percent,
                threshold: self.thresholds.disk,
                baseline: Severity::Critical,
            },
        ];

        metrics
            .into_iter()
            .filter_map(|metric| self.evaluate_metric(host, metric))
            .collect()
    }

    fn evaluate_metric(&self, host: &str, metric: Metric) -> Option<Finding> {
        let Metric {
            alert_type,
            label,
            value,
            threshold,
            baseline,
        } = metric;

        // at or under the threshold counts as healthy
        if value <= threshold {
            self.suppression.reset(host, alert_type);
            return None;
        }

        if self.suppression.should_suppress(host, alert_type) {
            trace!("{host}: {alert_type} suppressed ({value:.2}%)");
            return Some(Finding::Suppressed {
                host: host.to_string(),
                alert_type,
            });
        }

        let severity = self
            .suppression
            .determine_severity(host, alert_type, baseline);

        debug!("{host}: {label} usage {value:.2}% exceeds {threshold:.2}% ({severity})");

        Some(Finding::Raised(AlertCandidate {
            host: host.to_string(),
            alert_type,
            severity,
            content: format!("High {label} usage: {value:.2}% (threshold: {threshold:.2}%)"),
        }))
    }

    fn evaluate_ports(&self, host: &str, snapshot: &HealthSnapshot) -> Vec<Finding> {
        let window = self.suppression.config().suspicious_port_window();
        let mut seen = BTreeSet::new();
        let mut findings = vec![];

        for open_port in &snapshot.open_ports {
            if !open_port.is_tcp()
                || !self.thresholds.suspicious_ports.contains(&open_port.port)
                || !seen.insert(open_port.port)
            {
                continue;
            }

            let alert_type = AlertType::SuspiciousPort(open_port.port);

            if self.suppression.should_suppress_for(host, alert_type, window) {
                findings.push(Finding::Suppressed {
                    host: host.to_string(),
                    alert_type,
                });
                continue;
            }

            let process = if open_port.process.is_empty() {
                "unknown"
            } else {
                open_port.process.as_str()
            };

            debug!("{host}: suspicious port {} open", open_port.port);

            findings.push(Finding::Raised(AlertCandidate {
                host: host.to_string(),
                alert_type,
                severity: Severity::Info,
                content: format!(
                    "Suspicious port open: {} ({}) - Process: {process}",
                    open_port.port, open_port.protocol
                ),
            }));
        }

        findings
    }
}
