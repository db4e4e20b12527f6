//! Alert vocabulary shared by the evaluator, the dispatcher and the storage layer.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Severity of an alert, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(Severity::Info),
            "warning" => Ok(Severity::Warning),
            "critical" => Ok(Severity::Critical),
            other => anyhow::bail!("unknown severity: {other}"),
        }
    }
}

/// Condition an alert was raised for.
///
/// The `Display` form is the stable key used for suppression bookkeeping
/// (`connectivity`, `cpu_high`, `ram_high`, `disk_high`, `suspicious_port_<N>`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlertType {
    Connectivity,
    CpuHigh,
    RamHigh,
    DiskHigh,
    SuspiciousPort(u16),
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertType::Connectivity => f.write_str("connectivity"),
            AlertType::CpuHigh => f.write_str("cpu_high"),
            AlertType::RamHigh => f.write_str("ram_high"),
            AlertType::DiskHigh => f.write_str("disk_high"),
            AlertType::SuspiciousPort(port) => write!(f, "suspicious_port_{port}"),
        }
    }
}

impl FromStr for AlertType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "connectivity" => Ok(AlertType::Connectivity),
            "cpu_high" => Ok(AlertType::CpuHigh),
            "ram_high" => Ok(AlertType::RamHigh),
            "disk_high" => Ok(AlertType::DiskHigh),
            other => {
                let port = other
                    .strip_prefix("suspicious_port_")
                    .ok_or_else(|| anyhow::anyhow!("unknown alert type: {other}"))?;
                let port = port
                    .parse()
                    .map_err(|_| anyhow::anyhow!("invalid port in alert type: {other}"))?;
                Ok(AlertType::SuspiciousPort(port))
            }
        }
    }
}

/// An alert that passed suppression and should be persisted and sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertCandidate {
    pub host: String,
    pub alert_type: AlertType,
    pub severity: Severity,
    pub content: String,
}

/// Outcome of one triggered condition during an evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Finding {
    /// The condition fired and is not muted.
    Raised(AlertCandidate),

    /// The condition fired but an alert of the same type went out recently.
    Suppressed { host: String, alert_type: AlertType },
}

impl Finding {
    pub fn host(&self) -> &str {
        match self {
            Finding::Raised(candidate) => &candidate.host,
            Finding::Suppressed { host, .. } => host,
        }
    }

    pub fn alert_type(&self) -> AlertType {
        match self {
            Finding::Raised(candidate) => candidate.alert_type,
            Finding::Suppressed { alert_type, .. } => *alert_type,
        }
    }

    pub fn candidate(&self) -> Option<&AlertCandidate> {
        match self {
            Finding::Raised(candidate) => Some(candidate),
            Finding::Suppressed { .. } => None,
        }
    }

    pub fn is_suppressed(&self) -> bool {
        matches!(self, Finding::Suppressed { .. })
    }
}
