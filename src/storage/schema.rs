//! Records kept by the storage backends

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::alerts::Severity;

use super::error::StorageError;

/// Operating system family of a managed host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OsFamily {
    #[default]
    Linux,
    Windows,
    Other,
}

impl OsFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            OsFamily::Linux => "linux",
            OsFamily::Windows => "windows",
            OsFamily::Other => "other",
        }
    }
}

impl fmt::Display for OsFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OsFamily {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "linux" => Ok(OsFamily::Linux),
            "windows" => Ok(OsFamily::Windows),
            "other" => Ok(OsFamily::Other),
            other => Err(StorageError::InvalidData(format!("unknown os family: {other}"))),
        }
    }
}

/// A managed host as known to the registry.
///
/// `host` is the unique key. It is an IP address or hostname, optionally with
/// an explicit agent port (`10.0.0.5:9000`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub host: String,

    /// Bearer token presented to the agent
    pub access_token: String,

    #[serde(default)]
    pub os: OsFamily,
}

impl Device {
    pub fn new(host: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            access_token: access_token.into(),
            os: OsFamily::default(),
        }
    }
}

/// An alert about to be written to the alert log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAlert {
    pub host: String,
    pub severity: Severity,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// A persisted alert
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertRecord {
    pub id: i64,
    pub host: String,
    pub severity: Severity,
    pub content: String,

    /// Whether an operator acknowledged the alert
    pub seen: bool,

    pub created_at: DateTime<Utc>,
}
