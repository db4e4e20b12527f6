pub mod alerts;
pub mod config;
pub mod monitors;
pub mod notify;
pub mod storage;
pub mod util;

use serde::{Deserialize, Serialize};

/// Health payload served by an agent on its health endpoint.
///
/// `cpu`, `ram` and `disk` are required; a payload without them is treated as
/// malformed. Everything else falls back to its default when the agent omits it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub cpu: CpuInformation,
    pub ram: RamInformation,
    pub disk: DiskInformation,
    #[serde(default)]
    pub network: NetworkInformation,
    #[serde(default)]
    pub open_ports: Vec<OpenPort>,
    #[serde(default)]
    pub uptime: String,
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CpuInformation {
    pub usage_percent: f64,
    #[serde(default)]
    pub cores: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RamInformation {
    pub usage_percent: f64,
    #[serde(default)]
    pub total_mb: f64,
    #[serde(default)]
    pub used_mb: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskInformation {
    pub usage_percent: f64,
    #[serde(default)]
    pub total_gb: f64,
    #[serde(default)]
    pub used_gb: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkInformation {
    #[serde(default)]
    pub bytes_received: f64,
    #[serde(default)]
    pub bytes_sent: f64,
}

/// A listening socket reported by the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenPort {
    pub port: u16,
    pub protocol: String,
    #[serde(default)]
    pub process: String,
}

impl OpenPort {
    pub fn is_tcp(&self) -> bool {
        self.protocol.eq_ignore_ascii_case("tcp")
    }
}
