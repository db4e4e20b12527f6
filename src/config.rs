use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail, ensure};
use lettre::message::Mailbox;
use tracing::{trace, warn};

use crate::storage::Device;

/// Storage backend configuration
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory storage (no persistence)
    #[serde(rename = "none")]
    None,

    /// SQLite database holding the device registry and the alert log
    Sqlite {
        #[serde(default = "default_sqlite_path")]
        path: PathBuf,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Sqlite {
            path: default_sqlite_path(),
        }
    }
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("./fleetwarden.db")
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct Config {
    #[serde(default)]
    pub monitor: MonitorConfig,

    #[serde(default)]
    pub agent: AgentConfig,

    #[serde(default)]
    pub thresholds: Thresholds,

    #[serde(default)]
    pub suppression: SuppressionConfig,

    /// Storage configuration (defaults to SQLite)
    #[serde(default)]
    pub storage: StorageConfig,

    /// Devices added to the registry on startup
    #[serde(default)]
    pub devices: Vec<Device>,

    pub email: Option<EmailConfig>,

    pub webhook: Option<WebhookConfig>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct MonitorConfig {
    /// Seconds between two polls of the whole fleet
    #[serde(default = "default_interval")]
    pub interval: u64,

    /// Per-request timeout for the agent health call, in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,

    /// Upper bound of device checks running at once; unbounded when absent
    pub max_concurrent_checks: Option<usize>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            request_timeout: default_request_timeout(),
            max_concurrent_checks: None,
        }
    }
}

impl MonitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }
}

fn default_interval() -> u64 {
    30
}

fn default_request_timeout() -> u64 {
    10
}

/// How the hub reaches the agent running on each device
#[derive(Debug, Clone, serde::Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_protocol")]
    pub protocol: String,

    #[serde(default = "crate::util::get_default_agent_port")]
    pub port: u16,

    #[serde(default = "default_health_path")]
    pub health_path: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            protocol: default_protocol(),
            port: crate::util::get_default_agent_port(),
            health_path: default_health_path(),
        }
    }
}

fn default_protocol() -> String {
    String::from("http")
}

fn default_health_path() -> String {
    String::from("/client/health")
}

/// Static alerting thresholds, in percent
#[derive(Debug, Clone, serde::Deserialize)]
pub struct Thresholds {
    #[serde(default = "default_cpu_threshold")]
    pub cpu: f64,

    #[serde(default = "default_ram_threshold")]
    pub ram: f64,

    #[serde(default = "default_disk_threshold")]
    pub disk: f64,

    /// TCP ports that should not be listening on managed hosts
    #[serde(default = "default_suspicious_ports")]
    pub suspicious_ports: Vec<u16>,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            cpu: default_cpu_threshold(),
            ram: default_ram_threshold(),
            disk: default_disk_threshold(),
            suspicious_ports: default_suspicious_ports(),
        }
    }
}

fn default_cpu_threshold() -> f64 {
    80.0
}

fn default_ram_threshold() -> f64 {
    85.0
}

fn default_disk_threshold() -> f64 {
    90.0
}

fn default_suspicious_ports() -> Vec<u16> {
    vec![22, 23, 3389]
}

/// Alert suppression and escalation settings. All durations are in seconds.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct SuppressionConfig {
    #[serde(default = "default_connectivity_suppression")]
    pub connectivity_suppression: u64,

    /// Attempt number at which a connectivity alert becomes critical
    #[serde(default = "default_connectivity_max_burst")]
    pub connectivity_max_burst: u32,

    /// Burst detection window. Accepted and reported, but escalation follows
    /// the consecutive count, which only restarts when the agent answers.
    #[serde(default = "default_connectivity_burst_window")]
    pub connectivity_burst_window: u64,

    #[serde(default = "default_metric_suppression")]
    pub metric_suppression: u64,

    /// Consecutive count at which a metric alert becomes critical
    #[serde(default = "default_metric_escalation_threshold")]
    pub metric_escalation_threshold: u32,

    #[serde(default = "default_suspicious_port_window")]
    pub suspicious_port_window: u64,

    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval: u64,

    /// Suppression entries older than this are dropped by the cleanup sweep
    #[serde(default = "default_retention")]
    pub retention: u64,
}

impl Default for SuppressionConfig {
    fn default() -> Self {
        Self {
            connectivity_suppression: default_connectivity_suppression(),
            connectivity_max_burst: default_connectivity_max_burst(),
            connectivity_burst_window: default_connectivity_burst_window(),
            metric_suppression: default_metric_suppression(),
            metric_escalation_threshold: default_metric_escalation_threshold(),
            suspicious_port_window: default_suspicious_port_window(),
            cleanup_interval: default_cleanup_interval(),
            retention: default_retention(),
        }
    }
}

impl SuppressionConfig {
    pub fn connectivity_suppression(&self) -> Duration {
        Duration::from_secs(self.connectivity_suppression)
    }

    pub fn metric_suppression(&self) -> Duration {
        Duration::from_secs(self.metric_suppression)
    }

    pub fn suspicious_port_window(&self) -> Duration {
        Duration::from_secs(self.suspicious_port_window)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention)
    }
}

fn default_connectivity_suppression() -> u64 {
    5 * 60
}

fn default_connectivity_max_burst() -> u32 {
    3
}

fn default_connectivity_burst_window() -> u64 {
    15 * 60
}

fn default_metric_suppression() -> u64 {
    10 * 60
}

fn default_metric_escalation_threshold() -> u32 {
    5
}

fn default_suspicious_port_window() -> u64 {
    24 * 60 * 60
}

fn default_cleanup_interval() -> u64 {
    60 * 60
}

fn default_retention() -> u64 {
    24 * 60 * 60
}

/// SMTP settings for alert emails.
///
/// Credentials missing from the file are taken from `SMTP_USERNAME` and
/// `SMTP_PASSWORD`. Without credentials, email delivery is disabled.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct EmailConfig {
    #[serde(default = "default_smtp_host")]
    pub smtp_host: String,

    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,

    pub username: Option<String>,

    pub password: Option<String>,

    pub from: String,

    #[serde(default)]
    pub recipients: Vec<String>,
}

impl EmailConfig {
    /// Fill missing credentials from the environment
    pub fn with_env_credentials(mut self) -> Self {
        if self.username.is_none() {
            self.username = crate::util::get_smtp_username();
        }
        if self.password.is_none() {
            self.password = crate::util::get_smtp_password();
        }
        self
    }

    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.username.as_deref(), self.password.as_deref()) {
            (Some(user), Some(password)) if !user.is_empty() && !password.is_empty() => {
                Some((user, password))
            }
            _ => None,
        }
    }
}

fn default_smtp_host() -> String {
    String::from("smtp.gmail.com")
}

fn default_smtp_port() -> u16 {
    587
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct WebhookConfig {
    pub url: String,
}

impl Config {
    /// Reject settings the monitor cannot run with.
    ///
    /// This is the only place where a misconfiguration becomes fatal; it runs
    /// before anything is started.
    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(self.monitor.interval > 0, "monitor.interval must be positive");
        ensure!(
            self.monitor.request_timeout > 0,
            "monitor.request_timeout must be positive"
        );
        if let Some(limit) = self.monitor.max_concurrent_checks {
            ensure!(limit > 0, "monitor.max_concurrent_checks must be positive");
        }

        ensure!(
            matches!(self.agent.protocol.as_str(), "http" | "https"),
            "agent.protocol must be http or https, got {}",
            self.agent.protocol
        );
        ensure!(
            self.agent.health_path.starts_with('/'),
            "agent.health_path must start with '/'"
        );

        for (name, value) in [
            ("cpu", self.thresholds.cpu),
            ("ram", self.thresholds.ram),
            ("disk", self.thresholds.disk),
        ] {
            ensure!(
                (0.0..=100.0).contains(&value),
                "thresholds.{name} must be within 0..=100, got {value}"
            );
        }

        let suppression = &self.suppression;
        ensure!(
            suppression.connectivity_max_burst > 0,
            "suppression.connectivity_max_burst must be positive"
        );
        ensure!(
            suppression.metric_escalation_threshold > 0,
            "suppression.metric_escalation_threshold must be positive"
        );
        ensure!(
            suppression.cleanup_interval > 0,
            "suppression.cleanup_interval must be positive"
        );

        for device in &self.devices {
            ensure!(!device.host.is_empty(), "device with empty host");
        }

        if let Some(email) = &self.email {
            if email.credentials().is_some() {
                email
                    .from
                    .parse::<Mailbox>()
                    .with_context(|| format!("invalid email.from address: {}", email.from))?;
                for recipient in &email.recipients {
                    recipient
                        .parse::<Mailbox>()
                        .with_context(|| format!("invalid email recipient: {recipient}"))?;
                }
            } else {
                warn!("SMTP credentials not configured, email alerts will be disabled");
            }
        }

        if let Some(webhook) = &self.webhook
            && !(webhook.url.starts_with("http://") || webhook.url.starts_with("https://"))
        {
            bail!("webhook.url must be an http(s) URL");
        }

        Ok(())
    }
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read configuration file {path}"))?;
    parse_config(&file_content)
}

pub fn parse_config(content: &str) -> anyhow::Result<Config> {
    let mut config: Config = serde_json::from_str(content)
        .map_err(|e| anyhow::anyhow!("Invalid configuration file provided! ({e})"))?;
    config.email = config.email.map(EmailConfig::with_env_credentials);
    config.validate()?;
    trace!("loaded config: {config:?}");
    Ok(config)
}
