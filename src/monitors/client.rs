//! Health Snapshot Client
//!
//! Fetches the health payload of a single agent. Every way a fetch can go
//! wrong (transport error, timeout, non-2xx status, unreadable or malformed
//! body) collapses into [`HostUnreachable`]: the caller only needs to know
//! that the host's health cannot currently be confirmed.

use std::fmt;
use std::time::Duration;

use tracing::{instrument, trace};

use crate::{HealthSnapshot, config::AgentConfig, util::agent_url};

/// The agent could not be reached or did not return a usable health payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostUnreachable {
    pub reason: String,
}

impl HostUnreachable {
    fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl fmt::Display for HostUnreachable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reason)
    }
}

impl std::error::Error for HostUnreachable {}

/// HTTP client for agent health endpoints.
///
/// One underlying `reqwest::Client` (and its connection pool) is shared by
/// all device checks.
#[derive(Debug, Clone)]
pub struct HealthClient {
    client: reqwest::Client,
    agent: AgentConfig,
}

impl HealthClient {
    pub fn new(agent: AgentConfig, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, agent })
    }

    pub fn url_for(&self, host: &str) -> String {
        agent_url(
            &self.agent.protocol,
            host,
            self.agent.port,
            &self.agent.health_path,
        )
    }

    #[instrument(skip(self, access_token))]
    pub async fn fetch(
        &self,
        host: &str,
        access_token: &str,
    ) -> Result<HealthSnapshot, HostUnreachable> {
        let url = self.url_for(host);

        trace!("requesting health from {url}");

        let response = self
            .client
            .get(&url)
            .bearer_auth(access_token)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .send()
            .await
            .map_err(|e| HostUnreachable::new(format!("network error: {e}")))?;

        if !response.status().is_success() {
            return Err(HostUnreachable::new(format!(
                "agent returned status {}",
                response.status()
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| HostUnreachable::new(format!("failed to read response body: {e}")))?;

        let snapshot = serde_json::from_str::<HealthSnapshot>(&body)
            .map_err(|e| HostUnreachable::new(format!("failed to parse health payload: {e}")))?;

        trace!("received health snapshot");

        Ok(snapshot)
    }
}
