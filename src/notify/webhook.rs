use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde_json::json;
use tracing::{info, instrument};

use super::Notifier;
use crate::{alerts::Severity, config::WebhookConfig};

/// Posts every alert as JSON to a fixed URL
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(config: &WebhookConfig) -> Self {
        Self {
            client: Client::new(),
            url: config.url.clone(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    #[instrument(skip(self, content))]
    async fn send_alert_email(
        &self,
        host: &str,
        severity: Severity,
        content: &str,
    ) -> anyhow::Result<()> {
        let payload = json!({
            "host": host,
            "severity": severity,
            "message": content,
            "timestamp": Utc::now().to_rfc3339()
        });

        let response = self.client.post(&self.url).json(&payload).send().await?;

        if !response.status().is_success() {
            anyhow::bail!("webhook alert failed with status: {}", response.status());
        }

        info!("successfully sent webhook alert");
        Ok(())
    }
}
