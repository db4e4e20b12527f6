//! Outbound alert notifications.
//!
//! The dispatcher only knows the [`Notifier`] trait. Delivery is best-effort:
//! a failed notification is logged by the caller and never retried.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::alerts::Severity;

pub mod email;
pub mod webhook;

pub use email::EmailNotifier;
pub use webhook::WebhookNotifier;

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one alert.
    ///
    /// A notifier without usable transport settings returns `Ok(())`.
    async fn send_alert_email(
        &self,
        host: &str,
        severity: Severity,
        content: &str,
    ) -> anyhow::Result<()>;
}

/// Forwards every alert to all inner notifiers.
///
/// Each notifier is tried even if an earlier one failed; the first error is
/// returned after all of them ran.
#[derive(Clone, Default)]
pub struct NotifierSet {
    notifiers: Vec<Arc<dyn Notifier>>,
}

impl NotifierSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifiers.push(notifier);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.notifiers.is_empty()
    }
}

#[async_trait]
impl Notifier for NotifierSet {
    async fn send_alert_email(
        &self,
        host: &str,
        severity: Severity,
        content: &str,
    ) -> anyhow::Result<()> {
        let mut first_error = None;

        for notifier in &self.notifiers {
            if let Err(e) = notifier.send_alert_email(host, severity, content).await {
                warn!("notifier failed for {host}: {e:#}");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
