use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, trace};

use crate::{
    alerts::Finding,
    notify::Notifier,
    storage::{AlertStore, NewAlert},
};

use super::suppression::SuppressionStore;

/// Records findings in the suppression store, persists raised alerts and
/// hands them to the notifier.
#[derive(Clone)]
pub struct Dispatcher {
    suppression: Arc<SuppressionStore>,
    alerts: Arc<dyn AlertStore>,
    notifier: Arc<dyn Notifier>,
}

impl Dispatcher {
    pub fn new(
        suppression: Arc<SuppressionStore>,
        alerts: Arc<dyn AlertStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            suppression,
            alerts,
            notifier,
        }
    }

    /// Handle one finding.
    ///
    /// Returns the handle of the detached notification task for a raised
    /// finding. Dropping it does not cancel the notification.
    #[instrument(skip_all, fields(host = %finding.host(), alert_type = %finding.alert_type()))]
    pub async fn dispatch(&self, finding: Finding) -> Option<JoinHandle<()>> {
        let candidate = match finding {
            Finding::Suppressed { host, alert_type } => {
                self.suppression.record_suppressed_hit(&host, alert_type);
                return None;
            }
            Finding::Raised(candidate) => candidate,
        };

        // the evaluator's check was a read; an overlapping check may have won
        if !self.suppression.try_fire(&candidate.host, candidate.alert_type) {
            debug!("{} already alerted for {}", candidate.alert_type, candidate.host);
            return None;
        }

        let alert = NewAlert {
            host: candidate.host.clone(),
            severity: candidate.severity,
            content: candidate.content.clone(),
            created_at: self.suppression.now(),
        };

        match self.alerts.create_alert(alert).await {
            Ok(id) => info!(
                "{} alert {id} for {}: {}",
                candidate.severity, candidate.host, candidate.content
            ),
            // the notification still goes out
            Err(e) => error!("failed to persist alert for {}: {e}", candidate.host),
        }

        let notifier = self.notifier.clone();
        Some(tokio::spawn(async move {
            trace!("notifying about {} on {}", candidate.alert_type, candidate.host);
            match notifier
                .send_alert_email(&candidate.host, candidate.severity, &candidate.content)
                .await
            {
                Ok(()) => debug!("notification sent for {}", candidate.host),
                Err(e) => error!("failed to send notification for {}: {e:#}", candidate.host),
            }
        }))
    }
}
