//! Monitor Scheduler
//!
//! Two loops run side by side until [`MonitorHandle::stop`] is called:
//!
//! ```text
//! poll loop:    tick → list devices → spawn one check per device → tick → ...
//! cleanup loop: tick → sweep suppression entries older than the retention window
//! ```
//!
//! Shutdown goes through a `watch` channel, so every loop observes it. Device
//! checks already in flight are not cancelled; they finish on their own,
//! bounded by the request timeout.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, error, info, instrument, trace, warn};

use crate::{
    config::Config,
    notify::Notifier,
    storage::{AlertStore, Device, DeviceRegistry},
};

use super::client::HealthClient;
use super::dispatcher::Dispatcher;
use super::rules::RuleEvaluator;
use super::suppression::SuppressionStore;

/// Timing of the two loops
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub interval: Duration,
    pub cleanup_interval: Duration,
    pub retention: Duration,

    /// Upper bound on device checks running at once, unbounded if `None`
    pub max_concurrent_checks: Option<usize>,
}

impl SchedulerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            interval: config.monitor.interval(),
            cleanup_interval: config.suppression.cleanup_interval(),
            retention: config.suppression.retention(),
            max_concurrent_checks: config.monitor.max_concurrent_checks,
        }
    }
}

#[derive(Clone)]
pub struct HealthMonitor {
    registry: Arc<dyn DeviceRegistry>,
    client: HealthClient,
    evaluator: RuleEvaluator,
    dispatcher: Dispatcher,
    suppression: Arc<SuppressionStore>,
    limiter: Option<Arc<Semaphore>>,
    settings: SchedulerSettings,
}

impl HealthMonitor {
    pub fn new(
        config: &Config,
        registry: Arc<dyn DeviceRegistry>,
        alerts: Arc<dyn AlertStore>,
        notifier: Arc<dyn Notifier>,
    ) -> anyhow::Result<Self> {
        let suppression = Arc::new(SuppressionStore::new(config.suppression.clone()));
        Self::with_suppression(config, suppression, registry, alerts, notifier)
    }

    /// Like [`new`](Self::new), sharing an existing suppression store
    pub fn with_suppression(
        config: &Config,
        suppression: Arc<SuppressionStore>,
        registry: Arc<dyn DeviceRegistry>,
        alerts: Arc<dyn AlertStore>,
        notifier: Arc<dyn Notifier>,
    ) -> anyhow::Result<Self> {
        let client = HealthClient::new(config.agent.clone(), config.monitor.request_timeout())?;
        let evaluator = RuleEvaluator::new(config.thresholds.clone(), suppression.clone());
        let dispatcher = Dispatcher::new(suppression.clone(), alerts, notifier);
        let settings = SchedulerSettings::from_config(config);

        Ok(Self {
            registry,
            client,
            evaluator,
            dispatcher,
            suppression,
            limiter: None,
            settings: settings.clone(),
        }
        .with_settings(settings))
    }

    /// Replace the loop timing and the concurrency cap
    pub fn with_settings(mut self, settings: SchedulerSettings) -> Self {
        self.limiter = settings
            .max_concurrent_checks
            .map(|permits| Arc::new(Semaphore::new(permits.max(1))));
        self.settings = settings;
        self
    }

    pub fn suppression(&self) -> &Arc<SuppressionStore> {
        &self.suppression
    }

    /// Start the poll loop and the cleanup loop.
    ///
    /// The first poll happens one interval after the start. Dropping the
    /// returned handle also stops both loops, but without waiting for them.
    pub fn spawn(self) -> MonitorHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        info!(
            "starting health monitor (interval: {:?}, cleanup every {:?})",
            self.settings.interval, self.settings.cleanup_interval
        );

        let poll = tokio::spawn(self.clone().poll_loop(shutdown_rx.clone()));
        let cleanup = tokio::spawn(self.cleanup_loop(shutdown_rx));

        MonitorHandle {
            shutdown_tx,
            poll,
            cleanup,
        }
    }

    async fn poll_loop(self, mut shutdown: watch::Receiver<bool>) {
        let period = self.settings.interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let checks = self.check_all_devices().await;
                    trace!("launched {} device checks", checks.len());
                }
                _ = shutdown.changed() => break,
            }
        }

        debug!("poll loop stopped");
    }

    async fn cleanup_loop(self, mut shutdown: watch::Receiver<bool>) {
        let period = self.settings.cleanup_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = self.suppression.sweep(self.settings.retention);
                    if removed > 0 {
                        info!("cleaned up {removed} stale suppression entries");
                    }
                }
                _ = shutdown.changed() => break,
            }
        }

        debug!("cleanup loop stopped");
    }

    /// Run one poll cycle: read the device listing and launch one check per
    /// device.
    ///
    /// The checks run detached; the returned handles may be awaited or
    /// dropped. A failing registry skips the cycle.
    #[instrument(skip(self))]
    pub async fn check_all_devices(&self) -> Vec<JoinHandle<()>> {
        let devices = match self.registry.list_devices().await {
            Ok(devices) => devices,
            Err(e) => {
                error!("failed to list devices, skipping cycle: {e}");
                return vec![];
            }
        };

        debug!("checking {} devices", devices.len());

        devices
            .into_iter()
            .map(|device| {
                let monitor = self.clone();
                tokio::spawn(async move {
                    let _permit = match &monitor.limiter {
                        Some(limiter) => limiter.clone().acquire_owned().await.ok(),
                        None => None,
                    };
                    monitor.check_device(&device).await;
                })
            })
            .collect()
    }

    /// Run one poll cycle and wait until every device check finished.
    ///
    /// Notifications may still be in flight when this returns.
    pub async fn poll_once(&self) {
        for result in join_all(self.check_all_devices().await).await {
            if let Err(e) = result {
                warn!("device check task failed: {e}");
            }
        }
    }

    /// Fetch, evaluate and dispatch for a single device.
    ///
    /// Returns the handles of the notification tasks it started.
    #[instrument(skip_all, fields(host = %device.host))]
    pub async fn check_device(&self, device: &Device) -> Vec<JoinHandle<()>> {
        let outcome = self.client.fetch(&device.host, &device.access_token).await;

        if let Err(unreachable) = &outcome {
            warn!("{} unreachable: {unreachable}", device.host);
        }

        let findings = self.evaluator.evaluate(&device.host, &outcome);

        let mut notifications = vec![];
        for finding in findings {
            if let Some(handle) = self.dispatcher.dispatch(finding).await {
                notifications.push(handle);
            }
        }
        notifications
    }
}

/// Control handle of a running [`HealthMonitor`]
pub struct MonitorHandle {
    shutdown_tx: watch::Sender<bool>,
    poll: JoinHandle<()>,
    cleanup: JoinHandle<()>,
}

impl MonitorHandle {
    /// Signal both loops to stop and wait until they have.
    pub async fn stop(self) {
        // a send error means both loops are already gone
        let _ = self.shutdown_tx.send(true);

        for (name, handle) in [("poll", self.poll), ("cleanup", self.cleanup)] {
            if let Err(e) = handle.await {
                error!("{name} loop ended abnormally: {e}");
            }
        }

        info!("health monitor stopped");
    }

    pub fn is_running(&self) -> bool {
        !self.poll.is_finished() || !self.cleanup.is_finished()
    }
}
