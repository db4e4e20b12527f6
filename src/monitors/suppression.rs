//! Suppression Store
//!
//! Tracks, per (host, alert type), when an alert was last emitted and how many
//! consecutive times the condition was seen. The evaluator asks it whether an
//! alert should be muted and which severity applies; the dispatcher records
//! every fired or suppressed hit.
//!
//! ## State per key
//!
//! ```text
//! record_fired          → last_sent_at = now, count += 1
//! try_fire              → record_fired outside the window,
//!                         record_suppressed_hit inside it
//! record_suppressed_hit → count += 1            (last_sent_at untouched)
//! reset                 → count = 0             (last_sent_at untouched)
//! sweep(retention)      → drop entries with last_sent_at older than retention
//! ```
//!
//! Both fields live in the same entry behind a single lock, so a reader always
//! sees a timestamp and a count that belong together.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, trace};

use crate::alerts::{AlertType, Severity};
use crate::config::SuppressionConfig;

/// Source of the current time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now = now
            .checked_add_signed(to_delta(by))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = to;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn to_delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}

/// Suppression state of one (host, alert type) pair
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SuppressionEntry {
    /// When an alert of this type was last emitted for the host
    pub last_sent_at: Option<DateTime<Utc>>,

    /// Consecutive hits (emitted or suppressed) since the last reset
    pub consecutive_count: u32,
}

type HostEntries = HashMap<AlertType, SuppressionEntry>;

/// Concurrency-safe suppression bookkeeping shared by all device checks
pub struct SuppressionStore {
    config: SuppressionConfig,
    clock: Arc<dyn Clock>,
    entries: RwLock<HashMap<String, HostEntries>>,
}

impl SuppressionStore {
    pub fn new(config: SuppressionConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: SuppressionConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &SuppressionConfig {
        &self.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Default suppression window of an alert type
    pub fn suppression_duration(&self, alert_type: AlertType) -> Duration {
        match alert_type {
            AlertType::Connectivity => self.config.connectivity_suppression(),
            AlertType::SuspiciousPort(_) => self.config.suspicious_port_window(),
            _ => self.config.metric_suppression(),
        }
    }

    fn read_entry<T>(
        &self,
        host: &str,
        alert_type: AlertType,
        f: impl FnOnce(&SuppressionEntry) -> T,
    ) -> Option<T> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(host)
            .and_then(|host_entries| host_entries.get(&alert_type))
            .map(f)
    }

    fn write_entry(
        &self,
        host: &str,
        alert_type: AlertType,
        f: impl FnOnce(&mut SuppressionEntry),
    ) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let entry = entries
            .entry(host.to_string())
            .or_default()
            .entry(alert_type)
            .or_default();
        f(entry);
    }

    /// Whether an alert of this type went out within its default window
    pub fn should_suppress(&self, host: &str, alert_type: AlertType) -> bool {
        self.should_suppress_for(host, alert_type, self.suppression_duration(alert_type))
    }

    /// Whether an alert of this type went out within `window`.
    ///
    /// A key that never fired is never suppressed.
    pub fn should_suppress_for(&self, host: &str, alert_type: AlertType, window: Duration) -> bool {
        let now = self.clock.now();
        self.read_entry(host, alert_type, |entry| entry.last_sent_at)
            .flatten()
            .is_some_and(|last| now.signed_duration_since(last) < to_delta(window))
    }

    /// Record an emitted alert
    pub fn record_fired(&self, host: &str, alert_type: AlertType) {
        let now = self.clock.now();
        self.write_entry(host, alert_type, |entry| {
            entry.last_sent_at = Some(now);
            entry.consecutive_count = entry.consecutive_count.saturating_add(1);
            trace!("{host}: {alert_type} fired (count: {})", entry.consecutive_count);
        });
    }

    /// Check the default window and record the outcome under one lock.
    ///
    /// Returns `true` and records a fired alert when nothing went out within
    /// the window; otherwise records a suppressed hit and returns `false`. Of
    /// two checks racing for the same key, only one fires.
    pub fn try_fire(&self, host: &str, alert_type: AlertType) -> bool {
        let now = self.clock.now();
        let window = to_delta(self.suppression_duration(alert_type));
        let mut fired = false;

        self.write_entry(host, alert_type, |entry| {
            fired = !entry
                .last_sent_at
                .is_some_and(|last| now.signed_duration_since(last) < window);
            if fired {
                entry.last_sent_at = Some(now);
            }
            entry.consecutive_count = entry.consecutive_count.saturating_add(1);
            trace!(
                "{host}: {alert_type} {} (count: {})",
                if fired { "fired" } else { "suppressed" },
                entry.consecutive_count
            );
        });

        fired
    }

    /// Record a hit that was muted by suppression
    pub fn record_suppressed_hit(&self, host: &str, alert_type: AlertType) {
        self.write_entry(host, alert_type, |entry| {
            entry.consecutive_count = entry.consecutive_count.saturating_add(1);
            trace!("{host}: {alert_type} suppressed (count: {})", entry.consecutive_count);
        });
    }

    /// Current consecutive count, zero for unknown keys
    pub fn count(&self, host: &str, alert_type: AlertType) -> u32 {
        self.read_entry(host, alert_type, |entry| entry.consecutive_count)
            .unwrap_or_default()
    }

    /// Clear the consecutive count once the condition is healthy again.
    ///
    /// `last_sent_at` is kept, so a condition that flaps back within its
    /// window stays suppressed.
    pub fn reset(&self, host: &str, alert_type: AlertType) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let Some(host_entries) = entries.get_mut(host) else {
            return;
        };

        match host_entries.get_mut(&alert_type) {
            Some(entry) if entry.last_sent_at.is_some() => entry.consecutive_count = 0,
            Some(_) => {
                host_entries.remove(&alert_type);
            }
            None => {}
        }

        if host_entries.is_empty() {
            entries.remove(host);
        }
    }

    /// Severity for a metric alert: `critical` once the count reached the
    /// escalation threshold, `baseline` otherwise.
    pub fn determine_severity(
        &self,
        host: &str,
        alert_type: AlertType,
        baseline: Severity,
    ) -> Severity {
        if self.count(host, alert_type) >= self.config.metric_escalation_threshold {
            baseline.max(Severity::Critical)
        } else {
            baseline
        }
    }

    /// Drop entries whose last emission is older than `retention`, and hosts
    /// left without entries. Entries that never fired count as stale.
    ///
    /// Returns the number of removed entries.
    pub fn sweep(&self, retention: Duration) -> usize {
        let Some(cutoff) = self.clock.now().checked_sub_signed(to_delta(retention)) else {
            return 0;
        };

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let mut removed = 0;

        entries.retain(|_, host_entries| {
            let before = host_entries.len();
            host_entries.retain(|_, entry| entry.last_sent_at.is_some_and(|last| last >= cutoff));
            removed += before - host_entries.len();
            !host_entries.is_empty()
        });

        debug!("swept {removed} suppression entries, {} hosts tracked", entries.len());
        removed
    }

    /// Snapshot of one entry
    pub fn entry(&self, host: &str, alert_type: AlertType) -> Option<SuppressionEntry> {
        self.read_entry(host, alert_type, |entry| *entry)
    }

    /// Snapshot of all entries, ordered by host then alert type key
    pub fn entries(&self) -> Vec<(String, AlertType, SuppressionEntry)> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let mut all: Vec<_> = entries
            .iter()
            .flat_map(|(host, host_entries)| {
                host_entries
                    .iter()
                    .map(move |(alert_type, entry)| (host.clone(), *alert_type, *entry))
            })
            .collect();
        all.sort_by_key(|(host, alert_type, _)| (host.clone(), alert_type.to_string()));
        all
    }

    /// Number of hosts with at least one entry
    pub fn tracked_hosts(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Total number of entries
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(HashMap::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
