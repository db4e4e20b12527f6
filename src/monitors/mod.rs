//! The health-monitoring engine.
//!
//! ```text
//! scheduler ──tick──▶ client.fetch ──▶ rules.evaluate ──▶ dispatcher.dispatch
//!                                           │                   │
//!                                           └── suppression ◀───┘
//! ```

pub mod client;
pub mod dispatcher;
pub mod rules;
pub mod scheduler;
pub mod suppression;

pub use client::{HealthClient, HostUnreachable};
pub use dispatcher::Dispatcher;
pub use rules::RuleEvaluator;
pub use scheduler::{HealthMonitor, MonitorHandle, SchedulerSettings};
pub use suppression::{Clock, ManualClock, SuppressionEntry, SuppressionStore, SystemClock};
