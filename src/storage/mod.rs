//! Storage collaborators: the device registry and the alert log
//!
//! The monitor only talks to storage through two traits:
//!
//! - [`DeviceRegistry`]: the fleet, read in full on every poll cycle
//! - [`AlertStore`]: persisted alerts (insert, query, mark seen, delete)
//!
//! ## Backends
//!
//! - **SQLite** (default): embedded database, survives restarts
//! - **In-Memory**: no persistence, for testing or throwaway runs
//!
//! ## Usage
//!
//! ```no_run
//! use fleetwarden::storage::{AlertStore, AlertQuery, sqlite::SqliteBackend};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let backend = SqliteBackend::new("./fleetwarden.db").await?;
//!     let unseen = backend.list_alerts(AlertQuery::unseen()).await?;
//!     println!("{} unseen alerts", unseen.len());
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod error;
pub mod memory;
pub mod schema;
#[cfg(feature = "storage-sqlite")]
pub mod sqlite;

pub use backend::{AlertQuery, AlertStore, DeviceRegistry};
pub use error::{StorageError, StorageResult};
pub use schema::{AlertRecord, Device, NewAlert, OsFamily};
