//! SQLite storage backend implementation
//!
//! Stores the device registry and the alert log in a local SQLite file.
//!
//! ## Features
//!
//! - **Embedded**: No separate database server required
//! - **WAL mode**: Readers (alert listings) do not block the monitor's inserts
//! - **Migrations**: Schema versioning with sqlx
//!
//! Timestamps are stored as Unix milliseconds.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Pool, QueryBuilder, Row, Sqlite};
use tracing::{debug, info, instrument};

use crate::alerts::Severity;

use super::backend::{AlertQuery, AlertStore, DeviceRegistry};
use super::error::{StorageError, StorageResult};
use super::schema::{AlertRecord, Device, NewAlert};

/// SQLite storage backend
pub struct SqliteBackend {
    pool: Pool<Sqlite>,
}

impl SqliteBackend {
    /// Open (or create) the database and bring its schema up to date
    ///
    /// ## Example
    ///
    /// ```no_run
    /// # use fleetwarden::storage::sqlite::SqliteBackend;
    /// # async fn example() -> anyhow::Result<()> {
    /// let backend = SqliteBackend::new("./fleetwarden.db").await?;
    /// # Ok(())
    /// # }
    /// ```
    #[instrument(skip_all)]
    pub async fn new(db_path: impl AsRef<Path>) -> StorageResult<Self> {
        let db_path_str = db_path.as_ref().to_string_lossy().to_string();

        info!("initializing SQLite backend at: {}", db_path_str);

        let options = SqliteConnectOptions::new()
            .filename(&db_path_str)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        debug!("running database migrations");
        sqlx::migrate!("./migrations").run(&pool).await?;

        info!("database migrations complete");

        Ok(Self { pool })
    }

    fn timestamp_to_millis(dt: &DateTime<Utc>) -> i64 {
        dt.timestamp_millis()
    }

    fn millis_to_timestamp(millis: i64) -> StorageResult<DateTime<Utc>> {
        DateTime::from_timestamp_millis(millis)
            .ok_or_else(|| StorageError::InvalidData(format!("invalid timestamp: {millis}")))
    }

    fn alert_from_row(row: SqliteRow) -> StorageResult<AlertRecord> {
        let severity: String = row.try_get("severity")?;
        let severity = severity
            .parse::<Severity>()
            .map_err(|e| StorageError::InvalidData(e.to_string()))?;

        Ok(AlertRecord {
            id: row.try_get("id")?,
            host: row.try_get("host")?,
            severity,
            content: row.try_get("content")?,
            seen: row.try_get::<i64, _>("seen")? != 0,
            created_at: Self::millis_to_timestamp(row.try_get("created_at")?)?,
        })
    }

    /// Append ` IN (?, ?, ...)` for the given ids
    fn push_id_list(builder: &mut QueryBuilder<'_, Sqlite>, ids: &[i64]) {
        builder.push(" IN (");
        let mut separated = builder.separated(", ");
        for id in ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");
    }
}

#[async_trait]
impl DeviceRegistry for SqliteBackend {
    #[instrument(skip(self))]
    async fn list_devices(&self) -> StorageResult<Vec<Device>> {
        let rows = sqlx::query("SELECT host, access_token, os FROM devices ORDER BY host")
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(|row| -> StorageResult<Device> {
                let os: String = row.try_get("os")?;
                Ok(Device {
                    host: row.try_get("host")?,
                    access_token: row.try_get("access_token")?,
                    os: os.parse()?,
                })
            })
            .collect()
    }

    #[instrument(skip(self, device), fields(host = %device.host))]
    async fn add_device(&self, device: Device) -> StorageResult<()> {
        let result = sqlx::query("INSERT INTO devices (host, access_token, os) VALUES (?, ?, ?)")
            .bind(&device.host)
            .bind(&device.access_token)
            .bind(device.os.as_str())
            .execute(&self.pool)
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StorageError::DuplicateDevice(device.host))
            }
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self))]
    async fn remove_device(&self, host: &str) -> StorageResult<bool> {
        let result = sqlx::query("DELETE FROM devices WHERE host = ?")
            .bind(host)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl AlertStore for SqliteBackend {
    #[instrument(skip(self, alert), fields(host = %alert.host, severity = %alert.severity))]
    async fn create_alert(&self, alert: NewAlert) -> StorageResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO alerts (host, severity, content, seen, created_at)
            VALUES (?, ?, ?, 0, ?)
            "#,
        )
        .bind(&alert.host)
        .bind(alert.severity.as_str())
        .bind(&alert.content)
        .bind(Self::timestamp_to_millis(&alert.created_at))
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    #[instrument(skip(self))]
    async fn list_alerts(&self, query: AlertQuery) -> StorageResult<Vec<AlertRecord>> {
        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT id, host, severity, content, seen, created_at FROM alerts WHERE 1 = 1",
        );
        if let Some(host) = &query.host {
            builder.push(" AND host = ").push_bind(host.clone());
        }
        if query.only_unseen {
            builder.push(" AND seen = 0");
        }
        builder
            .push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(query.limit as i64);

        let rows = builder.build().fetch_all(&self.pool).await?;

        let alerts = rows
            .into_iter()
            .map(Self::alert_from_row)
            .collect::<StorageResult<Vec<_>>>()?;
        debug!("query returned {} alerts", alerts.len());
        Ok(alerts)
    }

    #[instrument(skip(self))]
    async fn mark_seen(&self, ids: &[i64]) -> StorageResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut builder = QueryBuilder::<Sqlite>::new("UPDATE alerts SET seen = 1 WHERE id");
        Self::push_id_list(&mut builder, ids);

        let result = builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected() as usize)
    }

    #[instrument(skip(self))]
    async fn delete_alerts(&self, ids: &[i64]) -> StorageResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut builder = QueryBuilder::<Sqlite>::new("DELETE FROM alerts WHERE id");
        Self::push_id_list(&mut builder, ids);

        let result = builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected() as usize)
    }
}
