//! Durable record of work units and completed source paths.
//!
//! One SQLite database holds two tables:
//!
//! - `unit`: every transfer and downstream package the workflow has started,
//!   with at most one row flagged `current` (enforced by a partial unique index).
//! - `completed_path`: source paths already turned into transfers.
//!
//! The store is opened once, handed to the workflow driver, and closed on
//! shutdown. A current unit found at startup is what lets the driver resume
//! after a crash instead of starting the same work twice.

use std::path::Path;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::contract::{CompletedSet, SourcePath, Unit, UnitInfo, UnitStatus, UnitType};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unit {0} not found")]
    NotFound(i64),

    #[error("unit {0} is already current")]
    CurrentExists(i64),

    #[error("corrupt unit row: {0}")]
    Corrupt(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

const UNIT_COLUMNS: &str =
    "id, uuid, path, unit_type, status, microservice, directory_name, current, parent_uuid";

/// A unit about to be persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUnit {
    pub uuid: Option<Uuid>,
    pub path: SourcePath,
    pub unit_type: UnitType,
    pub status: Option<UnitStatus>,
    pub microservice: Option<String>,
    pub directory_name: Option<String>,
    pub current: bool,
    pub parent_uuid: Option<Uuid>,
}

impl NewUnit {
    /// A freshly started transfer, current and not yet approved.
    pub fn started_transfer(path: SourcePath, directory_name: impl Into<String>) -> Self {
        Self {
            uuid: None,
            path,
            unit_type: UnitType::Transfer,
            status: None,
            microservice: None,
            directory_name: Some(directory_name.into()),
            current: true,
            parent_uuid: None,
        }
    }
}

/// Fields to change on an existing unit; `None` leaves a column untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnitUpdate {
    pub uuid: Option<Uuid>,
    pub status: Option<UnitStatus>,
    pub microservice: Option<String>,
    pub directory_name: Option<String>,
    pub current: Option<bool>,
}

impl UnitUpdate {
    /// Progress fields taken from a status payload.
    pub fn from_info(info: &UnitInfo) -> Self {
        Self {
            status: Some(info.status),
            microservice: info.microservice.clone(),
            directory_name: info.directory.clone(),
            ..Self::default()
        }
    }
}

#[derive(Clone)]
pub struct UnitStore {
    pool: SqlitePool,
}

impl UnitStore {
    /// Opens or creates the database file and ensures the schema exists.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.ensure_schema().await?;
        info!(path = %path.display(), "Unit store opened");
        Ok(store)
    }

    /// A private in-memory database, for tests and dry runs.
    pub async fn in_memory() -> Result<Self> {
        // A single connection that never expires, or the database vanishes.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    pub async fn close(self) {
        self.pool.close().await;
    }

    async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS unit (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                uuid TEXT UNIQUE,
                path BLOB NOT NULL,
                unit_type TEXT NOT NULL,
                status TEXT,
                microservice TEXT,
                directory_name TEXT,
                current INTEGER NOT NULL DEFAULT 0,
                parent_uuid TEXT,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_unit_single_current ON unit(current) WHERE current = 1",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS completed_path (
                path BLOB PRIMARY KEY,
                completed_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Persists a unit. Fails with [`StoreError::CurrentExists`] when the new
    /// unit is flagged current while another one already is.
    pub async fn add_unit(&self, unit: NewUnit) -> Result<Unit> {
        if unit.current {
            if let Some(existing) = self.current_unit().await? {
                return Err(StoreError::CurrentExists(existing.id));
            }
        }

        let id = sqlx::query(
            r#"
            INSERT INTO unit (uuid, path, unit_type, status, microservice, directory_name, current, parent_uuid)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(unit.uuid.map(|u| u.to_string()))
        .bind(unit.path.as_bytes())
        .bind(unit.unit_type.as_str())
        .bind(unit.status.map(UnitStatus::as_str))
        .bind(unit.microservice.as_deref())
        .bind(unit.directory_name.as_deref())
        .bind(unit.current)
        .bind(unit.parent_uuid.map(|u| u.to_string()))
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        debug!(id, path = %unit.path, unit_type = %unit.unit_type, "Persisted unit");
        self.unit_by_id(id).await
    }

    pub async fn unit_by_id(&self, id: i64) -> Result<Unit> {
        let sql = format!("SELECT {UNIT_COLUMNS} FROM unit WHERE id = ?1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound(id))?;
        unit_from_row(&row)
    }

    /// The single in-flight unit, if any.
    pub async fn current_unit(&self) -> Result<Option<Unit>> {
        let sql = format!("SELECT {UNIT_COLUMNS} FROM unit WHERE current = 1");
        let row = sqlx::query(&sql).fetch_optional(&self.pool).await?;
        row.as_ref().map(unit_from_row).transpose()
    }

    pub async fn unit_by_uuid(&self, uuid: Uuid, unit_type: UnitType) -> Result<Option<Unit>> {
        let sql = format!("SELECT {UNIT_COLUMNS} FROM unit WHERE uuid = ?1 AND unit_type = ?2");
        let row = sqlx::query(&sql)
            .bind(uuid.to_string())
            .bind(unit_type.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(unit_from_row).transpose()
    }

    pub async fn update_unit(&self, id: i64, update: UnitUpdate) -> Result<Unit> {
        let affected = sqlx::query(
            r#"
            UPDATE unit SET
                uuid = COALESCE(?1, uuid),
                status = COALESCE(?2, status),
                microservice = COALESCE(?3, microservice),
                directory_name = COALESCE(?4, directory_name),
                current = COALESCE(?5, current),
                updated_at = CURRENT_TIMESTAMP
            WHERE id = ?6
            "#,
        )
        .bind(update.uuid.map(|u| u.to_string()))
        .bind(update.status.map(UnitStatus::as_str))
        .bind(update.microservice.as_deref())
        .bind(update.directory_name.as_deref())
        .bind(update.current)
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if affected == 0 {
            return Err(StoreError::NotFound(id));
        }
        self.unit_by_id(id).await
    }

    /// Records that `from` was promoted into the downstream unit described by
    /// `info`: `from` stops being current and is marked COMPLETE, and a new
    /// current unit linked to it takes over. Both happen or neither does.
    pub async fn promote(&self, from: &Unit, info: &UnitInfo) -> Result<Unit> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "UPDATE unit SET current = 0, status = ?1, updated_at = CURRENT_TIMESTAMP WHERE id = ?2",
        )
        .bind(UnitStatus::Complete.as_str())
        .bind(from.id)
        .execute(&mut *tx)
        .await?;

        let id = sqlx::query(
            r#"
            INSERT INTO unit (uuid, path, unit_type, status, microservice, directory_name, current, parent_uuid)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7)
            "#,
        )
        .bind(info.uuid.to_string())
        .bind(from.path.as_bytes())
        .bind(info.unit_type.as_str())
        .bind(info.status.as_str())
        .bind(info.microservice.as_deref())
        .bind(info.directory.as_deref())
        .bind(from.uuid.map(|u| u.to_string()))
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        tx.commit().await?;
        info!(
            from = ?from.uuid,
            to = %info.uuid,
            unit_type = %info.unit_type,
            "Unit promoted"
        );
        self.unit_by_id(id).await
    }

    /// Takes a unit out of flight with its final status and records its
    /// source path as completed.
    pub async fn retire(&self, id: i64, status: UnitStatus) -> Result<Unit> {
        let mut tx = self.pool.begin().await?;

        let affected = sqlx::query(
            "UPDATE unit SET current = 0, status = ?1, updated_at = CURRENT_TIMESTAMP WHERE id = ?2",
        )
        .bind(status.as_str())
        .bind(id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if affected == 0 {
            return Err(StoreError::NotFound(id));
        }

        sqlx::query("INSERT OR IGNORE INTO completed_path (path) SELECT path FROM unit WHERE id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        let unit = self.unit_by_id(id).await?;
        info!(id, uuid = ?unit.uuid, path = %unit.path, status = %status, "Unit retired");
        Ok(unit)
    }

    pub async fn mark_completed(&self, path: &SourcePath) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO completed_path (path) VALUES (?1)")
            .bind(path.as_bytes())
            .execute(&self.pool)
            .await?;
        debug!(path = %path, "Marked source path completed");
        Ok(())
    }

    pub async fn is_completed(&self, path: &SourcePath) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM completed_path WHERE path = ?1")
            .bind(path.as_bytes())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    pub async fn completed_paths(&self) -> Result<CompletedSet> {
        let rows = sqlx::query("SELECT path FROM completed_path")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                row.try_get::<Vec<u8>, _>("path")
                    .map(SourcePath::new)
                    .map_err(StoreError::from)
            })
            .collect()
    }
}

fn unit_from_row(row: &SqliteRow) -> Result<Unit> {
    let unit_type: String = row.try_get("unit_type")?;
    let status: Option<String> = row.try_get("status")?;

    Ok(Unit {
        id: row.try_get("id")?,
        uuid: parse_uuid(row.try_get("uuid")?)?,
        path: SourcePath::new(row.try_get::<Vec<u8>, _>("path")?),
        unit_type: UnitType::parse(&unit_type)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown unit type {unit_type:?}")))?,
        status: status
            .map(|s| {
                UnitStatus::parse(&s)
                    .ok_or_else(|| StoreError::Corrupt(format!("unknown status {s:?}")))
            })
            .transpose()?,
        microservice: row.try_get("microservice")?,
        directory_name: row.try_get("directory_name")?,
        current: row.try_get("current")?,
        parent_uuid: parse_uuid(row.try_get("parent_uuid")?)?,
    })
}

fn parse_uuid(raw: Option<String>) -> Result<Option<Uuid>> {
    raw.map(|s| Uuid::parse_str(&s).map_err(|_| StoreError::Corrupt(format!("bad uuid {s:?}"))))
        .transpose()
}
