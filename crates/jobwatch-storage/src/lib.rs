//! Append-only snapshot history for jobwatch, backed by SQLite.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::NaiveDate;
use jobwatch_core::{format_date, parse_date, Observation, Snapshot};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info_span, Instrument};

pub const CRATE_NAME: &str = "jobwatch-storage";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("creating database directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("opening database {path}: {source}")]
    Connect {
        path: PathBuf,
        #[source]
        source: sqlx::Error,
    },
    #[error("sqlite query failed: {0}")]
    Query(#[from] sqlx::Error),
    #[error("stored date {0:?} is not in YYYY-MM-DD form")]
    InvalidDate(String),
}

/// Durable log of (source, position, date) observations.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Creates the schema if absent. Safe to call on every run.
    async fn ensure_initialized(&self) -> Result<(), StorageError>;

    /// Positions recorded on the most recent date for `source`; empty when none exist.
    async fn latest_snapshot(&self, source: &str) -> Result<Snapshot, StorageError>;

    /// Inserts one observation row. Identical rows are accepted.
    async fn append_observation(
        &self,
        source: &str,
        position: &str,
        date: NaiveDate,
    ) -> Result<(), StorageError>;
}

/// SQLite-backed store using the `jobs(job, company, date)` table.
///
/// The pool holds a single connection so every read and append is serialized.
#[derive(Debug, Clone)]
pub struct SqliteSnapshotStore {
    pool: SqlitePool,
    path: PathBuf,
}

impl SqliteSnapshotStore {
    /// Opens (creating if missing) the database file at `path`.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|source| StorageError::CreateDir {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|source| StorageError::Connect {
                path: path.clone(),
                source,
            })?;

        Ok(Self { pool, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Most recent observation date for `source`, if any.
    pub async fn latest_date(&self, source: &str) -> Result<Option<NaiveDate>, StorageError> {
        let latest: Option<String> =
            sqlx::query_scalar("SELECT MAX(date) FROM jobs WHERE company = ?")
                .bind(source)
                .fetch_one(&self.pool)
                .await?;
        latest
            .map(|text| parse_date(&text).ok_or(StorageError::InvalidDate(text)))
            .transpose()
    }

    /// Every stored row for `source`, oldest first.
    pub async fn observations(&self, source: &str) -> Result<Vec<Observation>, StorageError> {
        let rows = sqlx::query(
            "SELECT job, company, date FROM jobs WHERE company = ? ORDER BY date, rowid",
        )
        .bind(source)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| -> Result<Observation, StorageError> {
                let date_text: String = row.try_get("date")?;
                let date = parse_date(&date_text).ok_or(StorageError::InvalidDate(date_text))?;
                Ok(Observation {
                    source: row.try_get("company")?,
                    position: row.try_get("job")?,
                    date,
                })
            })
            .collect()
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl SnapshotStore for SqliteSnapshotStore {
    async fn ensure_initialized(&self) -> Result<(), StorageError> {
        let span = info_span!("ensure_initialized", path = %self.path.display());
        async {
            sqlx::query(
                r#"
                CREATE TABLE IF NOT EXISTS jobs (
                    job TEXT,
                    company TEXT,
                    date DATE
                )
                "#,
            )
            .execute(&self.pool)
            .await?;

            sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_company_date ON jobs(company, date)")
                .execute(&self.pool)
                .await?;

            debug!("snapshot schema ready");
            Ok::<(), StorageError>(())
        }
        .instrument(span)
        .await
    }

    async fn latest_snapshot(&self, source: &str) -> Result<Snapshot, StorageError> {
        let Some(latest) = self.latest_date(source).await? else {
            return Ok(Snapshot::new());
        };

        let jobs: Vec<String> =
            sqlx::query_scalar("SELECT job FROM jobs WHERE company = ? AND date = ?")
                .bind(source)
                .bind(format_date(latest))
                .fetch_all(&self.pool)
                .await?;

        Ok(jobs.into_iter().collect())
    }

    async fn append_observation(
        &self,
        source: &str,
        position: &str,
        date: NaiveDate,
    ) -> Result<(), StorageError> {
        sqlx::query("INSERT INTO jobs (job, company, date) VALUES (?, ?, ?)")
            .bind(position)
            .bind(source)
            .bind(format_date(date))
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
