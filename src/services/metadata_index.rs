//! MetadataIndex — the durable name → location mapping backed by SQLite.
//!
//! The index is the only authority on whether an object exists. Uniqueness
//! of names is enforced by the `UNIQUE(name)` constraint, so `insert` is a
//! single atomic conditional write: a second insert for the same name fails
//! with `AlreadyExists` instead of overwriting.

use crate::models::object::ObjectRecord;
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
};
use std::{str::FromStr, sync::Arc, time::Duration};
use thiserror::Error;
use tracing::debug;

/// Schema applied by `migrate`. Every statement is idempotent.
const SCHEMA_SQL: &str = include_str!("../../migrations/0001_init.sql");

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("object `{0}` already exists")]
    AlreadyExists(String),
    #[error("object `{0}` not found")]
    NotFound(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type IndexResult<T> = Result<T, IndexError>;

#[derive(Clone)]
pub struct MetadataIndex {
    /// Shared SQLite connection pool.
    db: Arc<SqlitePool>,
}

impl MetadataIndex {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Open (creating if missing) the SQLite database at `database_url`.
    ///
    /// WAL journaling plus a busy timeout lets concurrent requests write
    /// without surfacing `SQLITE_BUSY` as a store error.
    pub async fn connect(database_url: &str, max_connections: u32) -> IndexResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        Ok(Self::new(Arc::new(pool)))
    }

    /// Apply the embedded schema.
    pub async fn migrate(&self) -> IndexResult<usize> {
        let statements = SCHEMA_SQL
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        for stmt in &statements {
            debug!("Executing migration SQL: {}", stmt);
            sqlx::query(stmt).execute(&*self.db).await?;
        }

        Ok(statements.len())
    }

    /// Fetch the present record for `name`, if any. No side effects.
    pub async fn lookup(&self, name: &str) -> IndexResult<Option<ObjectRecord>> {
        let record = sqlx::query_as::<_, ObjectRecord>(
            "SELECT id, name, location, size_bytes, content_type, created_at
             FROM objects WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(&*self.db)
        .await?;

        Ok(record)
    }

    /// Insert a record, failing with `AlreadyExists` if the name is taken.
    pub async fn insert(&self, record: &ObjectRecord) -> IndexResult<()> {
        match sqlx::query(
            "INSERT INTO objects (id, name, location, size_bytes, content_type, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(record.id)
        .bind(&record.name)
        .bind(&record.location)
        .bind(record.size_bytes)
        .bind(&record.content_type)
        .bind(record.created_at)
        .execute(&*self.db)
        .await
        {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => {
                Err(IndexError::AlreadyExists(record.name.clone()))
            }
            Err(err) => Err(IndexError::Sqlx(err)),
        }
    }

    /// Remove the record for `name`.
    pub async fn remove(&self, name: &str) -> IndexResult<()> {
        let result = sqlx::query("DELETE FROM objects WHERE name = ?")
            .bind(name)
            .execute(&*self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(IndexError::NotFound(name.to_string()));
        }

        Ok(())
    }

    /// Every present record, ordered by name. Used by reconciliation only.
    pub async fn records(&self) -> IndexResult<Vec<ObjectRecord>> {
        let rows = sqlx::query_as::<_, ObjectRecord>(
            "SELECT id, name, location, size_bytes, content_type, created_at
             FROM objects ORDER BY name ASC",
        )
        .fetch_all(&*self.db)
        .await?;

        Ok(rows)
    }

    /// Lightweight connectivity check (`SELECT 1`).
    pub async fn ping(&self) -> IndexResult<()> {
        let one = sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await?;
        if one != 1 {
            return Err(IndexError::Sqlx(sqlx::Error::Protocol(format!(
                "unexpected result: {}",
                one
            ))));
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.db
    }

    /// Close the underlying pool. Subsequent operations fail with `Sqlx`.
    pub async fn close(&self) {
        self.db.close().await;
    }
}

/// Return true if SQLx error indicates a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}

#[cfg(test)]
pub(crate) async fn open_temp_index(dir: &std::path::Path) -> MetadataIndex {
    let url = format!("sqlite://{}", dir.join("index.db").display());
    let index = MetadataIndex::connect(&url, 5).await.unwrap();
    index.migrate().await.unwrap();
    index
}
