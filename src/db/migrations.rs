//! Database lifecycle and schema setup.

use crate::error::DatabaseError;
use crate::{Error, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool};
use std::path::Path;
use std::str::FromStr;

use super::Database;

/// Schema version written by this build
const SCHEMA_VERSION: i64 = 1;

impl Database {
    /// Open (creating if needed) the cursor database at `path`
    pub async fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::Database(DatabaseError::ConnectionFailed(format!(
                    "Failed to create database directory: {}",
                    e
                )))
            })?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .map_err(|e| {
                Error::Database(DatabaseError::ConnectionFailed(format!(
                    "Failed to parse database path: {}",
                    e
                )))
            })?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePool::connect_with(options).await.map_err(|e| {
            Error::Database(DatabaseError::ConnectionFailed(format!(
                "Failed to connect to database: {}",
                e
            )))
        })?;

        let db = Self { pool };
        db.ensure_schema().await?;
        Ok(db)
    }

    /// Create the cursor schema in one transaction, once per database file
    async fn ensure_schema(&self) -> Result<()> {
        let migration_failed = |step: &str, e: sqlx::Error| {
            Error::Database(DatabaseError::MigrationFailed(format!("{}: {}", step, e)))
        };

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| migration_failed("Failed to begin transaction", e))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(|e| migration_failed("Failed to create schema_version table", e))?;

        let applied: Option<i64> = sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| migration_failed("Failed to query schema version", e))?;

        if applied.unwrap_or(0) < SCHEMA_VERSION {
            tracing::info!(version = SCHEMA_VERSION, "Creating batch cursor schema");

            sqlx::query(
                r#"
                CREATE TABLE IF NOT EXISTS batch_cursors (
                    name TEXT PRIMARY KEY,
                    total INTEGER NOT NULL DEFAULT 0,
                    current INTEGER NOT NULL DEFAULT 0,
                    size INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL
                )
                "#,
            )
            .execute(&mut *tx)
            .await
            .map_err(|e| migration_failed("Failed to create batch_cursors table", e))?;

            sqlx::query("INSERT INTO schema_version (version, applied_at) VALUES (?, ?)")
                .bind(SCHEMA_VERSION)
                .bind(chrono::Utc::now().timestamp())
                .execute(&mut *tx)
                .await
                .map_err(|e| migration_failed("Failed to record schema version", e))?;
        }

        // Dropping an uncommitted transaction rolls it back
        tx.commit()
            .await
            .map_err(|e| migration_failed("Failed to commit schema", e))
    }

    /// Close the database connection
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
