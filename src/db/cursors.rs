//! Batch cursor persistence.

use async_trait::async_trait;
use std::sync::Arc;

use crate::cursor::BatchCursor;
use crate::error::DatabaseError;
use crate::types::BatchWindow;
use crate::{Error, Result};

use super::{CursorRow, Database};

impl Database {
    /// Create the cursor row if it doesn't exist yet
    ///
    /// A new cursor starts at `current = 0` with the given batch size. An
    /// existing cursor is left untouched, so a rerun resumes where the last
    /// one stopped.
    pub async fn ensure_cursor(&self, name: &str, size: u64) -> Result<CursorRow> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO batch_cursors (name, total, current, size, updated_at)
            VALUES (?, 0, 0, ?, ?)
            ON CONFLICT(name) DO NOTHING
            "#,
        )
        .bind(name)
        .bind(to_i64(size)?)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to create cursor '{}': {}",
                name, e
            )))
        })?;

        self.get_cursor(name).await?.ok_or_else(|| {
            Error::Database(DatabaseError::NotFound(format!("cursor '{}'", name)))
        })
    }

    /// Load a cursor row by name
    pub async fn get_cursor(&self, name: &str) -> Result<Option<CursorRow>> {
        sqlx::query_as::<_, CursorRow>(
            r#"
            SELECT name, total, current, size, updated_at
            FROM batch_cursors WHERE name = ?
            "#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to load cursor '{}': {}",
                name, e
            )))
        })
    }

    /// Record the size of the full identifier list
    pub async fn set_cursor_total(&self, name: &str, total: u64) -> Result<()> {
        self.update_cursor(
            name,
            "UPDATE batch_cursors SET total = ?, updated_at = ? WHERE name = ?",
            total,
        )
        .await
    }

    /// Change the batch size of a cursor
    pub async fn set_cursor_size(&self, name: &str, size: u64) -> Result<()> {
        self.update_cursor(
            name,
            "UPDATE batch_cursors SET size = ?, updated_at = ? WHERE name = ?",
            size,
        )
        .await
    }

    /// Move a cursor back to (or forward to) an explicit offset
    pub async fn set_cursor_current(&self, name: &str, current: u64) -> Result<()> {
        self.update_cursor(
            name,
            "UPDATE batch_cursors SET current = ?, updated_at = ? WHERE name = ?",
            current,
        )
        .await
    }

    /// Advance a cursor by one, returning the new offset
    pub async fn increment_cursor(&self, name: &str) -> Result<u64> {
        let now = chrono::Utc::now().timestamp();
        let current: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE batch_cursors SET current = current + 1, updated_at = ?
            WHERE name = ?
            RETURNING current
            "#,
        )
        .bind(now)
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to advance cursor '{}': {}",
                name, e
            )))
        })?;

        let current = current.ok_or_else(|| {
            Error::Database(DatabaseError::NotFound(format!("cursor '{}'", name)))
        })?;
        Ok(current.max(0) as u64)
    }

    /// Delete a cursor row
    ///
    /// Returns true if a row was removed.
    pub async fn delete_cursor(&self, name: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM batch_cursors WHERE name = ?")
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to delete cursor '{}': {}",
                    name, e
                )))
            })?;

        Ok(result.rows_affected() > 0)
    }

    async fn update_cursor(&self, name: &str, sql: &str, value: u64) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(sql)
            .bind(to_i64(value)?)
            .bind(now)
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to update cursor '{}': {}",
                    name, e
                )))
            })?;

        if result.rows_affected() == 0 {
            return Err(Error::Database(DatabaseError::NotFound(format!(
                "cursor '{}'",
                name
            ))));
        }
        Ok(())
    }
}

fn to_i64(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| {
        Error::Database(DatabaseError::QueryFailed(format!(
            "value {} does not fit in an INTEGER column",
            value
        )))
    })
}

impl From<CursorRow> for BatchWindow {
    fn from(row: CursorRow) -> Self {
        BatchWindow {
            total: row.total.max(0) as u64,
            current: row.current.max(0) as u64,
            size: row.size.max(0) as u64,
        }
    }
}

/// [`BatchCursor`] backed by one row of the `batch_cursors` table
#[derive(Clone)]
pub struct SqliteCursor {
    db: Arc<Database>,
    name: String,
}

impl SqliteCursor {
    /// Open (creating if needed) the named cursor
    ///
    /// `default_size` is only used when the row does not exist yet.
    pub async fn open(db: Arc<Database>, name: impl Into<String>, default_size: u64) -> Result<Self> {
        let name = name.into();
        let row = db.ensure_cursor(&name, default_size).await?;
        tracing::debug!(
            cursor = %name,
            current = row.current,
            size = row.size,
            total = row.total,
            "Opened batch cursor"
        );
        Ok(Self { db, name })
    }

    /// Cursor name
    pub fn name(&self) -> &str {
        &self.name
    }

    async fn row(&self) -> Result<CursorRow> {
        self.db.get_cursor(&self.name).await?.ok_or_else(|| {
            Error::Database(DatabaseError::NotFound(format!("cursor '{}'", self.name)))
        })
    }
}

#[async_trait]
impl BatchCursor for SqliteCursor {
    async fn set_total(&self, total: u64) -> Result<()> {
        self.db.set_cursor_total(&self.name, total).await
    }

    async fn current(&self) -> Result<u64> {
        Ok(BatchWindow::from(self.row().await?).current)
    }

    async fn size(&self) -> Result<u64> {
        Ok(BatchWindow::from(self.row().await?).size)
    }

    async fn increment_current(&self) -> Result<u64> {
        self.db.increment_cursor(&self.name).await
    }

    async fn window(&self) -> Result<BatchWindow> {
        Ok(self.row().await?.into())
    }
}
