//! Database layer for catalog-extract
//!
//! Persists batch cursors in SQLite so an extraction can resume across
//! separate invocations.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`]: Database lifecycle, schema migrations
//! - [`cursors`]: Batch cursor rows and the [`SqliteCursor`] handle

use sqlx::{FromRow, sqlite::SqlitePool};

mod cursors;
mod migrations;

pub use cursors::SqliteCursor;

/// Batch cursor record from database
#[derive(Debug, Clone, FromRow)]
pub struct CursorRow {
    /// Cursor name (one row per extraction)
    pub name: String,
    /// Size of the full identifier list at the last setup
    pub total: i64,
    /// Offset of the next item to process
    pub current: i64,
    /// Number of items per batch
    pub size: i64,
    /// Unix timestamp of the last change
    pub updated_at: i64,
}

/// Database handle for catalog-extract
pub struct Database {
    pool: SqlitePool,
}
