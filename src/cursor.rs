//! Batch cursor abstraction
//!
//! A cursor records how far an extraction has progressed through the sorted
//! catalog listing so a later invocation can resume. The extraction reads
//! `current` and `size` once at setup, records `total`, and then increments
//! `current` once per item handed to the caller.
//!
//! Two implementations ship with the crate:
//! - [`MemoryCursor`]: process-local, for tests and one-shot runs
//! - [`SqliteCursor`](crate::db::SqliteCursor): persisted in SQLite

use async_trait::async_trait;
use std::sync::Mutex;

use crate::error::{Error, Result};
use crate::types::BatchWindow;

/// Persistent position within a batched extraction
#[async_trait]
pub trait BatchCursor: Send + Sync {
    /// Record the size of the full identifier list
    async fn set_total(&self, total: u64) -> Result<()>;

    /// Offset of the next item to process
    async fn current(&self) -> Result<u64>;

    /// Number of items to process per batch
    async fn size(&self) -> Result<u64>;

    /// Advance `current` by one, returning the new value
    async fn increment_current(&self) -> Result<u64>;

    /// Snapshot of all three values
    async fn window(&self) -> Result<BatchWindow>;
}

/// In-memory [`BatchCursor`]
#[derive(Debug, Default)]
pub struct MemoryCursor {
    state: Mutex<BatchWindow>,
}

impl MemoryCursor {
    /// Create a cursor positioned at `current` with the given batch size
    pub fn new(current: u64, size: u64) -> Self {
        Self {
            state: Mutex::new(BatchWindow {
                total: 0,
                current,
                size,
            }),
        }
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut BatchWindow) -> T) -> Result<T> {
        let mut guard = self
            .state
            .lock()
            .map_err(|_| Error::Cursor("memory cursor lock poisoned".to_string()))?;
        Ok(f(&mut guard))
    }
}

#[async_trait]
impl BatchCursor for MemoryCursor {
    async fn set_total(&self, total: u64) -> Result<()> {
        self.with_state(|w| w.total = total)
    }

    async fn current(&self) -> Result<u64> {
        self.with_state(|w| w.current)
    }

    async fn size(&self) -> Result<u64> {
        self.with_state(|w| w.size)
    }

    async fn increment_current(&self) -> Result<u64> {
        self.with_state(|w| {
            w.current += 1;
            w.current
        })
    }

    async fn window(&self) -> Result<BatchWindow> {
        self.with_state(|w| *w)
    }
}
