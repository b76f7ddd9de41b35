//! # catalog-extract
//!
//! Batched extraction of content items from a remote site's catalog.
//!
//! An extraction run lists every item path matching a catalog query, takes
//! the slice selected by a persistent [`BatchCursor`], fetches those items in
//! a background task through a bounded queue, and hands them to the caller
//! in path order. The cursor advances once per item delivered, so a later
//! run resumes exactly where this one stopped.
//!
//! ## Quick Start
//!
//! ```no_run
//! use catalog_extract::{CatalogSource, Config, Database, SqliteCursor};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = Config::default();
//!     config.remote.remote_url = "http://localhost:8080".to_string();
//!     config.catalog.catalog_path = "/plone/portal_catalog".to_string();
//!
//!     let db = Arc::new(Database::new(&config.persistence.database_path).await?);
//!     let cursor = SqliteCursor::open(db, "plone", 100).await?;
//!
//!     let source = CatalogSource::new(config, Arc::new(cursor)).await?;
//!     let mut items = source.items();
//!     while let Some(item) = items.next().await? {
//!         println!("{:?}", item.path());
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Remote catalog listing
pub mod catalog;
/// Configuration types
pub mod config;
/// Batch cursor abstraction
pub mod cursor;
/// Database persistence layer
pub mod db;
/// Error types
pub mod error;
/// Bounded background item fetching
pub mod fetch_queue;
/// Batched item source
pub mod source;
/// Core types
pub mod types;

pub use catalog::CatalogLister;
pub use config::Config;
pub use cursor::{BatchCursor, MemoryCursor};
pub use db::{Database, SqliteCursor};
pub use error::{CatalogError, DatabaseError, Error, FetchError, Result};
pub use fetch_queue::{FetchQueue, HttpItemFetcher, ItemFetcher, QueuedItems};
pub use source::{BatchedItems, CatalogSource};
pub use types::{BatchWindow, FetchStats, ItemRecord, SkipRules};

/// Drain a batch, stopping early on SIGTERM or SIGINT
///
/// See [`run_until`].
pub async fn run_until_signal<F>(items: BatchedItems, on_item: F) -> Result<FetchStats>
where
    F: FnMut(ItemRecord),
{
    run_until(items, wait_for_signal(), on_item).await
}

/// Drain a batch, stopping early once `shutdown` completes
///
/// Every delivered item is passed to `on_item`. `shutdown` is only raced
/// against waiting for the next record, never against advancing the
/// cursor, so the cursor always equals the number of `on_item` calls.
/// On shutdown the background fetch is stopped and the next run resumes
/// after the last delivered item.
///
/// Returns the fetch loop's counters.
pub async fn run_until<S, F>(mut items: BatchedItems, shutdown: S, mut on_item: F) -> Result<FetchStats>
where
    S: std::future::Future<Output = ()>,
    F: FnMut(ItemRecord),
{
    tokio::pin!(shutdown);

    loop {
        let taken = tokio::select! {
            biased;
            _ = &mut shutdown => None,
            taken = items.take() => Some(taken),
        };
        let Some(taken) = taken else {
            tracing::info!(delivered = items.delivered(), "Stopping batch on shutdown");
            break;
        };
        let Some(taken) = taken else {
            break;
        };
        on_item(items.deliver(taken).await?);
    }

    items.finish().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Handlers can fail to register in restricted environments (containers, tests)
    match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) | (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register signal handlers, using ctrl_c fallback");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
