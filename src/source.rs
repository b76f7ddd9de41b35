//! Batched catalog source
//!
//! [`CatalogSource`] performs the setup of an extraction run: it lists the
//! remote catalog and narrows it to the cursor's batch. [`BatchedItems`] is
//! the resulting item iterator. It first passes through every item of an
//! optional upstream stage, then fetches the batch in the background,
//! strips the site root from each item's `_path`, and advances the cursor
//! once per item handed to the caller.

use futures::stream::{BoxStream, Stream, StreamExt};
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::catalog::CatalogLister;
use crate::config::Config;
use crate::cursor::BatchCursor;
use crate::error::{Error, Result};
use crate::fetch_queue::{FetchQueue, HttpItemFetcher, ItemFetcher, QueuedItems};
use crate::types::{FetchStats, ItemRecord};

/// A configured extraction over one batch of the remote catalog
pub struct CatalogSource {
    config: Config,
    cursor: Arc<dyn BatchCursor>,
    fetcher: Arc<dyn ItemFetcher>,
    batch: Vec<String>,
    upstream: Option<BoxStream<'static, ItemRecord>>,
}

impl CatalogSource {
    /// Validate `config`, list the remote catalog and select the batch
    ///
    /// Sets the cursor's `total` and reads its `current` and `size`.
    ///
    /// # Errors
    ///
    /// Fails before any item is fetched if the configuration is invalid,
    /// the catalog query fails, or the cursor cannot be read. Nothing on
    /// the cursor changes when the catalog query fails.
    pub async fn new(config: Config, cursor: Arc<dyn BatchCursor>) -> Result<Self> {
        config.validate()?;
        let fetcher = Arc::new(HttpItemFetcher::new(&config)?);
        Self::with_fetcher(config, cursor, fetcher).await
    }

    /// Like [`new`](Self::new), fetching items through `fetcher`
    pub async fn with_fetcher(
        config: Config,
        cursor: Arc<dyn BatchCursor>,
        fetcher: Arc<dyn ItemFetcher>,
    ) -> Result<Self> {
        let lister = CatalogLister::new(&config)?;
        let batch = lister.list_batch(cursor.as_ref()).await?;
        Ok(Self::from_batch(config, cursor, fetcher, batch))
    }

    /// Build a source over an already selected batch
    pub fn from_batch(
        config: Config,
        cursor: Arc<dyn BatchCursor>,
        fetcher: Arc<dyn ItemFetcher>,
        batch: Vec<String>,
    ) -> Self {
        Self {
            config,
            cursor,
            fetcher,
            batch,
            upstream: None,
        }
    }

    /// Items of an earlier stage, yielded unchanged before the batch
    pub fn with_upstream<S>(mut self, upstream: S) -> Self
    where
        S: Stream<Item = ItemRecord> + Send + 'static,
    {
        self.upstream = Some(upstream.boxed());
        self
    }

    /// Item paths selected for this run, in fetch order
    pub fn batch(&self) -> &[String] {
        &self.batch
    }

    /// Turn the source into its item iterator
    ///
    /// Nothing is fetched until the upstream items have been consumed.
    pub fn items(self) -> BatchedItems {
        let queue = FetchQueue::new(
            self.batch,
            self.config.fetch.remote_skip_paths.clone(),
            self.config.fetch.queue_size,
            self.fetcher,
        );

        BatchedItems {
            upstream: self.upstream,
            queue: QueueState::Pending(queue),
            cursor: self.cursor,
            site_path_length: self.config.site_path_length(),
            delivered: 0,
        }
    }
}

enum QueueState {
    Pending(FetchQueue),
    Running {
        items: QueuedItems,
        producer: JoinHandle<FetchStats>,
    },
    Finished {
        producer: Option<JoinHandle<FetchStats>>,
    },
}

/// Item iterator of a [`CatalogSource`]
///
/// Dropping it stops the background fetch.
pub struct BatchedItems {
    upstream: Option<BoxStream<'static, ItemRecord>>,
    queue: QueueState,
    cursor: Arc<dyn BatchCursor>,
    site_path_length: usize,
    delivered: u64,
}

/// A record taken from the upstream stage or the fetch queue, not yet
/// handed to the caller
pub(crate) enum Taken {
    Upstream(ItemRecord),
    Batch(ItemRecord),
}

impl BatchedItems {
    /// Next item, or `None` when the upstream and the batch are exhausted
    ///
    /// Dropping the returned future while it advances the cursor can count
    /// an item that was never returned. Use [`run_until`](crate::run_until)
    /// to stop a batch from outside.
    ///
    /// # Errors
    ///
    /// Returns the cursor's error if it cannot be advanced. The background
    /// fetch is stopped and later calls return `Ok(None)`.
    pub async fn next(&mut self) -> Result<Option<ItemRecord>> {
        match self.take().await {
            Some(taken) => self.deliver(taken).await.map(Some),
            None => Ok(None),
        }
    }

    /// Wait for the next record without touching the cursor
    ///
    /// Cancel safe: dropping the future loses nothing.
    pub(crate) async fn take(&mut self) -> Option<Taken> {
        if let Some(upstream) = self.upstream.as_mut() {
            if let Some(item) = upstream.next().await {
                return Some(Taken::Upstream(item));
            }
            self.upstream = None;
        }

        if matches!(self.queue, QueueState::Pending(_)) {
            self.start_queue();
        }

        loop {
            let record = match &mut self.queue {
                QueueState::Running { items, .. } => items.next().await,
                _ => return None,
            };

            let Some(record) = record else {
                self.finish_queue();
                tracing::info!(delivered = self.delivered, "Batch finished");
                return None;
            };

            if record.is_empty() {
                tracing::trace!("Skipping empty item");
                continue;
            }

            return Some(Taken::Batch(record));
        }
    }

    /// Strip the site root and advance the cursor for a batch record
    pub(crate) async fn deliver(&mut self, taken: Taken) -> Result<ItemRecord> {
        let mut record = match taken {
            Taken::Upstream(item) => return Ok(item),
            Taken::Batch(record) => record,
        };

        if !record.strip_path_prefix(self.site_path_length) {
            tracing::debug!("Item has no usable _path, passing it through unchanged");
        }

        if let Err(e) = self.cursor.increment_current().await {
            tracing::error!(error = %e, "Could not advance batch cursor, stopping");
            self.finish_queue();
            return Err(e);
        }
        self.delivered += 1;

        Ok(record)
    }

    /// Number of batch items handed out so far (upstream items excluded)
    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    /// Stop fetching and return the fetch loop's counters
    ///
    /// Returns zeroed counters if the fetch never started.
    pub async fn finish(mut self) -> Result<FetchStats> {
        self.finish_queue();
        let producer = match &mut self.queue {
            QueueState::Finished { producer } => producer.take(),
            _ => None,
        };
        match producer {
            Some(handle) => handle
                .await
                .map_err(|e| Error::Other(format!("fetch task failed: {}", e))),
            None => Ok(FetchStats::default()),
        }
    }

    /// Adapt into a [`Stream`] of results
    ///
    /// The stream ends after the first error.
    pub fn into_stream(self) -> impl Stream<Item = Result<ItemRecord>> + Send {
        futures::stream::unfold(Some(self), |state| async move {
            let mut items = state?;
            match items.next().await {
                Ok(Some(record)) => Some((Ok(record), Some(items))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }

    fn start_queue(&mut self) {
        let state = std::mem::replace(&mut self.queue, QueueState::Finished { producer: None });
        self.queue = match state {
            QueueState::Pending(queue) => {
                tracing::info!(items = queue.len(), "Starting batch fetch");
                let (items, producer) = queue.start();
                QueueState::Running { items, producer }
            }
            other => other,
        };
    }

    fn finish_queue(&mut self) {
        let state = std::mem::replace(&mut self.queue, QueueState::Finished { producer: None });
        self.queue = match state {
            // Dropping the consumer handle cancels the producer
            QueueState::Running { items, producer } => {
                drop(items);
                QueueState::Finished {
                    producer: Some(producer),
                }
            }
            QueueState::Pending(_) => QueueState::Finished { producer: None },
            finished => finished,
        };
    }
}
