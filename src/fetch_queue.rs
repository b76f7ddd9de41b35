//! Bounded background fetching of catalog items
//!
//! A single producer task walks the batch's item paths in order, fetches
//! each one, and hands the record to the consumer through a bounded channel.
//! The producer reserves a channel slot *before* fetching, so the number of
//! fetched records waiting for the consumer never exceeds the capacity.
//!
//! Per-item failures are logged and dropped; they never reach the consumer.

use async_trait::async_trait;
use futures::Stream;
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::{FetchError, Result};
use crate::types::{FetchStats, ItemRecord, SkipRules};

/// Source of individual item records
///
/// Implemented over HTTP by [`HttpItemFetcher`]; tests plug in their own.
#[async_trait]
pub trait ItemFetcher: Send + Sync {
    /// Fetch the record stored at `path`
    async fn fetch(&self, path: &str) -> std::result::Result<ItemRecord, FetchError>;
}

/// Fetches items from the remote `get_item` view
#[derive(Clone, Debug)]
pub struct HttpItemFetcher {
    client: reqwest::Client,
    remote_base: String,
    username: String,
    password: String,
}

impl HttpItemFetcher {
    /// Create a fetcher using the remote location, credentials and timeout in `config`
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.fetch.fetch_timeout)
            .build()?;

        Ok(Self {
            client,
            remote_base: config.remote_base().to_string(),
            username: config.remote.remote_username.clone(),
            password: config.remote.remote_password.clone(),
        })
    }

    /// URL of the `get_item` view for `path`
    pub fn item_url(&self, path: &str) -> String {
        format!("{}{}/get_item", self.remote_base, encode_item_path(path))
    }
}

#[async_trait]
impl ItemFetcher for HttpItemFetcher {
    async fn fetch(&self, path: &str) -> std::result::Result<ItemRecord, FetchError> {
        let url = self.item_url(path);

        let response = self
            .client
            .get(&url)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await
            .map_err(|e| transport_error(&url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url,
                status: status.as_u16(),
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if !is_json_content_type(&content_type) {
            return Err(FetchError::NotJson { url, content_type });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| transport_error(&url, e))?;

        let value: serde_json::Value =
            serde_json::from_slice(&body).map_err(|e| FetchError::InvalidBody {
                url: url.clone(),
                reason: e.to_string(),
            })?;

        ItemRecord::from_value(value).ok_or_else(|| FetchError::InvalidBody {
            url,
            reason: "expected a JSON object".to_string(),
        })
    }
}

fn transport_error(url: &str, e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
        }
    } else {
        FetchError::Transport {
            url: url.to_string(),
            reason: e.to_string(),
        }
    }
}

/// Percent-encode each segment of an item path, keeping the `/` separators
pub fn encode_item_path(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Whether a `Content-Type` header value denotes JSON
///
/// Parameters such as `charset` are ignored.
fn is_json_content_type(value: &str) -> bool {
    value
        .split(';')
        .next()
        .map(str::trim)
        .is_some_and(|essence| essence.eq_ignore_ascii_case("application/json"))
}

/// A batch of item paths waiting to be fetched
///
/// Built by the caller, then [`start`](FetchQueue::start)ed exactly once.
pub struct FetchQueue {
    pending: VecDeque<String>,
    skip_rules: SkipRules,
    capacity: usize,
    fetcher: Arc<dyn ItemFetcher>,
    cancel: CancellationToken,
}

impl FetchQueue {
    /// Create a queue over `paths`, fetched in the given order
    ///
    /// `capacity` is the maximum number of fetched records waiting for the
    /// consumer. A capacity of zero is treated as one.
    pub fn new(
        paths: Vec<String>,
        skip_rules: SkipRules,
        capacity: usize,
        fetcher: Arc<dyn ItemFetcher>,
    ) -> Self {
        Self {
            pending: paths.into(),
            skip_rules,
            capacity: capacity.max(1),
            fetcher,
            cancel: CancellationToken::new(),
        }
    }

    /// Use an externally owned cancellation token
    ///
    /// The producer stops when either this token or the consumer handle is
    /// cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Number of paths not yet attempted
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether there is nothing to fetch
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Spawn the producer and return the consumer handle
    ///
    /// The join handle resolves to the producer's counters once it has
    /// exhausted the paths or been cancelled.
    pub fn start(self) -> (QueuedItems, JoinHandle<FetchStats>) {
        let (sender, receiver) = mpsc::channel(self.capacity);
        let cancel = self.cancel.clone();
        let capacity = self.capacity;

        let handle = tokio::spawn(run_producer(
            self.pending,
            self.skip_rules,
            self.fetcher,
            sender,
            self.cancel,
        ));

        (
            QueuedItems {
                receiver,
                cancel,
                capacity,
            },
            handle,
        )
    }
}

async fn run_producer(
    mut pending: VecDeque<String>,
    skip_rules: SkipRules,
    fetcher: Arc<dyn ItemFetcher>,
    sender: mpsc::Sender<ItemRecord>,
    cancel: CancellationToken,
) -> FetchStats {
    let mut stats = FetchStats::default();
    tracing::debug!(pending = pending.len(), "Fetch loop started");

    while !pending.is_empty() {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(remaining = pending.len(), "Fetch loop cancelled");
                break;
            }
            permit = sender.reserve() => match permit {
                Ok(permit) => permit,
                Err(_) => {
                    tracing::debug!(remaining = pending.len(), "Consumer went away, stopping fetch loop");
                    break;
                }
            },
        };

        let Some(path) = pending.pop_front() else {
            break;
        };
        stats.attempted += 1;

        if skip_rules.matches(&path) {
            tracing::trace!(path = %path, "Skipping item");
            stats.skipped += 1;
            continue;
        }

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(path = %path, "Fetch loop cancelled during fetch");
                break;
            }
            result = fetcher.fetch(&path) => result,
        };

        match result {
            Ok(record) => {
                tracing::trace!(path = %path, "Fetched item");
                permit.send(record);
                stats.fetched += 1;
            }
            Err(e) => {
                tracing::error!(path = %path, url = %e.url(), error = %e, "Could not get item");
                stats.failed += 1;
            }
        }
    }

    tracing::info!(
        attempted = stats.attempted,
        fetched = stats.fetched,
        skipped = stats.skipped,
        failed = stats.failed,
        "Fetch loop finished"
    );
    stats
}

/// Consumer side of a started [`FetchQueue`]
///
/// Yields records in path order. Dropping the handle cancels the producer.
pub struct QueuedItems {
    receiver: mpsc::Receiver<ItemRecord>,
    cancel: CancellationToken,
    capacity: usize,
}

impl QueuedItems {
    /// Wait for the next record
    ///
    /// Returns `None` once the producer has finished and every fetched
    /// record has been taken.
    pub async fn next(&mut self) -> Option<ItemRecord> {
        self.receiver.recv().await
    }

    /// Number of fetched records waiting to be taken
    pub fn pending_len(&self) -> usize {
        self.receiver.len()
    }

    /// Maximum number of records that can be waiting at once
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Stop the producer
    ///
    /// Records already buffered can still be taken.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether the producer has been asked to stop
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Stream for QueuedItems {
    type Item = ItemRecord;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().receiver.poll_recv(cx)
    }
}

impl Drop for QueuedItems {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Records every fetch and returns `{"_path": path}`
    #[derive(Default)]
    struct RecordingFetcher {
        attempts: Mutex<Vec<String>>,
        fail: Vec<String>,
    }

    impl RecordingFetcher {
        fn failing(paths: &[&str]) -> Self {
            Self {
                attempts: Mutex::default(),
                fail: paths.iter().map(|s| s.to_string()).collect(),
            }
        }

        fn attempts(&self) -> Vec<String> {
            self.attempts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ItemFetcher for RecordingFetcher {
        async fn fetch(&self, path: &str) -> std::result::Result<ItemRecord, FetchError> {
            self.attempts.lock().unwrap().push(path.to_string());
            if self.fail.iter().any(|p| p == path) {
                return Err(FetchError::Status {
                    url: path.to_string(),
                    status: 404,
                });
            }
            Ok(ItemRecord::from_value(json!({ "_path": path })).unwrap())
        }
    }

    /// Never completes
    struct HangingFetcher;

    #[async_trait]
    impl ItemFetcher for HangingFetcher {
        async fn fetch(&self, _path: &str) -> std::result::Result<ItemRecord, FetchError> {
            std::future::pending().await
        }
    }

    fn paths(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    async fn drain(mut items: QueuedItems) -> Vec<String> {
        let mut out = Vec::new();
        while let Some(item) = items.next().await {
            out.push(item.path().unwrap().to_string());
        }
        out
    }

    #[tokio::test]
    async fn skipped_paths_are_never_fetched() {
        let fetcher = Arc::new(RecordingFetcher::default());
        let queue = FetchQueue::new(
            paths(&["/a", "/b", "/c", "/d"]),
            SkipRules::new(["/b"]),
            2,
            fetcher.clone(),
        );

        let (items, handle) = queue.start();
        let delivered = drain(items).await;
        let stats = handle.await.unwrap();

        assert_eq!(delivered, vec!["/a", "/c", "/d"]);
        assert_eq!(fetcher.attempts(), vec!["/a", "/c", "/d"]);
        assert_eq!(
            stats,
            FetchStats {
                attempted: 4,
                skipped: 1,
                fetched: 3,
                failed: 0,
            }
        );
    }

    #[tokio::test]
    async fn failed_fetches_are_dropped_in_order() {
        let fetcher = Arc::new(RecordingFetcher::failing(&["/b"]));
        let queue = FetchQueue::new(
            paths(&["/a", "/b", "/c"]),
            SkipRules::default(),
            1,
            fetcher.clone(),
        );

        let (items, handle) = queue.start();
        assert_eq!(drain(items).await, vec!["/a", "/c"]);
        assert_eq!(handle.await.unwrap().failed, 1);
    }

    #[tokio::test]
    async fn producer_stops_at_capacity() {
        let fetcher = Arc::new(RecordingFetcher::default());
        let queue = FetchQueue::new(
            paths(&["/1", "/2", "/3", "/4", "/5"]),
            SkipRules::default(),
            2,
            fetcher.clone(),
        );

        let (mut items, handle) = queue.start();
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Two records fill the buffer; the third fetch must not have started
        assert_eq!(items.pending_len(), 2);
        assert_eq!(fetcher.attempts().len(), 2);

        let first = items.next().await.unwrap();
        assert_eq!(first.path(), Some("/1"));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(items.pending_len() <= items.capacity());
        assert_eq!(fetcher.attempts().len(), 3);

        let rest = drain(items).await;
        assert_eq!(rest, vec!["/2", "/3", "/4", "/5"]);
        assert_eq!(handle.await.unwrap().fetched, 5);
    }

    #[tokio::test]
    async fn empty_queue_finishes_immediately() {
        let fetcher = Arc::new(RecordingFetcher::default());
        let queue = FetchQueue::new(Vec::new(), SkipRules::default(), 2, fetcher.clone());
        assert!(queue.is_empty());

        let (mut items, handle) = queue.start();
        assert!(items.next().await.is_none());
        assert_eq!(handle.await.unwrap(), FetchStats::default());
    }

    #[tokio::test]
    async fn cancel_unblocks_a_full_producer() {
        let fetcher = Arc::new(RecordingFetcher::default());
        let queue = FetchQueue::new(
            paths(&["/1", "/2", "/3", "/4"]),
            SkipRules::default(),
            1,
            fetcher.clone(),
        );

        let (items, handle) = queue.start();
        tokio::time::sleep(Duration::from_millis(20)).await;
        items.cancel();
        assert!(items.is_cancelled());

        let stats = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("producer did not stop after cancel")
            .unwrap();
        assert_eq!(stats.fetched, 1);
    }

    #[tokio::test]
    async fn dropping_consumer_stops_a_hanging_fetch() {
        let queue = FetchQueue::new(
            paths(&["/slow"]),
            SkipRules::default(),
            1,
            Arc::new(HangingFetcher),
        );

        let (items, handle) = queue.start();
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(items);

        let stats = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("producer did not stop after consumer drop")
            .unwrap();
        assert_eq!(stats.attempted, 1);
        assert_eq!(stats.fetched, 0);
    }

    #[tokio::test]
    async fn external_token_cancels_producer() {
        let token = CancellationToken::new();
        let queue = FetchQueue::new(
            paths(&["/slow"]),
            SkipRules::default(),
            1,
            Arc::new(HangingFetcher),
        )
        .with_cancellation(token.clone());

        let (mut items, handle) = queue.start();
        token.cancel();

        assert!(items.next().await.is_none());
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn queued_items_is_a_stream() {
        let fetcher = Arc::new(RecordingFetcher::default());
        let queue = FetchQueue::new(paths(&["/x", "/y"]), SkipRules::default(), 2, fetcher);

        let (items, _handle) = queue.start();
        let collected: Vec<ItemRecord> = items.collect().await;
        assert_eq!(collected.len(), 2);
        assert_eq!(collected[1].path(), Some("/y"));
    }

    #[test]
    fn item_paths_are_encoded_per_segment() {
        assert_eq!(encode_item_path("/plone/news"), "/plone/news");
        assert_eq!(
            encode_item_path("/plone/my doc/é"),
            "/plone/my%20doc/%C3%A9"
        );
        assert_eq!(encode_item_path("/a?b#c"), "/a%3Fb%23c");
    }

    #[test]
    fn json_content_type_detection() {
        assert!(is_json_content_type("application/json"));
        assert!(is_json_content_type("application/json; charset=utf-8"));
        assert!(is_json_content_type("Application/JSON"));
        assert!(!is_json_content_type("text/html"));
        assert!(!is_json_content_type(""));
    }

    fn http_fetcher(server: &MockServer, timeout: Duration) -> HttpItemFetcher {
        let mut config = Config::default();
        config.remote.remote_url = format!("{}/", server.uri());
        config.fetch.fetch_timeout = timeout;
        HttpItemFetcher::new(&config).unwrap()
    }

    #[tokio::test]
    async fn http_fetcher_returns_json_object() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/plone/doc/get_item"))
            .and(header("authorization", "Basic YWRtaW46YWRtaW4="))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"_path": "/plone/doc", "title": "Doc"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = http_fetcher(&server, Duration::from_secs(5));
        assert_eq!(
            fetcher.item_url("/plone/doc"),
            format!("{}/plone/doc/get_item", server.uri())
        );

        let record = fetcher.fetch("/plone/doc").await.unwrap();
        assert_eq!(record.get("title"), Some(&json!("Doc")));
    }

    #[tokio::test]
    async fn http_fetcher_rejects_html() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/c/get_item"))
            .respond_with(ResponseTemplate::new(200).set_body_raw("<html></html>", "text/html"))
            .mount(&server)
            .await;

        let fetcher = http_fetcher(&server, Duration::from_secs(5));
        let err = fetcher.fetch("/c").await.unwrap_err();
        assert!(matches!(err, FetchError::NotJson { ref content_type, .. } if content_type == "text/html"));
        assert!(err.url().ends_with("/c/get_item"));
    }

    #[tokio::test]
    async fn http_fetcher_rejects_error_status_and_non_objects() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gone/get_item"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/list/get_item"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([1, 2])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/broken/get_item"))
            .respond_with(ResponseTemplate::new(200).set_body_raw("{not json", "application/json"))
            .mount(&server)
            .await;

        let fetcher = http_fetcher(&server, Duration::from_secs(5));
        assert!(matches!(
            fetcher.fetch("/gone").await.unwrap_err(),
            FetchError::Status { status: 404, .. }
        ));
        assert!(matches!(
            fetcher.fetch("/list").await.unwrap_err(),
            FetchError::InvalidBody { .. }
        ));
        assert!(matches!(
            fetcher.fetch("/broken").await.unwrap_err(),
            FetchError::InvalidBody { .. }
        ));
    }

    #[tokio::test]
    async fn http_fetcher_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slow/get_item"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"_path": "/slow"}))
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let fetcher = http_fetcher(&server, Duration::from_millis(100));
        let err = fetcher.fetch("/slow").await.unwrap_err();
        assert!(matches!(err, FetchError::Timeout { .. }));
    }

    #[tokio::test]
    async fn queue_over_http_drops_html_item() {
        let server = MockServer::start().await;
        for item in ["/a", "/d"] {
            Mock::given(method("GET"))
                .and(path(format!("{item}/get_item")))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "_path": item })))
                .expect(1)
                .mount(&server)
                .await;
        }
        Mock::given(method("GET"))
            .and(path("/c/get_item"))
            .respond_with(ResponseTemplate::new(200).set_body_raw("oops", "text/html"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/b/get_item"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "_path": "/b" })))
            .expect(0)
            .mount(&server)
            .await;

        let fetcher = Arc::new(http_fetcher(&server, Duration::from_secs(5)));
        let queue = FetchQueue::new(
            paths(&["/a", "/b", "/c", "/d"]),
            SkipRules::new(["/b"]),
            2,
            fetcher,
        );
        let (items, handle) = queue.start();

        assert_eq!(drain(items).await, vec!["/a", "/d"]);
        let stats = handle.await.unwrap();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.skipped, 1);
    }
}
