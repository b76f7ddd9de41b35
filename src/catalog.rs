//! Remote catalog listing
//!
//! Queries the remote site's catalog once for every item path matching the
//! configured query, then narrows the sorted list to the current batch.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::config::Config;
use crate::cursor::BatchCursor;
use crate::error::{CatalogError, Error, Result};

/// Name of the form parameter carrying the encoded catalog query
const QUERY_PARAM: &str = "catalog_query";

/// Client for the remote `get_catalog_results` endpoint
#[derive(Clone, Debug)]
pub struct CatalogLister {
    client: reqwest::Client,
    endpoint: String,
    username: String,
    password: String,
    query: String,
}

impl CatalogLister {
    /// Create a lister for the catalog named in `config`
    ///
    /// The catalog request is bounded by `fetch_timeout` like item fetches.
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.fetch.fetch_timeout)
            .build()?;

        Ok(Self {
            client,
            endpoint: format!(
                "{}{}/get_catalog_results",
                config.remote_base(),
                config.catalog.catalog_path
            ),
            username: config.remote.remote_username.clone(),
            password: config.remote.remote_password.clone(),
            query: config.normalized_query(),
        })
    }

    /// Full URL of the catalog endpoint
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// The query as sent on the wire (standard base64)
    pub fn encoded_query(&self) -> String {
        STANDARD.encode(self.query.as_bytes())
    }

    /// Fetch every item path matching the query
    ///
    /// The result is sorted and free of duplicates.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Catalog`] when the request fails, the endpoint
    /// answers with a non-success status, or the body is not a JSON array
    /// of strings. There is no retry.
    pub async fn list_item_paths(&self) -> Result<Vec<String>> {
        let url = self.endpoint.as_str();
        tracing::debug!(url = %url, query = %self.query, "Querying remote catalog");

        let response = self
            .client
            .post(url)
            .basic_auth(&self.username, Some(&self.password))
            .form(&[(QUERY_PARAM, self.encoded_query())])
            .send()
            .await
            .map_err(|e| {
                let reason = if e.is_timeout() {
                    "request timed out".to_string()
                } else if e.is_connect() {
                    format!("connection failed: {}", e)
                } else {
                    e.to_string()
                };
                CatalogError::Transport {
                    url: url.to_string(),
                    reason,
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(CatalogError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            }
            .into());
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| CatalogError::Transport {
                url: url.to_string(),
                reason: format!("failed to read response body: {}", e),
            })?;

        let mut paths: Vec<String> =
            serde_json::from_slice(&body).map_err(|e| CatalogError::InvalidResponse {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        paths.sort();
        paths.dedup();

        tracing::info!(url = %url, count = paths.len(), "Remote catalog listed");
        Ok(paths)
    }

    /// Record the list size on the cursor and return the current batch
    ///
    /// The batch is `paths[current..current + size]`, clamped to the list.
    pub async fn apply_window(
        &self,
        mut paths: Vec<String>,
        cursor: &dyn BatchCursor,
    ) -> Result<Vec<String>> {
        let total = u64::try_from(paths.len())
            .map_err(|_| Error::Other(format!("catalog list too large: {}", paths.len())))?;
        cursor.set_total(total).await?;

        let current = cursor.current().await?;
        let size = cursor.size().await?;
        let window = crate::types::BatchWindow {
            total,
            current,
            size,
        };
        let range = window.range(paths.len());

        tracing::info!(
            total,
            current,
            size,
            batch = range.len(),
            "Selected batch window"
        );

        paths.truncate(range.end);
        Ok(paths.split_off(range.start))
    }

    /// List the catalog and narrow it to the cursor's batch
    pub async fn list_batch(&self, cursor: &dyn BatchCursor) -> Result<Vec<String>> {
        let paths = self.list_item_paths().await?;
        self.apply_window(paths, cursor).await
    }
}
