//! Configuration types for catalog-extract

use crate::error::{Error, Result};
use crate::types::SkipRules;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, path::PathBuf, time::Duration};

/// Prefix under which request-form overrides are looked up
///
/// An option named `remote-url` is overridden by the form key
/// `form.widgets.remote_url`.
pub const FORM_OVERRIDE_PREFIX: &str = "form.widgets.";

/// Remote site location and credentials
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Base URL of the remote site (default: "http://localhost:8080")
    #[serde(default = "default_remote_url")]
    pub remote_url: String,

    /// Basic-auth username (default: "admin")
    #[serde(default = "default_credential")]
    pub remote_username: String,

    /// Basic-auth password (default: "admin")
    #[serde(default = "default_credential")]
    pub remote_password: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            remote_url: default_remote_url(),
            remote_username: default_credential(),
            remote_password: default_credential(),
        }
    }
}

/// Which catalog to query and with what
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Path of the catalog below the remote URL (default: "/portal_catalog")
    ///
    /// Everything before the last segment is the site root, whose length is
    /// stripped from every fetched item's `_path`.
    #[serde(default = "default_catalog_path")]
    pub catalog_path: String,

    /// Catalog query sent to the remote site (None = empty query)
    #[serde(default)]
    pub catalog_query: Option<String>,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            catalog_path: default_catalog_path(),
            catalog_query: None,
        }
    }
}

/// Item fetching behaviour
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Path prefixes that are never fetched
    #[serde(default)]
    pub remote_skip_paths: SkipRules,

    /// Maximum number of fetched items waiting for the consumer (default: 2)
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,

    /// Upper bound for a single item fetch (default: 60 seconds)
    #[serde(default = "default_fetch_timeout", with = "duration_serde")]
    pub fetch_timeout: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            remote_skip_paths: SkipRules::default(),
            queue_size: default_queue_size(),
            fetch_timeout: default_fetch_timeout(),
        }
    }
}

/// Where batch cursors are persisted
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Path to the SQLite database holding batch cursors
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Name of the cursor row used by this extraction (default: "default")
    #[serde(default = "default_cursor_name")]
    pub cursor_name: String,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            cursor_name: default_cursor_name(),
        }
    }
}

/// Main configuration for a catalog extraction
///
/// Sub-configs are flattened, so the serialized form is a single flat
/// object except for `persistence`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Remote site location and credentials
    #[serde(flatten)]
    pub remote: RemoteConfig,

    /// Catalog path and query
    #[serde(flatten)]
    pub catalog: CatalogConfig,

    /// Fetch loop settings
    #[serde(flatten)]
    pub fetch: FetchConfig,

    /// Cursor persistence
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

impl Config {
    /// Build a configuration from an option map with optional form overrides
    ///
    /// Option keys are hyphenated (`remote-url`, `remote-username`,
    /// `remote-password`, `catalog-path`, `catalog-query`,
    /// `remote-skip-paths`, `queue-size`). For each key, a value in
    /// `overrides` under `form.widgets.<key with underscores>` wins over
    /// the value in `options`; missing keys fall back to defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `queue-size` is not a number or the
    /// resulting configuration fails [`Config::validate`].
    pub fn from_options(
        options: &HashMap<String, String>,
        overrides: Option<&HashMap<String, String>>,
    ) -> Result<Self> {
        let lookup = |name: &str| get_option(name, options, overrides);
        let mut config = Config::default();

        if let Some(url) = lookup("remote-url") {
            config.remote.remote_url = url.to_string();
        }
        if let Some(user) = lookup("remote-username") {
            config.remote.remote_username = user.to_string();
        }
        if let Some(password) = lookup("remote-password") {
            config.remote.remote_password = password.to_string();
        }
        if let Some(path) = lookup("catalog-path") {
            config.catalog.catalog_path = path.to_string();
        }
        config.catalog.catalog_query = lookup("catalog-query").map(str::to_string);
        if let Some(skip) = lookup("remote-skip-paths") {
            config.fetch.remote_skip_paths = SkipRules::parse(skip);
        }
        if let Some(size) = lookup("queue-size") {
            config.fetch.queue_size = size.trim().parse().map_err(|_| {
                Error::config("queue-size", format!("queue-size must be a number, got {size:?}"))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for values the extraction cannot work with
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the offending key.
    pub fn validate(&self) -> Result<()> {
        if self.fetch.queue_size == 0 {
            return Err(Error::config("queue-size", "queue-size must be at least 1"));
        }
        if let Err(e) = url::Url::parse(&self.remote.remote_url) {
            return Err(Error::config(
                "remote-url",
                format!("invalid remote-url {:?}: {}", self.remote.remote_url, e),
            ));
        }
        if !self.catalog.catalog_path.starts_with('/') {
            return Err(Error::config(
                "catalog-path",
                format!(
                    "catalog-path must start with '/', got {:?}",
                    self.catalog.catalog_path
                ),
            ));
        }
        if self.fetch.fetch_timeout.is_zero() {
            return Err(Error::config("fetch-timeout", "fetch-timeout must be non-zero"));
        }
        Ok(())
    }

    /// Remote base URL without a trailing slash
    pub fn remote_base(&self) -> &str {
        self.remote.remote_url.trim_end_matches('/')
    }

    /// Length of the site-root path that precedes the catalog
    ///
    /// For `/plone/portal_catalog` the site root is `/plone`, length 6.
    /// For `/portal_catalog` it is empty.
    pub fn site_path_length(&self) -> usize {
        self.catalog.catalog_path.rfind('/').unwrap_or(0)
    }

    /// Catalog query with every run of whitespace collapsed to one space
    pub fn normalized_query(&self) -> String {
        self.catalog
            .catalog_query
            .as_deref()
            .unwrap_or("")
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Look up an option, preferring a request-form override
fn get_option<'a>(
    name: &str,
    options: &'a HashMap<String, String>,
    overrides: Option<&'a HashMap<String, String>>,
) -> Option<&'a str> {
    let form_key = format!("{}{}", FORM_OVERRIDE_PREFIX, name.replace('-', "_"));
    overrides
        .and_then(|form| form.get(&form_key))
        .or_else(|| options.get(name))
        .map(String::as_str)
}

fn default_remote_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_credential() -> String {
    "admin".to_string()
}

fn default_catalog_path() -> String {
    "/portal_catalog".to_string()
}

fn default_queue_size() -> usize {
    2
}

fn default_fetch_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./catalog_extract.db")
}

fn default_cursor_name() -> String {
    "default".to_string()
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
