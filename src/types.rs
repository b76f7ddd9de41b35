//! Core types for catalog-extract

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Name of the item attribute carrying the item's remote path
pub const PATH_KEY: &str = "_path";

/// One content item fetched from the remote site
///
/// A JSON object as returned by the remote `get_item` view. The `_path`
/// attribute holds the item's location on the remote site.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemRecord(Map<String, Value>);

impl ItemRecord {
    /// Create a record from a JSON object
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// Build a record from an arbitrary JSON value
    ///
    /// Returns `None` unless the value is an object.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(fields) => Some(Self(fields)),
            _ => None,
        }
    }

    /// The item's `_path` attribute, if present and a string
    pub fn path(&self) -> Option<&str> {
        self.0.get(PATH_KEY).and_then(Value::as_str)
    }

    /// Replace the item's `_path` attribute
    pub fn set_path(&mut self, path: impl Into<String>) {
        self.0.insert(PATH_KEY.to_string(), Value::String(path.into()));
    }

    /// Drop the first `len` bytes of the `_path` attribute
    ///
    /// Mirrors slicing the path past the site root. Paths shorter than `len`
    /// become empty. Returns `false` when the record has no string `_path`
    /// or `len` does not fall on a character boundary, leaving the record
    /// untouched.
    pub fn strip_path_prefix(&mut self, len: usize) -> bool {
        let Some(path) = self.path() else {
            return false;
        };
        let stripped = if len >= path.len() {
            String::new()
        } else if path.is_char_boundary(len) {
            path[len..].to_string()
        } else {
            return false;
        };
        self.set_path(stripped);
        true
    }

    /// Look up a field by name
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Whether the record carries no fields at all
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Borrow the underlying JSON object
    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Consume the record, returning the underlying JSON object
    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for ItemRecord {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}

impl From<ItemRecord> for Value {
    fn from(record: ItemRecord) -> Self {
        Value::Object(record.0)
    }
}

/// Path prefixes excluded from fetching
///
/// An identifier is skipped when it starts with any configured prefix.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SkipRules(Vec<String>);

impl SkipRules {
    /// Create a rule set from a list of prefixes
    ///
    /// Empty prefixes are discarded, since they would match every path.
    pub fn new<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(
            prefixes
                .into_iter()
                .map(Into::into)
                .filter(|p: &String| !p.is_empty())
                .collect(),
        )
    }

    /// Parse a whitespace-separated list of prefixes
    pub fn parse(value: &str) -> Self {
        Self::new(value.split_whitespace())
    }

    /// Whether `path` matches any prefix
    #[must_use]
    pub fn matches(&self, path: &str) -> bool {
        self.0.iter().any(|prefix| path.starts_with(prefix.as_str()))
    }

    /// Configured prefixes
    pub fn prefixes(&self) -> &[String] {
        &self.0
    }

    /// Whether no prefixes are configured
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Snapshot of a batch cursor
///
/// `total` is the size of the full identifier list, `current` the offset of
/// the next item to process, `size` the number of items per batch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchWindow {
    /// Size of the full identifier list for the query
    pub total: u64,
    /// Offset of the next item to process
    pub current: u64,
    /// Number of items to process in one batch
    pub size: u64,
}

impl BatchWindow {
    /// Index range of the batch within a list of `len` identifiers
    ///
    /// Both ends are clamped to `len`, so a cursor past the end of the list
    /// yields an empty range.
    pub fn range(&self, len: usize) -> std::ops::Range<usize> {
        let start = usize::try_from(self.current).unwrap_or(usize::MAX).min(len);
        let end = usize::try_from(self.current.saturating_add(self.size))
            .unwrap_or(usize::MAX)
            .min(len);
        start..end
    }

    /// Whether every item of the list has been consumed
    pub fn is_exhausted(&self) -> bool {
        self.current >= self.total
    }
}

/// Counters reported by a finished fetch loop
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchStats {
    /// Identifiers taken off the pending list
    pub attempted: u64,
    /// Identifiers excluded by a skip rule
    pub skipped: u64,
    /// Records handed to the buffer
    pub fetched: u64,
    /// Fetches that failed and were dropped
    pub failed: u64,
}
