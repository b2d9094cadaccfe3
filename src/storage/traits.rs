//! Storage trait definitions

use super::document::{Document, DocumentError};
use crate::graph::Attributes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed document: {0}")]
    MalformedDocument(#[from] DocumentError),

    #[error("Store lock poisoned")]
    LockPoisoned,
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Name of a document collection
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CollectionName(String);

impl CollectionName {
    /// Well-known collection of environmental conditions
    pub const CONDITIONS: &'static str = "conditions";

    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn conditions() -> Self {
        Self(Self::CONDITIONS.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CollectionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CollectionName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for CollectionName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Inclusive, independent-axis bounds for a range scan
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchBox {
    pub time_from: DateTime<Utc>,
    pub time_to: DateTime<Utc>,
    pub lat_min: f64,
    pub lat_max: f64,
    pub lon_min: f64,
    pub lon_max: f64,
}

impl SearchBox {
    /// Box of `±time_range` and `±degrees` around a point, with time bounds
    /// clamped to the representable range
    pub fn around(
        timestamp: DateTime<Utc>,
        lat: f64,
        lon: f64,
        time_range: chrono::Duration,
        degrees: f64,
    ) -> Self {
        let time_range = time_range.max(chrono::Duration::zero());
        Self {
            time_from: timestamp
                .checked_sub_signed(time_range)
                .unwrap_or(DateTime::<Utc>::MIN_UTC),
            time_to: timestamp
                .checked_add_signed(time_range)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
            lat_min: lat - degrees,
            lat_max: lat + degrees,
            lon_min: lon - degrees,
            lon_max: lon + degrees,
        }
    }

    pub fn contains(&self, doc: &Document) -> bool {
        doc.timestamp >= self.time_from
            && doc.timestamp <= self.time_to
            && doc.lat >= self.lat_min
            && doc.lat <= self.lat_max
            && doc.lon >= self.lon_min
            && doc.lon <= self.lon_max
    }
}

/// Filter criteria for listing documents
#[derive(Debug, Clone, Default)]
pub struct DocumentFilter {
    /// Earliest timestamp (inclusive)
    pub since: Option<DateTime<Utc>>,
    /// Latest timestamp (inclusive)
    pub until: Option<DateTime<Utc>>,
    /// Fields that must equal the given values
    pub field_equals: Vec<(String, Value)>,
    /// Maximum number of results
    pub limit: Option<usize>,
}

impl DocumentFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn until(mut self, until: DateTime<Utc>) -> Self {
        self.until = Some(until);
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.field_equals.push((key.into(), value.into()));
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Field criteria only; time bounds are applied by the backend
    pub fn matches_fields(&self, doc: &Document) -> bool {
        self.field_equals
            .iter()
            .all(|(key, value)| doc.field_equals(key, value))
    }
}

/// Outcome of a batch write
#[derive(Debug, Default)]
pub struct WriteReport {
    pub written: usize,
    /// Batch index and error of every document that was not written
    pub skipped: Vec<(usize, StorageError)>,
}

impl WriteReport {
    pub fn is_clean(&self) -> bool {
        self.skipped.is_empty()
    }
}

/// Trait for matching store backends
///
/// Implementations must be thread-safe (Send + Sync). Writes to the same
/// `(timestamp, lat, lon)` key must never interleave.
pub trait MatchStore: Send + Sync {
    // === Collection Operations ===

    /// Create the collection if it does not exist
    fn ensure_collection(&self, name: &CollectionName) -> StorageResult<()>;

    fn has_collection(&self, name: &CollectionName) -> StorageResult<bool>;

    /// All collection names, sorted
    fn list_collections(&self) -> StorageResult<Vec<CollectionName>>;

    /// Delete a collection and its documents. Returns false if it did not exist.
    fn drop_collection(&self, name: &CollectionName) -> StorageResult<bool>;

    // === Document Operations ===

    /// Insert the document, or merge its fields into the existing document
    /// with the same key (incoming fields win). Returns the document id.
    fn upsert_document(&self, collection: &CollectionName, doc: &Document) -> StorageResult<i64>;

    /// Document with exactly this key, if any
    fn find_exact(
        &self,
        collection: &CollectionName,
        timestamp: DateTime<Utc>,
        lat: f64,
        lon: f64,
    ) -> StorageResult<Option<Document>>;

    /// Documents inside the box, in insertion order
    fn find_in_box(
        &self,
        collection: &CollectionName,
        bounds: &SearchBox,
    ) -> StorageResult<Vec<Document>>;

    /// Documents matching the filter, in insertion order
    fn find_documents(
        &self,
        collection: &CollectionName,
        filter: &DocumentFilter,
    ) -> StorageResult<Vec<Document>>;

    // === Provided ===

    /// Select a collection, creating it if needed
    fn collection(&self, name: &str) -> StorageResult<CollectionName> {
        let name = CollectionName::new(name);
        self.ensure_collection(&name)?;
        Ok(name)
    }

    /// Select an existing collection
    fn open_collection(&self, name: &str) -> StorageResult<CollectionName> {
        let name = CollectionName::new(name);
        if self.has_collection(&name)? {
            Ok(name)
        } else {
            Err(StorageError::CollectionNotFound(name.0))
        }
    }

    /// The `conditions` collection, recreated if it was dropped
    fn conditions(&self) -> StorageResult<CollectionName> {
        self.collection(CollectionName::CONDITIONS)
    }

    /// Every document of a collection, in insertion order
    fn scan(&self, collection: &CollectionName) -> StorageResult<Vec<Document>> {
        self.find_documents(collection, &DocumentFilter::new())
    }

    /// Upsert-merge a batch of raw mappings.
    ///
    /// A document that cannot be parsed or written is logged and reported;
    /// the rest of the batch continues.
    fn write_documents(
        &self,
        collection: &CollectionName,
        docs: Vec<Attributes>,
    ) -> StorageResult<WriteReport> {
        self.ensure_collection(collection)?;

        let mut report = WriteReport::default();
        for (index, mapping) in docs.into_iter().enumerate() {
            let result = Document::from_mapping(mapping)
                .map_err(StorageError::from)
                .and_then(|doc| self.upsert_document(collection, &doc));

            match result {
                Ok(_) => report.written += 1,
                Err(e) => {
                    tracing::warn!(
                        collection = %collection,
                        index,
                        error = %e,
                        "document not written"
                    );
                    report.skipped.push((index, e));
                }
            }
        }

        tracing::debug!(
            collection = %collection,
            written = report.written,
            skipped = report.skipped.len(),
            "batch written"
        );
        Ok(report)
    }

    fn write_conditions(&self, docs: Vec<Attributes>) -> StorageResult<WriteReport> {
        let conditions = self.conditions()?;
        self.write_documents(&conditions, docs)
    }
}

/// Extension trait for opening stores from paths
pub trait OpenStore: MatchStore + Sized {
    /// Open or create a store at the given path
    fn open(path: impl AsRef<Path>) -> StorageResult<Self>;

    /// Create an in-memory store (useful for testing)
    fn open_in_memory() -> StorageResult<Self>;
}
