//! Storage backends for the matching store
//!
//! Backends implement the `MatchStore` trait. The primary implementation
//! is `SqliteStore` for persistent storage.

mod document;
mod sqlite;
mod traits;

pub use document::{
    format_timestamp, parse_timestamp, Document, DocumentError, INTERNAL_ID, TIMESTAMP_ALIASES,
};
pub use sqlite::SqliteStore;
pub use traits::{
    CollectionName, DocumentFilter, MatchStore, OpenStore, SearchBox, StorageError, StorageResult,
    WriteReport,
};
