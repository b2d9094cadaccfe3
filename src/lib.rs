//! Sensorchain: sensor ingestion and spatiotemporal matching
//!
//! Ingests sensor resources discovered in a linked-data graph, dispatches
//! each one to a sensor-type plugin, publishes derived ("virtual") sensor
//! readings back into the graph, and keeps geotagged readings in a store
//! that can join independent streams into machine-learning training sets.
//!
//! # Core Concepts
//!
//! - **Dispatch loop**: serial consumer of discovered resource URIs
//! - **Plugins**: sensor-type transforms keyed by `(metric, unit)`
//! - **Matching store**: collections of `(timestamp, lat, lon)`-keyed documents
//!   with nearest-match search and training-set joins
//!
//! # Example
//!
//! ```
//! use sensorchain::{CollectionName, MatchStore, OpenStore, SqliteStore};
//! use serde_json::json;
//!
//! let store = SqliteStore::open_in_memory().unwrap();
//! let doc = json!({
//!     "timestamp": "2016-05-23T04:30:00Z", "lat": 40.0, "lon": 50.0, "pressure": 1013
//! });
//! let report = store
//!     .write_documents(&CollectionName::conditions(), vec![doc.as_object().unwrap().clone()])
//!     .unwrap();
//! assert_eq!(report.written, 1);
//! ```

pub mod config;
pub mod crawler;
pub mod dispatch;
pub mod fetch;
pub mod graph;
pub mod matching;
pub mod plugins;
pub mod service;
pub mod storage;

pub use config::{Config, ConfigError};
pub use crawler::{CrawlCriteria, GraphCrawler};
pub use dispatch::{
    AuxRequirement, BundleEntry, DispatchError, DispatchLoop, DispatchOutcome, DispatchStats,
    PluginError, PluginRegistry, ProcessingBundle, PublishResult, SensorPlugin, SensorResource,
    SkipReason,
};
pub use fetch::{FetchError, Fetcher, HttpFetcher};
pub use graph::{
    Attributes, FindFilter, GraphClient, GraphError, GraphResource, GraphSnapshot, MemoryGraph,
    Relation,
};
pub use matching::{
    build_training_set, nearest_match, JoinError, MatchDiffs, NearMatch, QueryPoint,
    SearchWindow, TrainingExample, TrainingQuery,
};
pub use service::{run_pipeline, PipelineReport, ServiceError};
pub use storage::{
    CollectionName, Document, DocumentError, DocumentFilter, MatchStore, OpenStore, SearchBox,
    SqliteStore, StorageError, StorageResult, WriteReport,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
