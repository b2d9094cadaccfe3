//! Training-set joins
//!
//! Every document of a measure collection is paired with its nearest
//! `conditions` document, optionally enriched from extra collections.

use super::nearest::{nearest_match, QueryPoint, SearchWindow};
use crate::graph::Attributes;
use crate::storage::{
    CollectionName, Document, MatchStore, StorageError, StorageResult, INTERNAL_ID,
};
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

/// Why one measure document produced no training example
#[derive(Debug, Error)]
pub enum JoinError {
    #[error("no conditions within range")]
    NoMatchInRange,

    #[error("conditions lookup failed: {0}")]
    ConditionLookup(#[source] StorageError),
}

/// Why one extra collection contributed nothing to an example
#[derive(Debug, Error)]
pub enum ExtraSourceError {
    #[error("no match in {0} within range")]
    NoMatch(CollectionName),

    #[error("lookup in {collection} failed: {source}")]
    Lookup {
        collection: CollectionName,
        #[source]
        source: StorageError,
    },
}

/// Parameters of a training-set build
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingQuery {
    /// Collection holding the measures
    pub collection: CollectionName,
    /// Keep only these condition fields (all when `None`)
    pub condition_keys: Option<Vec<String>>,
    /// Keep only these measure fields (all when `None`)
    pub measure_keys: Option<Vec<String>>,
    /// Extra collections merged into the conditions side, with optional key filters
    pub extra: BTreeMap<CollectionName, Option<Vec<String>>>,
    pub window: SearchWindow,
}

impl TrainingQuery {
    pub fn new(collection: impl Into<CollectionName>) -> Self {
        Self {
            collection: collection.into(),
            condition_keys: None,
            measure_keys: None,
            extra: BTreeMap::new(),
            window: SearchWindow::default(),
        }
    }

    pub fn with_condition_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.condition_keys = Some(keys.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_measure_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.measure_keys = Some(keys.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_extra(
        mut self,
        collection: impl Into<CollectionName>,
        keys: Option<Vec<String>>,
    ) -> Self {
        self.extra.insert(collection.into(), keys);
        self
    }

    pub fn with_window(mut self, window: SearchWindow) -> Self {
        self.window = window;
        self
    }
}

/// One joined row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainingExample {
    pub conditions: Attributes,
    pub measures: Attributes,
}

/// Build the training set for `query.collection`.
///
/// Measure documents without conditions in range are skipped; a failing
/// extra source is skipped for that document only. Order follows the
/// measure collection's scan order. The store is only read: without a
/// `conditions` collection the set is empty.
pub fn build_training_set<S: MatchStore + ?Sized>(
    store: &S,
    query: &TrainingQuery,
) -> StorageResult<Vec<TrainingExample>> {
    let measures = store.open_collection(query.collection.as_str())?;
    let conditions = CollectionName::conditions();
    if !store.has_collection(&conditions)? {
        tracing::warn!(collection = %measures, "no conditions collection, training set is empty");
        return Ok(Vec::new());
    }

    let mut examples = Vec::new();
    for doc in store.scan(&measures)? {
        match join_measure(store, &conditions, query, doc) {
            Ok(example) => examples.push(example),
            Err(JoinError::NoMatchInRange) => {
                tracing::warn!(
                    collection = %measures,
                    "could not find matching conditions for measurement"
                );
            }
            Err(e) => {
                tracing::warn!(collection = %measures, error = %e, "measurement skipped");
            }
        }
    }

    tracing::info!(collection = %measures, examples = examples.len(), "training set built");
    Ok(examples)
}

/// Join a single measure document with its conditions.
pub fn join_measure<S: MatchStore + ?Sized>(
    store: &S,
    conditions: &CollectionName,
    query: &TrainingQuery,
    measure: Document,
) -> Result<TrainingExample, JoinError> {
    let point = QueryPoint::of(&measure);

    let near = nearest_match(store, conditions, &point, &query.window, true)
        .map_err(JoinError::ConditionLookup)?
        .ok_or(JoinError::NoMatchInRange)?;

    let mut con = near.into_mapping();
    let mut measures = measure.into_mapping();

    if let Some(keys) = &query.condition_keys {
        retain_keys(&mut con, keys);
    }
    if let Some(keys) = &query.measure_keys {
        retain_keys(&mut measures, keys);
    }

    for (collection, keys) in &query.extra {
        match extra_fields(store, collection, keys.as_deref(), &point, &query.window) {
            Ok(fields) => con.extend(fields),
            Err(e) => tracing::warn!(error = %e, "error adding extra conditions"),
        }
    }

    measures.retain(|key, _| !con.contains_key(key));
    con.remove(INTERNAL_ID);
    measures.remove(INTERNAL_ID);

    Ok(TrainingExample {
        conditions: con,
        measures,
    })
}

fn extra_fields<S: MatchStore + ?Sized>(
    store: &S,
    collection: &CollectionName,
    keys: Option<&[String]>,
    point: &QueryPoint,
    window: &SearchWindow,
) -> Result<Attributes, ExtraSourceError> {
    let near = nearest_match(store, collection, point, window, false)
        .map_err(|source| ExtraSourceError::Lookup {
            collection: collection.clone(),
            source,
        })?
        .ok_or_else(|| ExtraSourceError::NoMatch(collection.clone()))?;

    let mut fields = near.into_mapping();
    if let Some(keys) = keys {
        retain_keys(&mut fields, keys);
    }
    Ok(fields)
}

fn retain_keys(map: &mut Attributes, keys: &[String]) {
    map.retain(|key, _| keys.iter().any(|k| k == key));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{OpenStore, SqliteStore};
    use chrono::{DateTime, TimeZone, Utc};
    use serde_json::json;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2016, 5, 23, 4, 30, 0).unwrap()
    }

    fn secs(n: i64) -> chrono::Duration {
        chrono::Duration::seconds(n)
    }

    fn put(store: &SqliteStore, collection: &str, doc: Document) {
        let coll = store.collection(collection).unwrap();
        store.upsert_document(&coll, &doc).unwrap();
    }

    fn create_test_store() -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        put(
            &store,
            "conditions",
            Document::new(t0(), 40.0, 50.0)
                .with_field("pressure", 1013)
                .with_field("temperature", 21.5),
        );
        put(
            &store,
            "conditions",
            Document::new(t0() + secs(240), 45.0, 50.0).with_field("pressure", 990),
        );
        put(
            &store,
            "ozone",
            Document::new(t0() + secs(5), 40.0, 50.0)
                .with_field("o3", 31)
                .with_field("temperature", 19.0),
        );
        put(&store, "ozone", Document::new(t0() + secs(600), 10.0, 10.0).with_field("o3", 12));
        store
    }

    #[test]
    fn joins_measures_with_nearest_conditions() {
        let store = create_test_store();
        let examples = build_training_set(&store, &TrainingQuery::new("ozone")).unwrap();

        // The second ozone reading has no conditions in range
        assert_eq!(examples.len(), 1);
        let example = &examples[0];

        assert_eq!(example.conditions["pressure"], json!(1013));
        assert_eq!(example.conditions["time_diff"], json!(5.0));
        assert_eq!(example.measures["o3"], json!(31));
        assert!(!example.conditions.contains_key("_id"));
        assert!(!example.measures.contains_key("_id"));
    }

    #[test]
    fn missing_conditions_yield_empty_set_without_writing() {
        let store = create_test_store();
        assert!(store.drop_collection(&CollectionName::conditions()).unwrap());

        let examples = build_training_set(&store, &TrainingQuery::new("ozone")).unwrap();
        assert!(examples.is_empty());
        assert!(!store.has_collection(&CollectionName::conditions()).unwrap());
    }

    #[test]
    fn overlapping_keys_keep_condition_value() {
        let store = create_test_store();
        let examples = build_training_set(&store, &TrainingQuery::new("ozone")).unwrap();
        let example = &examples[0];

        assert_eq!(example.conditions["temperature"], json!(21.5));
        assert!(!example.measures.contains_key("temperature"));
        // Key fields are shared too
        assert!(!example.measures.contains_key("timestamp"));
        assert!(example.conditions.contains_key("timestamp"));
    }

    #[test]
    fn key_filters_narrow_both_sides() {
        let store = create_test_store();
        let query = TrainingQuery::new("ozone")
            .with_condition_keys(["pressure", "distance"])
            .with_measure_keys(["o3", "timestamp"]);

        let examples = build_training_set(&store, &query).unwrap();
        let example = &examples[0];

        let mut condition_keys: Vec<&String> = example.conditions.keys().collect();
        condition_keys.sort();
        assert_eq!(condition_keys, vec!["distance", "pressure"]);

        let mut measure_keys: Vec<&String> = example.measures.keys().collect();
        measure_keys.sort();
        assert_eq!(measure_keys, vec!["o3", "timestamp"]);
    }

    #[test]
    fn extra_collections_merge_into_conditions() {
        let store = create_test_store();
        put(
            &store,
            "weather",
            Document::new(t0() + secs(3), 40.0, 50.0)
                .with_field("wind", 4.2)
                .with_field("pressure", 1001),
        );

        let query = TrainingQuery::new("ozone")
            .with_condition_keys(["pressure"])
            .with_extra("weather", Some(vec!["wind".to_string()]))
            .with_extra("missing", None);

        let examples = build_training_set(&store, &query).unwrap();
        let example = &examples[0];

        assert_eq!(example.conditions["wind"], json!(4.2));
        // Filtered out of the extra source, so conditions keep their own value
        assert_eq!(example.conditions["pressure"], json!(1013));
        assert!(!example.conditions.contains_key("lat_diff"));
    }

    #[test]
    fn unfiltered_extra_overwrites_condition_fields() {
        let store = create_test_store();
        put(
            &store,
            "weather",
            Document::new(t0() + secs(3), 40.0, 50.0).with_field("pressure", 1001),
        );

        let query = TrainingQuery::new("ozone").with_extra("weather", None);
        let examples = build_training_set(&store, &query).unwrap();

        assert_eq!(examples[0].conditions["pressure"], json!(1001));
    }

    #[test]
    fn missing_measure_collection_is_an_error() {
        let store = create_test_store();
        let err = build_training_set(&store, &TrainingQuery::new("no2")).unwrap_err();
        assert!(matches!(err, StorageError::CollectionNotFound(_)));
    }

    #[test]
    fn join_measure_reports_no_match() {
        let store = create_test_store();
        let lonely = Document::new(t0(), -10.0, -10.0);
        let err = join_measure(
            &store,
            &CollectionName::conditions(),
            &TrainingQuery::new("ozone"),
            lonely,
        )
        .unwrap_err();
        assert!(matches!(err, JoinError::NoMatchInRange));
    }
}
