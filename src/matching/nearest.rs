//! Nearest-match search over a store collection
//!
//! An exact `(timestamp, lat, lon)` hit always wins. Otherwise every
//! document inside the search box is a candidate and exactly one is
//! chosen, by location or by time.
//!
//! Stored timestamps have microsecond resolution, so query timestamps are
//! truncated to whole microseconds before searching.

use crate::graph::Attributes;
use crate::storage::{CollectionName, Document, MatchStore, SearchBox, StorageResult};
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Largest accepted `time_range_secs`, the span of a `chrono::Duration`
pub const MAX_TIME_RANGE_SECS: i64 = i64::MAX / 1_000;

/// Range and selection policy for a nearest-match search
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchWindow {
    /// Half-width of the time window, in seconds
    pub time_range_secs: i64,
    /// Half-width of the lat and lon windows, in degrees
    pub lat_lon_range_deg: f64,
    /// Pick the closest candidate by location (true) or by time (false)
    pub prefer_location: bool,
}

impl Default for SearchWindow {
    fn default() -> Self {
        Self {
            time_range_secs: 30,
            lat_lon_range_deg: 1.0,
            prefer_location: true,
        }
    }
}

impl SearchWindow {
    pub fn new(time_range_secs: i64, lat_lon_range_deg: f64) -> Self {
        Self {
            time_range_secs,
            lat_lon_range_deg,
            ..Self::default()
        }
    }

    pub fn prefer_time(mut self) -> Self {
        self.prefer_location = false;
        self
    }

    /// Time half-width, clamped to `0..=MAX_TIME_RANGE_SECS`
    pub fn time_range(&self) -> chrono::Duration {
        chrono::Duration::try_seconds(self.time_range_secs.clamp(0, MAX_TIME_RANGE_SECS))
            .unwrap_or(chrono::Duration::MAX)
    }

    pub fn validate(&self) -> Result<(), String> {
        if !(0..=MAX_TIME_RANGE_SECS).contains(&self.time_range_secs) {
            return Err(format!(
                "time_range_secs must be between 0 and {}",
                MAX_TIME_RANGE_SECS
            ));
        }
        let degrees = self.lat_lon_range_deg;
        if degrees.is_nan() || degrees < 0.0 {
            return Err("lat_lon_range_deg must not be negative".into());
        }
        Ok(())
    }

    /// Search box centered on a point
    pub fn bounds(&self, point: &QueryPoint) -> SearchBox {
        SearchBox::around(
            point.timestamp,
            point.lat,
            point.lon,
            self.time_range(),
            self.lat_lon_range_deg,
        )
    }
}

/// The `(timestamp, lat, lon)` a search is centered on
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueryPoint {
    pub timestamp: DateTime<Utc>,
    pub lat: f64,
    pub lon: f64,
}

impl QueryPoint {
    pub fn new(timestamp: DateTime<Utc>, lat: f64, lon: f64) -> Self {
        Self { timestamp, lat, lon }
    }

    pub fn of(doc: &Document) -> Self {
        Self::new(doc.timestamp, doc.lat, doc.lon)
    }

    /// Same point with the timestamp truncated to stored precision
    fn at_store_precision(&self) -> Self {
        Self::new(self.timestamp.trunc_subsecs(6), self.lat, self.lon)
    }

    fn squared_distance(&self, doc: &Document) -> f64 {
        (doc.lat - self.lat).powi(2) + (doc.lon - self.lon).powi(2)
    }

    fn time_distance(&self, doc: &Document) -> chrono::Duration {
        (doc.timestamp - self.timestamp).abs()
    }
}

/// Offsets of a match from the query point (query minus match)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchDiffs {
    pub lat_diff: f64,
    pub lon_diff: f64,
    /// `sqrt(lat_diff² + lon_diff²)`
    pub distance: f64,
    pub time_diff: chrono::Duration,
}

impl MatchDiffs {
    pub fn zero() -> Self {
        Self {
            lat_diff: 0.0,
            lon_diff: 0.0,
            distance: 0.0,
            time_diff: chrono::Duration::zero(),
        }
    }

    pub fn between(point: &QueryPoint, doc: &Document) -> Self {
        let lat_diff = point.lat - doc.lat;
        let lon_diff = point.lon - doc.lon;
        Self {
            lat_diff,
            lon_diff,
            distance: (lat_diff.powi(2) + lon_diff.powi(2)).sqrt(),
            time_diff: point.timestamp - doc.timestamp,
        }
    }

    /// Time difference in seconds
    pub fn time_diff_secs(&self) -> f64 {
        match self.time_diff.num_microseconds() {
            Some(us) => us as f64 / 1_000_000.0,
            None => self.time_diff.num_milliseconds() as f64 / 1_000.0,
        }
    }

    /// Write the diff fields into a document mapping
    pub fn annotate(&self, map: &mut Attributes) {
        map.insert("lat_diff".to_string(), Value::from(self.lat_diff));
        map.insert("lon_diff".to_string(), Value::from(self.lon_diff));
        map.insert("distance".to_string(), Value::from(self.distance));
        map.insert("time_diff".to_string(), Value::from(self.time_diff_secs()));
    }
}

/// Result of a nearest-match search
#[derive(Debug, Clone, PartialEq)]
pub struct NearMatch {
    pub document: Document,
    /// Present when diffs were requested
    pub diffs: Option<MatchDiffs>,
    /// True when the key matched exactly
    pub exact: bool,
}

impl NearMatch {
    /// Document mapping with diff fields added when present
    pub fn into_mapping(self) -> Attributes {
        let mut map = self.document.into_mapping();
        if let Some(diffs) = self.diffs {
            diffs.annotate(&mut map);
        }
        map
    }
}

/// Find the single best match for `point` in `collection`.
///
/// Returns `Ok(None)` when nothing lies inside the window. Ties go to the
/// candidate stored first. Sub-microsecond parts of the query timestamp are
/// dropped, matching how documents are stored.
pub fn nearest_match<S: MatchStore + ?Sized>(
    store: &S,
    collection: &CollectionName,
    point: &QueryPoint,
    window: &SearchWindow,
    include_diffs: bool,
) -> StorageResult<Option<NearMatch>> {
    let point = &point.at_store_precision();
    if let Some(document) =
        store.find_exact(collection, point.timestamp, point.lat, point.lon)?
    {
        tracing::debug!(collection = %collection, "exact match found");
        return Ok(Some(NearMatch {
            document,
            diffs: include_diffs.then(MatchDiffs::zero),
            exact: true,
        }));
    }

    let candidates = store.find_in_box(collection, &window.bounds(point))?;
    let chosen = if window.prefer_location {
        closest_by(candidates, |doc| point.squared_distance(doc))
    } else {
        closest_by(candidates, |doc| point.time_distance(doc))
    };

    let Some(document) = chosen else {
        tracing::debug!(collection = %collection, "no match in range");
        return Ok(None);
    };

    let diffs = MatchDiffs::between(point, &document);
    tracing::debug!(
        collection = %collection,
        lat_diff = diffs.lat_diff,
        lon_diff = diffs.lon_diff,
        time_diff = diffs.time_diff_secs(),
        "match found in range"
    );

    Ok(Some(NearMatch {
        document,
        diffs: include_diffs.then_some(diffs),
        exact: false,
    }))
}

/// First candidate with a strictly smaller key than all before it
fn closest_by<K: PartialOrd>(
    candidates: Vec<Document>,
    key: impl Fn(&Document) -> K,
) -> Option<Document> {
    let mut best: Option<(K, Document)> = None;
    for doc in candidates {
        let k = key(&doc);
        let better = match &best {
            Some((best_key, _)) => k < *best_key,
            None => true,
        };
        if better {
            best = Some((k, doc));
        }
    }
    best.map(|(_, doc)| doc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{OpenStore, SqliteStore};
    use chrono::TimeZone;
    use serde_json::json;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2016, 5, 23, 4, 30, 0).unwrap()
    }

    fn secs(n: i64) -> chrono::Duration {
        chrono::Duration::seconds(n)
    }

    fn store_with(docs: Vec<Document>) -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        let coll = CollectionName::conditions();
        for doc in docs {
            store.upsert_document(&coll, &doc).unwrap();
        }
        store
    }

    #[test]
    fn exact_match_has_zero_diffs() {
        let store = store_with(vec![
            Document::new(t0(), 40.0, 50.0).with_field("n", 1),
            Document::new(t0() + secs(1), 40.0, 50.0).with_field("n", 2),
        ]);

        let found = nearest_match(
            &store,
            &CollectionName::conditions(),
            &QueryPoint::new(t0(), 40.0, 50.0),
            &SearchWindow::default(),
            true,
        )
        .unwrap()
        .unwrap();

        assert!(found.exact);
        assert_eq!(found.document.fields["n"], json!(1));
        assert_eq!(found.diffs, Some(MatchDiffs::zero()));
    }

    #[test]
    fn range_match_reports_query_minus_match() {
        let store =
            store_with(vec![Document::new(t0(), 40.0, 50.0).with_field("pressure", 1000)]);

        let found = nearest_match(
            &store,
            &CollectionName::conditions(),
            &QueryPoint::new(t0() + secs(10), 40.5, 50.5),
            &SearchWindow::new(30, 1.0),
            true,
        )
        .unwrap()
        .unwrap();

        assert!(!found.exact);
        let diffs = found.diffs.unwrap();
        assert_eq!(diffs.lat_diff, 0.5);
        assert_eq!(diffs.lon_diff, 0.5);
        assert!((diffs.distance - 0.5f64.sqrt()).abs() < 1e-12);
        assert_eq!(diffs.time_diff, secs(10));
    }

    #[test]
    fn outside_window_is_none() {
        let store = store_with(vec![Document::new(t0(), 40.0, 50.0)]);
        let coll = CollectionName::conditions();

        let too_late = QueryPoint::new(t0() + secs(31), 40.0, 50.0);
        assert!(nearest_match(&store, &coll, &too_late, &SearchWindow::default(), true)
            .unwrap()
            .is_none());

        let too_far = QueryPoint::new(t0(), 41.5, 50.0);
        assert!(nearest_match(&store, &coll, &too_far, &SearchWindow::default(), true)
            .unwrap()
            .is_none());
    }

    #[test]
    fn location_and_time_preferences_disagree() {
        // Close in space but far in time, versus far in space but close in time
        let store = store_with(vec![
            Document::new(t0() + secs(25), 40.1, 50.0).with_field("pick", "location"),
            Document::new(t0() + secs(1), 40.9, 50.0).with_field("pick", "time"),
        ]);
        let coll = CollectionName::conditions();
        let point = QueryPoint::new(t0(), 40.0, 50.0);

        let by_location = nearest_match(&store, &coll, &point, &SearchWindow::default(), false)
            .unwrap()
            .unwrap();
        assert_eq!(by_location.document.fields["pick"], json!("location"));
        assert!(by_location.diffs.is_none());

        let by_time_window = SearchWindow::default().prefer_time();
        let by_time = nearest_match(&store, &coll, &point, &by_time_window, false)
            .unwrap()
            .unwrap();
        assert_eq!(by_time.document.fields["pick"], json!("time"));
    }

    #[test]
    fn ties_go_to_first_stored() {
        let store = store_with(vec![
            Document::new(t0() + secs(5), 40.5, 50.0).with_field("n", 1),
            Document::new(t0() - secs(5), 39.5, 50.0).with_field("n", 2),
        ]);
        let coll = CollectionName::conditions();
        let point = QueryPoint::new(t0(), 40.0, 50.0);

        for window in [SearchWindow::default(), SearchWindow::default().prefer_time()] {
            let found = nearest_match(&store, &coll, &point, &window, false).unwrap().unwrap();
            assert_eq!(found.document.fields["n"], json!(1));
        }
    }

    #[test]
    fn mapping_carries_diff_fields() {
        let mut doc = Document::new(t0(), 40.0, 50.0).with_field("pressure", 1000);
        doc.id = Some(1);
        let near = NearMatch {
            diffs: Some(MatchDiffs::between(&QueryPoint::new(t0() - secs(2), 40.25, 50.0), &doc)),
            document: doc,
            exact: false,
        };

        let map = near.into_mapping();
        assert_eq!(map["lat_diff"], json!(0.25));
        assert_eq!(map["lon_diff"], json!(0.0));
        assert_eq!(map["distance"], json!(0.25));
        assert_eq!(map["time_diff"], json!(-2.0));
        assert_eq!(map["pressure"], json!(1000));
        assert_eq!(map["_id"], json!(1));
    }

    #[test]
    fn window_deserializes_with_defaults() {
        let window: SearchWindow = serde_json::from_value(json!({"time_range_secs": 600})).unwrap();
        assert_eq!(window.time_range_secs, 600);
        assert_eq!(window.lat_lon_range_deg, 1.0);
        assert!(window.prefer_location);
    }

    #[test]
    fn oversized_window_searches_everything() {
        let store = store_with(vec![
            Document::new(t0() - secs(86_400 * 365), 40.0, 50.0).with_field("n", 1),
        ]);
        let coll = CollectionName::conditions();
        let point = QueryPoint::new(t0(), 40.0, 50.0);

        for secs in [10_000_000_000_000, MAX_TIME_RANGE_SECS, i64::MAX] {
            let window = SearchWindow::new(secs, 1.0).prefer_time();
            let found = nearest_match(&store, &coll, &point, &window, true).unwrap().unwrap();
            assert_eq!(found.document.fields["n"], json!(1));
        }
    }

    #[test]
    fn window_at_the_edge_of_time_is_clamped() {
        let late = DateTime::<Utc>::MAX_UTC.trunc_subsecs(6);
        let store = store_with(vec![Document::new(late, 40.0, 50.0)]);
        let coll = CollectionName::conditions();

        let point = QueryPoint::new(late, 40.5, 50.0);
        let found = nearest_match(&store, &coll, &point, &SearchWindow::default(), true)
            .unwrap()
            .unwrap();
        assert!(!found.exact);

        let bounds = SearchWindow::new(i64::MAX, 1.0).bounds(&point);
        assert_eq!(bounds.time_to, DateTime::<Utc>::MAX_UTC);
        assert_eq!(bounds.time_from, DateTime::<Utc>::MIN_UTC);
    }

    #[test]
    fn window_validation() {
        assert!(SearchWindow::default().validate().is_ok());
        assert!(SearchWindow::new(MAX_TIME_RANGE_SECS, 0.0).validate().is_ok());
        assert!(SearchWindow::new(MAX_TIME_RANGE_SECS + 1, 1.0).validate().is_err());
        assert!(SearchWindow::new(-1, 1.0).validate().is_err());
        assert!(SearchWindow::new(30, f64::NAN).validate().is_err());
    }

    #[test]
    fn query_is_resolved_at_microseconds() {
        let store = store_with(vec![Document::new(t0(), 40.0, 50.0)]);
        let coll = CollectionName::conditions();

        let nanos = QueryPoint::new(t0() + chrono::Duration::nanoseconds(500), 40.0, 50.0);
        let found = nearest_match(&store, &coll, &nanos, &SearchWindow::default(), true)
            .unwrap()
            .unwrap();
        assert!(found.exact);

        let micros = QueryPoint::new(t0() + chrono::Duration::nanoseconds(1_500), 40.0, 50.0);
        let found = nearest_match(&store, &coll, &micros, &SearchWindow::default(), true)
            .unwrap()
            .unwrap();
        assert!(!found.exact);
        assert_eq!(found.diffs.unwrap().time_diff, chrono::Duration::microseconds(1));
    }
}
