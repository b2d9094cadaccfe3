//! Document model for the matching store
//!
//! A document is a flat JSON object keyed by `(timestamp, lat, lon)`. All
//! other fields ride along in `fields` and merge on re-write.

use crate::graph::Attributes;
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde_json::Value;
use thiserror::Error;

/// Key of the document timestamp
pub const TIMESTAMP_KEY: &str = "timestamp";
pub const LAT_KEY: &str = "lat";
pub const LON_KEY: &str = "lon";

/// Store-assigned identifier, present on read and stripped on write
pub const INTERNAL_ID: &str = "_id";

/// Alternate timestamp keys, coalesced into `timestamp` in this order
pub const TIMESTAMP_ALIASES: [&str; 3] = ["UTC", "utc", "Timestamp"];

/// Naive date-time layouts accepted for timestamps (read as UTC)
const DATETIME_FORMATS: [&str; 8] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%m/%d/%y %H:%M:%S",
    "%m/%d/%y %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

/// Date-only layouts, read as midnight UTC
const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%m/%d/%y", "%m/%d/%Y"];

/// Why a mapping could not become a [`Document`]
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DocumentError {
    #[error("document is not a JSON object")]
    NotAnObject,

    #[error("missing required key: {0}")]
    MissingKey(&'static str),

    #[error("{0} is not a number")]
    NotANumber(&'static str),

    #[error("unparseable timestamp: {0}")]
    UnparseableTimestamp(String),
}

/// A stored reading.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// Store-assigned id; `None` until written
    pub id: Option<i64>,
    pub timestamp: DateTime<Utc>,
    pub lat: f64,
    pub lon: f64,
    /// Every other field of the mapping
    pub fields: Attributes,
}

impl Document {
    pub fn new(timestamp: DateTime<Utc>, lat: f64, lon: f64) -> Self {
        Self {
            id: None,
            timestamp,
            lat,
            lon,
            fields: Attributes::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn from_value(value: Value) -> Result<Self, DocumentError> {
        match value {
            Value::Object(map) => Self::from_mapping(map),
            _ => Err(DocumentError::NotAnObject),
        }
    }

    /// Build a document from a raw mapping.
    ///
    /// Timestamp aliases are coalesced first; any `_id` is discarded.
    pub fn from_mapping(mut map: Attributes) -> Result<Self, DocumentError> {
        for alias in TIMESTAMP_ALIASES {
            if let Some(value) = map.remove(alias) {
                map.insert(TIMESTAMP_KEY.to_string(), value);
            }
        }
        map.remove(INTERNAL_ID);

        let timestamp = map
            .remove(TIMESTAMP_KEY)
            .ok_or(DocumentError::MissingKey(TIMESTAMP_KEY))?;
        let timestamp = parse_timestamp(&timestamp)?;

        let lat = take_number(&mut map, LAT_KEY)?;
        let lon = take_number(&mut map, LON_KEY)?;

        Ok(Self {
            id: None,
            timestamp,
            lat,
            lon,
            fields: map,
        })
    }

    /// Flatten back into a mapping, including `_id` when known
    pub fn into_mapping(self) -> Attributes {
        let mut map = self.fields;
        map.insert(
            TIMESTAMP_KEY.to_string(),
            Value::String(format_timestamp(&self.timestamp)),
        );
        map.insert(LAT_KEY.to_string(), Value::from(self.lat));
        map.insert(LON_KEY.to_string(), Value::from(self.lon));
        if let Some(id) = self.id {
            map.insert(INTERNAL_ID.to_string(), Value::from(id));
        }
        map
    }

    /// Key fields are compared by their mapping representation
    pub fn field_equals(&self, key: &str, expected: &Value) -> bool {
        match key {
            TIMESTAMP_KEY => parse_timestamp(expected).map_or(false, |ts| ts == self.timestamp),
            LAT_KEY => expected.as_f64() == Some(self.lat),
            LON_KEY => expected.as_f64() == Some(self.lon),
            _ => self.fields.get(key) == Some(expected),
        }
    }
}

fn take_number(map: &mut Attributes, key: &'static str) -> Result<f64, DocumentError> {
    map.remove(key)
        .ok_or(DocumentError::MissingKey(key))?
        .as_f64()
        .ok_or(DocumentError::NotANumber(key))
}

/// RFC 3339, UTC, with only as many fractional digits as needed
pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Parse a timestamp value.
///
/// Accepts RFC 3339 strings, common naive date-time and date layouts
/// (read as UTC) and numeric Unix seconds.
pub fn parse_timestamp(value: &Value) -> Result<DateTime<Utc>, DocumentError> {
    let unparseable = || DocumentError::UnparseableTimestamp(value.to_string());

    match value {
        Value::Number(n) => {
            let seconds = n.as_f64().ok_or_else(unparseable)?;
            DateTime::from_timestamp_micros((seconds * 1_000_000.0).round() as i64)
                .ok_or_else(unparseable)
        }
        Value::String(s) => parse_timestamp_str(s.trim()).ok_or_else(unparseable),
        _ => Err(unparseable()),
    }
}

fn parse_timestamp_str(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Some(dt.with_timezone(&Utc));
    }

    for format in DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(naive.and_utc());
        }
    }

    DATE_FORMATS.iter().find_map(|format| {
        NaiveDate::parse_from_str(s, format)
            .ok()
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .map(|naive| naive.and_utc())
    })
}
