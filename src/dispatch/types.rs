//! Dispatch vocabulary
//!
//! - SensorResource: fetched attribute snapshot of one discovered resource
//! - AuxRequirement: what a plugin needs for a `(metric, unit)` pair
//! - ProcessingBundle: primary data followed by resolved auxiliary data
//! - PublishResult: a derived reading to publish as a virtual sensor
//! - DispatchOutcome / SkipReason: what happened to one URI

use crate::graph::Attributes;
use serde_json::Value;
use std::fmt;

/// Bundle source label of the primary resource's data
pub const PRIMARY_SOURCE: &str = "main";

/// Keys checked, in order, for the sensor type
const SENSOR_TYPE_KEYS: [&str; 2] = ["sensorType", "sensor_type"];

/// Attribute snapshot of a fetched sensor resource.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorResource {
    attributes: Attributes,
}

impl SensorResource {
    pub fn new(attributes: Attributes) -> Self {
        Self { attributes }
    }

    pub fn sensor_type(&self) -> Option<&str> {
        SENSOR_TYPE_KEYS
            .iter()
            .find_map(|key| self.attributes.get(*key).and_then(Value::as_str))
    }

    pub fn metric(&self) -> Option<&str> {
        self.attributes.get("metric").and_then(Value::as_str)
    }

    pub fn unit(&self) -> Option<&str> {
        self.attributes.get("unit").and_then(Value::as_str)
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }
}

/// A plugin's answer to "what do you need for this `(metric, unit)`?"
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuxRequirement {
    /// The plugin has no logic for this pair; the resource is skipped
    Unhandled,
    /// Titles of auxiliary resources to collect, in order (may be empty)
    Required(Vec<String>),
}

impl AuxRequirement {
    /// Handled, with no auxiliary data needed
    pub fn none() -> Self {
        Self::Required(Vec::new())
    }

    pub fn titles<I, S>(titles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Required(titles.into_iter().map(Into::into).collect())
    }
}

/// One `{source, data}` entry of a bundle
#[derive(Debug, Clone, PartialEq)]
pub struct BundleEntry {
    pub source: String,
    pub data: Attributes,
}

/// Data handed to a plugin: the primary resource first, then each
/// auxiliary resource that was found, in requested order.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessingBundle {
    entries: Vec<BundleEntry>,
}

impl ProcessingBundle {
    pub fn new(primary: Attributes) -> Self {
        Self {
            entries: vec![BundleEntry {
                source: PRIMARY_SOURCE.to_string(),
                data: primary,
            }],
        }
    }

    pub fn push_aux(&mut self, title: impl Into<String>, data: Attributes) {
        self.entries.push(BundleEntry {
            source: title.into(),
            data,
        });
    }

    pub fn primary(&self) -> &Attributes {
        &self.entries[0].data
    }

    /// Data of the first auxiliary entry with this title
    pub fn aux(&self, title: &str) -> Option<&Attributes> {
        self.entries[1..]
            .iter()
            .find(|e| e.source == title)
            .map(|e| &e.data)
    }

    pub fn entries(&self) -> &[BundleEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Always false: a bundle carries at least the primary entry
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A derived reading to publish as a new virtual sensor
#[derive(Debug, Clone, PartialEq)]
pub struct PublishResult {
    pub sensor_type: String,
    pub metric: String,
    pub unit: String,
    pub payload: Value,
}

impl PublishResult {
    pub fn new(
        sensor_type: impl Into<String>,
        metric: impl Into<String>,
        unit: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            sensor_type: sensor_type.into(),
            metric: metric.into(),
            unit: unit.into(),
            payload,
        }
    }

    /// Attributes of the sensor resource created for this result
    pub fn sensor_attributes(&self) -> Attributes {
        let mut attrs = Attributes::new();
        attrs.insert("sensor_type".into(), Value::String(self.sensor_type.clone()));
        attrs.insert("metric".into(), Value::String(self.metric.clone()));
        attrs.insert("unit".into(), Value::String(self.unit.clone()));
        attrs
    }
}

/// Why a URI was skipped before processing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    FetchUnavailable,
    MissingSensorType,
    UnrecognizedType(String),
    MissingRequiredField(&'static str),
    UnhandledMetricUnit { metric: String, unit: String },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FetchUnavailable => write!(f, "resource unavailable"),
            Self::MissingSensorType => write!(f, "no sensor type detected"),
            Self::UnrecognizedType(t) => write!(f, "sensor type {} does not match any plugin", t),
            Self::MissingRequiredField(field) => write!(f, "missing required field {}", field),
            Self::UnhandledMetricUnit { metric, unit } => {
                write!(f, "no handling for metric {} / unit {}", metric, unit)
            }
        }
    }
}

/// Result of dispatching one URI
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// A virtual sensor was created and the payload attached to it
    Published { sensor_uri: String },
    /// The plugin declined (or failed) to produce a result
    NothingToPublish,
    /// A result was produced but no device resource was reachable
    PublishTargetMissing,
    Skipped(SkipReason),
}

/// Counters accumulated by [`crate::DispatchLoop::run`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub received: usize,
    pub published: usize,
    pub nothing_to_publish: usize,
    pub publish_target_missing: usize,
    pub skipped: usize,
    /// URIs abandoned because a graph operation failed
    pub failed: usize,
}

impl DispatchStats {
    pub fn record(&mut self, outcome: &DispatchOutcome) {
        match outcome {
            DispatchOutcome::Published { .. } => self.published += 1,
            DispatchOutcome::NothingToPublish => self.nothing_to_publish += 1,
            DispatchOutcome::PublishTargetMissing => self.publish_target_missing += 1,
            DispatchOutcome::Skipped(_) => self.skipped += 1,
        }
    }
}
