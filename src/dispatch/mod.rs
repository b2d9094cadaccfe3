//! Ingestion dispatch layer
//!
//! Discovered resource URIs are fetched, matched to a sensor plugin by
//! sensor type, bundled with auxiliary graph data, processed, and any
//! derived reading is published as a new virtual sensor.

mod pipeline;
mod plugin;
mod registry;
mod types;

pub use pipeline::{DispatchError, DispatchLoop};
pub use plugin::{PluginError, SensorPlugin};
pub use registry::PluginRegistry;
pub use types::{
    AuxRequirement, BundleEntry, DispatchOutcome, DispatchStats, ProcessingBundle, PublishResult,
    SensorResource, SkipReason, PRIMARY_SOURCE,
};
