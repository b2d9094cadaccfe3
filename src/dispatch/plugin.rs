//! SensorPlugin trait: the contract sensor-type processors implement

use super::types::{AuxRequirement, ProcessingBundle, PublishResult};
use thiserror::Error;

/// Errors raised inside a plugin's transform.
///
/// The dispatch loop treats any of these as "nothing to publish".
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("missing bundle data: {0}")]
    MissingData(String),
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
    #[error("plugin panicked: {0}")]
    Panicked(String),
    #[error("plugin error: {0}")]
    Internal(String),
}

/// A sensor-type processor.
///
/// Both operations are keyed by `(metric, unit)`. Implementations must not
/// share mutable state with other plugins.
pub trait SensorPlugin: Send + Sync {
    /// Name matched case-insensitively against a resource's sensor type
    fn name(&self) -> &str;

    /// Which auxiliary resources must be collected before processing
    fn required_aux_data(&self, metric: &str, unit: &str) -> AuxRequirement;

    /// Transform the bundle, returning a reading to publish or `None` to decline
    fn process_data(
        &self,
        bundle: &ProcessingBundle,
        metric: &str,
        unit: &str,
    ) -> Result<Option<PublishResult>, PluginError>;
}
