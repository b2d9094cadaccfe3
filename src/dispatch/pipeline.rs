//! Dispatch loop: the serial consumer of discovered resource URIs
//!
//! Per URI:
//! 1. Fetch the resource
//! 2. Match its sensor type to a plugin
//! 3. Read metric and unit
//! 4. Ask the plugin which auxiliary resources it needs
//! 5. Build the processing bundle from the graph
//! 6. Run the plugin
//! 7. Publish any result under the nearest device resource
//!
//! Every failure is contained to the URI being processed.

use super::plugin::{PluginError, SensorPlugin};
use super::registry::PluginRegistry;
use super::types::{
    AuxRequirement, DispatchOutcome, DispatchStats, ProcessingBundle, PublishResult,
    SensorResource, SkipReason,
};
use crate::fetch::Fetcher;
use crate::graph::{FindFilter, GraphClient, GraphError, DEFAULT_NAMESPACE};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Resource type searched for when publishing
const PUBLISH_TARGET_TYPE: &str = "device";
/// Resource type created for derived readings
const VIRTUAL_SENSOR_TYPE: &str = "Sensor";

/// Failures that abandon one URI mid-flight.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("graph operation failed for {uri}: {source}")]
    Graph {
        uri: String,
        #[source]
        source: GraphError,
    },
}

impl DispatchError {
    fn graph(uri: &str, source: GraphError) -> Self {
        Self::Graph {
            uri: uri.to_string(),
            source,
        }
    }
}

/// The ingestion pipeline orchestrator.
pub struct DispatchLoop {
    fetcher: Arc<dyn Fetcher>,
    graph: Arc<dyn GraphClient>,
    registry: Arc<PluginRegistry>,
    publish_namespace: String,
}

impl DispatchLoop {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        graph: Arc<dyn GraphClient>,
        registry: Arc<PluginRegistry>,
    ) -> Self {
        Self {
            fetcher,
            graph,
            registry,
            publish_namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }

    /// Relation namespace the publish target must be reached through
    pub fn with_publish_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.publish_namespace = namespace.into();
        self
    }

    /// Consume URIs until every sender is dropped.
    ///
    /// URIs are processed strictly one at a time: URI N is fully handled
    /// before URI N+1 is received.
    pub async fn run(&self, mut queue: mpsc::Receiver<String>) -> DispatchStats {
        let mut stats = DispatchStats::default();

        while let Some(uri) = queue.recv().await {
            stats.received += 1;
            match self.process_uri(&uri).await {
                Ok(outcome) => stats.record(&outcome),
                Err(e) => {
                    tracing::warn!(uri = %uri, error = %e, "dispatch abandoned");
                    stats.failed += 1;
                }
            }
        }

        tracing::info!(
            received = stats.received,
            published = stats.published,
            skipped = stats.skipped,
            failed = stats.failed,
            "queue closed, dispatch loop finished"
        );
        stats
    }

    /// Run the full protocol for one URI.
    pub async fn process_uri(&self, uri: &str) -> Result<DispatchOutcome, DispatchError> {
        let resource = match self.fetcher.fetch(uri).await {
            Ok(attributes) => SensorResource::new(attributes),
            Err(e) => {
                tracing::warn!(uri = %uri, error = %e, "fetch failed");
                return Ok(DispatchOutcome::Skipped(SkipReason::FetchUnavailable));
            }
        };

        let Some(sensor_type) = resource.sensor_type() else {
            tracing::warn!(uri = %uri, "no sensor_type detected");
            return Ok(DispatchOutcome::Skipped(SkipReason::MissingSensorType));
        };

        let Some(plugin) = self.registry.resolve(sensor_type) else {
            tracing::info!(
                uri = %uri,
                sensor_type = %sensor_type,
                "sensor_type does not match any plugin"
            );
            return Ok(DispatchOutcome::Skipped(SkipReason::UnrecognizedType(
                sensor_type.to_string(),
            )));
        };
        tracing::info!(uri = %uri, plugin = %plugin.name(), "sensor_type matches a plugin");

        let Some(metric) = resource.metric() else {
            tracing::info!(uri = %uri, "resource has no metric");
            return Ok(DispatchOutcome::Skipped(SkipReason::MissingRequiredField("metric")));
        };
        let Some(unit) = resource.unit() else {
            tracing::info!(uri = %uri, "resource has no unit");
            return Ok(DispatchOutcome::Skipped(SkipReason::MissingRequiredField("unit")));
        };

        let titles = match plugin.required_aux_data(metric, unit) {
            AuxRequirement::Unhandled => {
                tracing::info!(
                    uri = %uri,
                    metric = %metric,
                    unit = %unit,
                    "plugin has no handling for metric/unit"
                );
                return Ok(DispatchOutcome::Skipped(SkipReason::UnhandledMetricUnit {
                    metric: metric.to_string(),
                    unit: unit.to_string(),
                }));
            }
            AuxRequirement::Required(titles) => titles,
        };
        tracing::debug!(uri = %uri, aux = ?titles, "auxiliary data requested");

        let bundle = self.collect_bundle(uri, &titles).await?;

        match run_plugin(plugin.as_ref(), &bundle, metric, unit) {
            Some(result) => self.publish(uri, result).await,
            None => {
                tracing::info!(uri = %uri, "no values to publish");
                Ok(DispatchOutcome::NothingToPublish)
            }
        }
    }

    /// Primary data first, then each requested title that can be found.
    async fn collect_bundle(
        &self,
        uri: &str,
        titles: &[String],
    ) -> Result<ProcessingBundle, DispatchError> {
        let primary = self.graph.traverse(uri).await.map_err(|e| DispatchError::graph(uri, e))?;
        let mut bundle = ProcessingBundle::new(primary);

        for title in titles {
            let filter = FindFilter::new().with_title(title.as_str());
            let found = self
                .graph
                .find_first(uri, &filter)
                .await
                .map_err(|e| DispatchError::graph(uri, e))?;

            let Some(aux_uri) = found else {
                tracing::debug!(uri = %uri, title = %title, "auxiliary resource not found");
                continue;
            };

            match self.graph.traverse(&aux_uri).await {
                Ok(data) => bundle.push_aux(title.as_str(), data),
                Err(e) => {
                    tracing::warn!(
                        uri = %aux_uri,
                        title = %title,
                        error = %e,
                        "auxiliary resource unreadable"
                    );
                }
            }
        }

        Ok(bundle)
    }

    async fn publish(
        &self,
        uri: &str,
        result: PublishResult,
    ) -> Result<DispatchOutcome, DispatchError> {
        let filter = FindFilter::new()
            .with_resource_type(PUBLISH_TARGET_TYPE)
            .with_namespace(self.publish_namespace.as_str());

        let device = self
            .graph
            .find_first(uri, &filter)
            .await
            .map_err(|e| DispatchError::graph(uri, e))?;

        let Some(device) = device else {
            tracing::warn!(uri = %uri, "can't find device to publish data to");
            return Ok(DispatchOutcome::PublishTargetMissing);
        };

        let sensor_uri = self
            .graph
            .create_child_resource(&device, VIRTUAL_SENSOR_TYPE, result.sensor_attributes())
            .await
            .map_err(|e| DispatchError::graph(uri, e))?;

        self.graph
            .attach_data(&sensor_uri, result.payload)
            .await
            .map_err(|e| DispatchError::graph(uri, e))?;

        tracing::info!(
            uri = %uri,
            device = %device,
            sensor = %sensor_uri,
            metric = %result.metric,
            unit = %result.unit,
            "published virtual sensor"
        );
        Ok(DispatchOutcome::Published { sensor_uri })
    }
}

/// Run a plugin's transform; errors and panics become "nothing to publish".
fn run_plugin(
    plugin: &dyn SensorPlugin,
    bundle: &ProcessingBundle,
    metric: &str,
    unit: &str,
) -> Option<PublishResult> {
    let outcome = catch_unwind(AssertUnwindSafe(|| plugin.process_data(bundle, metric, unit)))
        .unwrap_or_else(|panic| {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_default();
            Err(PluginError::Panicked(message))
        });

    match outcome {
        Ok(result) => result,
        Err(e) => {
            tracing::warn!(
                plugin = %plugin.name(),
                metric = %metric,
                unit = %unit,
                error = %e,
                "plugin processing failed"
            );
            None
        }
    }
}
