//! AlphasenseAFEtemp: temperature channel of an Alphasense analog front end

use crate::dispatch::{AuxRequirement, PluginError, ProcessingBundle, PublishResult, SensorPlugin};

const NAME: &str = "AlphasenseAFEtemp";

/// Sensor type stamped on readings derived from the raw channel
const DERIVED_SENSOR_TYPE: &str = "test_post_sensortype";

/// Ozone electrode channels used to learn a corrected temperature
const LEARNED_TEMP_AUX: [&str; 2] = ["O3_raw_work", "O3_raw_aux"];

/// The `(metric, unit)` pairs this plugin understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Channel {
    RawTemperature,
    Temperature,
}

impl Channel {
    fn of(metric: &str, unit: &str) -> Option<Self> {
        match (metric, unit) {
            ("temperature_raw", "raw") => Some(Self::RawTemperature),
            ("temperature", "celcius") => Some(Self::Temperature),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AlphasenseAfeTemp;

impl SensorPlugin for AlphasenseAfeTemp {
    fn name(&self) -> &str {
        NAME
    }

    fn required_aux_data(&self, metric: &str, unit: &str) -> AuxRequirement {
        match Channel::of(metric, unit) {
            Some(Channel::RawTemperature) => AuxRequirement::none(),
            Some(Channel::Temperature) => AuxRequirement::titles(LEARNED_TEMP_AUX),
            None => AuxRequirement::Unhandled,
        }
    }

    fn process_data(
        &self,
        bundle: &ProcessingBundle,
        metric: &str,
        unit: &str,
    ) -> Result<Option<PublishResult>, PluginError> {
        match Channel::of(metric, unit) {
            Some(Channel::RawTemperature) => {
                let data = bundle
                    .primary()
                    .get("data")
                    .ok_or_else(|| PluginError::MissingData("data".to_string()))?;

                Ok(Some(PublishResult::new(
                    DERIVED_SENSOR_TYPE,
                    "temperature",
                    "celcius",
                    data.clone(),
                )))
            }
            // No learned-temperature model yet
            Some(Channel::Temperature) => Ok(None),
            None => Ok(None),
        }
    }
}
