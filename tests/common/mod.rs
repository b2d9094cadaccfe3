//! Shared fixtures for sensorchain integration tests

#![allow(dead_code)]

use sensorchain::graph::DEFAULT_NAMESPACE;
use sensorchain::{Attributes, GraphResource, MemoryGraph};
use serde_json::{json, Value};

pub const SITE: &str = "http://example.org/sites/1";
pub const DEVICE: &str = "http://example.org/sites/1/devices/1";
pub const TEMP_RAW: &str = "http://example.org/sites/1/devices/1/sensors/1";
pub const TEMP: &str = "http://example.org/sites/1/devices/1/sensors/2";
pub const O3_WORK: &str = "http://example.org/sites/1/devices/1/sensors/3";
pub const O3_AUX: &str = "http://example.org/sites/1/devices/1/sensors/4";
pub const FOO: &str = "http://example.org/sites/1/devices/1/sensors/5";

pub fn rel(name: &str) -> String {
    format!("{}{}", DEFAULT_NAMESPACE, name)
}

fn sensor(uri: &str, title: &str, sensor_type: &str, metric: &str, unit: &str) -> GraphResource {
    GraphResource::new(uri, "Sensor")
        .with_title(title)
        .with_attribute("sensor_type", sensor_type)
        .with_attribute("metric", metric)
        .with_attribute("unit", unit)
        .with_link(rel("device"), DEVICE)
}

pub fn raw_readings() -> Value {
    json!([
        {"timestamp": "2016-05-23T04:30:00Z", "value": 512},
        {"timestamp": "2016-05-23T04:31:00Z", "value": 515}
    ])
}

/// One site, one device, five sensors:
/// - raw temperature (publishes)
/// - calibrated temperature (needs both ozone channels, declines)
/// - two ozone electrodes of an unregistered type
/// - one sensor of type "Foo"
pub fn station() -> MemoryGraph {
    let graph = MemoryGraph::new();
    graph.insert(
        GraphResource::new(SITE, "Site")
            .with_title("rooftop")
            .with_link(rel("devices"), DEVICE),
    );
    graph.insert(
        GraphResource::new(DEVICE, "Device")
            .with_title("station-a")
            .with_link(rel("site"), SITE)
            .with_link(rel("sensors"), TEMP_RAW)
            .with_link(rel("sensors"), TEMP)
            .with_link(rel("sensors"), O3_WORK)
            .with_link(rel("sensors"), O3_AUX)
            .with_link(rel("sensors"), FOO),
    );

    let mut temp_raw = sensor(TEMP_RAW, "temp_raw", "AlphasenseAFEtemp", "temperature_raw", "raw");
    if let Value::Array(readings) = raw_readings() {
        temp_raw.data = readings;
    }
    graph.insert(temp_raw);
    graph.insert(sensor(TEMP, "temp", "AlphasenseAFEtemp", "temperature", "celcius"));
    graph.insert(sensor(O3_WORK, "O3_raw_work", "AlphasenseO3", "o3_work", "mv"));
    graph.insert(sensor(O3_AUX, "O3_raw_aux", "AlphasenseO3", "o3_aux", "mv"));
    graph.insert(
        GraphResource::new(FOO, "Sensor")
            .with_title("foo")
            .with_attribute("sensorType", "Foo")
            .with_attribute("metric", "foo")
            .with_attribute("unit", "bar")
            .with_link(rel("device"), DEVICE),
    );
    graph
}

pub fn mapping(value: Value) -> Attributes {
    value.as_object().cloned().unwrap_or_default()
}
