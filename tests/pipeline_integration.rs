//! End-to-end ingestion: crawler → queue → dispatch loop → published sensors

mod common;

use async_trait::async_trait;
use common::*;
use sensorchain::plugins::builtin_registry;
use sensorchain::{
    run_pipeline, Attributes, DispatchLoop, DispatchOutcome, FindFilter, GraphClient,
    GraphCrawler, GraphError, MemoryGraph, Relation, SkipReason,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn dispatch_over(graph: &Arc<MemoryGraph>) -> Arc<DispatchLoop> {
    Arc::new(DispatchLoop::new(
        graph.clone(),
        graph.clone(),
        Arc::new(builtin_registry()),
    ))
}

fn created_sensors(graph: &MemoryGraph) -> Vec<String> {
    let known = [TEMP_RAW, TEMP, O3_WORK, O3_AUX, FOO];
    graph
        .get(DEVICE)
        .unwrap()
        .links
        .into_iter()
        .map(|l| l.href)
        .filter(|href| href != SITE && !known.contains(&href.as_str()))
        .collect()
}

#[tokio::test]
async fn replay_station_publishes_one_virtual_sensor() {
    let graph = Arc::new(station());
    let crawler = GraphCrawler::new(graph.clone(), SITE);

    let report = run_pipeline(crawler, dispatch_over(&graph), 2).await.unwrap();

    assert_eq!(report.discovered, 5);
    assert_eq!(report.stats.received, 5);
    assert_eq!(report.stats.published, 1);
    assert_eq!(report.stats.nothing_to_publish, 1);
    // Two ozone channels and the Foo sensor
    assert_eq!(report.stats.skipped, 3);
    assert_eq!(report.stats.failed, 0);

    let created = created_sensors(&graph);
    assert_eq!(created.len(), 1);

    let sensor = graph.get(&created[0]).unwrap();
    assert_eq!(sensor.resource_type, "Sensor");
    assert_eq!(sensor.attributes["sensor_type"], json!("test_post_sensortype"));
    assert_eq!(sensor.attributes["metric"], json!("temperature"));
    assert_eq!(sensor.attributes["unit"], json!("celcius"));
    assert_eq!(sensor.data, vec![raw_readings()]);

    // The new sensor links back to its device
    assert!(sensor.links.iter().any(|l| l.href == DEVICE && l.rel == rel("device")));
}

#[tokio::test]
async fn published_sensor_is_visible_to_later_traversal() {
    let graph = Arc::new(station());
    let dispatch = dispatch_over(&graph);

    let outcome = dispatch.process_uri(TEMP_RAW).await.unwrap();
    let DispatchOutcome::Published { sensor_uri } = outcome else {
        panic!("expected publish, got {:?}", outcome);
    };

    let attributes = graph.traverse(&sensor_uri).await.unwrap();
    assert_eq!(attributes["data"], json!([raw_readings()]));
}

#[tokio::test]
async fn calibrated_channel_collects_aux_but_declines() {
    let graph = Arc::new(station());
    let dispatch = dispatch_over(&graph);

    let outcome = dispatch.process_uri(TEMP).await.unwrap();
    assert_eq!(outcome, DispatchOutcome::NothingToPublish);
    assert!(created_sensors(&graph).is_empty());
}

/// Graph client that only counts calls
#[derive(Default)]
struct CountingGraph {
    calls: AtomicUsize,
}

impl CountingGraph {
    fn tick(&self) -> Result<(), GraphError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(GraphError::Unavailable("counting only".into()))
    }
}

#[async_trait]
impl GraphClient for CountingGraph {
    async fn traverse(&self, _uri: &str) -> Result<Attributes, GraphError> {
        self.tick().map(|_| Attributes::new())
    }
    async fn find_first(
        &self,
        _start: &str,
        _filter: &FindFilter,
    ) -> Result<Option<String>, GraphError> {
        self.tick().map(|_| None)
    }
    async fn create_child_resource(
        &self,
        _parent: &str,
        _resource_type: &str,
        _attributes: Attributes,
    ) -> Result<String, GraphError> {
        self.tick().map(|_| String::new())
    }
    async fn attach_data(&self, _uri: &str, _payload: Value) -> Result<(), GraphError> {
        self.tick()
    }
    async fn relations(&self, _uri: &str) -> Result<Vec<Relation>, GraphError> {
        self.tick().map(|_| Vec::new())
    }
}

#[tokio::test]
async fn unregistered_type_never_reaches_the_graph() {
    let fetch_side = Arc::new(station());
    let graph = Arc::new(CountingGraph::default());
    let dispatch = DispatchLoop::new(fetch_side, graph.clone(), Arc::new(builtin_registry()));

    let outcome = dispatch.process_uri(FOO).await.unwrap();

    assert_eq!(
        outcome,
        DispatchOutcome::Skipped(SkipReason::UnrecognizedType("Foo".into()))
    );
    assert_eq!(graph.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn graph_failure_is_contained_to_one_uri() {
    let fetch_side = Arc::new(station());
    let graph = Arc::new(CountingGraph::default());
    let dispatch = DispatchLoop::new(fetch_side, graph.clone(), Arc::new(builtin_registry()));

    let (tx, rx) = tokio::sync::mpsc::channel(8);
    for uri in [TEMP_RAW, FOO, TEMP] {
        tx.send(uri.to_string()).await.unwrap();
    }
    drop(tx);

    let stats = dispatch.run(rx).await;
    assert_eq!(stats.received, 3);
    assert_eq!(stats.failed, 2);
    assert_eq!(stats.skipped, 1);
}

#[tokio::test]
async fn replay_from_snapshot_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("station.json");
    std::fs::write(&path, serde_json::to_string(&station().snapshot()).unwrap()).unwrap();

    let graph = Arc::new(MemoryGraph::load(&path).unwrap());
    let crawler = GraphCrawler::new(graph.clone(), SITE);
    let report = run_pipeline(crawler, dispatch_over(&graph), 64).await.unwrap();

    assert_eq!(report.stats.published, 1);
    assert_eq!(graph.len(), 8);
}
