//! MemoryGraph: an in-process linked-data graph
//!
//! Resources are keyed by URI and connected by directed, namespaced
//! relations. Loadable from a JSON snapshot so recorded graphs can be
//! replayed through the pipeline.

use super::client::{Attributes, FindFilter, GraphClient, GraphError, Relation};
use crate::fetch::{FetchError, Fetcher};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashSet, VecDeque};
use std::path::Path;
use uuid::Uuid;

/// Default relation namespace for created links
pub const DEFAULT_NAMESPACE: &str = "http://learnair.media.mit.edu:8000/rels/";

/// A resource stored in a [`MemoryGraph`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphResource {
    pub uri: String,
    /// Resource type (e.g. "Site", "Device", "Sensor")
    pub resource_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub attributes: Attributes,
    #[serde(default)]
    pub links: Vec<Relation>,
    /// Data payloads attached to this resource, oldest first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data: Vec<Value>,
}

impl GraphResource {
    pub fn new(uri: impl Into<String>, resource_type: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            resource_type: resource_type.into(),
            title: None,
            attributes: Attributes::new(),
            links: Vec::new(),
            data: Vec::new(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_link(mut self, rel: impl Into<String>, href: impl Into<String>) -> Self {
        self.links.push(Relation::new(rel, href));
        self
    }
}

/// Serialized form of a whole graph
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub resources: Vec<GraphResource>,
}

/// In-process graph implementing [`GraphClient`] and [`Fetcher`].
#[derive(Debug)]
pub struct MemoryGraph {
    resources: DashMap<String, GraphResource>,
    namespace: String,
}

impl MemoryGraph {
    /// Create an empty graph using [`DEFAULT_NAMESPACE`] for new links
    pub fn new() -> Self {
        Self {
            resources: DashMap::new(),
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn from_snapshot(snapshot: GraphSnapshot) -> Self {
        let graph = Self::new();
        for resource in snapshot.resources {
            graph.insert(resource);
        }
        graph
    }

    /// Load a graph from a JSON snapshot file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, GraphError> {
        let text = std::fs::read_to_string(path)?;
        let snapshot: GraphSnapshot = serde_json::from_str(&text)?;
        Ok(Self::from_snapshot(snapshot))
    }

    /// Snapshot of all resources, ordered by URI
    pub fn snapshot(&self) -> GraphSnapshot {
        let mut resources: Vec<GraphResource> =
            self.resources.iter().map(|r| r.value().clone()).collect();
        resources.sort_by(|a, b| a.uri.cmp(&b.uri));
        GraphSnapshot { resources }
    }

    /// Insert or replace a resource
    pub fn insert(&self, resource: GraphResource) {
        self.resources.insert(resource.uri.clone(), resource);
    }

    pub fn get(&self, uri: &str) -> Option<GraphResource> {
        self.resources.get(uri).map(|r| r.clone())
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Links of a resource with target type and title filled in from the graph.
    fn resolved_links(&self, uri: &str) -> Result<Vec<Relation>, GraphError> {
        // Clone before resolving targets so no map guard is held across lookups
        let links = self
            .resources
            .get(uri)
            .map(|r| r.links.clone())
            .ok_or_else(|| GraphError::ResourceNotFound(uri.to_string()))?;

        Ok(links
            .into_iter()
            .map(|mut link| {
                if let Some(target) = self.resources.get(&link.href) {
                    if link.resource_type.is_none() {
                        link.resource_type = Some(target.resource_type.clone());
                    }
                    if link.title.is_none() {
                        link.title = target.title.clone();
                    }
                }
                link
            })
            .collect())
    }

    fn relation_name(&self, resource_type: &str) -> String {
        format!("{}{}", self.namespace, resource_type.to_lowercase())
    }
}

impl Default for MemoryGraph {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GraphClient for MemoryGraph {
    async fn traverse(&self, uri: &str) -> Result<Attributes, GraphError> {
        let resource = self
            .get(uri)
            .ok_or_else(|| GraphError::ResourceNotFound(uri.to_string()))?;

        let mut attributes = resource.attributes;
        if !resource.data.is_empty() {
            attributes.insert("data".to_string(), Value::Array(resource.data));
        }
        Ok(attributes)
    }

    async fn find_first(
        &self,
        start: &str,
        filter: &FindFilter,
    ) -> Result<Option<String>, GraphError> {
        if !self.resources.contains_key(start) {
            return Err(GraphError::ResourceNotFound(start.to_string()));
        }

        // BFS in link order
        let mut visited: HashSet<String> = HashSet::new();
        let mut frontier: VecDeque<String> = VecDeque::new();
        visited.insert(start.to_string());
        frontier.push_back(start.to_string());

        while let Some(uri) = frontier.pop_front() {
            let links = match self.resolved_links(&uri) {
                Ok(links) => links,
                // Dangling link: nothing to expand
                Err(_) => continue,
            };

            for link in links {
                if !visited.insert(link.href.clone()) {
                    continue;
                }
                if filter.matches(&link) && self.resources.contains_key(&link.href) {
                    return Ok(Some(link.href));
                }
                frontier.push_back(link.href);
            }
        }

        Ok(None)
    }

    async fn create_child_resource(
        &self,
        parent: &str,
        resource_type: &str,
        attributes: Attributes,
    ) -> Result<String, GraphError> {
        let parent_type = self
            .resources
            .get(parent)
            .map(|p| p.resource_type.clone())
            .ok_or_else(|| GraphError::ResourceNotFound(parent.to_string()))?;

        let uri = format!(
            "{}/{}s/{}",
            parent.trim_end_matches('/'),
            resource_type.to_lowercase(),
            Uuid::new_v4()
        );

        let mut child = GraphResource::new(uri.clone(), resource_type)
            .with_link(self.relation_name(&parent_type), parent);
        child.title = attributes
            .get("title")
            .and_then(Value::as_str)
            .map(str::to_string);
        child.attributes = attributes;
        self.insert(child);

        let rel = format!("{}s", self.relation_name(resource_type));
        if let Some(mut parent) = self.resources.get_mut(parent) {
            parent.links.push(Relation::new(rel, uri.clone()));
        }

        Ok(uri)
    }

    async fn attach_data(&self, uri: &str, payload: Value) -> Result<(), GraphError> {
        let mut resource = self
            .resources
            .get_mut(uri)
            .ok_or_else(|| GraphError::ResourceNotFound(uri.to_string()))?;
        resource.data.push(payload);
        Ok(())
    }

    async fn relations(&self, uri: &str) -> Result<Vec<Relation>, GraphError> {
        self.resolved_links(uri)
    }
}

#[async_trait]
impl Fetcher for MemoryGraph {
    async fn fetch(&self, uri: &str) -> Result<Attributes, FetchError> {
        self.get(uri)
            .map(|r| r.attributes)
            .ok_or_else(|| FetchError::Unavailable {
                uri: uri.to_string(),
                reason: "no such resource".to_string(),
            })
    }
}
