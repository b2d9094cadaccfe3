//! GraphClient trait: the contract a linked-data backend implements

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Attribute mapping of a resource (a JSON object).
pub type Attributes = serde_json::Map<String, Value>;

/// Errors from graph operations
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("Graph unavailable: {0}")]
    Unavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// An outgoing link from one resource to another.
///
/// `resource_type` and `title` describe the target, as linked-data
/// representations usually embed them in the link itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    /// Full relation name, including namespace (e.g. `.../rels/device`)
    pub rel: String,
    /// URI of the target resource
    pub href: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl Relation {
    pub fn new(rel: impl Into<String>, href: impl Into<String>) -> Self {
        Self {
            rel: rel.into(),
            href: href.into(),
            resource_type: None,
            title: None,
        }
    }
}

/// Search criteria for [`GraphClient::find_first`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindFilter {
    /// Target resource type, compared case-insensitively
    pub resource_type: Option<String>,
    /// Required prefix of the relation used to reach the target
    pub namespace: Option<String>,
    /// Exact title of the target
    pub title: Option<String>,
}

impl FindFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_resource_type(mut self, resource_type: impl Into<String>) -> Self {
        self.resource_type = Some(resource_type.into());
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Check if the target of a relation satisfies every criterion
    pub fn matches(&self, relation: &Relation) -> bool {
        if let Some(ref expected) = self.resource_type {
            match relation.resource_type {
                Some(ref actual) if actual.eq_ignore_ascii_case(expected) => {}
                _ => return false,
            }
        }

        if let Some(ref namespace) = self.namespace {
            if !relation.rel.starts_with(namespace.as_str()) {
                return false;
            }
        }

        if let Some(ref expected) = self.title {
            if relation.title.as_deref() != Some(expected.as_str()) {
                return false;
            }
        }

        true
    }
}

/// The operations the pipeline needs from a linked-data graph.
#[async_trait]
pub trait GraphClient: Send + Sync {
    /// Resolve a resource into its full attribute set
    async fn traverse(&self, uri: &str) -> Result<Attributes, GraphError>;

    /// Search outward from `start` for the first resource matching `filter`.
    ///
    /// The start resource itself is never a candidate.
    async fn find_first(
        &self,
        start: &str,
        filter: &FindFilter,
    ) -> Result<Option<String>, GraphError>;

    /// Create a resource of `resource_type` under `parent`, returning its URI
    async fn create_child_resource(
        &self,
        parent: &str,
        resource_type: &str,
        attributes: Attributes,
    ) -> Result<String, GraphError>;

    /// Attach a data payload to an existing resource
    async fn attach_data(&self, uri: &str, payload: Value) -> Result<(), GraphError>;

    /// Outgoing relations of a resource (used by crawlers)
    async fn relations(&self, uri: &str) -> Result<Vec<Relation>, GraphError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    const NS: &str = "http://example.org/rels/";

    fn device_relation() -> Relation {
        Relation {
            rel: format!("{}device", NS),
            href: "http://example.org/devices/1".to_string(),
            resource_type: Some("Device".to_string()),
            title: Some("roof station".to_string()),
        }
    }

    #[test]
    fn empty_filter_matches_anything() {
        assert!(FindFilter::new().matches(&device_relation()));
        assert!(FindFilter::new().matches(&Relation::new("x", "y")));
    }

    #[test]
    fn resource_type_is_case_insensitive() {
        let filter = FindFilter::new().with_resource_type("device");
        assert!(filter.matches(&device_relation()));

        let filter = FindFilter::new().with_resource_type("sensor");
        assert!(!filter.matches(&device_relation()));
    }

    #[test]
    fn namespace_must_prefix_relation() {
        let filter = FindFilter::new().with_namespace(NS);
        assert!(filter.matches(&device_relation()));

        let filter = FindFilter::new().with_namespace("http://other.org/rels/");
        assert!(!filter.matches(&device_relation()));
    }

    #[test]
    fn title_requires_exact_match() {
        let filter = FindFilter::new().with_title("roof station");
        assert!(filter.matches(&device_relation()));

        let filter = FindFilter::new().with_title("Roof Station");
        assert!(!filter.matches(&device_relation()));

        // Untitled targets never satisfy a title filter
        let filter = FindFilter::new().with_title("roof station");
        assert!(!filter.matches(&Relation::new(format!("{}device", NS), "http://example.org/d")));
    }
}
