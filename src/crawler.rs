//! Graph crawler: discovers sensor resources and feeds their URIs to the
//! dispatch queue

use crate::graph::{Attributes, FindFilter, GraphClient, GraphError, Relation};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Which discovered resources are worth dispatching
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlCriteria {
    /// Target resource type, compared case-insensitively
    pub resource_type: Option<String>,
    /// Required prefix of the relation leading to the resource
    pub namespace: Option<String>,
    /// Attribute values the resource must carry
    pub attributes: Attributes,
}

impl Default for CrawlCriteria {
    fn default() -> Self {
        Self {
            resource_type: Some("Sensor".to_string()),
            namespace: None,
            attributes: Attributes::new(),
        }
    }
}

impl CrawlCriteria {
    /// Accept every resource
    pub fn any() -> Self {
        Self {
            resource_type: None,
            namespace: None,
            attributes: Attributes::new(),
        }
    }

    pub fn with_attribute(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    fn filter(&self) -> FindFilter {
        FindFilter {
            resource_type: self.resource_type.clone(),
            namespace: self.namespace.clone(),
            title: None,
        }
    }

    fn attributes_match(&self, attributes: &Attributes) -> bool {
        self.attributes
            .iter()
            .all(|(key, expected)| attributes.get(key) == Some(expected))
    }
}

/// Breadth-first crawler over a [`GraphClient`]
pub struct GraphCrawler {
    graph: Arc<dyn GraphClient>,
    entry_point: String,
    criteria: CrawlCriteria,
}

impl GraphCrawler {
    pub fn new(graph: Arc<dyn GraphClient>, entry_point: impl Into<String>) -> Self {
        Self {
            graph,
            entry_point: entry_point.into(),
            criteria: CrawlCriteria::default(),
        }
    }

    pub fn with_criteria(mut self, criteria: CrawlCriteria) -> Self {
        self.criteria = criteria;
        self
    }

    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    /// Walk the graph from the entry point, sending every matching URI once.
    ///
    /// Returns how many URIs were sent. Stops early if the receiver goes
    /// away. Only an unreadable entry point is an error.
    pub async fn crawl(&self, queue: mpsc::Sender<String>) -> Result<usize, GraphError> {
        let filter = self.criteria.filter();
        let mut sent = 0;

        let mut visited: HashSet<String> = HashSet::new();
        let mut frontier: VecDeque<String> = VecDeque::new();
        visited.insert(self.entry_point.clone());

        let mut links = self.graph.relations(&self.entry_point).await?;

        loop {
            for link in links {
                if !visited.insert(link.href.clone()) {
                    continue;
                }

                if self.accepts(&filter, &link).await {
                    tracing::debug!(uri = %link.href, "resource discovered");
                    if queue.send(link.href.clone()).await.is_err() {
                        tracing::info!(sent, "dispatch queue closed, crawl stopped");
                        return Ok(sent);
                    }
                    sent += 1;
                }
                frontier.push_back(link.href);
            }

            let Some(next) = frontier.pop_front() else {
                break;
            };
            links = match self.graph.relations(&next).await {
                Ok(links) => links,
                Err(e) => {
                    tracing::warn!(uri = %next, error = %e, "relations unavailable");
                    Vec::new()
                }
            };
        }

        tracing::info!(entry_point = %self.entry_point, sent, "crawl finished");
        Ok(sent)
    }

    async fn accepts(&self, filter: &FindFilter, link: &Relation) -> bool {
        if !filter.matches(link) {
            return false;
        }
        if self.criteria.attributes.is_empty() {
            return true;
        }

        match self.graph.traverse(&link.href).await {
            Ok(attributes) => self.criteria.attributes_match(&attributes),
            Err(e) => {
                tracing::warn!(uri = %link.href, error = %e, "resource unreadable");
                false
            }
        }
    }
}
