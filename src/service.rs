//! Pipeline wiring: crawler and dispatch loop as two tasks joined by a
//! bounded queue

use crate::crawler::GraphCrawler;
use crate::dispatch::{DispatchLoop, DispatchStats};
use crate::graph::GraphError;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Default capacity of the URI queue
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("crawl failed: {0}")]
    Crawl(#[from] GraphError),

    #[error("pipeline task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Summary of one pipeline run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineReport {
    /// URIs the crawler put on the queue
    pub discovered: usize,
    pub stats: DispatchStats,
}

/// Crawl and dispatch until the crawl is exhausted and the queue drained.
///
/// A zero capacity is raised to one.
pub async fn run_pipeline(
    crawler: GraphCrawler,
    dispatch: Arc<DispatchLoop>,
    capacity: usize,
) -> Result<PipelineReport, ServiceError> {
    let (tx, rx) = mpsc::channel::<String>(capacity.max(1));

    let consumer = tokio::spawn(async move { dispatch.run(rx).await });
    let producer = tokio::spawn(async move { crawler.crawl(tx).await });

    // The sender is dropped when the crawl task ends, closing the queue
    let crawled = producer.await?;
    let stats = consumer.await?;
    let discovered = crawled?;

    tracing::info!(
        discovered,
        published = stats.published,
        skipped = stats.skipped,
        "pipeline run complete"
    );
    Ok(PipelineReport { discovered, stats })
}
