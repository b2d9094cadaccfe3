//! Resource fetch: resolve a URI to its attribute mapping

use crate::graph::Attributes;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

const USER_AGENT: &str = concat!("sensorchain/", env!("CARGO_PKG_VERSION"));

/// Fetch errors
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network or remote failure
    #[error("URI {uri} unresponsive: {reason}")]
    Unavailable { uri: String, reason: String },

    /// Remote answered with a non-success status
    #[error("URI {uri} returned status {status}")]
    Status { uri: String, status: u16 },

    /// Body was not a JSON object
    #[error("URI {0} did not return a JSON object")]
    NotAnObject(String),

    /// HTTP client could not be built
    #[error("HTTP client setup failed: {0}")]
    Client(String),
}

/// Resolves a resource URI into its attribute mapping.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, uri: &str) -> Result<Attributes, FetchError>;
}

/// HTTP GET fetcher expecting a JSON object body
pub struct HttpFetcher {
    http_client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Client(e.to_string()))?;

        Ok(Self { http_client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, uri: &str) -> Result<Attributes, FetchError> {
        tracing::debug!(uri = %uri, "Fetching resource");

        let response = self
            .http_client
            .get(uri)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| FetchError::Unavailable {
                uri: uri.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                uri: uri.to_string(),
                status: status.as_u16(),
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|_| FetchError::NotAnObject(uri.to_string()))?;

        tracing::info!(uri = %uri, "downloaded");
        into_attributes(uri, body)
    }
}

fn into_attributes(uri: &str, body: Value) -> Result<Attributes, FetchError> {
    match body {
        Value::Object(map) => Ok(map),
        _ => Err(FetchError::NotAnObject(uri.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn object_body_becomes_attributes() {
        let attrs = into_attributes("u", json!({"metric": "no2"})).unwrap();
        assert_eq!(attrs.get("metric"), Some(&json!("no2")));
    }

    #[test]
    fn non_object_body_is_rejected() {
        let err = into_attributes("u", json!([1, 2, 3])).unwrap_err();
        assert!(matches!(err, FetchError::NotAnObject(_)));
    }

    #[test]
    fn client_setup_error_names_no_uri() {
        let err = FetchError::Client("no TLS backend".into());
        assert_eq!(err.to_string(), "HTTP client setup failed: no TLS backend");
        assert!(HttpFetcher::new(Duration::from_secs(1)).is_ok());
    }

    #[tokio::test]
    async fn unreachable_host_is_unavailable() {
        let fetcher = HttpFetcher::new(Duration::from_secs(2)).unwrap();
        let err = fetcher
            .fetch("http://127.0.0.1:1/sensors/1")
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Unavailable { .. }));
    }
}
