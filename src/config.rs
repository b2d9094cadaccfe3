//! Runtime configuration
//!
//! Loaded from an optional YAML file. Every field has a default, so an
//! empty file (or no file) is a valid configuration.

use crate::crawler::CrawlCriteria;
use crate::graph::DEFAULT_NAMESPACE;
use crate::matching::SearchWindow;
use crate::service::DEFAULT_QUEUE_CAPACITY;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Store location; the platform data directory when unset
    pub db_path: Option<PathBuf>,
    pub queue_capacity: usize,
    /// Relation namespace a publish target must be reached through
    pub publish_namespace: String,
    /// Resource the crawler starts from
    pub entry_point: Option<String>,
    pub crawl: CrawlCriteria,
    pub search: SearchWindow,
    pub http_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: None,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            publish_namespace: DEFAULT_NAMESPACE.to_string(),
            entry_point: None,
            crawl: CrawlCriteria::default(),
            search: SearchWindow::default(),
            http_timeout_secs: 10,
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&text)
    }

    /// Load `path` if given, defaults otherwise
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        // An empty document parses as null, not as an empty mapping
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid("queue_capacity must be positive".into()));
        }
        self.search
            .validate()
            .map_err(|msg| ConfigError::Invalid(format!("search.{}", msg)))
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Configured store path, or `<data_dir>/sensorchain/sensorchain.db`
    pub fn resolved_db_path(&self) -> PathBuf {
        self.db_path.clone().unwrap_or_else(default_db_path)
    }
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sensorchain")
        .join("sensorchain.db")
}
