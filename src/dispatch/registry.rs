//! Plugin registry: sensor type → plugin
//!
//! Populated once at startup. Names are matched case-insensitively.

use super::plugin::SensorPlugin;
use std::collections::HashMap;
use std::sync::Arc;

/// Explicit mapping from lower-cased plugin name to implementation.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: HashMap<String, Arc<dyn SensorPlugin>>,
}

impl PluginRegistry {
    /// Create a registry with the given plugins. On duplicate names the
    /// first registration wins.
    pub fn new(plugins: Vec<Arc<dyn SensorPlugin>>) -> Self {
        let mut registry = Self::empty();
        for plugin in plugins {
            registry.register(plugin);
        }
        registry
    }

    pub fn empty() -> Self {
        Self {
            plugins: HashMap::new(),
        }
    }

    /// Register a plugin. Returns false if the name was already taken.
    pub fn register(&mut self, plugin: Arc<dyn SensorPlugin>) -> bool {
        let key = plugin.name().to_lowercase();
        if self.plugins.contains_key(&key) {
            tracing::warn!(plugin = %plugin.name(), "duplicate plugin name ignored");
            return false;
        }
        self.plugins.insert(key, plugin);
        true
    }

    /// Find the plugin for a sensor type
    pub fn resolve(&self, sensor_type: &str) -> Option<&Arc<dyn SensorPlugin>> {
        self.plugins.get(&sensor_type.to_lowercase())
    }

    /// Registered plugin names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.plugins.values().map(|p| p.name()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugins", &self.names())
            .finish()
    }
}
