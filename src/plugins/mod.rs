//! Built-in sensor plugins

mod alphasense;

pub use alphasense::AlphasenseAfeTemp;

use crate::dispatch::{PluginRegistry, SensorPlugin};
use std::sync::Arc;

/// Registry holding every built-in plugin
pub fn builtin_registry() -> PluginRegistry {
    let plugins: Vec<Arc<dyn SensorPlugin>> = vec![Arc::new(AlphasenseAfeTemp)];
    PluginRegistry::new(plugins)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_resolve_by_sensor_type() {
        let registry = builtin_registry();
        assert_eq!(registry.names(), vec!["AlphasenseAFEtemp"]);
        assert!(registry.resolve("alphasenseafetemp").is_some());
    }
}
