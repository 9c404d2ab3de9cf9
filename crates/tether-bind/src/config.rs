//! Engine configuration

use crate::error::{BindError, BindResult};
use serde::{Deserialize, Serialize};
use tether_core::VmOptions;

/// Configuration for an [`Engine`](crate::Engine)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Runtime options (collector tuning, object limit)
    pub vm: VmOptions,

    /// Attach a call trace to runtime errors raised during protected calls
    pub tracebacks: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            vm: VmOptions::default(),
            tracebacks: true,
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by environment variables
    ///
    /// - `TETHER_GC_THRESHOLD`: live objects before the first collection
    /// - `TETHER_GC_PAUSE`: growth percent after a collection
    /// - `TETHER_MAX_OBJECTS`: heap object limit (0 = unlimited)
    /// - `TETHER_TRACEBACKS`: `0`/`false` disables tracebacks
    ///
    /// Unparseable values are ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(v) = env_usize("TETHER_GC_THRESHOLD") {
            config.vm.gc_threshold = v;
        }
        if let Some(v) = env_usize("TETHER_GC_PAUSE") {
            config.vm.gc_pause = v;
        }
        if let Some(v) = env_usize("TETHER_MAX_OBJECTS") {
            config.vm.max_objects = v;
        }
        if let Ok(v) = std::env::var("TETHER_TRACEBACKS") {
            config.tracebacks = !matches!(v.to_lowercase().as_str(), "0" | "false" | "off");
        }

        config
    }

    /// Parse a JSON document; missing fields take their defaults
    pub fn from_json(json: &str) -> BindResult<Self> {
        serde_json::from_str(json).map_err(|e| BindError::Config(e.to_string()))
    }

    /// Serialize to pretty JSON
    pub fn to_json(&self) -> BindResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| BindError::Config(e.to_string()))
    }

    /// Disable automatic collection; only explicit collections run
    pub fn manual_gc(mut self) -> Self {
        self.vm.gc_threshold = VmOptions::manual_gc().gc_threshold;
        self
    }
}

fn env_usize(name: &str) -> Option<usize> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert!(config.tracebacks);
        assert_eq!(config.vm, VmOptions::default());
    }

    #[test]
    fn test_from_json_partial() {
        let config = EngineConfig::from_json(r#"{"tracebacks": false, "vm": {"max_objects": 64}}"#).unwrap();
        assert!(!config.tracebacks);
        assert_eq!(config.vm.max_objects, 64);
        assert_eq!(config.vm.gc_pause, VmOptions::default().gc_pause);
    }

    #[test]
    fn test_from_json_invalid() {
        let err = EngineConfig::from_json("{ not json").unwrap_err();
        assert!(matches!(err, BindError::Config(_)));
    }

    #[test]
    fn test_json_round_trip() {
        let config = EngineConfig::default().manual_gc();
        let back = EngineConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(back, config);
        assert_eq!(back.vm.gc_threshold, usize::MAX);
    }
}
