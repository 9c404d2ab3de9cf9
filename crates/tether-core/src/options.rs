//! Runtime options

use crate::defaults::{DEFAULT_GC_PAUSE, DEFAULT_GC_THRESHOLD, DEFAULT_MAX_OBJECTS};
use serde::{Deserialize, Serialize};

/// Configuration for a [`State`](crate::State).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VmOptions {
    /// Live object count that triggers the first automatic collection
    pub gc_threshold: usize,

    /// Growth factor (percent) applied to the survivor count after a collection
    pub gc_pause: usize,

    /// Hard limit on live heap objects (0 = unlimited)
    pub max_objects: usize,
}

impl Default for VmOptions {
    fn default() -> Self {
        Self {
            gc_threshold: DEFAULT_GC_THRESHOLD,
            gc_pause: DEFAULT_GC_PAUSE,
            max_objects: DEFAULT_MAX_OBJECTS,
        }
    }
}

impl VmOptions {
    /// Options with automatic collection effectively disabled.
    ///
    /// Collections still happen on [`State::collect_garbage`](crate::State::collect_garbage).
    pub fn manual_gc() -> Self {
        Self {
            gc_threshold: usize::MAX,
            ..Self::default()
        }
    }

    /// Next collection threshold for a heap with `survivors` live objects.
    pub fn next_threshold(&self, survivors: usize) -> usize {
        if self.gc_threshold == usize::MAX {
            return usize::MAX;
        }
        let grown = survivors.saturating_mul(self.gc_pause.max(100)) / 100;
        grown.max(self.gc_threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let opts = VmOptions::default();
        assert_eq!(opts.gc_threshold, DEFAULT_GC_THRESHOLD);
        assert_eq!(opts.gc_pause, DEFAULT_GC_PAUSE);
        assert_eq!(opts.max_objects, 0);
    }

    #[test]
    fn test_next_threshold_grows_with_survivors() {
        let opts = VmOptions {
            gc_threshold: 10,
            gc_pause: 200,
            max_objects: 0,
        };
        assert_eq!(opts.next_threshold(0), 10);
        assert_eq!(opts.next_threshold(100), 200);
    }

    #[test]
    fn test_manual_gc_never_triggers() {
        assert_eq!(VmOptions::manual_gc().next_threshold(1_000_000), usize::MAX);
    }

    #[test]
    fn test_options_deserialize_partial() {
        let opts: VmOptions = serde_json::from_str(r#"{"max_objects": 64}"#).unwrap();
        assert_eq!(opts.max_objects, 64);
        assert_eq!(opts.gc_threshold, DEFAULT_GC_THRESHOLD);
    }
}
