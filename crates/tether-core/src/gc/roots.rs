//! Root set management
//!
//! Roots are the values that are always considered reachable: the registry,
//! the globals table, every stack slot, the functions of active frames,
//! installed message handlers and userdata waiting for their finalizer.

use super::heap::GcRef;
use crate::value::Value;

/// Root set for garbage collection
#[derive(Debug, Default)]
pub struct RootSet {
    refs: Vec<GcRef>,
}

impl RootSet {
    /// Create an empty root set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a value; non-collectable values are ignored
    pub fn add_value(&mut self, value: &Value) {
        if let Some(r) = value.as_gc() {
            self.refs.push(r);
        }
    }

    /// Add every value from an iterator
    pub fn add_values<'a>(&mut self, values: impl IntoIterator<Item = &'a Value>) {
        for v in values {
            self.add_value(v);
        }
    }

    /// Add a heap reference
    pub fn add_ref(&mut self, r: GcRef) {
        self.refs.push(r);
    }

    /// Number of root references
    pub fn len(&self) -> usize {
        self.refs.len()
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }

    /// Root references
    pub fn refs(&self) -> &[GcRef] {
        &self.refs
    }
}
