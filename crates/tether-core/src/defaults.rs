//! Default constants for runtime configuration.
//!
//! Centralizes the numbers shared by `options.rs`, the collector and the
//! state implementation.

/// Default number of live heap objects that triggers the first collection.
pub const DEFAULT_GC_THRESHOLD: usize = 4096;

/// Default collection pause, in percent of the surviving object count.
///
/// With 200 the next collection starts once the heap has doubled.
pub const DEFAULT_GC_PAUSE: usize = 200;

/// Default object limit (0 = unlimited).
pub const DEFAULT_MAX_OBJECTS: usize = 0;

/// Maximum number of value slots on the evaluation stack.
pub const MAX_STACK_SLOTS: usize = 1024 * 1024;

/// Maximum length of an `__index` / `__newindex` delegation chain.
pub const MAX_META_CHAIN: usize = 100;

/// Registry reference value returned for `nil`.
pub const REF_NIL: i64 = -1;

/// Registry reference value that never refers to anything.
pub const NO_REF: i64 = -2;
