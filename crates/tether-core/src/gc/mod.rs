//! Garbage collection
//!
//! A non-moving mark-sweep collector over a generational slot arena:
//! - [`Heap`] owns every table, function and userdata
//! - [`RootSet`] gathers the values the collector must keep alive
//! - [`collector`] implements marking, weak tables, finalizer scheduling and sweeping

pub mod collector;
pub mod heap;
pub mod roots;

pub use collector::{Collection, GcStats};
pub use heap::{GcObject, GcRef, Heap};
pub use roots::RootSet;
