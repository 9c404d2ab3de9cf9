//! Integration tests for the collector
//!
//! Tests validate:
//! - Weak-valued tables forgetting unreachable entries
//! - Finalizers running exactly once, at safe points
//! - Native payloads dropped when their userdata is swept
//!
//! # Running Tests
//! ```bash
//! cargo test -p tether-core --test gc_tests
//! ```

use std::cell::Cell;
use std::rc::Rc;
use tether_core::{State, VmOptions};

struct DropFlag(Rc<Cell<bool>>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.set(true);
    }
}

fn weak_table(state: &State, mode: &str) {
    state.new_table().unwrap();
    state.new_table().unwrap();
    state.push_string(mode);
    state.set_field(-2, "__mode").unwrap();
    state.set_metatable(-2).unwrap();
}

#[test]
fn test_weak_values_forget_unreachable_userdata() {
    let state = State::with_options(VmOptions::manual_gc());
    weak_table(&state, "v");
    state.new_userdata(Rc::new(1u8)).unwrap();
    state.set_field(1, "entry").unwrap();

    state.collect_garbage();
    state.get_field(1, "entry").unwrap();
    assert!(state.is_nil(-1));
}

#[test]
fn test_weak_values_keep_reachable_userdata() {
    let state = State::with_options(VmOptions::manual_gc());
    weak_table(&state, "v");
    state.new_userdata(Rc::new(1u8)).unwrap();
    state.push_copy(-1);
    state.set_field(1, "entry").unwrap();

    state.collect_garbage();
    state.get_field(1, "entry").unwrap();
    assert!(state.raw_equal(-1, 2));
}

#[test]
fn test_payload_dropped_after_sweep() {
    let state = State::with_options(VmOptions::manual_gc());
    let dropped = Rc::new(Cell::new(false));
    state
        .new_userdata(Rc::new(DropFlag(dropped.clone())))
        .unwrap();
    state.collect_garbage();
    assert!(!dropped.get());

    state.set_top(0);
    state.collect_garbage();
    assert!(dropped.get());
}

#[test]
fn test_finalizer_sees_object_before_weak_entry_returns() {
    let state = State::with_options(VmOptions::manual_gc());
    let finalized = Rc::new(Cell::new(0));
    let counter = finalized.clone();

    weak_table(&state, "v");
    state.new_userdata(Rc::new(())).unwrap();
    state.new_table().unwrap();
    state
        .push_function("__gc", move |s| {
            assert!(s.is_userdata(1));
            counter.set(counter.get() + 1);
            Ok(0)
        })
        .unwrap();
    state.set_field(-2, "__gc").unwrap();
    state.set_metatable(-2).unwrap();
    state.set_field(1, "obj").unwrap();

    state.collect_garbage();
    assert_eq!(finalized.get(), 1);
    state.get_field(1, "obj").unwrap();
    assert!(state.is_nil(-1));
    state.pop(1);

    state.collect_garbage();
    assert_eq!(finalized.get(), 1);
}

#[test]
fn test_automatic_collection_threshold() {
    let state = State::with_options(VmOptions {
        gc_threshold: 16,
        gc_pause: 200,
        max_objects: 0,
    });
    for _ in 0..200 {
        state.new_table().unwrap();
        state.pop(1);
    }
    let stats = state.gc_stats();
    assert!(stats.collections > 0);
    assert!(stats.live_objects < 64);
}

#[test]
fn test_finalizer_error_is_contained() {
    let state = State::with_options(VmOptions::manual_gc());
    state.new_userdata(Rc::new(())).unwrap();
    state.new_table().unwrap();
    state
        .push_function("__gc", |_| Err(tether_core::VmError::runtime("finalizer failed")))
        .unwrap();
    state.set_field(-2, "__gc").unwrap();
    state.set_metatable(-2).unwrap();
    state.set_top(0);

    state.collect_garbage();
    assert_eq!(state.top(), 0);
}
