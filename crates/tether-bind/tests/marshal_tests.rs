//! Integration tests for value marshaling
//!
//! Tests validate:
//! - Round trips of scalars, strings, containers and tuples
//! - Order preservation for sequences and ordered maps
//! - Precise expected/actual type names on conversion failures
//! - Callables crossing in both directions
//!
//! # Running Tests
//! ```bash
//! cargo test -p tether-bind --test marshal_tests
//! ```

use indexmap::IndexMap;
use proptest::prelude::*;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt::Debug;
use tether_bind::core::{ByteStr, State, ValueType};
use tether_bind::marshal::{pull_top, push_single};
use tether_bind::{BindError, Callback, Engine, Pull, PullError, Push, ScriptFunction};

fn round_trip<T: Push + Pull + Clone + PartialEq + Debug>(state: &State, value: T) -> T {
    push_single(state, value).unwrap();
    let back = pull_top::<T>(state).unwrap();
    assert_eq!(state.top(), 0);
    back
}

fn pull_error<T: Pull + Debug>(state: &State) -> PullError {
    let err = T::pull(state, -1).unwrap_err();
    state.pop(1);
    err
}

// ===== Scalars =====

proptest! {
    #[test]
    fn prop_integers_round_trip(a in any::<i64>(), b in any::<i32>(), c in any::<u16>(), d in any::<u64>()) {
        let state = State::new();
        prop_assert_eq!(round_trip(&state, a), a);
        prop_assert_eq!(round_trip(&state, b), b);
        prop_assert_eq!(round_trip(&state, c), c);
        if d <= i64::MAX as u64 {
            prop_assert_eq!(round_trip(&state, d), d);
        } else {
            prop_assert!(push_single(&state, d).is_err());
            prop_assert_eq!(state.top(), 0);
        }
    }

    #[test]
    fn prop_floats_round_trip(x in any::<f64>().prop_filter("not NaN", |x| !x.is_nan())) {
        let state = State::new();
        prop_assert_eq!(round_trip(&state, x), x);
    }

    #[test]
    fn prop_strings_round_trip(s in "\\PC*", bytes in proptest::collection::vec(any::<u8>(), 0..64)) {
        let state = State::new();
        prop_assert_eq!(round_trip(&state, s.clone()), s);
        let raw = ByteStr::new(&bytes);
        let back = round_trip(&state, raw.clone());
        prop_assert_eq!(back.as_bytes(), raw.as_bytes());
    }

    #[test]
    fn prop_sequences_keep_order(items in proptest::collection::vec(any::<i32>(), 0..32)) {
        let state = State::new();
        prop_assert_eq!(round_trip(&state, items.clone()), items.clone());
        let deque: VecDeque<i32> = items.into_iter().collect();
        prop_assert_eq!(round_trip(&state, deque.clone()), deque);
    }

    #[test]
    fn prop_maps_keep_membership(map in proptest::collection::hash_map("[a-z]{1,8}", any::<i64>(), 0..16)) {
        let state = State::new();
        prop_assert_eq!(round_trip(&state, map.clone()), map.clone());
        let ordered: BTreeMap<String, i64> = map.into_iter().collect();
        prop_assert_eq!(round_trip(&state, ordered.clone()), ordered);
    }
}

#[test]
fn test_narrowing_checks_range() {
    let state = State::new();
    state.push_integer(300);
    let err = pull_error::<u8>(&state);
    assert_eq!(err.expected, "u8");
    assert_eq!(err.got, "out-of-range number");

    state.push_number(2.75);
    assert_eq!(i32::pull(&state, -1).unwrap(), 2);
    state.pop(1);
    assert_eq!(state.top(), 0);
}

#[test]
fn test_numeric_rejects_non_numbers() {
    let state = State::new();
    state.new_table().unwrap();
    let err = pull_error::<f64>(&state);
    assert_eq!(err.to_string(), "number expected, got table");

    state.push_string("x");
    let err = pull_error::<i32>(&state);
    assert_eq!(err.to_string(), "number expected, got string");

    state.push_nil();
    assert_eq!(i32::pull(&state, -1).unwrap(), 0);
    state.pop(1);
}

#[test]
fn test_strings_are_length_prefixed() {
    let state = State::new();
    let s = String::from("a\0b\0c");
    assert_eq!(round_trip(&state, s.clone()), s);
    "tail\0".push_value(&state).unwrap();
    assert_eq!(state.to_bytes(-1).unwrap().len(), 5);
    state.pop(1);
}

#[test]
fn test_bool_uses_truthiness() {
    let state = State::new();
    state.push_integer(0);
    assert!(bool::pull(&state, -1).unwrap());
    state.push_nil();
    assert!(!bool::pull(&state, -1).unwrap());
    state.pop(2);
}

// ===== Containers =====

#[test]
fn test_empty_container_is_table() {
    let state = State::new();
    Vec::<i32>::new().push_value(&state).unwrap();
    assert_eq!(state.type_of(-1), ValueType::Table);
    assert_eq!(state.raw_len(-1), 0);
    state.pop(1);

    HashMap::<String, i32>::new().push_value(&state).unwrap();
    assert_eq!(state.type_of(-1), ValueType::Table);
    state.pop(1);
}

#[test]
fn test_container_from_scalar_fails() {
    let state = State::new();
    state.push_integer(5);
    let err = pull_error::<Vec<i32>>(&state);
    assert_eq!(err.to_string(), "table expected, got number");
    assert_eq!(state.top(), 0);
}

#[test]
fn test_bad_element_reports_position() {
    let state = State::new();
    vec![1, 2, 3].push_value(&state).unwrap();
    state.push_string("oops");
    state.raw_set_i(-2, 2).unwrap();
    let err = pull_error::<Vec<i32>>(&state);
    assert_eq!(err.expected, "table of number");
    assert_eq!(err.got, "string at [2]");
    assert_eq!(state.top(), 0);
}

#[test]
fn test_sequence_with_nil_element_rejected() {
    let state = State::new();
    let err = push_single(&state, vec![Some(1), None, Some(3)]).unwrap_err();
    assert!(matches!(err, BindError::Conversion(_)));
    assert!(err.to_string().ends_with("got nil at [2]"));
    assert_eq!(state.top(), 0);

    let mut dense = vec![Some(1)];
    dense.push(Some(2));
    assert_eq!(round_trip(&state, dense.clone()), dense);
}

#[test]
fn test_sets_and_ordered_maps() {
    let state = State::new();
    let set: HashSet<String> = ["x", "y", "z"].iter().map(|s| s.to_string()).collect();
    assert_eq!(round_trip(&state, set.clone()), set);

    let tree: BTreeSet<i64> = [3, 1, 2].into_iter().collect();
    assert_eq!(round_trip(&state, tree.clone()), tree);

    let mut ordered = IndexMap::new();
    ordered.insert("zeta".to_string(), 1);
    ordered.insert("alpha".to_string(), 2);
    ordered.insert("mid".to_string(), 3);
    let back = round_trip(&state, ordered.clone());
    assert_eq!(back.keys().collect::<Vec<_>>(), ["zeta", "alpha", "mid"]);
}

#[test]
fn test_nested_containers() {
    let state = State::new();
    let mut nested: HashMap<String, Vec<Vec<u8>>> = HashMap::new();
    nested.insert("grid".into(), vec![vec![1, 2], vec![], vec![3]]);
    assert_eq!(round_trip(&state, nested.clone()), nested);
}

#[test]
fn test_tuples() {
    let state = State::new();
    let t = (1i32, "two".to_string(), 3.5f64, true);
    assert_eq!(round_trip(&state, t.clone()), t);

    let pairs = vec![(1u8, 'a'), (2u8, 'b')];
    assert_eq!(round_trip(&state, pairs.clone()), pairs);
}

// ===== Callables =====

#[test]
fn test_callback_captured_as_script_function() {
    let engine = Engine::new().unwrap();
    let state = engine.state();
    Callback::new("concat", |a: String, b: String| a + &b)
        .push_value(state)
        .unwrap();
    let f = ScriptFunction::pull(state, -1).unwrap();
    state.pop(1);

    let joined: String = f.call(("ab", "cd")).unwrap();
    assert_eq!(joined, "abcd");
    assert_eq!(engine.stack_size(), 0);
}

#[test]
fn test_script_function_nil_is_noop() {
    let engine = Engine::new().unwrap();
    let state = engine.state();
    state.push_nil();
    let f = ScriptFunction::pull(state, -1).unwrap();
    state.pop(1);
    assert!(f.is_empty());
    f.invoke((1, 2, 3)).unwrap();
    assert_eq!(engine.stack_size(), 0);
}

#[test]
fn test_script_function_expires_with_engine() {
    let f = {
        let engine = Engine::new().unwrap();
        let f = engine.create_function("one", || 1).unwrap();
        engine.close();
        f
    };
    let err = f.call::<_, i32>(()).unwrap_err();
    assert_eq!(err.name(), "RuntimeError");
    assert!(err.to_string().contains("expired"));
}

#[test]
fn test_native_takes_callback_argument() {
    let engine = Engine::new().unwrap();
    let apply_twice = engine
        .create_function("apply_twice", |f: ScriptFunction, x: i64| -> tether_bind::BindResult<i64> {
            let once: i64 = f.call((x,))?;
            f.call((once,))
        })
        .unwrap();
    let inc = engine.create_function("inc", |x: i64| x + 1).unwrap();
    let out: i64 = apply_twice.call((&inc, 5)).unwrap();
    assert_eq!(out, 7);
    assert_eq!(engine.stack_size(), 0);
}
