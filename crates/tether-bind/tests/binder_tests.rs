//! Integration tests for function binding
//!
//! Tests validate:
//! - Positional argument errors raised before native code runs
//! - Translation of native errors and panics into runtime errors
//! - Stack depth restored after every failed call
//! - Raw frame functions, multiple results and re-entrant calls
//!
//! # Running Tests
//! ```bash
//! cargo test -p tether-bind --test binder_tests
//! ```

use std::cell::Cell;
use std::rc::Rc;
use tether_bind::{BindError, BindResult, Engine, Frame, Registry, ScriptFunction};

fn engine_with(registry: &Registry) -> Engine {
    let engine = Engine::new().unwrap();
    engine.apply(registry).unwrap();
    engine
}

// ===== Argument marshaling =====

#[test]
fn test_add_scenario() {
    let mut registry = Registry::new();
    registry.declare_global("add", |a: f64, b: f64| a + b).unwrap();
    let engine = engine_with(&registry);

    let sum: f64 = engine.call("add", (3, 4)).unwrap();
    assert_eq!(sum, 7.0);

    let err = engine.call::<_, f64>("add", ("x", 4)).unwrap_err();
    match &err {
        BindError::ArgumentType {
            function,
            position,
            expected,
            got,
        } => {
            assert_eq!(function, "add");
            assert_eq!(*position, 1);
            assert_eq!(expected, "number");
            assert_eq!(got, "string");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(err.name(), "ArgumentTypeError");
    assert_eq!(
        err.to_string(),
        "bad argument #1 to 'add' (number expected, got string)"
    );
    assert_eq!(engine.stack_size(), 0);
}

#[test]
fn test_native_not_called_on_bad_argument() {
    let calls = Rc::new(Cell::new(0));
    let seen = calls.clone();
    let mut registry = Registry::new();
    registry
        .declare_global("touch", move |_n: i32, _s: Vec<String>| seen.set(seen.get() + 1))
        .unwrap();
    let engine = engine_with(&registry);

    let err = engine.call::<_, ()>("touch", (1, 2)).unwrap_err();
    assert!(matches!(err, BindError::ArgumentType { position: 2, .. }));
    assert_eq!(calls.get(), 0);

    engine.call::<_, ()>("touch", (1, vec!["a"])).unwrap();
    assert_eq!(calls.get(), 1);
}

#[test]
fn test_missing_arguments_read_as_nil() {
    let mut registry = Registry::new();
    registry
        .declare_global("greet", |name: Option<String>| match name {
            Some(n) => format!("hello {n}"),
            None => "hello".to_string(),
        })
        .unwrap();
    let engine = engine_with(&registry);
    assert_eq!(engine.call::<_, String>("greet", ()).unwrap(), "hello");
    assert_eq!(engine.call::<_, String>("greet", ("bo",)).unwrap(), "hello bo");
}

#[test]
fn test_void_returns_nothing() {
    let mut registry = Registry::new();
    registry.declare_global("noop", || ()).unwrap();
    let engine = engine_with(&registry);
    let results: Vec<i32> = engine.call_multi("noop", ()).unwrap();
    assert!(results.is_empty());
}

// ===== Failure translation =====

#[test]
fn test_native_error_becomes_runtime_error() {
    let mut registry = Registry::new();
    registry
        .declare_global("parse", |s: String| s.parse::<i32>().map_err(|e| e.to_string()))
        .unwrap();
    let engine = engine_with(&registry);

    assert_eq!(engine.call::<_, i32>("parse", ("12",)).unwrap(), 12);
    let err = engine.call::<_, i32>("parse", ("twelve",)).unwrap_err();
    assert_eq!(err.name(), "RuntimeError");
    assert!(err.to_string().contains("parse"));
    assert!(err.to_string().contains("invalid digit"));
    assert!(err.traceback().unwrap().contains("in function 'parse'"));
    assert_eq!(engine.stack_size(), 0);
}

#[test]
fn test_panic_is_caught_at_boundary() {
    let mut registry = Registry::new();
    registry
        .declare_global("explode", |n: i32| -> i32 {
            if n > 0 {
                panic!("too big: {}", n);
            }
            n
        })
        .unwrap();
    let engine = engine_with(&registry);

    let err = engine.call::<_, i32>("explode", (3,)).unwrap_err();
    assert_eq!(err.name(), "RuntimeError");
    assert!(err.to_string().contains("too big: 3"));
    assert!(err.to_string().contains("explode"));
    assert_eq!(engine.stack_size(), 0);

    assert_eq!(engine.call::<_, i32>("explode", (0,)).unwrap(), 0);
}

#[test]
fn test_typed_errors_survive_nesting() {
    let mut registry = Registry::new();
    registry.declare_global("inner", |n: i32| n).unwrap();
    registry
        .declare_global("outer", |f: ScriptFunction| -> BindResult<i32> { f.call(("abc",)) })
        .unwrap();
    let engine = engine_with(&registry);

    let inner: ScriptFunction = engine.get("inner").unwrap();
    let err = engine.call::<_, i32>("outer", (&inner,)).unwrap_err();
    assert!(matches!(
        err,
        BindError::ArgumentType { ref function, position: 1, .. } if function == "inner"
    ));
    assert_eq!(engine.stack_size(), 0);
}

// ===== Raw functions and multiple results =====

#[test]
fn test_raw_function_variadic() {
    let mut registry = Registry::new();
    registry
        .declare_global_raw("sum", |frame: &Frame<'_>| {
            let mut total = 0i64;
            for i in 1..=frame.arg_count() {
                total += frame.arg::<i64>(i)?;
            }
            frame.push(total)
        })
        .unwrap();
    let engine = engine_with(&registry);

    assert_eq!(engine.call::<_, i64>("sum", ()).unwrap(), 0);
    assert_eq!(engine.call::<_, i64>("sum", (1, 2, 3, 4)).unwrap(), 10);
    let err = engine.call::<_, i64>("sum", (1, "x")).unwrap_err();
    assert_eq!(err.to_string(), "bad argument #2 to 'sum' (number expected, got string)");
    assert_eq!(engine.stack_size(), 0);
}

#[test]
fn test_raw_function_multiple_results() {
    let mut registry = Registry::new();
    registry
        .declare_global_raw("divmod", |frame| {
            let a: i64 = frame.arg(1)?;
            let b: i64 = frame.arg(2)?;
            if b == 0 {
                return Err(frame.arg_error(2, "non-zero number"));
            }
            frame.push(a / b)?;
            frame.push(a % b)?;
            Ok(2)
        })
        .unwrap();
    let engine = engine_with(&registry);

    let (q, r): (i64, i64) = engine.call_multi("divmod", (17, 5)).unwrap();
    assert_eq!((q, r), (3, 2));
    let err = engine.call_multi::<_, (i64, i64)>("divmod", (1, 0)).unwrap_err();
    assert!(matches!(err, BindError::ArgumentType { position: 2, .. }));
    assert_eq!(engine.stack_size(), 0);
}

// ===== Re-entrancy =====

#[test]
fn test_reentrant_callbacks() {
    let mut registry = Registry::new();
    registry
        .declare_global("fold", |items: Vec<i64>, f: ScriptFunction| -> BindResult<i64> {
            let mut acc = 0;
            for item in items {
                acc = f.call((acc, item))?;
            }
            Ok(acc)
        })
        .unwrap();
    registry.declare_global("plus", |a: i64, b: i64| a + b).unwrap();
    let engine = engine_with(&registry);

    let plus: ScriptFunction = engine.get("plus").unwrap();
    let total: i64 = engine.call("fold", (vec![1, 2, 3, 4, 5], &plus)).unwrap();
    assert_eq!(total, 15);
    assert_eq!(engine.stack_size(), 0);
}

#[test]
fn test_engine_parameter_takes_no_slot() {
    let mut registry = Registry::new();
    registry
        .declare_global("closed", |engine: Engine, n: i32| (engine.is_closed(), n))
        .unwrap();
    let engine = engine_with(&registry);
    let (closed, n): (bool, i32) = engine.call("closed", (9,)).unwrap();
    assert!(!closed);
    assert_eq!(n, 9);
}
