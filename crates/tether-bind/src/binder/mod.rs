//! Function binding
//!
//! Turns native functions of any supported signature into runtime-callable
//! natives with one uniform convention:
//!
//! 1. pull every declared parameter by position, failing with a positional
//!    [`BindError::ArgumentType`] before native code runs
//! 2. call the native function
//! 3. push the result (nothing for `()`)
//!
//! Signature introspection happens once, when [`IntoFunction::into_function`]
//! builds the adapter. [`into_native`] is the only place native failures
//! (returned errors and panics) cross into the runtime.

mod frame;
mod method;

pub use frame::Frame;
pub use method::{InstanceReceiver, IntoMethod, Receiver};

use crate::error::{raise, BindError, BindResult, ErrorObject, VmResultExt};
use crate::marshal::{Pull, Push};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use tether_core::{NativeFn, State, Status, Value, ValueType, VmResult};
use tracing::{trace, warn};

/// Registry field holding the traceback message handler
pub(crate) const TRACEBACK_HANDLER: &str = "tether.traceback";

/// Uniform adapter: receives the state and the registered name, returns the result count
pub type Adapter = Rc<dyn Fn(&State, &str) -> BindResult<usize>>;

/// How a bound function receives its arguments
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    /// Free or static function, arguments start at slot 1
    Free,
    /// Method with a receiver resolved before the arguments
    Member,
    /// Frame-level function that reads the stack itself
    Raw,
}

/// A native function adapted to the runtime calling convention
#[derive(Clone)]
pub struct BoundFunction {
    kind: BindingKind,
    arity: Option<usize>,
    adapter: Adapter,
}

impl BoundFunction {
    pub(crate) fn new(kind: BindingKind, arity: Option<usize>, adapter: Adapter) -> Self {
        Self {
            kind,
            arity,
            adapter,
        }
    }

    /// Bind a frame-level function
    pub fn raw<F>(f: F) -> Self
    where
        F: Fn(&Frame<'_>) -> BindResult<usize> + 'static,
    {
        Self::new(
            BindingKind::Raw,
            None,
            Rc::new(move |state: &State, name: &str| f(&Frame::new(state, name))),
        )
    }

    /// Binding kind
    pub fn kind(&self) -> BindingKind {
        self.kind
    }

    /// Number of declared parameters, `None` for raw functions
    pub fn arity(&self) -> Option<usize> {
        self.arity
    }

    /// Run the adapter against the current frame
    pub fn invoke(&self, state: &State, name: &str) -> BindResult<usize> {
        (self.adapter)(state, name)
    }
}

impl fmt::Debug for BoundFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundFunction")
            .field("kind", &self.kind)
            .field("arity", &self.arity)
            .finish_non_exhaustive()
    }
}

/// Native functions that can be bound
///
/// Implemented for closures and function items of up to eight parameters
/// whose parameters implement [`Pull`] and whose result implements [`Push`].
/// `Marker` only disambiguates the impls.
pub trait IntoFunction<Marker>: 'static {
    /// Build the adapter
    fn into_function(self) -> BoundFunction;
}

/// Pull the parameter at `*slot` and advance past the slots it consumes
///
/// `offset` is subtracted from the slot when reporting the position, so a
/// receiver in slot 1 does not count as an argument.
pub(crate) fn pull_arg<T: Pull>(
    state: &State,
    slot: &mut i32,
    name: &str,
    offset: i32,
) -> BindResult<T> {
    let index = *slot;
    *slot += T::SLOTS as i32;
    T::pull(state, index).map_err(|e| BindError::ArgumentType {
        function: name.to_string(),
        position: (index - offset).max(0) as usize,
        expected: e.expected.into_owned(),
        got: e.got.into_owned(),
    })
}

macro_rules! impl_into_function {
    ($($arg:ident),*) => {
        #[allow(non_snake_case, unused_mut, unused_variables)]
        impl<Func, Ret, $($arg,)*> IntoFunction<(Ret, $($arg,)*)> for Func
        where
            Func: Fn($($arg),*) -> Ret + 'static,
            Ret: Push,
            $($arg: Pull,)*
        {
            fn into_function(self) -> BoundFunction {
                let arity = 0 $(+ <$arg as Pull>::SLOTS)*;
                BoundFunction::new(
                    BindingKind::Free,
                    Some(arity),
                    Rc::new(move |state: &State, name: &str| {
                        let mut slot = 1;
                        $(let $arg = pull_arg::<$arg>(state, &mut slot, name, 0)?;)*
                        (self)($($arg),*).push_value(state)
                    }),
                )
            }
        }
    };
}

impl_into_function!();
impl_into_function!(A1);
impl_into_function!(A1, A2);
impl_into_function!(A1, A2, A3);
impl_into_function!(A1, A2, A3, A4);
impl_into_function!(A1, A2, A3, A4, A5);
impl_into_function!(A1, A2, A3, A4, A5, A6);
impl_into_function!(A1, A2, A3, A4, A5, A6, A7);
impl_into_function!(A1, A2, A3, A4, A5, A6, A7, A8);

// ============================================================================
// Crossing point
// ============================================================================

/// Wrap a bound function as a runtime native
///
/// Errors and panics raised by the adapter become runtime errors here. A
/// [`BindError::Native`] error or a panic is reported as a runtime error
/// naming the function, with the call trace at the failure point. The frame
/// is cleared before the error is raised.
pub fn into_native(function: BoundFunction, name: Rc<str>) -> NativeFn {
    Rc::new(move |state: &State| -> VmResult<usize> {
        trace!(event = "native_call", function = %name, args = state.top());
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| function.invoke(state, &name)));
        let err = match outcome {
            Ok(Ok(n)) => return Ok(n),
            Ok(Err(BindError::Native { message })) => {
                warn!(event = "native_error", function = %name, message = %message);
                BindError::Runtime {
                    message: format!("error in native function '{}': {}", name, message),
                    traceback: Some(state.traceback(None, 0)),
                }
            }
            Ok(Err(e)) => e,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                warn!(event = "native_panic", function = %name, message = %message);
                BindError::Runtime {
                    message: format!("native function '{}' panicked: {}", name, message),
                    traceback: Some(state.traceback(None, 0)),
                }
            }
        };
        state.set_top(0);
        Err(raise(state, err))
    })
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}

/// Push a bound function as a named runtime function
pub(crate) fn push_bound(state: &State, function: BoundFunction, name: &str) -> BindResult<()> {
    let name: Rc<str> = Rc::from(name);
    state
        .push_native(into_native(function, name.clone()), Some(&name), 0)
        .into_bind(state)
}

// ============================================================================
// Protected calls
// ============================================================================

/// Message handler attaching a call trace to runtime errors
///
/// Typed errors other than runtime errors pass through untouched.
pub(crate) fn traceback_handler(state: &State) -> VmResult<usize> {
    let value = state.value_at(1);
    let typed = match &value {
        Value::String(_) | Value::Integer(_) | Value::Number(_) => true,
        Value::Userdata(_) => state
            .to_userdata(1)
            .map_or(false, |p| p.downcast_ref::<ErrorObject>().is_some()),
        _ => false,
    };
    if typed {
        if let BindError::Runtime {
            message,
            traceback: None,
        } = BindError::from_value(state, &value)
        {
            let err = BindError::Runtime {
                message,
                traceback: Some(state.traceback(None, 1)),
            };
            state.new_userdata(Rc::new(ErrorObject(err)))?;
            return Ok(1);
        }
    }
    state.push_value(value);
    Ok(1)
}

/// Call the function below the top `nargs` values in protected mode
///
/// On success the results replace the function and its arguments. On
/// failure the stack is restored below the function and the typed error
/// is returned.
pub(crate) fn protected_call(state: &State, nargs: usize, nresults: Option<usize>) -> BindResult<()> {
    let func_index = state.top() - nargs as i32;
    let handler = match state.get_registry_field(TRACEBACK_HANDLER) {
        ValueType::Function => {
            state.insert(func_index);
            func_index
        }
        _ => {
            state.pop(1);
            0
        }
    };
    let status = state.pcall(nargs, nresults, handler);
    let outcome = if status == Status::Ok {
        Ok(())
    } else {
        Err(BindError::from_status(state, status))
    };
    if handler != 0 {
        state.remove(handler);
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call_bound(state: &State, f: BoundFunction, name: &str, args: &[Value]) -> BindResult<Vec<Value>> {
        push_bound(state, f, name)?;
        for a in args {
            state.push_value(a.clone());
        }
        let base = state.top() - args.len() as i32 - 1;
        protected_call(state, args.len(), None)?;
        let results = ((base + 1)..=state.top()).map(|i| state.value_at(i)).collect();
        state.set_top(base);
        Ok(results)
    }

    #[test]
    fn test_bind_two_args() {
        let state = State::new();
        let f = (|a: i32, b: i32| a + b).into_function();
        assert_eq!(f.arity(), Some(2));
        assert_eq!(f.kind(), BindingKind::Free);
        let out = call_bound(&state, f, "add", &[Value::Integer(3), Value::Integer(4)]).unwrap();
        assert_eq!(out, vec![Value::Integer(7)]);
        assert_eq!(state.top(), 0);
    }

    #[test]
    fn test_void_pushes_nothing() {
        let state = State::new();
        let f = (|_: i32| {}).into_function();
        let out = call_bound(&state, f, "noop", &[Value::Integer(1)]).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_argument_error_position() {
        let state = State::new();
        let f = (|a: f64, b: f64| a + b).into_function();
        let err = call_bound(&state, f, "add", &[Value::Integer(4), Value::from("x")]).unwrap_err();
        match err {
            BindError::ArgumentType { position, function, .. } => {
                assert_eq!(position, 2);
                assert_eq!(function, "add");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(state.top(), 0);
    }

    #[test]
    fn test_panic_becomes_runtime_error() {
        let state = State::new();
        let f = (|| -> i32 { panic!("kaboom") }).into_function();
        let err = call_bound(&state, f, "explode", &[]).unwrap_err();
        match err {
            BindError::Runtime { message, .. } => assert!(message.contains("kaboom")),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(state.call_depth(), 0);
    }

    #[test]
    fn test_native_error_names_function() {
        let state = State::new();
        let f = (|| -> Result<i32, String> { Err("no luck".into()) }).into_function();
        let err = call_bound(&state, f, "try_it", &[]).unwrap_err();
        assert!(err.to_string().contains("try_it"));
        assert!(err.to_string().contains("no luck"));
        assert_eq!(err.name(), "RuntimeError");
    }

    #[test]
    fn test_traceback_attached() {
        let state = State::new();
        state.push_function(TRACEBACK_HANDLER, traceback_handler).unwrap();
        state.set_registry_field(TRACEBACK_HANDLER).unwrap();
        let f = BoundFunction::raw(|frame| Err(BindError::runtime(format!("{} failed", frame.name()))));
        let err = call_bound(&state, f, "inner", &[]).unwrap_err();
        let tb = err.traceback().expect("traceback");
        assert!(tb.contains("in function 'inner'"));
        assert_eq!(state.top(), 0);
    }

    #[test]
    fn test_panic_message_fallback() {
        assert_eq!(panic_message(&42u8), "Unknown panic");
        assert_eq!(panic_message(&"text"), "text");
    }
}
