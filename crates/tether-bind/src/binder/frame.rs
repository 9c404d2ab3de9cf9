//! Call frame handed to raw functions

use super::pull_arg;
use crate::engine::Engine;
use crate::error::{BindError, BindResult};
use crate::marshal::{Pull, Push};
use tether_core::{State, Value};

/// The arguments of a raw function call
///
/// Arguments occupy slots `1..=arg_count()`. Values pushed through
/// [`push`](Frame::push) land above them; the function returns how many of
/// the topmost values are its results.
pub struct Frame<'a> {
    state: &'a State,
    name: &'a str,
}

impl<'a> Frame<'a> {
    pub(crate) fn new(state: &'a State, name: &'a str) -> Self {
        Self { state, name }
    }

    /// Underlying state
    pub fn state(&self) -> &'a State {
        self.state
    }

    /// Registered name of the running function
    pub fn name(&self) -> &'a str {
        self.name
    }

    /// Number of arguments passed by the caller
    pub fn arg_count(&self) -> usize {
        self.state.top().max(0) as usize
    }

    /// Typed argument `n` (1-based)
    pub fn arg<T: Pull>(&self, n: usize) -> BindResult<T> {
        let mut slot = n as i32;
        pull_arg(self.state, &mut slot, self.name, 0)
    }

    /// Raw argument `n` (1-based); `nil` past the last argument
    pub fn value(&self, n: usize) -> Value {
        self.state.value_at(n as i32)
    }

    /// Push a result, returning the number of slots produced
    pub fn push<T: Push>(&self, value: T) -> BindResult<usize> {
        value.push_value(self.state)
    }

    /// Engine attached to this state
    pub fn engine(&self) -> BindResult<Engine> {
        Engine::from_state(self.state)
    }

    /// Fail with a positional argument error
    pub fn arg_error(&self, n: usize, expected: &str) -> BindError {
        BindError::ArgumentType {
            function: self.name.to_string(),
            position: n,
            expected: expected.to_string(),
            got: self.state.type_name(n as i32).to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_args() {
        let state = State::new();
        state.push_integer(2);
        state.push_string("x");
        let frame = Frame::new(&state, "f");
        assert_eq!(frame.arg_count(), 2);
        assert_eq!(frame.arg::<i32>(1).unwrap(), 2);
        assert_eq!(frame.value(2), Value::from("x"));
        assert!(frame.value(3).is_nil());
        match frame.arg::<i32>(2).unwrap_err() {
            BindError::ArgumentType { position, .. } => assert_eq!(position, 2),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_frame_push() {
        let state = State::new();
        let frame = Frame::new(&state, "f");
        assert_eq!(frame.push((1, 2)).unwrap(), 1);
        assert_eq!(frame.push(()).unwrap(), 0);
        assert_eq!(state.top(), 1);
    }

    #[test]
    fn test_arg_error_names_actual_type() {
        let state = State::new();
        state.push_boolean(true);
        let err = Frame::new(&state, "g").arg_error(1, "table");
        assert_eq!(
            err.to_string(),
            "bad argument #1 to 'g' (table expected, got boolean)"
        );
    }
}
