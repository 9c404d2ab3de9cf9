//! Raw values, unit, `Option` and `Result`

use super::{Pull, Push};
use crate::error::{BindError, BindResult, PullError};
use tether_core::{State, Value};

impl Push for () {
    fn push_value(self, _state: &State) -> BindResult<usize> {
        Ok(0)
    }
}

impl Pull for () {
    const SLOTS: usize = 0;

    fn pull(_state: &State, _index: i32) -> Result<Self, PullError> {
        Ok(())
    }
}

/// A raw value is only kept alive while it stays reachable from the runtime;
/// hold a [`ScriptRef`](super::ScriptRef) to keep heap values across calls.
impl Push for Value {
    fn push_value(self, state: &State) -> BindResult<usize> {
        state.push_value(self);
        Ok(1)
    }
}

impl Pull for Value {
    fn pull(state: &State, index: i32) -> Result<Self, PullError> {
        Ok(state.value_at(index))
    }
}

impl<T: Push> Push for Option<T> {
    fn push_value(self, state: &State) -> BindResult<usize> {
        match self {
            Some(v) => v.push_value(state),
            None => {
                state.push_nil();
                Ok(1)
            }
        }
    }
}

impl<T: Pull> Pull for Option<T> {
    fn pull(state: &State, index: i32) -> Result<Self, PullError> {
        if state.is_none_or_nil(index) {
            Ok(None)
        } else {
            T::pull(state, index).map(Some)
        }
    }
}

/// `Err` is raised as an error in the caller
impl<T: Push, E: Into<BindError>> Push for Result<T, E> {
    fn push_value(self, state: &State) -> BindResult<usize> {
        match self {
            Ok(v) => v.push_value(state),
            Err(e) => Err(e.into()),
        }
    }
}
