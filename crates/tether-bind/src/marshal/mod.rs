//! Value marshaling between native types and runtime values
//!
//! [`Push`] moves a native value onto the runtime stack, [`Pull`] reads one
//! back from a stack slot. The impls are selected at compile time from the
//! native type:
//!
//! - `scalar`: integers, floats and booleans
//! - `string`: owned and borrowed strings, byte strings
//! - `container`: sequences, sets and maps as tables
//! - `tuple`: fixed-size tuples as 1-based tables, plus multi-value
//!   argument and result lists
//! - `callable`: script functions and references held by native code
//! - `object`: shared native objects exposed through handles
//! - `value`: raw runtime values, `Option`, `Result` and unit
//!
//! Every operation here leaves the stack depth unchanged on failure;
//! [`StackGuard`] enforces that.

mod callable;
mod container;
mod object;
mod scalar;
mod string;
mod tuple;
mod value;

pub use callable::{Callback, ScriptFunction, ScriptRef};
pub use tuple::{PullMulti, PushArgs};

use crate::error::{BindResult, PullError};
use tether_core::State;

/// Native values that can be pushed onto the runtime stack
pub trait Push {
    /// Push `self` and return the number of stack slots produced
    fn push_value(self, state: &State) -> BindResult<usize>;
}

/// Native values that can be read from a stack slot
pub trait Pull: Sized {
    /// Stack slots consumed when pulled as a function argument
    const SLOTS: usize = 1;

    /// Convert the value at `index`
    fn pull(state: &State, index: i32) -> Result<Self, PullError>;
}

/// Restores the stack depth when dropped
///
/// Without a [`commit`](StackGuard::commit) the stack is truncated back to
/// the depth recorded at creation. Committing `n` keeps the top `n` values
/// and discards anything pushed below them.
pub struct StackGuard<'s> {
    state: &'s State,
    top: i32,
    keep: Option<i32>,
}

impl<'s> StackGuard<'s> {
    /// Record the current stack depth
    pub fn new(state: &'s State) -> Self {
        Self {
            state,
            top: state.top(),
            keep: None,
        }
    }

    /// Depth recorded at creation
    pub fn top(&self) -> i32 {
        self.top
    }

    /// Keep the top `n` values on drop
    pub fn commit(mut self, n: usize) {
        self.keep = Some(n as i32);
    }
}

impl Drop for StackGuard<'_> {
    fn drop(&mut self) {
        let current = self.state.top();
        match self.keep {
            None => {
                if current > self.top {
                    self.state.set_top(self.top);
                }
            }
            Some(n) => {
                let garbage = current - self.top - n;
                for _ in 0..garbage {
                    self.state.remove(self.top + 1);
                }
            }
        }
    }
}

/// Push `value` as exactly one stack slot
///
/// Values producing nothing become `nil`; extra slots are dropped.
pub fn push_single<T: Push>(state: &State, value: T) -> BindResult<()> {
    let guard = StackGuard::new(state);
    let n = value.push_value(state)?;
    match n {
        0 => state.push_nil(),
        1 => {}
        _ => state.pop(n - 1),
    }
    guard.commit(1);
    Ok(())
}

/// Pull a value from `index` without consuming the slot
pub fn pull_at<T: Pull>(state: &State, index: i32) -> Result<T, PullError> {
    T::pull(state, index)
}

/// Pull the top value and pop it
pub fn pull_top<T: Pull>(state: &State) -> Result<T, PullError> {
    let result = T::pull(state, -1);
    state.pop(1);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_restores_on_drop() {
        let state = State::new();
        state.push_integer(1);
        {
            let _guard = StackGuard::new(&state);
            state.push_integer(2);
            state.push_integer(3);
        }
        assert_eq!(state.top(), 1);
    }

    #[test]
    fn test_guard_commit_keeps_results() {
        let state = State::new();
        {
            let guard = StackGuard::new(&state);
            state.push_string("temp");
            state.push_integer(7);
            guard.commit(1);
        }
        assert_eq!(state.top(), 1);
        assert_eq!(state.to_integer(1), Some(7));
    }

    #[test]
    fn test_push_single_fills_nil() {
        let state = State::new();
        push_single(&state, ()).unwrap();
        assert_eq!(state.top(), 1);
        assert!(state.is_nil(1));
    }

    #[test]
    fn test_pull_top_pops() {
        let state = State::new();
        state.push_integer(5);
        let v: i32 = pull_top(&state).unwrap();
        assert_eq!(v, 5);
        assert_eq!(state.top(), 0);
    }
}
