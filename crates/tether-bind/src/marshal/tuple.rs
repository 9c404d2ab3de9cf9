//! Tuples and multi-value lists
//!
//! A tuple pushed as a single value becomes a table with keys `1..=N`.
//! [`PushArgs`] and [`PullMulti`] instead spread a tuple over consecutive
//! stack slots, for call arguments and multiple results.

use super::{push_single, Pull, Push, StackGuard};
use crate::error::{BindResult, PullError, VmResultExt};
use tether_core::State;

/// Values pushed as a list of call arguments
pub trait PushArgs {
    /// Push every argument and return how many slots were produced
    fn push_args(self, state: &State) -> BindResult<usize>;
}

/// Values pulled from a run of consecutive result slots
pub trait PullMulti: Sized {
    /// Pull from `count` slots starting at the absolute index `first`
    ///
    /// Slots past `count` read as `nil`.
    fn pull_multi(state: &State, first: i32, count: usize) -> Result<Self, PullError>;
}

impl PushArgs for () {
    fn push_args(self, _state: &State) -> BindResult<usize> {
        Ok(0)
    }
}

impl PullMulti for () {
    fn pull_multi(_state: &State, _first: i32, _count: usize) -> Result<Self, PullError> {
        Ok(())
    }
}

impl<T: Push> PushArgs for Vec<T> {
    fn push_args(self, state: &State) -> BindResult<usize> {
        let guard = StackGuard::new(state);
        let n = self.len();
        for v in self {
            push_single(state, v)?;
        }
        guard.commit(n);
        Ok(n)
    }
}

impl<T: Pull> PullMulti for Vec<T> {
    fn pull_multi(state: &State, first: i32, count: usize) -> Result<Self, PullError> {
        (0..count as i32).map(|i| T::pull(state, first + i)).collect()
    }
}

/// Value at slot `first + offset` if it is within the result run
fn pull_slot<T: Pull>(state: &State, first: i32, count: usize, offset: usize) -> Result<T, PullError> {
    if offset < count {
        T::pull(state, first + offset as i32)
    } else {
        let guard = StackGuard::new(state);
        state.push_nil();
        let v = T::pull(state, -1);
        drop(guard);
        v
    }
}

macro_rules! impl_tuple {
    ($n:expr; $($name:ident $idx:tt),+) => {
        impl<$($name: Push),+> Push for ($($name,)+) {
            fn push_value(self, state: &State) -> BindResult<usize> {
                let guard = StackGuard::new(state);
                state.create_table($n, 0).into_bind(state)?;
                $(
                    push_single(state, self.$idx)?;
                    state.raw_set_i(-2, $idx + 1).into_bind(state)?;
                )+
                guard.commit(1);
                Ok(1)
            }
        }

        impl<$($name: Pull),+> Pull for ($($name,)+) {
            fn pull(state: &State, index: i32) -> Result<Self, PullError> {
                if !state.is_table(index) {
                    return Err(PullError::at(state, index, "table"));
                }
                let index = state.abs_index(index);
                Ok(($(
                    {
                        state
                            .raw_get_i(index, $idx + 1)
                            .map_err(|_| PullError::at(state, index, "table"))?;
                        let v = $name::pull(state, -1);
                        state.pop(1);
                        v.map_err(|e| PullError::new(
                            format!("table of {}", e.expected),
                            format!("{} at [{}]", e.got, $idx + 1),
                        ))?
                    },
                )+))
            }
        }

        impl<$($name: Push),+> PushArgs for ($($name,)+) {
            fn push_args(self, state: &State) -> BindResult<usize> {
                let guard = StackGuard::new(state);
                let mut count = 0;
                $(
                    count += self.$idx.push_value(state)?;
                )+
                guard.commit(count);
                Ok(count)
            }
        }

        impl<$($name: Pull),+> PullMulti for ($($name,)+) {
            fn pull_multi(state: &State, first: i32, count: usize) -> Result<Self, PullError> {
                Ok(($(pull_slot::<$name>(state, first, count, $idx)?,)+))
            }
        }
    };
}

impl_tuple!(1; A 0);
impl_tuple!(2; A 0, B 1);
impl_tuple!(3; A 0, B 1, C 2);
impl_tuple!(4; A 0, B 1, C 2, D 3);
impl_tuple!(5; A 0, B 1, C 2, D 3, E 4);
impl_tuple!(6; A 0, B 1, C 2, D 3, E 4, F 5);
impl_tuple!(7; A 0, B 1, C 2, D 3, E 4, F 5, G 6);
impl_tuple!(8; A 0, B 1, C 2, D 3, E 4, F 5, G 6, H 7);
