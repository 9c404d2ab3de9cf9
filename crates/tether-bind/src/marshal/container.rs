//! Sequences, sets and maps
//!
//! Sequences and sets become tables with keys `1..=n`; maps become tables
//! keyed by their converted keys. Sequence elements that convert to `nil`
//! are rejected since they would cut the sequence short. Pulling accepts `nil` as an empty container
//! and fails on the first element that does not convert.

use super::{push_single, Pull, Push, StackGuard};
use crate::error::{BindResult, PullError, VmResultExt};
use indexmap::IndexMap;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::hash::{BuildHasher, Hash};
use tether_core::State;

// ============================================================================
// Helpers
// ============================================================================

fn push_sequence<T: Push>(
    state: &State,
    items: impl IntoIterator<Item = T>,
    len: usize,
) -> BindResult<usize> {
    let guard = StackGuard::new(state);
    state.create_table(len, 0).into_bind(state)?;
    for (i, item) in items.into_iter().enumerate() {
        push_single(state, item)?;
        // A nil element would end the sequence at its border
        if state.is_nil(-1) {
            return Err(PullError::new("non-nil sequence element", format!("nil at [{}]", i + 1)).into());
        }
        state.raw_set_i(-2, i as i64 + 1).into_bind(state)?;
    }
    guard.commit(1);
    Ok(1)
}

fn push_pairs<K: Push, V: Push>(
    state: &State,
    entries: impl IntoIterator<Item = (K, V)>,
    len: usize,
) -> BindResult<usize> {
    let guard = StackGuard::new(state);
    state.create_table(0, len).into_bind(state)?;
    for (k, v) in entries {
        push_single(state, k)?;
        push_single(state, v)?;
        state.raw_set(-3).into_bind(state)?;
    }
    guard.commit(1);
    Ok(1)
}

/// Absolute index of a table argument, or `None` for nil
fn table_at(state: &State, index: i32) -> Result<Option<i32>, PullError> {
    if state.is_none_or_nil(index) {
        return Ok(None);
    }
    if !state.is_table(index) {
        return Err(PullError::at(state, index, "table"));
    }
    Ok(Some(state.abs_index(index)))
}

fn element_error(e: PullError, position: impl std::fmt::Display) -> PullError {
    PullError::new(
        format!("table of {}", e.expected),
        format!("{} at {}", e.got, position),
    )
}

fn pull_sequence<T: Pull>(
    state: &State,
    index: i32,
    mut sink: impl FnMut(T),
) -> Result<(), PullError> {
    let Some(index) = table_at(state, index)? else {
        return Ok(());
    };
    let len = state.raw_len(index);
    for i in 1..=len {
        state
            .raw_get_i(index, i as i64)
            .map_err(|_| PullError::at(state, index, "table"))?;
        let item = T::pull(state, -1);
        state.pop(1);
        sink(item.map_err(|e| element_error(e, format!("[{}]", i)))?);
    }
    Ok(())
}

fn pull_pairs<K: Pull, V: Pull>(
    state: &State,
    index: i32,
    mut sink: impl FnMut(K, V),
) -> Result<(), PullError> {
    let Some(index) = table_at(state, index)? else {
        return Ok(());
    };
    let _guard = StackGuard::new(state);
    state.push_nil();
    loop {
        match state.next(index) {
            Ok(true) => {}
            Ok(false) => break,
            Err(_) => return Err(PullError::new("table", "table modified during traversal")),
        }
        let key = K::pull(state, -2).map_err(|e| element_error(e, "key"))?;
        let value = V::pull(state, -1).map_err(|e| element_error(e, "value"))?;
        state.pop(1);
        sink(key, value);
    }
    Ok(())
}

// ============================================================================
// Sequences
// ============================================================================

impl<T: Push> Push for Vec<T> {
    fn push_value(self, state: &State) -> BindResult<usize> {
        let len = self.len();
        push_sequence(state, self, len)
    }
}

impl<T: Push + Clone> Push for &[T] {
    fn push_value(self, state: &State) -> BindResult<usize> {
        push_sequence(state, self.iter().cloned(), self.len())
    }
}

impl<T: Push, const N: usize> Push for [T; N] {
    fn push_value(self, state: &State) -> BindResult<usize> {
        push_sequence(state, self, N)
    }
}

impl<T: Push> Push for VecDeque<T> {
    fn push_value(self, state: &State) -> BindResult<usize> {
        let len = self.len();
        push_sequence(state, self, len)
    }
}

impl<T: Pull> Pull for Vec<T> {
    fn pull(state: &State, index: i32) -> Result<Self, PullError> {
        let mut out = Vec::new();
        pull_sequence(state, index, |v| Vec::push(&mut out, v))?;
        Ok(out)
    }
}

impl<T: Pull> Pull for VecDeque<T> {
    fn pull(state: &State, index: i32) -> Result<Self, PullError> {
        let mut out = VecDeque::new();
        pull_sequence(state, index, |v| out.push_back(v))?;
        Ok(out)
    }
}

// ============================================================================
// Sets
// ============================================================================

impl<T: Push, S> Push for HashSet<T, S> {
    fn push_value(self, state: &State) -> BindResult<usize> {
        let len = self.len();
        push_sequence(state, self, len)
    }
}

impl<T: Pull + Eq + Hash, S: BuildHasher + Default> Pull for HashSet<T, S> {
    fn pull(state: &State, index: i32) -> Result<Self, PullError> {
        let mut out = HashSet::default();
        pull_sequence(state, index, |v| {
            out.insert(v);
        })?;
        Ok(out)
    }
}

impl<T: Push> Push for BTreeSet<T> {
    fn push_value(self, state: &State) -> BindResult<usize> {
        let len = self.len();
        push_sequence(state, self, len)
    }
}

impl<T: Pull + Ord> Pull for BTreeSet<T> {
    fn pull(state: &State, index: i32) -> Result<Self, PullError> {
        let mut out = BTreeSet::new();
        pull_sequence(state, index, |v| {
            out.insert(v);
        })?;
        Ok(out)
    }
}

// ============================================================================
// Maps
// ============================================================================

impl<K: Push, V: Push, S> Push for HashMap<K, V, S> {
    fn push_value(self, state: &State) -> BindResult<usize> {
        let len = self.len();
        push_pairs(state, self, len)
    }
}

impl<K, V, S> Pull for HashMap<K, V, S>
where
    K: Pull + Eq + Hash,
    V: Pull,
    S: BuildHasher + Default,
{
    fn pull(state: &State, index: i32) -> Result<Self, PullError> {
        let mut out = HashMap::default();
        pull_pairs(state, index, |k, v| {
            out.insert(k, v);
        })?;
        Ok(out)
    }
}

impl<K: Push, V: Push> Push for BTreeMap<K, V> {
    fn push_value(self, state: &State) -> BindResult<usize> {
        let len = self.len();
        push_pairs(state, self, len)
    }
}

impl<K: Pull + Ord, V: Pull> Pull for BTreeMap<K, V> {
    fn pull(state: &State, index: i32) -> Result<Self, PullError> {
        let mut out = BTreeMap::new();
        pull_pairs(state, index, |k, v| {
            out.insert(k, v);
        })?;
        Ok(out)
    }
}

impl<K: Push, V: Push, S> Push for IndexMap<K, V, S> {
    fn push_value(self, state: &State) -> BindResult<usize> {
        let len = self.len();
        push_pairs(state, self, len)
    }
}

impl<K, V, S> Pull for IndexMap<K, V, S>
where
    K: Pull + Eq + Hash,
    V: Pull,
    S: BuildHasher + Default,
{
    fn pull(state: &State, index: i32) -> Result<Self, PullError> {
        let mut out = IndexMap::default();
        pull_pairs(state, index, |k, v| {
            out.insert(k, v);
        })?;
        Ok(out)
    }
}
