//! Shared native objects
//!
//! Pushing a [`Shared`] exposes it through the object bridge; the class of
//! `T` must have been registered. Pulling yields `None` for anything that is
//! not a live handle of exactly `T`, so native code checks for absence
//! instead of failing the call.

use super::{Pull, Push};
use crate::engine::Engine;
use crate::error::{BindResult, PullError};
use crate::object::Shared;
use tether_core::State;

impl<T: 'static> Push for Shared<T> {
    fn push_value(self, state: &State) -> BindResult<usize> {
        let engine = Engine::from_state(state)?;
        engine.objects().push_object(&engine, self)?;
        Ok(1)
    }
}

impl<T: 'static> Push for &Shared<T> {
    fn push_value(self, state: &State) -> BindResult<usize> {
        self.clone().push_value(state)
    }
}

/// Handles of a derived class do not pull as their base: the derived
/// object is its own allocation, reachable as `Shared<Derived>` only. Bind
/// members on the base class to reach its part of the object.
impl<T: 'static> Pull for Option<Shared<T>> {
    fn pull(state: &State, index: i32) -> Result<Self, PullError> {
        Ok(Engine::from_state(state)
            .ok()
            .and_then(|engine| engine.objects().shared_at::<T>(state, index)))
    }
}
