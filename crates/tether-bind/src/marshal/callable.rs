//! Script values held by native code
//!
//! [`ScriptRef`] anchors any runtime value in the registry so it survives
//! collection while native code holds it. [`ScriptFunction`] is a callable
//! view of such a reference. Both hold the state weakly: once the state is
//! gone or closed, calls fail with a runtime error instead of touching a
//! dead runtime.
//!
//! [`Callback`] goes the other way and carries a native closure into the
//! runtime as a function value.

use super::{Pull, PullMulti, Push, PushArgs, StackGuard};
use crate::binder::{push_bound, BoundFunction, Frame, IntoFunction};
use crate::error::{BindError, BindResult, PullError, VmResultExt};
use std::fmt;
use std::rc::Rc;
use tether_core::{State, ValueType, WeakState, REF_NIL};

fn expired() -> BindError {
    BindError::runtime("attempt to call an expired script function")
}

/// Registry slot released on drop
struct RefKey {
    state: WeakState,
    key: i64,
}

impl Drop for RefKey {
    fn drop(&mut self) {
        if let Some(state) = self.state.upgrade() {
            if !state.is_closed() {
                state.unreference(self.key);
            }
        }
    }
}

// ============================================================================
// References
// ============================================================================

/// Registry-anchored reference to a runtime value
///
/// Clones share one registry slot; the slot is freed when the last clone is
/// dropped. `nil` is represented without a slot.
#[derive(Clone, Default)]
pub struct ScriptRef {
    slot: Option<Rc<RefKey>>,
}

impl ScriptRef {
    /// Reference to `nil`
    pub fn nil() -> Self {
        Self::default()
    }

    /// Anchor the value at `index`
    pub fn from_stack(state: &State, index: i32) -> Self {
        state.push_copy(index);
        let key = state.reference();
        if key == REF_NIL {
            return Self::nil();
        }
        Self {
            slot: Some(Rc::new(RefKey {
                state: state.downgrade(),
                key,
            })),
        }
    }

    /// Whether this references `nil`
    pub fn is_nil(&self) -> bool {
        self.slot.is_none()
    }

    /// Whether the owning state is gone or closed
    pub fn is_expired(&self) -> bool {
        match &self.slot {
            Some(s) => s.state.upgrade().map_or(true, |st| st.is_closed()),
            None => false,
        }
    }

    /// Owning state, if still alive
    pub fn state(&self) -> Option<State> {
        self.slot
            .as_ref()
            .and_then(|s| s.state.upgrade())
            .filter(|s| !s.is_closed())
    }

    /// Push the referenced value onto `state`
    pub fn push_to(&self, state: &State) -> BindResult<()> {
        match &self.slot {
            None => state.push_nil(),
            Some(slot) => match slot.state.upgrade() {
                Some(owner) if owner.ptr_eq(state) => state.push_reference(slot.key),
                Some(_) => {
                    return Err(BindError::InvalidBinding(
                        "script reference belongs to another state".to_string(),
                    ))
                }
                None => return Err(BindError::runtime("attempt to use an expired script reference")),
            },
        }
        Ok(())
    }

    fn owner(&self) -> BindResult<State> {
        self.state()
            .ok_or_else(|| BindError::runtime("attempt to use an expired script reference"))
    }

    /// Runtime type of the referenced value
    pub fn value_type(&self) -> ValueType {
        let Some(state) = self.state() else {
            return ValueType::Nil;
        };
        let _guard = StackGuard::new(&state);
        match self.push_to(&state) {
            Ok(()) => state.type_of(-1),
            Err(_) => ValueType::Nil,
        }
    }

    /// Read field `key` (honoring `__index`)
    pub fn get<R: Pull>(&self, key: &str) -> BindResult<R> {
        let state = self.owner()?;
        let _guard = StackGuard::new(&state);
        self.push_to(&state)?;
        state.get_field(-1, key).into_bind(&state)?;
        Ok(R::pull(&state, -1)?)
    }

    /// Write field `key` (honoring `__newindex`)
    pub fn set<V: Push>(&self, key: &str, value: V) -> BindResult<()> {
        let state = self.owner()?;
        let _guard = StackGuard::new(&state);
        self.push_to(&state)?;
        super::push_single(&state, value)?;
        state.set_field(-2, key).into_bind(&state)
    }

    /// Call method `name` with this value as the receiver (`obj:name(args)`)
    pub fn call_method<A: PushArgs, R: Pull>(&self, name: &str, args: A) -> BindResult<R> {
        let state = self.owner()?;
        let guard = StackGuard::new(&state);
        self.push_to(&state)?;
        state.get_field(-1, name).into_bind(&state)?;
        state.insert(-2);
        let nargs = args.push_args(&state)?;
        crate::binder::protected_call(&state, nargs + 1, Some(1))?;
        let result = R::pull(&state, -1)?;
        drop(guard);
        Ok(result)
    }
}

impl fmt::Debug for ScriptRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.slot {
            Some(s) => write!(f, "ScriptRef({})", s.key),
            None => f.write_str("ScriptRef(nil)"),
        }
    }
}

impl Push for ScriptRef {
    fn push_value(self, state: &State) -> BindResult<usize> {
        self.push_to(state)?;
        Ok(1)
    }
}

impl Push for &ScriptRef {
    fn push_value(self, state: &State) -> BindResult<usize> {
        self.push_to(state)?;
        Ok(1)
    }
}

impl Pull for ScriptRef {
    fn pull(state: &State, index: i32) -> Result<Self, PullError> {
        Ok(ScriptRef::from_stack(state, index))
    }
}

// ============================================================================
// Script functions
// ============================================================================

/// Native handle to a script-callable value
///
/// Pulled from `nil`, it is empty: calling it does nothing and yields the
/// results `nil` converts to. A `ScriptFunction::default()` belongs to no
/// state; calling it fails as unset.
#[derive(Clone, Default)]
pub struct ScriptFunction {
    owner: Option<WeakState>,
    target: ScriptRef,
}

impl ScriptFunction {
    /// Whether this wraps no function
    pub fn is_empty(&self) -> bool {
        self.target.is_nil()
    }

    /// Whether the owning state is gone or closed
    pub fn is_expired(&self) -> bool {
        self.live_state().is_none()
    }

    /// Underlying reference
    pub fn script_ref(&self) -> &ScriptRef {
        &self.target
    }

    fn live_state(&self) -> Option<State> {
        self.owner
            .as_ref()
            .and_then(WeakState::upgrade)
            .filter(|s| !s.is_closed())
    }

    /// Call with `args` and convert the first result
    pub fn call<A: PushArgs, R: Pull>(&self, args: A) -> BindResult<R> {
        self.call_multi::<A, (R,)>(args).map(|(r,)| r)
    }

    /// Call with `args`, discarding results
    pub fn invoke<A: PushArgs>(&self, args: A) -> BindResult<()> {
        self.call_multi::<A, ()>(args)
    }

    /// Call with `args` and convert every result
    pub fn call_multi<A: PushArgs, R: PullMulti>(&self, args: A) -> BindResult<R> {
        if self.owner.is_none() {
            return Err(BindError::runtime("attempt to call an unset script function"));
        }
        let state = self.live_state().ok_or_else(expired)?;
        let guard = StackGuard::new(&state);
        let base = guard.top();
        if self.is_empty() {
            return Ok(R::pull_multi(&state, base + 1, 0)?);
        }
        self.target.push_to(&state).map_err(|_| expired())?;
        if state.is_nil(-1) {
            return Err(expired());
        }
        let nargs = args.push_args(&state)?;
        crate::binder::protected_call(&state, nargs, None)?;
        let count = (state.top() - base) as usize;
        Ok(R::pull_multi(&state, base + 1, count)?)
    }
}

impl fmt::Debug for ScriptFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptFunction")
            .field("target", &self.target)
            .field("expired", &self.is_expired())
            .finish()
    }
}

impl Pull for ScriptFunction {
    fn pull(state: &State, index: i32) -> Result<Self, PullError> {
        let callable = match state.type_of(index) {
            ValueType::None | ValueType::Nil | ValueType::Function => true,
            ValueType::Table | ValueType::Userdata => state.get_metafield(index, "__call") && {
                state.pop(1);
                true
            },
            _ => false,
        };
        if !callable {
            return Err(PullError::at(state, index, "function"));
        }
        Ok(ScriptFunction {
            owner: Some(state.downgrade()),
            target: ScriptRef::from_stack(state, index),
        })
    }
}

impl Push for ScriptFunction {
    fn push_value(self, state: &State) -> BindResult<usize> {
        self.target.push_value(state)
    }
}

impl Push for &ScriptFunction {
    fn push_value(self, state: &State) -> BindResult<usize> {
        (&self.target).push_value(state)
    }
}

// ============================================================================
// Callbacks
// ============================================================================

/// Native closure pushed as a runtime function
#[derive(Clone, Debug)]
pub struct Callback {
    name: Rc<str>,
    function: BoundFunction,
}

impl Callback {
    /// Bind `f`, reporting errors under `name`
    pub fn new<M, F: IntoFunction<M>>(name: &str, f: F) -> Self {
        Self {
            name: Rc::from(name),
            function: f.into_function(),
        }
    }

    /// Bind a frame-level function
    pub fn raw<F>(name: &str, f: F) -> Self
    where
        F: Fn(&Frame<'_>) -> BindResult<usize> + 'static,
    {
        Self {
            name: Rc::from(name),
            function: BoundFunction::raw(f),
        }
    }

    /// Name used in errors and tracebacks
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Push for Callback {
    fn push_value(self, state: &State) -> BindResult<usize> {
        push_bound(state, self.function, &self.name)?;
        Ok(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ref_keeps_value() {
        let state = State::new();
        state.new_table().unwrap();
        state.push_integer(3);
        state.set_field(-2, "x").unwrap();
        let r = ScriptRef::from_stack(&state, -1);
        state.pop(1);
        state.collect_garbage();
        assert_eq!(r.value_type(), ValueType::Table);
        assert_eq!(r.get::<i32>("x").unwrap(), 3);
        assert_eq!(state.top(), 0);
    }

    #[test]
    fn test_nil_ref() {
        let state = State::new();
        state.push_nil();
        let r = ScriptRef::pull(&state, 1).unwrap();
        assert!(r.is_nil());
        assert!(!r.is_expired());
    }

    #[test]
    fn test_empty_function_is_noop() {
        let state = State::new();
        state.push_nil();
        let f = ScriptFunction::pull(&state, 1).unwrap();
        state.pop(1);
        assert!(f.is_empty());
        assert_eq!(f.call::<_, i32>((1, 2)).unwrap(), 0);
        assert_eq!(f.call::<_, String>(()).unwrap(), "");
        assert_eq!(state.top(), 0);
    }

    #[test]
    fn test_default_function_is_unset() {
        let f = ScriptFunction::default();
        assert!(f.is_empty());
        let err = f.invoke(()).unwrap_err();
        assert_eq!(err.to_string(), "attempt to call an unset script function");
    }

    #[test]
    fn test_non_callable_rejected() {
        let state = State::new();
        state.push_integer(1);
        let err = ScriptFunction::pull(&state, 1).unwrap_err();
        assert_eq!(err.expected, "function");
        assert_eq!(err.got, "number");
    }

    #[test]
    fn test_expired_after_drop() {
        let f = {
            let state = State::new();
            Callback::new("id", |x: i32| x).push_value(&state).unwrap();
            ScriptFunction::pull(&state, 1).unwrap()
        };
        assert!(f.is_expired());
        let err = f.call::<_, i32>((1,)).unwrap_err();
        assert_eq!(err.to_string(), "attempt to call an expired script function");
    }

    #[test]
    fn test_callback_round_trip() {
        let state = State::new();
        Callback::new("double", |x: i32| x * 2).push_value(&state).unwrap();
        let f = ScriptFunction::pull(&state, 1).unwrap();
        state.pop(1);
        assert_eq!(f.call::<_, i32>((21,)).unwrap(), 42);
        let (a,): (i32,) = f.call_multi((4,)).unwrap();
        assert_eq!(a, 8);
        assert_eq!(state.top(), 0);
    }

    #[test]
    fn test_ref_released_on_drop() {
        let state = State::new();
        state.new_table().unwrap();
        let r = ScriptRef::from_stack(&state, 1);
        state.pop(1);
        state.collect_garbage();
        let before = state.gc_stats().live_objects;
        drop(r);
        state.collect_garbage();
        assert!(state.gc_stats().live_objects < before);
    }
}
