//! Engine facade
//!
//! An [`Engine`] owns one runtime state with the bridge installed on it. It
//! is the entry point for embedding hosts: apply a [`Registry`], call into
//! scripts, exchange values and administer exposed objects.
//!
//! Every method leaves the stack at the depth it found it, on success and
//! on failure.

use crate::binder::{protected_call, traceback_handler, IntoFunction, TRACEBACK_HANDLER};
use crate::config::EngineConfig;
use crate::error::{BindError, BindResult, PullError, VmResultExt};
use crate::marshal::{
    push_single, Callback, Pull, PullMulti, Push, PushArgs, ScriptFunction, ScriptRef, StackGuard,
};
use crate::object::{address_of, HandleState, ObjectBridge, Shared};
use crate::registry::Registry;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use tether_core::{GcStats, State, ValueType};
use tracing::debug;

/// Bridge state attached to a runtime state
pub(crate) struct EngineShared {
    config: EngineConfig,
    objects: ObjectBridge,
}

/// A runtime state with the binding layer installed
#[derive(Clone)]
pub struct Engine {
    state: State,
    shared: Rc<EngineShared>,
}

impl Engine {
    /// Engine with the default configuration
    pub fn new() -> BindResult<Self> {
        Self::with_config(EngineConfig::default())
    }

    /// Engine with `config`
    pub fn with_config(config: EngineConfig) -> BindResult<Self> {
        let state = State::with_options(config.vm.clone());
        let shared = Rc::new(EngineShared {
            config,
            objects: ObjectBridge::new(),
        });
        state.set_app_data(shared.clone());
        shared.objects.install(&state)?;

        if shared.config.tracebacks {
            state
                .push_function("tether.traceback", traceback_handler)
                .into_bind(&state)?;
            state.set_registry_field(TRACEBACK_HANDLER).into_bind(&state)?;
        }
        debug!(event = "engine_created", tracebacks = shared.config.tracebacks);
        Ok(Self { state, shared })
    }

    /// Engine installed on `state`
    ///
    /// Fails with [`BindError::InvalidBinding`] for a state that was not
    /// created by [`Engine::new`] or [`Engine::with_config`].
    pub fn from_state(state: &State) -> BindResult<Self> {
        let shared = state.app_data::<EngineShared>().ok_or_else(|| {
            BindError::InvalidBinding("state has no binding engine installed".to_string())
        })?;
        Ok(Self {
            state: state.clone(),
            shared,
        })
    }

    /// Underlying runtime state
    pub fn state(&self) -> &State {
        &self.state
    }

    /// Configuration the engine was created with
    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    /// Object bridge of this engine
    pub fn objects(&self) -> &ObjectBridge {
        &self.shared.objects
    }

    /// Materialize every declaration of `registry`
    pub fn apply(&self, registry: &Registry) -> BindResult<()> {
        registry.apply(self)
    }

    // ========================================================================
    // Values
    // ========================================================================

    /// Push the value at dotted `path` (`nil` if any step is missing)
    fn push_path(&self, path: &str) -> BindResult<()> {
        let state = &self.state;
        state.push_globals();
        for segment in path.split('.') {
            match state.type_of(-1) {
                ValueType::Table | ValueType::Userdata => {
                    state.get_field(-1, segment).into_bind(state)?;
                    state.remove(-2);
                }
                _ => {
                    state.pop(1);
                    state.push_nil();
                    break;
                }
            }
        }
        Ok(())
    }

    /// Value at dotted `path`, such as `"mathex.pi"`
    pub fn get<R: Pull>(&self, path: &str) -> BindResult<R> {
        let _guard = StackGuard::new(&self.state);
        self.push_path(path)?;
        Ok(R::pull(&self.state, -1)?)
    }

    /// Assign `value` at dotted `path`; every parent must exist
    pub fn set<V: Push>(&self, path: &str, value: V) -> BindResult<()> {
        let state = &self.state;
        let _guard = StackGuard::new(state);
        let (parent, field) = match path.rsplit_once('.') {
            Some((parent, field)) => {
                self.push_path(parent)?;
                (parent, field)
            }
            None => {
                state.push_globals();
                ("_G", path)
            }
        };
        if !matches!(state.type_of(-1), ValueType::Table | ValueType::Userdata) {
            return Err(BindError::runtime(format!(
                "attempt to index a {} value ('{}')",
                state.type_name(-1),
                parent
            )));
        }
        push_single(state, value)?;
        state.set_field(-2, field).into_bind(state)
    }

    /// Assign global `name`
    pub fn set_global<V: Push>(&self, name: &str, value: V) -> BindResult<()> {
        let _guard = StackGuard::new(&self.state);
        push_single(&self.state, value)?;
        self.state.set_global(name).into_bind(&self.state)
    }

    /// Field `key` of `object` (honoring `__index`)
    pub fn get_field<R: Pull>(&self, object: &ScriptRef, key: &str) -> BindResult<R> {
        self.check_owner(object)?;
        object.get(key)
    }

    /// Assign field `key` of `object` (honoring `__newindex`)
    pub fn set_field<V: Push>(&self, object: &ScriptRef, key: &str, value: V) -> BindResult<()> {
        self.check_owner(object)?;
        object.set(key, value)
    }

    /// Anchor any pushable value as a [`ScriptRef`]
    pub fn to_ref<V: Push>(&self, value: V) -> BindResult<ScriptRef> {
        let _guard = StackGuard::new(&self.state);
        push_single(&self.state, value)?;
        Ok(ScriptRef::from_stack(&self.state, -1))
    }

    /// New empty table
    pub fn create_table(&self) -> BindResult<ScriptRef> {
        let _guard = StackGuard::new(&self.state);
        self.state.new_table().into_bind(&self.state)?;
        Ok(ScriptRef::from_stack(&self.state, -1))
    }

    /// Bind `f` as a runtime function value named `name`
    pub fn create_function<M, F: IntoFunction<M>>(&self, name: &str, f: F) -> BindResult<ScriptFunction> {
        let _guard = StackGuard::new(&self.state);
        Callback::new(name, f).push_value(&self.state)?;
        Ok(ScriptFunction::pull(&self.state, -1)?)
    }

    fn check_owner(&self, object: &ScriptRef) -> BindResult<()> {
        match object.state() {
            Some(s) if !s.ptr_eq(&self.state) => Err(BindError::InvalidBinding(
                "script reference belongs to another engine".to_string(),
            )),
            _ => Ok(()),
        }
    }

    // ========================================================================
    // Calls
    // ========================================================================

    /// Call the function at dotted `path` and convert its first result
    pub fn call<A: PushArgs, R: Pull>(&self, path: &str, args: A) -> BindResult<R> {
        self.call_multi::<A, (R,)>(path, args).map(|(r,)| r)
    }

    /// Call the function at dotted `path` and convert all its results
    pub fn call_multi<A: PushArgs, R: PullMulti>(&self, path: &str, args: A) -> BindResult<R> {
        let state = &self.state;
        let guard = StackGuard::new(state);
        let base = guard.top();
        self.push_path(path)?;
        if !self.is_callable(-1) {
            return Err(BindError::runtime(format!(
                "attempt to call a {} value ('{}')",
                state.type_name(-1),
                path
            )));
        }
        let nargs = args.push_args(state)?;
        protected_call(state, nargs, None)?;
        let count = (state.top() - base) as usize;
        Ok(R::pull_multi(state, base + 1, count)?)
    }

    /// Call method `name` on `object` (`object:name(args)`)
    pub fn call_method<A: PushArgs, R: Pull>(&self, object: &ScriptRef, name: &str, args: A) -> BindResult<R> {
        self.check_owner(object)?;
        object.call_method(name, args)
    }

    /// Run `f` inside a protected call
    ///
    /// Errors and panics raised while `f` runs, including those of script
    /// callbacks it invokes, come back as a [`BindError`] with the stack
    /// restored.
    pub fn protected_call<R, F>(&self, f: F) -> BindResult<R>
    where
        R: 'static,
        F: FnOnce(&Engine) -> BindResult<R> + 'static,
    {
        let body = RefCell::new(Some(f));
        let out: Rc<RefCell<Option<R>>> = Rc::new(RefCell::new(None));
        let sink = out.clone();
        let callback = Callback::raw("protected_call", move |frame| {
            let f = body
                .borrow_mut()
                .take()
                .ok_or_else(|| BindError::InvalidBinding("protected body already ran".to_string()))?;
            let value = f(&frame.engine()?)?;
            *sink.borrow_mut() = Some(value);
            Ok(0)
        });

        let _guard = StackGuard::new(&self.state);
        callback.push_value(&self.state)?;
        protected_call(&self.state, 0, Some(0))?;
        let value = out.borrow_mut().take();
        value.ok_or_else(|| BindError::runtime("protected call produced no result"))
    }

    fn is_callable(&self, index: i32) -> bool {
        match self.state.type_of(index) {
            ValueType::Function => true,
            ValueType::Table | ValueType::Userdata => {
                let found = self.state.get_metafield(index, "__call");
                if found {
                    self.state.pop(1);
                }
                found
            }
            _ => false,
        }
    }

    // ========================================================================
    // Objects
    // ========================================================================

    /// Release the handle of `object`, firing its release hook
    ///
    /// Returns `false` if the object has no live handle.
    pub fn release_object<T: 'static>(&self, object: &Shared<T>) -> BindResult<bool> {
        self.objects().release(self, object.address())
    }

    /// Release the handle of the object at `instance`'s address
    ///
    /// For native code that only holds a borrow, typically from inside the
    /// object's own teardown.
    pub fn release_instance<T>(&self, instance: &T) -> BindResult<bool> {
        self.objects().release(self, address_of(instance))
    }

    /// Drop one native-visible reference; the handle is released at zero
    ///
    /// Returns the remaining count.
    pub fn unref_object<T: 'static>(&self, object: &Shared<T>) -> BindResult<usize> {
        self.objects().unref(self, object.address())
    }

    /// Native-visible references of `object` (0 if not live)
    pub fn object_ref_count<T: 'static>(&self, object: &Shared<T>) -> usize {
        self.objects().ref_count(object.address())
    }

    /// Lifecycle state of `object`
    pub fn object_state<T: 'static>(&self, object: &Shared<T>) -> HandleState {
        self.objects().object_state(object.address())
    }

    /// Lifecycle state of the handle held by `handle`, `None` if it is no handle
    pub fn handle_state(&self, handle: &ScriptRef) -> Option<HandleState> {
        self.check_owner(handle).ok()?;
        let _guard = StackGuard::new(&self.state);
        handle.push_to(&self.state).ok()?;
        self.objects().handle_state_at(&self.state, -1)
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Run a full collection, including due finalizers
    pub fn collect_garbage(&self) {
        self.state.collect_garbage();
    }

    /// Collector statistics
    pub fn gc_stats(&self) -> GcStats {
        self.state.gc_stats()
    }

    /// Current stack depth
    pub fn stack_size(&self) -> usize {
        self.state.top().max(0) as usize
    }

    /// Whether [`close`](Engine::close) has run
    pub fn is_closed(&self) -> bool {
        self.state.is_closed()
    }

    /// Finalize every remaining handle and shut the state down
    ///
    /// Handles still live fire their release hooks. Dropping an engine
    /// without closing it runs no finalizers.
    pub fn close(&self) {
        if self.state.is_closed() {
            return;
        }
        debug!(event = "engine_closing", handles = self.objects().handle_count());
        self.state.close();
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.shared.config)
            .field("objects", &self.shared.objects)
            .field("closed", &self.state.is_closed())
            .finish()
    }
}

/// Raw functions and bound functions may take the engine as a parameter
///
/// It consumes no stack slot.
impl Pull for Engine {
    const SLOTS: usize = 0;

    fn pull(state: &State, _index: i32) -> Result<Self, PullError> {
        Engine::from_state(state).map_err(|_| PullError::new("engine", "plain state"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_state_requires_engine() {
        let state = State::new();
        let err = Engine::from_state(&state).unwrap_err();
        assert!(matches!(err, BindError::InvalidBinding(_)));

        let engine = Engine::new().unwrap();
        let again = Engine::from_state(engine.state()).unwrap();
        assert!(again.state().ptr_eq(engine.state()));
    }

    #[test]
    fn test_dotted_paths() {
        let engine = Engine::new().unwrap();
        let t = engine.create_table().unwrap();
        engine.set_global("cfg", &t).unwrap();
        engine.set("cfg.depth", 3).unwrap();
        assert_eq!(engine.get::<i32>("cfg.depth").unwrap(), 3);
        assert_eq!(engine.get::<Option<i32>>("cfg.missing.deeper").unwrap(), None);
        assert!(engine.set("nothing.here", 1).is_err());
        assert_eq!(engine.stack_size(), 0);
    }

    #[test]
    fn test_call_function_value() {
        let engine = Engine::new().unwrap();
        let f = engine.create_function("mul", |a: i32, b: i32| a * b).unwrap();
        engine.set_global("mul", &f).unwrap();
        assert_eq!(engine.call::<_, i32>("mul", (6, 7)).unwrap(), 42);
        let err = engine.call::<_, i32>("nope", ()).unwrap_err();
        assert_eq!(err.to_string(), "attempt to call a nil value ('nope')");
        assert_eq!(engine.stack_size(), 0);
    }

    #[test]
    fn test_protected_call_catches_panic() {
        let engine = Engine::new().unwrap();
        let err = engine
            .protected_call(|_| -> BindResult<()> { panic!("boom") })
            .unwrap_err();
        assert!(err.to_string().contains("boom"));
        assert_eq!(engine.protected_call(|_| Ok(5)).unwrap(), 5);
        assert_eq!(engine.stack_size(), 0);
    }

    #[test]
    fn test_tracebacks_can_be_disabled() {
        let config = EngineConfig {
            tracebacks: false,
            ..EngineConfig::default()
        };
        let engine = Engine::with_config(config).unwrap();
        let f = engine
            .create_function("fail", || -> BindResult<()> { Err(BindError::runtime("bad")) })
            .unwrap();
        let err = f.invoke(()).unwrap_err();
        assert!(err.traceback().is_none());
        assert_eq!(err.to_string(), "bad");

        let traced = Engine::new().unwrap();
        let f = traced
            .create_function("fail", || -> BindResult<()> { Err(BindError::runtime("bad")) })
            .unwrap();
        let err = f.invoke(()).unwrap_err();
        assert!(err.traceback().unwrap().contains("fail"));
    }
}
