//! Object bridge
//!
//! Exposes shared native objects to scripts as handles and keeps the two
//! lifetimes consistent:
//!
//! - **Identity**: a weak-valued table in the runtime registry maps the
//!   address of each exposed object to its handle userdata, so exposing the
//!   same object twice yields the same handle while it is reachable.
//! - **Lifetime**: the bridge keeps each object alive through its
//!   [`Handle`](handle::Handle) until the handle is released by native code
//!   or its userdata is finalized by the collector. The `on_release` hook
//!   fires exactly once per handle.
//! - **Dynamic fields**: writes through a handle land in a per-handle side
//!   table (the userdata's user value); reads consult it before the class
//!   method table.
//!
//! ```text
//! Unexposed --push--> Live --release--> Released --finalize--> Collected
//!                       \------------------finalize-----------/
//! ```

pub mod class;
mod handle;

pub use class::{HandleReceiver, ResolvedReceiver};
pub use handle::HandleId;

use crate::engine::Engine;
use crate::error::{BindError, BindResult, VmResultExt};
use crate::marshal::StackGuard;
use class::{handle_id_at, ClassEntry, IDENTITY_TABLE};
use handle::{Handle, HandleTable};
use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use std::any::{Any, TypeId};
use std::cell::{BorrowError, BorrowMutError, Ref, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;
use tether_core::{State, ValueType};
use tracing::debug;

/// Lifecycle state of an exposed object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    /// Not currently exposed to scripts
    Unexposed,
    /// Exposed and usable
    Live,
    /// Released by native code; member access fails until the handle is collected
    Released,
    /// Finalized by the collector
    Collected,
}

// ============================================================================
// Shared objects
// ============================================================================

/// Native object shared between native code and scripts
pub struct Shared<T>(Rc<RefCell<T>>);

impl<T> Shared<T> {
    /// Wrap a new object
    pub fn new(value: T) -> Self {
        Shared(Rc::new(RefCell::new(value)))
    }

    /// Wrap an existing shared cell
    pub fn from_rc(rc: Rc<RefCell<T>>) -> Self {
        Shared(rc)
    }

    /// Immutable borrow
    pub fn borrow(&self) -> Ref<'_, T> {
        self.0.borrow()
    }

    /// Mutable borrow
    pub fn borrow_mut(&self) -> RefMut<'_, T> {
        self.0.borrow_mut()
    }

    /// Immutable borrow, failing if mutably borrowed
    pub fn try_borrow(&self) -> Result<Ref<'_, T>, BorrowError> {
        self.0.try_borrow()
    }

    /// Mutable borrow, failing if borrowed
    pub fn try_borrow_mut(&self) -> Result<RefMut<'_, T>, BorrowMutError> {
        self.0.try_borrow_mut()
    }

    /// Whether both point to the same object
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Rc::ptr_eq(&a.0, &b.0)
    }

    /// Identity key: the address of the object
    pub fn address(&self) -> usize {
        self.0.as_ptr() as *const u8 as usize
    }

    /// Number of strong owners, including the bridge's
    pub fn strong_count(&self) -> usize {
        Rc::strong_count(&self.0)
    }
}

impl<T: 'static> Shared<T> {
    pub(crate) fn into_any(self) -> Rc<dyn Any> {
        self.0
    }

    pub(crate) fn from_any(object: Rc<dyn Any>) -> Option<Self> {
        object.downcast::<RefCell<T>>().ok().map(Shared)
    }
}

impl<T> Clone for Shared<T> {
    fn clone(&self) -> Self {
        Shared(self.0.clone())
    }
}

impl<T: fmt::Debug> fmt::Debug for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Shared").field(&self.0).finish()
    }
}

/// Identity key of an object borrowed from a [`Shared`]
pub fn address_of<T>(object: &T) -> usize {
    object as *const T as *const u8 as usize
}

// ============================================================================
// Bridge
// ============================================================================

/// Per-engine state of the object bridge
#[derive(Default)]
pub struct ObjectBridge {
    classes: RefCell<FxHashMap<TypeId, Rc<ClassEntry>>>,
    names: RefCell<IndexMap<Rc<str>, TypeId>>,
    handles: RefCell<HandleTable>,
}

impl ObjectBridge {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Create the weak identity table
    pub(crate) fn install(&self, state: &State) -> BindResult<()> {
        let _guard = StackGuard::new(state);
        state.new_table().into_bind(state)?;
        state.create_table(0, 1).into_bind(state)?;
        state.push_string("v");
        state.raw_set_field(-2, "__mode").into_bind(state)?;
        state.set_metatable(-2).into_bind(state)?;
        state.set_registry_field(IDENTITY_TABLE).into_bind(state)?;
        Ok(())
    }

    // ========================================================================
    // Classes
    // ========================================================================

    pub(crate) fn register_class(&self, state: &State, entry: ClassEntry) -> BindResult<()> {
        if self.names.borrow().contains_key(&entry.name)
            || self.classes.borrow().contains_key(&entry.type_id)
        {
            return Err(BindError::DuplicateBinding {
                scope: "object bridge".to_string(),
                name: entry.name.to_string(),
            });
        }
        class::create_metatable(state, &entry.name)?;
        debug!(event = "class_registered", class = %entry.name, native = entry.type_name);
        self.names
            .borrow_mut()
            .insert(entry.name.clone(), entry.type_id);
        self.classes
            .borrow_mut()
            .insert(entry.type_id, Rc::new(entry));
        Ok(())
    }

    pub(crate) fn class_of(&self, type_id: TypeId) -> Option<Rc<ClassEntry>> {
        self.classes.borrow().get(&type_id).cloned()
    }

    pub(crate) fn class_named(&self, name: &str) -> Option<Rc<ClassEntry>> {
        let type_id = self.names.borrow().get(name).copied()?;
        self.class_of(type_id)
    }

    /// Whether a managed class named `name` is registered
    pub fn is_registered(&self, name: &str) -> bool {
        self.names.borrow().contains_key(name)
    }

    /// Names of the registered managed classes, in registration order
    pub fn class_names(&self) -> Vec<String> {
        self.names.borrow().keys().map(|k| k.to_string()).collect()
    }

    // ========================================================================
    // Exposure
    // ========================================================================

    /// Push the handle of `object`, creating it on first exposure
    pub(crate) fn push_object<T: 'static>(&self, engine: &Engine, object: Shared<T>) -> BindResult<()> {
        let state = engine.state();
        let entry = self.class_of(TypeId::of::<T>()).ok_or_else(|| {
            BindError::UnregisteredClass(std::any::type_name::<T>().to_string())
        })?;
        let key = object.address();
        let guard = StackGuard::new(state);

        if let Some(id) = self.lookup_identity(state, key)? {
            if let Some(h) = self.handles.borrow_mut().get_mut(id) {
                h.refs += 1;
            }
            guard.commit(1);
            return Ok(());
        }

        // An older handle may still be waiting for its finalizer
        let old = self.handles.borrow().find(key);
        let inherited = old.and_then(|old| self.supersede(old));

        let object = object.into_any();
        let mut handle = Handle::new(object.clone(), key, entry.name.clone());
        handle.refs += inherited.unwrap_or(0);
        let id = self.handles.borrow_mut().insert(handle);
        if let Err(e) = self.create_userdata(state, id, &entry.name, key) {
            let mut handles = self.handles.borrow_mut();
            handles.remove(id);
            if let (Some(old), Some(refs)) = (old, inherited) {
                handles.reinstate(old, refs);
            }
            return Err(e);
        }
        guard.commit(1);
        debug!(event = "object_exposed", class = %entry.name, key);

        if inherited.is_none() {
            if let Some(hook) = &entry.on_acquire {
                hook(engine, &object);
            }
        }
        Ok(())
    }

    /// Hand the object of a handle awaiting finalization over to its successor
    ///
    /// Returns the references of the old handle if it was still live, in
    /// which case the successor inherits its acquisition and the old
    /// finalizer stays silent.
    fn supersede(&self, old: HandleId) -> Option<usize> {
        let mut handles = self.handles.borrow_mut();
        match handles.get_mut(old) {
            Some(h) if h.is_live() && !h.superseded => {
                h.superseded = true;
                Some(std::mem::take(&mut h.refs))
            }
            _ => None,
        }
    }

    /// Push the identity table entry for `key` if it holds a handle
    fn lookup_identity(&self, state: &State, key: usize) -> BindResult<Option<HandleId>> {
        if state.get_registry_field(IDENTITY_TABLE) != ValueType::Table {
            state.pop(1);
            return Ok(None);
        }
        state.push_light_userdata(key);
        state.raw_get(-2).into_bind(state)?;
        match handle_id_at(state, -1) {
            Some(id) if self.handles.borrow().get(id).map_or(false, Handle::is_live) => {
                state.remove(-2);
                Ok(Some(id))
            }
            _ => {
                state.pop(2);
                Ok(None)
            }
        }
    }

    /// Push a new handle userdata for `id` and record it in the identity table
    fn create_userdata(&self, state: &State, id: HandleId, class: &str, key: usize) -> BindResult<()> {
        state.new_userdata(Rc::new(id)).into_bind(state)?;
        if state.get_registry_field(&class::metatable_key(class)) != ValueType::Table {
            state.pop(1);
            return Err(BindError::UnregisteredClass(class.to_string()));
        }
        state.set_metatable(-2).into_bind(state)?;
        state.get_registry_field(IDENTITY_TABLE);
        state.push_light_userdata(key);
        state.push_copy(-3);
        state.raw_set(-3).into_bind(state)?;
        state.pop(1);
        Ok(())
    }

    /// Object behind the handle at `index`, if it is a live handle of exactly `T`
    pub(crate) fn shared_at<T: 'static>(&self, state: &State, index: i32) -> Option<Shared<T>> {
        let id = handle_id_at(state, index)?;
        let object = self.handles.borrow().get(id)?.object.clone()?;
        Shared::from_any(object)
    }

    /// Class of the live handle at `index`
    ///
    /// Fails with [`BindError::StaleHandle`] when the handle was released or
    /// collected.
    pub(crate) fn live_class(&self, state: &State, index: i32, member: &str) -> BindResult<Rc<str>> {
        let id = handle_id_at(state, index).ok_or_else(|| BindError::ArgumentType {
            function: member.to_string(),
            position: 0,
            expected: "object".to_string(),
            got: state.type_name(index).to_string(),
        })?;
        let handles = self.handles.borrow();
        match handles.get(id) {
            Some(h) if h.is_live() => Ok(h.class.clone()),
            Some(h) => Err(BindError::StaleHandle {
                class: h.class.to_string(),
                member: member.to_string(),
            }),
            None => Err(BindError::StaleHandle {
                class: "unknown".to_string(),
                member: member.to_string(),
            }),
        }
    }

    /// Resolve the receiver in slot `index` for a member declared on `class`
    pub(crate) fn resolve_receiver(
        &self,
        state: &State,
        index: i32,
        class: &str,
        member: &str,
        want: TypeId,
    ) -> BindResult<ResolvedReceiver> {
        let bad_self = |got: &str| BindError::ArgumentType {
            function: member.to_string(),
            position: 0,
            expected: class.to_string(),
            got: got.to_string(),
        };
        let Some(id) = handle_id_at(state, index) else {
            return Err(bad_self(state.type_name(index)));
        };
        let (object, dynamic) = {
            let handles = self.handles.borrow();
            let Some(h) = handles.get(id) else {
                return Err(BindError::StaleHandle {
                    class: class.to_string(),
                    member: member.to_string(),
                });
            };
            match &h.object {
                Some(object) => (object.clone(), h.class.clone()),
                None => {
                    return Err(BindError::StaleHandle {
                        class: h.class.to_string(),
                        member: member.to_string(),
                    })
                }
            }
        };

        let entry = self
            .class_named(&dynamic)
            .ok_or_else(|| BindError::UnregisteredClass(dynamic.to_string()))?;
        let mut path = Vec::new();
        let mut current = entry.clone();
        while current.type_id != want {
            let Some(link) = current.base.clone() else {
                return Err(bad_self(&dynamic));
            };
            current = self
                .class_named(&link.name)
                .ok_or_else(|| BindError::UnregisteredClass(link.name.to_string()))?;
            path.push(link);
        }
        Ok(ResolvedReceiver::new(object, entry, &path))
    }

    // ========================================================================
    // Release and finalization
    // ========================================================================

    /// Release the handle of the object with identity `key`
    ///
    /// Returns `false` if the object has no live handle.
    pub(crate) fn release(&self, engine: &Engine, key: usize) -> BindResult<bool> {
        let Some(id) = self.handles.borrow().find(key) else {
            return Ok(false);
        };
        let (object, class) = {
            let mut handles = self.handles.borrow_mut();
            let Some(h) = handles.get_mut(id) else {
                return Ok(false);
            };
            let Some(object) = h.object.take() else {
                return Ok(false);
            };
            h.refs = 0;
            let class = h.class.clone();
            handles.forget_key(key, id);
            (object, class)
        };
        self.detach_identity(engine.state(), key)?;
        debug!(event = "object_released", class = %class, key);
        self.fire_release(engine, &class, &object);
        Ok(true)
    }

    /// Drop one native-visible reference, releasing at zero
    pub(crate) fn unref(&self, engine: &Engine, key: usize) -> BindResult<usize> {
        let remaining = {
            let mut handles = self.handles.borrow_mut();
            let Some(h) = handles.find(key).and_then(|id| handles.get_mut(id)) else {
                return Ok(0);
            };
            h.refs = h.refs.saturating_sub(1);
            h.refs
        };
        if remaining == 0 {
            self.release(engine, key)?;
        }
        Ok(remaining)
    }

    /// Native-visible references of the object with identity `key`
    pub(crate) fn ref_count(&self, key: usize) -> usize {
        let handles = self.handles.borrow();
        handles
            .find(key)
            .and_then(|id| handles.get(id))
            .filter(|h| h.is_live())
            .map_or(0, |h| h.refs)
    }

    /// Lifecycle state of the object with identity `key`
    pub(crate) fn object_state(&self, key: usize) -> HandleState {
        let handles = self.handles.borrow();
        match handles.find(key) {
            Some(id) => handles.state(id),
            None => HandleState::Unexposed,
        }
    }

    /// Lifecycle state of the handle at `index`, `None` if it is not a handle
    pub(crate) fn handle_state_at(&self, state: &State, index: i32) -> Option<HandleState> {
        handle_id_at(state, index).map(|id| self.handles.borrow().state(id))
    }

    /// Number of handles not yet finalized
    pub fn handle_count(&self) -> usize {
        self.handles.borrow().len()
    }

    /// Finalize the handle userdata at `index`
    pub(crate) fn finalize(&self, engine: &Engine, index: i32) -> BindResult<()> {
        let state = engine.state();
        let Some(id) = handle_id_at(state, index) else {
            return Ok(());
        };
        let Some(handle) = self.handles.borrow_mut().remove(id) else {
            return Ok(());
        };
        self.forget_identity(state, handle.key, index)?;
        debug!(event = "object_collected", class = %handle.class, key = handle.key);
        if let (Some(object), false) = (&handle.object, handle.superseded) {
            self.fire_release(engine, &handle.class, object);
        }
        Ok(())
    }

    fn fire_release(&self, engine: &Engine, class: &str, object: &Rc<dyn Any>) {
        if let Some(hook) = self.class_named(class).and_then(|e| e.on_release.clone()) {
            hook(engine, object);
        }
    }

    /// Remove the identity entry of `key` and clear its side table
    fn detach_identity(&self, state: &State, key: usize) -> BindResult<()> {
        let _guard = StackGuard::new(state);
        state.get_registry_field(IDENTITY_TABLE);
        state.push_light_userdata(key);
        state.raw_get(-2).into_bind(state)?;
        if state.is_userdata(-1) {
            state.push_nil();
            state.set_user_value(-2).into_bind(state)?;
        }
        state.pop(1);
        state.push_light_userdata(key);
        state.push_nil();
        state.raw_set(-3).into_bind(state)?;
        Ok(())
    }

    /// Remove the identity entry of `key` if it still refers to the value at `index`
    fn forget_identity(&self, state: &State, key: usize, index: i32) -> BindResult<()> {
        let index = state.abs_index(index);
        let _guard = StackGuard::new(state);
        if state.get_registry_field(IDENTITY_TABLE) != ValueType::Table {
            return Ok(());
        }
        state.push_light_userdata(key);
        state.raw_get(-2).into_bind(state)?;
        if state.raw_equal(-1, index) {
            state.pop(1);
            state.push_light_userdata(key);
            state.push_nil();
            state.raw_set(-3).into_bind(state)?;
        }
        Ok(())
    }
}

impl fmt::Debug for ObjectBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectBridge")
            .field("classes", &self.class_names())
            .field("handles", &self.handle_count())
            .finish()
    }
}
