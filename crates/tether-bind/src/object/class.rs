//! Managed class metadata and handle metatables
//!
//! A [`ClassEntry`] erases the native type of a managed class behind plain
//! function pointers: borrowing the object out of its `RefCell`, and
//! projecting a derived object onto its base. Member calls walk those
//! projections from the dynamic class of the handle up to the class that
//! declared the member.

use super::handle::HandleId;
use crate::binder::{push_bound, BoundFunction, Frame, Receiver};
use crate::engine::Engine;
use crate::error::{BindError, BindResult, VmResultExt};
use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::marker::PhantomData;
use std::rc::Rc;
use tether_core::{State, Value, ValueType};

/// Registry field of the weak identity table
pub(crate) const IDENTITY_TABLE: &str = "tether.identity";

/// Registry field of the handle metatable of `class`
pub(crate) fn metatable_key(class: &str) -> String {
    format!("tether.class.{}", class)
}

/// Registry field of the method table of `class`
pub(crate) fn methods_key(class: &str) -> String {
    format!("tether.methods.{}", class)
}

/// Registry field of the table published for singleton `class`
pub(crate) fn singleton_key(class: &str) -> String {
    format!("tether.singleton.{}", class)
}

/// Lifecycle hook of a managed class
pub(crate) type Hook = Rc<dyn Fn(&Engine, &Rc<dyn Any>)>;

type BorrowMutFn = fn(&dyn Any, &mut dyn FnMut(&mut dyn Any)) -> bool;
type BorrowRefFn = fn(&dyn Any, &mut dyn FnMut(&dyn Any)) -> bool;
pub(crate) type UpcastMutFn = fn(&mut dyn Any) -> Option<&mut dyn Any>;
pub(crate) type UpcastRefFn = fn(&dyn Any) -> Option<&dyn Any>;

/// Link from a derived class to its base
#[derive(Clone)]
pub(crate) struct BaseLink {
    pub name: Rc<str>,
    pub type_id: TypeId,
    pub upcast_mut: UpcastMutFn,
    pub upcast_ref: UpcastRefFn,
}

/// Type-erased description of a managed class
#[derive(Clone)]
pub(crate) struct ClassEntry {
    pub name: Rc<str>,
    pub type_id: TypeId,
    pub type_name: &'static str,
    pub base: Option<BaseLink>,
    pub borrow_mut: BorrowMutFn,
    pub borrow_ref: BorrowRefFn,
    pub on_acquire: Option<Hook>,
    pub on_release: Option<Hook>,
}

impl ClassEntry {
    pub fn new<T: 'static>(name: &str) -> Self {
        Self {
            name: Rc::from(name),
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            base: None,
            borrow_mut: borrow_mut_of::<T>,
            borrow_ref: borrow_ref_of::<T>,
            on_acquire: None,
            on_release: None,
        }
    }

    pub fn set_base<D, B>(&mut self, base: &str)
    where
        D: AsRef<B> + AsMut<B> + 'static,
        B: 'static,
    {
        self.base = Some(BaseLink {
            name: Rc::from(base),
            type_id: TypeId::of::<B>(),
            upcast_mut: upcast_mut_of::<D, B>,
            upcast_ref: upcast_ref_of::<D, B>,
        });
    }
}

fn borrow_mut_of<T: 'static>(obj: &dyn Any, f: &mut dyn FnMut(&mut dyn Any)) -> bool {
    match obj.downcast_ref::<RefCell<T>>().map(RefCell::try_borrow_mut) {
        Some(Ok(mut guard)) => {
            f(&mut *guard);
            true
        }
        _ => false,
    }
}

fn borrow_ref_of<T: 'static>(obj: &dyn Any, f: &mut dyn FnMut(&dyn Any)) -> bool {
    match obj.downcast_ref::<RefCell<T>>().map(RefCell::try_borrow) {
        Some(Ok(guard)) => {
            f(&*guard);
            true
        }
        _ => false,
    }
}

fn upcast_mut_of<D: AsMut<B> + 'static, B: 'static>(obj: &mut dyn Any) -> Option<&mut dyn Any> {
    obj.downcast_mut::<D>()
        .map(|d| <D as AsMut<B>>::as_mut(d) as &mut dyn Any)
}

fn upcast_ref_of<D: AsRef<B> + 'static, B: 'static>(obj: &dyn Any) -> Option<&dyn Any> {
    obj.downcast_ref::<D>()
        .map(|d| <D as AsRef<B>>::as_ref(d) as &dyn Any)
}

/// Handle id stored in the userdata at `index`
pub(crate) fn handle_id_at(state: &State, index: i32) -> Option<HandleId> {
    state
        .to_userdata(index)
        .and_then(|p| p.downcast_ref::<HandleId>().copied())
}

// ============================================================================
// Receivers
// ============================================================================

/// Receiver of a managed class member: the handle in slot 1
pub struct HandleReceiver<T> {
    class: Rc<str>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> HandleReceiver<T> {
    /// Receiver for members declared on `class`
    pub fn new(class: &str) -> Self {
        Self {
            class: Rc::from(class),
            _marker: PhantomData,
        }
    }
}

/// Object behind a handle plus the projection path to the declaring class
pub struct ResolvedReceiver {
    object: Rc<dyn Any>,
    entry: Rc<ClassEntry>,
    chain_mut: Vec<UpcastMutFn>,
    chain_ref: Vec<UpcastRefFn>,
}

impl ResolvedReceiver {
    pub(crate) fn new(object: Rc<dyn Any>, entry: Rc<ClassEntry>, path: &[BaseLink]) -> Self {
        Self {
            object,
            entry,
            chain_mut: path.iter().map(|l| l.upcast_mut).collect(),
            chain_ref: path.iter().map(|l| l.upcast_ref).collect(),
        }
    }
}

fn busy(class: &str, name: &str) -> BindError {
    BindError::runtime(format!(
        "'{}' object is already in use by another native call (calling '{}')",
        class, name
    ))
}

impl<T: 'static> Receiver<T> for HandleReceiver<T> {
    type Target = ResolvedReceiver;

    fn first_arg(&self, _state: &State) -> i32 {
        2
    }

    fn resolve(&self, state: &State, name: &str) -> BindResult<ResolvedReceiver> {
        let engine = Engine::from_state(state)?;
        engine
            .objects()
            .resolve_receiver(state, 1, &self.class, name, TypeId::of::<T>())
    }

    fn with_mut<R>(
        &self,
        target: &ResolvedReceiver,
        name: &str,
        f: impl FnOnce(&mut T) -> R,
    ) -> BindResult<R> {
        let mut f = Some(f);
        let mut out = None;
        let borrowed = (target.entry.borrow_mut)(&*target.object, &mut |any: &mut dyn Any| {
            let mut cur = Some(any);
            for up in &target.chain_mut {
                cur = cur.and_then(|c| up(c));
            }
            if let (Some(this), Some(f)) = (cur.and_then(|c| c.downcast_mut::<T>()), f.take()) {
                out = Some(f(this));
            }
        });
        if !borrowed {
            return Err(busy(&target.entry.name, name));
        }
        out.ok_or_else(|| BindError::InvalidBinding(format!("'{}' cannot reach '{}'", target.entry.name, self.class)))
    }

    fn with_ref<R>(
        &self,
        target: &ResolvedReceiver,
        name: &str,
        f: impl FnOnce(&T) -> R,
    ) -> BindResult<R> {
        let mut f = Some(f);
        let mut out = None;
        let borrowed = (target.entry.borrow_ref)(&*target.object, &mut |any: &dyn Any| {
            let mut cur = Some(any);
            for up in &target.chain_ref {
                cur = cur.and_then(|c| up(c));
            }
            if let (Some(this), Some(f)) = (cur.and_then(|c| c.downcast_ref::<T>()), f.take()) {
                out = Some(f(this));
            }
        });
        if !borrowed {
            return Err(busy(&target.entry.name, name));
        }
        out.ok_or_else(|| BindError::InvalidBinding(format!("'{}' cannot reach '{}'", target.entry.name, self.class)))
    }
}

// ============================================================================
// Handle metatable
// ============================================================================

/// Key as shown in error messages
fn member_name(key: &Value) -> String {
    key.to_bytes()
        .map(|b| b.to_string_lossy())
        .unwrap_or_else(|| key.type_name().to_string())
}

/// Create the handle metatable of `class` in the registry
pub(crate) fn create_metatable(state: &State, class: &str) -> BindResult<()> {
    if !state.new_metatable(&metatable_key(class)).into_bind(state)? {
        state.pop(1);
        return Err(BindError::DuplicateBinding {
            scope: "object bridge".to_string(),
            name: class.to_string(),
        });
    }
    state.push_string(class);
    state.raw_set_field(-2, "__name").into_bind(state)?;

    let handlers = [
        ("__index", BoundFunction::raw(index_handle)),
        ("__newindex", BoundFunction::raw(newindex_handle)),
        ("__gc", BoundFunction::raw(collect_handle)),
    ];
    for (event, handler) in handlers {
        push_bound(state, handler, &format!("{}.{}", class, event))?;
        state.raw_set_field(-2, event).into_bind(state)?;
    }
    state.pop(1);
    Ok(())
}

/// `__index`: side table first, then the class method table (and its bases)
fn index_handle(frame: &Frame<'_>) -> BindResult<usize> {
    let state = frame.state();
    let engine = frame.engine()?;
    let key = frame.value(2);
    let class = engine.objects().live_class(state, 1, &member_name(&key))?;

    if state.get_user_value(1).into_bind(state)? == ValueType::Table {
        state.push_value(key.clone());
        state.raw_get(-2).into_bind(state)?;
        if !state.is_nil(-1) {
            return Ok(1);
        }
        state.pop(1);
    }
    state.pop(1);

    state.get_registry_field(&methods_key(&class));
    state.push_value(key);
    state.get_table(-2).into_bind(state)?;
    Ok(1)
}

/// `__newindex`: every write lands in the per-handle side table
fn newindex_handle(frame: &Frame<'_>) -> BindResult<usize> {
    let state = frame.state();
    let engine = frame.engine()?;
    engine
        .objects()
        .live_class(state, 1, &member_name(&frame.value(2)))?;

    if state.get_user_value(1).into_bind(state)? != ValueType::Table {
        state.pop(1);
        state.new_table().into_bind(state)?;
        state.push_copy(-1);
        state.set_user_value(1).into_bind(state)?;
    }
    state.push_copy(2);
    state.push_copy(3);
    state.raw_set(-3).into_bind(state)?;
    state.pop(1);
    Ok(0)
}

/// `__gc`: final reclamation of the handle
fn collect_handle(frame: &Frame<'_>) -> BindResult<usize> {
    let engine = frame.engine()?;
    engine.objects().finalize(&engine, 1)?;
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Base {
        id: u32,
    }

    struct Derived {
        base: Base,
    }

    impl AsRef<Base> for Derived {
        fn as_ref(&self) -> &Base {
            &self.base
        }
    }

    impl AsMut<Base> for Derived {
        fn as_mut(&mut self) -> &mut Base {
            &mut self.base
        }
    }

    #[test]
    fn test_upcast_projection() {
        let mut entry = ClassEntry::new::<Derived>("Derived");
        entry.set_base::<Derived, Base>("Base");
        let link = entry.base.clone().unwrap();
        assert_eq!(link.type_id, TypeId::of::<Base>());

        let object: Rc<dyn Any> = Rc::new(RefCell::new(Derived {
            base: Base { id: 7 },
        }));
        let target = ResolvedReceiver::new(object, Rc::new(entry), &[link]);
        let receiver = HandleReceiver::<Base>::new("Base");
        let id = receiver.with_ref(&target, "Base:id", |b| b.id).unwrap();
        assert_eq!(id, 7);
        receiver
            .with_mut(&target, "Base:set", |b| b.id = 9)
            .unwrap();
        assert_eq!(receiver.with_ref(&target, "Base:id", |b| b.id).unwrap(), 9);
    }

    #[test]
    fn test_borrow_conflict_reported() {
        let entry = Rc::new(ClassEntry::new::<Base>("Base"));
        let cell = Rc::new(RefCell::new(Base { id: 1 }));
        let object: Rc<dyn Any> = cell.clone();
        let target = ResolvedReceiver::new(object, entry, &[]);
        let receiver = HandleReceiver::<Base>::new("Base");
        let _held = cell.borrow_mut();
        let err = receiver.with_ref(&target, "Base:id", |b| b.id).unwrap_err();
        assert_eq!(err.name(), "RuntimeError");
    }

    #[test]
    fn test_keys() {
        assert_eq!(metatable_key("Dummy"), "tether.class.Dummy");
        assert_eq!(methods_key("Dummy"), "tether.methods.Dummy");
        assert_eq!(singleton_key("g_test"), "tether.singleton.g_test");
    }
}
