//! Declaration builders
//!
//! Each builder borrows the descriptor it fills. Every `add_*` call checks
//! the name against the class's existing bindings immediately and returns
//! the builder for chaining:
//!
//! ```
//! # use tether_bind::{BindResult, Registry};
//! # fn main() -> BindResult<()> {
//! let mut registry = Registry::new();
//! registry
//!     .declare_namespace("strutil")?
//!     .add_static("upper", |s: String| s.to_uppercase())?
//!     .add_static("lower", |s: String| s.to_lowercase())?;
//! # Ok(())
//! # }
//! ```

use super::{BindingScope, ClassDescriptor};
use crate::binder::{BoundFunction, Frame, InstanceReceiver, IntoFunction, IntoMethod};
use crate::engine::Engine;
use crate::error::BindResult;
use crate::object::class::Hook;
use crate::object::{HandleReceiver, Shared};
use std::any::Any;
use std::marker::PhantomData;
use std::rc::Rc;

fn typed_hook<T, F>(f: F) -> Hook
where
    T: 'static,
    F: Fn(&Engine, &Shared<T>) + 'static,
{
    Rc::new(move |engine: &Engine, object: &Rc<dyn Any>| {
        if let Some(shared) = Shared::<T>::from_any(object.clone()) {
            f(engine, &shared);
        }
    })
}

// ============================================================================
// Namespace
// ============================================================================

/// Builder for a namespace of static functions
pub struct NamespaceBuilder<'r> {
    descriptor: &'r mut ClassDescriptor,
}

impl<'r> NamespaceBuilder<'r> {
    pub(super) fn new(descriptor: &'r mut ClassDescriptor) -> Self {
        Self { descriptor }
    }

    /// Add static function `name` (`Namespace.name(...)`)
    pub fn add_static<M, F: IntoFunction<M>>(&mut self, name: &str, f: F) -> BindResult<&mut Self> {
        self.descriptor
            .add(name, BindingScope::Static, f.into_function())?;
        Ok(self)
    }

    /// Add frame-level function `name`
    pub fn add_raw<F>(&mut self, name: &str, f: F) -> BindResult<&mut Self>
    where
        F: Fn(&Frame<'_>) -> BindResult<usize> + 'static,
    {
        self.descriptor
            .add(name, BindingScope::Static, BoundFunction::raw(f))?;
        Ok(self)
    }
}

// ============================================================================
// Singleton
// ============================================================================

/// Builder for a singleton class bound to one native instance
pub struct SingletonBuilder<'r, T> {
    descriptor: &'r mut ClassDescriptor,
    instance: Shared<T>,
}

impl<'r, T: 'static> SingletonBuilder<'r, T> {
    pub(super) fn new(descriptor: &'r mut ClassDescriptor, instance: Shared<T>) -> Self {
        Self {
            descriptor,
            instance,
        }
    }

    /// Add static function `name`
    pub fn add_static<M, F: IntoFunction<M>>(&mut self, name: &str, f: F) -> BindResult<&mut Self> {
        self.descriptor
            .add(name, BindingScope::Static, f.into_function())?;
        Ok(self)
    }

    /// Add frame-level function `name`
    pub fn add_raw<F>(&mut self, name: &str, f: F) -> BindResult<&mut Self>
    where
        F: Fn(&Frame<'_>) -> BindResult<usize> + 'static,
    {
        self.descriptor
            .add(name, BindingScope::Static, BoundFunction::raw(f))?;
        Ok(self)
    }

    /// Add member `name` running against the bound instance
    pub fn add_member<M, F: IntoMethod<T, M>>(&mut self, name: &str, f: F) -> BindResult<&mut Self> {
        let receiver = InstanceReceiver::new(self.instance.clone(), &self.descriptor.name);
        self.descriptor
            .add(name, BindingScope::Member, f.into_method(receiver))?;
        Ok(self)
    }

    /// The bound instance
    pub fn instance(&self) -> &Shared<T> {
        &self.instance
    }
}

// ============================================================================
// Managed class
// ============================================================================

/// Builder for a managed class
///
/// Members receive the object behind the handle in slot 1. Members declared
/// here also run on objects of classes deriving from this one.
pub struct ClassBuilder<'r, T> {
    descriptor: &'r mut ClassDescriptor,
    _marker: PhantomData<fn() -> T>,
}

impl<'r, T: 'static> ClassBuilder<'r, T> {
    pub(super) fn new(descriptor: &'r mut ClassDescriptor) -> Self {
        Self {
            descriptor,
            _marker: PhantomData,
        }
    }

    /// Add static function `name` (`Class.name(...)`), typically constructors
    pub fn add_static<M, F: IntoFunction<M>>(&mut self, name: &str, f: F) -> BindResult<&mut Self> {
        self.descriptor
            .add(name, BindingScope::Static, f.into_function())?;
        Ok(self)
    }

    /// Add frame-level function `name`
    pub fn add_raw<F>(&mut self, name: &str, f: F) -> BindResult<&mut Self>
    where
        F: Fn(&Frame<'_>) -> BindResult<usize> + 'static,
    {
        self.descriptor
            .add(name, BindingScope::Static, BoundFunction::raw(f))?;
        Ok(self)
    }

    /// Add member `name` (`obj:name(...)`)
    pub fn add_member<M, F: IntoMethod<T, M>>(&mut self, name: &str, f: F) -> BindResult<&mut Self> {
        let receiver = HandleReceiver::<T>::new(&self.descriptor.name);
        self.descriptor
            .add(name, BindingScope::Member, f.into_method(receiver))?;
        Ok(self)
    }

    /// Run `f` when an object gets its first handle
    pub fn set_acquire_hook<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&Engine, &Shared<T>) + 'static,
    {
        if let Some(entry) = self.descriptor.entry.as_mut() {
            entry.on_acquire = Some(typed_hook(f));
        }
        self
    }

    /// Run `f` once when an object's handle is released or collected
    pub fn set_release_hook<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&Engine, &Shared<T>) + 'static,
    {
        if let Some(entry) = self.descriptor.entry.as_mut() {
            entry.on_release = Some(typed_hook(f));
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use crate::binder::BindingKind;
    use crate::registry::{BindingScope, ClassKind, Registry};
    use crate::Shared;

    struct Clock {
        ticks: u64,
    }

    impl Clock {
        fn tick(&mut self) {
            self.ticks += 1;
        }

        fn ticks(&self) -> u64 {
            self.ticks
        }
    }

    #[test]
    fn test_singleton_members() {
        let mut registry = Registry::new();
        registry
            .declare_singleton("clock", Shared::new(Clock { ticks: 0 }))
            .unwrap()
            .add_member("tick", Clock::tick)
            .unwrap()
            .add_member("ticks", Clock::ticks)
            .unwrap()
            .add_static("resolution", || 1_000u32)
            .unwrap();

        let class = registry.class("clock").unwrap();
        assert_eq!(class.kind(), ClassKind::Singleton);
        let tick = class.binding("tick").unwrap();
        assert_eq!(tick.name(), "clock:tick");
        assert_eq!(tick.scope(), BindingScope::Member);
        assert_eq!(tick.function().kind(), BindingKind::Member);
        assert_eq!(class.binding("resolution").unwrap().name(), "clock.resolution");
    }

    #[test]
    fn test_managed_member_collision() {
        let mut registry = Registry::new();
        let mut class = registry.declare_managed_class::<Clock>("Clock").unwrap();
        class.add_static("new", || Shared::new(Clock { ticks: 0 })).unwrap();
        let err = class.add_member("new", Clock::tick).err().unwrap();
        assert_eq!(err.to_string(), "'new' is already defined in class 'Clock'");
    }

    #[test]
    fn test_raw_binding_kind() {
        let mut registry = Registry::new();
        registry
            .declare_namespace("ns")
            .unwrap()
            .add_raw("count", |frame| frame.push(frame.arg_count()))
            .unwrap();
        let binding = registry.class("ns").unwrap().binding("count").unwrap();
        assert_eq!(binding.function().kind(), BindingKind::Raw);
        assert_eq!(binding.function().arity(), None);
    }
}
