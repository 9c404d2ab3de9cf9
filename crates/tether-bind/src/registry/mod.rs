//! Binding registry
//!
//! Declarations accumulate in a [`Registry`] without touching any runtime.
//! Name collisions are rejected at declaration time, so a misconfiguration
//! fails at startup regardless of the order in which modules declare their
//! bindings. [`Engine::apply`](crate::Engine::apply) later materializes the
//! whole registry inside one runtime.
//!
//! # Example
//!
//! ```
//! use tether_bind::{Engine, Registry};
//!
//! let mut registry = Registry::new();
//! registry.declare_global("add", |a: i64, b: i64| a + b).unwrap();
//! registry
//!     .declare_namespace("mathex")
//!     .unwrap()
//!     .add_static("lerp", |a: f64, b: f64, t: f64| a + (b - a) * t)
//!     .unwrap();
//!
//! let engine = Engine::new().unwrap();
//! engine.apply(&registry).unwrap();
//! assert_eq!(engine.call::<_, i64>("add", (3, 4)).unwrap(), 7);
//! ```

mod builder;
pub mod global;

pub use builder::{ClassBuilder, NamespaceBuilder, SingletonBuilder};
pub use global::{collect, submit, submitted_modules};

use crate::binder::{push_bound, BoundFunction, Frame, IntoFunction};
use crate::engine::Engine;
use crate::error::{BindError, BindResult, VmResultExt};
use crate::marshal::StackGuard;
use crate::object::class::{methods_key, singleton_key, ClassEntry};
use crate::object::Shared;
use indexmap::IndexMap;
use std::any::TypeId;
use tether_core::ValueType;
use tracing::debug;

/// Scope name used for top-level declarations in errors
const GLOBAL_SCOPE: &str = "global scope";

/// Kind of a declared class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassKind {
    /// Table of static functions
    Namespace,
    /// One native instance fixed at declaration time
    Singleton,
    /// Reference-tracked objects exposed through handles
    Managed,
}

/// How a class binding is called
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingScope {
    /// Top-level function
    Global,
    /// `Class.name(...)`
    Static,
    /// `obj:name(...)`
    Member,
}

/// One declared function
#[derive(Debug, Clone)]
pub struct Binding {
    name: String,
    scope: BindingScope,
    function: BoundFunction,
}

impl Binding {
    /// Name used in errors and tracebacks (`Class.name` or `Class:name`)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Call style
    pub fn scope(&self) -> BindingScope {
        self.scope
    }

    /// The adapted function
    pub fn function(&self) -> &BoundFunction {
        &self.function
    }
}

/// Declared namespace or class
pub struct ClassDescriptor {
    name: String,
    kind: ClassKind,
    base: Option<String>,
    bindings: IndexMap<String, Binding>,
    entry: Option<ClassEntry>,
}

impl ClassDescriptor {
    fn new(name: &str, kind: ClassKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            base: None,
            bindings: IndexMap::new(),
            entry: None,
        }
    }

    /// Class name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Class kind
    pub fn kind(&self) -> ClassKind {
        self.kind
    }

    /// Base class, for managed classes
    pub fn base(&self) -> Option<&str> {
        self.base.as_deref()
    }

    /// Declared function names in declaration order
    pub fn binding_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.bindings.keys().map(String::as_str)
    }

    /// Declared function `name`
    pub fn binding(&self, name: &str) -> Option<&Binding> {
        self.bindings.get(name)
    }

    fn scope_name(&self) -> String {
        let kind = match self.kind {
            ClassKind::Namespace => "namespace",
            ClassKind::Singleton => "singleton",
            ClassKind::Managed => "class",
        };
        format!("{} '{}'", kind, self.name)
    }

    fn add(&mut self, name: &str, scope: BindingScope, function: BoundFunction) -> BindResult<()> {
        if self.bindings.contains_key(name) {
            return Err(BindError::DuplicateBinding {
                scope: self.scope_name(),
                name: name.to_string(),
            });
        }
        let sep = if scope == BindingScope::Member { ':' } else { '.' };
        self.bindings.insert(
            name.to_string(),
            Binding {
                name: format!("{}{}{}", self.name, sep, name),
                scope,
                function,
            },
        );
        Ok(())
    }
}

/// Accumulated binding declarations
#[derive(Default)]
pub struct Registry {
    globals: IndexMap<String, Binding>,
    classes: IndexMap<String, ClassDescriptor>,
}

impl Registry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    fn check_free(&self, name: &str) -> BindResult<()> {
        if name.is_empty() || name.contains('.') {
            return Err(BindError::InvalidBinding(format!("invalid binding name '{}'", name)));
        }
        if self.globals.contains_key(name) || self.classes.contains_key(name) {
            return Err(BindError::DuplicateBinding {
                scope: GLOBAL_SCOPE.to_string(),
                name: name.to_string(),
            });
        }
        Ok(())
    }

    fn insert_global(&mut self, name: &str, function: BoundFunction) -> BindResult<()> {
        self.check_free(name)?;
        self.globals.insert(
            name.to_string(),
            Binding {
                name: name.to_string(),
                scope: BindingScope::Global,
                function,
            },
        );
        Ok(())
    }

    // ========================================================================
    // Declarations
    // ========================================================================

    /// Declare global function `name`
    pub fn declare_global<M, F: IntoFunction<M>>(&mut self, name: &str, f: F) -> BindResult<()> {
        self.insert_global(name, f.into_function())
    }

    /// Declare global frame-level function `name`
    pub fn declare_global_raw<F>(&mut self, name: &str, f: F) -> BindResult<()>
    where
        F: Fn(&Frame<'_>) -> BindResult<usize> + 'static,
    {
        self.insert_global(name, BoundFunction::raw(f))
    }

    /// Declare namespace `name`, or reopen it if already declared
    pub fn declare_namespace(&mut self, name: &str) -> BindResult<NamespaceBuilder<'_>> {
        let reopen = matches!(self.classes.get(name), Some(c) if c.kind == ClassKind::Namespace);
        if !reopen {
            self.check_free(name)?;
            self.classes
                .insert(name.to_string(), ClassDescriptor::new(name, ClassKind::Namespace));
        }
        Ok(NamespaceBuilder::new(self.descriptor_mut(name)?))
    }

    /// Declare singleton class `name` bound to `instance`
    ///
    /// Members run against `instance`; scripts may call them with `:` or `.`.
    pub fn declare_singleton<T: 'static>(
        &mut self,
        name: &str,
        instance: Shared<T>,
    ) -> BindResult<SingletonBuilder<'_, T>> {
        self.check_free(name)?;
        self.classes
            .insert(name.to_string(), ClassDescriptor::new(name, ClassKind::Singleton));
        Ok(SingletonBuilder::new(self.descriptor_mut(name)?, instance))
    }

    /// Declare managed class `name` for native type `T`
    pub fn declare_managed_class<T: 'static>(&mut self, name: &str) -> BindResult<ClassBuilder<'_, T>> {
        self.insert_managed(name, ClassEntry::new::<T>(name), None)?;
        Ok(ClassBuilder::new(self.descriptor_mut(name)?))
    }

    /// Declare managed class `name` for `T`, deriving from class `base`
    ///
    /// Members declared on `base` run on `T` objects through `T`'s
    /// `AsRef`/`AsMut` projection. `base` may be declared later in this
    /// registry or may already be applied to the engine.
    pub fn declare_derived_class<T, B>(&mut self, name: &str, base: &str) -> BindResult<ClassBuilder<'_, T>>
    where
        T: AsRef<B> + AsMut<B> + 'static,
        B: 'static,
    {
        if base == name {
            return Err(BindError::InvalidBinding(format!(
                "class '{}' cannot derive from itself",
                name
            )));
        }
        let mut entry = ClassEntry::new::<T>(name);
        entry.set_base::<T, B>(base);
        self.insert_managed(name, entry, Some(base))?;
        Ok(ClassBuilder::new(self.descriptor_mut(name)?))
    }

    fn insert_managed(&mut self, name: &str, entry: ClassEntry, base: Option<&str>) -> BindResult<()> {
        self.check_free(name)?;
        if let Some(other) = self
            .classes
            .values()
            .find(|c| c.entry.as_ref().map(|e| e.type_id) == Some(entry.type_id))
        {
            return Err(BindError::InvalidBinding(format!(
                "native type '{}' is already bound as class '{}'",
                entry.type_name, other.name
            )));
        }
        let mut descriptor = ClassDescriptor::new(name, ClassKind::Managed);
        descriptor.base = base.map(str::to_string);
        descriptor.entry = Some(entry);
        self.classes.insert(name.to_string(), descriptor);
        Ok(())
    }

    fn descriptor_mut(&mut self, name: &str) -> BindResult<&mut ClassDescriptor> {
        self.classes
            .get_mut(name)
            .ok_or_else(|| BindError::InvalidBinding(format!("class '{}' is not declared", name)))
    }

    /// Merge every declaration of `other` into this registry
    ///
    /// Fails on the first collision; namespaces declared in both are merged.
    pub fn merge(&mut self, other: Registry) -> BindResult<()> {
        for (name, binding) in other.globals {
            self.insert_global(&name, binding.function)?;
        }
        for (name, descriptor) in other.classes {
            match self.classes.get_mut(&name) {
                Some(existing)
                    if existing.kind == ClassKind::Namespace
                        && descriptor.kind == ClassKind::Namespace =>
                {
                    for (fname, binding) in descriptor.bindings {
                        existing.add(&fname, binding.scope, binding.function)?;
                    }
                }
                _ => {
                    self.check_free(&name)?;
                    if let Some(entry) = &descriptor.entry {
                        if self
                            .classes
                            .values()
                            .any(|c| c.entry.as_ref().map(|e| e.type_id) == Some(entry.type_id))
                        {
                            return Err(BindError::InvalidBinding(format!(
                                "native type '{}' is already bound",
                                entry.type_name
                            )));
                        }
                    }
                    self.classes.insert(name, descriptor);
                }
            }
        }
        Ok(())
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    /// Declared global function names
    pub fn global_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.globals.keys().map(String::as_str)
    }

    /// Declared global function `name`
    pub fn global(&self, name: &str) -> Option<&Binding> {
        self.globals.get(name)
    }

    /// Declared class names
    pub fn class_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.classes.keys().map(String::as_str)
    }

    /// Declared namespace or class `name`
    pub fn class(&self, name: &str) -> Option<&ClassDescriptor> {
        self.classes.get(name)
    }

    /// Whether nothing was declared
    pub fn is_empty(&self) -> bool {
        self.globals.is_empty() && self.classes.is_empty()
    }

    // ========================================================================
    // Application
    // ========================================================================

    /// Materialize every declaration inside `engine`
    ///
    /// Everything is validated before the runtime is touched: base classes
    /// must resolve to managed classes of the projected native type, the
    /// hierarchy must be acyclic and no declared name may already be a
    /// global of the engine.
    pub(crate) fn apply(&self, engine: &Engine) -> BindResult<()> {
        let order = self.class_order(engine)?;
        self.check_globals(engine)?;

        let state = engine.state();
        let _guard = StackGuard::new(state);

        for name in &order {
            if let Some(entry) = &self.classes[name.as_str()].entry {
                engine.objects().register_class(state, entry.clone())?;
            }
        }

        for (name, binding) in &self.globals {
            push_bound(state, binding.function.clone(), &binding.name)?;
            state.set_global(name).into_bind(state)?;
        }

        for name in &order {
            self.publish_class(engine, &self.classes[name.as_str()])?;
        }

        debug!(
            event = "bindings_applied",
            globals = self.globals.len(),
            classes = self.classes.len()
        );
        Ok(())
    }

    /// Class names ordered so every base precedes its derived classes
    fn class_order(&self, engine: &Engine) -> BindResult<Vec<String>> {
        for descriptor in self.classes.values() {
            self.check_base(engine, descriptor)?;
        }

        let mut order: Vec<String> = Vec::with_capacity(self.classes.len());
        for name in self.classes.keys() {
            let mut chain = Vec::new();
            let mut current = Some(name.as_str());
            while let Some(n) = current {
                if order.iter().any(|o| o == n) {
                    break;
                }
                if chain.contains(&n) {
                    return Err(BindError::InvalidBinding(format!(
                        "class hierarchy of '{}' is cyclic",
                        name
                    )));
                }
                chain.push(n);
                current = self
                    .classes
                    .get(n)
                    .and_then(|c| c.base.as_deref())
                    .filter(|b| self.classes.contains_key(*b));
            }
            order.extend(chain.into_iter().rev().map(str::to_string));
        }
        Ok(order)
    }

    /// Base of `descriptor` must be a managed class of the projected type
    fn check_base(&self, engine: &Engine, descriptor: &ClassDescriptor) -> BindResult<()> {
        let (Some(base), Some(entry)) = (&descriptor.base, &descriptor.entry) else {
            return Ok(());
        };
        let expected = entry.base.as_ref().map(|l| l.type_id);
        let found: Option<TypeId> = match self.classes.get(base) {
            Some(c) => match &c.entry {
                Some(e) => Some(e.type_id),
                None => {
                    return Err(BindError::InvalidBinding(format!(
                        "base '{}' of class '{}' is not a managed class",
                        base, descriptor.name
                    )))
                }
            },
            None => engine.objects().class_named(base).map(|e| e.type_id),
        };
        match found {
            None => Err(BindError::UnregisteredClass(base.clone())),
            Some(t) if Some(t) != expected => Err(BindError::InvalidBinding(format!(
                "base '{}' of class '{}' is bound to a different native type",
                base, descriptor.name
            ))),
            Some(_) => Ok(()),
        }
    }

    /// No declared name may shadow an existing global
    ///
    /// A namespace may extend an existing global table.
    fn check_globals(&self, engine: &Engine) -> BindResult<()> {
        let state = engine.state();
        let names = self
            .globals
            .keys()
            .map(|n| (n, false))
            .chain(
                self.classes
                    .iter()
                    .map(|(n, c)| (n, c.kind == ClassKind::Namespace)),
            );
        for (name, extensible) in names {
            let _guard = StackGuard::new(state);
            let found = state.get_global(name).into_bind(state)?;
            if found != ValueType::Nil && !(extensible && found == ValueType::Table) {
                return Err(BindError::DuplicateBinding {
                    scope: GLOBAL_SCOPE.to_string(),
                    name: name.clone(),
                });
            }
        }
        Ok(())
    }

    /// Build the class table of `descriptor` and publish it as a global
    ///
    /// An existing global table of the same name is extended, so a namespace
    /// may be applied from several registries.
    fn publish_class(&self, engine: &Engine, descriptor: &ClassDescriptor) -> BindResult<()> {
        let state = engine.state();
        let _guard = StackGuard::new(state);

        let reuse = descriptor.kind == ClassKind::Namespace
            && match state.get_global(&descriptor.name).into_bind(state)? {
                ValueType::Table => true,
                _ => {
                    state.pop(1);
                    false
                }
            };
        if !reuse {
            state
                .create_table(0, descriptor.bindings.len())
                .into_bind(state)?;
        }

        for (name, binding) in &descriptor.bindings {
            if reuse {
                state.raw_get_field(-1, name).into_bind(state)?;
                let taken = !state.is_nil(-1);
                state.pop(1);
                if taken {
                    return Err(BindError::DuplicateBinding {
                        scope: descriptor.scope_name(),
                        name: name.clone(),
                    });
                }
            }
            push_bound(state, binding.function.clone(), &binding.name)?;
            state.raw_set_field(-2, name).into_bind(state)?;
        }

        if let Some(base) = &descriptor.base {
            state.create_table(0, 1).into_bind(state)?;
            if state.get_registry_field(&methods_key(base)) != ValueType::Table {
                return Err(BindError::UnregisteredClass(base.clone()));
            }
            state.raw_set_field(-2, "__index").into_bind(state)?;
            state.set_metatable(-2).into_bind(state)?;
        }

        match descriptor.kind {
            ClassKind::Managed => {
                state.push_copy(-1);
                state.set_registry_field(&methods_key(&descriptor.name)).into_bind(state)?;
            }
            ClassKind::Singleton => {
                state.push_copy(-1);
                state.set_registry_field(&singleton_key(&descriptor.name)).into_bind(state)?;
            }
            ClassKind::Namespace => {}
        }
        state.set_global(&descriptor.name).into_bind(state)?;
        debug!(
            event = "class_published",
            class = %descriptor.name,
            kind = ?descriptor.kind,
            bindings = descriptor.bindings.len()
        );
        Ok(())
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("globals", &self.globals.keys().collect::<Vec<_>>())
            .field("classes", &self.classes.keys().collect::<Vec<_>>())
            .finish()
    }
}
