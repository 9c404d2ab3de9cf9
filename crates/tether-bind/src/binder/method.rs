//! Methods and their receivers
//!
//! A method is a native function whose first parameter is `&T` or `&mut T`.
//! The [`Receiver`] decides where that `T` comes from: a fixed instance
//! captured at bind time ([`InstanceReceiver`]) or the handle passed in
//! slot 1 of a managed-class call.

use super::{pull_arg, BindingKind, BoundFunction};
use crate::error::{BindError, BindResult};
use crate::marshal::{Pull, Push};
use crate::object::{class::singleton_key, Shared};
use std::rc::Rc;
use tether_core::State;

/// Source of the receiver of a bound method
pub trait Receiver<T: 'static>: 'static {
    /// Receiver state resolved once per call, before the arguments are pulled
    type Target;

    /// Slot of the first declared argument
    fn first_arg(&self, state: &State) -> i32;

    /// Locate the receiver for this call
    fn resolve(&self, state: &State, name: &str) -> BindResult<Self::Target>;

    /// Run `f` with exclusive access to the receiver
    fn with_mut<R>(
        &self,
        target: &Self::Target,
        name: &str,
        f: impl FnOnce(&mut T) -> R,
    ) -> BindResult<R>;

    /// Run `f` with shared access to the receiver
    fn with_ref<R>(&self, target: &Self::Target, name: &str, f: impl FnOnce(&T) -> R)
        -> BindResult<R>;
}

/// Methods that can be bound against a receiver of type `T`
pub trait IntoMethod<T: 'static, Marker>: 'static {
    /// Build the adapter for `receiver`
    fn into_method<Rv: Receiver<T>>(self, receiver: Rv) -> BoundFunction;
}

/// Marker for methods taking `&mut T`
pub struct ByMut;

/// Marker for methods taking `&T`
pub struct ByRef;

macro_rules! impl_into_method {
    ($($arg:ident),*) => {
        #[allow(non_snake_case, unused_mut)]
        impl<T, Func, Ret, $($arg,)*> IntoMethod<T, (ByMut, Ret, $($arg,)*)> for Func
        where
            T: 'static,
            Func: Fn(&mut T, $($arg),*) -> Ret + 'static,
            Ret: Push,
            $($arg: Pull,)*
        {
            fn into_method<Rv: Receiver<T>>(self, receiver: Rv) -> BoundFunction {
                let arity = 0 $(+ <$arg as Pull>::SLOTS)*;
                BoundFunction::new(
                    BindingKind::Member,
                    Some(arity),
                    Rc::new(move |state: &State, name: &str| {
                        let target = receiver.resolve(state, name)?;
                        let first = receiver.first_arg(state);
                        let mut slot = first;
                        $(let $arg = pull_arg::<$arg>(state, &mut slot, name, first - 1)?;)*
                        receiver
                            .with_mut(&target, name, |this| (self)(this, $($arg),*))?
                            .push_value(state)
                    }),
                )
            }
        }

        #[allow(non_snake_case, unused_mut)]
        impl<T, Func, Ret, $($arg,)*> IntoMethod<T, (ByRef, Ret, $($arg,)*)> for Func
        where
            T: 'static,
            Func: Fn(&T, $($arg),*) -> Ret + 'static,
            Ret: Push,
            $($arg: Pull,)*
        {
            fn into_method<Rv: Receiver<T>>(self, receiver: Rv) -> BoundFunction {
                let arity = 0 $(+ <$arg as Pull>::SLOTS)*;
                BoundFunction::new(
                    BindingKind::Member,
                    Some(arity),
                    Rc::new(move |state: &State, name: &str| {
                        let target = receiver.resolve(state, name)?;
                        let first = receiver.first_arg(state);
                        let mut slot = first;
                        $(let $arg = pull_arg::<$arg>(state, &mut slot, name, first - 1)?;)*
                        receiver
                            .with_ref(&target, name, |this| (self)(this, $($arg),*))?
                            .push_value(state)
                    }),
                )
            }
        }
    };
}

impl_into_method!();
impl_into_method!(A1);
impl_into_method!(A1, A2);
impl_into_method!(A1, A2, A3);
impl_into_method!(A1, A2, A3, A4);
impl_into_method!(A1, A2, A3, A4, A5);
impl_into_method!(A1, A2, A3, A4, A5, A6);
impl_into_method!(A1, A2, A3, A4, A5, A6, A7);
impl_into_method!(A1, A2, A3, A4, A5, A6, A7, A8);

// ============================================================================
// Fixed instance
// ============================================================================

/// Receiver captured at bind time, for singleton classes
///
/// Calls may pass the singleton table itself in slot 1 (`obj:method()`);
/// it is skipped when present.
pub struct InstanceReceiver<T> {
    instance: Shared<T>,
    class: Rc<str>,
}

impl<T> InstanceReceiver<T> {
    /// Bind to `instance`, published under `class`
    pub fn new(instance: Shared<T>, class: &str) -> Self {
        Self {
            instance,
            class: Rc::from(class),
        }
    }

    fn busy(&self, name: &str) -> BindError {
        BindError::runtime(format!(
            "'{}' is already in use by another native call (calling '{}')",
            self.class, name
        ))
    }
}

impl<T: 'static> Receiver<T> for InstanceReceiver<T> {
    type Target = ();

    fn first_arg(&self, state: &State) -> i32 {
        if !state.is_table(1) {
            return 1;
        }
        state.get_registry_field(&singleton_key(&self.class));
        let is_self = state.raw_equal(1, -1);
        state.pop(1);
        if is_self {
            2
        } else {
            1
        }
    }

    fn resolve(&self, _state: &State, _name: &str) -> BindResult<()> {
        Ok(())
    }

    fn with_mut<R>(&self, _target: &(), name: &str, f: impl FnOnce(&mut T) -> R) -> BindResult<R> {
        let mut guard = self
            .instance
            .try_borrow_mut()
            .map_err(|_| self.busy(name))?;
        Ok(f(&mut guard))
    }

    fn with_ref<R>(&self, _target: &(), name: &str, f: impl FnOnce(&T) -> R) -> BindResult<R> {
        let guard = self.instance.try_borrow().map_err(|_| self.busy(name))?;
        Ok(f(&guard))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binder::push_bound;
    use crate::binder::protected_call;

    struct Counter {
        n: i32,
    }

    impl Counter {
        fn get(&self) -> i32 {
            self.n
        }
    }

    fn run(state: &State, f: BoundFunction, args: &[i64]) -> BindResult<Option<i64>> {
        push_bound(state, f, "Counter.m")?;
        for a in args {
            state.push_integer(*a);
        }
        protected_call(state, args.len(), Some(1))?;
        let v = state.to_integer(-1);
        state.pop(1);
        Ok(v)
    }

    #[test]
    fn test_instance_method_mutates() {
        let state = State::new();
        let counter = Shared::new(Counter { n: 1 });
        let add = (|c: &mut Counter, by: i32| c.n += by)
            .into_method(InstanceReceiver::new(counter.clone(), "Counter"));
        assert_eq!(add.kind(), BindingKind::Member);
        assert_eq!(add.arity(), Some(1));
        run(&state, add, &[4]).unwrap();
        assert_eq!(counter.borrow().n, 5);

        let get = Counter::get.into_method(InstanceReceiver::new(counter, "Counter"));
        assert_eq!(run(&state, get, &[]).unwrap(), Some(5));
        assert_eq!(state.top(), 0);
    }

    #[test]
    fn test_method_argument_position() {
        let state = State::new();
        let counter = Shared::new(Counter { n: 0 });
        let set = (|c: &mut Counter, v: i32| c.n = v)
            .into_method(InstanceReceiver::new(counter, "Counter"));
        push_bound(&state, set, "Counter.set").unwrap();
        state.push_string("nope");
        let err = protected_call(&state, 1, None).unwrap_err();
        match err {
            BindError::ArgumentType { position, .. } => assert_eq!(position, 1),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
