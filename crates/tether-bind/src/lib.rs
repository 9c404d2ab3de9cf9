//! Tether Binding Layer
//!
//! Bridges statically typed Rust code to the embedded runtime of
//! [`tether_core`]:
//! - Value marshaling through the [`Push`] and [`Pull`] traits (scalars,
//!   strings, containers, tuples, callables, shared objects)
//! - Function binding: any closure or function of up to eight parameters
//!   becomes a runtime native with positional argument errors
//! - A two-phase binding [`Registry`] applied once to an [`Engine`]
//! - An object bridge preserving identity and lifetime of exposed native
//!   objects, with per-handle field storage and base-class member lookup
//!
//! # Example
//!
//! ```
//! use tether_bind::{Engine, Registry, Shared};
//!
//! struct Counter {
//!     n: i64,
//! }
//!
//! let mut registry = Registry::new();
//! registry
//!     .declare_managed_class::<Counter>("Counter")
//!     .unwrap()
//!     .add_static("new", |n: i64| Shared::new(Counter { n }))
//!     .unwrap()
//!     .add_member("bump", |c: &mut Counter, by: i64| {
//!         c.n += by;
//!         c.n
//!     })
//!     .unwrap();
//!
//! let engine = Engine::new().unwrap();
//! engine.apply(&registry).unwrap();
//!
//! let counter = Shared::new(Counter { n: 1 });
//! let handle = engine.to_ref(&counter).unwrap();
//! let n: i64 = engine.call_method(&handle, "bump", (41,)).unwrap();
//! assert_eq!(n, 42);
//! assert_eq!(counter.borrow().n, 42);
//! engine.close();
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod binder;
pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod marshal;
pub mod object;
pub mod registry;

pub use tether_core as core;

pub use binder::{BindingKind, BoundFunction, Frame, InstanceReceiver, IntoFunction, IntoMethod, Receiver};
pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{BindError, BindResult, ErrorObject, PullError};
pub use marshal::{
    Callback, Pull, PullMulti, Push, PushArgs, ScriptFunction, ScriptRef, StackGuard,
};
pub use object::{address_of, HandleId, HandleState, ObjectBridge, Shared};
pub use registry::{
    Binding, BindingScope, ClassBuilder, ClassDescriptor, ClassKind, NamespaceBuilder, Registry,
    SingletonBuilder,
};

/// Declare a fieldless enum marshaled through its integer representation
///
/// Pushing yields the discriminant; pulling accepts only declared
/// discriminants.
///
/// ```
/// use tether_bind::script_enum;
///
/// script_enum! {
///     /// Log severity
///     pub enum Severity: u8 {
///         Info = 0,
///         Warning = 1,
///         Fatal = 2,
///     }
/// }
///
/// assert_eq!(Severity::Fatal as u8, 2);
/// ```
#[macro_export]
macro_rules! script_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident : $repr:ident {
            $($(#[$vmeta:meta])* $variant:ident = $value:expr),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr($repr)]
        $vis enum $name {
            $($(#[$vmeta])* $variant = $value),+
        }

        impl $crate::Push for $name {
            fn push_value(self, state: &$crate::core::State) -> $crate::BindResult<usize> {
                $crate::Push::push_value(self as $repr, state)
            }
        }

        impl $crate::Pull for $name {
            fn pull(
                state: &$crate::core::State,
                index: i32,
            ) -> ::std::result::Result<Self, $crate::PullError> {
                let raw = <$repr as $crate::Pull>::pull(state, index)?;
                $(
                    if raw == $name::$variant as $repr {
                        return Ok($name::$variant);
                    }
                )+
                Err($crate::PullError::new(
                    stringify!($name),
                    format!("unknown variant {}", raw),
                ))
            }
        }
    };
}
