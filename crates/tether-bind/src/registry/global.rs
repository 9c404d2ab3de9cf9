//! Process-wide declaration accumulator
//!
//! Independent modules submit a registration function under a unique
//! module name, in any order, typically from their own initialization
//! code. The embedding host later calls [`collect`] once to run every
//! submission into a fresh [`Registry`] and applies it.
//!
//! Submissions are plain function pointers so the accumulator can live in
//! a `static`; the bindings themselves are built on the collecting thread.

use super::Registry;
use crate::error::{BindError, BindResult};
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use parking_lot::Mutex;

/// Registration function of one module
pub type RegisterFn = fn(&mut Registry) -> BindResult<()>;

static SUBMISSIONS: Lazy<Mutex<IndexMap<&'static str, RegisterFn>>> =
    Lazy::new(|| Mutex::new(IndexMap::new()));

/// Submit the declarations of `module`
///
/// Fails with [`BindError::DuplicateBinding`] if a module of that name was
/// already submitted.
pub fn submit(module: &'static str, register: RegisterFn) -> BindResult<()> {
    let mut submissions = SUBMISSIONS.lock();
    if submissions.contains_key(module) {
        return Err(BindError::DuplicateBinding {
            scope: "module accumulator".to_string(),
            name: module.to_string(),
        });
    }
    submissions.insert(module, register);
    Ok(())
}

/// Names of the submitted modules, in submission order
pub fn submitted_modules() -> Vec<&'static str> {
    SUBMISSIONS.lock().keys().copied().collect()
}

/// Run every submission into a new registry
///
/// The first failing module aborts collection; its error is returned with
/// the module name attached when it is not already a typed binding error.
pub fn collect() -> BindResult<Registry> {
    let submissions: Vec<(&'static str, RegisterFn)> = SUBMISSIONS
        .lock()
        .iter()
        .map(|(name, f)| (*name, *f))
        .collect();

    let mut registry = Registry::new();
    for (module, register) in submissions {
        register(&mut registry).map_err(|e| match e {
            BindError::Native { message } => BindError::InvalidBinding(format!(
                "module '{}' failed to register: {}",
                module, message
            )),
            other => other,
        })?;
    }
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn register_geometry(registry: &mut Registry) -> BindResult<()> {
        registry.declare_global("geometry_area", |w: f64, h: f64| w * h)
    }

    fn register_geometry_again(registry: &mut Registry) -> BindResult<()> {
        registry.declare_global("geometry_area", |w: f64| w * w)
    }

    #[test]
    fn test_duplicate_module_rejected() {
        submit("global_tests.geometry", register_geometry).unwrap();
        let err = submit("global_tests.geometry", register_geometry).unwrap_err();
        assert_eq!(err.name(), "DuplicateBindingError");
        assert!(submitted_modules().contains(&"global_tests.geometry"));
    }

    #[test]
    fn test_collision_across_modules() {
        let mut registry = Registry::new();
        register_geometry(&mut registry).unwrap();
        let err = register_geometry_again(&mut registry).unwrap_err();
        assert_eq!(err.name(), "DuplicateBindingError");
    }
}
