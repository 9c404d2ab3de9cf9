//! Full userdata: opaque native payloads owned by the collector

use crate::gc::GcRef;
use crate::value::Value;
use std::any::Any;
use std::fmt;
use std::rc::Rc;

/// Heap-resident userdata
pub struct Userdata {
    pub(crate) payload: Rc<dyn Any>,
    pub(crate) metatable: Option<GcRef>,
    pub(crate) user_value: Value,
    pub(crate) finalized: bool,
}

impl Userdata {
    /// Wrap a payload
    pub fn new(payload: Rc<dyn Any>) -> Self {
        Self {
            payload,
            metatable: None,
            user_value: Value::Nil,
            finalized: false,
        }
    }

    /// Shared payload
    pub fn payload(&self) -> &Rc<dyn Any> {
        &self.payload
    }

    /// Metatable reference
    pub fn metatable(&self) -> Option<GcRef> {
        self.metatable
    }

    /// Associated user value
    pub fn user_value(&self) -> &Value {
        &self.user_value
    }

    /// Whether the `__gc` finalizer has already been scheduled
    pub fn is_finalized(&self) -> bool {
        self.finalized
    }
}

impl fmt::Debug for Userdata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Userdata")
            .field("metatable", &self.metatable)
            .field("finalized", &self.finalized)
            .finish()
    }
}
